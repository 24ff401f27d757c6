//! Statistics & Stability Accountant.

use std::collections::{BTreeMap, BTreeSet};

use crate::{fabric::FabricState, solver::PrevSpineMap};

/// Cumulative counters carried across the lifetime of one engine.
#[derive(Debug, Clone, Default)]
pub struct Accountant {
    pub cumulative_reroutes: u64,
    pub cumulative_output_reroutes: u64,
    pub initial_route_count: Option<u64>,
    pub repack_count: u64,
    pub total_solve_us: u64,
    pub last_solve_us: u64,
    pub last_stability_cost: usize,
    pub last_rerouted_outputs: u64,
}

impl Accountant {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outcome of one successful solve. `rerouted_outputs`
    /// is the output-port-level churn: ports whose realised spine
    /// differs from the prior state for the same port. `prior_port_spine`
    /// is the raw `s3_port_spine[]` loaded at startup (`None` if there
    /// was no prior state); the number of its entries `>= 0` becomes
    /// `initial_route_count` the first time it's seen.
    pub fn record_solve(
        &mut self,
        stability_cost: usize,
        rerouted_outputs: u64,
        solve_us: u64,
        prior_port_spine: Option<&[i32]>,
    ) {
        if self.initial_route_count.is_none() {
            if let Some(prior) = prior_port_spine {
                self.initial_route_count = Some(prior.iter().filter(|&&spine| spine >= 0).count() as u64);
            }
        }
        self.cumulative_reroutes += stability_cost as u64;
        self.cumulative_output_reroutes += rerouted_outputs;
        self.repack_count += 1;
        self.total_solve_us += solve_us;
        self.last_solve_us = solve_us;
        self.last_stability_cost = stability_cost;
        self.last_rerouted_outputs = rerouted_outputs;
    }
}

/// Output-port-level churn: ports with both a prior and a current
/// spine that differ.
pub fn count_rerouted_outputs(
    fabric: &FabricState,
    prior_port_spine: Option<&[i32]>,
) -> u64 {
    let Some(prior) = prior_port_spine else {
        return 0;
    };
    (1..fabric.spine_vector().len() as u32)
        .filter(|&port| {
            let current = fabric.spine_at(port);
            let before = prior.get(port as usize).copied().unwrap_or(-1);
            current >= 0 && before >= 0 && current != before
        })
        .count() as u64
}

/// Fabric snapshot statistics computed on demand from committed state
/// (computed on demand from committed state).
#[derive(Debug, Clone, Default)]
pub struct FabricSnapshot {
    pub routes_active: u64,
    pub routes_preserved: u64,
    pub routes_new: u64,
    pub routes_removed: u64,
    pub multicast_fan_out_inputs: u64,
    pub branching_inputs: u64,
    pub multicast_egress_blocks: u64,
    pub max_loaded_egress_block: Option<(usize, usize)>,
    pub active_spines: u64,
    pub total_branches: u64,
}

pub fn snapshot(
    fabric: &FabricState,
    prev_spine: &PrevSpineMap,
    prior_port_spine: Option<&[i32]>,
) -> FabricSnapshot {
    let config = fabric.config();
    let n = config.n();

    let mut ports_per_input: BTreeMap<u32, u64> = BTreeMap::new();
    let mut spines_per_input: BTreeMap<u32, BTreeSet<i32>> = BTreeMap::new();
    let mut inputs_per_egress_block: BTreeMap<usize, BTreeSet<u32>> = BTreeMap::new();
    let mut routes_active = 0u64;
    let mut routes_preserved = 0u64;
    let mut routes_new = 0u64;

    for port in 1..=config.max_ports() as u32 {
        let owner = fabric.owner_at(port);
        if owner == 0 {
            continue;
        }
        routes_active += 1;
        *ports_per_input.entry(owner).or_default() += 1;
        spines_per_input
            .entry(owner)
            .or_default()
            .insert(fabric.spine_at(port));
        inputs_per_egress_block
            .entry(config.block_of(port))
            .or_default()
            .insert(owner);

        let egress_block = config.block_of(port);
        let prior = prev_spine.get(owner, egress_block);
        let current = fabric.spine_at(port);
        if prior < 0 {
            routes_new += 1;
        } else if prior == current {
            routes_preserved += 1;
        }
        // else: rerouted — neither new nor preserved.
    }

    let routes_removed = count_removed_routes(fabric, prior_port_spine);

    let multicast_fan_out_inputs = ports_per_input.values().filter(|&&count| count >= 2).count() as u64;
    let branching_inputs = spines_per_input
        .values()
        .filter(|spines| spines.len() >= 2)
        .count() as u64;
    let multicast_egress_blocks = inputs_per_egress_block
        .values()
        .filter(|inputs| inputs.len() >= 2)
        .count() as u64;
    let max_loaded_egress_block = inputs_per_egress_block
        .iter()
        .map(|(&block, inputs)| (block, inputs.len()))
        .max_by_key(|&(_, count)| count);

    let active_spines = (0..n)
        .filter(|&s| {
            (0..n).any(|b| fabric.s1_at(b, s) != 0) || (0..n).any(|e| fabric.s2_at(s, e) != 0)
        })
        .count() as u64;

    let total_branches: u64 = spines_per_input.values().map(|spines| spines.len() as u64).sum();

    FabricSnapshot {
        routes_active,
        routes_preserved,
        routes_new,
        routes_removed,
        multicast_fan_out_inputs,
        branching_inputs,
        multicast_egress_blocks,
        max_loaded_egress_block,
        active_spines,
        total_branches,
    }
}

/// Ports the prior state routed to a non-negative spine that are now
/// disconnected entirely (no current owner) — a full removal, not a
/// reroute. Checked directly against the raw `s3_port_spine[]`, since
/// it is indexed by port and survives an input losing a port outright
/// (unlike `PrevSpineMap`, which is keyed by `(owner, egress_block)`
/// against the *current* declared state and so cannot see a port no
/// input declares any more).
fn count_removed_routes(fabric: &FabricState, prior_port_spine: Option<&[i32]>) -> u64 {
    let Some(prior) = prior_port_spine else {
        return 0;
    };
    let config = fabric.config();
    (1..=config.max_ports() as u32)
        .filter(|&port| {
            let before = prior.get(port as usize).copied().unwrap_or(-1);
            before >= 0 && fabric.owner_at(port) == 0
        })
        .count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{commit::materialise_and_validate, config::FabricConfig, demand::build_demands, locks::LockStore, solver};

    fn fabric_with_routes(n: usize, routes: &[(u32, u32)]) -> FabricState {
        let mut fabric = FabricState::new(FabricConfig::new(n).unwrap());
        for &(port, owner) in routes {
            fabric.set_declared(port, owner);
        }
        fabric
    }

    #[test]
    fn fresh_fabric_has_no_active_routes() {
        let fabric = fabric_with_routes(10, &[]);
        let snap = snapshot(&fabric, &PrevSpineMap::empty(), None);
        assert_eq!(snap.routes_active, 0);
        assert_eq!(snap.active_spines, 0);
    }

    #[test]
    fn committed_multicast_route_is_reflected_in_snapshot() {
        let mut fabric = fabric_with_routes(10, &[(1, 1), (2, 1), (3, 1)]);
        let demand_set = build_demands(&fabric).unwrap();
        let locks = LockStore::load(&[], 10, 100);
        let result = solver::solve(&demand_set.demands, &locks, &PrevSpineMap::empty(), 10).unwrap();
        let (s1, s2, owner, spine) =
            materialise_and_validate(&fabric, &demand_set, &result.assignment).unwrap();
        fabric.replace_realised(s1, s2, owner, spine);

        let snap = snapshot(&fabric, &PrevSpineMap::empty(), None);
        assert_eq!(snap.routes_active, 3);
        assert_eq!(snap.multicast_fan_out_inputs, 1);
        assert_eq!(snap.active_spines, 1);
        assert_eq!(snap.total_branches, 1);
    }

    #[test]
    fn accountant_tracks_cumulative_and_last_solve_metrics() {
        let prior = vec![-1i32, 0, 1, -1, 2];
        let mut accountant = Accountant::new();
        accountant.record_solve(2, 3, 150, Some(&prior));
        accountant.record_solve(0, 0, 90, Some(&prior));
        assert_eq!(accountant.cumulative_reroutes, 2);
        assert_eq!(accountant.cumulative_output_reroutes, 3);
        assert_eq!(accountant.repack_count, 2);
        assert_eq!(accountant.last_stability_cost, 0);
        assert_eq!(accountant.initial_route_count, Some(3));
    }

    #[test]
    fn rerouted_port_counts_as_neither_preserved_nor_new() {
        let mut fabric = fabric_with_routes(2, &[(1, 1)]);
        let demand_set = build_demands(&fabric).unwrap();
        let locks = LockStore::load(&[], 2, 4);
        let result = solver::solve(&demand_set.demands, &locks, &PrevSpineMap::empty(), 2).unwrap();
        let (s1, s2, owner, spine) =
            materialise_and_validate(&fabric, &demand_set, &result.assignment).unwrap();
        fabric.replace_realised(s1, s2, owner, spine);

        // Prior state had input 1 on a different spine for egress block 0.
        let mut prev_spine = PrevSpineMap::empty();
        let committed_spine = fabric.spine_at(1);
        let other_spine = if committed_spine == 0 { 1 } else { 0 };
        prev_spine.insert(1, 0, other_spine);

        let snap = snapshot(&fabric, &prev_spine, None);
        assert_eq!(snap.routes_active, 1);
        assert_eq!(snap.routes_preserved, 0);
        assert_eq!(snap.routes_new, 0);
    }

    #[test]
    fn a_port_routed_before_but_cleared_since_counts_as_removed() {
        let fabric = fabric_with_routes(10, &[]);
        let mut prior = vec![-1i32; 101];
        prior[1] = 3;
        let snap = snapshot(&fabric, &PrevSpineMap::empty(), Some(&prior));
        assert_eq!(snap.routes_removed, 1);
    }

    #[test]
    fn a_port_still_routed_does_not_count_as_removed() {
        let mut fabric = fabric_with_routes(10, &[(1, 1)]);
        let demand_set = build_demands(&fabric).unwrap();
        let locks = LockStore::load(&[], 10, 100);
        let result = solver::solve(&demand_set.demands, &locks, &PrevSpineMap::empty(), 10).unwrap();
        let (s1, s2, owner, spine) =
            materialise_and_validate(&fabric, &demand_set, &result.assignment).unwrap();
        fabric.replace_realised(s1, s2, owner, spine);

        let mut prior = vec![-1i32; 101];
        prior[1] = 3;
        let snap = snapshot(&fabric, &PrevSpineMap::empty(), Some(&prior));
        assert_eq!(snap.routes_removed, 0);
    }
}
