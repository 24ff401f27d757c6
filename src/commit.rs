//! Solution Commit & Validator.
//!
//! Materialises a solver assignment into fresh `S1`/`S2`/`owner`/`spine`
//! buffers, then re-checks the fabric's trunk-ownership invariants before the
//! buffers are allowed to replace the live fabric.

use crate::{
    config::FabricConfig,
    demand::DemandSet,
    error::{EngineError, internal_error},
    fabric::{FabricState, NO_SPINE},
};

/// Rebuilds realised-state buffers from a solver assignment and
/// validates them. Returns the buffers ready for
/// [`FabricState::replace_realised`]; does not mutate `fabric` itself,
/// so a failed validation never leaks into the committed state.
pub fn materialise_and_validate(
    fabric: &FabricState,
    demand_set: &DemandSet,
    assignment: &[usize],
) -> Result<(Vec<u32>, Vec<u32>, Vec<u32>, Vec<i32>), EngineError> {
    let config = fabric.config();
    let n = config.n();
    let max_ports = config.max_ports();

    let mut s1 = vec![0u32; n * n];
    let mut s2 = vec![0u32; n * n];
    let mut owner = vec![0u32; max_ports + 1];
    let mut spine = vec![NO_SPINE; max_ports + 1];

    for (demand, &assigned_spine) in demand_set.demands.iter().zip(assignment.iter()) {
        s1[demand.ingress_block * n + assigned_spine] = demand.input_id;
        s2[assigned_spine * n + demand.egress_block] = demand.input_id;
    }

    for port in 1..=max_ports as u32 {
        let declared_owner = fabric.declared_at(port);
        owner[port as usize] = declared_owner;
        if declared_owner == 0 {
            continue;
        }
        let egress_block = config.block_of(port);
        let Some(demand_idx) = demand_set.index_of(declared_owner, egress_block) else {
            return Err(internal_error(format!(
                "port {port} has declared owner {declared_owner} with no matching demand"
            )));
        };
        spine[port as usize] = assignment[demand_idx] as i32;
    }

    validate_invariants(config, &s1, &s2, &owner, &spine)?;

    Ok((s1, s2, owner, spine))
}

fn validate_invariants(
    config: FabricConfig,
    s1: &[u32],
    s2: &[u32],
    owner: &[u32],
    spine: &[i32],
) -> Result<(), EngineError> {
    let n = config.n();
    // Invariant 1: every populated S2[s, e] = i implies S1[block(i), s] = i.
    for s in 0..n {
        for e in 0..n {
            let i = s2[s * n + e];
            if i == 0 {
                continue;
            }
            let block_of_input = (i as usize - 1) / n;
            if s1[block_of_input * n + s] != i {
                return Err(internal_error(format!(
                    "invariant 1 violated: S2[{s},{e}]={i} but S1[{block_of_input},{s}] != {i}"
                )));
            }
        }
    }

    // Invariants 2 and 3.
    for port in 1..owner.len() as u32 {
        let i = owner[port as usize];
        if i == 0 {
            continue;
        }
        if i as usize > owner.len() - 1 {
            return Err(internal_error(format!(
                "invariant 2 violated: owner[{port}]={i} is out of range"
            )));
        }
        let s = spine[port as usize];
        if !(0..n as i32).contains(&s) {
            return Err(internal_error(format!(
                "invariant 2 violated: spine[{port}]={s} is out of range"
            )));
        }
        let e = config.block_of(port);
        if s2[s as usize * n + e] != i {
            return Err(internal_error(format!(
                "invariant 2 violated: S2[{s},{e}] != owner[{port}]={i}"
            )));
        }
    }

    // Invariants 4 and 5 (single owner per S2/S1 slot) hold structurally:
    // each slot is a single u32, so two owners can never coexist in it.

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::FabricConfig, demand::build_demands, solver};

    fn fabric_with_routes(n: usize, routes: &[(u32, u32)]) -> FabricState {
        let mut fabric = FabricState::new(FabricConfig::new(n).unwrap());
        for &(port, owner) in routes {
            fabric.set_declared(port, owner);
        }
        fabric
    }

    #[test]
    fn materialised_solution_satisfies_declared_state_realisation() {
        let fabric = fabric_with_routes(10, &[(1, 1), (2, 1), (3, 1)]);
        let demand_set = build_demands(&fabric).expect("demands build");
        let locks = crate::locks::LockStore::load(&[], 10, 100);
        let result = solver::solve(
            &demand_set.demands,
            &locks,
            &solver::PrevSpineMap::empty(),
            10,
        )
        .expect("feasible");

        let (_, s2, owner, spine) =
            materialise_and_validate(&fabric, &demand_set, &result.assignment).expect("valid");

        assert_eq!(owner[1], 1);
        assert_eq!(owner[2], 1);
        assert_eq!(owner[3], 1);
        assert_eq!(spine[1], spine[2]);
        assert_eq!(spine[2], spine[3]);
        assert_eq!(s2[spine[1] as usize * 10], 1);
    }

    #[test]
    fn unrouted_ports_keep_zero_owner_and_sentinel_spine() {
        let fabric = fabric_with_routes(10, &[]);
        let demand_set = build_demands(&fabric).expect("demands build");
        let (_, _, owner, spine) =
            materialise_and_validate(&fabric, &demand_set, &[]).expect("valid");
        assert!(owner.iter().all(|&o| o == 0));
        assert!(spine.iter().all(|&s| s == NO_SPINE));
    }
}
