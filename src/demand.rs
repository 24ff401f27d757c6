//! C2: Demand Builder — derives `(input, ingress_block, egress_block)`
//! demands from declared state.

use std::collections::BTreeMap;

use crate::{
    bitset::Bitset,
    error::{EngineError, internal_error},
    fabric::FabricState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Demand {
    pub input_id: u32,
    pub ingress_block: usize,
    pub egress_block: usize,
}

#[derive(Debug, Clone)]
pub struct DemandSet {
    pub demands: Vec<Demand>,
    /// Per-input egress-block membership, in ascending input order.
    pub need: BTreeMap<u32, Bitset>,
}

impl DemandSet {
    pub fn active_inputs(&self) -> impl Iterator<Item = u32> + '_ {
        self.need.keys().copied()
    }

    pub fn index_of(&self, input_id: u32, egress_block: usize) -> Option<usize> {
        self.demands.iter().position(|demand| {
            demand.input_id == input_id && demand.egress_block == egress_block
        })
    }
}

pub fn build_demands(fabric: &FabricState) -> Result<DemandSet, EngineError> {
    let n = fabric.config().n();
    let mut need: BTreeMap<u32, Bitset> = BTreeMap::new();

    for port in 1..=fabric.config().max_ports() as u32 {
        let owner = fabric.declared_at(port);
        if owner == 0 {
            continue;
        }
        let egress_block = fabric.config().block_of(port);
        need.entry(owner)
            .or_insert_with(|| Bitset::new(n))
            .set(egress_block);
    }

    let mut demands = Vec::new();
    for (&input_id, mask) in &need {
        let ingress_block = fabric.input_block(input_id);
        for egress_block in mask.iter_ones() {
            demands.push(Demand {
                input_id,
                ingress_block,
                egress_block,
            });
        }
    }

    let max_demands = fabric.config().max_ports() * n;
    if demands.len() > max_demands {
        return Err(internal_error(format!(
            "demand builder produced {} demands, exceeding the N^2*N bound of {}",
            demands.len(),
            max_demands
        )));
    }

    Ok(DemandSet { demands, need })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FabricConfig;

    fn fabric_with_routes(n: usize, routes: &[(u32, u32)]) -> FabricState {
        let mut fabric = FabricState::new(FabricConfig::new(n).unwrap());
        for &(port, owner) in routes {
            fabric.set_declared(port, owner);
        }
        fabric
    }

    #[test]
    fn empty_declared_state_yields_no_demands() {
        let fabric = FabricState::new(FabricConfig::new(10).unwrap());
        let demand_set = build_demands(&fabric).expect("empty state always builds");
        assert!(demand_set.demands.is_empty());
        assert_eq!(demand_set.active_inputs().count(), 0);
    }

    #[test]
    fn single_input_same_egress_block_collapses_to_one_demand() {
        let fabric = fabric_with_routes(10, &[(1, 1), (2, 1), (3, 1)]);
        let demand_set = build_demands(&fabric).expect("build should succeed");
        assert_eq!(demand_set.demands.len(), 1);
        assert_eq!(
            demand_set.demands[0],
            Demand {
                input_id: 1,
                ingress_block: 0,
                egress_block: 0,
            }
        );
    }

    #[test]
    fn demands_are_emitted_in_ascending_input_then_egress_block_order() {
        // input 3 owns port 11 (egress block 1); input 5 owns port 1
        // (egress block 0) and port 91 (egress block 9).
        let fabric = fabric_with_routes(10, &[(91, 5), (1, 5), (11, 3)]);
        let demand_set = build_demands(&fabric).expect("build should succeed");
        let pairs: Vec<(u32, usize)> = demand_set
            .demands
            .iter()
            .map(|demand| (demand.input_id, demand.egress_block))
            .collect();
        assert_eq!(pairs, vec![(3, 1), (5, 0), (5, 9)]);
    }
}
