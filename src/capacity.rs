//! C3: Capacity Pre-Check — necessary (not sufficient) feasibility
//! conditions checked before search.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    demand::DemandSet,
    error::{EngineError, unsat_capacity},
};

/// Per-block distinct-input counts, for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct CapacityLoads {
    pub egress_fan_in: BTreeMap<usize, usize>,
    pub ingress_fan_out: BTreeMap<usize, usize>,
}

pub fn check_capacity(n: usize, demand_set: &DemandSet) -> Result<CapacityLoads, EngineError> {
    let mut egress_inputs: BTreeMap<usize, BTreeSet<u32>> = BTreeMap::new();
    let mut ingress_inputs: BTreeMap<usize, BTreeSet<u32>> = BTreeMap::new();

    for demand in &demand_set.demands {
        egress_inputs
            .entry(demand.egress_block)
            .or_default()
            .insert(demand.input_id);
        ingress_inputs
            .entry(demand.ingress_block)
            .or_default()
            .insert(demand.input_id);
    }

    let loads = CapacityLoads {
        egress_fan_in: egress_inputs
            .iter()
            .map(|(&block, inputs)| (block, inputs.len()))
            .collect(),
        ingress_fan_out: ingress_inputs
            .iter()
            .map(|(&block, inputs)| (block, inputs.len()))
            .collect(),
    };

    let mut violations = Vec::new();
    for (&block, inputs) in &egress_inputs {
        if inputs.len() > n {
            violations.push(format!(
                "Egress block {} needs {} distinct inputs (capacity {n})",
                block + 1,
                inputs.len()
            ));
        }
    }
    for (&block, inputs) in &ingress_inputs {
        if inputs.len() > n {
            violations.push(format!(
                "Ingress block {} fans out to {} distinct inputs (capacity {n})",
                block + 1,
                inputs.len()
            ));
        }
    }

    if violations.is_empty() {
        Ok(loads)
    } else {
        Err(unsat_capacity(violations.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demand::Demand;

    fn demand_set(demands: Vec<Demand>) -> DemandSet {
        DemandSet {
            demands,
            need: BTreeMap::new(),
        }
    }

    #[test]
    fn passes_when_every_block_is_within_capacity() {
        let demands = demand_set(vec![
            Demand { input_id: 1, ingress_block: 0, egress_block: 0 },
            Demand { input_id: 11, ingress_block: 1, egress_block: 0 },
        ]);
        assert!(check_capacity(10, &demands).is_ok());
    }

    #[test]
    fn eleven_distinct_inputs_in_one_egress_block_is_unsat() {
        let demands: Vec<Demand> = (0..11)
            .map(|k| Demand {
                input_id: 1 + k * 10,
                ingress_block: k as usize,
                egress_block: 3,
            })
            .collect();
        let err = check_capacity(10, &demand_set(demands))
            .expect_err("11 inputs into a 10-capacity egress block must fail");
        assert!(err.message.contains("Egress block 4 needs 11 distinct inputs (capacity 10)"));
    }

    #[test]
    fn loads_report_distinct_input_counts_per_block() {
        let demands = demand_set(vec![
            Demand { input_id: 1, ingress_block: 0, egress_block: 0 },
            Demand { input_id: 1, ingress_block: 0, egress_block: 1 },
            Demand { input_id: 11, ingress_block: 1, egress_block: 0 },
        ]);
        let loads = check_capacity(10, &demands).expect("within capacity");
        assert_eq!(loads.egress_fan_in.get(&0), Some(&2));
        assert_eq!(loads.egress_fan_in.get(&1), Some(&1));
        assert_eq!(loads.ingress_fan_out.get(&0), Some(&1));
    }
}
