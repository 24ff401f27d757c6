//! C6: Lock Store — pinned `(input, egress_block) -> spine` pairs and
//! their conflict diagnostics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::demand::DemandSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLock {
    pub input: u32,
    pub egress_block: usize,
    pub spine: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LockConflictReason {
    Range,
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConflict {
    pub input: u32,
    pub egress_block: usize,
    pub spine: i32,
    pub reason: LockConflictReason,
}

#[derive(Debug, Clone, Default)]
pub struct LockStore {
    locks: BTreeMap<(u32, usize), usize>,
    load_conflicts: Vec<LockConflict>,
}

impl LockStore {
    /// Loads locks once at startup. Out-of-range tuples and duplicate
    /// `(input, egress_block)` pairs assigning different spines are
    /// recorded as conflicts but are not fatal until a solve actually
    /// encounters them.
    pub fn load(raw_locks: &[RawLock], n: usize, max_ports: usize) -> Self {
        let mut locks: BTreeMap<(u32, usize), usize> = BTreeMap::new();
        let mut load_conflicts = Vec::new();

        for lock in raw_locks {
            let in_range = (1..=max_ports as u32).contains(&lock.input)
                && lock.egress_block < n
                && (0..n as i32).contains(&lock.spine);
            if !in_range {
                load_conflicts.push(LockConflict {
                    input: lock.input,
                    egress_block: lock.egress_block,
                    spine: lock.spine,
                    reason: LockConflictReason::Range,
                });
                continue;
            }

            let key = (lock.input, lock.egress_block);
            let spine = lock.spine as usize;
            match locks.get(&key) {
                Some(&existing) if existing != spine => {
                    load_conflicts.push(LockConflict {
                        input: lock.input,
                        egress_block: lock.egress_block,
                        spine: lock.spine,
                        reason: LockConflictReason::Conflict,
                    });
                }
                _ => {
                    locks.insert(key, spine);
                }
            }
        }

        Self {
            locks,
            load_conflicts,
        }
    }

    pub fn lookup(&self, input: u32, egress_block: usize) -> Option<usize> {
        self.locks.get(&(input, egress_block)).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Count of demands in `demand_set` that a lock pins (the report's
    /// `locked_demands` report field).
    pub fn count_locked_demands(&self, demand_set: &DemandSet) -> usize {
        demand_set
            .demands
            .iter()
            .filter(|demand| self.lookup(demand.input_id, demand.egress_block).is_some())
            .count()
    }

    /// Count of declared output ports whose `(owner, egress_block)` is
    /// pinned by a lock (the report's `locked_outputs` field).
    pub fn count_locked_outputs(&self, fabric: &crate::fabric::FabricState) -> usize {
        let config = fabric.config();
        (1..=config.max_ports() as u32)
            .filter(|&port| {
                let owner = fabric.declared_at(port);
                owner != 0 && self.lookup(owner, config.block_of(port)).is_some()
            })
            .count()
    }

    /// Conflicts discovered at load time (range violations, duplicate
    /// assignments) plus trunk-sharing conflicts among the locks that
    /// back a demand in `demand_set` — the static, demand-independent
    /// half of "would require sharing a single trunk", hoisted out of
    /// the search loop since it never depends on search order.
    pub fn validate_against_demands(&self, demand_set: &DemandSet) -> Vec<LockConflict> {
        // Load-time conflicts are only live once a solve actually needs
        // that (input, egress_block) pair — dormant until a demand
        // actually exercises the conflicting lock.
        let mut conflicts: Vec<LockConflict> = self
            .load_conflicts
            .iter()
            .filter(|conflict| {
                demand_set
                    .demands
                    .iter()
                    .any(|demand| demand.input_id == conflict.input && demand.egress_block == conflict.egress_block)
            })
            .cloned()
            .collect();

        // Two distinct inputs locked to the same spine on the same
        // egress block would both need to own S2[s, e].
        let mut by_egress_spine: BTreeMap<(usize, usize), Vec<u32>> = BTreeMap::new();
        // Two distinct inputs locked to the same spine in the same
        // ingress block would both need to own S1[b, s].
        let mut by_ingress_spine: BTreeMap<(usize, usize), Vec<u32>> = BTreeMap::new();

        for demand in &demand_set.demands {
            let Some(spine) = self.lookup(demand.input_id, demand.egress_block) else {
                continue;
            };
            by_egress_spine
                .entry((demand.egress_block, spine))
                .or_default()
                .push(demand.input_id);
            by_ingress_spine
                .entry((demand.ingress_block, spine))
                .or_default()
                .push(demand.input_id);
        }

        for ((egress_block, spine), inputs) in &by_egress_spine {
            push_trunk_conflicts(&mut conflicts, *egress_block, *spine, inputs);
        }
        for ((_ingress_block, spine), inputs) in &by_ingress_spine {
            // egress_block isn't meaningful for an ingress-trunk
            // conflict; report against each offending input's own
            // locked egress block for traceability.
            let unique = distinct(inputs);
            if unique.len() > 1 {
                for &input in &unique {
                    if let Some(egress_block) = demand_set
                        .demands
                        .iter()
                        .find(|demand| demand.input_id == input)
                        .map(|demand| demand.egress_block)
                    {
                        conflicts.push(LockConflict {
                            input,
                            egress_block,
                            spine: *spine as i32,
                            reason: LockConflictReason::Conflict,
                        });
                    }
                }
            }
        }

        conflicts
    }
}

fn push_trunk_conflicts(
    conflicts: &mut Vec<LockConflict>,
    egress_block: usize,
    spine: usize,
    inputs: &[u32],
) {
    let unique = distinct(inputs);
    if unique.len() > 1 {
        for &input in &unique {
            conflicts.push(LockConflict {
                input,
                egress_block,
                spine: spine as i32,
                reason: LockConflictReason::Conflict,
            });
        }
    }
}

fn distinct(inputs: &[u32]) -> Vec<u32> {
    let mut unique = inputs.to_vec();
    unique.sort_unstable();
    unique.dedup();
    unique
}
