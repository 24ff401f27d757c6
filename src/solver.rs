//! Backtracking Solver — the heart of the engine.
//!
//! One variable per demand, domain = spine `0..N`. MRV picks the next
//! variable; three-pass value ordering favours stability; branch and
//! bound minimises the stability-cost objective.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::info;

use crate::{
    bitset::Bitset,
    demand::Demand,
    error::{EngineError, unsat_search},
    fabric::FabricState,
    locks::LockStore,
};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// `(input_id, egress_block) -> spine` derived from a previously
/// committed state.
#[derive(Debug, Clone, Default)]
pub struct PrevSpineMap(BTreeMap<(u32, usize), i32>);

impl PrevSpineMap {
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    /// `port_spine[p]` is the realised spine for output port `p` in the
    /// previously committed state (`-1` if unrouted), 0-based and sized
    /// `0..=MAX_PORTS` to match the `s3_port_spine` report field.
    pub fn from_prior_state(fabric: &FabricState, port_spine: &[i32]) -> Self {
        let mut map = BTreeMap::new();
        for port in 1..=fabric.config().max_ports() as u32 {
            let owner = fabric.declared_at(port);
            if owner == 0 {
                continue;
            }
            let egress_block = fabric.config().block_of(port);
            let spine = port_spine.get(port as usize).copied().unwrap_or(-1);
            map.entry((owner, egress_block)).or_insert(spine);
        }
        Self(map)
    }

    pub fn get(&self, input_id: u32, egress_block: usize) -> i32 {
        self.0
            .get(&(input_id, egress_block))
            .copied()
            .unwrap_or(-1)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&(u32, usize), &i32)> {
        self.0.iter()
    }

    pub fn insert(&mut self, input_id: u32, egress_block: usize, spine: i32) {
        self.0.insert((input_id, egress_block), spine);
    }
}

#[derive(Debug, Clone)]
pub struct SolveResult {
    /// Chosen spine per demand, aligned to the input `demands` slice.
    pub assignment: Vec<usize>,
    pub stability_cost: usize,
    pub attempts: u64,
}

pub fn solve(
    demands: &[Demand],
    locks: &LockStore,
    prev_spine: &PrevSpineMap,
    n: usize,
) -> Result<SolveResult, EngineError> {
    if demands.is_empty() {
        return Ok(SolveResult {
            assignment: Vec::new(),
            stability_cost: 0,
            attempts: 0,
        });
    }

    let mut search = Search {
        demands,
        locks,
        prev_spine,
        n,
        order: (0..demands.len()).collect(),
        assign: vec![-1; demands.len()],
        s1_tmp: vec![0; n * n],
        s2_tmp: vec![0; n * n],
        used: BTreeMap::new(),
        best_assignment: Vec::new(),
        best_cost: demands.len() + 1,
        cost: 0,
        attempts: 0,
        last_log: Instant::now(),
    };

    search.search(0);

    if search.best_assignment.len() != demands.len() {
        return Err(unsat_search(format!(
            "exhausted search over {} demands without a feasible assignment",
            demands.len()
        )));
    }

    let assignment = search
        .best_assignment
        .iter()
        .map(|&spine| spine as usize)
        .collect();

    Ok(SolveResult {
        assignment,
        stability_cost: search.best_cost,
        attempts: search.attempts,
    })
}

struct Undo {
    s2_prior: u32,
    s1_prior: u32,
    used_was_newly_set: bool,
    cost_delta: usize,
}

struct Search<'a> {
    demands: &'a [Demand],
    locks: &'a LockStore,
    prev_spine: &'a PrevSpineMap,
    n: usize,
    /// Demand indices; `order[depth]` is swapped in as each depth's MRV
    /// pick is made, so `order[..depth]` is the committed prefix.
    order: Vec<usize>,
    /// Chosen spine per demand index, `-1` while unassigned.
    assign: Vec<i32>,
    s1_tmp: Vec<u32>,
    s2_tmp: Vec<u32>,
    used: BTreeMap<u32, Bitset>,
    best_assignment: Vec<i32>,
    best_cost: usize,
    cost: usize,
    attempts: u64,
    last_log: Instant,
}

impl<'a> Search<'a> {
    fn lock_for(&self, demand: &Demand) -> Option<usize> {
        self.locks.lookup(demand.input_id, demand.egress_block)
    }

    fn satisfies_hard_constraints(&self, demand: &Demand, spine: usize) -> bool {
        let s2_owner = self.s2_tmp[spine * self.n + demand.egress_block];
        let s1_owner = self.s1_tmp[demand.ingress_block * self.n + spine];
        (s2_owner == 0 || s2_owner == demand.input_id)
            && (s1_owner == 0 || s1_owner == demand.input_id)
    }

    /// Three-pass value order: previous spine, then already-used
    /// spines for this input, then fresh spines.
    fn domain_for(&self, demand_idx: usize) -> Vec<usize> {
        let demand = self.demands[demand_idx];

        if let Some(locked) = self.lock_for(&demand) {
            return if self.satisfies_hard_constraints(&demand, locked) {
                vec![locked]
            } else {
                Vec::new()
            };
        }

        let prev = self.prev_spine.get(demand.input_id, demand.egress_block);
        let used_mask = self.used.get(&demand.input_id);
        let mut candidates = Vec::new();

        if prev >= 0 && self.satisfies_hard_constraints(&demand, prev as usize) {
            candidates.push(prev as usize);
        }
        if let Some(mask) = used_mask {
            for spine in mask.iter_ones() {
                if spine as i32 != prev && self.satisfies_hard_constraints(&demand, spine) {
                    candidates.push(spine);
                }
            }
        }
        for spine in 0..self.n {
            let already_used = used_mask.map(|mask| mask.get(spine)).unwrap_or(false);
            if spine as i32 != prev
                && !already_used
                && self.satisfies_hard_constraints(&demand, spine)
            {
                candidates.push(spine);
            }
        }
        candidates
    }

    fn commit(&mut self, demand_idx: usize, spine: usize) -> Undo {
        let demand = self.demands[demand_idx];
        let s2_index = spine * self.n + demand.egress_block;
        let s1_index = demand.ingress_block * self.n + spine;
        let s2_prior = self.s2_tmp[s2_index];
        let s1_prior = self.s1_tmp[s1_index];
        self.s2_tmp[s2_index] = demand.input_id;
        self.s1_tmp[s1_index] = demand.input_id;

        let mask = self
            .used
            .entry(demand.input_id)
            .or_insert_with(|| Bitset::new(self.n));
        let used_was_newly_set = !mask.get(spine);
        if used_was_newly_set {
            mask.set(spine);
        }

        let prev = self.prev_spine.get(demand.input_id, demand.egress_block);
        let cost_delta = if prev >= 0 && prev as usize != spine {
            1
        } else {
            0
        };
        self.cost += cost_delta;
        self.assign[demand_idx] = spine as i32;

        Undo {
            s2_prior,
            s1_prior,
            used_was_newly_set,
            cost_delta,
        }
    }

    fn undo(&mut self, demand_idx: usize, undo: Undo) {
        let demand = self.demands[demand_idx];
        let spine = self.assign[demand_idx] as usize;
        let s2_index = spine * self.n + demand.egress_block;
        let s1_index = demand.ingress_block * self.n + spine;
        self.s2_tmp[s2_index] = undo.s2_prior;
        self.s1_tmp[s1_index] = undo.s1_prior;
        if undo.used_was_newly_set {
            if let Some(mask) = self.used.get_mut(&demand.input_id) {
                mask.clear(spine);
            }
        }
        self.cost -= undo.cost_delta;
        self.assign[demand_idx] = -1;
    }

    fn maybe_log(&mut self, depth: usize) {
        if self.last_log.elapsed() >= PROGRESS_INTERVAL {
            info!(
                attempts = self.attempts,
                depth,
                best_cost = self.best_cost,
                "solver progress"
            );
            self.last_log = Instant::now();
        }
    }

    fn search(&mut self, depth: usize) {
        if self.cost >= self.best_cost {
            return;
        }
        self.attempts += 1;
        self.maybe_log(depth);

        if depth == self.demands.len() {
            self.best_cost = self.cost;
            self.best_assignment = self.assign.clone();
            return;
        }

        // MRV: scan remaining demands, keep the first with the smallest
        // domain; a domain of zero is minimal and ends the scan early.
        let mut chosen = depth;
        let mut chosen_domain: Option<Vec<usize>> = None;
        for idx in depth..self.order.len() {
            let domain = self.domain_for(self.order[idx]);
            let smaller = match &chosen_domain {
                None => true,
                Some(current) => domain.len() < current.len(),
            };
            if smaller {
                let empty = domain.is_empty();
                chosen = idx;
                chosen_domain = Some(domain);
                if empty {
                    break;
                }
            }
        }
        let domain = chosen_domain.unwrap_or_default();
        if domain.is_empty() {
            return;
        }

        self.order.swap(depth, chosen);
        let demand_idx = self.order[depth];

        for spine in domain {
            let undo = self.commit(demand_idx, spine);
            self.search(depth + 1);
            self.undo(demand_idx, undo);
            if self.best_cost == 0 {
                break;
            }
        }
    }
}
