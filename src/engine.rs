//! C7: Transaction Manager — the facade wiring Fabric State, Demand
//! Builder, Capacity Pre-Check, Lock Store, Solver, Commit &
//! Validator, and the Stability Accountant together.

use std::time::Instant;

use tracing::{info, warn};

use crate::{
    capacity,
    commit::materialise_and_validate,
    config::FabricConfig,
    demand::{self, DemandSet},
    error::{EngineError, invalid_input, unsat_lock, unsat_strict},
    fabric::FabricState,
    locks::LockStore,
    solver::{self, PrevSpineMap},
    stats::{self, Accountant},
};

/// Outcome of one successful `route`/`clear` transaction, for the
/// caller to fold into a report.
#[derive(Debug, Clone)]
pub struct TransactionReport {
    pub stability_cost: usize,
    pub rerouted_outputs: u64,
    pub attempts: u64,
    pub solve_us: u64,
}

pub struct Engine {
    fabric: FabricState,
    locks: LockStore,
    /// `s3_port_spine[]` from a previously committed state, indexed by
    /// output port. Immutable; `(input, egress_block) -> spine` is
    /// re-derived from it against the *current* declared state on
    /// every solve, since an input's declared ownership of a port can
    /// change across edits.
    prior_port_spine: Option<Vec<i32>>,
    strict_stability: bool,
    accountant: Accountant,
}

impl Engine {
    pub fn new(
        config: FabricConfig,
        locks: LockStore,
        prior_port_spine: Option<Vec<i32>>,
        strict_stability: bool,
    ) -> Self {
        Self {
            fabric: FabricState::new(config),
            locks,
            prior_port_spine,
            strict_stability,
            accountant: Accountant::new(),
        }
    }

    pub fn fabric(&self) -> &FabricState {
        &self.fabric
    }

    pub fn locks(&self) -> &LockStore {
        &self.locks
    }

    pub fn accountant(&self) -> &Accountant {
        &self.accountant
    }

    pub fn prev_spine(&self) -> PrevSpineMap {
        match &self.prior_port_spine {
            Some(raw) => PrevSpineMap::from_prior_state(&self.fabric, raw),
            None => PrevSpineMap::empty(),
        }
    }

    pub fn snapshot(&self) -> stats::FabricSnapshot {
        stats::snapshot(&self.fabric, &self.prev_spine(), self.prior_port_spine.as_deref())
    }

    /// Routes `input_id` to every port in `targets`. Duplicate targets
    /// are tolerated; a target already owned by `input_id` is a no-op.
    pub fn route(&mut self, input_id: u32, targets: &[u32]) -> Result<TransactionReport, EngineError> {
        if targets.is_empty() {
            return Err(invalid_input("route requires at least one target port"));
        }
        let max_ports = self.fabric.config().max_ports() as u32;
        if !(1..=max_ports).contains(&input_id) {
            return Err(invalid_input(format!(
                "input {input_id} is out of range [1, {max_ports}]"
            )));
        }

        let mut staged = Vec::new();
        for &port in targets {
            if !(1..=max_ports).contains(&port) {
                return Err(invalid_input(format!(
                    "target port {port} is out of range [1, {max_ports}]"
                )));
            }
            let current = self.fabric.declared_at(port);
            if current != 0 && current != input_id {
                return Err(invalid_input(format!(
                    "port {port} is owned by input {current}, clear it before routing input {input_id}"
                )));
            }
            if current != input_id {
                staged.push((port, current));
            }
        }

        for &(port, _) in &staged {
            self.fabric.set_declared(port, input_id);
        }

        match self.resolve() {
            Ok(report) => {
                info!(input_id, targets = targets.len(), result = "committed", "route");
                Ok(report)
            }
            Err(err) => {
                warn!(input_id, error = %err, "route failed, rolling back");
                for &(port, previous_owner) in &staged {
                    self.fabric.set_declared(port, previous_owner);
                }
                self.resolve().map_err(|restore_err| {
                    crate::error::internal_error(format!(
                        "failed to restore last-known-good state after a rolled-back route: {restore_err}"
                    ))
                })?;
                Err(err)
            }
        }
    }

    /// Clears every port currently owned by `input_id`. Cannot fail
    /// under normal operation: clearing strictly reduces demand, so
    /// a state that solved before must solve again.
    pub fn clear(&mut self, input_id: u32) -> Result<TransactionReport, EngineError> {
        let max_ports = self.fabric.config().max_ports() as u32;
        if !(1..=max_ports).contains(&input_id) {
            return Err(invalid_input(format!(
                "input {input_id} is out of range [1, {max_ports}]"
            )));
        }

        let staged: Vec<u32> = (1..=max_ports)
            .filter(|&port| self.fabric.declared_at(port) == input_id)
            .collect();
        for &port in &staged {
            self.fabric.set_declared(port, 0);
        }

        self.resolve().map_err(|err| {
            crate::error::internal_error(format!(
                "clear of input {input_id} should be monotonically feasible but failed: {err}"
            ))
        })
    }

    fn resolve(&mut self) -> Result<TransactionReport, EngineError> {
        let demand_set: DemandSet = demand::build_demands(&self.fabric)?;
        capacity::check_capacity(self.fabric.config().n(), &demand_set)?;

        let lock_conflicts = self.locks.validate_against_demands(&demand_set);
        if !lock_conflicts.is_empty() {
            return Err(unsat_lock(format!(
                "{} lock conflict(s) against the current demand set",
                lock_conflicts.len()
            )));
        }

        let prev_spine = self.prev_spine();
        let started = Instant::now();
        let solve_result = solver::solve(
            &demand_set.demands,
            &self.locks,
            &prev_spine,
            self.fabric.config().n(),
        )?;
        let solve_us = started.elapsed().as_micros() as u64;

        if self.strict_stability && solve_result.stability_cost > 0 {
            return Err(unsat_strict(format!(
                "solve found a feasible assignment with stability cost {} under strict_stability",
                solve_result.stability_cost
            )));
        }

        let (s1, s2, owner, spine) =
            materialise_and_validate(&self.fabric, &demand_set, &solve_result.assignment)?;

        let spine_before = self.fabric.spine_vector().to_vec();
        self.fabric.replace_realised(s1, s2, owner, spine);
        let rerouted_outputs = stats::count_rerouted_outputs(&self.fabric, Some(&spine_before));

        self.accountant.record_solve(
            solve_result.stability_cost,
            rerouted_outputs,
            solve_us,
            self.prior_port_spine.as_deref(),
        );

        Ok(TransactionReport {
            stability_cost: solve_result.stability_cost,
            rerouted_outputs,
            attempts: solve_result.attempts,
            solve_us,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locks::{LockStore, RawLock};

    fn engine(n: usize) -> Engine {
        Engine::new(
            FabricConfig::new(n).unwrap(),
            LockStore::load(&[], n, n * n),
            None,
            false,
        )
    }

    #[test]
    fn given_an_empty_fabric_when_routing_one_input_to_three_ports_then_one_demand_is_solved() {
        let mut engine = engine(10);
        let report = engine.route(1, &[1, 2, 3]).expect("feasible route");
        assert_eq!(report.stability_cost, 0);
        assert_eq!(engine.fabric().owner_at(1), 1);
        assert_eq!(engine.fabric().spine_at(1), engine.fabric().spine_at(3));
    }

    #[test]
    fn given_a_port_owned_by_another_input_when_routing_then_the_edit_is_rejected() {
        let mut engine = engine(10);
        engine.route(1, &[1]).expect("first route succeeds");
        let err = engine
            .route(2, &[1])
            .expect_err("port 1 is already owned by input 1");
        assert_eq!(err.kind, crate::error::EngineErrorKind::InvalidInput);
        assert_eq!(engine.fabric().owner_at(1), 1);
    }

    #[test]
    fn given_a_committed_route_when_clearing_then_the_fabric_returns_to_empty() {
        let mut engine = engine(10);
        engine.route(1, &[1, 2, 3]).expect("route succeeds");
        engine.clear(1).expect("clear succeeds");
        assert_eq!(engine.fabric().owner_at(1), 0);
        assert_eq!(engine.fabric().spine_at(1), crate::fabric::NO_SPINE);
    }

    #[test]
    fn given_a_route_that_would_violate_a_lock_conflict_when_applied_then_prior_state_is_restored() {
        // Inputs 3 and 14 are locked to the same (egress_block, spine)
        // trunk; that's only a conflict once both have an active demand
        // against it.
        let locks = LockStore::load(
            &[
                RawLock { input: 3, egress_block: 0, spine: 1 },
                RawLock { input: 14, egress_block: 0, spine: 1 },
            ],
            10,
            100,
        );
        let mut engine = Engine::new(FabricConfig::new(10).unwrap(), locks, None, false);
        engine.route(3, &[1]).expect("the first locked input routes alone");
        let err = engine
            .route(14, &[2])
            .expect_err("a second input locked to the same trunk must conflict");
        assert_eq!(err.kind, crate::error::EngineErrorKind::UnsatLock);
        // Rollback must restore exactly the pre-edit declared state.
        assert_eq!(engine.fabric().declared_at(2), 0);
        assert_eq!(engine.fabric().owner_at(1), 3);
    }

    #[test]
    fn given_a_lock_pinning_a_demand_when_routed_then_the_committed_spine_matches_the_lock() {
        let locks = LockStore::load(&[RawLock { input: 7, egress_block: 0, spine: 4 }], 10, 100);
        let mut engine = Engine::new(FabricConfig::new(10).unwrap(), locks, None, false);
        engine.route(7, &[1]).expect("lock is feasible");
        assert_eq!(engine.fabric().spine_at(1), 4);
    }

    #[test]
    fn given_a_prior_spine_when_routing_the_same_port_then_the_prior_spine_is_preferred() {
        let mut prior = vec![-1; 5];
        prior[1] = 1;
        let mut engine = Engine::new(FabricConfig::new(2).unwrap(), LockStore::load(&[], 2, 4), Some(prior), false);
        let report = engine.route(1, &[1]).expect("feasible");
        assert_eq!(report.stability_cost, 0);
        assert_eq!(engine.fabric().spine_at(1), 1);
    }

    #[test]
    fn given_strict_stability_when_the_only_feasible_spine_differs_from_prior_then_the_route_is_rejected() {
        let mut prior = vec![-1; 5];
        prior[1] = 0;
        let locks = LockStore::load(&[RawLock { input: 1, egress_block: 0, spine: 1 }], 2, 4);
        let mut engine = Engine::new(FabricConfig::new(2).unwrap(), locks, Some(prior), true);
        let err = engine
            .route(1, &[1])
            .expect_err("the lock forces spine 1, one away from the prior spine 0");
        assert_eq!(err.kind, crate::error::EngineErrorKind::UnsatStrict);
        assert_eq!(engine.fabric().owner_at(1), 0, "rollback must undo the staged route");
    }
}
