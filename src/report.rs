//! External Interface Encoders.
//!
//! JSON boundary types for declared-state edits, prior committed
//! state, lock input, and the committed-state report. Atomic
//! tmp-file-then-rename write.

use std::{
    fs,
    io::{BufWriter, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::{
    engine::Engine,
    error::{EngineError, internal_error},
    locks::{LockConflict, RawLock},
};

const REPORT_VERSION: u64 = 1;

/// One entry of the declared-state edit stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "UPPERCASE")]
pub enum Edit {
    Route { input: u32, targets: Vec<u32> },
    Clear { input: u32 },
}

pub fn load_edits(path: &Path) -> Result<Vec<Edit>, EngineError> {
    let content = fs::read_to_string(path).map_err(|err| {
        internal_error(format!("failed to read edits file '{}': {err}", path.display()))
    })?;
    serde_json::from_str(&content)
        .map_err(|err| internal_error(format!("failed to parse edits file '{}': {err}", path.display())))
}

/// Fields consumed from a previously committed state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorState {
    pub s3_port_spine: Vec<i32>,
}

pub fn load_prior_state(path: &Path) -> Result<PriorState, EngineError> {
    let content = fs::read_to_string(path).map_err(|err| {
        internal_error(format!("failed to read prior state '{}': {err}", path.display()))
    })?;
    serde_json::from_str(&content)
        .map_err(|err| internal_error(format!("failed to parse prior state '{}': {err}", path.display())))
}

pub fn load_locks(path: &Path) -> Result<Vec<RawLock>, EngineError> {
    let content = fs::read_to_string(path).map_err(|err| {
        internal_error(format!("failed to read locks file '{}': {err}", path.display()))
    })?;
    serde_json::from_str(&content)
        .map_err(|err| internal_error(format!("failed to parse locks file '{}': {err}", path.display())))
}

#[derive(Debug, Clone, Serialize)]
pub struct StabilityMetrics {
    pub stability_changes: usize,
    pub stability_reroutes: u64,
    pub stability_reuse_pct: f64,
    pub reroutes_demands: usize,
    pub reroutes_outputs: u64,
    pub locked_demands: usize,
    pub locked_outputs: usize,
    pub solve_ms: f64,
    pub solve_total_ms: f64,
    pub repack_count: u64,
    pub strict_stability: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FabricSnapshotReport {
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

#[derive(Debug, Clone, Serialize)]
pub struct CommittedStateReport {
    pub version: u64,
    pub n: usize,
    pub total_blocks: usize,
    pub max_ports: usize,
    pub s1_to_s2: Vec<u32>,
    pub s2_to_s3: Vec<u32>,
    pub s3_port_owner: Vec<u32>,
    pub s3_port_spine: Vec<i32>,
    pub desired_owner: Vec<u32>,
    pub stability: StabilityMetrics,
    pub fabric: FabricSnapshotReport,
    pub lock_conflicts: Vec<LockConflict>,
}

/// Builds the committed-state report from the engine's current state.
/// `last_attempts`/`last_solve_us`/`last_stability_cost`/
/// `last_rerouted_outputs` describe the most recent transaction (all
/// zero if none has run yet); `strict_stability` and `locked_demands`/
/// `locked_outputs` are supplied by the caller since the engine itself
/// does not retain per-edit lock usage counts.
pub fn build_report(
    engine: &Engine,
    strict_stability: bool,
    locked_demands: usize,
    locked_outputs: usize,
    lock_conflicts: Vec<LockConflict>,
) -> CommittedStateReport {
    let config = engine.fabric().config();
    let accountant = engine.accountant();
    let snapshot = engine.snapshot();

    // Reuse percentage of the original ports still on their prior spine,
    // against the fixed baseline taken the first time a prior state was
    // seen (`initial_route_count`), not the size of the current demand set.
    let reuse_pct = match accountant.initial_route_count {
        Some(initial) if initial > 0 => {
            (100.0 * (initial as f64 - accountant.cumulative_reroutes as f64) / initial as f64).max(0.0)
        }
        _ => 100.0,
    };

    CommittedStateReport {
        version: REPORT_VERSION,
        n: config.n(),
        total_blocks: config.total_blocks(),
        max_ports: config.max_ports(),
        s1_to_s2: engine.fabric().s1_matrix().to_vec(),
        s2_to_s3: engine.fabric().s2_matrix().to_vec(),
        s3_port_owner: engine.fabric().owner_vector().to_vec(),
        s3_port_spine: engine.fabric().spine_vector().to_vec(),
        desired_owner: engine.fabric().declared().to_vec(),
        stability: StabilityMetrics {
            stability_changes: accountant.last_stability_cost,
            stability_reroutes: accountant.cumulative_reroutes,
            stability_reuse_pct: reuse_pct,
            reroutes_demands: accountant.last_stability_cost,
            reroutes_outputs: accountant.last_rerouted_outputs,
            locked_demands,
            locked_outputs,
            solve_ms: accountant.last_solve_us as f64 / 1000.0,
            solve_total_ms: accountant.total_solve_us as f64 / 1000.0,
            repack_count: accountant.repack_count,
            strict_stability,
        },
        fabric: FabricSnapshotReport {
            routes_active: snapshot.routes_active,
            routes_preserved: snapshot.routes_preserved,
            routes_new: snapshot.routes_new,
            routes_removed: snapshot.routes_removed,
            multicast_fan_out_inputs: snapshot.multicast_fan_out_inputs,
            branching_inputs: snapshot.branching_inputs,
            multicast_egress_blocks: snapshot.multicast_egress_blocks,
            max_loaded_egress_block: snapshot.max_loaded_egress_block,
            active_spines: snapshot.active_spines,
            total_branches: snapshot.total_branches,
        },
        lock_conflicts,
    }
}

/// Writes the report to `path` via a tmp-file-then-rename, matching
/// an atomic write that never leaves a half-written report on disk.
pub fn write_report(path: &Path, report: &CommittedStateReport) -> Result<(), EngineError> {
    let parent = path.parent().filter(|parent| !parent.as_os_str().is_empty());
    if let Some(parent) = parent {
        fs::create_dir_all(parent).map_err(|err| {
            internal_error(format!(
                "failed to create report directory '{}': {err}",
                parent.display()
            ))
        })?;
    }

    let tmp_path = path.with_extension("tmp");
    let file = fs::File::create(&tmp_path).map_err(|err| {
        internal_error(format!("failed to create report temp file '{}': {err}", tmp_path.display()))
    })?;
    {
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, report).map_err(|err| {
            internal_error(format!("failed to serialize report '{}': {err}", tmp_path.display()))
        })?;
        writer.write_all(b"\n").map_err(|err| {
            internal_error(format!("failed to finalize report '{}': {err}", tmp_path.display()))
        })?;
        writer.flush().map_err(|err| {
            internal_error(format!("failed to flush report '{}': {err}", tmp_path.display()))
        })?;
    }

    fs::rename(&tmp_path, path).map_err(|err| {
        internal_error(format!(
            "failed to replace report '{}' from '{}': {err}",
            path.display(),
            tmp_path.display()
        ))
    })
}
