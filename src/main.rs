use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing::{error, warn};

use clos_repack::{
    cli::run_config_from_args,
    demand::build_demands,
    engine::Engine,
    error::EngineErrorKind,
    locks::LockStore,
    logging::init_tracing,
    report::{Edit, build_report, load_edits, load_locks, load_prior_state, write_report},
};

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let config = run_config_from_args()?;
    init_tracing(&config.log_filter).context("failed to initialize logging")?;

    let edits = load_edits(&config.edits_path)
        .map_err(|err| anyhow::anyhow!("{err}"))
        .with_context(|| format!("failed to load edits from {}", config.edits_path.display()))?;

    let prior_port_spine = match &config.prior_state_path {
        Some(path) => Some(
            load_prior_state(path)
                .map_err(|err| anyhow::anyhow!("{err}"))
                .with_context(|| format!("failed to load prior state from {}", path.display()))?
                .s3_port_spine,
        ),
        None => None,
    };

    let raw_locks = match &config.locks_path {
        Some(path) => load_locks(path)
            .map_err(|err| anyhow::anyhow!("{err}"))
            .with_context(|| format!("failed to load locks from {}", path.display()))?,
        None => Vec::new(),
    };
    let locks = LockStore::load(&raw_locks, config.fabric.n(), config.fabric.max_ports());

    let mut engine = Engine::new(config.fabric, locks, prior_port_spine, config.strict_stability);

    for edit in &edits {
        let outcome = match edit {
            Edit::Route { input, targets } => engine.route(*input, targets),
            Edit::Clear { input } => engine.clear(*input),
        };
        if let Err(err) = outcome {
            if err.kind == EngineErrorKind::Internal {
                error!(error = %err, "internal error applying edit, aborting");
                return Err(anyhow::anyhow!("{err}"));
            }
            warn!(error = %err, "edit rejected, continuing with the next one");
        }
    }

    let demand_set = build_demands(engine.fabric())
        .map_err(|err| anyhow::anyhow!("{err}"))
        .context("failed to rebuild demands for the final report")?;
    let locked_demands = engine.locks().count_locked_demands(&demand_set);
    let locked_outputs = engine.locks().count_locked_outputs(engine.fabric());
    let lock_conflicts = engine.locks().validate_against_demands(&demand_set);

    let report = build_report(
        &engine,
        config.strict_stability,
        locked_demands,
        locked_outputs,
        lock_conflicts,
    );

    write_report(&config.out_path, &report)
        .map_err(|err| anyhow::anyhow!("{err}"))
        .with_context(|| format!("failed to write report to {}", config.out_path.display()))?;

    Ok(())
}
