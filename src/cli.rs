use std::{env, path::PathBuf};

use anyhow::{Result, anyhow};

use crate::config::{FabricConfig, RunConfig};

const USAGE: &str = "usage: clos-repack --n <N> --edits <path> [--prior <path>] [--locks <path>] --out <path> [--strict-stability] [--log-filter <filter>]";

pub fn run_config_from_args() -> Result<RunConfig> {
    run_config_from(env::args().skip(1))
}

fn run_config_from(args: impl Iterator<Item = String>) -> Result<RunConfig> {
    let mut args = args;
    let mut n: Option<usize> = None;
    let mut edits_path: Option<PathBuf> = None;
    let mut prior_state_path: Option<PathBuf> = None;
    let mut locks_path: Option<PathBuf> = None;
    let mut out_path: Option<PathBuf> = None;
    let mut strict_stability = false;
    let mut log_filter = "info".to_string();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--n" => {
                let value = args.next().ok_or_else(|| anyhow!("missing value for --n"))?;
                n = Some(value.parse().map_err(|_| anyhow!("--n must be a positive integer, got '{value}'"))?);
            }
            "--edits" => {
                edits_path = Some(PathBuf::from(
                    args.next().ok_or_else(|| anyhow!("missing value for --edits"))?,
                ));
            }
            "--prior" => {
                prior_state_path = Some(PathBuf::from(
                    args.next().ok_or_else(|| anyhow!("missing value for --prior"))?,
                ));
            }
            "--locks" => {
                locks_path = Some(PathBuf::from(
                    args.next().ok_or_else(|| anyhow!("missing value for --locks"))?,
                ));
            }
            "--out" => {
                out_path = Some(PathBuf::from(
                    args.next().ok_or_else(|| anyhow!("missing value for --out"))?,
                ));
            }
            "--strict-stability" => strict_stability = true,
            "--log-filter" => {
                log_filter = args.next().ok_or_else(|| anyhow!("missing value for --log-filter"))?;
            }
            other => return Err(anyhow!("unknown argument: {other}. {USAGE}")),
        }
    }

    let n = n.ok_or_else(|| anyhow!("missing required --n. {USAGE}"))?;
    let edits_path = edits_path.ok_or_else(|| anyhow!("missing required --edits. {USAGE}"))?;
    let out_path = out_path.ok_or_else(|| anyhow!("missing required --out. {USAGE}"))?;
    let fabric = FabricConfig::new(n).map_err(|err| anyhow!("{err}"))?;

    Ok(RunConfig {
        fabric,
        edits_path,
        prior_state_path,
        locks_path,
        out_path,
        strict_stability,
        log_filter,
    })
}
