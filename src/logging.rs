use anyhow::{Context, Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt};

/// Initialises a single stderr `fmt` layer driven by `EnvFilter`. No
/// file rotation or retention: this engine is a one-shot CLI process
/// over a bounded in-memory search, not a long-running service.
pub fn init_tracing(filter: &str) -> Result<()> {
    if filter.trim().is_empty() {
        return Err(anyhow!("log filter cannot be empty"));
    }

    let env_filter = build_env_filter(filter)?;
    fmt()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_env_filter(env_filter)
        .try_init()
        .map_err(|err| anyhow!("failed to initialize tracing subscriber: {err}"))?;

    tracing::info!(target: "logging", filter, "logging_initialized");
    Ok(())
}

fn build_env_filter(filter: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(filter).with_context(|| format!("failed to parse log filter '{filter}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_filter_syntax_is_rejected() {
        let err = build_env_filter("info,core==debug").expect_err("malformed filter must fail");
        assert!(err.to_string().contains("log filter"));
    }
}
