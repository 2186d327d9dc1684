//! Logging configuration using tracing.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging with the specified level.
///
/// `RUST_LOG` wins over the configured level when it is set. Output goes to
/// stderr so command output on stdout stays parseable.
pub fn init(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directives(level)))
        .unwrap_or_else(|_| EnvFilter::new(directives("info")));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()?;

    Ok(())
}

/// The configured level applies to our crates; dependencies (hyper, reqwest,
/// the cron scheduler) only surface warnings.
fn directives(level: &str) -> String {
    let level = level.trim().to_ascii_lowercase();
    format!("warn,datasaver={level},datasaver_core={level}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_is_scoped_to_our_crates() {
        assert_eq!(directives(" DEBUG "), "warn,datasaver=debug,datasaver_core=debug");
    }

    #[test]
    fn bad_level_is_rejected_by_filter() {
        assert!(EnvFilter::try_new(directives("loud")).is_err());
    }
}
