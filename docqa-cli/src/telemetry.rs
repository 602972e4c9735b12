//! Logging setup for the `docqa` binary.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber, writing to stderr so answers on stdout
/// stay clean.
///
/// `RUST_LOG` wins when set; otherwise `default_level` applies to this
/// workspace's crates and `warn` to everything else.
pub fn init_logging(json: bool, default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("warn,docqa_rag={default_level},docqa_cli={default_level}"))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    // try_init so a second call (tests) is a no-op instead of a panic
    let _ = if json { builder.json().try_init() } else { builder.try_init() };
}
