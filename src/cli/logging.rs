use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. Logs go to stderr so `sample`
/// output on stdout stays machine-readable. `RUST_LOG` overrides `level`.
pub fn init_logging(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    // A subscriber may already be installed (tests, embedding); keep it
    let _ = if format == "json" {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
