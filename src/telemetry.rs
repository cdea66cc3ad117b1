use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `RISK_LOG` overrides the `info` default.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_env("RISK_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
