use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "ethereal_engine=info,ethereal_cli=info";

/// Installs the global subscriber once; `RUST_LOG` overrides the default
/// filter. Output goes to stderr so chat and JSON output stay clean.
pub fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG")
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
