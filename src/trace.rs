use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Initializes the global tracing subscriber. `RUST_LOG` overrides
/// `levels`. Safe to call more than once; later calls are ignored.
pub fn init(levels: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(levels));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
