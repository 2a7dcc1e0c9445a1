/// Tracing subscriber setup
use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber; later calls are no-ops
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("🚀 Stepway tracing initialized (level: {})", config.level);
    }
}
