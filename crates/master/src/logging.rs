use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Installs the process-wide `tracing` subscriber. `log_level` is the
/// `--log_level` CLI flag and is used as the default filter directive when
/// `RUST_LOG` is not set.
pub fn install(log_level: &str) {
    let filter = EnvFilter::builder()
        .with_default_directive(
            log_level
                .parse()
                .unwrap_or(tracing::level_filters::LevelFilter::INFO.into()),
        )
        .from_env_lossy();

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter);

    tracing_subscriber::registry().with(fmt_layer).init();
}
