use anyhow::Context;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber, honouring `RUST_LOG` and falling back to
/// `info`.
pub fn init_tracing() -> anyhow::Result<()> {
    init_tracing_with_default("info")
}

/// Like [`init_tracing`] with a caller-chosen fallback directive.
pub fn init_tracing_with_default(default_directive: &str) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directive.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("failed to install tracing subscriber")
}
