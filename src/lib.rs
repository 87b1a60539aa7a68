//! authload
//!
//! Drives a population of simulated end-users through a browser-based OAuth2
//! Authorization Code flow against an identity provider, harvests the
//! resulting access/refresh token pairs, and records per-phase latency
//! metrics. A load-generation utility, not a production service.

pub mod attempt;
pub mod browser;
pub mod credentials;
pub mod metrics;
pub mod runner;
pub mod settings;
pub mod tokens;

/// Initialize logging for the CLI.
///
/// Everything goes to stdout; `RUST_LOG` overrides the default INFO level.
pub fn init_logging() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .init();
}
