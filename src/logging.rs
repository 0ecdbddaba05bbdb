//! Tracing setup for binaries embedding the machine.

use std::sync::OnceLock;
use tracing::Level;
use tracing_subscriber::fmt::SubscriberBuilder;
use tracing_subscriber::EnvFilter;

static INIT: OnceLock<()> = OnceLock::new();

/// Installs a compact stderr subscriber once per process. `RUST_LOG` refines the
/// filter; without it records at `default_level` and above are shown.
pub fn init(component: &str, default_level: Level) {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::default().add_directive(default_level.into()));
        SubscriberBuilder::default()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_ansi(true)
            .compact()
            .init();
    });
    tracing::debug!(component, "tracing initialised");
}
