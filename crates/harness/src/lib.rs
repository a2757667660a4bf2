//! Test doubles and multi-client fixtures for the integration suites.

mod client;
mod flaky;
mod network;

pub use client::TestClient;
pub use flaky::FlakyStore;
pub use network::TestNetwork;

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `RUST_LOG` (default `warn`). Safe to call from
/// every test; only the first call installs.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
