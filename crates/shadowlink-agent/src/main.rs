//! # Shadowlink Agent
//!
//! Device-side reconciliation agent for the AWS IoT Device Shadow service.
//!
//! ## Flow
//!
//! One run performs a single reconciliation pass:
//! 1. **Connect**: TLS to the broker, then an MQTT session over it
//! 2. **Clear**: delete the shadow so stale desired state cannot replay
//! 3. **Desire**: publish the configured desired power state
//! 4. **Reconcile**: adopt strictly newer service deltas into local state
//! 5. **Report**: publish the adopted state back, then unwind and disconnect

use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod identity;
mod runtime;

pub use config::AgentConfig;
pub use identity::{DeviceCredentialPaths, StaticIdentity};
pub use runtime::Agent;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Shadowlink agent"
    );

    // Load configuration
    let config = AgentConfig::from_env()?;

    // Resolve the device identity the pass will present
    let identity = StaticIdentity::new(
        config.shadow.device_id.clone(),
        DeviceCredentialPaths {
            certificate: config.tls.client_cert_path.clone(),
            private_key: config.tls.client_key_path.clone(),
        },
    );

    let agent = Agent::new(config, Box::new(identity));

    // Run one reconciliation pass
    agent.run().await?;

    Ok(())
}
