//! sshfleet - supervisor for a fleet of outbound SSH port-forwarding tunnels
//!
//! For each configured tunnel, spawns and re-spawns an external SSH client
//! carrying a single forward (`-L`) or reverse (`-R`) port forward, monitors
//! its liveness, classifies its diagnostic output for well-known failure
//! modes, and exposes an interactive command surface (the REPL) that lets
//! an operator inspect, start, stop, reset, add, probe, and persist tunnel
//! definitions at runtime.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sshfleet::manager::Manager;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     sshfleet::init_logging()?;
//!
//!     let manager = Arc::new(Manager::new(
//!         "config.json".into(),
//!         "logs".into(),
//!         sshfleet::manager::DEFAULT_CAPACITY,
//!     ));
//!     manager.load(std::path::Path::new("config.json"))?;
//!     manager.start_all();
//!
//!     Ok(())
//! }
//! ```

pub mod classify;
pub mod config;
pub mod error;
pub mod manager;
pub mod repl;
pub mod ssh;
pub mod status;
pub mod supervisor;
pub mod tunnel;

pub use error::{TunnelError, TunnelResult};
pub use manager::Manager;
pub use tunnel::{Tunnel, TunnelSpec, TunnelStatus, TunnelType};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured logging with tracing, honouring `RUST_LOG` if set.
pub fn init_logging() -> TunnelResult<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sshfleet=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| TunnelError::Config(e.to_string()))?;

    Ok(())
}
