use std::fs::{File, OpenOptions};
use std::io::Write;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::{TunnelError, TunnelResult};

/// Direction of an SSH port forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelType {
    Forward,
    Reverse,
}

impl Default for TunnelType {
    fn default() -> Self {
        TunnelType::Forward
    }
}

impl TunnelType {
    /// SSH forwarding flag for this direction.
    pub fn ssh_flag(&self) -> &'static str {
        match self {
            TunnelType::Forward => "-L",
            TunnelType::Reverse => "-R",
        }
    }
}

/// Runtime state of a tunnel's supervisor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelStatus {
    Stopped,
    Starting,
    Running,
    Reconnecting,
    Error,
    AuthError,
    PortError,
}

impl TunnelStatus {
    pub fn label(&self) -> &'static str {
        match self {
            TunnelStatus::Stopped => "STOPPED",
            TunnelStatus::Starting => "STARTING",
            TunnelStatus::Running => "RUNNING",
            TunnelStatus::Reconnecting => "RECONNECTING",
            TunnelStatus::Error => "ERROR",
            TunnelStatus::AuthError => "AUTH_ERROR",
            TunnelStatus::PortError => "PORT_ERROR",
        }
    }

    /// Whether this status counts as a failure bucket for the status renderer footer.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            TunnelStatus::Error | TunnelStatus::AuthError | TunnelStatus::PortError
        )
    }
}

/// The subset of tunnel fields that round-trip through the config file.
/// Deliberately excludes status, restart_count, last_restart, and any
/// runtime handle (spec.md 4.4: "persists the configuration subset only").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelSpec {
    pub name: String,
    pub user: String,
    pub host: String,
    pub port: u16,
    pub ssh_key: String,
    #[serde(rename = "type", default)]
    pub tunnel_type: TunnelType,
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay: u64,
}

fn default_reconnect_delay() -> u64 {
    5
}

impl TunnelSpec {
    /// Validate required fields and ranges per spec.md section 3.
    pub fn validate(&self) -> TunnelResult<()> {
        if self.name.is_empty() || self.name.len() > 63 {
            return Err(TunnelError::Validation(
                "name must be non-empty and at most 63 characters".into(),
            ));
        }
        if self.user.is_empty() {
            return Err(TunnelError::Validation("user must not be empty".into()));
        }
        if self.host.is_empty() {
            return Err(TunnelError::Validation("host must not be empty".into()));
        }
        if self.ssh_key.is_empty() {
            return Err(TunnelError::Validation("ssh_key must not be empty".into()));
        }
        if self.remote_host.is_empty() {
            return Err(TunnelError::Validation(
                "remote_host must not be empty".into(),
            ));
        }
        if self.port == 0 {
            return Err(TunnelError::Validation("port must be 1-65535".into()));
        }
        if self.local_port == 0 {
            return Err(TunnelError::Validation("local_port must be 1-65535".into()));
        }
        if self.remote_port == 0 {
            return Err(TunnelError::Validation("remote_port must be 1-65535".into()));
        }
        Ok(())
    }
}

/// A named SSH port-forward specification with runtime state attached.
pub struct Tunnel {
    pub spec: TunnelSpec,
    pub status: TunnelStatus,
    pub restart_count: u32,
    pub last_restart: Option<DateTime<Utc>>,
    pub should_run: bool,
    /// Set while a supervisor task is alive for this tunnel.
    pub worker: Option<JoinHandle<()>>,
    /// Signals `should_run` transitions into the worker without it needing
    /// to re-acquire the manager lock from inside its own sleep.
    pub should_run_tx: Option<watch::Sender<bool>>,
    /// Append-only event stream, opened once at registration.
    pub log: File,
}

impl Tunnel {
    pub fn new(spec: TunnelSpec, log_dir: &std::path::Path) -> TunnelResult<Self> {
        spec.validate()?;
        let log_path = log_dir.join(format!("{}.log", spec.name));
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| {
                TunnelError::Io(std::io::Error::new(
                    e.kind(),
                    format!("opening log sink {}: {e}", log_path.display()),
                ))
            })?;

        if let Ok(meta) = std::fs::metadata(&spec.ssh_key) {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let mode = meta.permissions().mode() & 0o777;
                if mode > 0o600 {
                    warn!(
                        "ssh_key {} has overly permissive mode {:o}",
                        spec.ssh_key, mode
                    );
                }
            }
            let _ = meta;
        } else {
            warn!("ssh_key {} does not exist", spec.ssh_key);
        }

        Ok(Self {
            spec,
            status: TunnelStatus::Stopped,
            restart_count: 0,
            last_restart: None,
            should_run: false,
            worker: None,
            should_run_tx: None,
            log,
        })
    }

    /// Append one formatted event line to this tunnel's log sink.
    pub fn log_event(&mut self, message: &str) {
        let line = format!(
            "[{}] [Restart #{}] {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            self.restart_count,
            message
        );
        if let Err(e) = self.log.write_all(line.as_bytes()) {
            warn!("failed to write log for tunnel {}: {}", self.spec.name, e);
        }
    }

    /// Read-only copy of this tunnel's state for the status renderer.
    pub fn snapshot(&self) -> TunnelSnapshot {
        TunnelSnapshot {
            spec: self.spec.clone(),
            status: self.status,
            restart_count: self.restart_count,
            last_restart: self.last_restart,
            should_run: self.should_run,
            has_worker: self.worker.is_some(),
        }
    }
}

/// Read-only projection of a [`Tunnel`] used by the status renderer and the
/// `diagnose` command; never mutated.
#[derive(Debug, Clone)]
pub struct TunnelSnapshot {
    pub spec: TunnelSpec,
    pub status: TunnelStatus,
    pub restart_count: u32,
    pub last_restart: Option<DateTime<Utc>>,
    pub should_run: bool,
    pub has_worker: bool,
}
