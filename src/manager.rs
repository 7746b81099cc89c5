//! Manager registry (spec.md section 4.1): the authoritative table of
//! tunnel definitions and runtime state, serializing every mutation behind
//! a single lock. Any operation that waits on a worker join releases the
//! lock first — this is mandatory to avoid deadlocking with the worker
//! updating its own status under the same lock.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::{oneshot, watch};
use tracing::warn;

use crate::config;
use crate::error::{TunnelError, TunnelResult};
use crate::supervisor;
use crate::tunnel::{Tunnel, TunnelSpec, TunnelSnapshot, TunnelStatus};

pub const DEFAULT_CAPACITY: usize = 32;

pub struct Manager {
    tunnels: Mutex<Vec<Tunnel>>,
    running: AtomicBool,
    capacity: usize,
    log_dir: PathBuf,
    default_config_path: Mutex<PathBuf>,
}

fn find_mut<'a>(tunnels: &'a mut [Tunnel], name: &str) -> Option<&'a mut Tunnel> {
    tunnels.iter_mut().find(|t| t.spec.name == name)
}

impl Manager {
    pub fn new(config_path: PathBuf, log_dir: PathBuf, capacity: usize) -> Self {
        Self {
            tunnels: Mutex::new(Vec::new()),
            running: AtomicBool::new(true),
            capacity,
            log_dir,
            default_config_path: Mutex::new(config_path),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Read the config file, validate and append each entry up to capacity,
    /// opening a log sink for each. A single bad entry is skipped with a
    /// warning (handled in `config::load_specs`); the load as a whole fails
    /// only if the document has no `tunnels` array or is unreadable.
    pub fn load(&self, path: &Path) -> TunnelResult<usize> {
        let specs = config::load_specs(path)?;
        let mut tunnels = self.tunnels.lock().unwrap();
        let mut loaded = 0;
        for spec in specs {
            if tunnels.len() >= self.capacity {
                warn!(
                    "dropping tunnel {} on load: table is at capacity ({})",
                    spec.name, self.capacity
                );
                continue;
            }
            if tunnels.iter().any(|t| t.spec.name == spec.name) {
                warn!("dropping duplicate tunnel name {} on load", spec.name);
                continue;
            }
            match Tunnel::new(spec, &self.log_dir) {
                Ok(tunnel) => {
                    tunnels.push(tunnel);
                    loaded += 1;
                }
                Err(e) => warn!("failed to register tunnel: {e}"),
            }
        }
        Ok(loaded)
    }

    /// Snapshot the table under lock and write it out after releasing the
    /// lock, so disk I/O never happens while other operations are blocked.
    pub fn save(&self, path: &Path) -> TunnelResult<()> {
        let specs: Vec<TunnelSpec> = {
            let tunnels = self.tunnels.lock().unwrap();
            tunnels.iter().map(|t| t.spec.clone()).collect()
        };
        config::write_specs(path, &specs)
    }

    fn save_default(&self) {
        let path = self.default_config_path.lock().unwrap().clone();
        if let Err(e) = self.save(&path) {
            warn!("failed to persist config to {}: {}", path.display(), e);
        }
    }

    /// Append a new tunnel after validating name uniqueness and field
    /// ranges. Rejects when the table is at capacity. Persists on success.
    pub fn add(&self, spec: TunnelSpec) -> TunnelResult<()> {
        spec.validate()?;
        {
            let mut tunnels = self.tunnels.lock().unwrap();
            if tunnels.len() >= self.capacity {
                return Err(TunnelError::Manager(format!(
                    "tunnel table is at capacity ({})",
                    self.capacity
                )));
            }
            if tunnels.iter().any(|t| t.spec.name == spec.name) {
                return Err(TunnelError::Manager(format!(
                    "a tunnel named {} already exists",
                    spec.name
                )));
            }
            let tunnel = Tunnel::new(spec, &self.log_dir)?;
            tunnels.push(tunnel);
        }
        self.save_default();
        Ok(())
    }

    /// Not a spec.md-mandated operation (section 9 leaves removal as an
    /// open question); added per DESIGN.md's resolution. Stops the tunnel
    /// first if it is running, then drops it and persists.
    pub async fn remove(&self, name: &str) -> TunnelResult<()> {
        let _ = self.stop(name).await;
        let mut tunnels = self.tunnels.lock().unwrap();
        let before = tunnels.len();
        tunnels.retain(|t| t.spec.name != name);
        if tunnels.len() == before {
            return Err(TunnelError::NotFound(name.to_string()));
        }
        drop(tunnels);
        self.save_default();
        Ok(())
    }

    /// Start one tunnel's supervisor. Not-found is an error; a tunnel that
    /// already has a worker is a no-op with a warning. Returns a receiver
    /// that resolves once the freshly spawned worker has run its first
    /// `begin_attempt` (i.e. `restart_count` has been bumped) — callers that
    /// don't need that ordering guarantee (this one included) are free to
    /// drop it.
    fn spawn_worker(self: &Arc<Self>, name: &str) -> TunnelResult<oneshot::Receiver<()>> {
        let mut tunnels = self.tunnels.lock().unwrap();
        let tunnel = find_mut(&mut tunnels, name).ok_or_else(|| TunnelError::NotFound(name.to_string()))?;
        if tunnel.worker.is_some() {
            warn!("tunnel {} is already running", name);
            let (_started_tx, started_rx) = oneshot::channel();
            return Ok(started_rx);
        }
        tunnel.should_run = true;
        tunnel.status = TunnelStatus::Starting;
        let (tx, rx) = watch::channel(true);
        tunnel.should_run_tx = Some(tx);
        let (started_tx, started_rx) = oneshot::channel();
        let manager = Arc::clone(self);
        let owned_name = name.to_string();
        let handle = tokio::spawn(async move {
            supervisor::run(manager, owned_name, rx, Some(started_tx)).await;
        });
        tunnel.worker = Some(handle);
        Ok(started_rx)
    }

    /// Start one tunnel's supervisor. Not-found is an error; a tunnel that
    /// already has a worker is a no-op with a warning.
    pub fn start(self: &Arc<Self>, name: &str) -> TunnelResult<()> {
        self.spawn_worker(name)?;
        Ok(())
    }

    pub fn start_all(self: &Arc<Self>) {
        let names: Vec<String> = {
            let tunnels = self.tunnels.lock().unwrap();
            tunnels.iter().map(|t| t.spec.name.clone()).collect()
        };
        for name in names {
            if let Err(e) = self.start(&name) {
                warn!("failed to start {}: {}", name, e);
            }
        }
    }

    /// Stop one tunnel. Releases the lock before joining its worker, per
    /// the mandatory join-outside-lock rule. A tunnel with no worker is a
    /// no-op.
    pub async fn stop(&self, name: &str) -> TunnelResult<()> {
        let (handle, existed) = {
            let mut tunnels = self.tunnels.lock().unwrap();
            let tunnel = find_mut(&mut tunnels, name)
                .ok_or_else(|| TunnelError::NotFound(name.to_string()))?;
            tunnel.should_run = false;
            if let Some(tx) = &tunnel.should_run_tx {
                let _ = tx.send(false);
            }
            (tunnel.worker.take(), tunnel.should_run_tx.take().is_some())
        };

        if let Some(handle) = handle {
            let _ = handle.await;
        } else if !existed {
            warn!("tunnel {} was not running", name);
        }

        let mut tunnels = self.tunnels.lock().unwrap();
        if let Some(tunnel) = find_mut(&mut tunnels, name) {
            tunnel.status = TunnelStatus::Stopped;
        }
        Ok(())
    }

    /// Stop every tunnel concurrently, so total shutdown time is bounded by
    /// the slowest single worker's join rather than the sum of all of them
    /// (spec.md section 5: shutdown is bounded by one child exit plus one
    /// reconnect delay per tunnel, not per tunnel summed).
    pub async fn stop_all(&self) {
        let names: Vec<String> = {
            let tunnels = self.tunnels.lock().unwrap();
            tunnels.iter().map(|t| t.spec.name.clone()).collect()
        };
        let stops = names.iter().map(|name| self.stop(name));
        for (name, result) in names.iter().zip(futures::future::join_all(stops).await) {
            if let Err(e) = result {
                warn!("failed to stop {}: {}", name, e);
            }
        }
    }

    /// Stop-then-start a tunnel, zeroing its restart counter as part of the
    /// transition. Awaits the fresh worker's first `begin_attempt` before
    /// returning, so that `restart_count` is observably `1` the moment this
    /// call resolves (spec.md section 8: "After `reset(name)` returns with
    /// no spawn failure, the tunnel's `restart_count` is exactly 1") —
    /// without this, a caller reading `restart_count` right after `reset`
    /// returns could race the spawned task and still observe `0`.
    pub async fn reset(self: &Arc<Self>, name: &str) -> TunnelResult<()> {
        self.stop(name).await?;
        {
            let mut tunnels = self.tunnels.lock().unwrap();
            let tunnel = find_mut(&mut tunnels, name)
                .ok_or_else(|| TunnelError::NotFound(name.to_string()))?;
            tunnel.restart_count = 0;
        }
        let started = self.spawn_worker(name)?;
        let _ = started.await;
        Ok(())
    }

    /// Signal global shutdown: every worker observes this and stops after
    /// its current attempt, bounded by one child exit plus one reconnect
    /// delay.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stop_all().await;
    }

    pub fn snapshot(&self) -> Vec<TunnelSnapshot> {
        let tunnels = self.tunnels.lock().unwrap();
        tunnels.iter().map(Tunnel::snapshot).collect()
    }

    pub fn list_names(&self) -> Vec<String> {
        let tunnels = self.tunnels.lock().unwrap();
        tunnels.iter().map(|t| t.spec.name.clone()).collect()
    }

    pub fn tunnel_spec(&self, name: &str) -> Option<TunnelSpec> {
        let tunnels = self.tunnels.lock().unwrap();
        tunnels
            .iter()
            .find(|t| t.spec.name == name)
            .map(|t| t.spec.clone())
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    // --- called from the supervisor task only, under lock ---

    pub(crate) fn begin_attempt(&self, name: &str) {
        let mut tunnels = self.tunnels.lock().unwrap();
        if let Some(tunnel) = find_mut(&mut tunnels, name) {
            tunnel.status = TunnelStatus::Starting;
            tunnel.restart_count += 1;
            tunnel.last_restart = Some(Utc::now());
            tunnel.log_event("starting attempt");
        }
    }

    pub(crate) fn set_status(&self, name: &str, status: TunnelStatus) {
        let mut tunnels = self.tunnels.lock().unwrap();
        if let Some(tunnel) = find_mut(&mut tunnels, name) {
            tunnel.status = status;
        }
    }

    pub(crate) fn log(&self, name: &str, message: &str) {
        let mut tunnels = self.tunnels.lock().unwrap();
        if let Some(tunnel) = find_mut(&mut tunnels, name) {
            tunnel.log_event(message);
        }
    }
}
