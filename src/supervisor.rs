//! Per-tunnel supervisor worker (spec.md section 4.2): owns one SSH child
//! process over the tunnel's lifetime, classifies its early output and exit
//! code, and honours `should_run` and the reconnect delay between attempts.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::classify::{classify_exit_code, classify_output};
use crate::manager::Manager;
use crate::ssh;
use crate::tunnel::{TunnelStatus, TunnelType};

const FORWARD_SETTLE: Duration = Duration::from_secs(2);
const REVERSE_SETTLE: Duration = Duration::from_secs(5);

/// Outcome of a single spawn-classify-run attempt.
enum Attempt {
    /// The attempt settled into a failure bucket before RUNNING.
    EarlyFailure(TunnelStatus),
    /// The child ran and exited; carries the exit-derived next status.
    Exited(TunnelStatus),
    /// Spawn itself failed.
    SpawnFailed,
}

/// Supervise one tunnel until `should_run` goes false or global shutdown is
/// observed. Spawned once per `start`/`reset`; terminal state is STOPPED.
/// `started_tx`, if given, fires once this worker's first `begin_attempt`
/// has run, letting a caller (namely `Manager::reset`) await the point at
/// which `restart_count` has actually been bumped rather than just the
/// point at which the task was scheduled.
pub async fn run(
    manager: Arc<Manager>,
    name: String,
    mut should_run_rx: watch::Receiver<bool>,
    mut started_tx: Option<oneshot::Sender<()>>,
) {
    loop {
        if !*should_run_rx.borrow() || !manager.is_running() {
            manager.set_status(&name, TunnelStatus::Stopped);
            return;
        }

        let Some(spec) = manager.tunnel_spec(&name) else {
            return;
        };

        manager.begin_attempt(&name);
        if let Some(tx) = started_tx.take() {
            let _ = tx.send(());
        }

        let attempt = run_one_attempt(&manager, &name, &spec, &mut should_run_rx).await;

        let reconnect_delay = spec.reconnect_delay;

        match attempt {
            Attempt::SpawnFailed => {
                manager.set_status(&name, TunnelStatus::Error);
                manager.log(&name, "ssh spawn failed");
            }
            Attempt::EarlyFailure(status) => {
                manager.set_status(&name, status);
                manager.log(&name, &format!("classified as {}", status.label()));
            }
            Attempt::Exited(status) => {
                manager.set_status(&name, status);
                manager.log(&name, &format!("ssh exited, next state {}", status.label()));
            }
        }

        if !*should_run_rx.borrow() || !manager.is_running() {
            manager.set_status(&name, TunnelStatus::Stopped);
            return;
        }

        tokio::select! {
            _ = sleep(Duration::from_secs(reconnect_delay)) => {}
            _ = should_run_rx.changed() => {}
        }
    }
}

/// Spawn ssh, allow a settle window, classify any early output, then either
/// report the failure bucket or move to RUNNING and block on exit.
async fn run_one_attempt(
    manager: &Arc<Manager>,
    name: &str,
    spec: &crate::tunnel::TunnelSpec,
    should_run_rx: &mut watch::Receiver<bool>,
) -> Attempt {
    let mut child = match ssh::spawn(spec) {
        Ok(child) => child,
        Err(e) => {
            manager.log(name, &format!("spawn failed: {e}"));
            return Attempt::SpawnFailed;
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let mut readers: Vec<tokio::task::JoinHandle<()>> = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        let tx = tx.clone();
        readers.push(tokio::spawn(pump_lines(stdout, tx)));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(pump_lines(stderr, tx)));
    }

    let settle = match spec.tunnel_type {
        TunnelType::Forward => FORWARD_SETTLE,
        TunnelType::Reverse => REVERSE_SETTLE,
    };

    let mut accumulated = String::new();
    let deadline = tokio::time::sleep(settle);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            line = rx.recv() => {
                match line {
                    Some(l) => {
                        manager.log(name, &l);
                        accumulated.push_str(&l);
                        accumulated.push('\n');
                    }
                    None => break,
                }
            }
        }
    }

    if let Some(status) = classify_output(&accumulated) {
        kill_child(&mut child).await;
        return Attempt::EarlyFailure(status);
    }

    manager.set_status(name, TunnelStatus::Running);
    manager.log(name, "running");

    loop {
        tokio::select! {
            line = rx.recv() => {
                match line {
                    Some(l) => manager.log(name, &l),
                    None => {}
                }
            }
            status = child.wait() => {
                return match status {
                    Ok(exit) => {
                        let code = exit.code().unwrap_or(-1);
                        match classify_exit_code(code) {
                            Some(status) => Attempt::Exited(status),
                            None if *should_run_rx.borrow() => Attempt::Exited(TunnelStatus::Reconnecting),
                            None => Attempt::Exited(TunnelStatus::Stopped),
                        }
                    }
                    Err(e) => {
                        warn!("error waiting on ssh child for {}: {}", name, e);
                        Attempt::Exited(TunnelStatus::Error)
                    }
                };
            }
            _ = should_run_rx.changed() => {
                if !*should_run_rx.borrow() {
                    close_pipe_and_wait(&mut child, &readers).await;
                    return Attempt::Exited(TunnelStatus::Stopped);
                }
            }
        }
    }
}

/// Read lines from a child's stdout/stderr and forward them, one line per
/// message, closing the channel naturally when the stream ends.
async fn pump_lines<R>(stream: R, tx: mpsc::UnboundedSender<String>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(line).is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                debug!("error reading ssh output: {}", e);
                return;
            }
        }
    }
}

/// Kill and reap the child after an early-output classification match, used
/// only by the classify-then-cleanup-then-retry path (spec.md section 9's
/// dead-branch note: this is the single fallible kill-then-wait step for
/// that path, called from exactly one place per attempt, so the child
/// handle can never be closed twice).
async fn kill_child(child: &mut Child) {
    if let Err(e) = child.kill().await {
        debug!("error killing ssh child: {}", e);
    }
    let _ = child.wait().await;
}

/// Operator-initiated stop while a child is RUNNING (spec.md section 4.2
/// "Cancellation"): the supervisor does not preempt an in-flight child, it
/// only closes the captured pipe by aborting the readers holding the read
/// end of stdout/stderr. Most ssh clients take a SIGPIPE on their next write
/// and exit on their own; we then just wait for that exit rather than kill.
async fn close_pipe_and_wait(child: &mut Child, readers: &[tokio::task::JoinHandle<()>]) {
    for reader in readers {
        reader.abort();
    }
    let _ = child.wait().await;
}
