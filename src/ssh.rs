//! SSH invocation contract: builds the argument vector for a forward or
//! reverse tunnel (spec.md section 4.3) and spawns it with merged output.

use std::process::Stdio;

use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::debug;

use crate::error::{TunnelError, TunnelResult};
use crate::tunnel::TunnelSpec;

/// Name of the external ssh binary, overridable for tests via `SSH_PROGRAM`
/// so an end-to-end harness can point it at a fake client script.
fn ssh_program() -> String {
    std::env::var("SSH_PROGRAM").unwrap_or_else(|_| "ssh".to_string())
}

/// Build the exact argument vector spec.md 4.3 describes, reproducible on
/// demand for the `debug` REPL command.
pub fn build_args(spec: &TunnelSpec) -> Vec<String> {
    let forward_arg = match spec.tunnel_type {
        crate::tunnel::TunnelType::Forward => format!(
            "{}:{}:{}",
            spec.local_port, spec.remote_host, spec.remote_port
        ),
        crate::tunnel::TunnelType::Reverse => format!(
            "{}:{}:{}",
            spec.remote_port, spec.remote_host, spec.local_port
        ),
    };

    vec![
        "-i".to_string(),
        spec.ssh_key.clone(),
        "-N".to_string(),
        spec.tunnel_type.ssh_flag().to_string(),
        forward_arg,
        format!("{}@{}", spec.user, spec.host),
        "-p".to_string(),
        spec.port.to_string(),
        "-o".to_string(),
        "ConnectTimeout=10".to_string(),
        "-o".to_string(),
        "ServerAliveInterval=30".to_string(),
        "-o".to_string(),
        "IdentitiesOnly=yes".to_string(),
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=no".to_string(),
    ]
}

/// Render the command line exactly as it would be spawned, for `debug`.
pub fn command_line(spec: &TunnelSpec) -> String {
    let mut parts = vec![ssh_program()];
    parts.extend(build_args(spec));
    parts.join(" ")
}

/// Spawn the SSH client for this tunnel with stdout and stderr merged into a
/// single captured stream.
pub fn spawn(spec: &TunnelSpec) -> TunnelResult<Child> {
    let mut cmd = Command::new(ssh_program());
    cmd.args(build_args(spec));
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning ssh for tunnel {}: {:?}", spec.name, cmd);

    cmd.spawn()
        .map_err(|e| TunnelError::Ssh(format!("failed to start ssh process: {e}")))
}

/// Attempt a nonblocking TCP connect to 127.0.0.1:local_port. Reports
/// success/failure only; never alters tunnel state. For reverse tunnels
/// this only verifies the local service side is reachable — the remote
/// listener cannot be probed from here (spec.md 4.7).
pub async fn probe_local_port(local_port: u16) -> bool {
    let addr = format!("127.0.0.1:{local_port}");
    match timeout(std::time::Duration::from_secs(2), TcpStream::connect(&addr)).await {
        Ok(Ok(_)) => true,
        Ok(Err(_)) | Err(_) => false,
    }
}
