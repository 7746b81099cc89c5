//! Centralizes the substring classification table from spec.md section 4.2,
//! so tests can exhaustively enumerate it instead of relying on scattered
//! `if line.contains(...)` checks the way the source program did.

use crate::tunnel::TunnelStatus;

/// Trigger substrings for each failure bucket, checked in precedence order:
/// auth first, then port conflict, then generic. Matches are case-sensitive,
/// as spec.md specifies.
const AUTH_TRIGGERS: &[&str] = &[
    "Permission denied",
    "Authentication failed",
    "Permissions",
    "too open",
];

const PORT_TRIGGERS: &[&str] = &[
    "bind: Address already in use",
    "remote port forwarding failed",
    "Warning: remote port forwarding failed",
    "cannot listen to port",
    "bind: Cannot assign requested address",
];

const GENERIC_TRIGGERS: &[&str] = &[
    "Connection refused",
    "Host key verification failed",
    "No such file",
    "Could not resolve hostname",
];

/// Classify accumulated early SSH output into a failure status, if any
/// trigger substring matches. Returns `None` when nothing matched, meaning
/// the attempt should proceed to RUNNING.
pub fn classify_output(accumulated: &str) -> Option<TunnelStatus> {
    if AUTH_TRIGGERS.iter().any(|t| accumulated.contains(t)) {
        return Some(TunnelStatus::AuthError);
    }
    if PORT_TRIGGERS.iter().any(|t| accumulated.contains(t)) {
        return Some(TunnelStatus::PortError);
    }
    if GENERIC_TRIGGERS.iter().any(|t| accumulated.contains(t)) {
        return Some(TunnelStatus::Error);
    }
    None
}

/// Classify a nonzero/zero SSH exit code, used when the child exits without
/// any earlier output match having already decided the status.
pub fn classify_exit_code(code: i32) -> Option<TunnelStatus> {
    match code {
        0 => None,
        255 => Some(TunnelStatus::AuthError),
        _ => Some(TunnelStatus::Error),
    }
}
