//! On-disk configuration format (spec.md section 6):
//!
//! ```json
//! { "tunnels": [ { "name": ..., "user": ..., "host": ..., "port": ...,
//!                  "ssh_key": ..., "type": "forward"|"reverse",
//!                  "local_port": ..., "remote_host": ..., "remote_port": ...,
//!                  "reconnect_delay": ... }, ... ] }
//! ```
//!
//! The loader tolerates unknown fields and skips individually malformed
//! entries with a warning rather than failing the whole load; it fails only
//! when the top-level document has no `tunnels` array. The writer emits the
//! configuration subset only — never status, restart_count, last_restart,
//! or any runtime handle.

use std::path::Path;

use serde_json::Value;
use tracing::warn;

use crate::error::{TunnelError, TunnelResult};
use crate::tunnel::TunnelSpec;

/// Read and validate every tunnel entry found under the top-level `tunnels`
/// array. A single malformed entry is skipped with a warning; the document
/// itself must contain a `tunnels` array or the whole load fails.
pub fn load_specs<P: AsRef<Path>>(path: P) -> TunnelResult<Vec<TunnelSpec>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| TunnelError::Config(format!("failed to read {}: {e}", path.display())))?;

    let document: Value = serde_json::from_str(&content)
        .map_err(|e| TunnelError::Config(format!("failed to parse {}: {e}", path.display())))?;

    let entries = document
        .get("tunnels")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            TunnelError::Config(format!(
                "{} must contain a top-level array under \"tunnels\"",
                path.display()
            ))
        })?;

    let mut specs = Vec::with_capacity(entries.len());
    for (idx, entry) in entries.iter().enumerate() {
        match serde_json::from_value::<TunnelSpec>(entry.clone()) {
            Ok(spec) => match spec.validate() {
                Ok(()) => specs.push(spec),
                Err(e) => warn!("skipping tunnels[{idx}]: {e}"),
            },
            Err(e) => warn!("skipping tunnels[{idx}]: {e}"),
        }
    }

    Ok(specs)
}

/// Re-emit the given specs as a pretty-printed document under `tunnels`.
pub fn write_specs<P: AsRef<Path>>(path: P, specs: &[TunnelSpec]) -> TunnelResult<()> {
    let document = serde_json::json!({ "tunnels": specs });
    let content = serde_json::to_string_pretty(&document)
        .map_err(|e| TunnelError::Config(format!("failed to serialize config: {e}")))?;
    std::fs::write(path, content)
        .map_err(|e| TunnelError::Config(format!("failed to write config file: {e}")))?;
    Ok(())
}
