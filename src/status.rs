//! Status renderer (spec.md section 4.6): a read-only projection of the
//! manager's tunnel table. Formats each tunnel as a two-line block and
//! aggregates counts by status bucket in a footer. Clears the terminal as
//! a side effect, to support the `watch` command's repeated redraw.

use chrono::Utc;

use crate::tunnel::{TunnelSnapshot, TunnelStatus, TunnelType};

/// ANSI clear-screen + cursor-home, matching the terminal tools this system
/// is descended from.
pub fn clear_screen() {
    print!("\x1B[2J\x1B[H");
}

fn connection_chain(snapshot: &TunnelSnapshot) -> String {
    let spec = &snapshot.spec;
    match spec.tunnel_type {
        TunnelType::Forward => format!(
            "127.0.0.1:{} -> {}@{}:{} -> {}:{}",
            spec.local_port, spec.user, spec.host, spec.port, spec.remote_host, spec.remote_port
        ),
        TunnelType::Reverse => format!(
            "{}:{} <- {}@{}:{} <- 127.0.0.1:{}",
            spec.remote_host, spec.remote_port, spec.user, spec.host, spec.port, spec.local_port
        ),
    }
}

fn time_since(snapshot: &TunnelSnapshot) -> String {
    match snapshot.last_restart {
        None => "never".to_string(),
        Some(at) => {
            let secs = (Utc::now() - at).num_seconds().max(0);
            format!("{secs}s ago")
        }
    }
}

fn render_block(snapshot: &TunnelSnapshot) -> String {
    format!(
        "{}  {}\n  [{}] restarts={} delay={}s last_restart={}",
        snapshot.spec.name,
        connection_chain(snapshot),
        snapshot.status.label(),
        snapshot.restart_count,
        snapshot.spec.reconnect_delay,
        time_since(snapshot),
    )
}

fn footer(snapshots: &[TunnelSnapshot]) -> String {
    let mut running = 0;
    let mut stopped = 0;
    let mut errored = 0;
    for s in snapshots {
        match s.status {
            TunnelStatus::Running => running += 1,
            TunnelStatus::Stopped => stopped += 1,
            other if other.is_error() => errored += 1,
            _ => {}
        }
    }
    let transitional = snapshots.len() - running - stopped - errored;
    format!(
        "-- {} tunnel(s): {} running, {} stopped, {} error, {} transitional --",
        snapshots.len(),
        running,
        stopped,
        errored,
        transitional
    )
}

/// Render the full table as operators see it with `status`/`watch`.
pub fn render(snapshots: &[TunnelSnapshot]) -> String {
    if snapshots.is_empty() {
        return "(no tunnels configured)".to_string();
    }
    let mut out = String::new();
    for snapshot in snapshots {
        out.push_str(&render_block(snapshot));
        out.push_str("\n\n");
    }
    out.push_str(&footer(snapshots));
    out
}

/// Clear the screen then print the rendered table, as `status` and `watch`
/// both do.
pub fn print_status(snapshots: &[TunnelSnapshot]) {
    clear_screen();
    println!("{}", render(snapshots));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::TunnelSpec;

    fn snapshot(name: &str, tunnel_type: TunnelType, status: TunnelStatus) -> TunnelSnapshot {
        TunnelSnapshot {
            spec: TunnelSpec {
                name: name.into(),
                user: "alice".into(),
                host: "bastion.example.com".into(),
                port: 22,
                ssh_key: "/k".into(),
                tunnel_type,
                local_port: 8080,
                remote_host: "127.0.0.1".into(),
                remote_port: 80,
                reconnect_delay: 5,
            },
            status,
            restart_count: 3,
            last_restart: None,
            should_run: true,
            has_worker: true,
        }
    }

    #[test]
    fn forward_chain_reads_local_to_remote() {
        let snap = snapshot("web", TunnelType::Forward, TunnelStatus::Running);
        let rendered = render(&[snap]);
        assert!(rendered.contains("127.0.0.1:8080 -> alice@bastion.example.com:22 -> 127.0.0.1:80"));
    }

    #[test]
    fn reverse_chain_reads_remote_to_local() {
        let snap = snapshot("web", TunnelType::Reverse, TunnelStatus::Running);
        let rendered = render(&[snap]);
        assert!(rendered.contains("127.0.0.1:80 <- alice@bastion.example.com:22 <- 127.0.0.1:8080"));
    }

    #[test]
    fn footer_counts_buckets() {
        let snaps = vec![
            snapshot("a", TunnelType::Forward, TunnelStatus::Running),
            snapshot("b", TunnelType::Forward, TunnelStatus::Stopped),
            snapshot("c", TunnelType::Forward, TunnelStatus::AuthError),
        ];
        let rendered = render(&snaps);
        assert!(rendered.contains("3 tunnel(s): 1 running, 1 stopped, 1 error, 0 transitional"));
    }

    #[test]
    fn empty_table_renders_placeholder() {
        assert_eq!(render(&[]), "(no tunnels configured)");
    }
}
