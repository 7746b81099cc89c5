//! End-to-end scenarios from spec.md section 8, driven against a fake SSH
//! child process instead of a real SSH client. `SSH_PROGRAM` is a
//! process-wide environment variable, so tests that set it are serialized
//! through `ENV_GUARD` to avoid cross-test interference.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sshfleet::manager::Manager;
use sshfleet::tunnel::{TunnelSpec, TunnelStatus, TunnelType};

static ENV_GUARD: Mutex<()> = Mutex::new(());

fn write_fake_ssh(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake_ssh.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
    }
    path
}

fn sample_spec(name: &str, tunnel_type: TunnelType, reconnect_delay: u64) -> TunnelSpec {
    TunnelSpec {
        name: name.to_string(),
        user: "alice".into(),
        host: "bastion.example.com".into(),
        port: 22,
        ssh_key: "/dev/null".into(),
        tunnel_type,
        local_port: 18080,
        remote_host: "127.0.0.1".into(),
        remote_port: 6983,
        reconnect_delay,
    }
}

fn test_manager(dir: &Path, capacity: usize) -> Arc<Manager> {
    Arc::new(Manager::new(dir.join("config.json"), dir.to_path_buf(), capacity))
}

#[tokio::test]
async fn happy_reconnect_cycles_through_states() {
    let _guard = ENV_GUARD.lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let script = write_fake_ssh(dir.path(), "sleep 0.5\nexit 0\n");
    unsafe {
        std::env::set_var("SSH_PROGRAM", &script);
    }

    let manager = test_manager(dir.path(), 4);
    manager.add(sample_spec("web-dev", TunnelType::Forward, 1)).unwrap();
    manager.start("web-dev").unwrap();

    tokio::time::sleep(Duration::from_secs(3)).await;

    let snap = manager
        .snapshot()
        .into_iter()
        .find(|t| t.spec.name == "web-dev")
        .unwrap();
    assert!(snap.restart_count >= 2, "restart_count={}", snap.restart_count);

    manager.stop("web-dev").await.unwrap();
    unsafe {
        std::env::remove_var("SSH_PROGRAM");
    }
}

#[tokio::test]
async fn reset_leaves_restart_count_at_one_the_instant_it_returns() {
    let _guard = ENV_GUARD.lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let script = write_fake_ssh(dir.path(), "sleep 5\n");
    unsafe {
        std::env::set_var("SSH_PROGRAM", &script);
    }

    let manager = test_manager(dir.path(), 4);
    manager.add(sample_spec("web-dev", TunnelType::Forward, 5)).unwrap();
    manager.start("web-dev").unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    manager.reset("web-dev").await.unwrap();

    // No sleep here: reset() must not return until the fresh worker's first
    // begin_attempt has actually run, so this read can't race it.
    let snap = manager
        .snapshot()
        .into_iter()
        .find(|t| t.spec.name == "web-dev")
        .unwrap();
    assert_eq!(snap.restart_count, 1, "restart_count={}", snap.restart_count);

    manager.stop("web-dev").await.unwrap();
    unsafe {
        std::env::remove_var("SSH_PROGRAM");
    }
}

#[tokio::test]
async fn auth_classification_from_output() {
    let _guard = ENV_GUARD.lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let script = write_fake_ssh(
        dir.path(),
        "echo 'Permission denied (publickey).' >&2\nexit 255\n",
    );
    unsafe {
        std::env::set_var("SSH_PROGRAM", &script);
    }

    let manager = test_manager(dir.path(), 4);
    manager.add(sample_spec("db-auth", TunnelType::Forward, 1)).unwrap();
    manager.start("db-auth").unwrap();

    tokio::time::sleep(Duration::from_millis(800)).await;

    let snap = manager
        .snapshot()
        .into_iter()
        .find(|t| t.spec.name == "db-auth")
        .unwrap();
    assert_eq!(snap.status, TunnelStatus::AuthError);
    let count_after_first = snap.restart_count;

    tokio::time::sleep(Duration::from_secs(2)).await;
    let snap2 = manager
        .snapshot()
        .into_iter()
        .find(|t| t.spec.name == "db-auth")
        .unwrap();
    assert!(snap2.restart_count > count_after_first);

    manager.stop("db-auth").await.unwrap();
    unsafe {
        std::env::remove_var("SSH_PROGRAM");
    }
}

#[tokio::test]
async fn port_conflict_reverse_classification() {
    let _guard = ENV_GUARD.lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let script = write_fake_ssh(
        dir.path(),
        "echo 'Warning: remote port forwarding failed for listen port 6983' >&2\nsleep 10\n",
    );
    unsafe {
        std::env::set_var("SSH_PROGRAM", &script);
    }

    let manager = test_manager(dir.path(), 4);
    manager
        .add(sample_spec("reverse-api", TunnelType::Reverse, 1))
        .unwrap();
    manager.start("reverse-api").unwrap();

    tokio::time::sleep(Duration::from_secs(6)).await;

    let snap = manager
        .snapshot()
        .into_iter()
        .find(|t| t.spec.name == "reverse-api")
        .unwrap();
    assert_eq!(snap.status, TunnelStatus::PortError);

    manager.stop("reverse-api").await.unwrap();
    unsafe {
        std::env::remove_var("SSH_PROGRAM");
    }
}

#[tokio::test]
async fn duplicate_add_rejected_and_disk_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let manager = test_manager(dir.path(), 4);
    manager.add(sample_spec("db-prod", TunnelType::Forward, 5)).unwrap();

    let config_path = dir.path().join("config.json");
    let before = std::fs::read_to_string(&config_path).unwrap();

    let err = manager
        .add(sample_spec("db-prod", TunnelType::Forward, 5))
        .unwrap_err();
    assert!(err.to_string().contains("already exists"));

    assert_eq!(manager.list_names().len(), 1);
    let after = std::fs::read_to_string(&config_path).unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn graceful_shutdown_stops_all_workers() {
    let _guard = ENV_GUARD.lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    // Writes a keepalive line every 100ms, like real ssh's server-alive
    // traffic, so that closing the captured pipe (not an active kill) makes
    // the next write fail with EPIPE/SIGPIPE and the process exit promptly.
    let script = write_fake_ssh(
        dir.path(),
        "i=0\nwhile [ $i -lt 300 ]; do echo keepalive; sleep 0.1; i=$((i+1)); done\n",
    );
    unsafe {
        std::env::set_var("SSH_PROGRAM", &script);
    }

    let manager = test_manager(dir.path(), 4);
    manager.add(sample_spec("web-a", TunnelType::Forward, 1)).unwrap();
    manager.add(sample_spec("web-b", TunnelType::Forward, 1)).unwrap();
    manager.start_all();

    tokio::time::sleep(Duration::from_millis(700)).await;

    manager.shutdown().await;

    for snap in manager.snapshot() {
        assert_eq!(snap.status, TunnelStatus::Stopped);
        assert!(!snap.has_worker);
    }
    assert!(!manager.is_running());

    unsafe {
        std::env::remove_var("SSH_PROGRAM");
    }
}

#[tokio::test]
async fn stop_single_tunnel_others_unaffected() {
    let _guard = ENV_GUARD.lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    // Writes a keepalive line every 100ms, like real ssh's server-alive
    // traffic, so that closing the captured pipe (not an active kill) makes
    // the next write fail with EPIPE/SIGPIPE and the process exit promptly.
    let script = write_fake_ssh(
        dir.path(),
        "i=0\nwhile [ $i -lt 300 ]; do echo keepalive; sleep 0.1; i=$((i+1)); done\n",
    );
    unsafe {
        std::env::set_var("SSH_PROGRAM", &script);
    }

    let manager = test_manager(dir.path(), 4);
    manager.add(sample_spec("web-dev", TunnelType::Forward, 1)).unwrap();
    manager.add(sample_spec("db-prod", TunnelType::Forward, 1)).unwrap();
    manager.add(sample_spec("cache-1", TunnelType::Forward, 1)).unwrap();
    manager.start_all();

    tokio::time::sleep(Duration::from_millis(700)).await;

    manager.stop("web-dev").await.unwrap();

    let snaps: std::collections::HashMap<_, _> = manager
        .snapshot()
        .into_iter()
        .map(|t| (t.spec.name.clone(), t))
        .collect();

    assert_eq!(snaps["web-dev"].status, TunnelStatus::Stopped);
    assert!(!snaps["web-dev"].has_worker);
    assert!(snaps["db-prod"].has_worker);
    assert!(snaps["cache-1"].has_worker);

    manager.stop_all().await;
    unsafe {
        std::env::remove_var("SSH_PROGRAM");
    }
}
