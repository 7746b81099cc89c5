//! Command interpreter (spec.md section 4.5): a line-oriented REPL that
//! reads one line at a time from standard input and dispatches it to the
//! manager. Never touches tunnel state directly, and never holds the
//! manager lock across a blocking stdin read.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::warn;

use crate::manager::Manager;
use crate::ssh;
use crate::tunnel::{TunnelSpec, TunnelType};

const HELP_TEXT: &str = "\
Commands:
  status, (empty)        clear screen and render the tunnel table
  start [<name>]          start every tunnel, or just <name>
  stop [<name>]           stop every tunnel, or just <name>
  reset <name>            stop-then-start <name>, zeroing its restart counter
  add                     interactively add a new tunnel
  remove <name>           stop and drop <name>, persisting the removal
  test [<name>]           probe a loopback TCP connect to the local side
  debug [<name>]          print the exact ssh command line that would run
  diagnose                report on logs dir, config file, and key files
  watch                   render status every 2s until interrupted
  help                    print this catalogue
  quit, exit              clean shutdown";

pub struct Repl {
    manager: Arc<Manager>,
    config_path: PathBuf,
    lines: Lines<BufReader<Stdin>>,
}

impl Repl {
    pub fn new(manager: Arc<Manager>, config_path: PathBuf) -> Self {
        let lines = BufReader::new(tokio::io::stdin()).lines();
        Self {
            manager,
            config_path,
            lines,
        }
    }

    /// Run the REPL until `quit`/`exit` or EOF on stdin.
    pub async fn run(&mut self) {
        println!("{HELP_TEXT}");

        loop {
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break, // EOF
                Err(e) => {
                    warn!("error reading stdin: {}", e);
                    break;
                }
            };

            let trimmed = line.trim_start().to_string();
            if !self.dispatch(&trimmed).await {
                break;
            }
        }
    }

    /// Returns false when the REPL should stop (quit/exit/EOF).
    async fn dispatch(&mut self, line: &str) -> bool {
        let (cmd, rest) = match line.split_once(char::is_whitespace) {
            Some((c, r)) => (c, r.trim_start().to_string()),
            None => (line, String::new()),
        };

        match cmd {
            "" | "status" => self.cmd_status(),
            "start" => self.cmd_start(&rest),
            "stop" => self.cmd_stop(&rest).await,
            "reset" => self.cmd_reset(&rest).await,
            "add" => self.cmd_add().await,
            "remove" => self.cmd_remove(&rest).await,
            "test" => self.cmd_test(&rest).await,
            "debug" => self.cmd_debug(&rest),
            "diagnose" => self.cmd_diagnose(),
            "watch" => self.cmd_watch().await,
            "help" => println!("{HELP_TEXT}"),
            "quit" | "exit" => {
                println!("shutting down...");
                self.manager.shutdown().await;
                return false;
            }
            other => println!("unknown command: {other}. Type 'help' for the command catalogue."),
        }
        true
    }

    fn cmd_status(&self) {
        crate::status::print_status(&self.manager.snapshot());
    }

    fn cmd_start(&self, name: &str) {
        if name.is_empty() {
            self.manager.start_all();
            println!("started all tunnels");
            return;
        }
        match self.manager.start(name) {
            Ok(()) => println!("started {name}"),
            Err(e) => println!("error: {e}"),
        }
    }

    async fn cmd_stop(&self, name: &str) {
        if name.is_empty() {
            self.manager.stop_all().await;
            println!("stopped all tunnels");
            return;
        }
        match self.manager.stop(name).await {
            Ok(()) => println!("stopped {name}"),
            Err(e) => println!("error: {e}"),
        }
    }

    async fn cmd_reset(&self, name: &str) {
        if name.is_empty() {
            println!("usage: reset <name>");
            return;
        }
        match self.manager.reset(name).await {
            Ok(()) => println!("reset {name}"),
            Err(e) => println!("error: {e}"),
        }
    }

    async fn cmd_remove(&self, name: &str) {
        if name.is_empty() {
            println!("usage: remove <name>");
            return;
        }
        match self.manager.remove(name).await {
            Ok(()) => println!("removed {name}"),
            Err(e) => println!("error: {e}"),
        }
    }

    async fn cmd_test(&self, name: &str) {
        let names = if name.is_empty() {
            self.manager.list_names()
        } else {
            vec![name.to_string()]
        };
        for name in names {
            match self.manager.tunnel_spec(&name) {
                Some(spec) => {
                    let ok = ssh::probe_local_port(spec.local_port).await;
                    println!(
                        "{name}: {} (127.0.0.1:{})",
                        if ok { "reachable" } else { "unreachable" },
                        spec.local_port
                    );
                    if spec.tunnel_type == TunnelType::Reverse {
                        println!(
                            "  note: reverse tunnel probe only checks the local service side; \
                             the remote listener cannot be probed from here"
                        );
                    }
                }
                None => println!("error: no such tunnel: {name}"),
            }
        }
    }

    fn cmd_debug(&self, name: &str) {
        let names = if name.is_empty() {
            self.manager.list_names()
        } else {
            vec![name.to_string()]
        };
        for name in names {
            match self.manager.tunnel_spec(&name) {
                Some(spec) => println!("{name}: {}", ssh::command_line(&spec)),
                None => println!("error: no such tunnel: {name}"),
            }
        }
    }

    fn cmd_diagnose(&self) {
        let log_dir = self.manager.log_dir();
        println!(
            "logs directory: {} ({})",
            log_dir.display(),
            if log_dir.is_dir() { "present" } else { "missing" }
        );
        println!(
            "config file: {} ({})",
            self.config_path.display(),
            if self.config_path.is_file() { "present" } else { "missing" }
        );

        for name in self.manager.list_names() {
            let Some(spec) = self.manager.tunnel_spec(&name) else {
                continue;
            };
            match std::fs::metadata(&spec.ssh_key) {
                Ok(meta) => {
                    #[cfg(unix)]
                    {
                        use std::os::unix::fs::PermissionsExt;
                        let mode = meta.permissions().mode() & 0o777;
                        println!(
                            "{name}: ssh_key {} present, mode {:o}{}",
                            spec.ssh_key,
                            mode,
                            if mode > 0o600 { " (too open, expected 0600)" } else { "" }
                        );
                    }
                    #[cfg(not(unix))]
                    println!("{name}: ssh_key {} present", spec.ssh_key);
                }
                Err(_) => println!("{name}: ssh_key {} is missing", spec.ssh_key),
            }
            if spec.tunnel_type == TunnelType::Reverse {
                println!(
                    "{name}: reverse tunnel - the SSH server must have GatewayPorts or a \
                     matching bind address configured to expose remote_port {}",
                    spec.remote_port
                );
            }
        }
    }

    async fn cmd_watch(&self) {
        println!("watching status every 2s, Ctrl+C to stop watching (not the process)");
        loop {
            crate::status::print_status(&self.manager.snapshot());
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(2)) => {}
                _ = tokio::signal::ctrl_c() => break,
            }
        }
    }

    /// Interactive add-tunnel prompt sequence.
    async fn cmd_add(&mut self) {
        macro_rules! ask {
            ($prompt:expr) => {{
                println!($prompt);
                match self.lines.next_line().await {
                    Ok(Some(l)) => l.trim().to_string(),
                    _ => return,
                }
            }};
        }

        let name = ask!("name:");
        let user = ask!("user:");
        let host = ask!("host:");
        let port: u16 = match ask!("port [22]:").parse() {
            Ok(0) | Err(_) => 22,
            Ok(p) => p,
        };
        let ssh_key = ask!("ssh_key path:");
        let type_str = ask!("type [forward/reverse, default forward]:");
        let tunnel_type = if type_str.eq_ignore_ascii_case("reverse") {
            TunnelType::Reverse
        } else {
            TunnelType::Forward
        };
        let local_port: u16 = match ask!("local_port:").parse() {
            Ok(p) => p,
            Err(_) => {
                println!("error: local_port must be a number");
                return;
            }
        };
        let remote_host = ask!("remote_host:");
        let remote_port: u16 = match ask!("remote_port:").parse() {
            Ok(p) => p,
            Err(_) => {
                println!("error: remote_port must be a number");
                return;
            }
        };
        let delay_str = ask!("reconnect_delay [5]:");
        let reconnect_delay: u64 = if delay_str.is_empty() {
            5
        } else {
            delay_str.parse().unwrap_or(5)
        };

        let spec = TunnelSpec {
            name,
            user,
            host,
            port,
            ssh_key,
            tunnel_type,
            local_port,
            remote_host,
            remote_port,
            reconnect_delay,
        };

        match self.manager.add(spec) {
            Ok(()) => println!("added tunnel"),
            Err(e) => println!("error: {e}"),
        }
    }
}
