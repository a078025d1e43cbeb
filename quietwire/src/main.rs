//! A minimalist user-space VPN: one encrypted UDP flow, one TUN device.

#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Parser;
use secrecy::SecretString;
use tunnel::{Config, Mode, Tunnel};

#[cfg(unix)]
mod daemon;
mod signals;

/// Command-line args for the quietwire binary.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Where the daemonized process records its PID.
    #[arg(
        long,
        env = "QUIETWIRE_PID_FILE",
        default_value = "/var/run/quietwire.pid"
    )]
    pid_file: PathBuf,

    /// Where the daemonized process writes its logs.
    #[arg(
        long,
        env = "QUIETWIRE_LOG_FILE",
        default_value = "/var/log/quietwire.log"
    )]
    log_file: PathBuf,

    /// Stay in the foreground and log to stdout.
    #[arg(long, default_value_t = false)]
    foreground: bool,
}

#[derive(clap::Subcommand)]
enum Cmd {
    /// Bring the tunnel up.
    Start(TunnelArgs),
    /// Stop a daemonized tunnel.
    Stop,
    /// Stop the running tunnel, then start again.
    Restart(TunnelArgs),
}

#[derive(clap::Args)]
struct TunnelArgs {
    /// Which end of the tunnel this process is.
    #[arg(long, env = "QUIETWIRE_MODE", value_enum)]
    mode: Role,

    /// Name of the TUN device.
    #[arg(long, env = "QUIETWIRE_INTF", default_value = "tun-quietwire")]
    intf: String,

    /// Peer host (client) or bind address (server).
    #[arg(long, env = "QUIETWIRE_SERVER")]
    server: String,

    /// UDP port to dial or bind.
    #[arg(long, env = "QUIETWIRE_PORT", default_value_t = 1123)]
    port: u16,

    /// Shared password; prefer the environment variable so it stays out of `ps`.
    #[arg(long, env = "QUIETWIRE_PASSWORD", hide_env_values = true)]
    password: String,

    /// Maximum plaintext IP packet size.
    #[arg(long, env = "QUIETWIRE_MTU", default_value_t = 1440)]
    mtu: u16,

    /// Address assigned to our side of the TUN device.
    #[arg(long, env = "QUIETWIRE_TUN_LOCAL_IP", default_value_t = Ipv4Addr::new(10, 7, 0, 1))]
    tun_local_ip: Ipv4Addr,

    /// Address of the other side of the TUN device.
    #[arg(long, env = "QUIETWIRE_TUN_REMOTE_IP", default_value_t = Ipv4Addr::new(10, 7, 0, 2))]
    tun_remote_ip: Ipv4Addr,

    #[arg(long, env = "QUIETWIRE_TUN_NETMASK", default_value_t = Ipv4Addr::new(255, 255, 255, 0))]
    tun_netmask: Ipv4Addr,

    /// Script to run once the interface is up.
    #[arg(long, env = "QUIETWIRE_UP_SCRIPT")]
    up_script: Option<PathBuf>,

    /// Script to run right before the interface goes down.
    #[arg(long, env = "QUIETWIRE_DOWN_SCRIPT")]
    down_script: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Role {
    Client,
    Server,
}

impl From<Role> for Mode {
    fn from(role: Role) -> Self {
        match role {
            Role::Client => Mode::Client,
            Role::Server => Mode::Server,
        }
    }
}

impl TunnelArgs {
    fn into_config(self) -> Config {
        Config {
            mode: self.mode.into(),
            ifname: self.intf,
            server: self.server,
            port: self.port,
            password: SecretString::from(self.password),
            mtu: self.mtu,
            tun_local_ip: self.tun_local_ip,
            tun_remote_ip: self.tun_remote_ip,
            tun_netmask: self.tun_netmask,
            up_script: self.up_script,
            down_script: self.down_script,
        }
    }
}

#[expect(
    clippy::print_stderr,
    reason = "No logger is active when we are printing this error."
)]
fn main() {
    match try_main() {
        Ok(()) => {}
        Err(e) => {
            // Print chain of errors manually to avoid it looking like a crash with stacktrace.
            eprintln!("{e:#}");

            std::process::exit(1);
        }
    }
}

fn try_main() -> Result<()> {
    let Cli {
        command,
        pid_file,
        log_file,
        foreground,
    } = Cli::parse();

    match command {
        Cmd::Stop => stop(&pid_file),
        Cmd::Start(args) => start(args.into_config(), &pid_file, &log_file, foreground),
        Cmd::Restart(args) => {
            stop_if_running(&pid_file)?;
            start(args.into_config(), &pid_file, &log_file, foreground)
        }
    }
}

#[cfg(unix)]
fn stop(pid_file: &std::path::Path) -> Result<()> {
    daemon::stop(pid_file)
}

#[cfg(not(unix))]
fn stop(_pid_file: &std::path::Path) -> Result<()> {
    anyhow::bail!("stopping a daemonized tunnel is not supported on this platform")
}

#[cfg(unix)]
fn stop_if_running(pid_file: &std::path::Path) -> Result<()> {
    daemon::stop_if_running(pid_file)
}

#[cfg(not(unix))]
fn stop_if_running(_pid_file: &std::path::Path) -> Result<()> {
    Ok(())
}

fn start(
    config: Config,
    pid_file: &std::path::Path,
    log_file: &std::path::Path,
    foreground: bool,
) -> Result<()> {
    #[cfg(unix)]
    if !foreground {
        daemon::daemonize(pid_file)?;
    }

    #[cfg(not(unix))]
    {
        let _ = pid_file;
        anyhow::ensure!(
            foreground,
            "daemonizing is not supported on this platform; pass --foreground"
        );
    }

    let (layer, _guard) = if foreground {
        (None, None)
    } else {
        let (layer, guard) = logging::file::layer(log_file)?;
        (Some(layer), Some(guard))
    };
    logging::setup_global_subscriber(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        layer,
    )
    .context("Failed to set up logging")?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("quietwire")
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    let result = rt.block_on(async {
        let device = tun::create(&config.ifname)
            .with_context(|| format!("Failed to create TUN device `{}`", config.ifname))?;
        let (tunnel, handle) = Tunnel::new(config, device).await?;

        let mut terminate = signals::Terminate::new()?;
        tokio::spawn({
            let handle = handle.clone();

            async move {
                terminate.recv().await;
                tracing::info!("Caught SIGINT / SIGTERM / Ctrl+C");
                handle.stop();
            }
        });

        tunnel.run().await?;

        anyhow::Ok(())
    });

    if let Err(e) = &result {
        tracing::error!("{e:#}");
    }

    rt.shutdown_timeout(Duration::from_secs(1));

    #[cfg(unix)]
    if !foreground {
        daemon::remove_pid_file(pid_file);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    // Can't remember how Clap works sometimes
    // Also these are examples
    #[test]
    fn start_with_the_minimum_of_flags() {
        let cli = Cli::try_parse_from([
            "quietwire",
            "start",
            "--mode",
            "client",
            "--server",
            "vpn.example.com",
            "--password",
            "hunter2",
        ])
        .unwrap();

        let Cmd::Start(args) = cli.command else {
            panic!("Expected Start command");
        };
        assert_eq!(args.server, "vpn.example.com");
        assert_eq!(args.port, 1123);
        assert_eq!(args.mtu, 1440);
        assert_eq!(args.intf, "tun-quietwire");
        assert!(matches!(args.mode, Role::Client));
    }

    #[test]
    fn start_requires_a_password() {
        // (Unless QUIETWIRE_PASSWORD leaks in from the environment.)
        if std::env::var("QUIETWIRE_PASSWORD").is_ok() {
            return;
        }

        let result = Cli::try_parse_from([
            "quietwire",
            "start",
            "--mode",
            "server",
            "--server",
            "0.0.0.0",
        ]);

        assert!(result.is_err());
    }

    #[test]
    fn stop_needs_no_tunnel_flags() {
        let cli = Cli::try_parse_from(["quietwire", "stop"]).unwrap();

        assert!(matches!(cli.command, Cmd::Stop));
        assert_eq!(cli.pid_file, PathBuf::from("/var/run/quietwire.pid"));
    }

    #[test]
    fn restart_takes_the_same_flags_as_start() {
        let cli = Cli::try_parse_from([
            "quietwire",
            "restart",
            "--mode",
            "server",
            "--server",
            "0.0.0.0",
            "--port",
            "8964",
            "--password",
            "hunter2",
            "--mtu",
            "1400",
        ])
        .unwrap();

        let Cmd::Restart(args) = cli.command else {
            panic!("Expected Restart command");
        };
        assert_eq!(args.port, 8964);
        assert_eq!(args.mtu, 1400);
        assert!(matches!(args.mode, Role::Server));
    }

    #[test]
    fn foreground_and_paths_are_global() {
        let cli = Cli::try_parse_from([
            "quietwire",
            "--foreground",
            "--pid-file",
            "/tmp/qw.pid",
            "--log-file",
            "/tmp/qw.log",
            "stop",
        ])
        .unwrap();

        assert!(cli.foreground);
        assert_eq!(cli.pid_file, PathBuf::from("/tmp/qw.pid"));
        assert_eq!(cli.log_file, PathBuf::from("/tmp/qw.log"));
    }

    #[test]
    fn tunnel_args_become_a_config() {
        let cli = Cli::try_parse_from([
            "quietwire",
            "start",
            "--mode",
            "client",
            "--server",
            "192.0.2.10",
            "--password",
            "hunter2",
            "--tun-local-ip",
            "10.9.0.2",
        ])
        .unwrap();

        let Cmd::Start(args) = cli.command else {
            panic!("Expected Start command");
        };
        let config = args.into_config();

        assert_eq!(config.mode, Mode::Client);
        assert_eq!(config.tun_local_ip, Ipv4Addr::new(10, 9, 0, 2));
        assert_eq!(config.tun_remote_ip, Ipv4Addr::new(10, 7, 0, 2));
    }
}
