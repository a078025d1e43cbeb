//! User-supplied up/down shell hooks.
//!
//! Scripts run synchronously around the tunnel's lifetime with the tunnel
//! parameters exported in the environment. A failing or missing script is
//! logged and never fatal to the tunnel.

use std::path::Path;
use std::process::Command;

use crate::config::Config;

pub(crate) fn run_up(config: &Config) {
    run(config.up_script.as_deref(), config);
}

pub(crate) fn run_down(config: &Config) {
    run(config.down_script.as_deref(), config);
}

fn run(script: Option<&Path>, config: &Config) {
    let Some(script) = script else {
        return;
    };

    let mut command = shell();
    command
        .arg(script)
        .env("intf", &config.ifname)
        .env("mtu", config.mtu.to_string())
        .env("server", &config.server)
        .env("port", config.port.to_string())
        .env("tun_local_ip", config.tun_local_ip.to_string())
        .env("tun_remote_ip", config.tun_remote_ip.to_string())
        .env("tun_netmask", config.tun_netmask.to_string());

    match command.status() {
        Ok(status) if status.success() => {
            tracing::debug!(script = %script.display(), "Script finished");
        }
        Ok(status) => {
            tracing::warn!(script = %script.display(), %status, "Script failed");
        }
        Err(e) => {
            tracing::warn!(script = %script.display(), "Failed to run script: {e}");
        }
    }
}

#[cfg(unix)]
fn shell() -> Command {
    let mut command = Command::new("sh");
    command.arg("-c");
    command
}

#[cfg(windows)]
fn shell() -> Command {
    let mut command = Command::new("cmd");
    command.arg("/C");
    command
}
