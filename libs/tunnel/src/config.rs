use std::net::Ipv4Addr;
use std::path::PathBuf;

use secrecy::SecretString;

/// Which end of the tunnel we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Dial a fixed remote address; the peer never changes.
    Client,
    /// Bind a local address; the peer is learned from the most recent
    /// authenticated datagram.
    Server,
}

/// Tunnel configuration, read-only after startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    /// Name of the TUN device.
    pub ifname: String,
    /// Peer host (client) or bind address (server).
    pub server: String,
    pub port: u16,
    /// The shared password both ends derive the AEAD key from.
    pub password: SecretString,
    /// Maximum plaintext IP packet size.
    pub mtu: u16,
    pub tun_local_ip: Ipv4Addr,
    pub tun_remote_ip: Ipv4Addr,
    pub tun_netmask: Ipv4Addr,
    /// Optional scripts run right after the interface comes up / right before
    /// it goes down.
    pub up_script: Option<PathBuf>,
    pub down_script: Option<PathBuf>,
}
