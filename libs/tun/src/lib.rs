//! Layer-3 virtual network interfaces, one implementation per OS family.
//!
//! The event loop only ever sees the [`Tun`] trait: whole IP packets in, whole
//! IP packets out. Per-OS quirks (the utun address-family word, the wintun ring
//! buffer) are internal to the respective implementation.

use std::io;
use std::task::{Context, Poll};

#[cfg(target_os = "linux")]
#[path = "linux.rs"]
mod platform;

#[cfg(target_os = "macos")]
#[path = "darwin.rs"]
mod platform;

#[cfg(target_os = "freebsd")]
#[path = "freebsd.rs"]
mod platform;

#[cfg(target_os = "windows")]
#[path = "windows.rs"]
mod platform;

#[cfg(target_family = "unix")]
mod unix;

pub trait Tun: Send + 'static {
    /// Read exactly one IP packet into `buf`, returning its length.
    ///
    /// Packets are never concatenated; each call yields one packet or fails.
    fn poll_read(&mut self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>>;

    /// Write exactly one IP packet.
    ///
    /// Write is synchronous because the device is non-blocking and some
    /// lossiness is acceptable; we never suspend the loop on an outbound
    /// packet.
    fn write(&self, buf: &[u8]) -> io::Result<usize>;

    /// The name of the TUN device.
    fn name(&self) -> &str;
}

/// Provisions the TUN device `name` and returns a handle usable with the event loop.
///
/// Must be called within a tokio runtime context so the device can be
/// registered with the reactor.
pub fn create(name: &str) -> io::Result<Box<dyn Tun>> {
    platform::create(name)
}
