//! Shared plumbing for the Unix TUN implementations.

use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::task::{Context, Poll, ready};

use libc::{F_GETFL, F_SETFL, O_NONBLOCK, fcntl};
use tokio::io::Ready;
use tokio::io::unix::AsyncFd;

use crate::Tun;

/// A raw TUN file descriptor together with its per-OS read/write quirks.
pub(crate) trait PacketFd: AsRawFd + Send + 'static {
    fn read(&self, dst: &mut [u8]) -> io::Result<usize>;
    fn write(&self, src: &[u8]) -> io::Result<usize>;
}

/// The reactor-registered device handed to the event loop.
pub(crate) struct Device<F: AsRawFd> {
    fd: AsyncFd<F>,
    name: String,
}

impl<F: PacketFd> Device<F> {
    pub(crate) fn new(fd: F, name: String) -> io::Result<Self> {
        Ok(Self {
            fd: AsyncFd::new(fd)?,
            name,
        })
    }
}

impl<F: PacketFd> Tun for Device<F> {
    fn poll_read(&mut self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>> {
        loop {
            let mut guard = ready!(self.fd.poll_read_ready(cx))?;

            match guard.get_inner().read(buf) {
                Ok(n) => return Poll::Ready(Ok(n)),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    // A read has blocked, but a write might still succeed.
                    // Clear only the read readiness.
                    guard.clear_ready_matching(Ready::READABLE);
                    continue;
                }
                Err(e) => return Poll::Ready(Err(e)),
            }
        }
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.fd.get_ref().write(buf)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

pub(crate) fn set_non_blocking(fd: RawFd) -> io::Result<()> {
    match unsafe { fcntl(fd, F_GETFL) } {
        -1 => Err(io::Error::last_os_error()),
        flags => match unsafe { fcntl(fd, F_SETFL, flags | O_NONBLOCK) } {
            -1 => Err(io::Error::last_os_error()),
            _ => Ok(()),
        },
    }
}
