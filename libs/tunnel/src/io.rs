//! Readiness multiplexing and error triage for the packet pump.

use std::io;
use std::task::{Context, Poll};

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tun::Tun;

use crate::crypto::ZERO_BYTES;

/// The two fixed packet buffers of the pump, allocated once at loop entry.
///
/// Layout invariant shared with the crypto envelope: bytes `[0, ZERO_BYTES)`
/// are the zeroed scratch prefix, plaintext occupies `[ZERO_BYTES, ..)` and
/// wire bytes occupy `[PACKET_OFFSET, ..)`. Allocation zeroes the prefix once;
/// nothing afterwards writes below `PACKET_OFFSET`.
pub(crate) struct PacketBuffers {
    pub(crate) tun: Vec<u8>,
    pub(crate) udp: Vec<u8>,
}

impl PacketBuffers {
    pub(crate) fn new(mtu: usize) -> Self {
        Self {
            tun: vec![0; mtu + ZERO_BYTES],
            udp: vec![0; mtu + ZERO_BYTES],
        }
    }
}

/// All I/O sources the event loop suspends on.
pub(crate) struct Io {
    pub(crate) device: Box<dyn Tun>,
    pub(crate) socket: UdpSocket,
    /// The wake-up channel the stop path uses to unblock us.
    pub(crate) control: mpsc::Receiver<()>,
}

/// The sources that were ready during a single loop tick.
pub(crate) struct Input {
    pub(crate) stop: bool,
    /// One IP packet was read from the TUN device (or reading failed).
    pub(crate) device: Option<io::Result<usize>>,
    /// The UDP socket is ready to receive (or polling it failed).
    pub(crate) network: Option<io::Result<()>>,
}

impl Io {
    /// Polls all sources, control channel first.
    ///
    /// A TUN read lands directly in `tun_buf`; the UDP socket only reports
    /// readiness here so the datagram is received after any pending outbound
    /// packet has left the UDP buffer.
    pub(crate) fn poll(&mut self, cx: &mut Context<'_>, tun_buf: &mut [u8]) -> Poll<Input> {
        // A closed channel means every handle is gone and nothing could ever
        // stop us; treat it like a stop request.
        if self.control.poll_recv(cx).is_ready() {
            return Poll::Ready(Input {
                stop: true,
                device: None,
                network: None,
            });
        }

        let device = match self.device.poll_read(cx, tun_buf) {
            Poll::Ready(result) => Some(result),
            Poll::Pending => None,
        };

        let network = match self.socket.poll_recv_ready(cx) {
            Poll::Ready(result) => Some(result),
            Poll::Pending => None,
        };

        if device.is_none() && network.is_none() {
            return Poll::Pending;
        }

        Poll::Ready(Input {
            stop: false,
            device,
            network,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    TunRead,
    TunWrite,
    UdpSend,
    UdpRecv,
}

impl Op {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Op::TunRead => "read from tun",
            Op::TunWrite => "write to tun",
            Op::UdpSend => "sendto",
            Op::UdpRecv => "recvfrom",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// Spurious wake-up; move on silently.
    Skip,
    /// Transient or per-packet failure; log and keep the tunnel up.
    LogSkip,
    /// Unrecoverable; the loop must exit.
    Fatal,
}

/// The error-triage table of the pump.
///
/// Benign, transient and permission errors never tear down the tunnel; only
/// unrecoverable resource errors exit the loop.
pub(crate) fn classify(op: Op, err: &io::Error) -> Disposition {
    use io::ErrorKind;

    match err.kind() {
        ErrorKind::WouldBlock => return Disposition::Skip,
        ErrorKind::Interrupted | ErrorKind::PermissionDenied => return Disposition::LogSkip,
        ErrorKind::NetworkDown | ErrorKind::NetworkUnreachable
            if matches!(op, Op::UdpSend | Op::UdpRecv) =>
        {
            return Disposition::LogSkip;
        }
        ErrorKind::InvalidInput if op == Op::TunWrite => return Disposition::LogSkip,
        _ => {}
    }

    #[cfg(unix)]
    if op == Op::UdpSend && err.raw_os_error() == Some(libc::EMSGSIZE) {
        return Disposition::LogSkip;
    }

    Disposition::Fatal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn errno(code: i32) -> io::Error {
        io::Error::from_raw_os_error(code)
    }

    #[test]
    fn spurious_wakeups_are_skipped_on_every_op() {
        for op in [Op::TunRead, Op::TunWrite, Op::UdpSend, Op::UdpRecv] {
            let err = io::Error::from(io::ErrorKind::WouldBlock);
            assert_eq!(classify(op, &err), Disposition::Skip);
        }
    }

    #[cfg(unix)]
    #[test]
    fn interrupted_and_denied_are_logged_but_survivable() {
        for op in [Op::TunRead, Op::TunWrite, Op::UdpSend, Op::UdpRecv] {
            assert_eq!(classify(op, &errno(libc::EINTR)), Disposition::LogSkip);
            assert_eq!(classify(op, &errno(libc::EPERM)), Disposition::LogSkip);
        }
    }

    #[cfg(unix)]
    #[test]
    fn link_outages_only_excuse_socket_ops() {
        for code in [libc::ENETUNREACH, libc::ENETDOWN] {
            assert_eq!(classify(Op::UdpSend, &errno(code)), Disposition::LogSkip);
            assert_eq!(classify(Op::UdpRecv, &errno(code)), Disposition::LogSkip);
            assert_eq!(classify(Op::TunRead, &errno(code)), Disposition::Fatal);
        }
    }

    #[cfg(unix)]
    #[test]
    fn oversized_datagrams_are_per_packet_failures() {
        assert_eq!(classify(Op::UdpSend, &errno(libc::EMSGSIZE)), Disposition::LogSkip);
        assert_eq!(classify(Op::UdpRecv, &errno(libc::EMSGSIZE)), Disposition::Fatal);
    }

    #[cfg(unix)]
    #[test]
    fn invalid_writes_do_not_kill_the_tunnel() {
        assert_eq!(classify(Op::TunWrite, &errno(libc::EINVAL)), Disposition::LogSkip);
        assert_eq!(classify(Op::TunRead, &errno(libc::EINVAL)), Disposition::Fatal);
    }

    #[cfg(unix)]
    #[test]
    fn resource_errors_are_fatal() {
        assert_eq!(classify(Op::TunRead, &errno(libc::EBADF)), Disposition::Fatal);
        assert_eq!(classify(Op::UdpRecv, &errno(libc::EBADF)), Disposition::Fatal);
        assert_eq!(classify(Op::UdpSend, &errno(libc::ECONNREFUSED)), Disposition::Fatal);
    }

    #[test]
    fn buffers_carry_the_zeroed_scratch_prefix() {
        let buffers = PacketBuffers::new(1440);

        assert_eq!(buffers.tun.len(), 1440 + ZERO_BYTES);
        assert_eq!(buffers.udp.len(), 1440 + ZERO_BYTES);
        assert!(buffers.tun[..ZERO_BYTES].iter().all(|b| *b == 0));
        assert!(buffers.udp[..ZERO_BYTES].iter().all(|b| *b == 0));
    }
}
