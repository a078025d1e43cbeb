//! The packet-forwarding core: one authenticated-and-encrypted UDP flow,
//! pumped packet-by-packet between a TUN device and the network.
//!
//! A [`Tunnel`] owns the whole datapath and runs it on a single task; the only
//! concurrent entrypoint is [`TunnelHandle::stop`], which wakes the loop
//! through a control channel rather than shared state.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod crypto;

mod config;
mod ifconfig;
mod io;
mod script;
mod sockets;

use std::future::poll_fn;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tun::Tun;

pub use config::{Config, Mode};
pub use crypto::{Envelope, OVERHEAD_LEN, PACKET_OFFSET, ZERO_BYTES};

use crypto::CryptoError;
use io::{Disposition, Input, Io, Op, PacketBuffers, classify};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to resolve `{host}:{port}`")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to create UDP socket")]
    Socket(#[source] std::io::Error),
    #[error("failed to bind `{addr}`")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("tunnel is already running")]
    AlreadyRunning,
    #[error("{op} failed")]
    Io {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to seal packet")]
    Seal,
}

/// One end of the tunnel: TUN device, UDP socket, peer slot and buffers.
pub struct Tunnel {
    config: Config,
    mtu: usize,
    envelope: Envelope,
    io: Io,
    /// Where sealed packets go. `None` until the server has learned its peer;
    /// fixed at init for the client.
    peer: Option<SocketAddr>,
    running: Arc<AtomicBool>,
}

/// Cloneable handle to stop a running [`Tunnel`] from another task, thread or
/// a signal handler.
#[derive(Clone)]
pub struct TunnelHandle {
    running: Arc<AtomicBool>,
    control: mpsc::Sender<()>,
}

impl TunnelHandle {
    /// Requests the tunnel to stop; the loop exits at the next multiplexer
    /// return. Calling this on a tunnel that is not running is a no-op.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            tracing::error!("Cannot stop, tunnel is not running");
            return;
        }

        tracing::info!("Shutting down by user");
        let _ = self.control.try_send(());
    }
}

impl Tunnel {
    /// Builds the tunnel: resolves the peer (client) or binds (server) and
    /// wires up the control channel.
    ///
    /// The TUN device is provisioned by the caller and injected; everything
    /// allocated here is reclaimed through `Drop` if a later step fails.
    pub async fn new(config: Config, device: Box<dyn Tun>) -> Result<(Self, TunnelHandle)> {
        let (control_tx, control_rx) = mpsc::channel(1);
        let (socket, peer) = sockets::open(config.mode, &config.server, config.port).await?;
        let running = Arc::new(AtomicBool::new(false));

        let handle = TunnelHandle {
            running: Arc::clone(&running),
            control: control_tx,
        };

        let tunnel = Self {
            mtu: usize::from(config.mtu),
            envelope: Envelope::new(&config.password),
            io: Io {
                device,
                socket,
                control: control_rx,
            },
            peer,
            running,
            config,
        };

        Ok((tunnel, handle))
    }

    /// The local address of the UDP socket (unspecified for clients until the
    /// first packet leaves).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.io.socket.local_addr()
    }

    /// Brings the interface up, runs the pump until a stop request or a fatal
    /// error, then tears everything down again.
    ///
    /// Consumes the tunnel; the TUN and UDP handles are closed on return.
    pub async fn run(mut self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyRunning);
        }

        if let Err(e) = ifconfig::up(&self.config).await {
            tracing::warn!("Failed to configure `{}`: {e:#}", self.config.ifname);
        }
        script::run_up(&self.config);

        let mut buffers = PacketBuffers::new(self.mtu);

        tracing::info!("VPN started");

        let result = self.pump(&mut buffers).await;

        drop(buffers);
        script::run_down(&self.config);
        if let Err(e) = ifconfig::down(&self.config).await {
            tracing::debug!("Failed to deconfigure `{}`: {e:#}", self.config.ifname);
        }
        self.running.store(false, Ordering::SeqCst);

        result
    }

    async fn pump(&mut self, buffers: &mut PacketBuffers) -> Result<()> {
        while self.running.load(Ordering::SeqCst) {
            let input = {
                let io = &mut self.io;
                let tun_region = &mut buffers.tun[ZERO_BYTES..ZERO_BYTES + self.mtu];

                poll_fn(|cx| io.poll(cx, tun_region)).await
            };

            let Input {
                stop,
                device,
                network,
            } = input;

            if stop {
                break;
            }

            // Outbound first: the UDP buffer must be free before the next
            // datagram is received into it.
            if let Some(result) = device {
                self.forward_outbound(result, buffers)?;
            }
            if let Some(result) = network {
                self.forward_inbound(result, buffers)?;
            }
        }

        Ok(())
    }

    /// TUN → seal → UDP.
    fn forward_outbound(
        &mut self,
        read: std::io::Result<usize>,
        buffers: &mut PacketBuffers,
    ) -> Result<()> {
        let n = match read {
            Ok(n) => n,
            Err(e) => return self.dispose(Op::TunRead, e),
        };

        // Nowhere to send to yet.
        let Some(peer) = self.peer else {
            return Ok(());
        };

        self.envelope
            .seal(&mut buffers.udp, &buffers.tun, n)
            .map_err(|_| Error::Seal)?;
        let wire = &buffers.udp[PACKET_OFFSET..PACKET_OFFSET + OVERHEAD_LEN + n];

        match self.io.socket.try_send_to(wire, peer) {
            Ok(_) => Ok(()),
            Err(e) => self.dispose(Op::UdpSend, e),
        }
    }

    /// UDP → open → TUN, learning the peer on the server side.
    fn forward_inbound(
        &mut self,
        ready: std::io::Result<()>,
        buffers: &mut PacketBuffers,
    ) -> Result<()> {
        if let Err(e) = ready {
            return self.dispose(Op::UdpRecv, e);
        }

        let recv_region = &mut buffers.udp[PACKET_OFFSET..PACKET_OFFSET + OVERHEAD_LEN + self.mtu];
        let (n, from) = match self.io.socket.try_recv_from(recv_region) {
            Ok(received) => received,
            Err(e) => return self.dispose(Op::UdpRecv, e),
        };

        if n == 0 {
            return Ok(());
        }

        let opened = n
            .checked_sub(OVERHEAD_LEN)
            .ok_or(CryptoError::Auth)
            .and_then(|body_len| {
                self.envelope
                    .open(&mut buffers.tun, &buffers.udp, body_len)
                    .map(|()| body_len)
            });

        let body_len = match opened {
            Ok(body_len) => body_len,
            Err(_) => {
                // The peer slot must not move for datagrams that fail to
                // authenticate, or an off-path attacker could hijack the
                // tunnel with a spoofed source address.
                tracing::error!("dropping invalid packet, maybe wrong password");
                return Ok(());
            }
        };

        if self.config.mode == Mode::Server {
            // Learn the return address from the most recent authenticated
            // datagram.
            self.peer = Some(from);
        }

        match self
            .io
            .device
            .write(&buffers.tun[ZERO_BYTES..ZERO_BYTES + body_len])
        {
            Ok(_) => Ok(()),
            Err(e) => self.dispose(Op::TunWrite, e),
        }
    }

    fn dispose(&self, op: Op, err: std::io::Error) -> Result<()> {
        match classify(op, &err) {
            Disposition::Skip => Ok(()),
            Disposition::LogSkip => {
                tracing::warn!("{}: {err}", op.as_str());
                Ok(())
            }
            Disposition::Fatal => {
                tracing::error!("{}: {err}", op.as_str());
                Err(Error::Io {
                    op: op.as_str(),
                    source: err,
                })
            }
        }
    }
}
