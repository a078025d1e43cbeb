use std::io;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::mpsc;

use crate::Tun;

const ADAPTER_TYPE: &str = "vpn";

pub(crate) struct TunDevice {
    session: Arc<wintun::Session>,
    /// Inbound packets, read by a dedicated worker thread.
    ///
    /// wintun only offers blocking reads from its ring buffer, so we park a
    /// thread on `receive_blocking` and hand the packets over a channel the
    /// event loop can poll.
    packet_rx: mpsc::Receiver<Vec<u8>>,
    name: String,
}

impl Drop for TunDevice {
    fn drop(&mut self) {
        // Unblocks the worker thread.
        let _ = self.session.shutdown();
    }
}

impl Tun for TunDevice {
    fn poll_read(&mut self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>> {
        match std::task::ready!(self.packet_rx.poll_recv(cx)) {
            Some(packet) => {
                if packet.len() > buf.len() {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "packet exceeds buffer",
                    )));
                }

                buf[..packet.len()].copy_from_slice(&packet);
                Poll::Ready(Ok(packet.len()))
            }
            None => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "wintun session closed",
            ))),
        }
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut packet = self
            .session
            .allocate_send_packet(buf.len() as u16)
            .map_err(io::Error::other)?;
        packet.bytes_mut().copy_from_slice(buf);
        self.session.send_packet(packet);

        Ok(buf.len())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

pub(crate) fn create(name: &str) -> io::Result<Box<dyn Tun>> {
    // Requires wintun.dll next to the executable or in System32.
    // SAFETY: Safe as long as we have the correct DLL.
    let wintun = unsafe { wintun::load() }.map_err(io::Error::other)?;

    let adapter = wintun::Adapter::create(&wintun, name, ADAPTER_TYPE, None)
        .map_err(io::Error::other)?;
    let session = Arc::new(
        adapter
            .start_session(wintun::MAX_RING_CAPACITY)
            .map_err(io::Error::other)?,
    );

    let (packet_tx, packet_rx) = mpsc::channel(16);

    std::thread::Builder::new()
        .name("wintun-recv".to_owned())
        .spawn({
            let session = Arc::clone(&session);

            move || {
                loop {
                    let packet = match session.receive_blocking() {
                        Ok(packet) => packet,
                        Err(_) => break, // session shut down
                    };

                    if packet_tx.blocking_send(packet.bytes().to_vec()).is_err() {
                        break;
                    }
                }
            }
        })?;

    tracing::debug!(%name, "Created wintun adapter");

    Ok(Box::new(TunDevice {
        session,
        packet_rx,
        name: name.to_owned(),
    }))
}
