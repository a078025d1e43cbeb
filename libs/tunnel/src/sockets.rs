//! UDP endpoint construction.

use std::net::SocketAddr;

use tokio::net::UdpSocket;

use crate::config::Mode;
use crate::{Error, Result};

/// Resolves `host:port` and builds the non-blocking UDP socket for it.
///
/// The server binds the resolved address and starts without a known peer; the
/// client stays unbound and returns the resolved address as its fixed peer.
pub(crate) async fn open(
    mode: Mode,
    host: &str,
    port: u16,
) -> Result<(UdpSocket, Option<SocketAddr>)> {
    let addr = tokio::net::lookup_host((host, port))
        .await
        .map_err(|source| Error::Resolve {
            host: host.to_owned(),
            port,
            source,
        })?
        .next()
        .ok_or_else(|| Error::Resolve {
            host: host.to_owned(),
            port,
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses returned"),
        })?;

    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::DGRAM,
        None,
    )
    .map_err(Error::Socket)?;

    // Note: for AF_INET sockets IPV6_V6ONLY is not a valid flag
    if addr.is_ipv6() {
        socket.set_only_v6(true).map_err(Error::Socket)?;
    }

    socket.set_nonblocking(true).map_err(Error::Socket)?;

    if mode == Mode::Server {
        socket
            .bind(&addr.into())
            .map_err(|source| Error::Bind { addr, source })?;
    }

    let socket = std::net::UdpSocket::from(socket);
    let socket = UdpSocket::try_from(socket).map_err(Error::Socket)?;

    let peer = match mode {
        Mode::Client => Some(addr),
        Mode::Server => None,
    };

    Ok((socket, peer))
}
