//! UDP socket creation
//!
//! Prefers one dual-stack IPv6 socket that also accepts IPv4-mapped
//! traffic, and falls back to plain IPv4 when the host has no IPv6.

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};

use crate::error::NetworkError;

/// Address family the transport socket ended up with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketFamily {
    /// IPv6 socket that also carries IPv4-mapped traffic
    DualStack,
    Ipv4Only,
}

/// Bind a non-blocking UDP socket on all interfaces at `port`.
///
/// An unavailable port is an error; no other port is tried.
pub fn create_socket(port: u16) -> Result<(UdpSocket, SocketFamily), NetworkError> {
    match dual_stack_socket() {
        Ok(socket) => {
            let addr = SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port);
            match socket.bind(&addr.into()) {
                Ok(()) => return finish(socket, SocketFamily::DualStack),
                // IPv6 sockets exist but the stack is disabled
                Err(e) if e.kind() == io::ErrorKind::AddrNotAvailable => {
                    tracing::info!("IPv6 not available, falling back to IPv4");
                }
                Err(source) => return Err(NetworkError::Bind { port, source }),
            }
        }
        Err(e) => {
            tracing::info!(error = %e, "IPv6 not supported, falling back to IPv4");
        }
    }

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(NetworkError::Socket)?;
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    socket
        .bind(&addr.into())
        .map_err(|source| NetworkError::Bind { port, source })?;

    finish(socket, SocketFamily::Ipv4Only)
}

fn dual_stack_socket() -> io::Result<Socket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_only_v6(false)?;
    Ok(socket)
}

fn finish(socket: Socket, family: SocketFamily) -> Result<(UdpSocket, SocketFamily), NetworkError> {
    socket.set_nonblocking(true).map_err(NetworkError::Socket)?;
    let socket: UdpSocket = socket.into();

    match socket.local_addr() {
        Ok(addr) => tracing::info!(%addr, ?family, "Socket bound"),
        Err(e) => tracing::warn!(error = %e, "Socket bound to unknown address"),
    }
    Ok((socket, family))
}

/// Unwrap IPv4-mapped IPv6 addresses so both forms compare equal
pub fn canonical(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V6(v6) => match v6.ip().to_ipv4_mapped() {
            Some(v4) => SocketAddr::new(IpAddr::V4(v4), v6.port()),
            None => addr,
        },
        SocketAddr::V4(_) => addr,
    }
}

/// Address to hand to `send_to` for a peer on a socket of this family
pub fn wire_addr(peer: SocketAddr, family: SocketFamily) -> SocketAddr {
    match (peer, family) {
        (SocketAddr::V4(v4), SocketFamily::DualStack) => {
            SocketAddr::new(IpAddr::V6(v4.ip().to_ipv6_mapped()), v4.port())
        }
        _ => peer,
    }
}
