//! Network subsystem for UDP audio transport

pub mod transport;
pub mod udp;

pub use transport::{NetworkTransport, TransportStatsSnapshot};
pub use udp::{canonical, create_socket, SocketFamily};
