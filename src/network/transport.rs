//! UDP transport with first-packet peer discovery
//!
//! One socket, one polling thread. Each iteration sends at most one queued
//! frame to the peer and reads at most one datagram. Until a peer is known
//! the sender of the first datagram becomes the peer; afterwards only
//! datagrams from exactly that address and port are accepted.

use bytes::Bytes;
use parking_lot::Mutex;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

use crate::audio::buffer::{Popped, SharedFrameQueue};
use crate::config::NetworkConfig;
use crate::constants::MAX_DATAGRAM_SIZE;
use crate::error::NetworkError;
use crate::events::{Component, EventSink, SessionEvent};
use crate::network::udp::{canonical, create_socket, wire_addr, SocketFamily};
use crate::worker::{JoinOutcome, Worker};

/// Datagram counters
#[derive(Debug, Default)]
pub struct TransportStats {
    sent: AtomicU64,
    send_failures: AtomicU64,
    received: AtomicU64,
    accepted: AtomicU64,
    filtered: AtomicU64,
}

/// Point-in-time copy of `TransportStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStatsSnapshot {
    pub sent: u64,
    pub send_failures: u64,
    pub received: u64,
    pub accepted: u64,
    /// Datagrams dropped because they came from someone other than the peer
    pub filtered: u64,
}

impl TransportStats {
    pub fn snapshot(&self) -> TransportStatsSnapshot {
        TransportStatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
        }
    }
}

/// The network half of a session
pub struct NetworkTransport {
    /// Present until the poll loop takes ownership
    socket: Option<UdpSocket>,
    local_addr: SocketAddr,
    family: SocketFamily,

    /// Set once, by `set_peer` or by discovery; never changed afterwards
    peer: Arc<OnceLock<SocketAddr>>,

    outgoing: SharedFrameQueue,
    incoming: SharedFrameQueue,
    events: Arc<dyn EventSink>,
    running: Arc<AtomicBool>,
    failure: Arc<Mutex<Option<String>>>,
    stats: Arc<TransportStats>,
    poll_interval: Duration,
    max_datagram_size: usize,
    worker: Option<Worker>,
}

impl NetworkTransport {
    /// Bind the socket. No thread is started yet.
    pub fn new(
        config: &NetworkConfig,
        outgoing: SharedFrameQueue,
        incoming: SharedFrameQueue,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, NetworkError> {
        let (socket, family) = match create_socket(config.local_port) {
            Ok(bound) => bound,
            Err(e) => {
                tracing::error!(error = %e, "Error binding socket");
                if let Some(port) = e.bind_port() {
                    events.emit(SessionEvent::status(format!("Error: Port {} in use.", port)));
                }
                return Err(e);
            }
        };
        let local_addr = socket.local_addr().map_err(NetworkError::Socket)?;

        Ok(Self {
            socket: Some(socket),
            local_addr,
            family,
            peer: Arc::new(OnceLock::new()),
            outgoing,
            incoming,
            events,
            running: Arc::new(AtomicBool::new(false)),
            failure: Arc::new(Mutex::new(None)),
            stats: Arc::new(TransportStats::default()),
            poll_interval: config.poll_interval(),
            max_datagram_size: config.max_datagram_size.max(MAX_DATAGRAM_SIZE),
            worker: None,
        })
    }

    /// Fix the peer for an outbound call. Only allowed once, before start.
    pub fn set_peer(&self, peer: SocketAddr) -> Result<(), NetworkError> {
        if self.worker.is_some() {
            return Err(NetworkError::AlreadyRunning);
        }
        let peer = canonical(peer);
        self.peer
            .set(peer)
            .map_err(|_| NetworkError::PeerAlreadySet(self.peer.get().copied().unwrap_or(peer)))?;
        tracing::info!(%peer, "Peer address set");
        Ok(())
    }

    /// Start the poll loop on its own thread
    pub fn start(&mut self) -> Result<(), NetworkError> {
        let socket = self.socket.take().ok_or(NetworkError::AlreadyRunning)?;
        self.spawn_loop(socket)
    }

    fn spawn_loop<S: DatagramSocket>(&mut self, socket: S) -> Result<(), NetworkError> {
        let poll = PollLoop {
            socket,
            family: self.family,
            peer: self.peer.clone(),
            outgoing: self.outgoing.clone(),
            incoming: self.incoming.clone(),
            events: self.events.clone(),
            running: self.running.clone(),
            stats: self.stats.clone(),
            poll_interval: self.poll_interval,
            max_datagram_size: self.max_datagram_size,
        };
        let events = self.events.clone();
        let failure = self.failure.clone();

        self.running.store(true, Ordering::SeqCst);

        let worker = Worker::spawn("network-transport", move || {
            let _span = tracing::info_span!("transport").entered();
            tracing::info!("Network transport started");

            match poll.run().map_err(NetworkError::Runtime) {
                Ok(()) => tracing::info!("Network transport stopped"),
                Err(e) => {
                    tracing::error!(error = %e, "Error in network loop, transport stopped");
                    *failure.lock() = Some(e.to_string());
                    events.emit(SessionEvent::ComponentFailed {
                        component: Component::Transport,
                        reason: e.to_string(),
                    });
                }
            }
        });

        match worker {
            Ok(worker) => {
                self.worker = Some(worker);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(NetworkError::Socket(e))
            }
        }
    }

    /// Clear the running flag and wait up to `timeout` for the loop to
    /// exit. The socket closes when the loop returns.
    pub fn stop(&mut self, timeout: Duration) -> JoinOutcome {
        self.running.store(false, Ordering::SeqCst);
        // Never started: close the socket here
        self.socket = None;

        match self.worker.take() {
            Some(worker) => worker.join_timeout(timeout),
            None => JoinOutcome::Joined,
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn family(&self) -> SocketFamily {
        self.family
    }

    /// The established peer, if any
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer.get().copied()
    }

    pub fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }

    pub fn stats(&self) -> TransportStatsSnapshot {
        self.stats.snapshot()
    }
}

impl Drop for NetworkTransport {
    fn drop(&mut self) {
        self.stop(Duration::from_secs(1));
    }
}

/// The two socket calls the poll loop makes
trait DatagramSocket: Send + 'static {
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize>;
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
}

impl DatagramSocket for UdpSocket {
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, addr)
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf)
    }
}

/// State owned by the transport thread
struct PollLoop<S> {
    socket: S,
    family: SocketFamily,
    peer: Arc<OnceLock<SocketAddr>>,
    outgoing: SharedFrameQueue,
    incoming: SharedFrameQueue,
    events: Arc<dyn EventSink>,
    running: Arc<AtomicBool>,
    stats: Arc<TransportStats>,
    poll_interval: Duration,
    max_datagram_size: usize,
}

impl<S: DatagramSocket> PollLoop<S> {
    fn run(self) -> io::Result<()> {
        let mut buf = vec![0u8; self.max_datagram_size];

        while self.running.load(Ordering::SeqCst) {
            self.send_pending();

            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) => self.handle_datagram(&buf[..len], from),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(self.poll_interval);
                }
                Err(e) if is_transient(&e) => {
                    tracing::trace!(error = %e, "Transient receive error");
                }
                Err(e) => {
                    if self.running.load(Ordering::SeqCst) {
                        return Err(e);
                    }
                    break;
                }
            }
        }

        Ok(())
    }

    /// Send at most one queued frame, if a peer is known
    fn send_pending(&self) {
        let Some(peer) = self.peer.get().copied() else {
            return;
        };
        let Some(Popped::Frame(frame)) = self.outgoing.try_pop() else {
            return;
        };

        match self.socket.send_to(&frame, wire_addr(peer, self.family)) {
            Ok(_) => {
                self.stats.sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.stats.send_failures.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("Socket send buffer full, frame dropped");
            }
            Err(e) => {
                self.stats.send_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%peer, error = %e, "Failed to send frame");
            }
        }
    }

    fn handle_datagram(&self, payload: &[u8], from: SocketAddr) {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        let from = canonical(from);

        let mut discovered = false;
        let peer = *self.peer.get_or_init(|| {
            discovered = true;
            from
        });

        if discovered {
            tracing::info!(%peer, "Incoming call, peer discovered");
            self.events.emit(SessionEvent::peer_connected(peer));
        }

        if from == peer {
            self.stats.accepted.fetch_add(1, Ordering::Relaxed);
            self.incoming.push_logged(Bytes::copy_from_slice(payload), "incoming");
        } else {
            self.stats.filtered.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%from, %peer, "Dropping datagram from unknown source");
        }
    }
}

/// Errors the loop skips over instead of stopping
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
            // ICMP port-unreachable echoed back on some platforms
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
    )
}
