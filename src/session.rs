//! Call lifecycle
//!
//! A `Session` wires capture, playback and transport together around its
//! two frame queues, and tears them down again on stop. The queues live as
//! long as the session and are emptied at every start and stop:
//!
//! ```text
//! Idle ──start──▶ Starting ──all opened──▶ Active ──stop/supervise──▶ Stopping ──▶ Idle
//!                    │                                                              ▲
//!                    └──────────────── any open failure ───────────────────────────┘
//! ```

use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use crate::audio::buffer::{create_shared_queue, SharedFrameQueue};
use crate::audio::device::{AudioBackend, StreamSpec};
use crate::audio::{AudioCapture, AudioPlayback};
use crate::config::{AppConfig, NetworkConfig};
use crate::constants::{MAX_PORT, MIN_PORT};
use crate::error::{Error, NetworkError, Result, ValidationError};
use crate::events::{Component, EventSink, SessionEvent};
use crate::network::{NetworkTransport, TransportStatsSnapshot};
use crate::worker::JoinOutcome;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    /// Socket and devices being opened
    Starting,
    /// Capture, playback and transport all running
    Active,
    Stopping,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            SessionState::Idle => "Idle",
            SessionState::Starting => "Connecting...",
            SessionState::Active => "In Call",
            SessionState::Stopping => "Disconnecting...",
        };
        f.write_str(status)
    }
}

/// Remote party as typed by the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerTarget {
    pub address: String,
    pub port: u32,
}

/// What to start: an outbound call, or a listen that adopts whoever
/// sends first.
///
/// Ports are kept wide so out-of-range input is reported as such instead
/// of being truncated on the way in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallRequest {
    pub peer: Option<PeerTarget>,
    /// Local port; for a call this defaults to the peer port, for a listen
    /// to the configured port
    pub local_port: Option<u32>,
    pub input_device: Option<usize>,
    pub output_device: Option<usize>,
}

/// A request that passed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedCall {
    pub peer: Option<SocketAddr>,
    pub local_port: u16,
    pub input_device: Option<usize>,
    pub output_device: Option<usize>,
}

impl CallRequest {
    /// Call `address:port`
    pub fn call(address: impl Into<String>, port: u32) -> Self {
        Self {
            peer: Some(PeerTarget {
                address: address.into(),
                port,
            }),
            ..Self::default()
        }
    }

    /// Wait for an incoming call
    pub fn listen() -> Self {
        Self::default()
    }

    pub fn with_local_port(mut self, port: u32) -> Self {
        self.local_port = Some(port);
        self
    }

    pub fn with_devices(mut self, input: Option<usize>, output: Option<usize>) -> Self {
        self.input_device = input;
        self.output_device = output;
        self
    }

    /// Check ports and resolve the peer. `default_port` is used for a
    /// listen without an explicit local port; 0 there asks for an
    /// ephemeral port.
    pub fn validate(&self, default_port: u16) -> std::result::Result<ValidatedCall, ValidationError> {
        let peer = match &self.peer {
            Some(target) => {
                let port = check_port(target.port)?;
                let address = target.address.trim();
                if address.is_empty() {
                    return Err(ValidationError::EmptyPeerAddress);
                }
                Some(resolve(address, port)?)
            }
            None => None,
        };

        let local_port = match (self.local_port, peer) {
            (Some(port), _) => check_port(port)?,
            (None, Some(peer)) => peer.port(),
            (None, None) if default_port == 0 => 0,
            (None, None) => check_port(u32::from(default_port))?,
        };

        Ok(ValidatedCall {
            peer,
            local_port,
            input_device: self.input_device,
            output_device: self.output_device,
        })
    }
}

fn check_port(port: u32) -> std::result::Result<u16, ValidationError> {
    match u16::try_from(port) {
        Ok(p) if (MIN_PORT..=MAX_PORT).contains(&p) => Ok(p),
        _ => Err(ValidationError::PortOutOfRange(port)),
    }
}

fn resolve(address: &str, port: u16) -> std::result::Result<SocketAddr, ValidationError> {
    (address, port)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| ValidationError::UnresolvablePeer(address.to_string()))
}

/// The three running components of an active call
struct ActiveCall {
    capture: AudioCapture,
    playback: AudioPlayback,
    transport: NetworkTransport,
}

impl ActiveCall {
    fn failures(&self) -> Vec<(Component, String)> {
        [
            (Component::Capture, self.capture.failure()),
            (Component::Playback, self.playback.failure()),
            (Component::Transport, self.transport.failure()),
        ]
        .into_iter()
        .filter_map(|(component, failure)| failure.map(|reason| (component, reason)))
        .collect()
    }
}

/// One voice call
pub struct Session {
    config: AppConfig,
    backend: Arc<dyn AudioBackend>,
    events: Arc<dyn EventSink>,
    state: SessionState,
    outgoing: SharedFrameQueue,
    incoming: SharedFrameQueue,
    active: Option<ActiveCall>,
}

impl Session {
    pub fn new(config: AppConfig, backend: Arc<dyn AudioBackend>, events: Arc<dyn EventSink>) -> Self {
        let outgoing = create_shared_queue(config.queue.capacity(), config.queue.overflow);
        let incoming = create_shared_queue(config.queue.capacity(), config.queue.overflow);
        Self {
            config,
            backend,
            events,
            state: SessionState::Idle,
            outgoing,
            incoming,
            active: None,
        }
    }

    /// Validate the request, bind the socket, open both devices and start
    /// all three loops.
    ///
    /// Nothing is left running on failure and the session is Idle again.
    pub fn start(&mut self, request: &CallRequest) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(Error::InvalidState(self.state));
        }

        if let Err(e) = self.config.validate() {
            tracing::warn!(error = %e, "Refusing to start with invalid settings");
            return Err(e.into());
        }

        let call = match request.validate(self.config.network.local_port) {
            Ok(call) => call,
            Err(e) => {
                tracing::warn!(error = %e, "Rejected call request");
                return Err(e.into());
            }
        };

        self.set_state(SessionState::Starting);

        match self.open(&call) {
            Ok(active) => {
                tracing::info!(
                    local = %active.transport.local_addr(),
                    peer = ?call.peer,
                    "Session active"
                );
                self.active = Some(active);
                self.state = SessionState::Active;
                let status = match call.peer {
                    Some(_) => SessionState::Active.to_string(),
                    None => "Listening...".to_string(),
                };
                self.events.emit(SessionEvent::status(status));
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to start session");
                // A bind failure already left its own status for the user
                let reported = matches!(e, Error::Network(NetworkError::Bind { .. }));
                self.state = SessionState::Idle;
                if !reported {
                    self.events.emit(SessionEvent::status(SessionState::Idle.to_string()));
                }
                Err(e)
            }
        }
    }

    /// Open everything in order. Whatever was opened before a failure is
    /// stopped when it goes out of scope.
    fn open(&self, call: &ValidatedCall) -> Result<ActiveCall> {
        // Drop leftovers, including the sentinel from the last stop
        self.outgoing.clear();
        self.incoming.clear();

        let network = NetworkConfig {
            local_port: call.local_port,
            ..self.config.network.clone()
        };
        let mut transport = NetworkTransport::new(
            &network,
            self.outgoing.clone(),
            self.incoming.clone(),
            self.events.clone(),
        )?;
        if let Some(peer) = call.peer {
            transport.set_peer(peer)?;
        }

        let spec = StreamSpec::from(&self.config.audio);

        let mut capture = AudioCapture::new(
            self.backend.clone(),
            call.input_device.or(self.config.audio.input_device),
            spec,
            self.outgoing.clone(),
            self.events.clone(),
        );
        capture.start()?;

        let mut playback = AudioPlayback::new(
            self.backend.clone(),
            call.output_device.or(self.config.audio.output_device),
            spec,
            self.incoming.clone(),
            self.events.clone(),
        );
        playback.start()?;

        transport.start()?;

        Ok(ActiveCall {
            capture,
            playback,
            transport,
        })
    }

    /// End the call. Does nothing when no call is running.
    pub fn stop(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };

        self.set_state(SessionState::Stopping);
        let timeout = self.config.shutdown_timeout();

        let outcomes = [
            (Component::Capture, active.capture.stop(timeout)),
            (Component::Playback, active.playback.stop(timeout)),
            (Component::Transport, active.transport.stop(timeout)),
        ];
        for (component, outcome) in outcomes {
            if outcome != JoinOutcome::Joined {
                tracing::warn!(%component, ?outcome, "Component did not stop cleanly");
            }
        }
        drop(active);

        self.outgoing.clear();
        self.incoming.clear();

        self.set_state(SessionState::Idle);
        tracing::info!("Session stopped");
    }

    /// Stop the whole call if one of its loops has aborted, returning the
    /// first failure
    pub fn supervise(&mut self) -> Option<(Component, String)> {
        let failure = self.active.as_ref()?.failures().into_iter().next()?;
        tracing::error!(component = %failure.0, reason = %failure.1, "Component failed, ending call");
        self.stop();
        Some(failure)
    }

    /// Components whose loop has aborted
    pub fn failed_components(&self) -> Vec<Component> {
        self.active
            .as_ref()
            .map(|active| active.failures().into_iter().map(|(c, _)| c).collect())
            .unwrap_or_default()
    }

    fn set_state(&mut self, state: SessionState) {
        self.state = state;
        self.events.emit(SessionEvent::status(state.to_string()));
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Current peer, once set or discovered
    pub fn peer(&self) -> Option<SocketAddr> {
        self.active.as_ref().and_then(|a| a.transport.peer())
    }

    /// Bound socket address while a call is running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.active.as_ref().map(|a| a.transport.local_addr())
    }

    pub fn transport_stats(&self) -> Option<TransportStatsSnapshot> {
        self.active.as_ref().map(|a| a.transport.stats())
    }

    pub fn outgoing(&self) -> &SharedFrameQueue {
        &self.outgoing
    }

    pub fn incoming(&self) -> &SharedFrameQueue {
        &self.incoming
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}
