//! Notifications raised to whatever sits above the session (a UI, the CLI)

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// The three concurrent parts of an active session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Capture,
    Playback,
    Transport,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Component::Capture => "capture",
            Component::Playback => "playback",
            Component::Transport => "transport",
        };
        f.write_str(name)
    }
}

/// Event delivered to the session's collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Human-readable session status
    StatusChanged(String),

    /// The remote party was learned from its first datagram
    PeerConnected { address: IpAddr, port: u16 },

    /// A worker loop aborted mid-run; the others keep going
    ComponentFailed { component: Component, reason: String },
}

impl SessionEvent {
    pub fn status(status: impl Into<String>) -> Self {
        SessionEvent::StatusChanged(status.into())
    }

    pub fn peer_connected(addr: SocketAddr) -> Self {
        SessionEvent::PeerConnected {
            address: addr.ip(),
            port: addr.port(),
        }
    }
}

/// Receives session events. Called from worker threads.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SessionEvent);
}

impl<F> EventSink for F
where
    F: Fn(SessionEvent) + Send + Sync,
{
    fn emit(&self, event: SessionEvent) {
        self(event)
    }
}

/// Forwards events over a channel
pub struct ChannelSink {
    tx: Sender<SessionEvent>,
}

impl EventSink for ChannelSink {
    fn emit(&self, event: SessionEvent) {
        // A dropped receiver just means nobody is listening anymore
        let _ = self.tx.send(event);
    }
}

/// Create a sink and the receiver its events arrive on
pub fn event_channel() -> (ChannelSink, Receiver<SessionEvent>) {
    let (tx, rx) = unbounded();
    (ChannelSink { tx }, rx)
}

/// Writes events to the log and nothing else
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: SessionEvent) {
        match event {
            SessionEvent::StatusChanged(status) => tracing::info!(%status, "Session status"),
            SessionEvent::PeerConnected { address, port } => {
                tracing::info!(%address, port, "Peer connected")
            }
            SessionEvent::ComponentFailed { component, reason } => {
                tracing::error!(%component, %reason, "Component stopped")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_channel_sink() {
        let (sink, rx) = event_channel();
        let addr: SocketAddr = "127.0.0.1:9999".parse().unwrap();

        sink.emit(SessionEvent::status("In Call"));
        sink.emit(SessionEvent::peer_connected(addr));

        assert_eq!(rx.try_recv().unwrap(), SessionEvent::StatusChanged("In Call".into()));
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::PeerConnected {
                address: addr.ip(),
                port: 9999
            }
        );
    }

    #[test]
    fn test_closure_sink() {
        let count = Arc::new(AtomicUsize::new(0));
        let sink: Arc<dyn EventSink> = {
            let count = count.clone();
            Arc::new(move |_event: SessionEvent| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };

        sink.emit(SessionEvent::status("Idle"));
        sink.emit(SessionEvent::status("Connecting..."));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_channel_sink_without_receiver() {
        let (sink, rx) = event_channel();
        drop(rx);
        sink.emit(SessionEvent::status("Idle"));
    }
}
