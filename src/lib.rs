//! # UDP Voice Link
//!
//! Point-to-point real-time voice between two hosts over UDP, with no
//! signaling server in between.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                               SESSION                                │
//! │                                                                      │
//! │  ┌────────────┐   ┌──────────┐   outgoing    ┌────────────────────┐  │
//! │  │ Microphone │──▶│ Capture  │──FrameQueue──▶│                    │  │
//! │  └────────────┘   │ Thread   │               │  Network Transport │  │
//! │                   │ (mu-law  │               │  (single UDP       │  │
//! │                   │  encode) │               │   socket, polled)  │◀─┼──▶ peer
//! │  ┌────────────┐   ┌──────────┐   incoming    │                    │  │
//! │  │  Speaker   │◀──│ Playback │◀─FrameQueue───│  discovery +       │  │
//! │  └────────────┘   │ Thread   │               │  peer filtering    │  │
//! │                   │ (mu-law  │               └────────────────────┘  │
//! │                   │  decode) │                                       │
//! │                   └──────────┘                                       │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every datagram carries exactly one mu-law encoded frame with no header.
//! A session either calls a known peer, or listens and adopts the sender of
//! the first datagram as its peer.

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod network;
pub mod session;
pub mod worker;

pub use error::{Error, Result};
pub use events::{EventSink, SessionEvent};
pub use session::{CallRequest, Session, SessionState};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Sample rate for capture and playback
    pub const SAMPLE_RATE: u32 = 8000;

    /// Channel count (mono)
    pub const CHANNELS: u16 = 1;

    /// Samples per frame (128 ms at 8 kHz)
    pub const FRAME_SIZE: usize = 1024;

    /// Receive buffer size; large enough for a full encoded frame
    pub const MAX_DATAGRAM_SIZE: usize = 4096;

    /// Sleep between transport polls when nothing was received
    pub const POLL_INTERVAL: Duration = Duration::from_millis(1);

    /// Lowest port a session accepts
    pub const MIN_PORT: u16 = 1024;

    /// Highest port a session accepts
    pub const MAX_PORT: u16 = 65535;

    /// Default UDP port, for both ends
    pub const DEFAULT_UDP_PORT: u16 = 12345;

    /// Default per-queue capacity (in frames)
    pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

    /// Upper bound on waiting for a worker thread during stop
    pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(500);
}
