//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;
pub mod playback;

#[cfg(test)]
pub(crate) mod mock;

pub use buffer::{create_shared_queue, AudioFrame, EncodedFrame, FrameQueue, OverflowPolicy, Popped, Pushed, SharedFrameQueue};
pub use capture::AudioCapture;
pub use device::{AudioBackend, CpalBackend, DeviceInfo, InputStream, OutputStream, StreamSpec};
pub use playback::AudioPlayback;
