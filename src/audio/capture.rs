//! Audio capture from the input device
//!
//! Reads one frame at a time, encodes it to mu-law and pushes it onto the
//! outgoing queue. The device is opened on the capture thread, and the
//! open result is handed back before `start` returns.

use crossbeam_channel::bounded;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::audio::buffer::SharedFrameQueue;
use crate::audio::device::{AudioBackend, InputStream, StreamSpec};
use crate::codec;
use crate::error::DeviceError;
use crate::events::{Component, EventSink, SessionEvent};
use crate::worker::{JoinOutcome, Worker};

/// Capture half of the pipeline
pub struct AudioCapture {
    backend: Arc<dyn AudioBackend>,

    /// Device index, `None` for the host default
    device: Option<usize>,

    spec: StreamSpec,

    /// Destination for encoded frames
    outgoing: SharedFrameQueue,

    events: Arc<dyn EventSink>,

    /// Whether capture should keep running
    running: Arc<AtomicBool>,

    /// Why the loop aborted, if it did
    failure: Arc<Mutex<Option<String>>>,

    /// Total frames pushed to the outgoing queue
    frames_captured: Arc<AtomicU64>,

    worker: Option<Worker>,
}

impl AudioCapture {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        device: Option<usize>,
        spec: StreamSpec,
        outgoing: SharedFrameQueue,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            backend,
            device,
            spec,
            outgoing,
            events,
            running: Arc::new(AtomicBool::new(false)),
            failure: Arc::new(Mutex::new(None)),
            frames_captured: Arc::new(AtomicU64::new(0)),
            worker: None,
        }
    }

    /// Open the input device and start the capture loop.
    ///
    /// Fails without starting the loop if the device cannot be opened.
    pub fn start(&mut self) -> Result<(), DeviceError> {
        if self.worker.is_some() {
            return Ok(());
        }

        let (ready_tx, ready_rx) = bounded::<Result<(), DeviceError>>(1);

        let backend = self.backend.clone();
        let device = self.device;
        let spec = self.spec;
        let outgoing = self.outgoing.clone();
        let events = self.events.clone();
        let running = self.running.clone();
        let failure = self.failure.clone();
        let frames_captured = self.frames_captured.clone();

        *self.failure.lock() = None;
        self.running.store(true, Ordering::SeqCst);

        let worker = Worker::spawn("audio-capture", move || {
            let _span = tracing::info_span!("capture").entered();

            let mut input = match backend.open_input(device, &spec) {
                Ok(input) => input,
                Err(e) => {
                    running.store(false, Ordering::SeqCst);
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));
            tracing::info!("Audio capture started");

            let result = capture_loop(input.as_mut(), &spec, &outgoing, &running, &frames_captured);
            drop(input);

            match result {
                Ok(()) => tracing::info!("Audio capture stopped"),
                Err(e) => {
                    tracing::error!(error = %e, "Error in capture loop, capture stopped");
                    *failure.lock() = Some(e.to_string());
                    events.emit(SessionEvent::ComponentFailed {
                        component: Component::Capture,
                        reason: e.to_string(),
                    });
                }
            }
        })
        .map_err(|e| DeviceError::OpenFailed(format!("cannot spawn capture thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some(worker);
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Error opening input device");
                self.running.store(false, Ordering::SeqCst);
                worker.join_timeout(Duration::from_secs(1));
                Err(e)
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                Err(DeviceError::Closed)
            }
        }
    }

    /// Ask the loop to finish and wait up to `timeout` for it.
    ///
    /// The loop notices at the next frame boundary.
    pub fn stop(&mut self, timeout: Duration) -> JoinOutcome {
        self.running.store(false, Ordering::SeqCst);

        match self.worker.take() {
            Some(worker) => worker.join_timeout(timeout),
            None => JoinOutcome::Joined,
        }
    }

    /// Check if the capture loop is still producing frames
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Reason the loop aborted, if it did
    pub fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }

    /// Get total frames captured
    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop(Duration::from_secs(1));
    }
}

fn capture_loop(
    input: &mut dyn InputStream,
    spec: &StreamSpec,
    outgoing: &SharedFrameQueue,
    running: &AtomicBool,
    frames_captured: &AtomicU64,
) -> Result<(), DeviceError> {
    let mut pcm = vec![0i16; spec.frame_size];

    while running.load(Ordering::SeqCst) {
        if let Err(e) = input.read(&mut pcm) {
            // A read cut short by shutdown is not a failure
            if !running.load(Ordering::SeqCst) {
                break;
            }
            return Err(e);
        }

        outgoing.push_logged(codec::encode(&pcm), "outgoing");
        frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::{create_shared_queue, OverflowPolicy, Popped};
    use crate::audio::mock::{wait_for, AfterScript, ScriptedBackend};
    use crate::events::event_channel;

    fn small_spec() -> StreamSpec {
        StreamSpec {
            frame_size: 4,
            ..StreamSpec::default()
        }
    }

    #[test]
    fn test_capture_encodes_frames_in_order() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .with_input(vec![vec![0, 0, 0, 0], vec![1000, -1000, 8000, -8000]])
                .after_script(AfterScript::Silence),
        );
        let outgoing = create_shared_queue(None, OverflowPolicy::DropOldest);
        let (sink, _events) = event_channel();

        let mut capture = AudioCapture::new(backend.clone(), None, small_spec(), outgoing.clone(), Arc::new(sink));
        capture.start().unwrap();
        assert!(wait_for(Duration::from_secs(2), || capture.frames_captured() >= 2));
        assert_eq!(capture.stop(Duration::from_secs(1)), JoinOutcome::Joined);

        assert_eq!(outgoing.try_pop(), Some(Popped::Frame(codec::encode(&[0, 0, 0, 0]))));
        assert_eq!(
            outgoing.try_pop(),
            Some(Popped::Frame(codec::encode(&[1000, -1000, 8000, -8000])))
        );
        assert_eq!(backend.open_streams(), 0);
    }

    #[test]
    fn test_open_failure_is_reported_synchronously() {
        let backend = Arc::new(ScriptedBackend::new().failing_input_open());
        let outgoing = create_shared_queue(None, OverflowPolicy::DropOldest);
        let (sink, _events) = event_channel();

        let mut capture = AudioCapture::new(backend, None, small_spec(), outgoing.clone(), Arc::new(sink));
        assert!(matches!(capture.start(), Err(DeviceError::OpenFailed(_))));
        assert!(!capture.is_running());
        assert!(outgoing.is_empty());
    }

    #[test]
    fn test_read_failure_stops_loop_and_notifies() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .with_input(vec![vec![1, 2, 3, 4]])
                .after_script(AfterScript::Fail),
        );
        let outgoing = create_shared_queue(None, OverflowPolicy::DropOldest);
        let (sink, events) = event_channel();

        let mut capture = AudioCapture::new(backend.clone(), None, small_spec(), outgoing.clone(), Arc::new(sink));
        capture.start().unwrap();

        let event = events.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(
            event,
            SessionEvent::ComponentFailed { component: Component::Capture, .. }
        ));
        assert!(wait_for(Duration::from_secs(1), || !capture.is_running()));
        assert!(capture.failure().is_some());
        assert_eq!(capture.frames_captured(), 1);
        assert_eq!(outgoing.len(), 1);
        assert_eq!(backend.open_streams(), 0);
    }

    #[test]
    fn test_stop_without_start() {
        let backend = Arc::new(ScriptedBackend::new());
        let outgoing = create_shared_queue(None, OverflowPolicy::DropOldest);
        let (sink, _events) = event_channel();

        let mut capture = AudioCapture::new(backend, None, small_spec(), outgoing, Arc::new(sink));
        assert_eq!(capture.stop(Duration::from_millis(10)), JoinOutcome::Joined);
    }
}
