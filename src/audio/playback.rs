//! Audio playback to the output device
//!
//! Blocks on the incoming queue, decodes each frame and writes it to the
//! device. The queue's sentinel is the shutdown signal.

use crossbeam_channel::bounded;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::audio::buffer::{Popped, SharedFrameQueue};
use crate::audio::device::{AudioBackend, OutputStream, StreamSpec};
use crate::codec;
use crate::error::DeviceError;
use crate::events::{Component, EventSink, SessionEvent};
use crate::worker::{JoinOutcome, Worker};

/// Playback half of the pipeline
pub struct AudioPlayback {
    backend: Arc<dyn AudioBackend>,
    device: Option<usize>,
    spec: StreamSpec,
    incoming: SharedFrameQueue,
    events: Arc<dyn EventSink>,
    running: Arc<AtomicBool>,
    failure: Arc<Mutex<Option<String>>>,
    frames_played: Arc<AtomicU64>,
    worker: Option<Worker>,
}

impl AudioPlayback {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        device: Option<usize>,
        spec: StreamSpec,
        incoming: SharedFrameQueue,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            backend,
            device,
            spec,
            incoming,
            events,
            running: Arc::new(AtomicBool::new(false)),
            failure: Arc::new(Mutex::new(None)),
            frames_played: Arc::new(AtomicU64::new(0)),
            worker: None,
        }
    }

    /// Open the output device and start the playback loop
    pub fn start(&mut self) -> Result<(), DeviceError> {
        if self.worker.is_some() {
            return Ok(());
        }

        let (ready_tx, ready_rx) = bounded::<Result<(), DeviceError>>(1);

        let backend = self.backend.clone();
        let device = self.device;
        let spec = self.spec;
        let incoming = self.incoming.clone();
        let events = self.events.clone();
        let running = self.running.clone();
        let failure = self.failure.clone();
        let frames_played = self.frames_played.clone();

        *self.failure.lock() = None;
        self.running.store(true, Ordering::SeqCst);

        let worker = Worker::spawn("audio-playback", move || {
            let _span = tracing::info_span!("playback").entered();

            let mut output = match backend.open_output(device, &spec) {
                Ok(output) => output,
                Err(e) => {
                    running.store(false, Ordering::SeqCst);
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));
            tracing::info!("Audio playback started");

            let result = playback_loop(output.as_mut(), &incoming, &running, &frames_played);
            drop(output);

            match result {
                Ok(()) => tracing::info!("Audio playback stopped"),
                Err(e) => {
                    tracing::error!(error = %e, "Error in playback loop, playback stopped");
                    *failure.lock() = Some(e.to_string());
                    events.emit(SessionEvent::ComponentFailed {
                        component: Component::Playback,
                        reason: e.to_string(),
                    });
                }
            }
        })
        .map_err(|e| DeviceError::OpenFailed(format!("cannot spawn playback thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some(worker);
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Error opening output device");
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

    /// Enqueue the sentinel to release a blocked pop, then wait up to
    /// `timeout` for the loop to exit
    pub fn stop(&mut self, timeout: Duration) -> JoinOutcome {
        self.running.store(false, Ordering::SeqCst);

        match self.worker.take() {
            Some(worker) => {
                self.incoming.close();
                worker.join_timeout(timeout)
            }
            None => JoinOutcome::Joined,
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    pub fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }

    pub fn frames_played(&self) -> u64 {
        self.frames_played.load(Ordering::Relaxed)
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.stop(Duration::from_secs(1));
    }
}

fn playback_loop(
    output: &mut dyn OutputStream,
    incoming: &SharedFrameQueue,
    running: &AtomicBool,
    frames_played: &AtomicU64,
) -> Result<(), DeviceError> {
    let mut pcm = Vec::new();

    while running.load(Ordering::SeqCst) {
        let frame = match incoming.pop() {
            Popped::Frame(frame) => frame,
            Popped::Closed => break,
        };

        codec::decode_into(&frame, &mut pcm);
        output.write(&pcm)?;
        frames_played.fetch_add(1, Ordering::Relaxed);
    }

    Ok(())
}
