//! Scripted in-memory audio backend for tests

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::audio::device::{AudioBackend, DeviceInfo, InputStream, OutputStream, StreamSpec};
use crate::error::DeviceError;

/// What the input does once its scripted frames run out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterScript {
    /// Keep producing paced silence
    Silence,
    /// Fail the next read
    Fail,
}

pub struct ScriptedBackend {
    input: Arc<Mutex<VecDeque<Vec<i16>>>>,
    after_script: AfterScript,
    fail_input_open: bool,
    fail_output_open: bool,
    fail_write_after: Option<usize>,
    written_tx: Sender<Vec<i16>>,
    written_rx: Receiver<Vec<i16>>,
    open_streams: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        let (written_tx, written_rx) = unbounded();
        Self {
            input: Arc::new(Mutex::new(VecDeque::new())),
            after_script: AfterScript::Silence,
            fail_input_open: false,
            fail_output_open: false,
            fail_write_after: None,
            written_tx,
            written_rx,
            open_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_input(self, frames: Vec<Vec<i16>>) -> Self {
        self.input.lock().extend(frames);
        self
    }

    pub fn after_script(mut self, after: AfterScript) -> Self {
        self.after_script = after;
        self
    }

    pub fn failing_input_open(mut self) -> Self {
        self.fail_input_open = true;
        self
    }

    pub fn failing_output_open(mut self) -> Self {
        self.fail_output_open = true;
        self
    }

    pub fn failing_write_after(mut self, writes: usize) -> Self {
        self.fail_write_after = Some(writes);
        self
    }

    /// Frames written to the output device, in order
    pub fn written(&self) -> Receiver<Vec<i16>> {
        self.written_rx.clone()
    }

    /// Streams opened and not yet dropped
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }
}

struct StreamGuard(Arc<AtomicUsize>);

impl StreamGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ScriptedInput {
    frames: Arc<Mutex<VecDeque<Vec<i16>>>>,
    after_script: AfterScript,
    _guard: StreamGuard,
}

impl InputStream for ScriptedInput {
    fn read(&mut self, frame: &mut [i16]) -> Result<(), DeviceError> {
        let next = self.frames.lock().pop_front();
        match next {
            Some(samples) => {
                frame.fill(0);
                for (dst, src) in frame.iter_mut().zip(samples) {
                    *dst = src;
                }
                Ok(())
            }
            None => match self.after_script {
                AfterScript::Silence => {
                    thread::sleep(Duration::from_millis(5));
                    frame.fill(0);
                    Ok(())
                }
                AfterScript::Fail => Err(DeviceError::StreamFailed("scripted read failure".into())),
            },
        }
    }
}

struct ScriptedOutput {
    written: Sender<Vec<i16>>,
    remaining: Option<usize>,
    _guard: StreamGuard,
}

impl OutputStream for ScriptedOutput {
    fn write(&mut self, frame: &[i16]) -> Result<(), DeviceError> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return Err(DeviceError::StreamFailed("scripted write failure".into()));
            }
            *remaining -= 1;
        }
        let _ = self.written.send(frame.to_vec());
        Ok(())
    }
}

impl AudioBackend for ScriptedBackend {
    fn devices(&self) -> Vec<DeviceInfo> {
        vec![DeviceInfo {
            index: 0,
            name: "Scripted".into(),
            max_input_channels: 1,
            max_output_channels: 1,
            is_default_input: true,
            is_default_output: true,
        }]
    }

    fn open_input(
        &self,
        _device: Option<usize>,
        _spec: &StreamSpec,
    ) -> Result<Box<dyn InputStream>, DeviceError> {
        if self.fail_input_open {
            return Err(DeviceError::OpenFailed("scripted input open failure".into()));
        }
        Ok(Box::new(ScriptedInput {
            frames: self.input.clone(),
            after_script: self.after_script,
            _guard: StreamGuard::new(&self.open_streams),
        }))
    }

    fn open_output(
        &self,
        _device: Option<usize>,
        _spec: &StreamSpec,
    ) -> Result<Box<dyn OutputStream>, DeviceError> {
        if self.fail_output_open {
            return Err(DeviceError::OpenFailed("scripted output open failure".into()));
        }
        Ok(Box::new(ScriptedOutput {
            written: self.written_tx.clone(),
            remaining: self.fail_write_after,
            _guard: StreamGuard::new(&self.open_streams),
        }))
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}
