//! Named worker threads that can be joined with a deadline
//!
//! `std::thread::JoinHandle::join` has no timeout. Each worker owns the
//! sending half of a channel that disconnects when its closure returns or
//! unwinds; waiting on the receiving half gives a bounded join.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How a bounded join ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    Panicked,
    /// Still running after the deadline; the thread was detached
    TimedOut,
}

/// A spawned, named thread
pub struct Worker {
    name: String,
    handle: Option<JoinHandle<()>>,
    done_rx: Receiver<()>,
}

impl Worker {
    /// Spawn `f` on a new thread called `name`
    pub fn spawn<F>(name: impl Into<String>, f: F) -> io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        let (done_tx, done_rx) = bounded::<()>(1);

        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            let _done = done_tx;
            f();
        })?;

        Ok(Self {
            name,
            handle: Some(handle),
            done_rx,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the thread's closure has returned
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Wait up to `timeout` for the thread to exit
    pub fn join_timeout(mut self, timeout: Duration) -> JoinOutcome {
        let Some(handle) = self.handle.take() else {
            return JoinOutcome::Joined;
        };

        match self.done_rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(worker = %self.name, ?timeout, "Worker did not stop in time, detaching");
                JoinOutcome::TimedOut
            }
            _ => match handle.join() {
                Ok(()) => JoinOutcome::Joined,
                Err(_) => {
                    tracing::error!(worker = %self.name, "Worker panicked");
                    JoinOutcome::Panicked
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_join_finished_worker() {
        let worker = Worker::spawn("quick", || {}).unwrap();
        assert_eq!(worker.name(), "quick");
        assert_eq!(worker.join_timeout(Duration::from_secs(1)), JoinOutcome::Joined);
    }

    #[test]
    fn test_join_times_out() {
        let release = Arc::new(AtomicBool::new(false));
        let worker = {
            let release = release.clone();
            Worker::spawn("stuck", move || {
                while !release.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(5));
                }
            })
            .unwrap()
        };

        assert!(!worker.is_finished());
        assert_eq!(worker.join_timeout(Duration::from_millis(30)), JoinOutcome::TimedOut);
        release.store(true, Ordering::SeqCst);
    }

    #[test]
    fn test_join_panicked() {
        let worker = Worker::spawn("boom", || panic!("boom")).unwrap();
        assert_eq!(worker.join_timeout(Duration::from_secs(1)), JoinOutcome::Panicked);
    }

    #[test]
    fn test_is_finished() {
        let worker = Worker::spawn("done", || {}).unwrap();
        let start = std::time::Instant::now();
        while !worker.is_finished() && start.elapsed() < Duration::from_secs(1) {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(worker.is_finished());
    }
}
