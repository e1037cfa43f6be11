//! Frame types and the thread-safe FIFO shared between pipeline stages
//!
//! Each direction of the link has one `FrameQueue` with a single producer
//! and a single consumer. Consumers that block on `pop` are released by
//! `close`, which enqueues an out-of-band sentinel behind any pending
//! frames.

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::constants::{CHANNELS, FRAME_SIZE, SAMPLE_RATE};

/// One frame of 16-bit mono PCM
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    /// A frame of silence at the link's frame size
    pub fn silence() -> Self {
        Self::new(vec![0; FRAME_SIZE])
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Frame duration in microseconds at the link's sample rate
    pub fn duration_us(&self) -> u64 {
        (self.samples.len() as u64 / CHANNELS as u64 * 1_000_000) / SAMPLE_RATE as u64
    }
}

/// One mu-law encoded frame; exactly one per datagram
pub type EncodedFrame = Bytes;

/// What to discard when a bounded queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued frame to make room
    #[default]
    DropOldest,
    /// Reject the frame being pushed
    DropNewest,
}

/// Outcome of a push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pushed {
    Queued,
    /// Queued, after evicting the oldest frame
    Evicted,
    /// Not queued; the queue was full under `DropNewest`
    Rejected,
}

impl Pushed {
    /// Whether a frame was lost to make this push fit
    pub fn lost_frame(self) -> bool {
        self != Pushed::Queued
    }
}

// First drop is logged, then every this many
const DROP_LOG_EVERY: u64 = 64;

/// Result of a blocking pop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Popped<T> {
    Frame(T),
    /// The sentinel: the consumer should leave its loop
    Closed,
}

enum Slot<T> {
    Frame(T),
    Sentinel,
}

/// Thread-safe FIFO with an optional bound and a shutdown sentinel
pub struct FrameQueue<T> {
    slots: Mutex<VecDeque<Slot<T>>>,
    available: Condvar,
    capacity: Option<usize>,
    policy: OverflowPolicy,
    dropped: AtomicU64,
}

/// Queue of encoded frames shared between two pipeline stages
pub type SharedFrameQueue = Arc<FrameQueue<EncodedFrame>>;

impl<T> FrameQueue<T> {
    /// Create a queue with no capacity limit
    pub fn unbounded() -> Self {
        Self {
            slots: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            capacity: None,
            policy: OverflowPolicy::default(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Create a queue holding at most `capacity` frames
    pub fn bounded(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Condvar::new(),
            capacity: Some(capacity),
            policy,
            dropped: AtomicU64::new(0),
        }
    }

    /// Create from an optional capacity (`None` = unbounded)
    pub fn with_capacity(capacity: Option<usize>, policy: OverflowPolicy) -> Self {
        match capacity {
            Some(cap) => Self::bounded(cap, policy),
            None => Self::unbounded(),
        }
    }

    /// Push a frame, applying the overflow policy if the queue is full
    pub fn push(&self, frame: T) -> Pushed {
        let mut slots = self.slots.lock();
        let mut outcome = Pushed::Queued;

        if let Some(cap) = self.capacity {
            let frames = slots.iter().filter(|s| matches!(s, Slot::Frame(_))).count();
            if frames >= cap {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                match self.policy {
                    OverflowPolicy::DropNewest => return Pushed::Rejected,
                    OverflowPolicy::DropOldest => {
                        if let Some(pos) = slots.iter().position(|s| matches!(s, Slot::Frame(_))) {
                            slots.remove(pos);
                        }
                        outcome = Pushed::Evicted;
                    }
                }
            }
        }

        slots.push_back(Slot::Frame(frame));
        drop(slots);
        self.available.notify_one();
        outcome
    }

    /// Push, and warn about overflow without flooding the log
    pub fn push_logged(&self, frame: T, queue: &'static str) -> Pushed {
        let outcome = self.push(frame);
        if outcome.lost_frame() {
            let dropped = self.dropped();
            if should_log_drop(dropped) {
                tracing::warn!(queue, dropped, ?outcome, "Queue full, frames dropped");
            }
        }
        outcome
    }

    /// Enqueue the shutdown sentinel. Never subject to the bound.
    pub fn close(&self) {
        self.slots.lock().push_back(Slot::Sentinel);
        self.available.notify_all();
    }

    /// Block until a frame or the sentinel is available
    pub fn pop(&self) -> Popped<T> {
        let mut slots = self.slots.lock();
        loop {
            if let Some(slot) = slots.pop_front() {
                return slot.into_popped();
            }
            self.available.wait(&mut slots);
        }
    }

    /// Block for at most `timeout`; `None` if nothing arrived
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Popped<T>> {
        let deadline = Instant::now() + timeout;
        let mut slots = self.slots.lock();
        loop {
            if let Some(slot) = slots.pop_front() {
                return Some(slot.into_popped());
            }
            if self.available.wait_until(&mut slots, deadline).timed_out() {
                return slots.pop_front().map(Slot::into_popped);
            }
        }
    }

    /// Non-blocking pop; `None` if the queue is empty
    pub fn try_pop(&self) -> Option<Popped<T>> {
        self.slots.lock().pop_front().map(Slot::into_popped)
    }

    /// Number of queued entries, sentinels included
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Frame limit, `None` when unbounded
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Frames discarded by the overflow policy
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Discard everything queued, sentinels included
    pub fn clear(&self) {
        self.slots.lock().clear();
    }
}

impl<T> Slot<T> {
    fn into_popped(self) -> Popped<T> {
        match self {
            Slot::Frame(frame) => Popped::Frame(frame),
            Slot::Sentinel => Popped::Closed,
        }
    }
}

impl<T> Default for FrameQueue<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}

fn should_log_drop(total: u64) -> bool {
    total == 1 || total % DROP_LOG_EVERY == 0
}

/// Create a new shared queue of encoded frames
pub fn create_shared_queue(capacity: Option<usize>, policy: OverflowPolicy) -> SharedFrameQueue {
    Arc::new(FrameQueue::with_capacity(capacity, policy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;

    #[test]
    fn test_queue_basic() {
        let queue = FrameQueue::unbounded();

        queue.push(Bytes::from_static(b"one"));
        queue.push(Bytes::from_static(b"two"));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.pop(), Popped::Frame(Bytes::from_static(b"one")));
        assert_eq!(queue.try_pop(), Some(Popped::Frame(Bytes::from_static(b"two"))));
        assert_eq!(queue.try_pop(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_sentinel_after_pending_frames() {
        let queue = FrameQueue::unbounded();
        queue.push(1u32);
        queue.close();
        queue.push(2u32);

        assert_eq!(queue.pop(), Popped::Frame(1));
        assert_eq!(queue.pop(), Popped::Closed);
        assert_eq!(queue.pop(), Popped::Frame(2));
    }

    #[test]
    fn test_close_unblocks_waiting_consumer() {
        let queue = Arc::new(FrameQueue::<Bytes>::unbounded());
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop())
        };

        thread::sleep(Duration::from_millis(50));
        queue.close();

        assert_eq!(consumer.join().unwrap(), Popped::Closed);
    }

    #[test]
    fn test_pop_timeout_empty() {
        let queue = FrameQueue::<u8>::unbounded();
        let start = Instant::now();
        assert_eq!(queue.pop_timeout(Duration::from_millis(20)), None);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_drop_oldest() {
        let queue = FrameQueue::bounded(2, OverflowPolicy::DropOldest);
        assert_eq!(queue.push(1), Pushed::Queued);
        assert_eq!(queue.push(2), Pushed::Queued);
        assert_eq!(queue.push(3), Pushed::Evicted);
        assert!(queue.push(4).lost_frame());

        assert_eq!(queue.dropped(), 2);
        assert_eq!(queue.try_pop(), Some(Popped::Frame(3)));
        assert_eq!(queue.try_pop(), Some(Popped::Frame(4)));
    }

    #[test]
    fn test_push_logged_reports_eviction() {
        let queue = FrameQueue::bounded(1, OverflowPolicy::DropOldest);
        assert_eq!(queue.push_logged(1, "test"), Pushed::Queued);
        assert_eq!(queue.push_logged(2, "test"), Pushed::Evicted);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.try_pop(), Some(Popped::Frame(2)));
    }

    #[test]
    fn test_drop_logging_is_rate_limited() {
        let logged: Vec<u64> = (1..=200).filter(|&n| should_log_drop(n)).collect();
        assert_eq!(logged, vec![1, 64, 128, 192]);
    }

    #[test]
    fn test_drop_newest() {
        let queue = FrameQueue::bounded(2, OverflowPolicy::DropNewest);
        assert_eq!(queue.push(1), Pushed::Queued);
        assert_eq!(queue.push(2), Pushed::Queued);
        assert_eq!(queue.push(3), Pushed::Rejected);

        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.try_pop(), Some(Popped::Frame(1)));
        assert_eq!(queue.try_pop(), Some(Popped::Frame(2)));
    }

    #[test]
    fn test_sentinel_ignores_bound() {
        let queue = FrameQueue::bounded(1, OverflowPolicy::DropNewest);
        queue.push(7);
        queue.close();

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 0);
        assert_eq!(queue.pop(), Popped::Frame(7));
        assert_eq!(queue.pop(), Popped::Closed);
    }

    #[test]
    fn test_clear() {
        let queue = FrameQueue::unbounded();
        queue.push(1);
        queue.close();
        queue.clear();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_frame_duration() {
        assert_eq!(AudioFrame::silence().duration_us(), 128_000);
    }

    proptest! {
        #[test]
        fn fifo_order_across_threads(frames in proptest::collection::vec(any::<u32>(), 0..256)) {
            let queue = Arc::new(FrameQueue::unbounded());
            let producer = {
                let queue = queue.clone();
                let frames = frames.clone();
                thread::spawn(move || {
                    for f in frames {
                        queue.push(f);
                    }
                    queue.close();
                })
            };

            let mut received = Vec::new();
            while let Popped::Frame(f) = queue.pop() {
                received.push(f);
            }
            producer.join().unwrap();

            prop_assert_eq!(received, frames);
        }
    }
}
