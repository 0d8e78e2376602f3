//! Bounded blocking channel with explicit stop semantics
//!
//! [`BoundedChannel`] is a fixed-capacity FIFO shared by reference (`Arc`) between
//! one sender and one receiver. It serves both as the router's shared free pool
//! and as each consumer's delivery queue.
//!
//! Stopping is cooperative: [`BoundedChannel::request_stop`] wakes every blocked
//! caller. Senders then fail immediately and get their item back; receivers drain
//! whatever is still queued before reporting [`ChannelError::Stopped`].
//!
//! ```rust
//! use ilm_router::channel::{BoundedChannel, ChannelError};
//!
//! let channel = BoundedChannel::new(2);
//! channel.send(1).unwrap();
//! channel.send(2).unwrap();
//! channel.request_stop();
//!
//! assert!(channel.send(3).is_err());
//! assert_eq!(channel.receive(), Ok(1));
//! assert_eq!(channel.receive(), Ok(2));
//! assert_eq!(channel.receive(), Err(ChannelError::Stopped));
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::trace;

/// Receive-side failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel was stopped and nothing is left to drain.
    #[error("channel stopped")]
    Stopped,

    /// No item arrived before the deadline.
    #[error("timed out waiting for an item")]
    Timeout,
}

/// A send that failed because the channel was stopped. Carries the item back.
#[derive(Error, PartialEq, Eq)]
#[error("channel stopped")]
pub struct SendError<T>(pub T);

impl<T> SendError<T> {
    /// Recover the item that could not be sent.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SendError(..)")
    }
}

struct State<T> {
    items: VecDeque<T>,
    stopped: bool,
}

/// Fixed-capacity blocking FIFO.
pub struct BoundedChannel<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> BoundedChannel<T> {
    /// Create a channel holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "channel capacity must be greater than 0");
        Self {
            state: Mutex::new(State { items: VecDeque::with_capacity(capacity), stopped: false }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        // The state stays consistent across a panicking holder: every mutation is a
        // single push/pop or flag store.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until there is room, then enqueue `item`.
    ///
    /// Fails immediately once the channel is stopped, returning the item.
    pub fn send(&self, item: T) -> Result<(), SendError<T>> {
        let mut state = self.lock();
        loop {
            if state.stopped {
                return Err(SendError(item));
            }
            if state.items.len() < self.capacity {
                break;
            }
            state = self.not_full.wait(state).unwrap_or_else(PoisonError::into_inner);
        }

        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Enqueue without blocking. Hands the item back if the channel is full or stopped.
    pub fn try_send(&self, item: T) -> Result<(), SendError<T>> {
        let mut state = self.lock();
        if state.stopped || state.items.len() >= self.capacity {
            return Err(SendError(item));
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Block until an item is available.
    ///
    /// After a stop, queued items are still returned in order; `Stopped` is
    /// reported only once the queue is empty.
    pub fn receive(&self) -> Result<T, ChannelError> {
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Ok(item);
            }
            if state.stopped {
                return Err(ChannelError::Stopped);
            }
            state = self.not_empty.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`receive`](Self::receive), giving up after `timeout`.
    pub fn receive_timeout(&self, timeout: Duration) -> Result<T, ChannelError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Ok(item);
            }
            if state.stopped {
                return Err(ChannelError::Stopped);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ChannelError::Timeout);
            }
            state = self
                .not_empty
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Take an item if one is queued.
    ///
    /// Returns `Ok(None)` when empty and still running.
    pub fn try_receive(&self) -> Result<Option<T>, ChannelError> {
        let mut state = self.lock();
        match state.items.pop_front() {
            Some(item) => {
                drop(state);
                self.not_full.notify_one();
                Ok(Some(item))
            }
            None if state.stopped => Err(ChannelError::Stopped),
            None => Ok(None),
        }
    }

    /// Stop the channel and wake every blocked sender and receiver. Idempotent.
    pub fn request_stop(&self) {
        let mut state = self.lock();
        if !state.stopped {
            state.stopped = true;
            trace!(queued = state.items.len(), capacity = self.capacity, "Channel stop requested");
        }
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> fmt::Debug for BoundedChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("BoundedChannel")
            .field("len", &state.items.len())
            .field("capacity", &self.capacity)
            .field("stopped", &state.stopped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn fifo_order_single_thread() {
        let channel = BoundedChannel::new(3);
        for i in 0..3 {
            channel.send(i).unwrap();
        }
        assert_eq!(channel.len(), 3);
        assert_eq!(channel.try_send(9), Err(SendError(9)));
        for i in 0..3 {
            assert_eq!(channel.receive(), Ok(i));
        }
        assert_eq!(channel.try_receive(), Ok(None));
    }

    #[test]
    #[should_panic(expected = "capacity")]
    fn zero_capacity_is_rejected() {
        let _ = BoundedChannel::<u8>::new(0);
    }

    #[test]
    fn fifo_order_across_threads() {
        let channel = Arc::new(BoundedChannel::new(2));
        let sender = Arc::clone(&channel);
        let handle = thread::spawn(move || {
            for i in 0..1000u32 {
                sender.send(i).unwrap();
            }
            sender.request_stop();
        });

        let mut received = Vec::new();
        while let Ok(item) = channel.receive() {
            received.push(item);
        }
        handle.join().unwrap();

        assert_eq!(received, (0..1000).collect::<Vec<_>>());
    }

    #[test]
    fn full_channel_blocks_sender_until_receive() {
        let channel = Arc::new(BoundedChannel::new(1));
        channel.send(1).unwrap();

        let sent = Arc::new(AtomicBool::new(false));
        let (sender, flag) = (Arc::clone(&channel), Arc::clone(&sent));
        let handle = thread::spawn(move || {
            sender.send(2).unwrap();
            flag.store(true, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!sent.load(Ordering::SeqCst));

        assert_eq!(channel.receive(), Ok(1));
        handle.join().unwrap();
        assert!(sent.load(Ordering::SeqCst));
        assert_eq!(channel.receive(), Ok(2));
    }

    #[test]
    fn stop_wakes_blocked_receiver() {
        let channel = Arc::new(BoundedChannel::<u32>::new(1));
        let receiver = Arc::clone(&channel);
        let handle = thread::spawn(move || receiver.receive());

        thread::sleep(Duration::from_millis(20));
        channel.request_stop();

        assert_eq!(handle.join().unwrap(), Err(ChannelError::Stopped));
    }

    #[test]
    fn stop_wakes_blocked_sender_and_returns_item() {
        let channel = Arc::new(BoundedChannel::new(1));
        channel.send(String::from("queued")).unwrap();

        let sender = Arc::clone(&channel);
        let handle = thread::spawn(move || sender.send(String::from("blocked")));

        thread::sleep(Duration::from_millis(20));
        channel.request_stop();

        let err = handle.join().unwrap().unwrap_err();
        assert_eq!(err.into_inner(), "blocked");
        assert_eq!(channel.receive().as_deref(), Ok("queued"));
        assert_eq!(channel.receive(), Err(ChannelError::Stopped));
    }

    #[test]
    fn request_stop_is_idempotent() {
        let channel = BoundedChannel::<u8>::new(1);
        channel.request_stop();
        channel.request_stop();
        assert!(channel.is_stopped());
        assert_eq!(channel.try_receive(), Err(ChannelError::Stopped));
    }

    #[test]
    fn receive_timeout_expires() {
        let channel = BoundedChannel::<u8>::new(1);
        let start = Instant::now();
        assert_eq!(channel.receive_timeout(Duration::from_millis(30)), Err(ChannelError::Timeout));
        assert!(start.elapsed() >= Duration::from_millis(30));

        channel.send(4).unwrap();
        assert_eq!(channel.receive_timeout(Duration::from_millis(30)), Ok(4));
    }
}
