//! Bounded single-producer/single-consumer byte ring, standing in for
//! a host RTOS's native stream-buffer primitive. [`StreamBuffer`] owns
//! its own lock and condition variables rather than being a true
//! external black box, since there is no host RTOS present to supply
//! one.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::settings::DirectionSettings;

/// Outcome of a [`StreamBuffer::send`] call.
pub(crate) struct SendOutcome {
    /// Number of bytes actually accepted into the ring.
    pub written: usize,
    /// Whether `bytes_available` crossed from below `trigger_level` to
    /// at or above it as a result of this call.
    pub crossed_trigger: bool,
}

/// A bounded ring of bytes with blocking, timed send/receive.
///
/// One `StreamBuffer` backs a single direction of a pipe. Capacity is
/// fixed at construction and never grows.
pub(crate) struct StreamBuffer {
    capacity: usize,
    trigger_level: usize,
    ring: Mutex<VecDeque<u8>>,
    space_available: Condvar,
    data_available: Condvar,
}

impl StreamBuffer {
    pub(crate) fn new(settings: DirectionSettings) -> Self {
        Self {
            capacity: settings.capacity as usize,
            trigger_level: settings.trigger_level as usize,
            ring: Mutex::new(VecDeque::with_capacity(settings.capacity as usize)),
            space_available: Condvar::new(),
            data_available: Condvar::new(),
        }
    }

    pub(crate) fn trigger_level(&self) -> usize {
        self.trigger_level
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn bytes_available(&self) -> usize {
        self.ring.lock().len()
    }

    pub(crate) fn spaces_available(&self) -> usize {
        self.capacity - self.ring.lock().len()
    }

    /// Append up to `bytes.len()` bytes, blocking up to `timeout` for
    /// at least one byte of space to appear. Returns the number of
    /// bytes actually accepted, which may be 0 if the timeout elapses
    /// first.
    pub(crate) fn send(&self, bytes: &[u8], timeout: Option<Duration>) -> SendOutcome {
        let mut ring = self.ring.lock();
        let deadline = timeout.map(|d| Instant::now() + d);
        while ring.len() == self.capacity {
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    let timed_out = self
                        .space_available
                        .wait_for(&mut ring, deadline - now)
                        .timed_out();
                    if timed_out {
                        break;
                    }
                }
                None => self.space_available.wait(&mut ring),
            }
        }

        let before = ring.len();
        let space = self.capacity - before;
        let to_write = bytes.len().min(space);
        ring.extend(bytes[..to_write].iter().copied());
        let after = ring.len();
        drop(ring);

        if to_write > 0 {
            self.data_available.notify_all();
        }
        SendOutcome {
            written: to_write,
            crossed_trigger: before < self.trigger_level && after >= self.trigger_level,
        }
    }

    /// Drain up to `out.len()` bytes, blocking up to `timeout` until
    /// at least `trigger_level` bytes are available. Returns the
    /// number of bytes actually copied into `out`, which may be less
    /// than `trigger_level` (even 0) if the timeout elapses first.
    pub(crate) fn receive(&self, out: &mut [u8], timeout: Option<Duration>) -> usize {
        let mut ring = self.ring.lock();
        let deadline = timeout.map(|d| Instant::now() + d);
        while ring.len() < self.trigger_level.min(self.capacity) {
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    let timed_out = self
                        .data_available
                        .wait_for(&mut ring, deadline - now)
                        .timed_out();
                    if timed_out {
                        break;
                    }
                }
                None => self.data_available.wait(&mut ring),
            }
        }

        let to_read = out.len().min(ring.len());
        for slot in out.iter_mut().take(to_read) {
            *slot = ring.pop_front().unwrap();
        }
        drop(ring);

        if to_read > 0 {
            self.space_available.notify_all();
        }
        to_read
    }

    /// Copy up to `out.len()` currently-buffered bytes without
    /// removing them. Never blocks.
    pub(crate) fn peek(&self, out: &mut [u8]) -> usize {
        let ring = self.ring.lock();
        let to_copy = out.len().min(ring.len());
        for (slot, byte) in out.iter_mut().zip(ring.iter()).take(to_copy) {
            *slot = *byte;
        }
        to_copy
    }

    /// Drain every byte currently held, in order. Used by the weld
    /// engine to migrate residual data between buffers.
    pub(crate) fn drain_all(&self) -> Vec<u8> {
        let mut ring = self.ring.lock();
        let drained: Vec<u8> = ring.drain(..).collect();
        drop(ring);
        self.space_available.notify_all();
        drained
    }

    /// Append bytes directly at the tail, bypassing the capacity
    /// check. Used only by the weld engine when migrating residual
    /// bytes into a buffer that has just been freshly adopted; the
    /// migration step has no backpressure of its own.
    pub(crate) fn append_unchecked(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut ring = self.ring.lock();
        ring.extend(bytes.iter().copied());
        drop(ring);
        self.data_available.notify_all();
    }
}
