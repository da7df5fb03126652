//! Status events for the system event dispatcher.
//!
//! The hub reports driver lifecycle changes to an external dispatcher
//! through a bounded queue it does not own. Sending is best-effort and never
//! blocks a worker. After [`DROP_FLUSH_THRESHOLD`] consecutive drops the hub
//! asks the dispatcher to flush its queue; what a flush does is the
//! dispatcher's policy.

use alloc::boxed::Box;
use core::sync::atomic::{AtomicU32, Ordering};

/// Consecutive drops that trigger a flush request.
pub const DROP_FLUSH_THRESHOLD: u32 = 3;

/// Event codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum StatusCode {
    /// Driver registered, workers started.
    Registered = 1,
    /// Handshake completed, access granted.
    Connected = 2,
    /// Handshake attempt got no reply in time.
    HandshakeTimeout = 3,
    /// Data-phase read failed or returned a partial frame.
    ReceiveError = 4,
    /// Workers stopped.
    Deactivated = 5,
    /// Record returned to the pool.
    Unregistered = 6,
}

impl StatusCode {
    /// Convert from raw u8 value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(StatusCode::Registered),
            2 => Some(StatusCode::Connected),
            3 => Some(StatusCode::HandshakeTimeout),
            4 => Some(StatusCode::ReceiveError),
            5 => Some(StatusCode::Deactivated),
            6 => Some(StatusCode::Unregistered),
            _ => None,
        }
    }
}

/// One event as handed to the dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusEvent {
    pub code: StatusCode,
    /// Slot of the driver concerned.
    pub slot: u8,
    /// Code-specific detail (e.g. channel id).
    pub data: u32,
}

/// Dispatcher-side queue.
pub trait StatusSink: Send + Sync {
    /// Enqueue without blocking. `false` if the queue is full.
    fn try_send(&self, event: StatusEvent) -> bool;

    /// Discard whatever the queue holds.
    fn flush(&self);
}

/// Sink that accepts and discards everything.
pub struct NullSink;

impl StatusSink for NullSink {
    fn try_send(&self, _event: StatusEvent) -> bool {
        true
    }

    fn flush(&self) {}
}

/// Best-effort sender with the drop/flush policy.
pub struct StatusEmitter {
    sink: Box<dyn StatusSink>,
    /// Drops since the last successful send or flush.
    consecutive_drops: AtomicU32,
    /// Total drops since boot (never cleared).
    dropped: AtomicU32,
    /// Total events accepted.
    sent: AtomicU32,
    /// Flush requests issued.
    flushes: AtomicU32,
}

impl StatusEmitter {
    pub fn new(sink: Box<dyn StatusSink>) -> Self {
        Self {
            sink,
            consecutive_drops: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
            sent: AtomicU32::new(0),
            flushes: AtomicU32::new(0),
        }
    }

    /// Send an event. Returns `false` if it was dropped.
    pub fn emit(&self, code: StatusCode, slot: u8, data: u32) -> bool {
        if self.sink.try_send(StatusEvent { code, slot, data }) {
            self.consecutive_drops.store(0, Ordering::Relaxed);
            self.sent.fetch_add(1, Ordering::Relaxed);
            return true;
        }

        self.dropped.fetch_add(1, Ordering::Relaxed);
        let drops = self.consecutive_drops.fetch_add(1, Ordering::AcqRel) + 1;
        if drops >= DROP_FLUSH_THRESHOLD {
            self.consecutive_drops.store(0, Ordering::Relaxed);
            self.flushes.fetch_add(1, Ordering::Relaxed);
            self.sink.flush();
        }
        false
    }

    /// Get a snapshot of the emitter counters.
    pub fn snapshot(&self) -> EmitterStats {
        EmitterStats {
            sent: self.sent.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
        }
    }
}

impl Default for StatusEmitter {
    fn default() -> Self {
        Self::new(Box::new(NullSink))
    }
}

/// Emitter counters at a point in time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EmitterStats {
    pub sent: u32,
    pub dropped: u32,
    pub flushes: u32,
}
