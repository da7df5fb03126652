//! Serial drivers: record layout, status, handles and the worker pair.
//!
//! # Architecture
//!
//! ```text
//!              register()
//!                  │
//!   ┌──────────────▼──────────────┐
//!   │ DriverRecord (pool block)   │◀── registry list (intrusive links)
//!   │  immutable: name, config,   │
//!   │             slot, port      │
//!   │  atomics:   active,         │
//!   │             live_workers    │
//!   │  Token<DriverState>:        │
//!   │    status, access_granted,  │
//!   │    queue, worker handles    │
//!   └───────┬──────────────┬──────┘
//!           │              │
//!    Reader (Core 0)   Processor (Core 1)
//!    handshake, then   user callback,
//!    frames → queue    idle delay
//! ```
//!
//! Everything mutable that two workers (or a worker and an API caller) can
//! touch lives behind the record's [`Token`]. The `active` flag is the only
//! cross-worker signal outside it: workers poll it once per iteration and
//! exit when it drops.

mod hub;
mod processor;
mod reader;

pub use hub::{DriverHub, ForEachStats, ProcessorFn};

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::config::{ChannelConfig, DriverName, QUEUE_CAPACITY};
use crate::list::{Linked, Links};
use crate::pool::BlockId;
use crate::queue::BoundedQueue;
use crate::token::Token;

/// Driver connection status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DriverStatus {
    /// Handshake not (yet) completed.
    #[default]
    NotConnected = 0,
    /// Peer presented the secret; access granted.
    Connected = 1,
    /// Reader left the data phase.
    Disconnected = 2,
    /// Channel error during the handshake.
    Error = 3,
    /// Handshake attempt saw no reply.
    TimeOut = 4,
    /// Last data-phase read delivered a frame.
    DataReceived = 5,
    /// Last data-phase read failed or was short.
    DataReceiveError = 6,
}

impl DriverStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotConnected => "NOT_CONNECTED",
            Self::Connected => "CONNECTED",
            Self::Disconnected => "DISCONNECTED",
            Self::Error => "ERROR",
            Self::TimeOut => "TIME_OUT",
            Self::DataReceived => "DATA_RECEIVED",
            Self::DataReceiveError => "DATA_RECEIVE_ERROR",
        }
    }

    /// Statuses in which the handshake has succeeded.
    pub fn is_granted(self) -> bool {
        matches!(
            self,
            Self::Connected | Self::DataReceived | Self::DataReceiveError
        )
    }
}

impl fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-side handle to a registered driver.
///
/// Copyable and cheap; every accessor revalidates it against the pool, so a
/// handle kept past `unregister` is harmless.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DriverHandle {
    block: BlockId,
    slot: u8,
}

impl DriverHandle {
    pub(crate) fn new(block: BlockId, slot: u8) -> Self {
        Self { block, slot }
    }

    /// Slot index the driver was registered under.
    #[inline]
    pub fn slot(&self) -> u8 {
        self.slot
    }

    #[inline]
    pub(crate) fn block(&self) -> BlockId {
        self.block
    }
}

/// Token-guarded part of a record.
pub(crate) struct DriverState<W> {
    pub status: DriverStatus,
    pub access_granted: bool,
    pub queue: BoundedQueue<QUEUE_CAPACITY>,
    pub reader: Option<W>,
    pub processor: Option<W>,
    pub handshake_attempts: u32,
    pub frames_received: u32,
    pub receive_errors: u32,
}

impl<W> DriverState<W> {
    fn new() -> Self {
        Self {
            status: DriverStatus::NotConnected,
            access_granted: false,
            queue: BoundedQueue::new(),
            reader: None,
            processor: None,
            handshake_attempts: 0,
            frames_received: 0,
            receive_errors: 0,
        }
    }

    /// True while worker task handles are still held.
    pub fn has_tasks(&self) -> bool {
        self.reader.is_some() || self.processor.is_some()
    }

    /// Back to the pre-handshake state. The queue is kept.
    pub fn reset(&mut self) {
        self.status = DriverStatus::NotConnected;
        self.access_granted = false;
    }
}

/// One registered driver, stored in a pool block.
///
/// `W` is the scheduler's worker handle, `S` the open serial port.
pub(crate) struct DriverRecord<W, S> {
    pub name: DriverName,
    pub config: ChannelConfig,
    pub slot: u8,
    pub port: S,
    active: AtomicBool,
    live_workers: AtomicU8,
    links: Links,
    pub state: Token<DriverState<W>>,
}

impl<W, S> DriverRecord<W, S> {
    pub fn new(name: DriverName, config: ChannelConfig, slot: u8, port: S) -> Self {
        Self {
            name,
            config,
            slot,
            port,
            active: AtomicBool::new(false),
            live_workers: AtomicU8::new(0),
            links: Links::new(),
            state: Token::new(DriverState::new()),
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    /// Clear `active`, returning the previous value.
    #[inline]
    pub fn stop(&self) -> bool {
        self.active.swap(false, Ordering::AcqRel)
    }

    #[inline]
    pub fn live_workers(&self) -> u8 {
        self.live_workers.load(Ordering::Acquire)
    }

    /// Count a worker about to be spawned.
    #[inline]
    pub fn worker_starting(&self) {
        self.live_workers.fetch_add(1, Ordering::AcqRel);
    }

    /// Undo `worker_starting` after a failed spawn, or mark a worker gone.
    #[inline]
    pub fn worker_exited(&self) {
        self.live_workers.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<W, S> Linked for DriverRecord<W, S> {
    fn links(&self) -> &Links {
        &self.links
    }
}

/// Decrements the live-worker count when a worker entry returns.
pub(crate) struct WorkerExit<'a, W, S> {
    record: &'a DriverRecord<W, S>,
}

impl<'a, W, S> WorkerExit<'a, W, S> {
    pub fn new(record: &'a DriverRecord<W, S>) -> Self {
        Self { record }
    }
}

impl<W, S> Drop for WorkerExit<'_, W, S> {
    fn drop(&mut self) {
        self.record.worker_exited();
    }
}

/// Copy of one driver's observable state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriverSnapshot {
    pub handle: DriverHandle,
    pub name: DriverName,
    pub slot: u8,
    pub port: u8,
    pub baud: u32,
    pub tx_pin: u8,
    pub rx_pin: u8,
    pub active: bool,
    pub status: DriverStatus,
    pub access_granted: bool,
    /// Values waiting in the receive queue.
    pub queued: usize,
    /// Values lost to a full queue or the empty sentinel.
    pub queue_dropped: u32,
    pub handshake_attempts: u32,
    pub frames_received: u32,
    pub receive_errors: u32,
}

impl DriverSnapshot {
    pub(crate) fn capture<W, S>(
        handle: DriverHandle,
        record: &DriverRecord<W, S>,
        state: &DriverState<W>,
    ) -> Self {
        Self {
            handle,
            name: record.name.clone(),
            slot: record.slot,
            port: record.config.port,
            baud: record.config.baud,
            tx_pin: record.config.tx_pin,
            rx_pin: record.config.rx_pin,
            active: record.is_active(),
            status: state.status,
            access_granted: state.access_granted,
            queued: state.queue.len(),
            queue_dropped: state.queue.dropped(),
            handshake_attempts: state.handshake_attempts,
            frames_received: state.frames_received,
            receive_errors: state.receive_errors,
        }
    }
}

/// Driver view handed to the processor callback.
///
/// Wraps the hub and the driver's own handle so the callback can use the
/// same accessors an external caller would.
pub struct Driver<'a, P: crate::Platform, B: crate::SerialBus> {
    hub: &'a DriverHub<P, B>,
    handle: DriverHandle,
}

impl<'a, P: crate::Platform, B: crate::SerialBus> Driver<'a, P, B> {
    pub(crate) fn new(hub: &'a DriverHub<P, B>, handle: DriverHandle) -> Self {
        Self { hub, handle }
    }

    #[inline]
    pub fn handle(&self) -> DriverHandle {
        self.handle
    }

    #[inline]
    pub fn slot(&self) -> u8 {
        self.handle.slot
    }

    /// Registered name. Empty if the driver is already gone.
    pub fn name(&self) -> DriverName {
        self.hub
            .record(self.handle)
            .map(|record| record.name.clone())
            .unwrap_or_default()
    }

    /// Pop the next received value, `0` if none or not connected.
    pub fn get_data(&self) -> u32 {
        self.hub.get_data(self.handle)
    }

    /// Send one value to the peer.
    pub fn send_data(&self, value: u32) -> Result<(), crate::HubError> {
        self.hub.send_data(self.handle, value)
    }

    pub fn status(&self) -> Option<DriverStatus> {
        self.hub.status(self.handle)
    }

    pub fn is_access_granted(&self) -> bool {
        self.hub.is_access_granted(self.handle)
    }

    /// Hub time, for callbacks that pace themselves.
    pub fn now_us(&self) -> i64 {
        self.hub.platform().now_us()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_granted_statuses() {
        assert!(DriverStatus::Connected.is_granted());
        assert!(DriverStatus::DataReceived.is_granted());
        assert!(DriverStatus::DataReceiveError.is_granted());
        assert!(!DriverStatus::NotConnected.is_granted());
        assert!(!DriverStatus::TimeOut.is_granted());
        assert!(!DriverStatus::Error.is_granted());
        assert!(!DriverStatus::Disconnected.is_granted());
    }

    #[test]
    fn test_status_names() {
        assert_eq!(DriverStatus::TimeOut.as_str(), "TIME_OUT");
        assert_eq!(DriverStatus::default(), DriverStatus::NotConnected);
    }

    #[test]
    fn test_worker_exit_guard() {
        let record: DriverRecord<(), ()> =
            DriverRecord::new(DriverName::new(), ChannelConfig::new(0, 1, 2, 7), 0, ());
        record.worker_starting();
        record.worker_starting();
        {
            let _exit = WorkerExit::new(&record);
            assert_eq!(record.live_workers(), 2);
        }
        assert_eq!(record.live_workers(), 1);
    }

    #[test]
    fn test_reset_keeps_queue() {
        let mut state: DriverState<()> = DriverState::new();
        state.status = DriverStatus::DataReceived;
        state.access_granted = true;
        state.queue.push(9);
        state.reset();
        assert_eq!(state.status, DriverStatus::NotConnected);
        assert!(!state.access_granted);
        assert_eq!(state.queue.len(), 1);
    }
}
