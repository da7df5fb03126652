//! Driver hub: registry, lifecycle and accessors.
//!
//! The hub owns the process-wide resources (record pool, slot bitmap,
//! registry list, channel claims, status emitter) and is shared with every
//! worker through an `Arc`. There is no global state: whoever builds the
//! hub at startup passes it to whoever needs it.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::cell::Cell;

use critical_section::Mutex;

use super::{processor, reader, Driver, DriverHandle, DriverRecord, DriverSnapshot, DriverStatus};
use crate::channel::{SerialBus, SerialPort};
use crate::config::{ChannelConfig, DriverName, HubConfig, MAX_DRIVERS};
use crate::error::{HubError, PoolError};
use crate::events::{EmitterStats, StatusCode, StatusEmitter, StatusSink};
use crate::frame::Frame;
use crate::list::IntrusiveList;
use crate::logging::{current_log_stream, LogStream};
use crate::platform::{Platform, TaskRole, TaskSpec};
use crate::pool::{BlockId, MemoryPool, Pinned};
use crate::queue::EMPTY;
use crate::slots::SlotBitmap;
use crate::{hub_debug, hub_error, hub_info, hub_warn};

/// Processor callback. Runs on the processor core once per iteration.
pub type ProcessorFn<P, B> = Box<dyn FnMut(&Driver<'_, P, B>) + Send + 'static>;

pub(crate) type Record<P, B> =
    DriverRecord<<P as Platform>::Task, <B as SerialBus>::Port>;

/// Result of one `for_each` pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ForEachStats {
    pub visited: usize,
    /// Records whose token could not be taken in time.
    pub skipped: usize,
}

/// Channel ids owned by live drivers, one bit each.
struct ChannelClaims {
    mask: Mutex<Cell<u32>>,
}

impl ChannelClaims {
    const fn new() -> Self {
        Self {
            mask: Mutex::new(Cell::new(0)),
        }
    }

    fn claim(&self, port: u8) -> bool {
        let bit = 1u32 << port;
        critical_section::with(|cs| {
            let cell = self.mask.borrow(cs);
            let mask = cell.get();
            if mask & bit != 0 {
                return false;
            }
            cell.set(mask | bit);
            true
        })
    }

    fn release(&self, port: u8) {
        let bit = 1u32 << port;
        critical_section::with(|cs| {
            let cell = self.mask.borrow(cs);
            cell.set(cell.get() & !bit);
        });
    }
}

/// Undoes the slot and channel claims of a failed registration.
struct Reservation<'a> {
    slots: &'a SlotBitmap<MAX_DRIVERS>,
    channels: &'a ChannelClaims,
    slot: u8,
    port: u8,
    armed: bool,
}

impl Reservation<'_> {
    fn commit(mut self) {
        self.armed = false;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.slots.release(self.slot);
            self.channels.release(self.port);
        }
    }
}

/// Registry and lifecycle owner for all serial drivers.
pub struct DriverHub<P: Platform, B: SerialBus> {
    platform: P,
    bus: B,
    config: HubConfig,
    pool: MemoryPool<Record<P, B>>,
    slots: SlotBitmap<MAX_DRIVERS>,
    channels: ChannelClaims,
    list: IntrusiveList,
    events: StatusEmitter,
}

impl<P: Platform, B: SerialBus> DriverHub<P, B> {
    /// Build a hub that reports status events nowhere.
    pub fn new(platform: P, bus: B, config: HubConfig) -> Result<Arc<Self>, PoolError> {
        Self::with_events(platform, bus, config, StatusEmitter::default())
    }

    /// Build a hub reporting status events to `sink`.
    pub fn with_sink(
        platform: P,
        bus: B,
        config: HubConfig,
        sink: Box<dyn StatusSink>,
    ) -> Result<Arc<Self>, PoolError> {
        Self::with_events(platform, bus, config, StatusEmitter::new(sink))
    }

    fn with_events(
        platform: P,
        bus: B,
        config: HubConfig,
        events: StatusEmitter,
    ) -> Result<Arc<Self>, PoolError> {
        Ok(Arc::new(Self {
            platform,
            bus,
            config,
            pool: MemoryPool::new(MAX_DRIVERS)?,
            slots: SlotBitmap::new(),
            channels: ChannelClaims::new(),
            list: IntrusiveList::new(),
            events,
        }))
    }

    // ========================================================================
    // Accessors for workers and diagnostics
    // ========================================================================

    #[inline]
    pub fn platform(&self) -> &P {
        &self.platform
    }

    #[inline]
    pub fn bus(&self) -> &B {
        &self.bus
    }

    #[inline]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Number of registered drivers.
    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Pool blocks in use and total.
    pub fn pool_usage(&self) -> (usize, usize) {
        (self.pool.in_use(), self.pool.capacity())
    }

    /// Occupied-slot bitmask.
    pub fn slot_mask(&self) -> u32 {
        self.slots.mask()
    }

    /// Status event counters.
    pub fn event_stats(&self) -> EmitterStats {
        self.events.snapshot()
    }

    pub(crate) fn record(&self, handle: DriverHandle) -> Option<Pinned<'_, Record<P, B>>> {
        self.pool.pin(handle.block())
    }

    pub(crate) fn emit(&self, code: StatusCode, slot: u8, data: u32) {
        self.events.emit(code, slot, data);
    }

    /// Log stream for the calling core.
    pub(crate) fn log(&self) -> &'static LogStream {
        current_log_stream(self.platform.current_core())
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register a driver on `config.port` and start its workers.
    ///
    /// Every failure leaves the hub exactly as it was: slot, channel claim,
    /// port and pool block are all released again. The one exception is
    /// [`HubError::WorkerStuck`]: the record stays registered, inactive, and
    /// is cleaned up by a later `deactivate` + `unregister` (or `shutdown`)
    /// once its reader has exited.
    pub fn register(
        self: &Arc<Self>,
        name: &str,
        config: ChannelConfig,
        callback: Option<ProcessorFn<P, B>>,
    ) -> Result<DriverHandle, HubError> {
        let log = self.log();
        let now = self.platform.now_us();

        let callback = callback.ok_or(HubError::InvalidCallback)?;
        if config.port >= self.bus.port_count() || config.port >= 32 {
            return Err(HubError::InvalidChannel);
        }
        if config.secret == EMPTY || config.secret == self.config.request_marker {
            return Err(HubError::InvalidSecret);
        }
        if !self.channels.claim(config.port) {
            return Err(HubError::ChannelInUse);
        }
        let Some(slot) = self.slots.find_and_occupy() else {
            self.channels.release(config.port);
            hub_warn!(log, now, "register {}: no free slot", name);
            return Err(HubError::CapacityExceeded);
        };
        let reservation = Reservation {
            slots: &self.slots,
            channels: &self.channels,
            slot,
            port: config.port,
            armed: true,
        };

        let port = self.bus.open(&config).map_err(|e| {
            hub_error!(log, now, "register {}: port {} {}", name, config.port, e);
            HubError::ChannelOpenFailed
        })?;

        let record = DriverRecord::new(truncate_name(name), config, slot, port);
        let block = self.pool.alloc(record).ok_or(HubError::AllocationFailed)?;
        let handle = DriverHandle::new(block, slot);

        if let Err(e) = self.start_workers(handle, callback) {
            hub_error!(log, now, "register {}: {}", name, e);
            if e == HubError::WorkerStuck {
                // The reader still runs on the record. Keep it on the list so
                // `handles`, `deactivate` and `shutdown` can reach it later.
                self.list.push_back(&self.pool, block);
                reservation.commit();
            } else {
                self.reclaim(block);
            }
            return Err(e);
        }

        self.list.push_back(&self.pool, block);
        reservation.commit();

        self.emit(StatusCode::Registered, slot, u32::from(config.port));
        hub_info!(
            log,
            self.platform.now_us(),
            "{} registered: slot {} port {} baud {}",
            name,
            slot,
            config.port,
            config.baud
        );
        Ok(handle)
    }

    fn start_workers(
        self: &Arc<Self>,
        handle: DriverHandle,
        callback: ProcessorFn<P, B>,
    ) -> Result<(), HubError> {
        let record = self.record(handle).ok_or(HubError::StaleHandle)?;
        let slot = handle.slot();
        record.set_active(true);

        let spec = TaskSpec {
            role: TaskRole::Reader,
            name: record.name.as_str(),
            core: self.config.reader_core,
            priority: self.config.reader_priority(slot),
            stack_size: self.config.stack_size,
        };
        let hub = Arc::clone(self);
        record.worker_starting();
        let reader = match self
            .platform
            .spawn(spec, Box::new(move || reader::run(&hub, handle)))
        {
            Ok(task) => task,
            Err(_) => {
                record.worker_exited();
                record.set_active(false);
                return Err(HubError::SpawnFailed);
            }
        };

        let spec = TaskSpec {
            role: TaskRole::Processor,
            name: record.name.as_str(),
            core: self.config.processor_core,
            priority: self.config.processor_priority(slot),
            stack_size: self.config.stack_size,
        };
        let hub = Arc::clone(self);
        record.worker_starting();
        let processor = match self
            .platform
            .spawn(spec, Box::new(move || processor::run(&hub, handle, callback)))
        {
            Ok(task) => task,
            Err(_) => {
                record.worker_exited();
                record.set_active(false);
                // Reader is already running; it must be gone before the
                // block can be reclaimed.
                record.state.acquire(&self.platform).reader = Some(reader);
                self.wait_for_exit(&record)?;
                let reader = record.state.acquire(&self.platform).reader.take();
                if let Some(task) = reader {
                    self.platform.reap(task);
                }
                return Err(HubError::SpawnFailed);
            }
        };

        let mut state = record.state.acquire(&self.platform);
        state.reader = Some(reader);
        state.processor = Some(processor);
        Ok(())
    }

    /// Free a block that is off the list and has no workers.
    fn reclaim(&self, block: BlockId) -> bool {
        loop {
            match self.pool.free(block) {
                Ok(_) => return true,
                // An exiting worker still holds its pin for a moment.
                Err(PoolError::Busy) => self.platform.delay_ms(1),
                Err(_) => return false,
            }
        }
    }

    /// Remove a deactivated driver and release its slot, channel and block.
    pub fn unregister(&self, handle: DriverHandle) -> Result<(), HubError> {
        let record = self.record(handle).ok_or(HubError::StaleHandle)?;
        if record.is_active() || record.live_workers() != 0 {
            return Err(HubError::StillActive);
        }
        let port = record.config.port;
        let name = record.name.clone();
        drop(record);

        if !self.list.remove(&self.pool, handle.block()) {
            return Err(HubError::StaleHandle);
        }
        if !self.reclaim(handle.block()) {
            return Err(HubError::StaleHandle);
        }
        self.slots.release(handle.slot());
        self.channels.release(port);

        self.emit(StatusCode::Unregistered, handle.slot(), u32::from(port));
        hub_info!(self.log(), self.platform.now_us(), "{} unregistered", name);
        Ok(())
    }

    // ========================================================================
    // Deactivation
    // ========================================================================

    /// Stop both workers and wait until they have exited.
    ///
    /// On return no worker touches the record any more, the worker handles
    /// are released and the status is back to `NotConnected`. Queued values
    /// are kept. Deactivating an inactive driver is a no-op.
    pub fn deactivate(&self, handle: DriverHandle) -> Result<(), HubError> {
        let record = self.record(handle).ok_or(HubError::StaleHandle)?;
        let was_active = record.stop();
        if !was_active
            && record.live_workers() == 0
            && !record.state.acquire(&self.platform).has_tasks()
        {
            return Ok(());
        }

        self.wait_for_exit(&record)?;

        let (reader, processor) = {
            let mut state = record.state.acquire(&self.platform);
            state.reset();
            (state.reader.take(), state.processor.take())
        };
        if let Some(task) = reader {
            self.platform.reap(task);
        }
        if let Some(task) = processor {
            self.platform.reap(task);
        }

        self.emit(StatusCode::Deactivated, handle.slot(), u32::from(record.config.port));
        hub_info!(self.log(), self.platform.now_us(), "{} deactivated", record.name);
        Ok(())
    }

    /// Wait in scheduling quanta until the record has no live worker.
    fn wait_for_exit(&self, record: &Record<P, B>) -> Result<(), HubError> {
        let quantum = self.config.quantum_ms.max(1);
        let mut waited = 0u32;
        loop {
            self.platform.delay_ms(quantum);
            if record.live_workers() == 0 {
                return Ok(());
            }
            waited = waited.saturating_add(quantum);
            if waited >= self.config.stop_timeout_ms {
                hub_error!(
                    self.log(),
                    self.platform.now_us(),
                    "{}: {} worker(s) still running",
                    record.name,
                    record.live_workers()
                );
                return Err(HubError::WorkerStuck);
            }
        }
    }

    /// Deactivate and unregister every driver.
    ///
    /// Keeps going after a failure; returns the first error seen.
    pub fn shutdown(&self) -> Result<(), HubError> {
        let ids: heapless::Vec<BlockId, MAX_DRIVERS> = self.list.snapshot(&self.pool);
        let mut first_error = None;
        for block in ids {
            let Some(slot) = self.pool.pin(block).map(|r| r.slot) else {
                continue;
            };
            let handle = DriverHandle::new(block, slot);
            let result = self
                .deactivate(handle)
                .and_then(|_| self.unregister(handle));
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // ========================================================================
    // Iteration
    // ========================================================================

    /// Visit every registered driver, head to tail.
    ///
    /// Each record's token is taken with a bounded wait; a record that stays
    /// busy is skipped and logged. Drivers registered after the pass started
    /// may not be seen.
    pub fn for_each<F>(&self, mut visitor: F) -> ForEachStats
    where
        F: FnMut(&DriverSnapshot),
    {
        let ids: heapless::Vec<BlockId, MAX_DRIVERS> = self.list.snapshot(&self.pool);
        let mut stats = ForEachStats::default();

        for block in ids {
            let Some(record) = self.pool.pin(block) else {
                continue;
            };
            let handle = DriverHandle::new(block, record.slot);
            let snapshot = match record
                .state
                .acquire_within(&self.platform, self.config.token_wait_ms)
            {
                Some(state) => DriverSnapshot::capture(handle, &record, &state),
                None => {
                    hub_warn!(
                        self.log(),
                        self.platform.now_us(),
                        "for_each: {} busy, skipped",
                        record.name
                    );
                    stats.skipped += 1;
                    continue;
                }
            };
            visitor(&snapshot);
            stats.visited += 1;
        }

        stats
    }

    /// Handles of all registered drivers, head to tail.
    pub fn handles(&self) -> heapless::Vec<DriverHandle, MAX_DRIVERS> {
        let ids: heapless::Vec<BlockId, MAX_DRIVERS> = self.list.snapshot(&self.pool);
        ids.iter()
            .filter_map(|&block| {
                self.pool
                    .pin(block)
                    .map(|record| DriverHandle::new(block, record.slot))
            })
            .collect()
    }

    // ========================================================================
    // Per-driver accessors
    // ========================================================================

    /// Pop the next received value.
    ///
    /// Returns `0` when the queue is empty, the handshake has not completed
    /// or the handle is stale.
    pub fn get_data(&self, handle: DriverHandle) -> u32 {
        let Some(record) = self.record(handle) else {
            return EMPTY;
        };
        let mut state = record.state.acquire(&self.platform);
        if !state.access_granted {
            return EMPTY;
        }
        state.queue.pop()
    }

    /// Write one framed value to the driver's channel.
    pub fn send_data(&self, handle: DriverHandle, value: u32) -> Result<(), HubError> {
        let record = self.record(handle).ok_or(HubError::StaleHandle)?;
        let state = record.state.acquire(&self.platform);
        if !state.access_granted {
            return Err(HubError::NotConnected);
        }
        record
            .port
            .write(&Frame::new(value).encode())
            .map_err(|e| {
                hub_debug!(self.log(), self.platform.now_us(), "{} send: {}", record.name, e);
                HubError::WriteFailed
            })
    }

    /// Current status, `None` for a stale handle.
    pub fn status(&self, handle: DriverHandle) -> Option<DriverStatus> {
        let record = self.record(handle)?;
        let state = record.state.acquire(&self.platform);
        Some(state.status)
    }

    pub fn is_access_granted(&self, handle: DriverHandle) -> bool {
        self.record(handle)
            .map(|record| record.state.acquire(&self.platform).access_granted)
            .unwrap_or(false)
    }

    /// Full state copy of one driver, `None` for a stale handle.
    pub fn snapshot(&self, handle: DriverHandle) -> Option<DriverSnapshot> {
        let record = self.record(handle)?;
        let state = record.state.acquire(&self.platform);
        Some(DriverSnapshot::capture(handle, &record, &state))
    }

    /// True while the driver's workers are meant to run.
    pub fn is_active(&self, handle: DriverHandle) -> bool {
        self.record(handle).map(|r| r.is_active()).unwrap_or(false)
    }
}

/// Longest prefix of `name` that fits a record, cut on a char boundary.
fn truncate_name(name: &str) -> DriverName {
    let mut out = DriverName::new();
    for c in name.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_NAME_LEN;

    #[test]
    fn test_truncate_name() {
        assert_eq!(truncate_name("uart1").as_str(), "uart1");
        let long = truncate_name("a-driver-name-well-past-the-limit");
        assert_eq!(long.len(), MAX_NAME_LEN);
        // multi-byte char straddling the limit is dropped whole
        let cut = truncate_name("fifteen-chars-xé");
        assert_eq!(cut.as_str(), "fifteen-chars-x");
    }

    #[test]
    fn test_channel_claims() {
        let claims = ChannelClaims::new();
        assert!(claims.claim(3));
        assert!(!claims.claim(3));
        assert!(claims.claim(4));
        claims.release(3);
        assert!(claims.claim(3));
    }

    #[test]
    fn test_for_each_skips_busy_record() {
        use crate::config::ChannelConfig;
        use crate::host::{HostPlatform, LoopbackBus};

        fn idle() -> Option<ProcessorFn<HostPlatform, LoopbackBus>> {
            Some(Box::new(|_: &Driver<'_, HostPlatform, LoopbackBus>| {}))
        }

        let hub =
            DriverHub::new(HostPlatform::new(), LoopbackBus::new(2), HubConfig::fast()).unwrap();
        let held = hub
            .register("held", ChannelConfig::new(0, 1, 2, 0x11), idle())
            .unwrap();
        hub.register("free", ChannelConfig::new(1, 3, 4, 0x22), idle())
            .unwrap();

        let record = hub.record(held).unwrap();
        let guard = record.state.acquire(hub.platform());

        let mut names = std::vec::Vec::new();
        let stats = hub.for_each(|s| names.push(std::string::String::from(s.name.as_str())));
        assert_eq!(stats, ForEachStats { visited: 1, skipped: 1 });
        assert_eq!(names, ["free"]);

        drop(guard);
        drop(record);
        assert_eq!(hub.for_each(|_| {}).visited, 2);

        hub.shutdown().unwrap();
    }
}
