//! Host backend: std threads for workers, in-memory serial lines.
//!
//! Lets the whole hub run off-target, for the test suite and for the
//! simulation binary. Cores are simulated: a worker thread records the core
//! it was "pinned" to and reports it back through `current_core`, so the
//! per-core log streams split the same way they do on hardware.

use std::cell::Cell;
use std::collections::VecDeque;
use std::string::String;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use std::vec::Vec;

use crate::channel::{SerialBus, SerialPort};
use crate::config::ChannelConfig;
use crate::error::{ChannelError, SpawnError};
use crate::events::{StatusCode, StatusEvent, StatusSink};
use crate::frame::Frame;
use crate::platform::{Core, Platform, TaskEntry, TaskRole, TaskSpec};

std::thread_local! {
    static CURRENT_CORE: Cell<Core> = const { Cell::new(Core::Core1) };
}

/// Lock ignoring poison; a panicking test thread must not cascade.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ============================================================================
// Platform
// ============================================================================

/// One worker creation, as seen by the scheduler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpawnRecord {
    pub name: String,
    pub role: TaskRole,
    pub core: Core,
    pub priority: u8,
}

struct PlatformInner {
    epoch: Instant,
    spawned: Mutex<Vec<SpawnRecord>>,
    /// Spawns left before failures start; `None` is unlimited.
    spawn_budget: Mutex<Option<usize>>,
    /// Delay before a new worker runs its entry, like a busy scheduler.
    start_delay_ms: Mutex<u32>,
}

/// std-thread scheduler. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct HostPlatform {
    inner: Arc<PlatformInner>,
}

impl HostPlatform {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PlatformInner {
                epoch: Instant::now(),
                spawned: Mutex::new(Vec::new()),
                spawn_budget: Mutex::new(None),
                start_delay_ms: Mutex::new(0),
            }),
        }
    }

    /// Allow `budget` more spawns, then fail every further one.
    pub fn limit_spawns(&self, budget: Option<usize>) {
        *lock(&self.inner.spawn_budget) = budget;
    }

    /// Hold every new worker for `ms` before it starts.
    pub fn delay_starts(&self, ms: u32) {
        *lock(&self.inner.start_delay_ms) = ms;
    }

    /// Every successful spawn so far.
    pub fn spawned(&self) -> Vec<SpawnRecord> {
        lock(&self.inner.spawned).clone()
    }

    /// Run `f` as if on `core`.
    pub fn on_core<R>(core: Core, f: impl FnOnce() -> R) -> R {
        let previous = CURRENT_CORE.with(|c| c.replace(core));
        let result = f();
        CURRENT_CORE.with(|c| c.set(previous));
        result
    }
}

impl Default for HostPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for HostPlatform {
    type Task = JoinHandle<()>;

    fn spawn(&self, spec: TaskSpec<'_>, entry: TaskEntry) -> Result<Self::Task, SpawnError> {
        {
            let mut budget = lock(&self.inner.spawn_budget);
            match budget.as_mut() {
                Some(0) => return Err(SpawnError),
                Some(left) => *left -= 1,
                None => {}
            }
        }

        let core = spec.core;
        let start_delay = *lock(&self.inner.start_delay_ms);
        let handle = thread::Builder::new()
            .name(std::format!("{}-{}", spec.name, spec.role.as_str()))
            .stack_size(spec.stack_size)
            .spawn(move || {
                CURRENT_CORE.with(|c| c.set(core));
                if start_delay > 0 {
                    thread::sleep(Duration::from_millis(u64::from(start_delay)));
                }
                entry();
            })
            .map_err(|_| SpawnError)?;

        lock(&self.inner.spawned).push(SpawnRecord {
            name: String::from(spec.name),
            role: spec.role,
            core: spec.core,
            priority: spec.priority,
        });
        Ok(handle)
    }

    fn reap(&self, task: Self::Task) {
        let _ = task.join();
    }

    fn delay_ms(&self, ms: u32) {
        thread::sleep(Duration::from_millis(u64::from(ms)));
    }

    fn yield_now(&self) {
        thread::yield_now();
    }

    fn now_us(&self) -> i64 {
        self.inner.epoch.elapsed().as_micros() as i64
    }

    fn current_core(&self) -> Core {
        CURRENT_CORE.with(|c| c.get())
    }
}

// ============================================================================
// Loopback serial bus
// ============================================================================

/// Canned reply: when the port writes a frame carrying `request`, a frame
/// carrying `secret` arrives on the same port.
#[derive(Clone, Copy)]
struct AutoReply {
    request: u32,
    secret: u32,
}

#[derive(Default)]
struct LineFlags {
    open: bool,
    fail_open: bool,
    fail_reads: bool,
    fail_writes: bool,
    peer: Option<usize>,
    auto_reply: Option<AutoReply>,
    opened: Option<ChannelConfig>,
}

/// One serial line: inbound bytes plus a transcript of outbound bytes.
#[derive(Default)]
struct Line {
    inbound: Mutex<VecDeque<u8>>,
    arrived: Condvar,
    outbound: Mutex<Vec<u8>>,
    flags: Mutex<LineFlags>,
}

impl Line {
    fn deliver(&self, bytes: &[u8]) {
        lock(&self.inbound).extend(bytes.iter().copied());
        self.arrived.notify_all();
    }
}

struct BusInner {
    lines: Vec<Line>,
}

/// In-memory serial bus. Lines can be cross-linked in pairs, or given a
/// scripted peer that answers handshake requests.
#[derive(Clone)]
pub struct LoopbackBus {
    inner: Arc<BusInner>,
}

impl LoopbackBus {
    pub fn new(port_count: u8) -> Self {
        Self {
            inner: Arc::new(BusInner {
                lines: (0..port_count).map(|_| Line::default()).collect(),
            }),
        }
    }

    fn line(&self, port: u8) -> Option<&Line> {
        self.inner.lines.get(usize::from(port))
    }

    fn with_flags(&self, port: u8, f: impl FnOnce(&mut LineFlags)) {
        if let Some(line) = self.line(port) {
            f(&mut lock(&line.flags));
        }
    }

    /// Cross-connect two lines: what one writes, the other reads.
    pub fn link(&self, a: u8, b: u8) {
        self.with_flags(a, |f| f.peer = Some(usize::from(b)));
        self.with_flags(b, |f| f.peer = Some(usize::from(a)));
    }

    /// Answer every `request` frame written on `port` with `secret`.
    pub fn emulate_peer(&self, port: u8, request: u32, secret: u32) {
        self.with_flags(port, |f| f.auto_reply = Some(AutoReply { request, secret }));
    }

    /// Stop answering handshake requests on `port`.
    pub fn silence_peer(&self, port: u8) {
        self.with_flags(port, |f| f.auto_reply = None);
    }

    /// Bytes arriving on `port` as if sent by the far end.
    pub fn inject(&self, port: u8, bytes: &[u8]) {
        if let Some(line) = self.line(port) {
            line.deliver(bytes);
        }
    }

    /// One framed value arriving on `port`.
    pub fn inject_value(&self, port: u8, value: u32) {
        self.inject(port, &Frame::new(value).encode());
    }

    /// Everything written on `port` so far.
    pub fn outbound(&self, port: u8) -> Vec<u8> {
        self.line(port)
            .map(|line| lock(&line.outbound).clone())
            .unwrap_or_default()
    }

    /// Outbound transcript of `port` split into frames.
    pub fn outbound_frames(&self, port: u8) -> Vec<Frame> {
        self.outbound(port)
            .chunks_exact(crate::frame::FRAME_LEN)
            .filter_map(Frame::decode)
            .collect()
    }

    /// Bytes written on `port` but not yet read by anyone.
    pub fn pending_inbound(&self, port: u8) -> usize {
        self.line(port).map(|line| lock(&line.inbound).len()).unwrap_or(0)
    }

    pub fn is_open(&self, port: u8) -> bool {
        self.line(port).map(|line| lock(&line.flags).open).unwrap_or(false)
    }

    /// Configuration the port was last opened with.
    pub fn opened_with(&self, port: u8) -> Option<ChannelConfig> {
        self.line(port).and_then(|line| lock(&line.flags).opened)
    }

    pub fn fail_open(&self, port: u8, fail: bool) {
        self.with_flags(port, |f| f.fail_open = fail);
    }

    pub fn fail_reads(&self, port: u8, fail: bool) {
        self.with_flags(port, |f| f.fail_reads = fail);
    }

    pub fn fail_writes(&self, port: u8, fail: bool) {
        self.with_flags(port, |f| f.fail_writes = fail);
    }
}

impl SerialBus for LoopbackBus {
    type Port = LoopbackPort;

    fn port_count(&self) -> u8 {
        self.inner.lines.len() as u8
    }

    fn open(&self, config: &ChannelConfig) -> Result<LoopbackPort, ChannelError> {
        let line = self.line(config.port).ok_or(ChannelError::OpenFailed)?;
        let mut flags = lock(&line.flags);
        if flags.fail_open || flags.open {
            return Err(ChannelError::OpenFailed);
        }
        flags.open = true;
        flags.opened = Some(*config);
        Ok(LoopbackPort {
            bus: Arc::clone(&self.inner),
            index: usize::from(config.port),
        })
    }
}

/// Open end of a loopback line. Closes the line on drop.
pub struct LoopbackPort {
    bus: Arc<BusInner>,
    index: usize,
}

impl LoopbackPort {
    fn line(&self) -> &Line {
        &self.bus.lines[self.index]
    }
}

impl SerialPort for LoopbackPort {
    fn read(&self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, ChannelError> {
        let line = self.line();
        if lock(&line.flags).fail_reads {
            return Err(ChannelError::ReadFailed);
        }

        let inbound = lock(&line.inbound);
        let wanted = buf.len();
        let (mut inbound, _) = line
            .arrived
            .wait_timeout_while(
                inbound,
                Duration::from_millis(u64::from(timeout_ms)),
                |q| q.len() < wanted,
            )
            .unwrap_or_else(|e| e.into_inner());

        let n = inbound.len().min(wanted);
        for (slot, byte) in buf.iter_mut().zip(inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&self, bytes: &[u8]) -> Result<(), ChannelError> {
        let line = self.line();
        let (peer, auto_reply) = {
            let flags = lock(&line.flags);
            if flags.fail_writes {
                return Err(ChannelError::WriteFailed);
            }
            (flags.peer, flags.auto_reply)
        };

        lock(&line.outbound).extend_from_slice(bytes);

        if let Some(peer) = peer.and_then(|p| self.bus.lines.get(p)) {
            peer.deliver(bytes);
        }
        if let Some(reply) = auto_reply {
            if Frame::decode(bytes).is_some_and(|f| f.carries(reply.request)) {
                line.deliver(&Frame::new(reply.secret).encode());
            }
        }
        Ok(())
    }
}

impl Drop for LoopbackPort {
    fn drop(&mut self) {
        lock(&self.line().flags).open = false;
    }
}

// ============================================================================
// Event sink
// ============================================================================

struct SinkInner {
    events: Mutex<VecDeque<StatusEvent>>,
    capacity: usize,
    flushes: Mutex<usize>,
}

/// Bounded in-memory event queue, standing in for the system dispatcher.
#[derive(Clone)]
pub struct RecordingSink {
    inner: Arc<SinkInner>,
}

impl RecordingSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                events: Mutex::new(VecDeque::new()),
                capacity,
                flushes: Mutex::new(0),
            }),
        }
    }

    /// Events currently queued, oldest first.
    pub fn events(&self) -> Vec<StatusEvent> {
        lock(&self.inner.events).iter().copied().collect()
    }

    /// Queued events carrying `code`.
    pub fn count(&self, code: StatusCode) -> usize {
        lock(&self.inner.events).iter().filter(|e| e.code == code).count()
    }

    /// Flush requests received.
    pub fn flushes(&self) -> usize {
        *lock(&self.inner.flushes)
    }

    /// Remove and return everything queued.
    pub fn take(&self) -> Vec<StatusEvent> {
        lock(&self.inner.events).drain(..).collect()
    }
}

impl StatusSink for RecordingSink {
    fn try_send(&self, event: StatusEvent) -> bool {
        let mut events = lock(&self.inner.events);
        if events.len() >= self.inner.capacity {
            return false;
        }
        events.push_back(event);
        true
    }

    fn flush(&self) {
        lock(&self.inner.events).clear();
        *lock(&self.inner.flushes) += 1;
    }
}
