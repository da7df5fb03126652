//! Non-blocking logging for the driver hub.
//!
//! # Architecture
//!
//! ```text
//! Reader / Processor      LogStream            Drain task
//! ──────────────────      ─────────            ──────────
//!
//! hub_info!() ────────▶ [L0][L1][L2] ──────▶ UART / stdout
//! ~100ns                  lock-free           blocking ok
//! non-blocking            ring buffer
//! ```
//!
//! # Rules
//!
//! - Worker loops never call blocking log functions
//! - Workers log through the `hub_*!` macros only
//! - Messages may be dropped if the ring is full; drops are counted
//! - Messages above the stream level are discarded before formatting

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use crate::platform::Core;

/// Maximum message length.
pub const MAX_MSG_LEN: usize = 120;

/// Log buffer size (number of entries).
pub const LOG_BUFFER_SIZE: usize = 256;

/// Log level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    /// Convert from raw u8 value (saturates at Trace).
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => LogLevel::Error,
            1 => LogLevel::Warn,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    /// Convert to string for output.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }
}

/// A single log entry.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct LogEntry {
    /// Timestamp in microseconds.
    pub timestamp_us: i64,
    /// Log level.
    pub level: LogLevel,
    /// Message length.
    pub len: u8,
    /// Message bytes (not null-terminated).
    pub msg: [u8; MAX_MSG_LEN],
}

impl Default for LogEntry {
    fn default() -> Self {
        Self {
            timestamp_us: 0,
            level: LogLevel::Info,
            len: 0,
            msg: [0; MAX_MSG_LEN],
        }
    }
}

/// One ring cell plus its sequence tag.
///
/// `seq` is stored relative to the cell index: `lap` while free for that
/// lap, `lap + 1` once written.
struct LogSlot {
    seq: AtomicU32,
    entry: UnsafeCell<LogEntry>,
}

impl LogSlot {
    const EMPTY: Self = Self {
        seq: AtomicU32::new(0),
        entry: UnsafeCell::new(LogEntry {
            timestamp_us: 0,
            level: LogLevel::Info,
            len: 0,
            msg: [0; MAX_MSG_LEN],
        }),
    };
}

/// Lock-free log stream (multiple producers, single consumer).
///
/// - Producers claim a cell by CAS on `write_idx`, then publish it through
///   the cell sequence, so the drain never sees a half-written entry
/// - Push never blocks; a full ring drops the message and counts it
/// - Drain runs in a separate task at leisure
pub struct LogStream<const N: usize = LOG_BUFFER_SIZE> {
    slots: [LogSlot; N],
    write_idx: AtomicU32,
    read_idx: AtomicU32,
    dropped: AtomicU32,
    level: AtomicU8,
}

// SAFETY: a cell is written only by the producer that won its CAS and read
// only by the single consumer after the Release store of its sequence.
unsafe impl<const N: usize> Sync for LogStream<N> {}
unsafe impl<const N: usize> Send for LogStream<N> {}

impl<const N: usize> LogStream<N> {
    const MASK: u32 = (N - 1) as u32;

    /// Create a new empty log stream.
    pub const fn new() -> Self {
        assert!(N.is_power_of_two() && N >= 2, "Log buffer size must be power of 2");

        Self {
            slots: [LogSlot::EMPTY; N],
            write_idx: AtomicU32::new(0),
            read_idx: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
            level: AtomicU8::new(LogLevel::Info as u8),
        }
    }

    /// Most verbose level still recorded.
    #[inline]
    pub fn level(&self) -> LogLevel {
        LogLevel::from_u8(self.level.load(Ordering::Relaxed))
    }

    /// Change the recorded level.
    #[inline]
    pub fn set_level(&self, level: LogLevel) {
        self.level.store(level as u8, Ordering::Relaxed);
    }

    /// True if `level` passes the stream filter.
    #[inline]
    pub fn enabled(&self, level: LogLevel) -> bool {
        level as u8 <= self.level.load(Ordering::Relaxed)
    }

    /// Push a log entry (never blocks).
    ///
    /// Returns `true` if message was queued, `false` if dropped (ring full).
    pub fn push(&self, timestamp_us: i64, level: LogLevel, msg: &[u8]) -> bool {
        let mut pos = self.write_idx.load(Ordering::Relaxed);

        loop {
            let slot = &self.slots[(pos & Self::MASK) as usize];
            let lap = pos & !Self::MASK;
            let seq = slot.seq.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(lap) as i32;

            if diff == 0 {
                match self.write_idx.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: winning the CAS makes this producer the
                        // only writer of the cell until `seq` is published.
                        unsafe {
                            let entry = &mut *slot.entry.get();
                            entry.timestamp_us = timestamp_us;
                            entry.level = level;
                            entry.len = msg.len().min(MAX_MSG_LEN) as u8;
                            entry.msg[..entry.len as usize]
                                .copy_from_slice(&msg[..entry.len as usize]);
                        }
                        slot.seq.store(lap.wrapping_add(1), Ordering::Release);
                        return true;
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                // Cell still holds last lap's entry: ring full
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return false;
            } else {
                pos = self.write_idx.load(Ordering::Relaxed);
            }
        }
    }

    /// Drain next log entry (single consumer).
    ///
    /// Returns `None` if no entries available.
    pub fn drain(&self) -> Option<LogEntry> {
        let pos = self.read_idx.load(Ordering::Relaxed);
        let slot = &self.slots[(pos & Self::MASK) as usize];
        let lap = pos & !Self::MASK;

        if slot.seq.load(Ordering::Acquire) != lap.wrapping_add(1) {
            return None;
        }

        // SAFETY: the Acquire load above saw the producer's Release.
        let entry = unsafe { *slot.entry.get() };

        slot.seq.store(lap.wrapping_add(N as u32), Ordering::Release);
        self.read_idx.store(pos.wrapping_add(1), Ordering::Release);
        Some(entry)
    }

    /// Get count of dropped messages.
    #[inline]
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Reset dropped counter (e.g., after reporting).
    #[inline]
    pub fn reset_dropped(&self) {
        self.dropped.store(0, Ordering::Relaxed);
    }

    /// Check if the next entry is ready to drain.
    #[inline]
    pub fn has_entries(&self) -> bool {
        let pos = self.read_idx.load(Ordering::Relaxed);
        let slot = &self.slots[(pos & Self::MASK) as usize];
        slot.seq.load(Ordering::Acquire) == (pos & !Self::MASK).wrapping_add(1)
    }

    /// Entries claimed but not yet drained.
    #[inline]
    pub fn pending(&self) -> u32 {
        let read = self.read_idx.load(Ordering::Relaxed);
        let write = self.write_idx.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }
}

impl<const N: usize> Default for LogStream<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a message into a buffer.
///
/// Returns the number of bytes written.
#[inline]
pub fn format_to_buffer(buf: &mut [u8], args: core::fmt::Arguments<'_>) -> usize {
    use core::fmt::Write;

    struct BufWriter<'a> {
        buf: &'a mut [u8],
        pos: usize,
    }

    impl<'a> Write for BufWriter<'a> {
        fn write_str(&mut self, s: &str) -> core::fmt::Result {
            let bytes = s.as_bytes();
            let remaining = self.buf.len() - self.pos;
            let to_write = bytes.len().min(remaining);
            self.buf[self.pos..self.pos + to_write].copy_from_slice(&bytes[..to_write]);
            self.pos += to_write;
            Ok(())
        }
    }

    let mut writer = BufWriter { buf, pos: 0 };
    let _ = core::fmt::write(&mut writer, args);
    writer.pos
}

/// Non-blocking log macro.
///
/// Use this in worker loops instead of println!, ESP_LOGx, etc.
///
/// # Example
///
/// ```ignore
/// hub_log!(LogLevel::Info, stream, timestamp, "driver {} slot {}", name, slot);
/// ```
#[macro_export]
macro_rules! hub_log {
    ($level:expr, $stream:expr, $timestamp:expr, $($arg:tt)*) => {{
        let level = $level;
        let stream = $stream;
        if stream.enabled(level) {
            let mut buf = [0u8; $crate::logging::MAX_MSG_LEN];
            let len = $crate::logging::format_to_buffer(&mut buf, format_args!($($arg)*));
            stream.push($timestamp, level, &buf[..len]);
        }
    }};
}

/// Info log.
#[macro_export]
macro_rules! hub_info {
    ($stream:expr, $timestamp:expr, $($arg:tt)*) => {
        $crate::hub_log!($crate::logging::LogLevel::Info, $stream, $timestamp, $($arg)*)
    };
}

/// Warning log.
#[macro_export]
macro_rules! hub_warn {
    ($stream:expr, $timestamp:expr, $($arg:tt)*) => {
        $crate::hub_log!($crate::logging::LogLevel::Warn, $stream, $timestamp, $($arg)*)
    };
}

/// Error log.
#[macro_export]
macro_rules! hub_error {
    ($stream:expr, $timestamp:expr, $($arg:tt)*) => {
        $crate::hub_log!($crate::logging::LogLevel::Error, $stream, $timestamp, $($arg)*)
    };
}

/// Debug log.
#[macro_export]
macro_rules! hub_debug {
    ($stream:expr, $timestamp:expr, $($arg:tt)*) => {
        $crate::hub_log!($crate::logging::LogLevel::Debug, $stream, $timestamp, $($arg)*)
    };
}

/// Trace log (maximum verbosity).
#[macro_export]
macro_rules! hub_trace {
    ($stream:expr, $timestamp:expr, $($arg:tt)*) => {
        $crate::hub_log!($crate::logging::LogLevel::Trace, $stream, $timestamp, $($arg)*)
    };
}

/// Get the log stream for a core.
///
/// - Core 0 → READER_LOG_STREAM (Reader workers)
/// - Core 1 → PROCESSOR_LOG_STREAM (Processor workers, API callers)
#[inline]
pub fn current_log_stream(core: Core) -> &'static LogStream {
    match core {
        Core::Core0 => &crate::READER_LOG_STREAM,
        Core::Core1 => &crate::PROCESSOR_LOG_STREAM,
    }
}
