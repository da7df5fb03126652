//! Global log stream instances.
//!
//! One stream per core, so Readers (core 0) and Processors (core 1) never
//! contend for the same ring.

use crate::logging::LogStream;

/// Log stream for Core 0.
///
/// Receives logs from every Reader worker (handshake, receive loop).
pub static READER_LOG_STREAM: LogStream = LogStream::new();

/// Log stream for Core 1.
///
/// Receives logs from Processor workers and from API callers
/// (register, deactivate, unregister, diagnostics).
pub static PROCESSOR_LOG_STREAM: LogStream = LogStream::new();
