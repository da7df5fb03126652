//! # RustSerialHub
//!
//! Serial driver orchestration for a dual-core preemptive RTOS controller.
//!
//! ## Architecture
//!
//! Each registered driver owns one serial channel and a worker pair:
//! - Reader (Core 0): handshake with the peer, then frames → bounded queue
//! - Processor (Core 1): user callback, drains the queue via accessors
//!
//! Records live in a fixed-block pool and are chained on an intrusive
//! registry list. All mutable per-driver state sits behind one token per
//! record; registry structure is changed only inside short critical
//! sections. The scheduler and the UART are reached through the
//! [`Platform`] and [`SerialBus`] seams, so the same core runs on
//! FreeRTOS (`esp`) and on std threads (`host`).
//!
//! Start with [`driver`] for the lifecycle and the worker protocol, and
//! [`pool`], [`slots`], [`list`] and [`queue`] for the building blocks.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[cfg(all(not(test), not(target_os = "espidf")))]
extern crate std;

pub mod channel;
pub mod config;
pub mod diagnostics;
pub mod driver;
pub mod error;
pub mod events;
pub mod frame;
pub mod list;
pub mod log_drain;
pub mod log_globals;
pub mod logging;
pub mod platform;
pub mod pool;
pub mod queue;
pub mod slots;
pub mod token;

#[cfg(target_os = "espidf")]
pub mod esp;

#[cfg(not(target_os = "espidf"))]
pub mod host;

pub use channel::{SerialBus, SerialPort};
pub use config::{ChannelConfig, HubConfig, MAX_DRIVERS, QUEUE_CAPACITY};
pub use driver::{
    Driver, DriverHandle, DriverHub, DriverSnapshot, DriverStatus, ForEachStats, ProcessorFn,
};
pub use error::{ChannelError, HubError, PoolError, SpawnError};
pub use events::{StatusCode, StatusEvent, StatusSink};
pub use frame::Frame;
pub use log_globals::{PROCESSOR_LOG_STREAM, READER_LOG_STREAM};
pub use platform::{Core, Platform};
pub use pool::{BlockId, MemoryPool};
pub use queue::BoundedQueue;
pub use slots::SlotBitmap;
