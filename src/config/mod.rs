//! Module: config
//!
//! Purpose: Hub timing, scheduling and per-channel configuration.
//!
//! Architecture:
//! - Compile-time limits (driver capacity, queue depth, name length)
//! - `HubConfig`: runtime timings and scheduling, fixed at hub construction
//! - `ChannelConfig`: one serial channel plus its shared secret
//!
//! All values are `Copy` and read without locking.

use crate::platform::Core;

/// Maximum number of live drivers (slot bitmap width).
pub const MAX_DRIVERS: usize = 8;

/// Depth of each driver's receive queue.
pub const QUEUE_CAPACITY: usize = 32;

/// Maximum driver name length in bytes.
pub const MAX_NAME_LEN: usize = 16;

/// Driver name storage.
pub type DriverName = heapless::String<MAX_NAME_LEN>;

/// Payload of the handshake request marker ("REQ?").
pub const DEFAULT_REQUEST_MARKER: u32 = 0x5245_513F;

/// Hub-wide timing and scheduling configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HubConfig {
    /// Payload sent as the handshake request.
    pub request_marker: u32,
    /// Delay between sending a request and reading the reply.
    pub response_window_ms: u32,
    /// Delay before the next handshake attempt.
    pub retry_backoff_ms: u32,
    /// Bounded read timeout, both phases.
    pub read_window_ms: u32,
    /// Bounded token wait used by `for_each`.
    pub token_wait_ms: u32,
    /// One scheduling quantum.
    pub quantum_ms: u32,
    /// Upper bound for worker exit during deactivation.
    pub stop_timeout_ms: u32,
    /// Pause between processor callback invocations.
    pub processor_idle_ms: u32,
    /// Reader priority is `reader_priority_base + slot`.
    pub reader_priority_base: u8,
    /// Processor priority is `processor_priority_base + slot`.
    pub processor_priority_base: u8,
    /// Core running every Reader.
    pub reader_core: Core,
    /// Core running every Processor.
    pub processor_core: Core,
    /// Worker stack size in bytes.
    pub stack_size: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            request_marker: DEFAULT_REQUEST_MARKER,
            response_window_ms: 100,
            retry_backoff_ms: 500,
            read_window_ms: 50,
            token_wait_ms: 20,
            quantum_ms: 10,
            stop_timeout_ms: 2_000,
            processor_idle_ms: 10,
            reader_priority_base: 10,
            processor_priority_base: 2,
            reader_core: Core::Core0,
            processor_core: Core::Core1,
            stack_size: 4096,
        }
    }
}

impl HubConfig {
    /// Short timings for host simulation and tests.
    pub fn fast() -> Self {
        Self {
            response_window_ms: 5,
            retry_backoff_ms: 10,
            read_window_ms: 10,
            token_wait_ms: 20,
            quantum_ms: 2,
            stop_timeout_ms: 2_000,
            processor_idle_ms: 1,
            stack_size: 64 * 1024,
            ..Default::default()
        }
    }

    /// Reader priority for a slot.
    #[inline]
    pub fn reader_priority(&self, slot: u8) -> u8 {
        self.reader_priority_base.saturating_add(slot)
    }

    /// Processor priority for a slot.
    #[inline]
    pub fn processor_priority(&self, slot: u8) -> u8 {
        self.processor_priority_base.saturating_add(slot)
    }
}

/// Serial channel configuration for one driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Peripheral channel id (UART number).
    pub port: u8,
    /// Line speed.
    pub baud: u32,
    /// TX pin number.
    pub tx_pin: u8,
    /// RX pin number.
    pub rx_pin: u8,
    /// Shared secret expected from the peer.
    pub secret: u32,
}

impl ChannelConfig {
    /// Create a 115200 baud channel config.
    pub const fn new(port: u8, tx_pin: u8, rx_pin: u8, secret: u32) -> Self {
        Self {
            port,
            baud: 115_200,
            tx_pin,
            rx_pin,
            secret,
        }
    }

    /// Override the baud rate.
    pub const fn with_baud(mut self, baud: u32) -> Self {
        self.baud = baud;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priorities_are_slot_offset() {
        let cfg = HubConfig::default();
        assert_eq!(cfg.reader_priority(0), 10);
        assert_eq!(cfg.reader_priority(3), 13);
        assert_eq!(cfg.processor_priority(3), 5);
        assert_ne!(cfg.reader_priority(1), cfg.reader_priority(2));
    }

    #[test]
    fn test_workers_on_distinct_cores() {
        let cfg = HubConfig::default();
        assert_ne!(cfg.reader_core, cfg.processor_core);
    }

    #[test]
    fn test_channel_config_builder() {
        let ch = ChannelConfig::new(1, 17, 18, 0xCAFE).with_baud(9600);
        assert_eq!(ch.baud, 9600);
        assert_eq!(ch.secret, 0xCAFE);
    }

    #[test]
    fn test_max_drivers_fits_bitmap() {
        assert!(MAX_DRIVERS <= 32);
    }
}
