//! Serial peripheral seam.
//!
//! The hub only needs open/read/write on a numbered channel. The `esp`
//! backend implements these on the UART driver; the `host` backend on
//! in-memory loopback lines.

use crate::config::ChannelConfig;
use crate::error::ChannelError;

/// Source of serial ports.
pub trait SerialBus: Send + Sync + 'static {
    type Port: SerialPort;

    /// Number of addressable channels; valid ids are `0..port_count()`.
    fn port_count(&self) -> u8;

    /// Configure and open one channel.
    fn open(&self, config: &ChannelConfig) -> Result<Self::Port, ChannelError>;
}

/// One open serial channel. Reads and writes may come from different
/// workers, so both take `&self`.
pub trait SerialPort: Send + Sync + 'static {
    /// Read up to `buf.len()` bytes, waiting at most `timeout_ms`.
    ///
    /// `Ok(0)` means nothing arrived in time.
    fn read(&self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, ChannelError>;

    /// Write every byte of `bytes`.
    fn write(&self, bytes: &[u8]) -> Result<(), ChannelError>;
}
