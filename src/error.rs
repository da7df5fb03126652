//! Error types for the driver hub.
//!
//! Capacity and structural errors are returned synchronously from
//! [`register`](crate::DriverHub::register). Transient I/O errors never
//! surface here: the Reader records them in the driver status and retries.

use core::fmt;

/// Hub API error with code and message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubError {
    /// E01: No free slot, pool block or registry entry
    CapacityExceeded,
    /// E02: Channel id outside the bus range
    InvalidChannel,
    /// E03: Channel already owned by a live driver
    ChannelInUse,
    /// E04: Secret collides with the request marker or the empty sentinel
    InvalidSecret,
    /// E05: No processor callback supplied
    InvalidCallback,
    /// E06: Record could not be drawn from the pool
    AllocationFailed,
    /// E07: Peripheral refused to open the channel
    ChannelOpenFailed,
    /// E08: Worker task could not be created
    SpawnFailed,
    /// E09: Handle refers to a driver that no longer exists
    StaleHandle,
    /// E10: Driver must be deactivated first
    StillActive,
    /// E11: Workers did not exit within the deactivation timeout
    WorkerStuck,
    /// E12: Handshake not completed
    NotConnected,
    /// E13: Channel write failed
    WriteFailed,
}

impl HubError {
    /// Get error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::CapacityExceeded => "E01",
            Self::InvalidChannel => "E02",
            Self::ChannelInUse => "E03",
            Self::InvalidSecret => "E04",
            Self::InvalidCallback => "E05",
            Self::AllocationFailed => "E06",
            Self::ChannelOpenFailed => "E07",
            Self::SpawnFailed => "E08",
            Self::StaleHandle => "E09",
            Self::StillActive => "E10",
            Self::WorkerStuck => "E11",
            Self::NotConnected => "E12",
            Self::WriteFailed => "E13",
        }
    }

    /// Get error message
    pub fn message(&self) -> &'static str {
        match self {
            Self::CapacityExceeded => "capacity exceeded",
            Self::InvalidChannel => "invalid channel",
            Self::ChannelInUse => "channel in use",
            Self::InvalidSecret => "invalid secret",
            Self::InvalidCallback => "invalid callback",
            Self::AllocationFailed => "allocation failed",
            Self::ChannelOpenFailed => "channel open failed",
            Self::SpawnFailed => "worker spawn failed",
            Self::StaleHandle => "stale handle",
            Self::StillActive => "driver still active",
            Self::WorkerStuck => "workers did not stop",
            Self::NotConnected => "not connected",
            Self::WriteFailed => "write failed",
        }
    }

    /// True for errors caused by resource exhaustion.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::CapacityExceeded | Self::AllocationFailed | Self::SpawnFailed)
    }
}

impl fmt::Display for HubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

/// Memory pool errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// Arena could not be reserved
    OutOfMemory,
    /// Block count is zero or exceeds the index range
    InvalidSize,
    /// Block id was issued by another pool
    Foreign,
    /// Block was already freed (generation mismatch)
    Stale,
    /// Block is pinned by a reader
    Busy,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::OutOfMemory => "out of memory",
            Self::InvalidSize => "invalid pool size",
            Self::Foreign => "block belongs to another pool",
            Self::Stale => "block already freed",
            Self::Busy => "block pinned",
        };
        f.write_str(msg)
    }
}

/// Serial channel errors reported by the peripheral collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    OpenFailed,
    ReadFailed,
    WriteFailed,
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::OpenFailed => "open failed",
            Self::ReadFailed => "read failed",
            Self::WriteFailed => "write failed",
        };
        f.write_str(msg)
    }
}

/// Task creation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnError;

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("task spawn failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_unique() {
        let all = [
            HubError::CapacityExceeded,
            HubError::InvalidChannel,
            HubError::ChannelInUse,
            HubError::InvalidSecret,
            HubError::InvalidCallback,
            HubError::AllocationFailed,
            HubError::ChannelOpenFailed,
            HubError::SpawnFailed,
            HubError::StaleHandle,
            HubError::StillActive,
            HubError::WorkerStuck,
            HubError::NotConnected,
            HubError::WriteFailed,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a.code(), b.code());
            }
        }
    }

    #[test]
    fn test_error_display() {
        let s = format!("{}", HubError::ChannelInUse);
        assert_eq!(s, "E03: channel in use");
    }

    #[test]
    fn test_capacity_classification() {
        assert!(HubError::CapacityExceeded.is_capacity());
        assert!(HubError::AllocationFailed.is_capacity());
        assert!(!HubError::InvalidCallback.is_capacity());
    }
}
