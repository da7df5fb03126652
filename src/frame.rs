//! Wire frame codec.
//!
//! ```text
//! ┌──────┬──────┬──────┬──────┬──────┐
//! │ lead │  b3  │  b2  │  b1  │  b0  │   value = b3 << 24 | ... | b0
//! └──────┴──────┴──────┴──────┴──────┘
//! ```
//!
//! One leading byte, ignored on receive, followed by a big-endian `u32`.
//! There is no checksum and no delivery guarantee: a corrupted payload
//! decodes as a different value.

/// Bytes per frame.
pub const FRAME_LEN: usize = 5;

/// Lead byte written on every outbound frame (STX).
pub const FRAME_LEAD: u8 = 0x02;

/// One decoded frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Frame {
    pub lead: u8,
    pub value: u32,
}

impl Frame {
    /// Outbound frame carrying `value`.
    #[inline]
    pub const fn new(value: u32) -> Self {
        Self {
            lead: FRAME_LEAD,
            value,
        }
    }

    /// Serialize to wire bytes.
    #[inline]
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let b = self.value.to_be_bytes();
        [self.lead, b[0], b[1], b[2], b[3]]
    }

    /// Parse wire bytes. Anything but exactly [`FRAME_LEN`] bytes fails.
    #[inline]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != FRAME_LEN {
            return None;
        }
        Some(Self {
            lead: bytes[0],
            value: u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]),
        })
    }

    /// Payload equality; the lead byte never matters.
    #[inline]
    pub fn carries(&self, value: u32) -> bool {
        self.value == value
    }
}
