//! Driver table for the diagnostics collaborator.
//!
//! Walks the registry with [`DriverHub::for_each`], so a driver whose token
//! stays busy shows up as a skipped count instead of stalling the report.
//!
//! ```text
//! NAME             SLOT PORT   BAUD  TX  RX STATUS             AUTH QUEUED  FRAMES ERRORS
//! uart1               0    1 115200  17  18 DATA_RECEIVED      yes      3     120      0
//! pool 1/8 slots 0b00000001 skipped 0
//! ```

use core::fmt::{self, Write};

use crate::channel::SerialBus;
use crate::driver::{DriverHub, DriverSnapshot, ForEachStats};
use crate::platform::Platform;

/// Write the table header.
pub fn write_header(out: &mut dyn Write) -> fmt::Result {
    writeln!(
        out,
        "{:<16} {:>4} {:>4} {:>6} {:>3} {:>3} {:<18} {:<4} {:>6} {:>7} {:>6}",
        "NAME", "SLOT", "PORT", "BAUD", "TX", "RX", "STATUS", "AUTH", "QUEUED", "FRAMES", "ERRORS"
    )
}

/// Write one driver row.
pub fn write_row(snapshot: &DriverSnapshot, out: &mut dyn Write) -> fmt::Result {
    writeln!(
        out,
        "{:<16} {:>4} {:>4} {:>6} {:>3} {:>3} {:<18} {:<4} {:>6} {:>7} {:>6}",
        snapshot.name.as_str(),
        snapshot.slot,
        snapshot.port,
        snapshot.baud,
        snapshot.tx_pin,
        snapshot.rx_pin,
        snapshot.status.as_str(),
        if snapshot.access_granted { "yes" } else { "no" },
        snapshot.queued,
        snapshot.frames_received,
        snapshot.receive_errors,
    )
}

/// Write the full report: header, one row per driver, usage footer.
pub fn write_report<P: Platform, B: SerialBus>(
    hub: &DriverHub<P, B>,
    out: &mut dyn Write,
) -> ForEachStats {
    let _ = write_header(out);
    let stats = hub.for_each(|snapshot| {
        let _ = write_row(snapshot, out);
    });

    let (used, capacity) = hub.pool_usage();
    let _ = writeln!(
        out,
        "pool {}/{} slots {:#010b} skipped {}",
        used,
        capacity,
        hub.slot_mask(),
        stats.skipped
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostPlatform, LoopbackBus};
    use crate::HubConfig;

    #[test]
    fn test_empty_report() {
        let hub = DriverHub::new(HostPlatform::new(), LoopbackBus::new(2), HubConfig::fast()).unwrap();
        let mut out = std::string::String::new();
        let stats = write_report(&hub, &mut out);

        assert_eq!(stats, ForEachStats::default());
        assert!(out.starts_with("NAME"));
        assert!(out.contains("pool 0/8"));
    }
}
