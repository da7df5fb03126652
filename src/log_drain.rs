//! Log drain: moves entries from the per-core streams to a text sink.
//!
//! The sink is any `core::fmt::Write`: the console UART on target, stdout
//! on host. Draining is blocking-friendly and runs outside worker loops.
//!
//! Output format: `[timestamp_us] LEVEL: message`

use core::fmt::Write;

use crate::logging::{LogEntry, LogStream};
use crate::{PROCESSOR_LOG_STREAM, READER_LOG_STREAM};

/// Format log entry into `buf`, newline terminated.
///
/// Returns the number of bytes written.
pub fn format_log_entry(entry: &LogEntry, buf: &mut [u8]) -> usize {
    struct BufWriter<'a> {
        buf: &'a mut [u8],
        pos: usize,
    }

    impl Write for BufWriter<'_> {
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

    let _ = writeln!(
        writer,
        "[{:10}] {}: {}",
        entry.timestamp_us,
        entry.level.as_str(),
        core::str::from_utf8(&entry.msg[..entry.len as usize]).unwrap_or("<invalid utf8>")
    );

    writer.pos
}

/// Write every pending entry of `stream` to `out`.
///
/// Returns the number of entries written.
pub fn drain_stream<const N: usize>(stream: &LogStream<N>, out: &mut dyn Write) -> usize {
    let mut format_buf = [0u8; 256];
    let mut count = 0;

    while let Some(entry) = stream.drain() {
        let len = format_log_entry(&entry, &mut format_buf);
        if let Ok(line) = core::str::from_utf8(&format_buf[..len]) {
            let _ = out.write_str(line);
        }
        count += 1;
    }

    count
}

/// Drain both core streams, Reader stream first.
///
/// Reports and resets the drop counters when either ring overflowed.
pub fn drain_to(out: &mut dyn Write) -> usize {
    let written = drain_stream(&READER_LOG_STREAM, out) + drain_stream(&PROCESSOR_LOG_STREAM, out);

    let reader_dropped = READER_LOG_STREAM.dropped();
    let processor_dropped = PROCESSOR_LOG_STREAM.dropped();
    if reader_dropped > 0 || processor_dropped > 0 {
        let _ = writeln!(
            out,
            "[WARN] Dropped: reader={}, processor={}",
            reader_dropped, processor_dropped
        );
        READER_LOG_STREAM.reset_dropped();
        PROCESSOR_LOG_STREAM.reset_dropped();
    }

    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogLevel, MAX_MSG_LEN};

    fn entry(timestamp_us: i64, level: LogLevel, text: &[u8]) -> LogEntry {
        let mut msg = [0u8; MAX_MSG_LEN];
        msg[..text.len()].copy_from_slice(text);
        LogEntry {
            timestamp_us,
            level,
            len: text.len() as u8,
            msg,
        }
    }

    #[test]
    fn test_format_log_entry() {
        let mut buf = [0u8; 256];
        let len = format_log_entry(&entry(1234567, LogLevel::Info, b"uart1 connected"), &mut buf);

        let formatted = core::str::from_utf8(&buf[..len]).unwrap();
        assert!(formatted.contains("1234567"));
        assert!(formatted.contains("INFO"));
        assert!(formatted.contains("uart1 connected"));
        assert!(formatted.ends_with('\n'));
    }

    #[test]
    fn test_format_respects_len() {
        let mut e = entry(999, LogLevel::Error, b"TEST12345X");
        e.len = 5;

        let mut buf = [0u8; 256];
        let len = format_log_entry(&e, &mut buf);

        let formatted = core::str::from_utf8(&buf[..len]).unwrap();
        assert!(formatted.contains("ERROR"));
        assert!(formatted.contains("TEST1"));
        assert!(!formatted.contains("X"));
    }

    #[test]
    fn test_drain_stream_empties_ring() {
        let stream = LogStream::<8>::new();
        stream.push(1, LogLevel::Warn, b"one");
        stream.push(2, LogLevel::Info, b"two");

        let mut out = std::string::String::new();
        assert_eq!(drain_stream(&stream, &mut out), 2);
        assert!(out.contains("WARN: one"));
        assert!(out.contains("INFO: two"));
        assert!(!stream.has_entries());
    }
}
