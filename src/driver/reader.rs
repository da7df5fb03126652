//! Reader worker: handshake, then the receive loop.
//!
//! Runs on the reader core at `reader_priority_base + slot`. The token is
//! held only while a shared field is tested or updated, never across a
//! channel read or a delay, so accessors on the other core always get a
//! turn between iterations.
//!
//! # Handshake
//!
//! ```text
//!   send REQ ─▶ wait response window ─▶ read one frame
//!                                          │
//!        ┌──────────────┬──────────────────┼───────────────┐
//!        ▼              ▼                  ▼               ▼
//!   own secret     peer's REQ         other/short       nothing
//!   CONNECTED      reply secret       NOT_CONNECTED     TIME_OUT
//!   (done)         (retry)            (retry)           (retry)
//! ```
//!
//! Either side may initiate. A peer that already finished its own
//! handshake keeps answering REQ frames from its receive loop, so the
//! slower side still converges.

use crate::channel::{SerialBus, SerialPort};
use crate::events::StatusCode;
use crate::frame::{Frame, FRAME_LEN};
use crate::logging::{current_log_stream, LogStream};
use crate::platform::Platform;
use crate::{hub_debug, hub_info, hub_trace, hub_warn};

use super::hub::Record;
use super::{DriverHandle, DriverHub, DriverStatus, WorkerExit};

/// Outcome of one handshake round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Round {
    Granted,
    /// Peer asked first; secret sent back.
    Answered,
    Rejected,
    TimedOut,
    Failed,
}

/// Worker entry.
pub(crate) fn run<P: Platform, B: SerialBus>(hub: &DriverHub<P, B>, handle: DriverHandle) {
    let Some(record) = hub.record(handle) else {
        return;
    };
    let _exit = WorkerExit::new(&*record);

    let reader = Reader {
        hub,
        record: &*record,
        slot: handle.slot(),
        log: current_log_stream(hub.config().reader_core),
    };

    if reader.handshake() {
        reader.receive_loop();
    }

    reader.leave();
}

struct Reader<'a, P: Platform, B: SerialBus> {
    hub: &'a DriverHub<P, B>,
    record: &'a Record<P, B>,
    slot: u8,
    log: &'static LogStream,
}

impl<P: Platform, B: SerialBus> Reader<'_, P, B> {
    #[inline]
    fn platform(&self) -> &P {
        self.hub.platform()
    }

    #[inline]
    fn now(&self) -> i64 {
        self.platform().now_us()
    }

    /// Sleep `ms`, waking early once the driver is deactivated.
    fn pause(&self, ms: u32) {
        let step = self.hub.config().quantum_ms.max(1);
        let mut left = ms;
        while left > 0 && self.record.is_active() {
            let chunk = left.min(step);
            self.platform().delay_ms(chunk);
            left -= chunk;
        }
    }

    /// Run handshake rounds until access is granted.
    ///
    /// Returns `false` if the driver was deactivated first.
    ///
    /// Only the first timeout is reported as a status event; a peer that
    /// stays silent is visible through diagnostics after that.
    fn handshake(&self) -> bool {
        let cfg = self.hub.config();
        let mut timeout_reported = false;
        while self.record.is_active() {
            match self.handshake_round() {
                Some(Round::Granted) => return true,
                None => return true,
                Some(Round::TimedOut) => {
                    if !timeout_reported {
                        self.hub.emit(StatusCode::HandshakeTimeout, self.slot, 0);
                        timeout_reported = true;
                    }
                    hub_trace!(self.log, self.now(), "{}: no reply", self.record.name);
                }
                Some(Round::Failed) => {
                    hub_warn!(self.log, self.now(), "{}: channel error", self.record.name);
                }
                Some(Round::Answered) => {
                    hub_debug!(self.log, self.now(), "{}: answered peer", self.record.name);
                }
                Some(Round::Rejected) => {
                    hub_debug!(self.log, self.now(), "{}: rejected", self.record.name);
                }
            }
            self.pause(cfg.retry_backoff_ms);
        }
        false
    }

    /// One request/response exchange.
    ///
    /// `None` when access was already granted on entry.
    fn handshake_round(&self) -> Option<Round> {
        let cfg = self.hub.config();
        let record = self.record;

        {
            let mut state = record.state.acquire(self.platform());
            if state.access_granted {
                return None;
            }
            state.handshake_attempts = state.handshake_attempts.wrapping_add(1);
            if record.port.write(&Frame::new(cfg.request_marker).encode()).is_err() {
                state.status = DriverStatus::Error;
                return Some(Round::Failed);
            }
        }

        self.pause(cfg.response_window_ms);

        let mut buf = [0u8; FRAME_LEN];
        let read = record.port.read(&mut buf, cfg.read_window_ms);

        let mut state = record.state.acquire(self.platform());
        let round = match read {
            Err(_) => {
                state.status = DriverStatus::Error;
                Round::Failed
            }
            Ok(0) => {
                state.status = DriverStatus::TimeOut;
                Round::TimedOut
            }
            Ok(n) => match Frame::decode(&buf[..n]) {
                Some(frame) if frame.carries(record.config.secret) => {
                    state.status = DriverStatus::Connected;
                    state.access_granted = true;
                    Round::Granted
                }
                Some(frame) if frame.carries(cfg.request_marker) => {
                    state.status = DriverStatus::NotConnected;
                    match record.port.write(&Frame::new(record.config.secret).encode()) {
                        Ok(()) => Round::Answered,
                        Err(_) => {
                            state.status = DriverStatus::Error;
                            Round::Failed
                        }
                    }
                }
                _ => {
                    state.status = DriverStatus::NotConnected;
                    Round::Rejected
                }
            },
        };
        let attempts = state.handshake_attempts;
        drop(state);

        if round == Round::Granted {
            self.hub.emit(StatusCode::Connected, self.slot, attempts);
            hub_info!(
                self.log,
                self.now(),
                "{} connected after {} attempt(s)",
                record.name,
                attempts
            );
        }
        Some(round)
    }

    /// Read frames into the queue until deactivated.
    fn receive_loop(&self) {
        let cfg = self.hub.config();
        let record = self.record;
        let mut buf = [0u8; FRAME_LEN];

        while record.is_active() {
            match record.port.read(&mut buf, cfg.read_window_ms) {
                Ok(0) => {}
                Ok(n) => match Frame::decode(&buf[..n]) {
                    // Peer is still handshaking (e.g. it restarted).
                    Some(frame) if frame.carries(cfg.request_marker) => {
                        let _state = record.state.acquire(self.platform());
                        if record.port.write(&Frame::new(record.config.secret).encode()).is_err() {
                            hub_debug!(self.log, self.now(), "{}: reply failed", record.name);
                        }
                    }
                    // Late reply to a request we sent during the handshake.
                    Some(frame) if frame.carries(record.config.secret) => {
                        record.state.acquire(self.platform()).queue.discard();
                        hub_trace!(self.log, self.now(), "{}: late reply dropped", record.name);
                    }
                    Some(frame) => {
                        let mut state = record.state.acquire(self.platform());
                        state.queue.push(frame.value);
                        state.frames_received = state.frames_received.wrapping_add(1);
                        state.status = DriverStatus::DataReceived;
                    }
                    None => self.receive_error(n),
                },
                Err(_) => self.receive_error(0),
            }
            self.platform().yield_now();
        }
    }

    fn receive_error(&self, got: usize) {
        {
            let mut state = self.record.state.acquire(self.platform());
            state.receive_errors = state.receive_errors.wrapping_add(1);
            state.status = DriverStatus::DataReceiveError;
        }
        self.hub.emit(StatusCode::ReceiveError, self.slot, got as u32);
        hub_debug!(self.log, self.now(), "{}: bad read ({} bytes)", self.record.name, got);
    }

    /// Mark the end of the data phase. Access ends with it.
    fn leave(&self) {
        let mut state = self.record.state.acquire(self.platform());
        if state.access_granted {
            state.status = DriverStatus::Disconnected;
            state.access_granted = false;
        }
    }
}
