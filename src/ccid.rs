//! The congestion controller seam.
//!
//! One controller runs per half-connection. The state machine and the
//! injection worker call into it without holding any connection lock;
//! implementations synchronize internally.
use crate::err::Error;
use crate::header::Header;
use crate::options::DccpOption;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A pluggable congestion control algorithm (CCID).
pub trait CongestionControl: Send + Sync + 'static {
    /// Called after a packet for this half-connection is put on the
    /// wire.
    fn on_send(&self, _now: Instant, _header: &Header) {}

    /// Called for every packet received on this half-connection.
    fn on_receive(&self, _now: Instant, _header: &Header) {}

    /// Earliest instant the given packet may be sent. The injection
    /// worker sleeps until then and asks again.
    fn next_send_time(&self, now: Instant, header: &Header) -> Instant;

    /// Options to merge into outbound non-Data packets.
    fn options(&self) -> Vec<DccpOption> {
        Vec::new()
    }

    /// Digests a CCID-specific option (types 128..=255). An error from
    /// a Mandatory option resets the connection.
    fn process_option(&self, _option: &DccpOption) -> Result<(), Error> {
        Ok(())
    }
}

/// A controller that never delays anything.
pub struct NoPacing;

impl CongestionControl for NoPacing {
    fn next_send_time(&self, now: Instant, _header: &Header) -> Instant {
        now
    }
}

struct RateState {
    window_start: Option<Instant>,
    sent: u32,
}

/// Fixed-rate pacing: at most `per_interval` packets per `interval`,
/// counted over aligned windows.
pub struct RatePacing {
    interval: Duration,
    per_interval: u32,
    state: Mutex<RateState>,
}

impl RatePacing {
    /// Creates a controller admitting `per_interval` packets every
    /// `interval`.
    pub fn new(interval: Duration, per_interval: u32) -> Self {
        assert!(per_interval > 0);
        Self {
            interval,
            per_interval,
            state: Mutex::new(RateState {
                window_start: None,
                sent: 0,
            }),
        }
    }
}

impl CongestionControl for RatePacing {
    fn on_send(&self, now: Instant, _header: &Header) {
        let mut state = self.state.lock().unwrap();
        match state.window_start {
            None => {
                state.window_start = Some(now);
                state.sent = 1;
            }
            Some(mut start) => {
                // Advance whole windows so the cadence stays aligned to
                // the first send rather than drifting with wakeups.
                while start + self.interval <= now {
                    start += self.interval;
                    state.sent = 0;
                }
                state.window_start = Some(start);
                state.sent += 1;
            }
        }
    }

    fn next_send_time(&self, now: Instant, _header: &Header) -> Instant {
        let state = self.state.lock().unwrap();
        match state.window_start {
            None => now,
            Some(start) => {
                if start + self.interval <= now || state.sent < self.per_interval {
                    now
                } else {
                    start + self.interval
                }
            }
        }
    }
}
