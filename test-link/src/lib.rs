//! Unreliable and instrumented links for testing purposes.
#![deny(missing_docs)]
use async_trait::async_trait;
use bytes::BytesMut;
use futures_timer::Delay;
use link::{Link, Loopback};
use rand::rngs::OsRng;
use rand::Rng;
use std::io::Result;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Lossy link wrapping one end of a loopback pair.
///
/// Packets are transmitted with probability `px` and duplicated with
/// probability `pq`, so a pair can model a reliable pipe (px=1.0,
/// pq=0.0), a partition (px=0.0), duplication (pq=1.0) or anything in
/// between.
pub struct LossyLink {
    px: f64,
    pq: f64,
    inner: Loopback,
}

impl LossyLink {
    /// Creates a connected pair of lossy links.
    pub fn pair(px: f64, pq: f64) -> (LossyLink, LossyLink) {
        assert!(0.0 <= px && px <= 1.0);
        assert!(0.0 <= pq && pq <= 1.0);
        let (a, b) = Loopback::pair();
        let a = LossyLink { px, pq, inner: a };
        let b = LossyLink { px, pq, inner: b };
        (a, b)
    }
}

#[async_trait]
impl Link for LossyLink {
    type Addr = u8;

    async fn recv(&self) -> Result<(BytesMut, Self::Addr)> {
        self.inner.recv().await
    }

    async fn send(&self, buf: &[u8], to: &Self::Addr) -> Result<()> {
        let fate: f64 = OsRng.gen();
        if fate < self.px {
            self.inner.send(buf, to).await?;
        }
        if fate < self.pq {
            self.inner.send(buf, to).await?;
        }
        Ok(())
    }

    fn mtu(&self) -> usize {
        self.inner.mtu()
    }
}

struct RateState {
    window_start: Option<Instant>,
    sent: u32,
}

/// Link wrapper capping throughput at `per_interval` packets per
/// `interval`.
///
/// A send past the budget waits for the next interval window, so a
/// saturating sender is throttled to the configured rate. This models
/// a rate-limited pipe for convergence tests.
pub struct RateLink<L: Link> {
    inner: L,
    interval: Duration,
    per_interval: u32,
    state: Mutex<RateState>,
}

impl<L: Link> RateLink<L> {
    /// Wraps a link, admitting `per_interval` packets every
    /// `interval`.
    pub fn new(inner: L, interval: Duration, per_interval: u32) -> Self {
        assert!(per_interval > 0);
        Self {
            inner,
            interval,
            per_interval,
            state: Mutex::new(RateState {
                window_start: None,
                sent: 0,
            }),
        }
    }
}

#[async_trait]
impl<L: Link> Link for RateLink<L> {
    type Addr = L::Addr;

    async fn recv(&self) -> Result<(BytesMut, Self::Addr)> {
        self.inner.recv().await
    }

    async fn send(&self, buf: &[u8], to: &Self::Addr) -> Result<()> {
        loop {
            // The budget decision is taken under the lock; the wait for
            // the window to roll happens outside it.
            let wait = {
                let mut state = self.state.lock().unwrap();
                let now = Instant::now();
                match state.window_start {
                    None => {
                        state.window_start = Some(now);
                        state.sent = 1;
                        None
                    }
                    Some(mut start) => {
                        while start + self.interval <= now {
                            start += self.interval;
                            state.sent = 0;
                        }
                        state.window_start = Some(start);
                        if state.sent < self.per_interval {
                            state.sent += 1;
                            None
                        } else {
                            Some(start + self.interval - now)
                        }
                    }
                }
            };
            match wait {
                None => break,
                Some(wait) => Delay::new(wait).await,
            }
        }
        self.inner.send(buf, to).await
    }

    fn mtu(&self) -> usize {
        self.inner.mtu()
    }
}

type Frames = Arc<Mutex<Vec<(Instant, BytesMut)>>>;

/// Link wrapper that records every sent frame with its send time.
///
/// Tests decode the recorded frames to assert on the exact wire traffic
/// an endpoint produced, via the [`TapHandle`] kept outside the stack.
pub struct TapLink<L: Link> {
    inner: L,
    sent: Frames,
}

/// Shared view of the frames a [`TapLink`] has recorded.
#[derive(Clone)]
pub struct TapHandle {
    sent: Frames,
}

impl TapHandle {
    /// Returns a copy of all frames sent so far.
    pub fn frames(&self) -> Vec<(Instant, BytesMut)> {
        self.sent.lock().unwrap().clone()
    }

    /// Number of frames sent so far.
    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl<L: Link> TapLink<L> {
    /// Wraps a link, returning the wrapper and its observation handle.
    pub fn new(inner: L) -> (Self, TapHandle) {
        let sent: Frames = Default::default();
        let handle = TapHandle { sent: sent.clone() };
        (Self { inner, sent }, handle)
    }
}

#[async_trait]
impl<L: Link> Link for TapLink<L> {
    type Addr = L::Addr;

    async fn recv(&self) -> Result<(BytesMut, Self::Addr)> {
        self.inner.recv().await
    }

    async fn send(&self, buf: &[u8], to: &Self::Addr) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((Instant::now(), BytesMut::from(buf)));
        self.inner.send(buf, to).await
    }

    fn mtu(&self) -> usize {
        self.inner.mtu()
    }
}
