//! The outbound injection pipeline.
//!
//! `inject` is a non-blocking hand-off from the state machine (called
//! with the connection's send lock held) to a per-connection worker
//! task. Control packets ride an unbounded lane and are never dropped;
//! application data rides a lane bounded by the high-water mark and
//! yields `WouldBlock` when full. The worker assembles each packet
//! against live connection state, asks the congestion controller for
//! permission, sleeps until the granted instant and re-queries on wake.
//! Entries flagged mandatory bypass pacing entirely.
use crate::conn::ConnInner;
use crate::err::Error;
use crate::header::Header;
use async_std::channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use async_std::task;
use bytes::BytesMut;
use crossbeam::atomic::AtomicCell;
use futures::future::{self, Either};
use futures::pin_mut;
use futures_timer::Delay;
use link::Link;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Transport write failures tolerated before the connection is aborted.
const WRITE_RETRY_BUDGET: u32 = 3;
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(10);

/// What the worker should assemble and emit. Sequence numbers, ack
/// numbers and negotiated options are filled in at emission time so
/// they are as fresh as possible.
#[derive(Debug)]
pub(crate) enum PacketKind {
    Request,
    Response,
    /// A pure acknowledgement. A skippable one is dropped if its
    /// acknowledgement was merged into a DataAck in the meantime.
    Ack { skippable: bool },
    /// Application data; becomes a DataAck when an ack is pending.
    Data(BytesMut),
    CloseReq,
    Close,
    /// Carries the raw reset code.
    Reset(u8),
    Sync,
    /// Answers a Sync, acknowledging the Sync's sequence number.
    SyncAck { ack: u64 },
}

/// A queued outbound packet.
#[derive(Debug)]
pub(crate) struct Entry {
    pub kind: PacketKind,
    /// Mandatory-send packets bypass pacing and survive draining.
    pub mandatory: bool,
    pub acquired: Instant,
}

impl Entry {
    pub fn new(kind: PacketKind) -> Self {
        let mandatory = match kind {
            PacketKind::Reset(_) | PacketKind::Sync | PacketKind::SyncAck { .. } => true,
            _ => false,
        };
        Self {
            kind,
            mandatory,
            acquired: Instant::now(),
        }
    }

    pub fn is_data(&self) -> bool {
        match self.kind {
            PacketKind::Data(_) => true,
            _ => false,
        }
    }
}

/// Sender half of the pipeline, owned by the connection.
pub(crate) struct Pipeline {
    ctrl: Sender<Entry>,
    data: Sender<Entry>,
    draining: Arc<AtomicCell<bool>>,
}

/// Receiver half of the pipeline, owned by the worker task.
pub(crate) struct PipelineRx {
    ctrl: Receiver<Entry>,
    data: Receiver<Entry>,
    draining: Arc<AtomicCell<bool>>,
}

/// Creates a pipeline whose data lane holds at most `high_water`
/// packets.
pub(crate) fn pipeline(high_water: usize) -> (Pipeline, PipelineRx) {
    let (ctrl_tx, ctrl_rx) = unbounded();
    let (data_tx, data_rx) = bounded(high_water);
    let draining = Arc::new(AtomicCell::new(false));
    let tx = Pipeline {
        ctrl: ctrl_tx,
        data: data_tx,
        draining: draining.clone(),
    };
    let rx = PipelineRx {
        ctrl: ctrl_rx,
        data: data_rx,
        draining,
    };
    (tx, rx)
}

impl Pipeline {
    /// Non-blocking enqueue. Safe to call with the connection lock
    /// held: a full data lane reports `WouldBlock` instead of waiting.
    pub fn inject(&self, entry: Entry) -> Result<(), Error> {
        let lane = if entry.is_data() { &self.data } else { &self.ctrl };
        match lane.try_send(entry) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::WouldBlock),
            Err(TrySendError::Closed(_)) => Err(Error::Eof),
        }
    }

    /// Blocking enqueue on the data lane, for writers configured to
    /// wait out back-pressure. Never called under the connection lock.
    pub async fn inject_data(&self, entry: Entry) -> Result<(), Error> {
        self.data.send(entry).await.map_err(|_| Error::Eof)
    }

    /// Marks the pipeline draining: queued entries are discarded except
    /// mandatory-send ones. Used once an outbound Reset is pending.
    pub fn drain(&self) {
        self.draining.store(true);
    }

    /// Closes both lanes; the worker exits once they are empty.
    pub fn close(&self) {
        self.ctrl.close();
        self.data.close();
    }
}

async fn next_entry(rx: &PipelineRx) -> Option<Entry> {
    // Control packets preempt queued data.
    if let Ok(entry) = rx.ctrl.try_recv() {
        return Some(entry);
    }
    let ctrl = rx.ctrl.recv();
    let data = rx.data.recv();
    pin_mut!(ctrl);
    pin_mut!(data);
    match future::select(ctrl, data).await {
        Either::Left((Ok(entry), _)) => Some(entry),
        Either::Right((Ok(entry), _)) => Some(entry),
        Either::Left((Err(_), rest)) => rest.await.ok(),
        Either::Right((Err(_), rest)) => rest.await.ok(),
    }
}

async fn put_on_wire<L: Link>(conn: &ConnInner<L>, header: &Header, wire: &[u8]) -> bool {
    let mut attempts = 0;
    loop {
        match conn.link().send(wire, conn.peer()).await {
            Ok(()) => {
                conn.ccid_tx().on_send(Instant::now(), header);
                return true;
            }
            Err(err) if attempts < WRITE_RETRY_BUDGET => {
                attempts += 1;
                debug!("transport write failed (attempt {}): {}", attempts, err);
                Delay::new(WRITE_RETRY_DELAY).await;
            }
            Err(err) => {
                debug!("transport write failed permanently: {}", err);
                return false;
            }
        }
    }
}

/// Spawns the injection worker for a connection.
pub(crate) fn spawn_worker<L: Link>(conn: Arc<ConnInner<L>>, rx: PipelineRx) {
    task::spawn(async move {
        loop {
            let entry = match next_entry(&rx).await {
                Some(entry) => entry,
                None => break,
            };
            if rx.draining.load() && !entry.mandatory {
                trace!(
                    "draining, dropped {:?} queued {:?} ago",
                    entry.kind,
                    entry.acquired.elapsed()
                );
                continue;
            }
            let header = match conn.assemble(&entry) {
                Some(header) => header,
                None => continue,
            };
            if !entry.mandatory {
                loop {
                    let now = Instant::now();
                    let at = conn.ccid_tx().next_send_time(now, &header);
                    if at <= now {
                        break;
                    }
                    Delay::new(at - now).await;
                    // The controller may have changed its mind while we
                    // were parked; ask again.
                }
                if rx.draining.load() || !conn.send_allowed() {
                    trace!("connection went down while pacing, dropped {:?}", header.ty);
                    continue;
                }
            }
            let wire = match header.encode(conn.mtu()) {
                Ok(wire) => wire,
                Err(err) => {
                    debug!("dropped unencodable {:?} packet: {}", header.ty, err);
                    continue;
                }
            };
            if !put_on_wire(&conn, &header, &wire).await {
                conn.transport_failed();
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_std::task;

    #[test]
    fn test_data_lane_bounded() {
        let (tx, _rx) = pipeline(2);
        assert!(tx.inject(Entry::new(PacketKind::Data(BytesMut::new()))).is_ok());
        assert!(tx.inject(Entry::new(PacketKind::Data(BytesMut::new()))).is_ok());
        assert_eq!(
            tx.inject(Entry::new(PacketKind::Data(BytesMut::new()))),
            Err(Error::WouldBlock)
        );
        // The control lane is unaffected by data back-pressure.
        for _ in 0..16 {
            assert!(tx.inject(Entry::new(PacketKind::Ack { skippable: false })).is_ok());
        }
    }

    #[test]
    fn test_closed_pipeline() {
        let (tx, rx) = pipeline(1);
        tx.inject(Entry::new(PacketKind::Close)).unwrap();
        tx.close();
        assert_eq!(
            tx.inject(Entry::new(PacketKind::Close)),
            Err(Error::Eof)
        );
        // Queued entries still drain after close.
        task::block_on(async {
            assert!(next_entry(&rx).await.is_some());
            assert!(next_entry(&rx).await.is_none());
        });
    }

    #[test]
    fn test_control_preempts_data() {
        let (tx, rx) = pipeline(4);
        tx.inject(Entry::new(PacketKind::Data(BytesMut::new()))).unwrap();
        tx.inject(Entry::new(PacketKind::Sync)).unwrap();
        task::block_on(async {
            let first = next_entry(&rx).await.unwrap();
            assert!(first.mandatory, "control entry should come out first");
        });
    }

    #[test]
    fn test_mandatory_flags() {
        assert!(Entry::new(PacketKind::Reset(2)).mandatory);
        assert!(Entry::new(PacketKind::Sync).mandatory);
        assert!(Entry::new(PacketKind::SyncAck { ack: 0 }).mandatory);
        assert!(!Entry::new(PacketKind::Request).mandatory);
        assert!(!Entry::new(PacketKind::Ack { skippable: true }).mandatory);
    }
}
