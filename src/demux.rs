//! The inbound demultiplexer.
//!
//! One reader task per socket: it pulls datagrams off the link, decodes
//! them and routes them to the owning connection by (peer address,
//! remote port, local port). Unmatched Requests consult the listen
//! table and give birth to RESPOND connections; other unmatched
//! datagrams are answered with a `No Connection` Reset unless they are
//! themselves Resets. Packets with a reserved type are dropped before
//! anything else happens to them.
use crate::ccid::CongestionControl;
use crate::conn::{Config, ConnInner, State};
use crate::err::Error;
use crate::header::{Header, PacketType, ResetCode, MIN_HEADER_LEN};
use crate::seqnum;
use async_std::channel::{bounded, Receiver, Sender};
use async_std::task;
use byteorder::{BigEndian, ByteOrder};
use bytes::BytesMut;
use link::Link;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, trace};

/// Builds one congestion controller per half-connection.
pub(crate) type CcidFactory = Arc<dyn Fn() -> Arc<dyn CongestionControl> + Send + Sync>;

struct ListenEntry<L: Link> {
    service_code: u32,
    tx: Sender<Arc<ConnInner<L>>>,
}

/// Shared per-socket state: the link, the connection table and the
/// listen table.
pub(crate) struct SocketInner<L: Link> {
    weak_self: Weak<SocketInner<L>>,
    link: Arc<L>,
    cfg: Config,
    ccid_factory: CcidFactory,
    conns: Mutex<HashMap<(L::Addr, u16, u16), Arc<ConnInner<L>>>>,
    listeners: Mutex<HashMap<u16, ListenEntry<L>>>,
}

impl<L: Link> SocketInner<L> {
    pub(crate) fn new(link: L, cfg: Config, ccid_factory: CcidFactory) -> Arc<Self> {
        let inner = Arc::new_cyclic(|weak| SocketInner {
            weak_self: weak.clone(),
            link: Arc::new(link),
            cfg,
            ccid_factory,
            conns: Mutex::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
        });
        let run = inner.clone();
        task::spawn(run.run());
        inner
    }

    pub(crate) fn link(&self) -> &Arc<L> {
        &self.link
    }

    /// Creates and registers the client half of an active open.
    pub(crate) fn register_active(
        &self,
        peer: L::Addr,
        local_port: u16,
        remote_port: u16,
        service_code: u32,
    ) -> Result<Arc<ConnInner<L>>, Error> {
        let mut conns = self.conns.lock().unwrap();
        let key = (peer.clone(), remote_port, local_port);
        if conns.contains_key(&key) {
            return Err(Error::Refused);
        }
        let conn = ConnInner::new(
            self.weak_self.clone(),
            self.link.clone(),
            peer,
            local_port,
            remote_port,
            service_code,
            false,
            self.cfg.clone(),
            (self.ccid_factory)(),
            (self.ccid_factory)(),
        );
        conns.insert(key, conn.clone());
        Ok(conn)
    }

    pub(crate) fn unregister(&self, peer: &L::Addr, remote_port: u16, local_port: u16) {
        let key = (peer.clone(), remote_port, local_port);
        self.conns.lock().unwrap().remove(&key);
    }

    /// Installs a listener on a local port.
    pub(crate) fn add_listener(
        &self,
        port: u16,
        service_code: u32,
    ) -> Result<Receiver<Arc<ConnInner<L>>>, Error> {
        let mut listeners = self.listeners.lock().unwrap();
        if listeners.contains_key(&port) {
            return Err(Error::Refused);
        }
        let (tx, rx) = bounded(self.cfg.accept_backlog);
        listeners.insert(port, ListenEntry { service_code, tx });
        Ok(rx)
    }

    pub(crate) fn remove_listener(&self, port: u16) {
        self.listeners.lock().unwrap().remove(&port);
    }

    async fn run(self: Arc<Self>) {
        loop {
            let (bytes, peer) = match self.link.recv().await {
                Ok(datagram) => datagram,
                Err(err) => {
                    debug!("link closed, demultiplexer exiting: {}", err);
                    break;
                }
            };
            self.handle_datagram(bytes, peer).await;
        }
    }

    async fn handle_datagram(&self, bytes: BytesMut, peer: L::Addr) {
        if bytes.len() < MIN_HEADER_LEN {
            trace!("dropped runt datagram of {} bytes", bytes.len());
            return;
        }
        // Reserved packet types are ignored entirely: no reply, no
        // state change.
        let raw_ty = (bytes[8] >> 1) & 0x0f;
        if PacketType::is_wire_reserved(raw_ty) {
            trace!("dropped packet with reserved type {}", raw_ty);
            return;
        }
        let source_port = BigEndian::read_u16(&bytes[0..2]);
        let dest_port = BigEndian::read_u16(&bytes[2..4]);
        let key = (peer.clone(), source_port, dest_port);
        let conn = { self.conns.lock().unwrap().get(&key).cloned() };
        let allow_short = conn
            .as_ref()
            .map(|c| c.allow_short_seqnos())
            .unwrap_or(false);
        match Header::decode(bytes, allow_short) {
            Ok(h) => match conn {
                Some(conn) => conn.handle_packet(h),
                None => self.unmatched(h, peer).await,
            },
            Err(err) => match conn {
                Some(conn) => conn.handle_malformed(err),
                None => trace!("dropped undecodable datagram: {}", err),
            },
        }
    }

    async fn unmatched(&self, h: Header, peer: L::Addr) {
        if h.ty == PacketType::Request {
            let listener = {
                let listeners = self.listeners.lock().unwrap();
                listeners
                    .get(&h.dest_port)
                    .map(|entry| (entry.service_code, entry.tx.clone()))
            };
            if let Some((service_code, tx)) = listener {
                if tx.is_full() {
                    debug!("accept backlog full on port {}", h.dest_port);
                    self.reset_unmatched(&h, &peer, ResetCode::TooBusy).await;
                    return;
                }
                let conn = ConnInner::new(
                    self.weak_self.clone(),
                    self.link.clone(),
                    peer.clone(),
                    h.dest_port,
                    h.source_port,
                    service_code,
                    true,
                    self.cfg.clone(),
                    (self.ccid_factory)(),
                    (self.ccid_factory)(),
                );
                self.conns
                    .lock()
                    .unwrap()
                    .insert((peer, h.source_port, h.dest_port), conn.clone());
                conn.handle_packet(h);
                // A Request the state machine answered with a Reset
                // (bad service code) never reaches accept().
                match conn.state() {
                    State::TimeWait | State::Closed => {}
                    _ => {
                        let _ = tx.try_send(conn);
                    }
                }
                return;
            }
        }
        self.reset_unmatched(&h, &peer, ResetCode::NoConnection).await;
    }

    /// Connectionless Reset for a datagram no connection claims. Its
    /// sequence number continues the stray packet's ack, and it
    /// acknowledges the stray packet itself.
    async fn reset_unmatched(&self, h: &Header, peer: &L::Addr, code: ResetCode) {
        if h.ty == PacketType::Reset {
            return;
        }
        let mut r = Header::new(PacketType::Reset);
        r.source_port = h.dest_port;
        r.dest_port = h.source_port;
        r.reset_code = code as u8;
        r.seq_no = h.ack_no.map(|ack| seqnum::add(ack, 1)).unwrap_or(0);
        r.ack_no = Some(h.seq_no);
        match r.encode(self.link.mtu()) {
            Ok(wire) => {
                trace!("answering unmatched {:?} with reset ({})", h.ty, code);
                let _ = self.link.send(&wire, peer).await;
            }
            Err(err) => debug!("could not form unmatched reset: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ccid::NoPacing;
    use crate::feature::FeatureSet;
    use futures::future::{self, Either};
    use futures::pin_mut;
    use futures_timer::Delay;
    use link::{Link, Loopback};
    use std::time::Duration;

    fn test_config() -> Config {
        Config {
            msl: Duration::from_millis(50),
            request_backoff: Duration::from_millis(50),
            partopen_backoff: Duration::from_millis(25),
            max_backoff: Duration::from_millis(200),
            max_retransmits: 4,
            high_water: 32,
            accept_backlog: 8,
            wanted: FeatureSet::default(),
        }
    }

    fn bind(link: Loopback) -> Arc<SocketInner<Loopback>> {
        SocketInner::new(
            link,
            test_config(),
            Arc::new(|| Arc::new(NoPacing) as Arc<dyn CongestionControl>),
        )
    }

    async fn recv_within(link: &Loopback, dur: Duration) -> Option<BytesMut> {
        let recv = link.recv();
        let timer = Delay::new(dur);
        pin_mut!(recv);
        pin_mut!(timer);
        match future::select(recv, timer).await {
            Either::Left((Ok((bytes, _)), _)) => Some(bytes),
            _ => None,
        }
    }

    // Scenario: a Data packet for a port nobody listens on draws
    // exactly one No Connection reset.
    #[test]
    fn test_reset_on_unknown_port() {
        async_std::task::block_on(async {
            let (a, b) = Loopback::pair();
            let _socket = bind(a);

            let mut data = Header::new(PacketType::Data);
            data.source_port = 6000;
            data.dest_port = 5002;
            data.seq_no = 77;
            data.data = BytesMut::from(&b"x"[..]);
            let wire = data.encode(1400).unwrap();
            b.send(&wire, &0).await.unwrap();

            let reply = recv_within(&b, Duration::from_millis(500)).await.unwrap();
            let reset = Header::decode(reply, false).unwrap();
            assert_eq!(reset.ty, PacketType::Reset);
            assert_eq!(reset.reset_code, ResetCode::NoConnection as u8);
            assert_eq!(reset.source_port, 5002);
            assert_eq!(reset.dest_port, 6000);
            assert_eq!(reset.seq_no, 0);
            assert_eq!(reset.ack_no, Some(77));

            // Exactly one.
            assert!(recv_within(&b, Duration::from_millis(100)).await.is_none());
        });
    }

    // An unmatched Reset must not be answered with another Reset.
    #[test]
    fn test_no_reset_storm() {
        async_std::task::block_on(async {
            let (a, b) = Loopback::pair();
            let _socket = bind(a);

            let mut reset = Header::new(PacketType::Reset);
            reset.source_port = 6000;
            reset.dest_port = 5002;
            reset.seq_no = 1;
            reset.ack_no = Some(0);
            reset.reset_code = ResetCode::NoConnection as u8;
            let wire = reset.encode(1400).unwrap();
            b.send(&wire, &0).await.unwrap();

            assert!(recv_within(&b, Duration::from_millis(150)).await.is_none());
        });
    }

    // P4: reserved packet types disappear without a trace.
    #[test]
    fn test_reserved_type_dropped_silently() {
        async_std::task::block_on(async {
            let (a, b) = Loopback::pair();
            let _socket = bind(a);

            let mut data = Header::new(PacketType::Data);
            data.source_port = 6000;
            data.dest_port = 5002;
            data.seq_no = 77;
            let mut wire = data.encode(1400).unwrap();
            wire[8] = (13 << 1) | 1;
            b.send(&wire, &0).await.unwrap();

            assert!(recv_within(&b, Duration::from_millis(150)).await.is_none());
        });
    }

    // Truncated garbage neither crashes the demultiplexer nor draws a
    // reply.
    #[test]
    fn test_runt_dropped() {
        async_std::task::block_on(async {
            let (a, b) = Loopback::pair();
            let _socket = bind(a);
            b.send(&[1, 2, 3], &0).await.unwrap();
            assert!(recv_within(&b, Duration::from_millis(100)).await.is_none());
        });
    }
}
