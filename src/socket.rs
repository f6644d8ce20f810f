//! The application-facing socket API.
//!
//! A `DccpSocket` multiplexes connections over one datagram link.
//! Active opens go through `connect`, passive opens through `listen`
//! and the `Listener`'s stream of accepted connections. A `Conn` hands
//! out unreliable datagram reads and writes; `close` shuts down
//! gracefully with a Close/CloseReq exchange, `abort` tears the
//! connection down with a single Reset.
use crate::ccid::{CongestionControl, NoPacing};
use crate::conn::{Config, ConnInner, State};
use crate::demux::{CcidFactory, SocketInner};
use crate::err::Error;
use crate::feature::FeatureSet;
use async_std::channel::Receiver;
use bytes::BytesMut;
use link::Link;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Configures and creates DCCP sockets.
///
/// The defaults follow RFC 4340: one-second Request retransmits backing
/// off to 64 s over eight attempts, a 200 ms PARTOPEN timer and a
/// two-minute maximum segment lifetime. Tests shrink all of these.
pub struct DccpBuilder {
    msl: Duration,
    request_backoff: Duration,
    partopen_backoff: Duration,
    max_backoff: Duration,
    max_retransmits: u32,
    high_water: usize,
    accept_backlog: usize,
    wanted: FeatureSet,
    ccid: CcidFactory,
}

impl DccpBuilder {
    /// Creates a builder with the default knobs and no pacing.
    pub fn new() -> Self {
        Self {
            msl: Duration::from_secs(120),
            request_backoff: Duration::from_secs(1),
            partopen_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(64),
            max_retransmits: 8,
            high_water: 32,
            accept_backlog: 16,
            wanted: FeatureSet::default(),
            ccid: Arc::new(|| Arc::new(NoPacing) as Arc<dyn CongestionControl>),
        }
    }

    /// Maximum segment lifetime; TIMEWAIT quarantine lasts twice this.
    pub fn set_msl(mut self, msl: Duration) -> Self {
        self.msl = msl;
        self
    }

    /// Initial Request retransmit interval.
    pub fn set_request_backoff(mut self, backoff: Duration) -> Self {
        self.request_backoff = backoff;
        self
    }

    /// Initial PARTOPEN Ack retransmit interval.
    pub fn set_partopen_backoff(mut self, backoff: Duration) -> Self {
        self.partopen_backoff = backoff;
        self
    }

    /// Retransmit interval ceiling.
    pub fn set_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Retransmit attempts before giving up on a handshake.
    pub fn set_max_retransmits(mut self, budget: u32) -> Self {
        self.max_retransmits = budget;
        self
    }

    /// High-water mark of the per-connection outbound data queue.
    pub fn set_high_water(mut self, high_water: usize) -> Self {
        self.high_water = high_water;
        self
    }

    /// Backlog of accepted-but-unclaimed connections per listener.
    pub fn set_accept_backlog(mut self, backlog: usize) -> Self {
        self.accept_backlog = backlog;
        self
    }

    /// Ask the peer to allow 24-bit sequence numbers on data packets.
    pub fn set_allow_short_seqnos(mut self, allow: bool) -> Self {
        self.wanted.allow_short_seqnos = allow;
        self
    }

    /// Sequence validity window to negotiate.
    pub fn set_sequence_window(mut self, window: u64) -> Self {
        self.wanted.sequence_window = window;
        self
    }

    /// Congestion controller factory; invoked once per half-connection.
    pub fn set_congestion_control<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn CongestionControl> + Send + Sync + 'static,
    {
        self.ccid = Arc::new(factory);
        self
    }

    /// Binds a socket over the given link and starts its
    /// demultiplexer.
    pub fn bind<L: Link>(self, link: L) -> DccpSocket<L> {
        let cfg = Config {
            msl: self.msl,
            request_backoff: self.request_backoff,
            partopen_backoff: self.partopen_backoff,
            max_backoff: self.max_backoff,
            max_retransmits: self.max_retransmits,
            high_water: self.high_water,
            accept_backlog: self.accept_backlog,
            wanted: self.wanted,
        };
        DccpSocket {
            inner: SocketInner::new(link, cfg, self.ccid),
        }
    }
}

impl Default for DccpBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A DCCP endpoint bound to a datagram link.
pub struct DccpSocket<L: Link> {
    inner: Arc<SocketInner<L>>,
}

impl<L: Link> DccpSocket<L> {
    /// Binds a socket with the default configuration.
    pub fn bind(link: L) -> Self {
        DccpBuilder::new().bind(link)
    }

    /// Actively opens a connection to `peer` and waits for the
    /// handshake to complete.
    pub async fn connect(
        &self,
        local_port: u16,
        peer: L::Addr,
        remote_port: u16,
        service_code: u32,
    ) -> Result<Conn<L>, Error> {
        let conn = self
            .inner
            .register_active(peer, local_port, remote_port, service_code)?;
        conn.connect().await?;
        Ok(Conn { inner: conn })
    }

    /// Listens for connections naming `service_code` on a local port.
    pub fn listen(&self, local_port: u16, service_code: u32) -> Result<Listener<L>, Error> {
        let rx = self.inner.add_listener(local_port, service_code)?;
        Ok(Listener {
            socket: self.inner.clone(),
            local_port,
            rx,
        })
    }

    /// Path MTU of the underlying link.
    pub fn mtu(&self) -> usize {
        self.inner.link().mtu()
    }
}

/// Accepts incoming connections on one local port.
pub struct Listener<L: Link> {
    socket: Arc<SocketInner<L>>,
    local_port: u16,
    rx: Receiver<Arc<ConnInner<L>>>,
}

impl<L: Link> Listener<L> {
    /// Waits for the next incoming connection.
    pub async fn accept(&self) -> Result<Conn<L>, Error> {
        match self.rx.recv().await {
            Ok(inner) => Ok(Conn { inner }),
            Err(_) => Err(Error::Eof),
        }
    }

    /// The port this listener is bound to.
    pub fn local_port(&self) -> u16 {
        self.local_port
    }
}

impl<L: Link> Drop for Listener<L> {
    fn drop(&mut self) {
        self.socket.remove_listener(self.local_port);
    }
}

impl<L: Link> fmt::Debug for Listener<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("local_port", &self.local_port)
            .finish()
    }
}

/// One DCCP connection.
///
/// Reads and writes are unreliable datagrams: a write queues one packet
/// and a read yields one packet's worth of application data.
pub struct Conn<L: Link> {
    inner: Arc<ConnInner<L>>,
}

impl<L: Link> fmt::Debug for Conn<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn").finish()
    }
}

impl<L: Link> Conn<L> {
    /// Queues one datagram, waiting while the outbound queue is at its
    /// high-water mark. Fails with `Eof` after a local close and
    /// `Reset` after the connection died by reset.
    pub async fn write(&self, buf: &[u8]) -> Result<(), Error> {
        self.inner.write(buf).await
    }

    /// Like `write` but fails with `WouldBlock` instead of waiting.
    pub fn try_write(&self, buf: &[u8]) -> Result<(), Error> {
        self.inner.try_write(buf)
    }

    /// Like `write` but gives up with `Timeout` after `deadline`.
    pub async fn write_timeout(&self, buf: &[u8], deadline: Duration) -> Result<(), Error> {
        self.inner.write_timeout(buf, deadline).await
    }

    /// Receives one datagram. Fails with `Eof` once the connection is
    /// finished and drained.
    pub async fn read(&self) -> Result<BytesMut, Error> {
        self.inner.read().await
    }

    /// Like `read` but gives up with `Timeout` after `deadline`.
    pub async fn read_timeout(&self, deadline: Duration) -> Result<BytesMut, Error> {
        self.inner.read_timeout(deadline).await
    }

    /// Starts a graceful shutdown: Close from a client, CloseReq from a
    /// server.
    pub fn close(&self) {
        self.inner.close()
    }

    /// Tears the connection down with a single Reset, discarding any
    /// queued data.
    pub fn abort(&self) {
        self.inner.abort()
    }

    /// Path MTU of the underlying link.
    pub fn mtu(&self) -> usize {
        self.inner.mtu()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> State {
        self.inner.state()
    }

    /// Local port of this connection.
    pub fn local_port(&self) -> u16 {
        self.inner.local_port()
    }

    /// Remote port of this connection.
    pub fn remote_port(&self) -> u16 {
        self.inner.remote_port()
    }
}

impl<L: Link> Drop for Conn<L> {
    fn drop(&mut self) {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ccid::RatePacing;
    use crate::header::{
        fixed_header_len, internet_checksum, Header, PacketType, ResetCode,
    };
    use crate::options::{DccpOption, ELAPSED_TIME, MANDATORY};
    use async_std::task;
    use byteorder::{BigEndian, ByteOrder};
    use futures_timer::Delay;
    use link::{Link as _, Loopback};
    use std::time::Instant;
    use test_link::{LossyLink, RateLink, TapHandle, TapLink};

    fn fast() -> DccpBuilder {
        DccpBuilder::new()
            .set_msl(Duration::from_millis(50))
            .set_request_backoff(Duration::from_millis(100))
            .set_partopen_backoff(Duration::from_millis(50))
            .set_max_backoff(Duration::from_millis(400))
    }

    struct Pair {
        client: Conn<TapLink<Loopback>>,
        server: Conn<TapLink<Loopback>>,
        client_tap: TapHandle,
        server_tap: TapHandle,
    }

    async fn connect_pair(client_b: DccpBuilder, server_b: DccpBuilder) -> Pair {
        let (la, lb) = Loopback::pair();
        let (ta, client_tap) = TapLink::new(la);
        let (tb, server_tap) = TapLink::new(lb);
        let sa = client_b.bind(ta);
        let sb = server_b.bind(tb);
        let listener = sb.listen(5001, 0x47).unwrap();
        let accept = task::spawn(async move { listener.accept().await.unwrap() });
        let client = sa.connect(5000, 1, 5001, 0x47).await.unwrap();
        let server = accept.await;
        Pair {
            client,
            server,
            client_tap,
            server_tap,
        }
    }

    async fn wait_state<L: link::Link>(conn: &Conn<L>, state: State) {
        for _ in 0..200 {
            if conn.state() == state {
                return;
            }
            Delay::new(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {:?}, stuck in {:?}", state, conn.state());
    }

    fn wire_types(tap: &TapHandle) -> Vec<PacketType> {
        tap.frames()
            .iter()
            .map(|(_, frame)| Header::decode(frame.clone(), true).unwrap().ty)
            .collect()
    }

    fn data_times(tap: &TapHandle) -> Vec<Instant> {
        tap.frames()
            .iter()
            .filter_map(|(at, frame)| {
                let h = Header::decode(frame.clone(), true).unwrap();
                match h.ty {
                    PacketType::Data | PacketType::DataAck => Some(*at),
                    _ => None,
                }
            })
            .collect()
    }

    // P7 and the lossless handshake scenario: three packets, both ends
    // open, no spurious retransmits.
    #[test]
    fn test_lossless_handshake() {
        task::block_on(async {
            let p = connect_pair(fast(), fast()).await;
            wait_state(&p.client, State::Open).await;
            wait_state(&p.server, State::Open).await;

            let client_frames = p.client_tap.frames();
            let request = Header::decode(client_frames[0].1.clone(), false).unwrap();
            assert_eq!(request.ty, PacketType::Request);
            assert!(request.x);
            assert_eq!(request.ack_no, None);
            assert_eq!(request.service_code, 0x47);

            let server_frames = p.server_tap.frames();
            let response = Header::decode(server_frames[0].1.clone(), false).unwrap();
            assert_eq!(response.ty, PacketType::Response);
            assert_eq!(response.ack_no, Some(request.seq_no));

            let ack = Header::decode(client_frames[1].1.clone(), false).unwrap();
            assert_eq!(ack.ty, PacketType::Ack);
            assert_eq!(ack.ack_no, Some(response.seq_no));

            // Exactly one of each handshake packet per side.
            let ct = wire_types(&p.client_tap);
            assert_eq!(
                ct.iter().filter(|t| **t == PacketType::Request).count(),
                1
            );
            assert_eq!(ct.iter().filter(|t| **t == PacketType::Ack).count(), 1);
            let st = wire_types(&p.server_tap);
            assert_eq!(
                st.iter().filter(|t| **t == PacketType::Response).count(),
                1
            );
        });
    }

    #[test]
    fn test_data_both_ways() {
        task::block_on(async {
            let p = connect_pair(fast(), fast()).await;
            p.client.write(b"hello").await.unwrap();
            let got = p.server.read().await.unwrap();
            assert_eq!(&got[..], b"hello");
            p.server.write(b"world").await.unwrap();
            let got = p.client.read().await.unwrap();
            assert_eq!(&got[..], b"world");
        });
    }

    // P9: graceful close walks both sides through TIMEWAIT to CLOSED
    // and the wire goes quiet.
    #[test]
    fn test_graceful_close() {
        task::block_on(async {
            let p = connect_pair(fast(), fast()).await;
            wait_state(&p.client, State::Open).await;
            wait_state(&p.server, State::Open).await;

            p.client.close();
            assert_eq!(p.server.read().await.unwrap_err(), Error::Eof);
            wait_state(&p.client, State::Closed).await;
            wait_state(&p.server, State::Closed).await;

            assert_eq!(p.client.write(b"x").await.unwrap_err(), Error::Eof);

            let quiesced_client = p.client_tap.count();
            let quiesced_server = p.server_tap.count();
            Delay::new(Duration::from_millis(200)).await;
            assert_eq!(p.client_tap.count(), quiesced_client);
            assert_eq!(p.server_tap.count(), quiesced_server);
        });
    }

    // Scenario: abort discards the queue, emits exactly one Reset and
    // fails both sides' next operations.
    #[test]
    fn test_abort_semantics() {
        task::block_on(async {
            let client_b = fast()
                .set_congestion_control(|| {
                    Arc::new(RatePacing::new(Duration::from_millis(200), 1))
                        as Arc<dyn CongestionControl>
                })
                .set_high_water(16);
            let p = connect_pair(client_b, fast()).await;
            wait_state(&p.client, State::Open).await;
            wait_state(&p.server, State::Open).await;

            for _ in 0..10 {
                p.client.try_write(b"payload").unwrap();
            }
            p.client.abort();

            assert_eq!(
                p.client.try_write(b"x").unwrap_err(),
                Error::Reset(ResetCode::Aborted)
            );
            assert_eq!(p.client.read().await.unwrap_err(), Error::Eof);

            wait_state(&p.server, State::TimeWait).await;
            loop {
                match p.server.read().await {
                    Ok(_) => continue,
                    Err(err) => {
                        assert_eq!(err, Error::Eof);
                        break;
                    }
                }
            }
            assert_eq!(
                p.server.try_write(b"x").unwrap_err(),
                Error::Reset(ResetCode::Aborted)
            );

            let types = wire_types(&p.client_tap);
            assert_eq!(
                types.iter().filter(|t| **t == PacketType::Reset).count(),
                1
            );
            let sent_data = types
                .iter()
                .filter(|t| **t == PacketType::Data || **t == PacketType::DataAck)
                .count();
            assert!(sent_data <= 2, "queued data leaked: {}", sent_data);
        });
    }

    // Scenario: a saturating writer over a link capped at 10 packets
    // per 100ms converges on the link's rate.
    #[test]
    fn test_rate_convergence() {
        task::block_on(async {
            let (la, lb) = Loopback::pair();
            let (ta, client_tap) = TapLink::new(la);
            let ra = RateLink::new(ta, Duration::from_millis(100), 10);
            let sa = fast().set_high_water(8).bind(ra);
            let sb = fast().bind(lb);
            let listener = sb.listen(5001, 0x47).unwrap();
            let accept = task::spawn(async move { listener.accept().await.unwrap() });
            let client = sa.connect(5000, 1, 5001, 0x47).await.unwrap();
            let _server = accept.await;
            wait_state(&client, State::Open).await;

            let deadline = Instant::now() + Duration::from_secs(1);
            while Instant::now() < deadline {
                let _ = client.write(b"saturate").await;
            }
            client.abort();

            let times = data_times(&client_tap);
            assert!(!times.is_empty());
            let t0 = times[0];
            let sent = times
                .iter()
                .filter(|t| t.duration_since(t0) < Duration::from_secs(1))
                .count();
            assert!(
                sent >= 70 && sent <= 125,
                "sent {} packets in one second",
                sent
            );
        });
    }

    // P8: inter-emission spacing respects the controller's schedule.
    #[test]
    fn test_pacing_floor() {
        task::block_on(async {
            let delta = Duration::from_millis(20);
            let client_b = fast().set_congestion_control(move || {
                Arc::new(RatePacing::new(delta, 1)) as Arc<dyn CongestionControl>
            });
            let p = connect_pair(client_b, fast()).await;
            wait_state(&p.client, State::Open).await;

            for _ in 0..5 {
                p.client.write(b"tick").await.unwrap();
            }
            Delay::new(Duration::from_millis(250)).await;

            let times = data_times(&p.client_tap);
            assert!(times.len() >= 5);
            for gap in times.windows(2) {
                let spacing = gap[1].duration_since(gap[0]);
                assert!(
                    spacing >= Duration::from_millis(15),
                    "packets {:?} apart",
                    spacing
                );
            }
        });
    }

    #[test]
    fn test_handshake_over_lossy_link() {
        task::block_on(async {
            let (la, lb) = LossyLink::pair(0.9, 0.0);
            let sa = fast()
                .set_request_backoff(Duration::from_millis(30))
                .set_max_retransmits(10)
                .bind(la);
            let sb = fast().bind(lb);
            let listener = sb.listen(5001, 0x47).unwrap();
            let accept = task::spawn(async move { listener.accept().await.unwrap() });
            let client = sa.connect(5000, 1, 5001, 0x47).await.unwrap();
            let server = accept.await;

            task::spawn(async move {
                loop {
                    match server.read().await {
                        Ok(data) => {
                            let _ = server.write(&data).await;
                        }
                        Err(_) => break,
                    }
                }
            });

            // The link drops packets, the protocol does not retransmit
            // data; the application retries until an echo makes it
            // through.
            let mut echoed = false;
            for _ in 0..200 {
                let _ = client.try_write(b"ping");
                if let Ok(data) = client.read_timeout(Duration::from_millis(30)).await {
                    assert_eq!(&data[..], b"ping");
                    echoed = true;
                    break;
                }
            }
            assert!(echoed);
        });
    }

    #[test]
    fn test_connect_timeout() {
        task::block_on(async {
            let (la, _lb) = Loopback::pair();
            let sa = fast()
                .set_request_backoff(Duration::from_millis(10))
                .set_max_retransmits(3)
                .bind(la);
            let err = sa.connect(5000, 1, 5001, 0x47).await.unwrap_err();
            assert_eq!(err, Error::Timeout);
        });
    }

    #[test]
    fn test_connect_refused_on_bad_service_code() {
        task::block_on(async {
            let (la, lb) = Loopback::pair();
            let sa = fast().bind(la);
            let sb = fast().bind(lb);
            let _listener = sb.listen(5001, 0x48).unwrap();
            let err = sa.connect(5000, 1, 5001, 0x47).await.unwrap_err();
            assert_eq!(err, Error::Reset(ResetCode::BadServiceCode));
        });
    }

    // Scenario: a Mandatory marker in front of a reserved option kills
    // the connection with a Mandatory Error reset.
    #[test]
    fn test_mandatory_reserved_option_resets() {
        task::block_on(async {
            let (la, lb) = Loopback::pair();
            let sa = fast().bind(la);
            let listener = sa.listen(5001, 0x47).unwrap();

            let mut request = Header::new(PacketType::Request);
            request.source_port = 6000;
            request.dest_port = 5001;
            request.seq_no = 500;
            request.service_code = 0x47;
            lb.send(&request.encode(1400).unwrap(), &0).await.unwrap();

            let accepted = listener.accept().await.unwrap();
            let (frame, _) = lb.recv().await.unwrap();
            let response = Header::decode(frame, false).unwrap();
            assert_eq!(response.ty, PacketType::Response);

            // Build a valid Ack, then swap its option block for a
            // Mandatory marker followed by a reserved option.
            let mut ack = Header::new(PacketType::Ack);
            ack.source_port = 6000;
            ack.dest_port = 5001;
            ack.seq_no = 501;
            ack.ack_no = Some(response.seq_no);
            ack.options = vec![DccpOption::new(ELAPSED_TIME, vec![0, 0])];
            let mut wire = ack.encode(1400).unwrap();
            let at = fixed_header_len(PacketType::Ack, true);
            wire[at] = MANDATORY;
            wire[at + 1] = 45;
            wire[at + 2] = 3;
            wire[at + 3] = 0;
            wire[6] = 0;
            wire[7] = 0;
            let ck = internet_checksum(&wire[..]);
            BigEndian::write_u16(&mut wire[6..8], ck);
            lb.send(&wire, &0).await.unwrap();

            let (frame, _) = lb.recv().await.unwrap();
            let reset = Header::decode(frame, false).unwrap();
            assert_eq!(reset.ty, PacketType::Reset);
            assert_eq!(reset.reset_code, ResetCode::MandatoryError as u8);
            wait_state(&accepted, State::TimeWait).await;
        });
    }

    // Scenario: once Allow Short Seqnos is negotiated, data rides
    // 24-bit sequence numbers and still gets through.
    #[test]
    fn test_short_seqnos_negotiated() {
        task::block_on(async {
            let p = connect_pair(fast().set_allow_short_seqnos(true), fast()).await;
            wait_state(&p.client, State::Open).await;
            wait_state(&p.server, State::Open).await;

            p.client.write(b"short").await.unwrap();
            let got = p.server.read().await.unwrap();
            assert_eq!(&got[..], b"short");

            let data_frame = p
                .client_tap
                .frames()
                .into_iter()
                .find_map(|(_, frame)| {
                    let h = Header::decode(frame, true).unwrap();
                    match h.ty {
                        PacketType::Data | PacketType::DataAck => Some(h),
                        _ => None,
                    }
                })
                .unwrap();
            assert!(!data_frame.x, "data should use short sequence numbers");
        });
    }

    #[test]
    fn test_would_block_at_high_water() {
        task::block_on(async {
            let client_b = fast()
                .set_congestion_control(|| {
                    Arc::new(RatePacing::new(Duration::from_secs(1), 1))
                        as Arc<dyn CongestionControl>
                })
                .set_high_water(1);
            let p = connect_pair(client_b, fast()).await;
            wait_state(&p.client, State::Open).await;

            let mut would_block = 0;
            for _ in 0..6 {
                if p.client.try_write(b"x") == Err(Error::WouldBlock) {
                    would_block += 1;
                }
            }
            assert!(would_block > 0);

            // The deadline-bounded write gives up rather than waiting
            // out the full pacing interval.
            let err = p
                .client
                .write_timeout(b"x", Duration::from_millis(50))
                .await
                .unwrap_err();
            assert_eq!(err, Error::Timeout);
        });
    }

    #[test]
    fn test_write_larger_than_mtu() {
        task::block_on(async {
            let p = connect_pair(fast(), fast()).await;
            let oversized = vec![0u8; p.client.mtu() + 1];
            assert_eq!(p.client.try_write(&oversized).unwrap_err(), Error::Size);
        });
    }

    #[test]
    fn test_read_deadline() {
        task::block_on(async {
            let p = connect_pair(fast(), fast()).await;
            let err = p
                .client
                .read_timeout(Duration::from_millis(50))
                .await
                .unwrap_err();
            assert_eq!(err, Error::Timeout);
        });
    }

    #[test]
    fn test_listen_port_conflict() {
        task::block_on(async {
            let (la, _lb) = Loopback::pair();
            let sa = fast().bind(la);
            let _listener = sa.listen(5001, 0x47).unwrap();
            assert_eq!(sa.listen(5001, 0x47).unwrap_err(), Error::Refused);
        });
    }

    #[test]
    fn test_duplicate_connect_refused() {
        task::block_on(async {
            let (la, lb) = Loopback::pair();
            let sa = fast().bind(la);
            let sb = fast().bind(lb);
            let listener = sb.listen(5001, 0x47).unwrap();
            let accept = task::spawn(async move { listener.accept().await.unwrap() });
            let _client = sa.connect(5000, 1, 5001, 0x47).await.unwrap();
            let _server = accept.await;
            let err = sa.connect(5000, 1, 5001, 0x47).await.unwrap_err();
            assert_eq!(err, Error::Refused);
        });
    }
}
