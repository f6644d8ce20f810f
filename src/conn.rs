//! The connection state machine.
//!
//! `ConnState` is the pure transition core: it owns the endpoint
//! lifecycle, the GSS/GSR/GAR bookkeeping and the reset policy, and
//! reacts to events by returning a list of effects. `ConnInner` is the
//! plumbing around it: one send-side lock, the injection pipeline, the
//! receive buffer and the timer tasks. The lock is held only across
//! O(1) state work, never across I/O, pacing sleeps or calls into the
//! congestion controller.
use crate::ccid::CongestionControl;
use crate::demux::SocketInner;
use crate::err::Error;
use crate::feature::{FeatureSet, Negotiation};
use crate::header::{fixed_header_len, Header, PacketType, ResetCode};
use crate::inject::{self, Entry, PacketKind, Pipeline};
use crate::options::{self, DccpOption};
use crate::seqnum;
use async_std::channel::{bounded, unbounded, Receiver, Sender};
use async_std::task;
use bytes::BytesMut;
use futures::future::{self, Either};
use futures::pin_mut;
use futures_timer::Delay;
use link::Link;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Out-of-window packets within this multiple of the sequence window
/// still elicit a Sync; anything further out is dropped outright.
const SYNC_WINDOW_FACTOR: u64 = 4;

/// Endpoint lifecycle states, RFC 4340 §8.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum State {
    /// No connection.
    Closed,
    /// Passive endpoint awaiting a Request.
    Listen,
    /// Active endpoint that sent a Request.
    Request,
    /// Passive endpoint that answered with a Response.
    Respond,
    /// Active endpoint that acked the Response, awaiting any packet
    /// from the server.
    PartOpen,
    /// Data flows both ways.
    Open,
    /// Server asked the client to close.
    CloseReq,
    /// This endpoint sent a Close and awaits the confirming Reset.
    Closing,
    /// Terminal quarantine; held for 2 MSL before the port is reused.
    TimeWait,
}

impl State {
    fn is_terminal(self) -> bool {
        self == State::TimeWait || self == State::Closed
    }
}

/// Protocol knobs shared by every connection of a socket.
#[derive(Clone, Debug)]
pub(crate) struct Config {
    pub msl: Duration,
    pub request_backoff: Duration,
    pub partopen_backoff: Duration,
    pub max_backoff: Duration,
    pub max_retransmits: u32,
    pub high_water: usize,
    pub accept_backlog: usize,
    pub wanted: FeatureSet,
}

/// What the state machine asks its surroundings to do.
#[derive(Debug)]
pub(crate) enum Effect {
    /// Hand a packet to the injection pipeline.
    Inject(Entry),
    /// Make application data readable.
    Deliver(BytesMut),
    /// Resolve the active opener's wait.
    OpenDone(Result<(), Error>),
    /// Start the Request retransmit timer.
    StartRequestTimer,
    /// Start the PARTOPEN Ack retransmit timer.
    StartPartOpenTimer,
    /// Discard queued outbound data; only mandatory packets survive.
    Drain,
    /// Wake blocked readers with end-of-file.
    CloseReaders,
    /// Hold TIMEWAIT for 2 MSL, then tear the connection down.
    EnterTimeWait,
    /// Remove the connection immediately.
    TearDown,
}

/// The pure per-connection state, guarded by the send-side lock.
pub(crate) struct ConnState {
    pub state: State,
    /// Whether this is the passive (server) endpoint.
    pub server: bool,
    pub local_port: u16,
    pub remote_port: u16,
    pub service_code: u32,
    /// Initial sequence number sent.
    pub iss: u64,
    /// Initial sequence number received.
    pub isr: u64,
    /// Greatest sequence number sent.
    pub gss: u64,
    /// Greatest sequence number received.
    pub gsr: u64,
    /// Greatest acknowledgement number received.
    pub gar: u64,
    pub negotiation: Negotiation,
    /// An acknowledgement is owed to the peer; the next outbound Data
    /// absorbs it as a DataAck.
    ack_pending: bool,
    /// Raw code of the single Reset still to be put on the wire.
    reset_pending: Option<u8>,
    /// Feature options to ride on the next handshake packet.
    pending_feature_opts: Vec<DccpOption>,
    /// Change options attached to every (re)transmitted Request.
    request_opts: Vec<DccpOption>,
    /// The application initiated the shutdown.
    local_close: bool,
    /// Why the connection died, if it died by Reset.
    pub reset_reason: Option<ResetCode>,
    /// Bumped on every transition; timers check it to expire stale
    /// work.
    pub generation: u64,
}

impl ConnState {
    pub fn new(
        server: bool,
        local_port: u16,
        remote_port: u16,
        service_code: u32,
        iss: u64,
        wanted: FeatureSet,
    ) -> Self {
        Self {
            state: if server { State::Listen } else { State::Closed },
            server,
            local_port,
            remote_port,
            service_code,
            iss,
            isr: 0,
            gss: seqnum::sub(iss, 1),
            gsr: 0,
            gar: seqnum::sub(iss, 1),
            negotiation: Negotiation::new(wanted),
            ack_pending: false,
            reset_pending: None,
            pending_feature_opts: Vec::new(),
            request_opts: Vec::new(),
            local_close: false,
            reset_reason: None,
            generation: 0,
        }
    }

    fn transition(&mut self, to: State) {
        trace!(
            "port {}: {:?} -> {:?}",
            self.local_port,
            self.state,
            to
        );
        self.state = to;
        self.generation += 1;
    }

    fn features(&self) -> &FeatureSet {
        &self.negotiation.features
    }

    /// CLOSED -> REQUEST. Emits the opening Request and arms its
    /// retransmit timer.
    pub fn active_open(&mut self) -> Vec<Effect> {
        self.request_opts = self.negotiation.change_options();
        self.transition(State::Request);
        vec![
            Effect::Inject(Entry::new(PacketKind::Request)),
            Effect::StartRequestTimer,
        ]
    }

    /// Common death-by-reset path: queue exactly one Reset, discard
    /// everything else and quarantine in TIMEWAIT. `graceful` keeps the
    /// application error at end-of-file instead of `Reset`.
    fn emit_reset(&mut self, code: ResetCode, graceful: bool) -> Vec<Effect> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        self.reset_pending = Some(code as u8);
        if graceful {
            self.local_close = true;
        } else {
            self.reset_reason = Some(code);
        }
        self.transition(State::TimeWait);
        // The Reset is injected before the pipeline is drained and
        // closed; draining spares mandatory-send entries.
        vec![
            Effect::Inject(Entry::new(PacketKind::Reset(code as u8))),
            Effect::Drain,
            Effect::CloseReaders,
            Effect::EnterTimeWait,
            Effect::OpenDone(Err(self.shutdown_error())),
        ]
    }

    /// Received a valid Reset: honor it and quarantine.
    fn on_reset(&mut self, h: &Header) -> Vec<Effect> {
        let code = ResetCode::from_wire(h.reset_code);
        if code == ResetCode::Unspecified && h.reset_code != 0 {
            debug!("honoring reset with unknown code {}", h.reset_code);
        }
        self.reset_reason = Some(code);
        self.transition(State::TimeWait);
        let err = if code == ResetCode::ConnectionRefused {
            Error::Refused
        } else {
            Error::Reset(code)
        };
        vec![
            Effect::Drain,
            Effect::CloseReaders,
            Effect::EnterTimeWait,
            Effect::OpenDone(Err(err)),
        ]
    }

    /// A packet failed option validation; answer per the reset policy.
    pub fn option_failure(&mut self, code: ResetCode) -> Vec<Effect> {
        self.emit_reset(code, false)
    }

    /// A packet was malformed beyond option problems.
    pub fn packet_failure(&mut self) -> Vec<Effect> {
        self.emit_reset(ResetCode::PacketError, false)
    }

    /// Application close: graceful shutdown appropriate to the role.
    pub fn app_close(&mut self) -> Vec<Effect> {
        match self.state {
            State::Open | State::PartOpen | State::Respond => {
                self.local_close = true;
                if self.server {
                    self.transition(State::CloseReq);
                    vec![Effect::Inject(Entry::new(PacketKind::CloseReq))]
                } else {
                    self.transition(State::Closing);
                    vec![Effect::Inject(Entry::new(PacketKind::Close))]
                }
            }
            State::Request => self.emit_reset(ResetCode::Aborted, true),
            State::Listen => {
                self.transition(State::Closed);
                vec![Effect::CloseReaders, Effect::TearDown]
            }
            _ => Vec::new(),
        }
    }

    /// Application abort: one Reset, queued data discarded.
    pub fn app_abort(&mut self) -> Vec<Effect> {
        self.emit_reset(ResetCode::Aborted, false)
    }

    /// The transport failed for good; surface it as an abort without
    /// trying to put anything else on the wire.
    pub fn transport_failed(&mut self) -> Vec<Effect> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        self.reset_reason = Some(ResetCode::Aborted);
        self.transition(State::TimeWait);
        vec![
            Effect::Drain,
            Effect::CloseReaders,
            Effect::EnterTimeWait,
            Effect::OpenDone(Err(Error::Reset(ResetCode::Aborted))),
        ]
    }

    /// A retransmit timer fired while its state is still current.
    pub fn retransmit(&mut self) -> Vec<Effect> {
        match self.state {
            State::Request => vec![Effect::Inject(Entry::new(PacketKind::Request))],
            State::PartOpen => {
                vec![Effect::Inject(Entry::new(PacketKind::Ack { skippable: false }))]
            }
            _ => Vec::new(),
        }
    }

    /// The retransmit budget ran out.
    pub fn retransmits_exhausted(&mut self) -> Vec<Effect> {
        match self.state {
            State::Request => {
                self.transition(State::Closed);
                vec![
                    Effect::OpenDone(Err(Error::Timeout)),
                    Effect::CloseReaders,
                    Effect::Drain,
                    Effect::TearDown,
                ]
            }
            State::PartOpen => self.emit_reset(ResetCode::Aborted, false),
            _ => Vec::new(),
        }
    }

    /// Error an application write would hit right now; `None` means the
    /// write may be queued.
    pub fn write_error(&self) -> Option<Error> {
        match self.state {
            State::Open | State::PartOpen | State::Respond => None,
            State::Listen | State::Request => Some(Error::WouldBlock),
            _ => Some(self.shutdown_error()),
        }
    }

    fn shutdown_error(&self) -> Error {
        if self.local_close {
            Error::Eof
        } else {
            match self.reset_reason {
                Some(code) => Error::Reset(code),
                None => Error::Eof,
            }
        }
    }

    fn update_gsr(&mut self, seq: u64) {
        if seqnum::lt(self.gsr, seq) {
            self.gsr = seq;
        }
    }

    fn update_gar(&mut self, ack: u64) {
        if seqnum::lt(self.gar, ack) {
            self.gar = ack;
        }
    }

    /// Dispatches one decoded inbound packet.
    pub fn on_packet(&mut self, h: &Header) -> Vec<Effect> {
        let seq = if h.x {
            h.seq_no
        } else {
            seqnum::extend(h.seq_no, self.gsr)
        };
        let ack = h.ack_no.map(|a| {
            if h.x {
                a
            } else {
                seqnum::extend(a, self.gss)
            }
        });
        let mut fx = Vec::new();
        match self.state {
            State::Closed | State::TimeWait => {}
            State::Listen => self.on_packet_listen(h, seq, &mut fx),
            State::Request => self.on_packet_request(h, seq, ack, &mut fx),
            State::Respond => self.on_packet_respond(h, seq, ack, &mut fx),
            _ => self.on_packet_open(h, seq, ack, &mut fx),
        }
        fx
    }

    fn on_packet_listen(&mut self, h: &Header, seq: u64, fx: &mut Vec<Effect>) {
        match h.ty {
            PacketType::Request => {
                if h.service_code != self.service_code {
                    fx.extend(self.emit_reset(ResetCode::BadServiceCode, false));
                    return;
                }
                self.isr = seq;
                self.gsr = seq;
                let replies = self.negotiation.process(&h.options);
                self.pending_feature_opts.extend(replies);
                self.transition(State::Respond);
                fx.push(Effect::Inject(Entry::new(PacketKind::Response)));
                if !h.data.is_empty() {
                    fx.push(Effect::Deliver(h.data.clone()));
                }
            }
            _ => {}
        }
    }

    fn on_packet_request(
        &mut self,
        h: &Header,
        seq: u64,
        ack: Option<u64>,
        fx: &mut Vec<Effect>,
    ) {
        match h.ty {
            PacketType::Response => {
                let ack = match ack {
                    Some(ack) => ack,
                    None => return,
                };
                // The Response must acknowledge one of our Requests.
                if !seqnum::in_range(self.iss, self.gss, ack) {
                    return;
                }
                if h.service_code != self.service_code {
                    fx.extend(self.emit_reset(ResetCode::BadServiceCode, false));
                    return;
                }
                self.isr = seq;
                self.gsr = seq;
                self.gar = ack;
                let replies = self.negotiation.process(&h.options);
                self.pending_feature_opts.extend(replies);
                self.transition(State::PartOpen);
                fx.push(Effect::Inject(Entry::new(PacketKind::Ack {
                    skippable: false,
                })));
                fx.push(Effect::StartPartOpenTimer);
                fx.push(Effect::OpenDone(Ok(())));
                if !h.data.is_empty() {
                    fx.push(Effect::Deliver(h.data.clone()));
                }
            }
            PacketType::Reset => fx.extend(self.on_reset(h)),
            _ => {}
        }
    }

    fn on_packet_respond(
        &mut self,
        h: &Header,
        seq: u64,
        ack: Option<u64>,
        fx: &mut Vec<Effect>,
    ) {
        match h.ty {
            PacketType::Request => {
                // Retransmitted Request: the client missed our Response.
                let replies = self.negotiation.process(&h.options);
                self.pending_feature_opts.extend(replies);
                fx.push(Effect::Inject(Entry::new(PacketKind::Response)));
            }
            PacketType::Ack | PacketType::DataAck | PacketType::Data => {
                if let Some(ack) = ack {
                    if !seqnum::in_range(self.iss, self.gss, ack) {
                        return;
                    }
                    self.update_gar(ack);
                }
                self.update_gsr(seq);
                let replies = self.negotiation.process(&h.options);
                self.pending_feature_opts.extend(replies);
                self.transition(State::Open);
                // Our ack of the client's ack completes its handshake.
                self.ack_pending = true;
                fx.push(Effect::Inject(Entry::new(PacketKind::Ack {
                    skippable: true,
                })));
                if h.ty.carries_app_data() && !h.data.is_empty() {
                    fx.push(Effect::Deliver(h.data.clone()));
                }
            }
            PacketType::Reset => fx.extend(self.on_reset(h)),
            _ => {}
        }
    }

    fn on_packet_open(
        &mut self,
        h: &Header,
        seq: u64,
        ack: Option<u64>,
        fx: &mut Vec<Effect>,
    ) {
        let w = self.features().sequence_window;
        if !seqnum::in_seqno_window(self.gsr, self.gss, w, seq) {
            if seqnum::in_seqno_window(self.gsr, self.gss, w * SYNC_WINDOW_FACTOR, seq) {
                trace!("out-of-window seqno {}, answering with sync", seq);
                fx.push(Effect::Inject(Entry::new(PacketKind::Sync)));
            } else {
                trace!("dropped far out-of-window seqno {}", seq);
            }
            return;
        }
        if let Some(ack) = ack {
            if !seqnum::in_ackno_window(self.gar, self.gss, w, ack) {
                trace!("dropped packet with out-of-window ackno {}", ack);
                return;
            }
        }
        self.update_gsr(seq);
        if let Some(ack) = ack {
            self.update_gar(ack);
        }
        let replies = self.negotiation.process(&h.options);
        self.pending_feature_opts.extend(replies);

        if self.state == State::PartOpen {
            match h.ty {
                PacketType::Response => {
                    // Our Ack was lost; repeat it.
                    fx.push(Effect::Inject(Entry::new(PacketKind::Ack {
                        skippable: false,
                    })));
                    return;
                }
                PacketType::Reset | PacketType::Sync => {}
                _ => self.transition(State::Open),
            }
        }

        match h.ty {
            PacketType::Data | PacketType::DataAck | PacketType::Ack => {
                if h.ty.carries_app_data() && !h.data.is_empty() {
                    fx.push(Effect::Deliver(h.data.clone()));
                }
                if h.ty != PacketType::Ack {
                    self.ack_pending = true;
                    fx.push(Effect::Inject(Entry::new(PacketKind::Ack {
                        skippable: true,
                    })));
                }
            }
            PacketType::Sync => {
                fx.push(Effect::Inject(Entry::new(PacketKind::SyncAck { ack: seq })));
            }
            PacketType::SyncAck => {}
            PacketType::CloseReq => match self.state {
                State::Closing => {
                    // Our Close crossed with a repeated CloseReq.
                    fx.push(Effect::Inject(Entry::new(PacketKind::Close)));
                }
                _ if !self.server => {
                    self.local_close = true;
                    self.transition(State::Closing);
                    fx.push(Effect::Inject(Entry::new(PacketKind::Close)));
                }
                _ => {}
            },
            PacketType::Close => {
                // Confirm with a Reset and quarantine.
                fx.extend(self.emit_reset(ResetCode::Closed, true));
            }
            PacketType::Reset => fx.extend(self.on_reset(h)),
            PacketType::Request | PacketType::Response => {}
        }
    }

    fn next_seq(&mut self, short: bool) -> u64 {
        self.gss = seqnum::add(self.gss, 1);
        if short {
            self.gss & seqnum::MAX_SHORT_SEQNO
        } else {
            self.gss
        }
    }

    /// Builds the wire header for a queued packet against live state,
    /// or `None` when the packet is no longer wanted. Called by the
    /// injection worker at emission time so sequence numbers, ack
    /// numbers and options are fresh.
    pub fn assemble(&mut self, kind: &PacketKind, extra: Vec<DccpOption>) -> Option<Header> {
        if let PacketKind::Reset(code) = kind {
            if self.reset_pending != Some(*code) {
                return None;
            }
            self.reset_pending = None;
        } else if self.state.is_terminal() {
            return None;
        }

        let ty = match kind {
            PacketKind::Request => {
                if self.state != State::Request {
                    return None;
                }
                PacketType::Request
            }
            PacketKind::Response => {
                if self.state != State::Respond {
                    return None;
                }
                PacketType::Response
            }
            PacketKind::Ack { skippable } => {
                if *skippable && !self.ack_pending {
                    return None;
                }
                self.ack_pending = false;
                PacketType::Ack
            }
            PacketKind::Data(_) => match self.state {
                State::Respond | State::PartOpen | State::Open => {
                    if self.ack_pending {
                        self.ack_pending = false;
                        PacketType::DataAck
                    } else {
                        PacketType::Data
                    }
                }
                _ => return None,
            },
            PacketKind::CloseReq => {
                if self.state != State::CloseReq {
                    return None;
                }
                PacketType::CloseReq
            }
            PacketKind::Close => {
                if self.state != State::Closing {
                    return None;
                }
                PacketType::Close
            }
            PacketKind::Reset(_) => PacketType::Reset,
            PacketKind::Sync => PacketType::Sync,
            PacketKind::SyncAck { .. } => PacketType::SyncAck,
        };

        let short = self.features().allow_short_seqnos
            && match ty {
                PacketType::Data | PacketType::Ack | PacketType::DataAck => true,
                _ => false,
            };
        let mut h = Header::new(ty);
        h.source_port = self.local_port;
        h.dest_port = self.remote_port;
        h.x = !short;
        h.seq_no = self.next_seq(short);
        if ty.has_ack_subheader() {
            let ack = match kind {
                PacketKind::SyncAck { ack } => *ack,
                _ => self.gsr,
            };
            h.ack_no = Some(if short {
                ack & seqnum::MAX_SHORT_SEQNO
            } else {
                ack
            });
        }
        match ty {
            PacketType::Request | PacketType::Response => h.service_code = self.service_code,
            PacketType::Reset => {
                if let PacketKind::Reset(code) = kind {
                    h.reset_code = *code;
                }
            }
            _ => {}
        }
        if ty == PacketType::Request {
            h.options.extend(self.request_opts.iter().cloned());
        }
        match ty {
            PacketType::Response | PacketType::Ack | PacketType::DataAck => {
                h.options.append(&mut self.pending_feature_opts);
            }
            _ => {}
        }
        if ty != PacketType::Data {
            h.options.extend(extra);
        }
        if let PacketKind::Data(payload) = kind {
            h.data = payload.clone();
        }
        Some(h)
    }
}

/// The shared half of a connection: pure state under the send lock plus
/// the channels binding the three per-connection tasks together.
pub(crate) struct ConnInner<L: Link> {
    weak_self: Weak<ConnInner<L>>,
    slk: Mutex<ConnState>,
    pipe: Pipeline,
    rx_tx: Sender<BytesMut>,
    rx_rx: Receiver<BytesMut>,
    open_tx: Sender<Result<(), Error>>,
    open_rx: Receiver<Result<(), Error>>,
    link: Arc<L>,
    peer: L::Addr,
    local_port: u16,
    remote_port: u16,
    ccid_tx: Arc<dyn CongestionControl>,
    ccid_rx: Arc<dyn CongestionControl>,
    cfg: Config,
    socket: Weak<SocketInner<L>>,
}

impl<L: Link> ConnInner<L> {
    pub(crate) fn new(
        socket: Weak<SocketInner<L>>,
        link: Arc<L>,
        peer: L::Addr,
        local_port: u16,
        remote_port: u16,
        service_code: u32,
        server: bool,
        cfg: Config,
        ccid_tx: Arc<dyn CongestionControl>,
        ccid_rx: Arc<dyn CongestionControl>,
    ) -> Arc<Self> {
        let iss = rand::random::<u64>() & seqnum::MAX_SEQNO;
        let state = ConnState::new(server, local_port, remote_port, service_code, iss, cfg.wanted);
        let (pipe, pipe_rx) = inject::pipeline(cfg.high_water);
        let (rx_tx, rx_rx) = unbounded();
        let (open_tx, open_rx) = bounded(1);
        let conn = Arc::new_cyclic(|weak| ConnInner {
            weak_self: weak.clone(),
            slk: Mutex::new(state),
            pipe,
            rx_tx,
            rx_rx,
            open_tx,
            open_rx,
            link,
            peer,
            local_port,
            remote_port,
            ccid_tx,
            ccid_rx,
            cfg,
            socket,
        });
        inject::spawn_worker(conn.clone(), pipe_rx);
        conn
    }

    pub(crate) fn local_port(&self) -> u16 {
        self.local_port
    }

    pub(crate) fn remote_port(&self) -> u16 {
        self.remote_port
    }

    pub(crate) fn peer(&self) -> &L::Addr {
        &self.peer
    }

    pub(crate) fn link(&self) -> &L {
        &self.link
    }

    pub(crate) fn ccid_tx(&self) -> &dyn CongestionControl {
        &*self.ccid_tx
    }

    pub(crate) fn mtu(&self) -> usize {
        self.link.mtu()
    }

    pub(crate) fn state(&self) -> State {
        self.slk.lock().unwrap().state
    }

    /// Whether decode should admit short sequence numbers from the
    /// peer.
    pub(crate) fn allow_short_seqnos(&self) -> bool {
        self.slk
            .lock()
            .unwrap()
            .negotiation
            .features
            .allow_short_seqnos
    }

    fn dispatch(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Inject(entry) => {
                    // Control entries ride the unbounded lane; this
                    // cannot block.
                    let _ = self.pipe.inject(entry);
                }
                Effect::Deliver(data) => {
                    let _ = self.rx_tx.try_send(data);
                }
                Effect::OpenDone(result) => {
                    let _ = self.open_tx.try_send(result);
                }
                Effect::StartRequestTimer => {
                    self.spawn_retransmit_timer(self.cfg.request_backoff)
                }
                Effect::StartPartOpenTimer => {
                    self.spawn_retransmit_timer(self.cfg.partopen_backoff)
                }
                Effect::Drain => {
                    self.pipe.drain();
                    self.pipe.close();
                }
                Effect::CloseReaders => {
                    self.rx_tx.close();
                }
                Effect::EnterTimeWait => self.spawn_expire(2 * self.cfg.msl),
                Effect::TearDown => self.teardown(),
            }
        }
    }

    fn teardown(&self) {
        self.pipe.close();
        self.rx_tx.close();
        self.open_tx.close();
        if let Some(socket) = self.socket.upgrade() {
            socket.unregister(&self.peer, self.remote_port, self.local_port);
        }
    }

    fn spawn_expire(&self, after: Duration) {
        let weak = self.weak_self.clone();
        let gen = self.slk.lock().unwrap().generation;
        task::spawn(async move {
            Delay::new(after).await;
            let conn = match weak.upgrade() {
                Some(conn) => conn,
                None => return,
            };
            let expired = {
                let mut st = conn.slk.lock().unwrap();
                if st.generation == gen && st.state == State::TimeWait {
                    st.transition(State::Closed);
                    true
                } else {
                    false
                }
            };
            if expired {
                conn.teardown();
            }
        });
    }

    fn spawn_retransmit_timer(&self, initial: Duration) {
        let weak = self.weak_self.clone();
        let gen = self.slk.lock().unwrap().generation;
        let max_backoff = self.cfg.max_backoff;
        let budget = self.cfg.max_retransmits;
        task::spawn(async move {
            let mut backoff = initial;
            for _ in 0..budget {
                Delay::new(backoff).await;
                let conn = match weak.upgrade() {
                    Some(conn) => conn,
                    None => return,
                };
                let fx = {
                    let mut st = conn.slk.lock().unwrap();
                    if st.generation != gen {
                        return;
                    }
                    st.retransmit()
                };
                conn.dispatch(fx);
                backoff = (backoff * 2).min(max_backoff);
            }
            let conn = match weak.upgrade() {
                Some(conn) => conn,
                None => return,
            };
            let fx = {
                let mut st = conn.slk.lock().unwrap();
                if st.generation != gen {
                    return;
                }
                st.retransmits_exhausted()
            };
            conn.dispatch(fx);
        });
    }

    /// Kicks off the active open and returns once the handshake reaches
    /// PARTOPEN (or fails).
    pub(crate) async fn connect(&self) -> Result<(), Error> {
        let fx = { self.slk.lock().unwrap().active_open() };
        self.dispatch(fx);
        match self.open_rx.recv().await {
            Ok(result) => result,
            Err(_) => Err(Error::Eof),
        }
    }

    /// Entry point for decoded inbound packets from the demultiplexer.
    pub(crate) fn handle_packet(&self, h: Header) {
        let now = Instant::now();
        // Congestion controllers and CCID options are consulted without
        // the connection lock held.
        self.ccid_rx.on_receive(now, &h);
        if h.ack_no.is_some() {
            self.ccid_tx.on_receive(now, &h);
        }
        for opt in h.options.iter().filter(|o| options::is_ccid_specific(o.kind)) {
            if let Err(err) = self.ccid_rx.process_option(opt) {
                if opt.mandatory {
                    let fx = {
                        self.slk
                            .lock()
                            .unwrap()
                            .option_failure(ResetCode::MandatoryError)
                    };
                    self.dispatch(fx);
                    return;
                }
                debug!("ignored bad ccid option {}: {}", opt.kind, err);
            }
        }
        if let Err(code) = options::validate(h.ty, &h.options) {
            let fx = { self.slk.lock().unwrap().option_failure(code) };
            self.dispatch(fx);
            return;
        }
        let fx = { self.slk.lock().unwrap().on_packet(&h) };
        self.dispatch(fx);
    }

    /// A packet addressed to this connection failed to decode.
    pub(crate) fn handle_malformed(&self, err: Error) {
        let fx = match err {
            // Checksum and similar semantic failures are plain
            // corruption; drop without telling anyone.
            Error::Semantic => {
                trace!("dropped corrupt packet");
                return;
            }
            Error::Option => {
                let mut st = self.slk.lock().unwrap();
                st.option_failure(ResetCode::OptionError)
            }
            _ => {
                let mut st = self.slk.lock().unwrap();
                st.packet_failure()
            }
        };
        self.dispatch(fx);
    }

    fn check_write(&self, len: usize) -> Result<(), Error> {
        if fixed_header_len(PacketType::DataAck, true) + len > self.mtu() {
            return Err(Error::Size);
        }
        match self.slk.lock().unwrap().write_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Queues application data, waiting out back-pressure.
    pub(crate) async fn write(&self, buf: &[u8]) -> Result<(), Error> {
        self.check_write(buf.len())?;
        self.pipe
            .inject_data(Entry::new(PacketKind::Data(BytesMut::from(buf))))
            .await
            .map_err(|_| self.slk.lock().unwrap().shutdown_error())
    }

    /// Like `write`, but gives up with `Timeout` when the queue stays
    /// at its high-water mark past `deadline`.
    pub(crate) async fn write_timeout(&self, buf: &[u8], deadline: Duration) -> Result<(), Error> {
        self.check_write(buf.len())?;
        let send = self
            .pipe
            .inject_data(Entry::new(PacketKind::Data(BytesMut::from(buf))));
        let timer = Delay::new(deadline);
        pin_mut!(send);
        pin_mut!(timer);
        match future::select(send, timer).await {
            Either::Left((result, _)) => {
                result.map_err(|_| self.slk.lock().unwrap().shutdown_error())
            }
            Either::Right(((), _)) => Err(Error::Timeout),
        }
    }

    /// Queues application data or fails with `WouldBlock` at the
    /// high-water mark.
    pub(crate) fn try_write(&self, buf: &[u8]) -> Result<(), Error> {
        self.check_write(buf.len())?;
        self.pipe
            .inject(Entry::new(PacketKind::Data(BytesMut::from(buf))))
    }

    /// Receives the next chunk of application data.
    pub(crate) async fn read(&self) -> Result<BytesMut, Error> {
        self.rx_rx.recv().await.map_err(|_| Error::Eof)
    }

    /// Like `read`, but gives up after `deadline`.
    pub(crate) async fn read_timeout(&self, deadline: Duration) -> Result<BytesMut, Error> {
        let read = self.rx_rx.recv();
        let timer = Delay::new(deadline);
        pin_mut!(read);
        pin_mut!(timer);
        match future::select(read, timer).await {
            Either::Left((result, _)) => result.map_err(|_| Error::Eof),
            Either::Right(((), _)) => Err(Error::Timeout),
        }
    }

    pub(crate) fn close(&self) {
        let fx = { self.slk.lock().unwrap().app_close() };
        self.dispatch(fx);
    }

    pub(crate) fn abort(&self) {
        let fx = { self.slk.lock().unwrap().app_abort() };
        self.dispatch(fx);
    }

    // Worker-side hooks.

    pub(crate) fn assemble(&self, entry: &Entry) -> Option<Header> {
        let extra = match entry.kind {
            PacketKind::Data(_) => Vec::new(),
            _ => self.ccid_tx.options(),
        };
        self.slk.lock().unwrap().assemble(&entry.kind, extra)
    }

    pub(crate) fn send_allowed(&self) -> bool {
        !self.slk.lock().unwrap().state.is_terminal()
    }

    pub(crate) fn transport_failed(&self) {
        let fx = { self.slk.lock().unwrap().transport_failed() };
        self.dispatch(fx);
    }
}
