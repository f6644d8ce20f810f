//! Feature negotiation.
//!
//! A reduced form of RFC 4340 §6: Change options ride on the handshake
//! packets, the peer answers with Confirms, and negotiation is complete
//! once nothing is pending. Three features are understood: the CCID in
//! use, Allow Short Seqnos and the Sequence Window. Unknown feature
//! numbers are ignored.
use crate::options::{self, DccpOption, CHANGE_L, CHANGE_R, CONFIRM_L, CONFIRM_R};
use byteorder::ByteOrder;

/// Feature number of the congestion control identifier.
pub const FEATURE_CCID: u8 = 1;
/// Feature number of Allow Short Seqnos.
pub const FEATURE_ALLOW_SHORT_SEQNOS: u8 = 2;
/// Feature number of the Sequence Window.
pub const FEATURE_SEQUENCE_WINDOW: u8 = 3;

/// Smallest sequence window an endpoint will agree to.
const MIN_SEQUENCE_WINDOW: u64 = 32;

/// The feature values in force on a connection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FeatureSet {
    /// Data, Ack and DataAck may carry 24-bit sequence numbers.
    pub allow_short_seqnos: bool,
    /// Width W of the sequence validity windows.
    pub sequence_window: u64,
    /// Congestion control identifier.
    pub ccid: u8,
}

impl Default for FeatureSet {
    fn default() -> Self {
        Self {
            allow_short_seqnos: false,
            sequence_window: 100,
            ccid: 2,
        }
    }
}

/// Per-connection negotiation state.
#[derive(Clone, Debug)]
pub struct Negotiation {
    wanted: FeatureSet,
    /// Values currently in force.
    pub features: FeatureSet,
    /// Feature numbers changed by us and not yet confirmed.
    pending: Vec<u8>,
}

impl Negotiation {
    /// Starts a negotiation aiming for `wanted`.
    pub fn new(wanted: FeatureSet) -> Self {
        Self {
            wanted,
            features: FeatureSet::default(),
            pending: Vec::new(),
        }
    }

    /// Whether every Change we issued has been confirmed.
    pub fn complete(&self) -> bool {
        self.pending.is_empty()
    }

    fn value_of(set: &FeatureSet, number: u8) -> Vec<u8> {
        match number {
            FEATURE_CCID => vec![set.ccid],
            FEATURE_ALLOW_SHORT_SEQNOS => vec![set.allow_short_seqnos as u8],
            FEATURE_SEQUENCE_WINDOW => {
                let mut buf = [0u8; 6];
                byteorder::BigEndian::write_uint(
                    &mut buf,
                    set.sequence_window,
                    6,
                );
                buf.to_vec()
            }
            _ => Vec::new(),
        }
    }

    fn apply(&mut self, number: u8, value: &[u8]) {
        match number {
            FEATURE_CCID => {
                if let Some(&ccid) = value.first() {
                    self.features.ccid = ccid;
                }
            }
            FEATURE_ALLOW_SHORT_SEQNOS => {
                self.features.allow_short_seqnos = value.first() == Some(&1);
            }
            FEATURE_SEQUENCE_WINDOW => {
                if let Some(w) = options::read_uint(value) {
                    self.features.sequence_window = w.max(MIN_SEQUENCE_WINDOW);
                }
            }
            _ => {}
        }
    }

    fn change_payload(number: u8, value: Vec<u8>) -> Vec<u8> {
        let mut payload = vec![number];
        payload.extend(value);
        payload
    }

    /// Options announcing every preference that differs from the
    /// defaults, for the opening handshake packet. The features go
    /// pending until the peer confirms.
    pub fn change_options(&mut self) -> Vec<DccpOption> {
        let defaults = FeatureSet::default();
        let mut changed = Vec::new();
        if self.wanted.ccid != defaults.ccid {
            changed.push(FEATURE_CCID);
        }
        if self.wanted.allow_short_seqnos != defaults.allow_short_seqnos {
            changed.push(FEATURE_ALLOW_SHORT_SEQNOS);
        }
        if self.wanted.sequence_window != defaults.sequence_window {
            changed.push(FEATURE_SEQUENCE_WINDOW);
        }
        let mut opts = Vec::new();
        for number in changed {
            self.pending.push(number);
            opts.push(DccpOption::new(
                CHANGE_L,
                Self::change_payload(number, Self::value_of(&self.wanted, number)),
            ));
        }
        opts
    }

    /// Digests the peer's feature options and returns the Confirms to
    /// attach to the next outbound handshake packet.
    pub fn process(&mut self, received: &[DccpOption]) -> Vec<DccpOption> {
        let mut replies = Vec::new();
        for opt in received {
            match opt.kind {
                CHANGE_L | CHANGE_R => {
                    if opt.data.len() < 2 {
                        continue;
                    }
                    let number = opt.data[0];
                    self.apply(number, &opt.data[1..]);
                    let confirm = if opt.kind == CHANGE_L {
                        CONFIRM_R
                    } else {
                        CONFIRM_L
                    };
                    replies.push(DccpOption::new(
                        confirm,
                        Self::change_payload(number, Self::value_of(&self.features, number)),
                    ));
                }
                CONFIRM_L | CONFIRM_R => {
                    if opt.data.is_empty() {
                        continue;
                    }
                    let number = opt.data[0];
                    self.apply(number, &opt.data[1..]);
                    self.pending.retain(|&n| n != number);
                }
                _ => {}
            }
        }
        replies
    }
}
