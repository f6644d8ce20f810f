//! Option classification and the option-block codec.
//!
//! Options 0..=31 are single bytes with no length field; 32..=255 carry
//! a length byte covering type, length and payload. A Mandatory marker
//! (type 1) latches onto the next following option that is neither
//! Padding nor Mandatory and escalates any error in it from an Option
//! Error reset to a Mandatory Error reset.
use crate::err::Error;
use crate::header::{PacketType, ResetCode};
use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};

/// Padding, skipped on receipt.
pub const PADDING: u8 = 0;
/// Marks the following option as mandatory.
pub const MANDATORY: u8 = 1;
/// Slow Receiver flow restraint.
pub const SLOW_RECEIVER: u8 = 2;
/// Feature negotiation: Change L.
pub const CHANGE_L: u8 = 32;
/// Feature negotiation: Confirm L.
pub const CONFIRM_L: u8 = 33;
/// Feature negotiation: Change R.
pub const CHANGE_R: u8 = 34;
/// Feature negotiation: Confirm R.
pub const CONFIRM_R: u8 = 35;
/// Init Cookie.
pub const INIT_COOKIE: u8 = 36;
/// NDP Count.
pub const NDP_COUNT: u8 = 37;
/// Ack Vector, nonce 0.
pub const ACK_VECTOR_NONCE_0: u8 = 38;
/// Ack Vector, nonce 1.
pub const ACK_VECTOR_NONCE_1: u8 = 39;
/// Data Dropped.
pub const DATA_DROPPED: u8 = 40;
/// Timestamp.
pub const TIMESTAMP: u8 = 41;
/// Timestamp Echo.
pub const TIMESTAMP_ECHO: u8 = 42;
/// Elapsed Time.
pub const ELAPSED_TIME: u8 = 43;
/// Data Checksum.
pub const DATA_CHECKSUM: u8 = 44;

/// A decoded option: its type, whether a Mandatory marker preceded it,
/// and its payload (empty for single-byte options).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DccpOption {
    /// Option type, 0..=255.
    pub kind: u8,
    /// Whether a Mandatory marker latched onto this option.
    pub mandatory: bool,
    /// Payload bytes, excluding the type and length bytes.
    pub data: Vec<u8>,
}

impl DccpOption {
    /// A plain option with a payload.
    pub fn new(kind: u8, data: Vec<u8>) -> Self {
        Self {
            kind,
            mandatory: false,
            data,
        }
    }

    /// A single-byte option.
    pub fn single(kind: u8) -> Self {
        Self::new(kind, Vec::new())
    }
}

/// Single-byte options carry no length field.
pub fn is_single_byte(kind: u8) -> bool {
    kind <= 31
}

/// Reserved option types must be rejected.
pub fn is_reserved(kind: u8) -> bool {
    (kind >= 3 && kind <= 31) || (kind >= 45 && kind <= 127)
}

/// CCID-specific options are passed to the congestion controller
/// opaquely.
pub fn is_ccid_specific(kind: u8) -> bool {
    kind >= 128
}

/// Whether the option may appear on a packet of the given type. Data
/// packets admit only a small fixed set; every other packet type admits
/// all options.
pub fn is_valid_for_type(kind: u8, ty: PacketType) -> bool {
    if ty != PacketType::Data {
        return true;
    }
    match kind {
        PADDING | SLOW_RECEIVER | NDP_COUNT | TIMESTAMP | TIMESTAMP_ECHO | DATA_CHECKSUM => true,
        _ => false,
    }
}

/// Validates the payload of a well-known option. Unknown non-reserved
/// options pass unexamined.
pub fn payload_ok(opt: &DccpOption) -> bool {
    match opt.kind {
        NDP_COUNT => opt.data.len() >= 1 && opt.data.len() <= 6,
        TIMESTAMP | TIMESTAMP_ECHO => opt.data.len() == 4,
        ELAPSED_TIME => opt.data.len() == 2 || opt.data.len() == 4,
        ACK_VECTOR_NONCE_0 | ACK_VECTOR_NONCE_1 => {
            opt.data.iter().all(|b| (b >> 6) != 2)
        }
        DATA_CHECKSUM => opt.data.len() == 4,
        CHANGE_L | CHANGE_R => opt.data.len() >= 2,
        CONFIRM_L | CONFIRM_R => opt.data.len() >= 1,
        _ => true,
    }
}

/// Semantic validation of a packet's options: reserved types, legality
/// on the packet type and payload shape. CCID-specific options are not
/// judged here. On failure returns the reset code the connection must
/// answer with: Mandatory Error when a Mandatory marker was attached,
/// Option Error otherwise.
pub fn validate(ty: PacketType, options: &[DccpOption]) -> Result<(), ResetCode> {
    for opt in options {
        let bad = if is_ccid_specific(opt.kind) {
            // Opaque here; the congestion controller judges these.
            false
        } else {
            is_reserved(opt.kind) || !is_valid_for_type(opt.kind, ty) || !payload_ok(opt)
        };
        if bad {
            return Err(if opt.mandatory {
                ResetCode::MandatoryError
            } else {
                ResetCode::OptionError
            });
        }
    }
    Ok(())
}

/// Encodes an option list into a wire block padded to a 32-bit
/// boundary.
///
/// Mandatory flags become Mandatory marker bytes; explicit Mandatory or
/// out-of-range entries fail with `Option`.
pub fn encode(options: &[DccpOption]) -> Result<BytesMut, Error> {
    let mut block = BytesMut::new();
    for opt in options {
        if opt.kind == MANDATORY {
            return Err(Error::Option);
        }
        if opt.mandatory {
            block.put_u8(MANDATORY);
        }
        if is_single_byte(opt.kind) {
            if !opt.data.is_empty() {
                return Err(Error::Option);
            }
            block.put_u8(opt.kind);
        } else {
            let len = opt.data.len() + 2;
            if len > core::u8::MAX as usize {
                return Err(Error::Option);
            }
            block.put_u8(opt.kind);
            block.put_u8(len as u8);
            block.put_slice(&opt.data);
        }
    }
    while block.len() % 4 != 0 {
        block.put_u8(PADDING);
    }
    Ok(block)
}

/// Decodes a wire option block. Structural errors only: bad length
/// bytes, truncation and a Mandatory marker with nothing to latch onto
/// all fail with `Option`. Padding is consumed and not reported.
pub fn decode(mut block: &[u8]) -> Result<Vec<DccpOption>, Error> {
    let mut options = Vec::new();
    let mut mandatory = false;
    while !block.is_empty() {
        let kind = block[0];
        if kind == PADDING {
            block = &block[1..];
            continue;
        }
        if kind == MANDATORY {
            if mandatory {
                return Err(Error::Option);
            }
            mandatory = true;
            block = &block[1..];
            continue;
        }
        if is_single_byte(kind) {
            options.push(DccpOption {
                kind,
                mandatory,
                data: Vec::new(),
            });
            mandatory = false;
            block = &block[1..];
            continue;
        }
        if block.len() < 2 {
            return Err(Error::Option);
        }
        let len = block[1] as usize;
        if len < 2 || len > block.len() {
            return Err(Error::Option);
        }
        options.push(DccpOption {
            kind,
            mandatory,
            data: block[2..len].to_vec(),
        });
        mandatory = false;
        block = &block[len..];
    }
    if mandatory {
        // A Mandatory marker that terminates the list latches nothing.
        return Err(Error::Option);
    }
    Ok(options)
}

/// Reads a big-endian unsigned integer option payload of 1..=6 bytes.
pub fn read_uint(data: &[u8]) -> Option<u64> {
    if data.is_empty() || data.len() > 6 {
        return None;
    }
    Some(BigEndian::read_uint(data, data.len()))
}
