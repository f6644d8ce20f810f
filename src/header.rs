//! The DCCP header codec.
//!
//! A packet is laid out as: generic header (12 bytes, or 16 with
//! extended sequence numbers) | acknowledgement subheader (0, 4 or 8
//! bytes) | code subheader (0 or 4 bytes) | options padded to a 32-bit
//! boundary | application data. All integers are big-endian. The
//! checksum covers the header plus the first `CsCov * 4` bytes of
//! application data, the whole packet when CsCov is zero.
use crate::err::Error;
use crate::options::{self, DccpOption};
use crate::seqnum::{MAX_SEQNO, MAX_SHORT_SEQNO};
use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};
use failure::Fail;

/// Smallest possible header: a generic header with short sequence
/// numbers.
pub const MIN_HEADER_LEN: usize = 12;

/// Packet types of the generic header.
///
/// Types 10..=15 are reserved; packets carrying them must be dropped on
/// receipt and are never produced.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(u8)]
pub enum PacketType {
    /// Initiates a connection.
    Request = 0,
    /// Answers a Request.
    Response = 1,
    /// Application data without an acknowledgement.
    Data = 2,
    /// Pure acknowledgement.
    Ack = 3,
    /// Application data plus an acknowledgement.
    DataAck = 4,
    /// Server asks the client to close.
    CloseReq = 5,
    /// Closes a connection.
    Close = 6,
    /// Terminates a connection abnormally or confirms a Close.
    Reset = 7,
    /// Re-synchronizes sequence numbers after bursts of loss.
    Sync = 8,
    /// Answers a Sync.
    SyncAck = 9,
}

impl PacketType {
    /// Decodes the 4-bit wire type. Reserved values yield `None`.
    pub fn from_wire(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(PacketType::Request),
            1 => Some(PacketType::Response),
            2 => Some(PacketType::Data),
            3 => Some(PacketType::Ack),
            4 => Some(PacketType::DataAck),
            5 => Some(PacketType::CloseReq),
            6 => Some(PacketType::Close),
            7 => Some(PacketType::Reset),
            8 => Some(PacketType::Sync),
            9 => Some(PacketType::SyncAck),
            _ => None,
        }
    }

    /// Whether the wire type value is in the reserved range.
    pub fn is_wire_reserved(raw: u8) -> bool {
        raw >= 10 && raw <= 15
    }

    /// Whether packets of this type carry an acknowledgement subheader.
    pub fn has_ack_subheader(self) -> bool {
        match self {
            PacketType::Request | PacketType::Data => false,
            _ => true,
        }
    }

    /// Size of the type-dependent code subheader: the service code on
    /// Request and Response, the reset code and data on Reset.
    pub fn code_subheader_len(self) -> usize {
        match self {
            PacketType::Request | PacketType::Response | PacketType::Reset => 4,
            _ => 0,
        }
    }

    /// Whether the payload is application data to be delivered. Other
    /// types may carry bytes (padding, reset text) which are ignored.
    pub fn carries_app_data(self) -> bool {
        match self {
            PacketType::Request
            | PacketType::Response
            | PacketType::Data
            | PacketType::DataAck => true,
            _ => false,
        }
    }
}

/// Reset codes. Codes 12..=127 are reserved and refused when forming a
/// Reset; unknown received codes still terminate the connection but are
/// reported as `Unspecified`.
#[derive(Clone, Copy, Debug, Eq, Fail, Hash, PartialEq)]
#[repr(u8)]
pub enum ResetCode {
    /// No particular reason, or an unknown wire code.
    #[fail(display = "unspecified")]
    Unspecified = 0,
    /// Normal connection close.
    #[fail(display = "closed")]
    Closed = 1,
    /// The connection was aborted, discarding queued data.
    #[fail(display = "aborted")]
    Aborted = 2,
    /// No connection exists at the destination port.
    #[fail(display = "no connection")]
    NoConnection = 3,
    /// A malformed packet was received.
    #[fail(display = "packet error")]
    PacketError = 4,
    /// An invalid option was received.
    #[fail(display = "option error")]
    OptionError = 5,
    /// An invalid option marked Mandatory was received.
    #[fail(display = "mandatory error")]
    MandatoryError = 6,
    /// The server refused the connection.
    #[fail(display = "connection refused")]
    ConnectionRefused = 7,
    /// The Request named a service code the server does not offer.
    #[fail(display = "bad service code")]
    BadServiceCode = 8,
    /// The server is too busy to accept new connections.
    #[fail(display = "too busy")]
    TooBusy = 9,
    /// The Init Cookie echoed by the client was invalid.
    #[fail(display = "bad init cookie")]
    BadInitCookie = 10,
    /// The peer retransmitted too aggressively.
    #[fail(display = "aggression penalty")]
    AggressionPenalty = 11,
}

impl ResetCode {
    /// Maps a wire code. Reserved and CCID-specific codes are honored
    /// but reported as `Unspecified`.
    pub fn from_wire(raw: u8) -> Self {
        match raw {
            1 => ResetCode::Closed,
            2 => ResetCode::Aborted,
            3 => ResetCode::NoConnection,
            4 => ResetCode::PacketError,
            5 => ResetCode::OptionError,
            6 => ResetCode::MandatoryError,
            7 => ResetCode::ConnectionRefused,
            8 => ResetCode::BadServiceCode,
            9 => ResetCode::TooBusy,
            10 => ResetCode::BadInitCookie,
            11 => ResetCode::AggressionPenalty,
            _ => ResetCode::Unspecified,
        }
    }

    /// Whether the wire code is in the reserved range.
    pub fn is_wire_reserved(raw: u8) -> bool {
        raw >= 12 && raw <= 127
    }

    /// Whether the wire code is CCID-specific.
    pub fn is_wire_ccid_specific(raw: u8) -> bool {
        raw >= 128
    }
}

/// Size of the generic header.
pub fn generic_header_len(x: bool) -> usize {
    if x {
        16
    } else {
        12
    }
}

/// Size of the acknowledgement subheader.
pub fn ack_subheader_len(ty: PacketType, x: bool) -> usize {
    if !ty.has_ack_subheader() {
        0
    } else if x {
        8
    } else {
        4
    }
}

/// Size of the fixed portion of the header: generic header plus
/// acknowledgement and code subheaders.
pub fn fixed_header_len(ty: PacketType, x: bool) -> usize {
    generic_header_len(x) + ack_subheader_len(ty, x) + ty.code_subheader_len()
}

/// The (Type, X) legality table. Short sequence numbers are admitted on
/// Data, Ack and DataAck once the Allow Short Seqnos feature is
/// negotiated; every other type requires extended sequence numbers.
pub fn type_and_x_compatible(ty: PacketType, x: bool, allow_short: bool) -> bool {
    match ty {
        PacketType::Data | PacketType::Ack | PacketType::DataAck => x || allow_short,
        _ => x,
    }
}

/// RFC 1071 Internet checksum.
pub(crate) fn internet_checksum(buf: &[u8]) -> u16 {
    let mut sum = 0u32;
    for chunk in buf.chunks(2) {
        let word = if chunk.len() == 2 {
            u16::from_be_bytes([chunk[0], chunk[1]])
        } else {
            u16::from_be_bytes([chunk[0], 0])
        };
        sum += u32::from(word);
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// A decoded DCCP header together with its application data.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Header {
    /// Source port.
    pub source_port: u16,
    /// Destination port.
    pub dest_port: u16,
    /// Packet type.
    pub ty: PacketType,
    /// Extended sequence numbers flag.
    pub x: bool,
    /// 4-bit CCID hint.
    pub ccval: u8,
    /// 4-bit checksum coverage selector.
    pub cscov: u8,
    /// Sequence number, 24-bit when `x` is false.
    pub seq_no: u64,
    /// Acknowledgement number; `None` on Request and Data.
    pub ack_no: Option<u64>,
    /// Service code, meaningful on Request and Response.
    pub service_code: u32,
    /// Raw reset code, meaningful on Reset.
    pub reset_code: u8,
    /// Reset data bytes, meaningful on Reset.
    pub reset_data: [u8; 3],
    /// Options in wire order.
    pub options: Vec<DccpOption>,
    /// Application data.
    pub data: BytesMut,
}

impl Header {
    /// A header of the given type with extended sequence numbers and
    /// all other fields zeroed.
    pub fn new(ty: PacketType) -> Self {
        Self {
            source_port: 0,
            dest_port: 0,
            ty,
            x: true,
            ccval: 0,
            cscov: 0,
            seq_no: 0,
            ack_no: None,
            service_code: 0,
            reset_code: 0,
            reset_data: [0; 3],
            options: Vec::new(),
            data: BytesMut::new(),
        }
    }

    fn check_fields(&self) -> Result<(), Error> {
        if !type_and_x_compatible(self.ty, self.x, true) {
            return Err(Error::Semantic);
        }
        if self.ty.has_ack_subheader() != self.ack_no.is_some() {
            return Err(Error::Semantic);
        }
        let seq_max = if self.x { MAX_SEQNO } else { MAX_SHORT_SEQNO };
        if self.seq_no > seq_max {
            return Err(Error::Numeric);
        }
        if let Some(ack) = self.ack_no {
            if ack > seq_max {
                return Err(Error::Numeric);
            }
        }
        if self.ccval > 15 || self.cscov > 15 {
            return Err(Error::Numeric);
        }
        if self.cscov > 0 && self.cscov as usize * 4 > self.data.len() {
            return Err(Error::Numeric);
        }
        if self.ty == PacketType::Reset && ResetCode::is_wire_reserved(self.reset_code) {
            return Err(Error::Numeric);
        }
        if options::validate(self.ty, &self.options).is_err() {
            return Err(Error::Option);
        }
        Ok(())
    }

    /// Encodes the header and data into a wire buffer. Fails with
    /// `Size` when the result would exceed `mtu`.
    pub fn encode(&self, mtu: usize) -> Result<BytesMut, Error> {
        self.check_fields()?;
        let block = options::encode(&self.options)?;
        let fixed = fixed_header_len(self.ty, self.x);
        let header_len = fixed + block.len();
        if header_len / 4 > core::u8::MAX as usize {
            return Err(Error::Size);
        }
        let total = header_len + self.data.len();
        if total > mtu {
            return Err(Error::Size);
        }

        let mut buf = BytesMut::with_capacity(total);
        buf.put_u16(self.source_port);
        buf.put_u16(self.dest_port);
        buf.put_u8((header_len / 4) as u8);
        buf.put_u8(self.ccval << 4 | self.cscov);
        buf.put_u16(0); // checksum, patched below
        buf.put_u8((self.ty as u8) << 1 | self.x as u8);
        if self.x {
            buf.put_u8(0);
            buf.put_uint(self.seq_no, 6);
        } else {
            buf.put_uint(self.seq_no, 3);
        }
        if let Some(ack) = self.ack_no {
            if self.x {
                buf.put_u16(0);
                buf.put_uint(ack, 6);
            } else {
                buf.put_u8(0);
                buf.put_uint(ack, 3);
            }
        }
        match self.ty {
            PacketType::Request | PacketType::Response => buf.put_u32(self.service_code),
            PacketType::Reset => {
                buf.put_u8(self.reset_code);
                buf.put_slice(&self.reset_data);
            }
            _ => {}
        }
        buf.put_slice(&block);
        buf.put_slice(&self.data);

        let coverage = if self.cscov == 0 {
            self.data.len()
        } else {
            self.cscov as usize * 4
        };
        let ck = internet_checksum(&buf[..header_len + coverage]);
        BigEndian::write_u16(&mut buf[6..8], ck);
        Ok(buf)
    }

    /// Decodes a wire buffer. `allow_short` reflects the negotiated
    /// Allow Short Seqnos feature and admits 24-bit sequence numbers on
    /// Data, Ack and DataAck.
    pub fn decode(mut bytes: BytesMut, allow_short: bool) -> Result<Header, Error> {
        if bytes.len() < MIN_HEADER_LEN {
            return Err(Error::Size);
        }
        let type_byte = bytes[8];
        let x = type_byte & 1 == 1;
        let raw_ty = (type_byte >> 1) & 0x0f;
        let ty = PacketType::from_wire(raw_ty).ok_or(Error::Semantic)?;
        if !type_and_x_compatible(ty, x, allow_short) {
            return Err(Error::Semantic);
        }
        let fixed = fixed_header_len(ty, x);
        if bytes.len() < fixed {
            return Err(Error::Size);
        }
        let header_len = bytes[4] as usize * 4;
        if header_len < fixed || header_len > bytes.len() {
            return Err(Error::Align);
        }
        let ccval = bytes[5] >> 4;
        let cscov = bytes[5] & 0x0f;
        let data_len = bytes.len() - header_len;
        let coverage = if cscov == 0 {
            data_len
        } else {
            let coverage = cscov as usize * 4;
            if coverage > data_len {
                return Err(Error::Numeric);
            }
            coverage
        };

        let stored = BigEndian::read_u16(&bytes[6..8]);
        bytes[6] = 0;
        bytes[7] = 0;
        let computed = internet_checksum(&bytes[..header_len + coverage]);
        if stored != computed {
            return Err(Error::Semantic);
        }

        let source_port = BigEndian::read_u16(&bytes[0..2]);
        let dest_port = BigEndian::read_u16(&bytes[2..4]);
        let seq_no = if x {
            BigEndian::read_uint(&bytes[10..16], 6)
        } else {
            BigEndian::read_uint(&bytes[9..12], 3)
        };
        let mut at = generic_header_len(x);
        let ack_no = if ty.has_ack_subheader() {
            if x {
                at += 8;
                Some(BigEndian::read_uint(&bytes[at - 6..at], 6))
            } else {
                at += 4;
                Some(BigEndian::read_uint(&bytes[at - 3..at], 3))
            }
        } else {
            None
        };
        let mut service_code = 0;
        let mut reset_code = 0;
        let mut reset_data = [0; 3];
        match ty {
            PacketType::Request | PacketType::Response => {
                service_code = BigEndian::read_u32(&bytes[at..at + 4]);
            }
            PacketType::Reset => {
                reset_code = bytes[at];
                reset_data.copy_from_slice(&bytes[at + 1..at + 4]);
            }
            _ => {}
        }
        let options = options::decode(&bytes[fixed..header_len])?;
        let data = bytes.split_off(header_len);

        Ok(Header {
            source_port,
            dest_port,
            ty,
            x,
            ccval,
            cscov,
            seq_no,
            ack_no,
            service_code,
            reset_code,
            reset_data,
            options,
            data,
        })
    }
}
