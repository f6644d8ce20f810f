//! Error kinds surfaced on the crate boundary.
use crate::header::ResetCode;
use failure::Fail;

/// Errors produced by the header codec, the connection state machine and
/// the socket API.
///
/// The first five kinds are codec errors. They are handled inside the
/// stack by dropping the offending packet (and, where RFC 4340 requires
/// it, answering with a Reset); the application only ever observes them
/// from its own `encode`-side operations, e.g. a write larger than the
/// path MTU failing with `Size`.
#[derive(Clone, Debug, Eq, Fail, PartialEq)]
pub enum Error {
    /// The header or option area is not aligned on a 32-bit boundary.
    #[fail(display = "align")]
    Align,
    /// A packet or field exceeds the space available for it.
    #[fail(display = "size")]
    Size,
    /// A field combination is meaningless, or the checksum failed.
    #[fail(display = "semantic")]
    Semantic,
    /// A numeric field is outside its permitted range.
    #[fail(display = "numeric")]
    Numeric,
    /// The option area failed to parse.
    #[fail(display = "option")]
    Option,
    /// The connection is closed.
    #[fail(display = "eof")]
    Eof,
    /// The operation would block and the caller asked not to.
    #[fail(display = "would block")]
    WouldBlock,
    /// A deadline elapsed before the operation completed.
    #[fail(display = "timeout")]
    Timeout,
    /// The peer refused the connection.
    #[fail(display = "refused")]
    Refused,
    /// The connection was torn down by a Reset with the given code.
    #[fail(display = "reset ({})", _0)]
    Reset(ResetCode),
}
