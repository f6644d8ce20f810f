//! # User-space DCCP
//! Implements the Datagram Congestion Control Protocol ([RFC 4340][0])
//! over an arbitrary unreliable datagram link: an unreliable,
//! connection-oriented transport with pluggable congestion control.
//!
//! ## Unreliable datagrams
//! DCCP delivers whole datagrams, possibly out of order, possibly not
//! at all. There is no retransmission of application data and no stream
//! abstraction; pacing by the congestion controller is the only promise
//! made about a write. Applications needing reliability build it on
//! top, which is the point: congestion control without the cost of
//! reliable delivery semantics.
//!
//! ## Structure
//! The crate follows the protocol's own seams:
//!
//! - [`header`]: the wire codec for the generic header, the
//!   acknowledgement and code subheaders and the option block.
//! - [`options`]: option classification and validation.
//! - [`seqnum`]: 48-bit circular sequence arithmetic and the validity
//!   windows of RFC 4340 §7.5.
//! - [`feature`]: the Change/Confirm feature handshake.
//! - [`ccid`]: the congestion controller seam and two simple
//!   controllers.
//! - connection state machine, injection pipeline and demultiplexer,
//!   surfaced through [`DccpSocket`], [`Listener`] and [`Conn`].
//!
//! The datagram transport underneath is the `Link` trait from the
//! `link` crate; anything that can carry addressed datagrams works.
//!
//! ## Concurrency
//! Each connection runs three cooperating tasks: the state machine
//! driven by the socket's demultiplexer task, an injection worker that
//! drains the outbound queue subject to the congestion controller's
//! pacing, and the reader wakeup path feeding blocked `read` calls.
//! Connection state sits behind one lock held only for O(1) work; no
//! lock is held across I/O, timers or congestion controller calls.
//!
//! ## Example
//! ```no_run
//! # fn main() -> Result<(), dccp::Error> { async_std::task::block_on(async {
//! use dccp::DccpSocket;
//! use link::Loopback;
//!
//! let (a, b) = Loopback::pair();
//! let client = DccpSocket::bind(a);
//! let server = DccpSocket::bind(b);
//!
//! let listener = server.listen(5001, 0x47)?;
//! let conn = client.connect(5000, 1, 5001, 0x47).await?;
//! conn.write(b"ping").await?;
//! let peer = listener.accept().await?;
//! let data = peer.read().await?;
//! assert_eq!(&data[..], b"ping");
//! #
//! # Ok(()) }) }
//! ```
//!
//! [0]: https://tools.ietf.org/html/rfc4340
pub mod ccid;
mod conn;
mod demux;
mod err;
pub mod feature;
pub mod header;
mod inject;
pub mod options;
pub mod seqnum;
mod socket;

pub use crate::ccid::{CongestionControl, NoPacing, RatePacing};
pub use crate::conn::State;
pub use crate::err::Error;
pub use crate::feature::FeatureSet;
pub use crate::header::{Header, PacketType, ResetCode};
pub use crate::options::DccpOption;
pub use crate::socket::{Conn, DccpBuilder, DccpSocket, Listener};
