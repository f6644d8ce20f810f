//! Defines the `Link` trait.
//!
//! A link is the unreliable datagram channel a DCCP endpoint runs over.
//! It carries whole packets between opaque peer addresses and makes no
//! promises about delivery, ordering or duplication. Implementations in
//! this crate: an in-memory [`Loopback`] pair for tests and a [`UdpLink`]
//! for running over real sockets.
#![deny(missing_docs)]
mod loopback;
mod udp;

pub use crate::loopback::Loopback;
pub use crate::udp::UdpLink;

use async_trait::async_trait;
use bytes::BytesMut;
use std::fmt::Debug;
use std::hash::Hash;
use std::io::Result;

/// Link trait is used to decouple the protocol core from the datagram
/// transport underneath it.
#[async_trait]
pub trait Link: Send + Sync + 'static {
    /// Opaque peer address carried alongside each datagram.
    type Addr: Clone + Debug + Eq + Hash + Send + Sync + 'static;

    /// Receive a datagram from the link together with the sender address.
    async fn recv(&self) -> Result<(BytesMut, Self::Addr)>;

    /// Send a datagram to the given peer.
    async fn send(&self, buf: &[u8], to: &Self::Addr) -> Result<()>;

    /// Path MTU of the link in bytes.
    fn mtu(&self) -> usize;
}
