use crate::Link;
use async_std::net::UdpSocket;
use async_trait::async_trait;
use bytes::BytesMut;
use std::io::Result;
use std::net::SocketAddr;

const IP6_HEADER_LEN: usize = 40;
const UDP_HEADER_LEN: usize = 8;
const DEFAULT_MTU: usize = 1500 - IP6_HEADER_LEN - UDP_HEADER_LEN;
const MAX_DATAGRAM_LEN: usize = std::u16::MAX as usize;

/// Datagram link over a UDP socket.
pub struct UdpLink {
    socket: UdpSocket,
    mtu: usize,
}

impl UdpLink {
    /// Binds a UDP socket to the given address.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket,
            mtu: DEFAULT_MTU,
        })
    }

    /// Overrides the advertised path MTU.
    pub fn set_mtu(&mut self, mtu: usize) {
        self.mtu = mtu;
    }

    /// Returns the local address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[async_trait]
impl Link for UdpLink {
    type Addr = SocketAddr;

    async fn recv(&self) -> Result<(BytesMut, Self::Addr)> {
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        let (len, peer) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(len);
        Ok((BytesMut::from(&buf[..]), peer))
    }

    async fn send(&self, buf: &[u8], to: &Self::Addr) -> Result<()> {
        self.socket.send_to(buf, *to).await?;
        Ok(())
    }

    fn mtu(&self) -> usize {
        self.mtu
    }
}
