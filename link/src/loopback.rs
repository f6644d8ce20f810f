use crate::Link;
use async_std::channel::{unbounded, Receiver, Sender};
use async_trait::async_trait;
use bytes::BytesMut;
use std::io::{Error, ErrorKind, Result};

const LOOPBACK_MTU: usize = 1500;

/// In-memory duplex link. Created in pairs; everything sent on one end
/// is received on the other, reliably and in order.
pub struct Loopback {
    addr: u8,
    tx: Sender<(BytesMut, u8)>,
    rx: Receiver<(BytesMut, u8)>,
    mtu: usize,
}

impl Loopback {
    /// Creates a connected pair of loopback links with addresses 0 and 1.
    pub fn pair() -> (Loopback, Loopback) {
        Self::pair_with_mtu(LOOPBACK_MTU)
    }

    /// Creates a connected pair with a custom MTU.
    pub fn pair_with_mtu(mtu: usize) -> (Loopback, Loopback) {
        let (atx, arx) = unbounded();
        let (btx, brx) = unbounded();
        let a = Loopback {
            addr: 0,
            tx: btx,
            rx: arx,
            mtu,
        };
        let b = Loopback {
            addr: 1,
            tx: atx,
            rx: brx,
            mtu,
        };
        (a, b)
    }

    /// The address of this end of the pair.
    pub fn local_addr(&self) -> u8 {
        self.addr
    }
}

#[async_trait]
impl Link for Loopback {
    type Addr = u8;

    async fn recv(&self) -> Result<(BytesMut, Self::Addr)> {
        self.rx
            .recv()
            .await
            .map_err(|_| Error::new(ErrorKind::BrokenPipe, "loopback closed"))
    }

    async fn send(&self, buf: &[u8], _to: &Self::Addr) -> Result<()> {
        if buf.len() > self.mtu {
            return Err(Error::new(ErrorKind::InvalidInput, "datagram exceeds mtu"));
        }
        self.tx
            .send((BytesMut::from(buf), self.addr))
            .await
            .map_err(|_| Error::new(ErrorKind::BrokenPipe, "loopback closed"))
    }

    fn mtu(&self) -> usize {
        self.mtu
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_std::task;

    async fn ping_pong() -> Result<()> {
        let (a, b) = Loopback::pair();
        a.send(b"ping", &1).await?;
        let (buf, from) = b.recv().await?;
        assert_eq!(&buf[..], b"ping");
        assert_eq!(from, 0);
        b.send(b"pong", &0).await?;
        let (buf, from) = a.recv().await?;
        assert_eq!(&buf[..], b"pong");
        assert_eq!(from, 1);
        Ok(())
    }

    #[test]
    fn test_ping_pong() {
        task::block_on(ping_pong()).unwrap();
    }

    #[test]
    fn test_mtu() {
        task::block_on(async {
            let (a, _b) = Loopback::pair_with_mtu(16);
            assert!(a.send(&[0u8; 17], &1).await.is_err());
            assert!(a.send(&[0u8; 16], &1).await.is_ok());
        });
    }
}
