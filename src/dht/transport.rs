use std::io;
use std::net::SocketAddr;

use futures::future::BoxFuture;
use futures::FutureExt as _;
use tokio::net::UdpSocket;

/// The datagram primitives the node is built on.
///
/// Anything that can send a datagram to an address and receive one with its
/// source address can carry the DHT; framing, encryption and buffer reuse
/// stay on the other side of this trait.
pub trait Transport: Send + Sync + 'static {
    fn send_to<'a>(&'a self, data: &'a [u8], addr: SocketAddr) -> BoxFuture<'a, io::Result<()>>;

    fn recv_from<'a>(&'a self, buf: &'a mut [u8]) -> BoxFuture<'a, io::Result<(usize, SocketAddr)>>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Transport for UdpSocket {
    fn send_to<'a>(&'a self, data: &'a [u8], addr: SocketAddr) -> BoxFuture<'a, io::Result<()>> {
        async move {
            UdpSocket::send_to(self, data, addr).await?;
            Ok(())
        }
        .boxed()
    }

    fn recv_from<'a>(&'a self, buf: &'a mut [u8]) -> BoxFuture<'a, io::Result<(usize, SocketAddr)>> {
        UdpSocket::recv_from(self, buf).boxed()
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}
