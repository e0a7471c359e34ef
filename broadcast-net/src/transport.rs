//! Injectable network transport (spec section 9: fold the source's
//! "PauseNetwork" test hook into an injectable transport interface).
//! Production code talks to a real `tokio::net::UdpSocket`; tests can
//! inject a transport that drops or records everything instead.

use std::io;
use std::net::SocketAddr;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::net::UdpSocket;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Real UDP socket transport.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr, buffer_size: Option<usize>) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        if let Some(size) = buffer_size {
            let sock_ref = socket2::SockRef::from(&socket);
            let _ = sock_ref.set_recv_buffer_size(size);
            let _ = sock_ref.set_send_buffer_size(size);
        }
        Ok(UdpTransport { socket })
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(buf, target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

/// Test double: swallows every send, never yields a receive. Named after
/// the source's own "PauseNetwork" hook.
#[derive(Default)]
pub struct NullTransport {
    local: Mutex<Option<SocketAddr>>,
}

impl NullTransport {
    pub fn new(local: SocketAddr) -> Self {
        NullTransport {
            local: Mutex::new(Some(local)),
        }
    }
}

#[async_trait]
impl Transport for NullTransport {
    async fn send_to(&self, buf: &[u8], _target: SocketAddr) -> io::Result<usize> {
        Ok(buf.len())
    }

    async fn recv_from(&self, _buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        std::future::pending().await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.local
            .lock()
            .unwrap()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no local addr"))
    }
}
