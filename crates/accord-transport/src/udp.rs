//! UDP transport for the voice data plane
//!
//! A thin wrapper over a bound socket. Voice sessions use it for the IP
//! discovery exchange and for paced RTP datagram delivery; neither path
//! retries a failed send.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, info};

use crate::error::{Result, TransportError};

/// UDP transport bound to a local port
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    remote: SocketAddr,
}

impl UdpTransport {
    /// Bind an ephemeral local port for traffic to `remote`
    pub async fn open(remote: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        info!(
            "udp bound {} -> {}",
            socket.local_addr().map_err(TransportError::Io)?,
            remote
        );

        Ok(Self {
            socket: Arc::new(socket),
            remote,
        })
    }

    /// Local socket address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(TransportError::Io)
    }

    /// The voice server's address
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// Send one datagram to the voice server
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        self.socket
            .send_to(data, self.remote)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        Ok(())
    }

    /// Send one datagram and wait for a single reply, used by the IP
    /// discovery exchange
    pub async fn exchange(&self, data: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        self.send(data).await?;

        let mut buf = vec![0u8; 1024];
        let recv = tokio::time::timeout(timeout, self.socket.recv_from(&mut buf));
        match recv.await {
            Ok(Ok((len, from))) => {
                debug!("udp received {} bytes from {}", len, from);
                buf.truncate(len);
                Ok(buf)
            }
            Ok(Err(e)) => Err(TransportError::Io(e)),
            Err(_) => Err(TransportError::RecvTimeout),
        }
    }

    /// A cheap clone sharing the same socket, for the sender task
    pub fn clone_handle(&self) -> Self {
        Self {
            socket: self.socket.clone(),
            remote: self.remote,
        }
    }
}
