use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use upnpfuzz_core::error::UpnpFuzzError;
use upnpfuzz_core::traits::Transport;

/// TTL of multicast datagrams, enough to cross one router
pub const MULTICAST_TTL: u32 = 2;

/// UDP transport used by SSDP. The socket is bound to the configured interface, or to all
/// interfaces, and the response may come from any source address, which is required for
/// multicast searches.
pub struct UdpTransport {
    target: SocketAddr,
    interface: Option<Ipv4Addr>,
    socket: Option<UdpSocket>,
    timeout: Duration,
}

impl UdpTransport {
    /// Create a instance of Udp Transport
    #[must_use]
    pub fn new(target: SocketAddr, interface: Option<Ipv4Addr>, timeout: Duration) -> Self {
        Self {
            target,
            interface,
            socket: None,
            timeout,
        }
    }

    /// Binds a socket the same way the transport does, used by the discovery
    /// # Errors
    pub async fn bind(interface: Option<Ipv4Addr>) -> Result<UdpSocket, UpnpFuzzError> {
        let local = SocketAddr::from((interface.unwrap_or(Ipv4Addr::UNSPECIFIED), 0));
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|err| UpnpFuzzError::Transport {
                err_msg: format!("bind {local}: {err}"),
            })?;
        if let Err(err) = socket.set_multicast_ttl_v4(MULTICAST_TTL) {
            tracing::debug!("Could not set multicast ttl: {err}");
        }
        Ok(socket)
    }
}

impl Transport for UdpTransport {
    fn title(&self) -> String {
        format!("udp ({})", self.target)
    }

    async fn connect(&mut self) -> Result<(), UpnpFuzzError> {
        self.socket = Some(Self::bind(self.interface).await?);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), UpnpFuzzError> {
        self.socket = None;
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, UpnpFuzzError> {
        let Some(socket) = self.socket.as_ref() else {
            return Err(UpnpFuzzError::ConnectionFailed {
                err_msg: "udp socket not bound".into(),
            });
        };
        let (size, _) = timeout(self.timeout, socket.recv_from(buf))
            .await?
            .map_err(|err| UpnpFuzzError::Transport {
                err_msg: format!("recv: {err}"),
            })?;
        Ok(size)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<(), UpnpFuzzError> {
        let Some(socket) = self.socket.as_ref() else {
            return Err(UpnpFuzzError::ConnectionFailed {
                err_msg: "udp socket not bound".into(),
            });
        };
        timeout(self.timeout, socket.send_to(buf, self.target))
            .await?
            .map_err(|err| UpnpFuzzError::Transport {
                err_msg: format!("send to {}: {err}", self.target),
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exchange_with_udp_responder() {
        let responder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = responder.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0; 64];
            let (n, peer) = responder.recv_from(&mut buf).await.unwrap();
            responder.send_to(&buf[..n], peer).await.unwrap();
        });

        let mut transport = UdpTransport::new(addr, None, Duration::from_secs(2));
        let response = transport.exchange(b"M-SEARCH").await.unwrap();
        assert_eq!(response.bytes, b"M-SEARCH");
    }

    #[tokio::test]
    async fn test_missing_response_times_out() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut transport = UdpTransport::new(silent.local_addr().unwrap(), None, Duration::from_millis(50));
        let err = transport.exchange(b"M-SEARCH").await.unwrap_err();
        assert!(matches!(err, UpnpFuzzError::Timeout { .. }));
    }
}
