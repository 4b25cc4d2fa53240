use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use upnpfuzz_core::error::UpnpFuzzError;
use upnpfuzz_core::traits::Transport;

/// Basic TCP client transport carrying the HTTP based protocols. Every operation is bounded by
/// the network timeout.
pub struct TcpTransport {
    addr: String,
    stream: Option<TcpStream>,
    timeout: Duration,
}

impl TcpTransport {
    /// Create a instance of Tcp Transport
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            stream: None,
            timeout,
        }
    }

    /// Sends the following requests to `addr`, an open connection is dropped
    pub fn retarget(&mut self, addr: impl Into<String>) {
        let addr = addr.into();
        if addr != self.addr {
            self.stream = None;
            self.addr = addr;
        }
    }

    /// Address the next connection goes to
    #[must_use]
    pub fn address(&self) -> &str {
        &self.addr
    }

    fn not_connected() -> UpnpFuzzError {
        UpnpFuzzError::ConnectionFailed {
            err_msg: "tcp stream not connected".into(),
        }
    }
}

impl Transport for TcpTransport {
    fn title(&self) -> String {
        format!("tcp_client ({})", self.addr)
    }

    async fn connect(&mut self) -> Result<(), UpnpFuzzError> {
        let stream = timeout(self.timeout, TcpStream::connect(&self.addr))
            .await?
            .map_err(|err| UpnpFuzzError::Transport {
                err_msg: format!("connect to {}: {err}", self.addr),
            })?;
        let _ = stream.set_nodelay(true);
        self.stream = Some(stream);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), UpnpFuzzError> {
        if let Some(mut stream) = self.stream.take() {
            let _ = timeout(self.timeout, stream.shutdown()).await;
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, UpnpFuzzError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(Self::not_connected());
        };
        timeout(self.timeout, stream.read(buf))
            .await?
            .map_err(|err| UpnpFuzzError::Transport {
                err_msg: format!("read: {err}"),
            })
    }

    async fn write(&mut self, buf: &[u8]) -> Result<(), UpnpFuzzError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(Self::not_connected());
        };
        timeout(self.timeout, stream.write_all(buf))
            .await?
            .map_err(|err| UpnpFuzzError::Transport {
                err_msg: format!("write: {err}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_exchange_with_echo_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0; 64];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(&buf[..n]).await.unwrap();
        });

        let mut transport = TcpTransport::new(addr.to_string(), Duration::from_secs(2));
        let response = transport.exchange(b"ping").await.unwrap();
        assert_eq!(response.bytes, b"ping");
        assert!(transport.stream.is_none());
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut transport = TcpTransport::new(addr.to_string(), Duration::from_millis(100));
        let err = transport.exchange(b"ping").await.unwrap_err();
        assert!(matches!(err, UpnpFuzzError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_refused_connection_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut transport = TcpTransport::new(addr.to_string(), Duration::from_secs(1));
        let err = transport.exchange(b"ping").await.unwrap_err();
        assert!(matches!(err, UpnpFuzzError::Transport { .. }));
    }
}
