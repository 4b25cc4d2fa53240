use crate::transport::udp::UdpTransport;
use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use upnpfuzz_core::error::UpnpFuzzError;
use upnpfuzz_core::request::RawResponse;
use upnpfuzz_core::traits::RESPONSE_BUFFER_SIZE;

/// SSDP multicast group
pub const SSDP_MULTICAST: SocketAddr = SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::new(239, 255, 255, 250)), 1900);

const SEARCH: &[u8] = b"M-SEARCH * HTTP/1.1\r\nHOST: 239.255.255.250:1900\r\nMAN: \"ssdp:discover\"\r\nMX: 1\r\nST: ssdp:all\r\n\r\n";

#[derive(Debug, Clone, PartialEq, Eq)]
/// A device that answered the search
pub struct DiscoveredDevice {
    /// source address of the answer
    pub address: SocketAddr,
    /// `LOCATION` header, the url of the device description
    pub location: String,
    /// `SERVER` header
    pub server: Option<String>,
}

/// A single multicast search. Devices are returned as their answers arrive, every location
/// only once, until the timeout is over.
pub struct Discovery {
    socket: UdpSocket,
    deadline: Instant,
    seen: HashSet<String>,
}

impl Discovery {
    /// Sends the search to all devices in the local network
    /// # Errors
    pub async fn start(timeout: Duration, interface: Option<Ipv4Addr>) -> Result<Self, UpnpFuzzError> {
        Self::start_to(SSDP_MULTICAST, timeout, interface).await
    }

    /// Sends the search to `destination` instead of the multicast group
    /// # Errors
    pub async fn start_to(
        destination: SocketAddr,
        timeout: Duration,
        interface: Option<Ipv4Addr>,
    ) -> Result<Self, UpnpFuzzError> {
        let socket = UdpTransport::bind(interface).await?;
        socket
            .send_to(SEARCH, destination)
            .await
            .map_err(|err| UpnpFuzzError::Transport {
                err_msg: format!("send to {destination}: {err}"),
            })?;
        tracing::debug!("Sent M-SEARCH to {destination}");
        Ok(Self {
            socket,
            deadline: Instant::now() + timeout,
            seen: HashSet::new(),
        })
    }

    /// Waits for the next device not seen before, `None` once the timeout is over
    pub async fn next(&mut self) -> Option<DiscoveredDevice> {
        let mut buf = vec![0; RESPONSE_BUFFER_SIZE];
        loop {
            let received = tokio::time::timeout_at(self.deadline, self.socket.recv_from(&mut buf)).await;
            let (size, address) = match received {
                Err(_) => return None,
                Ok(Err(err)) => {
                    tracing::debug!("Discovery: {err}");
                    continue;
                }
                Ok(Ok(received)) => received,
            };
            let response = RawResponse {
                bytes: buf[..size].to_vec(),
            };
            let Some(location) = response.header("LOCATION") else {
                continue;
            };
            let location = String::from_utf8_lossy(location).trim().to_owned();
            if !self.seen.insert(location.clone()) {
                continue;
            }
            let server = response
                .header("SERVER")
                .map(|server| String::from_utf8_lossy(server).trim().to_owned());
            return Some(DiscoveredDevice {
                address,
                location,
                server,
            });
        }
    }
}
