use crate::transport::udp::UdpTransport;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use upnpfuzz_core::error::UpnpFuzzError;
use upnpfuzz_core::request::{BaselineRequest, FieldRole, ProtocolKind, RawResponse, Target};
use upnpfuzz_core::traits::{ProtocolAdapter, Transport};

/// Banners sent in the USER-AGENT and SERVER headers
pub const USER_AGENTS: [&str; 10] = [
    "Windows/10.0 UPnP/1.1 MyClient/1.0",
    "Linux/5.4 UPnP/1.1 VLC/3.0",
    "Android/11 UPnP/1.1 BubbleUPnP/3.5.4",
    "MacOS/12.3 UPnP/1.1 UPnP-Inspector/0.2",
    "IoTDevice/1.0 UPnP/1.1 GenericDevice/2.0",
    "Xbox/10.0 UPnP/1.1 XboxUPnP/1.0",
    "PrinterOS/2.1 UPnP/1.1 PrinterService/1.5",
    "CustomScript/1.0 UPnP/1.1 TestTool/1.2",
    "RouterOS/6.49 UPnP/1.1 MiniUPnPd/2.2.1",
    "SmartTV/1.0 UPnP/1.1 DLNADOC/1.50",
];

const SEARCH_TARGETS: [&str; 2] = ["ssdp:all", "upnp:rootdevice"];

/// Fuzzes the SSDP listener of a device. Odd iterations send a M-SEARCH the device has to
/// answer, even iterations a NOTIFY announcement which is never answered.
pub struct SsdpAdapter {
    target: Target,
    transport: UdpTransport,
    awaiting_response: bool,
}

impl SsdpAdapter {
    /// Creates an adapter sending to `addr`, `interface` selects the local address the
    /// datagrams are sent from
    #[must_use]
    pub fn new(addr: SocketAddr, timeout: Duration, interface: Option<Ipv4Addr>) -> Self {
        Self {
            target: Target::new(ProtocolKind::Ssdp, addr.to_string()),
            transport: UdpTransport::new(addr, interface, timeout),
            awaiting_response: true,
        }
    }

    fn host(&self) -> String {
        let (host, _) = crate::adapter::split_host_port(&self.target.address);
        host.to_owned()
    }

    fn port(&self) -> String {
        let (_, port) = crate::adapter::split_host_port(&self.target.address);
        port.to_owned()
    }

    /// M-SEARCH request, `round` selects the cycled header values
    #[must_use]
    pub fn m_search(&self, round: usize) -> BaselineRequest {
        let mx = (round % 5 + 1).to_string();
        BaselineRequest::builder(ProtocolKind::Ssdp, "m-search")
            .literal("M-SEARCH * HTTP/1.1\r\nHOST: ")
            .field("HOST", FieldRole::Host, self.host())
            .literal(":")
            .field("PORT", FieldRole::Port, self.port())
            .literal("\r\nMAN: \"")
            .field("MAN", FieldRole::Header, "ssdp:discover")
            .literal("\"\r\nMX: ")
            .field("MX", FieldRole::Header, mx)
            .literal("\r\nST: ")
            .field("ST", FieldRole::Header, SEARCH_TARGETS[round % SEARCH_TARGETS.len()])
            .literal("\r\nUSER-AGENT: ")
            .field("USER-AGENT", FieldRole::Header, USER_AGENTS[round % USER_AGENTS.len()])
            .literal("\r\n\r\n")
            .build()
    }

    /// NOTIFY announcement, `round` selects the cycled header values
    #[must_use]
    pub fn notify(&self, round: usize) -> BaselineRequest {
        let host = self.host();
        BaselineRequest::builder(ProtocolKind::Ssdp, "notify")
            .literal("NOTIFY * HTTP/1.1\r\nHOST: ")
            .field("HOST", FieldRole::Host, &host)
            .literal(":")
            .field("PORT", FieldRole::Port, self.port())
            .literal("\r\nNT: ")
            .field("NT", FieldRole::Header, "upnp:rootdevice")
            .literal("\r\nNTS: ")
            .field("NTS", FieldRole::Header, "ssdp:alive")
            .literal("\r\nUSN: ")
            .field("USN", FieldRole::Header, "uuid:device-UUID::upnp:rootdevice")
            .literal("\r\nLOCATION: ")
            .field("LOCATION", FieldRole::Header, format!("http://{host}:80/device.xml"))
            .literal("\r\nCACHE-CONTROL: ")
            .field("CACHE-CONTROL", FieldRole::Timeout, "max-age=1800")
            .literal("\r\nSERVER: ")
            .field("SERVER", FieldRole::Header, USER_AGENTS[round % USER_AGENTS.len()])
            .literal("\r\nBOOTID.UPNP.ORG: ")
            .field("BOOTID.UPNP.ORG", FieldRole::Header, "1")
            .literal("\r\nCONFIGID.UPNP.ORG: ")
            .field("CONFIGID.UPNP.ORG", FieldRole::Header, "1337")
            .literal("\r\n\r\n")
            .without_response()
            .build()
    }
}

impl ProtocolAdapter for SsdpAdapter {
    fn target(&self) -> &Target {
        &self.target
    }

    fn build_baseline(&mut self, iteration: u64) -> BaselineRequest {
        let round = usize::try_from(iteration.saturating_sub(1) / 2).unwrap_or_default();
        let baseline = if iteration % 2 == 1 {
            self.m_search(round)
        } else {
            self.notify(round)
        };
        self.awaiting_response = baseline.expects_response();
        baseline
    }

    async fn send(&mut self, payload: &[u8]) -> Result<RawResponse, UpnpFuzzError> {
        if self.awaiting_response {
            return self.transport.exchange(payload).await;
        }
        self.transport.connect().await?;
        let result = self.transport.write(payload).await;
        let _ = self.transport.close().await;
        result.map(|()| RawResponse::default())
    }
}
