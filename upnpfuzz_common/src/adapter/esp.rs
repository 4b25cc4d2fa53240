use crate::adapter::description;
use crate::adapter::split_host_port;
use crate::transport::tcp::TcpTransport;
use std::collections::VecDeque;
use std::time::Duration;
use upnpfuzz_core::error::UpnpFuzzError;
use upnpfuzz_core::request::{BaselineRequest, FieldRole, ProtocolKind, RawResponse, Target};
use upnpfuzz_core::traits::{ProtocolAdapter, Transport};
use url::Url;

/// SID used while no subscription was accepted by the device
pub const PLACEHOLDER_SID: &str = "uuid:1234-5678-90ab-cdef";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Subscribe,
    Renew,
    Unsubscribe,
}

/// Fuzzes the event subscription endpoints of a device. The requests cycle through
/// subscribe, renew and unsubscribe. SIDs granted by the device are reused by the renew and
/// unsubscribe requests. Every request is sent to the host of its event url.
pub struct EspAdapter {
    target: Target,
    event_urls: Vec<Url>,
    callback: String,
    sids: VecDeque<String>,
    pending: Option<Phase>,
    transport: TcpTransport,
}

impl EspAdapter {
    /// Creates an adapter for a single event url
    /// # Errors
    pub fn new(event_url: &str, timeout: Duration, callback: impl Into<String>) -> Result<Self, UpnpFuzzError> {
        let url = description::parse_url(event_url)?;
        let mut target = Target::new(ProtocolKind::Esp, description::address_of(&url)?);
        target.event_url = Some(event_url.to_owned());
        Ok(Self::with_event_urls(target, vec![url], timeout, callback.into()))
    }

    /// Loads the device description at `url` and fuzzes every `eventSubURL` in it
    /// # Errors
    /// Returns `UpnpFuzzError::Description` if the description can not be loaded or does not
    /// list any event url.
    pub async fn from_description(
        url: &str,
        timeout: Duration,
        callback: impl Into<String>,
    ) -> Result<Self, UpnpFuzzError> {
        let location = description::parse_url(url)?;
        let client = description::http_client(timeout)?;
        let xml = description::fetch(&client, &location).await?;
        let event_urls: Vec<Url> = description::parse_device(&xml, &location)?
            .into_iter()
            .filter_map(|service| service.event_url)
            .collect();
        if event_urls.is_empty() {
            return Err(UpnpFuzzError::Description {
                url: url.to_owned(),
                err_msg: "no eventSubURL found".into(),
            });
        }
        tracing::info!("{} event urls in {url}", event_urls.len());

        let mut target = Target::new(ProtocolKind::Esp, description::address_of(&event_urls[0])?);
        target.url = Some(url.to_owned());
        target.event_url = Some(event_urls[0].to_string());
        Ok(Self::with_event_urls(target, event_urls, timeout, callback.into()))
    }

    fn with_event_urls(target: Target, event_urls: Vec<Url>, timeout: Duration, callback: String) -> Self {
        Self {
            transport: TcpTransport::new(target.address.clone(), timeout),
            target,
            event_urls,
            callback,
            sids: VecDeque::new(),
            pending: None,
        }
    }

    /// Subscription ids granted by the device so far, oldest first
    pub fn sids(&self) -> impl Iterator<Item = &str> {
        self.sids.iter().map(String::as_str)
    }

    fn head(name: &'static str, method: &str, url: &Url) -> upnpfuzz_core::request::BaselineBuilder {
        let address = description::address_of(url).unwrap_or_default();
        let (host, port) = split_host_port(&address);
        BaselineRequest::builder(ProtocolKind::Esp, name)
            .literal(format!("{method} "))
            .field("path", FieldRole::RequestTarget, description::path_of(url))
            .literal(" HTTP/1.1\r\nHOST: ")
            .field("HOST", FieldRole::Host, host)
            .literal(":")
            .field("PORT", FieldRole::Port, port)
    }

    /// Initial subscription
    #[must_use]
    pub fn subscribe(&self, url: &Url) -> BaselineRequest {
        Self::head("subscribe", "SUBSCRIBE", url)
            .literal("\r\nCALLBACK: <")
            .field("CALLBACK", FieldRole::Callback, &self.callback)
            .literal(">\r\nNT: ")
            .field("NT", FieldRole::Header, "upnp:event")
            .literal("\r\nTIMEOUT: ")
            .field("TIMEOUT", FieldRole::Timeout, "Second-7200")
            .literal("\r\n\r\n")
            .build()
    }

    /// Renewal of the subscription `sid`
    #[must_use]
    pub fn renew(url: &Url, sid: &str) -> BaselineRequest {
        Self::head("renew", "SUBSCRIBE", url)
            .literal("\r\nSID: ")
            .field("SID", FieldRole::Sid, sid)
            .literal("\r\nTIMEOUT: ")
            .field("TIMEOUT", FieldRole::Timeout, "Second-3600")
            .literal("\r\n\r\n")
            .build()
    }

    /// Cancellation of the subscription `sid`
    #[must_use]
    pub fn unsubscribe(url: &Url, sid: &str) -> BaselineRequest {
        Self::head("unsubscribe", "UNSUBSCRIBE", url)
            .literal("\r\nSID: ")
            .field("SID", FieldRole::Sid, sid)
            .literal("\r\n\r\n")
            .build()
    }

    fn current_sid(&self) -> &str {
        self.sids.back().map_or(PLACEHOLDER_SID, String::as_str)
    }
}

impl ProtocolAdapter for EspAdapter {
    fn target(&self) -> &Target {
        &self.target
    }

    fn build_baseline(&mut self, iteration: u64) -> BaselineRequest {
        let step = iteration.saturating_sub(1);
        let count = self.event_urls.len().max(1) as u64;
        let index = usize::try_from((step / 3) % count).unwrap_or_default();
        let Some(url) = self.event_urls.get(index) else {
            return BaselineRequest::builder(ProtocolKind::Esp, "empty").build();
        };
        match description::address_of(url) {
            Ok(address) => self.transport.retarget(address),
            Err(err) => tracing::warn!("{url}: {err}"),
        }

        let (phase, baseline) = match step % 3 {
            0 => (Phase::Subscribe, self.subscribe(url)),
            1 => (Phase::Renew, Self::renew(url, self.current_sid())),
            _ => (Phase::Unsubscribe, Self::unsubscribe(url, self.current_sid())),
        };
        self.pending = Some(phase);
        baseline
    }

    async fn send(&mut self, payload: &[u8]) -> Result<RawResponse, UpnpFuzzError> {
        let response = self.transport.exchange(payload).await;
        if self.pending == Some(Phase::Unsubscribe)
            && let Some(sid) = self.sids.pop_back()
        {
            tracing::debug!("Forgetting subscription {sid}");
        }
        response
    }

    fn observe_response(&mut self, response: &RawResponse) {
        if self.pending == Some(Phase::Unsubscribe) {
            return;
        }
        let Some(sid) = response.header("SID") else {
            return;
        };
        let sid = String::from_utf8_lossy(sid).trim().to_owned();
        if !sid.is_empty() && !self.sids.contains(&sid) {
            tracing::debug!("Tracking subscription {sid}");
            self.sids.push_back(sid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::description::tests::DEVICE;
    use crate::testutil::serve_http;

    fn adapter() -> EspAdapter {
        EspAdapter::new(
            "http://192.168.0.1:5000/evt/IPConn",
            Duration::from_secs(1),
            "http://192.168.0.2:8000/notify",
        )
        .unwrap()
    }

    fn text(request: &BaselineRequest) -> String {
        String::from_utf8(request.render()).unwrap()
    }

    #[test]
    fn test_subscribe_is_well_formed() {
        let request = adapter().build_baseline(1);
        assert_eq!(
            text(&request),
            "SUBSCRIBE /evt/IPConn HTTP/1.1\r\nHOST: 192.168.0.1:5000\r\nCALLBACK: <http://192.168.0.2:8000/notify>\r\nNT: upnp:event\r\nTIMEOUT: Second-7200\r\n\r\n"
        );
    }

    #[test]
    fn test_placeholder_without_subscription() {
        let mut adapter = adapter();
        assert_eq!(
            text(&adapter.build_baseline(2)),
            "SUBSCRIBE /evt/IPConn HTTP/1.1\r\nHOST: 192.168.0.1:5000\r\nSID: uuid:1234-5678-90ab-cdef\r\nTIMEOUT: Second-3600\r\n\r\n"
        );
        assert!(text(&adapter.build_baseline(3)).starts_with("UNSUBSCRIBE /evt/IPConn HTTP/1.1\r\n"));
    }

    #[test]
    fn test_granted_sid_is_reused() {
        let mut adapter = adapter();
        adapter.build_baseline(1);
        adapter.observe_response(&RawResponse {
            bytes: b"HTTP/1.1 200 OK\r\nsid: uuid:granted-1\r\nTIMEOUT: Second-7200\r\n\r\n".to_vec(),
        });
        assert_eq!(adapter.sids().collect::<Vec<_>>(), vec!["uuid:granted-1"]);
        assert!(text(&adapter.build_baseline(2)).contains("SID: uuid:granted-1\r\n"));

        // the renewal answer repeats the sid
        adapter.observe_response(&RawResponse {
            bytes: b"HTTP/1.1 200 OK\r\nSID: uuid:granted-1\r\n\r\n".to_vec(),
        });
        assert_eq!(adapter.sids().count(), 1);
        assert!(text(&adapter.build_baseline(3)).contains("SID: uuid:granted-1\r\n"));
    }

    #[tokio::test]
    async fn test_unsubscribe_forgets_sid() {
        let addr = serve_http(vec![], "HTTP/1.1 200 OK\r\nSID: uuid:from-device\r\n\r\n").await;
        let mut adapter = EspAdapter::new(
            &format!("http://{addr}/evt"),
            Duration::from_secs(2),
            "http://127.0.0.1:1/notify",
        )
        .unwrap();

        for iteration in 1..=3 {
            let payload = adapter.build_baseline(iteration).render();
            let response = adapter.send(&payload).await.unwrap();
            adapter.observe_response(&response);
            if iteration < 3 {
                assert_eq!(adapter.sids().collect::<Vec<_>>(), vec!["uuid:from-device"]);
            }
        }
        assert_eq!(adapter.sids().count(), 0);
    }

    #[tokio::test]
    async fn test_requests_go_to_the_host_of_their_event_url() {
        let first = serve_http(vec![], "HTTP/1.1 200 OK\r\nSID: uuid:first\r\n\r\n").await;
        let second = serve_http(vec![], "HTTP/1.1 200 OK\r\nSID: uuid:second\r\n\r\n").await;
        let event_urls = vec![
            Url::parse(&format!("http://{first}/evt/L3F")).unwrap(),
            Url::parse(&format!("http://{second}/evt/IPConn")).unwrap(),
        ];
        let target = Target::new(ProtocolKind::Esp, first.to_string());
        let mut adapter =
            EspAdapter::with_event_urls(target, event_urls, Duration::from_secs(2), "http://127.0.0.1:1/notify".into());

        for (iteration, sid) in [(1, "uuid:first"), (4, "uuid:second")] {
            let payload = adapter.build_baseline(iteration).render();
            assert!(String::from_utf8_lossy(&payload).contains(&format!("HOST: {}\r\n", adapter.transport.address())));
            let response = adapter.send(&payload).await.unwrap();
            assert_eq!(response.header("SID"), Some(sid.as_bytes()));
        }
        assert_eq!(adapter.transport.address(), second.to_string());
    }

    #[tokio::test]
    async fn test_event_urls_from_description() {
        let addr = serve_http(vec![("/rootDesc.xml", DEVICE.to_owned())], "HTTP/1.1 412 Precondition Failed\r\n\r\n").await;
        let mut adapter = EspAdapter::from_description(
            &format!("http://{addr}/rootDesc.xml"),
            Duration::from_secs(2),
            "http://127.0.0.1:1/notify",
        )
        .await
        .unwrap();
        assert_eq!(adapter.event_urls.len(), 2);
        assert!(text(&adapter.build_baseline(1)).starts_with("SUBSCRIBE /evt/L3F HTTP/1.1\r\n"));
        assert!(text(&adapter.build_baseline(4)).starts_with("SUBSCRIBE /evt/IPConn HTTP/1.1\r\n"));
    }
}
