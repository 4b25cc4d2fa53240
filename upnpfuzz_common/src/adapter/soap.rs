use crate::adapter::description::{self, ActionDescription, ArgumentDescription};
use crate::adapter::{split_host_port, xml_escape};
use crate::transport::tcp::TcpTransport;
use std::str::FromStr;
use std::time::Duration;
use upnpfuzz_core::error::UpnpFuzzError;
use upnpfuzz_core::request::{BaselineRequest, FieldRole, ProtocolKind, RawResponse, Target};
use upnpfuzz_core::traits::{ProtocolAdapter, Transport};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// Selects the actions of a device that are fuzzed
pub enum ActionFilter {
    /// every action
    #[default]
    All,
    /// actions taking at least one argument
    In,
    /// actions without arguments
    Out,
}

impl ActionFilter {
    /// Returns true if `action` passes the filter
    #[must_use]
    pub fn accepts(self, action: &ActionDescription) -> bool {
        match self {
            ActionFilter::All => true,
            ActionFilter::In => action.has_input(),
            ActionFilter::Out => !action.has_input(),
        }
    }
}

impl FromStr for ActionFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(ActionFilter::All),
            "in" => Ok(ActionFilter::In),
            "out" => Ok(ActionFilter::Out),
            other => Err(format!("unknown action type {other}, expected all, in or out")),
        }
    }
}

/// Well-formed value for a UPnP data type
#[must_use]
pub fn canonical_value(data_type: &str) -> &'static str {
    match data_type {
        "ui1" | "ui2" | "ui4" | "int" => "1",
        "i1" | "i2" | "i4" => "-1",
        "boolean" => "1",
        "string" => "192.168.1.4",
        "number" | "float" | "fixed.14.14" | "r4" | "r8" => "1.5",
        "char" => "A",
        "date" => "2024-01-01",
        "dateTime" => "2024-01-01T12:00:00",
        "dateTime.tz" => "2024-01-01T12:00:00+01:00",
        "time" => "12:00:00",
        "time.tz" => "12:00:00+01:00",
        "bin.base64" => "QUFBQQ==",
        "bin.hex" => "41414141",
        "uri" => "http://127.0.0.1/path",
        "uuid" => "6f1b2a3c-4d5e-4f60-8a7b-9c0d1e2f3a4b",
        _ => "AAAAAAAAAAAAAAAA",
    }
}

/// Value of `argument` in the given round. Allowed values are cycled, else the default
/// value or the canonical value of the data type is used.
#[must_use]
pub fn argument_value(argument: &ArgumentDescription, round: usize) -> String {
    if !argument.allowed_values.is_empty() {
        return argument.allowed_values[round % argument.allowed_values.len()].clone();
    }
    match &argument.default_value {
        Some(value) => value.clone(),
        None => canonical_value(&argument.data_type).to_owned(),
    }
}

/// Fuzzes the SOAP control endpoints of a device. Iteration `i` calls action `(i-1) mod n`
/// of the actions listed in the service descriptions. Every request is sent to the control url
/// of its action.
pub struct SoapAdapter {
    target: Target,
    actions: Vec<ActionDescription>,
    transport: TcpTransport,
}

impl SoapAdapter {
    /// Loads the device description at `url` and all its SCPDs
    /// # Errors
    /// Returns `UpnpFuzzError::Description` if a document can not be loaded or parsed, or no
    /// action passes the filter.
    pub async fn from_description(url: &str, timeout: Duration, filter: ActionFilter) -> Result<Self, UpnpFuzzError> {
        let actions = load_actions(url, timeout, filter).await?;
        let location = description::parse_url(url)?;
        let mut target = Target::new(ProtocolKind::Soap, description::address_of(&location)?);
        target.url = Some(url.to_owned());
        Ok(Self::from_actions(target, actions, timeout))
    }

    /// Creates an adapter for already parsed actions. `actions` must not be empty.
    #[must_use]
    pub fn from_actions(target: Target, actions: Vec<ActionDescription>, timeout: Duration) -> Self {
        let address = actions
            .first()
            .and_then(|action| description::address_of(&action.control_url).ok())
            .unwrap_or_else(|| target.address.clone());
        Self {
            transport: TcpTransport::new(address, timeout),
            target,
            actions,
        }
    }

    /// Actions fuzzed by this adapter
    #[must_use]
    pub fn actions(&self) -> &[ActionDescription] {
        &self.actions
    }

    /// Builds the request calling `action`
    #[must_use]
    pub fn request(action: &ActionDescription, round: usize) -> BaselineRequest {
        let address = description::address_of(&action.control_url).unwrap_or_default();
        let (host, port) = split_host_port(&address);
        let mut builder = BaselineRequest::builder(ProtocolKind::Soap, &action.name)
            .literal("POST ")
            .field("controlURL", FieldRole::RequestTarget, description::path_of(&action.control_url))
            .literal(" HTTP/1.1\r\nHost: ")
            .field("Host", FieldRole::Host, host)
            .literal(":")
            .field("Port", FieldRole::Port, port)
            .literal("\r\nContent-Length: ")
            .field("Content-Length", FieldRole::ContentLength, "0")
            .literal("\r\nContent-Type: text/xml; charset=\"utf-8\"\r\nSOAPAction: \"")
            .field("serviceType", FieldRole::SoapAction, &action.service_type)
            .literal("#")
            .field("action", FieldRole::SoapAction, &action.name)
            .literal("\"\r\n\r\n")
            .body()
            .literal(format!(
                "<?xml version=\"1.0\"?>\n<s:Envelope xmlns:s=\"http://schemas.xmlsoap.org/soap/envelope/\" s:encodingStyle=\"http://schemas.xmlsoap.org/soap/encoding/\"><s:Body><u:{} xmlns:u=\"{}\">\n",
                action.name,
                xml_escape(&action.service_type)
            ));
        for argument in action.inputs() {
            builder = builder
                .literal(format!("<{}>", argument.name))
                .field(&argument.name, FieldRole::Argument, xml_escape(&argument_value(argument, round)))
                .literal(format!("</{}>\n", argument.name));
        }
        builder
            .literal(format!("</u:{}></s:Body></s:Envelope>\n", action.name))
            .build()
    }
}

/// Fetches the description at `url` and returns every action passing `filter`
/// # Errors
pub async fn load_actions(url: &str, timeout: Duration, filter: ActionFilter) -> Result<Vec<ActionDescription>, UpnpFuzzError> {
    let location = description::parse_url(url)?;
    let client = description::http_client(timeout)?;
    let xml = description::fetch(&client, &location).await?;
    let services = description::parse_device(&xml, &location)?;

    let mut actions = vec![];
    for service in &services {
        let scpd = description::fetch(&client, &service.scpd_url).await?;
        let found = description::parse_scpd(&scpd, service)?;
        tracing::info!("{} actions in {}", found.len(), service.service_type);
        actions.extend(found.into_iter().filter(|action| filter.accepts(action)));
    }
    if actions.is_empty() {
        return Err(UpnpFuzzError::Description {
            url: url.to_owned(),
            err_msg: format!("no actions found in {} services", services.len()),
        });
    }
    Ok(actions)
}

impl ProtocolAdapter for SoapAdapter {
    fn target(&self) -> &Target {
        &self.target
    }

    fn build_baseline(&mut self, iteration: u64) -> BaselineRequest {
        let count = self.actions.len().max(1) as u64;
        let index = usize::try_from(iteration.saturating_sub(1) % count).unwrap_or_default();
        let round = usize::try_from(iteration.saturating_sub(1) / count).unwrap_or_default();
        let Some(action) = self.actions.get(index) else {
            return BaselineRequest::builder(ProtocolKind::Soap, "empty").build();
        };
        match description::address_of(&action.control_url) {
            Ok(address) => self.transport.retarget(address),
            Err(err) => tracing::warn!("{}: {err}", action.name),
        }
        Self::request(action, round)
    }

    async fn send(&mut self, payload: &[u8]) -> Result<RawResponse, UpnpFuzzError> {
        self.transport.exchange(payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::description::tests::{DEVICE, SCPD};
    use crate::testutil::serve_http;

    async fn adapter(filter: ActionFilter) -> Result<SoapAdapter, UpnpFuzzError> {
        let addr = serve_http(
            vec![
                ("/rootDesc.xml", DEVICE.to_owned()),
                ("/l3f.xml", r#"<?xml version="1.0"?><scpd><actionList><action><name>GetDefaultConnectionService</name></action></actionList></scpd>"#.to_owned()),
                ("/wanip.xml", SCPD.to_owned()),
            ],
            "HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n",
        )
        .await;
        SoapAdapter::from_description(&format!("http://{addr}/rootDesc.xml"), Duration::from_secs(2), filter).await
    }

    #[tokio::test]
    async fn test_actions_from_description() {
        let adapter = adapter(ActionFilter::All).await.unwrap();
        let names: Vec<&str> = adapter.actions().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["GetDefaultConnectionService", "AddPortMapping", "GetExternalIPAddress"]);

        let only_in = self::adapter(ActionFilter::In).await.unwrap();
        assert_eq!(only_in.actions().len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_description() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let result = SoapAdapter::from_description(
            &format!("http://{addr}/rootDesc.xml"),
            Duration::from_secs(1),
            ActionFilter::All,
        )
        .await;
        assert!(matches!(result, Err(UpnpFuzzError::Description { .. })));
    }

    #[tokio::test]
    async fn test_request_is_well_formed() {
        let mut adapter = adapter(ActionFilter::In).await.unwrap();
        let request = adapter.build_baseline(1);
        let rendered = String::from_utf8(request.render()).unwrap();
        let (head, body) = rendered.split_once("\r\n\r\n").unwrap();

        assert!(head.starts_with("POST /ctl/IPConn HTTP/1.1\r\nHost: 127.0.0.1:"));
        assert!(head.ends_with("SOAPAction: \"urn:schemas-upnp-org:service:WANIPConnection:1#AddPortMapping\""));
        assert!(head.contains(&format!("Content-Length: {}\r\n", body.len())));
        assert!(body.contains("<u:AddPortMapping xmlns:u=\"urn:schemas-upnp-org:service:WANIPConnection:1\">"));
        assert!(body.contains("<NewRemoteHost>192.168.1.4</NewRemoteHost>\n"));
        assert!(body.contains("<NewExternalPort>8080</NewExternalPort>\n"));
        assert!(body.contains("<NewProtocol>TCP</NewProtocol>\n"));
        roxmltree::Document::parse(body).unwrap();

        let next = String::from_utf8(adapter.build_baseline(2).render()).unwrap();
        assert!(next.contains("<NewProtocol>UDP</NewProtocol>"));
    }

    #[tokio::test]
    async fn test_actions_cycle() {
        let mut adapter = adapter(ActionFilter::All).await.unwrap();
        assert_eq!(adapter.build_baseline(1).name(), "GetDefaultConnectionService");
        assert_eq!(adapter.build_baseline(3).name(), "GetExternalIPAddress");
        assert_eq!(adapter.build_baseline(4).name(), "GetDefaultConnectionService");
        let payload = adapter.build_baseline(1).render();
        let response = adapter.send(&payload).await.unwrap();
        assert!(response.bytes.starts_with(b"HTTP/1.1 200 OK"));
    }

    #[tokio::test]
    async fn test_requests_go_to_the_control_url_of_their_action() {
        let first = serve_http(vec![], "HTTP/1.1 200 OK\r\nServer: first\r\n\r\n").await;
        let second = serve_http(vec![], "HTTP/1.1 200 OK\r\nServer: second\r\n\r\n").await;
        let action = |name: &str, addr: std::net::SocketAddr| ActionDescription {
            name: name.to_owned(),
            service_type: "urn:schemas-upnp-org:service:WANIPConnection:1".to_owned(),
            control_url: url::Url::parse(&format!("http://{addr}/ctl/{name}")).unwrap(),
            arguments: vec![],
        };
        let target = Target::new(ProtocolKind::Soap, first.to_string());
        let mut adapter = SoapAdapter::from_actions(
            target,
            vec![action("GetStatusInfo", first), action("GetExternalIPAddress", second)],
            Duration::from_secs(2),
        );

        for (iteration, server) in [(1, "first"), (2, "second"), (3, "first")] {
            let rendered = adapter.build_baseline(iteration).render();
            let response = adapter.send(&rendered).await.unwrap();
            assert_eq!(response.header("Server"), Some(server.as_bytes()));
        }
        assert!(String::from_utf8(adapter.build_baseline(2).render())
            .unwrap()
            .contains(&format!("Host: {second}\r\n")));
    }

    #[test]
    fn test_argument_values() {
        assert_eq!(canonical_value("ui4"), "1");
        assert_eq!(canonical_value("uri"), "http://127.0.0.1/path");
        assert_eq!(canonical_value("x-vendor"), "A".repeat(16));
        assert_eq!("OUT".parse::<ActionFilter>(), Ok(ActionFilter::Out));
        assert!("both".parse::<ActionFilter>().is_err());
    }
}
