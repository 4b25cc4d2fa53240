use crate::mutator::AppliedStrategy;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// The UPnP protocol a target speaks
pub enum ProtocolKind {
    /// Simple Service Discovery Protocol over UDP
    Ssdp,
    /// SOAP control messages over HTTP
    Soap,
    /// Event subscriptions over HTTP
    Esp,
}

impl Display for ProtocolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProtocolKind::Ssdp => "ssdp",
            ProtocolKind::Soap => "soap",
            ProtocolKind::Esp => "esp",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Snapshot of the fuzzed target. It does not change during a campaign and is stored with
/// every crash so the payload can be replayed against the same endpoint.
pub struct Target {
    /// protocol spoken by the target
    pub protocol: ProtocolKind,
    /// `host:port` the payloads are sent to
    pub address: String,
    /// control or description url
    pub url: Option<String>,
    /// event subscription url
    pub event_url: Option<String>,
}

impl Target {
    /// Creates a target without any urls
    #[must_use]
    pub fn new(protocol: ProtocolKind, address: impl Into<String>) -> Self {
        Self {
            protocol,
            address: address.into(),
            url: None,
            event_url: None,
        }
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.url {
            Some(url) => write!(f, "{} {url}", self.protocol),
            None => write!(f, "{} {}", self.protocol, self.address),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Semantic role of a mutable field inside a request
pub enum FieldRole {
    /// request line target, e.g. the control url path
    RequestTarget,
    /// host part of the HOST header
    Host,
    /// port part of the HOST header
    Port,
    /// a plain header value
    Header,
    /// the Content-Length header. It is computed from the body unless it is mutated itself.
    ContentLength,
    /// service type or action name of the SOAPAction header
    SoapAction,
    /// value of a SOAP action argument
    Argument,
    /// the CALLBACK header of a subscription
    Callback,
    /// subscription identifier
    Sid,
    /// subscription or cache timeout
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A named mutable value inside a baseline request
pub struct Field {
    /// header or argument name
    pub name: String,
    /// what the value means for the protocol
    pub role: FieldRole,
    /// the well-formed value
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(Vec<u8>),
    Field(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A well-formed protocol message with named mutable fields. The message is stored as a
/// template (literal segments and field references) so every field can be replaced without
/// touching the carrier syntax around it.
pub struct BaselineRequest {
    protocol: ProtocolKind,
    name: String,
    head: Vec<Segment>,
    body: Vec<Segment>,
    fields: Vec<Field>,
    expects_response: bool,
}

impl BaselineRequest {
    /// Starts a new template
    #[must_use]
    pub fn builder(protocol: ProtocolKind, name: impl Into<String>) -> BaselineBuilder {
        BaselineBuilder {
            request: BaselineRequest {
                protocol,
                name: name.into(),
                head: vec![],
                body: vec![],
                fields: vec![],
                expects_response: true,
            },
            in_body: false,
        }
    }

    /// Protocol of the message
    #[must_use]
    pub fn protocol(&self) -> ProtocolKind {
        self.protocol
    }

    /// Name of the template, e.g. `m-search` or the SOAP action
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All mutable fields in the order they appear in the message
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Returns true if a well behaving target answers this message
    #[must_use]
    pub fn expects_response(&self) -> bool {
        self.expects_response
    }

    /// Renders the message without any mutation
    #[must_use]
    pub fn render(&self) -> Vec<u8> {
        self.render_with(&[])
    }

    /// Renders the message replacing the value of the given field indexes
    #[must_use]
    pub fn render_with(&self, overrides: &[(usize, Vec<u8>)]) -> Vec<u8> {
        let value_of = |index: usize| -> Option<&[u8]> {
            overrides
                .iter()
                .rev()
                .find(|(i, _)| *i == index)
                .map(|(_, value)| value.as_slice())
        };

        let mut body = vec![];
        for segment in &self.body {
            match segment {
                Segment::Literal(bytes) => body.extend_from_slice(bytes),
                Segment::Field(index) => {
                    let value = value_of(*index).unwrap_or(&self.fields[*index].value);
                    body.extend_from_slice(value);
                }
            }
        }

        let mut message = vec![];
        for segment in &self.head {
            match segment {
                Segment::Literal(bytes) => message.extend_from_slice(bytes),
                Segment::Field(index) => match value_of(*index) {
                    Some(value) => message.extend_from_slice(value),
                    None if self.fields[*index].role == FieldRole::ContentLength => {
                        message.extend_from_slice(body.len().to_string().as_bytes());
                    }
                    None => message.extend_from_slice(&self.fields[*index].value),
                },
            }
        }
        message.extend_from_slice(&body);
        message
    }
}

/// Builds a `BaselineRequest` segment by segment
pub struct BaselineBuilder {
    request: BaselineRequest,
    in_body: bool,
}

impl BaselineBuilder {
    fn push(&mut self, segment: Segment) {
        if self.in_body {
            self.request.body.push(segment);
        } else {
            self.request.head.push(segment);
        }
    }

    /// Appends fixed carrier syntax
    #[must_use]
    pub fn literal(mut self, bytes: impl AsRef<[u8]>) -> Self {
        let segments = if self.in_body {
            &mut self.request.body
        } else {
            &mut self.request.head
        };
        if let Some(Segment::Literal(last)) = segments.last_mut() {
            last.extend_from_slice(bytes.as_ref());
        } else {
            segments.push(Segment::Literal(bytes.as_ref().to_vec()));
        }
        self
    }

    /// Appends a mutable field
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, role: FieldRole, value: impl AsRef<[u8]>) -> Self {
        let index = self.request.fields.len();
        self.request.fields.push(Field {
            name: name.into(),
            role,
            value: value.as_ref().to_vec(),
        });
        self.push(Segment::Field(index));
        self
    }

    /// Everything appended after this call is part of the body used to compute the
    /// Content-Length field
    #[must_use]
    pub fn body(mut self) -> Self {
        self.in_body = true;
        self
    }

    /// Marks the message as one the target does not answer (e.g. SSDP NOTIFY)
    #[must_use]
    pub fn without_response(mut self) -> Self {
        self.request.expects_response = false;
        self
    }

    /// Returns the finished template
    #[must_use]
    pub fn build(self) -> BaselineRequest {
        self.request
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Bytes returned by the target for a single request
pub struct RawResponse {
    /// received bytes, empty if the target closed the connection without data
    pub bytes: Vec<u8>,
}

impl RawResponse {
    /// Returns the value of the first header `name` (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.bytes.split(|b| *b == b'\n').find_map(|line| {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            let colon = line.iter().position(|b| *b == b':')?;
            let (key, value) = line.split_at(colon);
            if !key.eq_ignore_ascii_case(name.as_bytes()) {
                return None;
            }
            let value = &value[1..];
            let start = value.iter().position(|b| !b.is_ascii_whitespace())?;
            Some(&value[start..])
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// A single replaced field value
pub struct FieldMutation {
    /// field name
    pub field: String,
    /// role of the field
    pub role: FieldRole,
    /// value that was put into the message
    #[serde(with = "lossy_bytes")]
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// The request that is transmitted in one iteration
pub struct MutatedRequest {
    /// iteration index, starting at 1
    pub iteration: u64,
    /// template the request was derived from
    pub baseline: BaselineRequest,
    /// strategy that produced the bytes
    pub strategy: AppliedStrategy,
    /// replaced field values, empty for raw and external mutations
    pub mutations: Vec<FieldMutation>,
    /// the bytes sent to the target
    pub bytes: Vec<u8>,
}

impl MutatedRequest {
    /// Names of the mutated fields
    #[must_use]
    pub fn mutated_fields(&self) -> Vec<String> {
        self.mutations.iter().map(|m| m.field.clone()).collect()
    }
}

mod lossy_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        Ok(String::deserialize(deserializer)?.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post() -> BaselineRequest {
        BaselineRequest::builder(ProtocolKind::Soap, "Ping")
            .literal("POST /ctl HTTP/1.1\r\nContent-Length: ")
            .field("Content-Length", FieldRole::ContentLength, "0")
            .literal("\r\n\r\n")
            .body()
            .literal("<a>")
            .field("a", FieldRole::Argument, "xyz")
            .literal("</a>")
            .build()
    }

    #[test]
    fn test_content_length_follows_body() {
        let request = post();
        assert_eq!(
            request.render(),
            b"POST /ctl HTTP/1.1\r\nContent-Length: 10\r\n\r\n<a>xyz</a>".to_vec()
        );
        let longer = request.render_with(&[(1, b"abcdef".to_vec())]);
        assert_eq!(
            longer,
            b"POST /ctl HTTP/1.1\r\nContent-Length: 13\r\n\r\n<a>abcdef</a>".to_vec()
        );
    }

    #[test]
    fn test_mutated_content_length_is_kept() {
        let rendered = post().render_with(&[(0, b"99999".to_vec())]);
        assert!(rendered.starts_with(b"POST /ctl HTTP/1.1\r\nContent-Length: 99999\r\n"));
    }

    #[test]
    fn test_literals_are_merged() {
        let request = BaselineRequest::builder(ProtocolKind::Ssdp, "x")
            .literal("a")
            .literal("b")
            .build();
        assert_eq!(request.head, vec![Segment::Literal(b"ab".to_vec())]);
    }

    #[test]
    fn test_response_header_lookup() {
        let response = RawResponse {
            bytes: b"HTTP/1.1 200 OK\r\nsid: uuid:42\r\nTIMEOUT: Second-1800\r\n\r\n".to_vec(),
        };
        assert_eq!(response.header("SID"), Some(&b"uuid:42"[..]));
        assert_eq!(response.header("timeout"), Some(&b"Second-1800"[..]));
        assert_eq!(response.header("location"), None);
    }
}
