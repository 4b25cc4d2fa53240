use roxmltree::{Document, Node};
use std::collections::HashMap;
use std::fmt::Display;
use std::time::Duration;
use upnpfuzz_core::error::UpnpFuzzError;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
/// A `<service>` entry of a device description with its urls resolved against the base
pub struct ServiceDescription {
    /// e.g. `urn:schemas-upnp-org:service:WANIPConnection:1`
    pub service_type: String,
    /// e.g. `urn:upnp-org:serviceId:WANIPConn1`
    pub service_id: String,
    /// location of the SCPD
    pub scpd_url: Url,
    /// where the SOAP requests are posted to
    pub control_url: Url,
    /// where event subscriptions are sent to
    pub event_url: Option<Url>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Direction of an action argument
pub enum Direction {
    /// sent by the control point
    In,
    /// returned by the device
    Out,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Argument of an action with the type information of its related state variable
pub struct ArgumentDescription {
    /// argument name, also the XML element name in the request body
    pub name: String,
    /// in or out
    pub direction: Direction,
    /// UPnP data type like `ui4` or `string`, empty if the state variable is unknown
    pub data_type: String,
    /// `defaultValue` of the state variable
    pub default_value: Option<String>,
    /// `allowedValueList` of the state variable
    pub allowed_values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A callable action of a service
pub struct ActionDescription {
    /// action name
    pub name: String,
    /// service type used for the SOAPAction header and the body namespace
    pub service_type: String,
    /// resolved control url of the service
    pub control_url: Url,
    /// all arguments in document order
    pub arguments: Vec<ArgumentDescription>,
}

impl ActionDescription {
    /// Returns true if the action takes at least one argument
    #[must_use]
    pub fn has_input(&self) -> bool {
        self.arguments.iter().any(|arg| arg.direction == Direction::In)
    }

    /// Arguments sent in the request
    pub fn inputs(&self) -> impl Iterator<Item = &ArgumentDescription> {
        self.arguments.iter().filter(|arg| arg.direction == Direction::In)
    }
}

impl Display for ActionDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} ({})", self.name, self.service_type)?;
        for arg in &self.arguments {
            let direction = match arg.direction {
                Direction::In => "in ",
                Direction::Out => "out",
            };
            write!(f, "    {direction} {}: {}", arg.name, arg.data_type)?;
            if !arg.allowed_values.is_empty() {
                write!(f, " [{}]", arg.allowed_values.join(", "))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

fn description_error(url: &str, err_msg: impl Into<String>) -> UpnpFuzzError {
    UpnpFuzzError::Description {
        url: url.to_owned(),
        err_msg: err_msg.into(),
    }
}

/// Client used to fetch descriptions, every request is bounded by `timeout`
/// # Errors
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, UpnpFuzzError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()
        .map_err(|err| UpnpFuzzError::Configuration {
            err_msg: format!("http client: {err}"),
        })
}

/// Downloads the document at `url`
/// # Errors
/// Returns `UpnpFuzzError::Description` if the url is unreachable or does not answer with a
/// success status.
pub async fn fetch(client: &reqwest::Client, url: &Url) -> Result<String, UpnpFuzzError> {
    tracing::debug!("Fetching {url}");
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|err| description_error(url.as_str(), err.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(description_error(url.as_str(), format!("status {status}")));
    }
    response
        .text()
        .await
        .map_err(|err| description_error(url.as_str(), err.to_string()))
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|child| child.is_element() && child.tag_name().name() == name)
}

fn child_text(node: Node<'_, '_>, name: &str) -> Option<String> {
    child(node, name)
        .and_then(|child| child.text())
        .map(|text| text.trim().to_owned())
        .filter(|text| !text.is_empty())
}

fn elements<'a, 'input>(doc: &'a Document<'input>, name: &'a str) -> impl Iterator<Item = Node<'a, 'input>> {
    doc.descendants()
        .filter(move |node| node.is_element() && node.tag_name().name() == name)
}

fn resolve(base: &Url, reference: &str, url: &str) -> Result<Url, UpnpFuzzError> {
    base.join(reference)
        .map_err(|err| description_error(url, format!("invalid url {reference}: {err}")))
}

/// Parses a device description and returns every service of the device and its embedded
/// devices. Relative urls are resolved against `URLBase` or, if missing, `location`.
/// # Errors
pub fn parse_device(xml: &str, location: &Url) -> Result<Vec<ServiceDescription>, UpnpFuzzError> {
    let url = location.as_str();
    let doc = Document::parse(xml).map_err(|err| description_error(url, err.to_string()))?;

    let base = match elements(&doc, "URLBase").next().and_then(|node| node.text()) {
        Some(base) => Url::parse(base.trim())
            .map_err(|err| description_error(url, format!("invalid URLBase {base}: {err}")))?,
        None => location.clone(),
    };

    let mut services = vec![];
    for service in elements(&doc, "service") {
        let missing = |name: &str| description_error(url, format!("service without {name}"));
        let service_type = child_text(service, "serviceType").ok_or_else(|| missing("serviceType"))?;
        let scpd = child_text(service, "SCPDURL").ok_or_else(|| missing("SCPDURL"))?;
        let control = child_text(service, "controlURL").ok_or_else(|| missing("controlURL"))?;
        let event_url = match child_text(service, "eventSubURL") {
            Some(event) => Some(resolve(&base, &event, url)?),
            None => None,
        };
        services.push(ServiceDescription {
            service_id: child_text(service, "serviceId").unwrap_or_default(),
            scpd_url: resolve(&base, &scpd, url)?,
            control_url: resolve(&base, &control, url)?,
            service_type,
            event_url,
        });
    }
    Ok(services)
}

struct StateVariable {
    data_type: String,
    default_value: Option<String>,
    allowed_values: Vec<String>,
}

/// Parses the SCPD of `service` into its actions
/// # Errors
pub fn parse_scpd(xml: &str, service: &ServiceDescription) -> Result<Vec<ActionDescription>, UpnpFuzzError> {
    let url = service.scpd_url.as_str();
    let doc = Document::parse(xml).map_err(|err| description_error(url, err.to_string()))?;

    let mut variables = HashMap::new();
    for variable in elements(&doc, "stateVariable") {
        let Some(name) = child_text(variable, "name") else {
            return Err(description_error(url, "stateVariable without name"));
        };
        let allowed_values = child(variable, "allowedValueList")
            .map(|list| {
                list.children()
                    .filter(|node| node.is_element() && node.tag_name().name() == "allowedValue")
                    .filter_map(|node| node.text().map(|text| text.trim().to_owned()))
                    .collect()
            })
            .unwrap_or_default();
        variables.insert(
            name,
            StateVariable {
                data_type: child_text(variable, "dataType").unwrap_or_default(),
                default_value: child_text(variable, "defaultValue"),
                allowed_values,
            },
        );
    }

    let mut actions = vec![];
    for action in elements(&doc, "action") {
        let Some(name) = child_text(action, "name") else {
            return Err(description_error(url, "action without name"));
        };
        let mut arguments = vec![];
        if let Some(list) = child(action, "argumentList") {
            for argument in list
                .children()
                .filter(|node| node.is_element() && node.tag_name().name() == "argument")
            {
                let Some(arg_name) = child_text(argument, "name") else {
                    return Err(description_error(url, format!("argument of {name} without name")));
                };
                let direction = match child_text(argument, "direction").as_deref() {
                    Some(direction) if direction.eq_ignore_ascii_case("in") => Direction::In,
                    _ => Direction::Out,
                };
                let related = child_text(argument, "relatedStateVariable").unwrap_or_default();
                let argument = match variables.get(&related) {
                    Some(variable) => ArgumentDescription {
                        name: arg_name,
                        direction,
                        data_type: variable.data_type.clone(),
                        default_value: variable.default_value.clone(),
                        allowed_values: variable.allowed_values.clone(),
                    },
                    None => {
                        tracing::warn!("{name}: {arg_name} refers to unknown state variable {related:?}");
                        ArgumentDescription {
                            name: arg_name,
                            direction,
                            data_type: String::new(),
                            default_value: None,
                            allowed_values: vec![],
                        }
                    }
                };
                arguments.push(argument);
            }
        }
        actions.push(ActionDescription {
            name,
            service_type: service.service_type.clone(),
            control_url: service.control_url.clone(),
            arguments,
        });
    }
    Ok(actions)
}

/// Parses the description url given on the command line
/// # Errors
pub fn parse_url(url: &str) -> Result<Url, UpnpFuzzError> {
    let parsed = Url::parse(url).map_err(|err| description_error(url, err.to_string()))?;
    if parsed.host_str().is_none() {
        return Err(description_error(url, "url without host"));
    }
    Ok(parsed)
}

/// Returns `host:port` of `url`, using the default port of the scheme if none is given
/// # Errors
pub fn address_of(url: &Url) -> Result<String, UpnpFuzzError> {
    let host = url
        .host_str()
        .ok_or_else(|| description_error(url.as_str(), "url without host"))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| description_error(url.as_str(), "url without port"))?;
    if host.contains(':') && !host.starts_with('[') {
        Ok(format!("[{host}]:{port}"))
    } else {
        Ok(format!("{host}:{port}"))
    }
}

/// Request target of `url`: the path including the query
#[must_use]
pub fn path_of(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_owned(),
    }
}
