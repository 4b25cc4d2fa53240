/// SSDP discovery and announcement messages over UDP
pub mod ssdp;

/// SOAP control requests built from the device description
pub mod soap;

/// Event subscription requests
pub mod esp;

/// Fetches and parses device descriptions and service descriptions (SCPD)
pub mod description;

/// Returns the `host` and `port` of a `host:port` address, IPv6 hosts keep their brackets
pub(crate) fn split_host_port(address: &str) -> (&str, &str) {
    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && !port.contains(']') => (host, port),
        _ => (address, ""),
    }
}

/// Escapes the characters that would break the XML carrier
pub(crate) fn xml_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("192.168.0.1:1900"), ("192.168.0.1", "1900"));
        assert_eq!(split_host_port("[::1]:49152"), ("[::1]", "49152"));
        assert_eq!(split_host_port("router"), ("router", ""));
    }

    #[test]
    fn test_xml_escape() {
        assert_eq!(xml_escape("a<b>&\"c'"), "a&lt;b&gt;&amp;&quot;c&apos;");
        assert_eq!(xml_escape("192.168.1.4"), "192.168.1.4");
    }
}
