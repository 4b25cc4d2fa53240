use std::error::Error;
use std::io::ErrorKind;
use std::time::Duration;
use upnpfuzz_core::error::UpnpFuzzError;
use upnpfuzz_core::liveness::LivenessVerdict;
use upnpfuzz_core::traits::HealthCheck;
use url::Url;

/// Decides the liveness of the target with a GET request to `url`.
/// - Any HTTP response, whatever the status, means the target is alive
/// - A refused or reset connection and a timeout mean the target is dead
/// - A host name that can not be resolved is not conclusive, the problem is on our side
pub struct HttpHealthcheck {
    url: Url,
    client: reqwest::Client,
}

impl HttpHealthcheck {
    /// Creates a new health check, `timeout` bounds every request
    /// # Errors
    pub fn new(url: &str, timeout: Duration) -> Result<Self, UpnpFuzzError> {
        let url = Url::parse(url).map_err(|err| UpnpFuzzError::Configuration {
            err_msg: format!("alive url {url}: {err}"),
        })?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(3))
            .build()
            .map_err(|err| UpnpFuzzError::Configuration {
                err_msg: format!("http client: {err}"),
            })?;
        Ok(Self { url, client })
    }

    async fn resolves(&self) -> Result<(), String> {
        let Some(host) = self.url.host_str() else {
            return Err(format!("{} has no host", self.url));
        };
        let port = self.url.port_or_known_default().unwrap_or(80);
        let host = host.trim_start_matches('[').trim_end_matches(']');
        match tokio::net::lookup_host((host, port)).await {
            Ok(mut addrs) => {
                if addrs.next().is_some() {
                    Ok(())
                } else {
                    Err(format!("{host} has no address"))
                }
            }
            Err(err) => Err(format!("could not resolve {host}: {err}")),
        }
    }
}

/// Only a refused, reset or timed out connection counts. Failed TLS handshakes are connect
/// errors to reqwest as well but say nothing about the target.
fn is_connection_failure(err: &reqwest::Error) -> bool {
    if err.is_timeout() {
        return true;
    }
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>()
            && matches!(
                io.kind(),
                ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::TimedOut
            )
        {
            return true;
        }
        source = cause.source();
    }
    false
}

impl HealthCheck for HttpHealthcheck {
    async fn check(&mut self) -> LivenessVerdict {
        if let Err(reason) = self.resolves().await {
            return LivenessVerdict::Unknown(reason);
        }
        match self.client.get(self.url.clone()).send().await {
            Ok(response) => {
                tracing::debug!("{} answered with {}", self.url, response.status());
                LivenessVerdict::Alive
            }
            Err(err) if is_connection_failure(&err) => {
                LivenessVerdict::Dead(format!("{} is unreachable: {err}", self.url))
            }
            Err(err) => LivenessVerdict::Unknown(err.to_string()),
        }
    }
}
