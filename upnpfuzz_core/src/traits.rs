use crate::error::UpnpFuzzError;
use crate::liveness::LivenessVerdict;
use crate::request::{BaselineRequest, ProtocolKind, RawResponse, Target};

/// Size of the buffer a single response is read into
pub const RESPONSE_BUFFER_SIZE: usize = 2048;

/// Transport layer to connect to the target. Every operation must be bounded by the
/// configured network timeout so a campaign never hangs on a dead target.
pub trait Transport {
    /// The title shown in the TUI
    fn title(&self) -> String;

    /// Prepares the connection to the target
    /// # Errors
    fn connect(&mut self) -> impl std::future::Future<Output = Result<(), UpnpFuzzError>>;

    /// Closes the current connection to the target
    /// # Errors
    fn close(&mut self) -> impl std::future::Future<Output = Result<(), UpnpFuzzError>>;

    /// Read data from the target.
    /// - If no error happen the function must return the length that was read from the target.
    /// - A length of 0 means the target closed the connection without sending data.
    /// - If nothing arrives within the timeout `UpnpFuzzError::Timeout` is returned.
    /// # Errors
    fn read(
        &mut self,
        buf: &mut [u8],
    ) -> impl std::future::Future<Output = Result<usize, UpnpFuzzError>>;

    /// Write data to the target.
    /// # Errors
    fn write(&mut self, buf: &[u8]) -> impl std::future::Future<Output = Result<(), UpnpFuzzError>>;

    /// Connects, sends the payload, waits for a single response and closes the connection
    /// again. The connection is closed even if sending or reading failed.
    /// # Errors
    fn exchange(
        &mut self,
        payload: &[u8],
    ) -> impl std::future::Future<Output = Result<RawResponse, UpnpFuzzError>> {
        async move {
            self.connect().await?;
            let result: Result<RawResponse, UpnpFuzzError> = async {
                self.write(payload).await?;
                let mut buffer = vec![0; RESPONSE_BUFFER_SIZE];
                let size = self.read(&mut buffer).await?;
                buffer.truncate(size);
                Ok(RawResponse { bytes: buffer })
            }
            .await;
            let _ = self.close().await;
            result
        }
    }
}

/// Per protocol logic building the well-formed requests and sending them to the target.
pub trait ProtocolAdapter {
    /// The target this adapter talks to
    fn target(&self) -> &Target;

    /// Protocol spoken by the target
    fn kind(&self) -> ProtocolKind {
        self.target().protocol
    }

    /// The title shown in the TUI
    fn title(&self) -> String {
        self.target().to_string()
    }

    /// Builds the well-formed request for the given iteration. The result only depends on
    /// the target, the iteration and the responses observed so far.
    fn build_baseline(&mut self, iteration: u64) -> BaselineRequest;

    /// Request used to verify the target is answering again after a restart. It must be one
    /// the target responds to.
    fn probe_baseline(&mut self) -> BaselineRequest {
        self.build_baseline(1)
    }

    /// Sends the raw bytes to the target and returns its response
    /// # Errors
    fn send(
        &mut self,
        payload: &[u8],
    ) -> impl std::future::Future<Output = Result<RawResponse, UpnpFuzzError>>;

    /// Called with every response so stateful protocols can track e.g. subscription ids
    fn observe_response(&mut self, _response: &RawResponse) {}
}

/// The reset is called from the campaign in case the liveness monitor returns that the
/// target is dead.
pub trait ResetHandler {
    /// Function to restart the target after a crash
    /// # Errors
    fn reset(&mut self) -> impl std::future::Future<Output = Result<(), UpnpFuzzError>>;
}

/// Implements a health check to decide whether the target does still work correctly
pub trait HealthCheck {
    /// Returns `Alive` or `Dead` on conclusive evidence and `Unknown` otherwise
    fn check(&mut self) -> impl std::future::Future<Output = LivenessVerdict>;
}

/// Byte level mutation delegated to a tool outside of the campaign engine
pub trait ExternalMutator {
    /// Name shown in the logs
    fn title(&self) -> String;

    /// Returns the mutated version of `input`
    /// # Errors
    fn mutate(
        &mut self,
        input: &[u8],
    ) -> impl std::future::Future<Output = Result<Vec<u8>, UpnpFuzzError>>;

    /// Dry run executed once before the first request is sent
    /// # Errors
    fn probe(&mut self) -> impl std::future::Future<Output = Result<(), UpnpFuzzError>> {
        async move {
            self.mutate(b"M-SEARCH * HTTP/1.1\r\n\r\n").await?;
            Ok(())
        }
    }
}
