use crate::error::{UpnpFuzzError, UpnpFuzzResult};
use crate::liveness::{LivenessVerdict, ResponseInference};
use crate::output::CrashRecorder;
use crate::traits::{HealthCheck, Transport};
use crate::triage::utils::{Colored, collapse_runs, mark_differences, printable};
use crate::types::{CrashMetadata, payload_digest};
use std::path::Path;

/// Sends a recorded payload once more to find out whether it reliably crashes the target.
/// - The recorded payload is verified against the digest in its sidecar
/// - The difference to the unmutated request is shown on the terminal
/// - Without a health check a single missing response marks the target as dead
pub struct CrashReplay<T, H>
where
    T: Transport,
    H: HealthCheck,
{
    transport: T,
    healthcheck: Option<H>,
}

impl<T, H> CrashReplay<T, H>
where
    T: Transport,
    H: HealthCheck,
{
    /// creates a new replay
    pub fn new(transport: T, healthcheck: Option<H>) -> Self {
        Self {
            transport,
            healthcheck,
        }
    }

    /// Loads the sidecar and its payload
    /// # Errors
    /// Fails if the files can not be read or the payload does not match the recorded digest.
    pub fn load(sidecar: &Path) -> UpnpFuzzResult<(CrashMetadata, Vec<u8>)> {
        let metadata = CrashRecorder::load_sidecar(sidecar)?;
        let payload = CrashRecorder::load_payload(sidecar, &metadata)?;
        let digest = payload_digest(&payload);
        if digest != metadata.payload_sha1 {
            return Err(UpnpFuzzError::Custom {
                err_msg: format!(
                    "{} was modified, expected sha1 {} but got {digest}",
                    metadata.payload_file, metadata.payload_sha1
                ),
            });
        }
        Ok((metadata, payload))
    }

    /// Replays the crash described by the sidecar and returns the liveness afterwards
    /// # Errors
    pub async fn replay_file(&mut self, sidecar: &Path) -> UpnpFuzzResult<LivenessVerdict> {
        let (metadata, payload) = Self::load(sidecar)?;
        println!(
            "Crash of iteration {} ({} {} via {}): {}",
            metadata.iteration,
            metadata.protocol,
            metadata.template,
            metadata.strategy,
            metadata.evidence
        );
        let shown = collapse_runs(&printable(&payload), 32);
        println!("{}", mark_differences(&metadata.baseline.replace('\r', ""), &shown));
        self.replay(&metadata, &payload).await
    }

    /// Sends `payload` and judges the target health afterwards
    /// # Errors
    /// Returns `UpnpFuzzError::ConnectionFailed` if the target is not alive before the replay.
    pub async fn replay(
        &mut self,
        metadata: &CrashMetadata,
        payload: &[u8],
    ) -> UpnpFuzzResult<LivenessVerdict> {
        if let Some(healthcheck) = &mut self.healthcheck {
            let verdict = healthcheck.check().await;
            if !verdict.is_alive() {
                return Err(UpnpFuzzError::ConnectionFailed {
                    err_msg: format!("{}, target is {verdict} before the replay", metadata.target),
                });
            }
        }

        tracing::info!("Sending {} bytes to {}", payload.len(), self.transport.title());
        let outcome = self.transport.exchange(payload).await;
        if let Err(err) = &outcome {
            tracing::debug!("{err}");
        }

        let verdict = match &mut self.healthcheck {
            Some(healthcheck) => healthcheck.check().await,
            None => ResponseInference::new(1).observe(metadata.expects_response, outcome.as_ref()),
        };
        match &verdict {
            LivenessVerdict::Dead(evidence) => {
                println!("{}", format!("Target crashed again: {evidence}").as_str().red());
            }
            LivenessVerdict::Alive => println!("Target survived the replay"),
            LivenessVerdict::Unknown(reason) => println!("Could not decide: {reason}"),
        }
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutator::{MutationEngine, Strategy};
    use crate::payloads::InjectionCatalog;
    use crate::request::{BaselineRequest, FieldRole, ProtocolKind, Target};
    use crate::types::CrashRecord;

    struct Silent {
        writes: usize,
    }

    impl Transport for Silent {
        fn title(&self) -> String {
            "silent".into()
        }
        async fn connect(&mut self) -> Result<(), UpnpFuzzError> {
            Ok(())
        }
        async fn close(&mut self) -> Result<(), UpnpFuzzError> {
            Ok(())
        }
        async fn read(&mut self, _buf: &mut [u8]) -> Result<usize, UpnpFuzzError> {
            Err(UpnpFuzzError::Transport {
                err_msg: "connection reset".into(),
            })
        }
        async fn write(&mut self, _buf: &[u8]) -> Result<(), UpnpFuzzError> {
            self.writes += 1;
            Ok(())
        }
    }

    struct AlwaysAlive;

    impl HealthCheck for AlwaysAlive {
        async fn check(&mut self) -> LivenessVerdict {
            LivenessVerdict::Alive
        }
    }

    fn recorded(dir: &Path) -> std::path::PathBuf {
        let baseline = BaselineRequest::builder(ProtocolKind::Ssdp, "m-search")
            .literal("M-SEARCH * HTTP/1.1\r\nST: ")
            .field("ST", FieldRole::Header, "ssdp:all")
            .literal("\r\n\r\n")
            .build();
        let mut engine = MutationEngine::new(2, InjectionCatalog::default(), 512, b'A');
        let request = engine.overflow(baseline, 3);
        let record = CrashRecord::new(
            Target::new(ProtocolKind::Ssdp, "127.0.0.1:1900"),
            Strategy::Overflow,
            request,
            &LivenessVerdict::Dead("no response".into()),
        );
        let recorder = CrashRecorder::init(dir).unwrap();
        recorder.record(&record).unwrap().with_extension("json")
    }

    #[tokio::test]
    async fn test_replay_detects_dead_target() {
        let dir = tempfile::tempdir().unwrap();
        let sidecar = recorded(dir.path());
        let mut replay: CrashReplay<Silent, AlwaysAlive> = CrashReplay::new(Silent { writes: 0 }, None);
        let verdict = replay.replay_file(&sidecar).await.unwrap();
        assert!(verdict.is_dead());
        assert_eq!(replay.transport.writes, 1);
    }

    #[tokio::test]
    async fn test_replay_with_healthcheck() {
        let dir = tempfile::tempdir().unwrap();
        let sidecar = recorded(dir.path());
        let mut replay = CrashReplay::new(Silent { writes: 0 }, Some(AlwaysAlive));
        assert!(replay.replay_file(&sidecar).await.unwrap().is_alive());
    }

    #[test]
    fn test_modified_payload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sidecar = recorded(dir.path());
        std::fs::write(sidecar.with_extension("bin"), b"tampered").unwrap();
        let result = CrashReplay::<Silent, AlwaysAlive>::load(&sidecar);
        assert!(matches!(result, Err(UpnpFuzzError::Custom { .. })));
    }
}
