use crate::liveness::LivenessVerdict;
use crate::mutator::{AppliedStrategy, Strategy};
use crate::request::{MutatedRequest, ProtocolKind, Target};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

#[derive(Debug, Clone)]
/// A request that most likely crashed the target
pub struct CrashRecord {
    /// iteration the request was sent in
    pub iteration: u64,
    /// time the crash was detected
    pub timestamp: DateTime<Utc>,
    /// the fuzzed target
    pub target: Target,
    /// strategy configured for the campaign
    pub selected_strategy: Strategy,
    /// the request that was sent
    pub request: MutatedRequest,
    /// evidence of the `Dead` verdict
    pub evidence: String,
}

impl CrashRecord {
    /// creates a new record for a dead verdict
    #[must_use]
    pub fn new(
        target: Target,
        selected_strategy: Strategy,
        request: MutatedRequest,
        verdict: &LivenessVerdict,
    ) -> Self {
        Self {
            iteration: request.iteration,
            timestamp: Utc::now(),
            target,
            selected_strategy,
            request,
            evidence: verdict.to_string(),
        }
    }

    /// File name of the payload without the extension
    #[must_use]
    pub fn file_stem(&self) -> String {
        format!(
            "{:08}_{}_{}_{}",
            self.iteration,
            self.timestamp.format("%Y%m%dT%H%M%S%.6fZ"),
            self.target.protocol,
            self.request.strategy
        )
    }

    /// Metadata written next to the payload
    #[must_use]
    pub fn metadata(&self, payload_file: String) -> CrashMetadata {
        CrashMetadata {
            iteration: self.iteration,
            timestamp: self.timestamp,
            protocol: self.target.protocol,
            strategy: self.request.strategy,
            selected_strategy: self.selected_strategy,
            target: self.target.clone(),
            template: self.request.baseline.name().to_owned(),
            mutated_fields: self.request.mutated_fields(),
            evidence: self.evidence.clone(),
            payload_sha1: payload_digest(&self.request.bytes),
            payload_len: self.request.bytes.len(),
            payload_file,
            expects_response: self.request.baseline.expects_response(),
            baseline: String::from_utf8_lossy(&self.request.baseline.render()).into_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Sidecar of a crash payload. It contains everything needed to replay the payload.
pub struct CrashMetadata {
    /// iteration the request was sent in
    pub iteration: u64,
    /// ISO-8601 time the crash was detected
    pub timestamp: DateTime<Utc>,
    /// protocol of the target
    pub protocol: ProtocolKind,
    /// strategy that produced the payload
    pub strategy: AppliedStrategy,
    /// strategy configured for the campaign
    pub selected_strategy: Strategy,
    /// the fuzzed target
    pub target: Target,
    /// name of the baseline template
    pub template: String,
    /// names of the mutated fields
    pub mutated_fields: Vec<String>,
    /// evidence of the `Dead` verdict
    pub evidence: String,
    /// hex encoded SHA-1 of the payload
    pub payload_sha1: String,
    /// length of the payload in bytes
    pub payload_len: usize,
    /// file name of the payload, relative to the sidecar
    pub payload_file: String,
    /// true if the target answers the unmutated request
    pub expects_response: bool,
    /// the unmutated request
    pub baseline: String,
}

/// Hex encoded SHA-1 of `payload`
#[must_use]
pub fn payload_digest(payload: &[u8]) -> String {
    hex::encode(Sha1::digest(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_digest() {
        assert_eq!(payload_digest(b"abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }
}
