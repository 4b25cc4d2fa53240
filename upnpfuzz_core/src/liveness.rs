use crate::error::UpnpFuzzError;
use crate::request::RawResponse;
use crate::traits::HealthCheck;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "reason", rename_all = "lowercase")]
/// Judgment of the target health after one iteration
pub enum LivenessVerdict {
    /// the target is answering
    Alive,
    /// the target crashed, contains the evidence
    Dead(String),
    /// not conclusive, never triggers a crash record
    Unknown(String),
}

impl LivenessVerdict {
    /// Returns true for `Dead`
    #[must_use]
    pub fn is_dead(&self) -> bool {
        matches!(self, LivenessVerdict::Dead(_))
    }

    /// Returns true for `Alive`
    #[must_use]
    pub fn is_alive(&self) -> bool {
        matches!(self, LivenessVerdict::Alive)
    }
}

impl Display for LivenessVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LivenessVerdict::Alive => write!(f, "alive"),
            LivenessVerdict::Dead(evidence) => write!(f, "dead ({evidence})"),
            LivenessVerdict::Unknown(reason) => write!(f, "unknown ({reason})"),
        }
    }
}

#[derive(Debug, Clone)]
/// Decides the liveness from the response to the fuzzed request. A single missing response
/// can be packet loss, so only `threshold` consecutive misses mark the target as dead.
pub struct ResponseInference {
    threshold: u32,
    misses: u32,
}

impl ResponseInference {
    /// creates a new inference with the given miss threshold
    #[must_use]
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            misses: 0,
        }
    }

    /// Consecutive misses seen so far
    #[must_use]
    pub fn misses(&self) -> u32 {
        self.misses
    }

    /// Forgets all misses, e.g. after the target was restarted
    pub fn reset(&mut self) {
        self.misses = 0;
    }

    /// Feeds the outcome of one send into the inference
    pub fn observe(
        &mut self,
        expects_response: bool,
        outcome: Result<&RawResponse, &UpnpFuzzError>,
    ) -> LivenessVerdict {
        if let Ok(response) = outcome
            && !response.bytes.is_empty()
        {
            self.misses = 0;
            return LivenessVerdict::Alive;
        }
        if !expects_response {
            return LivenessVerdict::Unknown("no response expected for this request".to_owned());
        }
        let reason = match outcome {
            Ok(_) => "connection closed without data".to_owned(),
            Err(UpnpFuzzError::Timeout { .. }) => "no response within the network timeout".to_owned(),
            Err(err) => err.to_string(),
        };
        self.misses += 1;
        if self.misses >= self.threshold {
            let evidence = format!("{} consecutive requests unanswered, last: {reason}", self.misses);
            self.misses = 0;
            return LivenessVerdict::Dead(evidence);
        }
        LivenessVerdict::Unknown(format!("{reason} ({}/{})", self.misses, self.threshold))
    }
}

/// Combines the optional health check with the response inference. If a health check is
/// configured it is the only source of truth.
pub struct LivenessMonitor<H: HealthCheck> {
    healthcheck: Option<H>,
    inference: ResponseInference,
}

impl<H: HealthCheck> LivenessMonitor<H> {
    /// creates a new monitor
    pub fn new(healthcheck: Option<H>, miss_threshold: u32) -> Self {
        Self {
            healthcheck,
            inference: ResponseInference::new(miss_threshold),
        }
    }

    /// Returns true if a health check is configured
    pub fn has_healthcheck(&self) -> bool {
        self.healthcheck.is_some()
    }

    /// Judges the liveness after a request was sent
    pub async fn check(
        &mut self,
        expects_response: bool,
        outcome: Result<&RawResponse, &UpnpFuzzError>,
    ) -> LivenessVerdict {
        match &mut self.healthcheck {
            Some(healthcheck) => healthcheck.check().await,
            None => self.inference.observe(expects_response, outcome),
        }
    }

    /// Runs only the health check, `None` if there is none configured
    pub async fn probe(&mut self) -> Option<LivenessVerdict> {
        match &mut self.healthcheck {
            Some(healthcheck) => Some(healthcheck.check().await),
            None => None,
        }
    }

    /// Forgets the response history
    pub fn reset(&mut self) {
        self.inference.reset();
    }
}
