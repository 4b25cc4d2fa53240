use crate::liveness::LivenessVerdict;
use crate::request::MutatedRequest;
use std::fmt::Display;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// Phases of the campaign loop. `Completed` and `Fatal` are terminal.
pub enum CampaignPhase {
    #[default]
    /// not started yet
    Idle,
    /// building and mutating the next request
    Generating,
    /// transmitting the request
    Sending,
    /// waiting the inter-request delay
    Delay,
    /// judging the target health
    CheckingLiveness,
    /// writing the crash record
    Recording,
    /// restarting the target
    Restarting,
    /// the campaign ended normally or was stopped
    Completed,
    /// the campaign was stopped by an unrecoverable condition
    Fatal,
}

impl CampaignPhase {
    /// Returns true if no further transition is possible
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, CampaignPhase::Completed | CampaignPhase::Fatal)
    }
}

impl Display for CampaignPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CampaignPhase::Idle => "idle",
            CampaignPhase::Generating => "generating",
            CampaignPhase::Sending => "sending",
            CampaignPhase::Delay => "delay",
            CampaignPhase::CheckingLiveness => "checking liveness",
            CampaignPhase::Recording => "recording",
            CampaignPhase::Restarting => "restarting",
            CampaignPhase::Completed => "completed",
            CampaignPhase::Fatal => "fatal",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Default)]
/// State of a single campaign, owned by its engine
pub struct CampaignState {
    /// iteration currently processed, starting at 1
    pub iteration: u64,
    /// last iteration that went through all phases
    pub last_completed: u64,
    /// restarts that failed in a row
    pub consecutive_restart_failures: u32,
    /// external mutations that failed in a row
    pub consecutive_mutator_errors: u32,
    /// verdict of the last liveness check
    pub verdict: Option<LivenessVerdict>,
    /// current phase
    pub phase: CampaignPhase,
    /// recorded crashes
    pub crashes: usize,
    /// requests sent since the last answer of the target, oldest first. Only filled while the
    /// liveness is inferred, never longer than the miss threshold.
    pub unanswered: Vec<MutatedRequest>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Result of a campaign that ended without a fatal condition
pub struct CampaignSummary {
    /// completed iterations
    pub iterations: u64,
    /// recorded crashes
    pub crashes: usize,
    /// true if the campaign was cancelled before reaching its limit
    pub stopped: bool,
}
