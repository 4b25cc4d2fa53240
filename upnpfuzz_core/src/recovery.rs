use crate::config::CampaignConfig;
use crate::error::{UpnpFuzzError, UpnpFuzzResult};
use crate::traits::ResetHandler;
use std::time::Duration;
use tokio::time::timeout;

/// Restarts the target through the configured `ResetHandler`. Verifying that the target is
/// back is up to the campaign, because it needs the liveness monitor and the adapter.
pub struct TargetRecovery<R: ResetHandler> {
    handler: R,
    restart_timeout: Duration,
    grace_period: Duration,
    poll_interval: Duration,
    max_failures: u32,
}

impl<R: ResetHandler> TargetRecovery<R> {
    /// creates a new recovery
    pub fn new(
        handler: R,
        restart_timeout: Duration,
        grace_period: Duration,
        poll_interval: Duration,
        max_failures: u32,
    ) -> Self {
        Self {
            handler,
            restart_timeout,
            grace_period,
            poll_interval,
            max_failures: max_failures.max(1),
        }
    }

    /// creates the recovery as configured for a campaign
    pub fn from_config(handler: R, config: &CampaignConfig) -> Self {
        let settings = config.settings();
        Self::new(
            handler,
            settings.restart_timeout,
            settings.restart_grace,
            settings.restart_poll_interval,
            settings.max_restart_failures,
        )
    }

    /// Runs the reset handler bounded by the restart timeout
    /// # Errors
    /// Returns `UpnpFuzzError::Recovery` if the handler failed or did not finish in time
    pub async fn run_handler(&mut self) -> UpnpFuzzResult<()> {
        match timeout(self.restart_timeout, self.handler.reset()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err @ UpnpFuzzError::Recovery { .. })) => Err(err),
            Ok(Err(err)) => Err(UpnpFuzzError::Recovery {
                err_msg: err.to_string(),
            }),
            Err(elapsed) => Err(UpnpFuzzError::Recovery {
                err_msg: format!("restart did not finish in time ({elapsed})"),
            }),
        }
    }

    /// Time the target has to answer again after the handler finished
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Pause between two liveness checks within the grace period
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Returns true if `failures` consecutive failed restarts stop the campaign
    #[must_use]
    pub fn exhausted(&self, failures: u32) -> bool {
        failures >= self.max_failures
    }
}
