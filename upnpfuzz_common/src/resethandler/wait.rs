use upnpfuzz_core::error::UpnpFuzzError;
use upnpfuzz_core::traits::ResetHandler;

/// Reset handler for targets that restart themselves, e.g. by a watchdog. It does nothing,
/// the campaign then waits for the restart grace period.
pub struct WaitResetHandler;

impl ResetHandler for WaitResetHandler {
    async fn reset(&mut self) -> Result<(), UpnpFuzzError> {
        tracing::warn!("No restart command configured, waiting for the target to come back");
        Ok(())
    }
}
