use std::process::Stdio;
use tokio::process::Command;
use upnpfuzz_core::error::UpnpFuzzError;
use upnpfuzz_core::traits::ResetHandler;

/// Restarts the target by running a shell command, e.g. a power cycle of a smart plug or a
/// `ssh router reboot`. The campaign bounds the runtime and the child is killed if the
/// timeout is hit.
pub struct CommandResetHandler {
    command: String,
}

impl CommandResetHandler {
    /// Creates a reset handler running `command` with `sh -c`
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl ResetHandler for CommandResetHandler {
    async fn reset(&mut self) -> Result<(), UpnpFuzzError> {
        tracing::info!("Running restart command: {}", self.command);
        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| UpnpFuzzError::Recovery {
                err_msg: format!("could not run {}: {err}", self.command),
            })?;

        if !output.stdout.is_empty() {
            tracing::debug!("{}", String::from_utf8_lossy(&output.stdout).trim_end());
        }
        if output.status.success() {
            return Ok(());
        }
        Err(UpnpFuzzError::Recovery {
            err_msg: format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim_end()
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_command() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("restarted");
        let mut handler = CommandResetHandler::new(format!("touch {}", marker.display()));
        handler.reset().await.unwrap();
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn test_failing_command_is_a_recovery_error() {
        let mut handler = CommandResetHandler::new("echo broken >&2; exit 3");
        match handler.reset().await {
            Err(UpnpFuzzError::Recovery { err_msg }) => assert!(err_msg.contains("broken")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
