use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use upnpfuzz_core::error::UpnpFuzzError;
use upnpfuzz_core::traits::ExternalMutator;

/// Mutates the requests with an external program that reads the input from stdin and writes
/// the mutation to stdout, like radamsa. The child is killed when the mutation times out.
pub struct CommandMutator {
    path: PathBuf,
    args: Vec<String>,
}

impl CommandMutator {
    /// Creates a mutator running the program at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            args: vec![],
        }
    }

    /// Additional arguments passed to the program
    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    fn error(&self, err_msg: impl std::fmt::Display) -> UpnpFuzzError {
        UpnpFuzzError::Mutator {
            err_msg: format!("{}: {err_msg}", self.path.display()),
        }
    }
}

impl ExternalMutator for CommandMutator {
    fn title(&self) -> String {
        self.path.display().to_string()
    }

    async fn mutate(&mut self, input: &[u8]) -> Result<Vec<u8>, UpnpFuzzError> {
        let mut child = Command::new(&self.path)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| self.error(err))?;

        if let Some(mut stdin) = child.stdin.take() {
            // a mutator may exit before reading everything
            if let Err(err) = stdin.write_all(input).await {
                tracing::debug!("{}", self.error(err));
            }
        }

        let output = child.wait_with_output().await.map_err(|err| self.error(err))?;
        if !output.status.success() {
            return Err(self.error(format!(
                "exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim_end()
            )));
        }
        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_output_of_the_program_is_the_mutation() {
        let mut mutator = CommandMutator::new("tr").with_args(vec!["a-z".into(), "A-Z".into()]);
        assert_eq!(mutator.mutate(b"m-search").await.unwrap(), b"M-SEARCH");
        mutator.probe().await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_program() {
        let mut mutator = CommandMutator::new("false");
        assert!(matches!(
            mutator.mutate(b"x").await,
            Err(UpnpFuzzError::Mutator { .. })
        ));
        let mut missing = CommandMutator::new("/nonexistent/radamsa");
        assert!(missing.probe().await.is_err());
    }
}
