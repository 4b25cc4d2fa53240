//! The crash directory contains two files per crash that share the same stem
//! `<iteration>_<timestamp>_<protocol>_<strategy>`:
//!
//! - `.bin`: the raw payload that was sent to the target
//! - `.json`: the `CrashMetadata` sidecar required to replay the payload
//!

use crate::error::{UpnpFuzzError, UpnpFuzzResult};
use crate::types::{CrashMetadata, CrashRecord};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Persists crash records. Files are created with `create_new` so two records never
/// overwrite each other, even if several campaigns share the directory.
#[derive(Debug, Clone)]
pub struct CrashRecorder {
    path: PathBuf,
}

fn recorder_error(path: &Path, err: std::io::Error) -> UpnpFuzzError {
    UpnpFuzzError::Recorder {
        path: path.display().to_string(),
        err,
    }
}

impl CrashRecorder {
    /// creates the crash directory if needed
    /// # Errors
    /// Returns `UpnpFuzzError::Recorder` if the directory could not be created.
    pub fn init(path: impl Into<PathBuf>) -> UpnpFuzzResult<Self> {
        let path = path.into();
        if !path.is_dir() {
            std::fs::create_dir_all(&path).map_err(|err| recorder_error(&path, err))?;
            tracing::info!("Created crash directory: {}", path.display());
        }
        Ok(Self { path })
    }

    /// The crash directory
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_new(path: &Path, content: &[u8]) -> UpnpFuzzResult<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|err| recorder_error(path, err))?;
        file.write_all(content).map_err(|err| recorder_error(path, err))?;
        file.sync_all().map_err(|err| recorder_error(path, err))?;
        Ok(())
    }

    /// Writes the payload and its sidecar, returns the path of the payload
    /// # Errors
    /// Any failure is returned as `UpnpFuzzError::Recorder`.
    pub fn record(&self, record: &CrashRecord) -> UpnpFuzzResult<PathBuf> {
        let stem = record.file_stem();
        let payload_file = format!("{stem}.bin");
        let payload_path = self.path.join(&payload_file);
        let sidecar_path = self.path.join(format!("{stem}.json"));

        Self::write_new(&payload_path, &record.request.bytes)?;
        let metadata = record.metadata(payload_file);
        let content = serde_json::to_vec_pretty(&metadata).map_err(|err| {
            recorder_error(&sidecar_path, std::io::Error::other(err.to_string()))
        })?;
        Self::write_new(&sidecar_path, &content)?;

        tracing::info!("Stored crash of iteration {} in {}", record.iteration, payload_path.display());
        Ok(payload_path)
    }

    /// Loads all sidecars of the crash directory sorted by iteration
    /// # Errors
    /// Returns `UpnpFuzzError::IoError` if the directory can not be read and
    /// `UpnpFuzzError::Serde` for a sidecar that is not valid JSON.
    pub fn load(&self) -> UpnpFuzzResult<Vec<CrashMetadata>> {
        let mut crashes = vec![];
        for entry in std::fs::read_dir(&self.path)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                crashes.push(Self::load_sidecar(&path)?);
            }
        }
        crashes.sort_by_key(|crash| (crash.iteration, crash.timestamp));
        Ok(crashes)
    }

    /// Loads a single sidecar
    /// # Errors
    /// Returns `UpnpFuzzError::IoError` if the file can not be read and `UpnpFuzzError::Serde`
    /// if it is not a valid sidecar.
    pub fn load_sidecar(path: &Path) -> UpnpFuzzResult<CrashMetadata> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Reads the payload a sidecar points to
    /// # Errors
    /// Returns `UpnpFuzzError::IoError` if the payload file can not be read.
    pub fn load_payload(sidecar: &Path, metadata: &CrashMetadata) -> UpnpFuzzResult<Vec<u8>> {
        let dir = sidecar.parent().unwrap_or_else(|| Path::new("."));
        Ok(std::fs::read(dir.join(&metadata.payload_file))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liveness::LivenessVerdict;
    use crate::mutator::{MutationEngine, Strategy};
    use crate::payloads::InjectionCatalog;
    use crate::request::{BaselineRequest, FieldRole, ProtocolKind, Target};
    use crate::types::payload_digest;

    fn record(iteration: u64) -> CrashRecord {
        let baseline = BaselineRequest::builder(ProtocolKind::Soap, "GetStatusInfo")
            .literal("POST ")
            .field("controlURL", FieldRole::RequestTarget, "/ctl/IPConn")
            .literal(" HTTP/1.1\r\nContent-Length: ")
            .field("Content-Length", FieldRole::ContentLength, "0")
            .literal("\r\n\r\n")
            .body()
            .literal("<x>")
            .field("NewArg", FieldRole::Argument, "1")
            .literal("</x>")
            .build();
        let mut engine = MutationEngine::new(11, InjectionCatalog::default(), 128, b'A');
        let request = engine.overflow(baseline, iteration);
        let mut target = Target::new(ProtocolKind::Soap, "10.0.0.1:5000");
        target.url = Some("http://10.0.0.1:5000/rootDesc.xml".into());
        CrashRecord::new(
            target,
            Strategy::Overflow,
            request,
            &LivenessVerdict::Dead("3 consecutive requests unanswered".into()),
        )
    }

    #[test]
    fn test_record_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = CrashRecorder::init(dir.path().join("crashes")).unwrap();
        let record = record(7);

        let payload_path = recorder.record(&record).unwrap();
        assert_eq!(std::fs::read(&payload_path).unwrap(), record.request.bytes);
        let name = payload_path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("00000007_"));
        assert!(name.ends_with("_soap_overflow.bin"));

        let crashes = recorder.load().unwrap();
        assert_eq!(crashes.len(), 1);
        let metadata = &crashes[0];
        assert_eq!(metadata.iteration, 7);
        assert_eq!(metadata.timestamp, record.timestamp);
        assert_eq!(metadata.target, record.target);
        assert_eq!(metadata.template, "GetStatusInfo");
        assert_eq!(metadata.mutated_fields, record.request.mutated_fields());
        assert_eq!(metadata.payload_sha1, payload_digest(&record.request.bytes));
        assert_eq!(metadata.payload_len, record.request.bytes.len());

        let sidecar = payload_path.with_extension("json");
        let payload = CrashRecorder::load_payload(&sidecar, metadata).unwrap();
        assert_eq!(payload, record.request.bytes);
    }

    #[test]
    fn test_existing_files_are_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = CrashRecorder::init(dir.path()).unwrap();
        let record = record(1);
        recorder.record(&record).unwrap();
        let err = recorder.record(&record).unwrap_err();
        assert!(matches!(err, UpnpFuzzError::Recorder { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_unwritable_directory_is_a_recorder_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        std::fs::write(&file, b"").unwrap();
        let err = CrashRecorder::init(file.join("crashes")).unwrap_err();
        assert!(matches!(err, UpnpFuzzError::Recorder { .. }));
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let sidecar = dir.path().join("broken.json");
        std::fs::write(&sidecar, b"{ not json").unwrap();
        assert!(matches!(CrashRecorder::load_sidecar(&sidecar), Err(UpnpFuzzError::Serde { .. })));

        let recorder = CrashRecorder::init(dir.path()).unwrap();
        assert!(matches!(recorder.load(), Err(UpnpFuzzError::Serde { .. })));
        assert!(matches!(
            CrashRecorder::load_sidecar(&dir.path().join("missing.json")),
            Err(UpnpFuzzError::IoError { .. })
        ));
    }
}
