use crate::error::UpnpFuzzError;
use crate::mutator::Strategy;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// How many fields are mutated per request
pub enum FieldMode {
    /// a single field is replaced
    #[default]
    PerField,
    /// every mutable field is replaced
    AllFields,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// Order in which fields and payloads are chosen
pub enum InjectionOrder {
    /// drawn from the seeded RNG
    #[default]
    Random,
    /// every (field, payload) pair one after another
    Sequential,
}

#[derive(Debug, Clone)]
/// Unvalidated campaign options as they come from the CLI or from a headless setup. Use
/// `CampaignConfig::try_from` to turn them into a usable configuration.
pub struct CampaignSettings {
    /// mutation policy
    pub strategy: Strategy,
    /// fields mutated per request
    pub field_mode: FieldMode,
    /// order of fields and payloads
    pub injection_order: InjectionOrder,
    /// pause between two iterations
    pub delay: Duration,
    /// bound for a single network operation
    pub network_timeout: Duration,
    /// if set the liveness is decided by a GET request to this url
    pub alive_url: Option<String>,
    /// directory for crash records
    pub crash_dir: Option<PathBuf>,
    /// shell command used to restart the target
    pub restart_cmd: Option<String>,
    /// bound for the restart command
    pub restart_timeout: Duration,
    /// time the target has to come back after the restart
    pub restart_grace: Duration,
    /// pause between two liveness checks while waiting for the restart
    pub restart_poll_interval: Duration,
    /// consecutive failed restarts until the campaign stops
    pub max_restart_failures: u32,
    /// file name or path of the external mutator
    pub mutator_path: Option<PathBuf>,
    /// bound for a single external mutation
    pub mutator_timeout: Duration,
    /// `None` runs until the campaign is stopped
    pub iterations: Option<u64>,
    /// seed of all RNGs
    pub seed: u64,
    /// consecutive missing responses until the target is considered dead
    pub miss_threshold: u32,
    /// longest overflow value
    pub overflow_max: usize,
    /// byte the overflow values are made of
    pub overflow_marker: u8,
    /// command embedded into the injection payloads
    pub injection_cmd: String,
    /// consecutive failed external mutations until the campaign stops
    pub max_mutator_errors: u32,
}

impl Default for CampaignSettings {
    fn default() -> Self {
        Self {
            strategy: Strategy::Raw,
            field_mode: FieldMode::PerField,
            injection_order: InjectionOrder::Random,
            delay: Duration::ZERO,
            network_timeout: Duration::from_secs(5),
            alive_url: None,
            crash_dir: None,
            restart_cmd: None,
            restart_timeout: Duration::from_secs(60),
            restart_grace: Duration::from_secs(30),
            restart_poll_interval: Duration::from_secs(1),
            max_restart_failures: 3,
            mutator_path: None,
            mutator_timeout: Duration::from_secs(5),
            iterations: None,
            seed: 0,
            miss_threshold: 3,
            overflow_max: 8192,
            overflow_marker: b'A',
            injection_cmd: "reboot".to_owned(),
            max_mutator_errors: 10,
        }
    }
}

#[derive(Debug, Clone)]
/// Validated configuration of a campaign. It is read-only and can be shared between
/// campaigns.
pub struct CampaignConfig {
    settings: CampaignSettings,
    crash_dir: PathBuf,
    mutator_path: Option<PathBuf>,
}

impl CampaignConfig {
    /// The validated options
    #[must_use]
    pub fn settings(&self) -> &CampaignSettings {
        &self.settings
    }

    /// Directory the crash records are written to
    #[must_use]
    pub fn crash_dir(&self) -> &Path {
        &self.crash_dir
    }

    /// Resolved location of the external mutator
    #[must_use]
    pub fn mutator_path(&self) -> Option<&Path> {
        self.mutator_path.as_deref()
    }
}

impl TryFrom<CampaignSettings> for CampaignConfig {
    type Error = UpnpFuzzError;

    fn try_from(settings: CampaignSettings) -> Result<Self, Self::Error> {
        for (name, value) in [
            ("network timeout", settings.network_timeout),
            ("restart timeout", settings.restart_timeout),
            ("mutator timeout", settings.mutator_timeout),
            ("restart poll interval", settings.restart_poll_interval),
        ] {
            if value.is_zero() {
                return Err(UpnpFuzzError::config(format!("the {name} must be greater than zero")));
            }
        }
        for (name, value) in [
            ("restart failure threshold", settings.max_restart_failures),
            ("miss threshold", settings.miss_threshold),
            ("mutator error threshold", settings.max_mutator_errors),
        ] {
            if value == 0 {
                return Err(UpnpFuzzError::config(format!("the {name} must be at least 1")));
            }
        }
        if settings.overflow_max == 0 {
            return Err(UpnpFuzzError::config("the overflow max length must be at least 1"));
        }
        if settings.strategy == Strategy::Injection && settings.injection_cmd.is_empty() {
            return Err(UpnpFuzzError::config("the injection command must not be empty"));
        }

        if let Some(alive_url) = &settings.alive_url {
            let parsed = url::Url::parse(alive_url)
                .map_err(|err| UpnpFuzzError::config(format!("alive url {alive_url}: {err}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(UpnpFuzzError::config(format!(
                    "alive url {alive_url} must use http or https"
                )));
            }
        }

        let crash_dir = match (&settings.crash_dir, settings.strategy) {
            (Some(dir), _) => dir.clone(),
            (None, Strategy::Raw) => std::env::temp_dir().join("upnpfuzz"),
            (None, strategy) => {
                return Err(UpnpFuzzError::config(format!(
                    "the {strategy} strategy requires a crash directory"
                )));
            }
        };

        let mutator_path = if settings.strategy.uses_external_mutator() {
            let Some(path) = &settings.mutator_path else {
                return Err(UpnpFuzzError::config(format!(
                    "the {} strategy requires a mutator path",
                    settings.strategy
                )));
            };
            Some(resolve_executable(path).ok_or_else(|| {
                UpnpFuzzError::config(format!("mutator {} not found", path.display()))
            })?)
        } else {
            None
        };

        Ok(Self {
            settings,
            crash_dir,
            mutator_path,
        })
    }
}

/// Returns the path of `program` either directly or by searching `PATH`
fn resolve_executable(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 || program.is_absolute() {
        return program.is_file().then(|| program.to_path_buf());
    }
    if program.is_file() {
        return Some(program.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_config_error(result: Result<CampaignConfig, UpnpFuzzError>) -> bool {
        matches!(result, Err(UpnpFuzzError::Configuration { .. }))
    }

    #[test]
    fn test_raw_falls_back_to_temp_dir() {
        let config = CampaignConfig::try_from(CampaignSettings::default()).unwrap();
        assert_eq!(config.crash_dir(), std::env::temp_dir().join("upnpfuzz"));
        assert!(config.mutator_path().is_none());
    }

    #[test]
    fn test_mutating_strategies_need_crash_dir() {
        for strategy in [Strategy::Injection, Strategy::Overflow] {
            let settings = CampaignSettings {
                strategy,
                ..Default::default()
            };
            assert!(is_config_error(CampaignConfig::try_from(settings)));
        }
        let settings = CampaignSettings {
            strategy: Strategy::Overflow,
            crash_dir: Some(PathBuf::from("/tmp/crashes")),
            ..Default::default()
        };
        assert!(CampaignConfig::try_from(settings).is_ok());
    }

    #[test]
    fn test_external_mutator_must_exist() {
        let settings = CampaignSettings {
            strategy: Strategy::Randomized,
            crash_dir: Some(PathBuf::from("/tmp/crashes")),
            mutator_path: None,
            ..Default::default()
        };
        assert!(is_config_error(CampaignConfig::try_from(settings.clone())));

        let settings = CampaignSettings {
            mutator_path: Some(PathBuf::from("/nonexistent/radamsa")),
            ..settings
        };
        assert!(is_config_error(CampaignConfig::try_from(settings.clone())));

        let dir = tempfile::tempdir().unwrap();
        let mutator = dir.path().join("mutator");
        std::fs::write(&mutator, b"#!/bin/sh\ncat\n").unwrap();
        let settings = CampaignSettings {
            mutator_path: Some(mutator.clone()),
            ..settings
        };
        let config = CampaignConfig::try_from(settings).unwrap();
        assert_eq!(config.mutator_path(), Some(mutator.as_path()));
    }

    #[test]
    fn test_mutator_is_found_in_path() {
        let settings = CampaignSettings {
            strategy: Strategy::External,
            crash_dir: Some(PathBuf::from("/tmp/crashes")),
            mutator_path: Some(PathBuf::from("sh")),
            ..Default::default()
        };
        let config = CampaignConfig::try_from(settings).unwrap();
        assert!(config.mutator_path().is_some_and(Path::is_absolute));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let invalid = [
            CampaignSettings {
                network_timeout: Duration::ZERO,
                ..Default::default()
            },
            CampaignSettings {
                miss_threshold: 0,
                ..Default::default()
            },
            CampaignSettings {
                max_restart_failures: 0,
                ..Default::default()
            },
            CampaignSettings {
                overflow_max: 0,
                ..Default::default()
            },
            CampaignSettings {
                alive_url: Some("ftp://10.0.0.1/".into()),
                ..Default::default()
            },
            CampaignSettings {
                alive_url: Some("not a url".into()),
                ..Default::default()
            },
        ];
        for settings in invalid {
            assert!(is_config_error(CampaignConfig::try_from(settings)));
        }
        let settings = CampaignSettings {
            alive_url: Some("http://10.0.0.1:49152/rootDesc.xml".into()),
            ..Default::default()
        };
        assert!(CampaignConfig::try_from(settings).is_ok());
    }
}
