use crate::config::{CampaignConfig, CampaignSettings, FieldMode, InjectionOrder};
use crate::error::UpnpFuzzResult;
use crate::fuzz::engine::CampaignEngine;
use crate::fuzz::state::CampaignSummary;
use crate::log::Logger;
use crate::mutator::Strategy;
use crate::traits::{ExternalMutator, HealthCheck, ProtocolAdapter, ResetHandler};
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Parses a number of seconds like `0.5` or `30`
/// # Errors
pub fn parse_seconds(value: &str) -> Result<Duration, String> {
    let seconds: f64 = value
        .parse()
        .map_err(|err| format!("{value} is not a number of seconds: {err}"))?;
    Duration::try_from_secs_f64(seconds).map_err(|err| format!("{value}: {err}"))
}

#[derive(Debug, Clone, Default, Args)]
#[group(id = "strategy", multiple = false)]
/// Mutation strategy of the campaign, defaults to raw
pub struct StrategyArgs {
    /// Send the well-formed requests without mutation
    #[arg(long)]
    pub raw: bool,
    /// Replace fields with command injection, path traversal and format string payloads
    #[arg(long)]
    pub injection: bool,
    /// Replace fields with boundary length values
    #[arg(long)]
    pub overflow: bool,
    /// Let the external mutator mutate the whole request
    #[arg(long)]
    pub external: bool,
    /// Pick injection, overflow or external for every request
    #[arg(long)]
    pub randomized: bool,
}

impl StrategyArgs {
    /// The selected strategy
    #[must_use]
    pub fn strategy(&self) -> Strategy {
        if self.injection {
            Strategy::Injection
        } else if self.overflow {
            Strategy::Overflow
        } else if self.external {
            Strategy::External
        } else if self.randomized {
            Strategy::Randomized
        } else {
            Strategy::Raw
        }
    }
}

#[derive(Debug, Clone, Args)]
/// Options shared by every campaign, flattened into the `fuzz` command
pub struct CampaignArgs {
    #[allow(missing_docs)]
    #[command(flatten)]
    pub strategy: StrategyArgs,
    /// Seconds to wait between two requests
    #[arg(long, value_parser = parse_seconds, default_value = "0")]
    pub delay: Duration,
    /// Seconds a single network operation may take
    #[arg(long, value_parser = parse_seconds, default_value = "5")]
    pub network_timeout: Duration,
    /// URL polled with GET to decide whether the target is alive
    #[arg(long)]
    pub alive_url: Option<String>,
    /// Directory for the crash records
    #[arg(long)]
    pub crash_dir: Option<PathBuf>,
    /// Shell command restarting the target after a crash
    #[arg(long)]
    pub restart_cmd: Option<String>,
    /// Seconds the restart command may take
    #[arg(long, value_parser = parse_seconds, default_value = "60")]
    pub restart_timeout: Duration,
    /// Seconds the target has to come back after a restart
    #[arg(long, value_parser = parse_seconds, default_value = "30")]
    pub restart_delay: Duration,
    /// Failed restarts in a row until the campaign stops
    #[arg(long, default_value_t = 3)]
    pub max_restart_failures: u32,
    /// External mutator reading the request from stdin and writing the mutation to stdout
    #[arg(long, alias = "radamsa-path")]
    pub mutator_path: Option<PathBuf>,
    /// Seconds a single external mutation may take
    #[arg(long, value_parser = parse_seconds, default_value = "5")]
    pub mutator_timeout: Duration,
    /// Number of iterations, runs until stopped if not given
    #[arg(long)]
    pub iterations: Option<u64>,
    /// Seed of the payload and strategy choices
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
    /// Unanswered requests in a row until the target is considered dead
    #[arg(long, default_value_t = 3)]
    pub miss_threshold: u32,
    /// Longest value of the overflow strategy
    #[arg(long, default_value_t = 8192)]
    pub overflow_max: usize,
    /// Command embedded into the injection payloads
    #[arg(long, default_value = "reboot")]
    pub injection_cmd: String,
    /// Mutate every field of a request instead of a single one
    #[arg(long, default_value_t = false)]
    pub all_fields: bool,
    /// Walk through fields and payloads in order instead of randomly
    #[arg(long, default_value_t = false)]
    pub sequential: bool,
    /// Hides the campaign dashboard
    #[arg(long, default_value_t = false)]
    pub hide_ui: bool,
}

impl CampaignArgs {
    /// Turns the arguments into unvalidated settings
    #[must_use]
    pub fn into_settings(self) -> CampaignSettings {
        CampaignSettings {
            strategy: self.strategy.strategy(),
            field_mode: if self.all_fields {
                FieldMode::AllFields
            } else {
                FieldMode::PerField
            },
            injection_order: if self.sequential {
                InjectionOrder::Sequential
            } else {
                InjectionOrder::Random
            },
            delay: self.delay,
            network_timeout: self.network_timeout,
            alive_url: self.alive_url,
            crash_dir: self.crash_dir,
            restart_cmd: self.restart_cmd,
            restart_timeout: self.restart_timeout,
            restart_grace: self.restart_delay,
            max_restart_failures: self.max_restart_failures,
            mutator_path: self.mutator_path,
            mutator_timeout: self.mutator_timeout,
            iterations: self.iterations,
            seed: self.seed,
            miss_threshold: self.miss_threshold,
            overflow_max: self.overflow_max,
            injection_cmd: self.injection_cmd,
            ..CampaignSettings::default()
        }
    }
}

/// A helper struct to set up and start a campaign with fewer lines of code.
pub struct CampaignBuilder<A, H, R, E>
where
    A: ProtocolAdapter,
    H: HealthCheck,
    R: ResetHandler,
    E: ExternalMutator,
{
    adapter: A,
    healthcheck: Option<H>,
    resethandler: R,
    external: Option<E>,
}

impl<A, H, R, E> CampaignBuilder<A, H, R, E>
where
    A: ProtocolAdapter,
    H: HealthCheck,
    R: ResetHandler,
    E: ExternalMutator,
{
    /// Starts a new builder for the given adapter
    pub fn new(adapter: A, resethandler: R) -> Self {
        Self {
            adapter,
            healthcheck: None,
            resethandler,
            external: None,
        }
    }

    /// Decides the liveness with the given health check instead of the responses
    #[must_use]
    pub fn healthcheck(mut self, healthcheck: Option<H>) -> Self {
        self.healthcheck = healthcheck;
        self
    }

    /// Mutator used by the external and randomized strategies
    #[must_use]
    pub fn external(mut self, external: Option<E>) -> Self {
        self.external = external;
        self
    }

    /// Runs the campaign until the limit is reached, `cancel` is triggered or a fatal
    /// condition occurs
    /// # Errors
    pub async fn start(
        self,
        config: CampaignConfig,
        enable_ui: bool,
        logger: Option<Logger>,
        cancel: CancellationToken,
    ) -> UpnpFuzzResult<CampaignSummary> {
        let mut engine = CampaignEngine::new(
            config,
            self.adapter,
            self.healthcheck,
            self.resethandler,
            self.external,
        )?
        .with_cancellation(cancel);
        engine.fuzz(enable_ui, logger).await
    }
}
