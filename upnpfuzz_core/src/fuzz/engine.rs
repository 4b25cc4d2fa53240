use crate::config::CampaignConfig;
use crate::error::{UpnpFuzzError, UpnpFuzzResult};
use crate::fuzz::state::{CampaignPhase, CampaignState, CampaignSummary};
use crate::fuzz::stats::{ExecsPerSecond, Stats, StatsType};
use crate::fuzz::ui::show_ui;
use crate::liveness::{LivenessMonitor, LivenessVerdict};
use crate::log::Logger;
use crate::mutator::MutationEngine;
use crate::output::CrashRecorder;
use crate::recovery::TargetRecovery;
use crate::traits::{ExternalMutator, HealthCheck, ProtocolAdapter, ResetHandler};
use crate::types::CrashRecord;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// The campaign engine sequences generate, send, delay, liveness check and, if the target
/// died, crash recording and restart. It owns the adapter and all strategy state, so every
/// campaign needs its own engine.
pub struct CampaignEngine<A, H, R, E>
where
    A: ProtocolAdapter,
    H: HealthCheck,
    R: ResetHandler,
    E: ExternalMutator,
{
    adapter: A,
    monitor: LivenessMonitor<H>,
    recovery: TargetRecovery<R>,
    external: Option<E>,
    mutation: MutationEngine,
    recorder: CrashRecorder,
    config: CampaignConfig,
    state: CampaignState,
    pub(crate) stats: StatsType,
    cancel: CancellationToken,
}

impl<A, H, R, E> CampaignEngine<A, H, R, E>
where
    A: ProtocolAdapter,
    H: HealthCheck,
    R: ResetHandler,
    E: ExternalMutator,
{
    /// Creates a new campaign. Without a health check the liveness is inferred from the
    /// responses to the fuzzed requests.
    /// # Errors
    /// Fails if the crash directory can not be created or the strategy requires an external
    /// mutator that was not given.
    pub fn new(
        config: CampaignConfig,
        adapter: A,
        healthcheck: Option<H>,
        resethandler: R,
        external: Option<E>,
    ) -> UpnpFuzzResult<Self> {
        let settings = config.settings();
        if settings.strategy.uses_external_mutator() && external.is_none() {
            return Err(UpnpFuzzError::config(format!(
                "the {} strategy requires an external mutator",
                settings.strategy
            )));
        }
        let monitor = LivenessMonitor::new(healthcheck, settings.miss_threshold);
        let recovery = TargetRecovery::from_config(resethandler, &config);
        let mutation = MutationEngine::from_config(&config);
        let recorder = CrashRecorder::init(config.crash_dir())?;
        Ok(Self {
            monitor,
            recovery,
            mutation,
            adapter,
            external,
            recorder,
            config,
            state: CampaignState::default(),
            stats: Arc::default(),
            cancel: CancellationToken::new(),
        })
    }

    /// Uses the given token to stop the campaign
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The token that stops the campaign at the next iteration boundary
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Current state of the campaign
    pub fn state(&self) -> &CampaignState {
        &self.state
    }

    /// Shared statistics of the campaign
    pub fn stats(&self) -> StatsType {
        self.stats.clone()
    }

    fn update_stats(&self, update: impl FnOnce(&mut Stats)) {
        if let Ok(mut stats) = self.stats.write() {
            update(&mut stats);
        }
    }

    fn set_phase(&mut self, phase: CampaignPhase) {
        self.state.phase = phase;
        self.update_stats(|stats| stats.phase = phase);
    }

    /// Checks everything that has to work before the first request is sent
    async fn prepare(&mut self) -> UpnpFuzzResult<()> {
        if self.config.settings().strategy.uses_external_mutator() {
            match &mut self.external {
                Some(mutator) => {
                    tracing::info!("Probing the external mutator {}", mutator.title());
                    self.mutation.probe(mutator).await?;
                }
                None => return Err(UpnpFuzzError::config("no external mutator configured")),
            }
        }
        if self.monitor.has_healthcheck() {
            tracing::info!("Performing health check before starting.");
        }
        if let Some(verdict) = self.monitor.probe().await
            && !verdict.is_alive()
        {
            return Err(UpnpFuzzError::ConnectionFailed {
                err_msg: format!("{}, initial health check was {verdict}", self.adapter.title()),
            });
        }
        Ok(())
    }

    /// Runs the campaign without the TUI
    /// # Errors
    /// Returns the configuration error that prevented the start or
    /// `UpnpFuzzError::Fatal` containing the last completed iteration.
    pub async fn run(&mut self) -> UpnpFuzzResult<CampaignSummary> {
        self.prepare().await?;

        let settings = self.config.settings();
        let (strategy, limit) = (settings.strategy, settings.iterations);
        let title = self.adapter.title();
        self.update_stats(|stats| {
            stats.running = true;
            stats.title = title;
            stats.strategy = strategy.to_string();
            stats.limit = limit;
            stats.started = Some(Instant::now());
        });
        ExecsPerSecond::start(self.stats.clone());

        tracing::info!(
            "Starting {strategy} campaign against {}, crashes are stored in {}",
            self.adapter.title(),
            self.recorder.path().display()
        );
        let result = self.campaign_loop(limit).await;

        self.update_stats(|stats| stats.running = false);
        match &result {
            Ok(summary) => tracing::info!(
                "Campaign finished after {} iterations with {} crashes{}",
                summary.iterations,
                summary.crashes,
                if summary.stopped { " (stopped)" } else { "" }
            ),
            Err(err) => tracing::error!("{err}"),
        }
        result
    }

    /// Runs the campaign, and if enabled the TUI.
    /// # Errors
    /// See `run`
    pub async fn fuzz(
        &mut self,
        enable_ui: bool,
        logger: Option<Logger>,
    ) -> UpnpFuzzResult<CampaignSummary> {
        let mut ui_handler = None;

        if enable_ui {
            // the UI thread exits as soon as `running` is false
            self.update_stats(|stats| stats.running = true);
            let stats = self.stats.clone();
            let cancel = self.cancel.clone();
            ui_handler = Some(std::thread::spawn(move || {
                if let Some(logger) = &logger {
                    logger.enable_tui();
                }
                show_ui(&stats, &cancel);
                if let Some(logger) = &logger {
                    logger.disable_tui();
                }
            }));
        }

        let result = self.run().await;

        self.update_stats(|stats| stats.running = false);
        if let Some(ui_handler) = ui_handler {
            let _ = ui_handler.join();
        }
        result
    }

    async fn campaign_loop(&mut self, limit: Option<u64>) -> UpnpFuzzResult<CampaignSummary> {
        let mut stopped = false;
        loop {
            if self.cancel.is_cancelled() {
                stopped = true;
                break;
            }
            if limit.is_some_and(|limit| self.state.last_completed >= limit) {
                break;
            }

            let iteration = self.state.last_completed + 1;
            self.state.iteration = iteration;
            if let Err(err) = self.iterate(iteration).await {
                self.set_phase(CampaignPhase::Fatal);
                return Err(UpnpFuzzError::fatal(self.state.last_completed, err));
            }
            self.state.last_completed = iteration;
            self.update_stats(|stats| stats.iterations = iteration);
        }
        self.set_phase(CampaignPhase::Completed);
        Ok(CampaignSummary {
            iterations: self.state.last_completed,
            crashes: self.state.crashes,
            stopped,
        })
    }

    /// A single generate, send, check cycle. Errors returned from here stop the campaign.
    async fn iterate(&mut self, iteration: u64) -> UpnpFuzzResult<()> {
        let settings = self.config.settings();
        let (selected, delay, max_mutator_errors, miss_threshold) = (
            settings.strategy,
            settings.delay,
            settings.max_mutator_errors,
            settings.miss_threshold,
        );

        self.set_phase(CampaignPhase::Generating);
        let strategy = self.mutation.select_strategy(selected);
        let baseline = self.adapter.build_baseline(iteration);
        let expects_response = baseline.expects_response();
        let request = match self
            .mutation
            .mutate(baseline, iteration, strategy, self.external.as_mut())
            .await
        {
            Ok(request) => {
                self.state.consecutive_mutator_errors = 0;
                request
            }
            Err(err) => {
                self.state.consecutive_mutator_errors += 1;
                self.update_stats(|stats| stats.total_mutator_errors += 1);
                tracing::warn!(
                    "Skipping iteration {iteration} ({}/{max_mutator_errors}): {err}",
                    self.state.consecutive_mutator_errors
                );
                if self.state.consecutive_mutator_errors >= max_mutator_errors {
                    return Err(err);
                }
                return Ok(());
            }
        };

        self.set_phase(CampaignPhase::Sending);
        tracing::debug!(
            "[{iteration}] {} {} {:?}: {} bytes",
            request.baseline.name(),
            request.strategy,
            request.mutated_fields(),
            request.bytes.len()
        );
        let outcome = self.adapter.send(&request.bytes).await;
        match &outcome {
            Ok(response) => self.adapter.observe_response(response),
            Err(UpnpFuzzError::Timeout { .. }) => {
                self.update_stats(|stats| stats.total_timeouts += 1);
            }
            Err(err) => {
                tracing::debug!("[{iteration}] {err}");
                self.update_stats(|stats| stats.total_transport_errors += 1);
            }
        }
        self.update_stats(|stats| stats.executions_per_second.add());

        if !delay.is_zero() {
            self.set_phase(CampaignPhase::Delay);
            // a cancelled delay still runs the liveness check of this iteration
            tokio::select! {
                () = self.cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.set_phase(CampaignPhase::CheckingLiveness);
        let verdict = self.monitor.check(expects_response, outcome.as_ref()).await;
        let verdict_text = verdict.to_string();
        self.update_stats(|stats| stats.verdict = verdict_text);
        self.state.verdict = Some(verdict.clone());

        // an inferred death blames every request since the last answer
        let answered = matches!(&outcome, Ok(response) if !response.bytes.is_empty());
        let request = if answered {
            self.state.unanswered.clear();
            Some(request)
        } else if expects_response && !self.monitor.has_healthcheck() {
            if self.state.unanswered.len() >= usize::try_from(miss_threshold).unwrap_or(usize::MAX) {
                self.state.unanswered.remove(0);
            }
            self.state.unanswered.push(request);
            None
        } else {
            Some(request)
        };

        match &verdict {
            LivenessVerdict::Alive => {}
            LivenessVerdict::Unknown(reason) => tracing::debug!("[{iteration}] liveness unknown: {reason}"),
            LivenessVerdict::Dead(evidence) => {
                tracing::warn!("Target did not survive iteration {iteration}: {evidence}");
                self.set_phase(CampaignPhase::Recording);
                let candidates = match request {
                    Some(request) => vec![request],
                    None => std::mem::take(&mut self.state.unanswered),
                };
                for request in candidates {
                    let record = CrashRecord::new(self.adapter.target().clone(), selected, request, &verdict);
                    self.recorder.record(&record)?;
                }
                self.state.crashes += 1;
                self.update_stats(|stats| {
                    stats.total_crashes += 1;
                    stats.last_crash = Some(Instant::now());
                    stats.executions_per_second.clear();
                });

                self.set_phase(CampaignPhase::Restarting);
                self.recover().await?;
            }
        }
        Ok(())
    }

    async fn recover(&mut self) -> UpnpFuzzResult<()> {
        tracing::info!("Resethandler triggered");
        self.state.unanswered.clear();
        match self.restart().await {
            Ok(()) => {
                self.state.consecutive_restart_failures = 0;
                self.monitor.reset();
                self.update_stats(|stats| stats.total_restarts += 1);
                tracing::info!("Target is alive again");
                Ok(())
            }
            Err(err) => {
                self.state.consecutive_restart_failures += 1;
                self.monitor.reset();
                self.update_stats(|stats| stats.total_restart_failures += 1);
                let failures = self.state.consecutive_restart_failures;
                tracing::error!(
                    "Restart failed ({failures}/{}): {err}",
                    self.config.settings().max_restart_failures
                );
                if self.recovery.exhausted(failures) {
                    return Err(err);
                }
                Ok(())
            }
        }
    }

    async fn restart(&mut self) -> UpnpFuzzResult<()> {
        self.recovery.run_handler().await?;

        let grace = self.recovery.grace_period();
        let deadline = Instant::now() + grace;
        loop {
            let verdict = self.verify_alive().await;
            if verdict.is_alive() {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(UpnpFuzzError::Recovery {
                    err_msg: format!("target did not come back within {grace:?}, last check was {verdict}"),
                });
            }
            tokio::time::sleep(self.recovery.poll_interval().min(deadline - now)).await;
        }
    }

    /// Without a health check the target is alive again if it answers the unmutated probe
    async fn verify_alive(&mut self) -> LivenessVerdict {
        if let Some(verdict) = self.monitor.probe().await {
            return verdict;
        }
        let probe = self.adapter.probe_baseline();
        match self.adapter.send(&probe.render()).await {
            Ok(response) if !response.bytes.is_empty() => {
                self.adapter.observe_response(&response);
                LivenessVerdict::Alive
            }
            Ok(_) => LivenessVerdict::Unknown("empty response to the probe".to_owned()),
            Err(err) => LivenessVerdict::Unknown(err.to_string()),
        }
    }
}
