use crate::fuzz::state::CampaignPhase;
use std::sync::{Arc, RwLock};
use std::thread::{sleep, spawn};
use std::time::{Duration, Instant};

#[derive(Default, Clone, Debug)]
/// Counters of a running campaign. The TUI renders a snapshot of them.
pub struct Stats {
    /// title of the adapter
    pub title: String,

    /// configured strategy
    pub strategy: String,

    /// iteration limit, `None` if the campaign runs until stopped
    pub limit: Option<u64>,

    /// The number of completed iterations
    pub iterations: u64,

    /// The timestamp when the campaign started.
    pub started: Option<Instant>,

    /// The number of requests sent per second.
    pub executions_per_second: ExecsPerSecond,

    /// current phase of the campaign loop
    pub phase: CampaignPhase,

    /// last liveness verdict
    pub verdict: String,

    /// A boolean indicating whether the campaign is currently running.
    pub running: bool,

    /// The timestamp of the last recorded crash.
    pub last_crash: Option<Instant>,

    /// The total number of recorded crashes.
    pub total_crashes: usize,

    /// requests that were not answered in time
    pub total_timeouts: usize,

    /// failed sends other than timeouts
    pub total_transport_errors: usize,

    /// skipped iterations because the external mutator failed
    pub total_mutator_errors: usize,

    /// successful restarts of the target
    pub total_restarts: usize,

    /// failed restarts of the target
    pub total_restart_failures: usize,
}

impl Stats {
    /// Progress of the campaign between 0 and 1, `None` without iteration limit
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn progress(&self) -> Option<f64> {
        match self.limit {
            Some(0) => Some(1.0),
            Some(limit) => Some((self.iterations as f64 / limit as f64).min(1.0)),
            None => None,
        }
    }
}

const BUCKET_SIZE: usize = 10;

#[derive(Clone, Debug)]
/// execs per second
pub struct ExecsPerSecond {
    time_started: Instant,
    counter: [usize; BUCKET_SIZE],
    last_bucket_id: usize,
}

impl Default for ExecsPerSecond {
    fn default() -> Self {
        Self {
            time_started: Instant::now(),
            counter: Default::default(),
            last_bucket_id: 0,
        }
    }
}

impl ExecsPerSecond {
    pub(crate) fn get(&self) -> usize {
        self.counter.iter().sum()
    }

    pub(crate) fn clear(&mut self) {
        self.counter = Default::default();
    }

    pub(crate) fn start(stats: StatsType) {
        spawn(move || {
            loop {
                if let Ok(mut stats) = stats.write() {
                    if !stats.running {
                        break;
                    }
                    stats.executions_per_second.rotate();
                }
                sleep(Duration::from_millis((1000 / BUCKET_SIZE / 2) as u64));
            }
        });
    }

    fn bucket_id(&self) -> usize {
        usize::try_from(self.time_started.elapsed().as_millis() % 1000).unwrap_or_default()
            / (1000 / BUCKET_SIZE)
    }

    fn rotate(&mut self) {
        let bucket_id = self.bucket_id();
        if self.last_bucket_id != bucket_id {
            self.counter[bucket_id] = 0;
            self.last_bucket_id = bucket_id;
        }
    }

    pub(crate) fn add(&mut self) {
        let bucket_id = self.bucket_id();
        self.counter[bucket_id] += 1;
    }
}

/// Shared stats type
pub type StatsType = Arc<RwLock<Stats>>;
