use crate::config::{CampaignConfig, FieldMode, InjectionOrder};
use crate::error::{UpnpFuzzError, UpnpFuzzResult};
use crate::payloads::{InjectionCatalog, overflow_lengths};
use crate::request::{BaselineRequest, FieldMutation, MutatedRequest};
use crate::traits::ExternalMutator;
use rand::distr::StandardUniform;
use rand::prelude::Distribution;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaChaRng;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::time::Duration;
use tokio::time::timeout;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// The mutation policy selected for a campaign
pub enum Strategy {
    /// Sends the baseline requests without mutation
    #[default]
    Raw,
    /// Replaces fields with command injection, path traversal and format string payloads
    Injection,
    /// Replaces fields with boundary length values
    Overflow,
    /// Lets an external tool mutate the whole request
    External,
    /// Picks injection, overflow or external for every iteration
    Randomized,
}

impl Strategy {
    /// Returns true if the strategy can delegate to the external mutator
    #[must_use]
    pub fn uses_external_mutator(self) -> bool {
        matches!(self, Strategy::External | Strategy::Randomized)
    }
}

impl Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Strategy::Raw => "raw",
            Strategy::Injection => "injection",
            Strategy::Overflow => "overflow",
            Strategy::External => "external",
            Strategy::Randomized => "randomized",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// The strategy that was actually used for one iteration
pub enum AppliedStrategy {
    /// no mutation
    Raw,
    /// injection payload
    Injection,
    /// boundary length value
    Overflow,
    /// external mutation
    External,
}

impl Display for AppliedStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Strategy::from(*self).fmt(f)
    }
}

impl From<AppliedStrategy> for Strategy {
    fn from(applied: AppliedStrategy) -> Self {
        match applied {
            AppliedStrategy::Raw => Strategy::Raw,
            AppliedStrategy::Injection => Strategy::Injection,
            AppliedStrategy::Overflow => Strategy::Overflow,
            AppliedStrategy::External => Strategy::External,
        }
    }
}

// Only the mutating strategies are sampled, so randomized campaigns never send raw requests
impl Distribution<AppliedStrategy> for StandardUniform {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> AppliedStrategy {
        match rng.random_range(0..3) {
            0 => AppliedStrategy::Injection,
            1 => AppliedStrategy::Overflow,
            _ => AppliedStrategy::External,
        }
    }
}

#[derive(Debug)]
/// The mutation engine is initialized by the campaign with deterministic RNGs. One RNG is used
/// for the payload choices and an independent one for the strategy choices, so the sequence of
/// strategies of a randomized campaign only depends on the seed.
pub struct MutationEngine {
    payload_rng: ChaChaRng,
    strategy_rng: ChaChaRng,
    catalog: InjectionCatalog,
    overflow_lengths: Vec<usize>,
    marker: u8,
    field_mode: FieldMode,
    order: InjectionOrder,
    cursor: usize,
    mutator_timeout: Duration,
}

impl MutationEngine {
    /// creates a new mutation engine
    #[must_use]
    pub fn new(seed: u64, catalog: InjectionCatalog, overflow_max: usize, marker: u8) -> Self {
        let payload_rng = ChaChaRng::seed_from_u64(seed);
        let mut strategy_rng = ChaChaRng::seed_from_u64(seed);
        strategy_rng.set_stream(1);
        Self {
            payload_rng,
            strategy_rng,
            catalog,
            overflow_lengths: overflow_lengths(overflow_max),
            marker,
            field_mode: FieldMode::default(),
            order: InjectionOrder::default(),
            cursor: 0,
            mutator_timeout: Duration::from_secs(5),
        }
    }

    /// creates the mutation engine as configured for a campaign
    #[must_use]
    pub fn from_config(config: &CampaignConfig) -> Self {
        let settings = config.settings();
        Self::new(
            settings.seed,
            InjectionCatalog::for_command(settings.injection_cmd.as_bytes()),
            settings.overflow_max,
            settings.overflow_marker,
        )
        .with_field_mode(settings.field_mode)
        .with_order(settings.injection_order)
        .with_mutator_timeout(settings.mutator_timeout)
    }

    /// Mutate a single field per request or all of them
    #[must_use]
    pub fn with_field_mode(mut self, field_mode: FieldMode) -> Self {
        self.field_mode = field_mode;
        self
    }

    /// Pick fields and values at random or walk through them in order
    #[must_use]
    pub fn with_order(mut self, order: InjectionOrder) -> Self {
        self.order = order;
        self
    }

    /// Time the external mutator may take for a single request
    #[must_use]
    pub fn with_mutator_timeout(mut self, mutator_timeout: Duration) -> Self {
        self.mutator_timeout = mutator_timeout;
        self
    }

    /// The payloads used by the injection strategy
    #[must_use]
    pub fn catalog(&self) -> &InjectionCatalog {
        &self.catalog
    }

    /// The boundary lengths used by the overflow strategy
    #[must_use]
    pub fn boundary_lengths(&self) -> &[usize] {
        &self.overflow_lengths
    }

    /// Resolves the configured strategy to the one used in the current iteration
    pub fn select_strategy(&mut self, strategy: Strategy) -> AppliedStrategy {
        match strategy {
            Strategy::Raw => AppliedStrategy::Raw,
            Strategy::Injection => AppliedStrategy::Injection,
            Strategy::Overflow => AppliedStrategy::Overflow,
            Strategy::External => AppliedStrategy::External,
            Strategy::Randomized => self.strategy_rng.random(),
        }
    }

    /// Returns `(field index, value index)` pairs for the next mutation
    fn pick(&mut self, fields: usize, values: usize) -> Vec<(usize, usize)> {
        match (self.field_mode, self.order) {
            (FieldMode::PerField, InjectionOrder::Sequential) => {
                let pick = (self.cursor % fields, (self.cursor / fields) % values);
                self.cursor = self.cursor.wrapping_add(1);
                vec![pick]
            }
            (FieldMode::PerField, InjectionOrder::Random) => vec![(
                self.payload_rng.random_range(0..fields),
                self.payload_rng.random_range(0..values),
            )],
            (FieldMode::AllFields, InjectionOrder::Sequential) => {
                let value = self.cursor % values;
                self.cursor = self.cursor.wrapping_add(1);
                (0..fields).map(|field| (field, value)).collect()
            }
            (FieldMode::AllFields, InjectionOrder::Random) => (0..fields)
                .map(|field| (field, self.payload_rng.random_range(0..values)))
                .collect(),
        }
    }

    fn replace_fields<F>(
        &mut self,
        baseline: BaselineRequest,
        iteration: u64,
        strategy: AppliedStrategy,
        values: usize,
        value_of: F,
    ) -> MutatedRequest
    where
        F: Fn(&Self, usize) -> Vec<u8>,
    {
        if baseline.fields().is_empty() || values == 0 {
            tracing::debug!("{} has no mutable fields, sending it raw", baseline.name());
            return Self::raw(baseline, iteration);
        }
        let picks = self.pick(baseline.fields().len(), values);
        let engine: &Self = self;
        let overrides: Vec<(usize, Vec<u8>)> = picks
            .into_iter()
            .map(|(field, value)| (field, value_of(engine, value)))
            .collect();
        let mutations = overrides
            .iter()
            .map(|(index, value)| {
                let field = &baseline.fields()[*index];
                FieldMutation {
                    field: field.name.clone(),
                    role: field.role,
                    value: value.clone(),
                }
            })
            .collect();
        let bytes = baseline.render_with(&overrides);
        MutatedRequest {
            iteration,
            baseline,
            strategy,
            mutations,
            bytes,
        }
    }

    /// Sends the baseline as it is
    #[must_use]
    pub fn raw(baseline: BaselineRequest, iteration: u64) -> MutatedRequest {
        let bytes = baseline.render();
        MutatedRequest {
            iteration,
            baseline,
            strategy: AppliedStrategy::Raw,
            mutations: vec![],
            bytes,
        }
    }

    /// Replaces the selected fields with values from the injection catalog
    pub fn inject(&mut self, baseline: BaselineRequest, iteration: u64) -> MutatedRequest {
        let values = self.catalog.len();
        self.replace_fields(baseline, iteration, AppliedStrategy::Injection, values, |engine, index| {
            engine.catalog.get(index).to_vec()
        })
    }

    /// Replaces the selected fields with a run of marker bytes of a boundary length
    pub fn overflow(&mut self, baseline: BaselineRequest, iteration: u64) -> MutatedRequest {
        let values = self.overflow_lengths.len();
        self.replace_fields(baseline, iteration, AppliedStrategy::Overflow, values, |engine, index| {
            vec![engine.marker; engine.overflow_lengths[index]]
        })
    }

    /// Passes the rendered baseline to the external mutator and sends its output
    /// # Errors
    /// Returns `UpnpFuzzError::Mutator` if the mutator failed or exceeded its timeout.
    pub async fn external<E: ExternalMutator>(
        &mut self,
        baseline: BaselineRequest,
        iteration: u64,
        mutator: &mut E,
    ) -> UpnpFuzzResult<MutatedRequest> {
        let input = baseline.render();
        let bytes = match timeout(self.mutator_timeout, mutator.mutate(&input)).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(UpnpFuzzError::Mutator { err_msg })) => {
                return Err(UpnpFuzzError::Mutator { err_msg });
            }
            Ok(Err(err)) => {
                return Err(UpnpFuzzError::Mutator {
                    err_msg: err.to_string(),
                });
            }
            Err(elapsed) => {
                return Err(UpnpFuzzError::Mutator {
                    err_msg: format!("{} did not finish in time ({elapsed})", mutator.title()),
                });
            }
        };
        Ok(MutatedRequest {
            iteration,
            baseline,
            strategy: AppliedStrategy::External,
            mutations: vec![],
            bytes,
        })
    }

    /// Runs the dry run of the external mutator bounded by the mutator timeout
    /// # Errors
    /// Returns a configuration error if the mutator is not usable.
    pub async fn probe<E: ExternalMutator>(&self, mutator: &mut E) -> UpnpFuzzResult<()> {
        match timeout(self.mutator_timeout, mutator.probe()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(UpnpFuzzError::config(format!(
                "dry run of the external mutator {} failed: {err}",
                mutator.title()
            ))),
            Err(elapsed) => Err(UpnpFuzzError::config(format!(
                "dry run of the external mutator {} did not finish in time ({elapsed})",
                mutator.title()
            ))),
        }
    }

    /// Applies `strategy` to the baseline
    /// # Errors
    /// Fails if the external mutator is needed but missing or failed.
    pub async fn mutate<E: ExternalMutator>(
        &mut self,
        baseline: BaselineRequest,
        iteration: u64,
        strategy: AppliedStrategy,
        external: Option<&mut E>,
    ) -> UpnpFuzzResult<MutatedRequest> {
        match strategy {
            AppliedStrategy::Raw => Ok(Self::raw(baseline, iteration)),
            AppliedStrategy::Injection => Ok(self.inject(baseline, iteration)),
            AppliedStrategy::Overflow => Ok(self.overflow(baseline, iteration)),
            AppliedStrategy::External => match external {
                Some(mutator) => self.external(baseline, iteration, mutator).await,
                None => Err(UpnpFuzzError::Mutator {
                    err_msg: "no external mutator configured".to_owned(),
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{FieldRole, ProtocolKind};

    fn search() -> BaselineRequest {
        BaselineRequest::builder(ProtocolKind::Ssdp, "m-search")
            .literal("M-SEARCH * HTTP/1.1\r\nHOST: ")
            .field("HOST", FieldRole::Host, "10.0.0.1")
            .literal(":")
            .field("PORT", FieldRole::Port, "1900")
            .literal("\r\nST: ")
            .field("ST", FieldRole::Header, "ssdp:all")
            .literal("\r\n\r\n")
            .build()
    }

    struct Reverse;

    impl ExternalMutator for Reverse {
        fn title(&self) -> String {
            "reverse".into()
        }
        async fn mutate(&mut self, input: &[u8]) -> Result<Vec<u8>, UpnpFuzzError> {
            Ok(input.iter().rev().copied().collect())
        }
    }

    struct Broken;

    impl ExternalMutator for Broken {
        fn title(&self) -> String {
            "broken".into()
        }
        async fn mutate(&mut self, _input: &[u8]) -> Result<Vec<u8>, UpnpFuzzError> {
            Err(UpnpFuzzError::Custom {
                err_msg: "exit status 1".into(),
            })
        }
    }

    struct Hanging;

    impl ExternalMutator for Hanging {
        fn title(&self) -> String {
            "hanging".into()
        }
        async fn mutate(&mut self, _input: &[u8]) -> Result<Vec<u8>, UpnpFuzzError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![])
        }
    }

    #[test]
    fn test_overflow_length_is_exact() {
        let mut engine = MutationEngine::new(7, InjectionCatalog::default(), 4096, b'A')
            .with_order(InjectionOrder::Sequential);
        let fields = search().fields().len();
        let total = fields * engine.boundary_lengths().len();
        for i in 0..total {
            let expected_len = engine.boundary_lengths()[i / fields];
            let mutated = engine.overflow(search(), 1);
            assert_eq!(mutated.mutations.len(), 1);
            let mutation = &mutated.mutations[0];
            assert_eq!(mutation.value.len(), expected_len);
            assert!(mutation.value.iter().all(|b| *b == b'A'));
            // the rendered request grows by exactly the difference to the original value
            let original = search()
                .fields()
                .iter()
                .find(|f| f.name == mutation.field)
                .map(|f| f.value.len())
                .unwrap();
            assert_eq!(
                mutated.bytes.len(),
                search().render().len() - original + expected_len
            );
        }
    }

    #[test]
    fn test_injection_values_come_from_catalog() {
        let mut engine = MutationEngine::new(1, InjectionCatalog::for_command(b"id"), 64, b'A');
        for iteration in 1..500 {
            let mutated = engine.inject(search(), iteration);
            assert_eq!(mutated.strategy, AppliedStrategy::Injection);
            for mutation in &mutated.mutations {
                assert!(engine.catalog().contains(&mutation.value));
            }
        }
    }

    #[test]
    fn test_sequential_injection_walks_every_pair() {
        let catalog = InjectionCatalog::new(vec![b"x".to_vec(), b"y".to_vec()]).unwrap();
        let mut engine = MutationEngine::new(1, catalog, 64, b'A').with_order(InjectionOrder::Sequential);
        let seen: Vec<(String, Vec<u8>)> = (0..6)
            .map(|i| {
                let m = engine.inject(search(), i).mutations.remove(0);
                (m.field, m.value)
            })
            .collect();
        assert_eq!(seen[0], ("HOST".to_owned(), b"x".to_vec()));
        assert_eq!(seen[1], ("PORT".to_owned(), b"x".to_vec()));
        assert_eq!(seen[2], ("ST".to_owned(), b"x".to_vec()));
        assert_eq!(seen[3], ("HOST".to_owned(), b"y".to_vec()));
        assert_eq!(seen[5], ("ST".to_owned(), b"y".to_vec()));
    }

    #[test]
    fn test_all_fields_mode_mutates_every_field() {
        let mut engine =
            MutationEngine::new(3, InjectionCatalog::default(), 64, b'A').with_field_mode(FieldMode::AllFields);
        let mutated = engine.overflow(search(), 1);
        assert_eq!(mutated.mutated_fields(), vec!["HOST", "PORT", "ST"]);
    }

    #[test]
    fn test_injection_is_reproducible_with_seed() {
        let run = |seed| {
            let mut engine = MutationEngine::new(seed, InjectionCatalog::default(), 64, b'A');
            (0..50).map(|i| engine.inject(search(), i).bytes).collect::<Vec<_>>()
        };
        assert_eq!(run(42), run(42));
        assert_ne!(run(42), run(43));
    }

    #[test]
    fn test_randomized_strategy_sequence_is_deterministic() {
        let run = |seed| {
            let mut engine = MutationEngine::new(seed, InjectionCatalog::default(), 64, b'A');
            (0..100)
                .map(|_| engine.select_strategy(Strategy::Randomized))
                .collect::<Vec<_>>()
        };
        let first = run(1337);
        assert_eq!(first, run(1337));
        assert!(first.contains(&AppliedStrategy::Injection));
        assert!(first.contains(&AppliedStrategy::Overflow));
        assert!(first.contains(&AppliedStrategy::External));
        assert!(!first.contains(&AppliedStrategy::Raw));
    }

    #[test]
    fn test_strategy_choice_does_not_depend_on_payloads() {
        let mut quiet = MutationEngine::new(5, InjectionCatalog::default(), 64, b'A');
        let mut busy = MutationEngine::new(5, InjectionCatalog::default(), 64, b'A');
        for i in 0..30 {
            let _ = busy.inject(search(), i);
            let _ = busy.overflow(search(), i);
            assert_eq!(
                quiet.select_strategy(Strategy::Randomized),
                busy.select_strategy(Strategy::Randomized)
            );
        }
    }

    #[test]
    fn test_raw_renders_baseline() {
        let mutated = MutationEngine::raw(search(), 9);
        assert_eq!(mutated.iteration, 9);
        assert!(mutated.mutations.is_empty());
        assert_eq!(
            mutated.bytes,
            b"M-SEARCH * HTTP/1.1\r\nHOST: 10.0.0.1:1900\r\nST: ssdp:all\r\n\r\n".to_vec()
        );
    }

    #[tokio::test]
    async fn test_external_mutator_output_is_used() {
        let mut engine = MutationEngine::new(0, InjectionCatalog::default(), 64, b'A');
        let mutated = engine.external(search(), 2, &mut Reverse).await.unwrap();
        let mut expected = search().render();
        expected.reverse();
        assert_eq!(mutated.bytes, expected);
        assert_eq!(mutated.strategy, AppliedStrategy::External);
    }

    #[tokio::test]
    async fn test_external_mutator_errors() {
        let mut engine = MutationEngine::new(0, InjectionCatalog::default(), 64, b'A')
            .with_mutator_timeout(Duration::from_millis(50));
        let err = engine.external(search(), 1, &mut Broken).await.unwrap_err();
        assert!(matches!(err, UpnpFuzzError::Mutator { .. }));
        let err = engine.external(search(), 1, &mut Hanging).await.unwrap_err();
        assert!(matches!(err, UpnpFuzzError::Mutator { .. }));
        let err = engine.probe(&mut Hanging).await.unwrap_err();
        assert!(matches!(err, UpnpFuzzError::Configuration { .. }));
        assert!(engine.probe(&mut Reverse).await.is_ok());
        let missing: Option<&mut Reverse> = None;
        let err = engine
            .mutate(search(), 1, AppliedStrategy::External, missing)
            .await
            .unwrap_err();
        assert!(matches!(err, UpnpFuzzError::Mutator { .. }));
    }
}
