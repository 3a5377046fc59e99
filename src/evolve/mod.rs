//! Evolutionary training for populations of networks.
//!
//! Elitist selection with random immigrants; no crossover. Each generation:
//! evaluate every network in parallel, rank by fitness (ties keep dispatch
//! order), keep the top `elite_count`, and rebuild the population from one
//! unmutated clone plus `offspring_per_elite` mutated clones of each elite,
//! followed by `random_immigrant_count` fresh networks.
//!
//! Evaluation is a barrier: a generation is ranked only when every unit
//! finished successfully. A failing or panicking evaluator aborts the step
//! and leaves the population untouched.

pub mod render;
pub mod tracker;

use std::ops::ControlFlow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::matrix::DotKernel;
use crate::network::{Network, NetworkError};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvolutionConfig {
    pub population_size: usize,
    pub elite_count: usize,
    pub offspring_per_elite: usize,
    pub random_immigrant_count: usize,
    /// Per-weight mutation probability.
    pub mutation_rate: f32,
    pub mutation_strength: f32,
    pub topology: Vec<usize>,
    pub learning_rate: f32,
    pub seed: u64,
    /// Worker threads for evaluation; 0 picks one per logical CPU.
    pub workers: usize,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self::balanced(10, 1000, 1000)
    }
}

impl EvolutionConfig {
    /// Reference parameters with `population_size` derived from the
    /// elite/offspring/immigrant counts.
    pub fn balanced(elite_count: usize, offspring_per_elite: usize, random_immigrant_count: usize) -> Self {
        Self {
            population_size: elite_count * (1 + offspring_per_elite) + random_immigrant_count,
            elite_count,
            offspring_per_elite,
            random_immigrant_count,
            mutation_rate: 1.0,
            mutation_strength: 2.0,
            topology: vec![24, 18, 18, 4],
            learning_rate: 0.1,
            seed: 42,
            workers: 0,
        }
    }

    /// Population size implied by the reproduction parameters.
    pub fn implied_population(&self) -> Option<usize> {
        self.offspring_per_elite
            .checked_add(1)
            .and_then(|per| per.checked_mul(self.elite_count))
            .and_then(|clones| clones.checked_add(self.random_immigrant_count))
    }

    /// Recompute `population_size` after changing the reproduction counts.
    pub fn rebalance(&mut self) {
        if let Some(size) = self.implied_population() {
            self.population_size = size;
        }
    }

    pub fn validate(&self) -> Result<(), EvolveError> {
        let invalid = |msg: String| Err(EvolveError::InvalidConfig(msg));
        if self.elite_count == 0 {
            return invalid("elite_count must be at least 1".into());
        }
        match self.implied_population() {
            Some(size) if size == self.population_size => {}
            Some(size) => {
                return invalid(format!(
                    "population_size {} != elite_count*(1+offspring_per_elite)+random_immigrant_count = {}",
                    self.population_size, size
                ))
            }
            None => return invalid("population size overflows".into()),
        }
        if !(0.0..=1.0).contains(&self.mutation_rate) {
            return invalid(format!("mutation_rate {} outside [0, 1]", self.mutation_rate));
        }
        if !self.mutation_strength.is_finite() || self.mutation_strength < 0.0 {
            return invalid(format!(
                "mutation_strength {} must be finite and non-negative",
                self.mutation_strength
            ));
        }
        crate::network::validate_topology(&self.topology)
            .map_err(|e| EvolveError::InvalidConfig(e.to_string()))?;
        if !self.learning_rate.is_finite() {
            return invalid(format!("learning_rate {} must be finite", self.learning_rate));
        }
        Ok(())
    }
}

/// A generation's networks, in dispatch order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Population {
    networks: Vec<Network>,
}

impl Population {
    pub fn from_networks(networks: Vec<Network>) -> Self {
        Self { networks }
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    pub fn networks(&self) -> &[Network] {
        &self.networks
    }

    pub fn get(&self, index: usize) -> Option<&Network> {
        self.networks.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Network> {
        self.networks.iter()
    }

    pub fn into_networks(self) -> Vec<Network> {
        self.networks
    }
}

/// What an evaluator reports for one network.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Evaluation {
    pub score: f64,
    /// Displayable frames, produced only when the context asks for them.
    pub trace: Option<Vec<String>>,
}

impl Evaluation {
    pub fn score(score: f64) -> Self {
        Self { score, trace: None }
    }

    pub fn with_trace(mut self, frames: Vec<String>) -> Self {
        self.trace = Some(frames);
        self
    }
}

/// A network paired with its fitness.
#[derive(Clone, Debug, PartialEq)]
pub struct FitnessRecord {
    /// Position of the network in the evaluated population.
    pub index: usize,
    pub network: Network,
    pub score: f64,
    pub trace: Option<Vec<String>>,
}

impl FitnessRecord {
    fn new(index: usize, network: Network, eval: Evaluation) -> Self {
        Self {
            index,
            network,
            score: eval.score,
            trace: eval.trace,
        }
    }
}

pub struct EvalContext<'a> {
    pub kernel: &'a dyn DotKernel,
    pub generation: u64,
    pub index: usize,
    pub record_trace: bool,
}

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error("{0}")]
    Failed(String),
}

/// Fitness function. Called concurrently from worker threads with shared
/// references only; implementations must not rely on call order.
pub trait Evaluator: Sync {
    fn evaluate(&self, network: &Network, ctx: &EvalContext<'_>) -> Result<Evaluation, EvaluationError>;
}

/// Adapter turning a closure into an [`Evaluator`].
pub struct FnEvaluator<F>(F);

pub fn evaluator_fn<F>(f: F) -> FnEvaluator<F>
where
    F: Fn(&Network, &EvalContext<'_>) -> Result<Evaluation, EvaluationError> + Sync,
{
    FnEvaluator(f)
}

impl<F> Evaluator for FnEvaluator<F>
where
    F: Fn(&Network, &EvalContext<'_>) -> Result<Evaluation, EvaluationError> + Sync,
{
    fn evaluate(&self, network: &Network, ctx: &EvalContext<'_>) -> Result<Evaluation, EvaluationError> {
        (self.0)(network, ctx)
    }
}

#[derive(Debug, Error)]
pub enum EvolveError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("evaluation of network #{index} failed: {source}")]
    Evaluation {
        index: usize,
        #[source]
        source: EvaluationError,
    },
    #[error("evaluation of network #{index} panicked: {message}")]
    Panicked { index: usize, message: String },
    #[error("network #{index} scored NaN")]
    NanScore { index: usize },
    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// Cooperative stop signal, checked between generations.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of one generation.
#[derive(Clone, Debug)]
pub struct GenerationReport {
    pub generation: u64,
    pub best: FitnessRecord,
    pub mean_score: f64,
    pub worst_score: f64,
    /// Best score seen in any generation so far, this one included.
    pub best_ever: f64,
    pub population_size: usize,
    pub elapsed: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    Callback,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RunSummary {
    pub generations: u64,
    pub best_ever: Option<f64>,
    pub stop: StopReason,
}

/// Sort descending by score; equal scores keep dispatch order.
pub fn rank(mut records: Vec<FitnessRecord>) -> Vec<FitnessRecord> {
    records.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.index.cmp(&b.index)));
    records
}

enum Offspring<'a> {
    Clone(&'a Network),
    Mutant(&'a Network, u64),
    Immigrant(u64),
}

pub struct EvolutionController<E: Evaluator> {
    config: EvolutionConfig,
    evaluator: E,
    kernel: Arc<dyn DotKernel>,
    pool: rayon::ThreadPool,
    rng: ChaCha8Rng,
    population: Population,
    generation: u64,
    best_ever: Option<f64>,
    record_traces: bool,
}

impl<E: Evaluator> EvolutionController<E> {
    /// Validate the configuration, start the worker pool and build the
    /// initial random population from `config.seed`.
    pub fn new(config: EvolutionConfig, evaluator: E, kernel: Arc<dyn DotKernel>) -> Result<Self, EvolveError> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("neuroevo-eval-{i}"))
            .build()?;
        let mut controller = Self {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            config,
            evaluator,
            kernel,
            pool,
            population: Population::default(),
            generation: 0,
            best_ever: None,
            record_traces: false,
        };
        let initial: Vec<Offspring<'_>> = (0..controller.config.population_size)
            .map(|_| Offspring::Immigrant(controller.rng.random()))
            .collect();
        controller.population = controller.breed(initial)?;
        info!(
            population = controller.population.len(),
            topology = ?controller.config.topology,
            kernel = controller.kernel.name(),
            "initial population ready"
        );
        Ok(controller)
    }

    /// Ask the evaluator for traces on every unit. Off by default.
    pub fn with_trace_recording(mut self, on: bool) -> Self {
        self.record_traces = on;
        self
    }

    pub fn config(&self) -> &EvolutionConfig {
        &self.config
    }

    pub fn population(&self) -> &Population {
        &self.population
    }

    /// Index of the next generation to be evaluated.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn best_ever(&self) -> Option<f64> {
        self.best_ever
    }

    pub fn kernel(&self) -> &Arc<dyn DotKernel> {
        &self.kernel
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    /// Evaluate the current population concurrently. Returns records in
    /// dispatch order, or the failure with the lowest dispatch index.
    ///
    /// Each record carries a copy of its network; [`step`](Self::step) moves
    /// the population into its records instead.
    pub fn evaluate(&self) -> Result<Vec<FitnessRecord>, EvolveError> {
        let evaluations = self.score_all(self.population.networks())?;
        Ok(self
            .population
            .iter()
            .cloned()
            .zip(evaluations)
            .enumerate()
            .map(|(index, (network, eval))| FitnessRecord::new(index, network, eval))
            .collect())
    }

    /// Evaluate the current population and move its networks into the
    /// records. On failure the population is put back unchanged.
    fn evaluate_owned(&mut self) -> Result<Vec<FitnessRecord>, EvolveError> {
        let population = std::mem::take(&mut self.population);
        match self.score_all(population.networks()) {
            Ok(evaluations) => Ok(population
                .into_networks()
                .into_iter()
                .zip(evaluations)
                .enumerate()
                .map(|(index, (network, eval))| FitnessRecord::new(index, network, eval))
                .collect()),
            Err(err) => {
                self.population = population;
                Err(err)
            }
        }
    }

    fn score_all(&self, networks: &[Network]) -> Result<Vec<Evaluation>, EvolveError> {
        let kernel: &dyn DotKernel = self.kernel.as_ref();
        let evaluator = &self.evaluator;
        let generation = self.generation;
        let record_trace = self.record_traces;

        let outcomes: Vec<Result<Evaluation, EvolveError>> = self.pool.install(|| {
            networks
                .par_iter()
                .enumerate()
                .map(|(index, network)| {
                    let ctx = EvalContext {
                        kernel,
                        generation,
                        index,
                        record_trace,
                    };
                    match panic::catch_unwind(AssertUnwindSafe(|| evaluator.evaluate(network, &ctx))) {
                        Ok(Ok(eval)) if eval.score.is_nan() => Err(EvolveError::NanScore { index }),
                        Ok(Ok(eval)) => Ok(eval),
                        Ok(Err(source)) => Err(EvolveError::Evaluation { index, source }),
                        Err(payload) => Err(EvolveError::Panicked {
                            index,
                            message: panic_message(payload.as_ref()),
                        }),
                    }
                })
                .collect()
        });
        // Outcomes are in dispatch order, so the first error has the lowest index.
        outcomes.into_iter().collect()
    }

    /// Build the next population from ranked elites.
    fn reproduce(&mut self, elites: &[FitnessRecord]) -> Result<Population, EvolveError> {
        let mut plan = Vec::with_capacity(self.config.population_size);
        for elite in elites {
            plan.push(Offspring::Clone(&elite.network));
            for _ in 0..self.config.offspring_per_elite {
                plan.push(Offspring::Mutant(&elite.network, self.rng.random()));
            }
        }
        for _ in 0..self.config.random_immigrant_count {
            plan.push(Offspring::Immigrant(self.rng.random()));
        }
        self.breed(plan)
    }

    /// Materialize a reproduction plan in parallel. Every mutant and immigrant
    /// draws from its own seeded stream, so the result does not depend on
    /// scheduling.
    fn breed(&self, plan: Vec<Offspring<'_>>) -> Result<Population, EvolveError> {
        let rate = self.config.mutation_rate;
        let strength = self.config.mutation_strength;
        let learning_rate = self.config.learning_rate;
        let topology = self.config.topology.as_slice();
        let networks: Result<Vec<Network>, NetworkError> = self.pool.install(|| {
            plan.into_par_iter()
                .map(|child| match child {
                    Offspring::Clone(parent) => Ok(parent.clone()),
                    Offspring::Mutant(parent, seed) => {
                        let mut network = parent.clone();
                        network.mutate(rate, strength, &mut ChaCha8Rng::seed_from_u64(seed));
                        Ok(network)
                    }
                    Offspring::Immigrant(seed) => {
                        Network::new(learning_rate, topology, &mut ChaCha8Rng::seed_from_u64(seed))
                    }
                })
                .collect()
        });
        Ok(Population::from_networks(networks?))
    }

    /// Run one generation: evaluate, rank, select elites, repopulate.
    pub fn step(&mut self) -> Result<GenerationReport, EvolveError> {
        let started = Instant::now();
        let generation = self.generation;
        debug!(generation, population = self.population.len(), "evaluating generation");

        let ranked = rank(self.evaluate_owned()?);
        let count = ranked.len().max(1) as f64;
        let mean_score = ranked.iter().map(|r| r.score).sum::<f64>() / count;
        let worst_score = ranked.last().map_or(f64::NEG_INFINITY, |r| r.score);

        let elite_count = self.config.elite_count.min(ranked.len());
        let next = match self.reproduce(&ranked[..elite_count]) {
            Ok(next) => next,
            Err(err) => {
                self.population = restore_dispatch_order(ranked);
                return Err(err);
            }
        };
        self.population = next;
        self.generation += 1;

        let best = ranked
            .into_iter()
            .next()
            .ok_or_else(|| EvolveError::InvalidConfig("empty population".into()))?;
        let best_ever = self.best_ever.map_or(best.score, |b| b.max(best.score));
        self.best_ever = Some(best_ever);

        let elapsed = started.elapsed();
        info!(
            generation,
            best = best.score,
            mean = mean_score,
            best_ever,
            elapsed_ms = elapsed.as_millis() as u64,
            "generation complete"
        );
        Ok(GenerationReport {
            generation,
            best,
            mean_score,
            worst_score,
            best_ever,
            population_size: self.population.len(),
            elapsed,
        })
    }

    /// Step until `cancel` fires or `on_generation` breaks. Cancellation is
    /// checked only between generations.
    pub fn run<F>(&mut self, cancel: &CancelToken, mut on_generation: F) -> Result<RunSummary, EvolveError>
    where
        F: FnMut(&GenerationReport) -> ControlFlow<()>,
    {
        let start = self.generation;
        let stop = loop {
            if cancel.is_cancelled() {
                info!(generation = self.generation, "evolution cancelled");
                break StopReason::Cancelled;
            }
            let report = self.step()?;
            if on_generation(&report).is_break() {
                break StopReason::Callback;
            }
        };
        Ok(RunSummary {
            generations: self.generation - start,
            best_ever: self.best_ever,
            stop,
        })
    }
}

fn restore_dispatch_order(mut records: Vec<FitnessRecord>) -> Population {
    records.sort_by_key(|r| r.index);
    Population::from_networks(records.into_iter().map(|r| r.network).collect())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
