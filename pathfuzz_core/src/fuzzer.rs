use crate::artifact::RunArtifact;
use crate::corpus::Population;
use crate::coverage::{Coverage, Location, PathFrequency, PathId};
use crate::executor::{ExecutionStatus, Executor, Outcome};
use crate::feedback::{Feedback, FeedbackError, PathNoveltyFeedback};
use crate::mutator::{HavocMutator, Mutator};
use crate::observer::{CoverageObserver, Observer};
use crate::oracle::{CrashOracle, Oracle};
use crate::scheduler::{PowerSchedule, ScheduleError};
use crate::seed::Seed;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info};

const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum FuzzerError {
    /// There is no seed to start from.
    #[error("Population is empty, nothing to fuzz")]
    EmptyPopulation,
    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),
    #[error("Feedback error: {0}")]
    Feedback(#[from] FeedbackError),
    /// The schedule returned an index outside the population.
    #[error("Schedule chose seed {index} but the population holds {len}")]
    InvalidSeedIndex { index: usize, len: usize },
}

/// Where the fuzzer is within one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuzzerState {
    Idle,
    Scheduling,
    Mutating,
    Executing,
    Evaluating,
    Reporting,
    Stopped,
}

/// Crashing inputs and the result each one produced.
///
/// Keyed by input; two entries are the same crash when their results are equal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrashMap {
    entries: HashMap<Vec<u8>, ExecutionStatus>,
    /// How many entries hold each distinct result.
    result_counts: HashMap<ExecutionStatus, usize>,
}

impl CrashMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `input` as crashing with `result`, replacing any earlier result for
    /// the same input. Returns `true` when no other entry holds the same result.
    pub fn insert(&mut self, input: Vec<u8>, result: ExecutionStatus) -> bool {
        let is_new_result = !self.result_counts.contains_key(&result);
        *self.result_counts.entry(result.clone()).or_insert(0) += 1;
        if let Some(previous) = self.entries.insert(input, result) {
            self.release(&previous);
        }
        is_new_result
    }

    fn release(&mut self, result: &ExecutionStatus) {
        if let Some(count) = self.result_counts.get_mut(result) {
            *count -= 1;
            if *count == 0 {
                self.result_counts.remove(result);
            }
        }
    }

    pub fn get(&self, input: &[u8]) -> Option<&ExecutionStatus> {
        self.entries.get(input)
    }

    /// Number of crashing inputs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct crash results.
    pub fn unique_count(&self) -> usize {
        self.result_counts.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &ExecutionStatus)> {
        self.entries.iter()
    }

    pub fn results(&self) -> impl Iterator<Item = &ExecutionStatus> {
        self.result_counts.keys()
    }
}

/// Running counters. Timestamps are offsets from the start of the first run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FuzzerStats {
    pub total_execs: u64,
    /// Executions that ended in a timeout or a runner failure.
    pub unresolved_execs: u64,
    /// Distinct paths reached by resolved executions.
    pub distinct_paths: u64,
    pub last_new_path: Option<Duration>,
    pub last_unique_crash: Option<Duration>,
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct FuzzResult {
    pub covered: HashSet<Location>,
    pub crash_map: CrashMap,
    pub start_time: SystemTime,
    pub end_time: SystemTime,
    pub stats: FuzzerStats,
}

fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl FuzzResult {
    pub fn to_artifact(&self) -> RunArtifact {
        let mut crashes: Vec<String> = self
            .crash_map
            .results()
            .map(|result| match result {
                ExecutionStatus::Crash(description) => description.clone(),
                other => format!("{other:?}"),
            })
            .collect();
        crashes.sort();
        RunArtifact {
            covered_locations: self.covered.len() as u64,
            crashes,
            start_time_ms: unix_millis(self.start_time),
            end_time_ms: unix_millis(self.end_time),
        }
    }
}

/// Coverage-guided fuzzing loop over an append-only population.
///
/// Each iteration asks the power schedule for a seed, mutates it once, runs the
/// mutant and keeps it when the feedback finds it novel. Crashes go to the crash
/// map. The fuzzer owns all of its state; nothing is shared across instances.
pub struct Fuzzer {
    population: Population,
    schedule: Box<dyn PowerSchedule>,
    mutator: Box<dyn Mutator>,
    feedback: Box<dyn Feedback>,
    feedback_initialized: bool,
    seeds_executed: bool,
    oracle: CrashOracle,
    coverage_observer: CoverageObserver,
    rng: ChaCha8Rng,
    lifetime_frequency: PathFrequency,
    covered: HashSet<Location>,
    crash_map: CrashMap,
    stats: FuzzerStats,
    state: FuzzerState,
    started: Option<Instant>,
    verbose: bool,
    stats_interval: Duration,
}

impl Fuzzer {
    pub fn new(population: Population, schedule: Box<dyn PowerSchedule>, verbose: bool) -> Self {
        Self {
            population,
            schedule,
            mutator: Box::new(HavocMutator::new()),
            feedback: Box::new(PathNoveltyFeedback::new()),
            feedback_initialized: false,
            seeds_executed: false,
            oracle: CrashOracle::new(),
            coverage_observer: CoverageObserver::new(),
            rng: ChaCha8Rng::seed_from_u64(0),
            lifetime_frequency: PathFrequency::new(),
            covered: HashSet::new(),
            crash_map: CrashMap::new(),
            stats: FuzzerStats::default(),
            state: FuzzerState::Idle,
            started: None,
            verbose,
            stats_interval: DEFAULT_STATS_INTERVAL,
        }
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    pub fn with_mutator(mut self, mutator: Box<dyn Mutator>) -> Self {
        self.mutator = mutator;
        self
    }

    pub fn with_feedback(mut self, feedback: Box<dyn Feedback>) -> Self {
        self.feedback = feedback;
        self.feedback_initialized = false;
        self
    }

    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    pub fn state(&self) -> FuzzerState {
        self.state
    }

    pub fn population(&self) -> &Population {
        &self.population
    }

    pub fn stats(&self) -> &FuzzerStats {
        &self.stats
    }

    pub fn crash_map(&self) -> &CrashMap {
        &self.crash_map
    }

    /// Locations reached by any resolved execution so far.
    pub fn covered(&self) -> &HashSet<Location> {
        &self.covered
    }

    pub fn lifetime_frequency(&self) -> &PathFrequency {
        &self.lifetime_frequency
    }

    /// Runs iterations until `time_budget` has elapsed.
    ///
    /// The budget is checked between iterations only, so the last execution may
    /// overrun it. A zero budget performs no iteration.
    pub fn runs(
        &mut self,
        executor: &mut dyn Executor<Vec<u8>>,
        time_budget: Duration,
    ) -> Result<FuzzResult, FuzzerError> {
        self.state = FuzzerState::Idle;
        let start_time = SystemTime::now();
        let run_started = Instant::now();

        if self.population.is_empty() {
            self.state = FuzzerState::Stopped;
            return Err(FuzzerError::EmptyPopulation);
        }

        info!(
            seeds = self.population.len(),
            schedule = self.schedule.name(),
            feedback = self.feedback.name(),
            "fuzzing for {:?}",
            time_budget
        );

        let mut last_report = Instant::now();
        while run_started.elapsed() < time_budget {
            if let Err(e) = self.fuzz_one(executor) {
                self.state = FuzzerState::Stopped;
                return Err(e);
            }

            self.state = FuzzerState::Reporting;
            if self.verbose && last_report.elapsed() >= self.stats_interval {
                self.report_stats(run_started.elapsed());
                last_report = Instant::now();
            }
        }

        self.state = FuzzerState::Stopped;
        let end_time = SystemTime::now();
        info!(
            execs = self.stats.total_execs,
            seeds = self.population.len(),
            paths = self.stats.distinct_paths,
            covered = self.covered.len(),
            unique_crashes = self.crash_map.unique_count(),
            "fuzzing finished after {:.2?}",
            run_started.elapsed()
        );

        Ok(FuzzResult {
            covered: self.covered.clone(),
            crash_map: self.crash_map.clone(),
            start_time,
            end_time,
            stats: self.stats.clone(),
        })
    }

    /// Performs exactly one schedule, mutate, execute, evaluate step.
    ///
    /// The first call also runs every seed whose path is still unknown, before the
    /// feedback learns what the population covers.
    pub fn fuzz_one(&mut self, executor: &mut dyn Executor<Vec<u8>>) -> Result<(), FuzzerError> {
        if self.population.is_empty() {
            return Err(FuzzerError::EmptyPopulation);
        }
        let started = *self.started.get_or_insert_with(Instant::now);
        if !self.seeds_executed {
            self.execute_initial_seeds(executor, started);
        }
        if !self.feedback_initialized {
            self.feedback.init(&self.population)?;
            self.feedback_initialized = true;
        }

        self.state = FuzzerState::Scheduling;
        self.schedule.assign_energy(&mut self.population);
        let index = self.schedule.choose_seed(&self.population, &mut self.rng)?;
        let Some(parent) = self.population.get(index) else {
            return Err(FuzzerError::InvalidSeedIndex {
                index,
                len: self.population.len(),
            });
        };

        self.state = FuzzerState::Mutating;
        let mutant = self.mutator.mutate(parent.data(), &mut self.rng);

        self.state = FuzzerState::Executing;
        let (status, coverage) = self.execute(executor, &mutant);

        self.state = FuzzerState::Evaluating;
        self.evaluate(mutant, coverage, status, started.elapsed())
    }

    fn execute(
        &mut self,
        executor: &mut dyn Executor<Vec<u8>>,
        input: &Vec<u8>,
    ) -> (ExecutionStatus, Coverage) {
        let status = {
            let mut observers: [&mut dyn Observer; 1] = [&mut self.coverage_observer];
            executor.execute_sync(input, &mut observers)
        };
        (status, self.coverage_observer.take_coverage())
    }

    /// Runs each seed loaded without coverage once and fills in its coverage and path.
    ///
    /// Seeds whose run is unresolved keep an unknown path.
    fn execute_initial_seeds(&mut self, executor: &mut dyn Executor<Vec<u8>>, started: Instant) {
        self.seeds_executed = true;
        self.state = FuzzerState::Executing;
        for index in 0..self.population.len() {
            let data = match self.population.get(index) {
                Some(seed) if seed.path_id().is_none() => seed.data().to_vec(),
                _ => continue,
            };
            let (status, coverage) = self.execute(executor, &data);
            if self
                .record_execution(&data, &coverage, status, started.elapsed())
                .is_some()
            {
                if let Some(seed) = self.population.get_mut(index) {
                    seed.record_execution(coverage);
                }
            }
        }
        debug!(
            paths = self.stats.distinct_paths,
            covered = self.covered.len(),
            "initial seeds executed"
        );
    }

    fn evaluate(
        &mut self,
        mutant: Vec<u8>,
        coverage: Coverage,
        status: ExecutionStatus,
        elapsed: Duration,
    ) -> Result<(), FuzzerError> {
        let Some(path_id) = self.record_execution(&mutant, &coverage, status, elapsed) else {
            return Ok(());
        };

        if self.feedback.is_interesting(&coverage, &path_id) {
            debug!(path = %path_id, locations = coverage.len(), "new path");
            self.feedback.report_interesting(
                Seed::new(mutant, coverage, Some(path_id)),
                &mut self.population,
            )?;
            self.stats.last_new_path = Some(elapsed);
        }
        Ok(())
    }

    /// Counts an execution and, when it resolved, feeds the crash map, the covered
    /// set, the lifetime frequency table and the schedule hook. Returns the path id
    /// of a resolved execution.
    fn record_execution(
        &mut self,
        input: &Vec<u8>,
        coverage: &Coverage,
        status: ExecutionStatus,
        elapsed: Duration,
    ) -> Option<PathId> {
        self.stats.total_execs += 1;
        if status.outcome() == Outcome::Unresolved {
            self.stats.unresolved_execs += 1;
            return None;
        }

        let path_id = coverage.path_id();

        if let Some(report) = self.oracle.examine(input, &status) {
            if self.crash_map.insert(report.input, status) {
                self.stats.last_unique_crash = Some(elapsed);
            }
        }

        self.covered.extend(coverage.iter().copied());
        self.lifetime_frequency.record(path_id);
        self.stats.distinct_paths = self.lifetime_frequency.len() as u64;

        if let Some(hook) = self.schedule.frequency_hook() {
            hook.update_path_frequency(&self.lifetime_frequency);
        }
        Some(path_id)
    }

    fn report_stats(&self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        let execs_per_sec = if secs > 0.0 {
            self.stats.total_execs as f64 / secs
        } else {
            0.0
        };
        let since = |stamp: Option<Duration>| match stamp {
            Some(at) => format!("{:.1}s", at.as_secs_f64()),
            None => "none".to_string(),
        };
        info!(
            "execs: {} ({:.0}/s), seeds: {}, paths: {}, covered: {}, unique crashes: {}, last new path: {}, last unique crash: {}",
            self.stats.total_execs,
            execs_per_sec,
            self.population.len(),
            self.stats.distinct_paths,
            self.covered.len(),
            self.crash_map.unique_count(),
            since(self.stats.last_new_path),
            since(self.stats.last_unique_crash),
        );
    }
}
