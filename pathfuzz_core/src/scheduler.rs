use crate::corpus::Population;
use crate::coverage::{PathFrequency, PathId};
use rand::Rng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand_core::RngCore;
use thiserror::Error;

/// Errors that can occur during scheduler operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScheduleError {
    /// The population is empty, so there is no seed to mutate.
    #[error("Population is empty, cannot choose a seed")]
    EmptyPopulation,
    /// The path-frequency exponent must be finite and non-negative.
    #[error("Invalid power schedule exponent {0}: must be finite and >= 0")]
    InvalidPower(f64),
}

/// Capability of schedules that want the fuzzer's lifetime path-frequency table.
///
/// The fuzzer hands the table over after every evaluated execution, but only to
/// schedules that expose this capability through [`PowerSchedule::frequency_hook`].
pub trait AcceptsPathFrequency {
    fn update_path_frequency(&mut self, table: &PathFrequency);
}

/// A `PowerSchedule` distributes energy over the population and picks the next seed to mutate.
pub trait PowerSchedule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Recomputes every seed's energy in place.
    ///
    /// Afterwards the energies of a non-empty population sum to 1.0, or are all 0.0
    /// when every raw score is zero. Calling it twice on an unchanged population
    /// yields identical energies.
    fn assign_energy(&mut self, population: &mut Population);

    /// Selects the index of the next seed.
    ///
    /// The default samples proportionally to the energies last written by
    /// [`assign_energy`](Self::assign_energy), and uniformly when they are all zero.
    ///
    /// Returns `Err(ScheduleError::EmptyPopulation)` if the population is empty.
    fn choose_seed(
        &mut self,
        population: &Population,
        rng: &mut dyn RngCore,
    ) -> Result<usize, ScheduleError> {
        choose_by_energy(population, rng)
    }

    /// Returns the lifetime-frequency capability, if this schedule has one.
    fn frequency_hook(&mut self) -> Option<&mut dyn AcceptsPathFrequency> {
        None
    }
}

/// Energy-weighted selection shared by schedules that do not override `choose_seed`.
pub fn choose_by_energy(
    population: &Population,
    rng: &mut dyn RngCore,
) -> Result<usize, ScheduleError> {
    if population.is_empty() {
        return Err(ScheduleError::EmptyPopulation);
    }
    match WeightedIndex::new(population.iter().map(|seed| seed.energy())) {
        Ok(distribution) => Ok(distribution.sample(rng)),
        // All-zero (or otherwise unusable) weights: every seed is equally likely.
        Err(_) => Ok(rng.random_range(0..population.len())),
    }
}

/// Baseline schedule: equal energy for every seed and uniform selection that ignores it.
#[derive(Default, Debug)]
pub struct RandomSchedule;

impl RandomSchedule {
    /// Creates a new `RandomSchedule`.
    pub fn new() -> Self {
        RandomSchedule
    }
}

impl PowerSchedule for RandomSchedule {
    fn name(&self) -> &'static str {
        "RandomSchedule"
    }

    fn assign_energy(&mut self, population: &mut Population) {
        if population.is_empty() {
            return;
        }
        let energy = 1.0 / population.len() as f64;
        for seed in population.iter_mut() {
            seed.set_energy(energy);
        }
    }

    fn choose_seed(
        &mut self,
        population: &Population,
        rng: &mut dyn RngCore,
    ) -> Result<usize, ScheduleError> {
        if population.is_empty() {
            return Err(ScheduleError::EmptyPopulation);
        }
        Ok(rng.random_range(0..population.len()))
    }
}

/// Rewards seeds whose path is rare in the population.
///
/// Each seed gets `(1 / frequency(path)) ^ power`, normalized over the population.
/// Seeds without a path id count as unique (frequency 1). `power` = 0 degenerates
/// to uniform energy; larger values sharpen the preference for rare paths.
#[derive(Debug)]
pub struct PathPowerSchedule {
    power: f64,
    path_frequency: PathFrequency,
    lifetime_frequency: PathFrequency,
    use_lifetime_frequency: bool,
}

impl PathPowerSchedule {
    pub fn new(power: f64) -> Result<Self, ScheduleError> {
        if !power.is_finite() || power < 0.0 {
            return Err(ScheduleError::InvalidPower(power));
        }
        Ok(Self {
            power,
            path_frequency: PathFrequency::new(),
            lifetime_frequency: PathFrequency::new(),
            use_lifetime_frequency: false,
        })
    }

    /// When enabled, a seed's frequency is its population count plus the number of
    /// times the fuzzer has produced that path over the whole run.
    pub fn with_lifetime_frequency(mut self, enabled: bool) -> Self {
        self.use_lifetime_frequency = enabled;
        self
    }

    pub fn power(&self) -> f64 {
        self.power
    }

    /// The population-local table built by the last `assign_energy` call.
    pub fn path_frequency(&self) -> &PathFrequency {
        &self.path_frequency
    }

    fn frequency_of(&self, path_id: Option<&PathId>) -> u64 {
        let Some(path_id) = path_id else {
            return 1;
        };
        let mut frequency = self.path_frequency.get(path_id);
        if self.use_lifetime_frequency {
            frequency += self.lifetime_frequency.get(path_id);
        }
        frequency.max(1)
    }
}

impl Default for PathPowerSchedule {
    fn default() -> Self {
        Self {
            power: 1.0,
            path_frequency: PathFrequency::new(),
            lifetime_frequency: PathFrequency::new(),
            use_lifetime_frequency: false,
        }
    }
}

impl PowerSchedule for PathPowerSchedule {
    fn name(&self) -> &'static str {
        "PathPowerSchedule"
    }

    fn assign_energy(&mut self, population: &mut Population) {
        self.path_frequency.clear();
        for path_id in population.iter().filter_map(|seed| seed.path_id()) {
            self.path_frequency.record(*path_id);
        }

        let raw_energies: Vec<f64> = population
            .iter()
            .map(|seed| (1.0 / self.frequency_of(seed.path_id()) as f64).powf(self.power))
            .collect();
        let total_energy: f64 = raw_energies.iter().sum();

        for (seed, raw_energy) in population.iter_mut().zip(raw_energies) {
            let energy = if total_energy > 0.0 {
                raw_energy / total_energy
            } else {
                0.0
            };
            seed.set_energy(energy);
        }
    }

    fn frequency_hook(&mut self) -> Option<&mut dyn AcceptsPathFrequency> {
        Some(self)
    }
}

impl AcceptsPathFrequency for PathPowerSchedule {
    fn update_path_frequency(&mut self, table: &PathFrequency) {
        self.lifetime_frequency = table.clone();
    }
}
