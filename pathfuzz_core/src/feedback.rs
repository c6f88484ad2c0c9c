use crate::corpus::Population;
use crate::coverage::{Coverage, Location, PathId};
use crate::seed::Seed;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedbackError {
    #[error("Seed rejected by feedback: {0}")]
    Rejected(String),
}

/// Decides whether an execution is novel enough to keep as a new seed.
///
/// The fuzzer asks `is_interesting` after every resolved execution and, on `true`,
/// hands the seed over to `report_interesting`, which appends it and remembers
/// whatever made it novel so the same discovery is not kept twice.
pub trait Feedback: Send + Sync {
    fn name(&self) -> &'static str;

    /// Marks everything the initial population already covers as known.
    fn init(&mut self, population: &Population) -> Result<(), FeedbackError>;

    fn is_interesting(&self, coverage: &Coverage, path_id: &PathId) -> bool;

    /// Appends `seed` to `population` and returns its index.
    fn report_interesting(
        &mut self,
        seed: Seed,
        population: &mut Population,
    ) -> Result<usize, FeedbackError>;
}

/// Keeps an input when its path id has not been seen before.
#[derive(Default, Debug)]
pub struct PathNoveltyFeedback {
    known_paths: HashSet<PathId>,
}

impl PathNoveltyFeedback {
    pub fn new() -> Self {
        Self {
            known_paths: HashSet::new(),
        }
    }

    pub fn known_paths(&self) -> usize {
        self.known_paths.len()
    }
}

impl Feedback for PathNoveltyFeedback {
    fn name(&self) -> &'static str {
        "PathNoveltyFeedback"
    }

    fn init(&mut self, population: &Population) -> Result<(), FeedbackError> {
        self.known_paths
            .extend(population.iter().filter_map(|seed| seed.path_id().copied()));
        Ok(())
    }

    fn is_interesting(&self, _coverage: &Coverage, path_id: &PathId) -> bool {
        !self.known_paths.contains(path_id)
    }

    fn report_interesting(
        &mut self,
        seed: Seed,
        population: &mut Population,
    ) -> Result<usize, FeedbackError> {
        let Some(path_id) = seed.path_id().copied() else {
            return Err(FeedbackError::Rejected("seed has no path id".to_string()));
        };
        self.known_paths.insert(path_id);
        Ok(population.add(seed))
    }
}

/// Keeps an input when it reaches at least one location no earlier input reached.
///
/// Stricter than path novelty: a new combination of known locations is not enough.
#[derive(Default, Debug)]
pub struct LocationNoveltyFeedback {
    known_locations: HashSet<Location>,
}

impl LocationNoveltyFeedback {
    pub fn new() -> Self {
        Self {
            known_locations: HashSet::new(),
        }
    }
}

impl Feedback for LocationNoveltyFeedback {
    fn name(&self) -> &'static str {
        "LocationNoveltyFeedback"
    }

    fn init(&mut self, population: &Population) -> Result<(), FeedbackError> {
        for seed in population.iter() {
            self.known_locations.extend(seed.coverage().iter().copied());
        }
        Ok(())
    }

    fn is_interesting(&self, coverage: &Coverage, _path_id: &PathId) -> bool {
        !coverage.new_relative_to(&self.known_locations).is_empty()
    }

    fn report_interesting(
        &mut self,
        seed: Seed,
        population: &mut Population,
    ) -> Result<usize, FeedbackError> {
        self.known_locations.extend(seed.coverage().iter().copied());
        Ok(population.add(seed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coverage_of(ids: &[u64]) -> Coverage {
        ids.iter().copied().map(Location).collect()
    }

    #[test]
    fn path_novelty_feedback_keeps_each_path_once() {
        let mut feedback = PathNoveltyFeedback::new();
        let mut population = Population::new();
        feedback.init(&population).unwrap();

        let coverage = coverage_of(&[1, 2]);
        let path_id = coverage.path_id();
        assert!(feedback.is_interesting(&coverage, &path_id));

        let index = feedback
            .report_interesting(
                Seed::from_coverage(b"first".to_vec(), coverage.clone()),
                &mut population,
            )
            .unwrap();
        assert_eq!(index, 0);
        assert_eq!(population.len(), 1);
        assert!(
            !feedback.is_interesting(&coverage, &path_id),
            "A path already in the population should not be novel"
        );

        let subset = coverage_of(&[1]);
        assert!(
            feedback.is_interesting(&subset, &subset.path_id()),
            "A different path is novel even without new locations"
        );
    }

    #[test]
    fn path_novelty_feedback_init_marks_initial_seeds() {
        let coverage = coverage_of(&[5]);
        let population = Population::from(vec![
            Seed::from_coverage(b"known".to_vec(), coverage.clone()),
            Seed::unexecuted(b"raw".to_vec()),
        ]);
        let mut feedback = PathNoveltyFeedback::new();
        feedback.init(&population).unwrap();

        assert_eq!(feedback.known_paths(), 1);
        assert!(!feedback.is_interesting(&coverage, &coverage.path_id()));
    }

    #[test]
    fn path_novelty_feedback_rejects_seed_without_path() {
        let mut feedback = PathNoveltyFeedback::new();
        let mut population = Population::new();
        let result = feedback.report_interesting(Seed::unexecuted(vec![1]), &mut population);
        assert!(matches!(result, Err(FeedbackError::Rejected(_))));
        assert!(population.is_empty());
    }

    #[test]
    fn location_novelty_feedback_requires_new_location() {
        let mut feedback = LocationNoveltyFeedback::new();
        let population = Population::from(vec![Seed::from_coverage(
            b"seed".to_vec(),
            coverage_of(&[1, 2, 3]),
        )]);
        feedback.init(&population).unwrap();
        let mut population = population;

        let recombined = coverage_of(&[1, 3]);
        assert!(
            !feedback.is_interesting(&recombined, &recombined.path_id()),
            "Known locations in a new combination are not novel under location feedback"
        );

        let extended = coverage_of(&[1, 4]);
        assert!(feedback.is_interesting(&extended, &extended.path_id()));
        feedback
            .report_interesting(
                Seed::from_coverage(b"new".to_vec(), extended.clone()),
                &mut population,
            )
            .unwrap();
        assert_eq!(population.len(), 2);
        assert!(!feedback.is_interesting(&extended, &extended.path_id()));
    }
}
