use crate::coverage::{Coverage, PathId};

/// One corpus member: an input plus the coverage it produced when it was executed.
///
/// `data` is fixed at creation. `coverage` and `path_id` are fixed too, except that
/// an unexecuted seed gets them once when the fuzzer first runs it. `energy` is a
/// transient scheduling weight that power schedules rewrite on every round.
#[derive(Debug, Clone, PartialEq)]
pub struct Seed {
    data: Vec<u8>,
    coverage: Coverage,
    path_id: Option<PathId>,
    energy: f64,
}

impl Seed {
    /// `path_id` of `None` marks the path as unknown; schedules treat such seeds as unique.
    pub fn new(data: Vec<u8>, coverage: Coverage, path_id: Option<PathId>) -> Self {
        Self {
            data,
            coverage,
            path_id,
            energy: 0.0,
        }
    }

    /// Builds a seed whose path id is derived from `coverage`.
    pub fn from_coverage(data: Vec<u8>, coverage: Coverage) -> Self {
        let path_id = coverage.path_id();
        Self::new(data, coverage, Some(path_id))
    }

    /// A seed that has never been executed: empty coverage, unknown path.
    pub fn unexecuted(data: Vec<u8>) -> Self {
        Self::new(data, Coverage::new(), None)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn coverage(&self) -> &Coverage {
        &self.coverage
    }

    pub fn path_id(&self) -> Option<&PathId> {
        self.path_id.as_ref()
    }

    pub fn energy(&self) -> f64 {
        self.energy
    }

    /// Fills in the coverage of a seed that was loaded without it.
    /// Seeds whose path is already known are left untouched.
    pub(crate) fn record_execution(&mut self, coverage: Coverage) {
        if self.path_id.is_none() {
            self.path_id = Some(coverage.path_id());
            self.coverage = coverage;
        }
    }

    /// Written by power schedules only. Negative and NaN values are stored as 0.0.
    pub fn set_energy(&mut self, energy: f64) {
        self.energy = if energy.is_nan() { 0.0 } else { energy.max(0.0) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::Location;

    #[test]
    fn from_coverage_derives_path_id() {
        let coverage: Coverage = [Location(4), Location(9)].into_iter().collect();
        let seed = Seed::from_coverage(b"abc".to_vec(), coverage.clone());
        assert_eq!(seed.data(), b"abc");
        assert_eq!(seed.path_id(), Some(&coverage.path_id()));
        assert_eq!(seed.energy(), 0.0);
    }

    #[test]
    fn unexecuted_seed_has_unknown_path() {
        let seed = Seed::unexecuted(b"xyz".to_vec());
        assert!(seed.path_id().is_none());
        assert!(seed.coverage().is_empty());
    }

    #[test]
    fn record_execution_only_fills_unknown_paths() {
        let coverage: Coverage = [Location(1)].into_iter().collect();
        let mut seed = Seed::unexecuted(b"raw".to_vec());
        seed.record_execution(coverage.clone());
        assert_eq!(seed.coverage(), &coverage);
        assert_eq!(seed.path_id(), Some(&coverage.path_id()));

        let other: Coverage = [Location(2)].into_iter().collect();
        seed.record_execution(other);
        assert_eq!(seed.path_id(), Some(&coverage.path_id()));
    }

    #[test]
    fn set_energy_never_stores_negative_values() {
        let mut seed = Seed::unexecuted(vec![]);
        seed.set_energy(0.25);
        assert_eq!(seed.energy(), 0.25);
        seed.set_energy(-1.0);
        assert_eq!(seed.energy(), 0.0);
        seed.set_energy(f64::NAN);
        assert_eq!(seed.energy(), 0.0);
    }
}
