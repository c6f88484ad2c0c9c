use crate::coverage::Coverage;
use crate::executor::{ExecutionStatus, ProcessOutput};
use std::any::Any;

/// An `Observer` is a component that monitors the execution of a target program
/// with a given input and collects data about that execution.
///
/// Observers are invoked by an `Executor` before (`pre_exec`) and after (`post_exec`)
/// the target is run. The fuzzer reads their results once the executor returns.
pub trait Observer: Send + Sync {
    /// Returns a static string name identifying the observer.
    fn name(&self) -> &'static str;

    /// Called by the `Executor` immediately before the target program is executed.
    ///
    /// Typically resets state left over from the previous execution.
    fn pre_exec(&mut self) -> Result<(), anyhow::Error>;

    /// Called by the `Executor` immediately after the target program has finished execution.
    ///
    /// # Arguments
    /// * `status`: The `ExecutionStatus` reported by the `Executor`.
    /// * `target_output`: Executor-specific data captured from the run. The in-process
    ///   executor passes the [`Coverage`] recorded by the harness; the command executor
    ///   passes a [`ProcessOutput`]. `None` when nothing was captured (e.g. spawn failure).
    fn post_exec(
        &mut self,
        status: &ExecutionStatus,
        target_output: Option<&dyn Any>,
    ) -> Result<(), anyhow::Error>;

    /// Resets the internal state of the observer.
    fn reset(&mut self) -> Result<(), anyhow::Error>;
}

/// Captures the set of locations the target reached during the last execution.
///
/// This is the fuzzer's view of the target's instrumentation: whatever coverage the
/// executor hands over in `post_exec` becomes the coverage of the execution.
#[derive(Default, Debug, Clone)]
pub struct CoverageObserver {
    coverage: Coverage,
}

impl CoverageObserver {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn coverage(&self) -> &Coverage {
        &self.coverage
    }

    /// Moves the collected coverage out, leaving the observer empty.
    pub fn take_coverage(&mut self) -> Coverage {
        std::mem::take(&mut self.coverage)
    }
}

impl Observer for CoverageObserver {
    fn name(&self) -> &'static str {
        "CoverageObserver"
    }

    fn pre_exec(&mut self) -> Result<(), anyhow::Error> {
        self.reset()
    }

    fn post_exec(
        &mut self,
        _status: &ExecutionStatus,
        target_output: Option<&dyn Any>,
    ) -> Result<(), anyhow::Error> {
        let Some(output) = target_output else {
            self.coverage.clear();
            return Ok(());
        };
        if let Some(coverage) = output.downcast_ref::<Coverage>() {
            self.coverage = coverage.clone();
        } else if let Some(process_output) = output.downcast_ref::<ProcessOutput>() {
            self.coverage = process_output.coverage.clone();
        } else {
            return Err(anyhow::anyhow!(
                "unsupported target output type for coverage collection"
            ));
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<(), anyhow::Error> {
        self.coverage.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::Location;

    #[test]
    fn coverage_observer_collects_harness_coverage() {
        let mut observer = CoverageObserver::new();
        let coverage: Coverage = [Location(2), Location(1)].into_iter().collect();

        observer.pre_exec().unwrap();
        observer
            .post_exec(&ExecutionStatus::Ok, Some(&coverage as &dyn Any))
            .unwrap();
        assert_eq!(observer.coverage(), &coverage);
        assert_eq!(observer.name(), "CoverageObserver");

        assert_eq!(observer.take_coverage(), coverage);
        assert!(observer.coverage().is_empty());
    }

    #[test]
    fn coverage_observer_reads_process_output() {
        let mut observer = CoverageObserver::new();
        let output = ProcessOutput {
            coverage: [Location(42)].into_iter().collect(),
            ..Default::default()
        };
        observer
            .post_exec(
                &ExecutionStatus::Crash("boom".to_string()),
                Some(&output as &dyn Any),
            )
            .unwrap();
        assert!(observer.coverage().contains(&Location(42)));
    }

    #[test]
    fn coverage_observer_resets_between_runs() {
        let mut observer = CoverageObserver::new();
        let coverage: Coverage = [Location(7)].into_iter().collect();
        observer
            .post_exec(&ExecutionStatus::Ok, Some(&coverage as &dyn Any))
            .unwrap();
        observer.pre_exec().unwrap();
        assert!(observer.coverage().is_empty());

        observer.post_exec(&ExecutionStatus::Ok, None).unwrap();
        assert!(observer.coverage().is_empty());
    }

    #[test]
    fn coverage_observer_rejects_unknown_output() {
        let mut observer = CoverageObserver::new();
        let unrelated = 17u32;
        assert!(
            observer
                .post_exec(&ExecutionStatus::Ok, Some(&unrelated as &dyn Any))
                .is_err()
        );
    }
}
