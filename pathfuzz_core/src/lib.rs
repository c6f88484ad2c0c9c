pub mod artifact;
pub mod config;
pub mod corpus;
pub mod coverage;
pub mod executor;
pub mod feedback;
pub mod fuzzer;
pub mod input;
pub mod mutator;
pub mod observer;
pub mod oracle;
pub mod scheduler;
pub mod seed;

pub use artifact::{RunArtifact, load_result, save_result};
pub use config::PathfuzzConfig;
pub use corpus::{CorpusError, Population, SeedRecord, load_seeds, save_seeds};
pub use coverage::{Coverage, Location, PathFrequency, PathId};
pub use executor::{
    CommandExecutor, ExecutionStatus, Executor, InProcessExecutor, Outcome, ProcessOutput,
};
pub use feedback::{Feedback, FeedbackError, LocationNoveltyFeedback, PathNoveltyFeedback};
pub use fuzzer::{CrashMap, FuzzResult, Fuzzer, FuzzerError, FuzzerState, FuzzerStats};
pub use input::Input;
pub use mutator::{HavocMutator, MutationOperator, Mutator};
pub use observer::{CoverageObserver, Observer};
pub use oracle::{BugReport, CrashOracle, Oracle};
pub use scheduler::{
    AcceptsPathFrequency, PathPowerSchedule, PowerSchedule, RandomSchedule, ScheduleError,
};
pub use seed::Seed;
