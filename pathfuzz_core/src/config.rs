use crate::executor::{CommandExecutorConfig, InputDelivery};
use crate::feedback::{Feedback, LocationNoveltyFeedback, PathNoveltyFeedback};
use crate::scheduler::{PathPowerSchedule, PowerSchedule, RandomSchedule, ScheduleError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigInputDelivery {
    #[default]
    StdIn,
    File {
        template: String,
    },
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CommandExecutorSettings {
    pub command: Vec<String>,
    #[serde(default)]
    pub input_delivery: ConfigInputDelivery,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    pub working_dir: Option<PathBuf>,
}

fn default_timeout_ms() -> u64 {
    2000
}

impl CommandExecutorSettings {
    pub fn to_executor_config(&self) -> CommandExecutorConfig {
        let input_delivery = match &self.input_delivery {
            ConfigInputDelivery::StdIn => InputDelivery::StdIn,
            ConfigInputDelivery::File { template } => InputDelivery::File(template.clone()),
        };
        CommandExecutorConfig {
            command: self.command.clone(),
            input_delivery,
            timeout: Duration::from_millis(self.timeout_ms),
            working_dir: self.working_dir.clone(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutorType {
    #[default]
    InProcess,
    Command,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    #[serde(default)]
    pub executor_type: ExecutorType,
    #[serde(default)]
    pub command_settings: Option<CommandExecutorSettings>,
}

/// Which novelty criterion decides that an execution becomes a new seed.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Novelty {
    /// The exact set of reached locations has not been seen before.
    #[default]
    Path,
    /// At least one reached location has not been seen before.
    Location,
}

impl Novelty {
    pub fn build_feedback(self) -> Box<dyn Feedback> {
        match self {
            Novelty::Path => Box::new(PathNoveltyFeedback::new()),
            Novelty::Location => Box::new(LocationNoveltyFeedback::new()),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FuzzerSettings {
    #[serde(default = "default_time_budget_secs")]
    pub time_budget_secs: u64,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub rng_seed: u64,
    #[serde(default = "default_stats_interval_ms")]
    pub stats_interval_ms: u64,
    #[serde(default)]
    pub novelty: Novelty,
}

pub fn default_time_budget_secs() -> u64 {
    60
}
pub fn default_stats_interval_ms() -> u64 {
    1000
}

impl Default for FuzzerSettings {
    fn default() -> Self {
        Self {
            time_budget_secs: default_time_budget_secs(),
            verbose: false,
            rng_seed: 0,
            stats_interval_ms: default_stats_interval_ms(),
            novelty: Novelty::default(),
        }
    }
}

impl FuzzerSettings {
    pub fn time_budget(&self) -> Duration {
        Duration::from_secs(self.time_budget_secs)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ScheduleKind {
    Random,
    #[default]
    Path,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ScheduleSettings {
    #[serde(default)]
    pub kind: ScheduleKind,
    #[serde(default = "default_power")]
    pub power: f64,
    #[serde(default)]
    pub use_lifetime_frequency: bool,
}

pub fn default_power() -> f64 {
    1.0
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            kind: ScheduleKind::default(),
            power: default_power(),
            use_lifetime_frequency: false,
        }
    }
}

impl ScheduleSettings {
    /// Builds the configured schedule. An invalid `power` is rejected even for
    /// the random schedule, which ignores it, so a typo never goes unnoticed.
    pub fn build(&self) -> Result<Box<dyn PowerSchedule>, ScheduleError> {
        let path_schedule = PathPowerSchedule::new(self.power)?
            .with_lifetime_frequency(self.use_lifetime_frequency);
        Ok(match self.kind {
            ScheduleKind::Random => Box::new(RandomSchedule::new()),
            ScheduleKind::Path => Box::new(path_schedule),
        })
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CorpusConfig {
    #[serde(default)]
    pub initial_seed_paths: Vec<PathBuf>,
    /// Where the bincode run artifact is written; nothing is written when unset.
    #[serde(default)]
    pub result_path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct PathfuzzConfig {
    #[serde(default)]
    pub fuzzer: FuzzerSettings,
    #[serde(default)]
    pub schedule: ScheduleSettings,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub corpus: CorpusConfig,
}

impl PathfuzzConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;
        Self::from_toml_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, anyhow::Error> {
        let config: PathfuzzConfig = toml::from_str(content)?;
        if config.executor.executor_type == ExecutorType::Command
            && config.executor.command_settings.is_none()
        {
            anyhow::bail!("executor-type = \"command\" requires [executor.command-settings]");
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_yields_defaults() {
        let config = PathfuzzConfig::from_toml_str("").unwrap();
        assert_eq!(config.fuzzer, FuzzerSettings::default());
        assert_eq!(config.schedule, ScheduleSettings::default());
        assert_eq!(config.executor.executor_type, ExecutorType::InProcess);
        assert!(config.corpus.initial_seed_paths.is_empty());
        assert!(config.corpus.result_path.is_none());
    }

    #[test]
    fn full_document_parses_kebab_case_fields() {
        let config = PathfuzzConfig::from_toml_str(
            r#"
            [fuzzer]
            time-budget-secs = 5
            verbose = true
            rng-seed = 42
            stats-interval-ms = 250
            novelty = "location"

            [schedule]
            kind = "random"
            power = 2.5
            use-lifetime-frequency = true

            [executor]
            executor-type = "command"

            [executor.command-settings]
            command = ["./target", "--fast"]
            input-delivery = { file = { template = "{}" } }
            timeout-ms = 150

            [corpus]
            initial-seed-paths = ["seeds", "extra.json"]
            result-path = "out/result.bin"
            "#,
        )
        .unwrap();

        assert_eq!(config.fuzzer.time_budget(), Duration::from_secs(5));
        assert!(config.fuzzer.verbose);
        assert_eq!(config.fuzzer.rng_seed, 42);
        assert_eq!(config.fuzzer.stats_interval(), Duration::from_millis(250));
        assert_eq!(config.fuzzer.novelty, Novelty::Location);
        assert_eq!(config.schedule.kind, ScheduleKind::Random);
        assert_eq!(config.schedule.power, 2.5);
        assert!(config.schedule.use_lifetime_frequency);

        let settings = config.executor.command_settings.as_ref().unwrap();
        assert_eq!(
            settings.input_delivery,
            ConfigInputDelivery::File {
                template: "{}".to_string()
            }
        );
        let executor_config = settings.to_executor_config();
        assert_eq!(executor_config.timeout, Duration::from_millis(150));
        assert!(matches!(executor_config.input_delivery, InputDelivery::File(ref t) if t == "{}"));

        assert_eq!(config.corpus.initial_seed_paths.len(), 2);
        assert_eq!(
            config.corpus.result_path,
            Some(PathBuf::from("out/result.bin"))
        );
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(PathfuzzConfig::from_toml_str("[fuzzer]\nmax-iterations = 3\n").is_err());
    }

    #[test]
    fn command_executor_requires_settings() {
        let err = PathfuzzConfig::from_toml_str("[executor]\nexecutor-type = \"command\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("command-settings"));
    }

    #[test]
    fn schedule_settings_build_named_schedule() {
        let path = ScheduleSettings::default().build().unwrap();
        assert_eq!(path.name(), "PathPowerSchedule");

        let random = ScheduleSettings {
            kind: ScheduleKind::Random,
            ..Default::default()
        }
        .build()
        .unwrap();
        assert_eq!(random.name(), "RandomSchedule");

        let invalid = ScheduleSettings {
            power: -1.0,
            ..Default::default()
        };
        assert!(matches!(
            invalid.build(),
            Err(ScheduleError::InvalidPower(_))
        ));
    }

    #[test]
    fn novelty_builds_matching_feedback() {
        assert_eq!(Novelty::Path.build_feedback().name(), "PathNoveltyFeedback");
        assert_eq!(
            Novelty::Location.build_feedback().name(),
            "LocationNoveltyFeedback"
        );
    }

    #[test]
    fn load_from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[fuzzer]\nrng-seed = 7").unwrap();
        let config = PathfuzzConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.fuzzer.rng_seed, 7);
    }

    #[test]
    fn load_from_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PathfuzzConfig::load_from_file(&dir.path().join("absent.toml")).is_err());
    }
}
