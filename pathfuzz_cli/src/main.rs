use pathfuzz_core::artifact::save_result;
use pathfuzz_core::config::{
    CommandExecutorSettings, ConfigInputDelivery, ExecutorType as ConfigExecutorType,
    PathfuzzConfig, ScheduleKind,
};
use pathfuzz_core::corpus::{Population, save_seeds};
use pathfuzz_core::coverage::Coverage;
use pathfuzz_core::executor::{CommandExecutor, Executor, InProcessExecutor};
use pathfuzz_core::fuzzer::{FuzzResult, Fuzzer};
use pathfuzz_core::seed::Seed;

use clap::{Parser, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults to ./pathfuzz.toml when present.
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// Command line of an instrumented target; switches to the command executor.
    #[clap(long)]
    target_command: Option<String>,
    #[clap(short, long)]
    time_budget_secs: Option<u64>,
    /// Seed file or directory; may be repeated.
    #[clap(short, long = "seeds")]
    seeds: Vec<PathBuf>,
    #[clap(long, value_enum)]
    schedule: Option<ScheduleArg>,
    #[clap(long)]
    power: Option<f64>,
    #[clap(long)]
    rng_seed: Option<u64>,
    #[clap(short, long)]
    verbose: bool,
    /// Where to write the run artifact.
    #[clap(short, long)]
    output: Option<PathBuf>,
    /// Directory receiving one file per crashing input, named by its MD5.
    #[clap(long)]
    crash_dir: Option<PathBuf>,
    /// Writes the final population as a JSON seed file.
    #[clap(long)]
    save_corpus: Option<PathBuf>,
    #[clap(long, default_value = "info")]
    log_level: String,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ScheduleArg {
    Random,
    Path,
}

impl From<ScheduleArg> for ScheduleKind {
    fn from(arg: ScheduleArg) -> Self {
        match arg {
            ScheduleArg::Random => ScheduleKind::Random,
            ScheduleArg::Path => ScheduleKind::Path,
        }
    }
}

/// Built-in target for the in-process executor: a small parser with nested checks
/// that only crashes on inputs starting with "BAD!".
fn demo_harness(data: &[u8], coverage: &mut Coverage) {
    coverage.hit("demo:entry");
    if data.is_empty() {
        coverage.hit("demo:empty");
        return;
    }
    if data[0] == b'B' {
        coverage.hit("demo:b");
        if data.len() > 1 && data[1] == b'A' {
            coverage.hit("demo:ba");
            if data.len() > 2 && data[2] == b'D' {
                coverage.hit("demo:bad");
                if data.len() > 3 && data[3] == b'!' {
                    panic!("BAD! input detected by harness");
                }
            }
        }
    }
    if data.iter().any(|b| !b.is_ascii()) {
        coverage.hit("demo:non-ascii");
    }
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {e}"))
}

fn load_config(cli: &Cli) -> anyhow::Result<PathfuzzConfig> {
    match &cli.config_file {
        Some(config_path) => {
            info!("Loading configuration from {config_path:?}");
            PathfuzzConfig::load_from_file(config_path)
        }
        None => {
            let default_config_path = PathBuf::from("pathfuzz.toml");
            if default_config_path.exists() {
                info!("No config file specified, loading default {default_config_path:?}");
                PathfuzzConfig::load_from_file(&default_config_path)
            } else {
                info!("No config file found, using built-in defaults");
                Ok(PathfuzzConfig::default())
            }
        }
    }
}

fn apply_overrides(config: &mut PathfuzzConfig, cli: &Cli) {
    if let Some(secs) = cli.time_budget_secs {
        config.fuzzer.time_budget_secs = secs;
    }
    if let Some(seed) = cli.rng_seed {
        config.fuzzer.rng_seed = seed;
    }
    if cli.verbose {
        config.fuzzer.verbose = true;
    }
    if let Some(schedule) = cli.schedule {
        config.schedule.kind = schedule.into();
    }
    if let Some(power) = cli.power {
        config.schedule.power = power;
    }
    if !cli.seeds.is_empty() {
        config.corpus.initial_seed_paths = cli.seeds.clone();
    }
    if let Some(output) = &cli.output {
        config.corpus.result_path = Some(output.clone());
    }
    if let Some(target_cmd_str) = &cli.target_command {
        let command: Vec<String> = target_cmd_str.split_whitespace().map(str::to_string).collect();
        config.executor.executor_type = ConfigExecutorType::Command;
        let cmd_settings = config
            .executor
            .command_settings
            .get_or_insert_with(|| CommandExecutorSettings {
                command: Vec::new(),
                input_delivery: ConfigInputDelivery::StdIn,
                timeout_ms: 2000,
                working_dir: None,
            });
        cmd_settings.command = command;
    }
}

fn build_executor(config: &PathfuzzConfig) -> anyhow::Result<Box<dyn Executor<Vec<u8>>>> {
    Ok(match config.executor.executor_type {
        ConfigExecutorType::InProcess => Box::new(InProcessExecutor::new(demo_harness)),
        ConfigExecutorType::Command => {
            let cmd_settings = config.executor.command_settings.as_ref().ok_or_else(|| {
                anyhow::anyhow!("Command settings missing for command executor in config")
            })?;
            if cmd_settings.command.is_empty() {
                anyhow::bail!("Command executor needs a non-empty command");
            }
            Box::new(CommandExecutor::new(cmd_settings.to_executor_config()))
        }
    })
}

fn write_crashes(crash_dir: &Path, result: &FuzzResult) -> anyhow::Result<usize> {
    fs::create_dir_all(crash_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create crash directory {crash_dir:?}: {e}"))?;
    let mut written = 0;
    for (input, _status) in result.crash_map.iter() {
        let file_path = crash_dir.join(format!("{:x}", md5::compute(input)));
        fs::write(&file_path, input)
            .map_err(|e| anyhow::anyhow!("Failed to write crash file {file_path:?}: {e}"))?;
        written += 1;
    }
    Ok(written)
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;

    let mut config = load_config(&cli)?;
    apply_overrides(&mut config, &cli);

    let mut population = Population::new();
    let loaded = population.load_initial_seeds(&config.corpus.initial_seed_paths)?;
    if loaded == 0 {
        info!("No initial seeds given, starting from a default seed");
        population.add(Seed::unexecuted(b"INIT".to_vec()));
    }

    let schedule = config.schedule.build()?;
    let mut executor = build_executor(&config)?;

    let mut fuzzer = Fuzzer::new(population, schedule, config.fuzzer.verbose)
        .with_rng_seed(config.fuzzer.rng_seed)
        .with_feedback(config.fuzzer.novelty.build_feedback())
        .with_stats_interval(config.fuzzer.stats_interval());

    let result = fuzzer.runs(executor.as_mut(), config.fuzzer.time_budget())?;

    let elapsed = result
        .end_time
        .duration_since(result.start_time)
        .unwrap_or(Duration::ZERO);
    println!("Fuzzing finished in {elapsed:.2?}.");
    println!(
        "Total executions: {}, unresolved: {}, seeds: {}, paths: {}, covered locations: {}, unique crashes: {}",
        result.stats.total_execs,
        result.stats.unresolved_execs,
        fuzzer.population().len(),
        result.stats.distinct_paths,
        result.covered.len(),
        result.crash_map.unique_count()
    );

    if let Some(crash_dir) = &cli.crash_dir {
        let written = write_crashes(crash_dir, &result)?;
        info!("Wrote {written} crashing inputs to {crash_dir:?}");
    } else if !result.crash_map.is_empty() {
        warn!("Crashes found but no --crash-dir given; inputs are not saved");
    }

    if let Some(corpus_path) = &cli.save_corpus {
        save_seeds(corpus_path, fuzzer.population().as_slice())?;
        info!("Saved {} seeds to {corpus_path:?}", fuzzer.population().len());
    }

    if let Some(result_path) = &config.corpus.result_path {
        save_result(result_path, &result.to_artifact())?;
        info!("Saved run artifact to {result_path:?}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_tracing_install_is_reported() {
        let _ = init_tracing("info");
        let result = init_tracing("debug");
        assert!(result.is_err(), "A global subscriber can only be installed once");
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to install tracing subscriber")
        );
    }
}
