use crate::coverage::Coverage;
use crate::input::Input;
use crate::observer::Observer;
use std::any::Any;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::error;

/// Environment variable through which a command target learns where to write
/// the labels of the locations it reached, one per line.
pub const COVERAGE_FILE_ENV: &str = "PATHFUZZ_COVERAGE_FILE";

const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// What the executor observed about one run of the target.
///
/// A `Crash` status doubles as the captured result of a failing execution, so two
/// crashes are the same crash exactly when their statuses compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExecutionStatus {
    Ok,
    Timeout,
    Crash(String),
    ObserverError(String),
    Other(String),
}

/// The three-way verdict the fuzzing loop reasons about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Pass,
    Fail,
    /// Timeouts and runner failures: counted, but neither a pass nor a crash.
    Unresolved,
}

impl ExecutionStatus {
    pub fn outcome(&self) -> Outcome {
        match self {
            ExecutionStatus::Ok => Outcome::Pass,
            ExecutionStatus::Crash(_) => Outcome::Fail,
            ExecutionStatus::Timeout
            | ExecutionStatus::ObserverError(_)
            | ExecutionStatus::Other(_) => Outcome::Unresolved,
        }
    }
}

/// Runs the target once per input and reports the result to the given observers.
///
/// Implementations must return in bounded time; anything that prevents a verdict
/// is reported as a status, never as a panic.
pub trait Executor<I: Input> {
    fn execute_sync(&mut self, input: &I, observers: &mut [&mut dyn Observer]) -> ExecutionStatus;
}

fn run_pre_exec(observers: &mut [&mut dyn Observer]) -> Result<(), ExecutionStatus> {
    for obs in observers.iter_mut() {
        if let Err(e) = obs.pre_exec() {
            let error_msg = format!("Observer '{}' pre_exec failed: {}", obs.name(), e);
            error!("{error_msg}");
            return Err(ExecutionStatus::ObserverError(error_msg));
        }
    }
    Ok(())
}

/// Calls `post_exec` on every observer and returns the first failure message, if any.
fn run_post_exec(
    observers: &mut [&mut dyn Observer],
    status: &ExecutionStatus,
    target_output: Option<&dyn Any>,
) -> Option<String> {
    let mut post_exec_error: Option<String> = None;
    for obs in observers.iter_mut() {
        if let Err(e) = obs.post_exec(status, target_output) {
            let error_msg = format!("Observer '{}' post_exec failed: {}", obs.name(), e);
            error!("{error_msg}");
            if post_exec_error.is_none() {
                post_exec_error = Some(error_msg);
            }
        }
    }
    post_exec_error
}

/// Runs an instrumented harness function in the fuzzer's own process.
///
/// The harness records the locations it reaches into the `Coverage` it is given.
/// Panics are caught and reported as `Crash` with the panic message; the coverage
/// recorded up to the panic is still handed to the observers.
pub struct InProcessExecutor<F>
where
    F: Fn(&[u8], &mut Coverage),
{
    harness_fn: F,
}

impl<F> InProcessExecutor<F>
where
    F: Fn(&[u8], &mut Coverage),
{
    pub fn new(harness_fn: F) -> Self {
        Self { harness_fn }
    }
}

impl<I: Input, F> Executor<I> for InProcessExecutor<F>
where
    F: Fn(&[u8], &mut Coverage) + Send + Sync,
{
    fn execute_sync(&mut self, input: &I, observers: &mut [&mut dyn Observer]) -> ExecutionStatus {
        if let Err(status) = run_pre_exec(observers) {
            return status;
        }

        let mut coverage = Coverage::new();
        let result = catch_unwind(AssertUnwindSafe(|| {
            (self.harness_fn)(input.as_bytes(), &mut coverage);
        }));

        let execution_status = match result {
            Ok(_) => ExecutionStatus::Ok,
            Err(panic_payload) => {
                let msg = if let Some(s) = panic_payload.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic type".to_string()
                };
                ExecutionStatus::Crash(msg)
            }
        };

        let post_exec_error =
            run_post_exec(observers, &execution_status, Some(&coverage as &dyn Any));

        match post_exec_error {
            Some(error_msg) if execution_status == ExecutionStatus::Ok => {
                ExecutionStatus::ObserverError(error_msg)
            }
            _ => execution_status,
        }
    }
}

pub enum InputDelivery {
    StdIn,
    /// The input is written to a temp file; `{}` in the template is replaced by its path
    /// and the result is split on whitespace into extra arguments.
    File(String),
}

pub struct CommandExecutorConfig {
    pub command: Vec<String>,
    pub input_delivery: InputDelivery,
    pub timeout: Duration,
    pub working_dir: Option<PathBuf>,
}

/// Runs an external instrumented program once per input.
///
/// Non-zero exits and fatal signals are crashes. A run exceeding the configured
/// timeout is killed and reported as `Timeout`. Coverage is read back from the
/// file named in [`COVERAGE_FILE_ENV`].
pub struct CommandExecutor {
    config: CommandExecutorConfig,
}

/// Data captured from one run of a command target.
#[derive(Debug, Default)]
pub struct ProcessOutput {
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub coverage: Coverage,
}

impl CommandExecutor {
    pub fn new(config: CommandExecutorConfig) -> Self {
        Self { config }
    }

    fn run_and_wait_with_timeout(
        &self,
        mut child: Child,
        timeout: Duration,
    ) -> Result<std::process::ExitStatus, ExecutionStatus> {
        let start_time = Instant::now();

        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {
                    if start_time.elapsed() > timeout {
                        if let Err(e) = child.kill() {
                            error!("Failed to kill timed-out child process: {e}");
                            return Err(ExecutionStatus::Other(format!(
                                "Failed to kill timed-out process: {e}",
                            )));
                        }
                        let _ = child.wait();
                        return Err(ExecutionStatus::Timeout);
                    }
                    thread::sleep(CHILD_POLL_INTERVAL);
                }
                Err(e) => {
                    error!("Error waiting for child process: {e}");
                    return Err(ExecutionStatus::Other(format!(
                        "Error waiting for child: {e}",
                    )));
                }
            }
        }
    }

    fn describe_failure(status: &std::process::ExitStatus) -> String {
        if let Some(code) = status.code() {
            return format!("Exited with code {code}");
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return format!("Terminated by signal {signal}");
            }
        }
        "Exited abnormally".to_string()
    }

    fn join_stdin_writer(writer: thread::JoinHandle<std::io::Result<()>>) -> Result<(), String> {
        match writer.join() {
            Ok(Ok(())) => Ok(()),
            // A target that exits without reading its whole input closes the pipe early.
            Ok(Err(e)) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
            Ok(Err(e)) => Err(format!("Failed to write to stdin: {e}")),
            Err(_) => Err("Stdin writer thread panicked".to_string()),
        }
    }

    fn read_coverage_file(file: &tempfile::NamedTempFile) -> Coverage {
        let mut coverage = Coverage::new();
        if let Ok(raw) = fs::read(file.path()) {
            for label in String::from_utf8_lossy(&raw).lines() {
                let label = label.trim();
                if !label.is_empty() {
                    coverage.hit(label);
                }
            }
        }
        coverage
    }

    fn spawn_failed(
        &self,
        observers: &mut [&mut dyn Observer],
        error_msg: String,
    ) -> ExecutionStatus {
        error!("{error_msg}");
        let status_on_fail = ExecutionStatus::Other(error_msg);
        match run_post_exec(observers, &status_on_fail, None) {
            Some(observer_msg) => ExecutionStatus::ObserverError(observer_msg),
            None => status_on_fail,
        }
    }
}

impl<I: Input> Executor<I> for CommandExecutor {
    fn execute_sync(&mut self, input: &I, observers: &mut [&mut dyn Observer]) -> ExecutionStatus {
        if let Err(status) = run_pre_exec(observers) {
            return status;
        }

        let Some(program) = self.config.command.first() else {
            return self.spawn_failed(observers, "Command line is empty".to_string());
        };
        let mut cmd = Command::new(program);
        cmd.args(&self.config.command[1..]);

        if let Some(cwd) = &self.config.working_dir {
            cmd.current_dir(cwd);
        }

        let coverage_file = match tempfile::NamedTempFile::new() {
            Ok(f) => f,
            Err(e) => {
                return self.spawn_failed(
                    observers,
                    format!("Failed to create coverage file: {e}"),
                );
            }
        };
        cmd.env(COVERAGE_FILE_ENV, coverage_file.path());

        let mut temp_file_handle: Option<tempfile::NamedTempFile> = None;

        match &self.config.input_delivery {
            InputDelivery::StdIn => {
                cmd.stdin(Stdio::piped());
            }
            InputDelivery::File(arg_template) => {
                let named_temp_file = match tempfile::NamedTempFile::new() {
                    Ok(f) => f,
                    Err(e) => {
                        return self
                            .spawn_failed(observers, format!("Failed to create temp file: {e}"));
                    }
                };
                if let Err(e) = File::create(named_temp_file.path())
                    .and_then(|mut f| f.write_all(input.as_bytes()))
                {
                    return self.spawn_failed(
                        observers,
                        format!(
                            "Failed to write to temp file {:?}: {}",
                            named_temp_file.path(),
                            e
                        ),
                    );
                }

                let Some(path_str) = named_temp_file.path().to_str().map(str::to_string) else {
                    return self.spawn_failed(
                        observers,
                        "Temp file path is not valid UTF-8".to_string(),
                    );
                };

                let final_arg = arg_template.replace("{}", &path_str);
                for part in final_arg.split_whitespace() {
                    cmd.arg(part);
                }
                cmd.stdin(Stdio::null());
                temp_file_handle = Some(named_temp_file);
            }
        }

        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());

        let mut child_process = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return self.spawn_failed(
                    observers,
                    format!("Failed to spawn command '{:?}': {}", self.config.command, e),
                );
            }
        };

        let stdin_writer = match self.config.input_delivery {
            InputDelivery::StdIn => {
                let Some(mut child_stdin) = child_process.stdin.take() else {
                    let _ = child_process.kill();
                    let _ = child_process.wait();
                    return self.spawn_failed(
                        observers,
                        "Child stdin was not available after piping.".to_string(),
                    );
                };
                let bytes = input.as_bytes().to_vec();
                // The write may block on a full pipe, so it must not run on the thread
                // that enforces the timeout.
                Some(thread::spawn(move || child_stdin.write_all(&bytes)))
            }
            InputDelivery::File(_) => None,
        };

        let exit_status_result = self.run_and_wait_with_timeout(child_process, self.config.timeout);

        let mut process_output_data = ProcessOutput {
            coverage: Self::read_coverage_file(&coverage_file),
            ..Default::default()
        };

        // On timeout the writer is detached: a grandchild may still hold the read end.
        let final_status = match exit_status_result {
            Err(exec_status_from_wait) => exec_status_from_wait,
            Ok(status) => match stdin_writer.map(Self::join_stdin_writer) {
                Some(Err(error_msg)) => {
                    error!("{error_msg}");
                    ExecutionStatus::Other(error_msg)
                }
                _ => {
                    process_output_data.exit_code = status.code();
                    #[cfg(unix)]
                    {
                        use std::os::unix::process::ExitStatusExt;
                        process_output_data.signal = status.signal();
                    }

                    if status.success() {
                        ExecutionStatus::Ok
                    } else {
                        ExecutionStatus::Crash(Self::describe_failure(&status))
                    }
                }
            },
        };

        drop(temp_file_handle);

        let post_exec_error = run_post_exec(
            observers,
            &final_status,
            Some(&process_output_data as &dyn Any),
        );

        match post_exec_error {
            Some(error_msg) if final_status == ExecutionStatus::Ok => {
                ExecutionStatus::ObserverError(error_msg)
            }
            _ => final_status,
        }
    }
}
