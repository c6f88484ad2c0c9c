use crate::executor::ExecutionStatus;
use crate::input::Input;
use tracing::warn;

/// Longest text preview of a crashing input carried in a report.
const PREVIEW_MAX_CHARS: usize = 64;

/// Represents a bug identified by an `Oracle`.
#[derive(Debug, Clone, PartialEq)]
pub struct BugReport<I: Input> {
    /// The specific input that triggered this bug report.
    pub input: I,
    /// A human-readable description of the failure, taken from the execution status.
    pub description: String,
    /// MD5 hex digest of the input, used to name crash files.
    pub input_hash: String,
    /// Lossy text view of the start of the input, for logs.
    pub preview: String,
}

/// An `Oracle` examines the outcome of a target's execution to determine if a bug has occurred.
pub trait Oracle<I: Input>: Send + Sync {
    /// Returns `Some(BugReport)` if `status` for `input` is a bug, otherwise `None`.
    fn examine(&self, input: &I, status: &ExecutionStatus) -> Option<BugReport<I>>;
}

/// Reports a bug when the `ExecutionStatus` is `Crash`.
///
/// Timeouts and runner failures are unresolved executions, not bugs.
#[derive(Debug, Default)]
pub struct CrashOracle;

impl CrashOracle {
    pub fn new() -> Self {
        CrashOracle
    }
}

impl<I> Oracle<I> for CrashOracle
where
    I: Input + Clone,
{
    fn examine(&self, input: &I, status: &ExecutionStatus) -> Option<BugReport<I>> {
        match status {
            ExecutionStatus::Crash(description) => {
                let input_digest = md5::compute(input.as_bytes());
                let preview: String = input
                    .to_lossy_string()
                    .chars()
                    .take(PREVIEW_MAX_CHARS)
                    .collect();
                let report = BugReport {
                    input: input.clone(),
                    description: description.clone(),
                    input_hash: format!("{:x}", input_digest),
                    preview,
                };
                warn!(
                    hash = %report.input_hash,
                    preview = %report.preview,
                    "crash: {}",
                    report.description
                );
                Some(report)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crash_oracle_detects_crash_and_creates_valid_report() {
        let oracle = CrashOracle::new();
        let input_data: Vec<u8> = vec![0xFF, 0xFE, 0xFD];
        let crash_description = "Test panic: Segmentation fault!".to_string();
        let crash_status = ExecutionStatus::Crash(crash_description.clone());

        let bug_report_option = oracle.examine(&input_data, &crash_status);
        assert!(
            bug_report_option.is_some(),
            "Oracle should detect a crash and return Some(BugReport)"
        );

        if let Some(report) = bug_report_option {
            assert_eq!(
                report.input, input_data,
                "Report input should match the original input"
            );
            assert_eq!(
                report.description, crash_description,
                "Report description should match the crash status description"
            );

            let expected_hash = format!("{:x}", md5::compute(input_data.as_bytes()));
            assert_eq!(
                report.input_hash, expected_hash,
                "Report input_hash should be the MD5 hex string of the input"
            );
            assert_eq!(
                report.preview, "\u{FFFD}\u{FFFD}\u{FFFD}",
                "Invalid UTF-8 should be previewed with replacement characters"
            );
        }
    }

    #[test]
    fn crash_oracle_truncates_long_previews() {
        let oracle = CrashOracle::new();
        let input_data: Vec<u8> = vec![b'x'; 500];
        let report = oracle
            .examine(&input_data, &ExecutionStatus::Crash("boom".to_string()))
            .expect("crash should be reported");
        assert_eq!(report.preview.chars().count(), PREVIEW_MAX_CHARS);
    }

    #[test]
    fn crash_oracle_ignores_ok_status() {
        let oracle = CrashOracle::new();
        let input_data: Vec<u8> = vec![0x01, 0x02, 0x03];
        assert!(
            oracle.examine(&input_data, &ExecutionStatus::Ok).is_none(),
            "Oracle should ignore Ok status and return None"
        );
    }

    #[test]
    fn crash_oracle_ignores_unresolved_statuses() {
        let oracle = CrashOracle::new();
        let input_data: Vec<u8> = vec![0xAA, 0xBB, 0xCC];
        for status in [
            ExecutionStatus::Timeout,
            ExecutionStatus::Other("Some other issue".to_string()),
            ExecutionStatus::ObserverError("observer".to_string()),
        ] {
            assert!(
                oracle.examine(&input_data, &status).is_none(),
                "Oracle should ignore {status:?}"
            );
        }
    }
}
