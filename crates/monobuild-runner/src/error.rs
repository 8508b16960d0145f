use monobuild_core::ExecutorError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to wait for process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("Failed to prepare output file: {0}")]
    OutputFile(#[source] std::io::Error),

    #[error("Process has no {0} pipe")]
    MissingPipe(&'static str),

    #[error("`{command}` exited with code {code}{}", format_tail(.tail))]
    Exit {
        command: String,
        code: i32,
        tail: Vec<String>,
    },

    #[error("Command timed out after {0} seconds")]
    TimedOut(u64),

    #[error("Command cancelled")]
    Cancelled,
}

fn format_tail(tail: &[String]) -> String {
    if tail.is_empty() {
        String::new()
    } else {
        format!(":\n{}", tail.join("\n"))
    }
}

impl From<RunnerError> for ExecutorError {
    fn from(err: RunnerError) -> Self {
        match err {
            RunnerError::Cancelled => ExecutorError::cancelled(),
            RunnerError::TimedOut(seconds) => ExecutorError::timed_out(seconds),
            other => ExecutorError::with_source(other.to_string(), other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monobuild_core::error::ExecutorErrorKind;

    #[test]
    fn test_exit_error_includes_output_tail() {
        let err = RunnerError::Exit {
            command: "npx tsc".to_string(),
            code: 2,
            tail: vec!["src/index.ts(3,1): error TS1005".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "`npx tsc` exited with code 2:\nsrc/index.ts(3,1): error TS1005"
        );
    }

    #[test]
    fn test_conversion_keeps_kind() {
        let cancelled: ExecutorError = RunnerError::Cancelled.into();
        assert!(cancelled.is_cancelled());

        let timed_out: ExecutorError = RunnerError::TimedOut(5).into();
        assert_eq!(timed_out.kind(), ExecutorErrorKind::TimedOut);

        let failed: ExecutorError = RunnerError::MissingPipe("stdout").into();
        assert_eq!(failed.kind(), ExecutorErrorKind::Failed);
        assert_eq!(failed.message(), "Process has no stdout pipe");
    }
}
