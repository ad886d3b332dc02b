//! Control-surface error types.

use thiserror::Error;

use super::CompileError;

/// Errors returned by the supervisor's public control operations.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Execution not found")]
    NotFound,
    #[error("Not authorized to access this execution")]
    NotAuthorized,
    #[error("Execution already reached a terminal state")]
    AlreadyTerminal,
    #[error("Execution already has a pending human request")]
    AlreadyPending,
    #[error("Human request is no longer pending")]
    NotPending,
    #[error("Human response timed out after {timeout_secs}s")]
    TimedOut { timeout_secs: u64 },
    #[error("Max nesting depth ({max}) exceeded")]
    NestingDepthExceeded { max: u32 },
    #[error("Sub-workflow cycle: workflow '{workflow_id}' is already in the parent chain")]
    SubworkflowCycle { workflow_id: String },
    #[error("Execution was cancelled")]
    ExecutionCancelled,
    #[error("Sub-workflow failed: {0}")]
    SubworkflowFailed(String),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("Storage error: {0}")]
    Storage(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_error_display() {
        assert_eq!(ControlError::NotFound.to_string(), "Execution not found");
        assert_eq!(
            ControlError::TimedOut { timeout_secs: 60 }.to_string(),
            "Human response timed out after 60s"
        );
        assert_eq!(
            ControlError::SubworkflowCycle {
                workflow_id: "wf-1".into()
            }
            .to_string(),
            "Sub-workflow cycle: workflow 'wf-1' is already in the parent chain"
        );
    }

    #[test]
    fn test_from_compile_error() {
        let err: ControlError = CompileError::NoEntry.into();
        assert!(matches!(err, ControlError::Compile(CompileError::NoEntry)));
    }
}
