use cwlsubmit_client::error::ClientError;
use cwlsubmit_core::model::ProcessStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] cwlsubmit_core::errors::ConfigError),

    #[error(transparent)]
    Domain(#[from] cwlsubmit_core::errors::DomainError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("'{uuid}' finished with status {status}")]
    WorkflowFailed { uuid: String, status: ProcessStatus },

    #[error("'{0}' has not finished yet. Check again later with 'cwl-submit status'.")]
    NotFinished(String),

    #[error("Execution failed: {message}\nSummary: {log_summary}")]
    ExecutionFailed { message: String, log_summary: String },
}

impl CliError {
    /// Process exit code for this error: 33 when the workflow needs something
    /// the cluster does not support, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::WorkflowFailed { status, .. } => status.exit_code(),
            CliError::Client(ClientError::UnsupportedRequirement(_)) => {
                ProcessStatus::UnsupportedRequirement.exit_code()
            }
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let unsupported = CliError::Client(ClientError::UnsupportedRequirement("secrets".into()));
        assert_eq!(unsupported.exit_code(), 33);

        let failed = CliError::WorkflowFailed {
            uuid: "zzzzz-dz642-000000000000000".to_string(),
            status: ProcessStatus::PermanentFail,
        };
        assert_eq!(failed.exit_code(), 1);

        assert_eq!(CliError::NotFinished("x".to_string()).exit_code(), 1);
    }
}
