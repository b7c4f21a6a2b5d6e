use crate::constants::exit_codes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkApi {
    #[default]
    Containers,
    Jobs,
}

impl fmt::Display for WorkApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkApi::Containers => write!(f, "containers"),
            WorkApi::Jobs => write!(f, "jobs"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWorkApiError(pub String);

impl fmt::Display for ParseWorkApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid work API: '{}'. Valid values are: containers, jobs",
            self.0
        )
    }
}

impl std::error::Error for ParseWorkApiError {}

impl FromStr for WorkApi {
    type Err = ParseWorkApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "containers" => Ok(WorkApi::Containers),
            "jobs" => Ok(WorkApi::Jobs),
            _ => Err(ParseWorkApiError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    Stop,
    #[default]
    Continue,
}

impl fmt::Display for OnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OnError::Stop => write!(f, "stop"),
            OnError::Continue => write!(f, "continue"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOnErrorError(pub String);

impl fmt::Display for ParseOnErrorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid on-error policy: '{}'. Valid values are: stop, continue",
            self.0
        )
    }
}

impl std::error::Error for ParseOnErrorError {}

impl FromStr for OnError {
    type Err = ParseOnErrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stop" => Ok(OnError::Stop),
            "continue" => Ok(OnError::Continue),
            _ => Err(ParseOnErrorError(s.to_string())),
        }
    }
}

/// Lifecycle state of a job, container or container request on the cluster.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum RecordState {
    Uncommitted,
    Committed,
    Queued,
    Locked,
    Running,
    Complete,
    Cancelled,
    Failed,
    Final,
    #[serde(other)]
    Unknown,
}

impl RecordState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecordState::Complete | RecordState::Cancelled | RecordState::Failed | RecordState::Final
        )
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecordState::Uncommitted => "Uncommitted",
            RecordState::Committed => "Committed",
            RecordState::Queued => "Queued",
            RecordState::Locked => "Locked",
            RecordState::Running => "Running",
            RecordState::Complete => "Complete",
            RecordState::Cancelled => "Cancelled",
            RecordState::Failed => "Failed",
            RecordState::Final => "Final",
            RecordState::Unknown => "Unknown",
        };
        write!(f, "{}", s)
    }
}

/// The cluster's record of a unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkRecord {
    pub uuid: String,
    pub state: RecordState,
    #[serde(default)]
    pub exit_code: Option<i64>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl WorkRecord {
    pub fn new(uuid: impl Into<String>, state: RecordState) -> Self {
        Self {
            uuid: uuid.into(),
            state,
            exit_code: None,
            output: None,
            container_uuid: None,
            name: None,
        }
    }
}

/// CWL process outcome reported to the output callback.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ProcessStatus {
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "permanentFail")]
    PermanentFail,
    #[serde(rename = "UnsupportedRequirement")]
    UnsupportedRequirement,
}

impl ProcessStatus {
    pub fn from_record(record: &WorkRecord) -> Self {
        if record.state != RecordState::Complete {
            return ProcessStatus::PermanentFail;
        }
        match record.exit_code {
            None | Some(exit_codes::SUCCESS) => ProcessStatus::Success,
            Some(exit_codes::UNSUPPORTED_REQUIREMENT) => ProcessStatus::UnsupportedRequirement,
            Some(_) => ProcessStatus::PermanentFail,
        }
    }

    /// Process exit code used by the CLI for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            ProcessStatus::Success => 0,
            ProcessStatus::UnsupportedRequirement => exit_codes::UNSUPPORTED_REQUIREMENT as i32,
            ProcessStatus::PermanentFail => 1,
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessStatus::Success => write!(f, "success"),
            ProcessStatus::PermanentFail => write!(f, "permanentFail"),
            ProcessStatus::UnsupportedRequirement => write!(f, "UnsupportedRequirement"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(state: RecordState, exit_code: Option<i64>) -> WorkRecord {
        WorkRecord {
            exit_code,
            ..WorkRecord::new("zzzzz-dz642-zzzzzzzzzzzzzzz", state)
        }
    }

    #[test]
    fn test_status_complete_without_exit_code_is_success() {
        let status = ProcessStatus::from_record(&record(RecordState::Complete, None));
        assert_eq!(status, ProcessStatus::Success);
    }

    #[test]
    fn test_status_exit_codes() {
        assert_eq!(
            ProcessStatus::from_record(&record(RecordState::Complete, Some(0))),
            ProcessStatus::Success
        );
        assert_eq!(
            ProcessStatus::from_record(&record(RecordState::Complete, Some(33))),
            ProcessStatus::UnsupportedRequirement
        );
        assert_eq!(
            ProcessStatus::from_record(&record(RecordState::Complete, Some(7))),
            ProcessStatus::PermanentFail
        );
    }

    #[test]
    fn test_status_cancelled_ignores_exit_code() {
        for code in [None, Some(0), Some(33)] {
            assert_eq!(
                ProcessStatus::from_record(&record(RecordState::Cancelled, code)),
                ProcessStatus::PermanentFail
            );
        }
    }

    #[test]
    fn test_status_display_matches_cwl_names() {
        assert_eq!(ProcessStatus::Success.to_string(), "success");
        assert_eq!(ProcessStatus::PermanentFail.to_string(), "permanentFail");
        assert_eq!(
            ProcessStatus::UnsupportedRequirement.to_string(),
            "UnsupportedRequirement"
        );
    }

    #[test]
    fn test_record_deserialize_unknown_state() {
        let rec: WorkRecord =
            serde_json::from_str(r#"{"uuid": "x", "state": "Paused"}"#).unwrap();
        assert_eq!(rec.state, RecordState::Unknown);
        assert_eq!(rec.exit_code, None);
    }

    #[test]
    fn test_work_api_from_str() {
        assert_eq!(WorkApi::from_str("jobs").unwrap(), WorkApi::Jobs);
        assert!(WorkApi::from_str("pipelines").is_err());
    }

    #[test]
    fn test_on_error_from_str() {
        assert_eq!(OnError::from_str("stop").unwrap(), OnError::Stop);
        assert!(OnError::from_str("halt").is_err());
    }
}
