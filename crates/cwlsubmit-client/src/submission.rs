use crate::container::{container_request_spec, redacted};
use crate::error::Result;
use crate::job::{job_request_spec, JobRequest};
use crate::options::RunnerOptions;
use crate::runner::Runner;
use crate::targets::Cluster;
use cwlsubmit_core::model::{RecordState, WorkApi, WorkRecord};
use serde_json::Value;

/// A request body ready to be sent to the cluster.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkRequest {
    Container(Value),
    Job(JobRequest),
}

impl WorkRequest {
    pub fn work_api(&self) -> WorkApi {
        match self {
            WorkRequest::Container(_) => WorkApi::Containers,
            WorkRequest::Job(_) => WorkApi::Jobs,
        }
    }

    pub fn spec(&self) -> &Value {
        match self {
            WorkRequest::Container(spec) => spec,
            WorkRequest::Job(job) => &job.spec,
        }
    }
}

/// Prepares `runner` and builds the request for the selected work API.
pub fn build_request(
    cluster: &dyn Cluster,
    runner: &mut Runner,
    options: &RunnerOptions,
) -> Result<WorkRequest> {
    let request = match options.work_api {
        WorkApi::Containers => {
            WorkRequest::Container(container_request_spec(cluster, runner, options)?)
        }
        WorkApi::Jobs => WorkRequest::Job(job_request_spec(cluster, runner, options)?),
    };
    tracing::debug!(
        "{} request for '{}': {}",
        request.work_api(),
        runner.name,
        redacted(request.spec())
    );
    Ok(request)
}

pub fn create_work(cluster: &dyn Cluster, request: &WorkRequest) -> Result<WorkRecord> {
    match request {
        WorkRequest::Container(spec) => cluster.create_container_request(spec),
        WorkRequest::Job(job) => cluster.create_job(&job.spec, job.find_or_create),
    }
}

/// The uuid completion is reported under: the container for a container
/// request, otherwise the record itself.
pub fn tracking_uuid(record: &WorkRecord) -> &str {
    record.container_uuid.as_deref().unwrap_or(&record.uuid)
}

/// Looks up the current state of submitted work, returning the record to
/// complete with once it has finished.
pub fn resolve_final_record(cluster: &dyn Cluster, uuid: &str) -> Result<Option<WorkRecord>> {
    let record = cluster.get_record(uuid)?;
    if let Some(container_uuid) = &record.container_uuid {
        let container = cluster.get_record(container_uuid)?;
        if container.state.is_terminal() {
            return Ok(Some(container));
        }
        if record.state == RecordState::Final {
            return Ok(Some(record));
        }
        return Ok(None);
    }
    Ok(record.state.is_terminal().then_some(record))
}

/// Current state of submitted work, following a request to its container.
pub fn current_state(cluster: &dyn Cluster, uuid: &str) -> Result<RecordState> {
    let record = cluster.get_record(uuid)?;
    match &record.container_uuid {
        Some(container_uuid) if record.state != RecordState::Final => {
            Ok(cluster.get_record(container_uuid)?.state)
        }
        _ => Ok(record.state),
    }
}
