use crate::{
    error::Result,
    loader::{path_to_uri, DocumentLoader, FsLoader},
    options::RunnerOptions,
    process::load_process,
    runner::{collect_outputs, ProcessEntry, ProcessTable, Runner},
    submission::{self, WorkRequest},
    targets::Cluster,
};
use cwlsubmit_core::{
    constants::prefixes,
    model::{ProcessStatus, RecordState, WorkApi, WorkRecord},
};
use serde_json::Value;
use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc::Sender,
    Arc, Mutex, MutexGuard, PoisonError,
};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub enum ClientEvent {
    UploadingDependencies { name: String },
    BuildingRequest { work_api: WorkApi },
    Submitted { uuid: String, work_api: WorkApi },
    StateChanged { uuid: String, state: RecordState },
    Finished { uuid: String, status: ProcessStatus },
}

pub struct SubmitOptions {
    pub runner: RunnerOptions,
    pub wait: bool,
    pub poll_interval: Duration,
    pub event_sender: Option<Sender<ClientEvent>>,
    /// Set from another thread to stop waiting. The submitted work keeps
    /// running on the cluster.
    pub stop: Option<Arc<AtomicBool>>,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            runner: RunnerOptions::default(),
            wait: true,
            poll_interval: Duration::from_secs(5),
            event_sender: None,
            stop: None,
        }
    }
}

/// Result of a submission. `status` and `outputs` are only set when the
/// client waited for the work to finish.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitOutcome {
    pub uuid: String,
    pub work_api: WorkApi,
    pub status: Option<ProcessStatus>,
    pub outputs: Option<Value>,
}

#[derive(Clone)]
pub struct Client {
    pub(crate) cluster: Arc<dyn Cluster>,
    pub(crate) loader: Arc<dyn DocumentLoader>,
    pub(crate) processes: Arc<Mutex<ProcessTable>>,
}

impl Client {
    pub fn new(cluster: Arc<dyn Cluster>) -> Self {
        let loader = Arc::new(FsLoader::with_storage(cluster.clone()));
        Self::with_loader(cluster, loader)
    }

    pub fn with_loader(cluster: Arc<dyn Cluster>, loader: Arc<dyn DocumentLoader>) -> Self {
        Self {
            cluster,
            loader,
            processes: Arc::new(Mutex::new(ProcessTable::new())),
        }
    }

    pub fn cluster(&self) -> &dyn Cluster {
        self.cluster.as_ref()
    }

    fn processes(&self) -> MutexGuard<'_, ProcessTable> {
        self.processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pending_count(&self) -> usize {
        self.processes().len()
    }

    /// Loads the workflow at `tool` (a local path or a storage address) into
    /// a runner for `job_order`.
    pub fn load_runner(&self, tool: &str, job_order: Value, enable_reuse: bool) -> Result<Runner> {
        let uri = if tool.starts_with(prefixes::STORAGE) {
            tool.to_string()
        } else {
            path_to_uri(Path::new(tool))?
        };
        tracing::debug!("Loading workflow from '{}'", uri);
        let process = load_process(self.loader.as_ref(), &uri)?;
        Ok(Runner::new(process, job_order, enable_reuse, self.loader.clone()))
    }

    pub fn submit(&self, runner: &mut Runner, options: SubmitOptions) -> Result<SubmitOutcome> {
        let send = |event: ClientEvent| {
            if let Some(sender) = &options.event_sender {
                let _ = sender.send(event);
            }
        };

        send(ClientEvent::UploadingDependencies {
            name: runner.name.clone(),
        });
        send(ClientEvent::BuildingRequest {
            work_api: options.runner.work_api,
        });
        let request = submission::build_request(self.cluster(), runner, &options.runner)?;
        let record = submission::create_work(self.cluster(), &request)?;
        let tracked = submission::tracking_uuid(&record).to_string();

        runner.uuid = Some(record.uuid.clone());
        runner.running = true;
        self.processes().insert(
            tracked.clone(),
            ProcessEntry {
                name: runner.name.clone(),
                work_api: request.work_api(),
            },
        );
        tracing::info!(
            "Submitted {} as {} (tracking {})",
            runner.name,
            record.uuid,
            tracked
        );
        send(ClientEvent::Submitted {
            uuid: record.uuid.clone(),
            work_api: request.work_api(),
        });

        let mut outcome = SubmitOutcome {
            uuid: record.uuid.clone(),
            work_api: request.work_api(),
            status: None,
            outputs: None,
        };
        if !options.wait {
            return Ok(outcome);
        }

        let stop = options.stop.clone();
        let Some(finished) = self.wait_for_record(
            &record.uuid,
            options.poll_interval,
            stop.as_deref(),
            &send,
        )?
        else {
            tracing::info!("Stopped waiting for {}", record.uuid);
            return Ok(outcome);
        };

        let mut final_outputs = None;
        let status = runner.done(
            self.cluster(),
            &finished,
            &mut self.processes(),
            &mut |outputs, _| final_outputs = outputs,
        );
        send(ClientEvent::Finished {
            uuid: record.uuid.clone(),
            status,
        });
        outcome.status = Some(status);
        outcome.outputs = final_outputs;
        Ok(outcome)
    }

    /// Polls until the work behind `uuid` reaches a terminal state. Returns
    /// `None` if `stop` was raised first.
    pub fn wait_for_record(
        &self,
        uuid: &str,
        poll_interval: Duration,
        stop: Option<&AtomicBool>,
        send: &dyn Fn(ClientEvent),
    ) -> Result<Option<WorkRecord>> {
        let stopped = || stop.is_some_and(|flag| flag.load(Ordering::SeqCst));
        let mut last_state = None;
        loop {
            if stopped() {
                return Ok(None);
            }
            if let Some(record) = submission::resolve_final_record(self.cluster(), uuid)? {
                return Ok(Some(record));
            }
            let state = submission::current_state(self.cluster(), uuid)?;
            if last_state != Some(state) {
                tracing::debug!("{} is {}", uuid, state);
                send(ClientEvent::StateChanged {
                    uuid: uuid.to_string(),
                    state,
                });
                last_state = Some(state);
            }

            let deadline = Instant::now() + poll_interval;
            while Instant::now() < deadline {
                if stopped() {
                    return Ok(None);
                }
                std::thread::sleep(Duration::from_millis(100).min(poll_interval));
            }
        }
    }

    pub fn get_record(&self, uuid: &str) -> Result<WorkRecord> {
        self.cluster.get_record(uuid)
    }

    pub fn get_state(&self, uuid: &str) -> Result<RecordState> {
        submission::current_state(self.cluster(), uuid)
    }

    /// The finished record for `uuid`, or `None` while it is still running.
    pub fn get_final_record(&self, uuid: &str) -> Result<Option<WorkRecord>> {
        submission::resolve_final_record(self.cluster(), uuid)
    }

    /// Output object of finished work, with locations qualified by the output
    /// collection.
    pub fn collect(&self, uuid: &str) -> Result<Option<Value>> {
        let Some(record) = self.get_final_record(uuid)? else {
            return Ok(None);
        };
        match &record.output {
            Some(output) => Ok(Some(collect_outputs(self.cluster(), output)?)),
            None => Ok(None),
        }
    }

    /// Builds the request without creating work, for inspection.
    pub fn build_request(&self, runner: &mut Runner, options: &RunnerOptions) -> Result<WorkRequest> {
        submission::build_request(self.cluster(), runner, options)
    }
}
