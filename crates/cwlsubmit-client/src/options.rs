use cwlsubmit_core::{
    config::SubmitConfig,
    constants::ext,
    document::get_feature,
    errors::DomainError,
    model::{OnError, WorkApi},
};
use serde_json::Value;

/// Everything that shapes the submitted runner besides the workflow itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerOptions {
    pub work_api: WorkApi,
    pub name: Option<String>,
    pub project_uuid: Option<String>,
    pub priority: u32,
    pub enable_reuse: bool,
    pub on_error: OnError,
    pub debug: bool,
    pub output_name: Option<String>,
    pub output_tags: Option<String>,
    pub storage_classes: Option<String>,
    pub intermediate_output_ttl: u64,
    pub trash_intermediate: bool,
    pub runner_ram_mb: u64,
    pub collection_cache_mb: u64,
    pub runner_image: String,
    pub eval_timeout: u64,
    pub thread_count: u32,
}

impl RunnerOptions {
    pub fn from_config(config: &SubmitConfig) -> Self {
        Self {
            work_api: config.work_api,
            name: None,
            project_uuid: None,
            priority: config.priority,
            enable_reuse: true,
            on_error: OnError::default(),
            debug: false,
            output_name: None,
            output_tags: None,
            storage_classes: None,
            intermediate_output_ttl: 0,
            trash_intermediate: false,
            runner_ram_mb: config.runner_ram_mb,
            collection_cache_mb: config.collection_cache_mb,
            runner_image: config.runner_image.clone(),
            eval_timeout: config.eval_timeout,
            thread_count: config.thread_count,
        }
    }
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self::from_config(&SubmitConfig::default())
    }
}

/// Runner resources after applying the workflow's hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerResources {
    pub vcpus: u64,
    pub ram_mb: u64,
    pub collection_cache_mb: u64,
    pub enable_reuse: bool,
}

impl RunnerResources {
    /// Bytes of RAM requested for the runner container: runner memory plus
    /// the collection cache.
    pub fn ram_bytes(&self) -> u64 {
        (self.ram_mb + self.collection_cache_mb) * 1024 * 1024
    }
}

fn as_whole_number(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f.ceil() as i64))
}

/// Applies `WorkflowRunnerResources` and `ReuseRequirement` from the top-level
/// process on top of `options`.
pub fn runner_resources(
    options: &RunnerOptions,
    tool: &Value,
) -> Result<RunnerResources, DomainError> {
    let mut resources = RunnerResources {
        vcpus: 1,
        ram_mb: options.runner_ram_mb,
        collection_cache_mb: options.collection_cache_mb,
        enable_reuse: options.enable_reuse,
    };

    if let Some((hint, _)) = get_feature(tool, ext::RUNNER_RESOURCES) {
        if let Some(cores) = hint.get("coresMin").and_then(as_whole_number) {
            resources.vcpus = cores.max(1) as u64;
        }
        if let Some(ram) = hint.get("ramMin").and_then(as_whole_number) {
            if ram <= 0 {
                return Err(DomainError::InvalidRunnerRam(ram));
            }
            resources.ram_mb = ram as u64;
        }
        if let Some(cache) = hint.get("keep_cache").and_then(as_whole_number) {
            resources.collection_cache_mb = cache.max(0) as u64;
        }
    }

    if resources.ram_mb == 0 {
        return Err(DomainError::InvalidRunnerRam(0));
    }

    if let Some((reuse, _)) = get_feature(tool, ext::REUSE_REQUIREMENT) {
        if reuse.get("enableReuse").and_then(Value::as_bool) == Some(false) {
            resources.enable_reuse = false;
        }
    }

    Ok(resources)
}
