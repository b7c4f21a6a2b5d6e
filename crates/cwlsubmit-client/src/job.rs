use crate::bundle::Bundle;
use crate::container::secret_inputs;
use crate::error::{ClientError, Result};
use crate::options::{runner_resources, RunnerOptions};
use crate::pack::pack;
use crate::runner::Runner;
use crate::targets::{ensure_image, Cluster};
use cwlsubmit_core::{
    constants::{files, prefixes, runner},
    errors::ConfigError,
};
use serde_json::{json, Value};

/// A job request body plus whether an equivalent finished job may be reused.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub spec: Value,
    pub find_or_create: bool,
}

/// Stores the packed workflow as `workflow.cwl` in its own collection and
/// returns the tool reference the runner script is given.
fn upload_packed_workflow(
    cluster: &dyn Cluster,
    runner: &Runner,
    owner_uuid: Option<&str>,
) -> Result<String> {
    let tool_id = runner.tool.id();
    if let Some(stored) = tool_id.strip_prefix(prefixes::STORAGE) {
        return Ok(stored.to_string());
    }

    let packed = pack(&runner.tool);
    let mut bundle = Bundle::new();
    bundle.add_file(
        files::PACKED_WORKFLOW,
        serde_json::to_vec_pretty(&packed).map_err(ConfigError::Json)?,
    );
    let collection = cluster.put_collection(
        &format!("{} workflow ({})", runner.name, bundle.portable_data_hash()),
        owner_uuid,
        &bundle,
    )?;
    Ok(format!(
        "{}/{}#main",
        collection.portable_data_hash,
        files::PACKED_WORKFLOW
    ))
}

/// Prepares `runner` and builds the legacy job that runs it on the cluster.
///
/// Secret inputs cannot be passed through job parameters, so a workflow
/// declaring any is refused before anything is uploaded.
pub fn job_request_spec(
    cluster: &dyn Cluster,
    runner: &mut Runner,
    options: &RunnerOptions,
) -> Result<JobRequest> {
    if !secret_inputs(runner.tool.doc()).is_empty() {
        return Err(ClientError::UnsupportedRequirement(
            "secret inputs are not supported with the jobs API".to_string(),
        ));
    }

    let mut resources = runner_resources(options, runner.tool.doc())?;
    resources.enable_reuse &= runner.enable_reuse;
    let owner = options.project_uuid.as_deref();

    runner.prepare(cluster, owner)?;
    let tool_ref = upload_packed_workflow(cluster, runner, owner)?;
    let docker_image = ensure_image(cluster, &options.runner_image, owner)?;

    let mut parameters = match &runner.job_order {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    parameters.insert("cwl:tool".to_string(), json!(tool_ref));
    parameters.insert("arv:enable_reuse".to_string(), json!(resources.enable_reuse));
    parameters.insert("arv:on_error".to_string(), json!(options.on_error.to_string()));
    if options.debug {
        parameters.insert("arv:debug".to_string(), json!(true));
    }
    if let Some(output_name) = &options.output_name {
        parameters.insert("arv:output_name".to_string(), json!(output_name));
    }
    if let Some(output_tags) = &options.output_tags {
        parameters.insert("arv:output_tags".to_string(), json!(output_tags));
    }

    let mut spec = json!({
        "name": options.name.clone().unwrap_or_else(|| runner.name.clone()),
        "script": runner::PROGRAM,
        "script_version": runner::SCRIPT_VERSION,
        "repository": runner::REPOSITORY,
        "script_parameters": parameters,
        "runtime_constraints": {
            "docker_image": docker_image,
            "min_ram_mb_per_node": resources.ram_mb,
        },
    });
    if let (Some(owner), Value::Object(map)) = (owner, &mut spec) {
        map.insert("owner_uuid".to_string(), json!(owner));
    }

    Ok(JobRequest {
        spec,
        find_or_create: resources.enable_reuse,
    })
}
