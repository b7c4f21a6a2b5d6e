use crate::error::Result;
use crate::options::{runner_resources, RunnerOptions, RunnerResources};
use crate::pack::pack;
use crate::runner::Runner;
use crate::targets::{ensure_image, Cluster};
use cwlsubmit_core::{
    constants::{ext, mounts, runner, states},
    document::get_feature,
    errors::DomainError,
    manifest::StorageAddress,
};
use serde_json::{json, Map, Value};

/// Short input names declared secret by the process's `Secrets` hint.
pub fn secret_inputs(tool: &Value) -> Vec<String> {
    let Some((secrets, _)) = get_feature(tool, ext::SECRETS) else {
        return Vec::new();
    };
    secrets
        .get("secrets")
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(Value::as_str)
                .map(|id| {
                    id.rsplit(['/', '#'])
                        .next()
                        .unwrap_or(id)
                        .to_string()
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Moves secret values out of `job_order` into text mounts, leaving
/// `$include` references to those mounts behind.
pub fn extract_secrets(job_order: &mut Value, secrets: &[String]) -> Result<Map<String, Value>> {
    let mut secret_mounts = Map::new();
    let Value::Object(inputs) = job_order else {
        return Ok(secret_mounts);
    };
    for name in secrets {
        let value = match inputs.get(name) {
            None | Some(Value::Null) => continue,
            Some(Value::String(s)) => s.clone(),
            Some(_) => return Err(DomainError::InvalidSecret(name.clone()).into()),
        };
        let mount = format!("{}/s{}", mounts::SECRETS_DIR, secret_mounts.len());
        secret_mounts.insert(mount.clone(), json!({"kind": "text", "content": value}));
        inputs.insert(name.clone(), json!({"$include": mount}));
    }
    Ok(secret_mounts)
}

/// Copy of a request body safe to log.
pub fn redacted(spec: &Value) -> Value {
    let mut copy = spec.clone();
    if let Some(Value::Object(secret_mounts)) = copy.get_mut("secret_mounts") {
        for mount in secret_mounts.values_mut() {
            if let Some(content) = mount.get_mut("content") {
                *content = json!("<redacted>");
            }
        }
    }
    copy
}

pub fn runner_command(
    options: &RunnerOptions,
    resources: &RunnerResources,
    workflow_path: &str,
) -> Vec<String> {
    let mut command = vec![
        runner::PROGRAM.to_string(),
        "--local".to_string(),
        "--api=containers".to_string(),
        "--no-log-timestamps".to_string(),
        "--disable-validate".to_string(),
        format!("--eval-timeout={}", options.eval_timeout),
        format!("--thread-count={}", options.thread_count),
        if resources.enable_reuse {
            "--enable-reuse".to_string()
        } else {
            "--disable-reuse".to_string()
        },
        format!("--collection-cache-size={}", resources.collection_cache_mb),
    ];
    if let Some(name) = &options.output_name {
        command.push(format!("--output-name={}", name));
    }
    if let Some(tags) = &options.output_tags {
        command.push(format!("--output-tags={}", tags));
    }
    if options.debug {
        command.push("--debug".to_string());
    }
    if let Some(classes) = &options.storage_classes {
        command.push(format!("--storage-classes={}", classes));
    }
    command.push(format!("--on-error={}", options.on_error));
    if options.intermediate_output_ttl > 0 {
        command.push(format!(
            "--intermediate-output-ttl={}",
            options.intermediate_output_ttl
        ));
    }
    if options.trash_intermediate {
        command.push("--trash-intermediate".to_string());
    }
    command.push(workflow_path.to_string());
    command.push(mounts::INPUT_JSON.to_string());
    command
}

/// Prepares `runner` and builds the container request that runs it on the
/// cluster.
pub fn container_request_spec(
    cluster: &dyn Cluster,
    runner: &mut Runner,
    options: &RunnerOptions,
) -> Result<Value> {
    let mut resources = runner_resources(options, runner.tool.doc())?;
    resources.enable_reuse &= runner.enable_reuse;
    let owner = options.project_uuid.as_deref();

    runner.prepare(cluster, owner)?;
    let container_image = ensure_image(cluster, &options.runner_image, owner)?;

    let mut mount_map = Map::new();
    mount_map.insert(
        mounts::OUTPUT_DIR.to_string(),
        json!({"kind": "collection", "writable": true}),
    );
    mount_map.insert(
        mounts::STDOUT.to_string(),
        json!({"kind": "file", "path": mounts::OUTPUT_JSON}),
    );

    let tool_id = runner.tool.id().to_string();
    let workflow_path = if StorageAddress::is_storage_ref(&tool_id) {
        let address = StorageAddress::parse(&tool_id)?;
        mount_map.insert(
            mounts::WORKFLOW_COLLECTION.to_string(),
            json!({"kind": "collection", "portable_data_hash": address.pdh}),
        );
        let mut path = format!(
            "{}/{}",
            mounts::WORKFLOW_COLLECTION,
            address.path.unwrap_or_default()
        );
        if let Some((_, frag)) = tool_id.split_once('#') {
            path.push('#');
            path.push_str(frag);
        }
        path
    } else {
        mount_map.insert(
            mounts::WORKFLOW_JSON.to_string(),
            json!({"kind": "json", "content": pack(&runner.tool)}),
        );
        format!("{}#main", mounts::WORKFLOW_JSON)
    };

    let secrets = secret_inputs(runner.tool.doc());
    let secret_mounts = extract_secrets(&mut runner.job_order, &secrets)?;

    mount_map.insert(
        mounts::INPUT_JSON.to_string(),
        json!({"kind": "json", "content": runner.job_order}),
    );

    let command = runner_command(options, &resources, &workflow_path);
    let name = options.name.clone().unwrap_or_else(|| runner.name.clone());

    let mut spec = json!({
        "name": name,
        "output_path": mounts::OUTPUT_DIR,
        "cwd": mounts::OUTPUT_DIR,
        "priority": options.priority,
        "state": states::COMMITTED,
        "container_image": container_image,
        "mounts": mount_map,
        "secret_mounts": secret_mounts,
        "runtime_constraints": {
            "vcpus": resources.vcpus,
            "ram": resources.ram_bytes(),
            "API": true,
        },
        "use_existing": resources.enable_reuse,
        "properties": {},
        "command": command,
    });
    if let Value::Object(map) = &mut spec {
        if let Some(owner) = owner {
            map.insert("owner_uuid".to_string(), json!(owner));
        }
        if let Some(output_name) = &options.output_name {
            map.insert("output_name".to_string(), json!(output_name));
        }
    }
    Ok(spec)
}
