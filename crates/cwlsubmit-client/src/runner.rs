use crate::error::Result;
use crate::loader::{cwd_uri, DocumentLoader};
use crate::pathmapper::{upload_dependencies, PathMapper};
use crate::process::{upload_docker, Process, ProcessDoc};
use crate::submission::tracking_uuid;
use crate::targets::Cluster;
use cwlsubmit_core::{
    constants::{files, prefixes},
    document::{adjust_dir_objs, adjust_file_and_dir_objs, process_name},
    errors::ConfigError,
    model::{ProcessStatus, WorkApi, WorkRecord},
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub type OutputCallback<'a> = dyn FnMut(Option<Value>, ProcessStatus) + 'a;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub name: String,
    pub work_api: WorkApi,
}

/// Work submitted to the cluster whose completion has not been handled yet.
#[derive(Debug, Default)]
pub struct ProcessTable {
    entries: HashMap<String, ProcessEntry>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, uuid: impl Into<String>, entry: ProcessEntry) {
        self.entries.insert(uuid.into(), entry);
    }

    pub fn get(&self, uuid: &str) -> Option<&ProcessEntry> {
        self.entries.get(uuid)
    }

    pub fn contains(&self, uuid: &str) -> bool {
        self.entries.contains_key(uuid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns false, and logs, when `uuid` was not in the table.
    pub fn remove(&mut self, uuid: &str) -> bool {
        if self.entries.remove(uuid).is_some() {
            true
        } else {
            tracing::warn!(
                "Completion for '{}' arrived but it is not in the process table",
                uuid
            );
            false
        }
    }
}

/// Removes a process-table entry when dropped, including during unwinding.
struct TableEntryGuard<'a> {
    table: &'a mut ProcessTable,
    uuid: &'a str,
}

impl Drop for TableEntryGuard<'_> {
    fn drop(&mut self) {
        self.table.remove(self.uuid);
    }
}

/// The submission of one workflow with its job order.
pub struct Runner {
    pub tool: Process,
    pub job_order: Value,
    pub enable_reuse: bool,
    /// Set once the work has been created on the cluster. Informational.
    pub running: bool,
    pub uuid: Option<String>,
    pub name: String,
    loader: Arc<dyn DocumentLoader>,
}

impl Runner {
    pub fn new(
        tool: Process,
        job_order: Value,
        enable_reuse: bool,
        loader: Arc<dyn DocumentLoader>,
    ) -> Self {
        let name = process_name(tool.id());
        Self {
            tool,
            job_order,
            enable_reuse,
            running: false,
            uuid: None,
            name,
            loader,
        }
    }

    pub fn loader(&self) -> &dyn DocumentLoader {
        self.loader.as_ref()
    }

    /// Uploads images and dependencies, leaving the tool and job order
    /// pointing only at storage. Returns the workflow's mapping.
    pub fn prepare(&mut self, cluster: &dyn Cluster, owner_uuid: Option<&str>) -> Result<PathMapper> {
        upload_docker(cluster, &mut self.tool, owner_uuid)?;

        let tool_id = self.tool.id().to_string();
        let workflow_mapper = upload_dependencies(
            cluster,
            &format!("{} dependencies", self.name),
            self.loader.as_ref(),
            self.tool.doc_mut(),
            &tool_id,
            true,
            owner_uuid,
        )?;

        let mut nested_failure = None;
        self.tool.visit_mut(&mut |process: &mut ProcessDoc| {
            if nested_failure.is_none() {
                if let Err(e) = workflow_mapper.rewrite(&mut process.doc, &process.base) {
                    nested_failure = Some(e);
                }
            }
        });
        if let Some(e) = nested_failure {
            return Err(e);
        }

        let job_uri = match self.job_order.get("id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => cwd_uri()?,
        };
        upload_dependencies(
            cluster,
            &format!("{} input", self.name),
            self.loader.as_ref(),
            &mut self.job_order,
            &job_uri,
            false,
            owner_uuid,
        )?;

        adjust_dir_objs(&mut self.job_order, |dir| {
            let stored = dir
                .get("location")
                .and_then(Value::as_str)
                .is_some_and(|l| l.starts_with(prefixes::STORAGE));
            if stored {
                dir.remove("listing");
            }
        });

        if let Value::Object(map) = &mut self.job_order {
            map.remove("id");
        }

        Ok(workflow_mapper)
    }

    /// Handles a finished record. See [`handle_completion`].
    pub fn done(
        &self,
        cluster: &dyn Cluster,
        record: &WorkRecord,
        processes: &mut ProcessTable,
        output_callback: &mut OutputCallback<'_>,
    ) -> ProcessStatus {
        handle_completion(cluster, record, processes, output_callback)
    }
}

/// Maps a finished record to a CWL outcome, gathers its output object and
/// hands both to `output_callback` exactly once.
///
/// Failures while gathering outputs are logged and yield `None` outputs.
/// The record's process-table entry is removed whatever happens, even if
/// the callback panics.
pub fn handle_completion(
    cluster: &dyn Cluster,
    record: &WorkRecord,
    processes: &mut ProcessTable,
    output_callback: &mut OutputCallback<'_>,
) -> ProcessStatus {
    let _entry = TableEntryGuard {
        table: processes,
        uuid: tracking_uuid(record),
    };

    let status = ProcessStatus::from_record(record);
    tracing::info!("{} finished: {} ({})", record.uuid, record.state, status);

    let outputs = match record.output.as_deref() {
        Some(output) => match collect_outputs(cluster, output) {
            Ok(outputs) => Some(outputs),
            Err(e) => {
                tracing::error!("While getting final output object: {}", e);
                None
            }
        },
        None => {
            tracing::warn!("{} has no output collection", record.uuid);
            None
        }
    };

    output_callback(outputs, status);
    status
}

/// Reads the output object from an output collection, qualifying each
/// relative `location` with the collection's address.
pub fn collect_outputs(cluster: &dyn Cluster, output_pdh: &str) -> Result<Value> {
    let data = cluster.read_file(output_pdh, files::OUTPUT_OBJECT)?;
    let mut outputs: Value = serde_json::from_slice(&data).map_err(ConfigError::Json)?;
    adjust_file_and_dir_objs(&mut outputs, |obj| {
        let qualified = match obj.get("location").and_then(Value::as_str) {
            Some(location) if !location.starts_with(prefixes::STORAGE) => {
                format!("{}{}/{}", prefixes::STORAGE, output_pdh, location)
            }
            _ => return,
        };
        obj.insert("location".to_string(), Value::String(qualified));
    });
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::Bundle;
    use crate::loader::FsLoader;
    use crate::targets::{local::LocalCluster, StorageOps};
    use cwlsubmit_core::config::ClusterConfig;
    use cwlsubmit_core::model::RecordState;
    use serde_json::json;
    use tempfile::tempdir;

    fn cluster(base: &std::path::Path) -> LocalCluster {
        LocalCluster::new(&ClusterConfig {
            base_path: base.to_path_buf(),
            cluster_id: "zzzzz".to_string(),
            docker_bin: "docker".to_string(),
        })
        .unwrap()
    }

    fn record(state: RecordState, exit_code: Option<i64>, output: Option<&str>) -> WorkRecord {
        WorkRecord {
            exit_code,
            output: output.map(str::to_string),
            ..WorkRecord::new("zzzzz-dz642-zzzzzzzzzzzzzzz", state)
        }
    }

    fn table_with(uuid: &str) -> ProcessTable {
        let mut table = ProcessTable::new();
        table.insert(
            uuid,
            ProcessEntry {
                name: "wf".to_string(),
                work_api: WorkApi::Containers,
            },
        );
        table
    }

    #[test]
    fn test_completion_qualifies_output_locations() {
        let dir = tempdir().unwrap();
        let cluster = cluster(dir.path());
        let mut bundle = Bundle::new();
        bundle.add_file(
            files::OUTPUT_OBJECT,
            serde_json::to_vec(&json!({
                "out": {"class": "File", "location": "foo.txt"},
                "kept": {"class": "File",
                         "location": "storage:99999999999999999999999999999998+99/x"},
                "d": {"class": "Directory", "location": "sub"}
            }))
            .unwrap(),
        );
        let pdh = cluster
            .put_collection("output", None, &bundle)
            .unwrap()
            .portable_data_hash;

        let rec = record(RecordState::Complete, Some(0), Some(&pdh));
        let mut table = table_with(&rec.uuid);
        let mut seen = Vec::new();
        let status = handle_completion(&cluster, &rec, &mut table, &mut |out, status| {
            seen.push((out, status))
        });

        assert_eq!(status, ProcessStatus::Success);
        assert!(table.is_empty());
        assert_eq!(seen.len(), 1);
        let outputs = seen[0].0.clone().unwrap();
        assert_eq!(outputs["out"]["location"], format!("storage:{}/foo.txt", pdh));
        assert_eq!(outputs["d"]["location"], format!("storage:{}/sub", pdh));
        assert_eq!(
            outputs["kept"]["location"],
            "storage:99999999999999999999999999999998+99/x"
        );
    }

    #[test]
    fn test_completion_survives_unreadable_output() {
        let dir = tempdir().unwrap();
        let cluster = cluster(dir.path());
        let rec = record(
            RecordState::Complete,
            Some(33),
            Some("99999999999999999999999999999998+99"),
        );
        let mut table = table_with(&rec.uuid);
        let mut calls = Vec::new();
        let status = handle_completion(&cluster, &rec, &mut table, &mut |out, status| {
            calls.push((out, status))
        });

        assert_eq!(status, ProcessStatus::UnsupportedRequirement);
        assert_eq!(calls, vec![(None, ProcessStatus::UnsupportedRequirement)]);
        assert!(!table.contains(&rec.uuid));
    }

    #[test]
    fn test_completion_removes_entry_when_callback_panics() {
        let dir = tempdir().unwrap();
        let cluster = cluster(dir.path());
        let rec = record(RecordState::Cancelled, None, None);
        let mut table = table_with(&rec.uuid);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            handle_completion(&cluster, &rec, &mut table, &mut |_, _| {
                panic!("callback failed")
            })
        }));
        assert!(result.is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn test_duplicate_completion_reinvokes_callback() {
        let dir = tempdir().unwrap();
        let cluster = cluster(dir.path());
        let rec = record(RecordState::Complete, Some(7), None);
        let mut table = table_with(&rec.uuid);
        let mut statuses = Vec::new();

        for _ in 0..2 {
            handle_completion(&cluster, &rec, &mut table, &mut |_, status| {
                statuses.push(status)
            });
        }
        assert_eq!(
            statuses,
            vec![ProcessStatus::PermanentFail, ProcessStatus::PermanentFail]
        );
        assert!(table.is_empty());
    }

    #[test]
    fn test_final_request_removes_its_container_entry() {
        let dir = tempdir().unwrap();
        let cluster = cluster(dir.path());
        let rec = WorkRecord {
            container_uuid: Some("zzzzz-dz642-000000000000001".to_string()),
            ..WorkRecord::new("zzzzz-xvhdp-000000000000001", RecordState::Final)
        };
        let mut table = table_with("zzzzz-dz642-000000000000001");
        table.insert(
            "zzzzz-dz642-000000000000002",
            ProcessEntry {
                name: "other".to_string(),
                work_api: WorkApi::Containers,
            },
        );

        let status = handle_completion(&cluster, &rec, &mut table, &mut |_, _| {});
        assert_eq!(status, ProcessStatus::PermanentFail);
        assert!(!table.contains("zzzzz-dz642-000000000000001"));
        assert!(table.contains("zzzzz-dz642-000000000000002"));
    }

    #[test]
    fn test_process_table_remove_missing() {
        let mut table = ProcessTable::new();
        assert!(!table.remove("zzzzz-xvhdp-000000000000000"));
    }

    #[test]
    fn test_runner_name_is_tool_basename() {
        let dir = tempdir().unwrap();
        let tool_path = dir.path().join("submit_tool.cwl");
        fs_err::write(&tool_path, "class: CommandLineTool\n").unwrap();
        let loader: Arc<dyn DocumentLoader> = Arc::new(FsLoader::new());
        let uri = crate::loader::path_to_uri(&tool_path).unwrap();
        let tool = crate::process::load_process(loader.as_ref(), &uri).unwrap();

        let runner = Runner::new(tool, json!({}), true, loader);
        assert_eq!(runner.name, "submit_tool.cwl");
        assert!(!runner.running);
    }
}
