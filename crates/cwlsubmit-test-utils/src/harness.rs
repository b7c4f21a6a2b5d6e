use crate::fixtures::Fixtures;
use cwlsubmit_client::{
    bundle::Bundle,
    targets::{local::LocalCluster, StorageOps, WorkOps},
};
use cwlsubmit_core::{
    config::ClusterConfig,
    constants::files,
    model::{RecordState, WorkRecord},
};
use serde_json::Value;
use std::fs;
use std::path::PathBuf;

pub const CLUSTER_ID: &str = "zzzzz";
pub const RUNNER_IMAGE: &str = "cwlsubmit/jobs:test";
pub const TOOL_IMAGE: &str = "debian:8";

pub struct TestContext {
    pub _temp_dir: tempfile::TempDir,
    pub test_root: PathBuf,
    pub config_dir: PathBuf,
    pub cluster_dir: PathBuf,
    pub fixtures: Fixtures,
}

impl TestContext {
    /// A fresh cluster directory with the fixture workflow written out and
    /// both the runner and tool images registered.
    pub fn new() -> Self {
        let temp_dir = tempfile::Builder::new()
            .prefix("cwlsubmit-test-")
            .tempdir()
            .expect("Failed to create temp dir");
        let test_root = temp_dir.path().to_path_buf();

        let config_dir = test_root.join("config");
        let cluster_dir = test_root.join("cluster");
        let app_config_dir = config_dir.join("cwlsubmit");
        fs::create_dir_all(&app_config_dir).expect("Failed to create config dir");
        fs::create_dir_all(&cluster_dir).expect("Failed to create cluster dir");

        let config_content = format!(
            r#"
[cluster]
base_path = "{}"
cluster_id = "{}"
docker_bin = "false"

[submit]
runner_image = "{}"
poll_interval_secs = 1
"#,
            cluster_dir.display(),
            CLUSTER_ID,
            RUNNER_IMAGE
        );
        fs::write(app_config_dir.join("config.toml"), config_content)
            .expect("Failed to write temp config");

        let fixtures = Fixtures::write(&test_root);
        let context = Self {
            _temp_dir: temp_dir,
            test_root,
            config_dir,
            cluster_dir,
            fixtures,
        };
        context.register_image(RUNNER_IMAGE);
        context.register_image(TOOL_IMAGE);
        context
    }

    pub fn cluster_config(&self) -> ClusterConfig {
        ClusterConfig {
            base_path: self.cluster_dir.clone(),
            cluster_id: CLUSTER_ID.to_string(),
            docker_bin: "false".to_string(),
        }
    }

    pub fn cluster(&self) -> LocalCluster {
        LocalCluster::new(&self.cluster_config()).expect("Failed to open local cluster")
    }

    /// Stores a stand-in image tarball and registers it under `image`.
    pub fn register_image(&self, image: &str) -> String {
        let cluster = self.cluster();
        let mut bundle = Bundle::new();
        bundle.add_file(format!("{}.tar", image.replace([':', '/'], "_")), image.as_bytes().to_vec());
        let collection = cluster
            .put_collection(&format!("Docker image {}", image), None, &bundle)
            .expect("Failed to store image collection");
        cluster
            .register_image(image, &collection.portable_data_hash)
            .expect("Failed to register image");
        collection.portable_data_hash
    }

    /// Plays the dispatcher: finishes the container or job `uuid` with
    /// `exit_code`, storing `outputs` as its output object.
    pub fn finish(&self, uuid: &str, exit_code: i64, outputs: &Value) -> String {
        let cluster = self.cluster();
        let mut bundle = Bundle::new();
        bundle.add_file(
            files::OUTPUT_OBJECT,
            serde_json::to_vec(outputs).expect("Outputs must serialize"),
        );
        let collection = cluster
            .put_collection("output", None, &bundle)
            .expect("Failed to store outputs");

        let current = cluster.get_record(uuid).expect("Record must exist");
        let record = WorkRecord {
            state: RecordState::Complete,
            exit_code: Some(exit_code),
            output: Some(collection.portable_data_hash.clone()),
            ..current
        };
        cluster.update_record(&record).expect("Failed to update record");
        collection.portable_data_hash
    }

    pub fn set_state(&self, uuid: &str, state: RecordState) {
        let cluster = self.cluster();
        let current = cluster.get_record(uuid).expect("Record must exist");
        cluster
            .update_record(&WorkRecord { state, ..current })
            .expect("Failed to update record");
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
