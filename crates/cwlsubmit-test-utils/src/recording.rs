use cwlsubmit_client::{
    bundle::Bundle,
    error::Result,
    targets::{
        local::LocalCluster, ClusterInfo, CollectionRecord, ImageOps, StorageOps, WorkOps,
    },
};
use cwlsubmit_core::model::WorkRecord;
use serde_json::Value;
use std::sync::Mutex;

/// A collection stored through [`RecordingCluster`].
#[derive(Debug, Clone)]
pub struct StoredBundle {
    pub name: String,
    pub paths: Vec<String>,
    pub record: CollectionRecord,
}

/// Wraps a [`LocalCluster`], remembering every collection stored and every
/// request body created.
pub struct RecordingCluster {
    pub inner: LocalCluster,
    collections: Mutex<Vec<StoredBundle>>,
    specs: Mutex<Vec<Value>>,
}

impl RecordingCluster {
    pub fn new(inner: LocalCluster) -> Self {
        Self {
            inner,
            collections: Mutex::new(Vec::new()),
            specs: Mutex::new(Vec::new()),
        }
    }

    pub fn collections(&self) -> Vec<StoredBundle> {
        self.collections.lock().expect("collections lock").clone()
    }

    /// Collections whose name starts with `prefix`.
    pub fn collections_named(&self, prefix: &str) -> Vec<StoredBundle> {
        self.collections()
            .into_iter()
            .filter(|c| c.name.starts_with(prefix))
            .collect()
    }

    pub fn specs(&self) -> Vec<Value> {
        self.specs.lock().expect("specs lock").clone()
    }
}

impl ClusterInfo for RecordingCluster {
    fn cluster_id(&self) -> &str {
        self.inner.cluster_id()
    }

    fn describe(&self) -> String {
        format!("recording {}", self.inner.describe())
    }
}

impl StorageOps for RecordingCluster {
    fn put_collection(
        &self,
        name: &str,
        owner_uuid: Option<&str>,
        bundle: &Bundle,
    ) -> Result<CollectionRecord> {
        let record = self.inner.put_collection(name, owner_uuid, bundle)?;
        self.collections
            .lock()
            .expect("collections lock")
            .push(StoredBundle {
                name: name.to_string(),
                paths: bundle.files().map(|(path, _)| path.to_string()).collect(),
                record: record.clone(),
            });
        Ok(record)
    }

    fn get_collection(&self, pdh: &str) -> Result<CollectionRecord> {
        self.inner.get_collection(pdh)
    }

    fn read_file(&self, pdh: &str, path: &str) -> Result<Vec<u8>> {
        self.inner.read_file(pdh, path)
    }
}

impl WorkOps for RecordingCluster {
    fn create_container_request(&self, spec: &Value) -> Result<WorkRecord> {
        self.specs.lock().expect("specs lock").push(spec.clone());
        self.inner.create_container_request(spec)
    }

    fn create_job(&self, spec: &Value, find_or_create: bool) -> Result<WorkRecord> {
        self.specs.lock().expect("specs lock").push(spec.clone());
        self.inner.create_job(spec, find_or_create)
    }

    fn get_record(&self, uuid: &str) -> Result<WorkRecord> {
        self.inner.get_record(uuid)
    }

    fn get_spec(&self, uuid: &str) -> Result<Value> {
        self.inner.get_spec(uuid)
    }
}

impl ImageOps for RecordingCluster {
    fn find_image(&self, image: &str) -> Result<Option<String>> {
        self.inner.find_image(image)
    }

    fn upload_image(&self, image: &str, owner_uuid: Option<&str>) -> Result<String> {
        self.inner.upload_image(image, owner_uuid)
    }
}
