use crate::bundle::Bundle;
use crate::error::Result;
use cwlsubmit_core::model::WorkRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod local;

pub mod infixes {
    pub const COLLECTION: &str = "4zz18";
    pub const CONTAINER_REQUEST: &str = "xvhdp";
    pub const CONTAINER: &str = "dz642";
    pub const JOB: &str = "8i9sb";
}

/// A stored collection as the cluster reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRecord {
    pub uuid: String,
    pub name: String,
    pub portable_data_hash: String,
    pub manifest_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_uuid: Option<String>,
    pub created_at: String,
}

pub trait ClusterInfo {
    fn cluster_id(&self) -> &str;
    fn describe(&self) -> String;
}

/// Content-addressed storage.
pub trait StorageOps {
    fn put_collection(
        &self,
        name: &str,
        owner_uuid: Option<&str>,
        bundle: &Bundle,
    ) -> Result<CollectionRecord>;
    fn get_collection(&self, pdh: &str) -> Result<CollectionRecord>;
    fn read_file(&self, pdh: &str, path: &str) -> Result<Vec<u8>>;
}

pub trait WorkOps {
    fn create_container_request(&self, spec: &Value) -> Result<WorkRecord>;
    fn create_job(&self, spec: &Value, find_or_create: bool) -> Result<WorkRecord>;
    fn get_record(&self, uuid: &str) -> Result<WorkRecord>;
    /// The request body a record was created from.
    fn get_spec(&self, uuid: &str) -> Result<Value>;
}

/// The cluster's container image registry.
pub trait ImageOps {
    /// Returns the portable data hash of the collection holding `image`.
    fn find_image(&self, image: &str) -> Result<Option<String>>;
    fn upload_image(&self, image: &str, owner_uuid: Option<&str>) -> Result<String>;
}

pub trait Cluster: ClusterInfo + StorageOps + WorkOps + ImageOps + Send + Sync {}

impl<T: ClusterInfo + StorageOps + WorkOps + ImageOps + Send + Sync> Cluster for T {}

/// Adds the implicit `latest` tag to an image reference without one.
pub fn image_reference(image: &str) -> String {
    let last = image.rsplit('/').next().unwrap_or(image);
    if last.contains(':') || last.contains('@') {
        image.to_string()
    } else {
        format!("{}:latest", image)
    }
}

/// Finds `image` in the registry, uploading it when it is missing.
pub fn ensure_image(
    cluster: &dyn Cluster,
    image: &str,
    owner_uuid: Option<&str>,
) -> Result<String> {
    let image = image_reference(image);
    if let Some(pdh) = cluster.find_image(&image)? {
        tracing::debug!("Image '{}' already registered as {}", image, pdh);
        return Ok(pdh);
    }
    tracing::info!("Image '{}' not found on cluster, uploading", image);
    cluster.upload_image(&image, owner_uuid)
}

pub(crate) fn record_kind(uuid: &str) -> Option<&'static str> {
    let infix = uuid.split('-').nth(1)?;
    [
        infixes::COLLECTION,
        infixes::CONTAINER_REQUEST,
        infixes::CONTAINER,
        infixes::JOB,
    ]
    .into_iter()
    .find(|known| *known == infix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_reference_adds_latest() {
        assert_eq!(image_reference("debian"), "debian:latest");
        assert_eq!(image_reference("debian:8"), "debian:8");
        assert_eq!(
            image_reference("registry:5000/team/tool"),
            "registry:5000/team/tool:latest"
        );
        assert_eq!(image_reference("alpine@sha256:abc"), "alpine@sha256:abc");
    }

    #[test]
    fn test_record_kind() {
        assert_eq!(
            record_kind("zzzzz-xvhdp-zzzzzzzzzzzzzzz"),
            Some(infixes::CONTAINER_REQUEST)
        );
        assert_eq!(record_kind("zzzzz-8i9sb-zzzzzzzzzzzzzzz"), Some(infixes::JOB));
        assert_eq!(record_kind("not-a-uuid"), None);
        assert_eq!(record_kind("plain"), None);
    }
}
