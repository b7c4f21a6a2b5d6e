use super::{
    image_reference, infixes, record_kind, ClusterInfo, CollectionRecord, ImageOps, StorageOps,
    WorkOps,
};
use crate::bundle::Bundle;
use crate::error::{ClientError, Result};
use cwlsubmit_core::{
    config::ClusterConfig,
    errors::{ConfigError, DomainError},
    manifest::{md5_hex, BlockLocator, Manifest},
    model::{RecordState, WorkRecord},
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

mod dirs {
    pub const BLOCKS: &str = "blocks";
    pub const COLLECTIONS: &str = "collections";
    pub const REQUESTS: &str = "requests";
    pub const CONTAINERS: &str = "containers";
    pub const JOBS: &str = "jobs";
    pub const IMAGES_INDEX: &str = "images.json";
}

/// A record on disk together with the body it was created from.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    #[serde(flatten)]
    record: WorkRecord,
    #[serde(default)]
    spec: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    spec_hash: Option<String>,
    created_at: String,
}

/// A cluster whose storage and record database live in a local directory.
///
/// Nothing here executes work: records stay `Queued` until a dispatcher (or a
/// test) moves them along with [`LocalCluster::update_record`].
pub struct LocalCluster {
    pub(crate) cluster_id: String,
    pub(crate) base_path: PathBuf,
    pub(crate) docker_bin: String,
}

impl LocalCluster {
    pub fn new(config: &ClusterConfig) -> Result<Self> {
        let cluster = Self {
            cluster_id: config.cluster_id.clone(),
            base_path: config.base_path.clone(),
            docker_bin: config.docker_bin.clone(),
        };
        for dir in [
            dirs::BLOCKS,
            dirs::COLLECTIONS,
            dirs::REQUESTS,
            dirs::CONTAINERS,
            dirs::JOBS,
        ] {
            fs_err::create_dir_all(cluster.base_path.join(dir)).map_err(ConfigError::Io)?;
        }
        Ok(cluster)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn new_uuid(&self, infix: &str) -> String {
        let random = uuid::Uuid::new_v4().simple().to_string();
        format!("{}-{}-{}", self.cluster_id, infix, &random[..15])
    }

    fn record_dir(&self, uuid: &str) -> Result<PathBuf> {
        let dir = match record_kind(uuid) {
            Some(infixes::CONTAINER_REQUEST) => dirs::REQUESTS,
            Some(infixes::CONTAINER) => dirs::CONTAINERS,
            Some(infixes::JOB) => dirs::JOBS,
            _ => return Err(ClientError::RecordNotFound(uuid.to_string())),
        };
        Ok(self.base_path.join(dir))
    }

    fn record_path(&self, uuid: &str) -> Result<PathBuf> {
        Ok(self.record_dir(uuid)?.join(format!("{}.json", uuid)))
    }

    fn load_stored(&self, uuid: &str) -> Result<StoredRecord> {
        let path = self.record_path(uuid)?;
        if !path.exists() {
            return Err(ClientError::RecordNotFound(uuid.to_string()));
        }
        read_json(&path)
    }

    fn save_stored(&self, stored: &StoredRecord) -> Result<()> {
        write_json(&self.record_path(&stored.record.uuid)?, stored)
    }

    fn find_reusable(&self, dir: &str, spec_hash: &str) -> Result<Option<StoredRecord>> {
        let dir = self.base_path.join(dir);
        let mut entries: Vec<PathBuf> = fs_err::read_dir(&dir)
            .map_err(ConfigError::Io)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        entries.sort();

        for path in entries {
            let stored: StoredRecord = read_json(&path)?;
            let succeeded = stored.record.state == RecordState::Complete
                && stored.record.exit_code.unwrap_or(0) == 0;
            if succeeded && stored.spec_hash.as_deref() == Some(spec_hash) {
                return Ok(Some(stored));
            }
        }
        Ok(None)
    }

    /// Overwrites the state fields of an existing record.
    pub fn update_record(&self, record: &WorkRecord) -> Result<()> {
        let mut stored = self.load_stored(&record.uuid)?;
        stored.record = record.clone();
        self.save_stored(&stored)
    }

    /// Registers an already stored collection as the content of `image`.
    pub fn register_image(&self, image: &str, pdh: &str) -> Result<()> {
        let index_path = self.base_path.join(dirs::IMAGES_INDEX);
        let mut index: BTreeMap<String, String> = if index_path.exists() {
            read_json(&index_path)?
        } else {
            BTreeMap::new()
        };
        index.insert(image_reference(image), pdh.to_string());
        write_json(&index_path, &index)
    }

    fn run_docker(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new(&self.docker_bin);
        cmd.args(args);
        cwlsubmit_core::logging::log_and_print_command(&cmd);

        let output = cmd.output().map_err(ConfigError::Io)?;
        if !output.status.success() {
            return Err(ClientError::CommandFailed {
                command: format!("{} {}", self.docker_bin, args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs_err::read_to_string(path).map_err(ConfigError::Io)?;
    serde_json::from_str(&content).map_err(|e| ClientError::Config(ConfigError::Json(e)))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value).map_err(ConfigError::Json)?;
    let tmp_path = path.with_extension("json.tmp");
    fs_err::write(&tmp_path, content).map_err(ConfigError::Io)?;
    fs_err::rename(&tmp_path, path).map_err(ConfigError::Io)?;
    Ok(())
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Hash over the fields that decide whether two containers do the same work.
fn container_spec_hash(spec: &Value) -> String {
    let key = json!({
        "command": spec.get("command"),
        "container_image": spec.get("container_image"),
        "cwd": spec.get("cwd"),
        "mounts": spec.get("mounts"),
        "output_path": spec.get("output_path"),
        "runtime_constraints": spec.get("runtime_constraints"),
    });
    md5_hex(key.to_string().as_bytes())
}

fn job_spec_hash(spec: &Value) -> String {
    let key = json!({
        "script": spec.get("script"),
        "script_version": spec.get("script_version"),
        "script_parameters": spec.get("script_parameters"),
        "runtime_constraints": spec.get("runtime_constraints"),
    });
    md5_hex(key.to_string().as_bytes())
}

fn spec_name(spec: &Value) -> Option<String> {
    spec.get("name").and_then(Value::as_str).map(str::to_string)
}

impl ClusterInfo for LocalCluster {
    fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    fn describe(&self) -> String {
        format!("local cluster '{}' at {}", self.cluster_id, self.base_path.display())
    }
}

impl StorageOps for LocalCluster {
    fn put_collection(
        &self,
        name: &str,
        owner_uuid: Option<&str>,
        bundle: &Bundle,
    ) -> Result<CollectionRecord> {
        let blocks_dir = self.base_path.join(dirs::BLOCKS);
        for (path, data) in bundle.files() {
            let locator = BlockLocator::for_data(data);
            let block_path = blocks_dir.join(&locator.hash);
            if !block_path.exists() {
                tracing::trace!("Writing block {} for '{}'", locator, path);
                fs_err::write(&block_path, data).map_err(ConfigError::Io)?;
            }
        }

        let manifest_text = bundle.manifest_text();
        let pdh = bundle.portable_data_hash();
        let record = CollectionRecord {
            uuid: self.new_uuid(infixes::COLLECTION),
            name: name.to_string(),
            portable_data_hash: pdh.clone(),
            manifest_text,
            owner_uuid: owner_uuid.map(str::to_string),
            created_at: now(),
        };
        write_json(
            &self
                .base_path
                .join(dirs::COLLECTIONS)
                .join(format!("{}.json", pdh)),
            &record,
        )?;
        tracing::info!(
            "Stored collection '{}' ({} files) as {}",
            name,
            bundle.len(),
            pdh
        );
        Ok(record)
    }

    fn get_collection(&self, pdh: &str) -> Result<CollectionRecord> {
        BlockLocator::parse(pdh)?;
        let path = self
            .base_path
            .join(dirs::COLLECTIONS)
            .join(format!("{}.json", pdh));
        if !path.exists() {
            return Err(ClientError::CollectionNotFound(pdh.to_string()));
        }
        read_json(&path)
    }

    fn read_file(&self, pdh: &str, path: &str) -> Result<Vec<u8>> {
        let collection = self.get_collection(pdh)?;
        let manifest = Manifest::parse(&collection.manifest_text)?;
        let segments = manifest
            .segments(path)
            .ok_or_else(|| ClientError::FileNotFound {
                pdh: pdh.to_string(),
                path: path.to_string(),
            })?;

        let mut data = Vec::new();
        for segment in segments {
            let block_path = self
                .base_path
                .join(dirs::BLOCKS)
                .join(&segment.locator.hash);
            if !block_path.exists() {
                return Err(ClientError::BlockNotFound(segment.locator.to_string()));
            }
            let block = fs_err::read(&block_path).map_err(ConfigError::Io)?;
            let start = segment.offset as usize;
            let end = start + segment.len as usize;
            let slice = block.get(start..end).ok_or_else(|| {
                DomainError::MalformedManifest(format!(
                    "segment {}:{} is outside block {}",
                    segment.offset, segment.len, segment.locator
                ))
            })?;
            data.extend_from_slice(slice);
        }
        Ok(data)
    }
}

impl WorkOps for LocalCluster {
    fn create_container_request(&self, spec: &Value) -> Result<WorkRecord> {
        let spec_hash = container_spec_hash(spec);
        let use_existing = spec
            .get("use_existing")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let reused = if use_existing {
            self.find_reusable(dirs::CONTAINERS, &spec_hash)?
        } else {
            None
        };

        let container_uuid = match reused {
            Some(existing) => {
                tracing::info!("Reusing finished container {}", existing.record.uuid);
                existing.record.uuid
            }
            None => {
                let container = StoredRecord {
                    record: WorkRecord {
                        name: spec_name(spec),
                        ..WorkRecord::new(self.new_uuid(infixes::CONTAINER), RecordState::Queued)
                    },
                    spec: Value::Null,
                    spec_hash: Some(spec_hash),
                    created_at: now(),
                };
                self.save_stored(&container)?;
                container.record.uuid
            }
        };

        let request = StoredRecord {
            record: WorkRecord {
                name: spec_name(spec),
                container_uuid: Some(container_uuid),
                ..WorkRecord::new(
                    self.new_uuid(infixes::CONTAINER_REQUEST),
                    RecordState::Committed,
                )
            },
            spec: spec.clone(),
            spec_hash: None,
            created_at: now(),
        };
        self.save_stored(&request)?;
        Ok(request.record)
    }

    fn create_job(&self, spec: &Value, find_or_create: bool) -> Result<WorkRecord> {
        let spec_hash = job_spec_hash(spec);
        if find_or_create {
            if let Some(existing) = self.find_reusable(dirs::JOBS, &spec_hash)? {
                tracing::info!("Reusing finished job {}", existing.record.uuid);
                return Ok(existing.record);
            }
        }

        let job = StoredRecord {
            record: WorkRecord {
                name: spec_name(spec),
                ..WorkRecord::new(self.new_uuid(infixes::JOB), RecordState::Queued)
            },
            spec: spec.clone(),
            spec_hash: Some(spec_hash),
            created_at: now(),
        };
        self.save_stored(&job)?;
        Ok(job.record)
    }

    fn get_record(&self, uuid: &str) -> Result<WorkRecord> {
        Ok(self.load_stored(uuid)?.record)
    }

    fn get_spec(&self, uuid: &str) -> Result<Value> {
        Ok(self.load_stored(uuid)?.spec)
    }
}

impl ImageOps for LocalCluster {
    fn find_image(&self, image: &str) -> Result<Option<String>> {
        let index_path = self.base_path.join(dirs::IMAGES_INDEX);
        if !index_path.exists() {
            return Ok(None);
        }
        let index: BTreeMap<String, String> = read_json(&index_path)?;
        Ok(index.get(&image_reference(image)).cloned())
    }

    fn upload_image(&self, image: &str, owner_uuid: Option<&str>) -> Result<String> {
        let image = image_reference(image);
        let to_upload_error = |e: ClientError| ClientError::ImageUpload {
            image: image.clone(),
            reason: e.to_string(),
        };

        if self.run_docker(&["image", "inspect", &image]).is_err() {
            tracing::info!("Pulling '{}'", image);
            self.run_docker(&["pull", &image]).map_err(to_upload_error)?;
        }
        let image_id = self
            .run_docker(&["image", "inspect", "--format", "{{.Id}}", &image])
            .map_err(to_upload_error)?;
        let image_hash = image_id.trim_start_matches("sha256:").to_string();

        let tarball = tempfile::NamedTempFile::new().map_err(ConfigError::Io)?;
        let tarball_path = tarball.path().to_string_lossy().to_string();
        self.run_docker(&["save", "-o", &tarball_path, &image])
            .map_err(to_upload_error)?;
        let data = fs_err::read(tarball.path()).map_err(ConfigError::Io)?;

        let mut bundle = Bundle::new();
        bundle.add_file(format!("{}.tar", image_hash), data);
        let (repo, tag) = image.rsplit_once(':').unwrap_or((image.as_str(), "latest"));
        let collection =
            self.put_collection(&format!("Docker image {} {}", repo, tag), owner_uuid, &bundle)?;

        self.register_image(&image, &collection.portable_data_hash)?;
        Ok(collection.portable_data_hash)
    }
}
