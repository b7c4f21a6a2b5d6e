use crate::error::{ClientError, Result};
use crate::loader::path_to_uri;
use cwlsubmit_core::{document::parse_document, errors::ConfigError};
use serde_json::Value;
use std::path::Path;

/// Reads a job order file (YAML or JSON). The returned object carries the
/// file's URI as `id` so relative locations resolve against it.
pub fn load_job_order(path: &Path) -> Result<Value> {
    let text = fs_err::read_to_string(path).map_err(|source| ConfigError::PathIo {
        path: path.to_path_buf(),
        source,
    })?;
    let mut job_order = parse_document(&text)?;
    let Value::Object(map) = &mut job_order else {
        return Err(ClientError::InvalidPath {
            path: path.to_path_buf(),
            reason: "job order must be a mapping of input names to values".to_string(),
        });
    };
    map.insert("id".to_string(), Value::String(path_to_uri(path)?));
    Ok(job_order)
}

/// An empty job order, for workflows run with all-default inputs.
pub fn empty_job_order() -> Value {
    Value::Object(serde_json::Map::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_yaml_job_order_sets_id() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("job.yml");
        fs_err::write(&path, "x:\n  class: File\n  location: blorp.txt\ny: 3\n").unwrap();

        let job_order = load_job_order(&path).unwrap();
        assert_eq!(job_order["y"], 3);
        assert_eq!(job_order["x"]["location"], "blorp.txt");
        let id = job_order["id"].as_str().unwrap();
        assert!(id.starts_with("file:///") && id.ends_with("/job.yml"));
    }

    #[test]
    fn test_non_mapping_job_order_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("job.json");
        fs_err::write(&path, "[1, 2]").unwrap();
        assert!(matches!(
            load_job_order(&path),
            Err(ClientError::InvalidPath { .. })
        ));
    }
}
