use crate::bundle::Bundle;
use crate::error::{ClientError, Result};
use crate::loader::{defrag, file_uri_to_path, is_local, is_remote, resolve, DocumentLoader};
use crate::scandeps::{Dependency, DependencyClass, Scanner};
use crate::targets::{Cluster, CollectionRecord};
use cwlsubmit_core::{
    constants::prefixes,
    document::{adjust_file_and_dir_objs, normalize_files_dirs},
    errors::{ConfigError, DomainError},
    manifest::StorageAddress,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapperEntry {
    pub resolved: String,
    pub target: String,
    pub class: DependencyClass,
}

/// Mapping from original references to their storage-addressed targets.
#[derive(Debug, Clone, Default)]
pub struct PathMapper {
    entries: BTreeMap<String, MapperEntry>,
    collection: Option<CollectionRecord>,
}

impl PathMapper {
    pub fn mapper(&self, src: &str) -> Option<&MapperEntry> {
        self.entries.get(defrag(src))
    }

    pub fn target(&self, src: &str) -> Option<&str> {
        self.mapper(src).map(|e| e.target.as_str())
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &MapperEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The bundle holding the uploaded files, when there were any.
    pub fn collection(&self) -> Option<&CollectionRecord> {
        self.collection.as_ref()
    }

    pub fn portable_data_hash(&self) -> Option<&str> {
        self.collection
            .as_ref()
            .map(|c| c.portable_data_hash.as_str())
    }

    /// Points every `File`/`Directory` location in `doc` at its mapped target.
    /// Anonymous and storage-addressed locations are left alone, as are remote
    /// URLs.
    pub fn rewrite(&self, doc: &mut Value, base: &str) -> Result<()> {
        normalize_files_dirs(doc);
        let mut failure: Option<ClientError> = None;
        adjust_file_and_dir_objs(doc, |obj| {
            if failure.is_some() {
                return;
            }
            let Some(location) = obj.get("location").and_then(Value::as_str) else {
                return;
            };
            if location.starts_with(prefixes::ANONYMOUS)
                || location.starts_with(prefixes::STORAGE)
            {
                return;
            }
            let resolved = match resolve(base, location) {
                Ok(r) => r,
                Err(e) => {
                    failure = Some(e);
                    return;
                }
            };
            match self.target(&resolved) {
                Some(target) => {
                    obj.insert("location".to_string(), Value::String(target.to_string()));
                }
                None if is_remote(&resolved) => {}
                None => failure = Some(ClientError::UnmappedReference(resolved)),
            }
        });
        failure.map_or(Ok(()), Err)
    }
}

/// Finds every external reference of `workflowobj`, uploads the local ones as
/// a single bundle named `name`, and rewrites `workflowobj` in place to point
/// at the uploaded content.
///
/// When the document has an `id`, its raw text is re-fetched and scanned
/// instead, so references hidden behind `$include` and `$mixin` are seen.
pub fn upload_dependencies(
    cluster: &dyn Cluster,
    name: &str,
    loader: &dyn DocumentLoader,
    workflowobj: &mut Value,
    uri: &str,
    loadref_run: bool,
    owner_uuid: Option<&str>,
) -> Result<PathMapper> {
    let mut scanner = Scanner::new(loader, loadref_run);

    let doc_id = match workflowobj.get("id").and_then(Value::as_str) {
        Some(id) => Some(resolve(uri, id)?),
        None => None,
    };

    let mut deps = match &doc_id {
        Some(id) => {
            let raw = scanner.load_ref("", id)?;
            scanner.scan(uri, &raw)?
        }
        None => scanner.scan(uri, workflowobj)?,
    };
    if let Some(id) = &doc_id {
        deps.push(Dependency::file(defrag(id)));
    }

    let mapper = upload_files(cluster, name, &deps, owner_uuid)?;
    mapper.rewrite(workflowobj, uri)?;
    Ok(mapper)
}

struct LocalRef {
    uri: String,
    path: PathBuf,
    class: DependencyClass,
}

fn upload_files(
    cluster: &dyn Cluster,
    name: &str,
    deps: &[Dependency],
    owner_uuid: Option<&str>,
) -> Result<PathMapper> {
    let mut unique: BTreeMap<String, DependencyClass> = BTreeMap::new();
    for dep in deps.iter().flat_map(|d| d.flatten()) {
        let key = defrag(&dep.location).to_string();
        let class = unique.entry(key).or_insert(dep.class);
        if dep.class == DependencyClass::Directory {
            *class = DependencyClass::Directory;
        }
    }

    let mut mapper = PathMapper::default();
    let mut locals = Vec::new();
    for (uri, class) in unique {
        if uri.starts_with(prefixes::STORAGE) {
            StorageAddress::parse(&uri)?;
            mapper.entries.insert(
                uri.clone(),
                MapperEntry {
                    resolved: uri.clone(),
                    target: uri,
                    class,
                },
            );
        } else if is_remote(&uri) {
            mapper.entries.insert(
                uri.clone(),
                MapperEntry {
                    resolved: uri.clone(),
                    target: uri,
                    class,
                },
            );
        } else if is_local(&uri) {
            let path = file_uri_to_path(&uri)?;
            if !path.exists() {
                return Err(ClientError::Config(ConfigError::PathIo {
                    path,
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "referenced file does not exist",
                    ),
                }));
            }
            locals.push(LocalRef { uri, path, class });
        } else {
            return Err(ClientError::Domain(DomainError::InvalidReference {
                reference: uri,
                reason: "unsupported URI scheme".to_string(),
            }));
        }
    }

    if locals.is_empty() {
        return Ok(mapper);
    }

    let root = common_root(locals.iter().map(|l| anchor_of(&l.path)));
    let mut bundle = Bundle::new();
    let mut relative_paths = Vec::with_capacity(locals.len());
    for local in &locals {
        let rel = bundle_path(&local.path, &root)?;
        match local.class {
            DependencyClass::File => {
                let data = fs_err::read(&local.path).map_err(ConfigError::Io)?;
                bundle.add_file(rel.clone(), data);
            }
            DependencyClass::Directory => {
                for entry in WalkDir::new(&local.path).sort_by_file_name() {
                    let entry = entry?;
                    if entry.file_type().is_file() {
                        let data = fs_err::read(entry.path()).map_err(ConfigError::Io)?;
                        bundle.add_file(bundle_path(entry.path(), &root)?, data);
                    }
                }
            }
        }
        relative_paths.push(rel);
    }

    let pdh = bundle.portable_data_hash();
    tracing::info!(
        "Uploading {} dependencies of '{}' ({} files)",
        locals.len(),
        name,
        bundle.len()
    );
    let collection = cluster.put_collection(&format!("{} ({})", name, pdh), owner_uuid, &bundle)?;

    for (local, rel) in locals.into_iter().zip(relative_paths) {
        let target = StorageAddress::new(collection.portable_data_hash.clone(), Some(rel)).to_string();
        tracing::debug!("Mapped '{}' -> '{}'", local.uri, target);
        mapper.entries.insert(
            local.uri.clone(),
            MapperEntry {
                resolved: local.uri,
                target,
                class: local.class,
            },
        );
    }
    mapper.collection = Some(collection);
    Ok(mapper)
}

/// The directory a reference hangs off inside the bundle.
fn anchor_of(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

fn common_root(mut paths: impl Iterator<Item = PathBuf>) -> PathBuf {
    let Some(first) = paths.next() else {
        return PathBuf::new();
    };
    let mut root: Vec<Component<'_>> = Vec::new();
    let first_components: Vec<_> = first.components().collect();
    let others: Vec<PathBuf> = paths.collect();

    for (i, component) in first_components.iter().enumerate() {
        if others
            .iter()
            .all(|p| p.components().nth(i) == Some(*component))
        {
            root.push(*component);
        } else {
            break;
        }
    }
    root.iter().collect()
}

fn bundle_path(path: &Path, root: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| ClientError::InvalidPath {
            path: path.to_path_buf(),
            reason: format!("not under bundle root '{}'", root.display()),
        })?;
    Ok(rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_root_of_siblings() {
        let root = common_root(
            vec![PathBuf::from("/w/a"), PathBuf::from("/w/a/b"), PathBuf::from("/w/a")]
                .into_iter(),
        );
        assert_eq!(root, PathBuf::from("/w/a"));
    }

    #[test]
    fn test_common_root_of_disjoint() {
        let root = common_root(vec![PathBuf::from("/x/a"), PathBuf::from("/y/b")].into_iter());
        assert_eq!(root, PathBuf::from("/"));
    }

    #[test]
    fn test_bundle_path_uses_forward_slashes() {
        assert_eq!(
            bundle_path(Path::new("/w/a/b/c.txt"), Path::new("/w/a")).unwrap(),
            "b/c.txt"
        );
        assert!(bundle_path(Path::new("/elsewhere/c.txt"), Path::new("/w/a")).is_err());
    }

    #[test]
    fn test_rewrite_leaves_special_locations() {
        let mut mapper = PathMapper::default();
        mapper.entries.insert(
            "file:///w/blorp.txt".to_string(),
            MapperEntry {
                resolved: "file:///w/blorp.txt".to_string(),
                target: "storage:169f39d466a5438ac4a90e779bf750c7+53/blorp.txt".to_string(),
                class: DependencyClass::File,
            },
        );
        let mut doc = serde_json::json!({
            "a": {"class": "File", "location": "blorp.txt"},
            "b": {"class": "File", "location": "_:xyz"},
            "c": {"class": "File", "location": "storage:99999999999999999999999999999998+99/f"},
            "d": {"class": "File", "location": "https://example.com/r.txt"},
        });
        mapper.rewrite(&mut doc, "file:///w/job.yml").unwrap();
        assert_eq!(
            doc["a"]["location"],
            "storage:169f39d466a5438ac4a90e779bf750c7+53/blorp.txt"
        );
        assert_eq!(doc["b"]["location"], "_:xyz");
        assert_eq!(
            doc["c"]["location"],
            "storage:99999999999999999999999999999998+99/f"
        );
        assert_eq!(doc["d"]["location"], "https://example.com/r.txt");
    }

    #[test]
    fn test_rewrite_reports_unmapped_local_reference() {
        let mapper = PathMapper::default();
        let mut doc = serde_json::json!({"a": {"class": "File", "location": "other.txt"}});
        let result = mapper.rewrite(&mut doc, "file:///w/job.yml");
        assert!(matches!(result, Err(ClientError::UnmappedReference(_))));
    }
}
