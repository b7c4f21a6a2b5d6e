use crate::error::Result;
use crate::loader::{defrag, resolve, DocumentLoader};
use cwlsubmit_core::{
    constants::prefixes,
    document::{self, CLASS_DIRECTORY, CLASS_FILE},
};
use serde_json::Value;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DependencyClass {
    File,
    Directory,
}

/// An external reference found while scanning a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub class: DependencyClass,
    pub location: String,
    /// Secondary files, directory listings, and whatever a loaded reference
    /// itself refers to.
    pub nested: Vec<Dependency>,
}

impl Dependency {
    pub fn file(location: impl Into<String>) -> Self {
        Self {
            class: DependencyClass::File,
            location: location.into(),
            nested: Vec::new(),
        }
    }

    /// This dependency followed by all nested ones, depth first.
    pub fn flatten(&self) -> Vec<&Dependency> {
        let mut out = vec![self];
        for child in &self.nested {
            out.extend(child.flatten());
        }
        out
    }
}

const URL_FIELDS: [&str; 3] = ["$include", "$schemas", "location"];

/// Walks documents collecting references to external files.
///
/// Each scanner owns its memo of fetched URIs, so any document is fetched at
/// most once per scan, however often (or cyclically) it is referenced.
pub struct Scanner<'a> {
    loader: &'a dyn DocumentLoader,
    ref_fields: HashSet<&'static str>,
    loaded: HashSet<String>,
}

impl<'a> Scanner<'a> {
    pub fn new(loader: &'a dyn DocumentLoader, loadref_run: bool) -> Self {
        let mut ref_fields: HashSet<&'static str> = ["$import", "$mixin"].into_iter().collect();
        if loadref_run {
            ref_fields.insert("run");
        }
        Self {
            loader,
            ref_fields,
            loaded: HashSet::new(),
        }
    }

    /// Fetches and parses the raw text behind `reference`. A URI that was
    /// already fetched yields an empty document.
    pub fn load_ref(&mut self, base: &str, reference: &str) -> Result<Value> {
        let joined = resolve(base, reference)?;
        let uri = defrag(&joined).to_string();
        if !self.loaded.insert(uri.clone()) {
            return Ok(Value::Object(Default::default()));
        }
        tracing::debug!("Fetching raw document '{}'", uri);
        let text = self.loader.fetch_text(&uri)?;
        Ok(document::parse_document(&text)?)
    }

    pub fn loaded(&self) -> &HashSet<String> {
        &self.loaded
    }

    pub fn scan(&mut self, base: &str, doc: &Value) -> Result<Vec<Dependency>> {
        match doc {
            Value::Object(map) => self.scan_object(base, map),
            Value::Array(items) => {
                let mut deps = Vec::new();
                for item in items {
                    deps.extend(self.scan(base, item)?);
                }
                Ok(deps)
            }
            _ => Ok(Vec::new()),
        }
    }

    fn scan_object(
        &mut self,
        base: &str,
        map: &serde_json::Map<String, Value>,
    ) -> Result<Vec<Dependency>> {
        let mut deps = Vec::new();
        let mut base = base.to_string();

        if let Some(id) = map.get("id").and_then(Value::as_str) {
            if id.starts_with("file://") {
                let doc_uri = defrag(id);
                if doc_uri != defrag(&base) {
                    deps.push(Dependency::file(doc_uri));
                }
                base = doc_uri.to_string();
            }
        }

        let class = match map.get("class").and_then(Value::as_str) {
            Some(CLASS_FILE) => Some(DependencyClass::File),
            Some(CLASS_DIRECTORY) => Some(DependencyClass::Directory),
            _ => None,
        };

        if let Some(class) = class {
            let location = map
                .get("location")
                .or_else(|| map.get("path"))
                .and_then(Value::as_str);
            let mut nested = Vec::new();
            for field in ["secondaryFiles", "listing"] {
                if let Some(children) = map.get(field) {
                    nested.extend(self.scan(&base, children)?);
                }
            }
            match location.filter(|l| !l.starts_with(prefixes::ANONYMOUS)) {
                Some(location) => deps.push(Dependency {
                    class,
                    location: resolve(&base, location)?,
                    nested,
                }),
                // Literal files and directories still carry their contents.
                None => deps.extend(nested),
            }
            return Ok(deps);
        }

        for (key, value) in map {
            if self.ref_fields.contains(key.as_str()) {
                for item in as_list(value) {
                    match item {
                        Value::String(reference) => {
                            let sub = self.load_ref(&base, reference)?;
                            let sub_uri = defrag(&resolve(&base, reference)?).to_string();
                            let mut dep = Dependency::file(sub_uri.clone());
                            dep.nested = self.scan(&sub_uri, &sub)?;
                            deps.push(dep);
                        }
                        other => deps.extend(self.scan(&base, other)?),
                    }
                }
            } else if URL_FIELDS.contains(&key.as_str()) && key != "location" {
                for item in as_list(value) {
                    if let Some(reference) = item.as_str() {
                        deps.push(Dependency::file(resolve(&base, reference)?));
                    }
                }
            } else {
                deps.extend(self.scan(&base, value)?);
            }
        }

        Ok(deps)
    }
}

fn as_list(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MapLoader {
        docs: HashMap<String, String>,
        fetches: Mutex<Vec<String>>,
    }

    impl MapLoader {
        fn new(docs: &[(&str, &str)]) -> Self {
            Self {
                docs: docs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                fetches: Mutex::new(Vec::new()),
            }
        }
    }

    impl DocumentLoader for MapLoader {
        fn fetch_text(&self, uri: &str) -> Result<String> {
            self.fetches.lock().unwrap().push(uri.to_string());
            self.docs.get(uri).cloned().ok_or_else(|| {
                ClientError::Domain(cwlsubmit_core::errors::DomainError::InvalidReference {
                    reference: uri.to_string(),
                    reason: "missing".to_string(),
                })
            })
        }
    }

    fn locations(deps: &[Dependency]) -> Vec<String> {
        let mut out: Vec<String> = deps
            .iter()
            .flat_map(|d| d.flatten())
            .map(|d| d.location.clone())
            .collect();
        out.sort();
        out
    }

    #[test]
    fn test_scan_finds_file_and_directory_locations() {
        let loader = MapLoader::new(&[]);
        let mut scanner = Scanner::new(&loader, false);
        let doc = json!({
            "x": {"class": "File", "location": "blorp.txt",
                  "secondaryFiles": [{"class": "File", "location": "blorp.txt.idx"}]},
            "y": {"class": "Directory", "location": "dir"},
            "z": {"class": "File", "location": "_:anon"},
            "$schemas": ["schema.owl"],
        });
        let deps = scanner.scan("file:///w/job.yml", &doc).unwrap();
        assert_eq!(
            locations(&deps),
            vec![
                "file:///w/blorp.txt",
                "file:///w/blorp.txt.idx",
                "file:///w/dir",
                "file:///w/schema.owl",
            ]
        );
    }

    #[test]
    fn test_literal_objects_still_scan_their_contents() {
        let loader = MapLoader::new(&[]);
        let mut scanner = Scanner::new(&loader, false);
        let doc = json!({
            "d": {"class": "Directory", "location": "_:lit",
                  "listing": [{"class": "File", "location": "a.txt"}]},
            "f": {"class": "File", "contents": "hi",
                  "secondaryFiles": [{"class": "File", "location": "hi.idx"}]},
        });
        let deps = scanner.scan("file:///w/job.yml", &doc).unwrap();
        assert_eq!(locations(&deps), vec!["file:///w/a.txt", "file:///w/hi.idx"]);
    }

    #[test]
    fn test_run_is_followed_only_with_loadref_run() {
        let loader = MapLoader::new(&[(
            "file:///w/tool.cwl",
            "class: CommandLineTool\ninputs:\n  - id: x\n    type: File\n    default:\n      class: File\n      location: blub.txt\n",
        )]);
        let doc = json!({"class": "Workflow", "steps": [{"id": "s1", "run": "tool.cwl"}]});

        let mut with_run = Scanner::new(&loader, true);
        let deps = with_run.scan("file:///w/wf.cwl", &doc).unwrap();
        assert_eq!(
            locations(&deps),
            vec!["file:///w/blub.txt", "file:///w/tool.cwl"]
        );

        let mut without_run = Scanner::new(&loader, false);
        assert!(without_run.scan("file:///w/wf.cwl", &doc).unwrap().is_empty());
    }

    #[test]
    fn test_repeated_and_cyclic_refs_fetch_once() {
        let loader = MapLoader::new(&[
            ("file:///w/a.yml", "$import: b.yml\n"),
            ("file:///w/b.yml", "$import: a.yml\n"),
        ]);
        let mut scanner = Scanner::new(&loader, false);
        let doc = json!({"one": {"$import": "a.yml"}, "two": {"$import": "a.yml#frag"}});
        scanner.scan("file:///w/main.yml", &doc).unwrap();

        let fetches = loader.fetches.lock().unwrap().clone();
        assert_eq!(fetches, vec!["file:///w/a.yml", "file:///w/b.yml"]);
        assert_eq!(scanner.loaded().len(), 2);
    }

    #[test]
    fn test_include_is_a_url_field() {
        let loader = MapLoader::new(&[]);
        let mut scanner = Scanner::new(&loader, true);
        let doc = json!({"arguments": [{"valueFrom": {"$include": "script.js"}}]});
        let deps = scanner.scan("file:///w/tool.cwl", &doc).unwrap();
        assert_eq!(locations(&deps), vec!["file:///w/script.js"]);
        assert!(loader.fetches.lock().unwrap().is_empty());
    }

    #[test]
    fn test_storage_locations_are_kept_as_is() {
        let loader = MapLoader::new(&[]);
        let mut scanner = Scanner::new(&loader, false);
        let doc = json!({"f": {"class": "File",
            "location": "storage:99999999999999999999999999999998+99/file1.txt"}});
        let deps = scanner.scan("file:///w/job.yml", &doc).unwrap();
        assert_eq!(
            deps[0].location,
            "storage:99999999999999999999999999999998+99/file1.txt"
        );
    }

    #[test]
    fn test_missing_reference_is_an_error() {
        let loader = MapLoader::new(&[]);
        let mut scanner = Scanner::new(&loader, false);
        let doc = json!({"$import": "nope.yml"});
        assert!(scanner.scan("file:///w/main.yml", &doc).is_err());
    }
}
