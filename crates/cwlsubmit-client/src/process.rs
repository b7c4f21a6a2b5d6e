use crate::error::Result;
use crate::loader::{defrag, fragment, resolve, DocumentLoader};
use crate::targets::{ensure_image, Cluster};
use cwlsubmit_core::{
    constants::ext,
    document::{self, class_of, get_feature, get_feature_mut},
    errors::DomainError,
};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// A process document together with its absolute id.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessDoc {
    pub id: String,
    /// URI of the file the process was read from. Relative references
    /// inside `doc` resolve against it, also for inline step processes.
    pub base: String,
    pub doc: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowStep {
    pub id: String,
    pub run: Process,
    /// Index of the step in the workflow's `steps`, or its key in map form.
    pub(crate) key: StepKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StepKey {
    Index(usize),
    Name(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Workflow {
    pub process: ProcessDoc,
    pub steps: Vec<WorkflowStep>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Process {
    CommandLineTool(ProcessDoc),
    ExpressionTool(ProcessDoc),
    Workflow(Workflow),
}

impl Process {
    pub fn process_doc(&self) -> &ProcessDoc {
        match self {
            Process::CommandLineTool(p) | Process::ExpressionTool(p) => p,
            Process::Workflow(w) => &w.process,
        }
    }

    pub fn process_doc_mut(&mut self) -> &mut ProcessDoc {
        match self {
            Process::CommandLineTool(p) | Process::ExpressionTool(p) => p,
            Process::Workflow(w) => &mut w.process,
        }
    }

    pub fn id(&self) -> &str {
        &self.process_doc().id
    }

    pub fn doc(&self) -> &Value {
        &self.process_doc().doc
    }

    pub fn doc_mut(&mut self) -> &mut Value {
        &mut self.process_doc_mut().doc
    }

    pub fn class_name(&self) -> &'static str {
        match self {
            Process::CommandLineTool(_) => "CommandLineTool",
            Process::ExpressionTool(_) => "ExpressionTool",
            Process::Workflow(_) => "Workflow",
        }
    }

    /// Visits this process and every process embedded below it.
    pub fn visit_mut(&mut self, f: &mut dyn FnMut(&mut ProcessDoc)) {
        match self {
            Process::CommandLineTool(p) | Process::ExpressionTool(p) => f(p),
            Process::Workflow(w) => {
                f(&mut w.process);
                for step in &mut w.steps {
                    step.run.visit_mut(f);
                }
            }
        }
    }
}

/// Loads the process at `uri`, following step `run` references.
///
/// `$graph` documents are supported; the fragment of `uri` selects the
/// entry, `#main` by default.
pub fn load_process(loader: &dyn DocumentLoader, uri: &str) -> Result<Process> {
    let mut ctx = LoadContext {
        loader,
        docs: HashMap::new(),
    };
    ctx.load(uri)
}

struct LoadContext<'a> {
    loader: &'a dyn DocumentLoader,
    docs: HashMap<String, Value>,
}

impl LoadContext<'_> {
    fn document(&mut self, doc_uri: &str) -> Result<&Value> {
        if !self.docs.contains_key(doc_uri) {
            let text = self.loader.fetch_text(doc_uri)?;
            let parsed = document::parse_document(&text)?;
            self.docs.insert(doc_uri.to_string(), parsed);
        }
        self.docs.get(doc_uri).ok_or_else(|| {
            DomainError::InvalidReference {
                reference: doc_uri.to_string(),
                reason: "document could not be loaded".to_string(),
            }
            .into()
        })
    }

    fn load(&mut self, uri: &str) -> Result<Process> {
        let doc_uri = defrag(uri).to_string();
        let frag = fragment(uri).map(str::to_string);
        let root = self.document(&doc_uri)?;

        let (id, doc) = match root.get("$graph").and_then(Value::as_array) {
            Some(graph) => {
                let wanted = frag.clone().unwrap_or_else(|| "main".to_string());
                let entry = graph
                    .iter()
                    .find(|e| {
                        e.get("id")
                            .and_then(Value::as_str)
                            .is_some_and(|id| id.trim_start_matches('#') == wanted)
                    })
                    .ok_or_else(|| DomainError::GraphEntryNotFound {
                        document: doc_uri.clone(),
                        fragment: wanted.clone(),
                    })?;
                let mut entry = entry.clone();
                if let (Some(version), Value::Object(map)) = (root.get("cwlVersion"), &mut entry) {
                    map.entry("cwlVersion").or_insert_with(|| version.clone());
                }
                (format!("{}#{}", doc_uri, wanted), entry)
            }
            None => (uri.to_string(), root.clone()),
        };
        self.build(id, doc, &doc_uri)
    }

    fn build(&mut self, id: String, mut doc: Value, base: &str) -> Result<Process> {
        if let Value::Object(map) = &mut doc {
            map.insert("id".to_string(), Value::String(id.clone()));
        }
        let process = ProcessDoc {
            id: id.clone(),
            base: base.to_string(),
            doc,
        };
        match class_of(&process.doc) {
            Some("CommandLineTool") => Ok(Process::CommandLineTool(process)),
            Some("ExpressionTool") => Ok(Process::ExpressionTool(process)),
            Some("Workflow") => {
                let steps = self.build_steps(&process, base)?;
                Ok(Process::Workflow(Workflow { process, steps }))
            }
            _ => Err(DomainError::UnknownProcessClass(id).into()),
        }
    }

    fn build_steps(&mut self, workflow: &ProcessDoc, base: &str) -> Result<Vec<WorkflowStep>> {
        let entries: Vec<(StepKey, String, Value)> = match workflow.doc.get("steps") {
            Some(Value::Array(steps)) => steps
                .iter()
                .enumerate()
                .map(|(i, s)| {
                    let id = s
                        .get("id")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("step{}", i));
                    (StepKey::Index(i), id, s.clone())
                })
                .collect(),
            Some(Value::Object(steps)) => steps
                .iter()
                .map(|(k, s)| (StepKey::Name(k.clone()), k.clone(), s.clone()))
                .collect(),
            _ => Vec::new(),
        };

        let mut steps = Vec::with_capacity(entries.len());
        for (key, step_id, step) in entries {
            let run = match step.get("run") {
                Some(Value::String(reference)) => {
                    let target = resolve(base, reference)?;
                    self.load(&target)?
                }
                Some(inline @ Value::Object(_)) => {
                    let inline_id = format!("{}/{}/run", workflow.id, step_id.trim_start_matches('#'));
                    self.build(inline_id, inline.clone(), base)?
                }
                _ => return Err(DomainError::MissingRun(step_id).into()),
            };
            steps.push(WorkflowStep {
                id: step_id,
                run,
                key,
            });
        }
        Ok(steps)
    }
}

/// Makes sure every container image named by `process` is registered on the
/// cluster, recording each image's collection on its `DockerRequirement`.
///
/// Requirements of enclosing workflows apply to the processes below them.
pub fn upload_docker(
    cluster: &dyn Cluster,
    process: &mut Process,
    owner_uuid: Option<&str>,
) -> Result<()> {
    upload_docker_inherited(cluster, process, &[], owner_uuid)
}

fn upload_docker_inherited(
    cluster: &dyn Cluster,
    process: &mut Process,
    inherited: &[Value],
    owner_uuid: Option<&str>,
) -> Result<()> {
    match process {
        Process::CommandLineTool(tool) => {
            if get_feature(&tool.doc, "DockerRequirement").is_some() {
                resolve_docker_requirement(cluster, &mut tool.doc, owner_uuid)?;
            } else if let Some(req) = inherited_feature(inherited, "DockerRequirement") {
                if let Some(image) = docker_image(req) {
                    ensure_image(cluster, &image, owner_uuid)?;
                }
            }
            Ok(())
        }
        Process::ExpressionTool(_) => Ok(()),
        Process::Workflow(workflow) => {
            if get_feature(&workflow.process.doc, "DockerRequirement").is_some() {
                resolve_docker_requirement(cluster, &mut workflow.process.doc, owner_uuid)?;
            }
            let mut scope = inherited.to_vec();
            scope.extend(features_of(&workflow.process.doc));
            for step in &mut workflow.steps {
                upload_docker_inherited(cluster, &mut step.run, &scope, owner_uuid)?;
            }
            Ok(())
        }
    }
}

fn resolve_docker_requirement(
    cluster: &dyn Cluster,
    doc: &mut Value,
    owner_uuid: Option<&str>,
) -> Result<()> {
    let Some(req) = get_feature_mut(doc, "DockerRequirement") else {
        return Ok(());
    };
    let Some(image) = docker_image(req) else {
        return Ok(());
    };
    let pdh = ensure_image(cluster, &image, owner_uuid)?;
    if let Value::Object(map) = req {
        map.insert(ext::DOCKER_COLLECTION_PDH.to_string(), Value::String(pdh));
    }
    Ok(())
}

fn docker_image(req: &Value) -> Option<String> {
    req.get("dockerImageId")
        .or_else(|| req.get("dockerPull"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Requirements then hints of `doc`, in array form.
fn features_of(doc: &Value) -> Vec<Value> {
    let mut out = Vec::new();
    for field in ["hints", "requirements"] {
        match doc.get(field) {
            Some(Value::Array(items)) => out.extend(items.iter().cloned()),
            Some(Value::Object(map)) => out.extend(map.iter().map(|(class, body)| {
                let mut body = body.as_object().cloned().unwrap_or_else(Map::new);
                body.insert("class".to_string(), Value::String(class.clone()));
                Value::Object(body)
            })),
            _ => {}
        }
    }
    out
}

/// Later entries win, so enclosing requirements listed after hints override them.
fn inherited_feature<'a>(inherited: &'a [Value], class: &str) -> Option<&'a Value> {
    inherited.iter().rev().find(|item| {
        class_of(item).is_some_and(|c| cwlsubmit_core::document::class_matches(c, class))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use std::collections::HashMap;

    struct MapLoader(HashMap<String, String>);

    impl DocumentLoader for MapLoader {
        fn fetch_text(&self, uri: &str) -> Result<String> {
            self.0.get(uri).cloned().ok_or_else(|| {
                ClientError::Domain(DomainError::InvalidReference {
                    reference: uri.to_string(),
                    reason: "missing".to_string(),
                })
            })
        }
    }

    fn loader(docs: &[(&str, &str)]) -> MapLoader {
        MapLoader(
            docs.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_load_tool() {
        let l = loader(&[("file:///w/tool.cwl", "class: CommandLineTool\ninputs: []\n")]);
        let process = load_process(&l, "file:///w/tool.cwl").unwrap();
        assert!(matches!(process, Process::CommandLineTool(_)));
        assert_eq!(process.id(), "file:///w/tool.cwl");
        assert_eq!(process.doc()["id"], "file:///w/tool.cwl");
    }

    #[test]
    fn test_load_workflow_with_file_and_inline_steps() {
        let l = loader(&[
            (
                "file:///w/wf.cwl",
                "class: Workflow\nsteps:\n  - id: s1\n    run: tool.cwl\n  - id: s2\n    run:\n      class: ExpressionTool\n",
            ),
            ("file:///w/tool.cwl", "class: CommandLineTool\n"),
        ]);
        let Process::Workflow(wf) = load_process(&l, "file:///w/wf.cwl").unwrap() else {
            panic!("expected a workflow");
        };
        assert_eq!(wf.steps.len(), 2);
        assert_eq!(wf.steps[0].run.id(), "file:///w/tool.cwl");
        assert!(matches!(wf.steps[1].run, Process::ExpressionTool(_)));
        assert_eq!(wf.steps[1].run.id(), "file:///w/wf.cwl/s2/run");
        assert_eq!(wf.steps[1].run.process_doc().base, "file:///w/wf.cwl");
        assert_eq!(wf.steps[0].run.process_doc().base, "file:///w/tool.cwl");
    }

    #[test]
    fn test_load_graph_document() {
        let l = loader(&[(
            "file:///w/packed.cwl",
            r##"{"cwlVersion": "v1.0", "$graph": [
                {"id": "#main", "class": "Workflow", "steps": [{"id": "s1", "run": "#tool.cwl"}]},
                {"id": "#tool.cwl", "class": "CommandLineTool"}
            ]}"##,
        )]);
        let Process::Workflow(wf) = load_process(&l, "file:///w/packed.cwl").unwrap() else {
            panic!("expected a workflow");
        };
        assert_eq!(wf.process.id, "file:///w/packed.cwl#main");
        assert_eq!(wf.process.doc["cwlVersion"], "v1.0");
        assert_eq!(wf.steps[0].run.id(), "file:///w/packed.cwl#tool.cwl");

        let missing = load_process(&l, "file:///w/packed.cwl#other");
        assert!(matches!(
            missing,
            Err(ClientError::Domain(DomainError::GraphEntryNotFound { .. }))
        ));
    }

    #[test]
    fn test_step_without_run_fails() {
        let l = loader(&[("file:///w/wf.cwl", "class: Workflow\nsteps:\n  s1: {}\n")]);
        assert!(matches!(
            load_process(&l, "file:///w/wf.cwl"),
            Err(ClientError::Domain(DomainError::MissingRun(_)))
        ));
    }

    #[test]
    fn test_unknown_class_fails() {
        let l = loader(&[("file:///w/x.cwl", "class: Operation\n")]);
        assert!(matches!(
            load_process(&l, "file:///w/x.cwl"),
            Err(ClientError::Domain(DomainError::UnknownProcessClass(_)))
        ));
    }

    #[test]
    fn test_inherited_feature_prefers_later_entries() {
        let inherited = vec![
            serde_json::json!({"class": "DockerRequirement", "dockerPull": "hint:1"}),
            serde_json::json!({"class": "DockerRequirement", "dockerPull": "req:1"}),
        ];
        let found = inherited_feature(&inherited, "DockerRequirement").unwrap();
        assert_eq!(found["dockerPull"], "req:1");
    }

    #[test]
    fn test_visit_mut_reaches_every_process() {
        let l = loader(&[
            ("file:///w/wf.cwl", "class: Workflow\nsteps:\n  - id: s1\n    run: tool.cwl\n"),
            ("file:///w/tool.cwl", "class: CommandLineTool\n"),
        ]);
        let mut process = load_process(&l, "file:///w/wf.cwl").unwrap();
        let mut ids = Vec::new();
        process.visit_mut(&mut |p: &mut ProcessDoc| ids.push(p.id.clone()));
        assert_eq!(ids, vec!["file:///w/wf.cwl", "file:///w/tool.cwl"]);
    }
}
