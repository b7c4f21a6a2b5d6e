use crate::process::{Process, StepKey};
use cwlsubmit_core::document::uri_basename;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// Flattens a process tree into one `$graph` document.
///
/// The top-level process becomes `#main`; each distinct process referenced
/// by a step's `run` gets `#<basename>` and the step points at that id.
/// Inline `run` objects stay inline.
pub fn pack(process: &Process) -> Value {
    let mut packer = Packer::default();
    let cwl_version = process.doc().get("cwlVersion").cloned();
    let main = packer.pack_process(process, "#main".to_string());

    let mut graph = vec![main];
    graph.extend(packer.graph);
    for entry in &mut graph {
        if let Value::Object(map) = entry {
            map.remove("cwlVersion");
        }
    }

    let mut doc = Map::new();
    if let Some(version) = cwl_version {
        doc.insert("cwlVersion".to_string(), version);
    }
    doc.insert("$graph".to_string(), Value::Array(graph));
    Value::Object(doc)
}

#[derive(Default)]
struct Packer {
    /// Source id -> packed id.
    ids: HashMap<String, String>,
    graph: Vec<Value>,
}

impl Packer {
    fn packed_id_for(&mut self, source_id: &str) -> (String, bool) {
        if let Some(existing) = self.ids.get(source_id) {
            return (existing.clone(), false);
        }
        let base = match source_id.rsplit_once('#') {
            Some((_, frag)) if !frag.is_empty() && frag != "main" => frag.to_string(),
            _ => uri_basename(source_id).to_string(),
        };
        let mut candidate = format!("#{}", base);
        let mut n = 1;
        while candidate == "#main" || self.ids.values().any(|v| *v == candidate) {
            n += 1;
            candidate = format!("#{}_{}", base, n);
        }
        self.ids.insert(source_id.to_string(), candidate.clone());
        (candidate, true)
    }

    fn pack_process(&mut self, process: &Process, packed_id: String) -> Value {
        let mut doc = process.doc().clone();
        if let Value::Object(map) = &mut doc {
            map.insert("id".to_string(), Value::String(packed_id));
        }

        if let Process::Workflow(workflow) = process {
            for step in &workflow.steps {
                let inline = step_run(&doc, &step.key).is_some_and(Value::is_object);
                let new_run = if inline {
                    let mut packed = self.pack_process(&step.run, String::new());
                    if let Value::Object(map) = &mut packed {
                        map.remove("id");
                    }
                    packed
                } else {
                    let (id, is_new) = self.packed_id_for(step.run.id());
                    if is_new {
                        let packed = self.pack_process(&step.run, id.clone());
                        self.graph.push(packed);
                    }
                    json!(id)
                };
                if let Some(run) = step_run_mut(&mut doc, &step.key) {
                    *run = new_run;
                }
            }
        }
        doc
    }
}

fn step_value<'a>(doc: &'a Value, key: &StepKey) -> Option<&'a Value> {
    let steps = doc.get("steps")?;
    match key {
        StepKey::Index(i) => steps.get(*i),
        StepKey::Name(name) => steps.get(name),
    }
}

fn step_run<'a>(doc: &'a Value, key: &StepKey) -> Option<&'a Value> {
    step_value(doc, key)?.get("run")
}

fn step_run_mut<'a>(doc: &'a mut Value, key: &StepKey) -> Option<&'a mut Value> {
    let steps = doc.get_mut("steps")?;
    let step = match key {
        StepKey::Index(i) => steps.get_mut(*i)?,
        StepKey::Name(name) => steps.get_mut(name)?,
    };
    step.get_mut("run")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ClientError, Result};
    use crate::loader::DocumentLoader;
    use crate::process::load_process;
    use std::collections::HashMap;

    struct MapLoader(HashMap<String, String>);

    impl DocumentLoader for MapLoader {
        fn fetch_text(&self, uri: &str) -> Result<String> {
            self.0.get(uri).cloned().ok_or_else(|| {
                ClientError::Domain(cwlsubmit_core::errors::DomainError::InvalidReference {
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
    fn test_pack_single_tool() {
        let l = loader(&[(
            "file:///w/tool.cwl",
            "cwlVersion: v1.0\nclass: CommandLineTool\nbaseCommand: cat\n",
        )]);
        let packed = pack(&load_process(&l, "file:///w/tool.cwl").unwrap());
        assert_eq!(packed["cwlVersion"], "v1.0");
        assert_eq!(packed["$graph"][0]["id"], "#main");
        assert_eq!(packed["$graph"][0]["baseCommand"], "cat");
        assert!(packed["$graph"][0].get("cwlVersion").is_none());
    }

    #[test]
    fn test_pack_workflow_shares_repeated_tool() {
        let l = loader(&[
            (
                "file:///w/submit_wf.cwl",
                "cwlVersion: v1.0\nclass: Workflow\nsteps:\n  - id: step1\n    run: submit_tool.cwl\n  - id: step2\n    run: submit_tool.cwl\n",
            ),
            (
                "file:///w/submit_tool.cwl",
                "cwlVersion: v1.0\nclass: CommandLineTool\n",
            ),
        ]);
        let packed = pack(&load_process(&l, "file:///w/submit_wf.cwl").unwrap());
        let graph = packed["$graph"].as_array().unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph[0]["id"], "#main");
        assert_eq!(graph[0]["steps"][0]["run"], "#submit_tool.cwl");
        assert_eq!(graph[0]["steps"][1]["run"], "#submit_tool.cwl");
        assert_eq!(graph[1]["id"], "#submit_tool.cwl");
    }

    #[test]
    fn test_pack_keeps_inline_run_inline() {
        let l = loader(&[(
            "file:///w/wf.cwl",
            "class: Workflow\nsteps:\n  s1:\n    run:\n      class: ExpressionTool\n      expression: x\n",
        )]);
        let packed = pack(&load_process(&l, "file:///w/wf.cwl").unwrap());
        let graph = packed["$graph"].as_array().unwrap();
        assert_eq!(graph.len(), 1);
        assert_eq!(graph[0]["steps"]["s1"]["run"]["class"], "ExpressionTool");
        assert!(graph[0]["steps"]["s1"]["run"].get("id").is_none());
    }

    #[test]
    fn test_pack_disambiguates_same_basename() {
        let l = loader(&[
            (
                "file:///w/wf.cwl",
                "class: Workflow\nsteps:\n  - id: a\n    run: a/tool.cwl\n  - id: b\n    run: b/tool.cwl\n",
            ),
            ("file:///w/a/tool.cwl", "class: CommandLineTool\n"),
            ("file:///w/b/tool.cwl", "class: CommandLineTool\n"),
        ]);
        let packed = pack(&load_process(&l, "file:///w/wf.cwl").unwrap());
        let graph = packed["$graph"].as_array().unwrap();
        assert_eq!(graph[0]["steps"][0]["run"], "#tool.cwl");
        assert_eq!(graph[0]["steps"][1]["run"], "#tool.cwl_2");
    }
}
