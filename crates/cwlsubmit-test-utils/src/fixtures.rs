use std::fs;
use std::path::{Path, PathBuf};

pub const BLORP_TXT: &str = "blopper blubber\n";
pub const BLUB_TXT: &str = "blub blub blub\n";

pub const SUBMIT_TOOL_CWL: &str = r##"cwlVersion: v1.0
class: CommandLineTool
requirements:
  - class: DockerRequirement
    dockerPull: debian:8
inputs:
  - id: x
    type: File
    default:
      class: File
      location: blub.txt
    inputBinding:
      position: 1
outputs: []
baseCommand: cat
"##;

pub const SUBMIT_WF_CWL: &str = r##"cwlVersion: v1.0
class: Workflow
inputs:
  - id: x
    type: File
outputs: []
steps:
  - id: step1
    in:
      - id: x
        source: "#x"
    out: []
    run: submit_tool.cwl
"##;

pub const SECRET_WF_CWL: &str = r##"cwlVersion: v1.0
class: Workflow
$namespaces:
  cwltool: "http://commonwl.org/cwltool#"
hints:
  - class: cwltool:Secrets
    secrets: ["#main/pw"]
inputs:
  - id: pw
    type: string
outputs: []
steps:
  - id: step1
    in:
      - id: x
        default:
          class: File
          location: blub.txt
    out: []
    run: submit_tool.cwl
"##;

/// On-disk layout of the submission fixtures.
pub struct Fixtures {
    pub workflow_dir: PathBuf,
    pub inputs_dir: PathBuf,
}

impl Fixtures {
    /// Writes the workflow, tool and input files under `root`.
    pub fn write(root: &Path) -> Self {
        let workflow_dir = root.join("wf");
        let inputs_dir = root.join("inputs");
        fs::create_dir_all(&workflow_dir).expect("Failed to create workflow dir");
        fs::create_dir_all(&inputs_dir).expect("Failed to create inputs dir");

        for (dir, name, content) in [
            (&workflow_dir, "submit_wf.cwl", SUBMIT_WF_CWL),
            (&workflow_dir, "submit_tool.cwl", SUBMIT_TOOL_CWL),
            (&workflow_dir, "secret_wf.cwl", SECRET_WF_CWL),
            (&workflow_dir, "blub.txt", BLUB_TXT),
            (&inputs_dir, "blorp.txt", BLORP_TXT),
        ] {
            fs::write(dir.join(name), content)
                .unwrap_or_else(|e| panic!("Failed to write fixture {}: {}", name, e));
        }
        fs::write(
            inputs_dir.join("job.json"),
            r##"{"x": {"class": "File", "location": "blorp.txt"}}"##,
        )
        .expect("Failed to write job order");

        Self {
            workflow_dir,
            inputs_dir,
        }
    }

    pub fn workflow(&self) -> PathBuf {
        self.workflow_dir.join("submit_wf.cwl")
    }

    pub fn tool(&self) -> PathBuf {
        self.workflow_dir.join("submit_tool.cwl")
    }

    pub fn secret_workflow(&self) -> PathBuf {
        self.workflow_dir.join("secret_wf.cwl")
    }

    pub fn job_order(&self) -> PathBuf {
        self.inputs_dir.join("job.json")
    }

    pub fn blorp(&self) -> PathBuf {
        self.inputs_dir.join("blorp.txt")
    }

    /// `file://` URI of `path`, for job orders built in memory.
    pub fn file_uri(path: &Path) -> String {
        let canonical = fs::canonicalize(path).expect("Fixture path must exist");
        format!("file://{}", canonical.display())
    }
}
