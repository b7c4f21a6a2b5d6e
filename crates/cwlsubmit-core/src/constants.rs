pub mod prefixes {
    pub const STORAGE: &str = "storage:";
    pub const ANONYMOUS: &str = "_:";
}

pub mod exit_codes {
    pub const SUCCESS: i64 = 0;
    pub const UNSUPPORTED_REQUIREMENT: i64 = 33;
}

pub mod mounts {
    pub const OUTPUT_DIR: &str = "/var/spool/cwl";
    pub const OUTPUT_JSON: &str = "/var/spool/cwl/cwl.output.json";
    pub const WORKFLOW_JSON: &str = "/var/lib/cwl/workflow.json";
    pub const WORKFLOW_COLLECTION: &str = "/var/lib/cwl/workflow";
    pub const INPUT_JSON: &str = "/var/lib/cwl/cwl.input.json";
    pub const SECRETS_DIR: &str = "/secrets";
    pub const STDOUT: &str = "stdout";
}

pub mod files {
    pub const OUTPUT_OBJECT: &str = "cwl.output.json";
    pub const PACKED_WORKFLOW: &str = "workflow.cwl";
}

pub mod runner {
    pub const PROGRAM: &str = "cwl-runner";
    pub const SCRIPT_VERSION: &str = "master";
    pub const REPOSITORY: &str = "cwlsubmit";
    pub const IMAGE_REPO: &str = "cwlsubmit/jobs";
}

/// Keys used by the cluster's CWL extension namespace.
pub mod ext {
    pub const NAMESPACE: &str = "http://arvados.org/cwl#";
    pub const DOCKER_COLLECTION_PDH: &str = "http://arvados.org/cwl#dockerCollectionPDH";
    pub const RUNNER_RESOURCES: &str = "WorkflowRunnerResources";
    pub const REUSE_REQUIREMENT: &str = "ReuseRequirement";
    pub const SECRETS: &str = "Secrets";
}

pub mod states {
    pub const COMMITTED: &str = "Committed";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_constants() {
        assert_eq!(prefixes::STORAGE, "storage:");
        assert_eq!(prefixes::ANONYMOUS, "_:");
    }

    #[test]
    fn test_mount_constants() {
        assert!(mounts::OUTPUT_JSON.starts_with(mounts::OUTPUT_DIR));
        assert!(mounts::WORKFLOW_JSON.starts_with(mounts::WORKFLOW_COLLECTION));
    }

    #[test]
    fn test_unsupported_requirement_code() {
        assert_eq!(exit_codes::UNSUPPORTED_REQUIREMENT, 33);
    }
}
