use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error on path '{path}': {source}")]
    PathIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse JSON document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse YAML document: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("Failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Error walking directory: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("XDG Base Directory Error: {0}")]
    Xdg(#[from] xdg::BaseDirectoriesError),

    #[error("Invalid configuration: {0}")]
    General(String),

    #[error("Could not determine HOME directory.")]
    HomeDirectoryNotFound,
}

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("Document '{0}' has no 'class' field, or its class is not a CWL process.")]
    UnknownProcessClass(String),

    #[error("Workflow step '{0}' has no 'run' field.")]
    MissingRun(String),

    #[error("Could not find '#{fragment}' in the $graph of '{document}'.")]
    GraphEntryNotFound { document: String, fragment: String },

    #[error("Invalid storage address '{0}'. Expected '<md5>+<size>[/path]'.")]
    InvalidStorageAddress(String),

    #[error("Malformed manifest: {0}")]
    MalformedManifest(String),

    #[error("Secret input '{0}' must be a string.")]
    InvalidSecret(String),

    #[error("Runner RAM must be a positive number of MiB, got {0}.")]
    InvalidRunnerRam(i64),
}
