use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] cwlsubmit_core::errors::ConfigError),

    #[error(transparent)]
    Domain(#[from] cwlsubmit_core::errors::DomainError),

    #[error(transparent)]
    WalkDir(#[from] walkdir::Error),

    #[error("Collection '{0}' was not found in storage.")]
    CollectionNotFound(String),

    #[error("File '{path}' was not found in collection '{pdh}'.")]
    FileNotFound { pdh: String, path: String },

    #[error("Block '{0}' is missing from storage.")]
    BlockNotFound(String),

    #[error("No record with UUID '{0}' exists on the cluster.")]
    RecordNotFound(String),

    #[error("Failed to upload image '{image}': {reason}")]
    ImageUpload { image: String, reason: String },

    #[error("Command '{command}' failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Unsupported requirement: {0}")]
    UnsupportedRequirement(String),

    #[error("No mapping for local reference '{0}'. It was not found by the dependency scan.")]
    UnmappedReference(String),

    #[error("Invalid path '{path}': {reason}")]
    InvalidPath {
        path: std::path::PathBuf,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, ClientError>;
