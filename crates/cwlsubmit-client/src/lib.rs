pub mod bundle;
pub mod client;
pub mod container;
pub mod error;
pub mod inputs;
pub mod job;
pub mod loader;
pub mod options;
pub mod pack;
pub mod pathmapper;
pub mod process;
pub mod runner;
pub mod scandeps;
pub mod submission;
pub mod targets;

pub use client::{Client, ClientEvent, SubmitOptions, SubmitOutcome};
pub use error::{ClientError, Result};
pub use options::RunnerOptions;
pub use runner::{ProcessTable, Runner};
