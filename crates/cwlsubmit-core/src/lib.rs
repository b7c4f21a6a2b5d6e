pub mod config;
pub mod constants;
pub mod document;
pub mod errors;
pub mod logging;
pub mod manifest;
pub mod model;
