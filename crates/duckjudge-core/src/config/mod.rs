//! Executor configuration: YAML loading, defaults and validation.

pub mod loader;
pub mod types;
pub mod validation;

pub use loader::*;
pub use types::*;


use crate::errors::ExecutorError;
use std::path::Path;

/// Load a configuration from a YAML file
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<ExecutorConfig, ExecutorError> {
    ConfigLoader::from_file(path).await
}
