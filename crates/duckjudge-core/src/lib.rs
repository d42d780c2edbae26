//! Execution pipeline of the duckjudge grader.
//!
//! Learner submissions arrive base64 encoded, are parsed and analyzed for an
//! entry point, instrumented with signed grading code, compiled and run
//! inside isolated environments, and come back as structured results.
//!
//! # Architecture Overview
//!
//! - **Analyzer**: lexer, recursive-descent parser and entry-point analysis
//! - **Harness**: splices timing and test-case code into the entry method
//! - **Filesystem pooler**: keeps a self-tuning population of warm images
//! - **Fleet**: launches, shares, accounts for and reaps environments
//! - **Executors**: sandbox backends and the guest agent protocol
//! - **Queue and handler**: per-service job queues drained by worker pools
//! - **Service**: the request/response facade used by the HTTP server

pub mod analyzer;
pub mod config;
pub mod errors;
pub mod executors;
pub mod fleet;
pub mod handler;
pub mod harness;
pub mod pooler;
pub mod queue;
pub mod resources;
pub mod service;
pub mod testcases;
pub mod test_utils;

pub use analyzer::{SourceAnalyzer, CodeAnalysisResult};
pub use config::*;
pub use errors::{ExecutorError, SyntaxError};
pub use executors::{SandboxBackend, WardenBackend};
pub use fleet::{EnvironmentLease, FleetManager};
pub use handler::{ExecutionHandler, ExecutionJob, JobUpdate};
pub use pooler::{FilesystemPooler, ImageBuilder};
pub use resources::{ImageFamily, Resources};
pub use service::ExecutorService;
pub use testcases::{ExerciseStore, InMemoryExerciseStore};
