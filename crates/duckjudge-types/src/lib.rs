//! Type definitions shared across the duckjudge execution pipeline
//!
//! This crate holds the contracts that cross process boundaries: the request and
//! response shapes exchanged with the product layer, the warden sidecar DTOs, and
//! the messages spoken to the agent running inside an execution environment.
//! Keeping them in one place lets the executor, the warden and the guest agent
//! evolve independently without their JSON drifting apart.
//!
//! ## Example
//!
//! ```rust
//! use duckjudge_types::{DryExecuteRequest, ExecuteRequest};
//!
//! let request = ExecuteRequest::Dry(DryExecuteRequest {
//!     code_b64: "cHVibGljIGNsYXNzIE1haW4ge30=".to_string(),
//! });
//!
//! let json = serde_json::to_value(&request).unwrap();
//! assert_eq!(json["type"], "dry");
//! ```

pub mod execute;
pub mod guest;
pub mod warden;

pub use execute::*;
pub use guest::*;
pub use warden::*;
