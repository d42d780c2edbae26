//! In-process doubles for the sandbox backend and the image builder.
//!
//! They let the pooler, fleet and handler be driven end to end without a
//! warden, a hypervisor or a JVM.

pub mod images;
pub mod sandbox;

pub use images::CountingImageBuilder;
pub use sandbox::ScriptedBackend;
