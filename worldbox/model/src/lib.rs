#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rust_2018_idioms,
    missing_docs
)]

//! Worldbox model module – the shared world document, its mutation
//! sandbox, and the tool protocol the language-model collaborator drives.

/// Mutable XML tree used during script mutations.
#[path = "../dom.rs"]
pub mod dom;

/// Sandboxed execution of caller-supplied mutation scripts.
#[path = "../script.rs"]
pub mod script;

/// The shared world-model store.
#[path = "../store.rs"]
pub mod store;

/// Named mutation tools exposed to the tool-calling collaborator.
#[path = "../tools.rs"]
pub mod tools;

/// Export/import of the world document as a single text file.
#[path = "../archive.rs"]
pub mod archive;

/// Telemetry builder for model components.
#[path = "../telemetry.rs"]
pub mod telemetry;

pub use dom::{DomError, XmlDocument, XmlElement};
pub use store::{Mutation, WorldStore, EMPTY_WORLD};
pub use telemetry::{ModelTelemetry, ModelTelemetryBuilder};
pub use tools::{ToolRegistry, ToolSpec, TOOL_REWRITE_XML, TOOL_UPDATE_BY_SCRIPT};
