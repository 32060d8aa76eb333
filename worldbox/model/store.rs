use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::{
    dom::XmlDocument,
    script,
    telemetry::ModelTelemetry,
};

/// Canonical sentinel for a world nobody has modeled yet.
pub const EMPTY_WORLD: &str = "<world></world>";

/// A structural edit requested by the tool-calling collaborator.
///
/// Producers never build these directly; they arrive through the tool
/// protocol in [`crate::tools`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Mutation {
    /// Execute a mutation script against the parsed document.
    Script {
        /// The script body.
        script: String,
    },
    /// Replace the whole document with the supplied text.
    Rewrite {
        /// The replacement document.
        document: String,
    },
}

/// The single shared world document.
///
/// Reads are wait-free snapshots; every published value reaches all
/// subscribers with last-writer-wins ordering. Each `apply` call is
/// synchronous and internally locked, so one mutation is atomic — but a
/// lane's read-snapshot-then-apply sequence is not, and two lanes racing
/// on the same snapshot will silently lose the first publish. That
/// trade-off is deliberate and documented rather than fixed.
#[derive(Debug)]
pub struct WorldStore {
    current: watch::Sender<String>,
    write_lock: Mutex<()>,
    telemetry: Option<ModelTelemetry>,
}

impl Default for WorldStore {
    fn default() -> Self {
        Self::new()
    }
}

impl WorldStore {
    /// Creates a store holding the empty sentinel.
    #[must_use]
    pub fn new() -> Self {
        let (current, _) = watch::channel(EMPTY_WORLD.to_string());
        Self {
            current,
            write_lock: Mutex::new(()),
            telemetry: None,
        }
    }

    /// Attaches a telemetry handle.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: ModelTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Snapshot of the current document text.
    #[must_use]
    pub fn current(&self) -> String {
        self.current.borrow().clone()
    }

    /// Whether the store still holds the empty sentinel.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self.current.borrow() == EMPTY_WORLD
    }

    /// Subscribes to document updates.
    ///
    /// The receiver immediately observes the current value and then every
    /// newly published one, last writer visible to all subscribers.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.current.subscribe()
    }

    /// Forgets everything: publishes the empty sentinel.
    pub fn reset(&self) {
        let _guard = self.write_lock.lock();
        self.publish(EMPTY_WORLD.to_string(), "reset");
    }

    /// Applies one mutation and returns the textual tool result.
    ///
    /// Synchronous and free of I/O; the caller is typically a tool callback
    /// inside some lane's asynchronous flow. Script failures of any kind
    /// leave the store untouched and come back as `"Error: …"`. A rewrite
    /// publishes unvalidated, exactly as requested — downstream consumers
    /// tolerate malformed documents.
    pub fn apply(&self, mutation: &Mutation) -> String {
        let _guard = self.write_lock.lock();
        match mutation {
            Mutation::Rewrite { document } => {
                self.publish(document.clone(), "rewrite");
                "Done".to_string()
            }
            Mutation::Script { script } => match mutate(&self.current(), script) {
                Ok(updated) => {
                    self.publish(updated, "script");
                    "Done".to_string()
                }
                Err(message) => {
                    if let Some(tel) = &self.telemetry {
                        tel.mutation_rejected(&message);
                    }
                    format!("Error: {message}")
                }
            },
        }
    }

    fn publish(&self, document: String, origin: &str) {
        let size = document.len();
        self.current.send_replace(document);
        if let Some(tel) = &self.telemetry {
            tel.document_published(origin, size);
        }
    }
}

fn mutate(current: &str, mutation_script: &str) -> Result<String, String> {
    let document = XmlDocument::parse(current).map_err(|err| err.to_string())?;
    script::run_mutation(&document, mutation_script)?;
    document.to_xml().map_err(|err| err.to_string())
}
