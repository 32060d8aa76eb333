use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::store::{Mutation, WorldStore};

/// Tool name for script-based mutations.
pub const TOOL_UPDATE_BY_SCRIPT: &str = "update_by_script";

/// Tool name for whole-document rewrites.
pub const TOOL_REWRITE_XML: &str = "rewrite_xml";

/// Machine-readable description of one tool, advertised to the
/// tool-calling collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    /// Tool name.
    pub name: String,
    /// Human-readable purpose.
    pub description: String,
    /// JSON-schema parameter object.
    pub parameters: Value,
}

#[derive(Debug, Deserialize)]
struct ScriptArgs {
    script: String,
}

#[derive(Debug, Deserialize)]
struct RewriteArgs {
    xml: String,
}

/// The two named mutation operations the language-model service may invoke.
///
/// Arguments arrive as raw JSON text exactly as produced by the model; any
/// parse problem becomes a textual tool result rather than an error path,
/// so a malformed call never disturbs the lane running it.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    store: Arc<WorldStore>,
}

impl ToolRegistry {
    /// Creates the registry over the shared store.
    #[must_use]
    pub const fn new(store: Arc<WorldStore>) -> Self {
        Self { store }
    }

    /// Specs for both tools, in advertisement order.
    #[must_use]
    pub fn specs(&self) -> Vec<ToolSpec> {
        vec![
            ToolSpec {
                name: TOOL_UPDATE_BY_SCRIPT.to_string(),
                description:
                    "Update the world model by running a mutation script against the document"
                        .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "script": {
                            "type": "string",
                            "description": "A mutation script. `document` is the parsed world \
                                            document; `world` is the root <world> element."
                        }
                    },
                    "required": ["script"]
                }),
            },
            ToolSpec {
                name: TOOL_REWRITE_XML.to_string(),
                description: "Rewrite the entire world xml".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "xml": {
                            "type": "string",
                            "description": "The new world xml; top level tag must be \
                                            <world>...</world>."
                        }
                    },
                    "required": ["xml"]
                }),
            },
        ]
    }

    /// Invokes a tool by name with raw JSON arguments.
    #[must_use]
    pub fn dispatch(&self, name: &str, raw_args: &str) -> String {
        match name {
            TOOL_UPDATE_BY_SCRIPT => match serde_json::from_str::<ScriptArgs>(raw_args) {
                Ok(args) => self.store.apply(&Mutation::Script {
                    script: args.script,
                }),
                Err(err) => format!("Error: invalid arguments for {name}: {err}"),
            },
            TOOL_REWRITE_XML => match serde_json::from_str::<RewriteArgs>(raw_args) {
                Ok(args) => self.store.apply(&Mutation::Rewrite { document: args.xml }),
                Err(err) => format!("Error: invalid arguments for {name}: {err}"),
            },
            other => format!("Error: unknown tool '{other}'"),
        }
    }

    /// The store behind this registry.
    #[must_use]
    pub fn store(&self) -> &Arc<WorldStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ToolRegistry {
        ToolRegistry::new(Arc::new(WorldStore::new()))
    }

    #[test]
    fn dispatches_script_tool() {
        let registry = registry();
        let result = registry.dispatch(
            TOOL_UPDATE_BY_SCRIPT,
            r#"{"script": "world.append_child(\"user\");"}"#,
        );
        assert_eq!(result, "Done");
        assert_eq!(
            registry.store().current(),
            "<world><user></user></world>"
        );
    }

    #[test]
    fn dispatches_rewrite_tool() {
        let registry = registry();
        let result = registry.dispatch(TOOL_REWRITE_XML, r#"{"xml": "<world><a/></world>"}"#);
        assert_eq!(result, "Done");
        assert_eq!(registry.store().current(), "<world><a/></world>");
    }

    #[test]
    fn malformed_arguments_become_tool_text() {
        let registry = registry();
        let result = registry.dispatch(TOOL_UPDATE_BY_SCRIPT, "{not json");
        assert!(result.starts_with("Error:"));
        assert!(registry.store().is_empty());
    }

    #[test]
    fn unknown_tool_is_reported_not_fatal() {
        let registry = registry();
        let result = registry.dispatch("erase_everything", "{}");
        assert_eq!(result, "Error: unknown tool 'erase_everything'");
    }

    #[test]
    fn specs_cover_both_operations() {
        let specs = registry().specs();
        let names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, [TOOL_UPDATE_BY_SCRIPT, TOOL_REWRITE_XML]);
        assert!(specs.iter().all(|s| s.parameters.get("type").is_some()));
    }
}
