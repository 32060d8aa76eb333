use rhai::{Array, Dynamic, Engine, Scope};

use crate::dom::{XmlDocument, XmlElement};

/// Operation budget for one mutation script. Scripts that exceed it fail
/// as ordinary mutation errors instead of stalling the store.
pub const OPERATION_BUDGET: u64 = 100_000;

/// Tag of the named root element handed to scripts as `world`.
pub const ROOT_BINDING_TAG: &str = "world";

/// Executes a caller-supplied mutation script against the parsed document.
///
/// The scope exposes exactly two bindings: `document` (the parsed tree) and
/// `world` (the `<world>` element when present, unit otherwise). The engine
/// reaches nothing else — no filesystem, no globals, no registered modules
/// beyond the tree capability below. Any runtime error, including budget
/// exhaustion, is reported as a plain message and leaves the caller free to
/// discard the tree.
pub fn run_mutation(document: &XmlDocument, script: &str) -> Result<(), String> {
    let engine = build_engine();
    let mut scope = Scope::new();
    scope.push("document", document.clone());
    let world = document
        .select(ROOT_BINDING_TAG)
        .map_or(Dynamic::UNIT, Dynamic::from);
    scope.push_dynamic("world", world);
    engine
        .run_with_scope(&mut scope, script)
        .map_err(|err| err.to_string())
}

fn build_engine() -> Engine {
    let mut engine = Engine::new();
    engine.set_max_operations(OPERATION_BUDGET);
    engine.set_max_call_levels(32);
    engine.set_max_expr_depths(64, 64);

    engine.register_type_with_name::<XmlDocument>("Document");
    engine.register_fn("root", |doc: &mut XmlDocument| doc.root());
    engine.register_fn("select", |doc: &mut XmlDocument, tag: &str| {
        doc.select(tag).map_or(Dynamic::UNIT, Dynamic::from)
    });
    engine.register_fn("select_all", |doc: &mut XmlDocument, tag: &str| {
        doc.select_all(tag)
            .into_iter()
            .map(Dynamic::from)
            .collect::<Array>()
    });

    engine.register_type_with_name::<XmlElement>("Element");
    engine.register_fn("tag", |el: &mut XmlElement| el.tag());
    engine.register_fn("text", |el: &mut XmlElement| el.text());
    engine.register_fn("set_text", |el: &mut XmlElement, text: &str| {
        el.set_text(text);
    });
    engine.register_fn("attr", |el: &mut XmlElement, name: &str| {
        el.attr(name).map_or(Dynamic::UNIT, Dynamic::from)
    });
    engine.register_fn("set_attr", |el: &mut XmlElement, name: &str, value: &str| {
        el.set_attr(name, value);
    });
    engine.register_fn("remove_attr", |el: &mut XmlElement, name: &str| {
        el.remove_attr(name)
    });
    engine.register_fn("append_child", |el: &mut XmlElement, tag: &str| {
        el.append_element(tag)
    });
    engine.register_fn("append_text", |el: &mut XmlElement, text: &str| {
        el.append_text(text);
    });
    engine.register_fn("children", |el: &mut XmlElement| {
        el.children().into_iter().map(Dynamic::from).collect::<Array>()
    });
    engine.register_fn("child_count", |el: &mut XmlElement| {
        i64::try_from(el.child_count()).unwrap_or(i64::MAX)
    });
    engine.register_fn("remove_child", |el: &mut XmlElement, child: XmlElement| {
        el.remove_child(&child)
    });
    engine.register_fn("clear_children", |el: &mut XmlElement| {
        el.clear_children();
    });
    engine.register_fn("select", |el: &mut XmlElement, tag: &str| {
        el.select(tag).map_or(Dynamic::UNIT, Dynamic::from)
    });
    engine.register_fn("select_all", |el: &mut XmlElement, tag: &str| {
        el.select_all(tag)
            .into_iter()
            .map(Dynamic::from)
            .collect::<Array>()
    });

    engine
}
