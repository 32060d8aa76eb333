use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use worldbox_lanes::{Lane, LaneOutcome};
use worldbox_model::{Mutation, WorldStore};

use crate::{
    chat::NOTE_SYNTAX_GUIDELINE,
    collaborators::{ChatCompleter, ChatMessage, ChatRequest},
    telemetry::SubsystemTelemetry,
};

/// Camera observation pipeline: describe each capture, keep only the
/// newest description, and fold it into the world model.
///
/// The describe stage runs one task per capture without cancelling its
/// predecessors — the in-flight count is published for the UI — and
/// resolves races by start time, so a slow early capture can never clobber
/// a fresher one. The merge stage is an ordinary latest-wins lane.
pub struct ObserveSubsystem {
    store: Arc<WorldStore>,
    completer: Arc<dyn ChatCompleter>,
    merge_lane: Lane,
    model: String,
    camera_prompt: Mutex<String>,
    temporal: AtomicBool,
    pending: watch::Sender<usize>,
    description: watch::Sender<String>,
    newest_started: Mutex<i64>,
    last_description: Mutex<String>,
    telemetry: Option<SubsystemTelemetry>,
}

impl ObserveSubsystem {
    /// Wires the subsystem around the shared store.
    #[must_use]
    pub fn new(
        store: Arc<WorldStore>,
        completer: Arc<dyn ChatCompleter>,
        merge_lane: Lane,
        model: impl Into<String>,
    ) -> Self {
        let (pending, _) = watch::channel(0);
        let (description, _) = watch::channel(String::new());
        Self {
            store,
            completer,
            merge_lane,
            model: model.into(),
            camera_prompt: Mutex::new(String::new()),
            temporal: AtomicBool::new(false),
            pending,
            description,
            newest_started: Mutex::new(0),
            last_description: Mutex::new(String::new()),
            telemetry: None,
        }
    }

    /// Attaches a telemetry handle.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: SubsystemTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Sets the instruction passed with every capture.
    pub fn set_camera_prompt(&self, prompt: impl Into<String>) {
        *self.camera_prompt.lock() = prompt.into();
    }

    /// Toggles temporal mode: captures become a timestamped event timeline
    /// instead of alternative perspectives of one subject.
    pub fn set_temporal(&self, temporal: bool) {
        self.temporal.store(temporal, Ordering::Relaxed);
    }

    /// Number of describe calls currently in flight.
    #[must_use]
    pub fn pending_tasks(&self) -> watch::Receiver<usize> {
        self.pending.subscribe()
    }

    /// Last accepted scene description.
    #[must_use]
    pub fn descriptions(&self) -> watch::Receiver<String> {
        self.description.subscribe()
    }

    /// Feeds one captured image (opaque payload owned by the transport).
    pub fn ingest(self: &Arc<Self>, image: impl Into<String>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let image = image.into();
        let started_at = chrono::Utc::now().timestamp_millis();
        let request = ChatRequest::new(
            self.model.clone(),
            vec![
                ChatMessage::system(describe_instructions()),
                ChatMessage::user_with_image(
                    {
                        let prompt = self.camera_prompt.lock();
                        if prompt.is_empty() {
                            "Describe the scene.".to_string()
                        } else {
                            prompt.clone()
                        }
                    },
                    image,
                ),
            ],
        );
        self.pending.send_modify(|n| *n += 1);
        tokio::spawn(async move {
            // Describe calls are deliberately never cancelled: captures are
            // cheap to describe and the newest-wins fold below resolves any
            // out-of-order completions.
            let result = this
                .completer
                .complete(request, &CancellationToken::new())
                .await;
            this.pending.send_modify(|n| *n = n.saturating_sub(1));
            let text = match result {
                Ok(text) => text,
                Err(err) => {
                    if let Some(tel) = &this.telemetry {
                        tel.log(
                            shared_logging::LogLevel::Warn,
                            "observe.describe.failed",
                            serde_json::json!({ "error": format!("{err:#}") }),
                        );
                    }
                    return;
                }
            };
            let Some(inner) = extract_inner(&text, "scene") else {
                return;
            };
            let scene = frame_scene(
                inner,
                this.temporal
                    .load(Ordering::Relaxed)
                    .then(|| chrono::Local::now().format("%H:%M:%S").to_string()),
            );
            {
                let mut newest = this.newest_started.lock();
                if started_at <= *newest {
                    return;
                }
                *newest = started_at;
            }
            {
                let mut last = this.last_description.lock();
                if *last == scene {
                    return;
                }
                last.clone_from(&scene);
            }
            this.description.send_replace(scene.clone());
            let _ = this.merge(scene).await;
        })
    }

    fn merge(self: &Arc<Self>, scene: String) -> JoinHandle<LaneOutcome> {
        let world = self.store.current();
        let temporal = self.temporal.load(Ordering::Relaxed);
        let request = ChatRequest::new(
            self.model.clone(),
            vec![
                ChatMessage::system(merge_instructions(temporal)),
                ChatMessage::user(merge_turn(&world, &scene, temporal)),
            ],
        );
        let completer = Arc::clone(&self.completer);
        let store = Arc::clone(&self.store);
        let telemetry = self.telemetry.clone();
        self.merge_lane.run(move |turn| async move {
            let reply = completer.complete(request, turn.token()).await?;
            let Some(new_world) = extract_block(&reply, "world") else {
                if let Some(tel) = &telemetry {
                    tel.log(
                        shared_logging::LogLevel::Warn,
                        "observe.merge.invalid_response",
                        serde_json::json!({ "bytes": reply.len() }),
                    );
                }
                return Ok(());
            };
            turn.checkpoint()?;
            store.apply(&Mutation::Rewrite {
                document: new_world.to_string(),
            });
            Ok(())
        })
    }
}

fn describe_instructions() -> String {
    format!(
        "Follow the user's instruction and describe the image as a hierarchical XML scene \
         description.\n\n{NOTE_SYNTAX_GUIDELINE}\n\n\
         Respond in XML with a top level tag like this:\n<scene>...</scene>\n"
    )
}

fn merge_instructions(temporal: bool) -> String {
    let perspective = if temporal {
        "The series of frames tells a coherent story that unfolds in time."
    } else {
        "The images are captured from different angles, representing different perspectives \
         of the same subject."
    };
    let shape = if temporal {
        "<world>\n  <event timestamp=\"HH:MM:SS\">describe the initial state</event>\n  \
         <event timestamp=\"HH:MM:SS\">summarize the change</event>\n</world>"
    } else {
        "<world>...</world>"
    };
    format!(
        "You are modeling the world from a series of camera captures. {perspective}\n\
         Carefully analyze the incoming description and update the existing world model with \
         the new information.\n\n{NOTE_SYNTAX_GUIDELINE}\n\n\
         Respond with the updated world model in XML with top level tags like this:\n{shape}\n"
    )
}

fn merge_turn(world: &str, scene: &str, temporal: bool) -> String {
    let (world_label, scene_label) = if temporal {
        ("Previous", "Newer")
    } else {
        ("Observed", "Alternative perspective")
    };
    format!("{world_label} world model:\n{world}\n\n{scene_label} image:\n{scene}")
}

fn frame_scene(inner: &str, timestamp: Option<String>) -> String {
    let open = timestamp.map_or_else(
        || "<scene>".to_string(),
        |stamp| format!("<scene timestamp=\"{stamp}\">"),
    );
    let body = inner
        .trim()
        .lines()
        .map(|line| format!("  {line}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{open}\n{body}\n</scene>")
}

fn extract_inner<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = text.find(&open)? + open.len();
    let end = start + text[start..].find(&close)?;
    Some(&text[start..end])
}

fn extract_block<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = text.find(&open)?;
    let end = start + text[start..].find(&close)? + close.len();
    Some(&text[start..end])
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::Result;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use worldbox_model::ToolRegistry;

    use super::*;

    /// Fake collaborator covering both pipeline stages: describe calls
    /// (recognized by their image payload) return a scene, merge calls
    /// return a world. Per-image delays let tests reorder completions.
    struct TwoStageChat {
        merges: Mutex<usize>,
    }

    impl TwoStageChat {
        fn new() -> Self {
            Self {
                merges: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl ChatCompleter for TwoStageChat {
        async fn complete(
            &self,
            request: ChatRequest,
            _cancel: &CancellationToken,
        ) -> Result<String> {
            let user = request.messages.last().unwrap().clone();
            if let Some(image) = user.image {
                let (delay_ms, scene) = match image.as_str() {
                    "slow" => (60, "a slow view"),
                    "fast" => (5, "a fast view"),
                    other => (5, other),
                };
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(format!("<scene>{scene}</scene>"))
            } else {
                *self.merges.lock() += 1;
                Ok("here you go: <world><merged/></world> done".to_string())
            }
        }

        async fn complete_streaming(
            &self,
            _request: ChatRequest,
            _sink: mpsc::Sender<String>,
            _cancel: &CancellationToken,
        ) -> Result<()> {
            Ok(())
        }

        async fn run_tools(
            &self,
            _request: ChatRequest,
            _tools: &ToolRegistry,
            _cancel: &CancellationToken,
        ) -> Result<String> {
            Ok(String::new())
        }
    }

    fn subsystem(completer: Arc<TwoStageChat>) -> (Arc<ObserveSubsystem>, Arc<WorldStore>) {
        let store = Arc::new(WorldStore::new());
        let observe = Arc::new(ObserveSubsystem::new(
            Arc::clone(&store),
            completer,
            Lane::new("observe"),
            "test-model",
        ));
        (observe, store)
    }

    #[tokio::test]
    async fn capture_flows_into_the_world_model() {
        let completer = Arc::new(TwoStageChat::new());
        let (observe, store) = subsystem(Arc::clone(&completer));
        observe.ingest("a desk by a window").await.unwrap();
        assert_eq!(store.current(), "<world><merged/></world>");
        assert!(observe
            .descriptions()
            .borrow()
            .contains("a desk by a window"));
        assert_eq!(*observe.pending_tasks().borrow(), 0);
    }

    #[tokio::test]
    async fn stale_describe_loses_to_newer_capture() {
        let completer = Arc::new(TwoStageChat::new());
        let (observe, _) = subsystem(Arc::clone(&completer));
        let slow = observe.ingest("slow");
        tokio::time::sleep(Duration::from_millis(15)).await;
        let fast = observe.ingest("fast");
        slow.await.unwrap();
        fast.await.unwrap();
        assert!(observe.descriptions().borrow().contains("a fast view"));
        assert_eq!(*completer.merges.lock(), 1);
    }

    #[tokio::test]
    async fn duplicate_description_merges_only_once() {
        let completer = Arc::new(TwoStageChat::new());
        let (observe, _) = subsystem(Arc::clone(&completer));
        observe.ingest("same spot").await.unwrap();
        observe.ingest("same spot").await.unwrap();
        assert_eq!(*completer.merges.lock(), 1);
    }

    #[test]
    fn scene_framing_indents_and_stamps() {
        let framed = frame_scene("a lamp\na desk", Some("10:30:00".to_string()));
        assert_eq!(
            framed,
            "<scene timestamp=\"10:30:00\">\n  a lamp\n  a desk\n</scene>"
        );
    }

    #[test]
    fn block_extraction_keeps_the_tags() {
        let text = "chatter <world><a/></world> trailer";
        assert_eq!(extract_block(text, "world").unwrap(), "<world><a/></world>");
        assert!(extract_block("no model here", "world").is_none());
    }
}
