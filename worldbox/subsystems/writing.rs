use std::sync::Arc;

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use worldbox_lanes::{Lane, LaneOutcome};
use worldbox_model::WorldStore;

use crate::collaborators::{ChatCompleter, ChatMessage, ChatRequest};

/// Narrative writing lane: streams a piece of writing grounded in the
/// current world model into a live preview.
///
/// Each trigger clears the preview first and is latest-wins; tokens from
/// a superseded stream never reach the preview.
pub struct WritingSubsystem {
    store: Arc<WorldStore>,
    completer: Arc<dyn ChatCompleter>,
    lane: Lane,
    model: String,
    preview: watch::Sender<String>,
}

impl WritingSubsystem {
    /// Wires the subsystem around the shared store.
    #[must_use]
    pub fn new(
        store: Arc<WorldStore>,
        completer: Arc<dyn ChatCompleter>,
        lane: Lane,
        model: impl Into<String>,
    ) -> Self {
        let (preview, _) = watch::channel(String::new());
        Self {
            store,
            completer,
            lane,
            model: model.into(),
            preview,
        }
    }

    /// The accumulating preview text.
    #[must_use]
    pub fn previews(&self) -> watch::Receiver<String> {
        self.preview.subscribe()
    }

    /// Produces a new piece of writing for the prompt.
    pub fn write(&self, prompt: impl Into<String>) -> JoinHandle<LaneOutcome> {
        self.preview.send_replace(String::new());
        let world = self.store.current();
        let request = ChatRequest::new(
            self.model.clone(),
            vec![
                ChatMessage::system(writing_instructions(&world)),
                ChatMessage::user(prompt.into()),
            ],
        );
        let completer = Arc::clone(&self.completer);
        let preview_tx = self.preview.clone();
        self.lane.run(move |turn| async move {
            let (sink, mut chunks) = mpsc::channel(16);
            let token = turn.token().clone();
            let stream = completer.complete_streaming(request, sink, &token);
            let accumulate = async {
                let mut text = String::new();
                while let Some(chunk) = chunks.recv().await {
                    if turn.superseded() {
                        break;
                    }
                    text.push_str(&chunk);
                    preview_tx.send_replace(text.clone());
                }
            };
            let (stream_result, ()) = futures::join!(stream, accumulate);
            stream_result?;
            Ok(())
        })
    }
}

fn writing_instructions(world: &str) -> String {
    format!(
        "You are a talented writer. Here is the world knowledge you have:\n{world}\n\n\
         Based on the user's writing prompt, produce the writing grounded in that world \
         knowledge. Respond in markdown format.\n"
    )
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use worldbox_model::ToolRegistry;

    use super::*;

    struct TokenStreamChat {
        tokens: Vec<String>,
    }

    #[async_trait]
    impl ChatCompleter for TokenStreamChat {
        async fn complete(
            &self,
            _request: ChatRequest,
            _cancel: &CancellationToken,
        ) -> Result<String> {
            Ok(self.tokens.concat())
        }

        async fn complete_streaming(
            &self,
            _request: ChatRequest,
            sink: mpsc::Sender<String>,
            _cancel: &CancellationToken,
        ) -> Result<()> {
            for token in &self.tokens {
                if sink.send(token.clone()).await.is_err() {
                    break;
                }
            }
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

    #[tokio::test]
    async fn tokens_accumulate_into_the_preview() {
        let store = Arc::new(WorldStore::new());
        let writing = WritingSubsystem::new(
            store,
            Arc::new(TokenStreamChat {
                tokens: vec!["Once".into(), " upon".into(), " a tide.".into()],
            }),
            Lane::new("writing"),
            "test-model",
        );
        let outcome = writing.write("a short opening").await.unwrap();
        assert_eq!(outcome, LaneOutcome::Applied);
        assert_eq!(*writing.previews().borrow(), "Once upon a tide.");
    }

    #[tokio::test]
    async fn new_trigger_clears_the_preview_first() {
        use tokio::sync::Notify;

        struct GatedStreamChat {
            gate: Arc<Notify>,
        }

        #[async_trait]
        impl ChatCompleter for GatedStreamChat {
            async fn complete(
                &self,
                _request: ChatRequest,
                _cancel: &CancellationToken,
            ) -> Result<String> {
                Ok(String::new())
            }

            async fn complete_streaming(
                &self,
                _request: ChatRequest,
                sink: mpsc::Sender<String>,
                _cancel: &CancellationToken,
            ) -> Result<()> {
                self.gate.notified().await;
                let _ = sink.send("fresh".to_string()).await;
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

        let store = Arc::new(WorldStore::new());
        let gate = Arc::new(Notify::new());
        let writing = WritingSubsystem::new(
            store,
            Arc::new(GatedStreamChat { gate: gate.clone() }),
            Lane::new("writing"),
            "test-model",
        );
        gate.notify_one();
        writing.write("first").await.unwrap();
        assert_eq!(*writing.previews().borrow(), "fresh");

        let handle = writing.write("second");
        // Cleared synchronously on trigger, before any token arrives.
        assert_eq!(*writing.previews().borrow(), "");
        gate.notify_one();
        handle.await.unwrap();
        assert_eq!(*writing.previews().borrow(), "fresh");
    }
}
