use std::sync::Arc;

use tokio::{sync::watch, task::JoinHandle};

use worldbox_lanes::{Lane, LaneOutcome, SubmissionQueue};
use worldbox_model::{ToolRegistry, WorldStore};

use crate::{
    chat::NOTE_SYNTAX_GUIDELINE,
    collaborators::{ChatCompleter, ChatMessage, ChatRequest},
};

/// Dictated-instruction intake: every recognized utterance becomes a
/// structural edit of the world model through the mutation tools.
///
/// Same queue discipline as the chat lane, without transcript or speech:
/// snapshot the queue, run a latest-wins tool call, reconcile on success,
/// publish the assistant's closing text for the message display.
pub struct DictateSubsystem {
    store: Arc<WorldStore>,
    completer: Arc<dyn ChatCompleter>,
    tools: ToolRegistry,
    lane: Lane,
    queue: Arc<SubmissionQueue>,
    model: String,
    message: watch::Sender<String>,
}

impl DictateSubsystem {
    /// Wires the subsystem around the shared store.
    #[must_use]
    pub fn new(
        store: Arc<WorldStore>,
        completer: Arc<dyn ChatCompleter>,
        lane: Lane,
        model: impl Into<String>,
    ) -> Self {
        let (message, _) = watch::channel(String::new());
        Self {
            tools: ToolRegistry::new(Arc::clone(&store)),
            store,
            completer,
            lane,
            queue: Arc::new(SubmissionQueue::new()),
            model: model.into(),
            message,
        }
    }

    /// Submits one dictated instruction.
    pub fn submit(&self, text: impl Into<String>) -> JoinHandle<LaneOutcome> {
        self.queue.push(text);
        let inputs = self.queue.snapshot();
        let world = self.store.current();
        let request = ChatRequest::new(
            self.model.clone(),
            vec![
                ChatMessage::system(dictation_instructions(&world)),
                ChatMessage::user(inputs.join("; ")),
            ],
        );
        let completer = Arc::clone(&self.completer);
        let tools = self.tools.clone();
        let queue = Arc::clone(&self.queue);
        let message_tx = self.message.clone();
        self.lane.run(move |turn| async move {
            let closing = completer.run_tools(request, &tools, turn.token()).await?;
            turn.checkpoint()?;
            queue.reconcile(&inputs);
            message_tx.send_replace(closing);
            Ok(())
        })
    }

    /// The assistant's closing text from the last applied turn.
    #[must_use]
    pub fn messages(&self) -> watch::Receiver<String> {
        self.message.subscribe()
    }

    /// Inputs still waiting to be incorporated.
    #[must_use]
    pub fn pending_inputs(&self) -> usize {
        self.queue.len()
    }
}

fn dictation_instructions(world: &str) -> String {
    format!(
        "Model the world with XML. The current model is:\n```xml\n{world}\n```\n\n\
         {NOTE_SYNTAX_GUIDELINE}\n\n\
         Now update the model from the user's instructions. You must use exactly one tool. \
         Do not say anything after the tool call.\n"
    )
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use worldbox_model::TOOL_UPDATE_BY_SCRIPT;

    use super::*;

    /// Fake collaborator that applies one script mutation, as the live
    /// model would, and closes with silence.
    struct ScriptingChat {
        script: String,
    }

    #[async_trait]
    impl ChatCompleter for ScriptingChat {
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
            _sink: mpsc::Sender<String>,
            _cancel: &CancellationToken,
        ) -> Result<()> {
            Ok(())
        }

        async fn run_tools(
            &self,
            _request: ChatRequest,
            tools: &ToolRegistry,
            _cancel: &CancellationToken,
        ) -> Result<String> {
            let args = serde_json::json!({ "script": self.script }).to_string();
            let result = tools.dispatch(TOOL_UPDATE_BY_SCRIPT, &args);
            assert_eq!(result, "Done");
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn dictation_lands_in_the_world_model() {
        let store = Arc::new(WorldStore::new());
        let completer = Arc::new(ScriptingChat {
            script: r#"world.append_child("porch").set_text("sunlit");"#.to_string(),
        });
        let dictate = DictateSubsystem::new(
            Arc::clone(&store),
            completer,
            Lane::new("dictate"),
            "test-model",
        );
        let outcome = dictate.submit("there is a sunlit porch").await.unwrap();
        assert_eq!(outcome, LaneOutcome::Applied);
        assert_eq!(store.current(), "<world><porch>sunlit</porch></world>");
        assert_eq!(dictate.pending_inputs(), 0);
    }

    #[tokio::test]
    async fn failed_turn_keeps_inputs_queued() {
        struct FailingChat;

        #[async_trait]
        impl ChatCompleter for FailingChat {
            async fn complete(
                &self,
                _request: ChatRequest,
                _cancel: &CancellationToken,
            ) -> Result<String> {
                anyhow::bail!("transport down")
            }

            async fn complete_streaming(
                &self,
                _request: ChatRequest,
                _sink: mpsc::Sender<String>,
                _cancel: &CancellationToken,
            ) -> Result<()> {
                anyhow::bail!("transport down")
            }

            async fn run_tools(
                &self,
                _request: ChatRequest,
                _tools: &ToolRegistry,
                _cancel: &CancellationToken,
            ) -> Result<String> {
                anyhow::bail!("transport down")
            }
        }

        let store = Arc::new(WorldStore::new());
        let dictate = DictateSubsystem::new(
            Arc::clone(&store),
            Arc::new(FailingChat),
            Lane::new("dictate"),
            "test-model",
        );
        let outcome = dictate.submit("lost instruction").await.unwrap();
        assert_eq!(outcome, LaneOutcome::Failed);
        // Not reconciled: the input rides along on the next trigger.
        assert_eq!(dictate.pending_inputs(), 1);
        assert!(store.is_empty());
    }
}
