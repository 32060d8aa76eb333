use std::sync::Arc;

use parking_lot::Mutex;
use tokio::{sync::watch, task::JoinHandle};

use worldbox_lanes::{Lane, LaneOutcome, SubmissionQueue};
use worldbox_model::{ToolRegistry, WorldStore};

use crate::collaborators::{ChatCompleter, ChatMessage, ChatRequest, SpeechSynthesizer};

/// XML shaping rules shared by every note-taking prompt.
pub(crate) const NOTE_SYNTAX_GUIDELINE: &str = "\
Syntax guideline:
- Be hierarchical and efficient; prefer simple, obvious tag names and avoid deep nesting.
- Prefer tags for subjects, objects, environments and entities; use attributes for \
unmaterialized properties such as style, material or lighting.
- Use concise natural language where description is needed.
- Describe spatial relationships explicitly.";

/// Conversation intake: chats with the user, keeps notes in the world
/// model through the mutation tools, and speaks every reply.
///
/// Each submission snapshots the queue and the current document, runs a
/// latest-wins tool call, and reconciles the queue on completion. Inputs
/// arriving mid-flight supersede the running turn and ride along on the
/// next one.
pub struct ChatSubsystem {
    store: Arc<WorldStore>,
    completer: Arc<dyn ChatCompleter>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    tools: ToolRegistry,
    lane: Lane,
    queue: Arc<SubmissionQueue>,
    transcript: Arc<Mutex<Vec<String>>>,
    goal: Mutex<String>,
    model: String,
    reply: watch::Sender<String>,
}

impl ChatSubsystem {
    /// Wires the subsystem; the lane is created by the caller so telemetry
    /// and naming stay in one place.
    #[must_use]
    pub fn new(
        store: Arc<WorldStore>,
        completer: Arc<dyn ChatCompleter>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        lane: Lane,
        model: impl Into<String>,
    ) -> Self {
        let (reply, _) = watch::channel(String::new());
        Self {
            tools: ToolRegistry::new(Arc::clone(&store)),
            store,
            completer,
            synthesizer,
            lane,
            queue: Arc::new(SubmissionQueue::new()),
            transcript: Arc::new(Mutex::new(Vec::new())),
            goal: Mutex::new(String::new()),
            model: model.into(),
            reply,
        }
    }

    /// Sets the conversation goal used in the session instructions.
    pub fn set_goal(&self, goal: impl Into<String>) {
        *self.goal.lock() = goal.into();
    }

    /// Clears the transcript and opens with a canned first turn.
    pub fn start_session(&self) -> JoinHandle<LaneOutcome> {
        self.transcript.lock().clear();
        self.queue.push("Let's get started.");
        self.start_turn()
    }

    /// Submits one user utterance.
    pub fn submit(&self, text: impl Into<String>) -> JoinHandle<LaneOutcome> {
        self.queue.push(text);
        self.start_turn()
    }

    /// Last assistant reply, updated on every applied turn.
    #[must_use]
    pub fn replies(&self) -> watch::Receiver<String> {
        self.reply.subscribe()
    }

    /// Copy of the running transcript.
    #[must_use]
    pub fn transcript(&self) -> Vec<String> {
        self.transcript.lock().clone()
    }

    /// Inputs still waiting to be incorporated.
    #[must_use]
    pub fn pending_inputs(&self) -> usize {
        self.queue.len()
    }

    fn start_turn(&self) -> JoinHandle<LaneOutcome> {
        let inputs = self.queue.snapshot();
        let world = self.store.current();
        let instructions =
            conversation_instructions(&self.goal.lock(), &self.transcript.lock(), &world);
        let request = ChatRequest::new(
            self.model.clone(),
            vec![
                ChatMessage::system(instructions),
                ChatMessage::user(inputs.join("; ")),
            ],
        );
        let completer = Arc::clone(&self.completer);
        let synthesizer = Arc::clone(&self.synthesizer);
        let tools = self.tools.clone();
        let queue = Arc::clone(&self.queue);
        let transcript = Arc::clone(&self.transcript);
        let reply_tx = self.reply.clone();
        self.lane.run(move |turn| async move {
            let reply = completer.run_tools(request, &tools, turn.token()).await?;
            turn.checkpoint()?;
            queue.reconcile(&inputs);
            {
                let mut transcript = transcript.lock();
                for input in &inputs {
                    transcript.push(format!("User: {input}"));
                }
                transcript.push(format!("You: {reply}"));
            }
            reply_tx.send_replace(reply.clone());
            if !reply.is_empty() {
                synthesizer.speak(&reply, None);
            }
            Ok(())
        })
    }
}

fn conversation_instructions(goal: &str, transcript: &[String], world: &str) -> String {
    let goal = if goal.is_empty() {
        "A casual chat that gathers facts about the user's world without interrogating them. \
         Prompt the user to keep the conversation going."
    } else {
        goal
    };
    let mut text = format!(
        "Chat with the user and take notes. The notes are an XML document that models the \
         world.\n\nThe goal and format of the chat:\n{goal}\n"
    );
    if !transcript.is_empty() {
        text.push_str("\nThe conversation transcript so far:\n");
        text.push_str(&transcript.join("\n"));
        text.push('\n');
    }
    text.push_str(&format!(
        "\nThe notes you have taken so far:\n```xml\n{world}\n```\n\n{NOTE_SYNTAX_GUIDELINE}\n\n\
         Update the notes with exactly one tool, then immediately reply to the user in one \
         short utterance that keeps the conversation going.\n"
    ));
    text
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::Result;
    use async_trait::async_trait;
    use tokio::sync::{mpsc, Notify};
    use tokio_util::sync::CancellationToken;

    use worldbox_model::TOOL_REWRITE_XML;

    use super::*;

    #[derive(Default)]
    struct RecordingSpeech {
        spoken: Mutex<Vec<String>>,
    }

    impl SpeechSynthesizer for RecordingSpeech {
        fn speak(&self, text: &str, _voice: Option<&str>) {
            self.spoken.lock().push(text.to_string());
        }

        fn clear(&self) {
            self.spoken.lock().clear();
        }
    }

    /// Fake collaborator: applies one rewrite through the registry, then
    /// answers with a fixed reply. An optional gate holds the call open so
    /// tests can race turns against each other.
    struct ScriptedChat {
        reply: String,
        rewrite: Option<String>,
        gate: Option<Arc<Notify>>,
        seen_inputs: Mutex<Vec<String>>,
    }

    impl ScriptedChat {
        fn answering(reply: &str, rewrite: Option<&str>) -> Self {
            Self {
                reply: reply.to_string(),
                rewrite: rewrite.map(str::to_string),
                gate: None,
                seen_inputs: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatCompleter for ScriptedChat {
        async fn complete(
            &self,
            _request: ChatRequest,
            _cancel: &CancellationToken,
        ) -> Result<String> {
            Ok(self.reply.clone())
        }

        async fn complete_streaming(
            &self,
            _request: ChatRequest,
            sink: mpsc::Sender<String>,
            _cancel: &CancellationToken,
        ) -> Result<()> {
            let _ = sink.send(self.reply.clone()).await;
            Ok(())
        }

        async fn run_tools(
            &self,
            request: ChatRequest,
            tools: &ToolRegistry,
            cancel: &CancellationToken,
        ) -> Result<String> {
            if let Some(user_turn) = request.messages.last() {
                self.seen_inputs.lock().push(user_turn.content.clone());
            }
            if let Some(gate) = &self.gate {
                tokio::select! {
                    () = cancel.cancelled() => {
                        return Err(worldbox_lanes::Superseded.into());
                    }
                    () = gate.notified() => {}
                }
            }
            if let Some(xml) = &self.rewrite {
                let args = serde_json::json!({ "xml": xml }).to_string();
                tools.dispatch(TOOL_REWRITE_XML, &args);
            }
            Ok(self.reply.clone())
        }
    }

    fn subsystem(completer: Arc<ScriptedChat>) -> (ChatSubsystem, Arc<RecordingSpeech>) {
        let store = Arc::new(WorldStore::new());
        let speech = Arc::new(RecordingSpeech::default());
        let chat = ChatSubsystem::new(
            store,
            completer,
            speech.clone(),
            Lane::new("chat"),
            "test-model",
        );
        (chat, speech)
    }

    #[tokio::test]
    async fn applied_turn_updates_everything() {
        let completer = Arc::new(ScriptedChat::answering(
            "Noted. What else?",
            Some("<world><home>lighthouse</home></world>"),
        ));
        let (chat, speech) = subsystem(completer);
        let outcome = chat.submit("we live by a lighthouse").await.unwrap();
        assert_eq!(outcome, LaneOutcome::Applied);
        assert_eq!(chat.pending_inputs(), 0);
        assert_eq!(
            chat.transcript(),
            ["User: we live by a lighthouse", "You: Noted. What else?"]
        );
        assert_eq!(*chat.replies().borrow(), "Noted. What else?");
        assert_eq!(speech.spoken.lock().as_slice(), ["Noted. What else?"]);
    }

    #[tokio::test]
    async fn mid_flight_input_supersedes_and_rides_along() {
        let gate = Arc::new(Notify::new());
        let mut scripted = ScriptedChat::answering("ok", None);
        scripted.gate = Some(gate.clone());
        let completer = Arc::new(scripted);
        let (chat, _) = subsystem(Arc::clone(&completer));

        let first = chat.submit("alpha");
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = chat.submit("beta");
        gate.notify_waiters();
        gate.notify_one();

        assert_eq!(first.await.unwrap(), LaneOutcome::Cancelled);
        assert_eq!(second.await.unwrap(), LaneOutcome::Applied);
        // The superseding turn carried both the stranded and the new input.
        let seen = completer.seen_inputs.lock().clone();
        assert_eq!(seen.last().unwrap(), "alpha; beta");
        assert_eq!(chat.pending_inputs(), 0);
    }

    #[tokio::test]
    async fn start_session_resets_transcript() {
        let completer = Arc::new(ScriptedChat::answering("Hello!", None));
        let (chat, _) = subsystem(completer);
        chat.submit("old turn").await.unwrap();
        chat.start_session().await.unwrap();
        assert_eq!(
            chat.transcript(),
            ["User: Let's get started.", "You: Hello!"]
        );
    }
}
