use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::{sync::mpsc, task::JoinHandle};

use worldbox_lanes::{Lane, LaneOutcome};
use worldbox_model::WorldStore;

use crate::{
    collaborators::{ChatCompleter, ChatMessage, ChatRequest, SpeechSynthesizer},
    utterance_scan::UtteranceScanner,
};

const EXPERT_VOICE: &str = "en-US-DavisNeural";
const NOVICE_VOICE: &str = "en-US-EmmaMultilingualNeural";

/// Simulated-dialogue output: streams a two-voice conversation grounded
/// in the current world model straight into the speech synthesizer.
///
/// One toggle starts the simulation, the next one cancels it and clears
/// whatever speech is still queued. Utterances are spoken as soon as the
/// stream completes each one.
pub struct DiscussionSubsystem {
    store: Arc<WorldStore>,
    completer: Arc<dyn ChatCompleter>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    lane: Lane,
    model: String,
    requirement: Mutex<String>,
    running: Arc<AtomicBool>,
}

impl DiscussionSubsystem {
    /// Wires the subsystem around the shared store.
    #[must_use]
    pub fn new(
        store: Arc<WorldStore>,
        completer: Arc<dyn ChatCompleter>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        lane: Lane,
        model: impl Into<String>,
    ) -> Self {
        Self {
            store,
            completer,
            synthesizer,
            lane,
            model: model.into(),
            requirement: Mutex::new(String::new()),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Sets the requirement the dialogue must meet.
    pub fn set_requirement(&self, requirement: impl Into<String>) {
        *self.requirement.lock() = requirement.into();
    }

    /// Whether a simulation is currently streaming.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Starts a simulation, or stops the running one.
    ///
    /// Returns the lane handle when a simulation was started, `None` when
    /// the call stopped one instead.
    pub fn toggle(&self) -> Option<JoinHandle<LaneOutcome>> {
        if self.running.swap(false, Ordering::Relaxed) {
            self.lane.cancel_active();
            self.synthesizer.clear();
            return None;
        }
        self.running.store(true, Ordering::Relaxed);
        Some(self.simulate())
    }

    fn simulate(&self) -> JoinHandle<LaneOutcome> {
        let world = self.store.current();
        let request = ChatRequest::new(
            self.model.clone(),
            vec![
                ChatMessage::system(dialogue_instructions(&self.requirement.lock())),
                ChatMessage::user(format!(
                    "{world}\n\nNow respond with the FULL dialogue. Do not stop until the \
                     entire dialogue is complete."
                )),
            ],
        )
        .with_max_tokens(4000)
        .expecting_json();
        let completer = Arc::clone(&self.completer);
        let synthesizer = Arc::clone(&self.synthesizer);
        let running = Arc::clone(&self.running);
        self.lane.run(move |turn| async move {
            let (sink, mut chunks) = mpsc::channel(16);
            let token = turn.token().clone();
            let stream = completer.complete_streaming(request, sink, &token);
            let speak = async {
                let mut scanner = UtteranceScanner::new();
                while let Some(chunk) = chunks.recv().await {
                    for utterance in scanner.push(&chunk) {
                        synthesizer.speak(
                            &utterance.utterance,
                            Some(voice_for(&utterance.speaker)),
                        );
                    }
                }
            };
            let (stream_result, ()) = futures::join!(stream, speak);
            running.store(false, Ordering::Relaxed);
            stream_result?;
            Ok(())
        })
    }
}

fn voice_for(speaker: &str) -> &'static str {
    if speaker == "expert" {
        EXPERT_VOICE
    } else {
        NOVICE_VOICE
    }
}

fn dialogue_instructions(requirement: &str) -> String {
    let requirement = if requirement.is_empty() {
        "related to the world model"
    } else {
        requirement
    };
    format!(
        "Simulate a dialogue based on the user-provided world model.\n\n\
         The dialogue involves exactly two participants. Their concrete personas depend on \
         the requirement, but their abstract roles are fixed:\n\
         - Participant 1 is the expert (male): knowledgeable about the world model, \
         authoritative, confident, a good listener.\n\
         - Participant 2 is the novice (female): curious, takes the initiative to ask \
         questions, eager to learn.\n\n\
         The dialogue must meet this requirement: {requirement}\n\n\
         Respond in this JSON format:\n\
         {{\n  \"utterances\": [{{\n    \"speaker\": \"expert\" | \"novice\",\n    \
         \"utterance\": \"...\"\n  }}]\n}}\n"
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::Result;
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use worldbox_model::ToolRegistry;

    use super::*;

    #[derive(Default)]
    struct RecordingSpeech {
        spoken: Mutex<Vec<(String, String)>>,
        cleared: AtomicBool,
    }

    impl SpeechSynthesizer for RecordingSpeech {
        fn speak(&self, text: &str, voice: Option<&str>) {
            self.spoken
                .lock()
                .push((voice.unwrap_or_default().to_string(), text.to_string()));
        }

        fn clear(&self) {
            self.cleared.store(true, Ordering::Relaxed);
            self.spoken.lock().clear();
        }
    }

    struct StreamingChat {
        chunks: Vec<String>,
        hold_open: bool,
    }

    #[async_trait]
    impl ChatCompleter for StreamingChat {
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
            cancel: &CancellationToken,
        ) -> Result<()> {
            for chunk in &self.chunks {
                if sink.send(chunk.clone()).await.is_err() {
                    return Ok(());
                }
            }
            if self.hold_open {
                cancel.cancelled().await;
                return Err(worldbox_lanes::Superseded.into());
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

    fn dialogue_json() -> Vec<String> {
        vec![
            r#"{"utterances": [{"speaker": "expert", "utterance": "The keeper"#.to_string(),
            r#" lives upstairs."}, {"speaker": "novice", "utterance": "Alone?"}]}"#.to_string(),
        ]
    }

    #[tokio::test]
    async fn streamed_utterances_reach_the_synthesizer_in_voice() {
        let store = Arc::new(WorldStore::new());
        let speech = Arc::new(RecordingSpeech::default());
        let discussion = DiscussionSubsystem::new(
            store,
            Arc::new(StreamingChat {
                chunks: dialogue_json(),
                hold_open: false,
            }),
            speech.clone(),
            Lane::new("discussion"),
            "test-model",
        );
        let handle = discussion.toggle().expect("simulation should start");
        assert_eq!(handle.await.unwrap(), LaneOutcome::Applied);
        let spoken = speech.spoken.lock().clone();
        assert_eq!(spoken.len(), 2);
        assert_eq!(spoken[0].0, EXPERT_VOICE);
        assert_eq!(spoken[1].0, NOVICE_VOICE);
        assert_eq!(spoken[1].1, "Alone?");
        assert!(!discussion.is_running());
    }

    #[tokio::test]
    async fn second_toggle_cancels_and_clears_speech() {
        let store = Arc::new(WorldStore::new());
        let speech = Arc::new(RecordingSpeech::default());
        let discussion = DiscussionSubsystem::new(
            store,
            Arc::new(StreamingChat {
                chunks: dialogue_json(),
                hold_open: true,
            }),
            speech.clone(),
            Lane::new("discussion"),
            "test-model",
        );
        let handle = discussion.toggle().expect("simulation should start");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(discussion.is_running());
        assert!(discussion.toggle().is_none());
        assert_eq!(handle.await.unwrap(), LaneOutcome::Cancelled);
        assert!(speech.cleared.load(Ordering::Relaxed));
        assert!(!discussion.is_running());
    }
}
