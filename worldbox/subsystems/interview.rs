use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Result;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use worldbox_model::{ToolRegistry, WorldStore, EMPTY_WORLD};

use crate::collaborators::RealtimeConversation;

/// Realtime interview driver: a live voice session that must update the
/// world model through the mutation tools after every user turn.
///
/// Starting the session installs the tools, keeps the session
/// instructions in sync with every world revision, and opens with a
/// canned prompt. Push-to-talk maps to microphone mute state; the session
/// itself stays up between presses.
pub struct InterviewSubsystem {
    realtime: Arc<dyn RealtimeConversation>,
    store: Arc<WorldStore>,
    tools: ToolRegistry,
    interview_goal: Arc<Mutex<String>>,
    focus: Arc<Mutex<String>>,
    refresh: Mutex<Option<CancellationToken>>,
    running: AtomicBool,
}

impl InterviewSubsystem {
    /// Wires the subsystem around the realtime collaborator.
    #[must_use]
    pub fn new(realtime: Arc<dyn RealtimeConversation>, store: Arc<WorldStore>) -> Self {
        Self {
            realtime,
            tools: ToolRegistry::new(Arc::clone(&store)),
            store,
            interview_goal: Arc::new(Mutex::new(String::new())),
            focus: Arc::new(Mutex::new(String::new())),
            refresh: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    /// Sets the interview goal woven into the session instructions.
    pub fn set_goal(&self, goal: impl Into<String>) {
        *self.interview_goal.lock() = goal.into();
    }

    /// Sets the modeling focus (what the world model should be about).
    pub fn set_focus(&self, focus: impl Into<String>) {
        *self.focus.lock() = focus.into();
    }

    /// Whether the session is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Starts the session: tools installed, instructions following the
    /// store, microphone muted until the first push-to-talk.
    pub fn start(&self) -> Result<()> {
        self.realtime.start()?;
        self.realtime.set_microphone_muted(true);
        self.realtime.install_tools(self.tools.clone());

        let token = CancellationToken::new();
        {
            let mut refresh = self.refresh.lock();
            if let Some(old) = refresh.take() {
                old.cancel();
            }
            *refresh = Some(token.clone());
        }
        let realtime = Arc::clone(&self.realtime);
        let goal = Arc::clone(&self.interview_goal);
        let focus = Arc::clone(&self.focus);
        let mut revisions = self.store.subscribe();
        tokio::spawn(async move {
            loop {
                let instructions = {
                    let world = revisions.borrow_and_update().clone();
                    interview_instructions(&goal.lock(), &focus.lock(), &world)
                };
                realtime.set_instructions(&instructions);
                tokio::select! {
                    () = token.cancelled() => break,
                    changed = revisions.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        self.realtime
            .send_user_message("Start the interview now by asking me for an intro");
        self.running.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Stops the session and the instruction refresher.
    pub fn stop(&self) -> Result<()> {
        if let Some(token) = self.refresh.lock().take() {
            token.cancel();
        }
        self.running.store(false, Ordering::Relaxed);
        self.realtime.stop()
    }

    /// Push-to-talk: held unmutes the microphone, released mutes it.
    pub fn set_push_to_talk(&self, held: bool) {
        self.realtime.set_microphone_muted(!held);
    }
}

fn interview_instructions(goal: &str, focus: &str, world: &str) -> String {
    let progress = if world == EMPTY_WORLD {
        "\nThe starting state of the model is <world></world>. Get started by modeling the \
         <user>."
            .to_string()
    } else {
        format!("\nHere is what you have gathered so far:\n{world}\n")
    };
    let focus_line = if focus.is_empty() {
        "- The world model should be detailed and hierarchical.".to_string()
    } else {
        format!("- The world model should be related to {focus}.")
    };
    format!(
        "Conduct an interview to model the user. The interview should focus on the following \
         goal:\n{goal}\n{progress}\n\
         Every time after the user speaks, before you respond, update the XML with one of the \
         tools:\n\
         - Use update_by_script to add information programmatically; the `world` binding is \
         the root element, and each script runs in a fresh environment, so re-query nodes \
         through `document` every time.\n\
         - Use rewrite_xml for large updates; the new XML must keep <world>...</world> as the \
         top level tag.\n\n\
         Requirements:\n{focus_line}\n\
         - Only add to the model; never remove gathered information unless the user corrects \
         it.\n\
         - Keep your interview style concise. Let the user do the talking.\n"
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use worldbox_model::Mutation;

    use super::*;

    #[derive(Default)]
    struct FakeRealtime {
        started: AtomicBool,
        muted: Mutex<Vec<bool>>,
        instructions: Mutex<Vec<String>>,
        messages: Mutex<Vec<String>>,
        tools_installed: AtomicBool,
    }

    impl RealtimeConversation for FakeRealtime {
        fn start(&self) -> Result<()> {
            self.started.store(true, Ordering::Relaxed);
            Ok(())
        }

        fn stop(&self) -> Result<()> {
            self.started.store(false, Ordering::Relaxed);
            Ok(())
        }

        fn set_instructions(&self, instructions: &str) {
            self.instructions.lock().push(instructions.to_string());
        }

        fn install_tools(&self, _tools: ToolRegistry) {
            self.tools_installed.store(true, Ordering::Relaxed);
        }

        fn send_user_message(&self, text: &str) {
            self.messages.lock().push(text.to_string());
        }

        fn set_microphone_muted(&self, muted: bool) {
            self.muted.lock().push(muted);
        }
    }

    #[tokio::test]
    async fn start_installs_tools_and_follows_revisions() {
        let realtime = Arc::new(FakeRealtime::default());
        let store = Arc::new(WorldStore::new());
        let interview = InterviewSubsystem::new(realtime.clone(), Arc::clone(&store));
        interview.set_goal("understand the user's home");
        interview.start().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(realtime.tools_installed.load(Ordering::Relaxed));
        assert_eq!(realtime.messages.lock().len(), 1);
        {
            let instructions = realtime.instructions.lock();
            assert!(!instructions.is_empty());
            assert!(instructions[0].contains("<world></world>"));
        }

        store.apply(&Mutation::Rewrite {
            document: "<world><home>houseboat</home></world>".to_string(),
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        {
            let instructions = realtime.instructions.lock();
            assert!(instructions.last().unwrap().contains("houseboat"));
        }
        interview.stop().unwrap();
        assert!(!interview.is_running());
    }

    #[tokio::test]
    async fn push_to_talk_toggles_microphone() {
        let realtime = Arc::new(FakeRealtime::default());
        let store = Arc::new(WorldStore::new());
        let interview = InterviewSubsystem::new(realtime.clone(), store);
        interview.start().unwrap();
        interview.set_push_to_talk(true);
        interview.set_push_to_talk(false);
        // start mutes, press unmutes, release mutes again
        assert_eq!(realtime.muted.lock().as_slice(), [true, false, true]);
        interview.stop().unwrap();
    }
}
