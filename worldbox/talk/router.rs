use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use serde::Deserialize;
use shared_logging::{LogLevel, LogRecord, LogSink};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::fields::FieldBank;

/// Errors raised by the talk router.
#[derive(Debug, Error)]
pub enum TalkError {
    /// A press/release event referenced an action no trigger declares.
    #[error("no declared trigger for action '{0}'")]
    UndeclaredAction(String),
}

/// How recognized text is written into the armed target field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// The target's content is replaced by each result.
    Replace,
    /// Results are appended after a separating space.
    Append,
}

/// A declared push-to-talk capability: pressing any UI element carrying
/// this logical action arms the named target field.
#[derive(Debug, Clone, Deserialize)]
pub struct TalkTrigger {
    /// Logical action name; routing matches on this, not element identity.
    pub action: String,
    /// Field receiving the recognition output.
    pub target: String,
    /// Write mode for arriving results.
    pub mode: CaptureMode,
}

/// Shared speech-recognition resource.
///
/// Implementations must guarantee at most one active session; the router
/// holds the session exclusively between press and release.
pub trait SpeechRecognizer: Send + Sync {
    /// Requests the recognition session to start.
    fn start(&self) -> Result<()>;
    /// Requests the recognition session to stop.
    fn stop(&self) -> Result<()>;
}

/// A recognition result after routing, broadcast to interested producers.
#[derive(Debug, Clone)]
pub struct RoutedUtterance {
    /// Field the text was written into.
    pub target: String,
    /// The recognized text.
    pub text: String,
}

#[derive(Debug, Clone)]
struct Route {
    target: String,
    mode: CaptureMode,
}

#[derive(Debug, Default)]
struct RouterState {
    session_active: bool,
    last_route: Option<Route>,
}

/// State machine multiplexing one recognition resource across many triggers.
///
/// Press captures the trigger's target and mode and starts the recognizer;
/// release stops it. The captured route outlives the release: results that
/// trail in after release still land in the last-armed field, until the
/// next press re-arms. Results arriving before any press are dropped.
pub struct TalkRouter {
    triggers: Vec<TalkTrigger>,
    recognizer: Arc<dyn SpeechRecognizer>,
    fields: Arc<FieldBank>,
    state: Mutex<RouterState>,
    routed: broadcast::Sender<RoutedUtterance>,
    logger: Option<Arc<dyn LogSink>>,
}

impl TalkRouter {
    /// Creates a router over the declared triggers.
    ///
    /// Every trigger target is registered in the field bank up front.
    #[must_use]
    pub fn new(
        triggers: Vec<TalkTrigger>,
        recognizer: Arc<dyn SpeechRecognizer>,
        fields: Arc<FieldBank>,
    ) -> Self {
        for trigger in &triggers {
            fields.register(trigger.target.clone());
        }
        let (routed, _) = broadcast::channel(32);
        Self {
            triggers,
            recognizer,
            fields,
            state: Mutex::new(RouterState::default()),
            routed,
            logger: None,
        }
    }

    /// Attaches an operational log sink.
    #[must_use]
    pub fn with_logger(mut self, logger: Arc<dyn LogSink>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Subscribes to routed recognition results.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RoutedUtterance> {
        self.routed.subscribe()
    }

    /// The field bank backing this router.
    #[must_use]
    pub fn fields(&self) -> &Arc<FieldBank> {
        &self.fields
    }

    /// Press of any element declaring `action`: arm its target and start
    /// the shared recognizer.
    pub fn press(&self, action: &str) -> Result<()> {
        let trigger = self.find_trigger(action)?;
        {
            let mut state = self.state.lock();
            if state.session_active {
                // Known hazard: a second press while a session is active is
                // not guarded; the recognizer contract owns exclusivity.
                self.log(
                    LogLevel::Warn,
                    "talk.press.while_active",
                    serde_json::json!({ "action": action }),
                );
            }
            state.last_route = Some(Route {
                target: trigger.target.clone(),
                mode: trigger.mode,
            });
            state.session_active = true;
        }
        self.recognizer.start()
    }

    /// Release of the same action class: stop the recognizer.
    ///
    /// The armed route is kept so that results arriving between release
    /// and the next press still reach the last-armed target.
    pub fn release(&self, action: &str) -> Result<()> {
        self.find_trigger(action)?;
        self.state.lock().session_active = false;
        self.recognizer.stop()
    }

    /// Delivers one recognition result to the last-armed target.
    ///
    /// Empty results, and results arriving before any target was ever
    /// armed, are dropped silently (not an error condition).
    pub fn on_result(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        let route = self.state.lock().last_route.clone();
        let Some(route) = route else {
            return;
        };
        match route.mode {
            CaptureMode::Replace => self.fields.set(route.target.clone(), text),
            CaptureMode::Append => self.fields.append(route.target.clone(), text),
        }
        let _ = self.routed.send(RoutedUtterance {
            target: route.target,
            text: text.to_string(),
        });
    }

    /// Whether a recognition session is currently held.
    #[must_use]
    pub fn session_active(&self) -> bool {
        self.state.lock().session_active
    }

    fn find_trigger(&self, action: &str) -> Result<&TalkTrigger> {
        self.triggers
            .iter()
            .find(|t| t.action == action)
            .ok_or_else(|| TalkError::UndeclaredAction(action.to_string()).into())
    }

    fn log(&self, level: LogLevel, message: &str, metadata: serde_json::Value) {
        if let Some(logger) = &self.logger {
            let record = LogRecord::new("talk.router", level, message).with_metadata(metadata);
            let _ = logger.log(&record);
        }
    }
}
