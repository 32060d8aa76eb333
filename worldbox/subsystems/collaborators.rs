use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use worldbox_model::ToolRegistry;

/// Chat participant role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instruction.
    System,
    /// End-user turn.
    User,
    /// Assistant turn.
    Assistant,
}

/// One message of a chat exchange.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    /// Speaker role.
    pub role: Role,
    /// Text content.
    pub content: String,
    /// Optional image payload attached to a user turn (opaque to the
    /// core; the transport decides its encoding).
    pub image: Option<String>,
}

impl ChatMessage {
    /// System instruction message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            image: None,
        }
    }

    /// Plain user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            image: None,
        }
    }

    /// User message carrying an image payload.
    #[must_use]
    pub fn user_with_image(content: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            image: Some(image.into()),
        }
    }
}

/// One chat call, fully assembled by the requesting lane.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Ordered messages.
    pub messages: Vec<ChatMessage>,
    /// Model identifier.
    pub model: String,
    /// Optional completion budget.
    pub max_tokens: Option<u32>,
    /// Request a JSON-object response.
    pub json_response: bool,
}

impl ChatRequest {
    /// Builds a request for the given model.
    #[must_use]
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            model: model.into(),
            max_tokens: None,
            json_response: false,
        }
    }

    /// Caps the completion size.
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Requests a JSON-object response format.
    #[must_use]
    pub const fn expecting_json(mut self) -> Self {
        self.json_response = true;
        self
    }
}

/// The language-model chat collaborator.
///
/// Stateless and safely shared across lanes; every call accepts a
/// cancellation token and must stop consuming resources once it fires.
/// Cancelled calls fail with [`worldbox_lanes::Superseded`] so lanes
/// classify them as cancellation rather than transport failure.
#[async_trait]
pub trait ChatCompleter: Send + Sync {
    /// One-shot completion returning the assistant's text.
    async fn complete(&self, request: ChatRequest, cancel: &CancellationToken) -> Result<String>;

    /// Streaming completion; text deltas are pushed into `sink` as they
    /// arrive. Returns once the stream is drained.
    async fn complete_streaming(
        &self,
        request: ChatRequest,
        sink: mpsc::Sender<String>,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Tool-calling completion: the model may invoke the registry's named
    /// mutation tools; their textual results are fed back until the model
    /// produces a final message, which is returned.
    async fn run_tools(
        &self,
        request: ChatRequest,
        tools: &ToolRegistry,
        cancel: &CancellationToken,
    ) -> Result<String>;
}

/// The speech-synthesis collaborator. Utterances are queued, not awaited.
pub trait SpeechSynthesizer: Send + Sync {
    /// Queues one utterance, optionally with a specific voice.
    fn speak(&self, text: &str, voice: Option<&str>);
    /// Drops everything still queued.
    fn clear(&self);
}

/// The image-generation collaborator.
#[async_trait]
pub trait ImagePainter: Send + Sync {
    /// Renders a prompt with the named model, returning an image locator.
    async fn render(
        &self,
        prompt: &str,
        model: &str,
        cancel: &CancellationToken,
    ) -> Result<String>;
}

/// The realtime voice-conversation collaborator.
///
/// A thin seam over a bidirectional speech session: the interview
/// subsystem drives it and never sees the audio transport.
pub trait RealtimeConversation: Send + Sync {
    /// Opens the session.
    fn start(&self) -> Result<()>;
    /// Closes the session.
    fn stop(&self) -> Result<()>;
    /// Replaces the session instructions.
    fn set_instructions(&self, instructions: &str);
    /// Installs the mutation tools the session may call.
    fn install_tools(&self, tools: ToolRegistry);
    /// Appends a user message and requests a response.
    fn send_user_message(&self, text: &str);
    /// Mutes or unmutes the user microphone.
    fn set_microphone_muted(&self, muted: bool);
}
