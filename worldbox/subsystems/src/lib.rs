#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rust_2018_idioms,
    missing_docs
)]

//! Worldbox subsystems – every producer and consumer lane around the
//! shared world model, plus the collaborator seams they call through.

/// Contracts for the external services the lanes call.
#[path = "../collaborators.rs"]
pub mod collaborators;

/// HTTP implementations of the chat and image collaborators.
#[path = "../httpclient.rs"]
pub mod httpclient;

/// Conversation intake lane with transcript and speech output.
#[path = "../chat.rs"]
pub mod chat;

/// Dictated-instruction intake lane.
#[path = "../dictate.rs"]
pub mod dictate;

/// Camera observation pipeline.
#[path = "../observe.rs"]
pub mod observe;

/// Realtime interview driver.
#[path = "../interview.rs"]
pub mod interview;

/// Simulated-dialogue output lane.
#[path = "../discussion.rs"]
pub mod discussion;

/// Incremental extraction of utterances from a streamed JSON response.
#[path = "../utterance_scan.rs"]
pub mod utterance_scan;

/// Image rendering lane.
#[path = "../paint.rs"]
pub mod paint;

/// Narrative writing lane.
#[path = "../writing.rs"]
pub mod writing;

/// Telemetry builder for subsystem components.
#[path = "../telemetry.rs"]
pub mod telemetry;

pub use chat::ChatSubsystem;
pub use collaborators::{
    ChatCompleter, ChatMessage, ChatRequest, ImagePainter, RealtimeConversation, Role,
    SpeechSynthesizer,
};
pub use dictate::DictateSubsystem;
pub use discussion::DiscussionSubsystem;
pub use httpclient::{HttpChatClient, HttpImageClient};
pub use interview::InterviewSubsystem;
pub use observe::ObserveSubsystem;
pub use paint::PaintSubsystem;
pub use telemetry::{SubsystemTelemetry, SubsystemTelemetryBuilder};
pub use writing::WritingSubsystem;
