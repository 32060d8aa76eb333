#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rust_2018_idioms,
    missing_docs
)]

//! Worldbox talk module – multiplexes one speech-recognition resource
//! across many declared push-to-talk triggers.

/// Named text fields that receive recognized speech.
#[path = "../fields.rs"]
pub mod fields;

/// The push-to-talk routing state machine.
#[path = "../router.rs"]
pub mod router;

pub use fields::FieldBank;
pub use router::{
    CaptureMode, RoutedUtterance, SpeechRecognizer, TalkError, TalkRouter, TalkTrigger,
};
