#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rust_2018_idioms,
    missing_docs
)]

//! Worldbox vision module – decides when a new camera frame is worth processing.

/// Raw RGBA frame container.
#[path = "../frame.rs"]
pub mod frame;

/// Per-pixel change detection against a sliding reference frame.
#[path = "../detector.rs"]
pub mod detector;

/// Debounced asynchronous change event stream.
#[path = "../stream.rs"]
pub mod stream;

pub use detector::{compare_frames, DetectorSettings, FrameChangeDetector};
pub use frame::{Frame, VisionError};
pub use stream::{ChangeEvent, ChangeStream};
