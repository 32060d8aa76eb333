#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rust_2018_idioms,
    missing_docs
)]

//! Worldbox lanes module – one cancellable execution slot per producer.

/// Latest-wins cancellable lane primitive.
#[path = "../lane.rs"]
pub mod lane;

/// Buffer of not-yet-incorporated textual inputs.
#[path = "../queue.rs"]
pub mod queue;

/// Telemetry builder for lane components.
#[path = "../telemetry.rs"]
pub mod telemetry;

pub use lane::{Lane, LaneOutcome, LaneTurn, Superseded};
pub use queue::SubmissionQueue;
pub use telemetry::{LaneTelemetry, LaneTelemetryBuilder};
