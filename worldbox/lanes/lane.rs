use std::{future::Future, sync::Arc};

use anyhow::Result;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::telemetry::LaneTelemetry;

/// Marker error returned by [`LaneTurn::checkpoint`] once a turn is superseded.
///
/// Operations bubble it up with `?`; the lane maps it to
/// [`LaneOutcome::Cancelled`] instead of a failure.
#[derive(Debug, Error)]
#[error("lane operation superseded")]
pub struct Superseded;

/// How one lane operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneOutcome {
    /// The operation completed and its effects were applied.
    Applied,
    /// A newer trigger superseded the operation; nothing was applied.
    Cancelled,
    /// The external call failed; logged, nothing was applied.
    Failed,
}

/// Cancellation handle for one lane turn.
#[derive(Debug)]
pub struct LaneTurn {
    id: u64,
    token: CancellationToken,
}

impl LaneTurn {
    /// Token to thread into collaborator calls.
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether a newer trigger has taken over this lane.
    #[must_use]
    pub fn superseded(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fails with [`Superseded`] once the turn has been cancelled.
    ///
    /// Call this immediately before every externally visible mutation: a
    /// superseded operation's result must never reach shared state, even
    /// when its external call happened to finish after the cancel signal.
    pub fn checkpoint(&self) -> Result<()> {
        if self.superseded() {
            Err(Superseded.into())
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Default)]
struct ActiveOp {
    latest: u64,
    token: Option<CancellationToken>,
}

/// One producer's cancellable execution slot.
///
/// Each trigger cancels the previous outstanding operation and installs a
/// fresh token (latest wins). Different lanes are fully independent; the
/// only cross-lane serialization point is the world store itself.
#[derive(Debug)]
pub struct Lane {
    name: String,
    telemetry: Option<LaneTelemetry>,
    active: Arc<Mutex<ActiveOp>>,
}

impl Lane {
    /// Creates a lane without telemetry.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            telemetry: None,
            active: Arc::new(Mutex::new(ActiveOp::default())),
        }
    }

    /// Attaches a telemetry handle.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: LaneTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Lane name used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cancels the previous outstanding operation and opens a new turn.
    #[must_use]
    pub fn begin(&self) -> LaneTurn {
        let mut active = self.active.lock();
        if let Some(old) = active.token.take() {
            old.cancel();
        }
        active.latest = active.latest.wrapping_add(1);
        let token = CancellationToken::new();
        active.token = Some(token.clone());
        LaneTurn {
            id: active.latest,
            token,
        }
    }

    /// Runs one operation on this lane, superseding any outstanding one.
    ///
    /// The operation future is raced against its own cancellation token.
    /// Errors are logged and swallowed so the lane stays usable for future
    /// triggers; [`Superseded`] errors count as cancellation, not failure.
    pub fn run<Fut>(&self, op: impl FnOnce(LaneTurn) -> Fut) -> JoinHandle<LaneOutcome>
    where
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let turn = self.begin();
        let id = turn.id;
        let token = turn.token.clone();
        let fut = op(turn);
        let active = Arc::clone(&self.active);
        let telemetry = self.telemetry.clone();
        let name = self.name.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                () = token.cancelled() => LaneOutcome::Cancelled,
                result = fut => {
                    clear_if_latest(&active, id);
                    match result {
                        Ok(()) => LaneOutcome::Applied,
                        Err(err) if err.downcast_ref::<Superseded>().is_some() => {
                            LaneOutcome::Cancelled
                        }
                        Err(err) => {
                            if let Some(tel) = &telemetry {
                                tel.operation_failed(&name, &err);
                            }
                            LaneOutcome::Failed
                        }
                    }
                }
            };
            if outcome == LaneOutcome::Cancelled {
                if let Some(tel) = &telemetry {
                    tel.operation_superseded(&name);
                }
            }
            outcome
        })
    }

    /// Cancels the outstanding operation, if any. Used at teardown.
    pub fn cancel_active(&self) {
        let mut active = self.active.lock();
        if let Some(token) = active.token.take() {
            token.cancel();
        }
    }

    /// Whether an operation is currently outstanding.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.active.lock().token.is_some()
    }
}

fn clear_if_latest(active: &Mutex<ActiveOp>, id: u64) {
    let mut active = active.lock();
    if active.latest == id {
        active.token = None;
    }
}
