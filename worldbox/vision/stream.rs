use tokio::{
    sync::mpsc,
    time::{sleep_until, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::{
    detector::{DetectorSettings, FrameChangeDetector},
    frame::Frame,
};

/// Emitted once per debounced burst of qualifying frame changes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChangeEvent {
    /// Diff ratio of the last qualifying sample in the burst.
    pub diff_ratio: f64,
}

/// Asynchronous wrapper around [`FrameChangeDetector`].
///
/// Samples are fed through [`ChangeStream::submit`]; qualifying changes are
/// debounced by the configured quiet period so that only the last change of
/// a burst reaches the consumer. Dropping the handle or cancelling the token
/// tears the worker down and clears any pending timer.
#[derive(Debug)]
pub struct ChangeStream {
    frames: mpsc::Sender<Frame>,
    token: CancellationToken,
}

impl ChangeStream {
    /// Spawns the debounce worker; returns the handle and the event receiver.
    #[must_use]
    pub fn spawn(settings: DetectorSettings) -> (Self, mpsc::Receiver<ChangeEvent>) {
        let (frames_tx, frames_rx) = mpsc::channel(32);
        let (events_tx, events_rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        tokio::spawn(debounce_worker(
            settings,
            frames_rx,
            events_tx,
            token.clone(),
        ));
        (
            Self {
                frames: frames_tx,
                token,
            },
            events_rx,
        )
    }

    /// Feeds one captured frame into the detector.
    ///
    /// Returns `false` when the worker has already shut down.
    pub async fn submit(&self, frame: Frame) -> bool {
        self.frames.send(frame).await.is_ok()
    }

    /// Stops the worker; pending debounced events are discarded.
    pub fn shutdown(&self) {
        self.token.cancel();
    }
}

impl Drop for ChangeStream {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn debounce_worker(
    settings: DetectorSettings,
    mut frames: mpsc::Receiver<Frame>,
    events: mpsc::Sender<ChangeEvent>,
    token: CancellationToken,
) {
    let mut detector = FrameChangeDetector::new(settings);
    let mut pending: Option<f64> = None;
    let mut deadline = Instant::now();
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            maybe = frames.recv() => {
                let Some(frame) = maybe else { break };
                match detector.observe(frame) {
                    Ok(Some(ratio)) => {
                        pending = Some(ratio);
                        deadline = Instant::now() + settings.debounce;
                    }
                    Ok(None) => {}
                    // A resolution switch mid-stream: restart from the next sample.
                    Err(_) => detector.reset(),
                }
            }
            () = sleep_until(deadline), if pending.is_some() => {
                if let Some(diff_ratio) = pending.take() {
                    if events.send(ChangeEvent { diff_ratio }).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn quick_settings() -> DetectorSettings {
        DetectorSettings {
            debounce: Duration::from_millis(25),
            ..DetectorSettings::default()
        }
    }

    #[tokio::test]
    async fn identical_frames_emit_nothing() {
        let (stream, mut events) = ChangeStream::spawn(quick_settings());
        let frame = Frame::filled(8, 8, [50, 50, 50, 255]);
        assert!(stream.submit(frame.clone()).await);
        assert!(stream.submit(frame).await);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn burst_collapses_to_single_event() {
        let (stream, mut events) = ChangeStream::spawn(quick_settings());
        stream.submit(Frame::filled(8, 8, [0, 0, 0, 255])).await;
        // Two qualifying changes in quick succession: one debounced event.
        stream
            .submit(Frame::filled(8, 8, [255, 255, 255, 255]))
            .await;
        stream.submit(Frame::filled(8, 8, [0, 0, 255, 255])).await;
        let event = tokio::time::timeout(Duration::from_millis(500), events.recv())
            .await
            .expect("debounced event should arrive")
            .expect("worker alive");
        assert!(event.diff_ratio > 0.02);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn shutdown_discards_pending_event() {
        let (stream, mut events) = ChangeStream::spawn(quick_settings());
        stream.submit(Frame::filled(8, 8, [0, 0, 0, 255])).await;
        stream
            .submit(Frame::filled(8, 8, [255, 255, 255, 255]))
            .await;
        stream.shutdown();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(events.recv().await.is_none());
    }
}
