use std::time::Duration;

use serde::Deserialize;

use crate::frame::{Frame, VisionError};

/// Tunable thresholds for the change detector.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DetectorSettings {
    /// Euclidean RGB distance above which a pixel counts as changed.
    #[serde(default = "default_color_distance")]
    pub color_distance_threshold: f32,
    /// Fraction of changed pixels above which a frame counts as changed.
    #[serde(default = "default_change_threshold")]
    pub change_threshold: f64,
    /// Quiet period collapsing a burst of changes into one event.
    #[serde(default = "default_debounce", with = "duration_millis")]
    pub debounce: Duration,
}

const fn default_color_distance() -> f32 {
    30.0
}

const fn default_change_threshold() -> f64 {
    0.02
}

const fn default_debounce() -> Duration {
    Duration::from_millis(200)
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            color_distance_threshold: default_color_distance(),
            change_threshold: default_change_threshold(),
            debounce: default_debounce(),
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Ratio of pixels whose Euclidean RGB distance exceeds `color_distance_threshold`.
///
/// Alpha is ignored, matching the capture pipeline which always produces
/// opaque frames.
pub fn compare_frames(
    reference: &Frame,
    sample: &Frame,
    color_distance_threshold: f32,
) -> Result<f64, VisionError> {
    if reference.width() != sample.width() || reference.height() != sample.height() {
        return Err(VisionError::DimensionMismatch {
            a_width: reference.width(),
            a_height: reference.height(),
            b_width: sample.width(),
            b_height: sample.height(),
        });
    }
    let a = reference.data();
    let b = sample.data();
    let mut changed = 0usize;
    for (pa, pb) in a.chunks_exact(4).zip(b.chunks_exact(4)) {
        let dr = f32::from(pb[0]) - f32::from(pa[0]);
        let dg = f32::from(pb[1]) - f32::from(pa[1]);
        let db = f32::from(pb[2]) - f32::from(pa[2]);
        let distance = dr.mul_add(dr, dg.mul_add(dg, db * db)).sqrt();
        if distance > color_distance_threshold {
            changed += 1;
        }
    }
    let total = reference.pixel_count();
    if total == 0 {
        return Ok(0.0);
    }
    #[allow(clippy::cast_precision_loss)]
    let ratio = changed as f64 / total as f64;
    Ok(ratio)
}

/// Compares successive samples against a sliding reference frame.
///
/// The first observed frame seeds the reference silently. Later samples
/// replace the reference only when their diff ratio exceeds the change
/// threshold; quieter samples are discarded so slow drift never accumulates
/// into a change signal.
#[derive(Debug, Default)]
pub struct FrameChangeDetector {
    settings: DetectorSettings,
    reference: Option<Frame>,
}

impl FrameChangeDetector {
    /// Creates a detector with the given settings.
    #[must_use]
    pub const fn new(settings: DetectorSettings) -> Self {
        Self {
            settings,
            reference: None,
        }
    }

    /// Current settings.
    #[must_use]
    pub const fn settings(&self) -> &DetectorSettings {
        &self.settings
    }

    /// Feeds one sample; returns the diff ratio when it qualifies as a change.
    pub fn observe(&mut self, sample: Frame) -> Result<Option<f64>, VisionError> {
        let Some(reference) = &self.reference else {
            self.reference = Some(sample);
            return Ok(None);
        };
        let ratio = compare_frames(reference, &sample, self.settings.color_distance_threshold)?;
        if ratio > self.settings.change_threshold {
            self.reference = Some(sample);
            Ok(Some(ratio))
        } else {
            Ok(None)
        }
    }

    /// Drops the reference so the next sample seeds a fresh one.
    pub fn reset(&mut self) {
        self.reference = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_frames_yield_zero_ratio() {
        let a = Frame::filled(4, 4, [10, 20, 30, 255]);
        let b = a.clone();
        let ratio = compare_frames(&a, &b, 30.0).unwrap();
        assert!((ratio - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn fully_changed_frame_yields_ratio_one() {
        let a = Frame::filled(4, 4, [0, 0, 0, 255]);
        let b = Frame::filled(4, 4, [255, 255, 255, 255]);
        let ratio = compare_frames(&a, &b, 30.0).unwrap();
        assert!((ratio - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn subtle_shift_stays_below_color_threshold() {
        let a = Frame::filled(4, 4, [100, 100, 100, 255]);
        let b = Frame::filled(4, 4, [110, 110, 110, 255]);
        // distance = sqrt(3 * 10^2) ≈ 17.3 < 30
        let ratio = compare_frames(&a, &b, 30.0).unwrap();
        assert!((ratio - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn mismatched_dimensions_are_rejected() {
        let a = Frame::filled(4, 4, [0, 0, 0, 255]);
        let b = Frame::filled(2, 2, [0, 0, 0, 255]);
        assert!(compare_frames(&a, &b, 30.0).is_err());
    }

    #[test]
    fn first_frame_seeds_reference_without_event() {
        let mut detector = FrameChangeDetector::default();
        let out = detector
            .observe(Frame::filled(4, 4, [0, 0, 0, 255]))
            .unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn qualifying_change_replaces_reference() {
        let mut detector = FrameChangeDetector::default();
        detector
            .observe(Frame::filled(4, 4, [0, 0, 0, 255]))
            .unwrap();
        let out = detector
            .observe(Frame::filled(4, 4, [255, 255, 255, 255]))
            .unwrap();
        assert!(out.is_some());
        // The white frame is now the reference, so repeating it is quiet.
        let repeat = detector
            .observe(Frame::filled(4, 4, [255, 255, 255, 255]))
            .unwrap();
        assert!(repeat.is_none());
    }

    #[test]
    fn quiet_sample_keeps_previous_reference() {
        let mut detector = FrameChangeDetector::default();
        detector
            .observe(Frame::filled(10, 10, [0, 0, 0, 255]))
            .unwrap();
        // Change a single pixel: 1/100 = 0.01 < 0.02, so the black frame stays
        // the reference and a later two-pixel change measures against it.
        let mut nearly_same = Frame::filled(10, 10, [0, 0, 0, 255]);
        nearly_same.put_pixel(0, 0, [255, 255, 255, 255]);
        assert!(detector.observe(nearly_same).unwrap().is_none());

        let mut three_pixels = Frame::filled(10, 10, [0, 0, 0, 255]);
        three_pixels.put_pixel(0, 0, [255, 255, 255, 255]);
        three_pixels.put_pixel(1, 0, [255, 255, 255, 255]);
        three_pixels.put_pixel(2, 0, [255, 255, 255, 255]);
        let ratio = detector.observe(three_pixels).unwrap().unwrap();
        assert!((ratio - 0.03).abs() < 1e-9);
    }
}
