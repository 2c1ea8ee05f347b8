//! Frame classifier: one frame of keypoints in, one [`PoseState`] out.
//!
//! A [`PoseClassifier`] owns the whole tracking session (smoothed joints,
//! calibration, duck latch, incompleteness timer). It is `Send` but not
//! synchronised; feed it from one thread or put it behind a `Mutex`.

use log::debug;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::calibration::{Baseline, BodyScale, StandingBaseline};
use crate::config::Thresholds;
use crate::debug::{DebugSink, DebugValue, NoopSink};
use crate::gestures::{
    Arm, DuckLatch, NoseDrop, PoseState, Side, TorsoGeometry, classify_lean, combine_punches,
    is_punch, lean_offset,
};
use crate::keypoint::{Joint, Keypoint, KeypointMap};
use crate::smoothing::{KeypointSmoother, SmoothedKeypoint};

/// Monotonic millisecond time source.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Externally driven clock. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::Relaxed);
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }
}

/// Read-only view of the calibration state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub ducking: bool,
    pub standing_nose_y: Option<f32>,
    pub body_scale: f32,
    pub standing_torso_height: Option<f32>,
    pub last_torso_height: Option<f32>,
    pub nose_samples: usize,
}

#[derive(Debug, Default)]
struct Session {
    smoother: KeypointSmoother,
    body_scale: BodyScale,
    baseline: StandingBaseline,
    duck: DuckLatch,
    incomplete_since_ms: Option<u64>,
    last_torso_height: Option<f32>,
    last_state: Option<PoseState>,
}

pub struct PoseClassifier {
    th: Thresholds,
    session: Session,
    clock: Box<dyn Clock + Send>,
}

fn emit(sink: &mut dyn DebugSink, label: &'static str, value: impl Into<DebugValue>) {
    if let Err(e) = sink.record(label, value.into()) {
        debug!("debug sink dropped '{label}': {e}");
    }
}

impl PoseClassifier {
    pub fn new(th: Thresholds) -> Self {
        Self::with_clock(th, MonotonicClock::default())
    }

    pub fn with_clock(th: Thresholds, clock: impl Clock + Send + 'static) -> Self {
        Self {
            th,
            session: Session::default(),
            clock: Box::new(clock),
        }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.th
    }

    /// Swap tunables; calibration and smoothing carry over.
    pub fn set_thresholds(&mut self, th: Thresholds) {
        self.th = th;
    }

    pub fn classify(&mut self, keypoints: &[Option<Keypoint>]) -> PoseState {
        self.classify_with(keypoints, &mut NoopSink)
    }

    /// Classify one frame. An absent frame is an empty slice.
    pub fn classify_with(
        &mut self,
        keypoints: &[Option<Keypoint>],
        sink: &mut dyn DebugSink,
    ) -> PoseState {
        let state = self.evaluate(keypoints, sink);
        if self.session.last_state != Some(state) {
            debug!(
                "pose {} -> {}",
                self.session.last_state.map_or("-", |s| s.as_str()),
                state
            );
            self.session.last_state = Some(state);
        }
        state
    }

    fn evaluate(&mut self, keypoints: &[Option<Keypoint>], sink: &mut dyn DebugSink) -> PoseState {
        let th = &self.th;
        let session = &mut self.session;

        if keypoints.is_empty() {
            session.incomplete_since_ms = None;
            return PoseState::PoseLost;
        }

        // availability gate
        let map = KeypointMap::filter(keypoints, th.min_pose_confidence);
        let enough = map.essential_count() >= th.min_essential_keypoints_for_valid_pose;
        if !map.all_essential_present() || !enough {
            let now = self.clock.now_ms();
            let grace_ms = th.temporarily_incomplete_duration_ms;
            return match session.incomplete_since_ms {
                None => {
                    session.incomplete_since_ms = Some(now);
                    PoseState::PoseTemporarilyIncomplete
                }
                Some(since) if now.saturating_sub(since) < grace_ms => {
                    PoseState::PoseTemporarilyIncomplete
                }
                Some(_) => PoseState::PoseIncomplete,
            };
        }
        session.incomplete_since_ms = None;

        // smoothing, in Joint::ESSENTIAL order
        let mut smoothed = [SmoothedKeypoint {
            x: 0.0,
            y: 0.0,
            score: 0.0,
        }; 9];
        for (slot, joint) in smoothed.iter_mut().zip(Joint::ESSENTIAL) {
            let Some(raw) = map.get(joint) else {
                return PoseState::PoseIncomplete;
            };
            *slot = session
                .smoother
                .update(joint, raw, th.pose_smooth_factor, th.smoothing_passes);
        }
        if smoothed.iter().any(|sk| !(sk.score >= th.min_pose_confidence)) {
            return PoseState::PoseIncomplete;
        }
        let at = |j: Joint| smoothed[j as usize];

        let geom = TorsoGeometry::measure(
            &at(Joint::LeftShoulder),
            &at(Joint::RightShoulder),
            &at(Joint::LeftHip),
            &at(Joint::RightHip),
        );
        if geom.is_degenerate(th) {
            return PoseState::PoseLost;
        }

        // calibration
        let body_scale = session
            .body_scale
            .update(geom.torso_height, th.body_scale_ema_alpha);
        emit(sink, "body_scale", body_scale);

        let nose = at(Joint::Nose);
        let baseline = session.baseline.update(
            nose.y,
            geom.torso_height,
            th.standing_height_window_size,
            th.min_frames_for_valid_standing_height,
            th.torso_change_threshold,
        );
        if let Baseline::Recalibrated(y) = baseline {
            debug!("standing baseline set to {y:.1} (torso {:.1})", geom.torso_height);
            session.duck.release();
        }
        session.last_torso_height = Some(geom.torso_height);

        emit(sink, "torso_height", geom.torso_height);
        emit(sink, "shoulder_width", geom.shoulder_width);
        emit(sink, "standing_nose_y", baseline.nose_y());
        emit(sink, "current_nose_y", nose.y);

        // duck
        if let Some(standing_nose_y) = baseline.nose_y() {
            let drop =
                NoseDrop::measure(nose.y, standing_nose_y, geom.torso_height, th, body_scale);
            emit(sink, "drop_pixels", drop.pixels);
            emit(sink, "normalized_drop", drop.normalized);
            emit(sink, "duck_threshold", th.duck_threshold_ratio);

            let ducking = session.duck.update(&drop, th.duck_threshold_ratio);
            emit(sink, "is_ducking", ducking);
        }
        if session.duck.is_ducking() {
            return PoseState::Duck;
        }

        // lean
        let (offset, threshold) = lean_offset(&geom, th);
        emit(sink, "lean_offset", offset);
        emit(sink, "lean_threshold", threshold);
        if let Some(lean) = classify_lean(offset, threshold) {
            return lean;
        }

        // punch
        let left = Arm {
            shoulder: at(Joint::LeftShoulder),
            elbow: at(Joint::LeftElbow),
            wrist: at(Joint::LeftWrist),
        };
        let right = Arm {
            shoulder: at(Joint::RightShoulder),
            elbow: at(Joint::RightElbow),
            wrist: at(Joint::RightWrist),
        };
        let left_punch = is_punch(&left, Side::Left, &geom, th);
        let right_punch = is_punch(&right, Side::Right, &geom, th);
        emit(sink, "left_punch", left_punch);
        emit(sink, "right_punch", right_punch);

        combine_punches(left_punch, right_punch)
    }

    /// Latest smoothed position of every joint seen this session.
    pub fn smoothed_keypoints(&self) -> &BTreeMap<Joint, SmoothedKeypoint> {
        self.session.smoother.points()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let s = &self.session;
        SessionSnapshot {
            ducking: s.duck.is_ducking(),
            standing_nose_y: s.baseline.standing_nose_y(),
            body_scale: s.body_scale.value(),
            standing_torso_height: s.baseline.standing_torso_height(),
            last_torso_height: s.last_torso_height,
            nose_samples: s.baseline.samples(),
        }
    }

    /// Forget everything learned this session (new round, new player).
    pub fn reset(&mut self) {
        self.session = Session::default();
        debug!("session reset");
    }
}
