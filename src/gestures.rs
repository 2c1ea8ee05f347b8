use serde::Serialize;
use std::fmt;

use crate::config::Thresholds;
use crate::smoothing::SmoothedKeypoint;

/// Exactly one of these is produced per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PoseState {
    Idle,
    PunchLeft,
    PunchRight,
    LeanLeft,
    LeanRight,
    Duck,
    PoseTemporarilyIncomplete,
    PoseIncomplete,
    PunchBoth,
    PoseLost,
}

impl PoseState {
    pub const ALL: [PoseState; 10] = [
        PoseState::Idle,
        PoseState::PunchLeft,
        PoseState::PunchRight,
        PoseState::LeanLeft,
        PoseState::LeanRight,
        PoseState::Duck,
        PoseState::PoseTemporarilyIncomplete,
        PoseState::PoseIncomplete,
        PoseState::PunchBoth,
        PoseState::PoseLost,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PoseState::Idle => "IDLE",
            PoseState::PunchLeft => "PUNCH_LEFT",
            PoseState::PunchRight => "PUNCH_RIGHT",
            PoseState::LeanLeft => "LEAN_LEFT",
            PoseState::LeanRight => "LEAN_RIGHT",
            PoseState::Duck => "DUCK",
            PoseState::PoseTemporarilyIncomplete => "POSE_TEMPORARILY_INCOMPLETE",
            PoseState::PoseIncomplete => "POSE_INCOMPLETE",
            PoseState::PunchBoth => "PUNCH_BOTH",
            PoseState::PoseLost => "POSE_LOST",
        }
    }

    /// States that describe a tracked body rather than a tracking failure.
    pub fn is_gesture(&self) -> bool {
        !matches!(
            self,
            PoseState::PoseTemporarilyIncomplete | PoseState::PoseIncomplete | PoseState::PoseLost
        )
    }
}

impl fmt::Display for PoseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// Shoulder, elbow and wrist of one arm, smoothed.
#[derive(Debug, Clone, Copy)]
pub struct Arm {
    pub shoulder: SmoothedKeypoint,
    pub elbow: SmoothedKeypoint,
    pub wrist: SmoothedKeypoint,
}

/// Torso measurements derived from the smoothed shoulders and hips.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TorsoGeometry {
    pub shoulder_mid_x: f32,
    pub shoulder_mid_y: f32,
    pub hip_mid_x: f32,
    pub hip_mid_y: f32,
    pub torso_height: f32,
    pub shoulder_width: f32,
}

impl TorsoGeometry {
    pub fn measure(
        left_shoulder: &SmoothedKeypoint,
        right_shoulder: &SmoothedKeypoint,
        left_hip: &SmoothedKeypoint,
        right_hip: &SmoothedKeypoint,
    ) -> Self {
        let shoulder_mid_x = (left_shoulder.x + right_shoulder.x) / 2.0;
        let shoulder_mid_y = (left_shoulder.y + right_shoulder.y) / 2.0;
        let hip_mid_x = (left_hip.x + right_hip.x) / 2.0;
        let hip_mid_y = (left_hip.y + right_hip.y) / 2.0;
        Self {
            shoulder_mid_x,
            shoulder_mid_y,
            hip_mid_x,
            hip_mid_y,
            torso_height: (shoulder_mid_y - hip_mid_y).abs(),
            shoulder_width: (left_shoulder.x - right_shoulder.x).abs(),
        }
    }

    /// Too small or collapsed to trust (subject far away or occluded).
    pub fn is_degenerate(&self, th: &Thresholds) -> bool {
        self.torso_height < th.min_torso_height || self.shoulder_width < th.min_shoulder_width
    }
}

/// Vertical drop of the nose below the standing baseline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoseDrop {
    pub pixels: f32,
    pub normalized: f32,
    pub min_required: f32,
}

impl NoseDrop {
    pub fn measure(
        nose_y: f32,
        standing_nose_y: f32,
        torso_height: f32,
        th: &Thresholds,
        body_scale: f32,
    ) -> Self {
        let pixels = nose_y - standing_nose_y;
        Self {
            pixels,
            normalized: pixels / torso_height.max(1.0),
            min_required: th.minimum_duck_distance * body_scale,
        }
    }
}

/// Sticky duck flag. Entering needs the full drop, leaving needs the drop to
/// fall under half of either threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DuckLatch {
    ducking: bool,
}

impl DuckLatch {
    pub fn update(&mut self, drop: &NoseDrop, ratio: f32) -> bool {
        if !self.ducking && drop.pixels > drop.min_required && drop.normalized > ratio {
            self.ducking = true;
            log::trace!("duck entered: drop {:.1}px ({:.2})", drop.pixels, drop.normalized);
        } else if self.ducking
            && (drop.pixels < drop.min_required * 0.5 || drop.normalized < ratio * 0.5)
        {
            self.ducking = false;
            log::trace!("duck released: drop {:.1}px ({:.2})", drop.pixels, drop.normalized);
        }
        self.ducking
    }

    pub fn is_ducking(&self) -> bool {
        self.ducking
    }

    pub fn release(&mut self) {
        self.ducking = false;
    }
}

/// Horizontal shoulder offset over the hips, with its trigger width.
pub fn lean_offset(geom: &TorsoGeometry, th: &Thresholds) -> (f32, f32) {
    (
        geom.shoulder_mid_x - geom.hip_mid_x,
        th.lean_threshold_x * geom.shoulder_width,
    )
}

pub fn classify_lean(offset: f32, threshold: f32) -> Option<PoseState> {
    if offset > threshold {
        Some(PoseState::LeanLeft)
    } else if offset < -threshold {
        Some(PoseState::LeanRight)
    } else {
        None
    }
}

/// An arm counts as punching when it points outward from the shoulder, the
/// forearm is long relative to the upper arm, and the wrist is roughly at
/// shoulder height.
pub fn is_punch(arm: &Arm, side: Side, geom: &TorsoGeometry, th: &Thresholds) -> bool {
    let Arm {
        shoulder: s,
        elbow: e,
        wrist: w,
    } = arm;

    let extended = match side {
        Side::Left => w.x > e.x && e.x > s.x,
        Side::Right => w.x < e.x && e.x < s.x,
    };
    if !extended {
        return false;
    }

    let se_dist = (s.x - e.x).abs();
    let ew_dist = (e.x - w.x).abs();
    let aligned_y =
        (w.y - geom.shoulder_mid_y).abs() < geom.shoulder_width * th.punch_y_alignment_factor;

    se_dist > th.punch_min_pixel_se_distance
        && ew_dist > th.punch_threshold_x * se_dist
        && aligned_y
}

pub fn combine_punches(left: bool, right: bool) -> PoseState {
    match (left, right) {
        (true, true) => PoseState::PunchBoth,
        (true, false) => PoseState::PunchLeft,
        (false, true) => PoseState::PunchRight,
        (false, false) => PoseState::Idle,
    }
}
