//! Per-joint exponential smoothing across frames.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::keypoint::{Joint, Keypoint};

/// Smoothed position of one joint. `score` is the latest raw confidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SmoothedKeypoint {
    pub x: f32,
    pub y: f32,
    pub score: f32,
}

impl From<&Keypoint> for SmoothedKeypoint {
    fn from(kp: &Keypoint) -> Self {
        Self {
            x: kp.x,
            y: kp.y,
            score: kp.score,
        }
    }
}

#[derive(Debug, Default)]
pub struct KeypointSmoother {
    points: BTreeMap<Joint, SmoothedKeypoint>,
}

impl KeypointSmoother {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blend `raw` into the joint's running average.
    ///
    /// `factor` is the weight kept from the previous value, applied `passes`
    /// times. The first observation of a joint is taken as-is.
    pub fn update(
        &mut self,
        joint: Joint,
        raw: &Keypoint,
        factor: f32,
        passes: u32,
    ) -> SmoothedKeypoint {
        let sk = self
            .points
            .entry(joint)
            .and_modify(|sk| {
                for _ in 0..passes {
                    sk.x = factor * sk.x + (1.0 - factor) * raw.x;
                    sk.y = factor * sk.y + (1.0 - factor) * raw.y;
                }
                sk.score = raw.score;
            })
            .or_insert_with(|| SmoothedKeypoint::from(raw));
        *sk
    }

    /// Joints never observed are absent; stale joints keep their last value.
    pub fn points(&self) -> &BTreeMap<Joint, SmoothedKeypoint> {
        &self.points
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}
