//! Raw keypoints as delivered by the pose estimator, and the per-frame
//! confidence filter that turns them into a joint lookup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One joint estimate for one frame. Coordinates are image pixels.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Keypoint {
    #[serde(default)]
    pub name: Option<String>,
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub score: f32,
}

impl Keypoint {
    pub fn new(name: &str, x: f32, y: f32, score: f32) -> Self {
        Self {
            name: Some(name.to_string()),
            x,
            y,
            score,
        }
    }
}

/// The joints a pose needs before any gesture rule runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Joint {
    Nose,
    LeftShoulder,
    RightShoulder,
    LeftHip,
    RightHip,
    LeftWrist,
    RightWrist,
    LeftElbow,
    RightElbow,
}

impl Joint {
    pub const ESSENTIAL: [Joint; 9] = [
        Joint::Nose,
        Joint::LeftShoulder,
        Joint::RightShoulder,
        Joint::LeftHip,
        Joint::RightHip,
        Joint::LeftWrist,
        Joint::RightWrist,
        Joint::LeftElbow,
        Joint::RightElbow,
    ];

    /// MoveNet-style joint name.
    pub fn name(&self) -> &'static str {
        match self {
            Joint::Nose => "nose",
            Joint::LeftShoulder => "left_shoulder",
            Joint::RightShoulder => "right_shoulder",
            Joint::LeftHip => "left_hip",
            Joint::RightHip => "right_hip",
            Joint::LeftWrist => "left_wrist",
            Joint::RightWrist => "right_wrist",
            Joint::LeftElbow => "left_elbow",
            Joint::RightElbow => "right_elbow",
        }
    }
}

/// Keypoints of one frame that passed the confidence gate, keyed by name.
/// Only the essential set decides whether a pose is usable.
#[derive(Debug, Default)]
pub struct KeypointMap<'a> {
    accepted: HashMap<&'a str, &'a Keypoint>,
}

impl<'a> KeypointMap<'a> {
    /// Entries that are absent, unnamed or below `min_confidence` are dropped.
    /// A later entry with the same name replaces an earlier one.
    pub fn filter(raw: &'a [Option<Keypoint>], min_confidence: f32) -> Self {
        let mut accepted = HashMap::new();
        for kp in raw.iter().flatten() {
            let Some(name) = kp.name.as_deref() else {
                continue;
            };
            if name.is_empty() || !(kp.score >= min_confidence) {
                continue;
            }
            accepted.insert(name, kp);
        }
        Self { accepted }
    }

    pub fn get(&self, joint: Joint) -> Option<&'a Keypoint> {
        self.accepted.get(joint.name()).copied()
    }

    pub fn essential_count(&self) -> usize {
        Joint::ESSENTIAL
            .iter()
            .filter(|j| self.accepted.contains_key(j.name()))
            .count()
    }

    pub fn all_essential_present(&self) -> bool {
        self.essential_count() == Joint::ESSENTIAL.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_drops_missing_unnamed_and_low_confidence() {
        let raw = vec![
            Some(Keypoint::new("nose", 1.0, 2.0, 0.9)),
            None,
            Some(Keypoint {
                name: None,
                x: 0.0,
                y: 0.0,
                score: 1.0,
            }),
            Some(Keypoint::new("", 0.0, 0.0, 1.0)),
            Some(Keypoint::new("left_wrist", 5.0, 5.0, 0.1)),
            Some(Keypoint::new("left_knee", 5.0, 5.0, 0.8)),
        ];
        let map = KeypointMap::filter(&raw, 0.3);
        assert!(map.get(Joint::Nose).is_some());
        assert!(map.get(Joint::LeftWrist).is_none());
        assert_eq!(map.essential_count(), 1);
        assert!(!map.all_essential_present());
    }

    #[test]
    fn score_at_threshold_is_accepted() {
        let raw = vec![Some(Keypoint::new("nose", 0.0, 0.0, 0.3))];
        let map = KeypointMap::filter(&raw, 0.3);
        assert!(map.get(Joint::Nose).is_some());
    }

    #[test]
    fn nan_score_is_rejected() {
        let raw = vec![Some(Keypoint::new("nose", 0.0, 0.0, f32::NAN))];
        assert_eq!(KeypointMap::filter(&raw, 0.3).essential_count(), 0);
    }

    #[test]
    fn deserializes_estimator_output() {
        let kp: Keypoint =
            serde_json::from_str(r#"{"name":"nose","x":10.5,"y":20.0,"score":0.75}"#).unwrap();
        assert_eq!(kp, Keypoint::new("nose", 10.5, 20.0, 0.75));
        let anon: Keypoint = serde_json::from_str(r#"{"x":1,"y":2}"#).unwrap();
        assert!(anon.name.is_none());
        assert_eq!(anon.score, 0.0);
    }
}
