//! Discrete gesture states (punch, lean, duck, ...) from per-frame 2D pose
//! keypoints.
//!
//! [`PoseClassifier`] is the entry point: feed it one frame of keypoints at a
//! time and it returns one [`PoseState`], keeping smoothing and calibration
//! state between calls.

pub mod calibration;
pub mod classifier;
pub mod config;
pub mod debug;
pub mod gestures;
pub mod keypoint;
pub mod replay;
pub mod smoothing;

pub use classifier::{Clock, ManualClock, MonotonicClock, PoseClassifier, SessionSnapshot};
pub use config::{Profile, Thresholds};
pub use debug::{DebugSink, DebugValue};
pub use gestures::PoseState;
pub use keypoint::{Joint, Keypoint};
pub use smoothing::SmoothedKeypoint;
