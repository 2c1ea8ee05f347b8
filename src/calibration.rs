//! Body-scale tracking and the standing nose baseline.

use std::collections::VecDeque;

/// Torso height (px) that maps to a body scale of 1.0.
pub const REFERENCE_TORSO_HEIGHT: f32 = 150.0;

/// EMA of observed torso height relative to [`REFERENCE_TORSO_HEIGHT`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyScale {
    value: f32,
}

impl Default for BodyScale {
    fn default() -> Self {
        Self { value: 1.0 }
    }
}

impl BodyScale {
    pub fn update(&mut self, torso_height: f32, alpha: f32) -> f32 {
        let scale = torso_height / REFERENCE_TORSO_HEIGHT;
        self.value = self.value * (1.0 - alpha) + scale * alpha;
        self.value
    }

    pub fn value(&self) -> f32 {
        self.value
    }
}

/// Outcome of feeding one nose sample into the baseline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Baseline {
    /// Not enough samples yet.
    Pending,
    /// Baseline unchanged.
    Stable(f32),
    /// Baseline was (re)established from the window median.
    Recalibrated(f32),
}

impl Baseline {
    pub fn nose_y(&self) -> Option<f32> {
        match *self {
            Baseline::Pending => None,
            Baseline::Stable(y) | Baseline::Recalibrated(y) => Some(y),
        }
    }
}

/// Rolling-median estimate of where the nose sits when the player stands.
///
/// The torso height used for the relative-change test is whatever the
/// current frame reports, so a long enough duck is eventually absorbed into
/// the baseline.
#[derive(Debug, Clone, Default)]
pub struct StandingBaseline {
    recent_nose_ys: VecDeque<f32>,
    standing_nose_y: Option<f32>,
    standing_torso_height: Option<f32>,
}

impl StandingBaseline {
    pub fn update(
        &mut self,
        nose_y: f32,
        torso_height: f32,
        window_size: usize,
        min_frames: usize,
        change_threshold: f32,
    ) -> Baseline {
        self.recent_nose_ys.push_back(nose_y);
        while self.recent_nose_ys.len() > window_size.max(1) {
            self.recent_nose_ys.pop_front();
        }

        if self.recent_nose_ys.len() < min_frames {
            return Baseline::Pending;
        }

        let median = self.median();
        let recalibrate = match self.standing_nose_y {
            None => true,
            Some(current) => {
                (median - current).abs() / torso_height.max(1.0) > change_threshold
            }
        };

        if recalibrate {
            self.standing_nose_y = Some(median);
            self.standing_torso_height = Some(torso_height);
            Baseline::Recalibrated(median)
        } else {
            Baseline::Stable(self.standing_nose_y.unwrap_or(median))
        }
    }

    /// Upper median of the window.
    fn median(&self) -> f32 {
        let mut sorted: Vec<f32> = self.recent_nose_ys.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        sorted[sorted.len() / 2]
    }

    pub fn standing_nose_y(&self) -> Option<f32> {
        self.standing_nose_y
    }

    pub fn standing_torso_height(&self) -> Option<f32> {
        self.standing_torso_height
    }

    pub fn samples(&self) -> usize {
        self.recent_nose_ys.len()
    }
}
