use anyhow::{Context, Result, anyhow};
use directories::UserDirs;
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

use crate::keypoint::Joint;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Meta {
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Tunables for the frame classifier. Distances are in pixels.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Thresholds {
    pub min_pose_confidence: f32,
    pub pose_smooth_factor: f32,
    pub smoothing_passes: u32,
    pub min_torso_height: f32,
    pub min_shoulder_width: f32,
    /// Relative nose-median shift (in torso heights) that forces recalibration.
    pub torso_change_threshold: f32,
    pub duck_threshold_ratio: f32,
    /// Scaled by body scale before use.
    pub minimum_duck_distance: f32,
    pub lean_threshold_x: f32,
    pub punch_threshold_x: f32,
    pub punch_min_pixel_se_distance: f32,
    pub punch_y_alignment_factor: f32,
    pub temporarily_incomplete_duration_ms: u64,
    pub body_scale_ema_alpha: f32,
    pub standing_height_window_size: usize,
    pub min_frames_for_valid_standing_height: usize,
    pub min_essential_keypoints_for_valid_pose: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_pose_confidence: 0.3,
            pose_smooth_factor: 0.8,
            smoothing_passes: 1,
            min_torso_height: 30.0,
            min_shoulder_width: 30.0,
            torso_change_threshold: 0.2,
            duck_threshold_ratio: 0.35,
            minimum_duck_distance: 15.0,
            lean_threshold_x: 0.15,
            punch_threshold_x: 0.3,
            punch_min_pixel_se_distance: 10.0,
            punch_y_alignment_factor: 0.6,
            temporarily_incomplete_duration_ms: 500,
            body_scale_ema_alpha: 0.1,
            standing_height_window_size: 30,
            min_frames_for_valid_standing_height: 15,
            min_essential_keypoints_for_valid_pose: 7,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    #[serde(default)]
    pub meta: Meta,
    #[serde(default)]
    pub thresholds: Thresholds,
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("thresholds.{field} {reason}")]
    InvalidThreshold { field: &'static str, reason: String },
    #[error("profile not found: {0}")]
    NotFound(PathBuf),
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ProfileError {
    ProfileError::InvalidThreshold {
        field,
        reason: reason.into(),
    }
}

pub fn validate_thresholds(th: &Thresholds) -> std::result::Result<(), ProfileError> {
    if !(0.0..=1.0).contains(&th.min_pose_confidence) {
        return Err(invalid("min_pose_confidence", "must be in [0,1]"));
    }
    if !(0.0..1.0).contains(&th.pose_smooth_factor) {
        return Err(invalid("pose_smooth_factor", "must be in [0,1)"));
    }
    if th.smoothing_passes == 0 {
        return Err(invalid("smoothing_passes", "must be at least 1"));
    }
    if !(th.body_scale_ema_alpha > 0.0 && th.body_scale_ema_alpha <= 1.0) {
        return Err(invalid("body_scale_ema_alpha", "must be in (0,1]"));
    }
    if th.standing_height_window_size == 0 {
        return Err(invalid("standing_height_window_size", "must be at least 1"));
    }
    if th.min_frames_for_valid_standing_height == 0
        || th.min_frames_for_valid_standing_height > th.standing_height_window_size
    {
        return Err(invalid(
            "min_frames_for_valid_standing_height",
            format!(
                "must be in [1, {}] (standing_height_window_size)",
                th.standing_height_window_size
            ),
        ));
    }
    let essential = Joint::ESSENTIAL.len();
    if th.min_essential_keypoints_for_valid_pose == 0
        || th.min_essential_keypoints_for_valid_pose > essential
    {
        return Err(invalid(
            "min_essential_keypoints_for_valid_pose",
            format!("must be in [1, {essential}]"),
        ));
    }

    let positive = [
        ("min_torso_height", th.min_torso_height),
        ("min_shoulder_width", th.min_shoulder_width),
        ("torso_change_threshold", th.torso_change_threshold),
        ("duck_threshold_ratio", th.duck_threshold_ratio),
        ("lean_threshold_x", th.lean_threshold_x),
        ("punch_y_alignment_factor", th.punch_y_alignment_factor),
    ];
    for (field, v) in positive {
        if !(v > 0.0) {
            return Err(invalid(field, "must be positive"));
        }
    }
    let non_negative = [
        ("minimum_duck_distance", th.minimum_duck_distance),
        ("punch_threshold_x", th.punch_threshold_x),
        ("punch_min_pixel_se_distance", th.punch_min_pixel_se_distance),
    ];
    for (field, v) in non_negative {
        if !(v >= 0.0) {
            return Err(invalid(field, "must not be negative"));
        }
    }
    Ok(())
}

impl Profile {
    pub fn parse(txt: &str) -> Result<Self> {
        let profile: Profile = toml::from_str(txt)?;
        validate_thresholds(&profile.thresholds)?;
        Ok(profile)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let txt = fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read {}: {e}", path.display()))?;
        Self::parse(&txt).with_context(|| format!("failed to load {}", path.display()))
    }

    pub fn display_name(&self) -> &str {
        self.meta.name.as_deref().unwrap_or("unnamed")
    }
}

pub fn default_profile_text() -> &'static str {
    include_str!("../profiles/default.toml")
}

/// Profiles on disk: `<config>/profiles/<name>.toml` plus an `active` file
/// naming the one in use.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    pub config_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub active_ptr: PathBuf,
}

impl ProfileStore {
    pub fn user() -> Result<Self> {
        let home = UserDirs::new()
            .ok_or_else(|| anyhow!("could not resolve home directory"))?
            .home_dir()
            .to_path_buf();
        Ok(Self::at(home.join(".config").join("posectl")))
    }

    pub fn at(config_dir: PathBuf) -> Self {
        let profiles_dir = config_dir.join("profiles");
        let active_ptr = config_dir.join("active");
        Self {
            config_dir,
            profiles_dir,
            active_ptr,
        }
    }

    /// Make sure the default profile and the active pointer exist.
    pub fn install_default(&self) -> Result<()> {
        fs::create_dir_all(&self.profiles_dir)?;

        let def_path = self.profile_path("default");
        if !def_path.exists() {
            fs::write(&def_path, default_profile_text())?;
            info!("installed default profile at {}", def_path.display());
        }
        if !self.active_ptr.exists() {
            fs::write(&self.active_ptr, b"default")?;
        }
        Ok(())
    }

    pub fn active_name(&self) -> Result<String> {
        let name = fs::read_to_string(&self.active_ptr)
            .map_err(|e| anyhow!("failed to read {}: {e}", self.active_ptr.display()))?;
        Ok(name.trim().to_string())
    }

    pub fn load_or_install_default(&self) -> Result<(String, Profile)> {
        self.install_default()?;
        let name = self.active_name()?;
        let profile = self.load(&name)?;
        Ok((name, profile))
    }

    pub fn profile_path(&self, name: &str) -> PathBuf {
        self.profiles_dir.join(format!("{name}.toml"))
    }

    pub fn load(&self, name: &str) -> Result<Profile> {
        let path = self.profile_path(name);
        if !path.exists() {
            return Err(ProfileError::NotFound(path).into());
        }
        Profile::from_path(&path)
    }

    pub fn set_active(&self, name: &str) -> Result<Profile> {
        let profile = self.load(name)?;
        fs::write(&self.active_ptr, name.as_bytes())?;
        Ok(profile)
    }

    pub fn list(&self) -> Vec<String> {
        let mut v = Vec::new();
        if let Ok(rd) = fs::read_dir(&self.profiles_dir) {
            for e in rd.flatten() {
                let path = e.path();
                if path.extension().is_some_and(|ext| ext == "toml") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        v.push(stem.to_string());
                    }
                }
            }
        }
        v.sort();
        v
    }

    pub fn doctor_report(&self) -> serde_json::Value {
        let active = self.active_name().ok();
        let active_status = match active.as_deref() {
            Some(name) => match self.load(name) {
                Ok(_) => "ok".to_string(),
                Err(e) => format!("{e:#}"),
            },
            None => "no active profile".to_string(),
        };
        serde_json::json!({
            "config_dir": self.config_dir,
            "profiles_dir": self.profiles_dir,
            "profiles_dir_present": self.profiles_dir.exists(),
            "profiles": self.list(),
            "active_profile": active,
            "active_profile_status": active_status,
            "hints": {
                "install_default": "posectl list (creates the default profile)",
                "log_level": "RUST_LOG=debug posectl classify frames.jsonl"
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(tag: &str) -> ProfileStore {
        let dir = std::env::temp_dir().join(format!("posectl-test-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        ProfileStore::at(dir)
    }

    #[test]
    fn bundled_default_profile_matches_defaults() {
        let p = Profile::parse(default_profile_text()).unwrap();
        assert_eq!(p.display_name(), "default");
        assert_eq!(p.thresholds, Thresholds::default());
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let p = Profile::parse("[thresholds]\nduck_threshold_ratio = 0.5\n").unwrap();
        assert_eq!(p.thresholds.duck_threshold_ratio, 0.5);
        assert_eq!(p.thresholds.standing_height_window_size, 30);
        assert_eq!(p.display_name(), "unnamed");
    }

    #[test]
    fn rejects_out_of_range_values() {
        let err = Profile::parse("[thresholds]\npose_smooth_factor = 1.0\n").unwrap_err();
        assert!(format!("{err:#}").contains("pose_smooth_factor"));

        let th = Thresholds {
            min_frames_for_valid_standing_height: 40,
            ..Thresholds::default()
        };
        assert!(matches!(
            validate_thresholds(&th),
            Err(ProfileError::InvalidThreshold {
                field: "min_frames_for_valid_standing_height",
                ..
            })
        ));

        let th = Thresholds {
            min_essential_keypoints_for_valid_pose: 10,
            ..Thresholds::default()
        };
        assert!(validate_thresholds(&th).is_err());

        let th = Thresholds {
            min_torso_height: f32::NAN,
            ..Thresholds::default()
        };
        assert!(validate_thresholds(&th).is_err());
    }

    #[test]
    fn rejects_wrong_types() {
        assert!(Profile::parse("[thresholds]\nsmoothing_passes = \"two\"\n").is_err());
    }

    #[test]
    fn store_installs_lists_and_switches() {
        let store = temp_store("switch");
        let (name, profile) = store.load_or_install_default().unwrap();
        assert_eq!(name, "default");
        assert_eq!(profile.thresholds, Thresholds::default());

        fs::write(
            store.profile_path("close"),
            "[meta]\nname = \"close\"\n[thresholds]\nmin_torso_height = 60.0\n",
        )
        .unwrap();
        assert_eq!(store.list(), vec!["close".to_string(), "default".to_string()]);

        let p = store.set_active("close").unwrap();
        assert_eq!(p.thresholds.min_torso_height, 60.0);
        assert_eq!(store.active_name().unwrap(), "close");

        let err = store.set_active("missing").unwrap_err();
        assert!(err.downcast_ref::<ProfileError>().is_some());
        assert_eq!(store.active_name().unwrap(), "close");

        let report = store.doctor_report();
        assert_eq!(report["active_profile"], "close");
        assert_eq!(report["active_profile_status"], "ok");

        let _ = fs::remove_dir_all(&store.config_dir);
    }
}
