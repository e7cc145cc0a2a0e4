use crate::error::{AttendanceError, Result};
use crate::gallery::CaptureAngle;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub face: FaceConfig,
    #[serde(default)]
    pub enrollment: EnrollmentConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FaceConfig {
    /// Maximum embedding distance accepted as "same person".
    #[serde(default = "default_tolerance")]
    pub tolerance: f32,
    /// Distance below which a new photo counts as a duplicate of an existing one.
    #[serde(default = "default_duplicate_threshold")]
    pub duplicate_threshold: f32,
    /// Minimum detected face size in pixels.
    #[serde(default = "default_min_face_size")]
    pub min_face_size: u32,
    /// Face size at which the size term of the quality score saturates.
    #[serde(default = "default_optimal_face_size")]
    pub optimal_face_size: u32,
    /// Quality score above which a new embedding is promoted to primary.
    #[serde(default = "default_high_quality_cutoff")]
    pub high_quality_cutoff: f32,
}

fn default_tolerance() -> f32 { 0.6 }
fn default_duplicate_threshold() -> f32 { 0.3 }
fn default_min_face_size() -> u32 { 100 }
fn default_optimal_face_size() -> u32 { 300 }
fn default_high_quality_cutoff() -> f32 { 0.8 }

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
            duplicate_threshold: default_duplicate_threshold(),
            min_face_size: default_min_face_size(),
            optimal_face_size: default_optimal_face_size(),
            high_quality_cutoff: default_high_quality_cutoff(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EnrollmentConfig {
    #[serde(default = "default_min_photos")]
    pub min_photos: usize,
    #[serde(default = "default_required_angles")]
    pub required_angles: Vec<CaptureAngle>,
    /// How many embeddings `select_best` returns by default.
    #[serde(default = "default_max_best")]
    pub max_best: usize,
}

fn default_min_photos() -> usize { 5 }
fn default_max_best() -> usize { 5 }
fn default_required_angles() -> Vec<CaptureAngle> {
    vec![
        CaptureAngle::Front,
        CaptureAngle::Left,
        CaptureAngle::Right,
        CaptureAngle::Up,
        CaptureAngle::Down,
    ]
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            min_photos: default_min_photos(),
            required_angles: default_required_angles(),
            max_best: default_max_best(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionConfig {
    /// Minutes before scheduled start that check-in opens.
    #[serde(default = "default_window_before")]
    pub check_in_before_minutes: i64,
    /// Minutes after scheduled start that check-in closes.
    #[serde(default = "default_window_after")]
    pub check_in_after_minutes: i64,
    /// Minutes after scheduled start before a check-in counts as late.
    #[serde(default = "default_late_threshold")]
    pub late_threshold_minutes: i64,
    #[serde(default = "default_qr_expiry")]
    pub qr_expiry_minutes: i64,
    /// Attendance percentage below which a low-attendance event is emitted.
    #[serde(default = "default_min_attendance")]
    pub minimum_attendance_percentage: f32,
}

fn default_window_before() -> i64 { 10 }
fn default_window_after() -> i64 { 15 }
fn default_late_threshold() -> i64 { 5 }
fn default_qr_expiry() -> i64 { 15 }
fn default_min_attendance() -> f32 { 75.0 }

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            check_in_before_minutes: default_window_before(),
            check_in_after_minutes: default_window_after(),
            late_threshold_minutes: default_late_threshold(),
            qr_expiry_minutes: default_qr_expiry(),
            minimum_attendance_percentage: default_min_attendance(),
        }
    }
}

impl Config {
    pub fn load_from_path(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Err(AttendanceError::Other(anyhow::anyhow!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| AttendanceError::Other(anyhow::anyhow!("Config parse error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.face.tolerance <= 0.0 || self.face.tolerance > 2.0 {
            return Err(AttendanceError::Other(anyhow::anyhow!(
                "Face tolerance must be in (0.0, 2.0], got {}",
                self.face.tolerance
            )));
        }
        if self.face.duplicate_threshold <= 0.0
            || self.face.duplicate_threshold >= self.face.tolerance
        {
            return Err(AttendanceError::Other(anyhow::anyhow!(
                "Duplicate threshold must be positive and stricter than tolerance, got {}",
                self.face.duplicate_threshold
            )));
        }
        if self.face.min_face_size == 0 || self.face.min_face_size > 4096 {
            return Err(AttendanceError::Other(anyhow::anyhow!(
                "Minimum face size must be between 1 and 4096, got {}",
                self.face.min_face_size
            )));
        }
        if !(0.0..=1.0).contains(&self.face.high_quality_cutoff) {
            return Err(AttendanceError::Other(anyhow::anyhow!(
                "High quality cutoff must be between 0.0 and 1.0, got {}",
                self.face.high_quality_cutoff
            )));
        }
        if self.enrollment.min_photos == 0 {
            return Err(AttendanceError::Other(anyhow::anyhow!(
                "Minimum enrollment photos must be at least 1"
            )));
        }
        if self.session.check_in_before_minutes < 0 || self.session.check_in_after_minutes < 0 {
            return Err(AttendanceError::Other(anyhow::anyhow!(
                "Check-in window minutes must not be negative"
            )));
        }
        if self.session.qr_expiry_minutes < 1 {
            return Err(AttendanceError::Other(anyhow::anyhow!(
                "QR expiry must be at least 1 minute, got {}",
                self.session.qr_expiry_minutes
            )));
        }
        if self.session.late_threshold_minutes < 0 {
            return Err(AttendanceError::Other(anyhow::anyhow!(
                "Late threshold must not be negative"
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.face.tolerance, 0.6);
        assert_eq!(config.face.duplicate_threshold, 0.3);
        assert_eq!(config.session.late_threshold_minutes, 5);
    }

    #[test]
    fn rejects_duplicate_threshold_looser_than_tolerance() {
        let mut config = Config::default();
        config.face.duplicate_threshold = 0.7;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [face]
            tolerance = 0.5

            [session]
            qr_expiry_minutes = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.face.tolerance, 0.5);
        assert_eq!(config.session.qr_expiry_minutes, 10);
        assert_eq!(config.enrollment.min_photos, 5);
        assert!(config.validate().is_ok());
    }
}
