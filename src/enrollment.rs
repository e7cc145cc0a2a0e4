use crate::analyzer::{self, FaceAnalyzer};
use crate::clock::Clock;
use crate::config::Config;
use crate::embedding::photo_hash;
use crate::error::{AttendanceError, Result};
use crate::gallery::{
    CaptureAngle, EmbeddingRecord, EnrollmentProgress, FaceGallery, InsertMetadata,
};
use crate::quality::{self, Grade, QualityInputs};
use crate::{EmbeddingId, PersonId};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Feedback from the pre-enrollment validation gate. Cheap: runs detection
/// and quality assessment only, never writes to the gallery, so a client
/// can loop "retake photo" freely.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub issues: Vec<String>,
    pub brightness: f32,
    pub sharpness: f32,
    pub face_size_px: u32,
}

#[derive(Debug, Clone)]
pub struct EnrollmentOutcome {
    pub embedding_id: EmbeddingId,
    pub quality_score: f32,
    pub quality_grade: Option<Grade>,
    pub photos_on_file: usize,
    /// Set when this enrollment pushed the person over the minimum photo
    /// count. The caller persists the flag; the engine only computes it.
    pub face_enrolled_at: Option<DateTime<Utc>>,
}

/// Orchestrates image -> embedding -> quality check -> duplicate check ->
/// gallery insert, and tracks per-person completeness.
pub struct EnrollmentService {
    analyzer: Arc<dyn FaceAnalyzer>,
    gallery: Arc<FaceGallery>,
    clock: Arc<dyn Clock>,
    config: Config,
}

impl EnrollmentService {
    pub fn new(
        analyzer: Arc<dyn FaceAnalyzer>,
        gallery: Arc<FaceGallery>,
        clock: Arc<dyn Clock>,
        config: Config,
    ) -> Self {
        Self {
            analyzer,
            gallery,
            clock,
            config,
        }
    }

    /// Validate a candidate photo before committing anything, returning
    /// actionable feedback strings instead of errors.
    pub fn validate_image(&self, image: &[u8]) -> Result<ValidationReport> {
        let detection = self.analyzer.detect(image)?;
        let image_quality = analyzer::assess_image(image)?;

        let mut issues = Vec::new();

        if !image_quality.is_good_lighting() {
            if image_quality.brightness < 0.3 {
                issues.push("Image too dark. Please improve lighting.".to_string());
            } else {
                issues.push("Image too bright. Reduce lighting.".to_string());
            }
        }

        if !image_quality.is_sharp() {
            issues.push("Image is blurry. Please ensure camera is focused.".to_string());
        }

        // Hold validation to a stricter size bar than bare detection, so
        // photos that pass here enroll comfortably.
        let comfortable_size = self.config.face.min_face_size * 3 / 2;
        if detection.face_size_px < comfortable_size {
            issues.push("Face too small. Please move closer to camera.".to_string());
        }

        Ok(ValidationReport {
            is_valid: issues.is_empty(),
            issues,
            brightness: image_quality.brightness,
            sharpness: image_quality.sharpness,
            face_size_px: detection.face_size_px,
        })
    }

    /// Full enrollment: detect, extract, score, insert. Detection failures
    /// and duplicates surface as taxonomy errors with user-facing messages.
    pub fn enroll(
        &self,
        person_id: PersonId,
        image: &[u8],
        capture_angle: CaptureAngle,
    ) -> Result<EnrollmentOutcome> {
        let detection = self.analyzer.detect(image)?;

        if detection.face_size_px < self.config.face.min_face_size {
            return Err(AttendanceError::FaceTooSmall {
                size: detection.face_size_px,
                min: self.config.face.min_face_size,
            });
        }

        let embedding = self.analyzer.extract(image, &detection)?;

        // Image-level quality is computed independently of detection so a
        // backend that skips landmarks still yields brightness/sharpness.
        let image_quality = analyzer::assess_image(image)?;

        let quality_score = quality::score(
            &QualityInputs {
                face_size_px: detection.face_size_px,
                brightness: Some(image_quality.brightness),
                sharpness: Some(image_quality.sharpness),
                features_detected: detection.all_features_detected(),
            },
            self.config.face.optimal_face_size,
        );

        let now = self.clock.now();
        let embedding_id = self.gallery.insert(
            person_id,
            &embedding,
            InsertMetadata {
                photo_hash: photo_hash(image),
                quality_score,
                face_size_px: detection.face_size_px,
                brightness: Some(image_quality.brightness),
                sharpness: Some(image_quality.sharpness),
                capture_angle: Some(capture_angle),
                eyes_detected: detection.eyes_detected,
                nose_detected: detection.nose_detected,
                mouth_detected: detection.mouth_detected,
                landmark_count: detection.landmark_count,
            },
            now,
        )?;

        let photos_on_file = self.gallery.active_count(person_id)?;
        let face_enrolled_at = if photos_on_file >= self.config.enrollment.min_photos {
            Some(now)
        } else {
            None
        };

        tracing::info!(
            person_id,
            embedding_id,
            quality = quality_score,
            angle = %capture_angle,
            "face enrolled"
        );

        Ok(EnrollmentOutcome {
            embedding_id,
            quality_score,
            quality_grade: Grade::from_score(Some(quality_score)),
            photos_on_file,
            face_enrolled_at,
        })
    }

    /// The person's strongest embeddings, capped by config. What a host
    /// syncs to an edge device with limited gallery space.
    pub fn best_embeddings(&self, person_id: PersonId) -> Result<Vec<EmbeddingRecord>> {
        self.gallery
            .select_best(person_id, self.config.enrollment.max_best)
    }

    pub fn progress(&self, person_id: PersonId) -> Result<EnrollmentProgress> {
        self.gallery.completeness(
            person_id,
            &self.config.enrollment.required_angles,
            self.config.enrollment.min_photos,
        )
    }

    /// Deactivate every embedding for the person. Returns how many were
    /// active; the caller clears the external face-enrolled flag.
    pub fn reset(&self, person_id: PersonId) -> Result<usize> {
        let count = self.gallery.deactivate_person(person_id, self.clock.now())?;
        tracing::info!(person_id, deactivated = count, "enrollment reset");
        Ok(count)
    }
}
