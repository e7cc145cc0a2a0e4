use crate::embedding::Embedding;
use crate::error::{AttendanceError, Result};
use crate::quality::{self, ImageQuality};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub struct FaceBounds {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Result of detecting exactly one face in an image.
#[derive(Debug, Clone)]
pub struct FaceDetection {
    pub bounds: FaceBounds,
    /// min(width, height) of the detected face region.
    pub face_size_px: u32,
    pub eyes_detected: bool,
    pub nose_detected: bool,
    pub mouth_detected: bool,
    pub landmark_count: u32,
}

impl FaceDetection {
    pub fn all_features_detected(&self) -> bool {
        self.eyes_detected && self.nose_detected && self.mouth_detected
    }
}

/// Seam to the face model backend. The engine never runs inference itself;
/// a host wires in an implementation (ONNX, a remote service, ...).
///
/// `detect` enforces the exactly-one-face contract: zero faces, more than
/// one face, or a face below the minimum size are errors from the taxonomy,
/// not backend-specific failures.
pub trait FaceAnalyzer: Send + Sync {
    fn detect(&self, image: &[u8]) -> Result<FaceDetection>;

    fn extract(&self, image: &[u8], detection: &FaceDetection) -> Result<Embedding>;
}

/// Decode raw JPEG/PNG bytes and compute pixel-level quality metrics.
pub fn assess_image(image_bytes: &[u8]) -> Result<ImageQuality> {
    let img = image::load_from_memory(image_bytes)
        .map_err(|e| AttendanceError::InvalidImage(e.to_string()))?;
    Ok(quality::assess(&img))
}

/// Outcome a [`ScriptedAnalyzer`] replays for a registered image.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    Face {
        detection: FaceDetection,
        embedding: Embedding,
    },
    NoFace,
    MultipleFaces(usize),
    TooSmall { size: u32, min: u32 },
}

/// Deterministic analyzer backend keyed by photo hash. Used in tests and by
/// hosts that resolve detections out of band.
#[derive(Default)]
pub struct ScriptedAnalyzer {
    outcomes: HashMap<String, ScriptedOutcome>,
}

impl ScriptedAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, image: &[u8], outcome: ScriptedOutcome) {
        self.outcomes
            .insert(crate::embedding::photo_hash(image), outcome);
    }

    pub fn register_face(&mut self, image: &[u8], detection: FaceDetection, embedding: Embedding) {
        self.register(
            image,
            ScriptedOutcome::Face {
                detection,
                embedding,
            },
        );
    }

    fn outcome(&self, image: &[u8]) -> Result<&ScriptedOutcome> {
        self.outcomes
            .get(&crate::embedding::photo_hash(image))
            .ok_or(AttendanceError::NoFaceDetected)
    }
}

impl FaceAnalyzer for ScriptedAnalyzer {
    fn detect(&self, image: &[u8]) -> Result<FaceDetection> {
        match self.outcome(image)? {
            ScriptedOutcome::Face { detection, .. } => Ok(detection.clone()),
            ScriptedOutcome::NoFace => Err(AttendanceError::NoFaceDetected),
            ScriptedOutcome::MultipleFaces(count) => {
                Err(AttendanceError::MultipleFacesDetected { count: *count })
            }
            ScriptedOutcome::TooSmall { size, min } => Err(AttendanceError::FaceTooSmall {
                size: *size,
                min: *min,
            }),
        }
    }

    fn extract(&self, image: &[u8], _detection: &FaceDetection) -> Result<Embedding> {
        match self.outcome(image)? {
            ScriptedOutcome::Face { embedding, .. } => Ok(embedding.clone()),
            _ => Err(AttendanceError::EncodingFailed(
                "no embedding scripted for image".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EMBEDDING_DIM;

    fn detection(size: u32) -> FaceDetection {
        FaceDetection {
            bounds: FaceBounds {
                x: 10,
                y: 10,
                width: size,
                height: size,
            },
            face_size_px: size,
            eyes_detected: true,
            nose_detected: true,
            mouth_detected: true,
            landmark_count: 68,
        }
    }

    #[test]
    fn scripted_analyzer_replays_outcomes() {
        let mut analyzer = ScriptedAnalyzer::new();
        let embedding = Embedding::new(vec![0.1; EMBEDDING_DIM]).unwrap();
        analyzer.register_face(b"good", detection(200), embedding.clone());
        analyzer.register(b"crowd", ScriptedOutcome::MultipleFaces(3));

        assert_eq!(analyzer.detect(b"good").unwrap().face_size_px, 200);
        assert_eq!(
            analyzer.extract(b"good", &detection(200)).unwrap(),
            embedding
        );
        assert!(matches!(
            analyzer.detect(b"crowd"),
            Err(AttendanceError::MultipleFacesDetected { count: 3 })
        ));
        assert!(matches!(
            analyzer.detect(b"unknown"),
            Err(AttendanceError::NoFaceDetected)
        ));
    }

    #[test]
    fn assess_image_rejects_non_image_bytes() {
        assert!(matches!(
            assess_image(b"definitely not a jpeg"),
            Err(AttendanceError::InvalidImage(_))
        ));
    }
}
