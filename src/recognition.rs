use crate::analyzer::FaceAnalyzer;
use crate::clock::Clock;
use crate::config::Config;
use crate::error::{AttendanceError, Result};
use crate::gallery::FaceGallery;
use crate::{EmbeddingId, PersonId};
use std::collections::HashSet;
use std::sync::Arc;

/// Outcome of a recognition attempt. Rejections are expected, frequent,
/// user-facing results, so they are a variant here rather than an error;
/// only infrastructure problems (storage, corrupt embeddings) come back as
/// `Err`.
#[derive(Debug, Clone, PartialEq)]
pub enum Recognition {
    Identified {
        person_id: PersonId,
        embedding_id: EmbeddingId,
        distance: f32,
        confidence: f32,
    },
    Rejected {
        reason: String,
    },
}

/// Orchestrates image -> embedding -> gallery search -> identity.
pub struct RecognitionService {
    analyzer: Arc<dyn FaceAnalyzer>,
    gallery: Arc<FaceGallery>,
    clock: Arc<dyn Clock>,
    config: Config,
}

impl RecognitionService {
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

    pub fn recognize(
        &self,
        image: &[u8],
        candidates: Option<&HashSet<PersonId>>,
    ) -> Result<Recognition> {
        let detection = match self.analyzer.detect(image) {
            Ok(d) => d,
            Err(e) if is_user_facing(&e) => {
                return Ok(Recognition::Rejected {
                    reason: e.to_string(),
                })
            }
            Err(e) => return Err(e),
        };

        let embedding = match self.analyzer.extract(image, &detection) {
            Ok(e) => e,
            Err(e @ AttendanceError::EncodingFailed(_)) => {
                return Ok(Recognition::Rejected {
                    reason: e.to_string(),
                })
            }
            Err(e) => return Err(e),
        };

        match self
            .gallery
            .search(&embedding, candidates, self.config.face.tolerance)?
        {
            Some(found) => {
                // Recognition is conceptually a read, but each match feeds
                // the embedding's usage telemetry.
                self.gallery
                    .record_match(found.embedding_id, found.confidence, self.clock.now())?;

                tracing::info!(
                    person_id = found.person_id,
                    distance = found.distance,
                    confidence = found.confidence,
                    "face recognized"
                );
                Ok(Recognition::Identified {
                    person_id: found.person_id,
                    embedding_id: found.embedding_id,
                    distance: found.distance,
                    confidence: found.confidence,
                })
            }
            None => Ok(Recognition::Rejected {
                reason: "Face not recognized. Please use the QR code or contact your lecturer."
                    .to_string(),
            }),
        }
    }
}

fn is_user_facing(err: &AttendanceError) -> bool {
    matches!(
        err,
        AttendanceError::NoFaceDetected
            | AttendanceError::MultipleFacesDetected { .. }
            | AttendanceError::FaceTooSmall { .. }
            | AttendanceError::InvalidImage(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{FaceBounds, FaceDetection, ScriptedAnalyzer, ScriptedOutcome};
    use crate::clock::FixedClock;
    use crate::embedding::{Embedding, EMBEDDING_DIM};
    use crate::gallery::InsertMetadata;
    use crate::store::MemoryEmbeddingStore;
    use chrono::{TimeZone, Utc};

    fn detection() -> FaceDetection {
        FaceDetection {
            bounds: FaceBounds {
                x: 0,
                y: 0,
                width: 200,
                height: 200,
            },
            face_size_px: 200,
            eyes_detected: true,
            nose_detected: true,
            mouth_detected: true,
            landmark_count: 68,
        }
    }

    fn emb(value: f32) -> Embedding {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[0] = value;
        Embedding::new(v).unwrap()
    }

    fn meta(hash: &str) -> InsertMetadata {
        InsertMetadata {
            photo_hash: hash.to_string(),
            quality_score: 0.7,
            face_size_px: 200,
            brightness: Some(0.5),
            sharpness: Some(0.7),
            capture_angle: None,
            eyes_detected: true,
            nose_detected: true,
            mouth_detected: true,
            landmark_count: 68,
        }
    }

    struct Fixture {
        service: RecognitionService,
        gallery: Arc<FaceGallery>,
    }

    fn fixture(setup: impl FnOnce(&mut ScriptedAnalyzer)) -> Fixture {
        let mut analyzer = ScriptedAnalyzer::new();
        setup(&mut analyzer);

        let config = Config::default();
        let gallery = Arc::new(FaceGallery::new(
            Arc::new(MemoryEmbeddingStore::new()),
            config.face.clone(),
        ));
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 9, 8, 9, 0, 0).unwrap(),
        ));
        Fixture {
            service: RecognitionService::new(Arc::new(analyzer), gallery.clone(), clock, config),
            gallery,
        }
    }

    #[test]
    fn recognizes_enrolled_person_and_updates_stats() {
        let probe = b"probe photo".to_vec();
        let f = fixture(|a| a.register_face(&probe, detection(), emb(0.1)));

        let now = Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap();
        let stored_id = f.gallery.insert(42, &emb(0.0), meta("h1"), now).unwrap();

        let result = f.service.recognize(&probe, None).unwrap();
        match result {
            Recognition::Identified {
                person_id,
                embedding_id,
                distance,
                confidence,
            } => {
                assert_eq!(person_id, 42);
                assert_eq!(embedding_id, stored_id);
                assert!((distance - 0.1).abs() < 1e-5);
                assert!((confidence - (1.0 - 0.1 / 0.6)).abs() < 1e-5);
            }
            other => panic!("expected identification, got {:?}", other),
        }

        let record = f.gallery.store().get(stored_id).unwrap();
        assert_eq!(record.match_count, 1);
        assert!(record.average_confidence.is_some());
        assert!(record.last_matched_at.is_some());
    }

    #[test]
    fn unknown_face_is_rejected_with_qr_fallback_hint() {
        let probe = b"stranger".to_vec();
        let f = fixture(|a| a.register_face(&probe, detection(), emb(5.0)));

        let now = Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap();
        f.gallery.insert(42, &emb(0.0), meta("h1"), now).unwrap();

        match f.service.recognize(&probe, None).unwrap() {
            Recognition::Rejected { reason } => assert!(reason.contains("QR code")),
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn detection_failures_become_rejections_not_errors() {
        let crowd = b"two people".to_vec();
        let f = fixture(|a| a.register(&crowd, ScriptedOutcome::MultipleFaces(2)));

        match f.service.recognize(&crowd, None).unwrap() {
            Recognition::Rejected { reason } => assert!(reason.contains("Multiple faces")),
            other => panic!("expected rejection, got {:?}", other),
        }

        match f.service.recognize(b"nobody home", None).unwrap() {
            Recognition::Rejected { reason } => assert!(reason.contains("No face")),
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn candidate_scope_limits_the_search() {
        let probe = b"probe photo".to_vec();
        let f = fixture(|a| a.register_face(&probe, detection(), emb(0.0)));

        let now = Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap();
        f.gallery.insert(42, &emb(0.0), meta("h1"), now).unwrap();

        let scope: HashSet<PersonId> = [99].into_iter().collect();
        match f.service.recognize(&probe, Some(&scope)).unwrap() {
            Recognition::Rejected { .. } => {}
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn corrupt_stored_embedding_is_a_hard_failure() {
        let probe = b"probe photo".to_vec();
        let f = fixture(|a| a.register_face(&probe, detection(), emb(0.0)));

        // Bypass the gallery to simulate corrupt storage.
        let now = Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap();
        let id = f.gallery.insert(42, &emb(0.0), meta("h1"), now).unwrap();
        f.gallery
            .store()
            .update(id, &mut |r| r.encoding = vec![1, 2, 3])
            .unwrap();

        assert!(matches!(
            f.service.recognize(&probe, None),
            Err(AttendanceError::EmbeddingDecode(_))
        ));
    }
}
