use crate::config::FaceConfig;
use crate::embedding::{self, Embedding};
use crate::error::{AttendanceError, Result};
use crate::store::EmbeddingStore;
use crate::{EmbeddingId, PersonId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureAngle {
    Front,
    Left,
    Right,
    Up,
    Down,
}

impl fmt::Display for CaptureAngle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CaptureAngle::Front => "front",
            CaptureAngle::Left => "left",
            CaptureAngle::Right => "right",
            CaptureAngle::Up => "up",
            CaptureAngle::Down => "down",
        };
        write!(f, "{}", s)
    }
}

/// One stored face embedding for one person. Soft-deleted, never removed,
/// so deactivated rows stay available for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub id: EmbeddingId,
    pub person_id: PersonId,
    /// Storage-safe binary form of the embedding vector.
    pub encoding: Vec<u8>,
    pub photo_hash: String,

    pub quality_score: Option<f32>,
    pub face_size_px: Option<u32>,
    pub brightness_score: Option<f32>,
    pub sharpness_score: Option<f32>,

    pub capture_angle: Option<CaptureAngle>,
    pub eyes_detected: bool,
    pub nose_detected: bool,
    pub mouth_detected: bool,
    pub landmark_count: u32,

    pub is_active: bool,
    pub is_primary: bool,

    pub is_verified: bool,
    pub verified_by: Option<PersonId>,
    pub verified_at: Option<DateTime<Utc>>,

    pub match_count: u64,
    pub last_matched_at: Option<DateTime<Utc>>,
    pub average_confidence: Option<f32>,

    pub created_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl EmbeddingRecord {
    pub fn all_features_detected(&self) -> bool {
        self.eyes_detected && self.nose_detected && self.mouth_detected
    }

    /// Fold one more match into the running average confidence.
    pub fn record_match(&mut self, confidence: f32, now: DateTime<Utc>) {
        self.match_count += 1;
        self.last_matched_at = Some(now);
        self.average_confidence = Some(match self.average_confidence {
            Some(avg) => (avg * (self.match_count - 1) as f32 + confidence) / self.match_count as f32,
            None => confidence,
        });
    }

    pub fn deactivate(&mut self, now: DateTime<Utc>) {
        self.is_active = false;
        self.is_primary = false;
        self.deactivated_at = Some(now);
    }

    pub fn verify(&mut self, verified_by: PersonId, now: DateTime<Utc>) {
        self.is_verified = true;
        self.verified_by = Some(verified_by);
        self.verified_at = Some(now);
    }
}

/// Metadata captured alongside a new embedding at insert time.
#[derive(Debug, Clone)]
pub struct InsertMetadata {
    pub photo_hash: String,
    pub quality_score: f32,
    pub face_size_px: u32,
    pub brightness: Option<f32>,
    pub sharpness: Option<f32>,
    pub capture_angle: Option<CaptureAngle>,
    pub eyes_detected: bool,
    pub nose_detected: bool,
    pub mouth_detected: bool,
    pub landmark_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GalleryMatch {
    pub person_id: PersonId,
    pub embedding_id: EmbeddingId,
    pub distance: f32,
    pub confidence: f32,
}

#[derive(Debug, Clone)]
pub struct EnrollmentProgress {
    pub total_photos: usize,
    pub required_photos: usize,
    pub is_complete: bool,
    pub captured_angles: Vec<CaptureAngle>,
    pub missing_angles: Vec<CaptureAngle>,
    pub average_quality: Option<f32>,
    pub has_primary: bool,
}

/// Per-person collections of face embeddings with duplicate detection,
/// primary promotion, and linear-scan nearest-match search.
///
/// The scan is O(gallery size); at campus scale (hundreds to low thousands
/// of active embeddings) this is fine, and the `search` signature isolates
/// callers from a future ANN index swap.
pub struct FaceGallery {
    store: Arc<dyn EmbeddingStore>,
    config: FaceConfig,
}

impl FaceGallery {
    pub fn new(store: Arc<dyn EmbeddingStore>, config: FaceConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn EmbeddingStore> {
        &self.store
    }

    /// Insert a new embedding for a person, rejecting duplicates.
    ///
    /// A photo is a duplicate if its hash matches an existing active photo,
    /// or its embedding is within the duplicate threshold of one. Promotion:
    /// the first active embedding, or any whose quality exceeds the
    /// high-quality cutoff, becomes primary; the previous primary is demoted
    /// so at most one active embedding per person carries the flag.
    pub fn insert(
        &self,
        person_id: PersonId,
        embedding: &Embedding,
        meta: InsertMetadata,
        now: DateTime<Utc>,
    ) -> Result<EmbeddingId> {
        let existing = self.store.active_for_person(person_id)?;

        for record in &existing {
            if record.photo_hash == meta.photo_hash {
                return Err(AttendanceError::DuplicatePhoto);
            }
            let stored = embedding::decode(&record.encoding)?;
            if embedding::euclidean(embedding, &stored) < self.config.duplicate_threshold {
                return Err(AttendanceError::DuplicatePhoto);
            }
        }

        let promote =
            existing.is_empty() || meta.quality_score > self.config.high_quality_cutoff;

        let record = EmbeddingRecord {
            id: 0,
            person_id,
            encoding: embedding::encode(embedding),
            photo_hash: meta.photo_hash,
            quality_score: Some(meta.quality_score),
            face_size_px: Some(meta.face_size_px),
            brightness_score: meta.brightness,
            sharpness_score: meta.sharpness,
            capture_angle: meta.capture_angle,
            eyes_detected: meta.eyes_detected,
            nose_detected: meta.nose_detected,
            mouth_detected: meta.mouth_detected,
            landmark_count: meta.landmark_count,
            is_active: true,
            is_primary: false,
            is_verified: false,
            verified_by: None,
            verified_at: None,
            match_count: 0,
            last_matched_at: None,
            average_confidence: None,
            created_at: now,
            deactivated_at: None,
        };

        let id = self.store.insert(record)?;

        if promote {
            for prior in existing.iter().filter(|r| r.is_primary) {
                self.store.update(prior.id, &mut |r| r.is_primary = false)?;
            }
            self.store.update(id, &mut |r| r.is_primary = true)?;
        }

        tracing::debug!(person_id, embedding_id = id, promoted = promote, "embedding inserted");
        Ok(id)
    }

    /// Soft-delete one embedding. Other embeddings are untouched.
    pub fn deactivate(&self, id: EmbeddingId, now: DateTime<Utc>) -> Result<()> {
        self.store.update(id, &mut |r| r.deactivate(now))
    }

    /// Soft-delete every embedding a person has (enrollment reset).
    pub fn deactivate_person(&self, person_id: PersonId, now: DateTime<Utc>) -> Result<usize> {
        let records = self.store.for_person(person_id)?;
        let mut count = 0;
        for record in records.iter().filter(|r| r.is_active) {
            self.store.update(record.id, &mut |r| r.deactivate(now))?;
            count += 1;
        }
        Ok(count)
    }

    pub fn verify(&self, id: EmbeddingId, verified_by: PersonId, now: DateTime<Utc>) -> Result<()> {
        self.store.update(id, &mut |r| r.verify(verified_by, now))
    }

    /// Nearest-match search over the active embeddings in scope.
    ///
    /// Keeps the globally minimal distance and accepts it only within
    /// `tolerance`; confidence is `1 - distance/tolerance` clamped to [0, 1].
    /// Equal distances break deterministically toward the lower
    /// (person_id, embedding_id).
    pub fn search(
        &self,
        query: &Embedding,
        candidates: Option<&HashSet<PersonId>>,
        tolerance: f32,
    ) -> Result<Option<GalleryMatch>> {
        let records = self.store.all_active()?;

        let mut best: Option<(f32, PersonId, EmbeddingId)> = None;
        for record in &records {
            if let Some(scope) = candidates {
                if !scope.contains(&record.person_id) {
                    continue;
                }
            }

            let stored = embedding::decode(&record.encoding)?;
            let dist = embedding::euclidean(query, &stored);

            let candidate = (dist, record.person_id, record.id);
            let better = match &best {
                None => true,
                Some(current) => {
                    candidate.0 < current.0
                        || (candidate.0 == current.0 && (candidate.1, candidate.2) < (current.1, current.2))
                }
            };
            if better {
                best = Some(candidate);
            }
        }

        match best {
            Some((distance, person_id, embedding_id)) if distance <= tolerance => {
                let confidence = (1.0 - distance / tolerance).clamp(0.0, 1.0);
                Ok(Some(GalleryMatch {
                    person_id,
                    embedding_id,
                    distance,
                    confidence,
                }))
            }
            _ => Ok(None),
        }
    }

    /// Atomically fold a successful match into an embedding's usage stats.
    pub fn record_match(
        &self,
        id: EmbeddingId,
        confidence: f32,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.store.update(id, &mut |r| r.record_match(confidence, now))
    }

    /// Active embeddings sorted by quality score descending, truncated.
    pub fn select_best(
        &self,
        person_id: PersonId,
        max_count: usize,
    ) -> Result<Vec<EmbeddingRecord>> {
        let mut records = self.store.active_for_person(person_id)?;
        records.sort_by(|a, b| {
            let qa = a.quality_score.unwrap_or(0.0);
            let qb = b.quality_score.unwrap_or(0.0);
            qb.partial_cmp(&qa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        records.truncate(max_count);
        Ok(records)
    }

    /// Enrollment completeness against angle and count requirements.
    /// Inactive embeddings are excluded.
    pub fn completeness(
        &self,
        person_id: PersonId,
        required_angles: &[CaptureAngle],
        min_count: usize,
    ) -> Result<EnrollmentProgress> {
        let records = self.store.active_for_person(person_id)?;

        let captured_angles: Vec<CaptureAngle> =
            records.iter().filter_map(|r| r.capture_angle).collect();
        let captured_set: HashSet<CaptureAngle> = captured_angles.iter().copied().collect();
        let missing_angles = required_angles
            .iter()
            .filter(|a| !captured_set.contains(a))
            .copied()
            .collect();

        let qualities: Vec<f32> = records.iter().filter_map(|r| r.quality_score).collect();
        let average_quality = if qualities.is_empty() {
            None
        } else {
            Some(qualities.iter().sum::<f32>() / qualities.len() as f32)
        };

        Ok(EnrollmentProgress {
            total_photos: records.len(),
            required_photos: min_count,
            is_complete: records.len() >= min_count,
            captured_angles,
            missing_angles,
            average_quality,
            has_primary: records.iter().any(|r| r.is_primary),
        })
    }

    pub fn active_count(&self, person_id: PersonId) -> Result<usize> {
        Ok(self.store.active_for_person(person_id)?.len())
    }
}
