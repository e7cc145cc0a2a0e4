use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::error::{AttendanceError, Result};
use crate::notify::{AttendanceEvent, Notifier};
use crate::store::{AttendanceStore, SessionStore};
use crate::{EmbeddingId, PersonId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
    Excused,
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Excused => "excused",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckInMethod {
    FaceRecognition,
    QrCode,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// One logical attendance record per (session, person). Updated in place by
/// later check-ins, overrides, and excuse approvals; never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub session_id: SessionId,
    pub person_id: PersonId,

    pub status: AttendanceStatus,
    pub check_in_method: Option<CheckInMethod>,
    pub check_in_time: Option<DateTime<Utc>>,

    pub minutes_late: i64,
    pub is_late: bool,

    pub manually_marked: bool,
    pub marked_by: Option<PersonId>,
    pub override_reason: Option<String>,
    pub marked_at: DateTime<Utc>,

    pub excuse_reason: Option<String>,
    pub excuse_document_ref: Option<String>,
    pub excuse_approved_by: Option<PersonId>,
    pub excuse_approved_at: Option<DateTime<Utc>>,

    /// Face path only.
    pub face_confidence: Option<f32>,
    pub matched_embedding_id: Option<EmbeddingId>,
    /// QR path only.
    pub check_in_location: Option<GeoPoint>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AttendanceRecord {
    fn blank(
        session_id: SessionId,
        person_id: PersonId,
        status: AttendanceStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            person_id,
            status,
            check_in_method: None,
            check_in_time: None,
            minutes_late: 0,
            is_late: false,
            manually_marked: false,
            marked_by: None,
            override_reason: None,
            marked_at: now,
            excuse_reason: None,
            excuse_document_ref: None,
            excuse_approved_by: None,
            excuse_approved_at: None,
            face_confidence: None,
            matched_embedding_id: None,
            check_in_location: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn absent(session_id: SessionId, person_id: PersonId, now: DateTime<Utc>) -> Self {
        Self::blank(session_id, person_id, AttendanceStatus::Absent, now)
    }

    /// Whether the record denotes physical presence.
    pub fn is_present(&self) -> bool {
        matches!(
            self.status,
            AttendanceStatus::Present | AttendanceStatus::Late
        )
    }

    /// Fold a check-in into this record. A record that already denotes
    /// presence rejects the repeat rather than double counting; any other
    /// prior status (a manual absent, say) is overwritten in place.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_check_in(
        &mut self,
        method: CheckInMethod,
        check_in_time: DateTime<Utc>,
        minutes_late: i64,
        is_late: bool,
        confidence: Option<f32>,
        matched_embedding_id: Option<EmbeddingId>,
        location: Option<GeoPoint>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.is_present() {
            return Err(AttendanceError::AlreadyCheckedIn {
                status: self.status,
            });
        }

        self.status = if is_late {
            AttendanceStatus::Late
        } else {
            AttendanceStatus::Present
        };
        self.check_in_method = Some(method);
        self.check_in_time = Some(check_in_time);
        self.minutes_late = minutes_late;
        self.is_late = is_late;
        if confidence.is_some() {
            self.face_confidence = confidence;
            self.matched_embedding_id = matched_embedding_id;
        }
        if location.is_some() {
            self.check_in_location = location;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Manual override always wins over any automated determination and is
    /// flagged as such.
    pub fn manual_override(
        &mut self,
        new_status: AttendanceStatus,
        actor_id: PersonId,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.status = new_status;
        self.manually_marked = true;
        self.marked_by = Some(actor_id);
        self.override_reason = reason;
        self.marked_at = now;
        self.updated_at = now;
    }

    pub fn excuse(
        &mut self,
        reason: String,
        approved_by: PersonId,
        document_ref: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.status = AttendanceStatus::Excused;
        self.excuse_reason = Some(reason);
        self.excuse_approved_by = Some(approved_by);
        self.excuse_approved_at = Some(now);
        if document_ref.is_some() {
            self.excuse_document_ref = document_ref;
        }
        self.updated_at = now;
    }
}

/// Lateness relative to the scheduled start: whole minutes, floored,
/// never negative.
pub fn minutes_late(observed: DateTime<Utc>, scheduled_start: DateTime<Utc>) -> i64 {
    if observed <= scheduled_start {
        return 0;
    }
    (observed - scheduled_start).num_seconds() / 60
}

#[derive(Debug, Clone)]
pub struct AttendanceSummary {
    pub total_enrolled: u32,
    pub present: u32,
    pub late: u32,
    pub absent: u32,
    pub excused: u32,
    pub attendance_percentage: f32,
}

/// Merges check-in events into the per-(session, person) attendance record
/// and keeps the session tallies fresh. The ledger does bookkeeping only:
/// it trusts the caller to have gated session status and the check-in
/// window before asking it to write.
pub struct AttendanceLedger {
    records: Arc<dyn AttendanceStore>,
    sessions: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    notifier: Arc<dyn Notifier>,
    // One lock per subject so concurrent check-ins for the same
    // (session, person) serialize and the loser sees AlreadyCheckedIn.
    subject_locks: Mutex<HashMap<(SessionId, PersonId), Arc<Mutex<()>>>>,
}

impl AttendanceLedger {
    pub fn new(
        records: Arc<dyn AttendanceStore>,
        sessions: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            records,
            sessions,
            clock,
            config,
            notifier,
            subject_locks: Mutex::new(HashMap::new()),
        }
    }

    fn subject_lock(&self, session_id: SessionId, person_id: PersonId) -> Arc<Mutex<()>> {
        let mut locks = self
            .subject_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry((session_id, person_id))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Record a face, QR, or manual check-in for a person.
    #[allow(clippy::too_many_arguments)]
    pub fn record_check_in(
        &self,
        session_id: SessionId,
        person_id: PersonId,
        method: CheckInMethod,
        observed_time: DateTime<Utc>,
        confidence: Option<f32>,
        matched_embedding_id: Option<EmbeddingId>,
        location: Option<GeoPoint>,
    ) -> Result<AttendanceRecord> {
        let lock = self.subject_lock(session_id, person_id);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let session = self.sessions.get(session_id)?;
        let now = self.clock.now();

        let late_by = minutes_late(observed_time, session.scheduled_start);
        let is_late = late_by > self.config.late_threshold_minutes;

        let mut record = match self.records.get(session_id, person_id)? {
            Some(existing) => existing,
            None => AttendanceRecord::blank(session_id, person_id, AttendanceStatus::Absent, now),
        };

        record.apply_check_in(
            method,
            observed_time,
            late_by,
            is_late,
            confidence,
            matched_embedding_id,
            location,
            now,
        )?;

        self.records.upsert(record.clone())?;
        self.refresh_tallies(session_id)?;

        tracing::info!(
            session_id,
            person_id,
            status = %record.status,
            minutes_late = late_by,
            "check-in recorded"
        );
        self.notifier.notify(&AttendanceEvent::CheckInConfirmed {
            session_id,
            person_id,
            status: record.status,
            method,
            check_in_time: observed_time,
        });

        Ok(record)
    }

    /// Always permitted, whatever the current status; the only ledger path
    /// besides `excuse` that can set excused.
    pub fn manual_override(
        &self,
        session_id: SessionId,
        person_id: PersonId,
        new_status: AttendanceStatus,
        actor_id: PersonId,
        reason: Option<String>,
    ) -> Result<AttendanceRecord> {
        let lock = self.subject_lock(session_id, person_id);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        // Override may create the record: first manual mark for the subject.
        self.sessions.get(session_id)?;
        let now = self.clock.now();

        let mut record = match self.records.get(session_id, person_id)? {
            Some(existing) => existing,
            None => AttendanceRecord::blank(session_id, person_id, new_status, now),
        };
        record.manual_override(new_status, actor_id, reason, now);

        self.records.upsert(record.clone())?;
        self.refresh_tallies(session_id)?;
        Ok(record)
    }

    pub fn excuse(
        &self,
        session_id: SessionId,
        person_id: PersonId,
        reason: String,
        approved_by: PersonId,
        document_ref: Option<String>,
    ) -> Result<AttendanceRecord> {
        let lock = self.subject_lock(session_id, person_id);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        self.sessions.get(session_id)?;
        let now = self.clock.now();

        let mut record = match self.records.get(session_id, person_id)? {
            Some(existing) => existing,
            None => AttendanceRecord::blank(session_id, person_id, AttendanceStatus::Excused, now),
        };
        record.excuse(reason, approved_by, document_ref, now);

        self.records.upsert(record.clone())?;
        self.refresh_tallies(session_id)?;
        Ok(record)
    }

    /// Mark every roster member without a record as absent. Meant to be
    /// called by the session's owner once check-in has closed.
    pub fn sweep_absentees(&self, session_id: SessionId, roster: &[PersonId]) -> Result<usize> {
        self.sessions.get(session_id)?;
        let now = self.clock.now();

        let mut swept = 0;
        for &person_id in roster {
            let lock = self.subject_lock(session_id, person_id);
            let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

            if self.records.get(session_id, person_id)?.is_none() {
                self.records
                    .upsert(AttendanceRecord::absent(session_id, person_id, now))?;
                swept += 1;
            }
        }

        if swept > 0 {
            self.refresh_tallies(session_id)?;
        }

        let summary = self.session_summary(session_id)?;
        if summary.total_enrolled > 0
            && summary.attendance_percentage < self.config.minimum_attendance_percentage
        {
            self.notifier.notify(&AttendanceEvent::LowAttendance {
                session_id,
                attendance_percentage: summary.attendance_percentage,
            });
        }

        Ok(swept)
    }

    /// Drop the per-subject locks for a session once it has completed, so
    /// the lock map stays bounded over a term's worth of sessions. The store
    /// carries the idempotence decision; a lock recreated later still
    /// observes the existing record.
    pub fn release_session_locks(&self, session_id: SessionId) {
        let mut locks = self
            .subject_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.retain(|(sid, _), _| *sid != session_id);
    }

    pub fn session_summary(&self, session_id: SessionId) -> Result<AttendanceSummary> {
        let session = self.sessions.get(session_id)?;
        let records = self.records.for_session(session_id)?;

        let mut summary = AttendanceSummary {
            total_enrolled: session.total_enrolled,
            present: 0,
            late: 0,
            absent: 0,
            excused: 0,
            attendance_percentage: 0.0,
        };
        for record in &records {
            match record.status {
                AttendanceStatus::Present => summary.present += 1,
                AttendanceStatus::Late => summary.late += 1,
                AttendanceStatus::Absent => summary.absent += 1,
                AttendanceStatus::Excused => summary.excused += 1,
            }
        }
        if summary.total_enrolled > 0 {
            summary.attendance_percentage =
                (summary.present + summary.late) as f32 / summary.total_enrolled as f32 * 100.0;
        }
        Ok(summary)
    }

    fn refresh_tallies(&self, session_id: SessionId) -> Result<()> {
        let records = self.records.for_session(session_id)?;
        self.sessions.update(session_id, &mut |session| {
            session.recompute_stats(&records);
            Ok(())
        })
    }
}
