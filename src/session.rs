use crate::attendance::{AttendanceRecord, AttendanceStatus};
use crate::error::{AttendanceError, Result};
use crate::token::{QrPayload, TokenCipher};
use crate::SessionId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
    Postponed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Postponed => "postponed",
        };
        write!(f, "{}", s)
    }
}

/// One scheduled class meeting and its lifecycle.
///
/// Legal transitions: scheduled -> in_progress -> completed, and
/// scheduled -> cancelled | postponed. An in-progress session can only end;
/// cancel and postpone apply before it starts. Tallies are a cache derived
/// from the session's attendance records, never the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    pub status: SessionStatus,

    pub attendance_enabled: bool,
    /// Check-in window bounds; set only once the session has started.
    pub check_in_start: Option<DateTime<Utc>>,
    pub check_in_end: Option<DateTime<Utc>>,

    pub qr_token: Option<String>,
    pub qr_issued_at: Option<DateTime<Utc>>,
    pub qr_expires_at: Option<DateTime<Utc>>,

    // Cached tallies, refreshed by recompute_stats.
    pub total_enrolled: u32,
    pub present_count: u32,
    pub late_count: u32,
    pub absent_count: u32,
    pub excused_count: u32,

    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub postponed_to: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        id: SessionId,
        scheduled_start: DateTime<Utc>,
        scheduled_end: DateTime<Utc>,
        total_enrolled: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            scheduled_start,
            scheduled_end,
            status: SessionStatus::Scheduled,
            attendance_enabled: true,
            check_in_start: None,
            check_in_end: None,
            qr_token: None,
            qr_issued_at: None,
            qr_expires_at: None,
            total_enrolled,
            present_count: 0,
            late_count: 0,
            absent_count: 0,
            excused_count: 0,
            cancelled_at: None,
            cancellation_reason: None,
            postponed_to: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn guard(&self, expected: SessionStatus, to: SessionStatus) -> Result<()> {
        if self.status != expected {
            return Err(AttendanceError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        Ok(())
    }

    /// Open the session: sets the check-in window around the scheduled start
    /// and moves to in_progress. Legal only from scheduled.
    pub fn start(
        &mut self,
        before_minutes: i64,
        after_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.guard(SessionStatus::Scheduled, SessionStatus::InProgress)?;

        self.status = SessionStatus::InProgress;
        self.check_in_start = Some(self.scheduled_start - Duration::minutes(before_minutes));
        self.check_in_end = Some(self.scheduled_start + Duration::minutes(after_minutes));
        self.updated_at = now;

        tracing::info!(session_id = self.id, "session started");
        Ok(())
    }

    /// Complete the session and close the check-in window immediately,
    /// whatever end bound was originally computed.
    pub fn end(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.guard(SessionStatus::InProgress, SessionStatus::Completed)?;

        self.status = SessionStatus::Completed;
        self.check_in_end = Some(now);
        self.updated_at = now;

        tracing::info!(session_id = self.id, "session completed");
        Ok(())
    }

    pub fn cancel(&mut self, reason: Option<String>, now: DateTime<Utc>) -> Result<()> {
        self.guard(SessionStatus::Scheduled, SessionStatus::Cancelled)?;

        self.status = SessionStatus::Cancelled;
        self.cancelled_at = Some(now);
        self.cancellation_reason = reason;
        self.updated_at = now;
        Ok(())
    }

    pub fn postpone(
        &mut self,
        new_time: DateTime<Utc>,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.guard(SessionStatus::Scheduled, SessionStatus::Postponed)?;

        self.status = SessionStatus::Postponed;
        self.postponed_to = Some(new_time);
        self.cancellation_reason = reason;
        self.updated_at = now;
        Ok(())
    }

    /// Whether a check-in submitted at `now` would be accepted.
    pub fn can_check_in(&self, now: DateTime<Utc>) -> bool {
        if !self.attendance_enabled || self.status != SessionStatus::InProgress {
            return false;
        }
        match (self.check_in_start, self.check_in_end) {
            (Some(start), Some(end)) => start <= now && now <= end,
            _ => true,
        }
    }

    /// Force-mint a new QR token, invalidating the stored one for future
    /// validations. Tokens already captured keep their own embedded expiry.
    pub fn issue_qr(
        &mut self,
        cipher: &dyn TokenCipher,
        expiry_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let payload = QrPayload::new(self.id, now);
        let token = payload.seal(cipher)?;

        self.qr_token = Some(token.clone());
        self.qr_issued_at = Some(now);
        self.qr_expires_at = Some(now + Duration::minutes(expiry_minutes));
        self.updated_at = now;

        tracing::debug!(session_id = self.id, "qr token issued");
        Ok(token)
    }

    /// Return the stored token, minting a fresh one if none exists or the
    /// stored one has expired.
    pub fn current_or_issue_qr(
        &mut self,
        cipher: &dyn TokenCipher,
        expiry_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<String> {
        if self.is_qr_valid(now) {
            if let Some(token) = &self.qr_token {
                return Ok(token.clone());
            }
        }
        self.issue_qr(cipher, expiry_minutes, now)
    }

    pub fn is_qr_valid(&self, now: DateTime<Utc>) -> bool {
        match (&self.qr_token, self.qr_expires_at) {
            (Some(_), Some(expires)) => now < expires,
            _ => false,
        }
    }

    /// Validate a presented QR token: it must open under the cipher, name
    /// this session, and still be inside its own expiry window. A token
    /// minted before a refresh stays valid until its embedded expiry.
    pub fn verify_qr(
        &self,
        cipher: &dyn TokenCipher,
        token: &str,
        expiry_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let payload = QrPayload::open(cipher, token)?;

        if payload.session_id != self.id {
            return Err(AttendanceError::TokenInvalid(
                "token was issued for a different session".into(),
            ));
        }
        if now > payload.issued_at + Duration::minutes(expiry_minutes) {
            return Err(AttendanceError::TokenExpired);
        }
        Ok(())
    }

    /// Recount tallies from the session's attendance records. Idempotent;
    /// called after every attendance write.
    pub fn recompute_stats(&mut self, records: &[AttendanceRecord]) {
        self.present_count = 0;
        self.late_count = 0;
        self.absent_count = 0;
        self.excused_count = 0;

        for record in records.iter().filter(|r| r.session_id == self.id) {
            match record.status {
                AttendanceStatus::Present => self.present_count += 1,
                AttendanceStatus::Late => self.late_count += 1,
                AttendanceStatus::Absent => self.absent_count += 1,
                AttendanceStatus::Excused => self.excused_count += 1,
            }
        }
    }

    pub fn attendance_percentage(&self) -> f32 {
        if self.total_enrolled == 0 {
            return 0.0;
        }
        (self.present_count + self.late_count) as f32 / self.total_enrolled as f32 * 100.0
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.scheduled_end - self.scheduled_start).num_minutes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::HmacTokenCipher;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 8, h, m, 0).unwrap()
    }

    fn at_sec(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 8, h, m, s).unwrap()
    }

    fn session() -> Session {
        // scheduled 09:00-10:00
        Session::new(7, at(9, 0), at(10, 0), 30, at(8, 0))
    }

    #[test]
    fn start_computes_window_from_scheduled_start() {
        let mut s = session();
        s.start(10, 15, at(8, 55)).unwrap();

        assert_eq!(s.status, SessionStatus::InProgress);
        assert_eq!(s.check_in_start, Some(at(8, 50)));
        assert_eq!(s.check_in_end, Some(at(9, 15)));
        assert!(s.can_check_in(at(8, 55)));
        assert!(!s.can_check_in(at(9, 16)));
    }

    #[test]
    fn double_start_is_rejected() {
        let mut s = session();
        s.start(10, 15, at(8, 55)).unwrap();
        let err = s.start(10, 15, at(8, 56)).unwrap_err();
        assert!(matches!(
            err,
            AttendanceError::InvalidTransition {
                from: SessionStatus::InProgress,
                to: SessionStatus::InProgress
            }
        ));
    }

    #[test]
    fn end_requires_in_progress_and_clamps_window() {
        let mut s = session();
        assert!(matches!(
            s.end(at(9, 0)),
            Err(AttendanceError::InvalidTransition { .. })
        ));

        s.start(10, 15, at(8, 55)).unwrap();
        s.end(at(9, 5)).unwrap();
        assert_eq!(s.status, SessionStatus::Completed);
        assert_eq!(s.check_in_end, Some(at(9, 5)));
        assert!(!s.can_check_in(at(9, 6)));
    }

    #[test]
    fn cancel_and_postpone_only_from_scheduled() {
        let mut s = session();
        s.start(10, 15, at(8, 55)).unwrap();
        assert!(s.cancel(Some("room flooded".into()), at(9, 0)).is_err());
        assert!(s.postpone(at(11, 0), None, at(9, 0)).is_err());

        let mut s2 = session();
        s2.cancel(Some("room flooded".into()), at(8, 30)).unwrap();
        assert_eq!(s2.status, SessionStatus::Cancelled);
        assert_eq!(s2.cancelled_at, Some(at(8, 30)));

        let mut s3 = session();
        s3.postpone(at(14, 0), Some("strike".into()), at(8, 30)).unwrap();
        assert_eq!(s3.status, SessionStatus::Postponed);
        assert_eq!(s3.postponed_to, Some(at(14, 0)));
    }

    #[test]
    fn check_in_gate_respects_enabled_flag() {
        let mut s = session();
        s.start(10, 15, at(8, 55)).unwrap();
        s.attendance_enabled = false;
        assert!(!s.can_check_in(at(9, 0)));
    }

    #[test]
    fn qr_token_expiry_boundaries() {
        let cipher = HmacTokenCipher::new("secret");
        let mut s = session();
        s.start(10, 15, at(8, 55)).unwrap();

        let issued = at(9, 0);
        let token = s.issue_qr(&cipher, 15, issued).unwrap();

        assert!(s.verify_qr(&cipher, &token, 15, at_sec(9, 14, 59)).is_ok());
        assert!(matches!(
            s.verify_qr(&cipher, &token, 15, at_sec(9, 15, 1)),
            Err(AttendanceError::TokenExpired)
        ));
    }

    #[test]
    fn qr_token_for_other_session_is_rejected() {
        let cipher = HmacTokenCipher::new("secret");
        let mut other = Session::new(99, at(9, 0), at(10, 0), 30, at(8, 0));
        let token = other.issue_qr(&cipher, 15, at(9, 0)).unwrap();

        let s = session();
        assert!(matches!(
            s.verify_qr(&cipher, &token, 15, at(9, 1)),
            Err(AttendanceError::TokenInvalid(_))
        ));
    }

    #[test]
    fn refresh_does_not_retroactively_invalidate_captured_token() {
        let cipher = HmacTokenCipher::new("secret");
        let mut s = session();
        s.start(10, 15, at(8, 55)).unwrap();

        let first = s.issue_qr(&cipher, 15, at(9, 0)).unwrap();
        let second = s.issue_qr(&cipher, 15, at(9, 5)).unwrap();
        assert_ne!(first, second);

        // the earlier token still opens until its own expiry
        assert!(s.verify_qr(&cipher, &first, 15, at(9, 10)).is_ok());
        assert!(s.verify_qr(&cipher, &first, 15, at(9, 16)).is_err());
    }

    #[test]
    fn current_or_issue_reuses_until_expired() {
        let cipher = HmacTokenCipher::new("secret");
        let mut s = session();
        s.start(10, 15, at(8, 55)).unwrap();

        let first = s.current_or_issue_qr(&cipher, 15, at(9, 0)).unwrap();
        let same = s.current_or_issue_qr(&cipher, 15, at(9, 10)).unwrap();
        assert_eq!(first, same);

        let fresh = s.current_or_issue_qr(&cipher, 15, at(9, 20)).unwrap();
        assert_ne!(first, fresh);
    }
}
