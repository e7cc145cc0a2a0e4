use crate::attendance::{AttendanceLedger, AttendanceRecord, CheckInMethod, GeoPoint};
use crate::clock::Clock;
use crate::config::Config;
use crate::error::{AttendanceError, Result};
use crate::recognition::{Recognition, RecognitionService};
use crate::store::SessionStore;
use crate::token::TokenCipher;
use crate::{PersonId, SessionId};
use std::collections::HashSet;
use std::sync::Arc;

/// What a face check-in attempt produced. A camera frame that fails to
/// identify anyone is routine, so it comes back as `NotRecognized` rather
/// than an error; actual gate violations (closed window, double check-in)
/// are errors.
#[derive(Debug, Clone)]
pub enum FaceCheckIn {
    Recorded(AttendanceRecord),
    NotRecognized { reason: String },
}

/// Front door for every check-in path. Gates on session state first, then
/// establishes identity (face match or QR token), then hands the write to
/// the ledger.
pub struct CheckInEngine {
    sessions: Arc<dyn SessionStore>,
    ledger: Arc<AttendanceLedger>,
    recognizer: Arc<RecognitionService>,
    cipher: Arc<dyn TokenCipher>,
    clock: Arc<dyn Clock>,
    config: Config,
}

impl CheckInEngine {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        ledger: Arc<AttendanceLedger>,
        recognizer: Arc<RecognitionService>,
        cipher: Arc<dyn TokenCipher>,
        clock: Arc<dyn Clock>,
        config: Config,
    ) -> Self {
        Self {
            sessions,
            ledger,
            recognizer,
            cipher,
            clock,
            config,
        }
    }

    /// The ledger is also the API for manual overrides, excuses, and
    /// summaries; those paths skip the window gate on purpose.
    pub fn ledger(&self) -> &Arc<AttendanceLedger> {
        &self.ledger
    }

    /// Open a session for check-ins: compute the window from config and mint
    /// the session's first QR token so a display has something to show the
    /// moment the session is live.
    pub fn open_session(&self, session_id: SessionId) -> Result<()> {
        let now = self.clock.now();
        self.sessions.update(session_id, &mut |session| {
            session.start(
                self.config.session.check_in_before_minutes,
                self.config.session.check_in_after_minutes,
                now,
            )?;
            session.issue_qr(
                self.cipher.as_ref(),
                self.config.session.qr_expiry_minutes,
                now,
            )?;
            Ok(())
        })
    }

    /// End a session. The check-in window closes immediately and the
    /// ledger's subject locks for it are released.
    pub fn close_session(&self, session_id: SessionId) -> Result<()> {
        let now = self.clock.now();
        self.sessions
            .update(session_id, &mut |session| session.end(now))?;
        self.ledger.release_session_locks(session_id);
        Ok(())
    }

    /// Current QR token for display, minting a fresh one when the stored
    /// token is absent or expired.
    pub fn session_qr_token(&self, session_id: SessionId) -> Result<String> {
        let now = self.clock.now();
        let mut token = String::new();
        self.sessions.update(session_id, &mut |session| {
            token = session.current_or_issue_qr(
                self.cipher.as_ref(),
                self.config.session.qr_expiry_minutes,
                now,
            )?;
            Ok(())
        })?;
        Ok(token)
    }

    fn gate(&self, session_id: SessionId) -> Result<()> {
        let session = self.sessions.get(session_id)?;
        let now = self.clock.now();
        if !session.can_check_in(now) {
            return Err(AttendanceError::CheckInClosed);
        }
        Ok(())
    }

    /// Identify the person in `image` and record their attendance. The
    /// candidate set, when given, restricts matching to the session's
    /// roster.
    pub fn check_in_by_face(
        &self,
        session_id: SessionId,
        image: &[u8],
        roster: Option<&HashSet<PersonId>>,
    ) -> Result<FaceCheckIn> {
        self.gate(session_id)?;

        match self.recognizer.recognize(image, roster)? {
            Recognition::Identified {
                person_id,
                embedding_id,
                confidence,
                ..
            } => {
                let record = self.ledger.record_check_in(
                    session_id,
                    person_id,
                    CheckInMethod::FaceRecognition,
                    self.clock.now(),
                    Some(confidence),
                    Some(embedding_id),
                    None,
                )?;
                Ok(FaceCheckIn::Recorded(record))
            }
            Recognition::Rejected { reason } => {
                tracing::debug!(session_id, %reason, "face check-in not recognized");
                Ok(FaceCheckIn::NotRecognized { reason })
            }
        }
    }

    /// Record attendance for a person who scanned the session's QR code.
    /// The token must verify for this session and be within its expiry.
    pub fn check_in_by_qr(
        &self,
        session_id: SessionId,
        person_id: PersonId,
        token: &str,
        location: Option<GeoPoint>,
    ) -> Result<AttendanceRecord> {
        self.gate(session_id)?;

        let session = self.sessions.get(session_id)?;
        session.verify_qr(
            self.cipher.as_ref(),
            token,
            self.config.session.qr_expiry_minutes,
            self.clock.now(),
        )?;

        self.ledger.record_check_in(
            session_id,
            person_id,
            CheckInMethod::QrCode,
            self.clock.now(),
            None,
            None,
            location,
        )
    }
}
