//! Attendance engine for campus class sessions: face-embedding enrollment
//! and recognition, session lifecycle with a bounded check-in window, signed
//! QR tokens as the fallback path, and an attendance ledger that reconciles
//! every check-in, override, and excuse into per-session tallies.

pub mod analyzer;
pub mod attendance;
pub mod checkin;
pub mod clock;
pub mod config;
pub mod embedding;
pub mod enrollment;
pub mod error;
pub mod gallery;
pub mod notify;
pub mod quality;
pub mod recognition;
pub mod session;
pub mod store;
pub mod token;

/// Entity ids are opaque to the engine; the host's identity and timetable
/// systems own their allocation.
pub type PersonId = u64;
pub type SessionId = u64;
pub type EmbeddingId = u64;

// Re-export commonly used types
pub use analyzer::{FaceAnalyzer, FaceDetection, ScriptedAnalyzer};
pub use attendance::{
    AttendanceLedger, AttendanceRecord, AttendanceStatus, AttendanceSummary, CheckInMethod,
};
pub use checkin::{CheckInEngine, FaceCheckIn};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use embedding::{Embedding, EMBEDDING_DIM};
pub use enrollment::{EnrollmentOutcome, EnrollmentService};
pub use error::{AttendanceError, Result};
pub use gallery::{CaptureAngle, EmbeddingRecord, FaceGallery, GalleryMatch};
pub use notify::{AttendanceEvent, Notifier, NullNotifier};
pub use quality::{Grade, ImageQuality};
pub use recognition::{Recognition, RecognitionService};
pub use session::{Session, SessionStatus};
pub use store::{
    AttendanceStore, EmbeddingStore, MemoryAttendanceStore, MemoryEmbeddingStore,
    MemorySessionStore, SessionStore,
};
pub use token::{HmacTokenCipher, QrPayload, TokenCipher};
