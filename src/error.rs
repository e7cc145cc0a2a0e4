use thiserror::Error;

use crate::attendance::AttendanceStatus;
use crate::session::SessionStatus;

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("No face detected")]
    NoFaceDetected,

    #[error("Multiple faces detected ({count}). Please ensure only one face is in the image")]
    MultipleFacesDetected { count: usize },

    #[error("Face too small. Minimum size: {min}px, detected: {size}px")]
    FaceTooSmall { size: u32, min: u32 },

    #[error("Could not generate face embedding: {0}")]
    EncodingFailed(String),

    #[error("This photo appears to be a duplicate or very similar to an existing photo")]
    DuplicatePhoto,

    #[error("Stored embedding could not be decoded: {0}")]
    EmbeddingDecode(String),

    #[error("Invalid session transition: {from} -> {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("Already checked in with status {status}")]
    AlreadyCheckedIn { status: AttendanceStatus },

    #[error("QR token is invalid: {0}")]
    TokenInvalid(String),

    #[error("QR token has expired")]
    TokenExpired,

    #[error("Check-in is not open for this session")]
    CheckInClosed,

    #[error("Session not found: {0}")]
    SessionNotFound(u64),

    #[error("Attendance record not found for session {session_id}, person {person_id}")]
    RecordNotFound { session_id: u64, person_id: u64 },

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AttendanceError>;
