use crate::attendance::{AttendanceStatus, CheckInMethod};
use crate::{PersonId, SessionId};
use chrono::{DateTime, Utc};

/// Events the engine emits for external delivery (email, push, ...). The
/// engine decides when something is worth telling a person about; how the
/// message looks and travels is the collaborator's business.
#[derive(Debug, Clone, PartialEq)]
pub enum AttendanceEvent {
    CheckInConfirmed {
        session_id: SessionId,
        person_id: PersonId,
        status: AttendanceStatus,
        method: CheckInMethod,
        check_in_time: DateTime<Utc>,
    },
    LowAttendance {
        session_id: SessionId,
        attendance_percentage: f32,
    },
}

pub trait Notifier: Send + Sync {
    fn notify(&self, event: &AttendanceEvent);
}

/// Swallows every event. Default for hosts that handle notification
/// elsewhere and for tests.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _event: &AttendanceEvent) {}
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Collects events for assertions.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub events: Mutex<Vec<AttendanceEvent>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, event: &AttendanceEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }
}
