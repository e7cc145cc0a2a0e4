//! End-to-end flow: enroll a student, open a session, check in by face and
//! by QR, close the session, sweep absentees, and read the summary back.

use chrono::{DateTime, TimeZone, Utc};
use rollcall::analyzer::{FaceBounds, FaceDetection, ScriptedAnalyzer};
use rollcall::attendance::{AttendanceLedger, AttendanceStatus, CheckInMethod};
use rollcall::checkin::{CheckInEngine, FaceCheckIn};
use rollcall::clock::FixedClock;
use rollcall::config::Config;
use rollcall::embedding::{Embedding, EMBEDDING_DIM};
use rollcall::enrollment::EnrollmentService;
use rollcall::gallery::{CaptureAngle, FaceGallery};
use rollcall::notify::NullNotifier;
use rollcall::recognition::RecognitionService;
use rollcall::session::{Session, SessionStatus};
use rollcall::store::{
    MemoryAttendanceStore, MemoryEmbeddingStore, MemorySessionStore, SessionStore,
};
use rollcall::token::{HmacTokenCipher, TokenCipher};
use rollcall::AttendanceError;
use std::sync::Arc;

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 8, h, m, 0).unwrap()
}

fn emb(value: f32) -> Embedding {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    v[0] = value;
    Embedding::new(v).unwrap()
}

fn detection() -> FaceDetection {
    FaceDetection {
        bounds: FaceBounds {
            x: 0,
            y: 0,
            width: 300,
            height: 300,
        },
        face_size_px: 300,
        eyes_detected: true,
        nose_detected: true,
        mouth_detected: true,
        landmark_count: 68,
    }
}

/// A real PNG so enrollment's pixel-level quality pass has something to
/// decode; the level parameter keeps photo hashes distinct.
fn png(level: u8) -> Vec<u8> {
    use image::{DynamicImage, GrayImage, Luma};
    let mut img = GrayImage::from_pixel(32, 32, Luma([level]));
    for x in 0..32 {
        img.put_pixel(x, 16, Luma([255 - level]));
    }
    let mut bytes = std::io::Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(img)
        .write_to(&mut bytes, image::ImageFormat::Png)
        .unwrap();
    bytes.into_inner()
}

struct Campus {
    engine: CheckInEngine,
    enrollment: EnrollmentService,
    sessions: Arc<MemorySessionStore>,
    ledger: Arc<AttendanceLedger>,
    clock: Arc<FixedClock>,
}

/// One session (id 1) scheduled 09:00-10:00 with 3 enrolled students; the
/// scripted analyzer knows two students' photos and camera frames.
fn campus() -> Campus {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let mut analyzer = ScriptedAnalyzer::new();
    // student 100's enrollment photo and later camera frame
    analyzer.register_face(&png(10), detection(), emb(0.0));
    analyzer.register_face(b"frame-100", detection(), emb(0.05));
    // student 101 enrolled under a different embedding region
    analyzer.register_face(&png(20), detection(), emb(3.0));
    analyzer.register_face(b"frame-101", detection(), emb(3.02));
    // student 102 has a face but never enrolled it
    analyzer.register_face(b"frame-102", detection(), emb(9.0));

    let config = Config::default();
    let clock = Arc::new(FixedClock::new(at(8, 0)));
    let analyzer: Arc<ScriptedAnalyzer> = Arc::new(analyzer);
    let cipher: Arc<dyn TokenCipher> = Arc::new(HmacTokenCipher::new("campus secret"));

    let gallery = Arc::new(FaceGallery::new(
        Arc::new(MemoryEmbeddingStore::new()),
        config.face.clone(),
    ));
    let enrollment = EnrollmentService::new(
        analyzer.clone(),
        gallery.clone(),
        clock.clone(),
        config.clone(),
    );
    let recognizer = Arc::new(RecognitionService::new(
        analyzer,
        gallery,
        clock.clone(),
        config.clone(),
    ));

    let sessions = Arc::new(MemorySessionStore::new());
    sessions
        .insert(Session::new(1, at(9, 0), at(10, 0), 3, at(8, 0)))
        .unwrap();

    let ledger = Arc::new(AttendanceLedger::new(
        Arc::new(MemoryAttendanceStore::new()),
        sessions.clone(),
        clock.clone(),
        config.session.clone(),
        Arc::new(NullNotifier),
    ));

    let engine = CheckInEngine::new(
        sessions.clone(),
        ledger.clone(),
        recognizer,
        cipher,
        clock.clone(),
        config,
    );
    Campus {
        engine,
        enrollment,
        sessions,
        ledger,
        clock,
    }
}

#[test]
fn full_session_lifecycle_with_mixed_check_in_paths() {
    let c = campus();

    // Enroll two of the three students before class.
    c.enrollment
        .enroll(100, &png(10), CaptureAngle::Front)
        .unwrap();
    c.enrollment
        .enroll(101, &png(20), CaptureAngle::Front)
        .unwrap();

    // Lecturer opens the session at 08:55; window is 08:50-09:15.
    c.clock.set(at(8, 55));
    c.engine.open_session(1).unwrap();
    let session = c.sessions.get(1).unwrap();
    assert_eq!(session.status, SessionStatus::InProgress);
    assert_eq!(session.check_in_start, Some(at(8, 50)));
    assert_eq!(session.check_in_end, Some(at(9, 15)));

    // Student 100 walks past the camera on time.
    c.clock.set(at(9, 3));
    match c.engine.check_in_by_face(1, b"frame-100", None).unwrap() {
        FaceCheckIn::Recorded(record) => {
            assert_eq!(record.person_id, 100);
            assert_eq!(record.status, AttendanceStatus::Present);
            assert!(!record.is_late);
        }
        FaceCheckIn::NotRecognized { reason } => panic!("not recognized: {}", reason),
    }

    // Student 101 arrives at 09:10 and is late (threshold 5 minutes).
    c.clock.set(at(9, 10));
    match c.engine.check_in_by_face(1, b"frame-101", None).unwrap() {
        FaceCheckIn::Recorded(record) => {
            assert_eq!(record.person_id, 101);
            assert_eq!(record.status, AttendanceStatus::Late);
            assert_eq!(record.minutes_late, 10);
        }
        FaceCheckIn::NotRecognized { reason } => panic!("not recognized: {}", reason),
    }

    // Student 102 never enrolled a face; the camera shrugs and they fall
    // back to the projected QR code.
    c.clock.set(at(9, 12));
    match c.engine.check_in_by_face(1, b"frame-102", None).unwrap() {
        FaceCheckIn::NotRecognized { reason } => assert!(reason.contains("QR code")),
        FaceCheckIn::Recorded(r) => panic!("phantom match for {}", r.person_id),
    }
    let token = c.engine.session_qr_token(1).unwrap();
    let record = c.engine.check_in_by_qr(1, 102, &token, None).unwrap();
    assert_eq!(record.status, AttendanceStatus::Late);
    assert_eq!(record.check_in_method, Some(CheckInMethod::QrCode));

    // A second swipe from student 100 bounces.
    let err = c
        .engine
        .check_in_by_face(1, b"frame-100", None)
        .unwrap_err();
    assert!(matches!(err, AttendanceError::AlreadyCheckedIn { .. }));

    // Lecturer ends the class; no further check-ins.
    c.clock.set(at(9, 50));
    c.engine.close_session(1).unwrap();
    assert!(matches!(
        c.engine.check_in_by_face(1, b"frame-100", None),
        Err(AttendanceError::CheckInClosed)
    ));

    // Sweep finds nobody missing (all three have records) and the summary
    // reconciles.
    assert_eq!(c.ledger.sweep_absentees(1, &[100, 101, 102]).unwrap(), 0);
    let summary = c.ledger.session_summary(1).unwrap();
    assert_eq!(summary.present, 1);
    assert_eq!(summary.late, 2);
    assert_eq!(summary.absent, 0);
    assert!((summary.attendance_percentage - 100.0).abs() < 1e-4);

    let session = c.sessions.get(1).unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.present_count, 1);
    assert_eq!(session.late_count, 2);
}

#[test]
fn expired_qr_token_cannot_check_in_even_inside_window() {
    let c = campus();
    c.clock.set(at(8, 55));
    c.engine.open_session(1).unwrap();

    // Widen the window so only the token's own 15-minute expiry applies.
    c.sessions
        .update(1, &mut |s| {
            s.check_in_end = Some(at(10, 0));
            Ok(())
        })
        .unwrap();

    c.clock.set(at(9, 0));
    let token = c.engine.session_qr_token(1).unwrap();

    c.clock.set(at(9, 20));
    assert!(matches!(
        c.engine.check_in_by_qr(1, 102, &token, None),
        Err(AttendanceError::TokenExpired)
    ));

    // A freshly displayed token works.
    let fresh = c.engine.session_qr_token(1).unwrap();
    assert_ne!(token, fresh);
    let record = c.engine.check_in_by_qr(1, 102, &fresh, None).unwrap();
    assert_eq!(record.status, AttendanceStatus::Late);
    assert_eq!(record.minutes_late, 20);
}

#[test]
fn manual_override_survives_sweep_and_wins_over_face_path() {
    let c = campus();
    c.enrollment
        .enroll(100, &png(10), CaptureAngle::Front)
        .unwrap();

    c.clock.set(at(8, 55));
    c.engine.open_session(1).unwrap();

    c.clock.set(at(9, 2));
    c.engine.check_in_by_face(1, b"frame-100", None).unwrap();

    // Lecturer excuses student 101 (doctor's note) before any sweep.
    c.ledger
        .excuse(1, 101, "medical certificate".into(), 7, None)
        .unwrap();

    c.clock.set(at(9, 50));
    c.engine.close_session(1).unwrap();
    assert_eq!(c.ledger.sweep_absentees(1, &[100, 101, 102]).unwrap(), 1);

    let summary = c.ledger.session_summary(1).unwrap();
    assert_eq!(summary.present, 1);
    assert_eq!(summary.excused, 1);
    assert_eq!(summary.absent, 1);

    // The lecturer later flips the absentee to present by hand; the manual
    // mark is flagged and the tallies follow.
    let record = c
        .ledger
        .manual_override(1, 102, AttendanceStatus::Present, 7, Some("was in lab".into()))
        .unwrap();
    assert!(record.manually_marked);
    let session = c.sessions.get(1).unwrap();
    assert_eq!(session.present_count, 2);
    assert_eq!(session.absent_count, 0);
}
