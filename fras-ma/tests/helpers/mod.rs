//! Shared fixtures for fras-ma integration tests
//!
//! Fakes for the engine's external collaborators plus a harness that wires
//! them to a real partition store in a temporary directory.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use fras_common::events::EventBus;
use fras_common::models::{AttendanceRecord, Roster, StudentKey, StudentRecord};
use fras_common::storage::{PartitionKind, PartitionStore, PrivateStorage};
use fras_common::time::date_key;
use fras_common::{Error, Result};
use fras_ma::engine::{
    AttendanceSink, CaptureControl, Collaborators, ReadinessGate, ReconciliationEngine,
    RosterSource, StoreSink,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

pub const PROGRAM: &str = "Computer Science";
pub const SUBJECT: &str = "CS101";

pub fn student(index: &str, first: &str, last: &str) -> StudentRecord {
    StudentRecord {
        index_number: StudentKey::new(index),
        first_name: first.to_string(),
        last_name: last.to_string(),
        degree_program: PROGRAM.to_string(),
        faculty: "Computing".to_string(),
        intake: "2021".to_string(),
        email: String::new(),
        subjects: vec![SUBJECT.to_string()],
        registered_at: Utc.with_ymd_and_hms(2025, 1, 10, 8, 0, 0).unwrap(),
    }
}

/// Five students enrolled in CS101
pub fn class_of_five() -> Vec<StudentRecord> {
    vec![
        student("CS/001", "John", "Smith"),
        student("CS/002", "Jane", "Doe"),
        student("CS/003", "Ann", "Lee"),
        student("CS/004", "Ravi", "Perera"),
        student("CS/005", "Mia", "Silva"),
    ]
}

pub fn session_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 21).unwrap()
}

/// Roster source over a fixed student list
///
/// With `hold` set, each fetch waits for `resume` before answering.
pub struct FakeRoster {
    students: Vec<StudentRecord>,
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
    pub hold: AtomicBool,
    pub resume: Notify,
}

#[async_trait]
impl RosterSource for FakeRoster {
    async fn fetch_roster(&self, program: &str, subject: &str) -> Result<Roster> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hold.load(Ordering::SeqCst) {
            self.resume.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Network("backend unreachable".to_string()));
        }
        let students = self
            .students
            .iter()
            .filter(|s| s.degree_program == program && s.is_enrolled_in(subject))
            .cloned()
            .collect();
        Ok(Roster::new(program, subject, students))
    }
}

pub struct FakeGate {
    pub ready: AtomicBool,
    pub fail: AtomicBool,
}

#[async_trait]
impl ReadinessGate for FakeGate {
    async fn is_ready(&self) -> Result<bool> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Storage("model file unreadable".to_string()));
        }
        Ok(self.ready.load(Ordering::SeqCst))
    }
}

/// Capture that records start/stop calls
#[derive(Default)]
pub struct RecordingCapture {
    pub active: AtomicBool,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub fail_start: AtomicBool,
    pub fail_stop: AtomicBool,
}

impl RecordingCapture {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureControl for RecordingCapture {
    async fn start(&self, _program: &str, _subject: &str, _date: NaiveDate) -> Result<()> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(Error::Network("camera unavailable".to_string()));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(Error::Network("capture service did not answer".to_string()));
        }
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Store-backed sink that fails a configurable number of times first
pub struct FlakySink {
    inner: StoreSink,
    pub failures_left: AtomicUsize,
    pub calls: AtomicUsize,
}

#[async_trait]
impl AttendanceSink for FlakySink {
    async fn save(
        &self,
        program: &str,
        subject: &str,
        date: NaiveDate,
        records: &[AttendanceRecord],
    ) -> Result<usize> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Storage("disk full".to_string()));
        }
        self.inner.save(program, subject, date, records).await
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<PartitionStore>,
    pub roster: Arc<FakeRoster>,
    pub gate: Arc<FakeGate>,
    pub capture: Arc<RecordingCapture>,
    pub sink: Arc<FlakySink>,
    pub engine: Arc<ReconciliationEngine>,
}

impl Harness {
    pub fn new(students: Vec<StudentRecord>) -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(PartitionStore::open(Arc::new(PrivateStorage::new(
            dir.path().join("root"),
        ))));

        let roster = Arc::new(FakeRoster {
            students,
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            hold: AtomicBool::new(false),
            resume: Notify::new(),
        });
        let gate = Arc::new(FakeGate {
            ready: AtomicBool::new(true),
            fail: AtomicBool::new(false),
        });
        let capture = Arc::new(RecordingCapture::default());
        let sink = Arc::new(FlakySink {
            inner: StoreSink::new(Arc::clone(&store)),
            failures_left: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        });

        let engine = Arc::new(ReconciliationEngine::new(
            Arc::clone(&store),
            Collaborators {
                roster: roster.clone(),
                gate: gate.clone(),
                capture: capture.clone(),
                sink: sink.clone(),
            },
            EventBus::new(100),
            Duration::from_secs(60),
        ));

        Self {
            dir,
            store,
            roster,
            gate,
            capture,
            sink,
            engine,
        }
    }

    /// Write an attendance fact directly to the store
    pub async fn persist(&self, student: &StudentRecord, date: NaiveDate) {
        let record = AttendanceRecord::present(student, SUBJECT, date, Utc::now());
        self.store
            .append_record(PartitionKind::Attendance, &date_key(date), record.to_record())
            .await
            .unwrap();
    }

    /// Stored attendance facts for (SUBJECT, date)
    pub async fn stored(&self, date: NaiveDate) -> Vec<AttendanceRecord> {
        self.store
            .read_partition(PartitionKind::Attendance, &date_key(date))
            .await
            .unwrap()
            .iter()
            .map(|r| AttendanceRecord::from_record(r).unwrap())
            .filter(|r| r.subject_code == SUBJECT)
            .collect()
    }

    /// Send recognitions and wait for them to be reconciled
    pub async fn recognize_all(&self, names: &[&str]) {
        for name in names {
            self.engine.recognize(name).await.unwrap();
        }
        self.engine.flush().await.unwrap();
    }
}
