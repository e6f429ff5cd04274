//! Per-session reconciliation state
//!
//! A [`Session`] exists only while the engine is Active (or frozen for a
//! submit retry). It owns the roster snapshot, the present flags, the
//! recognized log, and the current "already marked" notice.

use chrono::NaiveDate;
use fras_common::models::{Roster, StudentKey, StudentRecord};
use serde::Serialize;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::RecognitionSender;

/// Engine phase as reported to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    /// Start is waiting on the readiness gate, roster, or capture
    Starting,
    Active,
    /// Recognitions closed; awaiting a submit retry or stop
    Frozen,
}

/// One entry of the recognized log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecognizedEntry {
    pub student_key: StudentKey,
    pub name: String,
}

/// Transient "already marked" notice
#[derive(Debug, Clone)]
pub struct Notice {
    pub student_key: StudentKey,
    pub message: String,
    pub expires_at: Instant,
}

/// Outcome of applying a resolved recognition to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    NewlyPresent,
    AlreadyPresent,
}

pub struct Session {
    pub(crate) id: Uuid,
    pub(crate) roster: Roster,
    pub(crate) date: NaiveDate,
    pub(crate) camera_active: bool,
    pub(crate) frozen: bool,
    pub(crate) sender: RecognitionSender,
    pub(crate) cancel: CancellationToken,
    present: HashSet<StudentKey>,
    recognized: Vec<RecognizedEntry>,
    notice: Option<Notice>,
}

impl Session {
    pub(crate) fn new(
        roster: Roster,
        date: NaiveDate,
        sender: RecognitionSender,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            roster,
            date,
            camera_active: true,
            frozen: false,
            sender,
            cancel,
            present: HashSet::new(),
            recognized: Vec::new(),
            notice: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Exact key match against the roster
    pub fn resolve(&self, name: &str) -> Option<&StudentRecord> {
        self.roster.get(&StudentKey::new(name.trim()))
    }

    pub fn is_present(&self, key: &StudentKey) -> bool {
        self.present.contains(key)
    }

    /// Flag a roster student present and log them once
    pub fn mark_present(&mut self, student: &StudentRecord) -> MarkOutcome {
        if !self.present.insert(student.index_number.clone()) {
            return MarkOutcome::AlreadyPresent;
        }
        if !self
            .recognized
            .iter()
            .any(|entry| entry.student_key == student.index_number)
        {
            self.recognized.push(RecognizedEntry {
                student_key: student.index_number.clone(),
                name: student.full_name(),
            });
        }
        MarkOutcome::NewlyPresent
    }

    /// Present students in roster order
    pub fn present_students(&self) -> Vec<&StudentRecord> {
        self.roster
            .students()
            .iter()
            .filter(|s| self.present.contains(&s.index_number))
            .collect()
    }

    pub fn recognized(&self) -> &[RecognizedEntry] {
        &self.recognized
    }

    pub fn set_notice(&mut self, student: &StudentRecord, subject: &str, ttl: Duration) {
        self.notice = Some(Notice {
            student_key: student.index_number.clone(),
            message: format!(
                "{} is already marked present for {} today",
                student.full_name(),
                subject
            ),
            expires_at: Instant::now() + ttl,
        });
    }

    /// The notice, if it has not expired yet
    pub fn current_notice(&self) -> Option<&Notice> {
        self.notice
            .as_ref()
            .filter(|notice| notice.expires_at > Instant::now())
    }

    pub fn phase(&self) -> Phase {
        if self.frozen {
            Phase::Frozen
        } else {
            Phase::Active
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase(),
            session_id: Some(self.id),
            program: Some(self.roster.program().to_string()),
            subject: Some(self.roster.subject().to_string()),
            date: Some(self.date),
            camera_active: self.camera_active,
            students: self
                .roster
                .students()
                .iter()
                .map(|s| StudentView {
                    student_key: s.index_number.clone(),
                    name: s.full_name(),
                    present: self.present.contains(&s.index_number),
                })
                .collect(),
            recognized: self.recognized.clone(),
            notice: self.current_notice().map(|n| NoticeView {
                student_key: n.student_key.clone(),
                message: n.message.clone(),
            }),
        }
    }
}

/// Roster row with its present flag
#[derive(Debug, Clone, Serialize)]
pub struct StudentView {
    pub student_key: StudentKey,
    pub name: String,
    pub present: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct NoticeView {
    pub student_key: StudentKey,
    pub message: String,
}

/// Read-only view of the engine for clients
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub session_id: Option<Uuid>,
    pub program: Option<String>,
    pub subject: Option<String>,
    pub date: Option<NaiveDate>,
    pub camera_active: bool,
    pub students: Vec<StudentView>,
    pub recognized: Vec<RecognizedEntry>,
    pub notice: Option<NoticeView>,
}

impl SessionSnapshot {
    pub fn idle() -> Self {
        Self {
            phase: Phase::Idle,
            session_id: None,
            program: None,
            subject: None,
            date: None,
            camera_active: false,
            students: Vec::new(),
            recognized: Vec::new(),
            notice: None,
        }
    }

    /// Snapshot of a start still in progress
    pub fn starting(program: &str, subject: &str, date: NaiveDate) -> Self {
        Self {
            phase: Phase::Starting,
            program: Some(program.to_string()),
            subject: Some(subject.to_string()),
            date: Some(date),
            ..Self::idle()
        }
    }
}
