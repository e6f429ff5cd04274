//! Event types for the FRAS event system
//!
//! Engine events are broadcast through an [`EventBus`] and serialized for
//! SSE delivery to the attendance UI.

use crate::models::StudentKey;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Explicit stop or cancel before submit
    Stopped,
    /// Submit persisted the delta
    Submitted,
    /// Submit found nothing new to persist
    NothingToSave,
}

/// FRAS event types
///
/// Serialized with a `type` tag so SSE clients can dispatch on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FrasEvent {
    /// Session moved Idle -> Active
    SessionStarted {
        session_id: Uuid,
        program: String,
        subject: String,
        date: NaiveDate,
        roster_size: usize,
        timestamp: DateTime<Utc>,
    },

    /// A roster student was flagged present for the first time this session
    StudentRecognized {
        session_id: Uuid,
        student_key: StudentKey,
        name: String,
        timestamp: DateTime<Utc>,
    },

    /// Transient notice: the student already has a persisted record today
    AlreadyMarked {
        session_id: Uuid,
        student_key: StudentKey,
        name: String,
        subject: String,
        date: NaiveDate,
        timestamp: DateTime<Utc>,
    },

    /// Recognition for someone outside the active roster
    UnknownRecognition {
        session_id: Uuid,
        name: String,
        timestamp: DateTime<Utc>,
    },

    /// Submit persisted new attendance records
    AttendanceSubmitted {
        session_id: Uuid,
        subject: String,
        date: NaiveDate,
        saved: Vec<StudentKey>,
        timestamp: DateTime<Utc>,
    },

    /// Submit found no net-new attendance
    NothingToSave {
        session_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Submit failed; the session stays available for retry
    SubmitFailed {
        session_id: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Session reached Stopped and was discarded
    SessionStopped {
        session_id: Uuid,
        reason: StopReason,
        timestamp: DateTime<Utc>,
    },
}

impl FrasEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            FrasEvent::SessionStarted { .. } => "SessionStarted",
            FrasEvent::StudentRecognized { .. } => "StudentRecognized",
            FrasEvent::AlreadyMarked { .. } => "AlreadyMarked",
            FrasEvent::UnknownRecognition { .. } => "UnknownRecognition",
            FrasEvent::AttendanceSubmitted { .. } => "AttendanceSubmitted",
            FrasEvent::NothingToSave { .. } => "NothingToSave",
            FrasEvent::SubmitFailed { .. } => "SubmitFailed",
            FrasEvent::SessionStopped { .. } => "SessionStopped",
        }
    }
}

/// Central event distribution bus
///
/// Uses tokio::broadcast internally: publishing never blocks on slow
/// subscribers, and subscribers that fall behind observe a lag error.
///
/// # Examples
///
/// ```
/// use fras_common::events::{EventBus, FrasEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(FrasEvent::NothingToSave {
///     session_id: uuid::Uuid::new_v4(),
///     timestamp: chrono::Utc::now(),
/// });
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FrasEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<FrasEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: FrasEvent,
    ) -> std::result::Result<usize, broadcast::error::SendError<FrasEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: FrasEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
