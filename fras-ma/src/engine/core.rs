//! Reconciliation engine
//!
//! **Lifecycle:** `Idle -> Active -> Stopped`. A stopped session is
//! discarded, which returns the engine to Idle for the next session.
//! Start reports `Starting` while its external calls run. Submit passes
//! through `Frozen`; a failed submit, or a capture that would not release,
//! stays there until it is retried or stopped.
//!
//! **Responsibilities:**
//! - Gate session start on selections, readiness, roster, and capture
//! - Consume recognition events in arrival order (one task per session)
//! - Reconcile each event against the roster and persisted attendance
//! - Submit the delta of newly present students, retryable on failure
//! - Release the capture resource on every path out of Active

use super::channel::{Inbound, RecognitionEvent, RecognitionSender};
use super::external::{AttendanceSink, CaptureControl, ReadinessGate, RosterSource};
use super::session::{MarkOutcome, Session, SessionSnapshot};
use chrono::NaiveDate;
use fras_common::events::{EventBus, FrasEvent, StopReason};
use fras_common::models::{AttendanceRecord, Roster, StudentKey};
use fras_common::storage::{PartitionKind, PartitionStore};
use fras_common::time::{self, date_key};
use fras_common::{Error, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// External collaborators injected into the engine
#[derive(Clone)]
pub struct Collaborators {
    pub roster: Arc<dyn RosterSource>,
    pub gate: Arc<dyn ReadinessGate>,
    pub capture: Arc<dyn CaptureControl>,
    pub sink: Arc<dyn AttendanceSink>,
}

/// Result of a successful submit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// New attendance records were persisted for these students
    Saved { saved: Vec<StudentKey> },
    /// Every present student was already persisted
    NothingToSave,
}

pub struct ReconciliationEngine {
    store: Arc<PartitionStore>,
    collaborators: Collaborators,
    events: EventBus,
    notice_ttl: Duration,
    session: Arc<Mutex<Slot>>,
}

/// What the engine holds between calls
enum Slot {
    Idle,
    /// Reserved by a start whose external calls are in flight
    Starting {
        program: String,
        subject: String,
        date: NaiveDate,
        cancel: CancellationToken,
    },
    Live(Session),
}

impl Slot {
    fn session(&self) -> Option<&Session> {
        match self {
            Slot::Live(session) => Some(session),
            _ => None,
        }
    }

    fn session_mut(&mut self) -> Option<&mut Session> {
        match self {
            Slot::Live(session) => Some(session),
            _ => None,
        }
    }
}

/// Re-classify a collaborator failure as `Network`
fn as_network(err: Error, context: &str) -> Error {
    match err {
        Error::Network(_) => err,
        other => Error::Network(format!("{}: {}", context, other)),
    }
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<PartitionStore>,
        collaborators: Collaborators,
        events: EventBus,
        notice_ttl: Duration,
    ) -> Self {
        Self {
            store,
            collaborators,
            events,
            notice_ttl,
            session: Arc::new(Mutex::new(Slot::Idle)),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn store(&self) -> &Arc<PartitionStore> {
        &self.store
    }

    /// Start a session for today
    pub async fn start(&self, program: &str, subject: &str) -> Result<SessionSnapshot> {
        self.start_on(program, subject, time::today()).await
    }

    /// Start a session whose attendance date is `date`
    ///
    /// The date stays fixed for the whole session. The engine reports
    /// `Starting` while the gate, roster, and capture calls run; the session
    /// lock is not held across them, so `snapshot` and `stop` stay
    /// responsive. A `stop` during that window cancels the start.
    pub async fn start_on(
        &self,
        program: &str,
        subject: &str,
        date: NaiveDate,
    ) -> Result<SessionSnapshot> {
        let program = program.trim();
        let subject = subject.trim();
        if program.is_empty() || subject.is_empty() {
            return Err(Error::Precondition(
                "Select both a degree program and a subject".to_string(),
            ));
        }

        let cancel = CancellationToken::new();
        {
            let mut slot = self.session.lock().await;
            match *slot {
                Slot::Idle => {}
                Slot::Starting { .. } => {
                    return Err(Error::Precondition(
                        "An attendance session is already starting".to_string(),
                    ))
                }
                Slot::Live(_) => {
                    return Err(Error::Precondition(
                        "An attendance session is already active".to_string(),
                    ))
                }
            }
            *slot = Slot::Starting {
                program: program.to_string(),
                subject: subject.to_string(),
                date,
                cancel: cancel.clone(),
            };
        }

        // Runs detached so a dropped caller cannot strand the Starting slot
        let engine = self.clone_handles();
        let (program, subject) = (program.to_string(), subject.to_string());
        tokio::spawn(async move { engine.finish_start(program, subject, date, cancel).await })
            .await
            .map_err(|e| Error::Storage(format!("Session start aborted: {}", e)))?
    }

    /// Gate, roster, and capture for a reserved start; installs the session
    async fn finish_start(
        self,
        program: String,
        subject: String,
        date: NaiveDate,
        cancel: CancellationToken,
    ) -> Result<SessionSnapshot> {
        let prepared = self.prepare_start(&program, &subject, date).await;

        let mut slot = self.session.lock().await;
        if cancel.is_cancelled() {
            // stop() already reset the slot
            drop(slot);
            info!("Session start for {} / {} cancelled", program, subject);
            if prepared.is_ok() {
                self.collaborators.capture.stop().await?;
                info!("Capture released after cancelled start");
            }
            return Err(Error::Precondition(
                "Session start was cancelled".to_string(),
            ));
        }

        let roster = match prepared {
            Ok(roster) => roster,
            Err(e) => {
                *slot = Slot::Idle;
                return Err(e);
            }
        };

        let (sender, rx) = RecognitionSender::channel();
        let session = Session::new(roster, date, sender, cancel.clone());
        let session_id = session.id();
        let snapshot = session.snapshot();

        info!(
            "Session {} started: {} / {} on {} ({} students)",
            session_id,
            program,
            subject,
            date_key(date),
            session.roster().len()
        );
        self.events.emit_lossy(FrasEvent::SessionStarted {
            session_id,
            program,
            subject,
            date,
            roster_size: session.roster().len(),
            timestamp: time::now(),
        });

        *slot = Slot::Live(session);
        drop(slot);

        let self_clone = self.clone_handles();
        tokio::spawn(async move {
            self_clone.consume(session_id, rx, cancel).await;
        });

        Ok(snapshot)
    }

    /// External calls that must succeed before a session goes Active
    async fn prepare_start(&self, program: &str, subject: &str, date: NaiveDate) -> Result<Roster> {
        let ready = self
            .collaborators
            .gate
            .is_ready()
            .await
            .map_err(|e| as_network(e, "Readiness check failed"))?;
        if !ready {
            return Err(Error::Precondition(
                "Face model is not trained yet; train it before marking attendance".to_string(),
            ));
        }

        let roster = self
            .collaborators
            .roster
            .fetch_roster(program, subject)
            .await
            .map_err(|e| as_network(e, "Roster fetch failed"))?;

        self.collaborators.capture.start(program, subject, date).await?;
        Ok(roster)
    }

    /// Queue a recognition event for the active session
    pub async fn recognize(&self, name: &str) -> Result<()> {
        self.recognition_sender()
            .await?
            .send(RecognitionEvent::new(name))
    }

    /// Producer handle for the active session's recognition channel
    pub async fn recognition_sender(&self) -> Result<RecognitionSender> {
        let slot = self.session.lock().await;
        match &*slot {
            Slot::Live(session) if !session.frozen => Ok(session.sender.clone()),
            Slot::Live(_) => Err(Error::Precondition(
                "Session is submitting; recognitions are closed".to_string(),
            )),
            Slot::Starting { .. } => {
                Err(Error::Precondition("Session is still starting".to_string()))
            }
            Slot::Idle => Err(Error::Precondition("No active attendance session".to_string())),
        }
    }

    /// Wait until every recognition queued so far has been reconciled
    pub async fn flush(&self) -> Result<()> {
        let marker = self.recognition_sender().await?.flush_marker()?;
        // A dropped marker means the consumer already stopped
        let _ = marker.await;
        Ok(())
    }

    /// Persist the delta of newly present students and end the session
    ///
    /// Recognitions queued before the call are reconciled first. Then the
    /// session is frozen: the consumer stops and capture is released. The
    /// frozen session is kept, and the error returned, when persisting fails
    /// or when capture could not be released; the caller can retry `submit`
    /// or `stop`. A retry after a saved-but-still-held submit reports
    /// nothing to save.
    pub async fn submit(&self) -> Result<SubmitOutcome> {
        if let Err(e) = self.flush().await {
            debug!("Submit without draining recognitions: {}", e);
        }

        let mut slot = self.session.lock().await;
        let Some(session) = slot.session_mut() else {
            return Err(Error::Precondition("No active attendance session".to_string()));
        };

        let released = self.freeze(session).await;
        let session_id = session.id();
        if let Err(e) = &released {
            warn!("Session {}: capture release failed during submit: {}", session_id, e);
        }
        let subject = session.roster().subject().to_string();
        let date = session.date();

        let outcome = match self.persist_delta(session).await {
            Ok(saved) if saved.is_empty() => {
                info!("Session {}: nothing new to save", session_id);
                self.events.emit_lossy(FrasEvent::NothingToSave {
                    session_id,
                    timestamp: time::now(),
                });
                (SubmitOutcome::NothingToSave, StopReason::NothingToSave)
            }
            Ok(saved) => {
                info!(
                    "Session {}: saved attendance for {} students in {} on {}",
                    session_id,
                    saved.len(),
                    subject,
                    date_key(date)
                );
                self.events.emit_lossy(FrasEvent::AttendanceSubmitted {
                    session_id,
                    subject,
                    date,
                    saved: saved.clone(),
                    timestamp: time::now(),
                });
                (SubmitOutcome::Saved { saved }, StopReason::Submitted)
            }
            Err(e) => {
                error!("Session {}: submit failed, session kept for retry: {}", session_id, e);
                self.events.emit_lossy(FrasEvent::SubmitFailed {
                    session_id,
                    error: e.to_string(),
                    timestamp: time::now(),
                });
                return Err(e);
            }
        };

        if let Err(e) = released {
            error!(
                "Session {}: submit saved but capture is still held; session kept",
                session_id
            );
            return Err(e);
        }

        *slot = Slot::Idle;
        self.events.emit_lossy(FrasEvent::SessionStopped {
            session_id,
            reason: outcome.1,
            timestamp: time::now(),
        });
        Ok(outcome.0)
    }

    /// Discard the session and release capture
    ///
    /// Always allowed; a no-op while Idle and a cancel while Starting. If
    /// capture cannot be released the session is kept frozen, with
    /// recognitions closed, and the error is returned so `stop` can be
    /// retried.
    pub async fn stop(&self) -> Result<()> {
        let mut slot = self.session.lock().await;
        if let Slot::Starting { cancel, .. } = &*slot {
            cancel.cancel();
            *slot = Slot::Idle;
            info!("Session start cancelled by stop");
            return Ok(());
        }
        let Some(session) = slot.session_mut() else {
            debug!("Stop requested with no session");
            return Ok(());
        };

        session.frozen = true;
        session.cancel.cancel();
        let session_id = session.id();
        if let Err(e) = self.release_capture(session).await {
            error!("Session {}: capture release failed, session kept: {}", session_id, e);
            return Err(e);
        }

        *slot = Slot::Idle;
        info!("Session {} stopped", session_id);
        self.events.emit_lossy(FrasEvent::SessionStopped {
            session_id,
            reason: StopReason::Stopped,
            timestamp: time::now(),
        });
        Ok(())
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        match &*self.session.lock().await {
            Slot::Idle => SessionSnapshot::idle(),
            Slot::Starting {
                program,
                subject,
                date,
                ..
            } => SessionSnapshot::starting(program, subject, *date),
            Slot::Live(session) => session.snapshot(),
        }
    }

    /// Stop any session and end the storage session
    pub async fn shutdown(&self) {
        if let Err(e) = self.stop().await {
            warn!("Capture release failed during shutdown: {}", e);
        }
        self.store.close().await;
    }

    /// Single consumer for one session's recognition channel
    async fn consume(
        self,
        session_id: Uuid,
        mut rx: mpsc::UnboundedReceiver<Inbound>,
        cancel: CancellationToken,
    ) {
        debug!("Recognition consumer started for session {}", session_id);
        loop {
            let inbound = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                inbound = rx.recv() => match inbound {
                    Some(inbound) => inbound,
                    None => break,
                },
            };

            match inbound {
                Inbound::Recognition(event) => self.reconcile(session_id, &event.name).await,
                Inbound::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        debug!("Recognition consumer stopped for session {}", session_id);
    }

    /// Apply one recognition event to the session
    async fn reconcile(&self, session_id: Uuid, name: &str) {
        let (student, subject, date) = {
            let slot = self.session.lock().await;
            let Some(session) = slot.session().filter(|s| s.id() == session_id && !s.frozen) else {
                return;
            };
            match session.resolve(name) {
                Some(student) => (
                    student.clone(),
                    session.roster().subject().to_string(),
                    session.date(),
                ),
                None => {
                    warn!(
                        "Recognized '{}' is not on the roster for {} / {}; ignoring",
                        name,
                        session.roster().program(),
                        session.roster().subject()
                    );
                    self.events.emit_lossy(FrasEvent::UnknownRecognition {
                        session_id,
                        name: name.to_string(),
                        timestamp: time::now(),
                    });
                    return;
                }
            }
        };

        // Submit re-checks the store, so an unreadable partition fails open
        let persisted = match self.persisted_keys(&subject, date).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(
                    "Could not check stored attendance for {}; marking present: {}",
                    student.index_number, e
                );
                HashSet::new()
            }
        };

        let mut slot = self.session.lock().await;
        let Some(session) = slot.session_mut().filter(|s| s.id() == session_id && !s.frozen) else {
            return;
        };

        if persisted.contains(&student.index_number) {
            info!(
                "{} ({}) is already marked for {} on {}",
                student.full_name(),
                student.index_number,
                subject,
                date_key(date)
            );
            session.set_notice(&student, &subject, self.notice_ttl);
            self.events.emit_lossy(FrasEvent::AlreadyMarked {
                session_id,
                student_key: student.index_number.clone(),
                name: student.full_name(),
                subject,
                date,
                timestamp: time::now(),
            });
            return;
        }

        match session.mark_present(&student) {
            MarkOutcome::NewlyPresent => {
                info!("Marked {} ({}) present", student.full_name(), student.index_number);
                self.events.emit_lossy(FrasEvent::StudentRecognized {
                    session_id,
                    student_key: student.index_number.clone(),
                    name: student.full_name(),
                    timestamp: time::now(),
                });
            }
            MarkOutcome::AlreadyPresent => {
                debug!("Duplicate recognition for {} absorbed", student.index_number);
            }
        }
    }

    /// Keys of students with a stored record for (subject, date)
    async fn persisted_keys(&self, subject: &str, date: NaiveDate) -> Result<HashSet<StudentKey>> {
        let records = self
            .store
            .read_partition(PartitionKind::Attendance, &date_key(date))
            .await?;

        let mut keys = HashSet::new();
        for record in &records {
            let attendance = AttendanceRecord::from_record(record)?;
            if attendance.subject_code == subject && attendance.date == date {
                keys.insert(attendance.student_key);
            }
        }
        Ok(keys)
    }

    /// Save present students not yet persisted; returns their keys
    async fn persist_delta(&self, session: &Session) -> Result<Vec<StudentKey>> {
        let program = session.roster().program();
        let subject = session.roster().subject();
        let date = session.date();

        let persisted = self.persisted_keys(subject, date).await?;
        let now = time::now();
        let delta: Vec<AttendanceRecord> = session
            .present_students()
            .into_iter()
            .filter(|s| !persisted.contains(&s.index_number))
            .map(|s| AttendanceRecord::present(s, subject, date, now))
            .collect();

        if delta.is_empty() {
            return Ok(Vec::new());
        }

        self.collaborators
            .sink
            .save(program, subject, date, &delta)
            .await?;
        Ok(delta.into_iter().map(|r| r.student_key).collect())
    }

    /// Stop the consumer, then try to release capture
    async fn freeze(&self, session: &mut Session) -> Result<()> {
        if !session.frozen {
            session.frozen = true;
            session.cancel.cancel();
            debug!("Session {} frozen for submit", session.id());
        }
        self.release_capture(session).await
    }

    /// Release capture if held; the flag clears only once release succeeds
    async fn release_capture(&self, session: &mut Session) -> Result<()> {
        if !session.camera_active {
            return Ok(());
        }
        self.collaborators.capture.stop().await?;
        session.camera_active = false;
        info!("Capture released for session {}", session.id());
        Ok(())
    }

    /// Clone the engine's handles for the consumer task
    fn clone_handles(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            collaborators: self.collaborators.clone(),
            events: self.events.clone(),
            notice_ttl: self.notice_ttl,
            session: Arc::clone(&self.session),
        }
    }
}
