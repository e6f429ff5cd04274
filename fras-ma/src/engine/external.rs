//! External collaborators of the reconciliation engine
//!
//! The engine only sees these traits. Local implementations run against
//! the partition store and the filesystem; HTTP implementations live in
//! [`super::remote`].

use async_trait::async_trait;
use chrono::NaiveDate;
use fras_common::models::{AttendanceRecord, Roster};
use fras_common::storage::{PartitionKind, PartitionStore, StudentDirectory};
use fras_common::time::date_key;
use fras_common::codec::Record;
use fras_common::{Error, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Supplies the roster snapshot for a session
#[async_trait]
pub trait RosterSource: Send + Sync {
    async fn fetch_roster(&self, program: &str, subject: &str) -> Result<Roster>;
}

/// Decides whether recognition may start
#[async_trait]
pub trait ReadinessGate: Send + Sync {
    async fn is_ready(&self) -> Result<bool>;
}

/// Controls the external capture + recognition process
#[async_trait]
pub trait CaptureControl: Send + Sync {
    async fn start(&self, program: &str, subject: &str, date: NaiveDate) -> Result<()>;

    async fn stop(&self) -> Result<()>;
}

/// Persists the submitted attendance delta
///
/// Implementations must append idempotently: a fact already stored for
/// `(student, subject, date)` is not stored twice. Returns the number of
/// records newly stored.
#[async_trait]
pub trait AttendanceSink: Send + Sync {
    async fn save(
        &self,
        program: &str,
        subject: &str,
        date: NaiveDate,
        records: &[AttendanceRecord],
    ) -> Result<usize>;
}

/// Roster from the local student directory
pub struct StoreRoster {
    directory: Arc<StudentDirectory>,
}

impl StoreRoster {
    pub fn new(directory: Arc<StudentDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl RosterSource for StoreRoster {
    async fn fetch_roster(&self, program: &str, subject: &str) -> Result<Roster> {
        self.directory.roster(program, subject).await
    }
}

/// Ready once the trained model file exists and is non-empty
pub struct ModelFileGate {
    path: PathBuf,
}

impl ModelFileGate {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ReadinessGate for ModelFileGate {
    async fn is_ready(&self) -> Result<bool> {
        match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => Ok(metadata.is_file() && metadata.len() > 0),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Model file {} not found", self.path.display());
                Ok(false)
            }
            Err(e) => Err(Error::from_io(e, self.path.display())),
        }
    }
}

/// In-process capture stand-in; events arrive over the HTTP surface
#[derive(Default)]
pub struct LocalCapture {
    active: AtomicBool,
}

impl LocalCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureControl for LocalCapture {
    async fn start(&self, program: &str, subject: &str, date: NaiveDate) -> Result<()> {
        if self.active.swap(true, Ordering::SeqCst) {
            return Err(Error::Precondition("Capture is already active".to_string()));
        }
        info!("Local capture started for {} / {} on {}", program, subject, date_key(date));
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if self.active.swap(false, Ordering::SeqCst) {
            info!("Local capture released");
        }
        Ok(())
    }
}

/// Appends the delta to the date's attendance partition
pub struct StoreSink {
    store: Arc<PartitionStore>,
}

impl StoreSink {
    pub fn new(store: Arc<PartitionStore>) -> Self {
        Self { store }
    }
}

/// Identity of an attendance fact: (student, subject, date)
pub fn attendance_identity(record: &Record) -> String {
    let field = |name: &str| record.get_string(name).unwrap_or_default();
    format!("{}\u{1f}{}\u{1f}{}", field("studentKey"), field("subjectCode"), field("date"))
}

#[async_trait]
impl AttendanceSink for StoreSink {
    async fn save(
        &self,
        program: &str,
        subject: &str,
        date: NaiveDate,
        records: &[AttendanceRecord],
    ) -> Result<usize> {
        let rows: Vec<Record> = records.iter().map(AttendanceRecord::to_record).collect();
        let saved = self
            .store
            .append_unique(PartitionKind::Attendance, &date_key(date), &rows, attendance_identity)
            .await?;
        info!(
            "Saved {} of {} attendance records for {} / {} on {}",
            saved,
            records.len(),
            program,
            subject,
            date_key(date)
        );
        Ok(saved)
    }
}
