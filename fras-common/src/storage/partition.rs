//! Partition Store
//!
//! Record collections persisted as one CSV file per partition key:
//!
//! | Kind         | Container         | File                            |
//! |--------------|-------------------|---------------------------------|
//! | `Students`   | `students_data`   | `<program>_students.csv`        |
//! | `Attendance` | `attendance_data` | `attendance_<YYYY-MM-DD>.csv`   |
//!
//! **Concurrency:** writes to one `(kind, key)` are serialized by a per-key
//! async mutex; different keys proceed independently. `remove_all` holds the
//! kind lock exclusively, so no per-key write of that kind overlaps it.
//! Reads take no lock: every write is a swap-file commit, so a reader sees
//! either the old content or the new content.

use crate::codec::{self, Record, Schema};
use crate::models::{AttendanceRecord, StudentRecord};
use crate::storage::handles::{HandleResolver, RootHandle, StorageHost};
use crate::time::{date_key, parse_date_key};
use crate::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

const STUDENTS_SUFFIX: &str = "_students.csv";
const ATTENDANCE_PREFIX: &str = "attendance_";
const CSV_EXTENSION: &str = ".csv";

/// Partition kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionKind {
    /// Keyed by degree program
    Students,
    /// Keyed by calendar date
    Attendance,
}

impl PartitionKind {
    /// Container (directory) holding this kind's partitions
    pub fn namespace(&self) -> &'static str {
        match self {
            PartitionKind::Students => "students_data",
            PartitionKind::Attendance => "attendance_data",
        }
    }

    pub fn schema(&self) -> Schema {
        match self {
            PartitionKind::Students => StudentRecord::schema(),
            PartitionKind::Attendance => AttendanceRecord::schema(),
        }
    }

    /// File name for `key`
    ///
    /// Students keys are normalized (lowercase, whitespace runs to `_`);
    /// attendance keys must be `YYYY-MM-DD` dates.
    pub fn file_name(&self, key: &str) -> Result<String> {
        match self {
            PartitionKind::Students => {
                let normalized = normalize_program(key);
                if normalized.is_empty() {
                    return Err(Error::InvalidInput("Program name is empty".to_string()));
                }
                Ok(format!("{}{}", normalized, STUDENTS_SUFFIX))
            }
            PartitionKind::Attendance => {
                let date = parse_date_key(key.trim())?;
                Ok(format!("{}{}{}", ATTENDANCE_PREFIX, date_key(date), CSV_EXTENSION))
            }
        }
    }

    /// Recover the partition key from a file name, if it belongs to this kind
    pub fn key_from_file_name(&self, file_name: &str) -> Option<String> {
        match self {
            PartitionKind::Students => file_name
                .strip_suffix(STUDENTS_SUFFIX)
                .filter(|k| !k.is_empty())
                .map(str::to_string),
            PartitionKind::Attendance => file_name
                .strip_prefix(ATTENDANCE_PREFIX)
                .and_then(|rest| rest.strip_suffix(CSV_EXTENSION))
                .filter(|k| parse_date_key(k).is_ok())
                .map(str::to_string),
        }
    }
}

impl fmt::Display for PartitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionKind::Students => f.write_str("students"),
            PartitionKind::Attendance => f.write_str("attendance"),
        }
    }
}

/// Lowercase a program name and collapse whitespace runs to `_`
pub fn normalize_program(program: &str) -> String {
    program
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("_")
}

/// Keyed, file-backed record store
pub struct PartitionStore {
    resolver: Arc<HandleResolver>,
    /// One mutex per (kind, file name); entries are never evicted
    key_locks: Mutex<HashMap<(PartitionKind, String), Arc<Mutex<()>>>>,
    students_lock: RwLock<()>,
    attendance_lock: RwLock<()>,
}

impl PartitionStore {
    pub fn new(resolver: Arc<HandleResolver>) -> Self {
        Self {
            resolver,
            key_locks: Mutex::new(HashMap::new()),
            students_lock: RwLock::new(()),
            attendance_lock: RwLock::new(()),
        }
    }

    /// Store over a fresh resolver for `host`
    pub fn open(host: Arc<dyn StorageHost>) -> Self {
        Self::new(Arc::new(HandleResolver::new(host)))
    }

    pub fn resolver(&self) -> &Arc<HandleResolver> {
        &self.resolver
    }

    /// Read all records of a partition in write order
    ///
    /// A partition that was never written (or whose container does not
    /// exist) reads as empty.
    pub async fn read_partition(&self, kind: PartitionKind, key: &str) -> Result<Vec<Record>> {
        let file_name = kind.file_name(key)?;
        let file_name = file_name.as_str();
        self.resolver
            .with_root(|root| async move { read_file(&root, kind, file_name).await })
            .await
    }

    /// Append one record to a partition
    pub async fn append_record(&self, kind: PartitionKind, key: &str, record: Record) -> Result<()> {
        self.append_records(kind, key, &[record]).await.map(|_| ())
    }

    /// Append records with a single read-merge-write
    ///
    /// Returns the number of records appended.
    pub async fn append_records(
        &self,
        kind: PartitionKind,
        key: &str,
        records: &[Record],
    ) -> Result<usize> {
        self.append_filtered(kind, key, records, |_| None).await
    }

    /// Append only records whose identity is not already in the partition
    ///
    /// Duplicates within `records` are dropped too. Returns the number of
    /// records appended; zero means the partition was left untouched.
    pub async fn append_unique<F>(
        &self,
        kind: PartitionKind,
        key: &str,
        records: &[Record],
        identity: F,
    ) -> Result<usize>
    where
        F: Fn(&Record) -> String,
    {
        self.append_filtered(kind, key, records, |r| Some(identity(r))).await
    }

    async fn append_filtered<F>(
        &self,
        kind: PartitionKind,
        key: &str,
        records: &[Record],
        identity: F,
    ) -> Result<usize>
    where
        F: Fn(&Record) -> Option<String>,
    {
        let file_name = kind.file_name(key)?;
        if records.is_empty() {
            return Ok(0);
        }

        let _kind_guard = self.kind_lock(kind).read().await;
        let key_lock = self.key_lock(kind, &file_name).await;
        let _key_guard = key_lock.lock().await;

        let file_name = file_name.as_str();
        let identity = &identity;
        self.resolver
            .with_root(|root| async move {
                let mut existing = read_file(&root, kind, file_name).await?;
                let mut seen: HashSet<String> = existing.iter().filter_map(identity).collect();

                let before = existing.len();
                for record in records {
                    if let Some(id) = identity(record) {
                        if !seen.insert(id) {
                            continue;
                        }
                    }
                    existing.push(record.clone());
                }
                let appended = existing.len() - before;
                if appended == 0 {
                    return Ok(0);
                }

                write_file(&root, kind, file_name, &existing).await?;
                debug!(
                    "Wrote {} {} records to {} ({} new)",
                    existing.len(),
                    kind,
                    file_name,
                    appended
                );
                Ok(appended)
            })
            .await
    }

    /// Remove one partition; absence is not an error
    pub async fn remove_partition(&self, kind: PartitionKind, key: &str) -> Result<()> {
        let file_name = kind.file_name(key)?;

        let _kind_guard = self.kind_lock(kind).read().await;
        let key_lock = self.key_lock(kind, &file_name).await;
        let _key_guard = key_lock.lock().await;

        let file_name = file_name.as_str();
        self.resolver
            .with_root(|root| async move {
                let container = match root.get_container(kind.namespace()).await {
                    Ok(container) => container,
                    Err(e) if e.is_not_found() => return Ok(()),
                    Err(e) => return Err(e),
                };
                match container.remove(file_name).await {
                    Ok(()) => {
                        info!("Removed {} partition {}", kind, file_name);
                        Ok(())
                    }
                    Err(e) if e.is_not_found() => Ok(()),
                    Err(e) => Err(e),
                }
            })
            .await
    }

    /// Remove every partition of `kind`; idempotent
    pub async fn remove_all(&self, kind: PartitionKind) -> Result<()> {
        let _kind_guard = self.kind_lock(kind).write().await;

        self.resolver
            .with_root(|root| async move {
                match root.remove_container(kind.namespace()).await {
                    Ok(()) => {
                        info!("Removed all {} partitions", kind);
                        Ok(())
                    }
                    Err(e) if e.is_not_found() => Ok(()),
                    Err(e) => Err(e),
                }
            })
            .await
    }

    /// Keys of all existing partitions of `kind`, sorted
    pub async fn list_keys(&self, kind: PartitionKind) -> Result<Vec<String>> {
        self.resolver
            .with_root(|root| async move {
                let container = match root.get_container(kind.namespace()).await {
                    Ok(container) => container,
                    Err(e) if e.is_not_found() => return Ok(Vec::new()),
                    Err(e) => return Err(e),
                };
                let files = container.list_files().await?;
                Ok(files
                    .iter()
                    .filter_map(|name| kind.key_from_file_name(name))
                    .collect())
            })
            .await
    }

    /// Attendance records dated within `start..=end`, ordered by date
    pub async fn read_attendance_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Record>> {
        if start > end {
            return Err(Error::InvalidInput(format!(
                "Start date {} is after end date {}",
                date_key(start),
                date_key(end)
            )));
        }

        let mut dates: Vec<NaiveDate> = self
            .list_keys(PartitionKind::Attendance)
            .await?
            .iter()
            .filter_map(|key| parse_date_key(key).ok())
            .filter(|date| *date >= start && *date <= end)
            .collect();
        dates.sort();

        let mut records = Vec::new();
        for date in dates {
            records.extend(
                self.read_partition(PartitionKind::Attendance, &date_key(date))
                    .await?,
            );
        }
        Ok(records)
    }

    /// Number of records in a partition
    pub async fn count(&self, kind: PartitionKind, key: &str) -> Result<usize> {
        Ok(self.read_partition(kind, key).await?.len())
    }

    /// End the storage session
    pub async fn close(&self) {
        self.resolver.close().await;
    }

    fn kind_lock(&self, kind: PartitionKind) -> &RwLock<()> {
        match kind {
            PartitionKind::Students => &self.students_lock,
            PartitionKind::Attendance => &self.attendance_lock,
        }
    }

    async fn key_lock(&self, kind: PartitionKind, file_name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().await;
        locks
            .entry((kind, file_name.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

async fn read_file(root: &RootHandle, kind: PartitionKind, file_name: &str) -> Result<Vec<Record>> {
    let container = match root.get_container(kind.namespace()).await {
        Ok(container) => container,
        Err(e) if e.is_not_found() => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let file = match container.get_file(file_name, false).await {
        Ok(file) => file,
        Err(e) if e.is_not_found() => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let text = file.read_text().await?;
    codec::decode(&text, &kind.schema())
        .map_err(|e| Error::Codec(format!("{}: {}", file_name, e)))
}

async fn write_file(
    root: &RootHandle,
    kind: PartitionKind,
    file_name: &str,
    records: &[Record],
) -> Result<()> {
    let content = codec::encode(records);
    let container = root.get_or_create_container(kind.namespace()).await?;
    let file = container.get_file(file_name, true).await?;
    let mut writer = file.create_writable();
    writer.write(&content);
    writer.close().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_students_file_name_is_normalized() {
        let kind = PartitionKind::Students;
        assert_eq!(
            kind.file_name("Computer  Science").unwrap(),
            "computer_science_students.csv"
        );
        assert_eq!(kind.file_name(" CS ").unwrap(), "cs_students.csv");
        assert!(matches!(kind.file_name("   "), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_attendance_file_name_requires_date() {
        let kind = PartitionKind::Attendance;
        assert_eq!(
            kind.file_name("2025-03-21").unwrap(),
            "attendance_2025-03-21.csv"
        );
        assert!(matches!(kind.file_name("yesterday"), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_key_from_file_name() {
        assert_eq!(
            PartitionKind::Students.key_from_file_name("computer_science_students.csv"),
            Some("computer_science".to_string())
        );
        assert_eq!(
            PartitionKind::Attendance.key_from_file_name("attendance_2025-03-21.csv"),
            Some("2025-03-21".to_string())
        );
        assert_eq!(PartitionKind::Attendance.key_from_file_name("attendance_x.csv"), None);
        assert_eq!(PartitionKind::Students.key_from_file_name("notes.txt"), None);
    }

    #[test]
    fn test_normalized_key_maps_to_same_file() {
        let kind = PartitionKind::Students;
        let key = kind.key_from_file_name(&kind.file_name("Computer Science").unwrap()).unwrap();
        assert_eq!(kind.file_name(&key).unwrap(), "computer_science_students.csv");
    }

    #[test]
    fn test_kind_display_and_namespace() {
        assert_eq!(PartitionKind::Students.to_string(), "students");
        assert_eq!(PartitionKind::Attendance.namespace(), "attendance_data");
    }
}
