//! Student directory
//!
//! Typed view over the students partitions: one partition per degree
//! program, holding the registered [`StudentRecord`]s in registration order.

use crate::models::{Roster, StudentRecord};
use crate::storage::partition::{PartitionKind, PartitionStore};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

pub struct StudentDirectory {
    store: Arc<PartitionStore>,
    /// Serializes the duplicate check with the append
    register_lock: Mutex<()>,
}

impl StudentDirectory {
    pub fn new(store: Arc<PartitionStore>) -> Self {
        Self {
            store,
            register_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<PartitionStore> {
        &self.store
    }

    /// Register a student under their degree program
    ///
    /// Rejects a blank index number, or an index number or email already
    /// registered in the same program, with `InvalidInput`.
    pub async fn register(&self, student: StudentRecord) -> Result<()> {
        if student.index_number.as_str().trim().is_empty() {
            return Err(Error::InvalidInput("Index number is required".to_string()));
        }

        let _guard = self.register_lock.lock().await;
        let existing = self.students(&student.degree_program).await?;

        if existing.iter().any(|s| s.index_number == student.index_number) {
            return Err(Error::InvalidInput(format!(
                "Student {} is already registered in {}",
                student.index_number, student.degree_program
            )));
        }
        if !student.email.is_empty()
            && existing
                .iter()
                .any(|s| s.email.eq_ignore_ascii_case(&student.email))
        {
            return Err(Error::InvalidInput(format!(
                "Email {} is already registered in {}",
                student.email, student.degree_program
            )));
        }

        self.store
            .append_record(
                PartitionKind::Students,
                &student.degree_program,
                student.to_record(),
            )
            .await?;
        info!(
            "Registered student {} in {}",
            student.index_number, student.degree_program
        );
        Ok(())
    }

    /// All students registered in `program`
    pub async fn students(&self, program: &str) -> Result<Vec<StudentRecord>> {
        self.store
            .read_partition(PartitionKind::Students, program)
            .await?
            .iter()
            .map(StudentRecord::from_record)
            .collect()
    }

    pub async fn count(&self, program: &str) -> Result<usize> {
        self.store.count(PartitionKind::Students, program).await
    }

    pub async fn clear_program(&self, program: &str) -> Result<()> {
        self.store
            .remove_partition(PartitionKind::Students, program)
            .await
    }

    pub async fn clear_all(&self) -> Result<()> {
        self.store.remove_all(PartitionKind::Students).await
    }

    /// Students of `program` enrolled in `subject`
    pub async fn roster(&self, program: &str, subject: &str) -> Result<Roster> {
        let students = self
            .students(program)
            .await?
            .into_iter()
            .filter(|s| s.is_enrolled_in(subject))
            .collect();
        Ok(Roster::new(program, subject, students))
    }
}
