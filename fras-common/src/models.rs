//! Student and attendance record types
//!
//! Both record types map to and from a codec [`Record`] using their
//! partition kind's schema, so the column layout on disk is fixed here.

use crate::codec::{Record, ScalarType, Schema};
use crate::time::{date_key, parse_date_key};
use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Separator for enrolled subject codes inside one CSV cell
const SUBJECT_SEPARATOR: &str = ";";

/// Stable student identity (registration/index number)
///
/// The only key used to match a recognition event to a roster entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentKey(String);

impl StudentKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StudentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StudentKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for StudentKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Registered student
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub index_number: StudentKey,
    pub first_name: String,
    pub last_name: String,
    pub degree_program: String,
    #[serde(default)]
    pub faculty: String,
    #[serde(default)]
    pub intake: String,
    #[serde(default)]
    pub email: String,
    /// Enrolled subject codes
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default = "crate::time::now")]
    pub registered_at: DateTime<Utc>,
}

impl StudentRecord {
    /// Column layout of a students partition
    pub fn schema() -> Schema {
        Schema::new(&[
            ("indexNumber", ScalarType::Text),
            ("firstName", ScalarType::Text),
            ("lastName", ScalarType::Text),
            ("degreeProgram", ScalarType::Text),
            ("faculty", ScalarType::Text),
            ("intake", ScalarType::Text),
            ("email", ScalarType::Text),
            ("subjects", ScalarType::Text),
            ("registeredAt", ScalarType::Text),
        ])
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn is_enrolled_in(&self, subject_code: &str) -> bool {
        self.subjects.iter().any(|s| s == subject_code)
    }

    pub fn to_record(&self) -> Record {
        Record::new()
            .with("indexNumber", self.index_number.as_str())
            .with("firstName", self.first_name.as_str())
            .with("lastName", self.last_name.as_str())
            .with("degreeProgram", self.degree_program.as_str())
            .with("faculty", self.faculty.as_str())
            .with("intake", self.intake.as_str())
            .with("email", self.email.as_str())
            .with("subjects", self.subjects.join(SUBJECT_SEPARATOR))
            .with("registeredAt", self.registered_at.to_rfc3339())
    }

    pub fn from_record(record: &Record) -> Result<Self> {
        let subjects = optional_field(record, "subjects")
            .split(SUBJECT_SEPARATOR)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            index_number: StudentKey::new(required_field(record, "indexNumber")?),
            first_name: required_field(record, "firstName")?,
            last_name: required_field(record, "lastName")?,
            degree_program: required_field(record, "degreeProgram")?,
            faculty: optional_field(record, "faculty"),
            intake: optional_field(record, "intake"),
            email: optional_field(record, "email"),
            subjects,
            registered_at: parse_timestamp(&required_field(record, "registeredAt")?)?,
        })
    }
}

/// Attendance status; only presence is ever recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
        }
    }
}

impl FromStr for AttendanceStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "present" => Ok(AttendanceStatus::Present),
            other => Err(Error::Codec(format!("Unknown attendance status '{}'", other))),
        }
    }
}

/// One attendance fact
///
/// At most one record exists per (student, subject, date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub student_key: StudentKey,
    pub student_name: String,
    pub subject_code: String,
    pub degree_program: String,
    pub date: NaiveDate,
    pub timestamp: DateTime<Utc>,
    pub status: AttendanceStatus,
}

impl AttendanceRecord {
    /// Column layout of an attendance partition
    pub fn schema() -> Schema {
        Schema::new(&[
            ("studentKey", ScalarType::Text),
            ("studentName", ScalarType::Text),
            ("subjectCode", ScalarType::Text),
            ("degreeProgram", ScalarType::Text),
            ("date", ScalarType::Text),
            ("timestamp", ScalarType::Text),
            ("status", ScalarType::Text),
        ])
    }

    pub fn present(
        student: &StudentRecord,
        subject_code: &str,
        date: NaiveDate,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            student_key: student.index_number.clone(),
            student_name: student.full_name(),
            subject_code: subject_code.to_string(),
            degree_program: student.degree_program.clone(),
            date,
            timestamp,
            status: AttendanceStatus::Present,
        }
    }

    /// Whether this record is the fact for (student, subject, date)
    pub fn is_fact_for(&self, key: &StudentKey, subject_code: &str, date: NaiveDate) -> bool {
        &self.student_key == key && self.subject_code == subject_code && self.date == date
    }

    pub fn to_record(&self) -> Record {
        Record::new()
            .with("studentKey", self.student_key.as_str())
            .with("studentName", self.student_name.as_str())
            .with("subjectCode", self.subject_code.as_str())
            .with("degreeProgram", self.degree_program.as_str())
            .with("date", date_key(self.date))
            .with("timestamp", self.timestamp.to_rfc3339())
            .with("status", self.status.as_str())
    }

    pub fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            student_key: StudentKey::new(required_field(record, "studentKey")?),
            student_name: optional_field(record, "studentName"),
            subject_code: required_field(record, "subjectCode")?,
            degree_program: optional_field(record, "degreeProgram"),
            date: parse_date_key(&required_field(record, "date")?)
                .map_err(|e| Error::Codec(e.to_string()))?,
            timestamp: parse_timestamp(&required_field(record, "timestamp")?)?,
            status: required_field(record, "status")?.parse()?,
        })
    }
}

/// Read-only snapshot of the students eligible for one program + subject
#[derive(Debug, Clone, PartialEq)]
pub struct Roster {
    program: String,
    subject: String,
    students: Vec<StudentRecord>,
}

impl Roster {
    /// Build a roster; later duplicates of a key are dropped
    pub fn new(program: impl Into<String>, subject: impl Into<String>, students: Vec<StudentRecord>) -> Self {
        let mut unique: Vec<StudentRecord> = Vec::with_capacity(students.len());
        for student in students {
            if unique.iter().any(|s| s.index_number == student.index_number) {
                warn!("Duplicate roster entry for {}, keeping first", student.index_number);
                continue;
            }
            unique.push(student);
        }
        Self {
            program: program.into(),
            subject: subject.into(),
            students: unique,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn get(&self, key: &StudentKey) -> Option<&StudentRecord> {
        self.students.iter().find(|s| &s.index_number == key)
    }

    pub fn students(&self) -> &[StudentRecord] {
        &self.students
    }

    pub fn len(&self) -> usize {
        self.students.len()
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }
}

fn required_field(record: &Record, field: &str) -> Result<String> {
    match record.get_string(field) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(Error::Codec(format!("Missing required field '{}'", field))),
    }
}

fn optional_field(record: &Record, field: &str) -> String {
    record.get_string(field).unwrap_or_default()
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Codec(format!("Invalid timestamp '{}': {}", value, e)))
}
