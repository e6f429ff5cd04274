//! HTTP collaborators backed by the recognition backend
//!
//! **Endpoints used:**
//! - `GET {backend}/api/students` - full student list, filtered locally
//! - `POST {backend}/api/mark_attendance` - start capture + recognition
//! - `POST {backend}/api/stop_face_recognition` - release capture

use super::external::{CaptureControl, RosterSource};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use fras_common::models::{Roster, StudentKey, StudentRecord};
use fras_common::time::date_key;
use fras_common::{Error, Result};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct StudentsResponse {
    success: bool,
    #[serde(default)]
    students: Vec<RemoteStudent>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteStudent {
    index_number: String,
    first_name: String,
    last_name: String,
    degree_program: String,
    #[serde(default)]
    faculty: Option<String>,
    #[serde(default)]
    intake: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    subjects: Vec<String>,
    #[serde(default)]
    created_at: Option<String>,
}

impl RemoteStudent {
    fn into_record(self) -> StudentRecord {
        let registered_at = self
            .created_at
            .as_deref()
            .and_then(parse_backend_timestamp)
            .unwrap_or_else(fras_common::time::now);

        StudentRecord {
            index_number: StudentKey::new(self.index_number),
            first_name: self.first_name,
            last_name: self.last_name,
            degree_program: self.degree_program,
            faculty: self.faculty.unwrap_or_default(),
            intake: self.intake.unwrap_or_default(),
            email: self.email.unwrap_or_default(),
            subjects: self.subjects,
            registered_at,
        }
    }
}

/// Backend timestamps are ISO-8601, with or without an offset
fn parse_backend_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

#[derive(Debug, Deserialize)]
struct ControlResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl ControlResponse {
    fn reason(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "no reason given".to_string())
    }
}

fn build_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| Error::Network(format!("Failed to build HTTP client: {}", e)))
}

/// Roster fetched from the backend student list
pub struct HttpRoster {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRoster {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl RosterSource for HttpRoster {
    async fn fetch_roster(&self, program: &str, subject: &str) -> Result<Roster> {
        let url = format!("{}/api/students", self.base_url);
        debug!("Fetching roster from {}", url);

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let body: StudentsResponse = response.json().await?;
        if !status.is_success() || !body.success {
            return Err(Error::Network(format!(
                "Roster request failed ({}): {}",
                status,
                body.error.unwrap_or_else(|| "no reason given".to_string())
            )));
        }

        let students: Vec<StudentRecord> = body
            .students
            .into_iter()
            .filter(|s| s.degree_program == program)
            .map(RemoteStudent::into_record)
            .filter(|s| s.is_enrolled_in(subject))
            .collect();
        info!("Fetched {} students for {} / {}", students.len(), program, subject);
        Ok(Roster::new(program, subject, students))
    }
}

/// Capture controlled through the backend's recognition endpoints
pub struct HttpCapture {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCapture {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            base_url: base_url.into(),
        })
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<ControlResponse> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        let body: ControlResponse = response.json().await?;
        if !status.is_success() {
            return Err(Error::Network(format!("{} returned {}: {}", url, status, body.reason())));
        }
        Ok(body)
    }
}

#[async_trait]
impl CaptureControl for HttpCapture {
    async fn start(&self, program: &str, subject: &str, date: NaiveDate) -> Result<()> {
        let body = self
            .post(
                "/api/mark_attendance",
                json!({ "class": program, "section": subject, "date": date_key(date) }),
            )
            .await?;
        if !body.success {
            return Err(Error::Precondition(format!(
                "Backend refused to start recognition: {}",
                body.reason()
            )));
        }
        info!("Backend recognition started for {} / {}", program, subject);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let body = self.post("/api/stop_face_recognition", json!({})).await?;
        if !body.success {
            // Nothing was running on the backend side
            warn!("Backend stop reported: {}", body.reason());
        }
        info!("Backend recognition released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_student_maps_to_record() {
        let body: StudentsResponse = serde_json::from_str(
            r#"{
                "success": true,
                "students": [{
                    "id": 7,
                    "indexNumber": "CS/2021/001",
                    "firstName": "John",
                    "lastName": "Smith",
                    "fullName": "John Smith",
                    "degreeProgram": "Computer Science",
                    "faculty": "FOC",
                    "intake": "2021",
                    "email": "john@example.edu",
                    "phone": null,
                    "createdAt": "2025-03-01T09:30:00.123456",
                    "hasImage": true,
                    "subjects": ["CS101"]
                }]
            }"#,
        )
        .unwrap();

        let student = body.students.into_iter().next().unwrap().into_record();
        assert_eq!(student.index_number, StudentKey::new("CS/2021/001"));
        assert_eq!(student.full_name(), "John Smith");
        assert!(student.is_enrolled_in("CS101"));
        assert_eq!(student.registered_at.to_rfc3339(), "2025-03-01T09:30:00.123456+00:00");
    }

    #[test]
    fn test_student_with_null_optionals() {
        let student: RemoteStudent = serde_json::from_str(
            r#"{"indexNumber":"X1","firstName":"A","lastName":"B","degreeProgram":"SE",
                "faculty":null,"email":null,"createdAt":null}"#,
        )
        .unwrap();
        let record = student.into_record();
        assert!(record.faculty.is_empty());
        assert!(record.subjects.is_empty());
    }

    #[test]
    fn test_control_response_reason() {
        let body: ControlResponse =
            serde_json::from_str(r#"{"success":false,"message":"Face recognition is already active"}"#)
                .unwrap();
        assert!(!body.success);
        assert_eq!(body.reason(), "Face recognition is already active");
    }
}
