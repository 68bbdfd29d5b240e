use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request DTO for creating a project
#[derive(Debug, Clone, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub job_number: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub project_type: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_contact: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl CreateProjectRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Project name is required".to_string());
        }
        if self.job_number.trim().is_empty() {
            return Err("Job number is required".to_string());
        }
        Ok(())
    }
}

/// Request DTO for updating a project
#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpdateProjectRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub job_number: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub project_type: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_contact: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl UpdateProjectRequest {
    pub fn validate(&self) -> Result<(), String> {
        if matches!(&self.name, Some(n) if n.trim().is_empty()) {
            return Err("Project name cannot be empty".to_string());
        }
        if matches!(&self.job_number, Some(j) if j.trim().is_empty()) {
            return Err("Job number cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Query parameters for listing projects
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProjectQuery {
    /// Matches name or job number
    pub search: Option<String>,
}

/// Response DTO for a project
#[derive(Debug, Clone, Serialize)]
pub struct ProjectResponse {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub job_number: String,
    pub location: Option<String>,
    pub project_type: Option<String>,
    pub customer_name: Option<String>,
    pub customer_contact: Option<String>,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Counts of the records hanging off a project
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProjectStats {
    pub document_count: i64,
    pub takeoff_count: i64,
    pub quote_count: i64,
    pub estimate_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectDetailResponse {
    #[serde(flatten)]
    pub project: ProjectResponse,
    pub stats: ProjectStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_requires_name_and_job_number() {
        let req: CreateProjectRequest =
            serde_json::from_str(r#"{"name": "Riverside Clinic", "job_number": "24-118"}"#).unwrap();
        assert!(req.validate().is_ok());

        let req: CreateProjectRequest =
            serde_json::from_str(r#"{"name": "Riverside Clinic", "job_number": " "}"#).unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn update_rejects_blank_fields_only_when_present() {
        assert!(UpdateProjectRequest::default().validate().is_ok());
        let req = UpdateProjectRequest {
            name: Some(String::new()),
            ..Default::default()
        };
        assert!(req.validate().is_err());
    }
}
