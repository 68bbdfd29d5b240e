use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Leading bytes of every PDF file
pub const PDF_MAGIC: &[u8] = b"%PDF";

/// Kind of project document
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    Plan,
    Spec,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Spec => "spec",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "plan" => Some(Self::Plan),
            "spec" => Some(Self::Spec),
            _ => None,
        }
    }

    /// Storage folder under the upload root
    pub fn folder(&self) -> &'static str {
        match self {
            Self::Plan => "plans",
            Self::Spec => "specs",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParseStatus {
    #[default]
    Pending,
    Parsed,
    Failed,
}

impl ParseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Parsed => "parsed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "parsed" => Self::Parsed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// Check an uploaded file before it is stored.
pub fn validate_upload(filename: &str, bytes: &[u8], max_bytes: usize) -> Result<(), String> {
    if !filename.to_lowercase().ends_with(".pdf") {
        return Err("Only PDF files are accepted".to_string());
    }
    if bytes.is_empty() {
        return Err("Uploaded file is empty".to_string());
    }
    if bytes.len() > max_bytes {
        return Err(format!(
            "File exceeds the maximum upload size of {} MB",
            max_bytes / (1024 * 1024)
        ));
    }
    if !bytes.starts_with(PDF_MAGIC) {
        return Err("File is not a valid PDF".to_string());
    }
    Ok(())
}

/// Query parameters for listing documents
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DocumentQuery {
    pub doc_type: Option<DocType>,
}

/// Response DTO for a document
#[derive(Debug, Clone, Serialize)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub project_id: Uuid,
    pub doc_type: DocType,
    pub original_filename: String,
    pub file_size: i64,
    pub page_count: Option<i32>,
    pub parse_status: ParseStatus,
    pub parse_method: Option<String>,
    pub parsed_at: Option<DateTime<Utc>>,
    pub uploaded_by: Option<Uuid>,
    pub uploaded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_type_round_trips_through_storage_names() {
        assert_eq!(DocType::parse(" Plan "), Some(DocType::Plan));
        assert_eq!(DocType::parse("spec"), Some(DocType::Spec));
        assert_eq!(DocType::parse("addendum"), None);
        assert_eq!(DocType::Plan.folder(), "plans");
    }

    #[test]
    fn upload_validation() {
        let pdf = b"%PDF-1.7\n...";
        assert!(validate_upload("A1-site.PDF", pdf, 1024).is_ok());
        assert!(validate_upload("site.dwg", pdf, 1024).is_err());
        assert!(validate_upload("site.pdf", b"", 1024).is_err());
        assert!(validate_upload("site.pdf", b"GIF89a", 1024).is_err());
        assert!(validate_upload("site.pdf", pdf, 4).is_err());
    }
}
