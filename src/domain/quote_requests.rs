use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::takeoff::TakeoffItemResponse;

pub const MAX_VENDORS_PER_REQUEST: usize = 20;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuoteRequestStatus {
    Sent,
    Failed,
    Opened,
    Responded,
    Expired,
}

impl QuoteRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Opened => "opened",
            Self::Responded => "responded",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "failed" => Self::Failed,
            "opened" => Self::Opened,
            "responded" => Self::Responded,
            "expired" => Self::Expired,
            _ => Self::Sent,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateQuoteRequestsRequest {
    pub vendor_ids: Vec<Uuid>,
    pub takeoff_item_ids: Vec<Uuid>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub expected_response_date: Option<NaiveDate>,
}

impl CreateQuoteRequestsRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.vendor_ids.is_empty() {
            return Err("At least one vendor is required".to_string());
        }
        if self.vendor_ids.len() > MAX_VENDORS_PER_REQUEST {
            return Err(format!(
                "At most {} vendors can be contacted at once",
                MAX_VENDORS_PER_REQUEST
            ));
        }
        if self.takeoff_item_ids.is_empty() {
            return Err("At least one takeoff item is required".to_string());
        }
        Ok(())
    }
}

/// Snapshot of a takeoff item as it was sent to the vendor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestedItem {
    pub takeoff_item_id: Uuid,
    pub label: String,
    pub qty: f64,
    pub unit: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VendorSendError {
    pub vendor_id: Uuid,
    pub vendor_name: Option<String>,
    pub error: String,
}

/// Outcome of sending a batch of quote requests
#[derive(Debug, Clone, Default, Serialize)]
pub struct SendQuoteRequestsResult {
    pub success_count: usize,
    pub error_count: usize,
    pub errors: Vec<VendorSendError>,
    pub request_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateQuoteRequestStatus {
    pub status: QuoteRequestStatus,
}

impl UpdateQuoteRequestStatus {
    pub fn validate(&self) -> Result<(), String> {
        if self.status == QuoteRequestStatus::Failed {
            return Err("Status can only be set to sent, opened, responded or expired".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QuoteRequestResponse {
    pub id: Uuid,
    pub project_id: Uuid,
    pub vendor_id: Option<Uuid>,
    pub vendor_name: String,
    pub vendor_email: Option<String>,
    pub email_subject: String,
    pub status: QuoteRequestStatus,
    pub failure_reason: Option<String>,
    pub expected_response_date: Option<NaiveDate>,
    pub requested_items: Vec<RequestedItem>,
    pub sent_by: Option<Uuid>,
    pub sent_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuoteRequestDetail {
    #[serde(flatten)]
    pub request: QuoteRequestResponse,
    pub email_body: String,
    /// Current state of the requested takeoff items that still exist
    pub items: Vec<TakeoffItemResponse>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QuoteRequestSummary {
    pub total: i64,
    pub sent: i64,
    pub failed: i64,
    pub opened: i64,
    pub responded: i64,
    pub expired: i64,
    pub vendors_contacted: i64,
    pub last_sent_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_count_bounds() {
        let mut req = CreateQuoteRequestsRequest {
            vendor_ids: vec![],
            takeoff_item_ids: vec![Uuid::new_v4()],
            message: None,
            expected_response_date: None,
        };
        assert!(req.validate().is_err());

        req.vendor_ids = (0..20).map(|_| Uuid::new_v4()).collect();
        assert!(req.validate().is_ok());

        req.vendor_ids.push(Uuid::new_v4());
        assert!(req.validate().is_err());
    }

    #[test]
    fn failed_is_not_a_manual_status() {
        let update: UpdateQuoteRequestStatus =
            serde_json::from_str(r#"{"status": "failed"}"#).unwrap();
        assert!(update.validate().is_err());
        let update: UpdateQuoteRequestStatus =
            serde_json::from_str(r#"{"status": "responded"}"#).unwrap();
        assert!(update.validate().is_ok());
    }
}
