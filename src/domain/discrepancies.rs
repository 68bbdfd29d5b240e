//! Bid schedule lines and the discrepancies found between them and the takeoff.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Bid schedule
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBidItemRequest {
    #[serde(default)]
    pub item_number: Option<String>,
    pub description: String,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub unit_price: Option<f64>,
}

impl CreateBidItemRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.description.trim().is_empty() {
            return Err("Description is required".to_string());
        }
        validate_bid_amounts(self.quantity, self.unit_price)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpdateBidItemRequest {
    #[serde(default)]
    pub item_number: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub unit_price: Option<f64>,
}

impl UpdateBidItemRequest {
    pub fn validate(&self) -> Result<(), String> {
        if matches!(&self.description, Some(d) if d.trim().is_empty()) {
            return Err("Description cannot be empty".to_string());
        }
        validate_bid_amounts(self.quantity, self.unit_price)
    }
}

fn validate_bid_amounts(quantity: Option<f64>, unit_price: Option<f64>) -> Result<(), String> {
    if matches!(quantity, Some(q) if !q.is_finite() || q < 0.0) {
        return Err("Quantity must be zero or positive".to_string());
    }
    if matches!(unit_price, Some(p) if !p.is_finite() || p < 0.0) {
        return Err("Unit price must be zero or positive".to_string());
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct BidItemResponse {
    pub id: Uuid,
    pub project_id: Uuid,
    pub item_number: Option<String>,
    pub description: String,
    pub quantity: Option<f64>,
    pub unit: Option<String>,
    pub unit_price: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Discrepancies
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyType {
    QuantityMismatch,
    MissingItem,
    ExtraItem,
}

impl DiscrepancyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QuantityMismatch => "quantity_mismatch",
            Self::MissingItem => "missing_item",
            Self::ExtraItem => "extra_item",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "quantity_mismatch" => Some(Self::QuantityMismatch),
            "missing_item" => Some(Self::MissingItem),
            "extra_item" => Some(Self::ExtraItem),
            _ => None,
        }
    }
}

/// Most severe first when sorted
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "critical" => Some(Self::Critical),
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyStatus {
    #[default]
    Open,
    Resolved,
    Ignored,
}

impl DiscrepancyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Resolved => "resolved",
            Self::Ignored => "ignored",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "resolved" => Self::Resolved,
            "ignored" => Self::Ignored,
            _ => Self::Open,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DiscrepancyQuery {
    pub discrepancy_type: Option<DiscrepancyType>,
    pub severity: Option<Severity>,
    pub status: Option<DiscrepancyStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolveDiscrepancyRequest {
    pub status: DiscrepancyStatus,
    #[serde(default)]
    pub resolution_notes: Option<String>,
}

impl ResolveDiscrepancyRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.status == DiscrepancyStatus::Open {
            return Err("Status must be 'resolved' or 'ignored'".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscrepancyResponse {
    pub id: Uuid,
    pub project_id: Uuid,
    pub bid_item_id: Option<Uuid>,
    pub takeoff_item_id: Option<Uuid>,
    pub discrepancy_type: DiscrepancyType,
    pub severity: Severity,
    pub bid_quantity: Option<f64>,
    pub plan_quantity: Option<f64>,
    pub difference_percentage: Option<f64>,
    pub description: String,
    pub recommendation: Option<String>,
    pub status: DiscrepancyStatus,
    pub resolution_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Default, PartialEq, Eq)]
pub struct SeverityCounts {
    pub critical: i64,
    pub high: i64,
    pub medium: i64,
    pub low: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Default, PartialEq, Eq)]
pub struct TypeCounts {
    pub quantity_mismatch: i64,
    pub missing_item: i64,
    pub extra_item: i64,
}

/// Severity and type counts cover open discrepancies only.
#[derive(Debug, Clone, Serialize, Default)]
pub struct DiscrepancySummary {
    pub open: i64,
    pub resolved: i64,
    pub ignored: i64,
    pub by_severity: SeverityCounts,
    pub by_type: TypeCounts,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectionResult {
    pub bid_items_checked: usize,
    pub takeoff_items_checked: usize,
    pub total_discrepancies: usize,
    pub discrepancies: Vec<DiscrepancyResponse>,
    pub summary: DiscrepancySummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_sorts_most_severe_first() {
        let mut severities = vec![Severity::Low, Severity::Critical, Severity::Medium, Severity::High];
        severities.sort();
        assert_eq!(
            severities,
            vec![Severity::Critical, Severity::High, Severity::Medium, Severity::Low]
        );
    }

    #[test]
    fn reopening_is_not_a_resolution() {
        let req = ResolveDiscrepancyRequest {
            status: DiscrepancyStatus::Open,
            resolution_notes: None,
        };
        assert!(req.validate().is_err());

        let req = ResolveDiscrepancyRequest {
            status: DiscrepancyStatus::Ignored,
            resolution_notes: Some("Owner allowance covers it".into()),
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn bid_item_amounts_must_be_non_negative() {
        let req = CreateBidItemRequest {
            item_number: Some("203-01".into()),
            description: "Class A concrete".into(),
            quantity: Some(-1.0),
            unit: Some("CY".into()),
            unit_price: None,
        };
        assert!(req.validate().is_err());
        assert!(UpdateBidItemRequest {
            description: Some(" ".into()),
            ..Default::default()
        }
        .validate()
        .is_err());
    }

    #[test]
    fn types_round_trip_through_text() {
        for kind in [
            DiscrepancyType::QuantityMismatch,
            DiscrepancyType::MissingItem,
            DiscrepancyType::ExtraItem,
        ] {
            assert_eq!(DiscrepancyType::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(Severity::parse("urgent"), None);
        assert_eq!(DiscrepancyStatus::parse("resolved"), DiscrepancyStatus::Resolved);
    }
}
