//! Vendor quotes and their comparison.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
}

impl QuoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "accepted" => Self::Accepted,
            "rejected" => Self::Rejected,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateQuoteRequest {
    #[serde(default)]
    pub vendor_id: Option<Uuid>,
    /// Required when no vendor_id is given
    #[serde(default)]
    pub vendor_name: Option<String>,
    #[serde(default)]
    pub vendor_email: Option<String>,
    #[serde(default)]
    pub vendor_phone: Option<String>,
    #[serde(default)]
    pub takeoff_item_id: Option<Uuid>,
    pub item_description: String,
    pub quantity: f64,
    pub unit: String,
    pub unit_price: f64,
    #[serde(default)]
    pub total_price: Option<f64>,
    #[serde(default)]
    pub lead_time_days: Option<i32>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub received_at: Option<DateTime<Utc>>,
}

impl CreateQuoteRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.vendor_id.is_none()
            && self.vendor_name.as_deref().map_or(true, |n| n.trim().is_empty())
        {
            return Err("Either vendor_id or vendor_name is required".to_string());
        }
        if self.item_description.trim().is_empty() {
            return Err("Item description is required".to_string());
        }
        if self.unit.trim().is_empty() {
            return Err("Unit is required".to_string());
        }
        validate_amounts(Some(self.quantity), Some(self.unit_price), self.total_price)?;
        validate_lead_time(self.lead_time_days)
    }

    /// Quoted total, defaulting to quantity times unit price
    pub fn total(&self) -> f64 {
        self.total_price.unwrap_or(self.quantity * self.unit_price)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpdateQuoteRequest {
    #[serde(default)]
    pub item_description: Option<String>,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub unit_price: Option<f64>,
    #[serde(default)]
    pub total_price: Option<f64>,
    #[serde(default)]
    pub lead_time_days: Option<i32>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub takeoff_item_id: Option<Uuid>,
}

impl UpdateQuoteRequest {
    pub fn validate(&self) -> Result<(), String> {
        if matches!(&self.item_description, Some(d) if d.trim().is_empty()) {
            return Err("Item description cannot be empty".to_string());
        }
        validate_amounts(self.quantity, self.unit_price, self.total_price)?;
        validate_lead_time(self.lead_time_days)
    }

    /// New total given the stored quantity and unit price.
    ///
    /// An explicit total wins; otherwise the total is recomputed when either
    /// factor changes.
    pub fn resolve_total(&self, quantity: f64, unit_price: f64, current_total: f64) -> f64 {
        if let Some(total) = self.total_price {
            return total;
        }
        if self.quantity.is_some() || self.unit_price.is_some() {
            return self.quantity.unwrap_or(quantity) * self.unit_price.unwrap_or(unit_price);
        }
        current_total
    }
}

fn validate_amounts(
    quantity: Option<f64>,
    unit_price: Option<f64>,
    total: Option<f64>,
) -> Result<(), String> {
    if matches!(quantity, Some(q) if !q.is_finite() || q <= 0.0) {
        return Err("Quantity must be greater than zero".to_string());
    }
    if matches!(unit_price, Some(p) if !p.is_finite() || p <= 0.0) {
        return Err("Unit price must be greater than zero".to_string());
    }
    if matches!(total, Some(t) if !t.is_finite() || t < 0.0) {
        return Err("Total price cannot be negative".to_string());
    }
    Ok(())
}

fn validate_lead_time(days: Option<i32>) -> Result<(), String> {
    match days {
        Some(d) if d < 0 => Err("Lead time cannot be negative".to_string()),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateQuoteStatusRequest {
    pub status: QuoteStatus,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct QuoteQuery {
    pub status: Option<QuoteStatus>,
    pub vendor_id: Option<Uuid>,
    pub takeoff_item_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuoteResponse {
    pub id: Uuid,
    pub project_id: Uuid,
    pub vendor_id: Option<Uuid>,
    pub takeoff_item_id: Option<Uuid>,
    pub vendor_name: String,
    pub vendor_email: Option<String>,
    pub vendor_phone: Option<String>,
    pub item_description: String,
    pub quantity: f64,
    pub unit: String,
    pub unit_price: f64,
    pub total_price: f64,
    pub lead_time_days: Option<i32>,
    pub notes: Option<String>,
    pub status: QuoteStatus,
    pub received_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Comparison
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ComparedQuote {
    pub quote_id: Uuid,
    pub vendor_id: Option<Uuid>,
    pub vendor_name: String,
    pub vendor_rating: Option<f64>,
    pub unit_price: f64,
    pub total_price: f64,
    pub lead_time_days: Option<i32>,
    pub status: QuoteStatus,
}

/// Competing quotes for one takeoff item (or one description when unlinked)
#[derive(Debug, Clone, Serialize)]
pub struct QuoteComparisonGroup {
    pub takeoff_item_id: Option<Uuid>,
    pub item_description: String,
    pub quote_count: usize,
    pub lowest_price: f64,
    pub highest_price: f64,
    pub average_price: f64,
    pub recommended_quote_id: Option<Uuid>,
    pub recommendation_reason: Option<String>,
    pub quotes: Vec<ComparedQuote>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedQuote {
    pub rank: usize,
    pub quote_id: Uuid,
    pub vendor_name: String,
    pub item_description: String,
    pub total_price: f64,
    pub lead_time_days: Option<i32>,
    pub vendor_rating: Option<f64>,
    pub total_score: f64,
    pub price_score: f64,
    pub rating_score: f64,
    pub lead_time_score: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QuoteSummary {
    pub total_quotes: i64,
    pub pending: i64,
    pub accepted: i64,
    pub rejected: i64,
    pub pending_value: f64,
    pub accepted_value: f64,
    pub items_with_quotes: i64,
    pub items_without_quotes: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(json: &str) -> CreateQuoteRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn total_defaults_to_quantity_times_price() {
        let req = create(
            r#"{"vendor_name": "Gulf Lumber", "item_description": "2x4x8 stud",
                "quantity": 120, "unit": "EA", "unit_price": 4.5}"#,
        );
        assert!(req.validate().is_ok());
        assert_eq!(req.total(), 540.0);
    }

    #[test]
    fn quote_needs_a_vendor_and_positive_amounts() {
        let anonymous = create(
            r#"{"item_description": "Rebar", "quantity": 1, "unit": "TON", "unit_price": 900}"#,
        );
        assert!(anonymous.validate().is_err());

        let free = create(
            r#"{"vendor_name": "Acme", "item_description": "Rebar", "quantity": 1,
                "unit": "TON", "unit_price": 0}"#,
        );
        assert!(free.validate().is_err());
    }

    #[test]
    fn update_recomputes_total_when_factors_change() {
        let untouched = UpdateQuoteRequest::default();
        assert_eq!(untouched.resolve_total(10.0, 5.0, 48.0), 48.0);

        let new_qty = UpdateQuoteRequest {
            quantity: Some(12.0),
            ..Default::default()
        };
        assert_eq!(new_qty.resolve_total(10.0, 5.0, 50.0), 60.0);

        let explicit = UpdateQuoteRequest {
            quantity: Some(12.0),
            total_price: Some(55.0),
            ..Default::default()
        };
        assert_eq!(explicit.resolve_total(10.0, 5.0, 50.0), 55.0);
    }
}
