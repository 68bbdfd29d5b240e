//! Customer quotes stored with their lines so they can be edited and re-printed.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GeneratedQuoteStatus {
    #[default]
    Draft,
    Sent,
    Accepted,
    Rejected,
    Expired,
}

impl GeneratedQuoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "sent" => Self::Sent,
            "accepted" => Self::Accepted,
            "rejected" => Self::Rejected,
            "expired" => Self::Expired,
            _ => Self::Draft,
        }
    }
}

// ============================================================================
// Lines
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteLineInput {
    #[serde(default)]
    pub takeoff_item_id: Option<Uuid>,
    #[serde(default)]
    pub material_id: Option<Uuid>,
    /// Next free number when omitted
    #[serde(default)]
    pub line_number: Option<i32>,
    #[serde(default)]
    pub category: Option<String>,
    pub quantity: f64,
    pub unit: String,
    #[serde(default)]
    pub product_code: Option<String>,
    pub description: String,
    pub unit_price: f64,
    #[serde(default)]
    pub notes: Option<String>,
}

impl QuoteLineInput {
    pub fn validate(&self) -> Result<(), String> {
        if self.description.trim().is_empty() {
            return Err("Line description is required".to_string());
        }
        if self.unit.trim().is_empty() {
            return Err("Line unit is required".to_string());
        }
        validate_line_number(self.line_number)?;
        validate_line_amounts(Some(self.quantity), Some(self.unit_price))
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpdateQuoteLineRequest {
    #[serde(default)]
    pub line_number: Option<i32>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub product_code: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub unit_price: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl UpdateQuoteLineRequest {
    pub fn validate(&self) -> Result<(), String> {
        if matches!(&self.description, Some(d) if d.trim().is_empty()) {
            return Err("Line description cannot be empty".to_string());
        }
        if matches!(&self.unit, Some(u) if u.trim().is_empty()) {
            return Err("Line unit cannot be empty".to_string());
        }
        validate_line_number(self.line_number)?;
        validate_line_amounts(self.quantity, self.unit_price)
    }
}

fn validate_line_number(line_number: Option<i32>) -> Result<(), String> {
    if matches!(line_number, Some(n) if n < 1) {
        return Err("Line number must be at least 1".to_string());
    }
    Ok(())
}

fn validate_line_amounts(quantity: Option<f64>, unit_price: Option<f64>) -> Result<(), String> {
    if matches!(quantity, Some(q) if !q.is_finite() || q < 0.0) {
        return Err("Quantity must be zero or positive".to_string());
    }
    if matches!(unit_price, Some(p) if !p.is_finite() || p < 0.0) {
        return Err("Unit price must be zero or positive".to_string());
    }
    Ok(())
}

fn validate_tax(tax_percentage: Option<f64>) -> Result<(), String> {
    if matches!(tax_percentage, Some(t) if !t.is_finite() || !(0.0..=100.0).contains(&t)) {
        return Err("Tax percentage must be between 0 and 100".to_string());
    }
    Ok(())
}

/// Expiration may not precede the quote date.
pub fn validate_dates(quote_date: NaiveDate, expiration_date: NaiveDate) -> Result<(), String> {
    if expiration_date < quote_date {
        return Err("Expiration date cannot be before the quote date".to_string());
    }
    Ok(())
}

// ============================================================================
// Quotes
// ============================================================================

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CustomerDetails {
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_company: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_phone: Option<String>,
    #[serde(default)]
    pub delivery_address: Option<String>,
}

impl CustomerDetails {
    fn validate(&self) -> Result<(), String> {
        if matches!(&self.customer_email, Some(e) if !e.trim().is_empty() && !e.contains('@')) {
            return Err("Customer email is not valid".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateGeneratedQuoteRequest {
    /// Generated from the quote date when omitted
    #[serde(default)]
    pub quote_number: Option<String>,
    #[serde(default)]
    pub quote_date: Option<NaiveDate>,
    #[serde(default)]
    pub expiration_date: Option<NaiveDate>,
    #[serde(flatten)]
    pub customer: CustomerDetails,
    /// Defaults to the project name
    #[serde(default)]
    pub job_name: Option<String>,
    #[serde(default)]
    pub job_reference: Option<String>,
    #[serde(default)]
    pub tax_percentage: Option<f64>,
    #[serde(default)]
    pub special_instructions: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub lines: Vec<QuoteLineInput>,
}

impl CreateGeneratedQuoteRequest {
    pub fn validate(&self) -> Result<(), String> {
        if matches!(&self.quote_number, Some(n) if n.trim().is_empty()) {
            return Err("Quote number cannot be empty".to_string());
        }
        if let (Some(quote_date), Some(expiration)) = (self.quote_date, self.expiration_date) {
            validate_dates(quote_date, expiration)?;
        }
        self.customer.validate()?;
        validate_tax(self.tax_percentage)?;
        for (i, line) in self.lines.iter().enumerate() {
            line.validate().map_err(|e| format!("Line {}: {}", i + 1, e))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct QuoteFromTakeoffsRequest {
    /// Every takeoff item of the project when omitted
    #[serde(default)]
    pub takeoff_item_ids: Option<Vec<Uuid>>,
    #[serde(flatten)]
    pub customer: CustomerDetails,
    #[serde(default)]
    pub job_name: Option<String>,
    #[serde(default)]
    pub job_reference: Option<String>,
    #[serde(default)]
    pub tax_percentage: Option<f64>,
    #[serde(default)]
    pub expiration_days: Option<i64>,
    #[serde(default)]
    pub special_instructions: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl QuoteFromTakeoffsRequest {
    pub fn validate(&self) -> Result<(), String> {
        if matches!(&self.takeoff_item_ids, Some(ids) if ids.is_empty()) {
            return Err("takeoff_item_ids cannot be empty".to_string());
        }
        if matches!(self.expiration_days, Some(d) if !(1..=365).contains(&d)) {
            return Err("Expiration days must be between 1 and 365".to_string());
        }
        self.customer.validate()?;
        validate_tax(self.tax_percentage)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpdateGeneratedQuoteRequest {
    #[serde(default)]
    pub quote_date: Option<NaiveDate>,
    #[serde(default)]
    pub expiration_date: Option<NaiveDate>,
    #[serde(flatten)]
    pub customer: CustomerDetails,
    #[serde(default)]
    pub job_name: Option<String>,
    #[serde(default)]
    pub job_reference: Option<String>,
    #[serde(default)]
    pub tax_percentage: Option<f64>,
    #[serde(default)]
    pub status: Option<GeneratedQuoteStatus>,
    #[serde(default)]
    pub special_instructions: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl UpdateGeneratedQuoteRequest {
    pub fn validate(&self) -> Result<(), String> {
        if matches!(&self.job_name, Some(n) if n.trim().is_empty()) {
            return Err("Job name cannot be empty".to_string());
        }
        self.customer.validate()?;
        validate_tax(self.tax_percentage)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct GeneratedQuoteQuery {
    pub status: Option<GeneratedQuoteStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuoteLineResponse {
    pub id: Uuid,
    pub line_number: i32,
    pub takeoff_item_id: Option<Uuid>,
    pub material_id: Option<Uuid>,
    pub category: Option<String>,
    pub quantity: f64,
    pub unit: String,
    pub product_code: Option<String>,
    pub description: String,
    pub unit_price: f64,
    pub total_price: f64,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedQuoteResponse {
    pub id: Uuid,
    pub project_id: Uuid,
    pub created_by: Option<Uuid>,
    pub quote_number: String,
    pub quote_date: NaiveDate,
    pub expiration_date: NaiveDate,
    pub customer_name: Option<String>,
    pub customer_company: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub delivery_address: Option<String>,
    pub job_name: String,
    pub job_reference: Option<String>,
    pub subtotal: f64,
    pub tax_percentage: f64,
    pub tax_amount: f64,
    pub total: f64,
    pub status: GeneratedQuoteStatus,
    pub special_instructions: Option<String>,
    pub notes: Option<String>,
    /// Present on single-quote responses only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines: Option<Vec<QuoteLineResponse>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(quantity: f64, unit_price: f64) -> QuoteLineInput {
        QuoteLineInput {
            takeoff_item_id: None,
            material_id: None,
            line_number: None,
            category: Some("Framing".into()),
            quantity,
            unit: "EA".into(),
            product_code: Some("2X4-8".into()),
            description: "2x4x8 SPF stud".into(),
            unit_price,
            notes: None,
        }
    }

    #[test]
    fn create_request_reads_flat_customer_fields() {
        let req: CreateGeneratedQuoteRequest = serde_json::from_value(serde_json::json!({
            "customer_name": "Riverside Health",
            "customer_email": "buyer@riverside.example",
            "quote_date": "2024-07-01",
            "lines": [{"quantity": 10, "unit": "EA", "description": "Stud", "unit_price": 3.5}]
        }))
        .unwrap();
        assert_eq!(req.customer.customer_name.as_deref(), Some("Riverside Health"));
        assert_eq!(req.lines.len(), 1);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn expiration_cannot_precede_quote_date() {
        let july = |d| NaiveDate::from_ymd_opt(2024, 7, d).unwrap();
        assert!(validate_dates(july(1), july(1)).is_ok());
        assert!(validate_dates(july(8), july(1)).is_err());
    }

    #[test]
    fn bad_lines_are_reported_by_position() {
        let req = CreateGeneratedQuoteRequest {
            quote_number: None,
            quote_date: None,
            expiration_date: None,
            customer: CustomerDetails::default(),
            job_name: None,
            job_reference: None,
            tax_percentage: None,
            special_instructions: None,
            notes: None,
            lines: vec![line(1.0, 2.0), line(-3.0, 2.0)],
        };
        assert_eq!(req.validate().unwrap_err(), "Line 2: Quantity must be zero or positive");
    }

    #[test]
    fn tax_and_expiry_window_are_bounded() {
        let mut req = QuoteFromTakeoffsRequest {
            tax_percentage: Some(101.0),
            ..Default::default()
        };
        assert!(req.validate().is_err());
        req.tax_percentage = Some(8.25);
        req.expiration_days = Some(0);
        assert!(req.validate().is_err());
        req.expiration_days = Some(30);
        assert!(req.validate().is_ok());
        req.takeoff_item_ids = Some(vec![]);
        assert!(req.validate().is_err());
    }

    #[test]
    fn status_falls_back_to_draft() {
        assert_eq!(GeneratedQuoteStatus::parse("accepted"), GeneratedQuoteStatus::Accepted);
        assert_eq!(GeneratedQuoteStatus::parse("bogus"), GeneratedQuoteStatus::Draft);
        assert!(UpdateQuoteLineRequest {
            line_number: Some(0),
            ..Default::default()
        }
        .validate()
        .is_err());
    }
}
