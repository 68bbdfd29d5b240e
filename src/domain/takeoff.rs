use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTakeoffRequest {
    pub label: String,
    #[serde(default)]
    pub qty: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub source_page: Option<i32>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub document_id: Option<Uuid>,
}

impl CreateTakeoffRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.label.trim().is_empty() {
            return Err("Label is required".to_string());
        }
        validate_qty(self.qty)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpdateTakeoffRequest {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub qty: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub source_page: Option<i32>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl UpdateTakeoffRequest {
    pub fn validate(&self) -> Result<(), String> {
        if matches!(&self.label, Some(l) if l.trim().is_empty()) {
            return Err("Label cannot be empty".to_string());
        }
        self.qty.map(validate_qty).unwrap_or(Ok(()))
    }
}

fn validate_qty(qty: f64) -> Result<(), String> {
    if !qty.is_finite() || qty < 0.0 {
        return Err("Quantity must be zero or positive".to_string());
    }
    Ok(())
}

/// Upper-cased unit, `EA` when blank
pub fn normalize_unit(unit: Option<&str>) -> String {
    unit.map(|u| u.trim().to_uppercase())
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| "EA".to_string())
}

/// Set or clear the catalog material behind a takeoff item
#[derive(Debug, Clone, Deserialize)]
pub struct SetMatchRequest {
    pub material_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TakeoffItemResponse {
    pub id: Uuid,
    pub project_id: Uuid,
    pub document_id: Option<Uuid>,
    pub label: String,
    pub qty: f64,
    pub unit: String,
    pub category: Option<String>,
    pub source_page: Option<i32>,
    pub notes: Option<String>,
    pub matched_material_id: Option<Uuid>,
    pub match_confidence: Option<f64>,
    pub unit_price: Option<f64>,
    pub total_price: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn units_default_to_each() {
        assert_eq!(normalize_unit(None), "EA");
        assert_eq!(normalize_unit(Some("  ")), "EA");
        assert_eq!(normalize_unit(Some(" lf ")), "LF");
    }

    #[test]
    fn negative_quantities_are_rejected() {
        let req: CreateTakeoffRequest =
            serde_json::from_str(r#"{"label": "2x4 studs", "qty": -3}"#).unwrap();
        assert!(req.validate().is_err());
        let req: CreateTakeoffRequest = serde_json::from_str(r#"{"label": "2x4 studs"}"#).unwrap();
        assert!(req.validate().is_ok());
    }
}
