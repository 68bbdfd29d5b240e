use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateMaterialRequest {
    pub product_code: String,
    pub description: String,
    pub category: String,
    pub unit_price: f64,
    pub unit: String,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub specifications: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub lead_time_days: Option<i32>,
    #[serde(default)]
    pub minimum_order: Option<f64>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl CreateMaterialRequest {
    pub fn validate(&self) -> Result<(), String> {
        for (field, value) in [
            ("product_code", &self.product_code),
            ("description", &self.description),
            ("category", &self.category),
            ("unit", &self.unit),
        ] {
            if value.trim().is_empty() {
                return Err(format!("{} is required", field));
            }
        }
        validate_price(self.unit_price)?;
        validate_lead_time(self.lead_time_days)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpdateMaterialRequest {
    #[serde(default)]
    pub product_code: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub unit_price: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub specifications: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub lead_time_days: Option<i32>,
    #[serde(default)]
    pub minimum_order: Option<f64>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl UpdateMaterialRequest {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(price) = self.unit_price {
            validate_price(price)?;
        }
        for (field, value) in [
            ("product_code", &self.product_code),
            ("description", &self.description),
            ("category", &self.category),
            ("unit", &self.unit),
        ] {
            if matches!(value, Some(v) if v.trim().is_empty()) {
                return Err(format!("{} cannot be empty", field));
            }
        }
        validate_lead_time(self.lead_time_days)
    }
}

fn validate_price(price: f64) -> Result<(), String> {
    if !price.is_finite() || price < 0.0 {
        return Err("Unit price must be zero or positive".to_string());
    }
    Ok(())
}

fn validate_lead_time(days: Option<i32>) -> Result<(), String> {
    match days {
        Some(d) if d < 0 => Err("Lead time cannot be negative".to_string()),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MaterialQuery {
    pub category: Option<String>,
    /// Matches product code or description
    pub search: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MaterialResponse {
    pub id: Uuid,
    pub company_id: Uuid,
    pub product_code: String,
    pub description: String,
    pub category: String,
    pub unit_price: f64,
    pub unit: String,
    pub manufacturer: Option<String>,
    pub specifications: Option<String>,
    pub notes: Option<String>,
    pub lead_time_days: Option<i32>,
    pub minimum_order: Option<f64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn material_validation() {
        let json = r#"{"product_code": "LBR-2X4-8", "description": "2x4x8 SPF Stud",
                       "category": "Walls", "unit_price": 4.25, "unit": "EA"}"#;
        let req: CreateMaterialRequest = serde_json::from_str(json).unwrap();
        assert!(req.is_active);
        assert!(req.validate().is_ok());

        let mut free = req.clone();
        free.unit_price = 0.0;
        assert!(free.validate().is_ok());

        let mut negative = req.clone();
        negative.unit_price = -1.0;
        assert!(negative.validate().is_err());

        let mut blank = req;
        blank.category = " ".into();
        assert_eq!(blank.validate().unwrap_err(), "category is required");
    }
}
