use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VendorCategory {
    Rental,
    Subcontractor,
    OutsideService,
    MaterialSupplier,
}

impl VendorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rental => "rental",
            Self::Subcontractor => "subcontractor",
            Self::OutsideService => "outside_service",
            Self::MaterialSupplier => "material_supplier",
        }
    }

    /// Lenient parse for CSV input ("Material Supplier", "outside-service")
    pub fn parse(s: &str) -> Option<Self> {
        let key = s.trim().to_lowercase().replace([' ', '-'], "_");
        match key.as_str() {
            "rental" => Some(Self::Rental),
            "subcontractor" => Some(Self::Subcontractor),
            "outside_service" => Some(Self::OutsideService),
            "material_supplier" | "supplier" => Some(Self::MaterialSupplier),
            _ => None,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateVendorRequest {
    pub name: String,
    pub category: VendorCategory,
    #[serde(default)]
    pub contact_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address_line1: Option<String>,
    #[serde(default)]
    pub address_line2: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub zip_code: Option<String>,
    #[serde(default)]
    pub license_number: Option<String>,
    #[serde(default)]
    pub insurance_expiry: Option<NaiveDate>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub is_preferred: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

impl CreateVendorRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Vendor name is required".to_string());
        }
        validate_email(self.email.as_deref())?;
        validate_rating(self.rating)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpdateVendorRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub category: Option<VendorCategory>,
    #[serde(default)]
    pub contact_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address_line1: Option<String>,
    #[serde(default)]
    pub address_line2: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub zip_code: Option<String>,
    #[serde(default)]
    pub license_number: Option<String>,
    #[serde(default)]
    pub insurance_expiry: Option<NaiveDate>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub is_preferred: Option<bool>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl UpdateVendorRequest {
    pub fn validate(&self) -> Result<(), String> {
        if matches!(&self.name, Some(n) if n.trim().is_empty()) {
            return Err("Vendor name cannot be empty".to_string());
        }
        validate_email(self.email.as_deref())?;
        validate_rating(self.rating)
    }
}

fn validate_rating(rating: Option<f64>) -> Result<(), String> {
    match rating {
        Some(r) if !(0.0..=5.0).contains(&r) => Err("Rating must be between 0 and 5".to_string()),
        _ => Ok(()),
    }
}

fn validate_email(email: Option<&str>) -> Result<(), String> {
    match email.map(str::trim) {
        Some(e) if !e.is_empty() && !e.contains('@') => {
            Err(format!("'{}' is not a valid email address", e))
        }
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct VendorQuery {
    pub category: Option<VendorCategory>,
    pub is_active: Option<bool>,
    pub is_preferred: Option<bool>,
    /// Matches name, contact or email
    pub search: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VendorResponse {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub category: String,
    pub contact_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub license_number: Option<String>,
    pub insurance_expiry: Option<NaiveDate>,
    pub rating: Option<f64>,
    pub is_preferred: bool,
    pub is_active: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lenient_category_parsing() {
        assert_eq!(
            VendorCategory::parse("Material Supplier"),
            Some(VendorCategory::MaterialSupplier)
        );
        assert_eq!(
            VendorCategory::parse("outside-service"),
            Some(VendorCategory::OutsideService)
        );
        assert_eq!(VendorCategory::parse("caterer"), None);
    }

    #[test]
    fn rating_bounds() {
        let req: CreateVendorRequest = serde_json::from_str(
            r#"{"name": "Gulf Lumber", "category": "material_supplier", "rating": 5}"#,
        )
        .unwrap();
        assert!(req.validate().is_ok());
        assert!(req.is_active);
        assert!(!req.is_preferred);

        let update = UpdateVendorRequest {
            rating: Some(5.5),
            ..Default::default()
        };
        assert!(update.validate().is_err());
    }

    #[test]
    fn email_must_look_like_one() {
        let update = UpdateVendorRequest {
            email: Some("sales at gulf".into()),
            ..Default::default()
        };
        assert!(update.validate().is_err());
    }
}
