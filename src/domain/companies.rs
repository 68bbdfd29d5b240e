use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// User role within a company
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Estimator,
    #[default]
    Member,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Estimator => "estimator",
            Self::Member => "member",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "admin" => Self::Admin,
            "estimator" => Self::Estimator,
            _ => Self::Member,
        }
    }
}

/// Response DTO for a company profile
#[derive(Debug, Clone, Serialize)]
pub struct CompanyResponse {
    pub id: Uuid,
    pub name: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request DTO for updating a company profile
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateCompanyRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
}

/// Overhead settings stored in `company_rates.overhead_json`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OverheadConfig {
    /// Percent of direct cost
    #[serde(default, alias = "base_overhead_percent")]
    pub percentage: Option<f64>,
}

/// Margin settings stored in `company_rates.margin_json`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MarginConfig {
    /// Percent of direct cost plus overhead
    #[serde(default, alias = "default_percentage")]
    pub profit_margin_target: Option<f64>,

    /// Subtotal threshold (as a decimal string key) to percentage points taken off profit
    #[serde(default)]
    pub volume_discount_tiers: BTreeMap<String, f64>,
}

/// Company rate card used by the estimator
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CompanyRates {
    /// Trade name to hourly labor rate
    #[serde(default)]
    pub labor_rates: BTreeMap<String, f64>,
    /// Equipment name to hourly rate
    #[serde(default)]
    pub equipment_rates: BTreeMap<String, f64>,
    #[serde(default)]
    pub overhead: OverheadConfig,
    #[serde(default)]
    pub margin: MarginConfig,
    #[serde(default)]
    pub sales_tax_percent: Option<f64>,
}

impl CompanyRates {
    /// Reject negative rates and out-of-range percentages.
    pub fn validate(&self) -> Result<(), String> {
        if let Some((trade, _)) = self.labor_rates.iter().find(|(_, r)| **r < 0.0) {
            return Err(format!("Labor rate for '{}' must not be negative", trade));
        }
        if let Some((name, _)) = self.equipment_rates.iter().find(|(_, r)| **r < 0.0) {
            return Err(format!("Equipment rate for '{}' must not be negative", name));
        }
        let percentages = [
            ("overhead.percentage", self.overhead.percentage),
            ("margin.profit_margin_target", self.margin.profit_margin_target),
            ("sales_tax_percent", self.sales_tax_percent),
        ];
        for (field, value) in percentages {
            if let Some(v) = value {
                if !(0.0..=100.0).contains(&v) {
                    return Err(format!("{} must be between 0 and 100", field));
                }
            }
        }
        for (threshold, discount) in &self.margin.volume_discount_tiers {
            if threshold.trim().parse::<f64>().is_err() {
                return Err(format!("Volume discount threshold '{}' is not a number", threshold));
            }
            if *discount < 0.0 {
                return Err("Volume discounts must not be negative".to_string());
            }
        }
        Ok(())
    }
}

/// Response DTO for company rates
#[derive(Debug, Clone, Serialize)]
pub struct CompanyRatesResponse {
    pub company_id: Uuid,
    #[serde(flatten)]
    pub rates: CompanyRates,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rates_accept_legacy_key_names() {
        let rates: CompanyRates = serde_json::from_value(serde_json::json!({
            "overhead": { "base_overhead_percent": 12.0 },
            "margin": { "default_percentage": 8.0, "volume_discount_tiers": { "100000": 2.0 } }
        }))
        .unwrap();
        assert_eq!(rates.overhead.percentage, Some(12.0));
        assert_eq!(rates.margin.profit_margin_target, Some(8.0));
        assert_eq!(rates.margin.volume_discount_tiers.get("100000"), Some(&2.0));
        assert!(rates.validate().is_ok());
    }

    #[test]
    fn rates_validation() {
        let mut rates = CompanyRates::default();
        rates.labor_rates.insert("carpenter".into(), -1.0);
        assert!(rates.validate().is_err());

        let mut rates = CompanyRates::default();
        rates.sales_tax_percent = Some(120.0);
        assert!(rates.validate().is_err());

        let mut rates = CompanyRates::default();
        rates
            .margin
            .volume_discount_tiers
            .insert("lots".into(), 1.0);
        assert!(rates.validate().is_err());
    }
}
