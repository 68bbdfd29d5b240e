//! Estimate requests and the persisted breakdown.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{decimal_to_f64, f64_to_decimal};
use crate::services::estimator::{CostBreakdown, CostSource, EstimateOptions, PricedLine};
use crate::services::matcher::DEFAULT_THRESHOLD;

fn default_threshold() -> u32 {
    DEFAULT_THRESHOLD
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateEstimateRequest {
    #[serde(default = "default_threshold")]
    pub match_threshold: u32,
    #[serde(default = "default_true")]
    pub auto_accept_high_confidence: bool,
    #[serde(default = "default_true")]
    pub apply_overhead: bool,
    #[serde(default = "default_true")]
    pub apply_profit: bool,
    #[serde(default)]
    pub materials_only: bool,
    #[serde(default)]
    pub overhead_percentage: Option<f64>,
    #[serde(default)]
    pub profit_percentage: Option<f64>,
    #[serde(default)]
    pub tax_percentage: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Default for CreateEstimateRequest {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_THRESHOLD,
            auto_accept_high_confidence: true,
            apply_overhead: true,
            apply_profit: true,
            materials_only: false,
            overhead_percentage: None,
            profit_percentage: None,
            tax_percentage: None,
            notes: None,
        }
    }
}

impl CreateEstimateRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.match_threshold > 100 {
            return Err("match_threshold must be between 0 and 100".to_string());
        }
        for (field, value) in [
            ("overhead_percentage", self.overhead_percentage),
            ("profit_percentage", self.profit_percentage),
            ("tax_percentage", self.tax_percentage),
        ] {
            if matches!(value, Some(v) if !(0.0..=100.0).contains(&v)) {
                return Err(format!("{} must be between 0 and 100", field));
            }
        }
        Ok(())
    }

    pub fn options(&self) -> EstimateOptions {
        EstimateOptions {
            apply_overhead: self.apply_overhead,
            apply_profit: self.apply_profit,
            materials_only: self.materials_only,
            overhead_percentage: self.overhead_percentage.and_then(f64_to_decimal),
            profit_percentage: self.profit_percentage.and_then(f64_to_decimal),
            tax_percentage: self.tax_percentage.and_then(f64_to_decimal),
        }
    }
}

/// One priced line as stored in `estimates.line_items`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimateLineItem {
    pub takeoff_item_id: Uuid,
    pub label: String,
    pub qty: f64,
    pub unit: String,
    pub category: Option<String>,
    pub source: CostSource,
    pub material_id: Option<Uuid>,
    pub quote_id: Option<Uuid>,
    pub priced_as: Option<String>,
    pub unit_price: Option<f64>,
    pub material_cost: f64,
    pub labor_hours: f64,
    pub labor_cost: f64,
    pub equipment_cost: f64,
    pub line_total: f64,
    pub confidence: f64,
}

impl From<&PricedLine> for EstimateLineItem {
    fn from(line: &PricedLine) -> Self {
        Self {
            takeoff_item_id: line.takeoff_item_id,
            label: line.label.clone(),
            qty: decimal_to_f64(line.qty),
            unit: line.unit.clone(),
            category: line.category.clone(),
            source: line.source,
            material_id: line.material_id,
            quote_id: line.quote_id,
            priced_as: line.priced_as.clone(),
            unit_price: line.unit_price.map(|p| decimal_to_f64(p.round_dp(4))),
            material_cost: decimal_to_f64(line.material_cost),
            labor_hours: decimal_to_f64(line.labor_hours),
            labor_cost: decimal_to_f64(line.labor_cost),
            equipment_cost: decimal_to_f64(line.equipment_cost),
            line_total: decimal_to_f64(line.line_total()),
            confidence: line.confidence,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EstimateBreakdown {
    pub materials_cost: f64,
    pub labor_cost: f64,
    pub equipment_cost: f64,
    pub subcontractor_cost: f64,
    pub direct_cost: f64,
    pub overhead_percentage: f64,
    pub overhead: f64,
    pub profit_percentage: f64,
    pub profit: f64,
    pub total_cost: f64,
    pub tax_percentage: f64,
    pub tax_amount: f64,
    pub grand_total: f64,
}

impl EstimateBreakdown {
    /// Build from the stored decimal columns, in column order.
    pub fn from_columns(columns: [Decimal; 13]) -> Self {
        let [materials_cost, labor_cost, equipment_cost, subcontractor_cost, direct_cost, overhead_percentage, overhead, profit_percentage, profit, total_cost, tax_percentage, tax_amount, grand_total] =
            columns.map(decimal_to_f64);
        Self {
            materials_cost,
            labor_cost,
            equipment_cost,
            subcontractor_cost,
            direct_cost,
            overhead_percentage,
            overhead,
            profit_percentage,
            profit,
            total_cost,
            tax_percentage,
            tax_amount,
            grand_total,
        }
    }
}

impl From<&CostBreakdown> for EstimateBreakdown {
    fn from(b: &CostBreakdown) -> Self {
        Self::from_columns([
            b.materials_cost,
            b.labor_cost,
            b.equipment_cost,
            b.subcontractor_cost,
            b.direct_cost,
            b.overhead_percentage,
            b.overhead,
            b.profit_percentage,
            b.profit,
            b.total_cost,
            b.tax_percentage,
            b.tax_amount,
            b.grand_total,
        ])
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EstimateResponse {
    pub id: Uuid,
    pub project_id: Uuid,
    pub created_by: Option<Uuid>,
    #[serde(flatten)]
    pub breakdown: EstimateBreakdown,
    pub confidence_score: f64,
    pub line_items: Vec<EstimateLineItem>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EstimateSummary {
    pub total_items: usize,
    pub matched_items: usize,
    pub unmatched_items: usize,
    pub quoted_items: usize,
    pub auto_matched_items: usize,
    pub labor_hours: f64,
}

impl From<&CostBreakdown> for EstimateSummary {
    fn from(b: &CostBreakdown) -> Self {
        let count = |source: CostSource| b.lines.iter().filter(|l| l.source == source).count();
        Self {
            total_items: b.total_items,
            matched_items: b.priced_items,
            unmatched_items: b.total_items - b.priced_items,
            quoted_items: count(CostSource::Quote),
            auto_matched_items: count(CostSource::AutoMatch),
            labor_hours: decimal_to_f64(b.labor_hours),
        }
    }
}

/// Warnings surfaced with a new estimate
pub fn estimate_warnings(breakdown: &CostBreakdown) -> Vec<String> {
    breakdown
        .unpriced_labels()
        .take(5)
        .map(|label| format!("No price found for '{}'", label))
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateEstimateResponse {
    pub estimate: EstimateResponse,
    pub summary: EstimateSummary,
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::estimator::{price_line, roll_up, CostBasis, RateCard, TakeoffLine};

    #[test]
    fn request_defaults() {
        let req: CreateEstimateRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.match_threshold, 70);
        assert!(req.auto_accept_high_confidence);
        assert!(req.apply_overhead && req.apply_profit);
        assert!(!req.materials_only);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn request_bounds() {
        let req = CreateEstimateRequest {
            tax_percentage: Some(101.0),
            ..Default::default()
        };
        assert!(req.validate().is_err());
        let req = CreateEstimateRequest {
            match_threshold: 101,
            ..Default::default()
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn warnings_list_first_five_unpriced_items() {
        let options = EstimateOptions::default();
        let rates = RateCard::resolve(None, &options);
        let lines = (0..7)
            .map(|i| {
                let line = TakeoffLine {
                    id: Uuid::new_v4(),
                    label: format!("Item {}", i),
                    qty: Decimal::ONE,
                    unit: "EA".into(),
                    category: None,
                };
                price_line(&line, CostBasis::Unpriced, &rates, &options)
            })
            .collect();
        let breakdown = roll_up(lines, &rates, &options);

        let warnings = estimate_warnings(&breakdown);
        assert_eq!(warnings.len(), 5);
        assert_eq!(warnings[0], "No price found for 'Item 0'");

        let summary = EstimateSummary::from(&breakdown);
        assert_eq!(summary.unmatched_items, 7);
        assert_eq!(summary.matched_items, 0);
    }
}
