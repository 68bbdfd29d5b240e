//! Cost roll-up for a project's takeoff.
//!
//! Each takeoff line is priced from an accepted vendor quote, a catalog material,
//! or not at all. Labor and equipment are derived from quantity and unit.
//! Overhead, profit and tax are then layered on the direct cost.

use rust_decimal::prelude::*;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::companies::CompanyRates;

pub const DEFAULT_OVERHEAD_PERCENT: Decimal = Decimal::from_parts(15, 0, 0, false, 0);
pub const DEFAULT_PROFIT_PERCENT: Decimal = Decimal::from_parts(10, 0, 0, false, 0);
pub const DEFAULT_TAX_PERCENT: Decimal = Decimal::from_parts(9, 0, 0, false, 0);
pub const DEFAULT_LABOR_RATE: Decimal = Decimal::from_parts(35, 0, 0, false, 0);
pub const DEFAULT_EQUIPMENT_RATE: Decimal = Decimal::from_parts(75, 0, 0, false, 0);

/// Equipment hours per labor hour (0.25)
const EQUIPMENT_HOURS_RATIO: Decimal = Decimal::from_parts(25, 0, 0, false, 2);

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Labor hours per unit of quantity
pub fn productivity_hours(unit: &str) -> Decimal {
    let (mantissa, scale) = match unit.trim().to_uppercase().as_str() {
        "CY" => (5, 1),
        "SY" => (2, 1),
        "LF" => (1, 1),
        "EA" => (20, 1),
        "LS" => (400, 1),
        "TON" => (3, 1),
        _ => (5, 1),
    };
    Decimal::new(mantissa, scale)
}

/// Round to cents, midpoint away from zero
pub fn money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn from_f64(value: f64) -> Option<Decimal> {
    Decimal::from_f64(value)
}

fn mean_rate(rates: impl Iterator<Item = f64>) -> Option<Decimal> {
    let positive: Vec<Decimal> = rates.filter(|r| *r > 0.0).filter_map(from_f64).collect();
    if positive.is_empty() {
        return None;
    }
    Some(positive.iter().copied().sum::<Decimal>() / Decimal::from(positive.len()))
}

/// Caller-supplied switches and overrides for one estimate run
#[derive(Debug, Clone)]
pub struct EstimateOptions {
    pub apply_overhead: bool,
    pub apply_profit: bool,
    pub materials_only: bool,
    pub overhead_percentage: Option<Decimal>,
    pub profit_percentage: Option<Decimal>,
    pub tax_percentage: Option<Decimal>,
}

impl Default for EstimateOptions {
    fn default() -> Self {
        Self {
            apply_overhead: true,
            apply_profit: true,
            materials_only: false,
            overhead_percentage: None,
            profit_percentage: None,
            tax_percentage: None,
        }
    }
}

/// Effective rates after merging company settings with request overrides
#[derive(Debug, Clone, PartialEq)]
pub struct RateCard {
    pub labor_rate: Decimal,
    pub equipment_rate: Decimal,
    pub overhead_percentage: Decimal,
    pub profit_percentage: Decimal,
    /// (threshold, percentage points off profit), highest threshold first
    pub volume_discounts: Vec<(Decimal, Decimal)>,
    pub tax_percentage: Decimal,
}

impl RateCard {
    pub fn resolve(company: Option<&CompanyRates>, options: &EstimateOptions) -> Self {
        let labor_rate = company
            .and_then(|c| mean_rate(c.labor_rates.values().copied()))
            .unwrap_or(DEFAULT_LABOR_RATE);
        let equipment_rate = company
            .and_then(|c| mean_rate(c.equipment_rates.values().copied()))
            .unwrap_or(DEFAULT_EQUIPMENT_RATE);

        let overhead_percentage = options
            .overhead_percentage
            .or_else(|| company.and_then(|c| c.overhead.percentage).and_then(from_f64))
            .unwrap_or(DEFAULT_OVERHEAD_PERCENT);

        let profit_percentage = options
            .profit_percentage
            .or_else(|| {
                company
                    .and_then(|c| c.margin.profit_margin_target)
                    .and_then(from_f64)
            })
            .unwrap_or(DEFAULT_PROFIT_PERCENT);

        let tax_percentage = options
            .tax_percentage
            .or_else(|| company.and_then(|c| c.sales_tax_percent).and_then(from_f64))
            .unwrap_or(DEFAULT_TAX_PERCENT);

        let mut volume_discounts: Vec<(Decimal, Decimal)> = company
            .map(|c| {
                c.margin
                    .volume_discount_tiers
                    .iter()
                    .filter_map(|(threshold, discount)| {
                        Some((Decimal::from_str(threshold.trim()).ok()?, from_f64(*discount)?))
                    })
                    .collect()
            })
            .unwrap_or_default();
        volume_discounts.sort_by(|a, b| b.0.cmp(&a.0));

        Self {
            labor_rate,
            equipment_rate,
            overhead_percentage,
            profit_percentage,
            volume_discounts,
            tax_percentage,
        }
    }

    /// Profit percentage after the largest volume discount the subtotal qualifies for.
    pub fn discounted_profit_percentage(&self, subtotal_with_overhead: Decimal) -> Decimal {
        let discount = self
            .volume_discounts
            .iter()
            .find(|(threshold, _)| subtotal_with_overhead >= *threshold)
            .map(|(_, discount)| *discount)
            .unwrap_or(Decimal::ZERO);
        (self.profit_percentage - discount).max(Decimal::ZERO)
    }
}

/// One takeoff line to be priced
#[derive(Debug, Clone)]
pub struct TakeoffLine {
    pub id: Uuid,
    pub label: String,
    pub qty: Decimal,
    pub unit: String,
    pub category: Option<String>,
}

/// Where a line's material cost comes from
#[derive(Debug, Clone)]
pub enum CostBasis {
    AcceptedQuote {
        quote_id: Uuid,
        vendor_name: String,
        total_price: Decimal,
    },
    Catalog {
        material_id: Uuid,
        description: String,
        category: String,
        unit_price: Decimal,
        confidence: f64,
        auto_matched: bool,
    },
    Unpriced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostSource {
    Quote,
    Catalog,
    AutoMatch,
    Unmatched,
}

#[derive(Debug, Clone)]
pub struct PricedLine {
    pub takeoff_item_id: Uuid,
    pub label: String,
    pub qty: Decimal,
    pub unit: String,
    pub category: Option<String>,
    pub source: CostSource,
    pub material_id: Option<Uuid>,
    pub quote_id: Option<Uuid>,
    pub priced_as: Option<String>,
    pub unit_price: Option<Decimal>,
    pub material_cost: Decimal,
    pub labor_hours: Decimal,
    pub labor_cost: Decimal,
    pub equipment_cost: Decimal,
    pub confidence: f64,
}

impl PricedLine {
    pub fn is_priced(&self) -> bool {
        self.source != CostSource::Unmatched
    }

    pub fn line_total(&self) -> Decimal {
        self.material_cost + self.labor_cost + self.equipment_cost
    }
}

pub fn price_line(
    line: &TakeoffLine,
    basis: CostBasis,
    rates: &RateCard,
    options: &EstimateOptions,
) -> PricedLine {
    let qty = line.qty.max(Decimal::ZERO);

    let mut priced = PricedLine {
        takeoff_item_id: line.id,
        label: line.label.clone(),
        qty,
        unit: line.unit.clone(),
        category: line.category.clone(),
        source: CostSource::Unmatched,
        material_id: None,
        quote_id: None,
        priced_as: None,
        unit_price: None,
        material_cost: Decimal::ZERO,
        labor_hours: Decimal::ZERO,
        labor_cost: Decimal::ZERO,
        equipment_cost: Decimal::ZERO,
        confidence: 0.0,
    };

    match basis {
        CostBasis::AcceptedQuote {
            quote_id,
            vendor_name,
            total_price,
        } => {
            priced.source = CostSource::Quote;
            priced.quote_id = Some(quote_id);
            priced.priced_as = Some(format!("Quote from {}", vendor_name));
            priced.material_cost = money(total_price);
            if !qty.is_zero() {
                priced.unit_price = Some(total_price / qty);
            }
            priced.confidence = 1.0;
        }
        CostBasis::Catalog {
            material_id,
            description,
            category,
            unit_price,
            confidence,
            auto_matched,
        } => {
            priced.source = if auto_matched {
                CostSource::AutoMatch
            } else {
                CostSource::Catalog
            };
            priced.material_id = Some(material_id);
            priced.priced_as = Some(description);
            priced.category = priced.category.or(Some(category));
            priced.unit_price = Some(unit_price);
            priced.material_cost = money(qty * unit_price);
            priced.confidence = confidence;
        }
        CostBasis::Unpriced => {}
    }

    if !options.materials_only {
        let hours = qty * productivity_hours(&line.unit);
        priced.labor_hours = hours.round_dp(2);
        priced.labor_cost = money(hours * rates.labor_rate);
        priced.equipment_cost = money(hours * EQUIPMENT_HOURS_RATIO * rates.equipment_rate);
    }

    priced
}

#[derive(Debug, Clone)]
pub struct CostBreakdown {
    pub materials_cost: Decimal,
    pub labor_cost: Decimal,
    pub equipment_cost: Decimal,
    pub subcontractor_cost: Decimal,
    pub direct_cost: Decimal,
    pub overhead_percentage: Decimal,
    pub overhead: Decimal,
    pub profit_percentage: Decimal,
    pub profit: Decimal,
    pub total_cost: Decimal,
    pub tax_percentage: Decimal,
    pub tax_amount: Decimal,
    pub grand_total: Decimal,
    pub labor_hours: Decimal,
    pub total_items: usize,
    pub priced_items: usize,
    pub confidence_score: f64,
    pub lines: Vec<PricedLine>,
}

impl CostBreakdown {
    pub fn unpriced_labels(&self) -> impl Iterator<Item = &str> {
        self.lines
            .iter()
            .filter(|l| !l.is_priced())
            .map(|l| l.label.as_str())
    }

    pub fn summary_note(&self) -> String {
        format!(
            "Generated from {} takeoff items. {} matched, {} unmatched.",
            self.total_items,
            self.priced_items,
            self.total_items - self.priced_items
        )
    }
}

/// Roll priced lines up into the estimate totals.
///
/// Every component is rounded to cents before it feeds the next step so the
/// reported figures always add up.
pub fn roll_up(lines: Vec<PricedLine>, rates: &RateCard, options: &EstimateOptions) -> CostBreakdown {
    let materials_cost: Decimal = lines.iter().map(|l| l.material_cost).sum();
    let labor_cost: Decimal = lines.iter().map(|l| l.labor_cost).sum();
    let equipment_cost: Decimal = lines.iter().map(|l| l.equipment_cost).sum();
    let labor_hours: Decimal = lines.iter().map(|l| l.labor_hours).sum();
    let subcontractor_cost = Decimal::ZERO;

    let direct_cost = materials_cost + labor_cost + equipment_cost + subcontractor_cost;

    let overhead_percentage = if options.apply_overhead {
        rates.overhead_percentage
    } else {
        Decimal::ZERO
    };
    let overhead = money(direct_cost * overhead_percentage / HUNDRED);
    let subtotal = direct_cost + overhead;

    let profit_percentage = if options.apply_profit {
        rates.discounted_profit_percentage(subtotal)
    } else {
        Decimal::ZERO
    };
    let profit = money(subtotal * profit_percentage / HUNDRED);
    let total_cost = subtotal + profit;

    let tax_amount = money(total_cost * rates.tax_percentage / HUNDRED);
    let grand_total = total_cost + tax_amount;

    let total_items = lines.len();
    let priced_items = lines.iter().filter(|l| l.is_priced()).count();
    let confidence_score = if total_items == 0 {
        0.0
    } else {
        priced_items as f64 / total_items as f64
    };

    CostBreakdown {
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
        tax_percentage: rates.tax_percentage,
        tax_amount,
        grand_total,
        labor_hours,
        total_items,
        priced_items,
        confidence_score,
        lines,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn line(label: &str, qty: &str, unit: &str) -> TakeoffLine {
        TakeoffLine {
            id: Uuid::new_v4(),
            label: label.to_string(),
            qty: dec(qty),
            unit: unit.to_string(),
            category: None,
        }
    }

    fn catalog(unit_price: &str) -> CostBasis {
        CostBasis::Catalog {
            material_id: Uuid::new_v4(),
            description: "Catalog item".to_string(),
            category: "Walls".to_string(),
            unit_price: dec(unit_price),
            confidence: 1.0,
            auto_matched: false,
        }
    }

    fn materials_only() -> EstimateOptions {
        EstimateOptions {
            materials_only: true,
            ..EstimateOptions::default()
        }
    }

    #[test]
    fn line_total_is_quantity_times_unit_price() {
        let options = materials_only();
        let rates = RateCard::resolve(None, &options);
        let priced = price_line(&line("2x4 stud", "120", "EA"), catalog("4.25"), &rates, &options);
        assert_eq!(priced.material_cost, dec("510.00"));
        assert_eq!(priced.labor_cost, Decimal::ZERO);
        assert_eq!(priced.source, CostSource::Catalog);
    }

    #[test]
    fn default_overhead_profit_and_tax() {
        let options = materials_only();
        let rates = RateCard::resolve(None, &options);
        let lines = vec![price_line(&line("Slab", "10", "CY"), catalog("100"), &rates, &options)];
        let b = roll_up(lines, &rates, &options);

        assert_eq!(b.direct_cost, dec("1000"));
        assert_eq!(b.overhead, dec("150.00"));
        assert_eq!(b.profit, dec("115.00"));
        assert_eq!(b.total_cost, dec("1265.00"));
        assert_eq!(b.tax_amount, dec("113.85"));
        assert_eq!(b.grand_total, dec("1378.85"));
        assert_eq!(b.confidence_score, 1.0);
    }

    #[test]
    fn labor_and_equipment_follow_unit_productivity() {
        let options = EstimateOptions::default();
        let rates = RateCard::resolve(None, &options);
        let priced = price_line(&line("Footing", "10", "CY"), CostBasis::Unpriced, &rates, &options);

        // 10 CY * 0.5 h = 5 h at 35/h, equipment 5 * 0.25 * 75
        assert_eq!(priced.labor_hours, dec("5.00"));
        assert_eq!(priced.labor_cost, dec("175.00"));
        assert_eq!(priced.equipment_cost, dec("93.75"));
        assert_eq!(priced.material_cost, Decimal::ZERO);
        assert!(!priced.is_priced());
    }

    #[test]
    fn accepted_quote_overrides_catalog_price() {
        let options = materials_only();
        let rates = RateCard::resolve(None, &options);
        let priced = price_line(
            &line("Trusses", "4", "EA"),
            CostBasis::AcceptedQuote {
                quote_id: Uuid::new_v4(),
                vendor_name: "Acme Truss".to_string(),
                total_price: dec("2000"),
            },
            &rates,
            &options,
        );
        assert_eq!(priced.source, CostSource::Quote);
        assert_eq!(priced.material_cost, dec("2000.00"));
        assert_eq!(priced.unit_price, Some(dec("500")));
    }

    #[test]
    fn company_rates_and_overrides() {
        let mut labor = BTreeMap::new();
        labor.insert("carpenter".to_string(), 40.0);
        labor.insert("laborer".to_string(), 30.0);
        let mut tiers = BTreeMap::new();
        tiers.insert("1000".to_string(), 2.0);
        tiers.insert("5000".to_string(), 4.0);

        let company = CompanyRates {
            labor_rates: labor,
            equipment_rates: BTreeMap::new(),
            overhead: crate::domain::companies::OverheadConfig {
                percentage: Some(12.0),
            },
            margin: crate::domain::companies::MarginConfig {
                profit_margin_target: Some(10.0),
                volume_discount_tiers: tiers,
            },
            sales_tax_percent: Some(7.5),
        };

        let rates = RateCard::resolve(Some(&company), &EstimateOptions::default());
        assert_eq!(rates.labor_rate, dec("35"));
        assert_eq!(rates.equipment_rate, DEFAULT_EQUIPMENT_RATE);
        assert_eq!(rates.overhead_percentage, dec("12"));
        assert_eq!(rates.tax_percentage, dec("7.5"));
        assert_eq!(rates.discounted_profit_percentage(dec("999")), dec("10"));
        assert_eq!(rates.discounted_profit_percentage(dec("1200")), dec("8"));
        assert_eq!(rates.discounted_profit_percentage(dec("6000")), dec("6"));

        let overridden = RateCard::resolve(
            Some(&company),
            &EstimateOptions {
                overhead_percentage: Some(dec("20")),
                ..EstimateOptions::default()
            },
        );
        assert_eq!(overridden.overhead_percentage, dec("20"));
    }

    #[test]
    fn disabled_overhead_and_profit_contribute_nothing() {
        let options = EstimateOptions {
            apply_overhead: false,
            apply_profit: false,
            materials_only: true,
            ..EstimateOptions::default()
        };
        let rates = RateCard::resolve(None, &options);
        let lines = vec![price_line(&line("Bolts", "100", "EA"), catalog("2"), &rates, &options)];
        let b = roll_up(lines, &rates, &options);
        assert_eq!(b.overhead, Decimal::ZERO);
        assert_eq!(b.profit, Decimal::ZERO);
        assert_eq!(b.total_cost, dec("200"));
    }

    #[test]
    fn confidence_counts_priced_lines() {
        let options = materials_only();
        let rates = RateCard::resolve(None, &options);
        let lines = vec![
            price_line(&line("A", "1", "EA"), catalog("10"), &rates, &options),
            price_line(&line("B", "1", "EA"), CostBasis::Unpriced, &rates, &options),
            price_line(&line("C", "1", "EA"), CostBasis::Unpriced, &rates, &options),
            price_line(&line("D", "1", "EA"), catalog("5"), &rates, &options),
        ];
        let b = roll_up(lines, &rates, &options);
        assert_eq!(b.confidence_score, 0.5);
        assert_eq!(b.unpriced_labels().collect::<Vec<_>>(), vec!["B", "C"]);
        assert_eq!(
            b.summary_note(),
            "Generated from 4 takeoff items. 2 matched, 2 unmatched."
        );
    }

    #[test]
    fn productivity_table() {
        assert_eq!(productivity_hours("ls"), dec("40"));
        assert_eq!(productivity_hours("TON"), dec("0.3"));
        assert_eq!(productivity_hours("SF"), dec("0.5"));
    }
}
