//! Reconciles a project's bid schedule against its plan takeoff.
//!
//! Lines are paired by word-order-insensitive similarity. A bid line with no
//! takeoff partner is a missing item, a takeoff line with no bid partner is an
//! extra item, and each pair whose quantities differ by more than the
//! tolerance is a quantity mismatch.

use uuid::Uuid;

use super::similarity::token_sort_ratio;
use crate::domain::discrepancies::{DiscrepancyType, Severity};

/// Minimum token-sort score (0-100) for two lines to describe the same work
pub const MATCH_THRESHOLD: u32 = 70;

/// Quantity differences up to this percentage are accepted
pub const QUANTITY_TOLERANCE_PERCENT: f64 = 5.0;

#[derive(Debug, Clone)]
pub struct BidLine<'a> {
    pub id: Uuid,
    pub description: &'a str,
    pub quantity: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct PlanLine<'a> {
    pub id: Uuid,
    pub label: &'a str,
    pub quantity: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub bid_item_id: Option<Uuid>,
    pub takeoff_item_id: Option<Uuid>,
    pub kind: DiscrepancyType,
    pub severity: Severity,
    pub bid_quantity: Option<f64>,
    pub plan_quantity: Option<f64>,
    pub difference_percentage: Option<f64>,
    pub description: String,
    pub recommendation: &'static str,
}

fn same_work(a: &str, b: &str) -> Option<u32> {
    let score = token_sort_ratio(a, b);
    (score >= MATCH_THRESHOLD).then_some(score)
}

/// Percentage difference of the plan quantity relative to the bid, to 2dp.
pub fn difference_percentage(bid: f64, plan: f64) -> f64 {
    let diff = if bid > 0.0 {
        ((plan - bid) / bid * 100.0).abs()
    } else if plan > 0.0 {
        100.0
    } else {
        0.0
    };
    (diff * 100.0).round() / 100.0
}

pub fn mismatch_severity(difference: f64) -> Severity {
    if difference >= 20.0 {
        Severity::Critical
    } else if difference >= 10.0 {
        Severity::High
    } else {
        Severity::Medium
    }
}

fn quantity_mismatch(bid: &BidLine<'_>, plan: &PlanLine<'_>) -> Option<Finding> {
    let bid_qty = bid.quantity.filter(|q| *q != 0.0)?;
    if plan.quantity == 0.0 {
        return None;
    }

    let difference = difference_percentage(bid_qty, plan.quantity);
    if difference <= QUANTITY_TOLERANCE_PERCENT {
        return None;
    }

    Some(Finding {
        bid_item_id: Some(bid.id),
        takeoff_item_id: Some(plan.id),
        kind: DiscrepancyType::QuantityMismatch,
        severity: mismatch_severity(difference),
        bid_quantity: Some(bid_qty),
        plan_quantity: Some(plan.quantity),
        difference_percentage: Some(difference),
        description: format!(
            "Quantity mismatch for '{}': bid {}, plan {}",
            bid.description, bid_qty, plan.quantity
        ),
        recommendation: "Verify quantities against the plans and adjust the bid if necessary",
    })
}

/// All findings for one project: bid lines in order, then unmatched takeoff lines.
pub fn detect(bids: &[BidLine<'_>], plan: &[PlanLine<'_>]) -> Vec<Finding> {
    let mut findings = Vec::new();

    for bid in bids {
        let mut partners: Vec<(&PlanLine<'_>, u32)> = plan
            .iter()
            .filter_map(|line| same_work(bid.description, line.label).map(|s| (line, s)))
            .collect();

        if partners.is_empty() {
            findings.push(Finding {
                bid_item_id: Some(bid.id),
                takeoff_item_id: None,
                kind: DiscrepancyType::MissingItem,
                severity: Severity::High,
                bid_quantity: bid.quantity,
                plan_quantity: None,
                difference_percentage: None,
                description: format!("Bid item '{}' not found in the takeoff", bid.description),
                recommendation: "Verify that this item is required and shown on the plans",
            });
            continue;
        }

        partners.sort_by(|a, b| b.1.cmp(&a.1));
        findings.extend(
            partners
                .into_iter()
                .filter_map(|(line, _)| quantity_mismatch(bid, line)),
        );
    }

    for line in plan {
        let covered = bids
            .iter()
            .any(|bid| same_work(bid.description, line.label).is_some());
        if !covered {
            findings.push(Finding {
                bid_item_id: None,
                takeoff_item_id: Some(line.id),
                kind: DiscrepancyType::ExtraItem,
                severity: Severity::Medium,
                bid_quantity: None,
                plan_quantity: Some(line.quantity),
                difference_percentage: None,
                description: format!("Takeoff item '{}' not found in the bid schedule", line.label),
                recommendation: "Consider whether this item needs to be added to the bid",
            });
        }
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bid(n: u128, description: &'static str, quantity: Option<f64>) -> BidLine<'static> {
        BidLine {
            id: Uuid::from_u128(n),
            description,
            quantity,
        }
    }

    fn plan(n: u128, label: &'static str, quantity: f64) -> PlanLine<'static> {
        PlanLine {
            id: Uuid::from_u128(n),
            label,
            quantity,
        }
    }

    #[test]
    fn severity_bands() {
        assert_eq!(mismatch_severity(6.0), Severity::Medium);
        assert_eq!(mismatch_severity(10.0), Severity::High);
        assert_eq!(mismatch_severity(19.99), Severity::High);
        assert_eq!(mismatch_severity(20.0), Severity::Critical);
    }

    #[test]
    fn difference_is_relative_to_the_bid() {
        assert_eq!(difference_percentage(100.0, 120.0), 20.0);
        assert_eq!(difference_percentage(300.0, 290.0), 3.33);
        assert_eq!(difference_percentage(0.0, 5.0), 100.0);
        assert_eq!(difference_percentage(0.0, 0.0), 0.0);
    }

    #[test]
    fn matching_lines_within_tolerance_are_clean() {
        let bids = [bid(1, "Concrete Slab 4 inch", Some(100.0))];
        let takeoff = [plan(10, "4 inch concrete slab", 104.0)];
        assert!(detect(&bids, &takeoff).is_empty());
    }

    #[test]
    fn quantity_mismatch_is_graded() {
        let bids = [bid(1, "Asphalt Paving", Some(1000.0))];
        let takeoff = [plan(10, "asphalt paving", 1150.0)];

        let findings = detect(&bids, &takeoff);
        assert_eq!(findings.len(), 1);
        let finding = &findings[0];
        assert_eq!(finding.kind, DiscrepancyType::QuantityMismatch);
        assert_eq!(finding.severity, Severity::High);
        assert_eq!(finding.difference_percentage, Some(15.0));
        assert_eq!(finding.bid_item_id, Some(Uuid::from_u128(1)));
        assert_eq!(finding.takeoff_item_id, Some(Uuid::from_u128(10)));
    }

    #[test]
    fn missing_and_extra_items() {
        let bids = [
            bid(1, "Storm Drain Inlet", Some(4.0)),
            bid(2, "Silt Fence", None),
        ];
        let takeoff = [
            plan(10, "storm drain inlet", 4.0),
            plan(11, "Chain link fence gate", 2.0),
        ];

        let findings = detect(&bids, &takeoff);
        let kinds: Vec<_> = findings.iter().map(|f| (f.kind, f.severity)).collect();
        assert_eq!(
            kinds,
            vec![
                (DiscrepancyType::MissingItem, Severity::High),
                (DiscrepancyType::ExtraItem, Severity::Medium),
            ]
        );
        assert_eq!(findings[0].bid_item_id, Some(Uuid::from_u128(2)));
        assert_eq!(findings[1].takeoff_item_id, Some(Uuid::from_u128(11)));
        assert_eq!(findings[1].plan_quantity, Some(2.0));
    }

    #[test]
    fn unquantified_lines_are_not_compared() {
        let bids = [bid(1, "Traffic Control", None)];
        let takeoff = [plan(10, "traffic control", 1.0)];
        assert!(detect(&bids, &takeoff).is_empty());

        let bids = [bid(1, "Traffic Control", Some(1.0))];
        let takeoff = [plan(10, "traffic control", 0.0)];
        assert!(detect(&bids, &takeoff).is_empty());
    }

    #[test]
    fn empty_schedule_flags_every_takeoff_line() {
        let takeoff = [plan(10, "Rebar #5", 2.5), plan(11, "Form release", 1.0)];
        let findings = detect(&[], &takeoff);
        assert_eq!(findings.len(), 2);
        assert!(findings.iter().all(|f| f.kind == DiscrepancyType::ExtraItem));
    }
}
