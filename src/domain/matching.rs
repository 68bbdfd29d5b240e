use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::decimal_to_f64;
use crate::services::matcher::{ConfidenceBand, MatchType, MaterialMatch};

/// Ad-hoc lookup of one description against the catalog
#[derive(Debug, Clone, Deserialize)]
pub struct MatchRequest {
    pub description: String,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub threshold: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchCandidate {
    pub material_id: Uuid,
    pub product_code: String,
    pub description: String,
    pub category: String,
    pub unit: String,
    pub unit_price: f64,
    pub confidence: f64,
    pub confidence_band: ConfidenceBand,
    pub match_type: MatchType,
    pub reasoning: String,
}

impl From<&MaterialMatch> for MatchCandidate {
    fn from(m: &MaterialMatch) -> Self {
        Self {
            material_id: m.material.id,
            product_code: m.material.product_code.clone(),
            description: m.material.description.clone(),
            category: m.material.category.clone(),
            unit: m.material.unit.clone(),
            unit_price: decimal_to_f64(m.material.unit_price),
            confidence: (m.confidence * 10_000.0).round() / 10_000.0,
            confidence_band: ConfidenceBand::of(m.confidence),
            match_type: m.match_type,
            reasoning: m.reasoning.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchResponse {
    pub description: String,
    pub inferred_category: Option<String>,
    pub matches: Vec<MatchCandidate>,
    pub best_match: Option<MatchCandidate>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProjectMatchRequest {
    #[serde(default)]
    pub threshold: Option<u32>,
    /// Persist the selected match onto each takeoff item
    #[serde(default)]
    pub apply: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TakeoffMatchResult {
    pub takeoff_item_id: Uuid,
    pub label: String,
    pub qty: f64,
    pub unit: String,
    pub best_match: Option<MatchCandidate>,
    pub suggestions: Vec<MatchCandidate>,
    pub applied: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProjectMatchSummary {
    pub total_items: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub high_confidence: usize,
    pub medium_confidence: usize,
    pub low_confidence: usize,
    pub applied: usize,
}

impl ProjectMatchSummary {
    pub fn record(&mut self, result: &TakeoffMatchResult) {
        self.total_items += 1;
        if result.applied {
            self.applied += 1;
        }
        match &result.best_match {
            Some(best) => {
                self.matched += 1;
                match best.confidence_band {
                    ConfidenceBand::High => self.high_confidence += 1,
                    ConfidenceBand::Medium => self.medium_confidence += 1,
                    ConfidenceBand::Low => self.low_confidence += 1,
                }
            }
            None => self.unmatched += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectMatchResponse {
    pub summary: ProjectMatchSummary,
    pub results: Vec<TakeoffMatchResult>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::matcher::CatalogEntry;
    use rust_decimal::Decimal;

    fn result(confidence: Option<f64>) -> TakeoffMatchResult {
        let best = confidence.map(|c| {
            MatchCandidate::from(&MaterialMatch {
                material: CatalogEntry {
                    id: Uuid::new_v4(),
                    product_code: "OSB-716".into(),
                    description: "7/16 OSB Sheathing 4x8".into(),
                    category: "Walls".into(),
                    unit: "SHT".into(),
                    unit_price: Decimal::new(1895, 2),
                },
                confidence: c,
                match_type: MatchType::Fuzzy,
                reasoning: "test".into(),
            })
        });
        TakeoffMatchResult {
            takeoff_item_id: Uuid::new_v4(),
            label: "OSB".into(),
            qty: 40.0,
            unit: "SHT".into(),
            best_match: best,
            suggestions: vec![],
            applied: false,
        }
    }

    #[test]
    fn summary_buckets_by_confidence() {
        let mut summary = ProjectMatchSummary::default();
        for c in [Some(0.95), Some(0.8), Some(0.7), Some(0.6), Some(0.3), None] {
            summary.record(&result(c));
        }
        assert_eq!(summary.total_items, 6);
        assert_eq!(summary.matched, 5);
        assert_eq!(summary.unmatched, 1);
        assert_eq!(summary.high_confidence, 2);
        assert_eq!(summary.medium_confidence, 2);
        assert_eq!(summary.low_confidence, 1);
    }

    #[test]
    fn candidate_prices_are_plain_numbers() {
        let r = result(Some(0.91234));
        let best = r.best_match.unwrap();
        assert_eq!(best.unit_price, 18.95);
        assert_eq!(best.confidence, 0.9123);
    }
}
