//! Weighted scoring of competing vendor quotes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lead times are capped at this many days when scoring
const MAX_LEAD_TIME_DAYS: f64 = 90.0;

/// Score used when a quote has no lead time
const UNKNOWN_LEAD_TIME_SCORE: f64 = 0.5;

/// Tolerance on the sum of the weights
const WEIGHT_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScoreWeights {
    #[serde(default = "default_price_weight")]
    pub price_weight: f64,
    #[serde(default = "default_rating_weight")]
    pub rating_weight: f64,
    #[serde(default = "default_lead_time_weight")]
    pub lead_time_weight: f64,
}

fn default_price_weight() -> f64 {
    0.7
}

fn default_rating_weight() -> f64 {
    0.2
}

fn default_lead_time_weight() -> f64 {
    0.1
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            price_weight: default_price_weight(),
            rating_weight: default_rating_weight(),
            lead_time_weight: default_lead_time_weight(),
        }
    }
}

impl ScoreWeights {
    pub fn validate(&self) -> Result<(), String> {
        let weights = [self.price_weight, self.rating_weight, self.lead_time_weight];
        if weights.iter().any(|w| !(0.0..=1.0).contains(w)) {
            return Err("Weights must each be between 0 and 1".to_string());
        }
        let total: f64 = weights.iter().sum();
        if (total - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(format!("Criteria weights must sum to 1.0 (got {:.2})", total));
        }
        Ok(())
    }
}

/// A quote as seen by the scorer
#[derive(Debug, Clone)]
pub struct QuoteCandidate {
    pub quote_id: Uuid,
    pub total_price: f64,
    /// Vendor rating on a 0-5 scale
    pub vendor_rating: Option<f64>,
    pub lead_time_days: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuoteScore {
    pub quote_id: Uuid,
    pub total_score: f64,
    pub price_score: f64,
    pub rating_score: f64,
    pub lead_time_score: f64,
    pub rank: usize,
}

fn price_scores(candidates: &[QuoteCandidate]) -> Vec<f64> {
    let min = candidates
        .iter()
        .map(|c| c.total_price)
        .fold(f64::INFINITY, f64::min);
    let max = candidates
        .iter()
        .map(|c| c.total_price)
        .fold(f64::NEG_INFINITY, f64::max);
    let range = if max > min { max - min } else { 1.0 };

    candidates
        .iter()
        .map(|c| 1.0 - (c.total_price - min) / range)
        .collect()
}

fn lead_time_score(days: Option<i32>) -> f64 {
    match days {
        Some(d) => 1.0 - (f64::from(d.max(0)).min(MAX_LEAD_TIME_DAYS) / MAX_LEAD_TIME_DAYS),
        None => UNKNOWN_LEAD_TIME_SCORE,
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Score and rank quotes, best first.
///
/// `unknown_rating_score` is what a quote without a rated vendor gets on the
/// rating criterion.
pub fn rank_quotes(
    candidates: &[QuoteCandidate],
    weights: &ScoreWeights,
    unknown_rating_score: f64,
) -> Vec<QuoteScore> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let prices = price_scores(candidates);

    let mut scores: Vec<QuoteScore> = candidates
        .iter()
        .zip(prices)
        .map(|(candidate, price_score)| {
            let rating_score = candidate
                .vendor_rating
                .filter(|r| *r > 0.0)
                .map(|r| r.min(5.0) / 5.0)
                .unwrap_or(unknown_rating_score);
            let lead_time_score = lead_time_score(candidate.lead_time_days);

            let total = price_score * weights.price_weight
                + rating_score * weights.rating_weight
                + lead_time_score * weights.lead_time_weight;

            QuoteScore {
                quote_id: candidate.quote_id,
                total_score: round4(total),
                price_score: round4(price_score),
                rating_score: round4(rating_score),
                lead_time_score: round4(lead_time_score),
                rank: 0,
            }
        })
        .collect();

    scores.sort_by(|a, b| b.total_score.total_cmp(&a.total_score));
    for (idx, score) in scores.iter_mut().enumerate() {
        score.rank = idx + 1;
    }
    scores
}

/// Best-value quote within a comparison group, with a human-readable reason.
pub fn recommend(candidates: &[QuoteCandidate]) -> Option<(Uuid, String)> {
    let best = rank_quotes(candidates, &ScoreWeights::default(), 0.5)
        .into_iter()
        .next()?;
    Some((
        best.quote_id,
        format!("Best overall value (Score: {:.2})", best.total_score),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(price: f64, rating: Option<f64>, lead: Option<i32>) -> QuoteCandidate {
        QuoteCandidate {
            quote_id: Uuid::new_v4(),
            total_price: price,
            vendor_rating: rating,
            lead_time_days: lead,
        }
    }

    #[test]
    fn weights_must_sum_to_one() {
        assert!(ScoreWeights::default().validate().is_ok());
        let skewed = ScoreWeights {
            price_weight: 0.5,
            rating_weight: 0.2,
            lead_time_weight: 0.1,
        };
        assert!(skewed.validate().is_err());
        let close_enough = ScoreWeights {
            price_weight: 0.695,
            rating_weight: 0.2,
            lead_time_weight: 0.1,
        };
        assert!(close_enough.validate().is_ok());
    }

    #[test]
    fn cheapest_quote_scores_full_price_points() {
        let quotes = vec![
            candidate(1000.0, None, None),
            candidate(1500.0, None, None),
            candidate(2000.0, None, None),
        ];
        let ranked = rank_quotes(&quotes, &ScoreWeights::default(), 0.0);
        assert_eq!(ranked[0].quote_id, quotes[0].quote_id);
        assert_eq!(ranked[0].price_score, 1.0);
        assert_eq!(ranked[1].price_score, 0.5);
        assert_eq!(ranked[2].price_score, 0.0);
        assert_eq!(ranked.iter().map(|r| r.rank).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn equal_prices_all_score_one() {
        let quotes = vec![candidate(800.0, None, Some(10)), candidate(800.0, None, Some(40))];
        let ranked = rank_quotes(&quotes, &ScoreWeights::default(), 0.0);
        assert!(ranked.iter().all(|r| r.price_score == 1.0));
        assert_eq!(ranked[0].quote_id, quotes[0].quote_id);
    }

    #[test]
    fn rating_and_lead_time_can_outweigh_small_price_gap() {
        let cheap_slow = candidate(1000.0, None, Some(90));
        let pricier_fast = candidate(1010.0, Some(5.0), Some(0));
        let outlier = candidate(2000.0, None, None);
        let quotes = vec![cheap_slow.clone(), pricier_fast.clone(), outlier];
        let ranked = rank_quotes(&quotes, &ScoreWeights::default(), 0.0);
        assert_eq!(ranked[0].quote_id, pricier_fast.quote_id);
        assert_eq!(ranked[1].quote_id, cheap_slow.quote_id);
        // 0.7 * 0.99 + 0.2 * 1 + 0.1 * 1
        assert_eq!(ranked[0].total_score, 0.993);
    }

    #[test]
    fn lead_time_scoring() {
        assert_eq!(lead_time_score(None), 0.5);
        assert_eq!(lead_time_score(Some(0)), 1.0);
        assert_eq!(lead_time_score(Some(45)), 0.5);
        assert_eq!(lead_time_score(Some(200)), 0.0);
    }

    #[test]
    fn recommendation_reason_format() {
        let quotes = vec![candidate(500.0, None, None)];
        let (id, reason) = recommend(&quotes).unwrap();
        assert_eq!(id, quotes[0].quote_id);
        // 0.7 * 1 + 0.2 * 0.5 + 0.1 * 0.5
        assert_eq!(reason, "Best overall value (Score: 0.85)");
        assert!(recommend(&[]).is_none());
    }
}
