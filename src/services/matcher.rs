//! Takeoff-to-catalog material matching.
//!
//! Strategy, in order:
//! 1. product code appearing as a whole token in the description (confidence 1.0)
//! 2. fuzzy description similarity with lumber-dimension, category and unit adjustments
//!
//! The matcher works on an in-memory snapshot of one company's active catalog.

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use super::similarity::{best_ratio, lumber_dimensions, normalize_description};

/// Default minimum fuzzy score (0-100)
pub const DEFAULT_THRESHOLD: u32 = 70;

/// Matches returned per item
const MAX_MATCHES: usize = 5;

/// Product codes shorter than this never count as exact matches
const MIN_CODE_LEN: usize = 3;

const CATEGORY_PENALTY: f64 = 0.15;
const UNIT_BONUS: f64 = 0.1;
const LUMBER_BONUS: u32 = 25;

pub const AUTO_ACCEPT_CONFIDENCE: f64 = 0.8;
pub const SUGGEST_CONFIDENCE: f64 = 0.7;
pub const MEDIUM_CONFIDENCE: f64 = 0.6;

/// Keyword table for category inference. First hit wins.
const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "Foundation",
        &["FOUNDATION", "FOOTING", "SLAB", "CONCRETE", "REBAR", "ANCHOR"],
    ),
    ("Walls", &["WALL", "STUD", "PLATE", "BEAM", "JOIST", "FRAMING"]),
    ("Roofing", &["ROOF", "SHINGLE", "RIDGE", "VALLEY", "DRIP EDGE"]),
    ("Siding", &["SIDING", "HARDIE", "LAP", "TRIM", "SOFFIT"]),
    ("Insulation", &["INSUL", "R-13", "R-30", "BATT"]),
    ("Drywall", &["DRYWALL", "GYPSUM", "SHEETROCK"]),
    ("Hardware", &["HANGER", "TIE", "BOLT", "SCREW", "NAIL", "LOCK"]),
    ("Trim", &["TRIM", "CROWN", "BASE", "CASING", "MOLDING"]),
];

/// One catalog material as seen by the matcher
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CatalogEntry {
    pub id: Uuid,
    pub product_code: String,
    pub description: String,
    pub category: String,
    pub unit: String,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    ExactCode,
    Fuzzy,
}

#[derive(Debug, Clone, Serialize)]
pub struct MaterialMatch {
    pub material: CatalogEntry,
    pub confidence: f64,
    pub match_type: MatchType,
    pub reasoning: String,
}

/// What to look up
#[derive(Debug, Clone, Copy)]
pub struct MatchQuery<'a> {
    pub description: &'a str,
    pub unit: Option<&'a str>,
    pub category_hint: Option<&'a str>,
    pub threshold: u32,
}

#[cfg(test)]
impl<'a> MatchQuery<'a> {
    pub fn new(description: &'a str) -> Self {
        Self {
            description,
            unit: None,
            category_hint: None,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

struct IndexedEntry {
    entry: CatalogEntry,
    normalized: String,
    lumber: Option<String>,
}

pub struct MaterialMatcher {
    catalog: Vec<IndexedEntry>,
}

impl MaterialMatcher {
    pub fn new(catalog: Vec<CatalogEntry>) -> Self {
        let catalog = catalog
            .into_iter()
            .map(|entry| IndexedEntry {
                normalized: normalize_description(&entry.description),
                lumber: lumber_dimensions(&entry.description),
                entry,
            })
            .collect();
        Self { catalog }
    }

    /// Ranked candidate materials for one description, best first, at most five.
    pub fn match_item(&self, query: &MatchQuery<'_>) -> Vec<MaterialMatch> {
        if self.catalog.is_empty() || query.description.trim().is_empty() {
            return Vec::new();
        }

        if let Some(entry) = self.exact_code_match(query.description) {
            tracing::debug!(product_code = %entry.product_code, "Exact product code match");
            return vec![MaterialMatch {
                material: entry.clone(),
                confidence: 1.0,
                match_type: MatchType::ExactCode,
                reasoning: format!("Exact product code match: {}", entry.product_code),
            }];
        }

        let normalized = normalize_description(query.description);
        let lumber = lumber_dimensions(query.description);

        let mut matches: Vec<MaterialMatch> = self
            .catalog
            .iter()
            .filter_map(|indexed| {
                let mut score = best_ratio(&normalized, &indexed.normalized);

                if lumber.is_some() && lumber == indexed.lumber {
                    score = (score + LUMBER_BONUS).min(100);
                }

                if score < query.threshold {
                    return None;
                }

                let mut confidence = f64::from(score) / 100.0;

                if let Some(hint) = query.category_hint {
                    if !hint.eq_ignore_ascii_case(&indexed.entry.category) {
                        confidence -= CATEGORY_PENALTY;
                    }
                }

                if let Some(unit) = query.unit {
                    if unit.trim().eq_ignore_ascii_case(indexed.entry.unit.trim()) {
                        confidence = (confidence + UNIT_BONUS).min(1.0);
                    }
                }

                Some(MaterialMatch {
                    material: indexed.entry.clone(),
                    confidence: confidence.max(0.0),
                    match_type: MatchType::Fuzzy,
                    reasoning: format!("Description similarity: {}%", score),
                })
            })
            .collect();

        matches.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        matches.truncate(MAX_MATCHES);
        matches
    }

    fn exact_code_match(&self, description: &str) -> Option<&CatalogEntry> {
        let haystack = description.to_uppercase();
        self.catalog
            .iter()
            .map(|indexed| &indexed.entry)
            .find(|entry| {
                let code = entry.product_code.trim().to_uppercase();
                code.chars().count() >= MIN_CODE_LEN && contains_token(&haystack, &code)
            })
    }
}

/// True when `needle` occurs in `haystack` with no alphanumeric character on either side.
fn contains_token(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// Guess a catalog category from a takeoff label and its notes.
pub fn infer_category(label: &str, notes: Option<&str>) -> Option<&'static str> {
    let text = format!("{} {}", label, notes.unwrap_or_default()).to_uppercase();
    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| text.contains(k)))
        .map(|(category, _)| *category)
}

/// Pick the match to apply automatically, if any.
///
/// The top match wins when it clears the auto-accept bar (and auto-accept is on),
/// when it is the only candidate, or when it clears the suggestion bar.
pub fn select_best(matches: &[MaterialMatch], auto_accept: bool) -> Option<&MaterialMatch> {
    let top = matches.first()?;
    if auto_accept && top.confidence >= AUTO_ACCEPT_CONFIDENCE {
        return Some(top);
    }
    if matches.len() == 1 {
        return Some(top);
    }
    if top.confidence >= SUGGEST_CONFIDENCE {
        return Some(top);
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
}

impl ConfidenceBand {
    pub fn of(confidence: f64) -> Self {
        if confidence >= AUTO_ACCEPT_CONFIDENCE {
            Self::High
        } else if confidence >= MEDIUM_CONFIDENCE {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn entry(code: &str, description: &str, category: &str, unit: &str) -> CatalogEntry {
        CatalogEntry {
            id: Uuid::new_v4(),
            product_code: code.to_string(),
            description: description.to_string(),
            category: category.to_string(),
            unit: unit.to_string(),
            unit_price: Decimal::from_str("4.25").unwrap(),
        }
    }

    fn catalog() -> MaterialMatcher {
        MaterialMatcher::new(vec![
            entry("STD248", "2x4x8 SPF Stud", "Walls", "EA"),
            entry("STD2610", "2x6x10 SPF Stud", "Walls", "EA"),
            entry("OSB716", "7/16 OSB Sheathing Panel 4x8", "Walls", "EA"),
            entry("SHG30", "Architectural Shingle Bundle", "Roofing", "BDL"),
            entry("AB58", "5/8 Anchor Bolt", "Hardware", "EA"),
        ])
    }

    #[test]
    fn product_code_in_description_is_exact() {
        let matcher = catalog();
        let matches = matcher.match_item(&MatchQuery::new("Shingles per SHG30 spec"));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].match_type, MatchType::ExactCode);
        assert_eq!(matches[0].confidence, 1.0);
        assert_eq!(matches[0].material.product_code, "SHG30");
    }

    #[test]
    fn short_or_embedded_codes_do_not_match_exactly() {
        let matcher = MaterialMatcher::new(vec![
            entry("AB", "Anchor bolt", "Hardware", "EA"),
            entry("OSB716", "OSB panel", "Walls", "EA"),
        ]);
        let matches = matcher.match_item(&MatchQuery::new("SLAB XOSB716X edge"));
        assert!(matches.iter().all(|m| m.match_type == MatchType::Fuzzy));
    }

    #[test]
    fn lumber_dimension_drives_fuzzy_match() {
        let matcher = catalog();
        let query = MatchQuery {
            unit: Some("ea"),
            category_hint: Some("Walls"),
            ..MatchQuery::new("2x4 studs")
        };
        let matches = matcher.match_item(&query);
        assert!(!matches.is_empty());
        assert_eq!(matches[0].material.product_code, "STD248");
        assert_eq!(matches[0].match_type, MatchType::Fuzzy);
        assert!(matches[0].confidence >= 0.8);
        assert!(matches[0].reasoning.starts_with("Description similarity:"));
    }

    #[test]
    fn results_are_sorted_and_capped() {
        let many: Vec<CatalogEntry> = (0..8)
            .map(|i| entry(&format!("C{i:03}"), "Concrete Ready Mix", "Foundation", "CY"))
            .collect();
        let matcher = MaterialMatcher::new(many);
        let matches = matcher.match_item(&MatchQuery::new("Concrete ready mix"));
        assert_eq!(matches.len(), 5);
        assert!(matches
            .windows(2)
            .all(|pair| pair[0].confidence >= pair[1].confidence));
    }

    #[test]
    fn category_mismatch_lowers_confidence() {
        let matcher = MaterialMatcher::new(vec![entry("X1000", "Anchor Bolt", "Hardware", "EA")]);
        let plain = matcher.match_item(&MatchQuery::new("anchor bolt"));
        let hinted = matcher.match_item(&MatchQuery {
            category_hint: Some("Foundation"),
            ..MatchQuery::new("anchor bolt")
        });
        assert_eq!(plain[0].confidence, 1.0);
        assert!((hinted[0].confidence - 0.85).abs() < 1e-9);
    }

    #[test]
    fn below_threshold_yields_nothing() {
        let matcher = catalog();
        assert!(matcher
            .match_item(&MatchQuery::new("Landscape irrigation controller"))
            .is_empty());
        assert!(MaterialMatcher::new(Vec::new())
            .match_item(&MatchQuery::new("2x4 stud"))
            .is_empty());
    }

    #[test]
    fn infers_categories_in_table_order() {
        assert_eq!(infer_category("Concrete footing", None), Some("Foundation"));
        assert_eq!(infer_category("2x6 wall studs", None), Some("Walls"));
        assert_eq!(infer_category("Item", Some("R-30 batt")), Some("Insulation"));
        // TRIM appears under Siding before Trim
        assert_eq!(infer_category("Window trim", None), Some("Siding"));
        assert_eq!(infer_category("Mobilization", None), None);
    }

    #[test]
    fn best_match_selection_rules() {
        let base = entry("A100", "x", "Walls", "EA");
        let make = |c: f64| MaterialMatch {
            material: base.clone(),
            confidence: c,
            match_type: MatchType::Fuzzy,
            reasoning: String::new(),
        };

        assert!(select_best(&[make(0.85), make(0.5)], true).is_some());
        assert!(select_best(&[make(0.75), make(0.5)], false).is_some());
        assert!(select_best(&[make(0.65), make(0.6)], true).is_none());
        assert!(select_best(&[make(0.4)], true).is_some());
        assert!(select_best(&[], true).is_none());
    }

    #[test]
    fn confidence_bands() {
        assert_eq!(ConfidenceBand::of(0.8), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::of(0.65), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::of(0.2), ConfidenceBand::Low);
    }
}
