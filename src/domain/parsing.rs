//! Plan parsing domain types
//!
//! Structured output of reading a plan set, either through the vision model
//! or through plain text extraction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_MAX_PAGES: u32 = 5;
pub const MAX_PAGES_LIMIT: u32 = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParseMethod {
    Vision,
    Text,
}

impl ParseMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vision => "vision",
            Self::Text => "text",
        }
    }
}

/// A priced or quantified line from the plan's bid schedule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BidItem {
    pub item_number: Option<String>,
    pub description: String,
    pub quantity: f64,
    pub unit: String,
    pub unit_price: Option<f64>,
    pub source_page: Option<i32>,
}

/// A referenced standard or specification section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpecReference {
    pub code: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProjectInfo {
    pub name: Option<String>,
    pub location: Option<String>,
    pub bid_date: Option<String>,
}

/// A material called out on the drawings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanMaterial {
    pub name: String,
    pub quantity: f64,
    pub unit: String,
    pub specification: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ParsedPlan {
    pub bid_items: Vec<BidItem>,
    pub specifications: Vec<SpecReference>,
    pub project_info: ProjectInfo,
    pub materials: Vec<PlanMaterial>,
}

/// A takeoff row derived from a parsed plan
#[derive(Debug, Clone, PartialEq)]
pub struct TakeoffDraft {
    pub label: String,
    pub qty: f64,
    pub unit: String,
    pub notes: Option<String>,
    pub source_page: Option<i32>,
}

impl ParsedPlan {
    /// One draft per bid item; the materials list is used only when there are no bid items.
    pub fn takeoff_drafts(&self) -> Vec<TakeoffDraft> {
        if !self.bid_items.is_empty() {
            return self
                .bid_items
                .iter()
                .filter(|item| !item.description.trim().is_empty())
                .map(|item| TakeoffDraft {
                    label: item.description.trim().to_string(),
                    qty: item.quantity.max(0.0),
                    unit: draft_unit(&item.unit),
                    notes: item
                        .item_number
                        .as_deref()
                        .map(str::trim)
                        .filter(|n| !n.is_empty())
                        .map(|n| format!("Item #{}", n)),
                    source_page: item.source_page,
                })
                .collect();
        }

        self.materials
            .iter()
            .filter(|m| !m.name.trim().is_empty())
            .map(|m| TakeoffDraft {
                label: m.name.trim().to_string(),
                qty: m.quantity.max(0.0),
                unit: draft_unit(&m.unit),
                notes: m.specification.clone().filter(|s| !s.trim().is_empty()),
                source_page: None,
            })
            .collect()
    }
}

fn draft_unit(unit: &str) -> String {
    let unit = unit.trim().to_uppercase();
    if unit.is_empty() {
        "EA".to_string()
    } else {
        unit
    }
}

/// Text of one page, used when the vision model is unavailable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageText {
    pub page: u32,
    pub text: String,
}

/// Result of parsing one document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanParseResult {
    pub document_id: Uuid,
    pub method: ParseMethod,
    pub pages_analyzed: u32,
    pub page_count: Option<u32>,
    pub plan: ParsedPlan,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub raw_text: Vec<PageText>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub parsed_at: DateTime<Utc>,
    #[serde(default)]
    pub cached: bool,
}

/// Query parameters for the parse endpoints
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ParseQuery {
    pub max_pages: Option<u32>,
    /// Skip the cache and parse again
    #[serde(default)]
    pub refresh: bool,
}

impl ParseQuery {
    pub fn max_pages(&self) -> Result<u32, String> {
        let pages = self.max_pages.unwrap_or(DEFAULT_MAX_PAGES);
        if !(1..=MAX_PAGES_LIMIT).contains(&pages) {
            return Err(format!(
                "max_pages must be between 1 and {}",
                MAX_PAGES_LIMIT
            ));
        }
        Ok(pages)
    }
}

/// Response for parse-and-save
#[derive(Debug, Clone, Serialize)]
pub struct ParseAndSaveResponse {
    pub document_id: Uuid,
    pub method: ParseMethod,
    pub pages_analyzed: u32,
    pub takeoff_items_created: usize,
    pub takeoff_item_ids: Vec<Uuid>,
    pub warnings: Vec<String>,
}

/// Response for the AI status check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiStatusResponse {
    pub vision_configured: bool,
    pub model: Option<String>,
    pub pdf_renderer_available: bool,
    pub text_fallback_available: bool,
    pub preferred_method: ParseMethod,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_pages_defaults_and_bounds() {
        assert_eq!(ParseQuery::default().max_pages(), Ok(5));
        let q = |n| ParseQuery {
            max_pages: Some(n),
            refresh: false,
        };
        assert_eq!(q(10).max_pages(), Ok(10));
        assert!(q(0).max_pages().is_err());
        assert!(q(11).max_pages().is_err());
    }

    fn bid_item(number: Option<&str>, description: &str, quantity: f64, unit: &str) -> BidItem {
        BidItem {
            item_number: number.map(str::to_string),
            description: description.to_string(),
            quantity,
            unit: unit.to_string(),
            unit_price: None,
            source_page: Some(2),
        }
    }

    #[test]
    fn drafts_come_from_bid_items_first() {
        let plan = ParsedPlan {
            bid_items: vec![
                bid_item(Some("12"), " Concrete curb ", 120.0, "lf"),
                bid_item(None, "   ", 5.0, "EA"),
            ],
            materials: vec![PlanMaterial {
                name: "Rebar".to_string(),
                quantity: 3.0,
                unit: "TON".to_string(),
                specification: None,
            }],
            ..Default::default()
        };

        let drafts = plan.takeoff_drafts();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].label, "Concrete curb");
        assert_eq!(drafts[0].unit, "LF");
        assert_eq!(drafts[0].notes.as_deref(), Some("Item #12"));
        assert_eq!(drafts[0].source_page, Some(2));
    }

    #[test]
    fn drafts_fall_back_to_materials() {
        let plan = ParsedPlan {
            materials: vec![PlanMaterial {
                name: "2x4 studs".to_string(),
                quantity: -1.0,
                unit: "".to_string(),
                specification: Some("KD-HF".to_string()),
            }],
            ..Default::default()
        };

        let drafts = plan.takeoff_drafts();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].qty, 0.0);
        assert_eq!(drafts[0].unit, "EA");
        assert_eq!(drafts[0].notes.as_deref(), Some("KD-HF"));
    }
}
