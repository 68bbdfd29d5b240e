//! Plan parsing pipeline.
//!
//! Vision first: render the leading pages, ask the model for a JSON takeoff
//! and normalise whatever comes back. When the model is not configured or
//! the vision path fails, fall back to plain text extraction so the caller
//! still gets something to work from.

use chrono::Utc;
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::parsing::{
    BidItem, ParseMethod, ParsedPlan, PlanMaterial, PlanParseResult, ProjectInfo, SpecReference,
};
use crate::error::ApiError;
use crate::services::ai_client::AiClient;
use crate::services::pdf_pages::{self, PdfRasterizer};

pub const DEFAULT_UNIT: &str = "EA";

pub const PLAN_PROMPT: &str = r#"You are analyzing a construction plan document. Extract the following information:

1. Bid Items: every bid item with its item number, description, quantity and unit.
2. Specifications: any specification codes or references (for example ASTM, AASHTO).
3. Project Details: project name, location and bid date if visible.
4. Materials: specific materials mentioned, with quantities.

Return only JSON in this format:
{
  "bid_items": [
    {"item_number": "101", "description": "Clearing and Grubbing", "quantity": 1.0, "unit": "LS", "unit_price": null, "page": 1}
  ],
  "specifications": [
    {"code": "ASTM C150", "description": "Portland Cement"}
  ],
  "project_info": {"name": "Highway 90 Expansion", "location": "Lafayette, LA", "bid_date": "2024-03-15"},
  "materials": [
    {"name": "Concrete", "quantity": 500, "unit": "CY", "specification": "ASTM C150"}
  ]
}

Only include items explicitly shown in the documents. Use null or empty arrays when information is missing."#;

// ============================================================================
// JSON extraction
// ============================================================================

fn fence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").expect("fence regex is valid")
    })
}

/// Pull a JSON object out of a model answer.
///
/// Accepts a bare object, an object inside a markdown code fence, or the
/// outermost `{...}` span of surrounding prose.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    for captures in fence_regex().captures_iter(trimmed) {
        if let Some(body) = captures.get(1) {
            if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(body.as_str().trim())
            {
                return Some(value);
            }
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&trimmed[start..=end]) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

// ============================================================================
// Normalisation
// ============================================================================

fn number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("number regex is valid"))
}

/// Read a quantity the way estimators write them: `1200`, `"1,200 LF"`, `"2.5"`.
/// Missing, unreadable and non-positive quantities come back as zero.
pub fn parse_quantity(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => {
            let cleaned = s.replace(',', "");
            number_regex()
                .find(&cleaned)
                .and_then(|m| m.as_str().parse::<f64>().ok())
        }
        _ => None,
    };
    parsed.filter(|q| q.is_finite() && *q > 0.0).unwrap_or(0.0)
}

fn text_field(obj: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match obj.get(*key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Upper-case a unit, defaulting to each.
pub fn normalize_unit(unit: Option<String>) -> String {
    unit.map(|u| u.trim().trim_end_matches('.').to_uppercase())
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| DEFAULT_UNIT.to_string())
}

fn array<'a>(root: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    root.get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|v| v.is_object())
}

/// Turn the model's loosely typed JSON into a [`ParsedPlan`].
///
/// Items without a description are dropped.
pub fn normalize_plan(root: &Value) -> ParsedPlan {
    let bid_items = array(root, "bid_items")
        .filter_map(|item| {
            let description = text_field(item, &["description", "name"])?;
            Some(BidItem {
                item_number: text_field(item, &["item_number", "item_no", "number"]),
                description,
                quantity: parse_quantity(item.get("quantity")),
                unit: normalize_unit(text_field(item, &["unit"])),
                unit_price: item
                    .get("unit_price")
                    .map(|v| parse_quantity(Some(v)))
                    .filter(|p| *p > 0.0),
                source_page: item
                    .get("page")
                    .and_then(Value::as_i64)
                    .and_then(|p| i32::try_from(p).ok())
                    .filter(|p| *p > 0),
            })
        })
        .collect();

    let materials = array(root, "materials")
        .filter_map(|item| {
            Some(PlanMaterial {
                name: text_field(item, &["name", "description"])?,
                quantity: parse_quantity(item.get("quantity")),
                unit: normalize_unit(text_field(item, &["unit"])),
                specification: text_field(item, &["specification"]),
            })
        })
        .collect();

    let specifications = array(root, "specifications")
        .filter_map(|spec| {
            Some(SpecReference {
                code: text_field(spec, &["code"])?,
                description: text_field(spec, &["description"]),
            })
        })
        .collect();

    let project_info = root
        .get("project_info")
        .map(|info| ProjectInfo {
            name: text_field(info, &["name"]),
            location: text_field(info, &["location"]),
            bid_date: text_field(info, &["bid_date"]),
        })
        .unwrap_or_default();

    ParsedPlan {
        bid_items,
        specifications,
        project_info,
        materials,
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Parses plan PDFs with the vision model, falling back to text extraction.
#[derive(Clone)]
pub struct PlanParser {
    ai: AiClient,
    rasterizer: PdfRasterizer,
}

impl PlanParser {
    pub fn new(ai: AiClient, rasterizer: PdfRasterizer) -> Self {
        Self { ai, rasterizer }
    }

    pub fn ai(&self) -> &AiClient {
        &self.ai
    }

    pub fn rasterizer(&self) -> &PdfRasterizer {
        &self.rasterizer
    }

    #[instrument(skip(self, pdf), fields(bytes = pdf.len()))]
    pub async fn parse(
        &self,
        document_id: Uuid,
        pdf: Vec<u8>,
        max_pages: u32,
    ) -> Result<PlanParseResult, ApiError> {
        let pdf = Arc::new(pdf);
        let mut warnings = Vec::new();

        if self.ai.is_configured() {
            match self.parse_with_vision(pdf.clone(), max_pages).await {
                Ok((plan, pages_analyzed, page_count)) => {
                    info!(
                        %document_id,
                        pages_analyzed,
                        bid_items = plan.bid_items.len(),
                        materials = plan.materials.len(),
                        "Plan parsed with vision model"
                    );
                    return Ok(PlanParseResult {
                        document_id,
                        method: ParseMethod::Vision,
                        pages_analyzed,
                        page_count: Some(page_count),
                        plan,
                        raw_text: Vec::new(),
                        warnings,
                        parsed_at: Utc::now(),
                        cached: false,
                    });
                }
                Err(err) => {
                    warn!(%document_id, error = %err, "Vision parsing failed, falling back to text");
                    warnings.push(format!("Vision parsing failed: {}", err));
                }
            }
        } else {
            warnings.push("Vision model not configured; used text extraction".to_string());
        }

        let page_count = pdf_pages::page_count(pdf.clone()).await.ok();
        let raw_text = pdf_pages::extract_text(pdf, max_pages).await?;
        if raw_text.is_empty() {
            return Err(ApiError::unprocessable(
                "No text could be extracted from the document",
            ));
        }

        info!(%document_id, pages = raw_text.len(), "Plan parsed with text extraction");
        Ok(PlanParseResult {
            document_id,
            method: ParseMethod::Text,
            pages_analyzed: raw_text.len() as u32,
            page_count,
            plan: ParsedPlan::default(),
            raw_text,
            warnings,
            parsed_at: Utc::now(),
            cached: false,
        })
    }

    async fn parse_with_vision(
        &self,
        pdf: Arc<Vec<u8>>,
        max_pages: u32,
    ) -> Result<(ParsedPlan, u32, u32), ApiError> {
        let rendered = self.rasterizer.render_pages(pdf, max_pages).await?;
        if rendered.images.is_empty() {
            return Err(ApiError::unprocessable("Document has no renderable pages"));
        }

        let answer = self.ai.analyze_images(PLAN_PROMPT, &rendered.images).await?;
        let json = extract_json(&answer)
            .ok_or_else(|| ApiError::unprocessable("Could not parse JSON from model response"))?;

        Ok((
            normalize_plan(&json),
            rendered.images.len() as u32,
            rendered.page_count,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_bare_json() {
        let value = extract_json(r#"  {"bid_items": []}  "#).unwrap();
        assert!(value["bid_items"].is_array());
    }

    #[test]
    fn extracts_fenced_json() {
        let answer = "Here is the takeoff:\n```json\n{\"bid_items\": [{\"description\": \"Riprap\"}]}\n```\nLet me know.";
        let value = extract_json(answer).unwrap();
        assert_eq!(value["bid_items"][0]["description"], "Riprap");
    }

    #[test]
    fn extracts_outermost_braces_from_prose() {
        let answer = "I found these items {\"materials\": [{\"name\": \"Rebar\"}]} on sheet S1.";
        let value = extract_json(answer).unwrap();
        assert_eq!(value["materials"][0]["name"], "Rebar");
    }

    #[test]
    fn rejects_answers_without_an_object() {
        assert!(extract_json("No bid items were visible.").is_none());
        assert!(extract_json("[1, 2, 3]").is_none());
        assert!(extract_json("} backwards {").is_none());
    }

    #[test]
    fn quantity_parsing() {
        assert_eq!(parse_quantity(Some(&json!(1200))), 1200.0);
        assert_eq!(parse_quantity(Some(&json!("1,200 LF"))), 1200.0);
        assert_eq!(parse_quantity(Some(&json!("2.5"))), 2.5);
        assert_eq!(parse_quantity(Some(&json!(-4))), 0.0);
        assert_eq!(parse_quantity(Some(&json!("TBD"))), 0.0);
        assert_eq!(parse_quantity(Some(&Value::Null)), 0.0);
        assert_eq!(parse_quantity(None), 0.0);
    }

    #[test]
    fn normalizes_loose_model_output() {
        let raw = json!({
            "bid_items": [
                {"item_number": 101, "description": " Clearing and Grubbing ", "quantity": "1", "unit": "ls", "page": 2},
                {"item_number": "102", "description": "", "quantity": 5},
                {"description": "Class A Concrete", "quantity": "1,250", "unit": null, "unit_price": "450.00"},
                "not an object"
            ],
            "materials": [
                {"name": "Rebar #5", "quantity": 12000, "unit": "lb", "specification": "ASTM A615"},
                {"quantity": 3}
            ],
            "specifications": [{"code": "ASTM C150", "description": "Portland Cement"}, {"description": "no code"}],
            "project_info": {"name": "Highway 90 Expansion", "location": null}
        });

        let plan = normalize_plan(&raw);
        assert_eq!(plan.bid_items.len(), 2);

        let first = &plan.bid_items[0];
        assert_eq!(first.item_number.as_deref(), Some("101"));
        assert_eq!(first.description, "Clearing and Grubbing");
        assert_eq!(first.quantity, 1.0);
        assert_eq!(first.unit, "LS");
        assert_eq!(first.source_page, Some(2));

        let concrete = &plan.bid_items[1];
        assert_eq!(concrete.quantity, 1250.0);
        assert_eq!(concrete.unit, "EA");
        assert_eq!(concrete.unit_price, Some(450.0));

        assert_eq!(plan.materials.len(), 1);
        assert_eq!(plan.materials[0].unit, "LB");
        assert_eq!(plan.specifications.len(), 1);
        assert_eq!(plan.project_info.name.as_deref(), Some("Highway 90 Expansion"));
        assert_eq!(plan.project_info.location, None);
    }

    #[test]
    fn missing_sections_normalize_to_empty() {
        let plan = normalize_plan(&json!({}));
        assert_eq!(plan, ParsedPlan::default());
    }
}
