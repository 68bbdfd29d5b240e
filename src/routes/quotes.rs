//! Vendor quotes: capture, acceptance, comparison and ranking.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::vendors::find_vendor;
use super::{require_project, trimmed, validated};
use crate::api::{Created, DataResponse, MessageResponse, Paginated, PaginationParams};
use crate::app::AppState;
use crate::auth::RequireTenant;
use crate::domain::quotes::{
    ComparedQuote, CreateQuoteRequest, QuoteComparisonGroup, QuoteQuery, QuoteResponse,
    QuoteStatus, QuoteSummary, RankedQuote, UpdateQuoteRequest, UpdateQuoteStatusRequest,
};
use crate::domain::{decimal_to_f64, f64_to_decimal};
use crate::error::ApiError;
use crate::services::estimator::money;
use crate::services::quote_scoring::{rank_quotes, recommend, QuoteCandidate, ScoreWeights};

#[derive(Debug, Clone, sqlx::FromRow)]
struct QuoteRow {
    id: Uuid,
    project_id: Uuid,
    vendor_id: Option<Uuid>,
    takeoff_item_id: Option<Uuid>,
    vendor_name: String,
    vendor_email: Option<String>,
    vendor_phone: Option<String>,
    item_description: String,
    quantity: Decimal,
    unit: String,
    unit_price: Decimal,
    total_price: Decimal,
    lead_time_days: Option<i32>,
    notes: Option<String>,
    status: String,
    received_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<QuoteRow> for QuoteResponse {
    fn from(row: QuoteRow) -> Self {
        Self {
            id: row.id,
            project_id: row.project_id,
            vendor_id: row.vendor_id,
            takeoff_item_id: row.takeoff_item_id,
            vendor_name: row.vendor_name,
            vendor_email: row.vendor_email,
            vendor_phone: row.vendor_phone,
            item_description: row.item_description,
            quantity: decimal_to_f64(row.quantity),
            unit: row.unit,
            unit_price: decimal_to_f64(row.unit_price),
            total_price: decimal_to_f64(row.total_price),
            lead_time_days: row.lead_time_days,
            notes: row.notes,
            status: QuoteStatus::parse(&row.status),
            received_at: row.received_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const QUOTE_COLUMNS: &str = "id, project_id, vendor_id, takeoff_item_id, vendor_name, vendor_email, \
     vendor_phone, item_description, quantity, unit, unit_price, total_price, lead_time_days, notes, \
     status, received_at, created_at, updated_at";

/// Quote joined with its vendor's current rating
#[derive(Debug, Clone, sqlx::FromRow)]
struct RatedQuote {
    id: Uuid,
    vendor_id: Option<Uuid>,
    takeoff_item_id: Option<Uuid>,
    vendor_name: String,
    item_description: String,
    unit_price: Decimal,
    total_price: Decimal,
    lead_time_days: Option<i32>,
    status: String,
    vendor_rating: Option<Decimal>,
}

impl RatedQuote {
    fn candidate(&self) -> QuoteCandidate {
        QuoteCandidate {
            quote_id: self.id,
            total_price: decimal_to_f64(self.total_price),
            vendor_rating: self.vendor_rating.map(decimal_to_f64),
            lead_time_days: self.lead_time_days,
        }
    }
}

fn amount(value: f64, field: &str) -> Result<Decimal, ApiError> {
    f64_to_decimal(value).ok_or_else(|| ApiError::bad_request(format!("{} is not a valid amount", field)))
}

async fn require_takeoff_item(
    state: &AppState,
    project_id: Uuid,
    takeoff_item_id: Uuid,
) -> Result<(), ApiError> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM takeoff_items WHERE id = $1 AND project_id = $2)",
    )
    .bind(takeoff_item_id)
    .bind(project_id)
    .fetch_one(&state.db)
    .await?;

    if !exists {
        return Err(ApiError::not_found("Takeoff item not found in this project"));
    }
    Ok(())
}

/// POST /projects/:project_id/quotes
pub async fn create_quote(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path(project_id): Path<Uuid>,
    Json(req): Json<CreateQuoteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validated(req.validate())?;
    require_project(&state.db, tenant.company_id, project_id).await?;

    if let Some(takeoff_item_id) = req.takeoff_item_id {
        require_takeoff_item(&state, project_id, takeoff_item_id).await?;
    }

    // A directory vendor supplies the contact details unless the request overrides them
    let (vendor_name, vendor_email, vendor_phone) = match req.vendor_id {
        Some(vendor_id) => {
            let vendor = find_vendor(&state.db, tenant.company_id, vendor_id)
                .await?
                .ok_or_else(|| ApiError::not_found("Vendor not found"))?;
            (
                vendor.name,
                trimmed(req.vendor_email.clone()).or(vendor.email),
                trimmed(req.vendor_phone.clone()).or(vendor.phone),
            )
        }
        None => (
            trimmed(req.vendor_name.clone()).unwrap_or_default(),
            trimmed(req.vendor_email.clone()),
            trimmed(req.vendor_phone.clone()),
        ),
    };

    let quantity = amount(req.quantity, "quantity")?;
    let unit_price = amount(req.unit_price, "unit_price")?;
    let total_price = money(amount(req.total(), "total_price")?);

    let row: QuoteRow = sqlx::query_as(&format!(
        r#"
        INSERT INTO quotes (project_id, vendor_id, takeoff_item_id, vendor_name, vendor_email,
                            vendor_phone, item_description, quantity, unit, unit_price, total_price,
                            lead_time_days, notes, received_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, COALESCE($14, NOW()))
        RETURNING {}
        "#,
        QUOTE_COLUMNS
    ))
    .bind(project_id)
    .bind(req.vendor_id)
    .bind(req.takeoff_item_id)
    .bind(&vendor_name)
    .bind(&vendor_email)
    .bind(&vendor_phone)
    .bind(req.item_description.trim())
    .bind(quantity)
    .bind(req.unit.trim())
    .bind(unit_price)
    .bind(total_price)
    .bind(req.lead_time_days)
    .bind(trimmed(req.notes))
    .bind(req.received_at)
    .fetch_one(&state.db)
    .await?;

    tracing::info!(
        user_id = %tenant.user_id,
        project_id = %project_id,
        quote_id = %row.id,
        vendor = %vendor_name,
        total = %total_price,
        "Quote recorded"
    );

    Ok(Created(QuoteResponse::from(row)))
}

/// GET /projects/:project_id/quotes
pub async fn list_quotes(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path(project_id): Path<Uuid>,
    Query(params): Query<PaginationParams>,
    Query(query): Query<QuoteQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_project(&state.db, tenant.company_id, project_id).await?;

    let status = query.status.map(|s| s.as_str());
    let filter = r#"
        WHERE project_id = $1
          AND ($2::text IS NULL OR status = $2)
          AND ($3::uuid IS NULL OR vendor_id = $3)
          AND ($4::uuid IS NULL OR takeoff_item_id = $4)
    "#;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM quotes {}", filter))
        .bind(project_id)
        .bind(status)
        .bind(query.vendor_id)
        .bind(query.takeoff_item_id)
        .fetch_one(&state.db)
        .await?;

    let rows: Vec<QuoteRow> = sqlx::query_as(&format!(
        "SELECT {} FROM quotes {} ORDER BY received_at DESC, id LIMIT $5 OFFSET $6",
        QUOTE_COLUMNS, filter
    ))
    .bind(project_id)
    .bind(status)
    .bind(query.vendor_id)
    .bind(query.takeoff_item_id)
    .bind(params.limit())
    .bind(params.offset())
    .fetch_all(&state.db)
    .await?;

    let data: Vec<QuoteResponse> = rows.into_iter().map(Into::into).collect();
    Ok(Paginated::new(data, &params, total))
}

async fn fetch_quote(state: &AppState, project_id: Uuid, quote_id: Uuid) -> Result<QuoteRow, ApiError> {
    sqlx::query_as(&format!(
        "SELECT {} FROM quotes WHERE id = $1 AND project_id = $2",
        QUOTE_COLUMNS
    ))
    .bind(quote_id)
    .bind(project_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Quote not found"))
}

/// GET /projects/:project_id/quotes/:quote_id
pub async fn get_quote(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path((project_id, quote_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    require_project(&state.db, tenant.company_id, project_id).await?;
    let row = fetch_quote(&state, project_id, quote_id).await?;
    Ok(Json(DataResponse::new(QuoteResponse::from(row))))
}

/// PUT /projects/:project_id/quotes/:quote_id
pub async fn update_quote(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path((project_id, quote_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateQuoteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validated(req.validate())?;
    require_project(&state.db, tenant.company_id, project_id).await?;

    if let Some(takeoff_item_id) = req.takeoff_item_id {
        require_takeoff_item(&state, project_id, takeoff_item_id).await?;
    }

    let current = fetch_quote(&state, project_id, quote_id).await?;
    let total = req.resolve_total(
        decimal_to_f64(current.quantity),
        decimal_to_f64(current.unit_price),
        decimal_to_f64(current.total_price),
    );
    let total_price = money(amount(total, "total_price")?);
    let quantity = req.quantity.map(|q| amount(q, "quantity")).transpose()?;
    let unit_price = req.unit_price.map(|p| amount(p, "unit_price")).transpose()?;

    let row: QuoteRow = sqlx::query_as(&format!(
        r#"
        UPDATE quotes SET
            item_description = COALESCE($3, item_description),
            quantity = COALESCE($4, quantity),
            unit = COALESCE($5, unit),
            unit_price = COALESCE($6, unit_price),
            total_price = $7,
            lead_time_days = COALESCE($8, lead_time_days),
            notes = COALESCE($9, notes),
            takeoff_item_id = COALESCE($10, takeoff_item_id),
            updated_at = NOW()
        WHERE id = $1 AND project_id = $2
        RETURNING {}
        "#,
        QUOTE_COLUMNS
    ))
    .bind(quote_id)
    .bind(project_id)
    .bind(trimmed(req.item_description))
    .bind(quantity)
    .bind(trimmed(req.unit))
    .bind(unit_price)
    .bind(total_price)
    .bind(req.lead_time_days)
    .bind(trimmed(req.notes))
    .bind(req.takeoff_item_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Quote not found"))?;

    tracing::info!(
        user_id = %tenant.user_id,
        project_id = %project_id,
        quote_id = %quote_id,
        total = %total_price,
        "Quote updated"
    );

    Ok(Json(DataResponse::new(QuoteResponse::from(row))))
}

/// DELETE /projects/:project_id/quotes/:quote_id
pub async fn delete_quote(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path((project_id, quote_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    require_project(&state.db, tenant.company_id, project_id).await?;

    let result = sqlx::query("DELETE FROM quotes WHERE id = $1 AND project_id = $2")
        .bind(quote_id)
        .bind(project_id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Quote not found"));
    }

    tracing::info!(user_id = %tenant.user_id, quote_id = %quote_id, "Quote deleted");
    Ok(Json(MessageResponse::new("Quote deleted")))
}

/// PATCH /projects/:project_id/quotes/:quote_id/status
///
/// Accepting a quote rejects the other pending quotes for the same takeoff item.
pub async fn update_quote_status(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path((project_id, quote_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateQuoteStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_project(&state.db, tenant.company_id, project_id).await?;

    let mut tx = state.db.begin().await?;

    let row: QuoteRow = sqlx::query_as(&format!(
        r#"
        UPDATE quotes SET status = $3, updated_at = NOW()
        WHERE id = $1 AND project_id = $2
        RETURNING {}
        "#,
        QUOTE_COLUMNS
    ))
    .bind(quote_id)
    .bind(project_id)
    .bind(req.status.as_str())
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ApiError::not_found("Quote not found"))?;

    let mut rejected = 0;
    if let (QuoteStatus::Accepted, Some(takeoff_item_id)) = (req.status, row.takeoff_item_id) {
        rejected = sqlx::query(
            r#"
            UPDATE quotes SET status = 'rejected', updated_at = NOW()
            WHERE project_id = $1 AND takeoff_item_id = $2 AND id <> $3 AND status = 'pending'
            "#,
        )
        .bind(project_id)
        .bind(takeoff_item_id)
        .bind(quote_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    }

    tx.commit().await?;

    tracing::info!(
        user_id = %tenant.user_id,
        quote_id = %quote_id,
        status = req.status.as_str(),
        auto_rejected = rejected,
        "Quote status updated"
    );

    Ok(Json(DataResponse::new(QuoteResponse::from(row))))
}

async fn load_rated_quotes(
    state: &AppState,
    project_id: Uuid,
    pending_only: bool,
) -> Result<Vec<RatedQuote>, ApiError> {
    let rows = sqlx::query_as(
        r#"
        SELECT q.id, q.vendor_id, q.takeoff_item_id, q.vendor_name, q.item_description,
               q.unit_price, q.total_price, q.lead_time_days, q.status, v.rating AS vendor_rating
        FROM quotes q
        LEFT JOIN vendors v ON v.id = q.vendor_id
        WHERE q.project_id = $1 AND (NOT $2 OR q.status = 'pending')
        ORDER BY q.received_at, q.id
        "#,
    )
    .bind(project_id)
    .bind(pending_only)
    .fetch_all(&state.db)
    .await?;
    Ok(rows)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum GroupKey {
    Takeoff(Uuid),
    Description(String),
}

impl GroupKey {
    fn of(quote: &RatedQuote) -> Self {
        match quote.takeoff_item_id {
            Some(id) => Self::Takeoff(id),
            None => Self::Description(quote.item_description.trim().to_lowercase()),
        }
    }
}

/// Groups quotes by takeoff item, falling back to description, in first-seen order.
fn compare_groups(quotes: Vec<RatedQuote>) -> Vec<QuoteComparisonGroup> {
    let mut order: Vec<GroupKey> = Vec::new();
    let mut groups: HashMap<GroupKey, Vec<RatedQuote>> = HashMap::new();

    for quote in quotes {
        let key = GroupKey::of(&quote);
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(quote);
    }

    order
        .into_iter()
        .filter_map(|key| groups.remove(&key))
        .map(|members| {
            let candidates: Vec<QuoteCandidate> = members.iter().map(RatedQuote::candidate).collect();
            let prices: Vec<f64> = candidates.iter().map(|c| c.total_price).collect();
            let lowest = prices.iter().copied().fold(f64::INFINITY, f64::min);
            let highest = prices.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let average = prices.iter().sum::<f64>() / prices.len() as f64;
            let recommendation = recommend(&candidates);

            QuoteComparisonGroup {
                takeoff_item_id: members[0].takeoff_item_id,
                item_description: members[0].item_description.clone(),
                quote_count: members.len(),
                lowest_price: lowest,
                highest_price: highest,
                average_price: (average * 100.0).round() / 100.0,
                recommended_quote_id: recommendation.as_ref().map(|(id, _)| *id),
                recommendation_reason: recommendation.map(|(_, reason)| reason),
                quotes: members
                    .into_iter()
                    .map(|q| ComparedQuote {
                        quote_id: q.id,
                        vendor_id: q.vendor_id,
                        vendor_name: q.vendor_name,
                        vendor_rating: q.vendor_rating.map(decimal_to_f64),
                        unit_price: decimal_to_f64(q.unit_price),
                        total_price: decimal_to_f64(q.total_price),
                        lead_time_days: q.lead_time_days,
                        status: QuoteStatus::parse(&q.status),
                    })
                    .collect(),
            }
        })
        .collect()
}

/// GET /projects/:project_id/quotes/compare
pub async fn compare_quotes(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path(project_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    require_project(&state.db, tenant.company_id, project_id).await?;
    let quotes = load_rated_quotes(&state, project_id, false).await?;
    Ok(Json(DataResponse::new(compare_groups(quotes))))
}

/// POST /projects/:project_id/quotes/rank
///
/// Scores pending quotes with caller-supplied weights; an empty object uses the defaults.
pub async fn rank_project_quotes(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path(project_id): Path<Uuid>,
    Json(weights): Json<ScoreWeights>,
) -> Result<impl IntoResponse, ApiError> {
    validated(weights.validate())?;
    require_project(&state.db, tenant.company_id, project_id).await?;

    let quotes = load_rated_quotes(&state, project_id, true).await?;
    let candidates: Vec<QuoteCandidate> = quotes.iter().map(RatedQuote::candidate).collect();
    let by_id: HashMap<Uuid, &RatedQuote> = quotes.iter().map(|q| (q.id, q)).collect();

    let ranked: Vec<RankedQuote> = rank_quotes(&candidates, &weights, 0.0)
        .into_iter()
        .filter_map(|score| {
            let quote = by_id.get(&score.quote_id)?;
            Some(RankedQuote {
                rank: score.rank,
                quote_id: score.quote_id,
                vendor_name: quote.vendor_name.clone(),
                item_description: quote.item_description.clone(),
                total_price: decimal_to_f64(quote.total_price),
                lead_time_days: quote.lead_time_days,
                vendor_rating: quote.vendor_rating.map(decimal_to_f64),
                total_score: score.total_score,
                price_score: score.price_score,
                rating_score: score.rating_score,
                lead_time_score: score.lead_time_score,
            })
        })
        .collect();

    Ok(Json(DataResponse::new(ranked)))
}

#[derive(Debug, sqlx::FromRow)]
struct SummaryRow {
    total_quotes: i64,
    pending: i64,
    accepted: i64,
    rejected: i64,
    pending_value: Decimal,
    accepted_value: Decimal,
    items_with_quotes: i64,
    takeoff_items: i64,
}

/// GET /projects/:project_id/quotes/summary
pub async fn quote_summary(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path(project_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    require_project(&state.db, tenant.company_id, project_id).await?;

    let row: SummaryRow = sqlx::query_as(
        r#"
        SELECT
            COUNT(*) AS total_quotes,
            COUNT(*) FILTER (WHERE q.status = 'pending') AS pending,
            COUNT(*) FILTER (WHERE q.status = 'accepted') AS accepted,
            COUNT(*) FILTER (WHERE q.status = 'rejected') AS rejected,
            COALESCE(SUM(q.total_price) FILTER (WHERE q.status = 'pending'), 0) AS pending_value,
            COALESCE(SUM(q.total_price) FILTER (WHERE q.status = 'accepted'), 0) AS accepted_value,
            COUNT(DISTINCT q.takeoff_item_id) AS items_with_quotes,
            (SELECT COUNT(*) FROM takeoff_items t WHERE t.project_id = $1) AS takeoff_items
        FROM quotes q
        WHERE q.project_id = $1
        "#,
    )
    .bind(project_id)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(DataResponse::new(QuoteSummary {
        total_quotes: row.total_quotes,
        pending: row.pending,
        accepted: row.accepted,
        rejected: row.rejected,
        pending_value: decimal_to_f64(row.pending_value),
        accepted_value: decimal_to_f64(row.accepted_value),
        items_with_quotes: row.items_with_quotes,
        items_without_quotes: (row.takeoff_items - row.items_with_quotes).max(0),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(takeoff: Option<Uuid>, description: &str, total: Decimal) -> RatedQuote {
        RatedQuote {
            id: Uuid::new_v4(),
            vendor_id: None,
            takeoff_item_id: takeoff,
            vendor_name: "Gulf Supply".to_string(),
            item_description: description.to_string(),
            unit_price: total,
            total_price: total,
            lead_time_days: Some(7),
            status: "pending".to_string(),
            vendor_rating: None,
        }
    }

    #[test]
    fn groups_by_takeoff_then_description() {
        let item = Uuid::new_v4();
        let groups = compare_groups(vec![
            quote(Some(item), "Rebar #4", Decimal::from(900)),
            quote(None, "Concrete 3000 PSI", Decimal::from(150)),
            quote(Some(item), "rebar", Decimal::from(850)),
            quote(None, "  concrete 3000 psi ", Decimal::from(140)),
        ]);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].takeoff_item_id, Some(item));
        assert_eq!(groups[0].quote_count, 2);
        assert_eq!(groups[0].lowest_price, 850.0);
        assert_eq!(groups[0].highest_price, 900.0);
        assert_eq!(groups[0].average_price, 875.0);
        assert_eq!(groups[1].quote_count, 2);
        assert!(groups[1].takeoff_item_id.is_none());
    }

    #[test]
    fn cheapest_equal_quote_is_recommended() {
        let groups = compare_groups(vec![
            quote(None, "Plywood", Decimal::from(500)),
            quote(None, "Plywood", Decimal::from(420)),
        ]);
        let cheapest = groups[0].quotes[1].quote_id;
        assert_eq!(groups[0].recommended_quote_id, Some(cheapest));
        assert!(groups[0].recommendation_reason.is_some());
    }
}
