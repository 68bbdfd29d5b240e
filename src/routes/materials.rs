//! Materials catalog, one per company.

use axum::{
    extract::{Multipart, Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use super::{like_pattern, read_file_field, trimmed, validated};
use crate::api::{Created, DataResponse, MessageResponse, Paginated, PaginationParams};
use crate::app::AppState;
use crate::auth::RequireTenant;
use crate::domain::imports::CatalogImportResult;
use crate::domain::materials::{
    CreateMaterialRequest, MaterialQuery, MaterialResponse, UpdateMaterialRequest,
};
use crate::domain::{decimal_to_f64, f64_to_decimal};
use crate::error::ApiError;
use crate::services::cache::keys;
use crate::services::csv_import;

#[derive(Debug, sqlx::FromRow)]
struct MaterialRow {
    id: Uuid,
    company_id: Uuid,
    product_code: String,
    description: String,
    category: String,
    unit_price: Decimal,
    unit: String,
    manufacturer: Option<String>,
    specifications: Option<String>,
    notes: Option<String>,
    lead_time_days: Option<i32>,
    minimum_order: Option<Decimal>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<MaterialRow> for MaterialResponse {
    fn from(row: MaterialRow) -> Self {
        Self {
            id: row.id,
            company_id: row.company_id,
            product_code: row.product_code,
            description: row.description,
            category: row.category,
            unit_price: decimal_to_f64(row.unit_price),
            unit: row.unit,
            manufacturer: row.manufacturer,
            specifications: row.specifications,
            notes: row.notes,
            lead_time_days: row.lead_time_days,
            minimum_order: row.minimum_order.map(decimal_to_f64),
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const MATERIAL_COLUMNS: &str = "id, company_id, product_code, description, category, unit_price, \
     unit, manufacturer, specifications, notes, lead_time_days, minimum_order, is_active, \
     created_at, updated_at";

const CATEGORIES_TTL: std::time::Duration = std::time::Duration::from_secs(600);

fn price(value: f64) -> Result<Decimal, ApiError> {
    f64_to_decimal(value).ok_or_else(|| ApiError::bad_request("Unit price must be a number"))
}

fn duplicate_code(e: sqlx::Error) -> ApiError {
    match ApiError::from(e) {
        ApiError::Conflict(_) => ApiError::conflict("A material with this product code already exists"),
        other => other,
    }
}

/// GET /materials
pub async fn list_materials(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Query(params): Query<PaginationParams>,
    Query(query): Query<MaterialQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let search = like_pattern(query.search.as_deref());
    let category = trimmed(query.category);

    let filter = r#"
        WHERE company_id = $1
        AND ($2::text IS NULL OR category = $2)
        AND ($3::text IS NULL OR product_code ILIKE $3 OR description ILIKE $3)
        AND ($4::boolean IS NULL OR is_active = $4)
    "#;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM materials {}", filter))
        .bind(tenant.company_id)
        .bind(&category)
        .bind(&search)
        .bind(query.is_active)
        .fetch_one(&state.db)
        .await?;

    let rows: Vec<MaterialRow> = sqlx::query_as(&format!(
        "SELECT {} FROM materials {} ORDER BY category, product_code LIMIT $5 OFFSET $6",
        MATERIAL_COLUMNS, filter
    ))
    .bind(tenant.company_id)
    .bind(&category)
    .bind(&search)
    .bind(query.is_active)
    .bind(params.limit())
    .bind(params.offset())
    .fetch_all(&state.db)
    .await?;

    let data: Vec<MaterialResponse> = rows.into_iter().map(Into::into).collect();
    Ok(Paginated::new(data, &params, total))
}

/// GET /materials/categories
pub async fn list_categories(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
) -> Result<impl IntoResponse, ApiError> {
    let key = keys::material_categories(tenant.company_id);
    if let Some(cached) = state.cache.get::<Vec<String>>(&key).await {
        return Ok(Json(DataResponse::new(cached)));
    }

    let categories: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT category FROM materials WHERE company_id = $1 ORDER BY category",
    )
    .bind(tenant.company_id)
    .fetch_all(&state.db)
    .await?;

    if let Err(e) = state.cache.set_with_ttl(&key, &categories, CATEGORIES_TTL).await {
        tracing::warn!(error = %e, "Failed to cache material categories");
    }

    Ok(Json(DataResponse::new(categories)))
}

/// GET /materials/by-code/:product_code
pub async fn get_material_by_code(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path(product_code): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let row: MaterialRow = sqlx::query_as(&format!(
        "SELECT {} FROM materials WHERE company_id = $1 AND product_code = $2",
        MATERIAL_COLUMNS
    ))
    .bind(tenant.company_id)
    .bind(product_code.trim())
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Material not found"))?;

    Ok(Json(DataResponse::new(MaterialResponse::from(row))))
}

/// POST /materials
pub async fn create_material(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Json(req): Json<CreateMaterialRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validated(req.validate())?;
    let minimum_order = req.minimum_order.and_then(f64_to_decimal);

    let row: MaterialRow = sqlx::query_as(&format!(
        r#"
        INSERT INTO materials (company_id, product_code, description, category, unit_price, unit,
                               manufacturer, specifications, notes, lead_time_days,
                               minimum_order, is_active)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING {}
        "#,
        MATERIAL_COLUMNS
    ))
    .bind(tenant.company_id)
    .bind(req.product_code.trim())
    .bind(req.description.trim())
    .bind(req.category.trim())
    .bind(price(req.unit_price)?)
    .bind(req.unit.trim().to_uppercase())
    .bind(trimmed(req.manufacturer))
    .bind(trimmed(req.specifications))
    .bind(trimmed(req.notes))
    .bind(req.lead_time_days)
    .bind(minimum_order)
    .bind(req.is_active)
    .fetch_one(&state.db)
    .await
    .map_err(duplicate_code)?;

    state.cache.evict(&keys::material_categories(tenant.company_id)).await;

    tracing::info!(
        user_id = %tenant.user_id,
        company_id = %tenant.company_id,
        material_id = %row.id,
        product_code = %row.product_code,
        "Material created"
    );

    Ok(Created(MaterialResponse::from(row)))
}

/// GET /materials/:material_id
pub async fn get_material(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path(material_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let row: MaterialRow = sqlx::query_as(&format!(
        "SELECT {} FROM materials WHERE id = $1 AND company_id = $2",
        MATERIAL_COLUMNS
    ))
    .bind(material_id)
    .bind(tenant.company_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Material not found"))?;

    Ok(Json(DataResponse::new(MaterialResponse::from(row))))
}

/// PUT /materials/:material_id
pub async fn update_material(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path(material_id): Path<Uuid>,
    Json(req): Json<UpdateMaterialRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validated(req.validate())?;
    let unit_price = req.unit_price.map(price).transpose()?;
    let minimum_order = req.minimum_order.and_then(f64_to_decimal);

    let row: MaterialRow = sqlx::query_as(&format!(
        r#"
        UPDATE materials SET
            product_code = COALESCE($3, product_code),
            description = COALESCE($4, description),
            category = COALESCE($5, category),
            unit_price = COALESCE($6, unit_price),
            unit = COALESCE($7, unit),
            manufacturer = COALESCE($8, manufacturer),
            specifications = COALESCE($9, specifications),
            notes = COALESCE($10, notes),
            lead_time_days = COALESCE($11, lead_time_days),
            minimum_order = COALESCE($12, minimum_order),
            is_active = COALESCE($13, is_active),
            updated_at = NOW()
        WHERE id = $1 AND company_id = $2
        RETURNING {}
        "#,
        MATERIAL_COLUMNS
    ))
    .bind(material_id)
    .bind(tenant.company_id)
    .bind(trimmed(req.product_code))
    .bind(trimmed(req.description))
    .bind(trimmed(req.category))
    .bind(unit_price)
    .bind(trimmed(req.unit).map(|u| u.to_uppercase()))
    .bind(trimmed(req.manufacturer))
    .bind(trimmed(req.specifications))
    .bind(trimmed(req.notes))
    .bind(req.lead_time_days)
    .bind(minimum_order)
    .bind(req.is_active)
    .fetch_optional(&state.db)
    .await
    .map_err(duplicate_code)?
    .ok_or_else(|| ApiError::not_found("Material not found"))?;

    state.cache.evict(&keys::material_categories(tenant.company_id)).await;

    tracing::info!(
        user_id = %tenant.user_id,
        company_id = %tenant.company_id,
        material_id = %material_id,
        "Material updated"
    );

    Ok(Json(DataResponse::new(MaterialResponse::from(row))))
}

/// DELETE /materials/:material_id
///
/// Takeoff items matched to the material keep their prices; the link is cleared
/// by the foreign key.
pub async fn delete_material(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path(material_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let result = sqlx::query("DELETE FROM materials WHERE id = $1 AND company_id = $2")
        .bind(material_id)
        .bind(tenant.company_id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Material not found"));
    }

    state.cache.evict(&keys::material_categories(tenant.company_id)).await;

    tracing::info!(
        user_id = %tenant.user_id,
        company_id = %tenant.company_id,
        material_id = %material_id,
        "Material deleted"
    );

    Ok(Json(MessageResponse::new("Material deleted")))
}

/// POST /materials/import (multipart: `file`)
///
/// Upserts by product code. Rows with errors are skipped and reported.
pub async fn import_materials(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let bytes = read_file_field(multipart, state.settings.max_upload_bytes).await?;
    let (rows, errors) = csv_import::parse_materials(&bytes)?;

    let mut result = CatalogImportResult {
        skipped: errors.len(),
        errors,
        ..Default::default()
    };

    let mut tx = state.db.begin().await?;
    for row in &rows {
        let inserted: bool = sqlx::query_scalar(
            r#"
            INSERT INTO materials (company_id, product_code, description, category, unit_price,
                                   unit, manufacturer, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (company_id, product_code) DO UPDATE SET
                description = EXCLUDED.description,
                category = EXCLUDED.category,
                unit_price = EXCLUDED.unit_price,
                unit = EXCLUDED.unit,
                manufacturer = COALESCE(EXCLUDED.manufacturer, materials.manufacturer),
                notes = COALESCE(EXCLUDED.notes, materials.notes),
                updated_at = NOW()
            RETURNING (xmax = 0)
            "#,
        )
        .bind(tenant.company_id)
        .bind(&row.product_code)
        .bind(&row.description)
        .bind(&row.category)
        .bind(price(row.unit_price)?)
        .bind(&row.unit)
        .bind(&row.manufacturer)
        .bind(&row.notes)
        .fetch_one(&mut *tx)
        .await?;

        if inserted {
            result.created += 1;
        } else {
            result.updated += 1;
        }
    }
    tx.commit().await?;

    state.cache.evict(&keys::material_categories(tenant.company_id)).await;

    tracing::info!(
        user_id = %tenant.user_id,
        company_id = %tenant.company_id,
        created = result.created,
        updated = result.updated,
        skipped = result.skipped,
        "Materials imported"
    );

    Ok(Json(DataResponse::new(result)))
}
