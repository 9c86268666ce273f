use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::middleware::Claims;
use crate::db::models::Product;
use crate::error::{db_lock_error, ApiError};
use crate::state::AppState;

const NAME_MAX: usize = 100;
const DESCRIPTION_MAX: usize = 500;
const CATEGORY_MAX: usize = 50;

// --- Response types ---

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductResponse {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub stock: i64,
    pub category: Option<String>,
    pub created_at: String,
}

impl From<Product> for ProductResponse {
    fn from(p: Product) -> Self {
        Self {
            id: p.id,
            name: p.name,
            description: p.description,
            price: cents_to_price(p.price_cents),
            stock: p.stock,
            category: p.category,
            created_at: p.created_at,
        }
    }
}

// --- Request types ---

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: f64,
    pub stock: i64,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProductRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub stock: Option<i64>,
    #[serde(default)]
    pub category: Option<String>,
}

// --- Validation ---

fn price_to_cents(price: f64) -> Result<i64, ApiError> {
    if !price.is_finite() {
        return Err(ApiError::BadRequest("Price must be a number".to_string()));
    }
    let cents = (price * 100.0).round();
    if cents < 1.0 || cents > i64::MAX as f64 {
        return Err(ApiError::BadRequest("Price must be greater than 0".to_string()));
    }
    Ok(cents as i64)
}

fn cents_to_price(cents: i64) -> f64 {
    cents as f64 / 100.0
}

fn check_len(field: &str, value: Option<&str>, max: usize) -> Result<(), ApiError> {
    match value {
        Some(v) if v.chars().count() > max => Err(ApiError::BadRequest(format!(
            "{} must be at most {} characters",
            field, max
        ))),
        _ => Ok(()),
    }
}

fn check_stock(stock: i64) -> Result<(), ApiError> {
    if stock < 0 {
        return Err(ApiError::BadRequest("Stock must be 0 or greater".to_string()));
    }
    Ok(())
}

fn validate_create(req: &CreateProductRequest) -> Result<i64, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Name is required".to_string()));
    }
    check_len("Name", Some(&req.name), NAME_MAX)?;
    check_len("Description", req.description.as_deref(), DESCRIPTION_MAX)?;
    check_len("Category", req.category.as_deref(), CATEGORY_MAX)?;
    check_stock(req.stock)?;
    price_to_cents(req.price)
}

fn validate_update(req: &UpdateProductRequest) -> Result<Option<i64>, ApiError> {
    if let Some(name) = &req.name {
        if name.trim().is_empty() {
            return Err(ApiError::BadRequest("Name cannot be empty".to_string()));
        }
    }
    check_len("Name", req.name.as_deref(), NAME_MAX)?;
    check_len("Description", req.description.as_deref(), DESCRIPTION_MAX)?;
    check_len("Category", req.category.as_deref(), CATEGORY_MAX)?;
    if let Some(stock) = req.stock {
        check_stock(stock)?;
    }
    req.price.map(price_to_cents).transpose()
}

fn not_found() -> ApiError {
    ApiError::NotFound("Product not found".to_string())
}

fn fetch_product(conn: &rusqlite::Connection, id: i64) -> rusqlite::Result<Option<Product>> {
    conn.query_row(
        &format!("SELECT {} FROM products WHERE id = ?1", Product::COLUMNS),
        [id],
        Product::from_row,
    )
    .optional()
}

// --- Handlers ---

/// GET /api/products?category= — Products ordered by name, optionally filtered.
pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ProductResponse>>, ApiError> {
    let db = state.db.clone();
    let category = query.category.filter(|c| !c.is_empty());

    let products = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(db_lock_error)?;
        let products: Vec<Product> = match category {
            Some(category) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM products WHERE category = ?1 ORDER BY name ASC",
                    Product::COLUMNS
                ))?;
                let rows = stmt.query_map([category], Product::from_row)?;
                rows.collect::<rusqlite::Result<_>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM products ORDER BY name ASC",
                    Product::COLUMNS
                ))?;
                let rows = stmt.query_map([], Product::from_row)?;
                rows.collect::<rusqlite::Result<_>>()?
            }
        };
        Ok::<_, ApiError>(products)
    })
    .await??;

    Ok(Json(products.into_iter().map(ProductResponse::from).collect()))
}

/// GET /api/products/{id}
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ProductResponse>, ApiError> {
    let db = state.db.clone();

    let product = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(db_lock_error)?;
        Ok::<_, ApiError>(fetch_product(&conn, id)?)
    })
    .await??
    .ok_or_else(not_found)?;

    Ok(Json(product.into()))
}

/// GET /api/products/categories — Distinct non-empty categories, sorted.
pub async fn list_categories(
    State(state): State<AppState>,
) -> Result<Json<Vec<String>>, ApiError> {
    let db = state.db.clone();

    let categories = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(db_lock_error)?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT category FROM products
             WHERE category IS NOT NULL AND category != ''
             ORDER BY category ASC",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok::<_, ApiError>(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    })
    .await??;

    Ok(Json(categories))
}

/// POST /api/products — Create a product (Admin only).
pub async fn create_product(
    State(state): State<AppState>,
    claims: Claims,
    Json(req): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<ProductResponse>), ApiError> {
    claims.require_admin()?;
    let price_cents = validate_create(&req)?;

    let db = state.db.clone();
    let product = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(db_lock_error)?;
        conn.execute(
            "INSERT INTO products (name, description, price_cents, stock, category, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                req.name.trim(),
                req.description,
                price_cents,
                req.stock,
                req.category,
                Utc::now().to_rfc3339()
            ],
        )?;
        let id = conn.last_insert_rowid();
        fetch_product(&conn, id)?.ok_or_else(not_found)
    })
    .await??;

    tracing::info!(
        product_id = product.id,
        admin = claims.username.as_deref().unwrap_or("?"),
        "Product created"
    );

    Ok((StatusCode::CREATED, Json(product.into())))
}

/// PUT /api/products/{id} — Partial update (Admin only).
pub async fn update_product(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<i64>,
    Json(req): Json<UpdateProductRequest>,
) -> Result<Json<ProductResponse>, ApiError> {
    claims.require_admin()?;
    let price_cents = validate_update(&req)?;

    let db = state.db.clone();
    let product = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(db_lock_error)?;
        let mut product = fetch_product(&conn, id)?.ok_or_else(not_found)?;

        if let Some(name) = req.name {
            product.name = name.trim().to_string();
        }
        if let Some(description) = req.description {
            product.description = Some(description);
        }
        if let Some(cents) = price_cents {
            product.price_cents = cents;
        }
        if let Some(stock) = req.stock {
            product.stock = stock;
        }
        if let Some(category) = req.category {
            product.category = Some(category);
        }
        product.updated_at = Some(Utc::now().to_rfc3339());

        conn.execute(
            "UPDATE products SET name = ?1, description = ?2, price_cents = ?3, stock = ?4,
             category = ?5, updated_at = ?6 WHERE id = ?7",
            rusqlite::params![
                product.name,
                product.description,
                product.price_cents,
                product.stock,
                product.category,
                product.updated_at,
                id
            ],
        )?;
        Ok::<_, ApiError>(product)
    })
    .await??;

    tracing::info!(product_id = id, "Product updated");

    Ok(Json(product.into()))
}

/// DELETE /api/products/{id} — Hard delete (Admin only).
pub async fn delete_product(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    claims.require_admin()?;

    let db = state.db.clone();
    let deleted = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(db_lock_error)?;
        Ok::<_, ApiError>(conn.execute("DELETE FROM products WHERE id = ?1", [id])?)
    })
    .await??;

    if deleted == 0 {
        return Err(not_found());
    }

    tracing::info!(product_id = id, "Product deleted");

    Ok(Json(json!({ "message": "Product deleted successfully" })))
}
