// src/inventory_handlers.rs - Ingredient ledger and stock corrections
use actix_web::{web, HttpResponse};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use validator::Validate;

use crate::error::{ApiError, ApiResult};
use crate::handlers::{ApiResponse, PaginationQuery};
use crate::models::{
    AdjustIngredientRequest, Dish, Ingredient, InventoryItemType, UpdateInventoryRequest,
};
use crate::validator::{resolve_quantity, validate_non_negative, validate_quantity};
use crate::AppState;

// ==================== LEDGER CORE ====================

/// Atomically applies `delta` to an ingredient's quantity. Positive deltas
/// restock, negative deltas consume. The guard in the UPDATE keeps the
/// quantity from ever going negative; on failure nothing is mutated.
pub async fn adjust_quantity(
    pool: &SqlitePool,
    ingredient_id: &str,
    delta: f64,
) -> ApiResult<Ingredient> {
    validate_quantity(delta)?;

    let result = sqlx::query(
        r#"UPDATE ingredients
           SET current_quantity = current_quantity + ?, updated_at = ?
           WHERE id = ? AND current_quantity + ? >= 0"#,
    )
        .bind(delta)
        .bind(Utc::now())
        .bind(ingredient_id)
        .bind(delta)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        // Either the ingredient does not exist or the delta would go negative
        let existing: Option<Ingredient> =
            sqlx::query_as("SELECT * FROM ingredients WHERE id = ?")
                .bind(ingredient_id)
                .fetch_optional(pool)
                .await?;

        return match existing {
            None => Err(ApiError::ingredient_not_found(ingredient_id)),
            Some(ing) => Err(ApiError::InsufficientStock(format!(
                "Cannot remove {} {} of '{}': only {} available",
                -delta, ing.unit, ing.name, ing.current_quantity
            ))),
        };
    }

    let ingredient: Ingredient = sqlx::query_as("SELECT * FROM ingredients WHERE id = ?")
        .bind(ingredient_id)
        .fetch_one(pool)
        .await?;

    if ingredient.is_low_stock() {
        log::warn!(
            "Ingredient '{}' is low on stock: {} {} (minimum {})",
            ingredient.name, ingredient.current_quantity, ingredient.unit, ingredient.min_quantity
        );
    }

    Ok(ingredient)
}

/// Administrative overwrite of an ingredient's quantity (manual stock
/// correction). Bypasses delta accounting but still rejects negatives.
pub async fn set_quantity(
    pool: &SqlitePool,
    ingredient_id: &str,
    quantity: f64,
    min_quantity: Option<f64>,
) -> ApiResult<Ingredient> {
    validate_non_negative(quantity)?;
    if let Some(min) = min_quantity {
        validate_non_negative(min)?;
    }

    let result = match min_quantity {
        Some(min) => {
            sqlx::query(
                "UPDATE ingredients SET current_quantity = ?, min_quantity = ?, updated_at = ? WHERE id = ?",
            )
                .bind(quantity)
                .bind(min)
                .bind(Utc::now())
                .bind(ingredient_id)
                .execute(pool)
                .await?
        }
        None => {
            sqlx::query(
                "UPDATE ingredients SET current_quantity = ?, updated_at = ? WHERE id = ?",
            )
                .bind(quantity)
                .bind(Utc::now())
                .bind(ingredient_id)
                .execute(pool)
                .await?
        }
    };

    if result.rows_affected() == 0 {
        return Err(ApiError::ingredient_not_found(ingredient_id));
    }

    let ingredient: Ingredient = sqlx::query_as("SELECT * FROM ingredients WHERE id = ?")
        .bind(ingredient_id)
        .fetch_one(pool)
        .await?;

    Ok(ingredient)
}

/// Overwrite of a dish's ready-to-serve portion count.
pub async fn set_dish_stock(pool: &SqlitePool, dish_id: &str, quantity: f64) -> ApiResult<Dish> {
    validate_non_negative(quantity)?;
    if quantity.fract() != 0.0 {
        return Err(ApiError::InvalidValue(
            "Dish stock must be a whole number of portions".to_string(),
        ));
    }

    let result = sqlx::query(
        "UPDATE dishes SET stock_quantity = ?, updated_at = ? WHERE id = ?",
    )
        .bind(quantity as i64)
        .bind(Utc::now())
        .bind(dish_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::dish_not_found(dish_id));
    }

    let dish: Dish = sqlx::query_as("SELECT * FROM dishes WHERE id = ?")
        .bind(dish_id)
        .fetch_one(pool)
        .await?;

    Ok(dish)
}

pub async fn low_stock(pool: &SqlitePool) -> ApiResult<Vec<Ingredient>> {
    let ingredients: Vec<Ingredient> = sqlx::query_as(
        "SELECT * FROM ingredients WHERE current_quantity <= min_quantity ORDER BY rowid",
    )
        .fetch_all(pool)
        .await?;
    Ok(ingredients)
}

// ==================== HTTP HANDLERS ====================

pub async fn list_ingredients(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<PaginationQuery>,
) -> ApiResult<HttpResponse> {
    let (_, per_page, offset) = query.normalize();

    // Snapshot in insertion order
    let ingredients: Vec<Ingredient> =
        sqlx::query_as("SELECT * FROM ingredients ORDER BY rowid LIMIT ? OFFSET ?")
            .bind(per_page)
            .bind(offset)
            .fetch_all(&app_state.db_pool)
            .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(ingredients)))
}

pub async fn get_low_stock_ingredients(
    app_state: web::Data<Arc<AppState>>,
) -> ApiResult<HttpResponse> {
    let ingredients = low_stock(&app_state.db_pool).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(ingredients)))
}

pub async fn adjust_ingredient(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<AdjustIngredientRequest>,
) -> ApiResult<HttpResponse> {
    let ingredient_id = path.into_inner();
    request.validate()?;

    let ingredient = adjust_quantity(&app_state.db_pool, &ingredient_id, request.delta).await?;

    log::info!(
        "Adjusted '{}' by {}: now {} {}",
        ingredient.name, request.delta, ingredient.current_quantity, ingredient.unit
    );

    Ok(HttpResponse::Ok().json(ApiResponse::success(ingredient)))
}

/// PUT /api/inventory - administrative stock correction for an ingredient
/// or a dish. The quantity field accepts "50+10" style input from the UI.
pub async fn update_inventory(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<UpdateInventoryRequest>,
) -> ApiResult<HttpResponse> {
    let quantity = resolve_quantity(&request.quantity)?;

    match request.item_type {
        InventoryItemType::Ingredient => {
            let ingredient = set_quantity(
                &app_state.db_pool,
                &request.id,
                quantity,
                request.min_quantity,
            )
                .await?;

            log::info!(
                "Inventory overwrite: ingredient '{}' set to {} {}",
                ingredient.name, ingredient.current_quantity, ingredient.unit
            );

            Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
                serde_json::json!({
                    "id": ingredient.id,
                    "current_quantity": ingredient.current_quantity,
                    "min_quantity": ingredient.min_quantity,
                }),
                "Ingredient stock updated".to_string(),
            )))
        }
        InventoryItemType::Dish => {
            let dish = set_dish_stock(&app_state.db_pool, &request.id, quantity).await?;

            log::info!(
                "Inventory overwrite: dish '{}' set to {} portions",
                dish.name, dish.stock_quantity
            );

            Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
                serde_json::json!({
                    "id": dish.id,
                    "stock_quantity": dish.stock_quantity,
                }),
                "Dish stock updated".to_string(),
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    async fn insert_ingredient(pool: &SqlitePool, name: &str, qty: f64, min: f64) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            r#"INSERT INTO ingredients (id, name, unit, current_quantity, min_quantity, created_at, updated_at)
               VALUES (?, ?, 'kg', ?, ?, ?, ?)"#,
        )
            .bind(&id)
            .bind(name)
            .bind(qty)
            .bind(min)
            .bind(now)
            .bind(now)
            .execute(pool)
            .await
            .unwrap();
        id
    }

    #[actix_rt::test]
    async fn test_adjust_restock_and_consume() {
        let pool = test_pool().await;
        let id = insert_ingredient(&pool, "Rice", 10.0, 2.0).await;

        let ing = adjust_quantity(&pool, &id, 5.0).await.unwrap();
        assert_eq!(ing.current_quantity, 15.0);

        let ing = adjust_quantity(&pool, &id, -15.0).await.unwrap();
        assert_eq!(ing.current_quantity, 0.0);
    }

    #[actix_rt::test]
    async fn test_adjust_never_goes_negative() {
        let pool = test_pool().await;
        let id = insert_ingredient(&pool, "Milk", 3.0, 1.0).await;

        let err = adjust_quantity(&pool, &id, -3.5).await.unwrap_err();
        assert!(matches!(err, ApiError::InsufficientStock(_)));

        // No partial mutation
        let ing: Ingredient = sqlx::query_as("SELECT * FROM ingredients WHERE id = ?")
            .bind(&id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(ing.current_quantity, 3.0);
    }

    #[actix_rt::test]
    async fn test_adjust_unknown_ingredient() {
        let pool = test_pool().await;
        let err = adjust_quantity(&pool, "missing", 1.0).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[actix_rt::test]
    async fn test_set_quantity_rejects_negative() {
        let pool = test_pool().await;
        let id = insert_ingredient(&pool, "Eggs", 100.0, 20.0).await;

        let err = set_quantity(&pool, &id, -1.0, None).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidValue(_)));

        // Store unchanged
        let ing: Ingredient = sqlx::query_as("SELECT * FROM ingredients WHERE id = ?")
            .bind(&id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(ing.current_quantity, 100.0);
    }

    #[actix_rt::test]
    async fn test_set_quantity_updates_threshold() {
        let pool = test_pool().await;
        let id = insert_ingredient(&pool, "Butter", 5.0, 1.0).await;

        let ing = set_quantity(&pool, &id, 2.0, Some(4.0)).await.unwrap();
        assert_eq!(ing.current_quantity, 2.0);
        assert_eq!(ing.min_quantity, 4.0);
        assert!(ing.is_low_stock());

        let low = low_stock(&pool).await.unwrap();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].id, id);
    }

    #[actix_rt::test]
    async fn test_dish_stock_requires_whole_portions() {
        let pool = test_pool().await;
        let dish_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            r#"INSERT INTO dishes (id, name, price, stock_quantity, reserved, created_at, updated_at)
               VALUES (?, 'Soup', 90.0, 10, 0, ?, ?)"#,
        )
            .bind(&dish_id)
            .bind(now)
            .bind(now)
            .execute(&pool)
            .await
            .unwrap();

        let err = set_dish_stock(&pool, &dish_id, 2.5).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidValue(_)));

        let dish = set_dish_stock(&pool, &dish_id, 25.0).await.unwrap();
        assert_eq!(dish.stock_quantity, 25);
    }
}
