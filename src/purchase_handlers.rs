// src/purchase_handlers.rs - Purchase request workflow
//
// Requests move one way: pending -> approved -> completed, or
// pending -> rejected. Approval is the only transition that touches the
// ingredient ledger, and it credits the stock exactly once, inside the
// same transaction that flips the status.
use actix_web::{web, HttpResponse};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::error::{ApiError, ApiResult};
use crate::handlers::ApiResponse;
use crate::models::{
    CreatePurchaseRequestRequest, Ingredient, PurchaseRequest, PurchaseRequestFilter,
    PurchaseRequestStatus, SetRequestStatusRequest,
};
use crate::validator::validate_positive;
use crate::AppState;

// ==================== WORKFLOW CORE ====================

pub async fn create(
    pool: &SqlitePool,
    ingredient_id: &str,
    quantity: f64,
    requester: &str,
) -> ApiResult<PurchaseRequest> {
    validate_positive(quantity)?;

    let ingredient: Option<Ingredient> = sqlx::query_as("SELECT * FROM ingredients WHERE id = ?")
        .bind(ingredient_id)
        .fetch_optional(pool)
        .await?;
    if ingredient.is_none() {
        return Err(ApiError::ingredient_not_found(ingredient_id));
    }

    let request = PurchaseRequest {
        id: Uuid::new_v4().to_string(),
        ingredient_id: ingredient_id.to_string(),
        quantity,
        status: PurchaseRequestStatus::Pending,
        requester: requester.to_string(),
        request_date: Utc::now(),
        resolved_at: None,
    };

    sqlx::query(
        r#"INSERT INTO purchase_requests (id, ingredient_id, quantity, status, requester, request_date)
           VALUES (?, ?, ?, ?, ?, ?)"#,
    )
        .bind(&request.id)
        .bind(&request.ingredient_id)
        .bind(request.quantity)
        .bind(request.status.as_str())
        .bind(&request.requester)
        .bind(request.request_date)
        .execute(pool)
        .await?;

    Ok(request)
}

/// Applies one status transition. The guarded UPDATE carries the expected
/// current status, so a concurrent second approval loses the race and is
/// reported as an invalid transition instead of crediting stock twice.
pub async fn set_status(
    pool: &SqlitePool,
    request_id: &str,
    next: PurchaseRequestStatus,
) -> ApiResult<PurchaseRequest> {
    let mut tx = pool.begin().await?;

    let request: PurchaseRequest = sqlx::query_as("SELECT * FROM purchase_requests WHERE id = ?")
        .bind(request_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::request_not_found(request_id))?;

    if request.status.is_terminal() {
        return Err(ApiError::InvalidTransition(format!(
            "Purchase request '{}' is already {}", request_id, request.status
        )));
    }
    if !request.status.can_transition_to(next) {
        return Err(ApiError::invalid_status_transition(
            request.status.as_str(),
            next.as_str(),
        ));
    }

    let now = Utc::now();
    let result = sqlx::query(
        "UPDATE purchase_requests SET status = ?, resolved_at = ? WHERE id = ? AND status = ?",
    )
        .bind(next.as_str())
        .bind(now)
        .bind(request_id)
        .bind(request.status.as_str())
        .execute(&mut *tx)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::invalid_status_transition(
            request.status.as_str(),
            next.as_str(),
        ));
    }

    if next == PurchaseRequestStatus::Approved {
        // Credit the ledger exactly once, in the same transaction
        sqlx::query(
            r#"UPDATE ingredients
               SET current_quantity = current_quantity + ?, updated_at = ?
               WHERE id = ?"#,
        )
            .bind(request.quantity)
            .bind(now)
            .bind(&request.ingredient_id)
            .execute(&mut *tx)
            .await?;

        log::info!(
            "Purchase request {} approved: ingredient {} credited by {}",
            request_id, request.ingredient_id, request.quantity
        );
    }

    tx.commit().await?;

    Ok(PurchaseRequest {
        status: next,
        resolved_at: Some(now),
        ..request
    })
}

// ==================== HTTP HANDLERS ====================

pub async fn create_purchase_request(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreatePurchaseRequestRequest>,
) -> ApiResult<HttpResponse> {
    request.validate()?;

    let requester = request.requester.as_deref().unwrap_or("cook");
    let created = create(
        &app_state.db_pool,
        &request.ingredient_id,
        request.quantity,
        requester,
    )
        .await?;

    log::info!(
        "Purchase request {} created: {} x{}",
        created.id, created.ingredient_id, created.quantity
    );

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        created,
        "Purchase request created".to_string(),
    )))
}

pub async fn list_purchase_requests(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<PurchaseRequestFilter>,
) -> ApiResult<HttpResponse> {
    let requests: Vec<PurchaseRequest> = match &query.status {
        Some(raw) => {
            let status = PurchaseRequestStatus::from_str(raw).ok_or_else(|| {
                ApiError::BadRequest(format!("Unknown purchase request status '{}'", raw))
            })?;
            sqlx::query_as(
                "SELECT * FROM purchase_requests WHERE status = ? ORDER BY request_date DESC",
            )
                .bind(status.as_str())
                .fetch_all(&app_state.db_pool)
                .await?
        }
        None => {
            sqlx::query_as("SELECT * FROM purchase_requests ORDER BY request_date DESC")
                .fetch_all(&app_state.db_pool)
                .await?
        }
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success(requests)))
}

pub async fn update_request_status(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    body: web::Json<SetRequestStatusRequest>,
) -> ApiResult<HttpResponse> {
    let request_id = path.into_inner();

    let next = PurchaseRequestStatus::from_str(&body.status).ok_or_else(|| {
        ApiError::BadRequest(format!("Unknown purchase request status '{}'", body.status))
    })?;

    let updated = set_status(&app_state.db_pool, &request_id, next).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        updated,
        format!("Purchase request {}", next.as_str()),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    async fn insert_ingredient(pool: &SqlitePool, name: &str, qty: f64) -> String {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            r#"INSERT INTO ingredients (id, name, unit, current_quantity, min_quantity, created_at, updated_at)
               VALUES (?, ?, 'kg', ?, 1.0, ?, ?)"#,
        )
            .bind(&id)
            .bind(name)
            .bind(qty)
            .bind(now)
            .bind(now)
            .execute(pool)
            .await
            .unwrap();
        id
    }

    async fn ingredient_quantity(pool: &SqlitePool, id: &str) -> f64 {
        let ing: Ingredient = sqlx::query_as("SELECT * FROM ingredients WHERE id = ?")
            .bind(id)
            .fetch_one(pool)
            .await
            .unwrap();
        ing.current_quantity
    }

    #[actix_rt::test]
    async fn test_request_round_trip_credits_once() {
        let pool = test_pool().await;
        let ing = insert_ingredient(&pool, "Flour", 5.0).await;

        let req = create(&pool, &ing, 10.0, "cook").await.unwrap();
        assert_eq!(req.status, PurchaseRequestStatus::Pending);
        assert_eq!(ingredient_quantity(&pool, &ing).await, 5.0);

        let approved = set_status(&pool, &req.id, PurchaseRequestStatus::Approved)
            .await
            .unwrap();
        assert_eq!(approved.status, PurchaseRequestStatus::Approved);
        assert!(approved.resolved_at.is_some());
        assert_eq!(ingredient_quantity(&pool, &ing).await, 15.0);

        // Completion records delivery, never credits again
        set_status(&pool, &req.id, PurchaseRequestStatus::Completed)
            .await
            .unwrap();
        assert_eq!(ingredient_quantity(&pool, &ing).await, 15.0);
    }

    #[actix_rt::test]
    async fn test_double_approval_rejected() {
        let pool = test_pool().await;
        let ing = insert_ingredient(&pool, "Sugar", 2.0).await;
        let req = create(&pool, &ing, 4.0, "cook").await.unwrap();

        set_status(&pool, &req.id, PurchaseRequestStatus::Approved)
            .await
            .unwrap();
        let err = set_status(&pool, &req.id, PurchaseRequestStatus::Approved)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidTransition(_)));

        // Credited exactly once
        assert_eq!(ingredient_quantity(&pool, &ing).await, 6.0);
    }

    #[actix_rt::test]
    async fn test_rejected_is_terminal_and_never_credits() {
        let pool = test_pool().await;
        let ing = insert_ingredient(&pool, "Salt", 1.0).await;
        let req = create(&pool, &ing, 3.0, "cook").await.unwrap();

        set_status(&pool, &req.id, PurchaseRequestStatus::Rejected)
            .await
            .unwrap();
        assert_eq!(ingredient_quantity(&pool, &ing).await, 1.0);

        let err = set_status(&pool, &req.id, PurchaseRequestStatus::Approved)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidTransition(_)));
        assert!(err.to_string().contains("already rejected"));
    }

    #[actix_rt::test]
    async fn test_create_rejects_non_positive_quantity() {
        let pool = test_pool().await;
        let ing = insert_ingredient(&pool, "Oil", 1.0).await;

        let err = create(&pool, &ing, 0.0, "cook").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidValue(_)));

        let err = create(&pool, &ing, -2.0, "cook").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidValue(_)));
    }

    #[actix_rt::test]
    async fn test_create_unknown_ingredient() {
        let pool = test_pool().await;
        let err = create(&pool, "missing", 5.0, "cook").await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[actix_rt::test]
    async fn test_unknown_request_id() {
        let pool = test_pool().await;
        let err = set_status(&pool, "missing", PurchaseRequestStatus::Approved)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
