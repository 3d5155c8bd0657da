// src/handlers.rs
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::ApiResult;
use crate::AppState;

// ==================== COMMON STRUCTURES ====================

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn success_with_message(data: T, message: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl PaginationQuery {
    pub fn normalize(&self) -> (i64, i64, i64) {
        let page = self.page.unwrap_or(1).max(1);
        let per_page = self.per_page.unwrap_or(20).clamp(1, 100);
        let offset = (page - 1) * per_page;
        (page, per_page, offset)
    }
}

// ==================== DASHBOARD STATISTICS ====================

#[derive(Debug, Serialize)]
pub struct DashboardStats {
    pub attendance_today: i64,
    pub revenue_today: f64,
    pub total_issued: i64,
    pub pending_requests: i64,
    pub low_stock_ingredients: i64,
}

pub async fn get_dashboard_stats(
    app_state: web::Data<Arc<AppState>>,
) -> ApiResult<HttpResponse> {
    let attendance_today: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM issuance_log WHERE issue_date = date('now')"
    )
        .fetch_one(&app_state.db_pool)
        .await?;

    let revenue_today: (Option<f64>,) = sqlx::query_as(
        r#"SELECT SUM(d.price)
           FROM issuance_log il
           JOIN dishes d ON il.dish_id = d.id
           WHERE il.issue_date = date('now')"#
    )
        .fetch_one(&app_state.db_pool)
        .await?;

    let total_issued: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM issuance_log")
        .fetch_one(&app_state.db_pool)
        .await?;

    let pending_requests: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM purchase_requests WHERE status = 'pending'"
    )
        .fetch_one(&app_state.db_pool)
        .await?;

    let low_stock_ingredients: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM ingredients WHERE current_quantity <= min_quantity"
    )
        .fetch_one(&app_state.db_pool)
        .await?;

    let stats = DashboardStats {
        attendance_today: attendance_today.0,
        revenue_today: revenue_today.0.unwrap_or(0.0),
        total_issued: total_issued.0,
        pending_requests: pending_requests.0,
        low_stock_ingredients: low_stock_ingredients.0,
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success(stats)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_normalize() {
        let q = PaginationQuery { page: None, per_page: None };
        assert_eq!(q.normalize(), (1, 20, 0));

        let q = PaginationQuery { page: Some(3), per_page: Some(50) };
        assert_eq!(q.normalize(), (3, 50, 100));

        let q = PaginationQuery { page: Some(0), per_page: Some(100000) };
        assert_eq!(q.normalize(), (1, 100, 0));
    }
}
