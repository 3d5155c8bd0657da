// src/issuance_handlers.rs - Meal issuance, the only truly transactional
// path in the system. Walk-up issuance and the order/reservation flow both
// live here; every stock mutation runs inside one sqlx transaction with
// conditional-UPDATE guards, so a failed requirement rolls the whole
// operation back.
use actix_web::{web, HttpResponse};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::config::{PolicyConfig, StockModel};
use crate::error::{ApiError, ApiResult};
use crate::handlers::ApiResponse;
use crate::models::{
    Dish, IssuanceRecord, IssueMealRequest, IssueMealResponse, MealOrder, OrderView,
    PlaceOrderRequest, Student, StudentOrdersResponse,
};
use crate::AppState;

// ==================== RECIPE CATALOG ====================

#[derive(Debug, sqlx::FromRow)]
pub struct RecipeRequirement {
    pub ingredient_id: String,
    pub name: String,
    pub quantity_per_unit: f64,
}

/// Recipe rows for a dish, ascending by ingredient id. That ordering is the
/// fixed global lock order for multi-ingredient decrements: two concurrent
/// issuances touching overlapping ingredient sets always walk them in the
/// same sequence.
pub async fn recipe_for<'e, E>(executor: E, dish_id: &str) -> Result<Vec<RecipeRequirement>, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query_as(
        r#"SELECT di.ingredient_id, i.name, di.quantity_per_unit
           FROM dish_ingredients di
           JOIN ingredients i ON di.ingredient_id = i.id
           WHERE di.dish_id = ?
           ORDER BY di.ingredient_id ASC"#,
    )
        .bind(dish_id)
        .fetch_all(executor)
        .await
}

// ==================== ISSUANCE CORE ====================

#[derive(Debug)]
pub struct IssueOutcome {
    pub record: IssuanceRecord,
    pub dish_name: String,
    pub new_stock: i64,
}

/// Walk-up issuance: the cook hands a meal to a student at the counter.
///
/// Daily-limit policy: at most one walk-up meal per student per calendar
/// day, across all dishes. Pre-placed orders are exempt - their stock was
/// committed at order time.
pub async fn issue(
    pool: &SqlitePool,
    policy: &PolicyConfig,
    student_id: &str,
    dish_id: &str,
) -> ApiResult<IssueOutcome> {
    let mut tx = pool.begin().await?;

    let dish: Dish = sqlx::query_as("SELECT * FROM dishes WHERE id = ?")
        .bind(dish_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::dish_not_found(dish_id))?;

    let student: Option<Student> = sqlx::query_as("SELECT * FROM students WHERE id = ?")
        .bind(student_id)
        .fetch_optional(&mut *tx)
        .await?;
    if student.is_none() {
        return Err(ApiError::student_not_found(student_id));
    }

    let today = Utc::now().date_naive();

    if policy.daily_limit {
        let already: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM issuance_log WHERE student_id = ? AND issue_date = ?",
        )
            .bind(student_id)
            .bind(today)
            .fetch_one(&mut *tx)
            .await?;
        if already.0 > 0 {
            return Err(ApiError::already_issued_today(student_id));
        }
    }

    let new_stock = match policy.stock_model {
        StockModel::Portions => {
            let result = sqlx::query(
                r#"UPDATE dishes
                   SET stock_quantity = stock_quantity - 1, updated_at = ?
                   WHERE id = ? AND stock_quantity >= 1"#,
            )
                .bind(Utc::now())
                .bind(dish_id)
                .execute(&mut *tx)
                .await?;

            if result.rows_affected() == 0 {
                return Err(ApiError::dish_out_of_stock(&dish.name));
            }
            dish.stock_quantity - 1
        }
        StockModel::Recipe => {
            let requirements = recipe_for(&mut *tx, dish_id).await?;
            for req in &requirements {
                let result = sqlx::query(
                    r#"UPDATE ingredients
                       SET current_quantity = current_quantity - ?, updated_at = ?
                       WHERE id = ? AND current_quantity >= ?"#,
                )
                    .bind(req.quantity_per_unit)
                    .bind(Utc::now())
                    .bind(&req.ingredient_id)
                    .bind(req.quantity_per_unit)
                    .execute(&mut *tx)
                    .await?;

                if result.rows_affected() == 0 {
                    // Dropping the transaction rolls back every decrement
                    return Err(ApiError::insufficient_ingredient(&req.name, &dish.name));
                }
            }
            dish.stock_quantity
        }
    };

    let record = IssuanceRecord {
        id: Uuid::new_v4().to_string(),
        student_id: student_id.to_string(),
        dish_id: dish_id.to_string(),
        issue_date: today,
        issued_at: Utc::now(),
    };

    sqlx::query(
        r#"INSERT INTO issuance_log (id, student_id, dish_id, issue_date, issued_at)
           VALUES (?, ?, ?, ?, ?)"#,
    )
        .bind(&record.id)
        .bind(&record.student_id)
        .bind(&record.dish_id)
        .bind(record.issue_date)
        .bind(record.issued_at)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(IssueOutcome {
        record,
        dish_name: dish.name,
        new_stock,
    })
}

// ==================== ORDER / RESERVATION FLOW ====================

/// Pre-placed order: commits one ready-made portion at order time
/// (stock -1, reserved +1). Fulfilment later only clears the reservation.
pub async fn place_order(
    pool: &SqlitePool,
    student_id: &str,
    dish_id: &str,
) -> ApiResult<MealOrder> {
    let mut tx = pool.begin().await?;

    let dish: Dish = sqlx::query_as("SELECT * FROM dishes WHERE id = ?")
        .bind(dish_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::dish_not_found(dish_id))?;

    let student: Option<Student> = sqlx::query_as("SELECT * FROM students WHERE id = ?")
        .bind(student_id)
        .fetch_optional(&mut *tx)
        .await?;
    if student.is_none() {
        return Err(ApiError::student_not_found(student_id));
    }

    let result = sqlx::query(
        r#"UPDATE dishes
           SET stock_quantity = stock_quantity - 1, reserved = reserved + 1, updated_at = ?
           WHERE id = ? AND stock_quantity >= 1"#,
    )
        .bind(Utc::now())
        .bind(dish_id)
        .execute(&mut *tx)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::dish_out_of_stock(&dish.name));
    }

    let order = MealOrder {
        id: Uuid::new_v4().to_string(),
        student_id: student_id.to_string(),
        dish_id: dish_id.to_string(),
        status: "pending".to_string(),
        order_date: Utc::now(),
        fulfilled_at: None,
    };

    sqlx::query(
        r#"INSERT INTO meal_orders (id, student_id, dish_id, status, order_date)
           VALUES (?, ?, ?, ?, ?)"#,
    )
        .bind(&order.id)
        .bind(&order.student_id)
        .bind(&order.dish_id)
        .bind(&order.status)
        .bind(order.order_date)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(order)
}

/// Marks an order fulfilled. The portion was already taken out of stock at
/// order time, so this only releases the reservation counter.
pub async fn fulfil_order(pool: &SqlitePool, order_id: &str) -> ApiResult<MealOrder> {
    let mut tx = pool.begin().await?;

    let order: MealOrder = sqlx::query_as("SELECT * FROM meal_orders WHERE id = ?")
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::order_not_found(order_id))?;

    if order.status != "pending" {
        return Err(ApiError::InvalidTransition(format!(
            "Order '{}' is already fulfilled", order_id
        )));
    }

    let now = Utc::now();
    sqlx::query(
        "UPDATE meal_orders SET status = 'fulfilled', fulfilled_at = ? WHERE id = ? AND status = 'pending'",
    )
        .bind(now)
        .bind(order_id)
        .execute(&mut *tx)
        .await?;

    let released = sqlx::query(
        "UPDATE dishes SET reserved = reserved - 1, updated_at = ? WHERE id = ? AND reserved >= 1",
    )
        .bind(now)
        .bind(&order.dish_id)
        .execute(&mut *tx)
        .await?;

    // A pending order must be backed by a reservation; if the counter is
    // already zero the books are wrong and the order stays pending.
    if released.rows_affected() == 0 {
        return Err(ApiError::InternalServerError(format!(
            "No reservation held for dish '{}' while fulfilling order '{}'",
            order.dish_id, order_id
        )));
    }

    tx.commit().await?;

    Ok(MealOrder {
        status: "fulfilled".to_string(),
        fulfilled_at: Some(now),
        ..order
    })
}

// ==================== HTTP HANDLERS ====================

pub async fn issue_meal(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<IssueMealRequest>,
) -> ApiResult<HttpResponse> {
    request.validate()?;

    let outcome = issue(
        &app_state.db_pool,
        &app_state.config.policy,
        &request.student_id,
        &request.dish_id,
    )
        .await?;

    log::info!(
        "Issued '{}' to student {} ({} portions left)",
        outcome.dish_name, request.student_id, outcome.new_stock
    );

    let message = format!("Meal '{}' issued", outcome.dish_name);
    let response = IssueMealResponse {
        record: outcome.record,
        dish_name: outcome.dish_name,
        new_stock: outcome.new_stock,
        message,
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success(response)))
}

pub async fn create_order(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<PlaceOrderRequest>,
) -> ApiResult<HttpResponse> {
    request.validate()?;

    let order = place_order(&app_state.db_pool, &request.student_id, &request.dish_id).await?;

    log::info!("Order {} placed by student {}", order.id, order.student_id);

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        order,
        "Order placed".to_string(),
    )))
}

pub async fn finish_order(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let order_id = path.into_inner();

    let order = fulfil_order(&app_state.db_pool, &order_id).await?;

    log::info!("Order {} fulfilled", order.id);

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        order,
        "Order fulfilled".to_string(),
    )))
}

/// Cook-facing view: a student's committed-but-unserved orders.
pub async fn check_orders(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let student_id = path.into_inner();

    let student: Student = sqlx::query_as("SELECT * FROM students WHERE id = ?")
        .bind(&student_id)
        .fetch_optional(&app_state.db_pool)
        .await?
        .ok_or_else(|| ApiError::student_not_found(&student_id))?;

    let orders: Vec<OrderView> = sqlx::query_as(
        r#"SELECT mo.id, mo.dish_id, d.name as dish_name, mo.status, mo.order_date
           FROM meal_orders mo
           JOIN dishes d ON mo.dish_id = d.id
           WHERE mo.student_id = ? AND mo.status = 'pending'
           ORDER BY mo.order_date DESC"#,
    )
        .bind(&student_id)
        .fetch_all(&app_state.db_pool)
        .await?;

    let response = StudentOrdersResponse {
        student_name: student.full_name,
        orders,
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success(response)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::models::Ingredient;

    fn portions_policy() -> PolicyConfig {
        PolicyConfig {
            daily_limit: true,
            stock_model: StockModel::Portions,
            low_stock_check_seconds: 600,
        }
    }

    fn recipe_policy() -> PolicyConfig {
        PolicyConfig {
            daily_limit: false,
            stock_model: StockModel::Recipe,
            low_stock_check_seconds: 600,
        }
    }

    async fn insert_student(pool: &SqlitePool, name: &str) -> String {
        let id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO students (id, full_name, created_at) VALUES (?, ?, ?)")
            .bind(&id)
            .bind(name)
            .bind(Utc::now())
            .execute(pool)
            .await
            .unwrap();
        id
    }

    async fn insert_dish(pool: &SqlitePool, name: &str, stock: i64) -> String {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            r#"INSERT INTO dishes (id, name, price, stock_quantity, reserved, created_at, updated_at)
               VALUES (?, ?, 100.0, ?, 0, ?, ?)"#,
        )
            .bind(&id)
            .bind(name)
            .bind(stock)
            .bind(now)
            .bind(now)
            .execute(pool)
            .await
            .unwrap();
        id
    }

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

    async fn add_recipe_row(pool: &SqlitePool, dish_id: &str, ingredient_id: &str, qty: f64) {
        sqlx::query(
            "INSERT INTO dish_ingredients (dish_id, ingredient_id, quantity_per_unit) VALUES (?, ?, ?)",
        )
            .bind(dish_id)
            .bind(ingredient_id)
            .bind(qty)
            .execute(pool)
            .await
            .unwrap();
    }

    async fn dish_stock(pool: &SqlitePool, dish_id: &str) -> (i64, i64) {
        let dish: Dish = sqlx::query_as("SELECT * FROM dishes WHERE id = ?")
            .bind(dish_id)
            .fetch_one(pool)
            .await
            .unwrap();
        (dish.stock_quantity, dish.reserved)
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
    async fn test_no_oversell_under_concurrency() {
        let pool = test_pool().await;
        let policy = portions_policy();
        let dish_id = insert_dish(&pool, "Borscht", 3).await;

        let mut students = Vec::new();
        for i in 0..4 {
            students.push(insert_student(&pool, &format!("Student {}", i)).await);
        }

        let futures: Vec<_> = students
            .iter()
            .map(|sid| issue(&pool, &policy, sid, &dish_id))
            .collect();
        let results = futures::future::join_all(futures).await;

        let successes = results.iter().filter(|r| r.is_ok()).count();
        let stock_failures = results
            .iter()
            .filter(|r| matches!(r, Err(ApiError::InsufficientStock(_))))
            .count();

        assert_eq!(successes, 3);
        assert_eq!(stock_failures, 1);
        assert_eq!(dish_stock(&pool, &dish_id).await.0, 0);
    }

    #[actix_rt::test]
    async fn test_all_or_nothing_ingredient_decrement() {
        let pool = test_pool().await;
        let policy = recipe_policy();
        let dish_id = insert_dish(&pool, "Omelette", 0).await;
        let student = insert_student(&pool, "Test Student").await;

        let eggs = insert_ingredient(&pool, "Eggs", 10.0).await;
        let milk = insert_ingredient(&pool, "Milk", 0.01).await;
        add_recipe_row(&pool, &dish_id, &eggs, 2.0).await;
        add_recipe_row(&pool, &dish_id, &milk, 0.05).await;

        let err = issue(&pool, &policy, &student, &dish_id).await.unwrap_err();
        assert!(matches!(err, ApiError::InsufficientStock(_)));

        // Neither ingredient changed
        assert_eq!(ingredient_quantity(&pool, &eggs).await, 10.0);
        assert_eq!(ingredient_quantity(&pool, &milk).await, 0.01);

        // And no record appended
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM issuance_log")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }

    #[actix_rt::test]
    async fn test_recipe_consumption_on_success() {
        let pool = test_pool().await;
        let policy = recipe_policy();
        let dish_id = insert_dish(&pool, "Porridge", 0).await;
        let student = insert_student(&pool, "Test Student").await;

        let buckwheat = insert_ingredient(&pool, "Buckwheat", 5.0).await;
        add_recipe_row(&pool, &dish_id, &buckwheat, 0.15).await;

        let outcome = issue(&pool, &policy, &student, &dish_id).await.unwrap();
        assert_eq!(outcome.dish_name, "Porridge");
        assert!((ingredient_quantity(&pool, &buckwheat).await - 4.85).abs() < 1e-9);
    }

    #[actix_rt::test]
    async fn test_daily_limit_blocks_second_walk_up() {
        let pool = test_pool().await;
        let policy = portions_policy();
        let dish_id = insert_dish(&pool, "Cutlets", 10).await;
        let student = insert_student(&pool, "Hungry Student").await;

        issue(&pool, &policy, &student, &dish_id).await.unwrap();

        let err = issue(&pool, &policy, &student, &dish_id).await.unwrap_err();
        assert!(matches!(err, ApiError::AlreadyIssued(_)));

        // Stock only went down once
        assert_eq!(dish_stock(&pool, &dish_id).await.0, 9);
    }

    #[actix_rt::test]
    async fn test_daily_limit_disabled_allows_repeat() {
        let pool = test_pool().await;
        let mut policy = portions_policy();
        policy.daily_limit = false;
        let dish_id = insert_dish(&pool, "Cutlets", 10).await;
        let student = insert_student(&pool, "Hungry Student").await;

        issue(&pool, &policy, &student, &dish_id).await.unwrap();
        issue(&pool, &policy, &student, &dish_id).await.unwrap();

        assert_eq!(dish_stock(&pool, &dish_id).await.0, 8);
    }

    #[actix_rt::test]
    async fn test_issue_unknown_dish() {
        let pool = test_pool().await;
        let policy = portions_policy();
        let student = insert_student(&pool, "Student").await;

        let err = issue(&pool, &policy, &student, "missing").await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[actix_rt::test]
    async fn test_order_reserves_and_fulfilment_releases() {
        let pool = test_pool().await;
        let dish_id = insert_dish(&pool, "Salad", 5).await;
        let student = insert_student(&pool, "Student").await;

        let order = place_order(&pool, &student, &dish_id).await.unwrap();
        assert_eq!(dish_stock(&pool, &dish_id).await, (4, 1));

        let fulfilled = fulfil_order(&pool, &order.id).await.unwrap();
        assert_eq!(fulfilled.status, "fulfilled");
        assert!(fulfilled.fulfilled_at.is_some());

        // No second stock decrement, reservation cleared
        assert_eq!(dish_stock(&pool, &dish_id).await, (4, 0));

        // Double fulfilment is rejected
        let err = fulfil_order(&pool, &order.id).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidTransition(_)));
        assert_eq!(dish_stock(&pool, &dish_id).await, (4, 0));
    }

    #[actix_rt::test]
    async fn test_fulfilment_fails_without_reservation() {
        let pool = test_pool().await;
        let dish_id = insert_dish(&pool, "Salad", 5).await;
        let student = insert_student(&pool, "Student").await;

        let order = place_order(&pool, &student, &dish_id).await.unwrap();

        // Simulate a corrupted reservation counter
        sqlx::query("UPDATE dishes SET reserved = 0 WHERE id = ?")
            .bind(&dish_id)
            .execute(&pool)
            .await
            .unwrap();

        let err = fulfil_order(&pool, &order.id).await.unwrap_err();
        assert!(matches!(err, ApiError::InternalServerError(_)));

        // The whole transaction rolled back: order is still pending
        let stored: MealOrder = sqlx::query_as("SELECT * FROM meal_orders WHERE id = ?")
            .bind(&order.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(stored.status, "pending");
    }

    #[actix_rt::test]
    async fn test_order_blocked_when_out_of_stock() {
        let pool = test_pool().await;
        let dish_id = insert_dish(&pool, "Salad", 0).await;
        let student = insert_student(&pool, "Student").await;

        let err = place_order(&pool, &student, &dish_id).await.unwrap_err();
        assert!(matches!(err, ApiError::InsufficientStock(_)));
        assert_eq!(dish_stock(&pool, &dish_id).await, (0, 0));
    }

    #[actix_rt::test]
    async fn test_daily_limit_does_not_apply_to_orders() {
        let pool = test_pool().await;
        let policy = portions_policy();
        let dish_id = insert_dish(&pool, "Soup", 10).await;
        let student = insert_student(&pool, "Student").await;

        // Walk-up meal first, then a pre-placed order the same day
        issue(&pool, &policy, &student, &dish_id).await.unwrap();
        let order = place_order(&pool, &student, &dish_id).await.unwrap();
        fulfil_order(&pool, &order.id).await.unwrap();

        assert_eq!(dish_stock(&pool, &dish_id).await, (8, 0));
    }
}
