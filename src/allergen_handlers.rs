// src/allergen_handlers.rs - Allergen advisor
//
// Advisory only: the report flags matching ingredients so the UI can warn
// the student, it never blocks an issuance. Missing allergen data or a
// dish without a recipe simply produces a non-dangerous report.
use actix_web::{web, HttpResponse};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::handlers::ApiResponse;
use crate::models::{
    AllergenReport, Dish, Ingredient, IngredientFlag, RecipeItem, SetAllergensRequest, Student,
};
use crate::AppState;

// ==================== ADVISOR CORE ====================

/// Marks every recipe ingredient that appears in the student's allergen set.
pub fn annotate(recipe: &[RecipeItem], allergen_ids: &HashSet<String>) -> AllergenReport {
    let ingredients: Vec<IngredientFlag> = recipe
        .iter()
        .map(|item| IngredientFlag {
            ingredient_id: item.ingredient_id.clone(),
            name: item.name.clone(),
            is_allergen: allergen_ids.contains(&item.ingredient_id),
        })
        .collect();

    AllergenReport {
        is_dangerous: ingredients.iter().any(|i| i.is_allergen),
        ingredients,
    }
}

pub async fn allergen_ids_for(pool: &SqlitePool, student_id: &str) -> ApiResult<HashSet<String>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT ingredient_id FROM student_allergens WHERE student_id = ?")
            .bind(student_id)
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

// ==================== HTTP HANDLERS ====================

/// GET /api/students/{student_id}/allergen-report/{dish_id}
pub async fn get_allergen_report(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<(String, String)>,
) -> ApiResult<HttpResponse> {
    let (student_id, dish_id) = path.into_inner();

    let student: Option<Student> = sqlx::query_as("SELECT * FROM students WHERE id = ?")
        .bind(&student_id)
        .fetch_optional(&app_state.db_pool)
        .await?;
    if student.is_none() {
        return Err(ApiError::student_not_found(&student_id));
    }

    let dish: Option<Dish> = sqlx::query_as("SELECT * FROM dishes WHERE id = ?")
        .bind(&dish_id)
        .fetch_optional(&app_state.db_pool)
        .await?;
    if dish.is_none() {
        return Err(ApiError::dish_not_found(&dish_id));
    }

    let recipe: Vec<RecipeItem> = sqlx::query_as(
        r#"SELECT di.ingredient_id, i.name, i.unit, di.quantity_per_unit
           FROM dish_ingredients di
           JOIN ingredients i ON di.ingredient_id = i.id
           WHERE di.dish_id = ?
           ORDER BY di.ingredient_id ASC"#,
    )
        .bind(&dish_id)
        .fetch_all(&app_state.db_pool)
        .await?;

    let allergens = allergen_ids_for(&app_state.db_pool, &student_id).await?;
    let report = annotate(&recipe, &allergens);

    Ok(HttpResponse::Ok().json(ApiResponse::success(report)))
}

/// GET /api/students/{student_id}/allergens
pub async fn get_student_allergens(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let student_id = path.into_inner();

    let student: Option<Student> = sqlx::query_as("SELECT * FROM students WHERE id = ?")
        .bind(&student_id)
        .fetch_optional(&app_state.db_pool)
        .await?;
    if student.is_none() {
        return Err(ApiError::student_not_found(&student_id));
    }

    let ingredients: Vec<Ingredient> = sqlx::query_as(
        r#"SELECT i.*
           FROM student_allergens sa
           JOIN ingredients i ON sa.ingredient_id = i.id
           WHERE sa.student_id = ?
           ORDER BY i.name"#,
    )
        .bind(&student_id)
        .fetch_all(&app_state.db_pool)
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(ingredients)))
}

/// PUT /api/students/{student_id}/allergens - replaces the whole set.
pub async fn set_student_allergens(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<SetAllergensRequest>,
) -> ApiResult<HttpResponse> {
    let student_id = path.into_inner();

    let mut tx = app_state.db_pool.begin().await?;

    let student: Option<Student> = sqlx::query_as("SELECT * FROM students WHERE id = ?")
        .bind(&student_id)
        .fetch_optional(&mut *tx)
        .await?;
    if student.is_none() {
        return Err(ApiError::student_not_found(&student_id));
    }

    for ingredient_id in &request.ingredient_ids {
        let exists: Option<(String,)> =
            sqlx::query_as("SELECT id FROM ingredients WHERE id = ?")
                .bind(ingredient_id)
                .fetch_optional(&mut *tx)
                .await?;
        if exists.is_none() {
            return Err(ApiError::ingredient_not_found(ingredient_id));
        }
    }

    sqlx::query("DELETE FROM student_allergens WHERE student_id = ?")
        .bind(&student_id)
        .execute(&mut *tx)
        .await?;

    for ingredient_id in &request.ingredient_ids {
        sqlx::query(
            "INSERT OR IGNORE INTO student_allergens (student_id, ingredient_id) VALUES (?, ?)",
        )
            .bind(&student_id)
            .bind(ingredient_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    log::info!(
        "Allergen set for student {} replaced ({} ingredients)",
        student_id,
        request.ingredient_ids.len()
    );

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        serde_json::json!({ "student_id": student_id, "count": request.ingredient_ids.len() }),
        "Allergen list updated".to_string(),
    )))
}
