// src/menu_handlers.rs - Dish catalog and recipe composition
use actix_web::{web, HttpResponse};
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::error::{ApiError, ApiResult};
use crate::handlers::{ApiResponse, PaginationQuery};
use crate::models::{
    CreateDishRequest, CreateStudentRequest, Dish, DishWithRecipe, RecipeItem, RecipeItemRequest,
    Student, UpdateDishRequest,
};
use crate::AppState;

async fn fetch_recipe(pool: &SqlitePool, dish_id: &str) -> ApiResult<Vec<RecipeItem>> {
    let items: Vec<RecipeItem> = sqlx::query_as(
        r#"SELECT di.ingredient_id, i.name, i.unit, di.quantity_per_unit
           FROM dish_ingredients di
           JOIN ingredients i ON di.ingredient_id = i.id
           WHERE di.dish_id = ?
           ORDER BY di.ingredient_id ASC"#,
    )
        .bind(dish_id)
        .fetch_all(pool)
        .await?;
    Ok(items)
}

/// Replaces a dish's recipe rows. Runs inside the caller's transaction so a
/// bad ingredient reference aborts the whole dish write.
async fn write_recipe(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    dish_id: &str,
    items: &[RecipeItemRequest],
) -> ApiResult<()> {
    sqlx::query("DELETE FROM dish_ingredients WHERE dish_id = ?")
        .bind(dish_id)
        .execute(&mut **tx)
        .await?;

    for (position, item) in items.iter().enumerate() {
        let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM ingredients WHERE id = ?")
            .bind(&item.ingredient_id)
            .fetch_optional(&mut **tx)
            .await?;
        if exists.is_none() {
            return Err(ApiError::ingredient_not_found(&item.ingredient_id));
        }

        sqlx::query(
            r#"INSERT INTO dish_ingredients (dish_id, ingredient_id, quantity_per_unit, position)
               VALUES (?, ?, ?, ?)"#,
        )
            .bind(dish_id)
            .bind(&item.ingredient_id)
            .bind(item.quantity_per_unit)
            .bind(position as i64)
            .execute(&mut **tx)
            .await?;
    }

    Ok(())
}

// ==================== DISH HANDLERS ====================

/// GET /api/dishes - the menu with embedded recipes.
pub async fn list_dishes(app_state: web::Data<Arc<AppState>>) -> ApiResult<HttpResponse> {
    let dishes: Vec<Dish> = sqlx::query_as("SELECT * FROM dishes ORDER BY name")
        .fetch_all(&app_state.db_pool)
        .await?;

    #[derive(sqlx::FromRow)]
    struct RecipeRow {
        dish_id: String,
        ingredient_id: String,
        name: String,
        unit: String,
        quantity_per_unit: f64,
    }

    let rows: Vec<RecipeRow> = sqlx::query_as(
        r#"SELECT di.dish_id, di.ingredient_id, i.name, i.unit, di.quantity_per_unit
           FROM dish_ingredients di
           JOIN ingredients i ON di.ingredient_id = i.id
           ORDER BY di.ingredient_id ASC"#,
    )
        .fetch_all(&app_state.db_pool)
        .await?;

    let mut by_dish: HashMap<String, Vec<RecipeItem>> = HashMap::new();
    for row in rows {
        by_dish.entry(row.dish_id).or_default().push(RecipeItem {
            ingredient_id: row.ingredient_id,
            name: row.name,
            unit: row.unit,
            quantity_per_unit: row.quantity_per_unit,
        });
    }

    let menu: Vec<DishWithRecipe> = dishes
        .into_iter()
        .map(|dish| {
            let ingredients = by_dish.remove(&dish.id).unwrap_or_default();
            DishWithRecipe { dish, ingredients }
        })
        .collect();

    Ok(HttpResponse::Ok().json(ApiResponse::success(menu)))
}

pub async fn get_dish(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let dish_id = path.into_inner();

    let dish: Dish = sqlx::query_as("SELECT * FROM dishes WHERE id = ?")
        .bind(&dish_id)
        .fetch_optional(&app_state.db_pool)
        .await?
        .ok_or_else(|| ApiError::dish_not_found(&dish_id))?;

    let ingredients = fetch_recipe(&app_state.db_pool, &dish_id).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(DishWithRecipe { dish, ingredients })))
}

pub async fn create_dish(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreateDishRequest>,
) -> ApiResult<HttpResponse> {
    request.validate()?;

    let mut tx = app_state.db_pool.begin().await?;

    let duplicate: Option<(String,)> = sqlx::query_as("SELECT id FROM dishes WHERE name = ?")
        .bind(&request.name)
        .fetch_optional(&mut *tx)
        .await?;
    if duplicate.is_some() {
        return Err(ApiError::BadRequest(format!(
            "Dish '{}' already exists", request.name
        )));
    }

    let now = Utc::now();
    let dish = Dish {
        id: Uuid::new_v4().to_string(),
        name: request.name.clone(),
        description: request.description.clone(),
        calories: request.calories,
        price: request.price,
        stock_quantity: request.stock_quantity,
        reserved: 0,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        r#"INSERT INTO dishes (id, name, description, calories, price, stock_quantity, reserved, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?)"#,
    )
        .bind(&dish.id)
        .bind(&dish.name)
        .bind(&dish.description)
        .bind(dish.calories)
        .bind(dish.price)
        .bind(dish.stock_quantity)
        .bind(dish.created_at)
        .bind(dish.updated_at)
        .execute(&mut *tx)
        .await?;

    write_recipe(&mut tx, &dish.id, &request.ingredients).await?;

    tx.commit().await?;

    log::info!("Dish '{}' created with {} recipe rows", dish.name, request.ingredients.len());

    let ingredients = fetch_recipe(&app_state.db_pool, &dish.id).await?;

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        DishWithRecipe { dish, ingredients },
        "Dish created".to_string(),
    )))
}

pub async fn update_dish(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<UpdateDishRequest>,
) -> ApiResult<HttpResponse> {
    let dish_id = path.into_inner();
    request.validate()?;

    // Double-Option fields are checked by hand
    if let Some(Some(d)) = &request.description {
        if d.len() > 1000 {
            return Err(ApiError::InvalidValue(
                "Description cannot exceed 1000 characters".to_string(),
            ));
        }
    }
    if let Some(Some(c)) = request.calories {
        if c < 0 {
            return Err(ApiError::InvalidValue("Calories must be non-negative".to_string()));
        }
    }

    let mut tx = app_state.db_pool.begin().await?;

    let existing: Dish = sqlx::query_as("SELECT * FROM dishes WHERE id = ?")
        .bind(&dish_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::dish_not_found(&dish_id))?;

    let name = request.name.clone().unwrap_or(existing.name);
    // Absent leaves the stored value, explicit null clears it
    let description = match &request.description {
        Some(value) => value.clone(),
        None => existing.description,
    };
    let calories = match request.calories {
        Some(value) => value,
        None => existing.calories,
    };
    let price = request.price.unwrap_or(existing.price);

    sqlx::query(
        "UPDATE dishes SET name = ?, description = ?, calories = ?, price = ?, updated_at = ? WHERE id = ?",
    )
        .bind(&name)
        .bind(&description)
        .bind(calories)
        .bind(price)
        .bind(Utc::now())
        .bind(&dish_id)
        .execute(&mut *tx)
        .await?;

    if let Some(items) = &request.ingredients {
        write_recipe(&mut tx, &dish_id, items).await?;
    }

    tx.commit().await?;

    let dish: Dish = sqlx::query_as("SELECT * FROM dishes WHERE id = ?")
        .bind(&dish_id)
        .fetch_one(&app_state.db_pool)
        .await?;
    let ingredients = fetch_recipe(&app_state.db_pool, &dish_id).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        DishWithRecipe { dish, ingredients },
        "Dish updated".to_string(),
    )))
}

pub async fn delete_dish(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let dish_id = path.into_inner();

    let result = sqlx::query("DELETE FROM dishes WHERE id = ?")
        .bind(&dish_id)
        .execute(&app_state.db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::dish_not_found(&dish_id));
    }

    log::info!("Dish {} deleted", dish_id);

    Ok(HttpResponse::Ok().json(ApiResponse::<()>::success_with_message(
        (),
        "Dish deleted".to_string(),
    )))
}

// ==================== STUDENT ROSTER ====================

pub async fn list_students(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<PaginationQuery>,
) -> ApiResult<HttpResponse> {
    let (_, per_page, offset) = query.normalize();

    let students: Vec<Student> =
        sqlx::query_as("SELECT * FROM students ORDER BY full_name LIMIT ? OFFSET ?")
            .bind(per_page)
            .bind(offset)
            .fetch_all(&app_state.db_pool)
            .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(students)))
}

pub async fn create_student(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreateStudentRequest>,
) -> ApiResult<HttpResponse> {
    request.validate()?;

    let student = Student {
        id: Uuid::new_v4().to_string(),
        full_name: request.full_name.clone(),
        created_at: Utc::now(),
    };

    sqlx::query("INSERT INTO students (id, full_name, created_at) VALUES (?, ?, ?)")
        .bind(&student.id)
        .bind(&student.full_name)
        .bind(student.created_at)
        .execute(&app_state.db_pool)
        .await?;

    log::info!("Student '{}' registered as {}", student.full_name, student.id);

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        student,
        "Student registered".to_string(),
    )))
}
