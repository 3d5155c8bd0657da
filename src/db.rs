// src/db.rs - Database migrations and setup

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Enable foreign keys and WAL mode
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(pool)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(pool)
        .await?;

    // Create students table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS students (
            id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL CHECK(length(full_name) > 0 AND length(full_name) <= 255),
            created_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Create ingredients table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingredients (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE CHECK(length(name) > 0 AND length(name) <= 255),
            unit TEXT NOT NULL CHECK(length(unit) > 0 AND length(unit) <= 20),
            current_quantity REAL NOT NULL DEFAULT 0 CHECK(current_quantity >= 0),
            min_quantity REAL NOT NULL DEFAULT 10.0 CHECK(min_quantity >= 0),
            price_per_unit REAL CHECK(price_per_unit IS NULL OR price_per_unit >= 0),
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Create dishes table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dishes (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE CHECK(length(name) > 0 AND length(name) <= 255),
            description TEXT CHECK(description IS NULL OR length(description) <= 1000),
            calories INTEGER CHECK(calories IS NULL OR calories >= 0),
            price REAL NOT NULL DEFAULT 0.0 CHECK(price >= 0),
            stock_quantity INTEGER NOT NULL DEFAULT 0 CHECK(stock_quantity >= 0),
            reserved INTEGER NOT NULL DEFAULT 0 CHECK(reserved >= 0),
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Recipe: which ingredients a dish consumes per serving
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dish_ingredients (
            dish_id TEXT NOT NULL,
            ingredient_id TEXT NOT NULL,
            quantity_per_unit REAL NOT NULL CHECK(quantity_per_unit > 0),
            position INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (dish_id, ingredient_id),
            FOREIGN KEY (dish_id) REFERENCES dishes (id) ON DELETE CASCADE,
            FOREIGN KEY (ingredient_id) REFERENCES ingredients (id) ON DELETE CASCADE
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Append-only issuance log
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS issuance_log (
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            dish_id TEXT NOT NULL,
            issue_date DATE NOT NULL,
            issued_at DATETIME NOT NULL,
            FOREIGN KEY (student_id) REFERENCES students (id),
            FOREIGN KEY (dish_id) REFERENCES dishes (id)
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Pre-placed orders (reservation flow)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meal_orders (
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            dish_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending' CHECK(status IN ('pending', 'fulfilled')),
            order_date DATETIME NOT NULL,
            fulfilled_at DATETIME,
            FOREIGN KEY (student_id) REFERENCES students (id),
            FOREIGN KEY (dish_id) REFERENCES dishes (id)
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Restocking workflow
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS purchase_requests (
            id TEXT PRIMARY KEY,
            ingredient_id TEXT NOT NULL,
            quantity REAL NOT NULL CHECK(quantity > 0),
            status TEXT NOT NULL DEFAULT 'pending' CHECK(
                status IN ('pending', 'approved', 'rejected', 'completed')
            ),
            requester TEXT NOT NULL CHECK(length(requester) > 0 AND length(requester) <= 255),
            request_date DATETIME NOT NULL,
            resolved_at DATETIME,
            FOREIGN KEY (ingredient_id) REFERENCES ingredients (id) ON DELETE CASCADE
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Student allergen declarations
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS student_allergens (
            student_id TEXT NOT NULL,
            ingredient_id TEXT NOT NULL,
            note TEXT CHECK(note IS NULL OR length(note) <= 500),
            PRIMARY KEY (student_id, ingredient_id),
            FOREIGN KEY (student_id) REFERENCES students (id) ON DELETE CASCADE,
            FOREIGN KEY (ingredient_id) REFERENCES ingredients (id) ON DELETE CASCADE
        )
        "#,
    )
        .execute(pool)
        .await?;

    // ==================== CREATE INDEXES ====================

    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_issuance_student_date ON issuance_log(student_id, issue_date)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_issuance_date ON issuance_log(issue_date)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_orders_student_status ON meal_orders(student_id, status)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_orders_date ON meal_orders(order_date)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_purchase_requests_status ON purchase_requests(status)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_purchase_requests_date ON purchase_requests(request_date)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_dish_ingredients_dish ON dish_ingredients(dish_id)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_allergens_student ON student_allergens(student_id)")
        .execute(pool).await;

    Ok(())
}

// ==================== DEMO DATA ====================

/// Seeds ingredients, dishes and recipes on an empty database.
/// Mirrors what the kitchen actually stocks; gated behind CANTEEN_SEED_DEMO.
pub async fn seed_demo_data(pool: &SqlitePool) -> Result<()> {
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ingredients")
        .fetch_one(pool)
        .await?;
    if count.0 > 0 {
        return Ok(());
    }

    let now = chrono::Utc::now();

    let ingredients = [
        // name, unit, current_quantity, min_quantity, price_per_unit
        ("Potatoes", "kg", 50.0, 10.0, 40.0),
        ("Carrots", "kg", 20.0, 5.0, 60.0),
        ("Onions", "kg", 15.0, 3.0, 50.0),
        ("Beef", "kg", 30.0, 5.0, 400.0),
        ("Chicken", "kg", 25.0, 5.0, 250.0),
        ("Rice", "kg", 40.0, 10.0, 80.0),
        ("Buckwheat", "kg", 35.0, 8.0, 90.0),
        ("Milk", "l", 60.0, 20.0, 70.0),
        ("Eggs", "pcs", 200.0, 50.0, 10.0),
        ("Butter", "kg", 10.0, 2.0, 300.0),
        ("Salt", "kg", 20.0, 2.0, 20.0),
    ];

    let mut ingredient_ids = std::collections::HashMap::new();
    for (name, unit, qty, min_qty, price) in ingredients {
        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            r#"INSERT INTO ingredients (id, name, unit, current_quantity, min_quantity, price_per_unit, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#
        )
            .bind(&id)
            .bind(name)
            .bind(unit)
            .bind(qty)
            .bind(min_qty)
            .bind(price)
            .bind(now)
            .bind(now)
            .execute(pool)
            .await?;
        ingredient_ids.insert(name, id);
    }

    let dishes = [
        // name, description, calories, price, stock_quantity, recipe
        ("Borscht", "Beef borscht with sour cream", 350, 120.0, 45,
         vec![("Potatoes", 0.2), ("Carrots", 0.1), ("Onions", 0.05), ("Beef", 0.15), ("Salt", 0.01)]),
        ("Mashed potatoes", "Potato puree with butter", 250, 80.0, 60,
         vec![("Potatoes", 0.3), ("Milk", 0.05), ("Butter", 0.02), ("Salt", 0.005)]),
        ("Chicken cutlets", "Cutlets from chicken fillet", 300, 100.0, 50,
         vec![("Chicken", 0.2), ("Onions", 0.03), ("Eggs", 0.3)]),
        ("Omelette", "Omelette with milk", 280, 70.0, 40,
         vec![("Eggs", 2.0), ("Milk", 0.05), ("Salt", 0.005)]),
        ("Buckwheat porridge", "Buckwheat with butter", 200, 60.0, 70,
         vec![("Buckwheat", 0.15), ("Butter", 0.01), ("Salt", 0.005)]),
    ];

    for (name, description, calories, price, stock, recipe) in dishes {
        let dish_id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            r#"INSERT INTO dishes (id, name, description, calories, price, stock_quantity, reserved, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?)"#
        )
            .bind(&dish_id)
            .bind(name)
            .bind(description)
            .bind(calories)
            .bind(price)
            .bind(stock)
            .bind(now)
            .bind(now)
            .execute(pool)
            .await?;

        for (position, (ingredient_name, qty)) in recipe.iter().enumerate() {
            let ingredient_id = &ingredient_ids[ingredient_name];
            sqlx::query(
                r#"INSERT INTO dish_ingredients (dish_id, ingredient_id, quantity_per_unit, position)
                   VALUES (?, ?, ?, ?)"#
            )
                .bind(&dish_id)
                .bind(ingredient_id)
                .bind(qty)
                .bind(position as i64)
                .execute(pool)
                .await?;
        }
    }

    log::info!("Demo data seeded: {} ingredients, {} dishes", ingredient_ids.len(), 5);
    Ok(())
}

// ==================== TEST SUPPORT ====================

/// In-memory pool with the full schema applied. A single connection keeps
/// the in-memory database alive and visible to every statement.
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("failed to open in-memory database");
    run_migrations(&pool).await.expect("failed to run migrations");
    pool
}

// ==================== DATABASE RESET (DEVELOPMENT ONLY) ====================

pub async fn reset_database(pool: &SqlitePool) -> Result<()> {
    log::warn!("Resetting database - all data will be lost!");

    let drop_queries = [
        "DROP TABLE IF EXISTS student_allergens",
        "DROP TABLE IF EXISTS purchase_requests",
        "DROP TABLE IF EXISTS meal_orders",
        "DROP TABLE IF EXISTS issuance_log",
        "DROP TABLE IF EXISTS dish_ingredients",
        "DROP TABLE IF EXISTS dishes",
        "DROP TABLE IF EXISTS ingredients",
        "DROP TABLE IF EXISTS students",
    ];

    for query in drop_queries.iter() {
        let _ = sqlx::query(query).execute(pool).await;
    }

    run_migrations(pool).await?;

    Ok(())
}
