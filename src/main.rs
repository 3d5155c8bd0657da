// src/main.rs - School canteen backend
use actix_web::{
    middleware::{Compress, DefaultHeaders, Logger},
    web, App, HttpResponse, HttpServer,
};
use actix_cors::Cors;
use actix_web::http::header;
use anyhow::Context;
use sqlx::{migrate::MigrateDatabase, sqlite::SqliteConnectOptions, Sqlite, SqlitePool};
use std::env;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod allergen_handlers;
mod config;
mod db;
mod error;
mod handlers;
mod inventory_handlers;
mod issuance_handlers;
mod menu_handlers;
mod models;
mod monitoring;
mod purchase_handlers;
pub mod validator;

use config::{load_config, Config};
use monitoring::{Metrics, RequestLogger};

use allergen_handlers::{get_allergen_report, get_student_allergens, set_student_allergens};
use handlers::get_dashboard_stats;
use inventory_handlers::{
    adjust_ingredient, get_low_stock_ingredients, list_ingredients, update_inventory,
};
use issuance_handlers::{check_orders, create_order, finish_order, issue_meal};
use menu_handlers::{
    create_dish, create_student, delete_dish, get_dish, list_dishes, list_students, update_dish,
};
use purchase_handlers::{create_purchase_request, list_purchase_requests, update_request_status};

pub struct AppState {
    pub db_pool: SqlitePool,
    pub config: Config,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration (this calls load_env_file internally)
    let config = load_config()?;

    setup_logging(&config)?;

    if config.is_production() {
        validate_production_config(&config)?;
    }

    setup_database(&config.database.url).await?;

    let pool = create_database_pool(&config.database).await?;

    db::run_migrations(&pool).await?;

    if env::var("CANTEEN_RESET_DB").as_deref() == Ok("1") {
        db::reset_database(&pool).await?;
    }

    if env::var("CANTEEN_SEED_DEMO").as_deref() == Ok("1") {
        db::seed_demo_data(&pool).await?;
    }

    config.print_startup_info();

    let app_state = Arc::new(AppState {
        db_pool: pool.clone(),
        config: config.clone(),
    });

    monitoring::start_maintenance_tasks(pool.clone(), config.policy.low_stock_check_seconds).await;

    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    log::info!("Starting server at http://{}", bind_address);

    let metrics_arc = Arc::new(Metrics::new());
    let metrics = web::Data::from(metrics_arc.clone());

    let workers = config.server.workers;

    let mut server = HttpServer::new(move || {
        let cors = setup_cors(&config.security.allowed_origins);
        let security_headers = setup_security_headers();

        App::new()
            .wrap(cors)
            .wrap(security_headers)
            .wrap(Logger::default())
            .wrap(Compress::default())
            .wrap(RequestLogger::new(metrics_arc.clone()))
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::Data::new(pool.clone()))
            .app_data(metrics.clone())

            // Health check and metrics (no auth)
            .service(
                web::scope("/health")
                    .route("", web::get().to(|| async { HttpResponse::Ok().body("OK") }))
                    .route("/live", web::get().to(monitoring::liveness_check))
                    .route("/ready", web::get().to(monitoring::readiness_check))
                    .route("/status", web::get().to(monitoring::health_check))
                    .route("/metrics", web::get().to(monitoring::metrics_endpoint))
            )

            .service(
                web::scope("/api")
                    // Issuance (cook's counter)
                    .route("/issue", web::post().to(issue_meal))

                    // Pre-placed orders
                    .service(
                        web::scope("/orders")
                            .route("", web::post().to(create_order))
                            .route("/{id}/finish", web::post().to(finish_order))
                    )

                    // Ingredient ledger
                    .service(
                        web::scope("/ingredients")
                            .route("", web::get().to(list_ingredients))
                            .route("/low-stock", web::get().to(get_low_stock_ingredients))
                            .route("/{id}/adjust", web::post().to(adjust_ingredient))
                    )

                    // Administrative stock corrections
                    .route("/inventory", web::put().to(update_inventory))

                    // Menu
                    .service(
                        web::scope("/dishes")
                            .route("", web::get().to(list_dishes))
                            .route("", web::post().to(create_dish))
                            .route("/{id}", web::get().to(get_dish))
                            .route("/{id}", web::put().to(update_dish))
                            .route("/{id}", web::delete().to(delete_dish))
                    )

                    // Restocking workflow
                    .service(
                        web::scope("/purchase-requests")
                            .route("", web::get().to(list_purchase_requests))
                            .route("", web::post().to(create_purchase_request))
                            .route("/{id}/status", web::put().to(update_request_status))
                    )

                    // Students, their orders and allergen profiles
                    .service(
                        web::scope("/students")
                            .route("", web::get().to(list_students))
                            .route("", web::post().to(create_student))
                            .route("/{id}/orders", web::get().to(check_orders))
                            .route("/{id}/allergens", web::get().to(get_student_allergens))
                            .route("/{id}/allergens", web::put().to(set_student_allergens))
                            .route(
                                "/{student_id}/allergen-report/{dish_id}",
                                web::get().to(get_allergen_report),
                            )
                    )

                    // Dashboard
                    .route("/admin/stats", web::get().to(get_dashboard_stats))
            )
    });

    if let Some(workers) = workers {
        server = server.workers(workers);
    }

    server
        .bind(&bind_address)?
        .run()
        .await
        .context("Server failed to run")?;

    Ok(())
}

// ==================== HELPER FUNCTIONS ====================

pub fn setup_cors(allowed_origins: &[String]) -> Cors {
    let mut cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .allowed_headers(vec![
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::USER_AGENT,
        ])
        .expose_headers(vec![header::CONTENT_LENGTH])
        .max_age(3600);

    let is_production = env::var("CANTEEN_ENV").as_deref() == Ok("production");

    if allowed_origins.contains(&"*".to_string()) {
        if is_production {
            panic!("Cannot start server with wildcard CORS in production");
        }
        log::warn!("Using wildcard CORS (*) in development mode");
        cors = cors.allow_any_origin().allow_any_header().allow_any_method();
    } else {
        for origin in allowed_origins {
            if origin.is_empty() {
                continue;
            }
            cors = cors.allowed_origin(origin);
        }
    }

    cors
}

fn setup_logging(config: &Config) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            let level = config.logging.level.as_str();
            tracing_subscriber::EnvFilter::new(level)
        });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

fn validate_production_config(config: &Config) -> anyhow::Result<()> {
    if config.security.allowed_origins.contains(&"*".to_string()) {
        anyhow::bail!("Wildcard CORS origins not allowed in production!");
    }
    Ok(())
}

async fn setup_database(database_url: &str) -> anyhow::Result<()> {
    if !Sqlite::database_exists(database_url).await.unwrap_or(false) {
        log::info!("Creating database: {}", database_url);
        Sqlite::create_database(database_url).await?;
    }
    Ok(())
}

async fn create_database_pool(db_config: &config::DatabaseConfig) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(db_config.url.trim_start_matches("sqlite:"))
        .create_if_missing(true);

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(db_config.max_connections)
        .min_connections(db_config.min_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

fn setup_security_headers() -> DefaultHeaders {
    DefaultHeaders::new()
        .add(("X-Content-Type-Options", "nosniff"))
        .add(("X-Frame-Options", "DENY"))
        .add(("Referrer-Policy", "strict-origin-when-cross-origin"))
}
