// src/monitoring.rs
use actix_web::{HttpResponse, web};
use serde::Serialize;
use std::sync::{Arc, atomic::{AtomicU64, Ordering}};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio::time::{interval, Duration};

#[derive(Debug, Clone)]
pub struct Metrics {
    pub request_count: Arc<AtomicU64>,
    pub error_count: Arc<AtomicU64>,
    pub meals_issued: Arc<AtomicU64>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            request_count: Arc::new(AtomicU64::new(0)),
            error_count: Arc::new(AtomicU64::new(0)),
            meals_issued: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn increment_requests(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_errors(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_meals_issued(&self) {
        self.meals_issued.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

#[derive(Serialize)]
pub struct MetricsResponse {
    pub requests_total: u64,
    pub errors_total: u64,
    pub meals_issued_total: u64,
}

pub async fn health_check() -> HttpResponse {
    let response = HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    HttpResponse::Ok().json(response)
}

pub async fn readiness_check(pool: web::Data<SqlitePool>) -> HttpResponse {
    match sqlx::query("SELECT 1").fetch_one(pool.get_ref()).await {
        Ok(_) => HttpResponse::Ok().json(serde_json::json!({
            "status": "ready",
            "database": "connected"
        })),
        Err(_) => HttpResponse::ServiceUnavailable().json(serde_json::json!({
            "status": "not ready",
            "database": "disconnected"
        })),
    }
}

pub async fn liveness_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "alive",
        "timestamp": Utc::now()
    }))
}

pub async fn metrics_endpoint(metrics: web::Data<Metrics>) -> HttpResponse {
    let response = MetricsResponse {
        requests_total: metrics.request_count.load(Ordering::Relaxed),
        errors_total: metrics.error_count.load(Ordering::Relaxed),
        meals_issued_total: metrics.meals_issued.load(Ordering::Relaxed),
    };

    HttpResponse::Ok().json(response)
}

pub struct RequestLogger {
    metrics: Arc<Metrics>,
}

impl RequestLogger {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }
}

impl<S, B> actix_web::dev::Transform<S, actix_web::dev::ServiceRequest> for RequestLogger
where
    S: actix_web::dev::Service<
        actix_web::dev::ServiceRequest,
        Response = actix_web::dev::ServiceResponse<B>,
        Error = actix_web::Error,
    >,
    S::Future: 'static,
    B: 'static,
{
    type Response = actix_web::dev::ServiceResponse<B>;
    type Error = actix_web::Error;
    type InitError = ();
    type Transform = RequestLoggerMiddleware<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(RequestLoggerMiddleware {
            service,
            metrics: self.metrics.clone(),
        }))
    }
}

pub struct RequestLoggerMiddleware<S> {
    service: S,
    metrics: Arc<Metrics>,
}

impl<S, B> actix_web::dev::Service<actix_web::dev::ServiceRequest> for RequestLoggerMiddleware<S>
where
    S: actix_web::dev::Service<
        actix_web::dev::ServiceRequest,
        Response = actix_web::dev::ServiceResponse<B>,
        Error = actix_web::Error,
    >,
    S::Future: 'static,
    B: 'static,
{
    type Response = actix_web::dev::ServiceResponse<B>;
    type Error = actix_web::Error;
    type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, ctx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: actix_web::dev::ServiceRequest) -> Self::Future {
        let metrics = self.metrics.clone();
        let is_issue = req.path() == "/api/issue" && req.method() == actix_web::http::Method::POST;
        let fut = self.service.call(req);

        Box::pin(async move {
            metrics.increment_requests();
            let res = fut.await;

            if let Ok(ref response) = res {
                if response.status().is_client_error() || response.status().is_server_error() {
                    metrics.increment_errors();
                } else if is_issue {
                    metrics.increment_meals_issued();
                }
            }
            res
        })
    }
}

/// Periodic low-stock sweep. Logs a warning for every ingredient at or
/// below its threshold so the kitchen notices before service runs dry.
pub async fn start_maintenance_tasks(pool: SqlitePool, check_interval_seconds: u64) {
    tokio::spawn(async move {
        low_stock_watch(pool, check_interval_seconds).await;
    });
}

async fn low_stock_watch(pool: SqlitePool, check_interval_seconds: u64) {
    let mut interval = interval(Duration::from_secs(check_interval_seconds.max(1)));

    loop {
        interval.tick().await;

        let rows: Result<Vec<(String, f64, f64, String)>, sqlx::Error> = sqlx::query_as(
            r#"SELECT name, current_quantity, min_quantity, unit
               FROM ingredients
               WHERE current_quantity <= min_quantity
               ORDER BY current_quantity / MAX(min_quantity, 0.000001)"#,
        )
        .fetch_all(&pool)
        .await;

        match rows {
            Ok(low) => {
                for (name, current, min, unit) in &low {
                    log::warn!(
                        "Low stock: '{}' at {} {} (minimum {})",
                        name, current, unit, min
                    );
                }
                if !low.is_empty() {
                    log::info!("Low stock sweep: {} ingredients below threshold", low.len());
                }
            }
            Err(e) => {
                log::error!("Low stock sweep failed: {}", e);
            }
        }
    }
}
