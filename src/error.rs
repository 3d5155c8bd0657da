use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use std::fmt;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    InvalidValue(String),
    InsufficientStock(String),
    AlreadyIssued(String),
    InvalidTransition(String),
    InternalServerError(String),
    DatabaseError(sqlx::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    message: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            ApiError::InvalidValue(msg) => write!(f, "Invalid Value: {}", msg),
            ApiError::InsufficientStock(msg) => write!(f, "Insufficient Stock: {}", msg),
            ApiError::AlreadyIssued(msg) => write!(f, "Already Issued: {}", msg),
            ApiError::InvalidTransition(msg) => write!(f, "Invalid Transition: {}", msg),
            ApiError::InternalServerError(msg) => write!(f, "Internal Server Error: {}", msg),
            ApiError::DatabaseError(err) => write!(f, "Database Error: {}", err),
        }
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        let error_response = ErrorResponse {
            success: false,
            message: self.to_string(),
        };

        match self {
            ApiError::BadRequest(_) => HttpResponse::BadRequest().json(error_response),
            ApiError::NotFound(_) => HttpResponse::NotFound().json(error_response),
            ApiError::InvalidValue(_) => HttpResponse::UnprocessableEntity().json(error_response),
            ApiError::InsufficientStock(_) => HttpResponse::Conflict().json(error_response),
            ApiError::AlreadyIssued(_) => HttpResponse::Conflict().json(error_response),
            ApiError::InvalidTransition(_) => HttpResponse::Conflict().json(error_response),
            ApiError::InternalServerError(_) => HttpResponse::InternalServerError().json(error_response),
            ApiError::DatabaseError(_) => HttpResponse::InternalServerError().json(error_response),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::DatabaseError(err)
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::InvalidValue(err.to_string())
    }
}

// Специфичные ошибки для столовой
impl ApiError {
    pub fn dish_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("Dish with ID '{}' not found", id))
    }

    pub fn ingredient_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("Ingredient with ID '{}' not found", id))
    }

    pub fn student_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("Student with ID '{}' not found", id))
    }

    pub fn order_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("Order with ID '{}' not found", id))
    }

    pub fn request_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("Purchase request with ID '{}' not found", id))
    }

    pub fn insufficient_ingredient(name: &str, dish: &str) -> Self {
        ApiError::InsufficientStock(format!(
            "Not enough '{}' to prepare '{}'", name, dish
        ))
    }

    pub fn dish_out_of_stock(name: &str) -> Self {
        ApiError::InsufficientStock(format!("Dish '{}' is out of stock", name))
    }

    pub fn already_issued_today(student_id: &str) -> Self {
        ApiError::AlreadyIssued(format!(
            "Student '{}' has already received a meal today", student_id
        ))
    }

    pub fn invalid_status_transition(from: &str, to: &str) -> Self {
        ApiError::InvalidTransition(format!(
            "Cannot change purchase request status from '{}' to '{}'", from, to
        ))
    }
}
