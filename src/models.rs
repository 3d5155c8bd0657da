// src/models.rs
//! Модели данных для системы школьной столовой
//!
//! Доменные записи (ингредиенты, блюда, выдача, заявки) и типизированные
//! структуры запросов с серверной валидацией.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

// ==================== PURCHASE REQUEST STATUS ====================

/// Статус заявки на закупку
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PurchaseRequestStatus {
    Pending,
    Approved,
    Rejected,
    Completed,
}

impl PurchaseRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseRequestStatus::Pending => "pending",
            PurchaseRequestStatus::Approved => "approved",
            PurchaseRequestStatus::Rejected => "rejected",
            PurchaseRequestStatus::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(PurchaseRequestStatus::Pending),
            "approved" => Some(PurchaseRequestStatus::Approved),
            "rejected" => Some(PurchaseRequestStatus::Rejected),
            "completed" => Some(PurchaseRequestStatus::Completed),
            _ => None,
        }
    }

    /// Transitions are one-way: pending -> approved -> completed,
    /// or pending -> rejected. Terminal states never re-open.
    pub fn can_transition_to(&self, next: PurchaseRequestStatus) -> bool {
        matches!(
            (self, next),
            (PurchaseRequestStatus::Pending, PurchaseRequestStatus::Approved)
                | (PurchaseRequestStatus::Pending, PurchaseRequestStatus::Rejected)
                | (PurchaseRequestStatus::Approved, PurchaseRequestStatus::Completed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PurchaseRequestStatus::Rejected | PurchaseRequestStatus::Completed)
    }
}

impl std::fmt::Display for PurchaseRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==================== DOMAIN RECORDS ====================

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Student {
    pub id: String,
    pub full_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Ingredient {
    pub id: String,
    pub name: String,
    pub unit: String,
    pub current_quantity: f64,
    pub min_quantity: f64,
    pub price_per_unit: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ingredient {
    pub fn is_low_stock(&self) -> bool {
        self.current_quantity <= self.min_quantity
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Dish {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub calories: Option<i64>,
    pub price: f64,
    pub stock_quantity: i64,
    pub reserved: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One recipe row, joined with the ingredient it references.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct RecipeItem {
    pub ingredient_id: String,
    pub name: String,
    pub unit: String,
    pub quantity_per_unit: f64,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct IssuanceRecord {
    pub id: String,
    pub student_id: String,
    pub dish_id: String,
    pub issue_date: NaiveDate,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct MealOrder {
    pub id: String,
    pub student_id: String,
    pub dish_id: String,
    pub status: String,
    pub order_date: DateTime<Utc>,
    pub fulfilled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct PurchaseRequest {
    pub id: String,
    pub ingredient_id: String,
    pub quantity: f64,
    pub status: PurchaseRequestStatus,
    pub requester: String,
    pub request_date: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

// ==================== REQUEST STRUCTURES ====================

#[derive(Debug, Deserialize, Validate)]
pub struct IssueMealRequest {
    #[validate(length(min = 1, max = 64, message = "Student ID is required"))]
    pub student_id: String,

    #[validate(length(min = 1, max = 64, message = "Dish ID is required"))]
    pub dish_id: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PlaceOrderRequest {
    #[validate(length(min = 1, max = 64, message = "Student ID is required"))]
    pub student_id: String,

    #[validate(length(min = 1, max = 64, message = "Dish ID is required"))]
    pub dish_id: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateStudentRequest {
    #[validate(length(min = 1, max = 255, message = "Name must be between 1 and 255 characters"))]
    pub full_name: String,
}

/// Stock quantities arrive either as a plain number or as a short
/// arithmetic expression typed by the cook ("50+10"). Expressions are
/// parsed strictly, never evaluated as code.
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum QuantityInput {
    Number(f64),
    Expression(String),
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InventoryItemType {
    Ingredient,
    Dish,
}

#[derive(Debug, Deserialize)]
pub struct UpdateInventoryRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub item_type: InventoryItemType,
    pub quantity: QuantityInput,
    pub min_quantity: Option<f64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AdjustIngredientRequest {
    /// Positive for restock, negative for consumption.
    pub delta: f64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RecipeItemRequest {
    #[validate(length(min = 1, max = 64, message = "Ingredient ID is required"))]
    pub ingredient_id: String,

    #[validate(range(min = 0.000001, message = "Quantity per unit must be positive"))]
    pub quantity_per_unit: f64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateDishRequest {
    #[validate(length(min = 1, max = 255, message = "Name must be between 1 and 255 characters"))]
    pub name: String,

    #[validate(length(max = 1000, message = "Description cannot exceed 1000 characters"))]
    pub description: Option<String>,

    #[validate(range(min = 0, message = "Calories must be non-negative"))]
    pub calories: Option<i64>,

    #[validate(range(min = 0.0, message = "Price must be non-negative"))]
    pub price: f64,

    #[validate(range(min = 0, message = "Stock quantity must be non-negative"))]
    pub stock_quantity: i64,

    #[validate(nested)]
    pub ingredients: Vec<RecipeItemRequest>,
}

/// Partial update. `description` and `calories` use a double `Option` so an
/// absent field leaves the value alone while an explicit `null` clears it.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateDishRequest {
    #[validate(length(min = 1, max = 255, message = "Name must be between 1 and 255 characters"))]
    pub name: Option<String>,

    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,

    #[serde(default, deserialize_with = "double_option")]
    pub calories: Option<Option<i64>>,

    #[validate(range(min = 0.0, message = "Price must be non-negative"))]
    pub price: Option<f64>,

    #[validate(nested)]
    pub ingredients: Option<Vec<RecipeItemRequest>>,
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePurchaseRequestRequest {
    #[validate(length(min = 1, max = 64, message = "Ingredient ID is required"))]
    pub ingredient_id: String,

    pub quantity: f64,

    #[validate(length(max = 255, message = "Requester cannot exceed 255 characters"))]
    pub requester: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetRequestStatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct PurchaseRequestFilter {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SetAllergensRequest {
    pub ingredient_ids: Vec<String>,
}

// ==================== RESPONSE STRUCTURES ====================

#[derive(Debug, Serialize)]
pub struct IssueMealResponse {
    pub record: IssuanceRecord,
    pub dish_name: String,
    pub new_stock: i64,
    pub message: String,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct OrderView {
    pub id: String,
    pub dish_id: String,
    pub dish_name: String,
    pub status: String,
    pub order_date: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct StudentOrdersResponse {
    pub student_name: String,
    pub orders: Vec<OrderView>,
}

#[derive(Debug, Serialize)]
pub struct IngredientFlag {
    pub ingredient_id: String,
    pub name: String,
    pub is_allergen: bool,
}

#[derive(Debug, Serialize)]
pub struct AllergenReport {
    pub is_dangerous: bool,
    pub ingredients: Vec<IngredientFlag>,
}

#[derive(Debug, Serialize)]
pub struct DishWithRecipe {
    #[serde(flatten)]
    pub dish: Dish,
    pub ingredients: Vec<RecipeItem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for s in ["pending", "approved", "rejected", "completed"] {
            let parsed = PurchaseRequestStatus::from_str(s).unwrap();
            assert_eq!(parsed.as_str(), s);
        }
        assert!(PurchaseRequestStatus::from_str("reopened").is_none());
    }

    #[test]
    fn test_status_transitions_are_one_way() {
        use PurchaseRequestStatus::*;

        assert!(Pending.can_transition_to(Approved));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Approved.can_transition_to(Completed));

        // No re-opening, no double approval
        assert!(!Approved.can_transition_to(Approved));
        assert!(!Approved.can_transition_to(Pending));
        assert!(!Rejected.can_transition_to(Approved));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Completed));
    }

    #[test]
    fn test_update_dish_request_distinguishes_absent_from_null() {
        let absent: UpdateDishRequest = serde_json::from_str(r#"{"name": "Soup"}"#).unwrap();
        assert!(absent.description.is_none());
        assert!(absent.calories.is_none());

        let cleared: UpdateDishRequest =
            serde_json::from_str(r#"{"description": null, "calories": null}"#).unwrap();
        assert_eq!(cleared.description, Some(None));
        assert_eq!(cleared.calories, Some(None));

        let set: UpdateDishRequest =
            serde_json::from_str(r#"{"description": "Hot", "calories": 250}"#).unwrap();
        assert_eq!(set.description, Some(Some("Hot".to_string())));
        assert_eq!(set.calories, Some(Some(250)));
    }

    #[test]
    fn test_low_stock_flag() {
        let now = chrono::Utc::now();
        let ing = Ingredient {
            id: "i1".into(),
            name: "Milk".into(),
            unit: "l".into(),
            current_quantity: 5.0,
            min_quantity: 10.0,
            price_per_unit: None,
            created_at: now,
            updated_at: now,
        };
        assert!(ing.is_low_stock());
    }
}
