// src/models/inventory.rs

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::common::error::AppError;

// --- 1. Catálogo ---
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct StockItem {
    pub id: i64,
    pub name: String,
    pub sku: Option<String>,
    pub category: Option<String>,
    pub purchase_price: Option<Decimal>,
    pub is_active: bool,
}

// --- 2. Locais de estoque ---

/// Um depósito ou um veículo. Todo saldo pertence a exatamente um dos dois.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Container {
    Depot(i64),
    Vehicle(i64),
}

impl Container {
    pub fn depot_id(&self) -> Option<i64> {
        match self {
            Container::Depot(id) => Some(*id),
            Container::Vehicle(_) => None,
        }
    }

    pub fn vehicle_id(&self) -> Option<i64> {
        match self {
            Container::Vehicle(id) => Some(*id),
            Container::Depot(_) => None,
        }
    }
}

/// Forma de entrada: `depot_id` xor `vehicle_id`.
#[derive(Debug, Clone, Copy, Default, Deserialize, ToSchema)]
pub struct ContainerRef {
    pub depot_id: Option<i64>,
    pub vehicle_id: Option<i64>,
}

impl ContainerRef {
    pub fn resolve(&self, field: &'static str) -> Result<Container, AppError> {
        match (self.depot_id, self.vehicle_id) {
            (Some(d), None) => Ok(Container::Depot(d)),
            (None, Some(v)) => Ok(Container::Vehicle(v)),
            _ => Err(AppError::invalid(field, "container_exactly_one")),
        }
    }
}

// --- 3. Saldos ---
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct StockBalance {
    pub container_type: String,
    pub container_id: i64,
    pub container_name: String,
    pub stock_item_id: i64,
    pub stock_item_name: String,
    pub quantity: Decimal,
    pub updated_at: DateTime<Utc>,
}

// --- 4. Livro-razão ---
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "movement_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Reception,
    ReceptionReturn,
    Transfer,
    Adjustment,
    Inventory,
}

impl MovementType {
    pub fn prefix(&self) -> DocumentPrefix {
        match self {
            MovementType::Reception => DocumentPrefix::Reception,
            MovementType::ReceptionReturn => DocumentPrefix::ReceptionReturn,
            MovementType::Transfer => DocumentPrefix::Transfer,
            MovementType::Adjustment => DocumentPrefix::Adjustment,
            MovementType::Inventory => DocumentPrefix::Inventory,
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct StockMovement {
    pub id: i64,
    pub reference: String,
    pub document_reference: Option<String>,
    pub movement_type: MovementType,
    pub movement_date: DateTime<Utc>,
    pub stock_item_id: i64,
    pub quantity: Decimal,
    pub from_depot_id: Option<i64>,
    pub from_vehicle_id: Option<i64>,
    pub to_depot_id: Option<i64>,
    pub to_vehicle_id: Option<i64>,
    pub supplier_name: Option<String>,
    pub reason: Option<String>,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Linha a ser gravada no livro-razão. O sinal de `quantity` decide qual lado é afetado:
/// negativo debita `from`, positivo credita `to`.
#[derive(Debug, Clone)]
pub struct NewMovement {
    pub movement_type: MovementType,
    pub stock_item_id: i64,
    pub quantity: Decimal,
    pub from: Option<Container>,
    pub to: Option<Container>,
    pub document_reference: Option<String>,
    pub supplier_name: Option<String>,
    pub reason: Option<String>,
    pub user_id: i64,
}

impl NewMovement {
    /// Local cujo saldo muda com este movimento.
    pub fn affected_container(&self) -> Option<Container> {
        if self.quantity.is_sign_negative() {
            self.from
        } else {
            self.to
        }
    }
}

/// As duas pernas de uma transferência: a soma por item no livro-razão não muda.
pub fn transfer_legs(
    stock_item_id: i64,
    quantity: Decimal,
    from: Container,
    to: Container,
    reason: Option<String>,
    user_id: i64,
) -> [NewMovement; 2] {
    let leg = |signed: Decimal| NewMovement {
        movement_type: MovementType::Transfer,
        stock_item_id,
        quantity: signed,
        from: Some(from),
        to: Some(to),
        document_reference: None,
        supplier_name: None,
        reason: reason.clone(),
        user_id,
    };
    [leg(-quantity), leg(quantity)]
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StockShortfall {
    pub stock_item_id: i64,
    pub stock_item_name: String,
    pub required: Decimal,
    pub available: Decimal,
    pub missing: Decimal,
}

impl StockShortfall {
    pub fn new(stock_item_id: i64, stock_item_name: String, required: Decimal, available: Decimal) -> Self {
        Self {
            stock_item_id,
            stock_item_name,
            required,
            available,
            missing: required - available,
        }
    }
}

// --- Consultas e payloads da API de estoque ---

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct BalanceQuery {
    pub depot_id: Option<i64>,
    pub vehicle_id: Option<i64>,
    pub stock_item_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct MovementQuery {
    pub movement_type: Option<MovementType>,
    pub stock_item_id: Option<i64>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub limit: Option<i64>,
}

impl MovementQuery {
    pub fn clamped_limit(&self) -> i64 {
        self.limit.unwrap_or(100).clamp(1, 500)
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct TransferPayload {
    pub stock_item_id: i64,
    #[validate(custom(function = "crate::models::validate_positive"))]
    pub quantity: Decimal,
    pub from: ContainerRef,
    pub to: ContainerRef,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AdjustmentPayload {
    #[serde(flatten)]
    pub container: ContainerRef,
    pub stock_item_id: i64,
    /// Com sinal; zero é recusado.
    pub quantity: Decimal,
    #[validate(length(min = 1, code = "required"))]
    pub reason: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct InventoryCountPayload {
    #[serde(flatten)]
    pub container: ContainerRef,
    pub stock_item_id: i64,
    #[validate(custom(function = "crate::models::validate_not_negative"))]
    pub counted_quantity: Decimal,
    pub reason: Option<String>,
}

// --- 5. Referências PREFIX-YYYYMMDD-NNNN ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentPrefix {
    Reception,
    ReceptionReturn,
    Transfer,
    Adjustment,
    Inventory,
    Outgoing,
    Order,
    Return,
}

impl DocumentPrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentPrefix::Reception => "REC",
            DocumentPrefix::ReceptionReturn => "RET-REC",
            DocumentPrefix::Transfer => "TRANS",
            DocumentPrefix::Adjustment => "AJUST",
            DocumentPrefix::Inventory => "INV",
            DocumentPrefix::Outgoing => "OUT",
            DocumentPrefix::Order => "CMD",
            DocumentPrefix::Return => "RET",
        }
    }
}

pub fn format_reference(prefix: DocumentPrefix, day: NaiveDate, sequence: i32) -> String {
    format!("{}-{}-{:04}", prefix.as_str(), day.format("%Y%m%d"), sequence)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_use_literal_format() {
        let day = NaiveDate::from_ymd_opt(2026, 1, 15).expect("date");
        assert_eq!(format_reference(DocumentPrefix::Order, day, 1), "CMD-20260115-0001");
        assert_eq!(format_reference(DocumentPrefix::Outgoing, day, 1), "OUT-20260115-0001");
        assert_eq!(format_reference(DocumentPrefix::Reception, day, 12), "REC-20260115-0012");
        assert_eq!(
            format_reference(DocumentPrefix::ReceptionReturn, day, 1),
            "RET-REC-20260115-0001"
        );
        assert_eq!(format_reference(DocumentPrefix::Transfer, day, 10000), "TRANS-20260115-10000");
    }

    #[test]
    fn container_ref_requires_exactly_one_side() {
        let both = ContainerRef { depot_id: Some(1), vehicle_id: Some(2) };
        let none = ContainerRef::default();
        let depot = ContainerRef { depot_id: Some(3), vehicle_id: None };

        assert!(both.resolve("source").is_err());
        assert!(none.resolve("source").is_err());
        assert_eq!(depot.resolve("source").expect("depot"), Container::Depot(3));
    }

    #[test]
    fn transfer_legs_cancel_out() {
        let [out, inn] = transfer_legs(
            7,
            Decimal::from(5),
            Container::Depot(1),
            Container::Vehicle(2),
            None,
            1,
        );
        assert_eq!(out.quantity + inn.quantity, Decimal::ZERO);
        assert_eq!(out.affected_container(), Some(Container::Depot(1)));
        assert_eq!(inn.affected_container(), Some(Container::Vehicle(2)));
    }

    #[test]
    fn movement_limit_is_clamped() {
        assert_eq!(MovementQuery::default().clamped_limit(), 100);
        let q = MovementQuery { limit: Some(5000), ..Default::default() };
        assert_eq!(q.clamped_limit(), 500);
    }

    #[test]
    fn shortfall_reports_missing_units() {
        let s = StockShortfall::new(1, "Riz".into(), Decimal::from(30), Decimal::from(25));
        assert_eq!(s.missing, Decimal::from(5));
    }
}
