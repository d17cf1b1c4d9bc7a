// src/models/logistics.rs

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::models::inventory::ContainerRef;

// Status comum a recepções, saídas e devoluções
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "document_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    Completed,
    Cancelled,
}

// --- Recepção (entrada de fornecedor) ---
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct Reception {
    pub id: i64,
    pub reference: String,
    pub reception_date: NaiveDate,
    pub supplier_name: String,
    pub bl_number: Option<String>,
    pub depot_id: i64,
    pub user_id: i64,
    pub status: DocumentStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct DocumentLine {
    pub id: i64,
    pub stock_item_id: i64,
    pub stock_item_name: String,
    pub quantity: Decimal,
    pub unit_price: Option<Decimal>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReceptionDetail {
    #[serde(flatten)]
    pub reception: Reception,
    pub lines: Vec<DocumentLine>,
}

// --- Saída ---
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct StockOutgoing {
    pub id: i64,
    pub reference: String,
    pub outgoing_date: NaiveDate,
    pub client_name: String,
    pub client_phone: Option<String>,
    pub commercial_id: Option<i64>,
    pub depot_id: Option<i64>,
    pub vehicle_id: Option<i64>,
    pub order_id: Option<i64>,
    pub order_client_id: Option<i64>,
    pub user_id: i64,
    pub status: DocumentStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OutgoingDetail {
    #[serde(flatten)]
    pub outgoing: StockOutgoing,
    pub lines: Vec<DocumentLine>,
}

// --- Devolução ---
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "return_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReturnType {
    Client,
    Supplier,
}

#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct StockReturn {
    pub id: i64,
    pub reference: String,
    pub return_type: ReturnType,
    pub return_date: NaiveDate,
    pub client_name: Option<String>,
    pub client_phone: Option<String>,
    pub supplier_name: Option<String>,
    pub original_order_id: Option<i64>,
    pub original_reception_id: Option<i64>,
    pub depot_id: Option<i64>,
    pub vehicle_id: Option<i64>,
    pub user_id: i64,
    pub reason: Option<String>,
    pub status: DocumentStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReturnDetail {
    #[serde(flatten)]
    pub stock_return: StockReturn,
    pub lines: Vec<DocumentLine>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ReturnListQuery {
    pub return_type: Option<ReturnType>,
}

// --- Payloads ---

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct DocumentLinePayload {
    pub stock_item_id: i64,
    #[validate(custom(function = "crate::models::validate_positive"))]
    pub quantity: Decimal,
    #[validate(custom(function = "crate::models::validate_not_negative"))]
    pub unit_price: Option<Decimal>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateReceptionPayload {
    pub reception_date: Option<NaiveDate>,
    #[validate(length(min = 1, code = "required"))]
    pub supplier_name: String,
    pub bl_number: Option<String>,
    pub depot_id: i64,
    pub notes: Option<String>,
    #[validate(length(min = 1, code = "lines_required"), nested)]
    pub lines: Vec<DocumentLinePayload>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateOutgoingPayload {
    pub outgoing_date: Option<NaiveDate>,
    #[validate(length(min = 1, code = "required"))]
    pub client_name: String,
    pub client_phone: Option<String>,
    pub commercial_id: Option<i64>,
    #[serde(flatten)]
    pub source: ContainerRef,
    pub notes: Option<String>,
    #[validate(length(min = 1, code = "lines_required"), nested)]
    pub lines: Vec<DocumentLinePayload>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateReturnPayload {
    pub return_type: ReturnType,
    pub return_date: Option<NaiveDate>,
    pub client_name: Option<String>,
    pub client_phone: Option<String>,
    pub supplier_name: Option<String>,
    pub original_order_id: Option<i64>,
    pub original_reception_id: Option<i64>,
    #[serde(flatten)]
    pub container: ContainerRef,
    pub reason: Option<String>,
    pub notes: Option<String>,
    #[validate(length(min = 1, code = "lines_required"), nested)]
    pub lines: Vec<DocumentLinePayload>,
}

/// Cabeçalho de saída já resolvido, usado tanto pela API quanto pelo fluxo de pedidos.
#[derive(Debug, Clone)]
pub struct NewOutgoing {
    pub outgoing_date: NaiveDate,
    pub client_name: String,
    pub client_phone: Option<String>,
    pub commercial_id: Option<i64>,
    pub depot_id: Option<i64>,
    pub vehicle_id: Option<i64>,
    pub order_id: Option<i64>,
    pub order_client_id: Option<i64>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewLine {
    pub stock_item_id: i64,
    pub quantity: Decimal,
    pub unit_price: Option<Decimal>,
}

impl From<&DocumentLinePayload> for NewLine {
    fn from(p: &DocumentLinePayload) -> Self {
        Self {
            stock_item_id: p.stock_item_id,
            quantity: p.quantity,
            unit_price: p.unit_price,
        }
    }
}
