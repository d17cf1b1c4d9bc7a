// src/models/orders.rs

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::{
    common::error::AppError,
    models::{inventory::ContainerRef, logistics::StockOutgoing},
};

// ---
// Máquina de estados do pedido
// ---
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "order_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Draft,
    PendingValidation,
    Validated,
    Rejected,
    Completed,
}

impl OrderStatus {
    pub fn ensure_editable(self) -> Result<(), AppError> {
        match self {
            OrderStatus::Draft | OrderStatus::Rejected | OrderStatus::PendingValidation => Ok(()),
            _ => Err(AppError::invalid("status", "order_not_editable")),
        }
    }

    /// Status depois de uma edição: um pedido rejeitado volta para rascunho.
    pub fn after_edit(self) -> OrderStatus {
        match self {
            OrderStatus::Rejected => OrderStatus::Draft,
            other => other,
        }
    }

    pub fn ensure_submittable(self) -> Result<(), AppError> {
        match self {
            OrderStatus::Draft => Ok(()),
            _ => Err(AppError::invalid("status", "order_not_draft")),
        }
    }

    /// Validar ou rejeitar exige pedido aguardando validação.
    pub fn ensure_pending(self) -> Result<(), AppError> {
        match self {
            OrderStatus::PendingValidation => Ok(()),
            _ => Err(AppError::invalid("status", "order_not_pending")),
        }
    }

    pub fn ensure_client_decision_allowed(self) -> Result<(), AppError> {
        match self {
            OrderStatus::PendingValidation | OrderStatus::Validated => Ok(()),
            _ => Err(AppError::invalid("status", "order_not_pending_or_validated")),
        }
    }

    pub fn ensure_validated(self) -> Result<(), AppError> {
        match self {
            OrderStatus::Validated => Ok(()),
            _ => Err(AppError::invalid("status", "order_not_validated")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "order_client_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "payment_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    Cash,
    Credit,
}

// ---
// Linhas do banco
// ---
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct CommercialOrder {
    pub id: i64,
    pub reference: String,
    pub order_date: NaiveDate,
    pub commercial_id: i64,
    pub region_id: Option<i64>,
    pub status: OrderStatus,
    pub validated_by_id: Option<i64>,
    pub validated_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub sale_confirmed: bool,
    pub sale_confirmed_at: Option<DateTime<Utc>>,
    pub sale_confirmed_by_id: Option<i64>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct OrderListRow {
    pub id: i64,
    pub reference: String,
    pub order_date: NaiveDate,
    pub commercial_id: i64,
    pub commercial_name: String,
    pub region_id: Option<i64>,
    pub status: OrderStatus,
    pub sale_confirmed: bool,
    pub client_count: i64,
    pub total_amount: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct OrderClient {
    pub id: i64,
    pub order_id: i64,
    pub client_name: String,
    pub client_phone: Option<String>,
    pub client_address: Option<String>,
    pub payment_type: PaymentType,
    pub payment_due_date: Option<NaiveDate>,
    pub comments: Option<String>,
    pub status: ClientStatus,
    pub rejection_reason: Option<String>,
    pub rejected_by_id: Option<i64>,
    pub rejected_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct OrderItem {
    pub id: i64,
    pub order_client_id: i64,
    pub stock_item_id: i64,
    pub stock_item_name: String,
    pub quantity: Decimal,
    pub unit_price_gnf: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderClientDetail {
    #[serde(flatten)]
    pub client: OrderClient,
    pub items: Vec<OrderItem>,
    pub total_amount: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: CommercialOrder,
    pub commercial_name: String,
    pub clients: Vec<OrderClientDetail>,
}

impl OrderDetail {
    pub fn approved_clients(&self) -> impl Iterator<Item = &OrderClientDetail> {
        self.clients.iter().filter(|c| c.client.status == ClientStatus::Approved)
    }

    /// Quantidade exigida por item somando apenas os clientes aprovados.
    pub fn approved_requirements(&self) -> BTreeMap<i64, Decimal> {
        aggregate_requirements(
            self.approved_clients()
                .flat_map(|c| c.items.iter().map(|i| (i.stock_item_id, i.quantity))),
        )
    }

    /// Venda e saída só fazem sentido com ao menos um cliente aprovado com itens.
    pub fn ensure_has_approved_clients(&self) -> Result<(), AppError> {
        if self.approved_clients().any(|c| !c.items.is_empty()) {
            Ok(())
        } else {
            Err(AppError::invalid("clients", "no_approved_clients"))
        }
    }

    /// Conta todos os clientes, rejeitados inclusive: a numeração das faturas não muda
    /// quando um cliente sai do pedido.
    pub fn has_many_clients(&self) -> bool {
        self.clients.len() > 1
    }
}

pub fn aggregate_requirements(lines: impl IntoIterator<Item = (i64, Decimal)>) -> BTreeMap<i64, Decimal> {
    let mut totals = BTreeMap::new();
    for (item_id, quantity) in lines {
        *totals.entry(item_id).or_insert(Decimal::ZERO) += quantity;
    }
    totals
}

// ---
// Ficha de carregamento
// ---
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "loading_summary_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LoadingSummaryStatus {
    Pending,
    StockChecked,
    LoadingInProgress,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct LoadingSummary {
    pub id: i64,
    pub order_id: i64,
    pub commercial_id: i64,
    pub source_depot_id: Option<i64>,
    pub status: LoadingSummaryStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct LoadingSummaryItem {
    pub stock_item_id: i64,
    pub stock_item_name: String,
    pub quantity_required: Decimal,
    pub quantity_loaded: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LoadingSummaryDetail {
    #[serde(flatten)]
    pub summary: LoadingSummary,
    pub items: Vec<LoadingSummaryItem>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ValidationOutcome {
    pub order: CommercialOrder,
    pub loading_summary_id: Option<i64>,
    pub warning: Option<String>,
}

/// Uma saída por cliente aprovado; o pedido termina `completed`.
#[derive(Debug, Serialize, ToSchema)]
pub struct OutgoingGeneration {
    pub order: CommercialOrder,
    pub outgoings: Vec<StockOutgoing>,
}

// ---
// Payloads
// ---
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct OrderItemPayload {
    pub stock_item_id: i64,
    #[validate(custom(function = "crate::models::validate_positive"))]
    pub quantity: Decimal,
    #[validate(custom(function = "crate::models::validate_not_negative"))]
    pub unit_price_gnf: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct OrderClientPayload {
    #[validate(length(min = 1, code = "required"))]
    pub client_name: String,
    pub client_phone: Option<String>,
    pub client_address: Option<String>,
    #[serde(default = "default_payment_type")]
    pub payment_type: PaymentType,
    pub payment_due_date: Option<NaiveDate>,
    pub comments: Option<String>,
    #[validate(nested)]
    pub items: Vec<OrderItemPayload>,
}

fn default_payment_type() -> PaymentType {
    PaymentType::Cash
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateOrderPayload {
    pub order_date: Option<NaiveDate>,
    pub notes: Option<String>,
    #[validate(length(min = 1, code = "clients_required"), nested)]
    pub clients: Vec<OrderClientPayload>,
}

impl CreateOrderPayload {
    /// Regras que cruzam campos: prazo obrigatório no crédito e ao menos um item no pedido.
    pub fn check_consistency(&self) -> Result<(), AppError> {
        if self
            .clients
            .iter()
            .any(|c| c.payment_type == PaymentType::Credit && c.payment_due_date.is_none())
        {
            return Err(AppError::invalid("payment_due_date", "credit_requires_due_date"));
        }
        if self.clients.iter().all(|c| c.items.is_empty()) {
            return Err(AppError::invalid("items", "items_required"));
        }
        Ok(())
    }

    pub fn stock_item_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .clients
            .iter()
            .flat_map(|c| c.items.iter().map(|i| i.stock_item_id))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReasonPayload {
    pub reason: Option<String>,
}

impl ReasonPayload {
    pub fn required_reason(&self) -> Result<String, AppError> {
        match self.reason.as_deref().map(str::trim) {
            Some(r) if !r.is_empty() => Ok(r.to_string()),
            _ => Err(AppError::invalid("reason", "reason_required")),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GenerateOutgoingPayload {
    #[serde(flatten)]
    pub source: ContainerRef,
    pub outgoing_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OrderListQuery {
    pub status: Option<OrderStatus>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl OrderListQuery {
    pub fn limit_offset(&self) -> (i64, i64) {
        let per_page = self.per_page.unwrap_or(20).clamp(1, 100);
        let page = self.page.unwrap_or(1).max(1);
        (per_page, page.saturating_sub(1).saturating_mul(per_page))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn order(status: OrderStatus) -> CommercialOrder {
        let now = Utc::now();
        CommercialOrder {
            id: 10,
            reference: "CMD-20260115-0001".into(),
            order_date: NaiveDate::from_ymd_opt(2026, 1, 15).expect("date"),
            commercial_id: 3,
            region_id: Some(1),
            status,
            validated_by_id: Some(2),
            validated_at: Some(now),
            rejection_reason: None,
            sale_confirmed: false,
            sale_confirmed_at: None,
            sale_confirmed_by_id: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Cliente com itens `(stock_item_id, quantidade)` a 1000 GNF a unidade.
    pub fn client(id: i64, status: ClientStatus, items: &[(i64, i64)]) -> OrderClientDetail {
        let items: Vec<OrderItem> = items
            .iter()
            .enumerate()
            .map(|(n, (item_id, qty))| OrderItem {
                id: id * 100 + n as i64,
                order_client_id: id,
                stock_item_id: *item_id,
                stock_item_name: format!("item{item_id}"),
                quantity: Decimal::from(*qty),
                unit_price_gnf: Decimal::from(1000),
            })
            .collect();
        let total_amount = items.iter().map(|i| i.quantity * i.unit_price_gnf).sum();
        OrderClientDetail {
            client: OrderClient {
                id,
                order_id: 10,
                client_name: format!("Client {id}"),
                client_phone: None,
                client_address: None,
                payment_type: PaymentType::Cash,
                payment_due_date: None,
                comments: None,
                status,
                rejection_reason: (status == ClientStatus::Rejected).then(|| "compte fermé".to_string()),
                rejected_by_id: None,
                rejected_at: None,
            },
            items,
            total_amount,
        }
    }

    pub fn detail(clients: Vec<OrderClientDetail>) -> OrderDetail {
        OrderDetail {
            order: order(OrderStatus::Validated),
            commercial_name: "amadou".into(),
            clients,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{client as client_detail, detail};
    use super::*;

    fn client(name: &str, payment: PaymentType, due: Option<NaiveDate>, items: &[(i64, i64)]) -> OrderClientPayload {
        OrderClientPayload {
            client_name: name.into(),
            client_phone: None,
            client_address: None,
            payment_type: payment,
            payment_due_date: due,
            comments: None,
            items: items
                .iter()
                .map(|(id, q)| OrderItemPayload {
                    stock_item_id: *id,
                    quantity: Decimal::from(*q),
                    unit_price_gnf: Decimal::from(150_000),
                })
                .collect(),
        }
    }

    #[test]
    fn edit_is_allowed_before_validation_only() {
        assert!(OrderStatus::Draft.ensure_editable().is_ok());
        assert!(OrderStatus::Rejected.ensure_editable().is_ok());
        assert!(OrderStatus::PendingValidation.ensure_editable().is_ok());
        assert!(OrderStatus::Validated.ensure_editable().is_err());
        assert!(OrderStatus::Completed.ensure_editable().is_err());
    }

    #[test]
    fn rejected_order_returns_to_draft_on_edit() {
        assert_eq!(OrderStatus::Rejected.after_edit(), OrderStatus::Draft);
        assert_eq!(OrderStatus::PendingValidation.after_edit(), OrderStatus::PendingValidation);
    }

    #[test]
    fn validation_requires_pending_status() {
        assert!(OrderStatus::PendingValidation.ensure_pending().is_ok());
        assert!(OrderStatus::Validated.ensure_pending().is_err());
        assert!(OrderStatus::Draft.ensure_pending().is_err());
    }

    #[test]
    fn client_decisions_allowed_while_pending_or_validated() {
        assert!(OrderStatus::PendingValidation.ensure_client_decision_allowed().is_ok());
        assert!(OrderStatus::Validated.ensure_client_decision_allowed().is_ok());
        assert!(OrderStatus::Completed.ensure_client_decision_allowed().is_err());
    }

    #[test]
    fn credit_client_needs_due_date() {
        let payload = CreateOrderPayload {
            order_date: None,
            notes: None,
            clients: vec![client("Fatoumata Bah", PaymentType::Credit, None, &[(1, 20)])],
        };
        let err = payload.check_consistency().expect_err("due date");
        assert!(matches!(err, AppError::InvalidField { field: "payment_due_date", .. }));
    }

    #[test]
    fn order_without_items_is_refused() {
        let payload = CreateOrderPayload {
            order_date: None,
            notes: None,
            clients: vec![client("Amadou Diallo", PaymentType::Cash, None, &[])],
        };
        assert!(payload.check_consistency().is_err());
    }

    #[test]
    fn requirements_sum_per_item() {
        let totals = aggregate_requirements(vec![
            (1, Decimal::from(10)),
            (1, Decimal::from(20)),
            (3, Decimal::from(10)),
        ]);
        assert_eq!(totals[&1], Decimal::from(30));
        assert_eq!(totals[&3], Decimal::from(10));
    }

    #[test]
    fn reason_must_not_be_blank() {
        assert!(ReasonPayload { reason: Some("   ".into()) }.required_reason().is_err());
        assert!(ReasonPayload { reason: None }.required_reason().is_err());
        assert_eq!(
            ReasonPayload { reason: Some(" compte fermé ".into()) }.required_reason().expect("reason"),
            "compte fermé"
        );
    }

    #[test]
    fn pagination_is_clamped() {
        let q = OrderListQuery { page: Some(0), per_page: Some(1000), ..Default::default() };
        assert_eq!(q.limit_offset(), (100, 0));
        let q = OrderListQuery { page: Some(3), per_page: None, ..Default::default() };
        assert_eq!(q.limit_offset(), (20, 40));
    }

    #[test]
    fn huge_page_number_does_not_overflow() {
        let q = OrderListQuery { page: Some(i64::MAX), per_page: Some(20), ..Default::default() };
        let (limit, offset) = q.limit_offset();
        assert_eq!(limit, 20);
        assert_eq!(offset, i64::MAX);
    }

    #[test]
    fn order_with_every_client_rejected_has_nothing_to_sell() {
        let d = detail(vec![
            client_detail(1, ClientStatus::Rejected, &[(1, 10)]),
            client_detail(2, ClientStatus::Rejected, &[(3, 5)]),
        ]);
        assert!(d.approved_requirements().is_empty());
        assert!(matches!(
            d.ensure_has_approved_clients(),
            Err(AppError::InvalidField { field: "clients", code: "no_approved_clients" })
        ));

        let d = detail(vec![
            client_detail(1, ClientStatus::Rejected, &[(1, 10)]),
            client_detail(2, ClientStatus::Approved, &[(3, 5)]),
        ]);
        assert!(d.ensure_has_approved_clients().is_ok());
    }

    #[test]
    fn rejected_clients_still_count_for_invoice_numbering() {
        let d = detail(vec![
            client_detail(1, ClientStatus::Approved, &[(1, 10)]),
            client_detail(2, ClientStatus::Rejected, &[(1, 5)]),
        ]);
        assert!(d.has_many_clients());
        assert_eq!(d.approved_requirements(), BTreeMap::from([(1, Decimal::from(10))]));
        assert!(!detail(vec![client_detail(1, ClientStatus::Approved, &[(1, 1)])]).has_many_clients());
    }
}
