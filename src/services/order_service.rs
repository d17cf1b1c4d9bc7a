// src/services/order_service.rs

use chrono::Utc;
use sqlx::{PgConnection, PgPool};

use crate::{
    common::{
        db_utils::{begin_repeatable_read, retry_on_conflict},
        error::AppError,
    },
    db::{InventoryRepository, OrderVisibility, OrdersRepository, Scope, TenancyRepository},
    models::{
        auth::Principal,
        inventory::{Container, DocumentPrefix},
        logistics::{DocumentStatus, NewLine, NewOutgoing},
        orders::{
            ClientStatus, CommercialOrder, CreateOrderPayload, GenerateOutgoingPayload, LoadingSummaryDetail,
            LoadingSummaryStatus, OrderClientDetail, OrderDetail, OrderListQuery, OrderListRow, OrderStatus,
            OutgoingGeneration, ReasonPayload, ValidationOutcome,
        },
        rbac::{ROLE_COMMERCIAL, ROLE_WAREHOUSE},
        tenancy::Depot,
    },
    services::{inventory_service::InventoryService, logistics_service::LogisticsService},
};

pub const WARNING_NO_ACTIVE_DEPOT: &str = "no_active_depot";
pub const WARNING_DEPOT_OUT_OF_REGION: &str = "source_depot_out_of_region";

/// Máquina de estados do pedido comercial, ficha de carregamento e geração das saídas.
#[derive(Clone)]
pub struct OrderService {
    pool: PgPool,
    orders_repo: OrdersRepository,
    inventory_repo: InventoryRepository,
    tenancy_repo: TenancyRepository,
    logistics: LogisticsService,
    ledger: InventoryService,
}

impl OrderService {
    pub fn new(
        pool: PgPool,
        orders_repo: OrdersRepository,
        inventory_repo: InventoryRepository,
        tenancy_repo: TenancyRepository,
        logistics: LogisticsService,
        ledger: InventoryService,
    ) -> Self {
        Self { pool, orders_repo, inventory_repo, tenancy_repo, logistics, ledger }
    }

    /// Carrega e trava um pedido visível para o usuário. Fora da visibilidade é 404.
    async fn lock_visible(&self, conn: &mut PgConnection, principal: &Principal, id: i64) -> Result<CommercialOrder, AppError> {
        let visibility = OrderVisibility::for_principal(principal);
        self.orders_repo
            .find_visible(&mut *conn, &visibility, id)
            .await?
            .ok_or(AppError::ResourceNotFound("order"))?;
        self.orders_repo
            .lock_order(&mut *conn, id)
            .await?
            .ok_or(AppError::ResourceNotFound("order"))
    }

    // --- CONSULTAS ---

    pub async fn list(&self, principal: &Principal, query: &OrderListQuery) -> Result<Vec<OrderListRow>, AppError> {
        ensure_can_read_orders(principal)?;
        let visibility = OrderVisibility::for_principal(principal);
        self.orders_repo.list_orders(&visibility, query).await
    }

    pub async fn detail(&self, principal: &Principal, id: i64) -> Result<OrderDetail, AppError> {
        ensure_can_read_orders(principal)?;
        let mut conn = self.pool.acquire().await?;
        let visibility = OrderVisibility::for_principal(principal);
        let order = self
            .orders_repo
            .find_visible(&mut *conn, &visibility, id)
            .await?
            .ok_or(AppError::ResourceNotFound("order"))?;
        self.orders_repo.load_detail(&mut conn, order).await
    }

    pub async fn loading_summary(&self, principal: &Principal, id: i64) -> Result<LoadingSummaryDetail, AppError> {
        ensure_can_read_orders(principal)?;
        let visibility = OrderVisibility::for_principal(principal);
        self.orders_repo
            .find_visible(&self.pool, &visibility, id)
            .await?
            .ok_or(AppError::ResourceNotFound("order"))?;
        let summary = self
            .orders_repo
            .find_summary(&self.pool, id)
            .await?
            .ok_or(AppError::ResourceNotFound("loading_summary"))?;
        let items = self.orders_repo.summary_items(&self.pool, summary.id).await?;
        Ok(LoadingSummaryDetail { summary, items })
    }

    // --- CRIAÇÃO E EDIÇÃO ---

    pub async fn create(&self, principal: &Principal, payload: &CreateOrderPayload) -> Result<OrderDetail, AppError> {
        if !principal.has_role(ROLE_COMMERCIAL) {
            return Err(AppError::PermissionDenied("orders.create".into()));
        }
        payload.check_consistency()?;
        let item_ids = payload.stock_item_ids();
        let item_ids = item_ids.as_slice();

        let detail = retry_on_conflict("create_order", || async move {
            let mut tx = begin_repeatable_read(&self.pool).await?;
            self.logistics.ensure_items(&mut tx, item_ids).await?;

            let reference = self.inventory_repo.next_reference(&mut *tx, DocumentPrefix::Order).await?;
            let order = self
                .orders_repo
                .insert_order(
                    &mut *tx,
                    &reference,
                    payload.order_date.unwrap_or_else(|| Utc::now().date_naive()),
                    principal.user_id,
                    principal.region_id,
                    payload.notes.as_deref(),
                )
                .await?;
            self.orders_repo.insert_clients(&mut tx, order.id, &payload.clients).await?;
            let detail = self.orders_repo.load_detail(&mut tx, order).await?;
            tx.commit().await?;
            Ok(detail)
        })
        .await?;

        tracing::info!(
            reference = %detail.order.reference,
            commercial_id = principal.user_id,
            clients = detail.clients.len(),
            "🧾 Pedido criado"
        );
        Ok(detail)
    }

    /// Substitui clientes e itens. Um pedido rejeitado volta para rascunho.
    pub async fn edit(&self, principal: &Principal, id: i64, payload: &CreateOrderPayload) -> Result<OrderDetail, AppError> {
        payload.check_consistency()?;
        let item_ids = payload.stock_item_ids();
        let item_ids = item_ids.as_slice();

        retry_on_conflict("edit_order", || async move {
            let mut tx = begin_repeatable_read(&self.pool).await?;
            let order = self.lock_visible(&mut tx, principal, id).await?;
            order.status.ensure_editable()?;
            self.logistics.ensure_items(&mut tx, item_ids).await?;

            let status = order.status.after_edit();
            self.orders_repo.delete_clients(&mut *tx, order.id).await?;
            self.orders_repo.insert_clients(&mut tx, order.id, &payload.clients).await?;
            self.orders_repo
                .update_after_edit(
                    &mut *tx,
                    order.id,
                    status,
                    payload.order_date.unwrap_or(order.order_date),
                    payload.notes.as_deref(),
                )
                .await?;

            let order = self
                .orders_repo
                .lock_order(&mut *tx, id)
                .await?
                .ok_or(AppError::ResourceNotFound("order"))?;
            let detail = self.orders_repo.load_detail(&mut tx, order).await?;
            tx.commit().await?;
            Ok(detail)
        })
        .await
    }

    /// Rascunho → aguardando validação. Só o autor (ou admin).
    pub async fn submit(&self, principal: &Principal, id: i64) -> Result<OrderDetail, AppError> {
        retry_on_conflict("submit_order", || async move {
            let mut tx = begin_repeatable_read(&self.pool).await?;
            let order = self.lock_visible(&mut tx, principal, id).await?;
            if order.commercial_id != principal.user_id && !principal.is_admin() {
                return Err(AppError::PermissionDenied("orders.update".into()));
            }
            order.status.ensure_submittable()?;
            self.orders_repo
                .set_status(&mut *tx, order.id, OrderStatus::PendingValidation)
                .await?;
            let order = self
                .orders_repo
                .lock_order(&mut *tx, id)
                .await?
                .ok_or(AppError::ResourceNotFound("order"))?;
            let detail = self.orders_repo.load_detail(&mut tx, order).await?;
            tx.commit().await?;
            Ok(detail)
        })
        .await
    }

    // --- VALIDAÇÃO ---

    pub async fn validate(&self, principal: &Principal, id: i64) -> Result<ValidationOutcome, AppError> {
        let outcome = retry_on_conflict("validate_order", || async move {
            let mut tx = begin_repeatable_read(&self.pool).await?;
            let order = self.lock_visible(&mut tx, principal, id).await?;
            order.status.ensure_pending()?;

            let order = self.orders_repo.mark_validated(&mut *tx, order.id, principal.user_id).await?;
            let picked = self.tenancy_repo.pick_source_depot(&mut *tx, order.region_id).await?;
            let warning = summary_warning(picked.as_ref());

            let loading_summary_id = match picked {
                Some((depot, _)) => {
                    let detail = self.orders_repo.load_detail(&mut tx, order.clone()).await?;
                    let summary_id = self
                        .orders_repo
                        .upsert_summary(&mut *tx, order.id, order.commercial_id, Some(depot.id), None)
                        .await?;
                    self.orders_repo
                        .replace_summary_items(&mut tx, summary_id, &detail.approved_requirements())
                        .await?;
                    Some(summary_id)
                }
                None => None,
            };

            tx.commit().await?;
            Ok(ValidationOutcome { order, loading_summary_id, warning: warning.map(str::to_string) })
        })
        .await?;

        if let Some(code) = outcome.warning.as_deref() {
            tracing::warn!(order_id = id, region_id = ?outcome.order.region_id, warning = code, "Ficha de carregamento com aviso");
        }
        tracing::info!(reference = %outcome.order.reference, validator = principal.user_id, "✅ Pedido validado");
        Ok(outcome)
    }

    pub async fn reject(&self, principal: &Principal, id: i64, payload: &ReasonPayload) -> Result<CommercialOrder, AppError> {
        let reason = payload.required_reason()?;
        let reason = reason.as_str();
        let order = retry_on_conflict("reject_order", || async move {
            let mut tx = begin_repeatable_read(&self.pool).await?;
            let order = self.lock_visible(&mut tx, principal, id).await?;
            order.status.ensure_pending()?;
            let order = self.orders_repo.mark_rejected(&mut *tx, order.id, principal.user_id, reason).await?;
            tx.commit().await?;
            Ok(order)
        })
        .await?;

        tracing::info!(reference = %order.reference, validator = principal.user_id, "Pedido rejeitado");
        Ok(order)
    }

    pub async fn reject_client(
        &self,
        principal: &Principal,
        id: i64,
        client_id: i64,
        payload: &ReasonPayload,
    ) -> Result<OrderDetail, AppError> {
        let reason = payload.required_reason()?;
        let reason = reason.as_str();
        retry_on_conflict("reject_order_client", || async move {
            let mut tx = begin_repeatable_read(&self.pool).await?;
            let order = self.lock_visible(&mut tx, principal, id).await?;
            order.status.ensure_client_decision_allowed()?;
            self.orders_repo
                .find_client(&mut *tx, order.id, client_id)
                .await?
                .ok_or(AppError::ResourceNotFound("order_client"))?;

            self.orders_repo
                .set_client_rejected(&mut *tx, client_id, principal.user_id, reason)
                .await?;
            let detail = self.orders_repo.load_detail(&mut tx, order).await?;
            self.refresh_summary(&mut tx, &detail).await?;
            tx.commit().await?;
            Ok(detail)
        })
        .await
    }

    pub async fn approve_client(&self, principal: &Principal, id: i64, client_id: i64) -> Result<OrderDetail, AppError> {
        retry_on_conflict("approve_order_client", || async move {
            let mut tx = begin_repeatable_read(&self.pool).await?;
            let order = self.lock_visible(&mut tx, principal, id).await?;
            order.status.ensure_client_decision_allowed()?;
            let client = self
                .orders_repo
                .find_client(&mut *tx, order.id, client_id)
                .await?
                .ok_or(AppError::ResourceNotFound("order_client"))?;
            if client.status != ClientStatus::Rejected {
                return Err(AppError::invalid("client_id", "client_not_rejected"));
            }

            self.orders_repo.set_client_approved(&mut *tx, client_id).await?;
            let detail = self.orders_repo.load_detail(&mut tx, order).await?;
            self.refresh_summary(&mut tx, &detail).await?;
            tx.commit().await?;
            Ok(detail)
        })
        .await
    }

    /// Recalcula os itens da ficha enquanto ela ainda está pendente.
    async fn refresh_summary(&self, conn: &mut PgConnection, detail: &OrderDetail) -> Result<(), AppError> {
        let Some(summary) = self.orders_repo.find_summary(&mut *conn, detail.order.id).await? else {
            return Ok(());
        };
        if summary.status != LoadingSummaryStatus::Pending {
            return Ok(());
        }
        self.orders_repo
            .replace_summary_items(&mut *conn, summary.id, &detail.approved_requirements())
            .await
    }

    // --- SAÍDAS ---

    /// Uma saída lançada por cliente aprovado, tudo ou nada. Conclui pedido e ficha.
    pub async fn generate_outgoing(
        &self,
        principal: &Principal,
        id: i64,
        payload: &GenerateOutgoingPayload,
    ) -> Result<OutgoingGeneration, AppError> {
        let source = payload.source.resolve("source")?;
        let scope = Scope::from_principal(principal);
        let scope = &scope;

        let generation = retry_on_conflict("generate_outgoing", || async move {
            let mut tx = begin_repeatable_read(&self.pool).await?;
            let order = self.lock_visible(&mut tx, principal, id).await?;
            order.status.ensure_validated()?;
            self.logistics.ensure_container(&mut tx, scope, source).await?;

            let detail = self.orders_repo.load_detail(&mut tx, order).await?;
            detail.ensure_has_approved_clients()?;
            let outgoing_date = payload.outgoing_date.unwrap_or_else(|| Utc::now().date_naive());

            let mut outgoings = Vec::new();
            for client in detail.approved_clients().filter(|c| !c.items.is_empty()) {
                let header = outgoing_header(&detail, client, source, outgoing_date, payload.notes.clone());
                let lines = client_lines(client);
                let mut outgoing = self
                    .logistics
                    .insert_outgoing(&mut tx, &header, &lines, principal.user_id)
                    .await?;
                self.ledger.post_outgoing(&mut *tx, outgoing.id, principal.user_id).await?;
                outgoing.status = DocumentStatus::Completed;
                outgoings.push(outgoing);
            }

            self.orders_repo
                .set_status(&mut *tx, detail.order.id, OrderStatus::Completed)
                .await?;
            if let Some(summary) = self.orders_repo.find_summary(&mut *tx, detail.order.id).await? {
                self.orders_repo.complete_summary(&mut tx, summary.id).await?;
            }
            let order = self
                .orders_repo
                .lock_order(&mut *tx, id)
                .await?
                .ok_or(AppError::ResourceNotFound("order"))?;

            tx.commit().await?;
            Ok(OutgoingGeneration { order, outgoings })
        })
        .await?;

        tracing::info!(
            reference = %generation.order.reference,
            outgoings = generation.outgoings.len(),
            "🚚 Saídas geradas para o pedido"
        );
        Ok(generation)
    }
}

/// Leitura de pedidos: `orders.read` ou o papel de armazém (que vê os validados de todas as regiões).
fn ensure_can_read_orders(principal: &Principal) -> Result<(), AppError> {
    if principal.has_permission("orders.read") || principal.has_role(ROLE_WAREHOUSE) {
        Ok(())
    } else {
        Err(AppError::PermissionDenied("orders.read".into()))
    }
}

fn summary_warning(picked: Option<&(Depot, bool)>) -> Option<&'static str> {
    match picked {
        None => Some(WARNING_NO_ACTIVE_DEPOT),
        Some((_, false)) => Some(WARNING_DEPOT_OUT_OF_REGION),
        Some((_, true)) => None,
    }
}

fn outgoing_header(
    detail: &OrderDetail,
    client: &OrderClientDetail,
    source: Container,
    outgoing_date: chrono::NaiveDate,
    notes: Option<String>,
) -> NewOutgoing {
    NewOutgoing {
        outgoing_date,
        client_name: client.client.client_name.clone(),
        client_phone: client.client.client_phone.clone(),
        commercial_id: Some(detail.order.commercial_id),
        depot_id: source.depot_id(),
        vehicle_id: source.vehicle_id(),
        order_id: Some(detail.order.id),
        order_client_id: Some(client.client.id),
        notes: notes.or_else(|| Some(format!("Commande {}", detail.order.reference))),
    }
}

fn client_lines(client: &OrderClientDetail) -> Vec<NewLine> {
    client
        .items
        .iter()
        .map(|i| NewLine {
            stock_item_id: i.stock_item_id,
            quantity: i.quantity,
            unit_price: Some(i.unit_price_gnf),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        auth::fixtures::principal,
        orders::{fixtures, OrderClient, OrderItem, PaymentType},
        rbac::{ROLE_ADMIN, ROLE_SUPERVISOR},
    };
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn depot(region_id: i64) -> Depot {
        Depot { id: 7, name: "Dépôt Kaloum".into(), region_id, is_active: true }
    }

    fn detail() -> OrderDetail {
        let now = Utc::now();
        let order = CommercialOrder {
            id: 10,
            reference: "CMD-20260115-0001".into(),
            order_date: NaiveDate::from_ymd_opt(2026, 1, 15).expect("date"),
            commercial_id: 3,
            region_id: Some(1),
            status: OrderStatus::Validated,
            validated_by_id: Some(2),
            validated_at: Some(now),
            rejection_reason: None,
            sale_confirmed: false,
            sale_confirmed_at: None,
            sale_confirmed_by_id: None,
            notes: None,
            created_at: now,
            updated_at: now,
        };
        let client = OrderClient {
            id: 21,
            order_id: 10,
            client_name: "Boutique Madina".into(),
            client_phone: Some("+224 620 00 00 00".into()),
            client_address: None,
            payment_type: PaymentType::Cash,
            payment_due_date: None,
            comments: None,
            status: ClientStatus::Approved,
            rejection_reason: None,
            rejected_by_id: None,
            rejected_at: None,
        };
        let items = vec![OrderItem {
            id: 1,
            order_client_id: 21,
            stock_item_id: 5,
            stock_item_name: "Ciment 50kg".into(),
            quantity: Decimal::from(40),
            unit_price_gnf: Decimal::from(85_000),
        }];
        OrderDetail {
            order,
            commercial_name: "amadou".into(),
            clients: vec![OrderClientDetail { client, items, total_amount: Decimal::from(3_400_000) }],
        }
    }

    #[test]
    fn summary_warning_follows_depot_choice() {
        assert_eq!(summary_warning(None), Some(WARNING_NO_ACTIVE_DEPOT));
        assert_eq!(summary_warning(Some(&(depot(2), false))), Some(WARNING_DEPOT_OUT_OF_REGION));
        assert_eq!(summary_warning(Some(&(depot(1), true))), None);
    }

    #[test]
    fn outgoing_header_links_order_and_client() {
        let detail = detail();
        let client = &detail.clients[0];
        let day = NaiveDate::from_ymd_opt(2026, 1, 16).expect("date");
        let header = outgoing_header(&detail, client, Container::Vehicle(4), day, None);

        assert_eq!(header.vehicle_id, Some(4));
        assert_eq!(header.depot_id, None);
        assert_eq!(header.order_id, Some(10));
        assert_eq!(header.order_client_id, Some(21));
        assert_eq!(header.client_name, "Boutique Madina");
        assert_eq!(header.notes.as_deref(), Some("Commande CMD-20260115-0001"));
    }

    #[test]
    fn client_lines_carry_quantities_and_prices() {
        let detail = detail();
        let lines = client_lines(&detail.clients[0]);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].stock_item_id, 5);
        assert_eq!(lines[0].quantity, Decimal::from(40));
        assert_eq!(lines[0].unit_price, Some(Decimal::from(85_000)));
    }

    #[test]
    fn reading_orders_needs_permission_or_warehouse_role() {
        assert!(ensure_can_read_orders(&principal(ROLE_SUPERVISOR, Some(1), &[("orders", &["read"])])).is_ok());
        assert!(ensure_can_read_orders(&principal(ROLE_WAREHOUSE, Some(1), &[])).is_ok());
        assert!(ensure_can_read_orders(&principal(ROLE_ADMIN, None, &[])).is_ok());
        assert!(matches!(
            ensure_can_read_orders(&principal(ROLE_COMMERCIAL, Some(1), &[("chat", &["read"])])),
            Err(AppError::PermissionDenied(_))
        ));
    }

    #[test]
    fn no_outgoing_is_generated_for_a_fully_rejected_order() {
        let rejected = fixtures::detail(vec![
            fixtures::client(1, ClientStatus::Rejected, &[(5, 40)]),
            fixtures::client(2, ClientStatus::Rejected, &[(6, 10)]),
        ]);
        assert!(rejected.ensure_has_approved_clients().is_err());
        assert_eq!(rejected.approved_clients().filter(|c| !c.items.is_empty()).count(), 0);
    }
}
