// src/services/sales_service.rs

use std::collections::HashMap;

use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::{
    common::{
        db_utils::{begin_repeatable_read, retry_on_conflict},
        error::AppError,
    },
    db::{InventoryRepository, OrderVisibility, OrdersRepository, SalesRepository, Scope, UserRepository},
    models::{
        auth::Principal,
        orders::OrderDetail,
        sales::{
            compute_shortfalls, invoice_number_for, CommercialSale, ConfirmSalePayload, CreateObjectivePayload,
            NewSale, OrderToConfirm, ProgressQuery, ProgressReport, SaleStatus, SalesObjective,
        },
        tenancy::TeamType,
    },
};

/// Equipe cujos comerciais o usuário supervisiona, ou `None` para a região inteira.
fn supervised_team(principal: &Principal) -> Option<TeamType> {
    if principal.is_admin() {
        return None;
    }
    match principal.supervised_team_type {
        None | Some(TeamType::General) => None,
        Some(team) => Some(team),
    }
}

/// Restringe a lista supervisionada a um comercial pedido explicitamente.
fn narrow_to(supervised: Option<Vec<i64>>, requested: Option<i64>) -> Result<Option<Vec<i64>>, AppError> {
    match (supervised, requested) {
        (Some(ids), Some(id)) if !ids.contains(&id) => Err(AppError::invalid("commercial_id", "not_supervised")),
        (_, Some(id)) => Ok(Some(vec![id])),
        (supervised, None) => Ok(supervised),
    }
}

fn ensure_supervised(supervised: Option<&[i64]>, commercial_id: i64) -> Result<(), AppError> {
    match supervised {
        Some(ids) if !ids.contains(&commercial_id) => Err(AppError::invalid("commercial_id", "not_supervised")),
        _ => Ok(()),
    }
}

/// Uma venda por cliente aprovado, ou nada: sem cliente aprovado ou com um único item
/// faltando, a confirmação inteira é recusada.
fn plan_sales(
    detail: &OrderDetail,
    supervisor_id: i64,
    invoice_base: &str,
    available: &HashMap<i64, Decimal>,
    names: &HashMap<i64, String>,
) -> Result<Vec<NewSale>, AppError> {
    detail.ensure_has_approved_clients()?;

    let shortfalls = compute_shortfalls(&detail.approved_requirements(), available, names);
    if !shortfalls.is_empty() {
        return Err(AppError::InsufficientStock(shortfalls));
    }

    let many_clients = detail.has_many_clients();
    Ok(detail
        .approved_clients()
        .map(|client| NewSale {
            order_id: detail.order.id,
            order_client_id: client.client.id,
            commercial_id: detail.order.commercial_id,
            supervisor_id,
            region_id: detail.order.region_id,
            invoice_number: invoice_number_for(invoice_base, client.client.id, many_clients),
            total_amount: client.total_amount,
        })
        .collect())
}

// `sale_confirmed` acompanha a existência de ao menos uma venda confirmada
fn order_stays_confirmed(remaining_confirmed_sales: i64) -> bool {
    remaining_confirmed_sales > 0
}

#[derive(Clone)]
pub struct SalesService {
    pool: PgPool,
    sales_repo: SalesRepository,
    orders_repo: OrdersRepository,
    inventory_repo: InventoryRepository,
    user_repo: UserRepository,
}

impl SalesService {
    pub fn new(
        pool: PgPool,
        sales_repo: SalesRepository,
        orders_repo: OrdersRepository,
        inventory_repo: InventoryRepository,
        user_repo: UserRepository,
    ) -> Self {
        Self { pool, sales_repo, orders_repo, inventory_repo, user_repo }
    }

    pub async fn supervised_commercials(&self, principal: &Principal) -> Result<Option<Vec<i64>>, AppError> {
        match supervised_team(principal) {
            None => Ok(None),
            Some(team) => Ok(Some(self.user_repo.team_commercial_ids(principal.user_id, team).await?)),
        }
    }

    pub async fn orders_to_confirm(&self, principal: &Principal, scope: &Scope) -> Result<Vec<OrderToConfirm>, AppError> {
        let supervised = self.supervised_commercials(principal).await?;
        self.sales_repo.orders_to_confirm(scope, supervised.as_deref()).await
    }

    /// Confirma a venda de um pedido validado: checa o estoque da região do comercial
    /// e grava uma venda por cliente aprovado. Falta de estoque aborta sem efeitos.
    pub async fn confirm(
        &self,
        principal: &Principal,
        scope: &Scope,
        order_id: i64,
        payload: &ConfirmSalePayload,
    ) -> Result<Vec<CommercialSale>, AppError> {
        let supervised = self.supervised_commercials(principal).await?;
        let supervised = supervised.as_deref();
        let visibility = OrderVisibility::Scoped(*scope);
        let visibility = &visibility;

        let sales = retry_on_conflict("confirm_sale", || async move {
            let mut tx = begin_repeatable_read(&self.pool).await?;
            self.orders_repo
                .find_visible(&mut *tx, visibility, order_id)
                .await?
                .ok_or(AppError::ResourceNotFound("order"))?;
            let order = self
                .orders_repo
                .lock_order(&mut *tx, order_id)
                .await?
                .ok_or(AppError::ResourceNotFound("order"))?;
            order.status.ensure_validated()?;
            if order.sale_confirmed {
                return Err(AppError::invalid("status", "order_already_confirmed"));
            }
            ensure_supervised(supervised, order.commercial_id)?;

            // Disponibilidade é a da região do comercial, não a de quem confirma
            let commercial_region = self
                .user_repo
                .region_of(&mut *tx, order.commercial_id)
                .await?
                .or(order.region_id);

            let detail = self.orders_repo.load_detail(&mut tx, order).await?;
            let item_ids: Vec<i64> = detail.approved_requirements().keys().copied().collect();
            let available = self
                .inventory_repo
                .regional_availability(&mut tx, commercial_region, &item_ids)
                .await?;
            let names = self.inventory_repo.item_names(&mut *tx, &item_ids).await?;

            let planned = plan_sales(&detail, principal.user_id, payload.invoice_number.trim(), &available, &names)
                .inspect_err(|e| {
                    if let AppError::InsufficientStock(shortfalls) = e {
                        tracing::warn!(
                            order_id,
                            items = ?shortfalls.iter().map(|s| s.stock_item_id).collect::<Vec<_>>(),
                            "Estoque insuficiente para confirmar a venda"
                        );
                    }
                })?;

            let mut sales = Vec::with_capacity(planned.len());
            for (sale, client) in planned.iter().zip(detail.approved_clients()) {
                let sale = self.sales_repo.insert_sale(&mut *tx, sale, payload).await?;
                for item in &client.items {
                    self.sales_repo
                        .insert_sale_item(&mut *tx, sale.id, item.stock_item_id, item.quantity, item.unit_price_gnf)
                        .await?;
                }
                sales.push(sale);
            }

            self.orders_repo
                .set_sale_confirmed(&mut *tx, detail.order.id, Some(principal.user_id))
                .await?;
            tx.commit().await?;
            Ok(sales)
        })
        .await?;

        tracing::info!(order_id, sales = sales.len(), supervisor = principal.user_id, "💰 Venda confirmada");
        Ok(sales)
    }

    /// Cancela uma venda. O estoque não volta: o evento de estoque é a saída.
    pub async fn cancel(&self, principal: &Principal, scope: &Scope, sale_id: i64) -> Result<CommercialSale, AppError> {
        let sale = retry_on_conflict("cancel_sale", || async move {
            let mut tx = begin_repeatable_read(&self.pool).await?;
            let sale = self
                .sales_repo
                .find_sale(&mut *tx, scope, sale_id)
                .await?
                .ok_or(AppError::ResourceNotFound("sale"))?;
            if sale.status != SaleStatus::Confirmed {
                return Err(AppError::invalid("status", "sale_not_confirmed"));
            }

            let sale = self.sales_repo.mark_cancelled(&mut *tx, sale.id, principal.user_id).await?;
            let remaining = self.sales_repo.confirmed_sales_count(&mut *tx, sale.order_id).await?;
            if !order_stays_confirmed(remaining) {
                self.orders_repo.set_sale_confirmed(&mut *tx, sale.order_id, None).await?;
            }
            tx.commit().await?;
            Ok(sale)
        })
        .await?;

        tracing::info!(invoice = %sale.invoice_number, order_id = sale.order_id, "Venda cancelada");
        Ok(sale)
    }

    pub async fn list_sales(&self, principal: &Principal, scope: &Scope) -> Result<Vec<CommercialSale>, AppError> {
        let supervised = self.supervised_commercials(principal).await?;
        self.sales_repo.list_sales(scope, supervised.as_deref()).await
    }

    // --- OBJETIVOS ---

    pub async fn create_objective(
        &self,
        principal: &Principal,
        scope: &Scope,
        payload: &CreateObjectivePayload,
    ) -> Result<SalesObjective, AppError> {
        if payload.period_end < payload.period_start {
            return Err(AppError::invalid("period_end", "period_invalid"));
        }
        let commercial = self
            .user_repo
            .find_by_id(payload.commercial_id)
            .await?
            .filter(|u| scope.allows_region(u.region_id))
            .ok_or(AppError::ResourceNotFound("user"))?;
        let supervised = self.supervised_commercials(principal).await?;
        ensure_supervised(supervised.as_deref(), commercial.id)?;

        let mut tx = self.pool.begin().await?;
        let objective = self.sales_repo.insert_objective(&mut *tx, payload, principal.user_id).await?;
        for item in &payload.items {
            self.sales_repo.insert_objective_item(&mut *tx, objective.id, item).await?;
        }
        tx.commit().await?;

        tracing::info!(objective_id = objective.id, commercial_id = commercial.id, "🎯 Objetivo criado");
        Ok(objective)
    }

    pub async fn list_objectives(&self, principal: &Principal, scope: &Scope) -> Result<Vec<SalesObjective>, AppError> {
        let supervised = self.supervised_commercials(principal).await?;
        self.sales_repo.list_objectives(scope, supervised.as_deref()).await
    }

    pub async fn progress(&self, principal: &Principal, scope: &Scope, query: &ProgressQuery) -> Result<ProgressReport, AppError> {
        if query.date_to < query.date_from {
            return Err(AppError::invalid("date_to", "period_invalid"));
        }
        let supervised = self.supervised_commercials(principal).await?;
        let commercials = narrow_to(supervised, query.commercial_id)?;

        let targets = self
            .sales_repo
            .target_amounts(scope, commercials.as_deref(), query.date_from, query.date_to)
            .await?;
        let sold = self
            .sales_repo
            .sold_amounts(scope, commercials.as_deref(), query.date_from, query.date_to)
            .await?;
        Ok(ProgressReport::build(query.date_from, query.date_to, targets, sold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        auth::fixtures::principal,
        orders::{
            fixtures::{client, detail},
            ClientStatus,
        },
        rbac::{ROLE_ADMIN, ROLE_SUPERVISOR},
    };

    fn supervisor(team: Option<TeamType>) -> Principal {
        let mut p = principal(ROLE_SUPERVISOR, Some(1), &[("sales", &["read", "confirm"])]);
        p.supervised_team_type = team;
        p
    }

    #[test]
    fn admin_and_general_supervisors_see_the_whole_region() {
        let mut admin = principal(ROLE_ADMIN, None, &[]);
        admin.supervised_team_type = Some(TeamType::Vendeur);
        assert_eq!(supervised_team(&admin), None);
        assert_eq!(supervised_team(&supervisor(Some(TeamType::General))), None);
        assert_eq!(supervised_team(&supervisor(None)), None);
    }

    #[test]
    fn team_supervisor_is_limited_to_the_team() {
        assert_eq!(supervised_team(&supervisor(Some(TeamType::Lockiste))), Some(TeamType::Lockiste));
    }

    #[test]
    fn requested_commercial_must_be_supervised() {
        assert!(matches!(
            narrow_to(Some(vec![3, 4]), Some(9)),
            Err(AppError::InvalidField { field: "commercial_id", .. })
        ));
        assert_eq!(narrow_to(Some(vec![3, 4]), Some(4)).expect("ok"), Some(vec![4]));
        assert_eq!(narrow_to(None, Some(9)).expect("ok"), Some(vec![9]));
        assert_eq!(narrow_to(Some(vec![3]), None).expect("ok"), Some(vec![3]));
        assert_eq!(narrow_to(None, None).expect("ok"), None);
    }

    #[test]
    fn unrestricted_supervision_accepts_anyone() {
        assert!(ensure_supervised(None, 12).is_ok());
        assert!(ensure_supervised(Some(&[12]), 12).is_ok());
        assert!(ensure_supervised(Some(&[]), 12).is_err());
    }

    fn stock(pairs: &[(i64, i64)]) -> HashMap<i64, Decimal> {
        pairs.iter().map(|(id, q)| (*id, Decimal::from(*q))).collect()
    }

    #[test]
    fn one_missing_unit_refuses_the_whole_confirmation() {
        let order = detail(vec![
            client(1, ClientStatus::Approved, &[(1, 10)]),
            client(2, ClientStatus::Approved, &[(1, 20), (3, 10)]),
        ]);

        let refused = plan_sales(&order, 2, "FAC-7", &stock(&[(1, 25), (3, 10)]), &HashMap::new());
        match refused {
            Err(AppError::InsufficientStock(shortfalls)) => {
                assert_eq!(shortfalls.len(), 1);
                assert_eq!(shortfalls[0].stock_item_id, 1);
                assert_eq!(shortfalls[0].required, Decimal::from(30));
                assert_eq!(shortfalls[0].missing, Decimal::from(5));
            }
            other => panic!("esperava InsufficientStock, veio {other:?}"),
        }

        let planned = plan_sales(&order, 2, "FAC-7", &stock(&[(1, 30), (3, 10)]), &HashMap::new()).expect("planned");
        assert_eq!(planned.len(), 2);
        assert!(planned.iter().all(|s| s.supervisor_id == 2 && s.order_id == 10));
    }

    #[test]
    fn order_without_approved_clients_cannot_be_confirmed() {
        let order = detail(vec![
            client(1, ClientStatus::Rejected, &[(1, 10)]),
            client(2, ClientStatus::Rejected, &[(3, 10)]),
        ]);
        assert!(matches!(
            plan_sales(&order, 2, "FAC-7", &stock(&[(1, 100), (3, 100)]), &HashMap::new()),
            Err(AppError::InvalidField { field: "clients", code: "no_approved_clients" })
        ));
    }

    #[test]
    fn invoice_keeps_suffix_when_a_client_was_rejected() {
        let order = detail(vec![
            client(1, ClientStatus::Approved, &[(1, 10)]),
            client(2, ClientStatus::Rejected, &[(1, 5)]),
        ]);
        let planned = plan_sales(&order, 2, "FAC-7", &stock(&[(1, 10)]), &HashMap::new()).expect("planned");
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].invoice_number, "FAC-7-1");
        assert_eq!(planned[0].total_amount, Decimal::from(10_000));

        let single = detail(vec![client(1, ClientStatus::Approved, &[(1, 10)])]);
        let planned = plan_sales(&single, 2, "FAC-8", &stock(&[(1, 10)]), &HashMap::new()).expect("planned");
        assert_eq!(planned[0].invoice_number, "FAC-8");
    }

    #[test]
    fn flag_resets_only_after_the_last_confirmed_sale_is_cancelled() {
        // Três vendas confirmadas, canceladas uma a uma
        let mut confirmed = 3;
        let mut flags = Vec::new();
        while confirmed > 0 {
            confirmed -= 1;
            flags.push(order_stays_confirmed(confirmed));
        }
        assert_eq!(flags, vec![true, true, false]);
    }
}
