// src/services/logistics_service.rs

use chrono::Utc;
use sqlx::{PgConnection, PgPool};

use crate::{
    common::{
        db_utils::{begin_repeatable_read, retry_on_conflict},
        error::AppError,
    },
    db::{InventoryRepository, LogisticsRepository, Scope, TenancyRepository},
    models::{
        auth::Principal,
        inventory::{
            AdjustmentPayload, Container, DocumentPrefix, InventoryCountPayload, StockMovement,
            TransferPayload,
        },
        logistics::{
            CreateOutgoingPayload, CreateReceptionPayload, CreateReturnPayload, DocumentStatus,
            NewLine, NewOutgoing, OutgoingDetail, Reception, ReceptionDetail, ReturnDetail,
            ReturnListQuery, ReturnType, StockOutgoing, StockReturn,
        },
    },
    services::inventory_service::InventoryService,
};

/// Documentos logísticos (recepção, saída, devolução) e as operações manuais de estoque.
/// Cada escrita abre sua transação e delega o saldo ao livro-razão.
#[derive(Clone)]
pub struct LogisticsService {
    pool: PgPool,
    logistics_repo: LogisticsRepository,
    inventory_repo: InventoryRepository,
    tenancy_repo: TenancyRepository,
    ledger: InventoryService,
}

impl LogisticsService {
    pub fn new(
        pool: PgPool,
        logistics_repo: LogisticsRepository,
        inventory_repo: InventoryRepository,
        tenancy_repo: TenancyRepository,
        ledger: InventoryService,
    ) -> Self {
        Self { pool, logistics_repo, inventory_repo, tenancy_repo, ledger }
    }

    // ---
    // Checagens comuns
    // ---

    /// Local fora do escopo é tratado como inexistente.
    pub(crate) async fn ensure_container(&self, conn: &mut PgConnection, scope: &Scope, container: Container) -> Result<(), AppError> {
        if self.tenancy_repo.container_visible(&mut *conn, scope, container).await? {
            Ok(())
        } else {
            Err(AppError::ResourceNotFound(match container {
                Container::Depot(_) => "depot",
                Container::Vehicle(_) => "vehicle",
            }))
        }
    }

    pub(crate) async fn ensure_items(&self, conn: &mut PgConnection, ids: &[i64]) -> Result<(), AppError> {
        let mut wanted = ids.to_vec();
        wanted.sort_unstable();
        wanted.dedup();
        let names = self.inventory_repo.item_names(&mut *conn, &wanted).await?;
        if wanted.iter().all(|id| names.contains_key(id)) {
            Ok(())
        } else {
            Err(AppError::ResourceNotFound("stock_item"))
        }
    }

    // ---
    // Recepções
    // ---

    pub async fn list_receptions(&self, scope: &Scope) -> Result<Vec<Reception>, AppError> {
        self.logistics_repo.list_receptions(scope).await
    }

    pub async fn get_reception(&self, scope: &Scope, id: i64) -> Result<ReceptionDetail, AppError> {
        let reception = self
            .logistics_repo
            .find_reception(&self.pool, scope, id)
            .await?
            .ok_or(AppError::ResourceNotFound("reception"))?;
        let lines = self.logistics_repo.reception_lines(&self.pool, reception.id).await?;
        Ok(ReceptionDetail { reception, lines })
    }

    pub async fn create_reception(
        &self,
        principal: &Principal,
        scope: &Scope,
        payload: &CreateReceptionPayload,
    ) -> Result<ReceptionDetail, AppError> {
        let reception = retry_on_conflict("create_reception", || async move {
            let mut tx = begin_repeatable_read(&self.pool).await?;
            self.ensure_container(&mut tx, scope, Container::Depot(payload.depot_id)).await?;
            let item_ids: Vec<i64> = payload.lines.iter().map(|l| l.stock_item_id).collect();
            self.ensure_items(&mut tx, &item_ids).await?;

            let reference = self.inventory_repo.next_reference(&mut *tx, DocumentPrefix::Reception).await?;
            let reception = self
                .logistics_repo
                .insert_reception(
                    &mut *tx,
                    &reference,
                    payload.reception_date.unwrap_or_else(|| Utc::now().date_naive()),
                    payload.supplier_name.trim(),
                    payload.bl_number.as_deref(),
                    payload.depot_id,
                    principal.user_id,
                    payload.notes.as_deref(),
                )
                .await?;
            for line in &payload.lines {
                self.logistics_repo
                    .insert_reception_line(&mut *tx, reception.id, &NewLine::from(line))
                    .await?;
            }
            tx.commit().await?;
            Ok(reception)
        })
        .await?;

        tracing::info!(reference = %reception.reference, depot_id = reception.depot_id, "Recepção criada (rascunho)");
        self.get_reception(scope, reception.id).await
    }

    pub async fn post_reception(&self, principal: &Principal, scope: &Scope, id: i64) -> Result<ReceptionDetail, AppError> {
        retry_on_conflict("post_reception", || async move {
            let mut tx = begin_repeatable_read(&self.pool).await?;
            self.logistics_repo
                .find_reception(&mut *tx, scope, id)
                .await?
                .ok_or(AppError::ResourceNotFound("reception"))?;
            self.ledger.post_reception(&mut *tx, id, principal.user_id).await?;
            tx.commit().await?;
            Ok(())
        })
        .await?;
        self.get_reception(scope, id).await
    }

    pub async fn cancel_reception(&self, scope: &Scope, id: i64) -> Result<ReceptionDetail, AppError> {
        retry_on_conflict("cancel_reception", || async move {
            let mut tx = begin_repeatable_read(&self.pool).await?;
            self.logistics_repo
                .find_reception(&mut *tx, scope, id)
                .await?
                .ok_or(AppError::ResourceNotFound("reception"))?;
            let reception = self
                .logistics_repo
                .lock_reception(&mut *tx, id)
                .await?
                .ok_or(AppError::ResourceNotFound("reception"))?;
            if reception.status != DocumentStatus::Draft {
                return Err(AppError::invalid("status", "document_not_draft"));
            }
            self.logistics_repo
                .set_reception_status(&mut *tx, id, DocumentStatus::Cancelled)
                .await?;
            tx.commit().await?;
            Ok(())
        })
        .await?;
        self.get_reception(scope, id).await
    }

    // ---
    // Saídas
    // ---

    pub async fn list_outgoings(&self, scope: &Scope) -> Result<Vec<StockOutgoing>, AppError> {
        self.logistics_repo.list_outgoings(scope).await
    }

    pub async fn get_outgoing(&self, scope: &Scope, id: i64) -> Result<OutgoingDetail, AppError> {
        let outgoing = self
            .logistics_repo
            .find_outgoing(&self.pool, scope, id)
            .await?
            .ok_or(AppError::ResourceNotFound("outgoing"))?;
        let lines = self.logistics_repo.outgoing_lines(&self.pool, outgoing.id).await?;
        Ok(OutgoingDetail { outgoing, lines })
    }

    /// Grava cabeçalho e linhas de uma saída em rascunho. Também usada pelo fluxo de pedidos.
    pub async fn insert_outgoing(
        &self,
        conn: &mut PgConnection,
        header: &NewOutgoing,
        lines: &[NewLine],
        user_id: i64,
    ) -> Result<StockOutgoing, AppError> {
        let reference = self.inventory_repo.next_reference(&mut *conn, DocumentPrefix::Outgoing).await?;
        let outgoing = self.logistics_repo.insert_outgoing(&mut *conn, &reference, header, user_id).await?;
        for line in lines {
            self.logistics_repo.insert_outgoing_line(&mut *conn, outgoing.id, line).await?;
        }
        Ok(outgoing)
    }

    pub async fn create_outgoing(
        &self,
        principal: &Principal,
        scope: &Scope,
        payload: &CreateOutgoingPayload,
    ) -> Result<OutgoingDetail, AppError> {
        let source = payload.source.resolve("source")?;
        let outgoing = retry_on_conflict("create_outgoing", || async move {
            let mut tx = begin_repeatable_read(&self.pool).await?;
            self.ensure_container(&mut tx, scope, source).await?;
            let item_ids: Vec<i64> = payload.lines.iter().map(|l| l.stock_item_id).collect();
            self.ensure_items(&mut tx, &item_ids).await?;

            let header = NewOutgoing {
                outgoing_date: payload.outgoing_date.unwrap_or_else(|| Utc::now().date_naive()),
                client_name: payload.client_name.trim().to_string(),
                client_phone: payload.client_phone.clone(),
                commercial_id: payload.commercial_id,
                depot_id: source.depot_id(),
                vehicle_id: source.vehicle_id(),
                order_id: None,
                order_client_id: None,
                notes: payload.notes.clone(),
            };
            let lines: Vec<NewLine> = payload.lines.iter().map(NewLine::from).collect();
            let outgoing = self.insert_outgoing(&mut tx, &header, &lines, principal.user_id).await?;
            tx.commit().await?;
            Ok(outgoing)
        })
        .await?;

        tracing::info!(reference = %outgoing.reference, "Saída criada (rascunho)");
        self.get_outgoing(scope, outgoing.id).await
    }

    pub async fn post_outgoing(&self, principal: &Principal, scope: &Scope, id: i64) -> Result<OutgoingDetail, AppError> {
        retry_on_conflict("post_outgoing", || async move {
            let mut tx = begin_repeatable_read(&self.pool).await?;
            self.logistics_repo
                .find_outgoing(&mut *tx, scope, id)
                .await?
                .ok_or(AppError::ResourceNotFound("outgoing"))?;
            self.ledger.post_outgoing(&mut *tx, id, principal.user_id).await?;
            tx.commit().await?;
            Ok(())
        })
        .await?;
        self.get_outgoing(scope, id).await
    }

    // ---
    // Devoluções
    // ---

    pub async fn list_returns(&self, scope: &Scope, query: &ReturnListQuery) -> Result<Vec<StockReturn>, AppError> {
        self.logistics_repo.list_returns(scope, query.return_type).await
    }

    pub async fn get_return(&self, scope: &Scope, id: i64) -> Result<ReturnDetail, AppError> {
        let stock_return = self
            .logistics_repo
            .find_return(&self.pool, scope, id)
            .await?
            .ok_or(AppError::ResourceNotFound("return"))?;
        let lines = self.logistics_repo.return_lines(&self.pool, stock_return.id).await?;
        Ok(ReturnDetail { stock_return, lines })
    }

    /// Cria e lança a devolução na mesma transação.
    pub async fn create_return(
        &self,
        principal: &Principal,
        scope: &Scope,
        payload: &CreateReturnPayload,
    ) -> Result<ReturnDetail, AppError> {
        let stock_return = retry_on_conflict("create_return", || async move {
            let mut tx = begin_repeatable_read(&self.pool).await?;

            let container = match payload.return_type {
                ReturnType::Client => payload.container.resolve("container")?,
                ReturnType::Supplier => {
                    if payload.supplier_name.as_deref().map(str::trim).unwrap_or_default().is_empty() {
                        return Err(AppError::invalid("supplier_name", "supplier_required"));
                    }
                    match payload.original_reception_id {
                        Some(reception_id) => {
                            let reception = self
                                .logistics_repo
                                .find_reception(&mut *tx, scope, reception_id)
                                .await?
                                .ok_or(AppError::ResourceNotFound("reception"))?;
                            Container::Depot(reception.depot_id)
                        }
                        None => Container::Depot(
                            payload.container.depot_id.ok_or(AppError::invalid("depot_id", "required"))?,
                        ),
                    }
                }
            };
            self.ensure_container(&mut tx, scope, container).await?;
            let item_ids: Vec<i64> = payload.lines.iter().map(|l| l.stock_item_id).collect();
            self.ensure_items(&mut tx, &item_ids).await?;

            let reference = self.inventory_repo.next_reference(&mut *tx, DocumentPrefix::Return).await?;
            let stock_return = self
                .logistics_repo
                .insert_return(
                    &mut *tx,
                    &reference,
                    payload,
                    payload.return_date.unwrap_or_else(|| Utc::now().date_naive()),
                    container.depot_id(),
                    container.vehicle_id(),
                    principal.user_id,
                )
                .await?;
            for line in &payload.lines {
                self.logistics_repo
                    .insert_return_line(&mut *tx, stock_return.id, &NewLine::from(line))
                    .await?;
            }

            match stock_return.return_type {
                ReturnType::Client => {
                    self.ledger.post_client_return(&mut *tx, stock_return.id, principal.user_id).await?
                }
                ReturnType::Supplier => {
                    self.ledger.post_supplier_return(&mut *tx, stock_return.id, principal.user_id).await?
                }
            };

            tx.commit().await?;
            Ok(stock_return)
        })
        .await?;

        tracing::info!(reference = %stock_return.reference, kind = ?stock_return.return_type, "↩️ Devolução lançada");
        self.get_return(scope, stock_return.id).await
    }

    // ---
    // Operações manuais de estoque
    // ---

    pub async fn transfer(&self, principal: &Principal, scope: &Scope, payload: &TransferPayload) -> Result<Vec<StockMovement>, AppError> {
        let from = payload.from.resolve("from")?;
        let to = payload.to.resolve("to")?;
        retry_on_conflict("post_transfer", || async move {
            let mut tx = begin_repeatable_read(&self.pool).await?;
            self.ensure_container(&mut tx, scope, from).await?;
            self.ensure_container(&mut tx, scope, to).await?;
            self.ensure_items(&mut tx, &[payload.stock_item_id]).await?;
            let rows = self
                .ledger
                .post_transfer(
                    &mut *tx,
                    payload.stock_item_id,
                    payload.quantity,
                    from,
                    to,
                    payload.reason.clone(),
                    principal.user_id,
                )
                .await?;
            tx.commit().await?;
            Ok(rows)
        })
        .await
    }

    pub async fn adjust(&self, principal: &Principal, scope: &Scope, payload: &AdjustmentPayload) -> Result<StockMovement, AppError> {
        let container = payload.container.resolve("container")?;
        let reason = payload.reason.trim();
        if reason.is_empty() {
            return Err(AppError::invalid("reason", "reason_required"));
        }
        retry_on_conflict("post_adjustment", || async move {
            let mut tx = begin_repeatable_read(&self.pool).await?;
            self.ensure_container(&mut tx, scope, container).await?;
            self.ensure_items(&mut tx, &[payload.stock_item_id]).await?;
            let row = self
                .ledger
                .post_adjustment(
                    &mut *tx,
                    container,
                    payload.stock_item_id,
                    payload.quantity,
                    reason.to_string(),
                    principal.user_id,
                )
                .await?;
            tx.commit().await?;
            Ok(row)
        })
        .await
    }

    pub async fn count_inventory(
        &self,
        principal: &Principal,
        scope: &Scope,
        payload: &InventoryCountPayload,
    ) -> Result<Option<StockMovement>, AppError> {
        let container = payload.container.resolve("container")?;
        retry_on_conflict("post_inventory_count", || async move {
            let mut tx = begin_repeatable_read(&self.pool).await?;
            self.ensure_container(&mut tx, scope, container).await?;
            self.ensure_items(&mut tx, &[payload.stock_item_id]).await?;
            let row = self
                .ledger
                .post_inventory_count(
                    &mut *tx,
                    container,
                    payload.stock_item_id,
                    payload.counted_quantity,
                    payload.reason.clone(),
                    principal.user_id,
                )
                .await?;
            tx.commit().await?;
            Ok(row)
        })
        .await
    }
}
