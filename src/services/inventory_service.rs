// src/services/inventory_service.rs

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use sqlx::{Acquire, PgConnection, Postgres};

use crate::{
    common::error::AppError,
    db::{InventoryRepository, LogisticsRepository, Scope},
    models::{
        inventory::{
            transfer_legs, BalanceQuery, Container, MovementQuery, MovementType, NewMovement,
            StockBalance, StockItem, StockMovement, StockShortfall,
        },
        logistics::{DocumentStatus, ReturnType},
    },
};

/// Livro-razão de estoque. Todo saldo muda aqui e só aqui, sempre junto com o movimento
/// correspondente e dentro da mesma transação.
#[derive(Clone)]
pub struct InventoryService {
    inventory_repo: InventoryRepository,
    logistics_repo: LogisticsRepository,
}

impl InventoryService {
    pub fn new(inventory_repo: InventoryRepository, logistics_repo: LogisticsRepository) -> Self {
        Self { inventory_repo, logistics_repo }
    }

    // --- CONSULTAS ---

    pub async fn list_items(&self) -> Result<Vec<StockItem>, AppError> {
        self.inventory_repo.list_items().await
    }

    pub async fn balances(&self, scope: &Scope, filter: &BalanceQuery) -> Result<Vec<StockBalance>, AppError> {
        self.inventory_repo.list_balances(scope, filter).await
    }

    pub async fn movements(&self, scope: &Scope, filter: &MovementQuery) -> Result<Vec<StockMovement>, AppError> {
        self.inventory_repo.list_movements(scope, filter).await
    }

    /// Núcleo do livro-razão: trava os saldos afetados em ordem (local, item), recusa o lote
    /// inteiro se algum débito deixaria saldo negativo, e então grava movimento + saldo.
    pub async fn apply_movements(
        &self,
        conn: &mut PgConnection,
        movements: Vec<NewMovement>,
    ) -> Result<Vec<StockMovement>, AppError> {
        let touched = debits_by_balance(&movements);

        let mut locked: BTreeMap<(Container, i64), Decimal> = BTreeMap::new();
        for (container, item_id) in touched.keys() {
            let available = self.inventory_repo.lock_balance(&mut *conn, *container, *item_id).await?;
            locked.insert((*container, *item_id), available);
        }

        let short = overdrawn(&touched, &locked);

        if !short.is_empty() {
            let ids: Vec<i64> = short.iter().map(|(id, _, _)| *id).collect();
            let names = self.inventory_repo.item_names(&mut *conn, &ids).await?;
            tracing::warn!(items = ?ids, "Estoque insuficiente, operação recusada");
            let shortfalls = short
                .into_iter()
                .map(|(id, required, available)| {
                    let name = names.get(&id).cloned().unwrap_or_else(|| format!("#{id}"));
                    StockShortfall::new(id, name, required, available)
                })
                .collect();
            return Err(AppError::InsufficientStock(shortfalls));
        }

        let mut rows = Vec::with_capacity(movements.len());
        for movement in movements {
            let reference = self
                .inventory_repo
                .next_reference(&mut *conn, movement.movement_type.prefix())
                .await?;
            let row = self.inventory_repo.insert_movement(&mut *conn, &reference, &movement).await?;
            if let Some(container) = movement.affected_container() {
                self.inventory_repo
                    .apply_delta(&mut *conn, container, movement.stock_item_id, movement.quantity)
                    .await?;
            }
            rows.push(row);
        }
        Ok(rows)
    }

    // --- RECEPÇÃO (ENTRADA) ---
    pub async fn post_reception<'e, A>(&self, db: A, reception_id: i64, user_id: i64) -> Result<Vec<StockMovement>, AppError>
    where
        A: Acquire<'e, Database = Postgres>,
    {
        let mut tx = db.begin().await?;

        let reception = self
            .logistics_repo
            .lock_reception(&mut *tx, reception_id)
            .await?
            .ok_or(AppError::ResourceNotFound("reception"))?;
        ensure_draft(reception.status)?;

        let lines = self.logistics_repo.reception_lines(&mut *tx, reception.id).await?;
        let movements = lines
            .iter()
            .map(|line| NewMovement {
                movement_type: MovementType::Reception,
                stock_item_id: line.stock_item_id,
                quantity: line.quantity,
                from: None,
                to: Some(Container::Depot(reception.depot_id)),
                document_reference: Some(reception.reference.clone()),
                supplier_name: Some(reception.supplier_name.clone()),
                reason: None,
                user_id,
            })
            .collect();

        let rows = self.apply_movements(&mut *tx, movements).await?;
        self.logistics_repo
            .set_reception_status(&mut *tx, reception.id, DocumentStatus::Completed)
            .await?;

        tx.commit().await?;
        tracing::info!(reference = %reception.reference, lines = rows.len(), "📥 Recepção lançada");
        Ok(rows)
    }

    // --- SAÍDA ---
    pub async fn post_outgoing<'e, A>(&self, db: A, outgoing_id: i64, user_id: i64) -> Result<Vec<StockMovement>, AppError>
    where
        A: Acquire<'e, Database = Postgres>,
    {
        let mut tx = db.begin().await?;

        let outgoing = self
            .logistics_repo
            .lock_outgoing(&mut *tx, outgoing_id)
            .await?
            .ok_or(AppError::ResourceNotFound("outgoing"))?;
        ensure_draft(outgoing.status)?;
        let source = container_of(outgoing.depot_id, outgoing.vehicle_id, "source")?;

        let lines = self.logistics_repo.outgoing_lines(&mut *tx, outgoing.id).await?;
        let movements = lines
            .iter()
            .map(|line| NewMovement {
                movement_type: MovementType::Transfer,
                stock_item_id: line.stock_item_id,
                quantity: -line.quantity,
                from: Some(source),
                to: None,
                document_reference: Some(outgoing.reference.clone()),
                supplier_name: None,
                reason: Some(format!("Sortie {}", outgoing.client_name)),
                user_id,
            })
            .collect();

        let rows = self.apply_movements(&mut *tx, movements).await?;
        self.logistics_repo
            .set_outgoing_status(&mut *tx, outgoing.id, DocumentStatus::Completed)
            .await?;

        tx.commit().await?;
        tracing::info!(reference = %outgoing.reference, lines = rows.len(), "📤 Saída lançada");
        Ok(rows)
    }

    // --- TRANSFERÊNCIA ---
    #[allow(clippy::too_many_arguments)]
    pub async fn post_transfer<'e, A>(
        &self,
        db: A,
        stock_item_id: i64,
        quantity: Decimal,
        from: Container,
        to: Container,
        reason: Option<String>,
        user_id: i64,
    ) -> Result<Vec<StockMovement>, AppError>
    where
        A: Acquire<'e, Database = Postgres>,
    {
        if from == to {
            return Err(AppError::invalid("to", "same_container"));
        }
        if quantity <= Decimal::ZERO {
            return Err(AppError::invalid("quantity", "positive"));
        }

        let mut tx = db.begin().await?;
        let legs = transfer_legs(stock_item_id, quantity, from, to, reason, user_id);
        let rows = self.apply_movements(&mut *tx, legs.into()).await?;
        tx.commit().await?;
        Ok(rows)
    }

    // --- DEVOLUÇÕES ---

    /// Devolução de cliente: entra no local que recebe a mercadoria.
    pub async fn post_client_return<'e, A>(&self, db: A, return_id: i64, user_id: i64) -> Result<Vec<StockMovement>, AppError>
    where
        A: Acquire<'e, Database = Postgres>,
    {
        let mut tx = db.begin().await?;

        let stock_return = self
            .logistics_repo
            .lock_return(&mut *tx, return_id)
            .await?
            .ok_or(AppError::ResourceNotFound("return"))?;
        ensure_draft(stock_return.status)?;
        if stock_return.return_type != ReturnType::Client {
            return Err(AppError::invalid("return_type", "return_type_mismatch"));
        }
        let target = container_of(stock_return.depot_id, stock_return.vehicle_id, "container")?;

        let lines = self.logistics_repo.return_lines(&mut *tx, stock_return.id).await?;
        let movements = lines
            .iter()
            .map(|line| NewMovement {
                movement_type: MovementType::Transfer,
                stock_item_id: line.stock_item_id,
                quantity: line.quantity,
                from: None,
                to: Some(target),
                document_reference: Some(stock_return.reference.clone()),
                supplier_name: None,
                reason: stock_return.reason.clone(),
                user_id,
            })
            .collect();

        let rows = self.apply_movements(&mut *tx, movements).await?;
        self.logistics_repo
            .set_return_status(&mut *tx, stock_return.id, DocumentStatus::Completed)
            .await?;
        tx.commit().await?;
        Ok(rows)
    }

    /// Devolução ao fornecedor: o inverso da recepção, debita o depósito.
    pub async fn post_supplier_return<'e, A>(&self, db: A, return_id: i64, user_id: i64) -> Result<Vec<StockMovement>, AppError>
    where
        A: Acquire<'e, Database = Postgres>,
    {
        let mut tx = db.begin().await?;

        let stock_return = self
            .logistics_repo
            .lock_return(&mut *tx, return_id)
            .await?
            .ok_or(AppError::ResourceNotFound("return"))?;
        ensure_draft(stock_return.status)?;
        if stock_return.return_type != ReturnType::Supplier {
            return Err(AppError::invalid("return_type", "return_type_mismatch"));
        }
        let depot_id = stock_return
            .depot_id
            .ok_or(AppError::invalid("depot_id", "required"))?;

        let lines = self.logistics_repo.return_lines(&mut *tx, stock_return.id).await?;
        let movements = lines
            .iter()
            .map(|line| NewMovement {
                movement_type: MovementType::ReceptionReturn,
                stock_item_id: line.stock_item_id,
                quantity: -line.quantity,
                from: Some(Container::Depot(depot_id)),
                to: None,
                document_reference: Some(stock_return.reference.clone()),
                supplier_name: stock_return.supplier_name.clone(),
                reason: stock_return.reason.clone(),
                user_id,
            })
            .collect();

        let rows = self.apply_movements(&mut *tx, movements).await?;
        self.logistics_repo
            .set_return_status(&mut *tx, stock_return.id, DocumentStatus::Completed)
            .await?;
        tx.commit().await?;
        Ok(rows)
    }

    // --- AJUSTE E INVENTÁRIO ---

    pub async fn post_adjustment<'e, A>(
        &self,
        db: A,
        container: Container,
        stock_item_id: i64,
        quantity: Decimal,
        reason: String,
        user_id: i64,
    ) -> Result<StockMovement, AppError>
    where
        A: Acquire<'e, Database = Postgres>,
    {
        if quantity.is_zero() {
            return Err(AppError::invalid("quantity", "quantity_nonzero"));
        }

        let mut tx = db.begin().await?;
        let movement = correction(MovementType::Adjustment, container, stock_item_id, quantity, Some(reason), user_id);
        let row = self.apply_single(&mut *tx, movement).await?;
        tx.commit().await?;
        Ok(row)
    }

    /// Contagem física: grava `contado − atual`. Sem diferença, nenhum movimento.
    pub async fn post_inventory_count<'e, A>(
        &self,
        db: A,
        container: Container,
        stock_item_id: i64,
        counted_quantity: Decimal,
        reason: Option<String>,
        user_id: i64,
    ) -> Result<Option<StockMovement>, AppError>
    where
        A: Acquire<'e, Database = Postgres>,
    {
        if counted_quantity.is_sign_negative() && !counted_quantity.is_zero() {
            return Err(AppError::invalid("counted_quantity", "not_negative"));
        }

        let mut tx = db.begin().await?;
        let current = self.inventory_repo.lock_balance(&mut *tx, container, stock_item_id).await?;
        let delta = counted_quantity - current;
        if delta.is_zero() {
            tx.commit().await?;
            return Ok(None);
        }

        let movement = correction(MovementType::Inventory, container, stock_item_id, delta, reason, user_id);
        let row = self.apply_single(&mut *tx, movement).await?;
        tx.commit().await?;
        Ok(Some(row))
    }

    async fn apply_single(&self, conn: &mut PgConnection, movement: NewMovement) -> Result<StockMovement, AppError> {
        self.apply_movements(conn, vec![movement])
            .await?
            .pop()
            .ok_or_else(|| AppError::InternalServerError(anyhow::anyhow!("movimento não gravado")))
    }
}

/// Débito total por (local, item), em ordem de trava. Créditos entram com zero só para
/// travar a linha também.
fn debits_by_balance(movements: &[NewMovement]) -> BTreeMap<(Container, i64), Decimal> {
    let mut touched: BTreeMap<(Container, i64), Decimal> = BTreeMap::new();
    for m in movements {
        if let Some(container) = m.affected_container() {
            let debit = if m.quantity.is_sign_negative() { -m.quantity } else { Decimal::ZERO };
            *touched.entry((container, m.stock_item_id)).or_insert(Decimal::ZERO) += debit;
        }
    }
    touched
}

/// Saldos que ficariam negativos: `(item, exigido, disponível)`. Saldo ausente vale zero.
fn overdrawn(
    debits: &BTreeMap<(Container, i64), Decimal>,
    balances: &BTreeMap<(Container, i64), Decimal>,
) -> Vec<(i64, Decimal, Decimal)> {
    debits
        .iter()
        .filter_map(|(key, required)| {
            let available = balances.get(key).copied().unwrap_or(Decimal::ZERO);
            (*required > Decimal::ZERO && available < *required).then_some((key.1, *required, available))
        })
        .collect()
}

fn ensure_draft(status: DocumentStatus) -> Result<(), AppError> {
    match status {
        DocumentStatus::Draft => Ok(()),
        _ => Err(AppError::invalid("status", "document_not_draft")),
    }
}

fn container_of(depot_id: Option<i64>, vehicle_id: Option<i64>, field: &'static str) -> Result<Container, AppError> {
    match (depot_id, vehicle_id) {
        (Some(d), None) => Ok(Container::Depot(d)),
        (None, Some(v)) => Ok(Container::Vehicle(v)),
        _ => Err(AppError::invalid(field, "container_exactly_one")),
    }
}

// Ajuste e inventário apontam os dois lados para o mesmo local; o sinal escolhe qual vale.
fn correction(
    movement_type: MovementType,
    container: Container,
    stock_item_id: i64,
    quantity: Decimal,
    reason: Option<String>,
    user_id: i64,
) -> NewMovement {
    NewMovement {
        movement_type,
        stock_item_id,
        quantity,
        from: Some(container),
        to: Some(container),
        document_reference: None,
        supplier_name: None,
        reason,
        user_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_drafts_can_be_posted() {
        assert!(ensure_draft(DocumentStatus::Draft).is_ok());
        assert!(ensure_draft(DocumentStatus::Completed).is_err());
        assert!(ensure_draft(DocumentStatus::Cancelled).is_err());
    }

    #[test]
    fn document_container_needs_exactly_one_side() {
        assert_eq!(container_of(Some(1), None, "source").expect("depot"), Container::Depot(1));
        assert_eq!(container_of(None, Some(4), "source").expect("vehicle"), Container::Vehicle(4));
        assert!(container_of(None, None, "source").is_err());
        assert!(container_of(Some(1), Some(4), "source").is_err());
    }

    #[test]
    fn correction_sign_selects_the_side() {
        let gain = correction(MovementType::Inventory, Container::Depot(2), 1, Decimal::from(3), None, 1);
        let loss = correction(MovementType::Adjustment, Container::Vehicle(5), 1, Decimal::from(-3), None, 1);
        assert_eq!(gain.affected_container(), Some(Container::Depot(2)));
        assert_eq!(loss.affected_container(), Some(Container::Vehicle(5)));
    }

    fn outgoing_line(container: Container, item_id: i64, qty: i64) -> NewMovement {
        NewMovement {
            movement_type: MovementType::Transfer,
            stock_item_id: item_id,
            quantity: Decimal::from(-qty),
            from: Some(container),
            to: None,
            document_reference: Some("OUT-20260115-0001".into()),
            supplier_name: None,
            reason: None,
            user_id: 1,
        }
    }

    fn balances(entries: &[(Container, i64, i64)]) -> BTreeMap<(Container, i64), Decimal> {
        entries.iter().map(|(c, item, q)| ((*c, *item), Decimal::from(*q))).collect()
    }

    #[test]
    fn lines_of_the_same_item_are_debited_together() {
        let depot = Container::Depot(1);
        let debits = debits_by_balance(&[outgoing_line(depot, 1, 20), outgoing_line(depot, 1, 15)]);
        assert_eq!(debits.get(&(depot, 1)), Some(&Decimal::from(35)));

        // 30 em estoque não cobre 20 + 15, mesmo cobrindo cada linha isolada
        let short = overdrawn(&debits, &balances(&[(depot, 1, 30)]));
        assert_eq!(short, vec![(1, Decimal::from(35), Decimal::from(30))]);
        assert!(overdrawn(&debits, &balances(&[(depot, 1, 35)])).is_empty());
    }

    #[test]
    fn transfer_debits_only_the_source() {
        let from = Container::Depot(1);
        let to = Container::Vehicle(9);
        let legs = transfer_legs(3, Decimal::from(12), from, to, None, 1);
        let debits = debits_by_balance(&legs);

        assert_eq!(debits.get(&(from, 3)), Some(&Decimal::from(12)));
        assert_eq!(debits.get(&(to, 3)), Some(&Decimal::ZERO));
        // destino sem saldo não bloqueia; origem curta bloqueia
        assert!(overdrawn(&debits, &balances(&[(from, 3, 12)])).is_empty());
        assert_eq!(overdrawn(&debits, &balances(&[(from, 3, 11)])).len(), 1);
    }

    #[test]
    fn missing_balance_row_counts_as_zero() {
        let debits = debits_by_balance(&[outgoing_line(Container::Vehicle(2), 8, 1)]);
        assert_eq!(overdrawn(&debits, &BTreeMap::new()), vec![(8, Decimal::ONE, Decimal::ZERO)]);
    }

    #[test]
    fn ledger_total_matches_balance_changes() {
        let depot = Container::Depot(1);
        let truck = Container::Vehicle(4);
        let mut movements = transfer_legs(1, Decimal::from(10), depot, truck, None, 1).to_vec();
        movements.push(outgoing_line(truck, 1, 4));
        movements.push(correction(MovementType::Adjustment, depot, 1, Decimal::from(-2), None, 1));
        movements.push(correction(MovementType::Inventory, truck, 1, Decimal::from(3), None, 1));

        let mut balance_changes: BTreeMap<Container, Decimal> = BTreeMap::new();
        for m in &movements {
            let container = m.affected_container().expect("every line moves one balance");
            *balance_changes.entry(container).or_insert(Decimal::ZERO) += m.quantity;
        }
        let ledger_total: Decimal = movements.iter().map(|m| m.quantity).sum();
        let balance_total: Decimal = balance_changes.values().copied().sum();

        assert_eq!(ledger_total, balance_total);
        assert_eq!(balance_changes[&depot], Decimal::from(-12));
        assert_eq!(balance_changes[&truck], Decimal::from(9));
    }
}
