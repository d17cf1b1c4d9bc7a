// src/db/orders_repo.rs

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{Executor, PgConnection, PgPool, Postgres, QueryBuilder};

use crate::{
    common::error::{map_unique_violation, AppError},
    db::scope::{Scope, ScopedEntity},
    models::{
        auth::Principal,
        orders::{
            CommercialOrder, LoadingSummary, LoadingSummaryItem, LoadingSummaryStatus, OrderClient,
            OrderClientDetail, OrderClientPayload, OrderDetail, OrderItem, OrderListQuery, OrderListRow,
            OrderStatus,
        },
        rbac::{ROLE_COMMERCIAL, ROLE_WAREHOUSE},
    },
};

const ORDER_COLUMNS: &str = r#"
    o.id, o.reference, o.order_date, o.commercial_id, o.region_id, o.status, o.validated_by_id,
    o.validated_at, o.rejection_reason, o.sale_confirmed, o.sale_confirmed_at, o.sale_confirmed_by_id,
    o.notes, o.created_at, o.updated_at
"#;

const CLIENT_COLUMNS: &str = r#"
    id, order_id, client_name, client_phone, client_address, payment_type, payment_due_date, comments,
    status, rejection_reason, rejected_by_id, rejected_at
"#;

/// Quais pedidos uma pessoa enxerga nas listagens e no detalhe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderVisibility {
    /// Comercial: apenas os próprios pedidos.
    Own(i64),
    /// Armazém: pedidos validados de qualquer região, do mais antigo ao mais novo.
    WarehouseQueue,
    /// Demais papéis: filtro regional.
    Scoped(Scope),
}

impl OrderVisibility {
    pub fn for_principal(principal: &Principal) -> Self {
        if principal.is_admin() {
            OrderVisibility::Scoped(Scope::unrestricted())
        } else if principal.has_role(ROLE_COMMERCIAL) {
            OrderVisibility::Own(principal.user_id)
        } else if principal.has_role(ROLE_WAREHOUSE) {
            OrderVisibility::WarehouseQueue
        } else {
            OrderVisibility::Scoped(Scope::from_principal(principal))
        }
    }

    fn restrict(&self, qb: &mut QueryBuilder<'_, Postgres>, alias: &str) {
        match self {
            OrderVisibility::Own(user_id) => {
                qb.push(format!(" AND {alias}.commercial_id = ")).push_bind(*user_id);
            }
            OrderVisibility::WarehouseQueue => {
                qb.push(format!(" AND {alias}.status = 'validated'"));
            }
            OrderVisibility::Scoped(scope) => scope.restrict(qb, ScopedEntity::CommercialOrder, alias),
        }
    }

    fn order_by(&self) -> &'static str {
        match self {
            OrderVisibility::WarehouseQueue => " ORDER BY o.created_at ASC, o.id ASC",
            _ => " ORDER BY o.created_at DESC, o.id DESC",
        }
    }
}

#[derive(Clone)]
pub struct OrdersRepository {
    pool: PgPool,
}

impl OrdersRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ---
    // Escrita
    // ---

    pub async fn insert_order<'e, E>(
        &self,
        executor: E,
        reference: &str,
        order_date: NaiveDate,
        commercial_id: i64,
        region_id: Option<i64>,
        notes: Option<&str>,
    ) -> Result<CommercialOrder, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let sql = format!(
            r#"
            INSERT INTO commercial_orders AS o (reference, order_date, commercial_id, region_id, status, notes)
            VALUES ($1, $2, $3, $4, 'pending_validation', $5)
            RETURNING {ORDER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, CommercialOrder>(&sql)
            .bind(reference)
            .bind(order_date)
            .bind(commercial_id)
            .bind(region_id)
            .bind(notes)
            .fetch_one(executor)
            .await
            .map_err(|e| map_unique_violation(e, "duplicate_reference"))
    }

    /// Grava clientes e itens do pedido. Chamado na criação e depois de `delete_clients` na edição.
    pub async fn insert_clients(
        &self,
        conn: &mut PgConnection,
        order_id: i64,
        clients: &[OrderClientPayload],
    ) -> Result<(), AppError> {
        for client in clients {
            let client_id = sqlx::query_scalar::<_, i64>(
                r#"
                INSERT INTO commercial_order_clients
                    (order_id, client_name, client_phone, client_address, payment_type, payment_due_date, comments)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING id
                "#,
            )
            .bind(order_id)
            .bind(client.client_name.trim())
            .bind(client.client_phone.as_deref())
            .bind(client.client_address.as_deref())
            .bind(client.payment_type)
            .bind(client.payment_due_date)
            .bind(client.comments.as_deref())
            .fetch_one(&mut *conn)
            .await?;

            for item in &client.items {
                sqlx::query(
                    r#"
                    INSERT INTO commercial_order_items (order_client_id, stock_item_id, quantity, unit_price_gnf)
                    VALUES ($1, $2, $3, $4)
                    "#,
                )
                .bind(client_id)
                .bind(item.stock_item_id)
                .bind(item.quantity)
                .bind(item.unit_price_gnf)
                .execute(&mut *conn)
                .await?;
            }
        }
        Ok(())
    }

    /// Os itens saem junto (ON DELETE CASCADE).
    pub async fn delete_clients<'e, E>(&self, executor: E, order_id: i64) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query("DELETE FROM commercial_order_clients WHERE order_id = $1")
            .bind(order_id)
            .execute(executor)
            .await?;
        Ok(())
    }

    pub async fn update_after_edit<'e, E>(
        &self,
        executor: E,
        order_id: i64,
        status: OrderStatus,
        order_date: NaiveDate,
        notes: Option<&str>,
    ) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            UPDATE commercial_orders
            SET status = $2, order_date = $3, notes = $4, rejection_reason = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(order_id)
        .bind(status)
        .bind(order_date)
        .bind(notes)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn set_status<'e, E>(&self, executor: E, order_id: i64, status: OrderStatus) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query("UPDATE commercial_orders SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(order_id)
            .bind(status)
            .execute(executor)
            .await?;
        Ok(())
    }

    pub async fn mark_validated<'e, E>(&self, executor: E, order_id: i64, validator_id: i64) -> Result<CommercialOrder, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let sql = format!(
            r#"
            UPDATE commercial_orders AS o
            SET status = 'validated', validated_by_id = $2, validated_at = NOW(), rejection_reason = NULL, updated_at = NOW()
            WHERE o.id = $1
            RETURNING {ORDER_COLUMNS}
            "#
        );
        Ok(sqlx::query_as::<_, CommercialOrder>(&sql)
            .bind(order_id)
            .bind(validator_id)
            .fetch_one(executor)
            .await?)
    }

    pub async fn mark_rejected<'e, E>(
        &self,
        executor: E,
        order_id: i64,
        validator_id: i64,
        reason: &str,
    ) -> Result<CommercialOrder, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let sql = format!(
            r#"
            UPDATE commercial_orders AS o
            SET status = 'rejected', validated_by_id = $2, rejection_reason = $3, updated_at = NOW()
            WHERE o.id = $1
            RETURNING {ORDER_COLUMNS}
            "#
        );
        Ok(sqlx::query_as::<_, CommercialOrder>(&sql)
            .bind(order_id)
            .bind(validator_id)
            .bind(reason)
            .fetch_one(executor)
            .await?)
    }

    pub async fn set_client_rejected<'e, E>(
        &self,
        executor: E,
        client_id: i64,
        user_id: i64,
        reason: &str,
    ) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            UPDATE commercial_order_clients
            SET status = 'rejected', rejection_reason = $3, rejected_by_id = $2, rejected_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(client_id)
        .bind(user_id)
        .bind(reason)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn set_client_approved<'e, E>(&self, executor: E, client_id: i64) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            UPDATE commercial_order_clients
            SET status = 'approved', rejection_reason = NULL, rejected_by_id = NULL, rejected_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(client_id)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn set_sale_confirmed<'e, E>(&self, executor: E, order_id: i64, confirmed_by: Option<i64>) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            UPDATE commercial_orders
            SET sale_confirmed = $2 IS NOT NULL,
                sale_confirmed_at = CASE WHEN $2 IS NULL THEN NULL ELSE NOW() END,
                sale_confirmed_by_id = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(order_id)
        .bind(confirmed_by)
        .execute(executor)
        .await?;
        Ok(())
    }

    // ---
    // Leitura
    // ---

    /// Trava o pedido para uma transição de estado. Sem escopo: o chamador já checou a visibilidade.
    pub async fn lock_order<'e, E>(&self, executor: E, order_id: i64) -> Result<Option<CommercialOrder>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM commercial_orders o WHERE o.id = $1 FOR UPDATE");
        Ok(sqlx::query_as::<_, CommercialOrder>(&sql)
            .bind(order_id)
            .fetch_optional(executor)
            .await?)
    }

    pub async fn find_visible<'e, E>(
        &self,
        executor: E,
        visibility: &OrderVisibility,
        order_id: i64,
    ) -> Result<Option<CommercialOrder>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {ORDER_COLUMNS} FROM commercial_orders o WHERE o.id = "));
        qb.push_bind(order_id);
        visibility.restrict(&mut qb, "o");
        Ok(qb.build_query_as::<CommercialOrder>().fetch_optional(executor).await?)
    }

    pub async fn list_orders(&self, visibility: &OrderVisibility, query: &OrderListQuery) -> Result<Vec<OrderListRow>, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new(
            r#"
            SELECT o.id, o.reference, o.order_date, o.commercial_id, u.username AS commercial_name,
                   o.region_id, o.status, o.sale_confirmed,
                   (SELECT COUNT(*) FROM commercial_order_clients c WHERE c.order_id = o.id) AS client_count,
                   COALESCE((SELECT SUM(i.quantity * i.unit_price_gnf)
                             FROM commercial_order_items i
                             JOIN commercial_order_clients c ON c.id = i.order_client_id
                             WHERE c.order_id = o.id AND c.status = 'approved'), 0) AS total_amount,
                   o.created_at
            FROM commercial_orders o
            JOIN users u ON u.id = o.commercial_id
            WHERE TRUE
            "#,
        );
        if let Some(status) = query.status {
            qb.push(" AND o.status = ").push_bind(status);
        }
        if let Some(from) = query.date_from {
            qb.push(" AND o.order_date >= ").push_bind(from);
        }
        if let Some(to) = query.date_to {
            qb.push(" AND o.order_date <= ").push_bind(to);
        }
        visibility.restrict(&mut qb, "o");
        qb.push(visibility.order_by());

        let (limit, offset) = query.limit_offset();
        qb.push(" LIMIT ").push_bind(limit).push(" OFFSET ").push_bind(offset);

        Ok(qb.build_query_as::<OrderListRow>().fetch_all(&self.pool).await?)
    }

    pub async fn find_client<'e, E>(&self, executor: E, order_id: i64, client_id: i64) -> Result<Option<OrderClient>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let sql = format!("SELECT {CLIENT_COLUMNS} FROM commercial_order_clients WHERE order_id = $1 AND id = $2");
        Ok(sqlx::query_as::<_, OrderClient>(&sql)
            .bind(order_id)
            .bind(client_id)
            .fetch_optional(executor)
            .await?)
    }

    /// Monta o detalhe (clientes, itens, totais) de um pedido já carregado.
    pub async fn load_detail(&self, conn: &mut PgConnection, order: CommercialOrder) -> Result<OrderDetail, AppError> {
        let commercial_name = sqlx::query_scalar::<_, String>("SELECT username FROM users WHERE id = $1")
            .bind(order.commercial_id)
            .fetch_one(&mut *conn)
            .await?;

        let sql = format!("SELECT {CLIENT_COLUMNS} FROM commercial_order_clients WHERE order_id = $1 ORDER BY id");
        let clients = sqlx::query_as::<_, OrderClient>(&sql)
            .bind(order.id)
            .fetch_all(&mut *conn)
            .await?;

        let items = sqlx::query_as::<_, OrderItem>(
            r#"
            SELECT i.id, i.order_client_id, i.stock_item_id, si.name AS stock_item_name, i.quantity, i.unit_price_gnf
            FROM commercial_order_items i
            JOIN commercial_order_clients c ON c.id = i.order_client_id
            JOIN stock_items si ON si.id = i.stock_item_id
            WHERE c.order_id = $1
            ORDER BY i.id
            "#,
        )
        .bind(order.id)
        .fetch_all(&mut *conn)
        .await?;

        let clients = clients
            .into_iter()
            .map(|client| {
                let items: Vec<OrderItem> = items.iter().filter(|i| i.order_client_id == client.id).cloned().collect();
                let total_amount: Decimal = items.iter().map(|i| i.quantity * i.unit_price_gnf).sum();
                OrderClientDetail { client, items, total_amount }
            })
            .collect();

        Ok(OrderDetail { order, commercial_name, clients })
    }

    // ---
    // Ficha de carregamento
    // ---

    pub async fn find_summary<'e, E>(&self, executor: E, order_id: i64) -> Result<Option<LoadingSummary>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        Ok(sqlx::query_as::<_, LoadingSummary>(
            r#"
            SELECT id, order_id, commercial_id, source_depot_id, status, notes, created_at
            FROM stock_loading_summaries
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(executor)
        .await?)
    }

    /// Idempotente: `order_id` é único, uma segunda validação devolve a ficha existente.
    pub async fn upsert_summary<'e, E>(
        &self,
        executor: E,
        order_id: i64,
        commercial_id: i64,
        source_depot_id: Option<i64>,
        notes: Option<&str>,
    ) -> Result<i64, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        Ok(sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO stock_loading_summaries (order_id, commercial_id, source_depot_id, notes)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (order_id) DO UPDATE SET updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(order_id)
        .bind(commercial_id)
        .bind(source_depot_id)
        .bind(notes)
        .fetch_one(executor)
        .await?)
    }

    /// Substitui os itens da ficha pelas quantidades exigidas atuais.
    pub async fn replace_summary_items(
        &self,
        conn: &mut PgConnection,
        summary_id: i64,
        requirements: &BTreeMap<i64, Decimal>,
    ) -> Result<(), AppError> {
        sqlx::query("DELETE FROM stock_loading_summary_items WHERE summary_id = $1")
            .bind(summary_id)
            .execute(&mut *conn)
            .await?;

        for (stock_item_id, quantity) in requirements {
            sqlx::query(
                r#"
                INSERT INTO stock_loading_summary_items (summary_id, stock_item_id, quantity_required)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(summary_id)
            .bind(stock_item_id)
            .bind(quantity)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    pub async fn summary_items<'e, E>(&self, executor: E, summary_id: i64) -> Result<Vec<LoadingSummaryItem>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        Ok(sqlx::query_as::<_, LoadingSummaryItem>(
            r#"
            SELECT l.stock_item_id, si.name AS stock_item_name, l.quantity_required, l.quantity_loaded
            FROM stock_loading_summary_items l
            JOIN stock_items si ON si.id = l.stock_item_id
            WHERE l.summary_id = $1
            ORDER BY l.stock_item_id
            "#,
        )
        .bind(summary_id)
        .fetch_all(executor)
        .await?)
    }

    /// Marca a ficha como concluída e registra o carregado igual ao exigido.
    pub async fn complete_summary(&self, conn: &mut PgConnection, summary_id: i64) -> Result<(), AppError> {
        sqlx::query("UPDATE stock_loading_summary_items SET quantity_loaded = quantity_required WHERE summary_id = $1")
            .bind(summary_id)
            .execute(&mut *conn)
            .await?;
        sqlx::query("UPDATE stock_loading_summaries SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(summary_id)
            .bind(LoadingSummaryStatus::Completed)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        auth::fixtures::principal,
        rbac::{ROLE_ADMIN, ROLE_SUPERVISOR},
    };

    fn sql_for(visibility: OrderVisibility) -> String {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1 FROM commercial_orders o WHERE TRUE");
        visibility.restrict(&mut qb, "o");
        qb.push(visibility.order_by());
        qb.sql().to_string()
    }

    #[test]
    fn commercial_sees_own_orders() {
        let visibility = OrderVisibility::for_principal(&principal(ROLE_COMMERCIAL, Some(1), &[]));
        assert!(matches!(visibility, OrderVisibility::Own(_)));
        assert!(sql_for(visibility).contains("o.commercial_id = $1"));
    }

    #[test]
    fn warehouse_queue_is_cross_region_and_fifo() {
        let visibility = OrderVisibility::for_principal(&principal(ROLE_WAREHOUSE, Some(1), &[]));
        let sql = sql_for(visibility);
        assert!(sql.contains("o.status = 'validated'"));
        assert!(!sql.contains("region_id"));
        assert!(sql.ends_with("ORDER BY o.created_at ASC, o.id ASC"));
    }

    #[test]
    fn supervisor_is_region_scoped() {
        let visibility = OrderVisibility::for_principal(&principal(ROLE_SUPERVISOR, Some(2), &[]));
        assert!(sql_for(visibility).contains("o.region_id = $1"));
    }

    #[test]
    fn admin_sees_everything() {
        let visibility = OrderVisibility::for_principal(&principal(ROLE_ADMIN, None, &[]));
        assert_eq!(
            sql_for(visibility),
            "SELECT 1 FROM commercial_orders o WHERE TRUE ORDER BY o.created_at DESC, o.id DESC"
        );
    }
}
