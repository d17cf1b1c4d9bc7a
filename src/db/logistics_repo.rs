// src/db/logistics_repo.rs

use chrono::NaiveDate;
use sqlx::{Executor, PgPool, Postgres, QueryBuilder};

use crate::{
    common::error::{map_unique_violation, AppError},
    db::scope::{Scope, ScopedEntity},
    models::logistics::{
        CreateReturnPayload, DocumentLine, DocumentStatus, NewLine, NewOutgoing, Reception, ReturnType,
        StockOutgoing, StockReturn,
    },
};

const RECEPTION_COLUMNS: &str = r#"
    r.id, r.reference, r.reception_date, r.supplier_name, r.bl_number, r.depot_id, r.user_id,
    r.status, r.notes, r.created_at
"#;

const OUTGOING_COLUMNS: &str = r#"
    o.id, o.reference, o.outgoing_date, o.client_name, o.client_phone, o.commercial_id,
    o.depot_id, o.vehicle_id, o.order_id, o.order_client_id, o.user_id, o.status, o.notes, o.created_at
"#;

const RETURN_COLUMNS: &str = r#"
    t.id, t.reference, t.return_type, t.return_date, t.client_name, t.client_phone, t.supplier_name,
    t.original_order_id, t.original_reception_id, t.depot_id, t.vehicle_id, t.user_id, t.reason,
    t.status, t.notes, t.created_at
"#;

const LIST_LIMIT: i64 = 200;

/// Documentos logísticos: recepções, saídas e devoluções, com suas linhas.
#[derive(Clone)]
pub struct LogisticsRepository {
    pool: PgPool,
}

impl LogisticsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ---
    // Recepções
    // ---

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_reception<'e, E>(
        &self,
        executor: E,
        reference: &str,
        reception_date: NaiveDate,
        supplier_name: &str,
        bl_number: Option<&str>,
        depot_id: i64,
        user_id: i64,
        notes: Option<&str>,
    ) -> Result<Reception, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let sql = format!(
            r#"
            INSERT INTO receptions AS r (reference, reception_date, supplier_name, bl_number, depot_id, user_id, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {RECEPTION_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Reception>(&sql)
            .bind(reference)
            .bind(reception_date)
            .bind(supplier_name)
            .bind(bl_number)
            .bind(depot_id)
            .bind(user_id)
            .bind(notes)
            .fetch_one(executor)
            .await
            .map_err(|e| map_unique_violation(e, "duplicate_reference"))
    }

    pub async fn insert_reception_line<'e, E>(&self, executor: E, reception_id: i64, line: &NewLine) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            "INSERT INTO reception_details (reception_id, stock_item_id, quantity, unit_price) VALUES ($1, $2, $3, $4)",
        )
        .bind(reception_id)
        .bind(line.stock_item_id)
        .bind(line.quantity)
        .bind(line.unit_price)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Busca respeitando o escopo; fora da região é o mesmo que inexistente.
    pub async fn find_reception<'e, E>(&self, executor: E, scope: &Scope, id: i64) -> Result<Option<Reception>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {RECEPTION_COLUMNS} FROM receptions r WHERE r.id = "));
        qb.push_bind(id);
        scope.restrict(&mut qb, ScopedEntity::DepotDocument, "r");
        Ok(qb.build_query_as::<Reception>().fetch_optional(executor).await?)
    }

    pub async fn lock_reception<'e, E>(&self, executor: E, id: i64) -> Result<Option<Reception>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let sql = format!("SELECT {RECEPTION_COLUMNS} FROM receptions r WHERE r.id = $1 FOR UPDATE");
        Ok(sqlx::query_as::<_, Reception>(&sql).bind(id).fetch_optional(executor).await?)
    }

    pub async fn reception_lines<'e, E>(&self, executor: E, reception_id: i64) -> Result<Vec<DocumentLine>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let lines = sqlx::query_as::<_, DocumentLine>(
            r#"
            SELECT l.id, l.stock_item_id, si.name AS stock_item_name, l.quantity, l.unit_price
            FROM reception_details l
            JOIN stock_items si ON si.id = l.stock_item_id
            WHERE l.reception_id = $1
            ORDER BY l.id
            "#,
        )
        .bind(reception_id)
        .fetch_all(executor)
        .await?;
        Ok(lines)
    }

    pub async fn set_reception_status<'e, E>(&self, executor: E, id: i64, status: DocumentStatus) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query("UPDATE receptions SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(executor)
            .await?;
        Ok(())
    }

    pub async fn list_receptions(&self, scope: &Scope) -> Result<Vec<Reception>, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {RECEPTION_COLUMNS} FROM receptions r WHERE TRUE"));
        scope.restrict(&mut qb, ScopedEntity::DepotDocument, "r");
        qb.push(" ORDER BY r.reception_date DESC, r.id DESC LIMIT ").push_bind(LIST_LIMIT);
        Ok(qb.build_query_as::<Reception>().fetch_all(&self.pool).await?)
    }

    // ---
    // Saídas
    // ---

    pub async fn insert_outgoing<'e, E>(
        &self,
        executor: E,
        reference: &str,
        header: &NewOutgoing,
        user_id: i64,
    ) -> Result<StockOutgoing, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let sql = format!(
            r#"
            INSERT INTO stock_outgoings AS o (
                reference, outgoing_date, client_name, client_phone, commercial_id,
                depot_id, vehicle_id, order_id, order_client_id, user_id, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {OUTGOING_COLUMNS}
            "#
        );
        sqlx::query_as::<_, StockOutgoing>(&sql)
            .bind(reference)
            .bind(header.outgoing_date)
            .bind(&header.client_name)
            .bind(header.client_phone.as_deref())
            .bind(header.commercial_id)
            .bind(header.depot_id)
            .bind(header.vehicle_id)
            .bind(header.order_id)
            .bind(header.order_client_id)
            .bind(user_id)
            .bind(header.notes.as_deref())
            .fetch_one(executor)
            .await
            .map_err(|e| map_unique_violation(e, "duplicate_reference"))
    }

    pub async fn insert_outgoing_line<'e, E>(&self, executor: E, outgoing_id: i64, line: &NewLine) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            INSERT INTO stock_outgoing_details (outgoing_id, stock_item_id, quantity, unit_price)
            VALUES ($1, $2, $3, COALESCE($4, 0))
            "#,
        )
        .bind(outgoing_id)
        .bind(line.stock_item_id)
        .bind(line.quantity)
        .bind(line.unit_price)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn find_outgoing<'e, E>(&self, executor: E, scope: &Scope, id: i64) -> Result<Option<StockOutgoing>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {OUTGOING_COLUMNS} FROM stock_outgoings o WHERE o.id = "));
        qb.push_bind(id);
        scope.restrict(&mut qb, ScopedEntity::ContainerDocument, "o");
        Ok(qb.build_query_as::<StockOutgoing>().fetch_optional(executor).await?)
    }

    pub async fn lock_outgoing<'e, E>(&self, executor: E, id: i64) -> Result<Option<StockOutgoing>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let sql = format!("SELECT {OUTGOING_COLUMNS} FROM stock_outgoings o WHERE o.id = $1 FOR UPDATE");
        Ok(sqlx::query_as::<_, StockOutgoing>(&sql).bind(id).fetch_optional(executor).await?)
    }

    pub async fn outgoing_lines<'e, E>(&self, executor: E, outgoing_id: i64) -> Result<Vec<DocumentLine>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let lines = sqlx::query_as::<_, DocumentLine>(
            r#"
            SELECT l.id, l.stock_item_id, si.name AS stock_item_name, l.quantity, l.unit_price
            FROM stock_outgoing_details l
            JOIN stock_items si ON si.id = l.stock_item_id
            WHERE l.outgoing_id = $1
            ORDER BY l.id
            "#,
        )
        .bind(outgoing_id)
        .fetch_all(executor)
        .await?;
        Ok(lines)
    }

    pub async fn set_outgoing_status<'e, E>(&self, executor: E, id: i64, status: DocumentStatus) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query("UPDATE stock_outgoings SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(executor)
            .await?;
        Ok(())
    }

    pub async fn list_outgoings(&self, scope: &Scope) -> Result<Vec<StockOutgoing>, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {OUTGOING_COLUMNS} FROM stock_outgoings o WHERE TRUE"));
        scope.restrict(&mut qb, ScopedEntity::ContainerDocument, "o");
        qb.push(" ORDER BY o.outgoing_date DESC, o.id DESC LIMIT ").push_bind(LIST_LIMIT);
        Ok(qb.build_query_as::<StockOutgoing>().fetch_all(&self.pool).await?)
    }

    // ---
    // Devoluções
    // ---

    pub async fn insert_return<'e, E>(
        &self,
        executor: E,
        reference: &str,
        payload: &CreateReturnPayload,
        return_date: NaiveDate,
        depot_id: Option<i64>,
        vehicle_id: Option<i64>,
        user_id: i64,
    ) -> Result<StockReturn, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let sql = format!(
            r#"
            INSERT INTO stock_returns AS t (
                reference, return_type, return_date, client_name, client_phone, supplier_name,
                original_order_id, original_reception_id, depot_id, vehicle_id, user_id, reason, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {RETURN_COLUMNS}
            "#
        );
        sqlx::query_as::<_, StockReturn>(&sql)
            .bind(reference)
            .bind(payload.return_type)
            .bind(return_date)
            .bind(payload.client_name.as_deref())
            .bind(payload.client_phone.as_deref())
            .bind(payload.supplier_name.as_deref())
            .bind(payload.original_order_id)
            .bind(payload.original_reception_id)
            .bind(depot_id)
            .bind(vehicle_id)
            .bind(user_id)
            .bind(payload.reason.as_deref())
            .bind(payload.notes.as_deref())
            .fetch_one(executor)
            .await
            .map_err(|e| map_unique_violation(e, "duplicate_reference"))
    }

    pub async fn insert_return_line<'e, E>(&self, executor: E, return_id: i64, line: &NewLine) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            "INSERT INTO stock_return_details (return_id, stock_item_id, quantity, unit_price) VALUES ($1, $2, $3, $4)",
        )
        .bind(return_id)
        .bind(line.stock_item_id)
        .bind(line.quantity)
        .bind(line.unit_price)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn find_return<'e, E>(&self, executor: E, scope: &Scope, id: i64) -> Result<Option<StockReturn>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {RETURN_COLUMNS} FROM stock_returns t WHERE t.id = "));
        qb.push_bind(id);
        scope.restrict(&mut qb, ScopedEntity::ContainerDocument, "t");
        Ok(qb.build_query_as::<StockReturn>().fetch_optional(executor).await?)
    }

    pub async fn lock_return<'e, E>(&self, executor: E, id: i64) -> Result<Option<StockReturn>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let sql = format!("SELECT {RETURN_COLUMNS} FROM stock_returns t WHERE t.id = $1 FOR UPDATE");
        Ok(sqlx::query_as::<_, StockReturn>(&sql).bind(id).fetch_optional(executor).await?)
    }

    pub async fn return_lines<'e, E>(&self, executor: E, return_id: i64) -> Result<Vec<DocumentLine>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let lines = sqlx::query_as::<_, DocumentLine>(
            r#"
            SELECT l.id, l.stock_item_id, si.name AS stock_item_name, l.quantity, l.unit_price
            FROM stock_return_details l
            JOIN stock_items si ON si.id = l.stock_item_id
            WHERE l.return_id = $1
            ORDER BY l.id
            "#,
        )
        .bind(return_id)
        .fetch_all(executor)
        .await?;
        Ok(lines)
    }

    pub async fn set_return_status<'e, E>(&self, executor: E, id: i64, status: DocumentStatus) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query("UPDATE stock_returns SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(executor)
            .await?;
        Ok(())
    }

    pub async fn list_returns(&self, scope: &Scope, return_type: Option<ReturnType>) -> Result<Vec<StockReturn>, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {RETURN_COLUMNS} FROM stock_returns t WHERE TRUE"));
        if let Some(kind) = return_type {
            qb.push(" AND t.return_type = ").push_bind(kind);
        }
        scope.restrict(&mut qb, ScopedEntity::ContainerDocument, "t");
        qb.push(" ORDER BY t.return_date DESC, t.id DESC LIMIT ").push_bind(LIST_LIMIT);
        Ok(qb.build_query_as::<StockReturn>().fetch_all(&self.pool).await?)
    }
}
