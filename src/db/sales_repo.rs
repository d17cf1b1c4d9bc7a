// src/db/sales_repo.rs

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{Executor, PgPool, Postgres, QueryBuilder};

use crate::{
    common::error::{map_unique_violation, AppError},
    db::scope::{Scope, ScopedEntity},
    models::sales::{
        CommercialSale, ConfirmSalePayload, CreateObjectivePayload, ItemAmount, NewSale, ObjectiveItemPayload,
        OrderToConfirm, SalesObjective,
    },
};

const SALE_COLUMNS: &str = r#"
    s.id, s.order_id, s.order_client_id, s.commercial_id, s.supervisor_id, s.region_id, s.invoice_number,
    s.invoice_date, s.sale_date, s.total_amount, s.payment_method, s.payment_status, s.payment_due_date,
    s.status, s.notes, s.cancelled_at, s.created_at
"#;

const OBJECTIVE_COLUMNS: &str = r#"
    o.id, o.commercial_id, o.supervisor_id, o.period_start, o.period_end, o.target_quantity,
    o.target_value, o.notes, o.created_at
"#;

/// `None` = todos os comerciais visíveis no escopo.
fn restrict_commercials(qb: &mut QueryBuilder<'_, Postgres>, column: &str, commercial_ids: Option<&[i64]>) {
    if let Some(ids) = commercial_ids {
        qb.push(format!(" AND {column} = ANY(")).push_bind(ids.to_vec()).push(")");
    }
}

#[derive(Clone)]
pub struct SalesRepository {
    pool: PgPool,
}

impl SalesRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ---
    // Confirmação de venda
    // ---

    pub async fn orders_to_confirm(
        &self,
        scope: &Scope,
        commercial_ids: Option<&[i64]>,
    ) -> Result<Vec<OrderToConfirm>, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new(
            r#"
            SELECT o.id, o.reference, o.order_date, o.commercial_id, u.username AS commercial_name, o.region_id,
                   (SELECT COUNT(*) FROM commercial_order_clients c
                    WHERE c.order_id = o.id AND c.status = 'approved') AS client_count,
                   COALESCE((SELECT SUM(i.quantity * i.unit_price_gnf)
                             FROM commercial_order_items i
                             JOIN commercial_order_clients c ON c.id = i.order_client_id
                             WHERE c.order_id = o.id AND c.status = 'approved'), 0) AS total_amount
            FROM commercial_orders o
            JOIN users u ON u.id = o.commercial_id
            WHERE o.status = 'validated' AND NOT o.sale_confirmed
            "#,
        );
        restrict_commercials(&mut qb, "o.commercial_id", commercial_ids);
        scope.restrict(&mut qb, ScopedEntity::CommercialOrder, "o");
        qb.push(" ORDER BY o.order_date DESC, o.id DESC");

        Ok(qb.build_query_as::<OrderToConfirm>().fetch_all(&self.pool).await?)
    }

    pub async fn insert_sale<'e, E>(
        &self,
        executor: E,
        sale: &NewSale,
        payload: &ConfirmSalePayload,
    ) -> Result<CommercialSale, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let sql = format!(
            r#"
            INSERT INTO commercial_sales AS s (
                order_id, order_client_id, commercial_id, supervisor_id, region_id, invoice_number,
                invoice_date, sale_date, total_amount, payment_method, payment_status, payment_due_date, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {SALE_COLUMNS}
            "#
        );
        sqlx::query_as::<_, CommercialSale>(&sql)
            .bind(sale.order_id)
            .bind(sale.order_client_id)
            .bind(sale.commercial_id)
            .bind(sale.supervisor_id)
            .bind(sale.region_id)
            .bind(&sale.invoice_number)
            .bind(payload.invoice_date)
            .bind(payload.sale_date)
            .bind(sale.total_amount)
            .bind(payload.payment_method.trim())
            .bind(payload.payment_status.trim())
            .bind(payload.payment_due_date)
            .bind(payload.notes.as_deref())
            .fetch_one(executor)
            .await
            .map_err(|e| map_unique_violation(e, "duplicate_invoice"))
    }

    pub async fn insert_sale_item<'e, E>(
        &self,
        executor: E,
        sale_id: i64,
        stock_item_id: i64,
        quantity: Decimal,
        unit_price: Decimal,
    ) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            INSERT INTO commercial_sale_items (sale_id, stock_item_id, quantity, unit_price, total_price)
            VALUES ($1, $2, $3, $4, $3 * $4)
            "#,
        )
        .bind(sale_id)
        .bind(stock_item_id)
        .bind(quantity)
        .bind(unit_price)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn find_sale<'e, E>(&self, executor: E, scope: &Scope, sale_id: i64) -> Result<Option<CommercialSale>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {SALE_COLUMNS} FROM commercial_sales s WHERE s.id = "));
        qb.push_bind(sale_id);
        scope.restrict(&mut qb, ScopedEntity::CommercialSale, "s");
        qb.push(" FOR UPDATE");
        Ok(qb.build_query_as::<CommercialSale>().fetch_optional(executor).await?)
    }

    pub async fn mark_cancelled<'e, E>(&self, executor: E, sale_id: i64, cancelled_by: i64) -> Result<CommercialSale, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let sql = format!(
            r#"
            UPDATE commercial_sales AS s
            SET status = 'cancelled', cancelled_at = NOW(), cancelled_by_id = $2
            WHERE s.id = $1
            RETURNING {SALE_COLUMNS}
            "#
        );
        Ok(sqlx::query_as::<_, CommercialSale>(&sql)
            .bind(sale_id)
            .bind(cancelled_by)
            .fetch_one(executor)
            .await?)
    }

    pub async fn confirmed_sales_count<'e, E>(&self, executor: E, order_id: i64) -> Result<i64, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        Ok(sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM commercial_sales WHERE order_id = $1 AND status = 'confirmed'",
        )
        .bind(order_id)
        .fetch_one(executor)
        .await?)
    }

    pub async fn list_sales(&self, scope: &Scope, commercial_ids: Option<&[i64]>) -> Result<Vec<CommercialSale>, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {SALE_COLUMNS} FROM commercial_sales s WHERE TRUE"));
        restrict_commercials(&mut qb, "s.commercial_id", commercial_ids);
        scope.restrict(&mut qb, ScopedEntity::CommercialSale, "s");
        qb.push(" ORDER BY s.sale_date DESC, s.id DESC LIMIT 500");
        Ok(qb.build_query_as::<CommercialSale>().fetch_all(&self.pool).await?)
    }

    // ---
    // Objetivos e progresso
    // ---

    pub async fn insert_objective<'e, E>(
        &self,
        executor: E,
        payload: &CreateObjectivePayload,
        supervisor_id: i64,
    ) -> Result<SalesObjective, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let target_quantity: Decimal = payload.items.iter().map(|i| i.target_quantity).sum();
        let target_value: Decimal = payload.items.iter().map(|i| i.target_value).sum();
        let sql = format!(
            r#"
            INSERT INTO sales_objectives AS o
                (commercial_id, supervisor_id, period_start, period_end, target_quantity, target_value, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {OBJECTIVE_COLUMNS}
            "#
        );
        Ok(sqlx::query_as::<_, SalesObjective>(&sql)
            .bind(payload.commercial_id)
            .bind(supervisor_id)
            .bind(payload.period_start)
            .bind(payload.period_end)
            .bind(target_quantity)
            .bind(target_value)
            .bind(payload.notes.as_deref())
            .fetch_one(executor)
            .await?)
    }

    pub async fn insert_objective_item<'e, E>(
        &self,
        executor: E,
        objective_id: i64,
        item: &ObjectiveItemPayload,
    ) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            INSERT INTO sales_objective_items (objective_id, stock_item_id, target_quantity, target_value, selling_price)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(objective_id)
        .bind(item.stock_item_id)
        .bind(item.target_quantity)
        .bind(item.target_value)
        .bind(item.selling_price)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn list_objectives(&self, scope: &Scope, commercial_ids: Option<&[i64]>) -> Result<Vec<SalesObjective>, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {OBJECTIVE_COLUMNS} FROM sales_objectives o JOIN users u ON u.id = o.commercial_id WHERE TRUE"
        ));
        restrict_commercials(&mut qb, "o.commercial_id", commercial_ids);
        scope.restrict(&mut qb, ScopedEntity::User, "u");
        qb.push(" ORDER BY o.period_start DESC, o.id DESC");
        Ok(qb.build_query_as::<SalesObjective>().fetch_all(&self.pool).await?)
    }

    /// Metas por item dos objetivos que cruzam o período.
    pub async fn target_amounts(
        &self,
        scope: &Scope,
        commercial_ids: Option<&[i64]>,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Result<Vec<ItemAmount>, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new(
            r#"
            SELECT oi.stock_item_id, si.name AS stock_item_name,
                   SUM(oi.target_quantity) AS quantity, SUM(oi.target_value) AS value
            FROM sales_objective_items oi
            JOIN sales_objectives o ON o.id = oi.objective_id
            JOIN stock_items si ON si.id = oi.stock_item_id
            JOIN users u ON u.id = o.commercial_id
            WHERE o.period_start <= "#,
        );
        qb.push_bind(date_to).push(" AND o.period_end >= ").push_bind(date_from);
        restrict_commercials(&mut qb, "o.commercial_id", commercial_ids);
        scope.restrict(&mut qb, ScopedEntity::User, "u");
        qb.push(" GROUP BY oi.stock_item_id, si.name");
        Ok(qb.build_query_as::<ItemAmount>().fetch_all(&self.pool).await?)
    }

    /// Vendido por item (vendas confirmadas) no período.
    pub async fn sold_amounts(
        &self,
        scope: &Scope,
        commercial_ids: Option<&[i64]>,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Result<Vec<ItemAmount>, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new(
            r#"
            SELECT i.stock_item_id, si.name AS stock_item_name,
                   SUM(i.quantity) AS quantity, SUM(i.total_price) AS value
            FROM commercial_sale_items i
            JOIN commercial_sales s ON s.id = i.sale_id
            JOIN stock_items si ON si.id = i.stock_item_id
            WHERE s.status = 'confirmed' AND s.sale_date BETWEEN "#,
        );
        qb.push_bind(date_from).push(" AND ").push_bind(date_to);
        restrict_commercials(&mut qb, "s.commercial_id", commercial_ids);
        scope.restrict(&mut qb, ScopedEntity::CommercialSale, "s");
        qb.push(" GROUP BY i.stock_item_id, si.name");
        Ok(qb.build_query_as::<ItemAmount>().fetch_all(&self.pool).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commercial_filter_is_optional() {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1 FROM commercial_sales s WHERE TRUE");
        restrict_commercials(&mut qb, "s.commercial_id", None);
        assert_eq!(qb.sql(), "SELECT 1 FROM commercial_sales s WHERE TRUE");

        restrict_commercials(&mut qb, "s.commercial_id", Some(&[1, 2]));
        assert!(qb.sql().ends_with(" AND s.commercial_id = ANY($1)"));
    }
}
