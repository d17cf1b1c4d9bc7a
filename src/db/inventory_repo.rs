// src/db/inventory_repo.rs

use std::collections::HashMap;

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::{Executor, PgConnection, PgPool, Postgres, QueryBuilder};

use crate::{
    common::error::{map_unique_violation, AppError},
    db::scope::{Scope, ScopedEntity},
    models::inventory::{
        format_reference, BalanceQuery, Container, DocumentPrefix, MovementQuery, NewMovement,
        StockBalance, StockItem, StockMovement,
    },
};

const MOVEMENT_COLUMNS: &str = r#"
    id, reference, document_reference, movement_type, movement_date, stock_item_id, quantity,
    from_depot_id, from_vehicle_id, to_depot_id, to_vehicle_id, supplier_name, reason, user_id, created_at
"#;

#[derive(Clone)]
pub struct InventoryRepository {
    pool: PgPool,
}

impl InventoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ---
    // Catálogo
    // ---

    pub async fn list_items(&self) -> Result<Vec<StockItem>, AppError> {
        let items = sqlx::query_as::<_, StockItem>(
            "SELECT id, name, sku, category, purchase_price, is_active FROM stock_items ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Nomes dos itens ativos entre `ids`. Um id ausente do mapa não existe (ou está inativo).
    pub async fn item_names<'e, E>(&self, executor: E, ids: &[i64]) -> Result<HashMap<i64, String>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let rows: Vec<(i64, String)> =
            sqlx::query_as("SELECT id, name FROM stock_items WHERE is_active AND id = ANY($1)")
                .bind(ids)
                .fetch_all(executor)
                .await?;
        Ok(rows.into_iter().collect())
    }

    // ---
    // Referências
    // ---

    /// Próxima referência `PREFIX-YYYYMMDD-NNNN`. A linha da sequência fica travada até o fim
    /// da transação, então dois escritores do mesmo prefixo/dia se enfileiram.
    pub async fn next_reference<'e, E>(&self, executor: E, prefix: DocumentPrefix) -> Result<String, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let day = Utc::now().date_naive();
        let sequence = sqlx::query_scalar::<_, i32>(
            r#"
            INSERT INTO reference_sequences (prefix, day, last_value)
            VALUES ($1, $2, 1)
            ON CONFLICT (prefix, day) DO UPDATE SET last_value = reference_sequences.last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(prefix.as_str())
        .bind(day)
        .fetch_one(executor)
        .await?;

        Ok(format_reference(prefix, day, sequence))
    }

    // ---
    // Saldos (sempre dentro de uma transação)
    // ---

    /// Trava a linha de saldo e devolve a quantidade; linha inexistente vale zero.
    pub async fn lock_balance<'e, E>(&self, executor: E, container: Container, stock_item_id: i64) -> Result<Decimal, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let sql = match container {
            Container::Depot(_) => {
                "SELECT quantity FROM depot_stocks WHERE depot_id = $1 AND stock_item_id = $2 FOR UPDATE"
            }
            Container::Vehicle(_) => {
                "SELECT quantity FROM vehicle_stocks WHERE vehicle_id = $1 AND stock_item_id = $2 FOR UPDATE"
            }
        };
        let quantity = sqlx::query_scalar::<_, Decimal>(sql)
            .bind(container_id(container))
            .bind(stock_item_id)
            .fetch_optional(executor)
            .await?;
        Ok(quantity.unwrap_or(Decimal::ZERO))
    }

    /// Soma `delta` ao saldo (upsert) e devolve o novo valor.
    pub async fn apply_delta<'e, E>(
        &self,
        executor: E,
        container: Container,
        stock_item_id: i64,
        delta: Decimal,
    ) -> Result<Decimal, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let sql = match container {
            Container::Depot(_) => {
                r#"
                INSERT INTO depot_stocks (depot_id, stock_item_id, quantity)
                VALUES ($1, $2, $3)
                ON CONFLICT (depot_id, stock_item_id)
                DO UPDATE SET quantity = depot_stocks.quantity + EXCLUDED.quantity, updated_at = NOW()
                RETURNING quantity
                "#
            }
            Container::Vehicle(_) => {
                r#"
                INSERT INTO vehicle_stocks (vehicle_id, stock_item_id, quantity)
                VALUES ($1, $2, $3)
                ON CONFLICT (vehicle_id, stock_item_id)
                DO UPDATE SET quantity = vehicle_stocks.quantity + EXCLUDED.quantity, updated_at = NOW()
                RETURNING quantity
                "#
            }
        };
        let quantity = sqlx::query_scalar::<_, Decimal>(sql)
            .bind(container_id(container))
            .bind(stock_item_id)
            .bind(delta)
            .fetch_one(executor)
            .await?;
        Ok(quantity)
    }

    pub async fn insert_movement<'e, E>(
        &self,
        executor: E,
        reference: &str,
        movement: &NewMovement,
    ) -> Result<StockMovement, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let sql = format!(
            r#"
            INSERT INTO stock_movements (
                reference, document_reference, movement_type, stock_item_id, quantity,
                from_depot_id, from_vehicle_id, to_depot_id, to_vehicle_id,
                supplier_name, reason, user_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {MOVEMENT_COLUMNS}
            "#
        );
        let from = movement.from;
        let to = movement.to;
        let row = sqlx::query_as::<_, StockMovement>(&sql)
            .bind(reference)
            .bind(movement.document_reference.as_deref())
            .bind(movement.movement_type)
            .bind(movement.stock_item_id)
            .bind(movement.quantity)
            .bind(from.and_then(|c| c.depot_id()))
            .bind(from.and_then(|c| c.vehicle_id()))
            .bind(to.and_then(|c| c.depot_id()))
            .bind(to.and_then(|c| c.vehicle_id()))
            .bind(movement.supplier_name.as_deref())
            .bind(movement.reason.as_deref())
            .bind(movement.user_id)
            .fetch_one(executor)
            .await
            .map_err(|e| map_unique_violation(e, "duplicate_reference"))?;
        Ok(row)
    }

    /// Estoque disponível por item na região: depósitos ativos da região mais veículos ativos
    /// cujo motorista é da região. As linhas lidas ficam travadas (FOR UPDATE, ordem local/item)
    /// até o fim da transação, então duas confirmações concorrentes não passam no mesmo saldo.
    pub async fn regional_availability(
        &self,
        conn: &mut PgConnection,
        region_id: Option<i64>,
        stock_item_ids: &[i64],
    ) -> Result<HashMap<i64, Decimal>, AppError> {
        let depot_rows: Vec<(i64, Decimal)> = sqlx::query_as(
            r#"
            SELECT ds.stock_item_id, ds.quantity
            FROM depot_stocks ds
            JOIN depots d ON d.id = ds.depot_id
            WHERE d.is_active AND d.region_id = $1 AND ds.stock_item_id = ANY($2)
            ORDER BY ds.depot_id, ds.stock_item_id
            FOR UPDATE OF ds
            "#,
        )
        .bind(region_id)
        .bind(stock_item_ids)
        .fetch_all(&mut *conn)
        .await?;

        let vehicle_rows: Vec<(i64, Decimal)> = sqlx::query_as(
            r#"
            SELECT vs.stock_item_id, vs.quantity
            FROM vehicle_stocks vs
            JOIN vehicles v ON v.id = vs.vehicle_id
            JOIN users u ON u.id = v.current_user_id
            WHERE v.status = 'active' AND u.region_id = $1 AND vs.stock_item_id = ANY($2)
            ORDER BY vs.vehicle_id, vs.stock_item_id
            FOR UPDATE OF vs
            "#,
        )
        .bind(region_id)
        .bind(stock_item_ids)
        .fetch_all(&mut *conn)
        .await?;

        let mut available = HashMap::new();
        for (item_id, quantity) in depot_rows.into_iter().chain(vehicle_rows) {
            *available.entry(item_id).or_insert(Decimal::ZERO) += quantity;
        }
        Ok(available)
    }

    // ---
    // Leitura (escopo regional)
    // ---

    pub async fn list_balances(&self, scope: &Scope, filter: &BalanceQuery) -> Result<Vec<StockBalance>, AppError> {
        let with_depots = filter.vehicle_id.is_none() || filter.depot_id.is_some();
        let with_vehicles = filter.depot_id.is_none() || filter.vehicle_id.is_some();

        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM (");
        if with_depots {
            qb.push(
                r#"
                SELECT 'depot' AS container_type, ds.depot_id AS container_id, d.name AS container_name,
                       ds.stock_item_id, si.name AS stock_item_name, ds.quantity, ds.updated_at
                FROM depot_stocks ds
                JOIN depots d ON d.id = ds.depot_id
                JOIN stock_items si ON si.id = ds.stock_item_id
                WHERE TRUE
                "#,
            );
            if let Some(depot_id) = filter.depot_id {
                qb.push(" AND ds.depot_id = ").push_bind(depot_id);
            }
            if let Some(item_id) = filter.stock_item_id {
                qb.push(" AND ds.stock_item_id = ").push_bind(item_id);
            }
            scope.restrict(&mut qb, ScopedEntity::DepotStock, "ds");
        }
        if with_depots && with_vehicles {
            qb.push(" UNION ALL ");
        }
        if with_vehicles {
            qb.push(
                r#"
                SELECT 'vehicle' AS container_type, vs.vehicle_id AS container_id, v.plate_number AS container_name,
                       vs.stock_item_id, si.name AS stock_item_name, vs.quantity, vs.updated_at
                FROM vehicle_stocks vs
                JOIN vehicles v ON v.id = vs.vehicle_id
                JOIN stock_items si ON si.id = vs.stock_item_id
                WHERE TRUE
                "#,
            );
            if let Some(vehicle_id) = filter.vehicle_id {
                qb.push(" AND vs.vehicle_id = ").push_bind(vehicle_id);
            }
            if let Some(item_id) = filter.stock_item_id {
                qb.push(" AND vs.stock_item_id = ").push_bind(item_id);
            }
            scope.restrict(&mut qb, ScopedEntity::VehicleStock, "vs");
        }
        qb.push(") balances ORDER BY container_type, container_name, stock_item_name");

        Ok(qb.build_query_as::<StockBalance>().fetch_all(&self.pool).await?)
    }

    pub async fn list_movements(&self, scope: &Scope, filter: &MovementQuery) -> Result<Vec<StockMovement>, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {MOVEMENT_COLUMNS} FROM stock_movements m WHERE TRUE"));
        if let Some(kind) = filter.movement_type {
            qb.push(" AND m.movement_type = ").push_bind(kind);
        }
        if let Some(item_id) = filter.stock_item_id {
            qb.push(" AND m.stock_item_id = ").push_bind(item_id);
        }
        if let Some(from) = filter.date_from {
            qb.push(" AND m.movement_date::date >= ").push_bind(from);
        }
        if let Some(to) = filter.date_to {
            qb.push(" AND m.movement_date::date <= ").push_bind(to);
        }
        scope.restrict(&mut qb, ScopedEntity::StockMovement, "m");
        qb.push(" ORDER BY m.movement_date DESC, m.id DESC LIMIT ")
            .push_bind(filter.clamped_limit());

        Ok(qb.build_query_as::<StockMovement>().fetch_all(&self.pool).await?)
    }
}

fn container_id(container: Container) -> i64 {
    match container {
        Container::Depot(id) | Container::Vehicle(id) => id,
    }
}
