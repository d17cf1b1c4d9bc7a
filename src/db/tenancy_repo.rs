// src/db/tenancy_repo.rs

use sqlx::{Executor, PgPool, Postgres, QueryBuilder};

use crate::{
    common::error::AppError,
    db::scope::{Scope, ScopedEntity},
    models::{
        inventory::Container,
        tenancy::{CommercialTeam, Depot, Region, Vehicle},
    },
};

const VEHICLE_COLUMNS: &str = r#"
    SELECT v.id, v.plate_number, v.status, v.current_user_id,
           u.username AS driver_name, u.region_id
    FROM vehicles v
    LEFT JOIN users u ON u.id = v.current_user_id
"#;

// Regiões e locais físicos (depósitos e veículos) usados como âncora de visibilidade
#[derive(Clone)]
pub struct TenancyRepository {
    pool: PgPool,
}

impl TenancyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list_regions(&self, scope: &Scope) -> Result<Vec<Region>, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT id, name, created_at FROM regions r WHERE TRUE");
        if !scope.admin {
            match scope.region_id {
                Some(region_id) => {
                    qb.push(" AND r.id = ").push_bind(region_id);
                }
                None => {
                    qb.push(" AND FALSE");
                }
            }
        }
        qb.push(" ORDER BY name");
        Ok(qb.build_query_as::<Region>().fetch_all(&self.pool).await?)
    }

    pub async fn list_depots(&self, scope: &Scope) -> Result<Vec<Depot>, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT d.id, d.name, d.region_id, d.is_active FROM depots d WHERE TRUE",
        );
        scope.restrict(&mut qb, ScopedEntity::Depot, "d");
        qb.push(" ORDER BY d.name");
        Ok(qb.build_query_as::<Depot>().fetch_all(&self.pool).await?)
    }

    pub async fn list_vehicles(&self, scope: &Scope) -> Result<Vec<Vehicle>, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new(VEHICLE_COLUMNS);
        qb.push(" WHERE TRUE");
        scope.restrict(&mut qb, ScopedEntity::Vehicle, "v");
        qb.push(" ORDER BY v.plate_number");
        Ok(qb.build_query_as::<Vehicle>().fetch_all(&self.pool).await?)
    }

    pub async fn list_teams(&self, scope: &Scope) -> Result<Vec<CommercialTeam>, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new(
            r#"
            SELECT t.id, t.name, t.team_type, t.team_leader_id, l.username AS team_leader_name,
                   t.supervisor_id, l.region_id,
                   (SELECT COUNT(*) FROM commercial_team_members m
                    WHERE m.team_id = t.id AND m.is_active) AS member_count
            FROM commercial_teams t
            JOIN users l ON l.id = t.team_leader_id
            WHERE t.is_active
            "#,
        );
        scope.restrict(&mut qb, ScopedEntity::Team, "t");
        qb.push(" ORDER BY t.name");
        Ok(qb.build_query_as::<CommercialTeam>().fetch_all(&self.pool).await?)
    }

    /// `true` quando o local existe, está ativo e é visível para o escopo.
    pub async fn container_visible<'e, E>(
        &self,
        executor: E,
        scope: &Scope,
        container: Container,
    ) -> Result<bool, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let mut qb = match container {
            Container::Depot(id) => {
                let mut qb = QueryBuilder::<Postgres>::new("SELECT d.id FROM depots d WHERE d.is_active AND d.id = ");
                qb.push_bind(id);
                scope.restrict(&mut qb, ScopedEntity::Depot, "d");
                qb
            }
            Container::Vehicle(id) => {
                let mut qb = QueryBuilder::<Postgres>::new("SELECT v.id FROM vehicles v WHERE v.status = 'active' AND v.id = ");
                qb.push_bind(id);
                scope.restrict(&mut qb, ScopedEntity::Vehicle, "v");
                qb
            }
        };
        let found = qb.build_query_scalar::<i64>().fetch_optional(executor).await?;
        Ok(found.is_some())
    }

    /// Primeiro depósito ativo da região (por nome); senão qualquer depósito ativo.
    /// O booleano indica se o depósito é da própria região.
    pub async fn pick_source_depot<'e, E>(
        &self,
        executor: E,
        region_id: Option<i64>,
    ) -> Result<Option<(Depot, bool)>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let depot = sqlx::query_as::<_, Depot>(
            r#"
            SELECT id, name, region_id, is_active
            FROM depots
            WHERE is_active
            ORDER BY (region_id IS NOT DISTINCT FROM $1) DESC, name ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(region_id)
        .fetch_optional(executor)
        .await?;

        Ok(depot.map(|d| {
            let in_region = region_id == Some(d.region_id);
            (d, in_region)
        }))
    }
}
