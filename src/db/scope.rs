// src/db/scope.rs

use sqlx::{Postgres, QueryBuilder};

use crate::models::auth::Principal;

/// Visibilidade regional derivada do `Principal`. Toda consulta de listagem recebe um `Scope`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scope {
    pub admin: bool,
    pub region_id: Option<i64>,
}

/// Entidades filtráveis e a coluna que carrega a região (direta ou derivada).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopedEntity {
    Depot,
    Vehicle,
    User,
    DepotStock,
    VehicleStock,
    StockMovement,
    CommercialOrder,
    CommercialSale,
    Team,
    TeamMember,
    /// Documentos presos a um depósito (`depot_id`), ex.: recepções.
    DepotDocument,
    /// Documentos com `depot_id` xor `vehicle_id`, ex.: saídas e devoluções.
    ContainerDocument,
}

const DEPOTS_OF_REGION: &str = "(SELECT sd.id FROM depots sd WHERE sd.region_id = ";
const VEHICLES_OF_REGION: &str =
    "(SELECT sv.id FROM vehicles sv JOIN users su ON su.id = sv.current_user_id WHERE su.region_id = ";
const USERS_OF_REGION: &str = "(SELECT su.id FROM users su WHERE su.region_id = ";
const TEAMS_OF_REGION: &str =
    "(SELECT st.id FROM commercial_teams st JOIN users su ON su.id = st.team_leader_id WHERE su.region_id = ";

impl Scope {
    pub fn from_principal(principal: &Principal) -> Self {
        Self {
            admin: principal.is_admin(),
            region_id: principal.region_id,
        }
    }

    pub fn unrestricted() -> Self {
        Self { admin: true, region_id: None }
    }

    /// Checagem em memória para linhas já carregadas.
    pub fn allows_region(&self, region_id: Option<i64>) -> bool {
        match (self.admin, self.region_id) {
            (true, _) => true,
            (false, Some(mine)) => region_id == Some(mine),
            (false, None) => false,
        }
    }

    /// Acrescenta ` AND <predicado>` ao final da consulta. Deve ser chamado depois dos filtros
    /// próprios do repositório e antes de ORDER BY / LIMIT.
    pub fn restrict(&self, qb: &mut QueryBuilder<'_, Postgres>, entity: ScopedEntity, alias: &str) {
        if self.admin {
            return;
        }
        let Some(region_id) = self.region_id else {
            // Não-admin sem região não enxerga nada.
            qb.push(" AND FALSE");
            return;
        };

        qb.push(" AND ");
        match entity {
            ScopedEntity::Depot | ScopedEntity::User | ScopedEntity::CommercialOrder | ScopedEntity::CommercialSale => {
                qb.push(format!("{alias}.region_id = ")).push_bind(region_id);
            }
            ScopedEntity::Vehicle => {
                qb.push(format!("{alias}.current_user_id IN "));
                push_subquery(qb, USERS_OF_REGION, region_id);
            }
            ScopedEntity::DepotStock | ScopedEntity::DepotDocument => {
                qb.push(format!("{alias}.depot_id IN "));
                push_subquery(qb, DEPOTS_OF_REGION, region_id);
            }
            ScopedEntity::VehicleStock => {
                qb.push(format!("{alias}.vehicle_id IN "));
                push_subquery(qb, VEHICLES_OF_REGION, region_id);
            }
            ScopedEntity::ContainerDocument => {
                qb.push(format!("({alias}.depot_id IN "));
                push_subquery(qb, DEPOTS_OF_REGION, region_id);
                qb.push(format!(" OR {alias}.vehicle_id IN "));
                push_subquery(qb, VEHICLES_OF_REGION, region_id);
                qb.push(")");
            }
            ScopedEntity::StockMovement => {
                qb.push(format!("({alias}.from_depot_id IN "));
                push_subquery(qb, DEPOTS_OF_REGION, region_id);
                qb.push(format!(" OR {alias}.to_depot_id IN "));
                push_subquery(qb, DEPOTS_OF_REGION, region_id);
                qb.push(format!(" OR {alias}.from_vehicle_id IN "));
                push_subquery(qb, VEHICLES_OF_REGION, region_id);
                qb.push(format!(" OR {alias}.to_vehicle_id IN "));
                push_subquery(qb, VEHICLES_OF_REGION, region_id);
                qb.push(")");
            }
            ScopedEntity::Team => {
                qb.push(format!("{alias}.team_leader_id IN "));
                push_subquery(qb, USERS_OF_REGION, region_id);
            }
            ScopedEntity::TeamMember => {
                qb.push(format!("{alias}.team_id IN "));
                push_subquery(qb, TEAMS_OF_REGION, region_id);
            }
        }
    }
}

fn push_subquery(qb: &mut QueryBuilder<'_, Postgres>, head: &'static str, region_id: i64) {
    qb.push(head).push_bind(region_id).push(")");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sql_for(scope: Scope, entity: ScopedEntity, alias: &str) -> String {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1 FROM t WHERE status = 'x'");
        scope.restrict(&mut qb, entity, alias);
        qb.sql().to_string()
    }

    #[test]
    fn admin_query_is_left_untouched() {
        let sql = sql_for(Scope::unrestricted(), ScopedEntity::CommercialOrder, "o");
        assert_eq!(sql, "SELECT 1 FROM t WHERE status = 'x'");
    }

    #[test]
    fn region_predicate_is_appended_after_existing_filters() {
        let scope = Scope { admin: false, region_id: Some(2) };
        let sql = sql_for(scope, ScopedEntity::CommercialOrder, "o");
        assert_eq!(sql, "SELECT 1 FROM t WHERE status = 'x' AND o.region_id = $1");
    }

    #[test]
    fn vehicle_region_goes_through_driver() {
        let scope = Scope { admin: false, region_id: Some(2) };
        let sql = sql_for(scope, ScopedEntity::VehicleStock, "vs");
        assert!(sql.contains("vs.vehicle_id IN (SELECT sv.id FROM vehicles sv JOIN users su"));
        assert!(sql.ends_with("su.region_id = $1)"));
    }

    #[test]
    fn movement_filter_covers_both_sides() {
        let scope = Scope { admin: false, region_id: Some(2) };
        let sql = sql_for(scope, ScopedEntity::StockMovement, "m");
        for col in ["m.from_depot_id", "m.to_depot_id", "m.from_vehicle_id", "m.to_vehicle_id"] {
            assert!(sql.contains(col), "{col} missing in {sql}");
        }
        assert!(sql.contains("$4"));
    }

    #[test]
    fn non_admin_without_region_sees_nothing() {
        let scope = Scope { admin: false, region_id: None };
        let sql = sql_for(scope, ScopedEntity::Depot, "d");
        assert!(sql.ends_with(" AND FALSE"));
        assert!(!scope.allows_region(Some(1)));
    }

    #[test]
    fn in_memory_region_check() {
        let scope = Scope { admin: false, region_id: Some(1) };
        assert!(scope.allows_region(Some(1)));
        assert!(!scope.allows_region(Some(2)));
        assert!(!scope.allows_region(None));
        assert!(Scope::unrestricted().allows_region(None));
    }
}
