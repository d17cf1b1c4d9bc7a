// src/models/tenancy.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

// Tipo de equipe supervisionada (promotion/lockiste/vendeur) ou visão geral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "team_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TeamType {
    Promotion,
    Lockiste,
    Vendeur,
    General,
}

#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct Region {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct Depot {
    pub id: i64,
    pub name: String,
    pub region_id: i64,
    pub is_active: bool,
}

/// A região de um veículo é a do motorista atual; não existe coluna própria.
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct Vehicle {
    pub id: i64,
    pub plate_number: String,
    pub status: String,
    pub current_user_id: Option<i64>,
    pub driver_name: Option<String>,
    pub region_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
    pub full_name: Option<String>,
    pub role_code: String,
    pub region_id: Option<i64>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct CommercialTeam {
    pub id: i64,
    pub name: String,
    pub team_type: TeamType,
    pub team_leader_id: i64,
    pub team_leader_name: String,
    pub supervisor_id: Option<i64>,
    pub region_id: Option<i64>,
    pub member_count: i64,
}
