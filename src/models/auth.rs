// src/models/auth.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    common::error::AppError,
    models::{
        rbac::{RolePermissions, ROLE_ADMIN},
        tenancy::TeamType,
    },
};

// Usuário com o papel já resolvido (JOIN roles)
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,

    #[serde(skip_serializing)]
    pub password_hash: String,

    pub role_code: String,
    #[schema(value_type = Object)]
    pub permissions: sqlx::types::Json<RolePermissions>,
    pub region_id: Option<i64>,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub supervised_team_type: Option<TeamType>,
    pub created_at: DateTime<Utc>,
}

/// Quem está fazendo a requisição. Construído pelo `auth_guard` e passado explicitamente
/// a toda regra de negócio.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: i64,
    pub username: String,
    pub role_code: String,
    pub region_id: Option<i64>,
    pub supervised_team_type: Option<TeamType>,
    pub permissions: RolePermissions,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role_code == ROLE_ADMIN
    }

    pub fn has_role(&self, code: &str) -> bool {
        self.role_code == code
    }

    pub fn has_permission(&self, slug: &str) -> bool {
        self.is_admin() || self.permissions.allows(slug)
    }

    pub fn require(&self, slug: &str) -> Result<(), AppError> {
        if self.has_permission(slug) {
            Ok(())
        } else {
            Err(AppError::PermissionDenied(slug.to_string()))
        }
    }
}

impl From<User> for Principal {
    fn from(user: User) -> Self {
        Self {
            user_id: user.id,
            username: user.username,
            role_code: user.role_code,
            region_id: user.region_id,
            supervised_team_type: user.supervised_team_type,
            permissions: user.permissions.0,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginUserPayload {
    #[validate(length(min = 1, code = "required"))]
    pub username: String,
    #[validate(length(min = 1, code = "required"))]
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    pub role_code: String,
    pub region_id: Option<i64>,
    pub supervised_team_type: Option<TeamType>,
    pub permissions: Vec<String>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            role_code: user.role_code.clone(),
            region_id: user.region_id,
            supervised_team_type: user.supervised_team_type,
            permissions: user.permissions.0.slugs(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserProfile,
}

// Estrutura de dados ("claims") dentro do JWT
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,   // Subject (ID do usuário)
    pub exp: usize, // Expiration time
    pub iat: usize, // Issued At
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::collections::HashMap;

    use super::*;

    pub fn principal(role: &str, region: Option<i64>, grants: &[(&str, &[&str])]) -> Principal {
        let modules: HashMap<String, Vec<String>> = grants
            .iter()
            .map(|(m, actions)| (m.to_string(), actions.iter().map(|a| a.to_string()).collect()))
            .collect();
        Principal {
            user_id: 10,
            username: format!("{role}1"),
            role_code: role.to_string(),
            region_id: region,
            supervised_team_type: None,
            permissions: RolePermissions::Modules(modules),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::principal;
    use crate::models::rbac::{ROLE_ADMIN, ROLE_SUPERVISOR};

    #[test]
    fn admin_bypasses_permission_table() {
        let admin = principal(ROLE_ADMIN, None, &[]);
        assert!(admin.has_permission("orders.validate"));
        assert!(admin.require("sales.confirm").is_ok());
    }

    #[test]
    fn supervisor_needs_explicit_grant() {
        let sup = principal(ROLE_SUPERVISOR, Some(1), &[("orders", &["validate"])]);
        assert!(sup.has_permission("orders.validate"));
        assert!(sup.require("outgoings.create").is_err());
    }
}
