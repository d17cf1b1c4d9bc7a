// src/db/user_repo.rs

use sqlx::{Executor, PgPool, Postgres, QueryBuilder};

use crate::{
    common::error::AppError,
    db::scope::{Scope, ScopedEntity},
    models::{
        auth::User,
        tenancy::{TeamType, UserSummary},
    },
};

const USER_COLUMNS: &str = r#"
    SELECT u.id, u.username, u.email, u.full_name, u.password_hash,
           r.code AS role_code, r.permissions,
           u.region_id, u.is_active, u.last_login, u.supervised_team_type, u.created_at
    FROM users u
    JOIN roles r ON r.id = u.role_id
"#;

// O repositório de usuários, responsável pelas tabelas 'users' e 'user_activity_logs'
#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(&format!("{USER_COLUMNS} WHERE u.username = $1"))
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(&format!("{USER_COLUMNS} WHERE u.id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    /// Região do usuário lida dentro da transação de quem chama.
    pub async fn region_of<'e, E>(&self, executor: E, user_id: i64) -> Result<Option<i64>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let region = sqlx::query_scalar::<_, Option<i64>>("SELECT region_id FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(executor)
            .await?;
        Ok(region.flatten())
    }

    pub async fn touch_last_login<'e, E>(&self, executor: E, user_id: i64) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query("UPDATE users SET last_login = NOW() WHERE id = $1")
            .bind(user_id)
            .execute(executor)
            .await?;
        Ok(())
    }

    pub async fn log_activity<'e, E>(
        &self,
        executor: E,
        user_id: i64,
        action: &str,
        ip_address: Option<&str>,
    ) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query("INSERT INTO user_activity_logs (user_id, action, ip_address) VALUES ($1, $2, $3)")
            .bind(user_id)
            .bind(action)
            .bind(ip_address)
            .execute(executor)
            .await?;
        Ok(())
    }

    pub async fn list_users(&self, scope: &Scope) -> Result<Vec<UserSummary>, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new(
            r#"
            SELECT u.id, u.username, u.full_name, r.code AS role_code, u.region_id, u.is_active
            FROM users u
            JOIN roles r ON r.id = u.role_id
            WHERE TRUE
            "#,
        );
        scope.restrict(&mut qb, ScopedEntity::User, "u");
        qb.push(" ORDER BY u.username ASC");

        let users = qb.build_query_as::<UserSummary>().fetch_all(&self.pool).await?;
        Ok(users)
    }

    /// Comerciais que um supervisor acompanha: membros e líderes das equipes do tipo dele.
    pub async fn team_commercial_ids(
        &self,
        supervisor_id: i64,
        team_type: TeamType,
    ) -> Result<Vec<i64>, AppError> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT m.user_id
            FROM commercial_team_members m
            JOIN commercial_teams t ON t.id = m.team_id
            WHERE t.supervisor_id = $1 AND t.team_type = $2 AND t.is_active AND m.is_active
            UNION
            SELECT t.team_leader_id
            FROM commercial_teams t
            WHERE t.supervisor_id = $1 AND t.team_type = $2 AND t.is_active
            "#,
        )
        .bind(supervisor_id)
        .bind(team_type)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}
