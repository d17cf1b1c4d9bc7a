// src/services/auth.rs

use bcrypt::verify;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use sqlx::PgPool;

use crate::{
    common::error::AppError,
    db::UserRepository,
    models::auth::{AuthResponse, Claims, Principal, UserProfile},
};

const ACTION_LOGIN: &str = "login";
const ACTION_LOGIN_FAILED: &str = "login_failed";

#[derive(Clone)]
pub struct AuthService {
    user_repo: UserRepository,
    jwt_secret: String,
    session_lifetime_secs: i64,
    pool: PgPool,
}

impl AuthService {
    pub fn new(user_repo: UserRepository, jwt_secret: String, session_lifetime_secs: i64, pool: PgPool) -> Self {
        Self { user_repo, jwt_secret, session_lifetime_secs, pool }
    }

    pub async fn login(&self, username: &str, password: &str, ip: Option<&str>) -> Result<AuthResponse, AppError> {
        let user = self
            .user_repo
            .find_by_username(username)
            .await?
            .ok_or(AppError::InvalidCredentials)?;

        let password_clone = password.to_owned();
        let password_hash_clone = user.password_hash.clone();

        // Executa a verificação em um thread separado
        let is_password_valid = tokio::task::spawn_blocking(move || verify(&password_clone, &password_hash_clone))
            .await
            .map_err(|e| anyhow::anyhow!("Falha na task de verificação de senha: {}", e))??;

        if !is_password_valid || !user.is_active {
            self.user_repo
                .log_activity(&self.pool, user.id, ACTION_LOGIN_FAILED, ip)
                .await?;
            tracing::info!(user_id = user.id, active = user.is_active, "Tentativa de login recusada");
            return Err(AppError::InvalidCredentials);
        }

        let mut tx = self.pool.begin().await?;
        self.user_repo.touch_last_login(&mut *tx, user.id).await?;
        self.user_repo.log_activity(&mut *tx, user.id, ACTION_LOGIN, ip).await?;
        tx.commit().await?;

        let (token, expires_at) = issue_token(&self.jwt_secret, user.id, self.session_lifetime_secs)?;
        tracing::info!(user_id = user.id, role = %user.role_code, "🔑 Login efetuado");

        Ok(AuthResponse {
            token,
            expires_at,
            user: UserProfile::from(&user),
        })
    }

    /// Valida o JWT e recarrega usuário, papel e permissões do banco.
    pub async fn principal_from_token(&self, token: &str) -> Result<Principal, AppError> {
        let claims = decode_token(&self.jwt_secret, token)?;

        let user = self
            .user_repo
            .find_by_id(claims.sub)
            .await?
            .filter(|u| u.is_active)
            .ok_or(AppError::InvalidToken)?;

        Ok(Principal::from(user))
    }

    pub async fn profile(&self, principal: &Principal) -> Result<UserProfile, AppError> {
        let user = self
            .user_repo
            .find_by_id(principal.user_id)
            .await?
            .ok_or(AppError::ResourceNotFound("user"))?;
        Ok(UserProfile::from(&user))
    }
}

fn issue_token(secret: &str, user_id: i64, lifetime_secs: i64) -> Result<(String, DateTime<Utc>), AppError> {
    let now = Utc::now();
    let expires_at = now + Duration::seconds(lifetime_secs);

    let claims = Claims {
        sub: user_id,
        exp: expires_at.timestamp() as usize,
        iat: now.timestamp() as usize,
    };

    let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_ref()))?;
    Ok((token, expires_at))
}

fn decode_token(secret: &str, token: &str) -> Result<Claims, AppError> {
    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_ref()), &Validation::default())
        .map(|data| data.claims)
        .map_err(|_| AppError::InvalidToken)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_carries_user_id() {
        let (token, expires_at) = issue_token("segredo", 42, 3600).expect("token");
        let claims = decode_token("segredo", &token).expect("claims");
        assert_eq!(claims.sub, 42);
        assert_eq!(claims.exp, expires_at.timestamp() as usize);
    }

    #[test]
    fn token_signed_with_other_secret_is_refused() {
        let (token, _) = issue_token("segredo", 42, 3600).expect("token");
        assert!(matches!(decode_token("outro", &token), Err(AppError::InvalidToken)));
    }

    #[test]
    fn expired_token_is_refused() {
        let (token, _) = issue_token("segredo", 42, -3600).expect("token");
        assert!(matches!(decode_token("segredo", &token), Err(AppError::InvalidToken)));
    }
}
