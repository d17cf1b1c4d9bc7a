// src/middleware/scope.rs

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::{common::error::AppError, db::Scope, models::auth::Principal};

// O Scope é derivado do Principal que o auth_guard já colocou na requisição
impl<S> FromRequestParts<S> for Scope
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .map(Scope::from_principal)
            .ok_or(AppError::InvalidToken)
    }
}
