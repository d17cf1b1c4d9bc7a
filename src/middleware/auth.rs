// src/middleware/auth.rs

use axum::{
    extract::{FromRequestParts, Query, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use serde::Deserialize;

use crate::{
    common::error::{ApiError, AppError},
    config::AppState,
    middleware::i18n::Locale,
    models::auth::Principal,
};

// EventSource do navegador não envia cabeçalhos: o token pode vir na query string
#[derive(Debug, Deserialize)]
struct TokenQuery {
    access_token: Option<String>,
}

fn request_token(request: &Request) -> Option<String> {
    if let Some(Authorization(bearer)) = request.headers().typed_get::<Authorization<Bearer>>() {
        return Some(bearer.token().to_string());
    }
    Query::<TokenQuery>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(q)| q.access_token)
        .filter(|t| !t.is_empty())
}

// O middleware em si
pub async fn auth_guard(
    State(app_state): State<AppState>,
    locale: Locale,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request_token(&request)
        .ok_or_else(|| AppError::InvalidToken.to_api_error(&locale, &app_state.i18n_store))?;

    let principal = app_state
        .auth_service
        .principal_from_token(&token)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    // Insere o Principal nos "extensions" da requisição
    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

// Extrator para obter o usuário autenticado diretamente nos handlers
pub struct AuthenticatedUser(pub Principal);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .map(AuthenticatedUser)
            .ok_or(AppError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn bearer_header_wins_over_query() {
        let request = Request::builder()
            .uri("/api/chat/api/stream/rooms?access_token=from-query")
            .header("Authorization", "Bearer from-header")
            .body(Body::empty())
            .expect("request");
        assert_eq!(request_token(&request).as_deref(), Some("from-header"));
    }

    #[test]
    fn query_token_is_accepted_for_streams() {
        let request = Request::builder()
            .uri("/api/chat/api/stream/7?access_token=abc")
            .body(Body::empty())
            .expect("request");
        assert_eq!(request_token(&request).as_deref(), Some("abc"));
    }

    #[test]
    fn missing_token_is_none() {
        let request = Request::builder().uri("/api/orders").body(Body::empty()).expect("request");
        assert!(request_token(&request).is_none());
    }
}
