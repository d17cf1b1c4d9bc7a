// src/handlers/logistics.rs

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use validator::Validate;

use crate::{
    common::error::{ApiError, AppError},
    config::AppState,
    db::Scope,
    middleware::{
        auth::AuthenticatedUser,
        i18n::Locale,
        rbac::{PermOutgoingsCreate, PermReceptionsCreate, PermReturnsCreate, PermStocksRead, RequirePermission},
    },
    models::logistics::{
        CreateOutgoingPayload, CreateReceptionPayload, CreateReturnPayload, OutgoingDetail, Reception,
        ReceptionDetail, ReturnDetail, ReturnListQuery, StockOutgoing, StockReturn,
    },
};

// ---
// RECEPÇÕES
// ---

#[utoipa::path(
    get,
    path = "/api/receptions",
    tag = "Logística",
    responses((status = 200, description = "Recepções dos depósitos visíveis", body = [Reception])),
    security(("api_jwt" = []))
)]
pub async fn list_receptions(
    State(app_state): State<AppState>,
    locale: Locale,
    scope: Scope,
    _guard: RequirePermission<PermStocksRead>,
) -> Result<impl IntoResponse, ApiError> {
    let receptions = app_state
        .logistics_service
        .list_receptions(&scope)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(receptions))
}

#[utoipa::path(
    get,
    path = "/api/receptions/{id}",
    tag = "Logística",
    params(("id" = i64, Path, description = "ID da recepção")),
    responses(
        (status = 200, description = "Recepção com linhas", body = ReceptionDetail),
        (status = 404, description = "Fora do escopo ou inexistente")
    ),
    security(("api_jwt" = []))
)]
pub async fn get_reception(
    State(app_state): State<AppState>,
    locale: Locale,
    scope: Scope,
    _guard: RequirePermission<PermStocksRead>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = app_state
        .logistics_service
        .get_reception(&scope, id)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(detail))
}

#[utoipa::path(
    post,
    path = "/api/receptions",
    tag = "Logística",
    request_body = CreateReceptionPayload,
    responses((status = 201, description = "Recepção criada em rascunho", body = ReceptionDetail)),
    security(("api_jwt" = []))
)]
pub async fn create_reception(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    scope: Scope,
    _guard: RequirePermission<PermReceptionsCreate>,
    Json(payload): Json<CreateReceptionPayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale, &app_state.i18n_store))?;

    let detail = app_state
        .logistics_service
        .create_reception(&principal, &scope, &payload)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok((StatusCode::CREATED, Json(detail)))
}

#[utoipa::path(
    post,
    path = "/api/receptions/{id}/post",
    tag = "Logística",
    params(("id" = i64, Path, description = "ID da recepção")),
    responses((status = 200, description = "Recepção lançada no razão", body = ReceptionDetail)),
    security(("api_jwt" = []))
)]
pub async fn post_reception(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    scope: Scope,
    _guard: RequirePermission<PermReceptionsCreate>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = app_state
        .logistics_service
        .post_reception(&principal, &scope, id)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(detail))
}

#[utoipa::path(
    post,
    path = "/api/receptions/{id}/cancel",
    tag = "Logística",
    params(("id" = i64, Path, description = "ID da recepção")),
    responses(
        (status = 200, description = "Rascunho cancelado", body = ReceptionDetail),
        (status = 400, description = "Recepção já lançada")
    ),
    security(("api_jwt" = []))
)]
pub async fn cancel_reception(
    State(app_state): State<AppState>,
    locale: Locale,
    scope: Scope,
    _guard: RequirePermission<PermReceptionsCreate>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = app_state
        .logistics_service
        .cancel_reception(&scope, id)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(detail))
}

// ---
// SAÍDAS
// ---

#[utoipa::path(
    get,
    path = "/api/outgoings",
    tag = "Logística",
    responses((status = 200, description = "Saídas dos contêineres visíveis", body = [StockOutgoing])),
    security(("api_jwt" = []))
)]
pub async fn list_outgoings(
    State(app_state): State<AppState>,
    locale: Locale,
    scope: Scope,
    _guard: RequirePermission<PermStocksRead>,
) -> Result<impl IntoResponse, ApiError> {
    let outgoings = app_state
        .logistics_service
        .list_outgoings(&scope)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(outgoings))
}

#[utoipa::path(
    get,
    path = "/api/outgoings/{id}",
    tag = "Logística",
    params(("id" = i64, Path, description = "ID da saída")),
    responses((status = 200, description = "Saída com linhas", body = OutgoingDetail)),
    security(("api_jwt" = []))
)]
pub async fn get_outgoing(
    State(app_state): State<AppState>,
    locale: Locale,
    scope: Scope,
    _guard: RequirePermission<PermStocksRead>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = app_state
        .logistics_service
        .get_outgoing(&scope, id)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(detail))
}

#[utoipa::path(
    post,
    path = "/api/outgoings",
    tag = "Logística",
    request_body = CreateOutgoingPayload,
    responses((status = 201, description = "Saída criada em rascunho", body = OutgoingDetail)),
    security(("api_jwt" = []))
)]
pub async fn create_outgoing(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    scope: Scope,
    _guard: RequirePermission<PermOutgoingsCreate>,
    Json(payload): Json<CreateOutgoingPayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale, &app_state.i18n_store))?;

    let detail = app_state
        .logistics_service
        .create_outgoing(&principal, &scope, &payload)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok((StatusCode::CREATED, Json(detail)))
}

#[utoipa::path(
    post,
    path = "/api/outgoings/{id}/post",
    tag = "Logística",
    params(("id" = i64, Path, description = "ID da saída")),
    responses(
        (status = 200, description = "Saída lançada no razão", body = OutgoingDetail),
        (status = 409, description = "Estoque insuficiente")
    ),
    security(("api_jwt" = []))
)]
pub async fn post_outgoing(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    scope: Scope,
    _guard: RequirePermission<PermOutgoingsCreate>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = app_state
        .logistics_service
        .post_outgoing(&principal, &scope, id)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(detail))
}

// ---
// DEVOLUÇÕES
// ---

#[utoipa::path(
    get,
    path = "/api/returns",
    tag = "Logística",
    params(ReturnListQuery),
    responses((status = 200, description = "Devoluções visíveis", body = [StockReturn])),
    security(("api_jwt" = []))
)]
pub async fn list_returns(
    State(app_state): State<AppState>,
    locale: Locale,
    scope: Scope,
    _guard: RequirePermission<PermStocksRead>,
    Query(query): Query<ReturnListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let returns = app_state
        .logistics_service
        .list_returns(&scope, &query)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(returns))
}

#[utoipa::path(
    get,
    path = "/api/returns/{id}",
    tag = "Logística",
    params(("id" = i64, Path, description = "ID da devolução")),
    responses((status = 200, description = "Devolução com linhas", body = ReturnDetail)),
    security(("api_jwt" = []))
)]
pub async fn get_return(
    State(app_state): State<AppState>,
    locale: Locale,
    scope: Scope,
    _guard: RequirePermission<PermStocksRead>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = app_state
        .logistics_service
        .get_return(&scope, id)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(detail))
}

/// A devolução é criada e lançada na mesma transação.
#[utoipa::path(
    post,
    path = "/api/returns",
    tag = "Logística",
    request_body = CreateReturnPayload,
    responses(
        (status = 201, description = "Devolução registrada", body = ReturnDetail),
        (status = 409, description = "Estoque insuficiente para devolver ao fornecedor")
    ),
    security(("api_jwt" = []))
)]
pub async fn create_return(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    scope: Scope,
    _guard: RequirePermission<PermReturnsCreate>,
    Json(payload): Json<CreateReturnPayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale, &app_state.i18n_store))?;

    let detail = app_state
        .logistics_service
        .create_return(&principal, &scope, &payload)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok((StatusCode::CREATED, Json(detail)))
}
