// src/handlers/inventory.rs

use axum::{
    extract::{Query, State},
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
        rbac::{PermStocksAdjust, PermStocksInventory, PermStocksRead, PermStocksTransfer, RequirePermission},
    },
    models::inventory::{
        AdjustmentPayload, BalanceQuery, InventoryCountPayload, MovementQuery, StockBalance, StockMovement,
        TransferPayload,
    },
};

#[utoipa::path(
    get,
    path = "/api/stocks/summary",
    tag = "Estoque",
    params(BalanceQuery),
    responses((status = 200, description = "Saldos por depósito e veículo", body = [StockBalance])),
    security(("api_jwt" = []))
)]
pub async fn stock_summary(
    State(app_state): State<AppState>,
    locale: Locale,
    scope: Scope,
    _guard: RequirePermission<PermStocksRead>,
    Query(filter): Query<BalanceQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let balances = app_state
        .inventory_service
        .balances(&scope, &filter)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(balances))
}

#[utoipa::path(
    get,
    path = "/api/stocks/movements",
    tag = "Estoque",
    params(MovementQuery),
    responses((status = 200, description = "Movimentos, mais recentes primeiro", body = [StockMovement])),
    security(("api_jwt" = []))
)]
pub async fn stock_movements(
    State(app_state): State<AppState>,
    locale: Locale,
    scope: Scope,
    _guard: RequirePermission<PermStocksRead>,
    Query(filter): Query<MovementQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let movements = app_state
        .inventory_service
        .movements(&scope, &filter)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(movements))
}

#[utoipa::path(
    post,
    path = "/api/stocks/transfers",
    tag = "Estoque",
    request_body = TransferPayload,
    responses(
        (status = 201, description = "Par de movimentos TRANS", body = [StockMovement]),
        (status = 409, description = "Estoque insuficiente na origem")
    ),
    security(("api_jwt" = []))
)]
pub async fn create_transfer(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    scope: Scope,
    _guard: RequirePermission<PermStocksTransfer>,
    Json(payload): Json<TransferPayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale, &app_state.i18n_store))?;

    let movements = app_state
        .logistics_service
        .transfer(&principal, &scope, &payload)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok((StatusCode::CREATED, Json(movements)))
}

#[utoipa::path(
    post,
    path = "/api/stocks/adjustments",
    tag = "Estoque",
    request_body = AdjustmentPayload,
    responses(
        (status = 201, description = "Movimento de ajuste", body = StockMovement),
        (status = 409, description = "Ajuste negativo maior que o saldo")
    ),
    security(("api_jwt" = []))
)]
pub async fn create_adjustment(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    scope: Scope,
    _guard: RequirePermission<PermStocksAdjust>,
    Json(payload): Json<AdjustmentPayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale, &app_state.i18n_store))?;

    let movement = app_state
        .logistics_service
        .adjust(&principal, &scope, &payload)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok((StatusCode::CREATED, Json(movement)))
}

/// Contagem igual ao saldo não gera movimento: responde 200 com `null`.
#[utoipa::path(
    post,
    path = "/api/stocks/inventory-counts",
    tag = "Estoque",
    request_body = InventoryCountPayload,
    responses(
        (status = 201, description = "Movimento de inventário", body = StockMovement),
        (status = 200, description = "Contagem confere com o saldo")
    ),
    security(("api_jwt" = []))
)]
pub async fn create_inventory_count(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    scope: Scope,
    _guard: RequirePermission<PermStocksInventory>,
    Json(payload): Json<InventoryCountPayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale, &app_state.i18n_store))?;

    let movement = app_state
        .logistics_service
        .count_inventory(&principal, &scope, &payload)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    let status = if movement.is_some() { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(movement)))
}
