// src/handlers/sales.rs

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
        rbac::{PermSalesCancel, PermSalesConfirm, PermSalesObjectives, PermSalesRead, RequirePermission},
    },
    models::sales::{
        CommercialSale, ConfirmSalePayload, CreateObjectivePayload, OrderToConfirm, ProgressQuery, ProgressReport,
        SalesObjective,
    },
};

#[utoipa::path(
    get,
    path = "/api/sales/orders-to-confirm",
    tag = "Vendas",
    responses((status = 200, description = "Pedidos validados ainda sem venda", body = [OrderToConfirm])),
    security(("api_jwt" = []))
)]
pub async fn orders_to_confirm(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    scope: Scope,
    _guard: RequirePermission<PermSalesConfirm>,
) -> Result<impl IntoResponse, ApiError> {
    let orders = app_state
        .sales_service
        .orders_to_confirm(&principal, &scope)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(orders))
}

#[utoipa::path(
    post,
    path = "/api/sales/confirm/{id}",
    tag = "Vendas",
    params(("id" = i64, Path, description = "ID do pedido")),
    request_body = ConfirmSalePayload,
    responses(
        (status = 201, description = "Uma venda por cliente aprovado", body = [CommercialSale]),
        (status = 409, description = "Estoque regional insuficiente")
    ),
    security(("api_jwt" = []))
)]
pub async fn confirm_sale(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    scope: Scope,
    _guard: RequirePermission<PermSalesConfirm>,
    Path(order_id): Path<i64>,
    Json(payload): Json<ConfirmSalePayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale, &app_state.i18n_store))?;

    let sales = app_state
        .sales_service
        .confirm(&principal, &scope, order_id, &payload)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok((StatusCode::CREATED, Json(sales)))
}

#[utoipa::path(
    get,
    path = "/api/sales",
    tag = "Vendas",
    responses((status = 200, description = "Vendas visíveis", body = [CommercialSale])),
    security(("api_jwt" = []))
)]
pub async fn list_sales(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    scope: Scope,
    _guard: RequirePermission<PermSalesRead>,
) -> Result<impl IntoResponse, ApiError> {
    let sales = app_state
        .sales_service
        .list_sales(&principal, &scope)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(sales))
}

#[utoipa::path(
    post,
    path = "/api/sales/{id}/cancel",
    tag = "Vendas",
    params(("id" = i64, Path, description = "ID da venda")),
    responses(
        (status = 200, description = "Venda cancelada", body = CommercialSale),
        (status = 400, description = "Venda não está confirmada")
    ),
    security(("api_jwt" = []))
)]
pub async fn cancel_sale(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    scope: Scope,
    _guard: RequirePermission<PermSalesCancel>,
    Path(sale_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let sale = app_state
        .sales_service
        .cancel(&principal, &scope, sale_id)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(sale))
}

#[utoipa::path(
    get,
    path = "/api/sales/objectives",
    tag = "Vendas",
    responses((status = 200, description = "Objetivos dos comerciais visíveis", body = [SalesObjective])),
    security(("api_jwt" = []))
)]
pub async fn list_objectives(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    scope: Scope,
    _guard: RequirePermission<PermSalesRead>,
) -> Result<impl IntoResponse, ApiError> {
    let objectives = app_state
        .sales_service
        .list_objectives(&principal, &scope)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(objectives))
}

#[utoipa::path(
    post,
    path = "/api/sales/objectives",
    tag = "Vendas",
    request_body = CreateObjectivePayload,
    responses(
        (status = 201, description = "Objetivo criado", body = SalesObjective),
        (status = 400, description = "Período inválido")
    ),
    security(("api_jwt" = []))
)]
pub async fn create_objective(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    scope: Scope,
    _guard: RequirePermission<PermSalesObjectives>,
    Json(payload): Json<CreateObjectivePayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale, &app_state.i18n_store))?;

    let objective = app_state
        .sales_service
        .create_objective(&principal, &scope, &payload)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok((StatusCode::CREATED, Json(objective)))
}

#[utoipa::path(
    get,
    path = "/api/sales/progress",
    tag = "Vendas",
    params(ProgressQuery),
    responses((status = 200, description = "Metas contra vendas confirmadas", body = ProgressReport)),
    security(("api_jwt" = []))
)]
pub async fn sales_progress(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    scope: Scope,
    _guard: RequirePermission<PermSalesRead>,
    Query(query): Query<ProgressQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let report = app_state
        .sales_service
        .progress(&principal, &scope, &query)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(report))
}
