// src/handlers/orders.rs

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    common::error::{ApiError, AppError},
    config::AppState,
    middleware::{
        auth::AuthenticatedUser,
        i18n::Locale,
        rbac::{PermOrdersCreate, PermOrdersUpdate, PermOrdersValidate, PermOutgoingsCreate, RequirePermission},
    },
    models::orders::{
        CommercialOrder, CreateOrderPayload, GenerateOutgoingPayload, LoadingSummaryDetail, OrderDetail,
        OrderListQuery, OrderListRow, OutgoingGeneration, ReasonPayload, ValidationOutcome,
    },
};

/// Resultado da validação com o aviso já traduzido.
#[derive(Debug, Serialize, ToSchema)]
pub struct ValidationResponse {
    #[serde(flatten)]
    pub outcome: ValidationOutcome,
    pub warning_message: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/orders",
    tag = "Pedidos",
    params(OrderListQuery),
    responses(
        (status = 200, description = "Pedidos visíveis (FIFO para o armazém)", body = [OrderListRow]),
        (status = 403, description = "Sem orders.read e sem papel de armazém")
    ),
    security(("api_jwt" = []))
)]
pub async fn list_orders(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    Query(query): Query<OrderListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let orders = app_state
        .order_service
        .list(&principal, &query)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(orders))
}

#[utoipa::path(
    post,
    path = "/api/orders",
    tag = "Pedidos",
    request_body = CreateOrderPayload,
    responses(
        (status = 201, description = "Pedido criado aguardando validação", body = OrderDetail),
        (status = 400, description = "Dados inválidos")
    ),
    security(("api_jwt" = []))
)]
pub async fn create_order(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    _guard: RequirePermission<PermOrdersCreate>,
    Json(payload): Json<CreateOrderPayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale, &app_state.i18n_store))?;

    let detail = app_state
        .order_service
        .create(&principal, &payload)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok((StatusCode::CREATED, Json(detail)))
}

#[utoipa::path(
    get,
    path = "/api/orders/{id}",
    tag = "Pedidos",
    params(("id" = i64, Path, description = "ID do pedido")),
    responses(
        (status = 200, description = "Pedido com clientes e itens", body = OrderDetail),
        (status = 403, description = "Sem orders.read e sem papel de armazém"),
        (status = 404, description = "Inexistente ou fora da região")
    ),
    security(("api_jwt" = []))
)]
pub async fn get_order(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = app_state
        .order_service
        .detail(&principal, id)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(detail))
}

#[utoipa::path(
    put,
    path = "/api/orders/{id}",
    tag = "Pedidos",
    params(("id" = i64, Path, description = "ID do pedido")),
    request_body = CreateOrderPayload,
    responses(
        (status = 200, description = "Clientes e itens substituídos", body = OrderDetail),
        (status = 400, description = "Pedido não editável")
    ),
    security(("api_jwt" = []))
)]
pub async fn edit_order(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    _guard: RequirePermission<PermOrdersUpdate>,
    Path(id): Path<i64>,
    Json(payload): Json<CreateOrderPayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale, &app_state.i18n_store))?;

    let detail = app_state
        .order_service
        .edit(&principal, id, &payload)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(detail))
}

#[utoipa::path(
    post,
    path = "/api/orders/{id}/submit",
    tag = "Pedidos",
    params(("id" = i64, Path, description = "ID do pedido")),
    responses((status = 200, description = "Rascunho enviado para validação", body = OrderDetail)),
    security(("api_jwt" = []))
)]
pub async fn submit_order(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = app_state
        .order_service
        .submit(&principal, id)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(detail))
}

#[utoipa::path(
    post,
    path = "/api/orders/{id}/validate",
    tag = "Pedidos",
    params(("id" = i64, Path, description = "ID do pedido")),
    responses(
        (status = 200, description = "Pedido validado, ficha de carregamento gerada", body = ValidationResponse),
        (status = 400, description = "Pedido não está aguardando validação")
    ),
    security(("api_jwt" = []))
)]
pub async fn validate_order(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    _guard: RequirePermission<PermOrdersValidate>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = app_state
        .order_service
        .validate(&principal, id)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    let warning_message = outcome
        .warning
        .as_deref()
        .map(|code| app_state.i18n_store.translate(&locale.0, &format!("warning.{code}")));

    Ok(Json(ValidationResponse { outcome, warning_message }))
}

#[utoipa::path(
    post,
    path = "/api/orders/{id}/reject",
    tag = "Pedidos",
    params(("id" = i64, Path, description = "ID do pedido")),
    request_body = ReasonPayload,
    responses(
        (status = 200, description = "Pedido rejeitado", body = CommercialOrder),
        (status = 400, description = "Motivo ausente")
    ),
    security(("api_jwt" = []))
)]
pub async fn reject_order(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    _guard: RequirePermission<PermOrdersValidate>,
    Path(id): Path<i64>,
    Json(payload): Json<ReasonPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let order = app_state
        .order_service
        .reject(&principal, id, &payload)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(order))
}

#[utoipa::path(
    post,
    path = "/api/orders/{id}/client/{client_id}/reject",
    tag = "Pedidos",
    params(
        ("id" = i64, Path, description = "ID do pedido"),
        ("client_id" = i64, Path, description = "ID do cliente no pedido")
    ),
    request_body = ReasonPayload,
    responses((status = 200, description = "Cliente rejeitado", body = OrderDetail)),
    security(("api_jwt" = []))
)]
pub async fn reject_client(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    _guard: RequirePermission<PermOrdersValidate>,
    Path((id, client_id)): Path<(i64, i64)>,
    Json(payload): Json<ReasonPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = app_state
        .order_service
        .reject_client(&principal, id, client_id, &payload)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(detail))
}

#[utoipa::path(
    post,
    path = "/api/orders/{id}/client/{client_id}/approve",
    tag = "Pedidos",
    params(
        ("id" = i64, Path, description = "ID do pedido"),
        ("client_id" = i64, Path, description = "ID do cliente no pedido")
    ),
    responses((status = 200, description = "Cliente aprovado novamente", body = OrderDetail)),
    security(("api_jwt" = []))
)]
pub async fn approve_client(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    _guard: RequirePermission<PermOrdersValidate>,
    Path((id, client_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = app_state
        .order_service
        .approve_client(&principal, id, client_id)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(detail))
}

#[utoipa::path(
    post,
    path = "/api/orders/{id}/generate-outgoing",
    tag = "Pedidos",
    params(("id" = i64, Path, description = "ID do pedido")),
    request_body = GenerateOutgoingPayload,
    responses(
        (status = 201, description = "Uma saída por cliente aprovado", body = OutgoingGeneration),
        (status = 409, description = "Estoque insuficiente na origem")
    ),
    security(("api_jwt" = []))
)]
pub async fn generate_outgoing(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    _guard: RequirePermission<PermOutgoingsCreate>,
    Path(id): Path<i64>,
    Json(payload): Json<GenerateOutgoingPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let generation = app_state
        .order_service
        .generate_outgoing(&principal, id, &payload)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok((StatusCode::CREATED, Json(generation)))
}

#[utoipa::path(
    get,
    path = "/api/orders/{id}/loading-summary",
    tag = "Pedidos",
    params(("id" = i64, Path, description = "ID do pedido")),
    responses(
        (status = 200, description = "Ficha de carregamento", body = LoadingSummaryDetail),
        (status = 403, description = "Sem orders.read e sem papel de armazém"),
        (status = 404, description = "Pedido ainda não validado")
    ),
    security(("api_jwt" = []))
)]
pub async fn loading_summary(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let summary = app_state
        .order_service
        .loading_summary(&principal, id)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(summary))
}
