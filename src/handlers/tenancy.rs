// src/handlers/tenancy.rs

use axum::{extract::State, response::IntoResponse, Json};

use crate::{
    common::error::ApiError,
    config::AppState,
    db::Scope,
    middleware::{
        i18n::Locale,
        rbac::{PermUsersRead, RequirePermission},
    },
    models::{
        inventory::StockItem,
        tenancy::{CommercialTeam, Depot, Region, UserSummary, Vehicle},
    },
};

// Dados de referência. Tudo passa pelo escopo de região do usuário.

#[utoipa::path(
    get,
    path = "/api/regions",
    tag = "Referência",
    responses((status = 200, description = "Regiões visíveis", body = [Region])),
    security(("api_jwt" = []))
)]
pub async fn list_regions(
    State(app_state): State<AppState>,
    locale: Locale,
    scope: Scope,
) -> Result<impl IntoResponse, ApiError> {
    let regions = app_state
        .tenancy_repo
        .list_regions(&scope)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(regions))
}

#[utoipa::path(
    get,
    path = "/api/depots",
    tag = "Referência",
    responses((status = 200, description = "Depósitos da região", body = [Depot])),
    security(("api_jwt" = []))
)]
pub async fn list_depots(
    State(app_state): State<AppState>,
    locale: Locale,
    scope: Scope,
) -> Result<impl IntoResponse, ApiError> {
    let depots = app_state
        .tenancy_repo
        .list_depots(&scope)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(depots))
}

#[utoipa::path(
    get,
    path = "/api/vehicles",
    tag = "Referência",
    responses((status = 200, description = "Veículos cujo motorista está na região", body = [Vehicle])),
    security(("api_jwt" = []))
)]
pub async fn list_vehicles(
    State(app_state): State<AppState>,
    locale: Locale,
    scope: Scope,
) -> Result<impl IntoResponse, ApiError> {
    let vehicles = app_state
        .tenancy_repo
        .list_vehicles(&scope)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(vehicles))
}

#[utoipa::path(
    get,
    path = "/api/users",
    tag = "Referência",
    responses((status = 200, description = "Usuários da região", body = [UserSummary])),
    security(("api_jwt" = []))
)]
pub async fn list_users(
    State(app_state): State<AppState>,
    locale: Locale,
    scope: Scope,
    _guard: RequirePermission<PermUsersRead>,
) -> Result<impl IntoResponse, ApiError> {
    let users = app_state
        .user_repo
        .list_users(&scope)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(users))
}

#[utoipa::path(
    get,
    path = "/api/stock-items",
    tag = "Referência",
    responses((status = 200, description = "Catálogo de artigos", body = [StockItem])),
    security(("api_jwt" = []))
)]
pub async fn list_stock_items(
    State(app_state): State<AppState>,
    locale: Locale,
) -> Result<impl IntoResponse, ApiError> {
    let items = app_state
        .inventory_service
        .list_items()
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(items))
}

#[utoipa::path(
    get,
    path = "/api/teams",
    tag = "Referência",
    responses((status = 200, description = "Equipes comerciais", body = [CommercialTeam])),
    security(("api_jwt" = []))
)]
pub async fn list_teams(
    State(app_state): State<AppState>,
    locale: Locale,
    scope: Scope,
) -> Result<impl IntoResponse, ApiError> {
    let teams = app_state
        .tenancy_repo
        .list_teams(&scope)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(teams))
}
