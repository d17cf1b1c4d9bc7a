// src/handlers/documents.rs

use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};

use crate::{
    common::error::ApiError,
    config::AppState,
    db::Scope,
    middleware::{
        i18n::Locale,
        rbac::{PermStocksRead, RequirePermission},
    },
};

#[utoipa::path(
    get,
    path = "/api/outgoings/{id}/pdf",
    tag = "Logística",
    params(("id" = i64, Path, description = "ID da saída")),
    responses(
        (status = 200, description = "Bon de livraison", content_type = "application/pdf"),
        (status = 404, description = "Saída fora do escopo")
    ),
    security(("api_jwt" = []))
)]
pub async fn outgoing_pdf(
    State(app_state): State<AppState>,
    locale: Locale,
    scope: Scope,
    _guard: RequirePermission<PermStocksRead>,
    Path(outgoing_id): Path<i64>,
) -> Result<Response, ApiError> {
    let (filename, pdf_bytes) = app_state
        .document_service
        .outgoing_pdf(&scope, outgoing_id)
        .await
        .map_err(|app_err| app_err.to_api_error(&locale, &app_state.i18n_store))?;

    // Cabeçalhos para o navegador baixar o PDF
    let headers = [
        (header::CONTENT_TYPE, "application/pdf"),
        (header::CONTENT_DISPOSITION, &format!("attachment; filename=\"{}\"", filename)),
    ];

    Ok((headers, pdf_bytes).into_response())
}
