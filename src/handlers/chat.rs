// src/handlers/chat.rs

use std::collections::HashMap;

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
        rbac::{PermChatCreate, PermChatDelete, PermChatRead, PermChatUpdate, RequirePermission},
    },
    models::chat::{
        ChatMessageView, ChatStats, CreateRoomPayload, EditMessagePayload, MessagesQuery, ReadStatus,
        ReadStatusPayload, RoomListEntry, SearchHit, SearchQuery, SendMessagePayload,
    },
};

#[derive(Debug, Serialize, ToSchema)]
pub struct MarkReadResponse {
    pub marked: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReadStatusResponse {
    pub read_statuses: HashMap<i64, ReadStatus>,
}

// ---
// SALAS
// ---

#[utoipa::path(
    get,
    path = "/api/chat/api/rooms",
    tag = "Chat",
    responses((status = 200, description = "Salas do usuário, mais recentes primeiro", body = [RoomListEntry])),
    security(("api_jwt" = []))
)]
pub async fn list_rooms(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    _guard: RequirePermission<PermChatRead>,
) -> Result<impl IntoResponse, ApiError> {
    let rooms = app_state
        .chat_service
        .list_rooms(principal.user_id)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(rooms))
}

#[utoipa::path(
    post,
    path = "/api/chat/api/rooms",
    tag = "Chat",
    request_body = CreateRoomPayload,
    responses(
        (status = 201, description = "Sala criada", body = RoomListEntry),
        (status = 200, description = "Sala direta já existente", body = RoomListEntry)
    ),
    security(("api_jwt" = []))
)]
pub async fn create_room(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    _guard: RequirePermission<PermChatCreate>,
    Json(payload): Json<CreateRoomPayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale, &app_state.i18n_store))?;

    let (room, created) = app_state
        .chat_service
        .create_room(principal.user_id, &payload)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(room)))
}

// ---
// MENSAGENS
// ---

#[utoipa::path(
    get,
    path = "/api/chat/api/rooms/{id}/messages",
    tag = "Chat",
    params(("id" = i64, Path, description = "ID da sala"), MessagesQuery),
    responses(
        (status = 200, description = "Mensagens em ordem cronológica", body = [ChatMessageView]),
        (status = 404, description = "Usuário não é membro da sala")
    ),
    security(("api_jwt" = []))
)]
pub async fn list_messages(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    _guard: RequirePermission<PermChatRead>,
    Path(room_id): Path<i64>,
    Query(query): Query<MessagesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = app_state
        .chat_service
        .list_messages(principal.user_id, room_id, &query)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(messages))
}

#[utoipa::path(
    post,
    path = "/api/chat/api/rooms/{id}/messages",
    tag = "Chat",
    params(("id" = i64, Path, description = "ID da sala")),
    request_body = SendMessagePayload,
    responses(
        (status = 201, description = "Mensagem enviada", body = ChatMessageView),
        (status = 400, description = "Mensagem vazia ou anexo inválido")
    ),
    security(("api_jwt" = []))
)]
pub async fn send_message(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    _guard: RequirePermission<PermChatCreate>,
    Path(room_id): Path<i64>,
    Json(payload): Json<SendMessagePayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale, &app_state.i18n_store))?;

    let message = app_state
        .chat_service
        .send_message(principal.user_id, room_id, &payload)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok((StatusCode::CREATED, Json(message)))
}

#[utoipa::path(
    patch,
    path = "/api/chat/api/messages/{id}",
    tag = "Chat",
    params(("id" = i64, Path, description = "ID da mensagem")),
    request_body = EditMessagePayload,
    responses(
        (status = 200, description = "Mensagem editada", body = ChatMessageView),
        (status = 403, description = "Só o remetente edita")
    ),
    security(("api_jwt" = []))
)]
pub async fn edit_message(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    _guard: RequirePermission<PermChatUpdate>,
    Path(message_id): Path<i64>,
    Json(payload): Json<EditMessagePayload>,
) -> Result<impl IntoResponse, ApiError> {
    let message = app_state
        .chat_service
        .edit_message(principal.user_id, message_id, &payload)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(message))
}

#[utoipa::path(
    delete,
    path = "/api/chat/api/messages/{id}",
    tag = "Chat",
    params(("id" = i64, Path, description = "ID da mensagem")),
    responses(
        (status = 204, description = "Mensagem excluída"),
        (status = 403, description = "Só o remetente exclui")
    ),
    security(("api_jwt" = []))
)]
pub async fn delete_message(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    _guard: RequirePermission<PermChatDelete>,
    Path(message_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    app_state
        .chat_service
        .delete_message(principal.user_id, message_id)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(StatusCode::NO_CONTENT)
}

// ---
// LEITURA
// ---

#[utoipa::path(
    post,
    path = "/api/chat/api/rooms/{id}/read",
    tag = "Chat",
    params(("id" = i64, Path, description = "ID da sala")),
    responses((status = 200, description = "Mensagens marcadas como lidas", body = MarkReadResponse)),
    security(("api_jwt" = []))
)]
pub async fn mark_room_read(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    _guard: RequirePermission<PermChatRead>,
    Path(room_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let marked = app_state
        .chat_service
        .mark_read(principal.user_id, room_id)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(MarkReadResponse { marked }))
}

#[utoipa::path(
    post,
    path = "/api/chat/api/messages/read-status",
    tag = "Chat",
    request_body = ReadStatusPayload,
    responses((status = 200, description = "Leituras por mensagem", body = ReadStatusResponse)),
    security(("api_jwt" = []))
)]
pub async fn read_status(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    _guard: RequirePermission<PermChatRead>,
    Json(payload): Json<ReadStatusPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let read_statuses = app_state
        .chat_service
        .read_statuses(principal.user_id, &payload.message_ids)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(ReadStatusResponse { read_statuses }))
}

// ---
// BUSCA E ESTATÍSTICAS
// ---

#[utoipa::path(
    get,
    path = "/api/chat/api/rooms/{id}/search",
    tag = "Chat",
    params(("id" = i64, Path, description = "ID da sala"), SearchQuery),
    responses((status = 200, description = "Até 20 resultados", body = [SearchHit])),
    security(("api_jwt" = []))
)]
pub async fn search_room(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    _guard: RequirePermission<PermChatRead>,
    Path(room_id): Path<i64>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let term = query
        .term()
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    let hits = app_state
        .chat_service
        .search_room(principal.user_id, room_id, &term)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(hits))
}

#[utoipa::path(
    get,
    path = "/api/chat/api/search",
    tag = "Chat",
    params(SearchQuery),
    responses((status = 200, description = "Até 50 resultados em todas as salas", body = [SearchHit])),
    security(("api_jwt" = []))
)]
pub async fn search_all(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    _guard: RequirePermission<PermChatRead>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let term = query
        .term()
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    let hits = app_state
        .chat_service
        .search_all(principal.user_id, &term)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(hits))
}

#[utoipa::path(
    get,
    path = "/api/chat/api/stats",
    tag = "Chat",
    responses((status = 200, description = "Salas, não lidas e mensagens de hoje", body = ChatStats)),
    security(("api_jwt" = []))
)]
pub async fn chat_stats(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    _guard: RequirePermission<PermChatRead>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = app_state
        .chat_service
        .stats(principal.user_id)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    Ok(Json(stats))
}
