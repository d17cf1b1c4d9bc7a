// src/handlers/stream.rs

use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderName},
    response::{
        sse::{Event, Sse},
        IntoResponse,
    },
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        mpsc, watch,
    },
    time::{interval_at, Instant, Interval},
};
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::{
    common::error::ApiError,
    config::AppState,
    middleware::{
        auth::AuthenticatedUser,
        i18n::Locale,
        rbac::{PermChatRead, RequirePermission},
    },
    models::chat::{ChatMessageView, MessagePreview, RoomListEntry},
    services::{chat_hub::UserEvent, chat_service::ChatService},
};

const HEARTBEAT: Duration = Duration::from_secs(10);
const CATCH_UP_BATCH: i64 = 200;
const STREAM_BUFFER: usize = 64;
const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

type EventSender = mpsc::Sender<Result<Event, Infallible>>;

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamPayload<'a> {
    Connected {
        connection_id: Uuid,
        ts: DateTime<Utc>,
    },
    Heartbeat {
        ts: DateTime<Utc>,
    },
    NewMessage(&'a ChatMessageView),
    RoomUpdate {
        room_id: i64,
        last_message: Option<&'a MessagePreview>,
        unread_count: i64,
    },
    RoomJoined {
        room: &'a RoomListEntry,
    },
}

impl<'a> StreamPayload<'a> {
    fn room_update(room: &'a RoomListEntry) -> Self {
        StreamPayload::RoomUpdate {
            room_id: room.id,
            last_message: room.last_message.as_ref(),
            unread_count: room.unread_count,
        }
    }
}

fn heartbeat_timer() -> Interval {
    interval_at(Instant::now() + HEARTBEAT, HEARTBEAT)
}

fn last_event_id(headers: &HeaderMap) -> Option<i64> {
    headers
        .get("last-event-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

fn is_after_cursor(cursor: Option<i64>, message_id: i64) -> bool {
    cursor.is_none_or(|c| message_id > c)
}

fn has_foreign_last_message(room: &RoomListEntry, user_id: i64) -> bool {
    room.last_message.as_ref().is_some_and(|m| m.sender_id != user_id)
}

/// Devolve `false` quando o cliente já foi embora.
async fn push(tx: &EventSender, payload: &StreamPayload<'_>, id: Option<i64>) -> bool {
    let mut event = match Event::default().json_data(payload) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(error = %e, "Falha ao serializar evento do stream");
            return true;
        }
    };
    if let Some(id) = id {
        event = event.id(id.to_string());
    }
    tx.send(Ok(event)).await.is_ok()
}

fn sse_response(rx: mpsc::Receiver<Result<Event, Infallible>>) -> impl IntoResponse {
    let sse = Sse::new(ReceiverStream::new(rx));
    ([(header::CACHE_CONTROL, "no-cache"), (X_ACCEL_BUFFERING, "no")], sse)
}

// ---
// STREAM DE UMA SALA
// ---

#[utoipa::path(
    get,
    path = "/api/chat/api/stream/{room_id}",
    tag = "Chat",
    params(
        ("room_id" = i64, Path, description = "ID da sala"),
        ("Last-Event-ID" = Option<i64>, Header, description = "Última mensagem recebida"),
        ("access_token" = Option<String>, Query, description = "JWT para clientes EventSource")
    ),
    responses(
        (status = 200, description = "Eventos das novas mensagens", content_type = "text/event-stream"),
        (status = 404, description = "Usuário não é membro da sala")
    ),
    security(("api_jwt" = []))
)]
pub async fn room_stream(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(principal): AuthenticatedUser,
    _guard: RequirePermission<PermChatRead>,
    Path(room_id): Path<i64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    app_state
        .chat_service
        .ensure_member(room_id, principal.user_id)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    let resume_from = last_event_id(&headers);
    // Assina antes de reler o banco: nada se perde entre a releitura e o hub
    let hub_rx = app_state.chat_service.hub().subscribe_room(room_id).await;
    let latest = app_state
        .chat_service
        .latest_message_id(room_id)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    let cursor = start_cursor(resume_from, latest);
    let connection_id = Uuid::new_v4();
    tracing::info!(%connection_id, user_id = principal.user_id, room_id, ?cursor, "📡 Stream de sala aberto");

    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    let chat = app_state.chat_service.clone();
    let shutdown = app_state.shutdown.subscribe();
    tokio::spawn(async move {
        run_room_stream(chat, room_id, resume_from, cursor, hub_rx, shutdown, tx, connection_id).await;
        tracing::info!(%connection_id, room_id, "Stream de sala encerrado");
    });

    Ok(sse_response(rx))
}

#[allow(clippy::too_many_arguments)]
async fn run_room_stream(
    chat: ChatService,
    room_id: i64,
    resume_from: Option<i64>,
    mut cursor: Option<i64>,
    mut hub_rx: broadcast::Receiver<Arc<ChatMessageView>>,
    mut shutdown: watch::Receiver<bool>,
    tx: EventSender,
    connection_id: Uuid,
) {
    if *shutdown.borrow_and_update() || !push(&tx, &StreamPayload::Connected { connection_id, ts: Utc::now() }, None).await {
        return;
    }
    if let Some(after) = resume_from {
        match catch_up(&chat, room_id, after, &tx).await {
            Some(last) => cursor = cursor.max(Some(last)),
            None => return,
        }
    }

    let mut heartbeat = heartbeat_timer();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tx.closed() => break,
            _ = heartbeat.tick() => {
                if !push(&tx, &StreamPayload::Heartbeat { ts: Utc::now() }, None).await {
                    break;
                }
            }
            received = hub_rx.recv() => match received {
                Ok(message) => {
                    if !is_after_cursor(cursor, message.id) {
                        continue;
                    }
                    if !push(&tx, &StreamPayload::NewMessage(&message), Some(message.id)).await {
                        break;
                    }
                    cursor = Some(message.id);
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(%connection_id, room_id, skipped, "Stream atrasado, relendo do banco");
                    match catch_up(&chat, room_id, cursor.unwrap_or(0), &tx).await {
                        Some(last) => cursor = Some(last),
                        None => break,
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}

/// Sem Last-Event-ID o cursor parte da última mensagem já gravada.
fn start_cursor(resume_from: Option<i64>, latest: Option<i64>) -> Option<i64> {
    resume_from.or(latest)
}

/// Reenvia o que foi gravado depois do cursor. `None` se o cliente desconectou.
async fn catch_up(chat: &ChatService, room_id: i64, mut after: i64, tx: &EventSender) -> Option<i64> {
    loop {
        let batch = match chat.messages_after(room_id, after, CATCH_UP_BATCH).await {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(room_id, error = %e, "Falha ao reler mensagens do stream");
                return Some(after);
            }
        };
        let full = batch.len() as i64 == CATCH_UP_BATCH;
        for message in &batch {
            if !push(tx, &StreamPayload::NewMessage(message), Some(message.id)).await {
                return None;
            }
            after = message.id;
        }
        if !full {
            return Some(after);
        }
    }
}

// ---
// STREAM DE VISÃO GERAL (LISTA DE SALAS)
// ---

#[utoipa::path(
    get,
    path = "/api/chat/api/stream/rooms",
    tag = "Chat",
    params(("access_token" = Option<String>, Query, description = "JWT para clientes EventSource")),
    responses((status = 200, description = "Atualizações das salas do usuário", content_type = "text/event-stream")),
    security(("api_jwt" = []))
)]
pub async fn rooms_stream(
    State(app_state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
    _guard: RequirePermission<PermChatRead>,
) -> impl IntoResponse {
    let user_id = principal.user_id;
    let user_rx = app_state.chat_service.hub().subscribe_user(user_id).await;
    let connection_id = Uuid::new_v4();
    tracing::info!(%connection_id, user_id, "📡 Stream de salas aberto");

    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    let chat = app_state.chat_service.clone();
    let shutdown = app_state.shutdown.subscribe();
    tokio::spawn(async move {
        run_overview_stream(chat, user_id, user_rx, shutdown, tx, connection_id).await;
        tracing::info!(%connection_id, user_id, "Stream de salas encerrado");
    });

    sse_response(rx)
}

async fn run_overview_stream(
    chat: ChatService,
    user_id: i64,
    mut user_rx: broadcast::Receiver<UserEvent>,
    mut shutdown: watch::Receiver<bool>,
    tx: EventSender,
    connection_id: Uuid,
) {
    if *shutdown.borrow_and_update() || !push(&tx, &StreamPayload::Connected { connection_id, ts: Utc::now() }, None).await {
        return;
    }
    if !send_snapshot(&chat, user_id, &tx).await {
        return;
    }

    let mut heartbeat = heartbeat_timer();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tx.closed() => break,
            _ = heartbeat.tick() => {
                if !push(&tx, &StreamPayload::Heartbeat { ts: Utc::now() }, None).await {
                    break;
                }
            }
            received = user_rx.recv() => {
                let keep_going = match received {
                    Ok(UserEvent::NewMessage(message)) if message.sender_id != user_id => {
                        send_room(&chat, user_id, message.room_id, false, &tx).await
                    }
                    Ok(UserEvent::NewMessage(_)) => true,
                    Ok(UserEvent::RoomJoined(room_id)) => send_room(&chat, user_id, room_id, true, &tx).await,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(%connection_id, user_id, skipped, "Stream de salas atrasado, reenviando estado");
                        send_snapshot(&chat, user_id, &tx).await
                    }
                    Err(RecvError::Closed) => false,
                };
                if !keep_going {
                    break;
                }
            }
        }
    }
}

async fn send_snapshot(chat: &ChatService, user_id: i64, tx: &EventSender) -> bool {
    let rooms = match chat.list_rooms(user_id).await {
        Ok(rooms) => rooms,
        Err(e) => {
            tracing::error!(user_id, error = %e, "Falha ao carregar salas para o stream");
            return true;
        }
    };
    for room in rooms.iter().filter(|room| has_foreign_last_message(room, user_id)) {
        if !push(tx, &StreamPayload::room_update(room), None).await {
            return false;
        }
    }
    true
}

// Contagem de não lidas recalculada a cada evento
async fn send_room(chat: &ChatService, user_id: i64, room_id: i64, joined: bool, tx: &EventSender) -> bool {
    match chat.room_entry(user_id, room_id).await {
        Ok(room) => {
            let payload = if joined {
                StreamPayload::RoomJoined { room: &room }
            } else {
                StreamPayload::room_update(&room)
            };
            push(tx, &payload, None).await
        }
        Err(e) => {
            tracing::warn!(user_id, room_id, error = %e, "Sala indisponível para o stream");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::{MessageType, RoomType};
    use axum::http::HeaderValue;

    fn room(last_sender: Option<i64>) -> RoomListEntry {
        RoomListEntry {
            id: 7,
            name: "Équipe Kindia".into(),
            room_type: RoomType::Group,
            updated_at: Utc::now(),
            last_message: last_sender.map(|sender_id| MessagePreview {
                id: 40,
                sender_id,
                content: "Livraison partie".into(),
                sender_name: "ibrahima".into(),
                created_at: Utc::now(),
            }),
            unread_count: 1,
        }
    }

    #[test]
    fn cursor_comes_from_last_event_id() {
        let mut headers = HeaderMap::new();
        assert_eq!(last_event_id(&headers), None);
        headers.insert("last-event-id", HeaderValue::from_static(" 42 "));
        assert_eq!(last_event_id(&headers), Some(42));
        headers.insert("last-event-id", HeaderValue::from_static("abc"));
        assert_eq!(last_event_id(&headers), None);
    }

    #[test]
    fn only_messages_after_the_cursor_are_forwarded() {
        assert!(is_after_cursor(None, 1));
        assert!(is_after_cursor(Some(10), 11));
        assert!(!is_after_cursor(Some(10), 10));
        assert!(!is_after_cursor(Some(10), 3));
    }

    #[test]
    fn cursor_starts_at_latest_message_without_last_event_id() {
        assert_eq!(start_cursor(None, Some(55)), Some(55));
        assert_eq!(start_cursor(Some(40), Some(55)), Some(40));
        assert_eq!(start_cursor(None, None), None);
        // Mensagem antiga reenviada pelo hub não volta ao cliente
        assert!(!is_after_cursor(start_cursor(None, Some(55)), 55));
        assert!(is_after_cursor(start_cursor(None, Some(55)), 56));
    }

    #[test]
    fn snapshot_skips_rooms_where_the_user_spoke_last() {
        assert!(has_foreign_last_message(&room(Some(2)), 1));
        assert!(!has_foreign_last_message(&room(Some(1)), 1));
        assert!(!has_foreign_last_message(&room(None), 1));
    }

    #[test]
    fn payloads_are_tagged_by_type() {
        let connection_id = Uuid::nil();
        let json = serde_json::to_value(StreamPayload::Connected { connection_id, ts: Utc::now() }).expect("json");
        assert_eq!(json["type"], "connected");

        assert!(json["ts"].is_string());

        let json = serde_json::to_value(StreamPayload::Heartbeat { ts: Utc::now() }).expect("json");
        assert_eq!(json["type"], "heartbeat");

        let entry = room(Some(2));
        let json = serde_json::to_value(StreamPayload::room_update(&entry)).expect("json");
        assert_eq!(json["type"], "room_update");
        assert_eq!(json["room_id"], 7);
        assert_eq!(json["unread_count"], 1);
        assert_eq!(json["last_message"]["sender_name"], "ibrahima");
    }

    #[test]
    fn new_message_fields_sit_next_to_the_type() {
        let message = ChatMessageView {
            id: 41,
            room_id: 7,
            sender_id: 2,
            sender_name: "ibrahima".into(),
            content: "Camion à Kindia".into(),
            message_type: MessageType::Text,
            reply_to_id: None,
            reply_to: None,
            is_edited: false,
            edited_at: None,
            is_deleted: false,
            created_at: Utc::now(),
            attachments: vec![],
        };
        let json = serde_json::to_value(StreamPayload::NewMessage(&message)).expect("json");
        assert_eq!(json["type"], "new_message");
        assert_eq!(json["id"], 41);
        assert_eq!(json["content"], "Camion à Kindia");
    }

    #[tokio::test]
    async fn push_reports_a_gone_client() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let payload = StreamPayload::Heartbeat { ts: Utc::now() };
        assert!(!push(&tx, &payload, None).await);
    }

    #[tokio::test]
    async fn push_delivers_to_a_live_client() {
        let (tx, mut rx) = mpsc::channel(1);
        let payload = StreamPayload::Heartbeat { ts: Utc::now() };
        assert!(push(&tx, &payload, Some(5)).await);
        assert!(rx.recv().await.is_some());
    }
}
