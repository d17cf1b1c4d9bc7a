// src/models/chat.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::common::error::AppError;

pub const DELETED_PLACEHOLDER: &str = "[Message supprimé]";
pub const FILE_PLACEHOLDER: &str = "[Fichier]";
pub const PREVIEW_CHARS: usize = 100;
pub const ROOM_SEARCH_LIMIT: i64 = 20;
pub const GLOBAL_SEARCH_LIMIT: i64 = 50;
const MIN_SEARCH_CHARS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "chat_room_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RoomType {
    Direct,
    Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "chat_member_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Admin,
    Member,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "chat_message_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    File,
}

#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct ChatRoom {
    pub id: i64,
    pub name: Option<String>,
    pub room_type: RoomType,
    pub created_by_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct MessagePreview {
    pub id: i64,
    pub sender_id: i64,
    pub content: String,
    pub sender_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RoomListEntry {
    pub id: i64,
    /// Salas diretas recebem o nome do outro membro.
    pub name: String,
    pub room_type: RoomType,
    pub updated_at: DateTime<Utc>,
    pub last_message: Option<MessagePreview>,
    pub unread_count: i64,
}

/// Linha de sala com os agregados calculados no SQL.
#[derive(Debug, Clone, FromRow)]
pub struct RoomSummaryRow {
    pub id: i64,
    pub display_name: String,
    pub room_type: RoomType,
    pub updated_at: DateTime<Utc>,
    pub last_message_id: Option<i64>,
    pub last_message_sender_id: Option<i64>,
    pub last_message_content: Option<String>,
    pub last_message_sender: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: i64,
}

impl From<RoomSummaryRow> for RoomListEntry {
    fn from(row: RoomSummaryRow) -> Self {
        let last_message = match (
            row.last_message_id,
            row.last_message_sender_id,
            row.last_message_content,
            row.last_message_sender,
            row.last_message_at,
        ) {
            (Some(id), Some(sender_id), Some(content), Some(sender_name), Some(created_at)) => Some(MessagePreview {
                id,
                sender_id,
                content: preview(&content),
                sender_name,
                created_at,
            }),
            _ => None,
        };
        Self {
            id: row.id,
            name: row.display_name,
            room_type: row.room_type,
            updated_at: row.updated_at,
            last_message,
            unread_count: row.unread_count,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct ChatAttachment {
    pub id: i64,
    pub message_id: i64,
    pub file_name: String,
    pub file_path: String,
    pub file_size: i64,
    pub file_type: String,
    pub is_image: bool,
    pub thumbnail_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReplyPreview {
    pub id: i64,
    pub sender_name: String,
    pub content: String,
}

/// Mensagem como vai para a API e para o stream: remetente, prévia da resposta e anexos.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatMessageView {
    pub id: i64,
    pub room_id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    pub content: String,
    pub message_type: MessageType,
    pub reply_to_id: Option<i64>,
    pub reply_to: Option<ReplyPreview>,
    pub is_edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub attachments: Vec<ChatAttachment>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ChatMessageRow {
    pub id: i64,
    pub room_id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    pub content: String,
    pub message_type: MessageType,
    pub reply_to_id: Option<i64>,
    pub reply_sender_name: Option<String>,
    pub reply_content: Option<String>,
    pub is_edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl ChatMessageRow {
    pub fn into_view(self, attachments: Vec<ChatAttachment>) -> ChatMessageView {
        let reply_to = match (self.reply_to_id, self.reply_sender_name, self.reply_content) {
            (Some(id), Some(sender_name), Some(content)) => Some(ReplyPreview {
                id,
                sender_name,
                content: preview(&content),
            }),
            _ => None,
        };
        ChatMessageView {
            id: self.id,
            room_id: self.room_id,
            sender_id: self.sender_id,
            sender_name: self.sender_name,
            content: self.content,
            message_type: self.message_type,
            reply_to_id: self.reply_to_id,
            reply_to,
            is_edited: self.is_edited,
            edited_at: self.edited_at,
            is_deleted: self.is_deleted,
            created_at: self.created_at,
            attachments,
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct SearchHit {
    pub id: i64,
    pub room_id: i64,
    pub room_name: String,
    pub sender_name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReadStatus {
    pub read_count: i64,
    pub total_members: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ChatStats {
    pub rooms: i64,
    pub unread_total: i64,
    pub messages_today: i64,
}

// ---
// Payloads
// ---
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateRoomPayload {
    #[serde(rename = "type")]
    pub room_type: RoomType,
    pub name: Option<String>,
    #[validate(length(min = 1, code = "members_required"))]
    pub user_ids: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct AttachmentPayload {
    #[validate(length(min = 1, code = "required"))]
    pub file_name: String,
    #[validate(length(min = 1, code = "required"))]
    pub file_path: String,
    #[validate(range(min = 0, code = "not_negative"))]
    pub file_size: i64,
    #[validate(length(min = 1, code = "required"))]
    pub file_type: String,
    pub thumbnail_path: Option<String>,
}

impl AttachmentPayload {
    pub fn is_image(&self) -> bool {
        self.file_type.starts_with("image/")
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SendMessagePayload {
    #[serde(default)]
    pub content: String,
    pub reply_to_id: Option<i64>,
    #[serde(default)]
    #[validate(nested)]
    pub attachments: Vec<AttachmentPayload>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct EditMessagePayload {
    pub content: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReadStatusPayload {
    pub message_ids: Vec<i64>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct MessagesQuery {
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl MessagesQuery {
    pub fn clamped_limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 200)
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SearchQuery {
    pub q: Option<String>,
}

impl SearchQuery {
    pub fn term(&self) -> Result<String, AppError> {
        let term = self.q.as_deref().unwrap_or_default().trim();
        if term.chars().count() < MIN_SEARCH_CHARS {
            return Err(AppError::invalid("q", "search_too_short"));
        }
        Ok(term.to_string())
    }
}

// ---
// Regras puras
// ---

/// Primeiros 100 caracteres (não bytes).
pub fn preview(content: &str) -> String {
    content.chars().take(PREVIEW_CHARS).collect()
}

/// Conteúdo vazio só é aceito com anexo; nesse caso vira `[Fichier]`.
pub fn normalize_content(content: &str, has_attachments: bool) -> Result<(String, MessageType), AppError> {
    let trimmed = content.trim();
    match (trimmed.is_empty(), has_attachments) {
        (true, false) => Err(AppError::invalid("content", "message_empty")),
        (true, true) => Ok((FILE_PLACEHOLDER.to_string(), MessageType::File)),
        (false, true) => Ok((trimmed.to_string(), MessageType::File)),
        (false, false) => Ok((trimmed.to_string(), MessageType::Text)),
    }
}

/// Chave única do par de uma sala direta, independente da ordem.
pub fn direct_pair_key(a: i64, b: i64) -> String {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    format!("{low}:{high}")
}

/// Ex.: `chat/12/`. Os arquivos em si ficam fora deste serviço.
pub fn attachment_dir(room_id: i64) -> String {
    format!("chat/{room_id}/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_counts_characters() {
        let long = "é".repeat(150);
        let p = preview(&long);
        assert_eq!(p.chars().count(), 100);
        assert_eq!(preview("court"), "court");
    }

    #[test]
    fn empty_message_requires_attachment() {
        assert!(normalize_content("   ", false).is_err());
        let (content, kind) = normalize_content("", true).expect("file");
        assert_eq!(content, FILE_PLACEHOLDER);
        assert_eq!(kind, MessageType::File);
        let (content, kind) = normalize_content(" bonjour ", false).expect("text");
        assert_eq!(content, "bonjour");
        assert_eq!(kind, MessageType::Text);
    }

    #[test]
    fn pair_key_is_order_independent() {
        assert_eq!(direct_pair_key(7, 3), direct_pair_key(3, 7));
        assert_eq!(direct_pair_key(3, 7), "3:7");
    }

    #[test]
    fn message_limit_is_clamped() {
        assert_eq!(MessagesQuery::default().clamped_limit(), 50);
        assert_eq!(MessagesQuery { since: None, limit: Some(0) }.clamped_limit(), 1);
        assert_eq!(MessagesQuery { since: None, limit: Some(999) }.clamped_limit(), 200);
    }

    #[test]
    fn search_term_needs_two_characters() {
        assert!(SearchQuery { q: Some(" a ".into()) }.term().is_err());
        assert!(SearchQuery { q: None }.term().is_err());
        assert_eq!(SearchQuery { q: Some("ri".into()) }.term().expect("term"), "ri");
    }

    #[test]
    fn reply_preview_is_built_only_for_live_reply() {
        let row = ChatMessageRow {
            id: 2,
            room_id: 7,
            sender_id: 1,
            sender_name: "a".into(),
            content: "ok".into(),
            message_type: MessageType::Text,
            reply_to_id: Some(1),
            reply_sender_name: Some("b".into()),
            reply_content: Some("x".repeat(120)),
            is_edited: false,
            edited_at: None,
            is_deleted: false,
            created_at: Utc::now(),
        };
        let view = row.into_view(vec![]);
        let reply = view.reply_to.expect("reply");
        assert_eq!(reply.id, 1);
        assert_eq!(reply.content.len(), 100);
    }

    #[test]
    fn image_attachment_detected_by_mime() {
        let att = AttachmentPayload {
            file_name: "photo.jpg".into(),
            file_path: "chat/7/photo.jpg".into(),
            file_size: 10,
            file_type: "image/jpeg".into(),
            thumbnail_path: None,
        };
        assert!(att.is_image());
    }
}
