// src/services/chat_service.rs

use chrono::Utc;
use sqlx::PgPool;

use crate::{
    common::error::AppError,
    db::ChatRepository,
    models::chat::{
        attachment_dir, direct_pair_key, normalize_content, AttachmentPayload, ChatMessageView, ChatStats,
        CreateRoomPayload, EditMessagePayload, MemberRole, MessagesQuery, ReadStatus, RoomListEntry, RoomType,
        SearchHit, SendMessagePayload,
    },
    services::chat_hub::ChatHub,
};

/// Salas, mensagens, leitura e busca. Toda escrita de mensagem é publicada no hub depois do commit.
#[derive(Clone)]
pub struct ChatService {
    pool: PgPool,
    chat_repo: ChatRepository,
    hub: ChatHub,
    max_attachment_bytes: i64,
}

impl ChatService {
    pub fn new(pool: PgPool, chat_repo: ChatRepository, hub: ChatHub, max_content_mb: u64) -> Self {
        let max_attachment_bytes = i64::try_from(max_content_mb.saturating_mul(1024 * 1024)).unwrap_or(i64::MAX);
        Self { pool, chat_repo, hub, max_attachment_bytes }
    }

    pub fn hub(&self) -> &ChatHub {
        &self.hub
    }

    /// Sala fora das salas do usuário é tratada como inexistente.
    pub async fn ensure_member(&self, room_id: i64, user_id: i64) -> Result<(), AppError> {
        if self.chat_repo.is_member(room_id, user_id).await? {
            Ok(())
        } else {
            Err(AppError::ResourceNotFound("chat_room"))
        }
    }

    // --- SALAS ---

    pub async fn list_rooms(&self, user_id: i64) -> Result<Vec<RoomListEntry>, AppError> {
        let rows = self.chat_repo.list_rooms(user_id).await?;
        Ok(rows.into_iter().map(RoomListEntry::from).collect())
    }

    pub async fn room_entry(&self, user_id: i64, room_id: i64) -> Result<RoomListEntry, AppError> {
        self.chat_repo
            .room_summary(user_id, room_id)
            .await?
            .map(RoomListEntry::from)
            .ok_or(AppError::ResourceNotFound("chat_room"))
    }

    /// Cria a sala. Para sala direta já existente devolve a mesma, com `false` no segundo campo.
    pub async fn create_room(&self, user_id: i64, payload: &CreateRoomPayload) -> Result<(RoomListEntry, bool), AppError> {
        let others = other_members(user_id, &payload.user_ids);
        if others.is_empty() {
            return Err(AppError::invalid("user_ids", "members_required"));
        }

        let pair_key = match direct_partner(payload.room_type, &others)? {
            Some(other) => {
                if let Some(room_id) = self.chat_repo.find_direct_room(&self.pool, user_id, other).await? {
                    return Ok((self.room_entry(user_id, room_id).await?, false));
                }
                Some(direct_pair_key(user_id, other))
            }
            None => None,
        };

        if self.chat_repo.count_active_users(&self.pool, &others).await? != others.len() as i64 {
            return Err(AppError::ResourceNotFound("user"));
        }

        let name = payload.name.as_deref().map(str::trim).filter(|n| !n.is_empty());
        let creator_role = match payload.room_type {
            RoomType::Group => MemberRole::Admin,
            RoomType::Direct => MemberRole::Member,
        };

        let mut tx = self.pool.begin().await?;
        let room = match self
            .chat_repo
            .insert_room(&mut *tx, name, payload.room_type, user_id, pair_key.as_deref())
            .await
        {
            Ok(room) => room,
            // Outra requisição criou o mesmo par entre a busca e o insert
            Err(AppError::Conflict(_)) if payload.room_type == RoomType::Direct => {
                drop(tx);
                let room_id = self
                    .chat_repo
                    .find_direct_room(&self.pool, user_id, others[0])
                    .await?
                    .ok_or(AppError::Conflict("duplicate_direct_room"))?;
                return Ok((self.room_entry(user_id, room_id).await?, false));
            }
            Err(e) => return Err(e),
        };
        self.chat_repo.add_member(&mut *tx, room.id, user_id, creator_role).await?;
        for other in &others {
            self.chat_repo.add_member(&mut *tx, room.id, *other, MemberRole::Member).await?;
        }
        tx.commit().await?;

        let mut members = others.clone();
        members.push(user_id);
        self.hub.announce_room(room.id, &members).await;
        tracing::info!(room_id = room.id, room_type = ?room.room_type, members = members.len(), "💬 Sala criada");

        Ok((self.room_entry(user_id, room.id).await?, true))
    }

    // --- MENSAGENS ---

    pub async fn list_messages(&self, user_id: i64, room_id: i64, query: &MessagesQuery) -> Result<Vec<ChatMessageView>, AppError> {
        self.ensure_member(room_id, user_id).await?;
        self.chat_repo.list_messages(room_id, query.since, query.clamped_limit()).await
    }

    pub async fn send_message(&self, user_id: i64, room_id: i64, payload: &SendMessagePayload) -> Result<ChatMessageView, AppError> {
        self.ensure_member(room_id, user_id).await?;
        let (content, message_type) = normalize_content(&payload.content, !payload.attachments.is_empty())?;
        for attachment in &payload.attachments {
            check_attachment(attachment, room_id, self.max_attachment_bytes)?;
        }

        let mut tx = self.pool.begin().await?;
        // Resposta inválida é descartada, não recusada
        let reply_to_id = match payload.reply_to_id {
            Some(reply) if self.chat_repo.reply_target_valid(&mut *tx, room_id, reply).await? => Some(reply),
            _ => None,
        };
        let message_id = self
            .chat_repo
            .insert_message(&mut *tx, room_id, user_id, &content, message_type, reply_to_id)
            .await?;
        for attachment in &payload.attachments {
            self.chat_repo.insert_attachment(&mut *tx, message_id, attachment).await?;
        }
        self.chat_repo.mark_read_by(&mut *tx, message_id, user_id).await?;
        self.chat_repo.set_last_read(&mut *tx, room_id, user_id, Utc::now()).await?;
        self.chat_repo.touch_room(&mut *tx, room_id).await?;
        tx.commit().await?;

        let view = self
            .chat_repo
            .message_view(message_id)
            .await?
            .ok_or(AppError::ResourceNotFound("chat_message"))?;
        let members = self.chat_repo.member_ids(room_id).await?;
        self.hub.publish_message(view.clone(), &members).await;
        Ok(view)
    }

    pub async fn edit_message(&self, user_id: i64, message_id: i64, payload: &EditMessagePayload) -> Result<ChatMessageView, AppError> {
        let content = payload.content.trim();
        if content.is_empty() {
            return Err(AppError::invalid("content", "message_empty"));
        }

        let mut tx = self.pool.begin().await?;
        let message = self
            .chat_repo
            .lock_message(&mut *tx, message_id)
            .await?
            .ok_or(AppError::ResourceNotFound("chat_message"))?;
        if message.sender_id != user_id {
            return Err(AppError::PermissionDenied("not_sender".into()));
        }
        if message.is_deleted {
            return Err(AppError::invalid("message_id", "message_deleted"));
        }
        self.chat_repo.edit_message(&mut *tx, message_id, content).await?;
        tx.commit().await?;

        self.chat_repo
            .message_view(message_id)
            .await?
            .ok_or(AppError::ResourceNotFound("chat_message"))
    }

    /// Exclusão lógica: a linha fica para manter as respostas encadeadas.
    pub async fn delete_message(&self, user_id: i64, message_id: i64) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        let message = self
            .chat_repo
            .lock_message(&mut *tx, message_id)
            .await?
            .ok_or(AppError::ResourceNotFound("chat_message"))?;
        if message.sender_id != user_id {
            return Err(AppError::PermissionDenied("not_sender".into()));
        }
        if !message.is_deleted {
            self.chat_repo.soft_delete_message(&mut *tx, message_id).await?;
        }
        tx.commit().await?;
        tracing::info!(message_id, room_id = message.room_id, "Mensagem excluída");
        Ok(())
    }

    // --- LEITURA ---

    pub async fn mark_read(&self, user_id: i64, room_id: i64) -> Result<u64, AppError> {
        self.ensure_member(room_id, user_id).await?;
        let mut tx = self.pool.begin().await?;
        let marked = self.chat_repo.mark_room_read(&mut tx, room_id, user_id).await?;
        tx.commit().await?;
        Ok(marked)
    }

    pub async fn read_statuses(&self, user_id: i64, message_ids: &[i64]) -> Result<std::collections::HashMap<i64, ReadStatus>, AppError> {
        if message_ids.is_empty() {
            return Ok(Default::default());
        }
        self.chat_repo.read_statuses(user_id, message_ids).await
    }

    // --- BUSCA E ESTATÍSTICAS ---

    pub async fn search_room(&self, user_id: i64, room_id: i64, term: &str) -> Result<Vec<SearchHit>, AppError> {
        self.ensure_member(room_id, user_id).await?;
        self.chat_repo.search_room(user_id, room_id, term).await
    }

    pub async fn search_all(&self, user_id: i64, term: &str) -> Result<Vec<SearchHit>, AppError> {
        self.chat_repo.search_all(user_id, term).await
    }

    pub async fn stats(&self, user_id: i64) -> Result<ChatStats, AppError> {
        let (rooms, unread_total, messages_today) = self.chat_repo.stats(user_id).await?;
        Ok(ChatStats { rooms, unread_total, messages_today })
    }

    // --- STREAM ---

    pub async fn room_ids_of(&self, user_id: i64) -> Result<Vec<i64>, AppError> {
        self.chat_repo.room_ids_of(user_id).await
    }

    pub async fn latest_message_id(&self, room_id: i64) -> Result<Option<i64>, AppError> {
        self.chat_repo.latest_message_id(room_id).await
    }

    pub async fn messages_after(&self, room_id: i64, after_id: i64, limit: i64) -> Result<Vec<ChatMessageView>, AppError> {
        self.chat_repo.messages_after(room_id, after_id, limit).await
    }
}

/// Demais membros, sem o criador e sem repetições.
fn other_members(creator_id: i64, user_ids: &[i64]) -> Vec<i64> {
    let mut ids: Vec<i64> = user_ids.iter().copied().filter(|id| *id != creator_id).collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// O outro membro de uma sala direta; `None` para grupos.
fn direct_partner(room_type: RoomType, others: &[i64]) -> Result<Option<i64>, AppError> {
    match (room_type, others) {
        (RoomType::Group, _) => Ok(None),
        (RoomType::Direct, [other]) => Ok(Some(*other)),
        (RoomType::Direct, _) => Err(AppError::invalid("user_ids", "direct_requires_one_member")),
    }
}

fn check_attachment(attachment: &AttachmentPayload, room_id: i64, max_bytes: i64) -> Result<(), AppError> {
    if attachment.file_size > max_bytes {
        return Err(AppError::invalid("attachments", "attachment_too_large"));
    }
    let path = attachment.file_path.as_str();
    if !path.starts_with(&attachment_dir(room_id)) || path.split('/').any(|part| part == "..") {
        return Err(AppError::invalid("attachments", "attachment_path_invalid"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(path: &str, size: i64) -> AttachmentPayload {
        AttachmentPayload {
            file_name: "bon.pdf".into(),
            file_path: path.into(),
            file_size: size,
            file_type: "application/pdf".into(),
            thumbnail_path: None,
        }
    }

    #[test]
    fn creator_and_duplicates_are_removed_from_members() {
        assert_eq!(other_members(1, &[3, 1, 3, 2]), vec![2, 3]);
        assert!(other_members(1, &[1]).is_empty());
    }

    #[test]
    fn attachment_must_live_under_the_room_directory() {
        assert!(check_attachment(&attachment("chat/7/bon.pdf", 10), 7, 100).is_ok());
        assert!(check_attachment(&attachment("chat/8/bon.pdf", 10), 7, 100).is_err());
        assert!(check_attachment(&attachment("chat/7/../8/bon.pdf", 10), 7, 100).is_err());
        assert!(check_attachment(&attachment("chat/70/bon.pdf", 10), 7, 100).is_err());
    }

    #[test]
    fn oversized_attachment_is_refused() {
        let err = check_attachment(&attachment("chat/7/bon.pdf", 101), 7, 100).expect_err("size");
        assert!(matches!(err, AppError::InvalidField { code: "attachment_too_large", .. }));
    }

    #[test]
    fn both_sides_of_a_direct_room_resolve_to_the_same_pair() {
        let (a, b) = (4, 9);
        let from_a = direct_partner(RoomType::Direct, &other_members(a, &[b, b, a])).expect("partner");
        let from_b = direct_partner(RoomType::Direct, &other_members(b, &[a])).expect("partner");
        assert_eq!(from_a, Some(b));
        assert_eq!(from_b, Some(a));
        assert_eq!(direct_pair_key(a, b), direct_pair_key(b, a));
    }

    #[test]
    fn direct_room_needs_exactly_one_other_member() {
        assert!(direct_partner(RoomType::Direct, &[2, 3]).is_err());
        assert!(direct_partner(RoomType::Direct, &[]).is_err());
        assert_eq!(direct_partner(RoomType::Group, &[2, 3]).expect("group"), None);
    }
}
