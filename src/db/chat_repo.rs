// src/db/chat_repo.rs

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{Executor, PgConnection, PgPool, Postgres};

use crate::{
    common::error::{map_unique_violation, AppError},
    models::chat::{
        AttachmentPayload, ChatAttachment, ChatMessageRow, ChatMessageView, ChatRoom, MemberRole, MessageType,
        ReadStatus, RoomSummaryRow, RoomType, SearchHit, DELETED_PLACEHOLDER, GLOBAL_SEARCH_LIMIT,
        ROOM_SEARCH_LIMIT,
    },
};

// Não lida: de outro membro, não apagada, posterior ao `last_read_at` de quem olha.
// `cm` é a mensagem e `me` a linha de membro de quem olha.
macro_rules! unread_filter {
    () => {
        " NOT cm.is_deleted AND cm.sender_id <> me.user_id \
          AND (me.last_read_at IS NULL OR cm.created_at > me.last_read_at) "
    };
}

// $1 = usuário que está olhando. Salas diretas levam o nome do outro membro.
const ROOM_SUMMARY: &str = concat!(
    r#"
    SELECT r.id,
           CASE WHEN r.room_type = 'direct'
                THEN COALESCE((SELECT ou.username FROM chat_room_members om
                               JOIN users ou ON ou.id = om.user_id
                               WHERE om.room_id = r.id AND om.user_id <> $1 LIMIT 1), 'Direct')
                ELSE COALESCE(r.name, 'Groupe')
           END AS display_name,
           r.room_type, r.updated_at,
           lm.id AS last_message_id, lm.sender_id AS last_message_sender_id,
           lm.content AS last_message_content, lu.username AS last_message_sender,
           lm.created_at AS last_message_at,
           (SELECT COUNT(*) FROM chat_messages cm
            WHERE cm.room_id = r.id AND"#,
    unread_filter!(),
    r#") AS unread_count
    FROM chat_rooms r
    JOIN chat_room_members me ON me.room_id = r.id AND me.user_id = $1
    LEFT JOIN LATERAL (
        SELECT id, sender_id, content, created_at FROM chat_messages
        WHERE room_id = r.id AND NOT is_deleted
        ORDER BY created_at DESC, id DESC
        LIMIT 1
    ) lm ON TRUE
    LEFT JOIN users lu ON lu.id = lm.sender_id
"#
);

// $1 = sala, $2 = usuário que leu
const MARK_ROOM_READ: &str = concat!(
    r#"
    INSERT INTO chat_message_reads (message_id, user_id)
    SELECT cm.id, $2
    FROM chat_messages cm
    JOIN chat_room_members me ON me.room_id = cm.room_id AND me.user_id = $2
    WHERE cm.room_id = $1 AND"#,
    unread_filter!(),
    r#"
    ON CONFLICT DO NOTHING
"#
);

// $1 = usuário: salas, não lidas no total e mensagens enviadas hoje
const CHAT_STATS: &str = concat!(
    r#"
    SELECT
        (SELECT COUNT(*) FROM chat_room_members WHERE user_id = $1),
        (SELECT COUNT(*) FROM chat_messages cm
         JOIN chat_room_members me ON me.room_id = cm.room_id AND me.user_id = $1
         WHERE"#,
    unread_filter!(),
    r#"),
        (SELECT COUNT(*) FROM chat_messages
         WHERE sender_id = $1 AND created_at >= date_trunc('day', NOW()))
"#
);

const MESSAGE_VIEW: &str = r#"
    SELECT m.id, m.room_id, m.sender_id, u.username AS sender_name, m.content, m.message_type,
           m.reply_to_id, ru.username AS reply_sender_name, rm.content AS reply_content,
           m.is_edited, m.edited_at, m.is_deleted, m.created_at
    FROM chat_messages m
    JOIN users u ON u.id = m.sender_id
    LEFT JOIN chat_messages rm ON rm.id = m.reply_to_id
    LEFT JOIN users ru ON ru.id = rm.sender_id
"#;

/// Dados mínimos para checar autoria antes de editar/apagar.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MessageOwnership {
    pub id: i64,
    pub room_id: i64,
    pub sender_id: i64,
    pub is_deleted: bool,
}

/// Escapa `%`, `_` e `\` para uso literal num ILIKE.
fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

#[derive(Clone)]
pub struct ChatRepository {
    pool: PgPool,
}

impl ChatRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ---
    // Salas e membros
    // ---

    pub async fn list_rooms(&self, user_id: i64) -> Result<Vec<RoomSummaryRow>, AppError> {
        let sql = format!("{ROOM_SUMMARY} ORDER BY r.updated_at DESC, r.id DESC");
        Ok(sqlx::query_as::<_, RoomSummaryRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn room_summary(&self, user_id: i64, room_id: i64) -> Result<Option<RoomSummaryRow>, AppError> {
        let sql = format!("{ROOM_SUMMARY} WHERE r.id = $2");
        Ok(sqlx::query_as::<_, RoomSummaryRow>(&sql)
            .bind(user_id)
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Sala direta que contém exatamente o par `{a, b}`.
    pub async fn find_direct_room<'e, E>(&self, executor: E, a: i64, b: i64) -> Result<Option<i64>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        Ok(sqlx::query_scalar::<_, i64>(
            r#"
            SELECT r.id
            FROM chat_rooms r
            JOIN chat_room_members m ON m.room_id = r.id
            WHERE r.room_type = 'direct'
            GROUP BY r.id
            HAVING COUNT(*) = 2 AND bool_and(m.user_id IN ($1, $2)) AND COUNT(DISTINCT m.user_id) = 2
            ORDER BY r.id
            LIMIT 1
            "#,
        )
        .bind(a)
        .bind(b)
        .fetch_optional(executor)
        .await?)
    }

    pub async fn insert_room<'e, E>(
        &self,
        executor: E,
        name: Option<&str>,
        room_type: RoomType,
        created_by: i64,
        direct_pair_key: Option<&str>,
    ) -> Result<ChatRoom, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, ChatRoom>(
            r#"
            INSERT INTO chat_rooms (name, room_type, created_by_id, direct_pair_key)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, room_type, created_by_id, created_at, updated_at
            "#,
        )
        .bind(name)
        .bind(room_type)
        .bind(created_by)
        .bind(direct_pair_key)
        .fetch_one(executor)
        .await
        .map_err(|e| map_unique_violation(e, "duplicate_direct_room"))
    }

    pub async fn add_member<'e, E>(&self, executor: E, room_id: i64, user_id: i64, role: MemberRole) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            INSERT INTO chat_room_members (room_id, user_id, role)
            VALUES ($1, $2, $3)
            ON CONFLICT (room_id, user_id) DO NOTHING
            "#,
        )
        .bind(room_id)
        .bind(user_id)
        .bind(role)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn is_member(&self, room_id: i64, user_id: i64) -> Result<bool, AppError> {
        Ok(sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM chat_room_members WHERE room_id = $1 AND user_id = $2)",
        )
        .bind(room_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?)
    }

    pub async fn member_ids(&self, room_id: i64) -> Result<Vec<i64>, AppError> {
        Ok(sqlx::query_scalar::<_, i64>("SELECT user_id FROM chat_room_members WHERE room_id = $1 ORDER BY user_id")
            .bind(room_id)
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn room_ids_of(&self, user_id: i64) -> Result<Vec<i64>, AppError> {
        Ok(sqlx::query_scalar::<_, i64>("SELECT room_id FROM chat_room_members WHERE user_id = $1 ORDER BY room_id")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Quantos dos ids informados são usuários ativos.
    pub async fn count_active_users<'e, E>(&self, executor: E, user_ids: &[i64]) -> Result<i64, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        Ok(sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE is_active AND id = ANY($1)")
            .bind(user_ids)
            .fetch_one(executor)
            .await?)
    }

    pub async fn touch_room<'e, E>(&self, executor: E, room_id: i64) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query("UPDATE chat_rooms SET updated_at = NOW() WHERE id = $1")
            .bind(room_id)
            .execute(executor)
            .await?;
        Ok(())
    }

    // ---
    // Mensagens
    // ---

    /// `true` quando `reply_id` é uma mensagem viva da mesma sala.
    pub async fn reply_target_valid<'e, E>(&self, executor: E, room_id: i64, reply_id: i64) -> Result<bool, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        Ok(sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM chat_messages WHERE id = $1 AND room_id = $2 AND NOT is_deleted)",
        )
        .bind(reply_id)
        .bind(room_id)
        .fetch_one(executor)
        .await?)
    }

    pub async fn insert_message<'e, E>(
        &self,
        executor: E,
        room_id: i64,
        sender_id: i64,
        content: &str,
        message_type: MessageType,
        reply_to_id: Option<i64>,
    ) -> Result<i64, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        Ok(sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO chat_messages (room_id, sender_id, content, message_type, reply_to_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(room_id)
        .bind(sender_id)
        .bind(content)
        .bind(message_type)
        .bind(reply_to_id)
        .fetch_one(executor)
        .await?)
    }

    pub async fn insert_attachment<'e, E>(
        &self,
        executor: E,
        message_id: i64,
        attachment: &AttachmentPayload,
    ) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            INSERT INTO chat_attachments (message_id, file_name, file_path, file_size, file_type, is_image, thumbnail_path)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(message_id)
        .bind(&attachment.file_name)
        .bind(&attachment.file_path)
        .bind(attachment.file_size)
        .bind(&attachment.file_type)
        .bind(attachment.is_image())
        .bind(attachment.thumbnail_path.as_deref())
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn mark_read_by<'e, E>(&self, executor: E, message_id: i64, user_id: i64) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            "INSERT INTO chat_message_reads (message_id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(message_id)
        .bind(user_id)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn set_last_read<'e, E>(
        &self,
        executor: E,
        room_id: i64,
        user_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            UPDATE chat_room_members
            SET last_read_at = GREATEST(COALESCE(last_read_at, $3), $3)
            WHERE room_id = $1 AND user_id = $2
            "#,
        )
        .bind(room_id)
        .bind(user_id)
        .bind(at)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Registra leitura de toda mensagem não lida de outros membros e avança `last_read_at`.
    /// Devolve quantas leituras novas foram gravadas.
    pub async fn mark_room_read(&self, conn: &mut PgConnection, room_id: i64, user_id: i64) -> Result<u64, AppError> {
        let inserted = sqlx::query(MARK_ROOM_READ)
            .bind(room_id)
            .bind(user_id)
            .execute(&mut *conn)
            .await?
            .rows_affected();

        // Marca até a mensagem mais recente da sala, não até o relógio da transação.
        sqlx::query(
            r#"
            UPDATE chat_room_members me
            SET last_read_at = GREATEST(
                COALESCE(me.last_read_at, '-infinity'::timestamptz),
                COALESCE((SELECT MAX(created_at) FROM chat_messages WHERE room_id = $1), NOW()),
                NOW()
            )
            WHERE me.room_id = $1 AND me.user_id = $2
            "#,
        )
        .bind(room_id)
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

        Ok(inserted)
    }

    pub async fn lock_message<'e, E>(&self, executor: E, message_id: i64) -> Result<Option<MessageOwnership>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        Ok(sqlx::query_as::<_, MessageOwnership>(
            "SELECT id, room_id, sender_id, is_deleted FROM chat_messages WHERE id = $1 FOR UPDATE",
        )
        .bind(message_id)
        .fetch_optional(executor)
        .await?)
    }

    pub async fn edit_message<'e, E>(&self, executor: E, message_id: i64, content: &str) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query("UPDATE chat_messages SET content = $2, is_edited = TRUE, edited_at = NOW() WHERE id = $1")
            .bind(message_id)
            .bind(content)
            .execute(executor)
            .await?;
        Ok(())
    }

    pub async fn soft_delete_message<'e, E>(&self, executor: E, message_id: i64) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query("UPDATE chat_messages SET is_deleted = TRUE, deleted_at = NOW(), content = $2 WHERE id = $1")
            .bind(message_id)
            .bind(DELETED_PLACEHOLDER)
            .execute(executor)
            .await?;
        Ok(())
    }

    // ---
    // Leitura de mensagens
    // ---

    pub async fn message_view(&self, message_id: i64) -> Result<Option<ChatMessageView>, AppError> {
        let sql = format!("{MESSAGE_VIEW} WHERE m.id = $1");
        let row = sqlx::query_as::<_, ChatMessageRow>(&sql)
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(self.with_attachments(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    /// Com `since`: as primeiras `limit` depois do instante. Sem: as últimas `limit`. Sempre em ordem crescente.
    pub async fn list_messages(
        &self,
        room_id: i64,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<ChatMessageView>, AppError> {
        let rows = match since {
            Some(since) => {
                let sql = format!(
                    "{MESSAGE_VIEW} WHERE m.room_id = $1 AND m.created_at > $2 ORDER BY m.created_at ASC, m.id ASC LIMIT $3"
                );
                sqlx::query_as::<_, ChatMessageRow>(&sql)
                    .bind(room_id)
                    .bind(since)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "{MESSAGE_VIEW} WHERE m.room_id = $1 ORDER BY m.created_at DESC, m.id DESC LIMIT $2"
                );
                let mut rows = sqlx::query_as::<_, ChatMessageRow>(&sql)
                    .bind(room_id)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?;
                rows.reverse();
                rows
            }
        };
        self.with_attachments(rows).await
    }

    pub async fn latest_message_id(&self, room_id: i64) -> Result<Option<i64>, AppError> {
        let id = sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(id) FROM chat_messages WHERE room_id = $1")
            .bind(room_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    /// Mensagens com id maior que o cursor, em ordem crescente. Usado na retomada do stream.
    pub async fn messages_after(&self, room_id: i64, after_id: i64, limit: i64) -> Result<Vec<ChatMessageView>, AppError> {
        let sql = format!(
            "{MESSAGE_VIEW} WHERE m.room_id = $1 AND m.id > $2 ORDER BY m.created_at ASC, m.id ASC LIMIT $3"
        );
        let rows = sqlx::query_as::<_, ChatMessageRow>(&sql)
            .bind(room_id)
            .bind(after_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        self.with_attachments(rows).await
    }

    async fn with_attachments(&self, rows: Vec<ChatMessageRow>) -> Result<Vec<ChatMessageView>, AppError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let attachments = sqlx::query_as::<_, ChatAttachment>(
            r#"
            SELECT id, message_id, file_name, file_path, file_size, file_type, is_image, thumbnail_path
            FROM chat_attachments
            WHERE message_id = ANY($1)
            ORDER BY id
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_message: HashMap<i64, Vec<ChatAttachment>> = HashMap::new();
        for att in attachments {
            by_message.entry(att.message_id).or_default().push(att);
        }
        Ok(rows
            .into_iter()
            .map(|row| {
                let atts = by_message.remove(&row.id).unwrap_or_default();
                row.into_view(atts)
            })
            .collect())
    }

    // ---
    // Status de leitura, busca e estatísticas
    // ---

    /// Só devolve mensagens de salas das quais `user_id` é membro.
    pub async fn read_statuses(&self, user_id: i64, message_ids: &[i64]) -> Result<HashMap<i64, ReadStatus>, AppError> {
        let rows: Vec<(i64, i64, i64)> = sqlx::query_as(
            r#"
            SELECT cm.id,
                   (SELECT COUNT(*) FROM chat_message_reads r
                    WHERE r.message_id = cm.id AND r.user_id <> cm.sender_id) AS read_count,
                   (SELECT COUNT(*) FROM chat_room_members mm WHERE mm.room_id = cm.room_id) - 1 AS total_members
            FROM chat_messages cm
            JOIN chat_room_members me ON me.room_id = cm.room_id AND me.user_id = $1
            WHERE cm.id = ANY($2)
            "#,
        )
        .bind(user_id)
        .bind(message_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, read_count, total_members)| (id, ReadStatus { read_count, total_members }))
            .collect())
    }

    pub async fn search_room(&self, user_id: i64, room_id: i64, term: &str) -> Result<Vec<SearchHit>, AppError> {
        self.search(user_id, Some(room_id), term, ROOM_SEARCH_LIMIT).await
    }

    pub async fn search_all(&self, user_id: i64, term: &str) -> Result<Vec<SearchHit>, AppError> {
        self.search(user_id, None, term, GLOBAL_SEARCH_LIMIT).await
    }

    async fn search(&self, user_id: i64, room_id: Option<i64>, term: &str, limit: i64) -> Result<Vec<SearchHit>, AppError> {
        Ok(sqlx::query_as::<_, SearchHit>(
            r#"
            SELECT cm.id, cm.room_id,
                   CASE WHEN r.room_type = 'direct'
                        THEN COALESCE((SELECT ou.username FROM chat_room_members om
                                       JOIN users ou ON ou.id = om.user_id
                                       WHERE om.room_id = r.id AND om.user_id <> $1 LIMIT 1), 'Direct')
                        ELSE COALESCE(r.name, 'Groupe')
                   END AS room_name,
                   u.username AS sender_name, cm.content, cm.created_at
            FROM chat_messages cm
            JOIN chat_rooms r ON r.id = cm.room_id
            JOIN chat_room_members me ON me.room_id = cm.room_id AND me.user_id = $1
            JOIN users u ON u.id = cm.sender_id
            WHERE NOT cm.is_deleted
              AND cm.content ILIKE $2
              AND ($3::BIGINT IS NULL OR cm.room_id = $3)
            ORDER BY cm.created_at DESC, cm.id DESC
            LIMIT $4
            "#,
        )
        .bind(user_id)
        .bind(like_pattern(term))
        .bind(room_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    /// (salas, não lidas no total, mensagens enviadas hoje)
    pub async fn stats(&self, user_id: i64) -> Result<(i64, i64, i64), AppError> {
        Ok(sqlx::query_as::<_, (i64, i64, i64)>(CHAT_STATS)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unread_count_and_mark_read_share_one_definition() {
        let unread = unread_filter!();
        assert!(ROOM_SUMMARY.contains(unread));
        assert!(MARK_ROOM_READ.contains(unread));
        assert!(CHAT_STATS.contains(unread));
        // mensagens próprias e apagadas nunca contam
        assert!(unread.contains("cm.sender_id <> me.user_id"));
        assert!(unread.contains("NOT cm.is_deleted"));
        assert!(unread.contains("cm.created_at > me.last_read_at"));
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("riz"), "%riz%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern("a\\b"), "%a\\\\b%");
    }
}
