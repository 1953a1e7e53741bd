use super::{
    next_message_timestamp, ConversationStore, MembershipProvider, MessageStore, UserDirectory,
};
use crate::error::{AppError, AppResult, Resource};
use crate::models::{
    conversation::pair_key, Conversation, ConversationSummary, ConversationType, Message,
    MessagePage, MessageType, NewMessage, Reaction, ReadReceipt, ReplyPreview, UserSummary,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{GenericClient, Pool};
use std::collections::HashMap;
use tokio_postgres::Row;
use uuid::Uuid;

const MESSAGE_COLUMNS: &str = r#"
    m.id, m.conversation_id, m.sender_id, COALESCE(u.username, '') AS sender_username,
    m.content, m.message_type, m.file, m.is_deleted, m.created_at, m.updated_at,
    r.id AS reply_id, r.content AS reply_content,
    ru.username AS reply_sender_username, r.message_type AS reply_message_type
"#;

const MESSAGE_FROM: &str = r#"
    FROM messages m
    LEFT JOIN users u ON u.id = m.sender_id
    LEFT JOIN messages r ON r.id = m.reply_to_id
    LEFT JOIN users ru ON ru.id = r.sender_id
"#;

fn parse_message_type(raw: &str) -> AppResult<MessageType> {
    raw.parse()
        .map_err(|e: String| AppError::Database(format!("corrupt row: {e}")))
}

fn message_from_row(row: &Row) -> AppResult<Message> {
    let reply_id: Option<Uuid> = row.get("reply_id");
    let reply_to = match reply_id {
        Some(id) => {
            let reply_type: String = row.get("reply_message_type");
            Some(ReplyPreview {
                id,
                content: row.get("reply_content"),
                sender_username: row
                    .get::<_, Option<String>>("reply_sender_username")
                    .unwrap_or_default(),
                message_type: parse_message_type(&reply_type)?,
            })
        }
        None => None,
    };
    let message_type: String = row.get("message_type");

    Ok(Message {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        sender_id: row.get("sender_id"),
        sender_username: row.get("sender_username"),
        content: row.get("content"),
        message_type: parse_message_type(&message_type)?,
        file: row.get("file"),
        reply_to,
        is_deleted: row.get("is_deleted"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn receipt_from_row(row: &Row) -> ReadReceipt {
    ReadReceipt {
        id: row.get("id"),
        message_id: row.get("message_id"),
        user_id: row.get("user_id"),
        read_at: row.get("read_at"),
    }
}

fn reaction_from_row(row: &Row) -> Reaction {
    Reaction {
        id: row.get("id"),
        message_id: row.get("message_id"),
        user_id: row.get("user_id"),
        emoji: row.get("emoji"),
        created_at: row.get("created_at"),
    }
}

fn conversation_type(row: &Row) -> AppResult<ConversationType> {
    let raw: String = row.get("conversation_type");
    ConversationType::from_db(&raw)
        .ok_or_else(|| AppError::Database(format!("corrupt row: conversation_type `{raw}`")))
}

/// PostgreSQL-backed store (`deadpool-postgres` + `tokio-postgres`)
#[derive(Clone)]
pub struct PgChatStore {
    pool: Pool,
}

impl PgChatStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Mirror a user from the account service; used by tooling and tests
    pub async fn upsert_user(&self, id: Uuid, username: &str) -> AppResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO users (id, username) VALUES ($1, $2)
                 ON CONFLICT (id) DO UPDATE SET username = EXCLUDED.username",
                &[&id, &username],
            )
            .await?;
        Ok(())
    }

    async fn load_conversation<C: GenericClient>(client: &C, id: Uuid) -> AppResult<Conversation> {
        let row = client
            .query_opt(
                "SELECT id, conversation_type, created_at, updated_at
                 FROM conversations WHERE id = $1",
                &[&id],
            )
            .await?
            .ok_or(AppError::NotFound(Resource::Conversation))?;

        let participants = client
            .query(
                "SELECT user_id FROM conversation_participants
                 WHERE conversation_id = $1 ORDER BY position",
                &[&id],
            )
            .await?
            .iter()
            .map(|r| r.get::<_, Uuid>("user_id"))
            .collect();

        Ok(Conversation {
            id: row.get("id"),
            conversation_type: conversation_type(&row)?,
            participants,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    async fn ensure_conversation<C: GenericClient>(client: &C, id: Uuid) -> AppResult<()> {
        client
            .query_opt("SELECT 1 FROM conversations WHERE id = $1", &[&id])
            .await?
            .ok_or(AppError::NotFound(Resource::Conversation))?;
        Ok(())
    }

    async fn ensure_message<C: GenericClient>(client: &C, id: Uuid) -> AppResult<()> {
        client
            .query_opt("SELECT 1 FROM messages WHERE id = $1", &[&id])
            .await?
            .ok_or(AppError::NotFound(Resource::Message))?;
        Ok(())
    }

    async fn fetch_message<C: GenericClient>(client: &C, id: Uuid) -> AppResult<Message> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} {MESSAGE_FROM} WHERE m.id = $1");
        let row = client
            .query_opt(sql.as_str(), &[&id])
            .await?
            .ok_or(AppError::NotFound(Resource::Message))?;
        message_from_row(&row)
    }
}

#[async_trait]
impl MessageStore for PgChatStore {
    async fn create_message(&self, new: NewMessage) -> AppResult<Message> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        // Row lock serializes writers of one conversation, so MAX(created_at)
        // below cannot race.
        tx.query_opt(
            "SELECT id FROM conversations WHERE id = $1 FOR UPDATE",
            &[&new.conversation_id],
        )
        .await?
        .ok_or(AppError::NotFound(Resource::Conversation))?;

        let reply_to_id = match new.reply_to_id {
            Some(id) => tx
                .query_opt(
                    "SELECT id FROM messages WHERE id = $1 AND conversation_id = $2",
                    &[&id, &new.conversation_id],
                )
                .await?
                .map(|_| id),
            None => None,
        };

        let last: Option<DateTime<Utc>> = tx
            .query_one(
                "SELECT MAX(created_at) FROM messages WHERE conversation_id = $1",
                &[&new.conversation_id],
            )
            .await?
            .get(0);
        let created_at = next_message_timestamp(last);
        let id = Uuid::new_v4();

        tx.execute(
            "INSERT INTO messages
                (id, conversation_id, sender_id, content, message_type, file, reply_to_id,
                 created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)",
            &[
                &id,
                &new.conversation_id,
                &new.sender_id,
                &new.content,
                &new.message_type.to_db(),
                &new.file,
                &reply_to_id,
                &created_at,
            ],
        )
        .await?;

        tx.execute(
            "UPDATE conversations SET updated_at = $2 WHERE id = $1",
            &[&new.conversation_id, &created_at],
        )
        .await?;

        let message = Self::fetch_message(&tx, id).await?;
        tx.commit().await?;

        Ok(message)
    }

    async fn get_message(&self, id: Uuid) -> AppResult<Message> {
        let client = self.pool.get().await?;
        Self::fetch_message(&client, id).await
    }

    async fn upsert_read_receipt(
        &self,
        message_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<ReadReceipt> {
        let client = self.pool.get().await?;
        Self::ensure_message(&client, message_id).await?;

        let inserted = client
            .query_opt(
                "INSERT INTO message_reads (id, message_id, user_id)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (message_id, user_id) DO NOTHING
                 RETURNING id, message_id, user_id, read_at",
                &[&Uuid::new_v4(), &message_id, &user_id],
            )
            .await?;

        let row = match inserted {
            Some(row) => row,
            None => {
                client
                    .query_one(
                        "SELECT id, message_id, user_id, read_at FROM message_reads
                         WHERE message_id = $1 AND user_id = $2",
                        &[&message_id, &user_id],
                    )
                    .await?
            }
        };

        Ok(receipt_from_row(&row))
    }

    async fn upsert_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> AppResult<Reaction> {
        let client = self.pool.get().await?;
        Self::ensure_message(&client, message_id).await?;

        let inserted = client
            .query_opt(
                "INSERT INTO message_reactions (id, message_id, user_id, emoji)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (message_id, user_id, emoji) DO NOTHING
                 RETURNING id, message_id, user_id, emoji, created_at",
                &[&Uuid::new_v4(), &message_id, &user_id, &emoji],
            )
            .await?;

        let row = match inserted {
            Some(row) => row,
            None => {
                client
                    .query_one(
                        "SELECT id, message_id, user_id, emoji, created_at FROM message_reactions
                         WHERE message_id = $1 AND user_id = $2 AND emoji = $3",
                        &[&message_id, &user_id, &emoji],
                    )
                    .await?
            }
        };

        Ok(reaction_from_row(&row))
    }

    async fn list_participants(&self, conversation_id: Uuid) -> AppResult<Vec<Uuid>> {
        let client = self.pool.get().await?;
        Ok(Self::load_conversation(&client, conversation_id)
            .await?
            .participants)
    }
}

#[async_trait]
impl ConversationStore for PgChatStore {
    async fn get_or_create_direct(&self, user_a: Uuid, user_b: Uuid) -> AppResult<Conversation> {
        if user_a == user_b {
            return Err(AppError::BadRequest(
                "cannot start a conversation with yourself".into(),
            ));
        }

        let key = pair_key(user_a, user_b);
        let mut client = self.pool.get().await?;

        if let Some(row) = client
            .query_opt("SELECT id FROM conversations WHERE pair_key = $1", &[&key])
            .await?
        {
            return Self::load_conversation(&client, row.get("id")).await;
        }

        let tx = client.transaction().await?;
        // A concurrent creator makes this insert wait, then do nothing.
        let created = tx
            .query_opt(
                "INSERT INTO conversations (id, conversation_type, pair_key)
                 VALUES ($1, 'direct', $2)
                 ON CONFLICT (pair_key) DO NOTHING
                 RETURNING id",
                &[&Uuid::new_v4(), &key],
            )
            .await?;

        let id: Uuid = match created {
            Some(row) => {
                let id: Uuid = row.get("id");
                for (position, user_id) in [user_a, user_b].iter().enumerate() {
                    tx.execute(
                        "INSERT INTO conversation_participants (conversation_id, user_id, position)
                         VALUES ($1, $2, $3)",
                        &[&id, user_id, &(position as i32)],
                    )
                    .await?;
                }
                id
            }
            None => tx
                .query_one("SELECT id FROM conversations WHERE pair_key = $1", &[&key])
                .await?
                .get("id"),
        };

        let conversation = Self::load_conversation(&tx, id).await?;
        tx.commit().await?;

        tracing::debug!(conversation_id = %conversation.id, "direct conversation resolved");
        Ok(conversation)
    }

    async fn get_conversation(&self, id: Uuid) -> AppResult<Conversation> {
        let client = self.pool.get().await?;
        Self::load_conversation(&client, id).await
    }

    async fn list_conversations(&self, user_id: Uuid) -> AppResult<Vec<ConversationSummary>> {
        let client = self.pool.get().await?;

        let rows = client
            .query(
                "SELECT c.id, c.conversation_type, c.created_at, c.updated_at
                 FROM conversations c
                 JOIN conversation_participants p ON p.conversation_id = c.id
                 WHERE p.user_id = $1
                 ORDER BY c.updated_at DESC",
                &[&user_id],
            )
            .await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = rows.iter().map(|r| r.get("id")).collect();

        let mut participants: HashMap<Uuid, Vec<UserSummary>> = HashMap::new();
        for row in client
            .query(
                "SELECT p.conversation_id, p.user_id, COALESCE(u.username, '') AS username
                 FROM conversation_participants p
                 LEFT JOIN users u ON u.id = p.user_id
                 WHERE p.conversation_id = ANY($1)
                 ORDER BY p.conversation_id, p.position",
                &[&ids],
            )
            .await?
        {
            participants
                .entry(row.get("conversation_id"))
                .or_default()
                .push(UserSummary {
                    id: row.get("user_id"),
                    username: row.get("username"),
                });
        }

        let last_sql = format!(
            "SELECT DISTINCT ON (m.conversation_id) {MESSAGE_COLUMNS} {MESSAGE_FROM}
             WHERE m.conversation_id = ANY($1) AND NOT m.is_deleted
             ORDER BY m.conversation_id, m.created_at DESC"
        );
        let mut last_messages: HashMap<Uuid, Message> = HashMap::new();
        for row in client.query(last_sql.as_str(), &[&ids]).await? {
            let message = message_from_row(&row)?;
            last_messages.insert(message.conversation_id, message);
        }

        let mut unread: HashMap<Uuid, i64> = HashMap::new();
        for row in client
            .query(
                "SELECT m.conversation_id, COUNT(*) AS unread
                 FROM messages m
                 WHERE m.conversation_id = ANY($1)
                   AND m.sender_id <> $2
                   AND NOT m.is_deleted
                   AND NOT EXISTS (
                       SELECT 1 FROM message_reads r
                       WHERE r.message_id = m.id AND r.user_id = $2
                   )
                 GROUP BY m.conversation_id",
                &[&ids, &user_id],
            )
            .await?
        {
            unread.insert(row.get("conversation_id"), row.get("unread"));
        }

        rows.iter()
            .map(|row| {
                let id: Uuid = row.get("id");
                let kind = conversation_type(row)?;
                let members = participants.remove(&id).unwrap_or_default();
                let other_user = match kind {
                    ConversationType::Direct => members.iter().find(|u| u.id != user_id).cloned(),
                    ConversationType::Group => None,
                };
                Ok(ConversationSummary {
                    id,
                    conversation_type: kind,
                    participants: members,
                    last_message: last_messages.remove(&id),
                    unread_count: unread.get(&id).copied().unwrap_or(0),
                    other_user,
                    created_at: row.get("created_at"),
                    updated_at: row.get("updated_at"),
                })
            })
            .collect()
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        page: MessagePage,
    ) -> AppResult<Vec<Message>> {
        let client = self.pool.get().await?;
        Self::ensure_conversation(&client, conversation_id).await?;
        let limit = page.effective_limit();

        let rows = match page.before {
            Some(before) => {
                let cutoff: DateTime<Utc> = client
                    .query_opt(
                        "SELECT created_at FROM messages WHERE id = $1 AND conversation_id = $2",
                        &[&before, &conversation_id],
                    )
                    .await?
                    .ok_or(AppError::NotFound(Resource::Message))?
                    .get("created_at");
                let sql = format!(
                    "SELECT {MESSAGE_COLUMNS} {MESSAGE_FROM}
                     WHERE m.conversation_id = $1 AND NOT m.is_deleted AND m.created_at < $2
                     ORDER BY m.created_at DESC LIMIT $3"
                );
                client
                    .query(sql.as_str(), &[&conversation_id, &cutoff, &limit])
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {MESSAGE_COLUMNS} {MESSAGE_FROM}
                     WHERE m.conversation_id = $1 AND NOT m.is_deleted
                     ORDER BY m.created_at DESC LIMIT $2"
                );
                client.query(sql.as_str(), &[&conversation_id, &limit]).await?
            }
        };

        let mut messages = rows
            .iter()
            .map(message_from_row)
            .collect::<AppResult<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }

    async fn mark_conversation_read(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<u64> {
        let client = self.pool.get().await?;
        Self::ensure_conversation(&client, conversation_id).await?;

        let marked = client
            .execute(
                "INSERT INTO message_reads (id, message_id, user_id)
                 SELECT gen_random_uuid(), m.id, $2
                 FROM messages m
                 WHERE m.conversation_id = $1
                   AND m.sender_id <> $2
                   AND NOT m.is_deleted
                   AND NOT EXISTS (
                       SELECT 1 FROM message_reads r
                       WHERE r.message_id = m.id AND r.user_id = $2
                   )
                 ON CONFLICT (message_id, user_id) DO NOTHING",
                &[&conversation_id, &user_id],
            )
            .await?;

        Ok(marked)
    }

    async fn soft_delete_message(&self, message_id: Uuid, user_id: Uuid) -> AppResult<Message> {
        let client = self.pool.get().await?;

        let sender_id: Uuid = client
            .query_opt("SELECT sender_id FROM messages WHERE id = $1", &[&message_id])
            .await?
            .ok_or(AppError::NotFound(Resource::Message))?
            .get("sender_id");
        if sender_id != user_id {
            return Err(AppError::Forbidden);
        }

        client
            .execute(
                "UPDATE messages SET is_deleted = TRUE, updated_at = now()
                 WHERE id = $1 AND NOT is_deleted",
                &[&message_id],
            )
            .await?;

        Self::fetch_message(&client, message_id).await
    }
}

#[async_trait]
impl MembershipProvider for PgChatStore {
    async fn is_participant(&self, user_id: Uuid, conversation_id: Uuid) -> AppResult<bool> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT EXISTS (
                     SELECT 1 FROM conversation_participants
                     WHERE conversation_id = $1 AND user_id = $2
                 )",
                &[&conversation_id, &user_id],
            )
            .await?;
        Ok(row.get(0))
    }
}

#[async_trait]
impl UserDirectory for PgChatStore {
    async fn find_user(&self, user_id: Uuid) -> AppResult<Option<UserSummary>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT id, username FROM users WHERE id = $1 AND is_active",
                &[&user_id],
            )
            .await?;
        Ok(row.map(|r| UserSummary {
            id: r.get("id"),
            username: r.get("username"),
        }))
    }
}
