//! Address Book repository — the durable chat-id-to-folder mapping.

use std::sync::Arc;

use chrono::Utc;

use crate::models::chat_id::ChatId;
use crate::models::conversation::Conversation;
use crate::{AppError, Result};

use super::db::Database;

/// Repository wrapper around `SQLite` for conversation records.
#[derive(Clone)]
pub struct AddressBookRepo {
    db: Arc<Database>,
}

#[derive(sqlx::FromRow)]
struct ConversationRow {
    chat_id: String,
    folder: String,
    display_name: Option<String>,
    capabilities: String,
    trigger_token: String,
    requires_trigger: i64,
    container_overrides: Option<String>,
    is_main: i64,
    auto_registered: i64,
    created_at: String,
    last_active_at: String,
}

impl ConversationRow {
    fn into_conversation(self) -> Result<Conversation> {
        let chat_id = ChatId::parse(&self.chat_id)?;
        let capabilities: Vec<String> = serde_json::from_str(&self.capabilities)
            .map_err(|err| AppError::Db(format!("invalid capabilities json: {err}")))?;
        let container_overrides = self
            .container_overrides
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|err| AppError::Db(format!("invalid container_overrides json: {err}")))?;
        let created_at = chrono::DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|err| AppError::Db(format!("invalid created_at: {err}")))?
            .with_timezone(&Utc);
        let last_active_at = chrono::DateTime::parse_from_rfc3339(&self.last_active_at)
            .map_err(|err| AppError::Db(format!("invalid last_active_at: {err}")))?
            .with_timezone(&Utc);

        Ok(Conversation {
            chat_id,
            folder: self.folder,
            display_name: self.display_name,
            capabilities,
            trigger_token: self.trigger_token,
            requires_trigger: self.requires_trigger != 0,
            container_overrides,
            is_main: self.is_main != 0,
            auto_registered: self.auto_registered != 0,
            created_at,
            last_active_at,
        })
    }
}

impl AddressBookRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Look up the conversation registered for `chat_id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get(&self, chat_id: &ChatId) -> Result<Option<Conversation>> {
        let row: Option<ConversationRow> =
            sqlx::query_as("SELECT * FROM conversation WHERE chat_id = ?1")
                .bind(chat_id.as_str())
                .fetch_optional(self.db.as_ref())
                .await?;

        row.map(ConversationRow::into_conversation).transpose()
    }

    /// Insert or replace the conversation record for `conversation.chat_id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the write fails.
    pub async fn put(&self, conversation: &Conversation) -> Result<()> {
        let capabilities = serde_json::to_string(&conversation.capabilities)
            .map_err(|err| AppError::Db(format!("failed to serialize capabilities: {err}")))?;
        let container_overrides = conversation
            .container_overrides
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|err| AppError::Db(format!("failed to serialize container_overrides: {err}")))?;

        sqlx::query(
            "INSERT INTO conversation (chat_id, folder, display_name, capabilities, trigger_token,
             requires_trigger, container_overrides, is_main, auto_registered, created_at, last_active_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(chat_id) DO UPDATE SET
                folder = excluded.folder,
                display_name = excluded.display_name,
                capabilities = excluded.capabilities,
                trigger_token = excluded.trigger_token,
                requires_trigger = excluded.requires_trigger,
                container_overrides = excluded.container_overrides,
                is_main = excluded.is_main,
                auto_registered = excluded.auto_registered,
                last_active_at = excluded.last_active_at",
        )
        .bind(conversation.chat_id.as_str())
        .bind(&conversation.folder)
        .bind(&conversation.display_name)
        .bind(&capabilities)
        .bind(&conversation.trigger_token)
        .bind(i64::from(conversation.requires_trigger))
        .bind(container_overrides)
        .bind(i64::from(conversation.is_main))
        .bind(i64::from(conversation.auto_registered))
        .bind(conversation.created_at.to_rfc3339())
        .bind(conversation.last_active_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// List every registered conversation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list(&self) -> Result<Vec<Conversation>> {
        let rows: Vec<ConversationRow> = sqlx::query_as("SELECT * FROM conversation")
            .fetch_all(self.db.as_ref())
            .await?;

        rows.into_iter()
            .map(ConversationRow::into_conversation)
            .collect()
    }

    /// Alias `alias` onto the folder currently registered for `target`,
    /// inheriting its trigger/capability fields.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if `target` has no registered folder,
    /// or `AppError::Conflict` if `alias` is already registered to a
    /// *different* folder.
    pub async fn link(&self, alias: ChatId, target: &ChatId) -> Result<Conversation> {
        let target_conversation = self
            .get(target)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no conversation registered for {target}")))?;

        if let Some(existing) = self.get(&alias).await? {
            if existing.folder != target_conversation.folder {
                return Err(AppError::Conflict(format!(
                    "{alias} is already linked to folder {}",
                    existing.folder
                )));
            }
            return Ok(existing);
        }

        let now = Utc::now();
        let aliased = Conversation {
            chat_id: alias,
            folder: target_conversation.folder,
            display_name: target_conversation.display_name,
            capabilities: target_conversation.capabilities,
            trigger_token: target_conversation.trigger_token,
            requires_trigger: target_conversation.requires_trigger,
            container_overrides: target_conversation.container_overrides,
            is_main: false,
            auto_registered: false,
            created_at: now,
            last_active_at: now,
        };

        self.put(&aliased).await?;
        Ok(aliased)
    }

    /// Bump `last_active_at` to now for `chat_id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn update_last_seen(&self, chat_id: &ChatId) -> Result<()> {
        sqlx::query("UPDATE conversation SET last_active_at = ?1 WHERE chat_id = ?2")
            .bind(Utc::now().to_rfc3339())
            .bind(chat_id.as_str())
            .execute(self.db.as_ref())
            .await?;

        Ok(())
    }

    /// Update the display name for an already-registered `chat_id`. A
    /// no-op if the chat id has no conversation row — chat metadata never
    /// auto-registers a conversation on its own.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn update_display_name(&self, chat_id: &ChatId, display_name: &str) -> Result<()> {
        sqlx::query("UPDATE conversation SET display_name = ?1 WHERE chat_id = ?2")
            .bind(display_name)
            .bind(chat_id.as_str())
            .execute(self.db.as_ref())
            .await?;

        Ok(())
    }
}
