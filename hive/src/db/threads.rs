//! Thread and message rows. Message ids are assigned at insert and are the
//! authoritative ordering; reads always return ascending ids.

use rusqlite::{params, Row};
use serde_json::Value;

use super::{sql_to_ts, ts_to_sql, Db};
use crate::error::HiveError;
use crate::model::{MessageRole, Thread, ThreadMessage, ThreadType};

/// Insert parameters for one message.
#[derive(Clone, Debug)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
    pub tool_calls: Option<Value>,
    pub tool_call_id: Option<String>,
    pub tool_name: Option<String>,
    pub parent_id: Option<i64>,
    pub processed: bool,
}

impl NewMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            tool_name: None,
            parent_id: None,
            processed: false,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            tool_name: None,
            parent_id: None,
            processed: true,
        }
    }
}

fn row_to_thread(row: &Row<'_>) -> Result<Thread, HiveError> {
    let thread_type: String = row.get(3)?;
    Ok(Thread {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        title: row.get(2)?,
        thread_type: ThreadType::parse(&thread_type).unwrap_or(ThreadType::Chat),
        active: row.get::<_, i64>(4)? != 0,
        created_at: sql_to_ts(&row.get::<_, String>(5)?)?,
        updated_at: sql_to_ts(&row.get::<_, String>(6)?)?,
    })
}

fn row_to_message(row: &Row<'_>) -> Result<ThreadMessage, HiveError> {
    let role: String = row.get(2)?;
    let tool_calls: Option<String> = row.get(4)?;
    Ok(ThreadMessage {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        role: MessageRole::parse(&role).unwrap_or(MessageRole::User),
        content: row.get(3)?,
        tool_calls: tool_calls.map(|s| serde_json::from_str(&s)).transpose()?,
        tool_call_id: row.get(5)?,
        tool_name: row.get(6)?,
        sent_at: sql_to_ts(&row.get::<_, String>(7)?)?,
        parent_id: row.get(8)?,
        processed: row.get::<_, i64>(9)? != 0,
    })
}

const MESSAGE_COLUMNS: &str =
    "id, thread_id, role, content, tool_calls, tool_call_id, tool_name, sent_at, parent_id, processed";

impl Db {
    /// Creates a thread seeded with its system message as message 0.
    pub async fn create_thread(
        &self,
        agent_id: i64,
        title: &str,
        thread_type: ThreadType,
        active: bool,
        system_message: &str,
    ) -> Result<Thread, HiveError> {
        let title = title.to_string();
        let system_message = system_message.to_string();
        let now = ts_to_sql(chrono::Utc::now());
        let id = self
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO threads (agent_id, title, thread_type, active, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                    params![agent_id, title, thread_type.as_str(), active as i64, now],
                )?;
                let thread_id = conn.last_insert_rowid();
                conn.execute(
                    "INSERT INTO thread_messages (thread_id, role, content, sent_at, processed)
                     VALUES (?1, 'system', ?2, ?3, 1)",
                    params![thread_id, system_message, now],
                )?;
                Ok(thread_id)
            })
            .await?;
        self.get_thread(id).await
    }

    pub async fn get_thread(&self, id: i64) -> Result<Thread, HiveError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, agent_id, title, thread_type, active, created_at, updated_at
                 FROM threads WHERE id = ?1",
            )?;
            let mut rows = stmt.query(params![id])?;
            match rows.next()? {
                Some(row) => row_to_thread(row),
                None => Err(HiveError::NotFound(format!("thread {id}"))),
            }
        })
        .await
    }

    /// Finds the agent's single thread of the given type, if any. Used for the
    /// supervisor's `super` thread.
    pub async fn find_thread_by_type(
        &self,
        agent_id: i64,
        thread_type: ThreadType,
    ) -> Result<Option<Thread>, HiveError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, agent_id, title, thread_type, active, created_at, updated_at
                 FROM threads WHERE agent_id = ?1 AND thread_type = ?2 ORDER BY id ASC LIMIT 1",
            )?;
            let mut rows = stmt.query(params![agent_id, thread_type.as_str()])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_thread(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn create_message(
        &self,
        thread_id: i64,
        new: NewMessage,
    ) -> Result<ThreadMessage, HiveError> {
        let ids = self.create_messages(thread_id, vec![new]).await?;
        ids.into_iter()
            .next()
            .ok_or_else(|| HiveError::Internal("insert returned no row".into()))
    }

    /// Inserts a batch of messages in one transaction, preserving order.
    pub async fn create_messages(
        &self,
        thread_id: i64,
        batch: Vec<NewMessage>,
    ) -> Result<Vec<ThreadMessage>, HiveError> {
        let now = ts_to_sql(chrono::Utc::now());
        let first_id = self
            .call(move |conn| {
                conn.execute_batch("BEGIN IMMEDIATE")?;
                let result = (|| {
                    let mut first = None;
                    for msg in &batch {
                        let tool_calls = msg
                            .tool_calls
                            .as_ref()
                            .map(serde_json::to_string)
                            .transpose()?;
                        conn.execute(
                            "INSERT INTO thread_messages
                                (thread_id, role, content, tool_calls, tool_call_id, tool_name,
                                 sent_at, parent_id, processed)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                            params![
                                thread_id,
                                msg.role.as_str(),
                                msg.content,
                                tool_calls,
                                msg.tool_call_id,
                                msg.tool_name,
                                now,
                                msg.parent_id,
                                msg.processed as i64,
                            ],
                        )?;
                        first.get_or_insert(conn.last_insert_rowid());
                    }
                    Ok::<_, HiveError>(first)
                })();
                match result {
                    Ok(first) => {
                        conn.execute_batch("COMMIT")?;
                        Ok(first)
                    }
                    Err(e) => {
                        let _ = conn.execute_batch("ROLLBACK");
                        Err(e)
                    }
                }
            })
            .await?;
        let Some(first_id) = first_id else {
            return Ok(Vec::new());
        };
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM thread_messages
                 WHERE thread_id = ?1 AND id >= ?2 ORDER BY id ASC"
            ))?;
            let mut rows = stmt.query(params![thread_id, first_id])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_message(row)?);
            }
            Ok(out)
        })
        .await
    }

    /// All messages, strictly ascending by id.
    pub async fn get_messages(&self, thread_id: i64) -> Result<Vec<ThreadMessage>, HiveError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM thread_messages WHERE thread_id = ?1 ORDER BY id ASC"
            ))?;
            let mut rows = stmt.query(params![thread_id])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_message(row)?);
            }
            Ok(out)
        })
        .await
    }

    /// Unprocessed user messages, ascending by id; these trigger a turn.
    pub async fn unprocessed_user_messages(
        &self,
        thread_id: i64,
    ) -> Result<Vec<ThreadMessage>, HiveError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM thread_messages
                 WHERE thread_id = ?1 AND role = 'user' AND processed = 0 ORDER BY id ASC"
            ))?;
            let mut rows = stmt.query(params![thread_id])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_message(row)?);
            }
            Ok(out)
        })
        .await
    }

    pub async fn mark_messages_processed(&self, ids: Vec<i64>) -> Result<(), HiveError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.call(move |conn| {
            let placeholders = vec!["?"; ids.len()].join(",");
            let sql =
                format!("UPDATE thread_messages SET processed = 1 WHERE id IN ({placeholders})");
            let mut stmt = conn.prepare(&sql)?;
            stmt.execute(rusqlite::params_from_iter(ids.iter()))?;
            Ok(())
        })
        .await
    }

    pub async fn touch_thread(&self, id: i64) -> Result<(), HiveError> {
        let now = ts_to_sql(chrono::Utc::now());
        self.call(move |conn| {
            conn.execute(
                "UPDATE threads SET updated_at = ?2 WHERE id = ?1",
                params![id, now],
            )?;
            Ok(())
        })
        .await
    }
}
