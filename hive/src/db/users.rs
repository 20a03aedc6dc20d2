//! User and credential rows.

use rusqlite::params;
use serde_json::Value;

use super::{sql_to_ts, ts_to_sql, Db};
use crate::error::HiveError;
use crate::model::{User, UserRole};

impl Db {
    pub async fn create_user(
        &self,
        email: &str,
        display_name: Option<&str>,
        role: UserRole,
    ) -> Result<User, HiveError> {
        let email = email.to_string();
        let display_name = display_name.map(String::from);
        let now = ts_to_sql(chrono::Utc::now());
        let id = self
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO users (email, display_name, role, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params![email, display_name, role.as_str(), now],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        self.get_user(id).await
    }

    pub async fn get_user(&self, id: i64) -> Result<User, HiveError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, email, display_name, role, custom_instructions, created_at
                 FROM users WHERE id = ?1",
            )?;
            let user = stmt
                .query_row(params![id], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                })
                .map_err(|_| HiveError::NotFound(format!("user {id}")))?;
            Ok(User {
                id: user.0,
                email: user.1,
                display_name: user.2,
                role: UserRole::parse(&user.3).unwrap_or(UserRole::User),
                custom_instructions: user.4,
                created_at: sql_to_ts(&user.5)?,
            })
        })
        .await
    }

    pub async fn set_custom_instructions(
        &self,
        user_id: i64,
        instructions: Option<&str>,
    ) -> Result<(), HiveError> {
        let instructions = instructions.map(String::from);
        self.call(move |conn| {
            conn.execute(
                "UPDATE users SET custom_instructions = ?2 WHERE id = ?1",
                params![user_id, instructions],
            )?;
            Ok(())
        })
        .await
    }

    /// Stores a connector credential. `agent_id == None` means account scope.
    pub async fn upsert_credential(
        &self,
        owner_id: i64,
        agent_id: Option<i64>,
        connector_type: &str,
        secret: &Value,
    ) -> Result<(), HiveError> {
        let connector_type = connector_type.to_string();
        let secret = serde_json::to_string(secret)?;
        let now = ts_to_sql(chrono::Utc::now());
        self.call(move |conn| {
            conn.execute(
                "DELETE FROM credentials
                 WHERE owner_id = ?1 AND connector_type = ?2 AND agent_id IS ?3",
                params![owner_id, connector_type, agent_id],
            )?;
            conn.execute(
                "INSERT INTO credentials (owner_id, agent_id, connector_type, secret, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![owner_id, agent_id, connector_type, secret, now],
            )?;
            Ok(())
        })
        .await
    }

    /// Distinct connector types the owner has credentials for (any scope).
    pub async fn list_connector_types(&self, owner_id: i64) -> Result<Vec<String>, HiveError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT connector_type FROM credentials
                 WHERE owner_id = ?1 ORDER BY connector_type",
            )?;
            let mut rows = stmt.query(params![owner_id])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row.get::<_, String>(0)?);
            }
            Ok(out)
        })
        .await
    }

    /// Fetches one credential at an exact scope (agent-scoped when `agent_id`
    /// is set, otherwise account-scoped). Precedence between the two scopes is
    /// applied by the credential resolver.
    pub async fn get_credential(
        &self,
        owner_id: i64,
        agent_id: Option<i64>,
        connector_type: &str,
    ) -> Result<Option<Value>, HiveError> {
        let connector_type = connector_type.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT secret FROM credentials
                 WHERE owner_id = ?1 AND connector_type = ?2 AND agent_id IS ?3
                 ORDER BY id DESC LIMIT 1",
            )?;
            let raw: Option<String> = stmt
                .query_row(params![owner_id, connector_type, agent_id], |row| {
                    row.get(0)
                })
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;
            raw.map(|s| serde_json::from_str(&s).map_err(HiveError::from))
                .transpose()
        })
        .await
    }
}
