//! Agent rows.

use rusqlite::{params, Row};
use serde_json::Value;

use super::{opt_ts, sql_to_ts, ts_to_sql, Db};
use crate::error::HiveError;
use crate::model::{Agent, AgentStatus};

/// Creation parameters; everything else starts at defaults.
#[derive(Clone, Debug, Default)]
pub struct NewAgent {
    pub owner_id: i64,
    pub name: String,
    pub model: String,
    pub system_instructions: String,
    pub task_instructions: String,
    pub allowed_tools: Option<Vec<String>>,
    pub schedule: Option<String>,
    pub config: Option<Value>,
}

fn row_to_agent(row: &Row<'_>) -> Result<Agent, HiveError> {
    let allowed_tools: Option<String> = row.get(6)?;
    let config: Option<String> = row.get(8)?;
    let status: String = row.get(9)?;
    Ok(Agent {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        model: row.get(3)?,
        system_instructions: row.get(4)?,
        task_instructions: row.get(5)?,
        allowed_tools: allowed_tools
            .map(|s| serde_json::from_str(&s))
            .transpose()?,
        schedule: row.get(7)?,
        config: config.map(|s| serde_json::from_str(&s)).transpose()?,
        status: AgentStatus::parse(&status).unwrap_or(AgentStatus::Idle),
        last_run_at: opt_ts(row.get(10)?)?,
        last_error: row.get(11)?,
        created_at: sql_to_ts(&row.get::<_, String>(12)?)?,
        updated_at: sql_to_ts(&row.get::<_, String>(13)?)?,
    })
}

const AGENT_COLUMNS: &str = "id, owner_id, name, model, system_instructions, task_instructions,
    allowed_tools, schedule, config, status, last_run_at, last_error, created_at, updated_at";

impl Db {
    pub async fn create_agent(&self, new: NewAgent) -> Result<Agent, HiveError> {
        let now = ts_to_sql(chrono::Utc::now());
        let allowed_tools = new
            .allowed_tools
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let config = new.config.as_ref().map(serde_json::to_string).transpose()?;
        let id = self
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO agents (owner_id, name, model, system_instructions,
                        task_instructions, allowed_tools, schedule, config, status,
                        created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'idle', ?9, ?9)",
                    params![
                        new.owner_id,
                        new.name,
                        new.model,
                        new.system_instructions,
                        new.task_instructions,
                        allowed_tools,
                        new.schedule,
                        config,
                        now,
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        self.get_agent(id).await
    }

    pub async fn get_agent(&self, id: i64) -> Result<Agent, HiveError> {
        self.call(move |conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = ?1"))?;
            let mut rows = stmt.query(params![id])?;
            match rows.next()? {
                Some(row) => row_to_agent(row),
                None => Err(HiveError::NotFound(format!("agent {id}"))),
            }
        })
        .await
    }

    pub async fn list_agents(&self, owner_id: i64) -> Result<Vec<Agent>, HiveError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {AGENT_COLUMNS} FROM agents WHERE owner_id = ?1 ORDER BY id ASC"
            ))?;
            let mut rows = stmt.query(params![owner_id])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_agent(row)?);
            }
            Ok(out)
        })
        .await
    }

    /// Agents with a cron schedule, across all owners (for the scheduler).
    pub async fn list_scheduled_agents(&self) -> Result<Vec<Agent>, HiveError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {AGENT_COLUMNS} FROM agents WHERE schedule IS NOT NULL ORDER BY id ASC"
            ))?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_agent(row)?);
            }
            Ok(out)
        })
        .await
    }

    /// Persists status telemetry; run exclusivity comes from advisory locks,
    /// not this field.
    pub async fn set_agent_status(
        &self,
        id: i64,
        status: AgentStatus,
        last_error: Option<String>,
    ) -> Result<(), HiveError> {
        let now = ts_to_sql(chrono::Utc::now());
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE agents SET status = ?2, last_error = ?3, updated_at = ?4 WHERE id = ?1",
                params![id, status.as_str(), last_error, now],
            )?;
            if n == 0 {
                return Err(HiveError::NotFound(format!("agent {id}")));
            }
            Ok(())
        })
        .await
    }

    pub async fn set_agent_last_run(&self, id: i64) -> Result<(), HiveError> {
        let now = ts_to_sql(chrono::Utc::now());
        self.call(move |conn| {
            conn.execute(
                "UPDATE agents SET last_run_at = ?2, updated_at = ?2 WHERE id = ?1",
                params![id, now],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn delete_agent(&self, id: i64) -> Result<(), HiveError> {
        self.call(move |conn| {
            conn.execute("DELETE FROM agents WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }
}
