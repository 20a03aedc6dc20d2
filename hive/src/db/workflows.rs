//! Workflow, execution, and node-state rows.

use rusqlite::{params, Row};

use super::{opt_ts, sql_to_ts, ts_to_sql, Db};
use crate::error::HiveError;
use crate::model::{
    ExecResult, NodeExecutionState, Phase, Workflow, WorkflowCanvas, WorkflowExecution,
};

fn row_to_execution(row: &Row<'_>) -> Result<WorkflowExecution, HiveError> {
    let phase: String = row.get(2)?;
    let result: Option<String> = row.get(3)?;
    Ok(WorkflowExecution {
        id: row.get(0)?,
        workflow_id: row.get(1)?,
        phase: Phase::parse(&phase).unwrap_or(Phase::Waiting),
        result: result.as_deref().and_then(ExecResult::parse),
        cancel_reason: row.get(4)?,
        started_at: opt_ts(row.get(5)?)?,
        finished_at: opt_ts(row.get(6)?)?,
        duration_ms: row.get(7)?,
        error: row.get(8)?,
        triggered_by: row.get(9)?,
    })
}

const EXECUTION_COLUMNS: &str = "id, workflow_id, phase, result, cancel_reason, started_at,
    finished_at, duration_ms, error, triggered_by";

fn row_to_node_state(row: &Row<'_>) -> Result<NodeExecutionState, HiveError> {
    let phase: String = row.get(3)?;
    let result: Option<String> = row.get(4)?;
    let output: Option<String> = row.get(5)?;
    Ok(NodeExecutionState {
        id: row.get(0)?,
        execution_id: row.get(1)?,
        node_id: row.get(2)?,
        phase: Phase::parse(&phase).unwrap_or(Phase::Waiting),
        result: result.as_deref().and_then(ExecResult::parse),
        output: output.map(|s| serde_json::from_str(&s)).transpose()?,
        error: row.get(6)?,
        started_at: opt_ts(row.get(7)?)?,
        finished_at: opt_ts(row.get(8)?)?,
        duration_ms: row.get(9)?,
    })
}

const NODE_STATE_COLUMNS: &str = "id, execution_id, node_id, phase, result, output, error,
    started_at, finished_at, duration_ms";

impl Db {
    /// Creates a workflow; duplicate names per owner are a conflict.
    pub async fn create_workflow(
        &self,
        owner_id: i64,
        name: &str,
        canvas: &WorkflowCanvas,
    ) -> Result<Workflow, HiveError> {
        let name = name.to_string();
        let canvas_json = serde_json::to_string(canvas)?;
        let now = ts_to_sql(chrono::Utc::now());
        let id = self
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO workflows (owner_id, name, canvas, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?4)",
                    params![owner_id, name, canvas_json, now],
                )
                .map_err(|e| match e {
                    rusqlite::Error::SqliteFailure(err, _)
                        if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                    {
                        HiveError::Conflict(format!("workflow '{name}' already exists"))
                    }
                    other => HiveError::from(other),
                })?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        self.get_workflow(id).await
    }

    pub async fn get_workflow(&self, id: i64) -> Result<Workflow, HiveError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, owner_id, name, canvas, created_at, updated_at
                 FROM workflows WHERE id = ?1",
            )?;
            let mut rows = stmt.query(params![id])?;
            match rows.next()? {
                Some(row) => {
                    let canvas: String = row.get(3)?;
                    Ok(Workflow {
                        id: row.get(0)?,
                        owner_id: row.get(1)?,
                        name: row.get(2)?,
                        canvas: serde_json::from_str(&canvas)?,
                        created_at: sql_to_ts(&row.get::<_, String>(4)?)?,
                        updated_at: sql_to_ts(&row.get::<_, String>(5)?)?,
                    })
                }
                None => Err(HiveError::NotFound(format!("workflow {id}"))),
            }
        })
        .await
    }

    /// Reserves an execution row in `waiting`.
    pub async fn reserve_execution(
        &self,
        workflow_id: i64,
        triggered_by: Option<&str>,
    ) -> Result<WorkflowExecution, HiveError> {
        let triggered_by = triggered_by.map(String::from);
        let id = self
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO workflow_executions (workflow_id, phase, triggered_by)
                     VALUES (?1, 'waiting', ?2)",
                    params![workflow_id, triggered_by],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        self.get_execution(id).await
    }

    pub async fn get_execution(&self, id: i64) -> Result<WorkflowExecution, HiveError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE id = ?1"
            ))?;
            let mut rows = stmt.query(params![id])?;
            match rows.next()? {
                Some(row) => row_to_execution(row),
                None => Err(HiveError::NotFound(format!("execution {id}"))),
            }
        })
        .await
    }

    /// `waiting -> running`, exactly once; a second start is a conflict.
    pub async fn start_execution(&self, id: i64) -> Result<WorkflowExecution, HiveError> {
        let now = ts_to_sql(chrono::Utc::now());
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE workflow_executions SET phase = 'running', started_at = ?2
                 WHERE id = ?1 AND phase = 'waiting'",
                params![id, now],
            )?;
            if n == 0 {
                return Err(HiveError::Conflict(format!(
                    "execution {id} is not waiting"
                )));
            }
            Ok(())
        })
        .await?;
        self.get_execution(id).await
    }

    /// Finishes an execution: phase `finished`, result set, timestamps frozen.
    pub async fn finish_execution(
        &self,
        id: i64,
        result: ExecResult,
        error: Option<String>,
    ) -> Result<WorkflowExecution, HiveError> {
        let now = chrono::Utc::now();
        let now_sql = ts_to_sql(now);
        self.call(move |conn| {
            let started: Option<String> = conn.query_row(
                "SELECT started_at FROM workflow_executions WHERE id = ?1 AND phase != 'finished'",
                params![id],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    HiveError::Conflict(format!("execution {id} already finished"))
                }
                other => HiveError::from(other),
            })?;
            let duration_ms = match started.as_deref() {
                Some(s) => Some((now - sql_to_ts(s)?).num_milliseconds()),
                None => None,
            };
            conn.execute(
                "UPDATE workflow_executions
                 SET phase = 'finished', result = ?2, finished_at = ?3, duration_ms = ?4, error = ?5
                 WHERE id = ?1",
                params![id, result.as_str(), now_sql, duration_ms, error],
            )?;
            Ok(())
        })
        .await?;
        self.get_execution(id).await
    }

    /// Requests cooperative cancellation; the engine observes the flag before
    /// starting each node.
    pub async fn request_execution_cancel(
        &self,
        id: i64,
        reason: &str,
    ) -> Result<(), HiveError> {
        let reason = reason.to_string();
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE workflow_executions SET cancel_requested = 1, cancel_reason = ?2
                 WHERE id = ?1 AND phase != 'finished'",
                params![id, reason],
            )?;
            if n == 0 {
                return Err(HiveError::Conflict(format!(
                    "execution {id} already finished"
                )));
            }
            Ok(())
        })
        .await
    }

    pub async fn execution_cancel_requested(&self, id: i64) -> Result<bool, HiveError> {
        self.call(move |conn| {
            let flag: i64 = conn.query_row(
                "SELECT cancel_requested FROM workflow_executions WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            Ok(flag != 0)
        })
        .await
    }

    pub async fn create_node_state(
        &self,
        execution_id: i64,
        node_id: &str,
    ) -> Result<NodeExecutionState, HiveError> {
        let node_id_owned = node_id.to_string();
        let id = self
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO node_execution_states (execution_id, node_id, phase)
                     VALUES (?1, ?2, 'waiting')",
                    params![execution_id, node_id_owned],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        self.get_node_state(id).await
    }

    pub async fn get_node_state(&self, id: i64) -> Result<NodeExecutionState, HiveError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {NODE_STATE_COLUMNS} FROM node_execution_states WHERE id = ?1"
            ))?;
            let mut rows = stmt.query(params![id])?;
            match rows.next()? {
                Some(row) => row_to_node_state(row),
                None => Err(HiveError::NotFound(format!("node state {id}"))),
            }
        })
        .await
    }

    pub async fn mark_node_running(&self, id: i64) -> Result<NodeExecutionState, HiveError> {
        let now = ts_to_sql(chrono::Utc::now());
        self.call(move |conn| {
            conn.execute(
                "UPDATE node_execution_states SET phase = 'running', started_at = ?2 WHERE id = ?1",
                params![id, now],
            )?;
            Ok(())
        })
        .await?;
        self.get_node_state(id).await
    }

    pub async fn mark_node_finished(
        &self,
        id: i64,
        result: ExecResult,
        output: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<NodeExecutionState, HiveError> {
        let now = chrono::Utc::now();
        let now_sql = ts_to_sql(now);
        let output = output.map(|v| serde_json::to_string(&v)).transpose()?;
        self.call(move |conn| {
            let started: Option<String> = conn.query_row(
                "SELECT started_at FROM node_execution_states WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            let duration_ms = match started.as_deref() {
                Some(s) => Some((now - sql_to_ts(s)?).num_milliseconds()),
                None => None,
            };
            conn.execute(
                "UPDATE node_execution_states
                 SET phase = 'finished', result = ?2, output = ?3, error = ?4,
                     finished_at = ?5, duration_ms = ?6
                 WHERE id = ?1",
                params![id, result.as_str(), output, error, now_sql, duration_ms],
            )?;
            Ok(())
        })
        .await?;
        self.get_node_state(id).await
    }

    /// Node states for one execution, in creation order.
    pub async fn list_node_states(
        &self,
        execution_id: i64,
    ) -> Result<Vec<NodeExecutionState>, HiveError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {NODE_STATE_COLUMNS} FROM node_execution_states
                 WHERE execution_id = ?1 ORDER BY id ASC"
            ))?;
            let mut rows = stmt.query(params![execution_id])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_node_state(row)?);
            }
            Ok(out)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::open_temp;
    use super::*;
    use crate::model::UserRole;
    use serde_json::json;

    async fn seed_workflow(db: &Db) -> i64 {
        let owner = db
            .create_user("w@example.com", None, UserRole::User)
            .await
            .unwrap()
            .id;
        db.create_workflow(owner, "wf", &WorkflowCanvas::default())
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn duplicate_workflow_name_is_conflict() {
        let (_dir, db) = open_temp().await;
        let owner = db
            .create_user("d@example.com", None, UserRole::User)
            .await
            .unwrap()
            .id;
        db.create_workflow(owner, "wf", &WorkflowCanvas::default())
            .await
            .unwrap();
        assert!(matches!(
            db.create_workflow(owner, "wf", &WorkflowCanvas::default()).await,
            Err(HiveError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn reserve_then_start_exactly_once() {
        let (_dir, db) = open_temp().await;
        let wf = seed_workflow(&db).await;
        let exec = db.reserve_execution(wf, Some("api")).await.unwrap();
        assert_eq!(exec.phase, Phase::Waiting);

        let started = db.start_execution(exec.id).await.unwrap();
        assert_eq!(started.phase, Phase::Running);
        assert!(started.started_at.is_some());

        assert!(matches!(
            db.start_execution(exec.id).await,
            Err(HiveError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn finish_freezes_result_and_timestamps() {
        let (_dir, db) = open_temp().await;
        let wf = seed_workflow(&db).await;
        let exec = db.reserve_execution(wf, None).await.unwrap();
        db.start_execution(exec.id).await.unwrap();
        let finished = db
            .finish_execution(exec.id, ExecResult::Success, None)
            .await
            .unwrap();
        assert_eq!(finished.phase, Phase::Finished);
        assert_eq!(finished.result, Some(ExecResult::Success));
        assert!(finished.finished_at.is_some());

        assert!(matches!(
            db.finish_execution(exec.id, ExecResult::Failure, None).await,
            Err(HiveError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn cancellation_flag_round_trips() {
        let (_dir, db) = open_temp().await;
        let wf = seed_workflow(&db).await;
        let exec = db.reserve_execution(wf, None).await.unwrap();
        db.start_execution(exec.id).await.unwrap();
        assert!(!db.execution_cancel_requested(exec.id).await.unwrap());
        db.request_execution_cancel(exec.id, "user clicked stop")
            .await
            .unwrap();
        assert!(db.execution_cancel_requested(exec.id).await.unwrap());
        let exec = db.get_execution(exec.id).await.unwrap();
        assert_eq!(exec.cancel_reason.as_deref(), Some("user clicked stop"));
    }

    #[tokio::test]
    async fn node_states_track_envelope_outputs() {
        let (_dir, db) = open_temp().await;
        let wf = seed_workflow(&db).await;
        let exec = db.reserve_execution(wf, None).await.unwrap();
        let state = db.create_node_state(exec.id, "tool-1").await.unwrap();
        assert_eq!(state.phase, Phase::Waiting);

        let running = db.mark_node_running(state.id).await.unwrap();
        assert_eq!(running.phase, Phase::Running);

        let out = json!({"value": {"x": 1}, "meta": {"phase": "finished", "result": "success"}});
        let finished = db
            .mark_node_finished(state.id, ExecResult::Success, Some(out.clone()), None)
            .await
            .unwrap();
        assert_eq!(finished.result, Some(ExecResult::Success));
        assert_eq!(finished.output, Some(out));
        assert!(finished.duration_ms.is_some());

        let all = db.list_node_states(exec.id).await.unwrap();
        assert_eq!(all.len(), 1);
    }
}
