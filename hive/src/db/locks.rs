//! Advisory agent-run locks.
//!
//! A unique-keyed `agent_locks` row is the cross-process serialisation point
//! for at-most-one-concurrent-run-per-agent: acquisition is an INSERT that
//! fails on conflict, release deletes the row. The guard releases on drop so
//! every exit path (success, failure, panic unwind) frees the lock.

use rusqlite::params;

use super::{ts_to_sql, Db};
use crate::error::HiveError;

impl Db {
    /// Attempts to take the run lock for an agent. Returns a guard on success,
    /// `AgentBusy` when another holder has it.
    pub async fn acquire_agent_lock(&self, agent_id: i64) -> Result<AgentLockGuard, HiveError> {
        let holder = uuid::Uuid::new_v4().to_string();
        let holder_for_insert = holder.clone();
        let now = ts_to_sql(chrono::Utc::now());
        let acquired = self
            .call(move |conn| {
                let result = conn.execute(
                    "INSERT INTO agent_locks (agent_id, holder, acquired_at) VALUES (?1, ?2, ?3)",
                    params![agent_id, holder_for_insert, now],
                );
                match result {
                    Ok(_) => Ok(true),
                    Err(rusqlite::Error::SqliteFailure(err, _))
                        if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                    {
                        Ok(false)
                    }
                    Err(other) => Err(HiveError::from(other)),
                }
            })
            .await?;
        if !acquired {
            return Err(HiveError::AgentBusy(format!("agent {agent_id}")));
        }
        Ok(AgentLockGuard {
            db: self.clone(),
            agent_id,
            holder,
            released: false,
        })
    }

    async fn release_agent_lock(&self, agent_id: i64, holder: String) -> Result<(), HiveError> {
        self.call(move |conn| {
            conn.execute(
                "DELETE FROM agent_locks WHERE agent_id = ?1 AND holder = ?2",
                params![agent_id, holder],
            )?;
            Ok(())
        })
        .await
    }
}

/// Holds the advisory lock for an agent run. Release explicitly with
/// [`AgentLockGuard::release`]; dropping without release schedules a
/// best-effort background delete.
pub struct AgentLockGuard {
    db: Db,
    agent_id: i64,
    holder: String,
    released: bool,
}

impl AgentLockGuard {
    pub async fn release(mut self) -> Result<(), HiveError> {
        self.released = true;
        let holder = std::mem::take(&mut self.holder);
        self.db.release_agent_lock(self.agent_id, holder).await
    }
}

impl Drop for AgentLockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let db = self.db.clone();
        let agent_id = self.agent_id;
        let holder = std::mem::take(&mut self.holder);
        // Last-resort cleanup when the holding task unwinds without release().
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = db.release_agent_lock(agent_id, holder).await {
                    tracing::warn!(agent_id, error = %e, "failed to release agent lock on drop");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::agents::NewAgent;
    use super::super::test_support::open_temp;
    use crate::error::HiveError;
    use crate::model::UserRole;

    #[tokio::test]
    async fn second_acquire_is_refused_until_release() {
        let (_dir, db) = open_temp().await;
        let owner = db
            .create_user("l@example.com", None, UserRole::User)
            .await
            .unwrap()
            .id;
        let agent = db
            .create_agent(NewAgent {
                owner_id: owner,
                name: "locked".into(),
                model: "gpt-4o-mini".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let guard = db.acquire_agent_lock(agent.id).await.unwrap();
        assert!(matches!(
            db.acquire_agent_lock(agent.id).await,
            Err(HiveError::AgentBusy(_))
        ));
        guard.release().await.unwrap();
        let again = db.acquire_agent_lock(agent.id).await.unwrap();
        again.release().await.unwrap();
    }

    #[tokio::test]
    async fn locks_are_per_agent() {
        let (_dir, db) = open_temp().await;
        let owner = db
            .create_user("l2@example.com", None, UserRole::User)
            .await
            .unwrap()
            .id;
        let mut ids = Vec::new();
        for name in ["a", "b"] {
            ids.push(
                db.create_agent(NewAgent {
                    owner_id: owner,
                    name: name.into(),
                    model: "gpt-4o-mini".into(),
                    ..Default::default()
                })
                .await
                .unwrap()
                .id,
            );
        }
        let g1 = db.acquire_agent_lock(ids[0]).await.unwrap();
        let g2 = db.acquire_agent_lock(ids[1]).await.unwrap();
        g1.release().await.unwrap();
        g2.release().await.unwrap();
    }
}
