//! Per-turn scoped context values.
//!
//! Two values travel with every turn: the credential resolver (so connector
//! tools never take credentials as arguments) and the streaming context (so
//! token callbacks publish to the right topic). A third scope correlates
//! workers spawned inside a supervisor turn back to the supervisor run.
//!
//! Values are task-locals installed for the duration of a future; leaving the
//! scope restores whatever was visible before, on every exit path. There are
//! no process-wide singletons.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::db::Db;

tokio::task_local! {
    static CREDENTIALS: Arc<CredentialResolver>;
    static STREAM: StreamContext;
    static SUPERVISOR_RUN: i64;
}

/// Resolves connector credentials for the current turn with precedence:
/// agent-scoped credential, then account-scoped.
#[derive(Clone)]
pub struct CredentialResolver {
    pub owner_id: i64,
    pub agent_id: Option<i64>,
    db: Db,
}

impl CredentialResolver {
    pub fn new(db: Db, owner_id: i64, agent_id: Option<i64>) -> Self {
        Self {
            owner_id,
            agent_id,
            db,
        }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Returns the resolved credentials, or `None` when the connector is not
    /// configured at either scope.
    pub async fn get(&self, connector_type: &str) -> Option<Value> {
        if let Some(agent_id) = self.agent_id {
            match self
                .db
                .get_credential(self.owner_id, Some(agent_id), connector_type)
                .await
            {
                Ok(Some(secret)) => return Some(secret),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(connector = connector_type, error = %e, "credential lookup failed");
                    return None;
                }
            }
        }
        self.db
            .get_credential(self.owner_id, None, connector_type)
            .await
            .ok()
            .flatten()
    }
}

/// Carries the current thread and user so stream callbacks can address frames.
#[derive(Clone, Copy, Debug, Default)]
pub struct StreamContext {
    pub thread_id: Option<i64>,
    pub user_id: Option<i64>,
}

/// Runs `f` with both turn context values installed.
pub async fn with_turn_context<F>(
    resolver: Arc<CredentialResolver>,
    stream: StreamContext,
    f: F,
) -> F::Output
where
    F: Future,
{
    CREDENTIALS.scope(resolver, STREAM.scope(stream, f)).await
}

/// Runs `f` with the supervisor-run correlation id installed, so
/// `spawn_worker` jobs can be attributed to the run that requested them.
pub async fn with_supervisor_run<F>(run_id: i64, f: F) -> F::Output
where
    F: Future,
{
    SUPERVISOR_RUN.scope(run_id, f).await
}

/// Resolver installed for the current task, if any. Tools that need
/// credentials check this first and report `connector_not_configured` when
/// unset.
pub fn current_credential_resolver() -> Option<Arc<CredentialResolver>> {
    CREDENTIALS.try_with(Arc::clone).ok()
}

pub fn current_stream_context() -> Option<StreamContext> {
    STREAM.try_with(|s| *s).ok()
}

pub fn current_supervisor_run() -> Option<i64> {
    SUPERVISOR_RUN.try_with(|id| *id).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::open_temp;
    use crate::model::UserRole;
    use serde_json::json;

    #[tokio::test]
    async fn context_visible_only_inside_scope() {
        let (_dir, db) = open_temp().await;
        assert!(current_credential_resolver().is_none());
        assert!(current_stream_context().is_none());

        let resolver = Arc::new(CredentialResolver::new(db, 1, None));
        let stream = StreamContext {
            thread_id: Some(9),
            user_id: Some(1),
        };
        with_turn_context(resolver, stream, async {
            assert_eq!(current_stream_context().unwrap().thread_id, Some(9));
            assert!(current_credential_resolver().is_some());
        })
        .await;

        assert!(current_credential_resolver().is_none());
        assert!(current_stream_context().is_none());
    }

    #[tokio::test]
    async fn agent_scope_wins_over_account_scope() {
        let (_dir, db) = open_temp().await;
        let user = db
            .create_user("c@example.com", None, UserRole::User)
            .await
            .unwrap();
        db.upsert_credential(user.id, None, "github", &json!({"pat": "account"}))
            .await
            .unwrap();
        db.upsert_credential(user.id, Some(5), "github", &json!({"pat": "agent"}))
            .await
            .unwrap();

        let agent_scoped = CredentialResolver::new(db.clone(), user.id, Some(5));
        assert_eq!(agent_scoped.get("github").await.unwrap()["pat"], "agent");

        let other_agent = CredentialResolver::new(db.clone(), user.id, Some(6));
        assert_eq!(other_agent.get("github").await.unwrap()["pat"], "account");

        let account_only = CredentialResolver::new(db, user.id, None);
        assert_eq!(account_only.get("github").await.unwrap()["pat"], "account");
    }

    #[tokio::test]
    async fn missing_connector_resolves_to_none() {
        let (_dir, db) = open_temp().await;
        let resolver = CredentialResolver::new(db, 1, None);
        assert!(resolver.get("imessage").await.is_none());
    }

    #[tokio::test]
    async fn supervisor_run_scope() {
        assert!(current_supervisor_run().is_none());
        with_supervisor_run(77, async {
            assert_eq!(current_supervisor_run(), Some(77));
        })
        .await;
        assert!(current_supervisor_run().is_none());
    }
}
