use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::endpoint::stop_url;
use crate::protocol::StopRequest;
use crate::session::{Session, SessionRegistry};
use crate::types::{SessionId, TaskId};

/// Result of one `cancel` call.
#[derive(Debug, Default)]
pub struct CancelOutcome {
    /// A live session was found and its read loop signalled.
    pub local_abort: bool,
    /// Fire-and-forget remote stop, present when a task id was known.
    pub remote_stop: Option<JoinHandle<()>>,
}

/// Stops a session locally and, when possible, on the provider side.
///
/// The local abort never waits on the remote call; remote failures are only
/// logged.
#[derive(Clone)]
pub struct CancellationCoordinator {
    client: reqwest::Client,
    registry: Arc<SessionRegistry>,
}

impl CancellationCoordinator {
    pub fn new(client: reqwest::Client, registry: Arc<SessionRegistry>) -> Self {
        Self { client, registry }
    }

    pub fn cancel(&self, id: &SessionId) -> CancelOutcome {
        let Some(session) = self.registry.get(id) else {
            tracing::debug!(session = %id.short(), "Cancel for unknown session ignored");
            return CancelOutcome::default();
        };

        session.cancel.cancel();
        tracing::info!(session = %id.short(), "Session aborted locally");

        let remote_stop = session.remote_task_id.clone().map(|task_id| {
            let span = tracing::info_span!("remote_stop", session = %id.short(), task_id = %task_id);
            tokio::spawn(stop_remote_task(self.client.clone(), session.clone(), task_id).instrument(span))
        });
        if remote_stop.is_none() {
            tracing::debug!(session = %id.short(), "No remote task id yet, local abort only");
        }

        self.registry.remove(id);
        CancelOutcome {
            local_abort: true,
            remote_stop,
        }
    }
}

async fn stop_remote_task(client: reqwest::Client, session: Session, task_id: TaskId) {
    let url = stop_url(&session.endpoint, &task_id);
    let result = client
        .post(&url)
        .bearer_auth(&session.credential)
        .json(&StopRequest {
            user: &session.principal,
        })
        .send()
        .await;

    match result {
        Ok(response) if response.status().is_success() => {
            tracing::info!("Remote task stopped");
        }
        Ok(response) => {
            let status = response.status();
            let body = match response.text().await {
                Ok(text) => text,
                Err(_) => String::new(),
            };
            tracing::warn!("Remote stop rejected ({}): {}", status, body);
        }
        Err(e) => {
            tracing::warn!("Remote stop failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn coordinator() -> (CancellationCoordinator, Arc<SessionRegistry>) {
        let registry = Arc::new(SessionRegistry::new());
        (
            CancellationCoordinator::new(reqwest::Client::new(), registry.clone()),
            registry,
        )
    }

    #[tokio::test]
    async fn cancel_without_task_id_is_local_only() {
        let (coordinator, registry) = coordinator();
        let token = CancellationToken::new();
        registry
            .create(
                SessionId::from("s1"),
                token.clone(),
                "http://127.0.0.1:9/v1".to_string(),
                "key".to_string(),
                "tester".to_string(),
            )
            .unwrap();

        let outcome = coordinator.cancel(&SessionId::from("s1"));
        assert!(outcome.local_abort);
        assert!(outcome.remote_stop.is_none());
        assert!(token.is_cancelled());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn cancel_twice_or_unknown_is_a_no_op() {
        let (coordinator, registry) = coordinator();
        registry
            .create(
                SessionId::from("s1"),
                CancellationToken::new(),
                "http://127.0.0.1:9/v1".to_string(),
                "key".to_string(),
                "tester".to_string(),
            )
            .unwrap();

        assert!(coordinator.cancel(&SessionId::from("s1")).local_abort);
        let second = coordinator.cancel(&SessionId::from("s1"));
        assert!(!second.local_abort);
        assert!(second.remote_stop.is_none());
        assert!(!coordinator.cancel(&SessionId::from("never-existed")).local_abort);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn unreachable_remote_stop_never_escalates() {
        let (coordinator, registry) = coordinator();
        let id = SessionId::from("s1");
        registry
            .create(
                id.clone(),
                CancellationToken::new(),
                "http://127.0.0.1:9/v1".to_string(),
                "key".to_string(),
                "tester".to_string(),
            )
            .unwrap();
        registry.attach_remote_task_id(&id, TaskId::from("task-1".to_string()));

        let outcome = coordinator.cancel(&id);
        assert!(registry.get(&id).is_none());
        let remote = outcome.remote_stop.expect("remote stop should be scheduled");
        assert!(remote.await.is_ok());
    }
}
