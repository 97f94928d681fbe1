use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use crate::types::{RelayError, Result, SessionId, TaskId};

/// One live streaming request, owned by the registry.
#[derive(Clone)]
pub struct Session {
    pub id: SessionId,
    pub cancel: CancellationToken,
    pub remote_task_id: Option<TaskId>,
    /// Normalised API root.
    pub endpoint: String,
    pub credential: String,
    pub principal: String,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("remote_task_id", &self.remote_task_id)
            .field("endpoint", &self.endpoint)
            .field("credential", &"[REDACTED]")
            .field("principal", &self.principal)
            .finish()
    }
}

/// Table of in-flight sessions keyed by session id.
///
/// Rows are written by the driver that owns the id and taken out either by
/// that driver on natural termination or by the cancellation coordinator;
/// whichever comes second finds nothing.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Session>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn create(
        &self,
        id: SessionId,
        cancel: CancellationToken,
        endpoint: String,
        credential: String,
        principal: String,
    ) -> Result<()> {
        let mut sessions = self.lock();
        if sessions.contains_key(&id) {
            return Err(RelayError::DuplicateSession(id.0).into());
        }
        tracing::debug!(session = %id.short(), "Session registered");
        sessions.insert(
            id.clone(),
            Session {
                id,
                cancel,
                remote_task_id: None,
                endpoint,
                credential,
                principal,
            },
        );
        Ok(())
    }

    /// First write wins; returns whether the id was stored.
    pub fn attach_remote_task_id(&self, id: &SessionId, task_id: TaskId) -> bool {
        let mut sessions = self.lock();
        let Some(session) = sessions.get_mut(id) else {
            return false;
        };
        if session.remote_task_id.is_some() {
            return false;
        }
        tracing::debug!(session = %id.short(), task_id = %task_id, "Remote task id attached");
        session.remote_task_id = Some(task_id);
        true
    }

    pub fn get(&self, id: &SessionId) -> Option<Session> {
        self.lock().get(id).cloned()
    }

    pub fn remove(&self, id: &SessionId) -> Option<Session> {
        self.lock().remove(id)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(registry: &SessionRegistry, id: &str) -> Result<()> {
        registry.create(
            SessionId::from(id),
            CancellationToken::new(),
            "https://api.x.com/v1".to_string(),
            "app-secret".to_string(),
            "tester".to_string(),
        )
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let registry = SessionRegistry::new();
        assert!(register(&registry, "s1").is_ok());
        match register(&registry, "s1") {
            Err(e) => assert!(matches!(e.inner, RelayError::DuplicateSession(_))),
            Ok(()) => panic!("duplicate session accepted"),
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn task_id_is_first_write_wins() {
        let registry = SessionRegistry::new();
        register(&registry, "s1").unwrap();
        let id = SessionId::from("s1");
        assert!(registry.attach_remote_task_id(&id, TaskId::from("a".to_string())));
        assert!(!registry.attach_remote_task_id(&id, TaskId::from("b".to_string())));
        assert_eq!(
            registry.get(&id).and_then(|s| s.remote_task_id),
            Some(TaskId::from("a".to_string()))
        );
    }

    #[test]
    fn attach_to_absent_session_is_a_no_op() {
        let registry = SessionRegistry::new();
        let id = SessionId::from("gone");
        assert!(!registry.attach_remote_task_id(&id, TaskId::from("a".to_string())));
        assert!(registry.get(&id).is_none());
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = SessionRegistry::new();
        register(&registry, "s1").unwrap();
        let id = SessionId::from("s1");
        assert!(registry.remove(&id).is_some());
        assert!(registry.remove(&id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn debug_output_hides_credential() {
        let registry = SessionRegistry::new();
        register(&registry, "s1").unwrap();
        let rendered = format!("{:?}", registry.get(&SessionId::from("s1")).unwrap());
        assert!(!rendered.contains("app-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
