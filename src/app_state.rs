use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tracing::info;
use uuid::Uuid;

use crate::{
    agent::RecommendationAgent, config::AppConfig, indexing::IndexRegistry, llm::ChatModel,
    neo4j_client::Neo4jStore,
};

/// Conversación de un usuario; cada sesión se procesa de forma secuencial.
pub type Session = Arc<tokio::sync::Mutex<RecommendationAgent>>;

pub struct SessionSlot {
    agent: Session,
    last_activity: Instant,
}

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<Neo4jStore>,
    pub registry: Arc<IndexRegistry>,
    pub chat_model: Arc<dyn ChatModel>,
    pub sessions: Arc<Mutex<HashMap<Uuid, SessionSlot>>>,
    pub status: Arc<Mutex<Status>>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

/// Estado del trabajo de indexación en segundo plano.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Status {
    pub is_busy: bool,
    pub message: String,
    pub updated_at: DateTime<Utc>,
}

impl Status {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            is_busy: false,
            message: message.into(),
            updated_at: Utc::now(),
        }
    }
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<Neo4jStore>,
        registry: Arc<IndexRegistry>,
        chat_model: Arc<dyn ChatModel>,
        shutdown_sender: Option<oneshot::Sender<()>>,
    ) -> Self {
        Self {
            config,
            store,
            registry,
            chat_model,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            status: Arc::new(Mutex::new(Status::new("Servidor listo."))),
            shutdown_sender: Arc::new(Mutex::new(shutdown_sender)),
        }
    }

    pub fn new_agent(&self) -> RecommendationAgent {
        RecommendationAgent::new(
            Arc::clone(&self.chat_model),
            Arc::clone(&self.registry),
            self.config.retriever.clone(),
            self.config.turn_timeout,
        )
    }

    /// Sesión existente, o una nueva (con saludo) si `id` no se conoce o es `None`.
    /// Antes de crear una se descartan las inactivas y, si se alcanza el
    /// máximo, la menos reciente.
    pub fn session(&self, id: Option<Uuid>) -> (Uuid, Session) {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().unwrap();
        self.evict_idle(&mut sessions, now);

        if let Some(id) = id {
            if let Some(slot) = sessions.get_mut(&id) {
                slot.last_activity = now;
                return (id, Arc::clone(&slot.agent));
            }
        }

        while sessions.len() >= self.config.max_sessions {
            let oldest = sessions
                .iter()
                .min_by_key(|(_, slot)| slot.last_activity)
                .map(|(id, _)| *id);
            match oldest {
                Some(oldest) => {
                    sessions.remove(&oldest);
                    info!("Sesión {oldest} expulsada: máximo de {} alcanzado.", self.config.max_sessions);
                }
                None => break,
            }
        }

        let id = id.unwrap_or_else(Uuid::new_v4);
        let mut agent = self.new_agent();
        agent.start();
        let agent = Arc::new(tokio::sync::Mutex::new(agent));
        sessions.insert(
            id,
            SessionSlot {
                agent: Arc::clone(&agent),
                last_activity: now,
            },
        );
        (id, agent)
    }

    pub fn find_session(&self, id: &Uuid) -> Option<Session> {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().unwrap();
        self.evict_idle(&mut sessions, now);
        sessions.get_mut(id).map(|slot| {
            slot.last_activity = now;
            Arc::clone(&slot.agent)
        })
    }

    pub fn remove_session(&self, id: &Uuid) -> bool {
        self.sessions.lock().unwrap().remove(id).is_some()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    fn evict_idle(&self, sessions: &mut HashMap<Uuid, SessionSlot>, now: Instant) {
        let ttl = self.config.session_ttl;
        let before = sessions.len();
        sessions.retain(|_, slot| now.duration_since(slot.last_activity) < ttl);
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!("{evicted} sesiones inactivas descartadas.");
        }
    }

    pub fn set_status(&self, is_busy: bool, message: impl Into<String>) {
        let mut status = self.status.lock().unwrap();
        status.is_busy = is_busy;
        status.message = message.into();
        status.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::EdgeField;
    use crate::testing::{app_state, nolan_corpus, registry_for, test_config, FixedReply};

    fn state(extra: &[(&str, &str)]) -> AppState {
        app_state(
            test_config(extra),
            registry_for(nolan_corpus(), &EdgeField::ALL),
            Arc::new(FixedReply("hola")),
        )
    }

    #[tokio::test]
    async fn anonymous_chats_are_bounded_by_capacity() {
        let state = state(&[("MAX_SESSIONS", "3")]);
        let mut ids = Vec::new();
        for _ in 0..50 {
            let (id, session) = state.session(None);
            session.lock().await.handle_turn("hola").await;
            ids.push(id);
        }
        assert_eq!(state.session_count(), 3);
        assert!(state.find_session(&ids[0]).is_none());
        assert!(state.find_session(&ids[49]).is_some());
    }

    #[test]
    fn least_recently_active_session_is_evicted_first() {
        let state = state(&[("MAX_SESSIONS", "2")]);
        let (first, _) = state.session(None);
        let (second, _) = state.session(None);
        std::thread::sleep(Duration::from_millis(2));
        // Usar la primera la convierte en la más reciente.
        state.session(Some(first));

        state.session(None);
        assert!(state.find_session(&first).is_some());
        assert!(state.find_session(&second).is_none());
    }

    #[test]
    fn idle_sessions_expire() {
        let state = state(&[("SESSION_TTL_SECS", "0")]);
        let (id, _) = state.session(None);
        assert!(state.find_session(&id).is_none());
        assert_eq!(state.session_count(), 0);
    }

    #[test]
    fn known_session_is_reused() {
        let state = state(&[]);
        let (id, a) = state.session(None);
        let (same, b) = state.session(Some(id));
        assert_eq!(id, same);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(state.session_count(), 1);
    }
}
