//! Shared application state: the session registry and the process-wide
//! transcription worker (§5 "One dedicated transcription worker thread
//! per STT model instance").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use voice_agent_config::Settings;
use voice_agent_pipeline::TranscriptionWorker;

use crate::message::ServerMessage;
use crate::session::Session;
use crate::ServerError;

/// How long a session may sit idle before the sweep reaps it.
const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Application state shared across all axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub worker: Arc<TranscriptionWorker>,
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
    pub metrics_handle: PrometheusHandle,
}

impl AppState {
    pub fn new(config: Settings, worker: Arc<TranscriptionWorker>, metrics_handle: PrometheusHandle) -> Self {
        Self {
            config: Arc::new(config),
            worker,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            metrics_handle,
        }
    }

    /// Creates a new session, registers it, and returns an outbound
    /// receiver the transport layer forwards to the socket.
    pub fn create_session(
        &self,
        id: String,
    ) -> Result<(Arc<Session>, broadcast::Receiver<ServerMessage>), ServerError> {
        let (session, outbound_rx) = Session::new(id.clone(), &self.config, self.worker.clone())?;
        self.sessions.write().insert(id, session.clone());
        crate::metrics::record_session_opened();
        Ok((session, outbound_rx))
    }

    pub fn get_session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    pub fn remove_session(&self, id: &str) {
        if let Some(session) = self.sessions.write().remove(id) {
            session.shutdown();
            crate::metrics::record_session_closed();
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Background sweep that reaps sessions idle past `SESSION_IDLE_TIMEOUT`
    /// (§5 "one optional cleanup thread in the out-of-scope session
    /// recovery subsystem" — here scoped to idle expiry only, not full
    /// recovery).
    pub fn spawn_expiry_sweep(&self) {
        let state = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                state.sweep_expired_sessions();
                crate::metrics::record_transcription_queue_depth(state.worker.queue_len());
            }
        });
    }

    fn sweep_expired_sessions(&self) {
        let expired: Vec<String> = self
            .sessions
            .read()
            .iter()
            .filter(|(_, session)| session.idle_for() > SESSION_IDLE_TIMEOUT)
            .map(|(id, _)| id.clone())
            .collect();

        for id in expired {
            tracing::info!(session_id = %id, "reaping idle session");
            self.remove_session(&id);
        }
    }
}
