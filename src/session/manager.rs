//! Registry of live federation connections.

use super::Session;
use crate::error::GatewayError;
use crate::gateway::Gateway;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Map from `(local-domain, remote-domain)` to the active session for the
/// pair; at most one authenticated outbound-capable session per pair. The
/// lock is held across get-or-open so a race between two dispatch loops
/// never opens two links to the same peer.
#[derive(Default)]
pub struct SessionManager {
    sessions: Mutex<HashMap<(String, String), Arc<Session>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_session(&self, local: &str, remote: &str, session: Arc<Session>) {
        debug!(
            "[{}] registering session for {local} <-> {remote}",
            session.internal_call_id
        );
        let replaced = self
            .sessions
            .lock()
            .await
            .insert((local.to_string(), remote.to_string()), session);
        if let Some(old) = replaced {
            warn!(
                "[{}] replaced live session for {local} <-> {remote}",
                old.internal_call_id
            );
        }
    }

    /// Register only when the pair has no session yet. Verified inbound
    /// connections go through here: they must not evict an outbound
    /// session whose dialback key the peer has yet to verify.
    pub async fn add_session_if_vacant(
        &self,
        local: &str,
        remote: &str,
        session: Arc<Session>,
    ) -> bool {
        match self
            .sessions
            .lock()
            .await
            .entry((local.to_string(), remote.to_string()))
        {
            Entry::Vacant(slot) => {
                debug!(
                    "[{}] registering session for {local} <-> {remote}",
                    session.internal_call_id
                );
                slot.insert(session);
                true
            }
            Entry::Occupied(existing) => {
                debug!(
                    "[{}] keeping existing session for {local} <-> {remote}",
                    existing.get().internal_call_id
                );
                false
            }
        }
    }

    pub async fn get_session(&self, local: &str, remote: &str) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .await
            .get(&(local.to_string(), remote.to_string()))
            .cloned()
    }

    pub async fn remove_session(&self, local: &str, remote: &str) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .await
            .remove(&(local.to_string(), remote.to_string()))
    }

    /// Drop this exact session from the registry, wherever it is keyed.
    /// A replacement session registered under the same pair survives.
    pub async fn remove_exact(&self, session: &Arc<Session>) {
        self.sessions
            .lock()
            .await
            .retain(|_, registered| !Arc::ptr_eq(registered, session));
    }

    /// Existing session for the peer, or a freshly opened one that has
    /// already presented its dialback key. Callers never need to know
    /// whether the connection existed.
    pub async fn find_create_session(
        &self,
        gateway: &Arc<Gateway>,
        peer: &str,
    ) -> Result<Arc<Session>, GatewayError> {
        let local = gateway.config.host.clone();
        let key = (local.clone(), peer.to_string());

        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(&key) {
            return Ok(existing.clone());
        }

        let link = gateway.connector.connect(peer).await?;
        let (session, source) = Session::new(&local, link, gateway.config.outbound_queue_cap);
        info!(
            "[{}] opened outbound session to {peer}",
            session.internal_call_id
        );
        session.set_peer_domain(peer);
        session.send_db_result(peer).await?;
        sessions.insert(key, session.clone());
        drop(sessions);

        tokio::spawn(super::run(gateway.clone(), session.clone(), source));
        Ok(session)
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
