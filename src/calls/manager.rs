//! Process-wide registry of live calls.

use super::state::CallSession;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Map from protocol-level call id to its negotiation record. A call is
/// reachable here from the moment either side assigned the id until
/// termination; lookups after removal return `None`, which callers treat
/// as "call already ended", never as a fault.
#[derive(Default)]
pub struct CallManager {
    calls: RwLock<HashMap<String, Arc<Mutex<CallSession>>>>,
}

impl CallManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call under its session id. Never two live entries share
    /// a key; a duplicate insert replaces and is logged.
    pub async fn add_session(&self, call: Arc<Mutex<CallSession>>) {
        let (sid, internal) = {
            let call = call.lock().await;
            (call.sid.clone(), call.internal_call_id.clone())
        };
        debug!("[{internal}] registering call session {sid}");
        if self
            .calls
            .write()
            .await
            .insert(sid.clone(), call)
            .is_some()
        {
            warn!("[{internal}] replaced live call session under id {sid}");
        }
    }

    /// `None` when absent: the call already ended or was never tracked.
    pub async fn get_session(&self, sid: &str) -> Option<Arc<Mutex<CallSession>>> {
        self.calls.read().await.get(sid).cloned()
    }

    pub async fn remove_session(&self, sid: &str) -> Option<Arc<Mutex<CallSession>>> {
        self.calls.write().await.remove(sid)
    }

    /// Live call whose remote party matches the given bare address. Used
    /// when a chat command refers to "the sender's call" without a sid.
    pub async fn find_by_remote(&self, remote: &crate::jid::Jid) -> Option<Arc<Mutex<CallSession>>> {
        let bare = remote.bare();
        for call in self.calls.read().await.values() {
            if call.lock().await.remote.bare() == bare {
                return Some(call.clone());
            }
        }
        None
    }

    pub async fn len(&self) -> usize {
        self.calls.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.calls.read().await.is_empty()
    }
}
