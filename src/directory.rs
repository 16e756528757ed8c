//! Subscription bookkeeping and identity mapping seam.
//!
//! Persistence of watcher/subscription state and the SIP NOTIFY/SUBSCRIBE
//! dialogs live outside the core; the dispatch path only decides which
//! operation applies.

use crate::error::GatewayError;
use crate::jid::Jid;
use crate::presence::Presence;
use async_trait::async_trait;
use std::sync::Arc;

/// One SIP-side subscription dialog (either direction).
#[async_trait]
pub trait SipSubscription: Send + Sync {
    /// Domain of the remote party, used to keep outbound signaling on the
    /// domain the peer subscribed from.
    fn peer_domain(&self) -> String;

    /// Push presence state to the watcher. `terminate` closes the dialog.
    async fn send_notify(
        &self,
        terminate: bool,
        presence: Option<&Presence>,
    ) -> Result<(), GatewayError>;

    /// (Re-)issue the SUBSCRIBE. `terminate` sends a zero-expiry one.
    async fn send_subscribe(&self, terminate: bool) -> Result<(), GatewayError>;
}

/// Watcher/subscription registry plus identity mapping between SIP-side
/// identifiers and federation addresses.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Subscription where `from` watches `to` (the SIP side is notified of
    /// `from`'s presence).
    async fn get_watcher(&self, from: &str, to: &str) -> Option<Arc<dyn SipSubscription>>;

    /// Subscription where `from` is watched by `to`.
    async fn get_subscription(&self, from: &str, to: &str) -> Option<Arc<dyn SipSubscription>>;

    /// Create and register a subscription of `from` to `to`.
    async fn add_subscriber(&self, from: &str, to: &str) -> Arc<dyn SipSubscription>;

    async fn remove_subscription(&self, from: &str, to: &str)
    -> Option<Arc<dyn SipSubscription>>;

    async fn remove_watcher(&self, from: &str, to: &str) -> Option<Arc<dyn SipSubscription>>;

    /// Map a federation address to its SIP-side identifier.
    fn to_sip_id(&self, jid: &Jid) -> String;

    /// Map a SIP-side identifier back to a federation address.
    fn to_jid(&self, sip_id: &str) -> Option<Jid>;

    /// Record that this peer resource advertised voice support.
    async fn add_voice_resource(&self, jid: &Jid);

    /// Resource to target when placing a call to this peer.
    async fn voice_resource(&self, jid: &Jid) -> Option<String>;
}
