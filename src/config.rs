//! Process-wide gateway configuration.
//!
//! Built once before any connection starts and treated as read-only
//! thereafter; per-connection code only ever borrows it.

use sha1::{Digest, Sha1};
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Local federation domain the gateway answers for.
    pub host: String,
    /// The gateway's own user identity; subscriptions addressed to it are
    /// auto-accepted instead of creating a real SIP subscription.
    pub service_name: String,
    /// Resource appended to locally originated call identities.
    pub resource: String,
    /// Resource representing the telephony endpoint in outbound presence.
    pub phone_resource: String,
    /// Capability node advertised in disco/caps.
    pub caps_node: String,
    pub caps_version: String,
    /// JPEG avatar served in vCard replies.
    pub icon: Vec<u8>,
    icon_hash: String,
    /// Bound on the dialback verification round trip; timing out counts
    /// as invalid.
    pub dialback_timeout: Duration,
    /// Cap on stanzas buffered per connection before dialback confirms.
    pub outbound_queue_cap: usize,
}

impl GatewayConfig {
    pub fn new(host: impl Into<String>, service_name: impl Into<String>) -> Self {
        let host = host.into();
        let service_name = service_name.into();
        Self {
            caps_node: format!("http://{host}/caps"),
            caps_version: "0.2".to_string(),
            resource: service_name.clone(),
            phone_resource: format!("{service_name}-phone"),
            icon: Vec::new(),
            icon_hash: hex::encode(Sha1::digest([])),
            dialback_timeout: Duration::from_secs(30),
            outbound_queue_cap: 128,
            host,
            service_name,
        }
    }

    pub fn with_icon(mut self, icon: Vec<u8>) -> Self {
        self.icon_hash = hex::encode(Sha1::digest(&icon));
        self.icon = icon;
        self
    }

    /// Hex SHA-1 of the avatar, advertised in presence photo updates.
    pub fn icon_hash(&self) -> &str {
        &self.icon_hash
    }
}
