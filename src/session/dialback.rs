//! One-shot dialback key verification.

use crate::error::GatewayError;
use crate::ns;
use crate::stanza::NodeBuilder;
use crate::transport::PeerConnector;
use log::{debug, warn};
use std::time::Duration;

/// Verifies that a peer's claimed origin really issued a dialback key, by
/// opening a distinct connection toward that origin and asking it to
/// confirm the key. Constructed per claim, used once, discarded.
pub struct DialbackSession {
    correlation_id: String,
    /// Our side of the claim (the `to` the key was addressed to).
    local: String,
    /// The origin domain the peer claims vouches for it.
    remote: String,
    /// Stream id under which the peer presented the key.
    stream_id: String,
    key: String,
}

impl DialbackSession {
    pub fn new(
        correlation_id: &str,
        local: &str,
        remote: &str,
        stream_id: &str,
        key: &str,
    ) -> Self {
        Self {
            correlation_id: correlation_id.to_string(),
            local: local.to_string(),
            remote: remote.to_string(),
            stream_id: stream_id.to_string(),
            key: key.to_string(),
        }
    }

    /// Run the verification round trip, bounded by `timeout`. Timing out,
    /// failing to connect, or losing the link all count as invalid.
    pub async fn do_dialback(self, connector: &dyn PeerConnector, timeout: Duration) -> bool {
        let correlation_id = self.correlation_id.clone();
        let remote = self.remote.clone();
        match tokio::time::timeout(timeout, self.verify(connector)).await {
            Ok(Ok(valid)) => valid,
            Ok(Err(e)) => {
                warn!("[{correlation_id}] dialback verification against {remote} failed: {e}");
                false
            }
            Err(_) => {
                warn!("[{correlation_id}] dialback verification against {remote} timed out");
                false
            }
        }
    }

    async fn verify(self, connector: &dyn PeerConnector) -> Result<bool, GatewayError> {
        debug!(
            "[{}] verifying dialback key with {}",
            self.correlation_id, self.remote
        );
        let mut link = connector.connect(&self.remote).await?;

        let request = NodeBuilder::new("verify")
            .ns(ns::DIALBACK)
            .attr("from", self.local.as_str())
            .attr("to", self.remote.as_str())
            .attr("id", self.stream_id.as_str())
            .text(self.key.as_str())
            .build();
        link.sink.send(request).await?;

        let mut verdict = false;
        while let Some(reply) = link.source.recv().await {
            if reply.is("verify", ns::DIALBACK) {
                verdict = reply.attr("type") == Some("valid");
                break;
            }
            debug!(
                "[{}] ignoring {} while awaiting verify reply",
                self.correlation_id, reply.tag
            );
        }
        link.sink.close().await;
        Ok(verdict)
    }
}
