//! SIP stack seam.

use crate::calls::CallSession;
use crate::error::GatewayError;
use crate::message::ChatMessage;
use async_trait::async_trait;

/// The telephony side of the gateway. The core hands over validated call
/// intents; dialog state and SIP wire format stay behind this trait.
/// Failures are logged by the caller, never retried.
#[async_trait]
pub trait SipService: Send + Sync {
    /// Originate an INVITE for a call offered from the federation side.
    async fn send_invite(&self, call: &CallSession, domain: &str) -> Result<(), GatewayError>;

    /// Complete a call the federation side accepted (SIP 200 equivalent).
    async fn accept_call(&self, call: &CallSession) -> Result<(), GatewayError>;

    async fn send_reject(&self, call: &CallSession) -> Result<(), GatewayError>;

    async fn send_bye(&self, call: &CallSession) -> Result<(), GatewayError>;

    /// Relay an instant message to the SIP side.
    async fn send_message(&self, msg: &ChatMessage, domain: &str) -> Result<(), GatewayError>;

    /// Local address advertised in ICE-lite candidates.
    fn local_ip(&self) -> String;
}
