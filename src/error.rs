//! Gateway error types.

use crate::stanza::StanzaError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Stanza(#[from] StanzaError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("outbound queue full")]
    QueueFull,

    #[error("no route to domain: {0}")]
    NoRoute(String),

    #[error("call not found: {0}")]
    CallNotFound(String),

    #[error("no identity mapping for: {0}")]
    NoMapping(String),

    #[error("sip error: {0}")]
    Sip(String),

    #[error("relay error: {0}")]
    Relay(String),

    #[error("dialback failed")]
    DialbackFailed,
}
