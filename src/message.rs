//! Instant messages relayed between the federation and the SIP side.

use crate::stanza::{Node, StanzaError};

#[derive(Debug, Clone)]
pub struct ChatMessage {
    /// SIP-side identifier of the sender.
    pub from: String,
    /// SIP-side identifier (or local user) of the recipient.
    pub to: String,
    pub body: String,
    pub subject: Option<String>,
    pub thread: Option<String>,
}

impl ChatMessage {
    /// Lift body/subject/thread off an inbound chat stanza. The caller
    /// fills in the identity fields after mapping the addresses.
    pub fn from_stanza(node: &Node) -> Result<Self, StanzaError> {
        let body = node
            .get_optional_child("body")
            .ok_or(StanzaError::MissingElement("body"))?
            .text();
        Ok(ChatMessage {
            from: String::new(),
            to: String::new(),
            body,
            subject: node
                .get_optional_child("subject")
                .map(|el| el.text())
                .filter(|s| !s.is_empty()),
            thread: node
                .get_optional_child("thread")
                .map(|el| el.text())
                .filter(|s| !s.is_empty()),
        })
    }
}
