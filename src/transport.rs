//! Seam over the federation stream transport.
//!
//! Wire framing, XML serialization and TLS live outside this crate; a
//! connection surfaces here as a sink and a source of decoded stanzas.
//! [`channel_link`] provides an in-memory implementation used by tests.

use crate::error::GatewayError;
use crate::stanza::Node;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Outbound half of a federation connection.
#[async_trait]
pub trait StanzaSink: Send + Sync {
    async fn send(&mut self, stanza: Node) -> Result<(), GatewayError>;
    async fn close(&mut self);
}

/// Inbound half of a federation connection. `None` means the peer
/// disconnected.
#[async_trait]
pub trait StanzaSource: Send {
    async fn recv(&mut self) -> Option<Node>;
}

/// A freshly established connection, before any trust negotiation.
pub struct FederationLink {
    pub sink: Box<dyn StanzaSink>,
    pub source: Box<dyn StanzaSource>,
    /// Stream id this side assigned when opening the stream header.
    pub stream_id: String,
}

/// Opens new outbound federation connections by domain. Implemented by the
/// network layer; tests substitute an in-memory router.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(&self, domain: &str) -> Result<FederationLink, GatewayError>;
}

/// The far side of an in-memory link: what the "peer" sees.
pub struct RemoteEnd {
    /// Stanzas the local side sent.
    pub rx: mpsc::UnboundedReceiver<Node>,
    /// Feed stanzas to the local side.
    pub tx: mpsc::UnboundedSender<Node>,
}

struct ChannelSink {
    tx: mpsc::UnboundedSender<Node>,
}

#[async_trait]
impl StanzaSink for ChannelSink {
    async fn send(&mut self, stanza: Node) -> Result<(), GatewayError> {
        self.tx
            .send(stanza)
            .map_err(|_| GatewayError::Transport("link closed".to_string()))
    }

    async fn close(&mut self) {}
}

struct ChannelSource {
    rx: mpsc::UnboundedReceiver<Node>,
}

#[async_trait]
impl StanzaSource for ChannelSource {
    async fn recv(&mut self) -> Option<Node> {
        self.rx.recv().await
    }
}

/// Build an in-memory federation link and the matching remote end.
pub fn channel_link(stream_id: &str) -> (FederationLink, RemoteEnd) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let link = FederationLink {
        sink: Box::new(ChannelSink { tx: out_tx }),
        source: Box::new(ChannelSource { rx: in_rx }),
        stream_id: stream_id.to_string(),
    };
    let remote = RemoteEnd {
        rx: out_rx,
        tx: in_tx,
    };
    (link, remote)
}
