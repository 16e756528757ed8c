//! The per-connection actor.
//!
//! One [`Session`] owns one federation stream. Inbound stanzas are
//! classified and dispatched strictly sequentially by the connection's
//! task; outbound stanzas all pass through the [`Session::send_packet`]
//! funnel, which queues them until dialback has confirmed the peer and
//! then drains the queue in enqueue order. Only dialback stanzas
//! themselves bypass the funnel.

mod classify;
mod dialback;
mod disco;
mod manager;
mod presence;
pub(crate) mod signaling;

pub use dialback::DialbackSession;
pub use manager::SessionManager;

use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::ns;
use crate::stanza::{Node, NodeBuilder};
use crate::transport::{FederationLink, StanzaSink, StanzaSource};
use classify::{InboundStanza, classify};
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

struct Outbound {
    confirmed: bool,
    queue: VecDeque<Node>,
    sink: Box<dyn StanzaSink>,
}

/// One federation connection, one direction of trust.
pub struct Session {
    /// Diagnostic correlation id carried in every log line.
    pub internal_call_id: String,
    /// Local domain this connection answers for.
    pub host: String,
    /// Stream id assigned when the stream was opened; dialback keys are
    /// verified under it.
    pub stream_id: String,
    peer_domain: StdMutex<Option<String>>,
    /// Key generated when this side challenged the peer; compared against
    /// inbound `db:verify` requests.
    session_key: StdMutex<Option<String>>,
    id_num: AtomicU64,
    queue_cap: usize,
    outbound: Mutex<Outbound>,
}

impl Session {
    /// Wrap a fresh link. The source is handed back for the caller's run
    /// loop; the session keeps the sink.
    pub fn new(host: &str, link: FederationLink, queue_cap: usize) -> (Arc<Self>, Box<dyn StanzaSource>) {
        let session = Arc::new(Self {
            internal_call_id: hex::encode(rand::random::<[u8; 4]>()),
            host: host.to_string(),
            stream_id: link.stream_id,
            peer_domain: StdMutex::new(None),
            session_key: StdMutex::new(None),
            id_num: AtomicU64::new(1),
            queue_cap,
            outbound: Mutex::new(Outbound {
                confirmed: false,
                queue: VecDeque::new(),
                sink: link.sink,
            }),
        });
        (session, link.source)
    }

    /// Next stanza id on this connection. Ids are never reused or reset,
    /// even across unrelated calls.
    pub fn next_id(&self) -> String {
        self.id_num.fetch_add(1, Ordering::Relaxed).to_string()
    }

    pub fn peer_domain(&self) -> Option<String> {
        self.peer_domain.lock().ok().and_then(|g| g.clone())
    }

    fn set_peer_domain(&self, domain: &str) {
        if let Ok(mut guard) = self.peer_domain.lock() {
            *guard = Some(domain.to_string());
        }
    }

    fn session_key(&self) -> Option<String> {
        self.session_key.lock().ok().and_then(|g| g.clone())
    }

    pub async fn is_confirmed(&self) -> bool {
        self.outbound.lock().await.confirmed
    }

    /// The single funnel for outbound traffic: queue while unconfirmed,
    /// transmit once confirmed. Failures are logged here so no call site
    /// can silently swallow one.
    pub async fn send_packet(&self, stanza: Node) -> Result<(), GatewayError> {
        let mut outbound = self.outbound.lock().await;
        if outbound.confirmed {
            if let Err(e) = outbound.sink.send(stanza).await {
                warn!("[{}] outbound send failed: {e}", self.internal_call_id);
                return Err(e);
            }
            return Ok(());
        }
        if outbound.queue.len() >= self.queue_cap {
            warn!(
                "[{}] outbound queue full ({}), dropping stanza",
                self.internal_call_id, self.queue_cap
            );
            return Err(GatewayError::QueueFull);
        }
        outbound.queue.push_back(stanza);
        Ok(())
    }

    /// Direct transmission for dialback stanzas, which negotiate the very
    /// trust the funnel waits on.
    async fn send_now(&self, stanza: Node) -> Result<(), GatewayError> {
        let mut outbound = self.outbound.lock().await;
        if let Err(e) = outbound.sink.send(stanza).await {
            warn!("[{}] outbound send failed: {e}", self.internal_call_id);
            return Err(e);
        }
        Ok(())
    }

    /// Flip to confirmed and drain the queue in enqueue order. Holding the
    /// outbound lock across the drain keeps concurrently generated packets
    /// from interleaving inside it.
    async fn confirm_and_flush(&self) -> Result<(), GatewayError> {
        let mut outbound = self.outbound.lock().await;
        if outbound.confirmed {
            return Ok(());
        }
        outbound.confirmed = true;
        info!(
            "[{}] peer confirmed, flushing {} queued stanzas",
            self.internal_call_id,
            outbound.queue.len()
        );
        while let Some(stanza) = outbound.queue.pop_front() {
            outbound.sink.send(stanza).await?;
        }
        Ok(())
    }

    /// Challenge the peer: generate our dialback key and present it. The
    /// session stays unconfirmed until the peer's verdict arrives.
    pub(crate) async fn send_db_result(&self, peer: &str) -> Result<(), GatewayError> {
        let key = hex::encode(rand::random::<[u8; 16]>());
        if let Ok(mut guard) = self.session_key.lock() {
            *guard = Some(key.clone());
        }
        let stanza = NodeBuilder::new("result")
            .ns(ns::DIALBACK)
            .attr("from", self.host.as_str())
            .attr("to", peer)
            .text(key)
            .build();
        self.send_now(stanza).await
    }

    /// Protocol-level acknowledgment: result IQ echoing the request id.
    pub(crate) async fn ack_iq(&self, packet: &Node) -> Result<(), GatewayError> {
        let reply = NodeBuilder::new("iq")
            .ns(ns::SERVER)
            .attr("from", packet.attr("to").unwrap_or(""))
            .attr("to", packet.attr("from").unwrap_or(""))
            .attr("id", packet.attr("id").unwrap_or(""))
            .attr("type", "result")
            .build();
        self.send_packet(reply).await
    }

    pub async fn close(&self) {
        self.outbound.lock().await.sink.close().await;
    }
}

/// Drive one connection until the peer disconnects or a fatal fault.
/// Teardown deregisters the session so later lookups open a fresh link.
///
/// The future is boxed: dispatch can open new outbound connections whose
/// loops are spawned from inside this one, so an unboxed `run` would have
/// a recursively defined future type.
pub(crate) fn run(
    gateway: Arc<Gateway>,
    session: Arc<Session>,
    mut source: Box<dyn StanzaSource>,
) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>> {
    Box::pin(async move {
        while let Some(stanza) = source.recv().await {
            if !handle_stanza(&gateway, &session, &stanza).await {
                break;
            }
        }
        session.close().await;
        gateway.sessions.remove_exact(&session).await;
        info!("[{}] connection closed", session.internal_call_id);
    })
}

/// Dispatch one inbound stanza. Returns false when the connection must be
/// torn down. A malformed stanza is logged and dropped; the connection
/// survives everything except transport faults and dialback failure.
pub(crate) async fn handle_stanza(
    gateway: &Arc<Gateway>,
    session: &Arc<Session>,
    stanza: &Node,
) -> bool {
    match dispatch(gateway, session, stanza).await {
        Ok(keep_open) => keep_open,
        Err(GatewayError::Transport(e)) => {
            error!("[{}] transport fault: {e}", session.internal_call_id);
            false
        }
        Err(e) => {
            warn!(
                "[{}] dropping {} stanza: {e}",
                session.internal_call_id, stanza.tag
            );
            true
        }
    }
}

async fn dispatch(
    gateway: &Arc<Gateway>,
    session: &Arc<Session>,
    stanza: &Node,
) -> Result<bool, GatewayError> {
    match classify(stanza) {
        InboundStanza::DialbackResult => handle_db_result(gateway, session, stanza).await,
        InboundStanza::DialbackVerify => {
            handle_db_verify(gateway, session, stanza).await?;
            Ok(true)
        }
        InboundStanza::Chat => {
            presence::handle_message(gateway, session, stanza).await?;
            Ok(true)
        }
        InboundStanza::Presence => {
            presence::handle_presence(gateway, session, stanza).await?;
            Ok(true)
        }
        InboundStanza::DiscoQuery => {
            disco::handle_disco(gateway, session, stanza).await?;
            Ok(true)
        }
        InboundStanza::VcardQuery => {
            disco::handle_vcard(gateway, session, stanza).await?;
            Ok(true)
        }
        InboundStanza::Jingle { action, element } => {
            signaling::handle_call_stanza(gateway, session, stanza, element, true, action).await?;
            Ok(true)
        }
        InboundStanza::Gingle { action, element } => {
            signaling::handle_call_stanza(gateway, session, stanza, element, false, action)
                .await?;
            Ok(true)
        }
        InboundStanza::IqError => {
            signaling::handle_iq_error(gateway, stanza).await?;
            Ok(true)
        }
        InboundStanza::Unhandled => {
            debug!(
                "[{}] unhandled {} stanza",
                session.internal_call_id, stanza.tag
            );
            Ok(true)
        }
    }
}

/// Inbound `db:result`. With a verdict attribute it answers our own
/// challenge; with key text it is a claim we must verify against the
/// claimed origin before vouching for the peer.
async fn handle_db_result(
    gateway: &Arc<Gateway>,
    session: &Arc<Session>,
    stanza: &Node,
) -> Result<bool, GatewayError> {
    let from = stanza.attr("from").unwrap_or("");
    let to = stanza.attr("to").unwrap_or("");

    if let Some(verdict) = stanza.attr("type").filter(|t| !t.is_empty()) {
        info!(
            "[{}] dialback result from {from}: {verdict}",
            session.internal_call_id
        );
        session.confirm_and_flush().await?;
        return Ok(true);
    }

    let key = stanza.text();
    session.set_peer_domain(from);
    let dialback = DialbackSession::new(
        &session.internal_call_id,
        to,
        from,
        &session.stream_id,
        &key,
    );
    let valid = dialback
        .do_dialback(gateway.connector.as_ref(), gateway.config.dialback_timeout)
        .await;

    let reply = NodeBuilder::new("result")
        .ns(ns::DIALBACK)
        .attr("from", to)
        .attr("to", from)
        .attr("type", if valid { "valid" } else { "invalid" })
        .build();
    session.send_now(reply).await?;

    if !valid {
        warn!(
            "[{}] dialback claim from {from} invalid, closing connection",
            session.internal_call_id
        );
        return Ok(false);
    }
    // Never displace an existing session for the pair: a pending outbound
    // challenger holds the key the peer may still db:verify.
    gateway
        .sessions
        .add_session_if_vacant(to, from, session.clone())
        .await;
    session.confirm_and_flush().await?;
    Ok(true)
}

/// Inbound `db:verify`: the peer asks whether we issued this key. Valid
/// iff we hold an active session toward the asking domain whose key
/// matches exactly; absence of a match is `invalid`, never an error.
async fn handle_db_verify(
    gateway: &Arc<Gateway>,
    session: &Arc<Session>,
    stanza: &Node,
) -> Result<(), GatewayError> {
    let from = stanza.attr("from").unwrap_or("");
    let to = stanza.attr("to").unwrap_or("");
    let key = stanza.text();

    let valid = match gateway.sessions.get_session(to, from).await {
        Some(target) => target.session_key().is_some_and(|own| own == key),
        None => false,
    };
    debug!(
        "[{}] db:verify from {from}: {}",
        session.internal_call_id,
        if valid { "valid" } else { "invalid" }
    );

    let reply = NodeBuilder::new("verify")
        .ns(ns::DIALBACK)
        .attr("from", to)
        .attr("to", from)
        .attr("id", stanza.attr("id").unwrap_or(""))
        .attr("type", if valid { "valid" } else { "invalid" })
        .build();
    session.send_now(reply).await
}
