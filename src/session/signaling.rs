//! Call signaling, both dialects normalized onto one call model.
//!
//! Inbound Jingle/Gingle actions map to five logical operations
//! (initiate, transport, accept, terminate, reject); unknown call ids are
//! silent no-ops because the call has already ended or was never tracked.

use super::Session;
use crate::calls::stanza::{self as call_stanza, Candidate};
use crate::calls::{CallSession, StreamType};
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::ns;
use crate::stanza::Node;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::Mutex;

enum CallAction {
    Initiate,
    Transport { reply_accept: bool },
    Accept,
    Terminate,
    Reject,
    TransportAccept,
    Other,
}

fn call_action(jingle: bool, action: &str) -> CallAction {
    if jingle {
        match action {
            "session-initiate" => CallAction::Initiate,
            "session-accept" => CallAction::Accept,
            "session-terminate" => CallAction::Terminate,
            "transport-info" => CallAction::Transport {
                reply_accept: false,
            },
            _ => CallAction::Other,
        }
    } else {
        match action {
            "initiate" => CallAction::Initiate,
            "accept" => CallAction::Accept,
            "terminate" => CallAction::Terminate,
            "reject" => CallAction::Reject,
            "candidates" => CallAction::Transport {
                reply_accept: false,
            },
            "transport-info" => CallAction::Transport { reply_accept: true },
            "transport-accept" => CallAction::TransportAccept,
            _ => CallAction::Other,
        }
    }
}

fn sid_of<'a>(element: &'a Node, jingle: bool) -> Option<&'a str> {
    element.attr(if jingle { "sid" } else { "id" })
}

pub(crate) async fn handle_call_stanza(
    gateway: &Arc<Gateway>,
    session: &Arc<Session>,
    packet: &Node,
    element: &Node,
    jingle: bool,
    action: &str,
) -> Result<(), GatewayError> {
    match call_action(jingle, action) {
        CallAction::Initiate => handle_initiate(gateway, session, packet, element, jingle).await,
        CallAction::Transport { reply_accept } => {
            handle_transport(gateway, session, packet, element, jingle, reply_accept).await
        }
        CallAction::Accept => handle_accept(gateway, session, packet, element, jingle).await,
        CallAction::Terminate => handle_terminate(gateway, session, packet, element, jingle).await,
        CallAction::Reject => handle_reject(gateway, element, jingle).await,
        CallAction::TransportAccept => session.ack_iq(packet).await,
        CallAction::Other => {
            debug!(
                "[{}] ignoring call action {action}",
                session.internal_call_id
            );
            Ok(())
        }
    }
}

/// New call offered from the federation side. Acked first; the ack does
/// not depend on the downstream SIP attempt.
async fn handle_initiate(
    gateway: &Arc<Gateway>,
    session: &Arc<Session>,
    packet: &Node,
    element: &Node,
    jingle: bool,
) -> Result<(), GatewayError> {
    session.ack_iq(packet).await?;

    let relay = gateway.relays.allocate().await?;
    let mut call = CallSession::new(gateway.next_correlation_id(), relay, None);
    call_stanza::parse_initiate(&mut call, packet, element, jingle)?;
    if !call.offer_vpayloads.is_empty() {
        call.vrelay = Some(gateway.relays.allocate().await?);
    }
    info!(
        "[{}] inbound call {} from {} to {}",
        call.internal_call_id, call.sid, call.remote, call.local
    );

    // Keep outbound SIP signaling on the domain the remote party
    // subscribed from; fall back to our own host.
    let remote_id = gateway.directory.to_sip_id(&call.remote);
    let local_id = gateway.directory.to_sip_id(&call.local);
    let domain = match gateway.directory.get_watcher(&remote_id, &local_id).await {
        Some(watcher) => watcher.peer_domain(),
        None => gateway.config.host.clone(),
    };

    let call = Arc::new(Mutex::new(call));
    gateway.calls.add_session(call.clone()).await;

    let call = call.lock().await;
    if let Err(e) = gateway.sip.send_invite(&call, &domain).await {
        warn!("[{}] SIP invite failed: {e}", call.internal_call_id);
    }
    Ok(())
}

/// Peer candidates arriving. Our own candidates for the stream pair go
/// out first if they have not yet; then each udp candidate is bound on
/// the matching relay.
async fn handle_transport(
    gateway: &Arc<Gateway>,
    session: &Arc<Session>,
    packet: &Node,
    element: &Node,
    jingle: bool,
    reply_accept: bool,
) -> Result<(), GatewayError> {
    session.ack_iq(packet).await?;

    let Some(sid) = sid_of(element, jingle) else {
        return Err(GatewayError::Stanza(
            crate::stanza::StanzaError::MissingAttr(if jingle { "sid" } else { "id" }),
        ));
    };
    let Some(call) = gateway.calls.get_session(sid).await else {
        debug!(
            "[{}] candidates for unknown call {sid}, ignoring",
            session.internal_call_id
        );
        return Ok(());
    };
    let candidates = call_stanza::collect_candidates(element)?;

    let mut call = call.lock().await;
    for candidate in &candidates {
        if !candidate.is_udp() {
            continue;
        }
        let Some(stream) = candidate.stream() else {
            debug!(
                "[{}] candidate for unknown stream {}, ignoring",
                call.internal_call_id, candidate.name
            );
            continue;
        };
        ensure_advertised(gateway, session, &mut call, stream).await;
        bind_candidate(&call, stream, candidate).await;
    }

    if reply_accept {
        let reply = call_stanza::build_transport_accept(packet, element, &session.next_id());
        session.send_packet(reply).await?;
    }
    Ok(())
}

async fn bind_candidate(call: &CallSession, stream: StreamType, candidate: &Candidate) {
    let Some(relay) = call.relay_for(stream) else {
        debug!(
            "[{}] no relay for {} candidate, ignoring",
            call.internal_call_id,
            stream.name()
        );
        return;
    };
    let local = call.current_credential(stream);
    if let Err(e) = relay
        .send_bind(
            &candidate.username,
            &local,
            &candidate.address,
            candidate.port,
            stream.is_rtcp(),
        )
        .await
    {
        warn!(
            "[{}] relay bind for {} failed: {e}",
            call.internal_call_id,
            stream.name()
        );
    }
}

/// Advertise our own candidates for the stream's pair, at most once per
/// call: the flag flips before sending, so a failed send is not retried.
pub(crate) async fn ensure_advertised(
    gateway: &Arc<Gateway>,
    session: &Arc<Session>,
    call: &mut CallSession,
    stream: StreamType,
) {
    let already = if stream.is_video() {
        std::mem::replace(&mut call.sent_vtransport, true)
    } else {
        std::mem::replace(&mut call.sent_transport, true)
    };
    if already {
        return;
    }
    let (rtcp, rtp) = if stream.is_video() {
        (StreamType::VideoRtcp, StreamType::VideoRtp)
    } else {
        (StreamType::Rtcp, StreamType::Rtp)
    };
    for stream in [rtcp, rtp] {
        if let Err(e) = send_transport_candidates(gateway, session, call, stream).await {
            warn!(
                "[{}] advertising {} candidates failed: {e}",
                call.internal_call_id,
                stream.name()
            );
        }
    }
}

/// One `candidates` stanza advertising the relay port for the stream,
/// under the stream's (lazily generated, then stable) credential.
pub(crate) async fn send_transport_candidates(
    gateway: &Arc<Gateway>,
    session: &Arc<Session>,
    call: &mut CallSession,
    stream: StreamType,
) -> Result<(), GatewayError> {
    let Some(relay) = call.relay_for(stream) else {
        return Ok(());
    };
    let port = if stream.is_rtcp() {
        relay.jabber_rtcp_port()
    } else {
        relay.jabber_port()
    };
    let address = gateway.sip.local_ip();
    let username = call.stream_credential(stream);
    let stanza =
        call_stanza::build_candidates(call, stream, &username, &address, port, &session.next_id());
    session.send_packet(stanza).await
}

/// Single audio transport-info advertisement used for audio-only calls.
pub(crate) async fn send_transport_info(
    gateway: &Arc<Gateway>,
    session: &Arc<Session>,
    call: &mut CallSession,
) -> Result<(), GatewayError> {
    let port = call.relay.jabber_port();
    let address = gateway.sip.local_ip();
    let username = call.stream_credential(StreamType::Rtp);
    let stanza =
        call_stanza::build_transport_info(call, &username, &address, port, &session.next_id());
    session.send_packet(stanza).await
}

async fn handle_accept(
    gateway: &Arc<Gateway>,
    session: &Arc<Session>,
    packet: &Node,
    element: &Node,
    jingle: bool,
) -> Result<(), GatewayError> {
    session.ack_iq(packet).await?;

    let Some(sid) = sid_of(element, jingle) else {
        return Ok(());
    };
    let Some(call) = gateway.calls.get_session(sid).await else {
        debug!(
            "[{}] accept for unknown call {sid}, ignoring",
            session.internal_call_id
        );
        return Ok(());
    };

    let mut call = call.lock().await;
    call_stanza::parse_accept(&mut call, element, jingle)?;
    info!("[{}] call {} accepted by peer", call.internal_call_id, sid);
    if let Err(e) = gateway.sip.accept_call(&call).await {
        warn!("[{}] SIP accept failed: {e}", call.internal_call_id);
    }
    Ok(())
}

async fn handle_terminate(
    gateway: &Arc<Gateway>,
    session: &Arc<Session>,
    packet: &Node,
    element: &Node,
    jingle: bool,
) -> Result<(), GatewayError> {
    if !jingle {
        session.ack_iq(packet).await?;
    }
    let Some(sid) = sid_of(element, jingle) else {
        return Ok(());
    };
    let Some(call) = gateway.calls.get_session(sid).await else {
        debug!(
            "[{}] terminate for unknown call {sid}, ignoring",
            session.internal_call_id
        );
        return Ok(());
    };

    {
        let call = call.lock().await;
        info!("[{}] call {} terminated by peer", call.internal_call_id, sid);
        if let Err(e) = gateway.sip.send_bye(&call).await {
            warn!("[{}] SIP bye failed: {e}", call.internal_call_id);
        }
    }
    gateway.calls.remove_session(sid).await;
    Ok(())
}

async fn handle_reject(
    gateway: &Arc<Gateway>,
    element: &Node,
    jingle: bool,
) -> Result<(), GatewayError> {
    let Some(sid) = sid_of(element, jingle) else {
        return Ok(());
    };
    reject_call(gateway, sid).await
}

/// IQ errors: `type=cancel` rejects the call it refers to; anything else
/// is logged and ignored, never fatal to the call.
pub(crate) async fn handle_iq_error(
    gateway: &Arc<Gateway>,
    packet: &Node,
) -> Result<(), GatewayError> {
    let cancel = packet
        .get_optional_child("error")
        .is_some_and(|e| e.attr("type") == Some("cancel"));
    if !cancel {
        debug!("ignoring non-cancel error iq from {:?}", packet.attr("from"));
        return Ok(());
    }
    let sid = packet
        .get_child_ns("session", ns::GINGLE_SESSION)
        .and_then(|s| s.attr("id"))
        .or_else(|| {
            packet
                .get_child_ns("jingle", ns::JINGLE)
                .and_then(|j| j.attr("sid"))
        });
    let Some(sid) = sid else {
        return Ok(());
    };
    reject_call(gateway, sid).await
}

async fn reject_call(gateway: &Arc<Gateway>, sid: &str) -> Result<(), GatewayError> {
    let Some(call) = gateway.calls.get_session(sid).await else {
        debug!("reject for unknown call {sid}, ignoring");
        return Ok(());
    };
    {
        let call = call.lock().await;
        info!("[{}] call {} rejected by peer", call.internal_call_id, sid);
        if let Err(e) = gateway.sip.send_reject(&call).await {
            warn!("[{}] SIP reject failed: {e}", call.internal_call_id);
        }
    }
    gateway.calls.remove_session(sid).await;
    Ok(())
}
