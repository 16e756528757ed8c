//! Presence/subscription relay and chat messages.
//!
//! Inbound presence is translated onto the SIP subscription model
//! (notify/subscribe dialogs held behind the [`Directory`] seam). A
//! subscription addressed to the gateway's own identity is auto-accepted
//! without creating a real subscription.

use super::Session;
use crate::calls::AudioPayload;
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::jid::Jid;
use crate::message::ChatMessage;
use crate::ns;
use crate::presence::Presence;
use crate::stanza::{Node, NodeBuilder, StanzaError};
use log::{debug, info, warn};
use std::sync::Arc;

fn parties(packet: &Node) -> Result<(Jid, Jid), GatewayError> {
    let from = packet
        .attrs()
        .required_string("from")?
        .parse()
        .map_err(|e| StanzaError::Parse(format!("bad 'from' address: {e}")))?;
    let to = packet
        .attrs()
        .required_string("to")?
        .parse()
        .map_err(|e| StanzaError::Parse(format!("bad 'to' address: {e}")))?;
    Ok((from, to))
}

pub(crate) async fn handle_presence(
    gateway: &Arc<Gateway>,
    session: &Arc<Session>,
    packet: &Node,
) -> Result<(), GatewayError> {
    let (from, to) = parties(packet)?;
    let from_id = gateway.directory.to_sip_id(&from);
    let to_id = gateway.directory.to_sip_id(&to);

    match packet.attr("type") {
        None => {
            record_voice_capability(gateway, packet, &from).await;
            notify_watcher(gateway, packet, &from, &from_id, &to_id).await;
        }
        Some("unavailable") => {
            notify_watcher(gateway, packet, &from, &from_id, &to_id).await;
        }
        Some("subscribe") => {
            if to.user == gateway.config.service_name {
                // Our own identity: auto-accept, no real subscription.
                let reply = NodeBuilder::new("presence")
                    .ns(ns::SERVER)
                    .attr("from", to.bare().to_string())
                    .attr("to", from.bare().to_string())
                    .attr("type", "subscribed")
                    .build();
                session.send_packet(reply).await?;
            } else if let Some(sub) = gateway.directory.get_subscription(&from_id, &to_id).await {
                if let Err(e) = sub.send_subscribe(false).await {
                    warn!("[{}] subscription refresh failed: {e}", session.internal_call_id);
                }
            } else {
                let sub = gateway.directory.add_subscriber(&from_id, &to_id).await;
                if let Err(e) = sub.send_subscribe(false).await {
                    warn!("[{}] subscribe failed: {e}", session.internal_call_id);
                }
            }
        }
        Some("unsubscribe") => {
            if to.user == gateway.config.service_name {
                return Ok(());
            }
            if let Some(sub) = gateway.directory.remove_subscription(&from_id, &to_id).await {
                if let Err(e) = sub.send_subscribe(true).await {
                    warn!("[{}] unsubscribe failed: {e}", session.internal_call_id);
                }
            }
            if let Some(watcher) = gateway.directory.remove_watcher(&from_id, &to_id).await {
                if let Err(e) = watcher.send_notify(true, None).await {
                    warn!("[{}] terminating notify failed: {e}", session.internal_call_id);
                }
            }
        }
        Some("subscribed") => {
            if let Some(watcher) = gateway.directory.get_watcher(&from_id, &to_id).await {
                if let Err(e) = watcher.send_notify(false, None).await {
                    warn!("[{}] notify failed: {e}", session.internal_call_id);
                }
            }
        }
        Some("probe") => {
            // Re-subscribe an existing dialog; otherwise a zero-length
            // subscription fetches the current state once.
            match gateway.directory.get_subscription(&from_id, &to_id).await {
                Some(sub) => {
                    if let Err(e) = sub.send_subscribe(false).await {
                        warn!("[{}] probe re-subscribe failed: {e}", session.internal_call_id);
                    }
                }
                None => {
                    let sub = gateway.directory.add_subscriber(&from_id, &to_id).await;
                    if let Err(e) = sub.send_subscribe(true).await {
                        warn!("[{}] probe fetch failed: {e}", session.internal_call_id);
                    }
                }
            }
        }
        Some(other) => {
            debug!(
                "[{}] ignoring presence type {other}",
                session.internal_call_id
            );
        }
    }
    Ok(())
}

/// A caps advertisement with the voice extension marker means this peer
/// resource can receive calls; remember it for outbound call targeting.
async fn record_voice_capability(gateway: &Arc<Gateway>, packet: &Node, from: &Jid) {
    let Some(caps) = packet.get_child_ns("c", ns::CAPS) else {
        return;
    };
    let voice = caps
        .attr("ext")
        .is_some_and(|ext| ext.split_whitespace().any(|e| e == ns::CAPS_VOICE_EXT));
    if voice && !from.resource.is_empty() {
        debug!("recording voice resource {from}");
        gateway.directory.add_voice_resource(from).await;
    }
}

async fn notify_watcher(
    gateway: &Arc<Gateway>,
    packet: &Node,
    from: &Jid,
    from_id: &str,
    to_id: &str,
) {
    let Some(watcher) = gateway.directory.get_watcher(from_id, to_id).await else {
        debug!("no watcher for {from_id} -> {to_id}, presence dropped");
        return;
    };
    let mut state = Presence::from_stanza(packet);
    state.from = from_id.to_string();
    state.to = to_id.to_string();
    if !from.resource.is_empty() {
        state.resource = Some(from.resource.clone());
    }
    if let Err(e) = watcher.send_notify(false, Some(&state)).await {
        warn!("presence notify for {from_id} failed: {e}");
    }
}

/// Chat messages. Two command bodies are handled locally: `callback`
/// places an audio call back to the sender, and `/dial:` forwards DTMF
/// digits into the sender's live call. Everything else relays to the SIP
/// side.
pub(crate) async fn handle_message(
    gateway: &Arc<Gateway>,
    session: &Arc<Session>,
    packet: &Node,
) -> Result<(), GatewayError> {
    let mut msg = ChatMessage::from_stanza(packet)?;
    let (from, to) = parties(packet)?;
    msg.from = gateway.directory.to_sip_id(&from);
    msg.to = gateway.directory.to_sip_id(&to);

    if msg.body == "callback" {
        info!(
            "[{}] callback request from {from}",
            session.internal_call_id
        );
        let offer = vec![AudioPayload::pcmu(), AudioPayload::pcma()];
        let local_user = msg.to.clone();
        gateway
            .start_call(&local_user, &from, offer, Vec::new())
            .await?;
        return Ok(());
    }

    if let Some(digits) = msg.body.strip_prefix("/dial:") {
        let Some(call) = gateway.calls.find_by_remote(&from).await else {
            debug!(
                "[{}] dtmf from {from} without a live call, ignoring",
                session.internal_call_id
            );
            return Ok(());
        };
        let call = call.lock().await;
        for digit in digits.trim().chars() {
            if let Err(e) = call.relay.send_dtmf(digit).await {
                warn!("[{}] dtmf forward failed: {e}", call.internal_call_id);
            }
        }
        return Ok(());
    }

    let domain = match gateway.directory.get_watcher(&msg.from, &msg.to).await {
        Some(watcher) => watcher.peer_domain(),
        None => gateway.config.host.clone(),
    };
    if let Err(e) = gateway.sip.send_message(&msg, &domain).await {
        warn!("[{}] message relay failed: {e}", session.internal_call_id);
    }
    Ok(())
}
