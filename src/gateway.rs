//! The gateway context and its SIP-facing API.
//!
//! [`Gateway`] bundles the configuration, the collaborator seams and the
//! two registries. The SIP side drives outbound federation signaling
//! through it; each operation resolves the owning connection via
//! [`SessionManager::find_create_session`], so callers never care whether
//! a link to the peer already exists.

use crate::calls::stanza as call_stanza;
use crate::calls::{AudioPayload, CallManager, CallSession, StreamType, VideoPayload};
use crate::config::GatewayConfig;
use crate::directory::Directory;
use crate::error::GatewayError;
use crate::jid::Jid;
use crate::message::ChatMessage;
use crate::ns;
use crate::presence::Presence;
use crate::relay::RelayFactory;
use crate::session::{Session, SessionManager, signaling};
use crate::sip::SipService;
use crate::stanza::NodeBuilder;
use crate::transport::{FederationLink, PeerConnector};
use log::info;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct Gateway {
    pub config: GatewayConfig,
    pub sip: Arc<dyn SipService>,
    pub directory: Arc<dyn Directory>,
    pub relays: Arc<dyn RelayFactory>,
    pub connector: Arc<dyn PeerConnector>,
    pub sessions: SessionManager,
    pub calls: CallManager,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        sip: Arc<dyn SipService>,
        directory: Arc<dyn Directory>,
        relays: Arc<dyn RelayFactory>,
        connector: Arc<dyn PeerConnector>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            sip,
            directory,
            relays,
            connector,
            sessions: SessionManager::new(),
            calls: CallManager::new(),
        })
    }

    pub(crate) fn next_correlation_id(&self) -> String {
        hex::encode(rand::random::<[u8; 4]>())
    }

    /// Adopt an inbound federation connection and drive it until it
    /// closes. The session stays unconfirmed until dialback settles.
    pub fn accept_session(self: &Arc<Self>, link: FederationLink) -> Arc<Session> {
        let (session, source) =
            Session::new(&self.config.host, link, self.config.outbound_queue_cap);
        info!("[{}] accepted inbound connection", session.internal_call_id);
        tokio::spawn(crate::session::run(
            self.clone(),
            session.clone(),
            source,
        ));
        session
    }

    /// Originate a call toward a federation peer. Returns the new call's
    /// session id. A bare callee is narrowed to the resource that last
    /// advertised voice support, when one is known.
    pub async fn start_call(
        self: &Arc<Self>,
        local_user: &str,
        remote: &Jid,
        offer: Vec<AudioPayload>,
        video_offer: Vec<VideoPayload>,
    ) -> Result<String, GatewayError> {
        let remote = if remote.is_bare() {
            match self.directory.voice_resource(remote).await {
                Some(resource) => Jid::with_resource(&remote.user, &remote.domain, &resource),
                None => remote.clone(),
            }
        } else {
            remote.clone()
        };
        let session = self
            .sessions
            .find_create_session(self, &remote.domain)
            .await?;

        let relay = self.relays.allocate().await?;
        let vrelay = if video_offer.is_empty() {
            None
        } else {
            Some(self.relays.allocate().await?)
        };
        let mut call = CallSession::new(self.next_correlation_id(), relay, vrelay);
        call.sid = rand::random::<u32>().to_string();
        let local = Jid::with_resource(local_user, &self.config.host, &self.config.resource);
        call.initiator = local.to_string();
        call.local = local;
        call.remote = remote;
        call.offer_payloads = offer;
        call.offer_vpayloads = video_offer;
        info!(
            "[{}] starting call {} to {}",
            call.internal_call_id, call.sid, call.remote
        );

        let sid = call.sid.clone();
        let call = Arc::new(Mutex::new(call));
        self.calls.add_session(call.clone()).await;

        let mut call = call.lock().await;
        session
            .send_packet(call_stanza::build_initiate(&call, &session.next_id()))
            .await?;

        if call.has_video() {
            // Eagerly advertise all four streams, control channels first.
            call.sent_transport = true;
            call.sent_vtransport = true;
            for stream in [
                StreamType::Rtcp,
                StreamType::Rtp,
                StreamType::VideoRtcp,
                StreamType::VideoRtp,
            ] {
                signaling::send_transport_candidates(self, &session, &mut call, stream).await?;
            }
        } else {
            call.sent_transport = true;
            signaling::send_transport_info(self, &session, &mut call).await?;
        }
        Ok(sid)
    }

    /// Answer a call the SIP side accepted, carrying the answer codecs.
    pub async fn send_accept(
        self: &Arc<Self>,
        sid: &str,
        answer: Vec<AudioPayload>,
        video_answer: Vec<VideoPayload>,
    ) -> Result<(), GatewayError> {
        let call = self
            .calls
            .get_session(sid)
            .await
            .ok_or_else(|| GatewayError::CallNotFound(sid.to_string()))?;
        let mut call = call.lock().await;
        call.answer_payloads = answer;
        call.answer_vpayloads = video_answer;

        let session = self
            .sessions
            .find_create_session(self, &call.remote.domain)
            .await?;
        session
            .send_packet(call_stanza::build_accept(&call, &session.next_id()))
            .await
    }

    /// Tear a call down from the SIP side. The call is deregistered
    /// before the terminate goes out, so a racing inbound stanza already
    /// sees it gone.
    pub async fn send_bye(self: &Arc<Self>, sid: &str) -> Result<(), GatewayError> {
        let Some(call) = self.calls.remove_session(sid).await else {
            return Ok(());
        };
        let call = call.lock().await;
        info!("[{}] ending call {sid}", call.internal_call_id);
        let session = self
            .sessions
            .find_create_session(self, &call.remote.domain)
            .await?;
        session
            .send_packet(call_stanza::build_terminate(&call, &session.next_id()))
            .await
    }

    /// Push a SIP-side user's presence to the federation peer watching it.
    pub async fn send_presence(self: &Arc<Self>, presence: &Presence) -> Result<(), GatewayError> {
        let to = self
            .directory
            .to_jid(&presence.to)
            .ok_or_else(|| GatewayError::NoMapping(presence.to.clone()))?;
        let resource = presence
            .resource
            .clone()
            .unwrap_or_else(|| self.config.resource.clone());
        let from = Jid::with_resource(&presence.from, &self.config.host, &resource);
        let session = self.sessions.find_create_session(self, &to.domain).await?;

        let mut builder = NodeBuilder::new("presence")
            .ns(ns::SERVER)
            .attr("from", from.to_string())
            .attr("to", to.to_string());
        if let Some(kind) = &presence.kind {
            builder = builder.attr("type", kind.as_str());
        }
        if presence.is_available() {
            builder = builder.child(
                NodeBuilder::new("c")
                    .ns(ns::CAPS)
                    .attr("node", self.config.caps_node.as_str())
                    .attr("ver", self.config.caps_version.as_str())
                    .attr("ext", ns::CAPS_EXTENSIONS)
                    .build(),
            );
            if let Some(show) = &presence.show {
                builder = builder.child(NodeBuilder::new("show").text(show.as_str()).build());
            }
            if let Some(note) = &presence.note {
                builder = builder.child(NodeBuilder::new("status").text(note.as_str()).build());
            }
            let priority = if resource == self.config.phone_resource {
                "0.1"
            } else {
                "1"
            };
            builder = builder
                .child(NodeBuilder::new("priority").text(priority).build())
                .child(
                    NodeBuilder::new("x")
                        .ns(ns::VCARD_UPDATE)
                        .child(
                            NodeBuilder::new("photo")
                                .text(self.config.icon_hash())
                                .build(),
                        )
                        .build(),
                );
        }
        session.send_packet(builder.build()).await?;

        // The telephony endpoint presents as its own resource; a real
        // client resource going online pushes it offline.
        if presence.is_available() && resource != self.config.phone_resource {
            let phone = Jid::with_resource(
                &presence.from,
                &self.config.host,
                &self.config.phone_resource,
            );
            let stanza = NodeBuilder::new("presence")
                .ns(ns::SERVER)
                .attr("from", phone.to_string())
                .attr("to", to.to_string())
                .attr("type", "unavailable")
                .build();
            session.send_packet(stanza).await?;
        }
        Ok(())
    }

    /// Relay a SIP-side instant message to a federation user.
    pub async fn send_message(self: &Arc<Self>, msg: &ChatMessage) -> Result<(), GatewayError> {
        let to = self
            .directory
            .to_jid(&msg.to)
            .ok_or_else(|| GatewayError::NoMapping(msg.to.clone()))?;
        let from = Jid::new(&msg.from, &self.config.host);
        let session = self.sessions.find_create_session(self, &to.domain).await?;

        let mut builder = NodeBuilder::new("message")
            .ns(ns::SERVER)
            .attr("from", from.to_string())
            .attr("to", to.to_string())
            .attr("type", "chat")
            .child(NodeBuilder::new("body").text(msg.body.as_str()).build());
        if let Some(subject) = &msg.subject {
            builder = builder.child(NodeBuilder::new("subject").text(subject.as_str()).build());
        }
        if let Some(thread) = &msg.thread {
            builder = builder.child(NodeBuilder::new("thread").text(thread.as_str()).build());
        }
        session.send_packet(builder.build()).await
    }

    /// Subscription stanza on behalf of a SIP-side user (`subscribe`,
    /// `subscribed`, `unsubscribe`, `unsubscribed`).
    pub async fn send_subscribe_request(
        self: &Arc<Self>,
        from_id: &str,
        to_id: &str,
        kind: &str,
    ) -> Result<(), GatewayError> {
        let to = self
            .directory
            .to_jid(to_id)
            .ok_or_else(|| GatewayError::NoMapping(to_id.to_string()))?;
        let from = Jid::new(from_id, &self.config.host);
        let session = self.sessions.find_create_session(self, &to.domain).await?;

        let stanza = NodeBuilder::new("presence")
            .ns(ns::SERVER)
            .attr("from", from.to_string())
            .attr("to", to.bare().to_string())
            .attr("type", kind)
            .build();
        session.send_packet(stanza).await
    }
}
