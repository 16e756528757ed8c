//! Call-signaling stanza parsing and building.
//!
//! Two dialects land here: Jingle (`urn:xmpp:jingle:1`, actions on a
//! `jingle` element wrapping `content` children) and its legacy
//! predecessor Gingle (`http://www.google.com/session`, a `session`
//! element typed by attribute). Both are normalized into the same
//! [`CallSession`] offer/answer model; outbound construction speaks
//! Gingle, which every peer of interest accepts.

use super::state::{AudioPayload, CallSession, StreamType, VideoPayload};
use crate::ns;
use crate::stanza::{Node, NodeBuilder, StanzaError};

/// Codec lists lifted off an initiate or accept description.
#[derive(Debug, Default, Clone)]
pub struct CodecOffer {
    pub audio: Vec<AudioPayload>,
    pub video: Vec<VideoPayload>,
}

impl CodecOffer {
    pub fn has_video(&self) -> bool {
        !self.video.is_empty()
    }
}

/// One advertised ICE-lite candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub username: String,
    pub protocol: String,
}

impl Candidate {
    pub fn is_udp(&self) -> bool {
        self.protocol == "udp"
    }

    pub fn stream(&self) -> Option<StreamType> {
        StreamType::from_name(&self.name)
    }
}

/// Fill a call's identity and offer sets from an inbound initiate.
pub fn parse_initiate(
    call: &mut CallSession,
    packet: &Node,
    session_el: &Node,
    jingle: bool,
) -> Result<(), StanzaError> {
    let attrs = session_el.attrs();
    call.sid = if jingle {
        attrs.required_string("sid")?.to_string()
    } else {
        attrs.required_string("id")?.to_string()
    };
    call.initiator = attrs.optional_string("initiator").unwrap_or("").to_string();
    call.local = packet
        .attrs()
        .required_string("to")?
        .parse()
        .map_err(|e| StanzaError::Parse(format!("bad 'to' address: {e}")))?;
    call.remote = packet
        .attrs()
        .required_string("from")?
        .parse()
        .map_err(|e| StanzaError::Parse(format!("bad 'from' address: {e}")))?;

    let offer = parse_description(session_el, jingle)?;
    call.offer_payloads = offer.audio;
    call.offer_vpayloads = offer.video;
    Ok(())
}

/// Fill a call's answer sets from an inbound accept.
pub fn parse_accept(
    call: &mut CallSession,
    session_el: &Node,
    jingle: bool,
) -> Result<(), StanzaError> {
    let answer = parse_description(session_el, jingle)?;
    call.answer_payloads = answer.audio;
    call.answer_vpayloads = answer.video;
    Ok(())
}

/// Collect the codec lists under an initiate/accept element. For Jingle the
/// descriptions sit under `content` children; Gingle puts one description
/// directly under the session element. A video description mixes dialects:
/// audio entries inside it are qualified with the phone namespace.
pub fn parse_description(session_el: &Node, jingle: bool) -> Result<CodecOffer, StanzaError> {
    let mut offer = CodecOffer::default();

    let descriptions: Vec<&Node> = if jingle {
        session_el
            .get_children_by_tag("content")
            .filter_map(|content| content.get_optional_child("description"))
            .collect()
    } else {
        session_el.get_children_by_tag("description").collect()
    };
    if descriptions.is_empty() {
        return Err(StanzaError::MissingElement("description"));
    }

    for description in descriptions {
        let video_description = description.ns.as_deref() == Some(ns::GINGLE_VIDEO)
            || description.attr("media") == Some("video");

        for payload in description.get_children_by_tag("payload-type") {
            let audio_entry =
                !video_description || payload.ns.as_deref() == Some(ns::GINGLE_PHONE);
            let attrs = payload.attrs();
            let id = attrs.required_u32("id")?;
            let name = attrs.optional_string("name").unwrap_or("").to_string();
            if audio_entry {
                offer.audio.push(AudioPayload {
                    id,
                    name,
                    clock_rate: attrs.optional_u32("clockrate").unwrap_or(0),
                    bit_rate: attrs.optional_u32("bitrate").unwrap_or(0),
                });
            } else {
                offer.video.push(VideoPayload {
                    id,
                    name,
                    width: attrs.optional_u32("width").unwrap_or(0),
                    height: attrs.optional_u32("height").unwrap_or(0),
                    framerate: attrs.optional_u32("framerate").unwrap_or(0),
                    clock_rate: attrs.optional_u32("clockrate").unwrap_or(0),
                });
            }
        }
    }
    Ok(offer)
}

/// Parse the `candidate` children of a transport or session element.
pub fn parse_candidates(parent: &Node) -> Result<Vec<Candidate>, StanzaError> {
    let mut candidates = Vec::new();
    for el in parent.get_children_by_tag("candidate") {
        let attrs = el.attrs();
        candidates.push(Candidate {
            name: attrs.required_string("name")?.to_string(),
            address: attrs.required_string("address")?.to_string(),
            port: attrs.required_u16("port")?,
            username: attrs.optional_string("username").unwrap_or("").to_string(),
            protocol: attrs.optional_string("protocol").unwrap_or("").to_string(),
        });
    }
    Ok(candidates)
}

/// Gather every candidate a transport stanza carries, wherever the
/// dialect put it: directly under the session element (Gingle
/// `candidates`), under a `transport` child (Gingle `transport-info`), or
/// under `content > transport` (Jingle).
pub fn collect_candidates(element: &Node) -> Result<Vec<Candidate>, StanzaError> {
    let mut out = parse_candidates(element)?;
    for transport in element.get_children_by_tag("transport") {
        out.extend(parse_candidates(transport)?);
    }
    for content in element.get_children_by_tag("content") {
        for transport in content.get_children_by_tag("transport") {
            out.extend(parse_candidates(transport)?);
        }
    }
    Ok(out)
}

fn iq_set(call: &CallSession, stanza_id: &str) -> NodeBuilder {
    NodeBuilder::new("iq")
        .ns(ns::SERVER)
        .attr("from", call.local.to_string())
        .attr("to", call.remote.to_string())
        .attr("id", stanza_id)
        .attr("type", "set")
}

fn gingle_session(call: &CallSession, session_type: &str) -> NodeBuilder {
    NodeBuilder::new("session")
        .ns(ns::GINGLE_SESSION)
        .attr("type", session_type)
        .attr("id", call.sid.clone())
        .attr("initiator", call.initiator.clone())
}

fn audio_payload_node(payload: &AudioPayload) -> Node {
    NodeBuilder::new("payload-type")
        .ns(ns::GINGLE_PHONE)
        .attr("id", payload.id.to_string())
        .attr("clockrate", payload.clock_rate.to_string())
        .attr("bitrate", payload.bit_rate.to_string())
        .attr("name", payload.name.clone())
        .build()
}

fn video_payload_node(payload: &VideoPayload) -> Node {
    let mut builder = NodeBuilder::new("payload-type")
        .attr("id", payload.id.to_string())
        .attr("name", payload.name.clone())
        .attr("width", payload.width.to_string())
        .attr("height", payload.height.to_string())
        .attr("framerate", payload.framerate.to_string());
    if payload.clock_rate > 0 {
        builder = builder.attr("clockrate", payload.clock_rate.to_string());
    }
    builder.build()
}

fn description_node(audio: &[AudioPayload], video: &[VideoPayload], with_video: bool) -> Node {
    let mut builder = if with_video {
        NodeBuilder::new("description").ns(ns::GINGLE_VIDEO)
    } else {
        NodeBuilder::new("description").ns(ns::GINGLE_PHONE)
    };
    if with_video {
        builder = builder.children(video.iter().map(video_payload_node));
    }
    builder
        .children(audio.iter().map(audio_payload_node))
        .build()
}

fn transport_node() -> Node {
    NodeBuilder::new("transport").ns(ns::TRANSPORT_P2P).build()
}

/// Initiate carrying the offer codec set.
pub fn build_initiate(call: &CallSession, stanza_id: &str) -> Node {
    let description = description_node(
        &call.offer_payloads,
        &call.offer_vpayloads,
        call.has_video(),
    );
    iq_set(call, stanza_id)
        .child(
            gingle_session(call, "initiate")
                .child(description)
                .child(transport_node())
                .build(),
        )
        .build()
}

/// Accept carrying the answer codec set.
pub fn build_accept(call: &CallSession, stanza_id: &str) -> Node {
    let description = description_node(
        &call.answer_payloads,
        &call.answer_vpayloads,
        call.has_video(),
    );
    iq_set(call, stanza_id)
        .child(
            gingle_session(call, "accept")
                .child(description)
                .child(transport_node())
                .build(),
        )
        .build()
}

pub fn build_terminate(call: &CallSession, stanza_id: &str) -> Node {
    iq_set(call, stanza_id)
        .child(gingle_session(call, "terminate").build())
        .build()
}

fn candidate_node(stream: StreamType, username: &str, address: &str, port: u16) -> Node {
    NodeBuilder::new("candidate")
        .attr("name", stream.name())
        .attr("address", address)
        .attr("port", port.to_string())
        .attr("preference", "1")
        .attr("username", username)
        .attr("password", username)
        .attr("protocol", "udp")
        .attr("generation", "0")
        .attr("type", "local")
        .attr("network", "0")
        .build()
}

/// One candidate advertisement (`candidates` session type).
pub fn build_candidates(
    call: &CallSession,
    stream: StreamType,
    username: &str,
    address: &str,
    port: u16,
    stanza_id: &str,
) -> Node {
    iq_set(call, stanza_id)
        .child(
            gingle_session(call, "candidates")
                .child(candidate_node(stream, username, address, port))
                .build(),
        )
        .build()
}

/// Audio transport-info advertisement used for audio-only calls.
pub fn build_transport_info(
    call: &CallSession,
    username: &str,
    address: &str,
    port: u16,
    stanza_id: &str,
) -> Node {
    let transport = NodeBuilder::new("transport")
        .ns(ns::TRANSPORT_P2P)
        .child(candidate_node(StreamType::Rtp, username, address, port))
        .build();
    iq_set(call, stanza_id)
        .child(
            gingle_session(call, "transport-info")
                .child(transport)
                .build(),
        )
        .build()
}

/// Acknowledge a Gingle transport offer with `transport-accept`.
pub fn build_transport_accept(packet: &Node, session_el: &Node, stanza_id: &str) -> Node {
    let session = NodeBuilder::new("session")
        .ns(ns::GINGLE_SESSION)
        .attr("type", "transport-accept")
        .attr("id", session_el.attr("id").unwrap_or(""))
        .attr("initiator", session_el.attr("initiator").unwrap_or(""))
        .child(transport_node())
        .build();
    NodeBuilder::new("iq")
        .ns(ns::SERVER)
        .attr("from", packet.attr("to").unwrap_or(""))
        .attr("to", packet.attr("from").unwrap_or(""))
        .attr("id", stanza_id)
        .attr("type", "set")
        .child(session)
        .build()
}
