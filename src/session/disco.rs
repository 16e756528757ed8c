//! Service discovery and vCard replies.

use super::Session;
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::jid::Jid;
use crate::ns;
use crate::stanza::{Node, NodeBuilder};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::sync::Arc;

fn iq_result(packet: &Node) -> NodeBuilder {
    NodeBuilder::new("iq")
        .ns(ns::SERVER)
        .attr("from", packet.attr("to").unwrap_or(""))
        .attr("to", packet.attr("from").unwrap_or(""))
        .attr("id", packet.attr("id").unwrap_or(""))
        .attr("type", "result")
}

fn feature(var: &str) -> Node {
    NodeBuilder::new("feature").attr("var", var).build()
}

/// disco#info: advertise the voice/video call features under the
/// configured caps node.
pub(crate) async fn handle_disco(
    gateway: &Arc<Gateway>,
    session: &Arc<Session>,
    packet: &Node,
) -> Result<(), GatewayError> {
    let mut query = NodeBuilder::new("query").ns(ns::DISCO_INFO);
    if let Some(node) = packet
        .get_child_ns("query", ns::DISCO_INFO)
        .and_then(|q| q.attr("node"))
    {
        query = query.attr("node", node);
    }
    let query = query
        .child(
            NodeBuilder::new("identity")
                .attr("category", "gateway")
                .attr("type", "voip")
                .attr("name", gateway.config.service_name.as_str())
                .build(),
        )
        .child(feature(ns::DISCO_INFO))
        .child(feature(ns::FEATURE_VOICE))
        .child(feature(ns::FEATURE_VIDEO))
        .child(feature(ns::GINGLE_SESSION))
        .child(feature(ns::TRANSPORT_P2P))
        .build();

    session.send_packet(iq_result(packet).child(query).build()).await
}

/// vCard: formatted name (numeric users get a `+` prefix) plus the
/// configured avatar as a base64 JPEG.
pub(crate) async fn handle_vcard(
    gateway: &Arc<Gateway>,
    session: &Arc<Session>,
    packet: &Node,
) -> Result<(), GatewayError> {
    let user = packet
        .attr("to")
        .and_then(|to| to.parse::<Jid>().ok())
        .map(|jid| jid.user)
        .unwrap_or_default();
    let name = if !user.is_empty() && user.chars().all(|c| c.is_ascii_digit()) {
        format!("+{user}")
    } else {
        user
    };

    let mut vcard = NodeBuilder::new("vCard")
        .ns(ns::VCARD)
        .child(NodeBuilder::new("FN").text(name).build());
    if !gateway.config.icon.is_empty() {
        vcard = vcard.child(
            NodeBuilder::new("PHOTO")
                .child(NodeBuilder::new("TYPE").text("image/jpeg").build())
                .child(
                    NodeBuilder::new("BINVAL")
                        .text(BASE64.encode(&gateway.config.icon))
                        .build(),
                )
                .build(),
        );
    }

    session
        .send_packet(iq_result(packet).child(vcard.build()).build())
        .await
}
