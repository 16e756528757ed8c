//! Inbound stanza classification.
//!
//! Every inbound stanza is decoded into one closed tag before any handler
//! runs; dispatch matches on the tag, so unhandled shapes are explicit
//! instead of falling through nested conditionals.

use crate::ns;
use crate::stanza::Node;

/// What an inbound stanza turned out to be.
#[derive(Debug)]
pub enum InboundStanza<'a> {
    /// `db:result` — either a peer's key offer or the verdict on ours.
    DialbackResult,
    /// `db:verify` — someone asks us to vouch for a key we issued.
    DialbackVerify,
    /// Chat message carrying a body.
    Chat,
    Presence,
    DiscoQuery,
    VcardQuery,
    /// Call signaling in the Jingle dialect.
    Jingle { action: &'a str, element: &'a Node },
    /// Call signaling in the legacy Gingle dialect.
    Gingle { action: &'a str, element: &'a Node },
    /// IQ of type `error`.
    IqError,
    Unhandled,
}

pub fn classify(node: &Node) -> InboundStanza<'_> {
    if node.is("result", ns::DIALBACK) {
        return InboundStanza::DialbackResult;
    }
    if node.is("verify", ns::DIALBACK) {
        return InboundStanza::DialbackVerify;
    }

    match node.tag.as_str() {
        "message" if node.get_optional_child("body").is_some() => InboundStanza::Chat,
        "presence" => InboundStanza::Presence,
        "iq" => classify_iq(node),
        _ => InboundStanza::Unhandled,
    }
}

fn classify_iq(node: &Node) -> InboundStanza<'_> {
    match node.attr("type") {
        Some("error") => InboundStanza::IqError,
        Some("get") => {
            if node.get_child_ns("query", ns::DISCO_INFO).is_some() {
                InboundStanza::DiscoQuery
            } else if node.get_child_ns("vCard", ns::VCARD).is_some() {
                InboundStanza::VcardQuery
            } else {
                InboundStanza::Unhandled
            }
        }
        Some("set") => {
            if let Some(jingle) = node.get_child_ns("jingle", ns::JINGLE) {
                match jingle.attr("action") {
                    Some(action) => InboundStanza::Jingle {
                        action,
                        element: jingle,
                    },
                    None => InboundStanza::Unhandled,
                }
            } else if let Some(session) = node.get_child_ns("session", ns::GINGLE_SESSION) {
                match session.attr("type") {
                    Some(action) => InboundStanza::Gingle {
                        action,
                        element: session,
                    },
                    None => InboundStanza::Unhandled,
                }
            } else {
                InboundStanza::Unhandled
            }
        }
        _ => InboundStanza::Unhandled,
    }
}
