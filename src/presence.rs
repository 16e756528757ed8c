//! Presence state carried between the two worlds.

use crate::stanza::Node;

/// Presence snapshot, SIP-side identifiers for the parties.
#[derive(Debug, Clone, Default)]
pub struct Presence {
    pub from: String,
    pub to: String,
    /// `None` means available; "closed"/"unavailable" means gone.
    pub kind: Option<String>,
    pub show: Option<String>,
    pub note: Option<String>,
    /// Resource the state belongs to, when the SIP side distinguishes one.
    pub resource: Option<String>,
}

impl Presence {
    /// Lift show/status/type off an inbound presence stanza. The caller
    /// fills in the identity fields after mapping the addresses.
    pub fn from_stanza(node: &Node) -> Self {
        Presence {
            kind: node.attr("type").map(str::to_string),
            show: node
                .get_optional_child("show")
                .map(|el| el.text())
                .filter(|s| !s.is_empty()),
            note: node
                .get_optional_child("status")
                .map(|el| el.text())
                .filter(|s| !s.is_empty()),
            ..Default::default()
        }
    }

    pub fn is_available(&self) -> bool {
        self.kind.is_none()
    }
}
