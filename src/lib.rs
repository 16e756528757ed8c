//! Signaling gateway between an XMPP federation and a SIP network.
//!
//! Bridges voice/video call signaling (Jingle and its legacy "Gingle"
//! predecessor) and presence/subscription state between the two worlds.
//! The crate owns the per-connection protocol session: server dialback
//! trust, stanza dispatch, and the call negotiation state machine.
//! Everything that moves bytes lives behind seams — wire framing
//! ([`transport`]), the SIP stack ([`sip`]), the media relay ([`relay`])
//! and subscription persistence ([`directory`]).
//!
//! Entry points: [`gateway::Gateway::accept_session`] adopts an inbound
//! federation connection; the `Gateway` methods (`start_call`,
//! `send_presence`, ...) drive outbound signaling from the SIP side.

pub mod calls;
pub mod config;
pub mod directory;
pub mod error;
pub mod gateway;
pub mod jid;
pub mod message;
pub mod ns;
pub mod presence;
pub mod relay;
pub mod session;
pub mod sip;
pub mod stanza;
pub mod transport;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use gateway::Gateway;
