//! Cross-protocol call state.
//!
//! One [`CallSession`] records a call's negotiation regardless of which
//! signaling dialect (Jingle or legacy Gingle) produced it: codec
//! offer/answer sets, per-stream ICE-lite credentials and the media relay
//! handles. [`CallManager`] is the process-wide registry keyed by the
//! protocol-level session id.

mod manager;
mod state;
pub mod stanza;

pub use manager::CallManager;
pub use state::{AudioPayload, CallSession, StreamType, VideoPayload};
