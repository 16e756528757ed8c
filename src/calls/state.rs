//! Negotiation record for one call.

use crate::jid::Jid;
use crate::relay::MediaRelay;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// One directional media channel role requiring its own candidate exchange
/// and credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Rtp,
    Rtcp,
    VideoRtp,
    VideoRtcp,
}

impl StreamType {
    pub fn name(&self) -> &'static str {
        match self {
            StreamType::Rtp => "rtp",
            StreamType::Rtcp => "rtcp",
            StreamType::VideoRtp => "video_rtp",
            StreamType::VideoRtcp => "video_rtcp",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "rtp" => Some(StreamType::Rtp),
            "rtcp" => Some(StreamType::Rtcp),
            "video_rtp" => Some(StreamType::VideoRtp),
            "video_rtcp" => Some(StreamType::VideoRtcp),
            _ => None,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, StreamType::VideoRtp | StreamType::VideoRtcp)
    }

    /// RTCP is the control channel of the pair.
    pub fn is_rtcp(&self) -> bool {
        matches!(self, StreamType::Rtcp | StreamType::VideoRtcp)
    }
}

/// An audio codec entry of an offer or answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPayload {
    pub id: u32,
    pub name: String,
    pub clock_rate: u32,
    pub bit_rate: u32,
}

impl AudioPayload {
    pub fn pcmu() -> Self {
        Self {
            id: 0,
            name: "PCMU".to_string(),
            clock_rate: 8000,
            bit_rate: 64000,
        }
    }

    pub fn pcma() -> Self {
        Self {
            id: 8,
            name: "PCMA".to_string(),
            clock_rate: 8000,
            bit_rate: 64000,
        }
    }
}

/// A video codec entry of an offer or answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoPayload {
    pub id: u32,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub clock_rate: u32,
}

/// One call's cross-protocol negotiation state.
///
/// All mutation happens on the dispatching connection's serialized
/// processing path; the registry hands the session out behind a mutex for
/// the cross-connection lookups (a call set up on one connection is torn
/// down by a stanza arriving on another).
pub struct CallSession {
    /// Diagnostic correlation id, independent of the protocol-level id.
    pub internal_call_id: String,
    /// Protocol-level call id, generated locally or taken from the offer.
    pub sid: String,
    pub initiator: String,
    pub local: Jid,
    pub remote: Jid,

    pub offer_payloads: Vec<AudioPayload>,
    pub answer_payloads: Vec<AudioPayload>,
    pub offer_vpayloads: Vec<VideoPayload>,
    pub answer_vpayloads: Vec<VideoPayload>,

    /// Flipped to true at most once; candidate advertisement is idempotent
    /// per stream per call.
    pub sent_transport: bool,
    pub sent_vtransport: bool,
    candidate_user: Option<String>,
    candidate_vuser: Option<String>,

    pub relay: Arc<dyn MediaRelay>,
    /// Absent means audio-only call.
    pub vrelay: Option<Arc<dyn MediaRelay>>,

    pub created_at: DateTime<Utc>,
}

impl CallSession {
    pub fn new(
        internal_call_id: impl Into<String>,
        relay: Arc<dyn MediaRelay>,
        vrelay: Option<Arc<dyn MediaRelay>>,
    ) -> Self {
        Self {
            internal_call_id: internal_call_id.into(),
            sid: String::new(),
            initiator: String::new(),
            local: Jid::default(),
            remote: Jid::default(),
            offer_payloads: Vec::new(),
            answer_payloads: Vec::new(),
            offer_vpayloads: Vec::new(),
            answer_vpayloads: Vec::new(),
            sent_transport: false,
            sent_vtransport: false,
            candidate_user: None,
            candidate_vuser: None,
            relay,
            vrelay,
            created_at: Utc::now(),
        }
    }

    pub fn has_video(&self) -> bool {
        self.vrelay.is_some()
    }

    /// Credential for the stream's candidates, generated once per stream
    /// (8 hex chars from 4 random bytes) and reused for every candidate of
    /// that stream within the call. Audio and video credentials are
    /// independent.
    pub fn stream_credential(&mut self, stream: StreamType) -> String {
        let slot = if stream.is_video() {
            &mut self.candidate_vuser
        } else {
            &mut self.candidate_user
        };
        slot.get_or_insert_with(|| hex::encode(rand::random::<[u8; 4]>()))
            .clone()
    }

    /// Credential already negotiated for the stream, empty if none yet.
    pub fn current_credential(&self, stream: StreamType) -> String {
        let slot = if stream.is_video() {
            &self.candidate_vuser
        } else {
            &self.candidate_user
        };
        slot.clone().unwrap_or_default()
    }

    /// Relay serving the stream, if the call carries it.
    pub fn relay_for(&self, stream: StreamType) -> Option<&Arc<dyn MediaRelay>> {
        if stream.is_video() {
            self.vrelay.as_ref()
        } else {
            Some(&self.relay)
        }
    }
}
