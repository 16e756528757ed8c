//! Media relay seam.
//!
//! The relay moves RTP bytes; the gateway only negotiates which addresses
//! and ports to advertise and forwards the peer's candidates down for
//! network-level binding.

use crate::error::GatewayError;
use async_trait::async_trait;
use std::sync::Arc;

/// One allocated relay: a local RTP/RTCP port pair facing the federation
/// side, bridged to the SIP media leg.
#[async_trait]
pub trait MediaRelay: Send + Sync {
    /// Bind the peer's advertised candidate address under the negotiated
    /// credentials. `rtcp` selects the control channel of the pair.
    async fn send_bind(
        &self,
        remote_user: &str,
        local_user: &str,
        address: &str,
        port: u16,
        rtcp: bool,
    ) -> Result<(), GatewayError>;

    /// Local port advertised to the federation side for RTP.
    fn jabber_port(&self) -> u16;

    /// Local port advertised to the federation side for RTCP.
    fn jabber_rtcp_port(&self) -> u16;

    /// Forward one DTMF digit to the SIP leg.
    async fn send_dtmf(&self, digit: char) -> Result<(), GatewayError>;
}

/// Allocates relays, one per media stream pair of a call.
#[async_trait]
pub trait RelayFactory: Send + Sync {
    async fn allocate(&self) -> Result<Arc<dyn MediaRelay>, GatewayError>;
}
