//! Namespace constants used across stanza classification and construction.

pub const SERVER: &str = "jabber:server";
pub const DIALBACK: &str = "jabber:server:dialback";

pub const JINGLE: &str = "urn:xmpp:jingle:1";
pub const GINGLE_SESSION: &str = "http://www.google.com/session";
pub const GINGLE_PHONE: &str = "http://www.google.com/session/phone";
pub const GINGLE_VIDEO: &str = "http://www.google.com/session/video";
pub const TRANSPORT_P2P: &str = "http://www.google.com/transport/p2p";

pub const CAPS: &str = "http://jabber.org/protocol/caps";
pub const DISCO_INFO: &str = "http://jabber.org/protocol/disco#info";
pub const VCARD: &str = "vcard-temp";
pub const VCARD_UPDATE: &str = "vcard-temp:x:update";

pub const FEATURE_VOICE: &str = "http://www.google.com/xmpp/protocol/voice/v1";
pub const FEATURE_VIDEO: &str = "http://www.google.com/xmpp/protocol/video/v1";

/// Capability extension marker a peer resource advertises when it can
/// receive voice calls.
pub const CAPS_VOICE_EXT: &str = "voice-v1";

/// Extensions the gateway itself advertises in outbound presence.
pub const CAPS_EXTENSIONS: &str = "voice-v1 video-v1 camera-v1";
