//! End-to-end tests driving the gateway over in-memory federation links,
//! with recording stand-ins for the SIP stack, the media relay and the
//! subscription directory.

use async_trait::async_trait;
use jingle_gateway::calls::{AudioPayload, CallSession, VideoPayload};
use jingle_gateway::directory::{Directory, SipSubscription};
use jingle_gateway::error::GatewayError;
use jingle_gateway::jid::Jid;
use jingle_gateway::message::ChatMessage;
use jingle_gateway::presence::Presence;
use jingle_gateway::relay::{MediaRelay, RelayFactory};
use jingle_gateway::session::Session;
use jingle_gateway::sip::SipService;
use jingle_gateway::stanza::{Node, NodeBuilder};
use jingle_gateway::transport::{FederationLink, PeerConnector, RemoteEnd, channel_link};
use jingle_gateway::{Gateway, GatewayConfig, ns};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const HOST: &str = "gw.example.com";
const PEER: &str = "xmpp.example.org";

#[derive(Default)]
struct TestSip {
    events: Mutex<Vec<String>>,
}

impl TestSip {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl SipService for TestSip {
    async fn send_invite(&self, call: &CallSession, domain: &str) -> Result<(), GatewayError> {
        self.record(format!("invite:{}:{domain}", call.sid));
        Ok(())
    }

    async fn accept_call(&self, call: &CallSession) -> Result<(), GatewayError> {
        self.record(format!("accept:{}", call.sid));
        Ok(())
    }

    async fn send_reject(&self, call: &CallSession) -> Result<(), GatewayError> {
        self.record(format!("reject:{}", call.sid));
        Ok(())
    }

    async fn send_bye(&self, call: &CallSession) -> Result<(), GatewayError> {
        self.record(format!("bye:{}", call.sid));
        Ok(())
    }

    async fn send_message(&self, msg: &ChatMessage, domain: &str) -> Result<(), GatewayError> {
        self.record(format!("msg:{}:{domain}:{}", msg.to, msg.body));
        Ok(())
    }

    fn local_ip(&self) -> String {
        "10.0.0.1".to_string()
    }
}

#[derive(Default)]
struct TestRelay {
    binds: Mutex<Vec<(String, u16, bool)>>,
    dtmf: Mutex<Vec<char>>,
}

#[async_trait]
impl MediaRelay for TestRelay {
    async fn send_bind(
        &self,
        _remote_user: &str,
        _local_user: &str,
        address: &str,
        port: u16,
        rtcp: bool,
    ) -> Result<(), GatewayError> {
        self.binds
            .lock()
            .unwrap()
            .push((address.to_string(), port, rtcp));
        Ok(())
    }

    fn jabber_port(&self) -> u16 {
        20000
    }

    fn jabber_rtcp_port(&self) -> u16 {
        20001
    }

    async fn send_dtmf(&self, digit: char) -> Result<(), GatewayError> {
        self.dtmf.lock().unwrap().push(digit);
        Ok(())
    }
}

#[derive(Default)]
struct TestRelayFactory {
    allocated: Mutex<Vec<Arc<TestRelay>>>,
}

impl TestRelayFactory {
    fn relay(&self, index: usize) -> Arc<TestRelay> {
        self.allocated.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl RelayFactory for TestRelayFactory {
    async fn allocate(&self) -> Result<Arc<dyn MediaRelay>, GatewayError> {
        let relay = Arc::new(TestRelay::default());
        self.allocated.lock().unwrap().push(relay.clone());
        Ok(relay)
    }
}

struct TestSubscription;

#[async_trait]
impl SipSubscription for TestSubscription {
    fn peer_domain(&self) -> String {
        "sip.example.com".to_string()
    }

    async fn send_notify(
        &self,
        _terminate: bool,
        _presence: Option<&Presence>,
    ) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn send_subscribe(&self, _terminate: bool) -> Result<(), GatewayError> {
        Ok(())
    }
}

#[derive(Default)]
struct TestDirectory {
    voice: Mutex<HashMap<Jid, String>>,
}

#[async_trait]
impl Directory for TestDirectory {
    async fn get_watcher(&self, _from: &str, _to: &str) -> Option<Arc<dyn SipSubscription>> {
        None
    }

    async fn get_subscription(&self, _from: &str, _to: &str) -> Option<Arc<dyn SipSubscription>> {
        None
    }

    async fn add_subscriber(&self, _from: &str, _to: &str) -> Arc<dyn SipSubscription> {
        Arc::new(TestSubscription)
    }

    async fn remove_subscription(
        &self,
        _from: &str,
        _to: &str,
    ) -> Option<Arc<dyn SipSubscription>> {
        None
    }

    async fn remove_watcher(&self, _from: &str, _to: &str) -> Option<Arc<dyn SipSubscription>> {
        None
    }

    fn to_sip_id(&self, jid: &Jid) -> String {
        jid.user.clone()
    }

    fn to_jid(&self, sip_id: &str) -> Option<Jid> {
        Some(Jid::new(sip_id, PEER))
    }

    async fn add_voice_resource(&self, jid: &Jid) {
        self.voice
            .lock()
            .unwrap()
            .insert(jid.bare(), jid.resource.clone());
    }

    async fn voice_resource(&self, jid: &Jid) -> Option<String> {
        self.voice.lock().unwrap().get(&jid.bare()).cloned()
    }
}

/// Hands back every outbound link the gateway opens, so tests can play
/// the remote server.
struct TestConnector {
    opened: Mutex<mpsc::UnboundedSender<(String, RemoteEnd)>>,
}

#[async_trait]
impl PeerConnector for TestConnector {
    async fn connect(&self, domain: &str) -> Result<FederationLink, GatewayError> {
        let (link, remote) = channel_link("outbound-stream");
        self.opened
            .lock()
            .unwrap()
            .send((domain.to_string(), remote))
            .map_err(|_| GatewayError::NoRoute(domain.to_string()))?;
        Ok(link)
    }
}

struct Harness {
    gateway: Arc<Gateway>,
    sip: Arc<TestSip>,
    relays: Arc<TestRelayFactory>,
    directory: Arc<TestDirectory>,
    opened: mpsc::UnboundedReceiver<(String, RemoteEnd)>,
}

fn make_harness() -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();
    let (tx, rx) = mpsc::unbounded_channel();
    let sip = Arc::new(TestSip::default());
    let relays = Arc::new(TestRelayFactory::default());
    let directory = Arc::new(TestDirectory::default());
    let gateway = Gateway::new(
        GatewayConfig::new(HOST, "gateway").with_icon(vec![0xff, 0xd8]),
        sip.clone(),
        directory.clone(),
        relays.clone(),
        Arc::new(TestConnector {
            opened: Mutex::new(tx),
        }),
    );
    Harness {
        gateway,
        sip,
        relays,
        directory,
        opened: rx,
    }
}

async fn recv_stanza(remote: &mut RemoteEnd) -> Node {
    tokio::time::timeout(Duration::from_secs(2), remote.rx.recv())
        .await
        .expect("timed out waiting for a stanza")
        .expect("link closed")
}

/// Poll until the condition holds; the inbound stanza pipeline is
/// asynchronous relative to the test body.
async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never met");
}

fn db_result_valid() -> Node {
    NodeBuilder::new("result")
        .ns(ns::DIALBACK)
        .attr("from", PEER)
        .attr("to", HOST)
        .attr("type", "valid")
        .build()
}

fn gingle_iq(id: &str, session: Node) -> Node {
    NodeBuilder::new("iq")
        .ns(ns::SERVER)
        .attr("from", "alice@xmpp.example.org/r1")
        .attr("to", "100@gw.example.com")
        .attr("id", id)
        .attr("type", "set")
        .child(session)
        .build()
}

fn gingle_initiate(id: &str, sid: &str) -> Node {
    gingle_iq(
        id,
        NodeBuilder::new("session")
            .ns(ns::GINGLE_SESSION)
            .attr("type", "initiate")
            .attr("id", sid)
            .attr("initiator", "alice@xmpp.example.org/r1")
            .child(
                NodeBuilder::new("description")
                    .ns(ns::GINGLE_PHONE)
                    .child(
                        NodeBuilder::new("payload-type")
                            .ns(ns::GINGLE_PHONE)
                            .attr("id", "0")
                            .attr("name", "PCMU")
                            .attr("clockrate", "8000")
                            .build(),
                    )
                    .build(),
            )
            .build(),
    )
}

fn gingle_candidates(id: &str, sid: &str, stream: &str, protocol: &str) -> Node {
    gingle_iq(
        id,
        NodeBuilder::new("session")
            .ns(ns::GINGLE_SESSION)
            .attr("type", "candidates")
            .attr("id", sid)
            .attr("initiator", "alice@xmpp.example.org/r1")
            .child(
                NodeBuilder::new("candidate")
                    .attr("name", stream)
                    .attr("address", "192.0.2.10")
                    .attr("port", "30000")
                    .attr("username", "peercred")
                    .attr("protocol", protocol)
                    .build(),
            )
            .build(),
    )
}

/// Accept an inbound connection and confirm it via a dialback verdict.
async fn confirmed_inbound(harness: &Harness) -> (Arc<Session>, RemoteEnd) {
    let (link, remote) = channel_link("inbound-stream");
    let session = harness.gateway.accept_session(link);
    remote.tx.send(db_result_valid()).unwrap();
    for _ in 0..200 {
        if session.is_confirmed().await {
            return (session, remote);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session never confirmed");
}

#[tokio::test]
async fn test_unconfirmed_sends_flush_in_order_on_confirm() {
    let harness = make_harness();
    let (link, mut remote) = channel_link("inbound-stream");
    let session = harness.gateway.accept_session(link);

    for i in 0..2 {
        session
            .send_packet(
                NodeBuilder::new("presence")
                    .attr("id", format!("queued-{i}"))
                    .build(),
            )
            .await
            .unwrap();
    }
    assert!(remote.rx.try_recv().is_err());

    remote.tx.send(db_result_valid()).unwrap();
    assert_eq!(recv_stanza(&mut remote).await.attr("id"), Some("queued-0"));
    assert_eq!(recv_stanza(&mut remote).await.attr("id"), Some("queued-1"));
}

#[tokio::test]
async fn test_inbound_initiate_acked_and_invited() {
    let harness = make_harness();
    let (_session, mut remote) = confirmed_inbound(&harness).await;

    remote.tx.send(gingle_initiate("42", "987654321")).unwrap();

    let ack = recv_stanza(&mut remote).await;
    assert_eq!(ack.tag, "iq");
    assert_eq!(ack.attr("type"), Some("result"));
    assert_eq!(ack.attr("id"), Some("42"));

    let sip = harness.sip.clone();
    wait_for(move || !sip.events().is_empty()).await;
    assert_eq!(
        harness.sip.events(),
        vec![format!("invite:987654321:{HOST}")]
    );

    let call = harness
        .gateway
        .calls
        .get_session("987654321")
        .await
        .unwrap();
    let call = call.lock().await;
    assert_eq!(call.offer_payloads.len(), 1);
    assert_eq!(call.offer_payloads[0].name, "PCMU");
    assert_eq!(call.offer_payloads[0].id, 0);
    assert!(!call.has_video());
}

#[tokio::test]
async fn test_candidates_advertised_once_and_bound() {
    let harness = make_harness();
    let (_session, mut remote) = confirmed_inbound(&harness).await;

    remote.tx.send(gingle_initiate("1", "555")).unwrap();
    recv_stanza(&mut remote).await; // initiate ack

    remote
        .tx
        .send(gingle_candidates("2", "555", "rtp", "udp"))
        .unwrap();
    recv_stanza(&mut remote).await; // candidates ack

    // Our side answers with its own pair, control channel first.
    let first = recv_stanza(&mut remote).await;
    let session_el = first.get_child_ns("session", ns::GINGLE_SESSION).unwrap();
    assert_eq!(session_el.attr("type"), Some("candidates"));
    let candidate = session_el.get_optional_child("candidate").unwrap();
    assert_eq!(candidate.attr("name"), Some("rtcp"));
    assert_eq!(candidate.attr("port"), Some("20001"));
    let rtcp_user = candidate.attr("username").unwrap().to_string();

    let second = recv_stanza(&mut remote).await;
    let session_el = second.get_child_ns("session", ns::GINGLE_SESSION).unwrap();
    let candidate = session_el.get_optional_child("candidate").unwrap();
    assert_eq!(candidate.attr("name"), Some("rtp"));
    assert_eq!(candidate.attr("port"), Some("20000"));
    assert_eq!(candidate.attr("username"), Some(rtcp_user.as_str()));

    // The peer's candidate was bound on the relay.
    let relay = harness.relays.relay(0);
    let relay_for_wait = relay.clone();
    wait_for(move || !relay_for_wait.binds.lock().unwrap().is_empty()).await;
    assert_eq!(
        relay.binds.lock().unwrap().as_slice(),
        &[("192.0.2.10".to_string(), 30000, false)]
    );

    // A second candidate stanza binds again but advertises nothing new.
    remote
        .tx
        .send(gingle_candidates("3", "555", "rtp", "udp"))
        .unwrap();
    let ack = recv_stanza(&mut remote).await;
    assert_eq!(ack.attr("type"), Some("result"));
    let relay_for_wait = relay.clone();
    wait_for(move || relay_for_wait.binds.lock().unwrap().len() == 2).await;
    assert!(
        remote.rx.try_recv().is_err(),
        "candidates must be advertised at most once"
    );
}

#[tokio::test]
async fn test_tcp_candidates_are_ignored() {
    let harness = make_harness();
    let (_session, mut remote) = confirmed_inbound(&harness).await;

    remote.tx.send(gingle_initiate("1", "556")).unwrap();
    recv_stanza(&mut remote).await;

    remote
        .tx
        .send(gingle_candidates("2", "556", "rtp", "tcp"))
        .unwrap();
    recv_stanza(&mut remote).await; // ack only
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(remote.rx.try_recv().is_err());
    assert!(harness.relays.relay(0).binds.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_terminate_for_unknown_call_is_noop() {
    let harness = make_harness();
    let (_session, mut remote) = confirmed_inbound(&harness).await;

    let terminate = gingle_iq(
        "9",
        NodeBuilder::new("session")
            .ns(ns::GINGLE_SESSION)
            .attr("type", "terminate")
            .attr("id", "nope")
            .build(),
    );
    remote.tx.send(terminate).unwrap();

    let ack = recv_stanza(&mut remote).await;
    assert_eq!(ack.attr("type"), Some("result"));
    assert!(harness.sip.events().is_empty());
    assert!(harness.gateway.calls.is_empty().await);

    // The connection survives and keeps dispatching.
    remote.tx.send(gingle_initiate("10", "777")).unwrap();
    assert_eq!(recv_stanza(&mut remote).await.attr("id"), Some("10"));
}

#[tokio::test]
async fn test_terminate_tears_down_registered_call() {
    let harness = make_harness();
    let (_session, mut remote) = confirmed_inbound(&harness).await;

    remote.tx.send(gingle_initiate("1", "888")).unwrap();
    recv_stanza(&mut remote).await;

    let terminate = gingle_iq(
        "2",
        NodeBuilder::new("session")
            .ns(ns::GINGLE_SESSION)
            .attr("type", "terminate")
            .attr("id", "888")
            .build(),
    );
    remote.tx.send(terminate).unwrap();
    recv_stanza(&mut remote).await;

    let sip = harness.sip.clone();
    wait_for(move || sip.events().iter().any(|e| e == "bye:888")).await;
    assert!(harness.gateway.calls.get_session("888").await.is_none());
}

#[tokio::test]
async fn test_cancel_error_rejects_call() {
    let harness = make_harness();
    let (_session, mut remote) = confirmed_inbound(&harness).await;

    remote.tx.send(gingle_initiate("1", "999")).unwrap();
    recv_stanza(&mut remote).await;

    let error = NodeBuilder::new("iq")
        .ns(ns::SERVER)
        .attr("from", "alice@xmpp.example.org/r1")
        .attr("to", "100@gw.example.com")
        .attr("id", "2")
        .attr("type", "error")
        .child(
            NodeBuilder::new("session")
                .ns(ns::GINGLE_SESSION)
                .attr("type", "initiate")
                .attr("id", "999")
                .build(),
        )
        .child(NodeBuilder::new("error").attr("type", "cancel").build())
        .build();
    remote.tx.send(error).unwrap();

    let sip = harness.sip.clone();
    wait_for(move || sip.events().iter().any(|e| e == "reject:999")).await;
    assert!(harness.gateway.calls.get_session("999").await.is_none());
}

#[tokio::test]
async fn test_db_verify_requires_exact_key() {
    let mut harness = make_harness();

    // An outbound session presents its key first.
    harness
        .gateway
        .send_subscribe_request("100", "alice", "subscribe")
        .await
        .unwrap();
    let (domain, mut remote_out) = harness.opened.recv().await.unwrap();
    assert_eq!(domain, PEER);
    let challenge = recv_stanza(&mut remote_out).await;
    assert!(challenge.is("result", ns::DIALBACK));
    let key = challenge.text();

    // The peer comes back on a separate connection to verify it.
    let (link, mut remote_in) = channel_link("verify-inbound");
    harness.gateway.accept_session(link);

    let verify = |id: &str, key: &str| {
        NodeBuilder::new("verify")
            .ns(ns::DIALBACK)
            .attr("from", PEER)
            .attr("to", HOST)
            .attr("id", id)
            .text(key)
            .build()
    };
    remote_in.tx.send(verify("v1", &key)).unwrap();
    let reply = recv_stanza(&mut remote_in).await;
    assert!(reply.is("verify", ns::DIALBACK));
    assert_eq!(reply.attr("type"), Some("valid"));
    assert_eq!(reply.attr("id"), Some("v1"));

    remote_in.tx.send(verify("v2", "not-the-key")).unwrap();
    let reply = recv_stanza(&mut remote_in).await;
    assert_eq!(reply.attr("type"), Some("invalid"));
}

#[tokio::test]
async fn test_verified_inbound_claim_keeps_challenger_key_verifiable() {
    let mut harness = make_harness();

    // An outbound challenger toward the peer, still awaiting its verdict.
    harness
        .gateway
        .send_subscribe_request("100", "alice", "subscribe")
        .await
        .unwrap();
    let (_domain, mut remote_out) = harness.opened.recv().await.unwrap();
    let challenge = recv_stanza(&mut remote_out).await;
    let key = challenge.text();

    // Meanwhile the peer opens its own connection and claims a key.
    let (link, mut remote_in) = channel_link("claim-inbound");
    harness.gateway.accept_session(link);
    let claim = NodeBuilder::new("result")
        .ns(ns::DIALBACK)
        .attr("from", PEER)
        .attr("to", HOST)
        .text("peer-offered-key")
        .build();
    remote_in.tx.send(claim).unwrap();

    // We verify the claim over a fresh leg to the claimed origin.
    let (_domain, mut remote_verify) = tokio::time::timeout(
        Duration::from_secs(2),
        harness.opened.recv(),
    )
    .await
    .expect("no verification leg opened")
    .unwrap();
    let request = recv_stanza(&mut remote_verify).await;
    assert!(request.is("verify", ns::DIALBACK));
    assert_eq!(request.text(), "peer-offered-key");
    let confirm = NodeBuilder::new("verify")
        .ns(ns::DIALBACK)
        .attr("from", PEER)
        .attr("to", HOST)
        .attr("id", request.attr("id").unwrap_or(""))
        .attr("type", "valid")
        .build();
    remote_verify.tx.send(confirm).unwrap();

    let verdict = recv_stanza(&mut remote_in).await;
    assert!(verdict.is("result", ns::DIALBACK));
    assert_eq!(verdict.attr("type"), Some("valid"));

    // The verified inbound session must not shadow the challenger: its
    // genuine key still answers valid.
    let verify = NodeBuilder::new("verify")
        .ns(ns::DIALBACK)
        .attr("from", PEER)
        .attr("to", HOST)
        .attr("id", "v1")
        .text(key)
        .build();
    remote_in.tx.send(verify).unwrap();
    let reply = recv_stanza(&mut remote_in).await;
    assert!(reply.is("verify", ns::DIALBACK));
    assert_eq!(reply.attr("type"), Some("valid"));

    // And the challenger's queued traffic still flushes on its verdict.
    remote_out.tx.send(db_result_valid()).unwrap();
    let subscribe = recv_stanza(&mut remote_out).await;
    assert_eq!(subscribe.tag, "presence");
    assert_eq!(subscribe.attr("type"), Some("subscribe"));
}

#[tokio::test]
async fn test_gingle_accept_fills_answer_and_accepts_call() {
    let mut harness = make_harness();

    let remote_jid: Jid = "alice@xmpp.example.org/r1".parse().unwrap();
    let sid = harness
        .gateway
        .start_call(
            "100",
            &remote_jid,
            vec![AudioPayload::pcmu(), AudioPayload::pcma()],
            Vec::new(),
        )
        .await
        .unwrap();

    let (_domain, mut remote_out) = harness.opened.recv().await.unwrap();
    recv_stanza(&mut remote_out).await; // dialback challenge
    remote_out.tx.send(db_result_valid()).unwrap();
    recv_stanza(&mut remote_out).await; // initiate
    recv_stanza(&mut remote_out).await; // transport-info

    let accept = gingle_iq(
        "77",
        NodeBuilder::new("session")
            .ns(ns::GINGLE_SESSION)
            .attr("type", "accept")
            .attr("id", sid.as_str())
            .attr("initiator", format!("100@{HOST}/gateway"))
            .child(
                NodeBuilder::new("description")
                    .ns(ns::GINGLE_PHONE)
                    .child(
                        NodeBuilder::new("payload-type")
                            .ns(ns::GINGLE_PHONE)
                            .attr("id", "8")
                            .attr("name", "PCMA")
                            .attr("clockrate", "8000")
                            .build(),
                    )
                    .build(),
            )
            .build(),
    );
    remote_out.tx.send(accept).unwrap();

    let ack = recv_stanza(&mut remote_out).await;
    assert_eq!(ack.attr("type"), Some("result"));
    assert_eq!(ack.attr("id"), Some("77"));

    let sip = harness.sip.clone();
    let expected = format!("accept:{sid}");
    wait_for(move || sip.events().iter().any(|e| e == &expected)).await;

    let call = harness.gateway.calls.get_session(&sid).await.unwrap();
    let call = call.lock().await;
    assert_eq!(call.answer_payloads.len(), 1);
    assert_eq!(call.answer_payloads[0].name, "PCMA");
    assert_eq!(call.answer_payloads[0].id, 8);
    assert!(call.answer_vpayloads.is_empty());
}

#[tokio::test]
async fn test_video_start_call_advertises_four_streams_in_order() {
    let mut harness = make_harness();

    let video = VideoPayload {
        id: 99,
        name: "H264-SVC".to_string(),
        width: 320,
        height: 200,
        framerate: 30,
        clock_rate: 0,
    };
    let remote_jid: Jid = "alice@xmpp.example.org/r1".parse().unwrap();
    harness
        .gateway
        .start_call("100", &remote_jid, vec![AudioPayload::pcmu()], vec![video])
        .await
        .unwrap();

    let (_domain, mut remote_out) = harness.opened.recv().await.unwrap();
    let challenge = recv_stanza(&mut remote_out).await;
    assert!(challenge.is("result", ns::DIALBACK));

    // Verdict arrives; the queued initiate and candidates flush in order.
    remote_out.tx.send(db_result_valid()).unwrap();

    let initiate = recv_stanza(&mut remote_out).await;
    let session_el = initiate
        .get_child_ns("session", ns::GINGLE_SESSION)
        .unwrap();
    assert_eq!(session_el.attr("type"), Some("initiate"));
    assert!(
        session_el
            .get_child_ns("description", ns::GINGLE_VIDEO)
            .is_some()
    );

    let mut last_id: u64 = initiate.attr("id").unwrap().parse().unwrap();
    let mut streams = Vec::new();
    let mut usernames = Vec::new();
    for _ in 0..4 {
        let stanza = recv_stanza(&mut remote_out).await;
        let id: u64 = stanza.attr("id").unwrap().parse().unwrap();
        assert!(id > last_id, "stanza ids must strictly increase");
        last_id = id;

        let session_el = stanza.get_child_ns("session", ns::GINGLE_SESSION).unwrap();
        assert_eq!(session_el.attr("type"), Some("candidates"));
        let candidate = session_el.get_optional_child("candidate").unwrap();
        streams.push(candidate.attr("name").unwrap().to_string());
        usernames.push(candidate.attr("username").unwrap().to_string());
        assert_eq!(candidate.attr("password"), candidate.attr("username"));
    }
    assert_eq!(streams, ["rtcp", "rtp", "video_rtcp", "video_rtp"]);
    assert_eq!(usernames[0], usernames[1]);
    assert_eq!(usernames[2], usernames[3]);
    assert_ne!(usernames[0], usernames[2]);
}

#[tokio::test]
async fn test_audio_start_call_sends_single_transport_info() {
    let mut harness = make_harness();

    let remote_jid: Jid = "alice@xmpp.example.org/r1".parse().unwrap();
    let sid = harness
        .gateway
        .start_call("100", &remote_jid, vec![AudioPayload::pcmu()], Vec::new())
        .await
        .unwrap();

    let (_domain, mut remote_out) = harness.opened.recv().await.unwrap();
    recv_stanza(&mut remote_out).await; // dialback challenge
    remote_out.tx.send(db_result_valid()).unwrap();

    let initiate = recv_stanza(&mut remote_out).await;
    let session_el = initiate
        .get_child_ns("session", ns::GINGLE_SESSION)
        .unwrap();
    assert_eq!(session_el.attr("type"), Some("initiate"));
    assert_eq!(session_el.attr("id"), Some(sid.as_str()));

    let info = recv_stanza(&mut remote_out).await;
    let session_el = info.get_child_ns("session", ns::GINGLE_SESSION).unwrap();
    assert_eq!(session_el.attr("type"), Some("transport-info"));
    let transport = session_el
        .get_child_ns("transport", ns::TRANSPORT_P2P)
        .unwrap();
    let candidate = transport.get_optional_child("candidate").unwrap();
    assert_eq!(candidate.attr("name"), Some("rtp"));
    assert_eq!(candidate.attr("address"), Some("10.0.0.1"));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        remote_out.rx.try_recv().is_err(),
        "audio-only sends one advert"
    );
}

#[tokio::test]
async fn test_callback_message_places_audio_call() {
    let mut harness = make_harness();
    let (_session, remote) = confirmed_inbound(&harness).await;

    let chat = NodeBuilder::new("message")
        .ns(ns::SERVER)
        .attr("from", "alice@xmpp.example.org/r1")
        .attr("to", "100@gw.example.com")
        .attr("type", "chat")
        .child(NodeBuilder::new("body").text("callback").build())
        .build();
    remote.tx.send(chat).unwrap();

    // The callback rides a fresh outbound session to the sender's domain.
    let (domain, mut remote_out) = tokio::time::timeout(Duration::from_secs(2), harness.opened.recv())
        .await
        .expect("no outbound connection opened")
        .unwrap();
    assert_eq!(domain, PEER);
    recv_stanza(&mut remote_out).await; // dialback challenge
    remote_out.tx.send(db_result_valid()).unwrap();

    let initiate = recv_stanza(&mut remote_out).await;
    let session_el = initiate
        .get_child_ns("session", ns::GINGLE_SESSION)
        .unwrap();
    assert_eq!(session_el.attr("type"), Some("initiate"));
    assert_eq!(initiate.attr("to"), Some("alice@xmpp.example.org/r1"));
    assert!(
        initiate
            .attr("from")
            .unwrap()
            .starts_with("100@gw.example.com/")
    );

    let call = harness
        .gateway
        .calls
        .find_by_remote(&"alice@xmpp.example.org".parse().unwrap())
        .await
        .unwrap();
    let call = call.lock().await;
    assert_eq!(call.offer_payloads.len(), 2);
    assert_eq!(call.offer_payloads[0].name, "PCMU");
    assert_eq!(call.offer_payloads[1].name, "PCMA");
}

#[tokio::test]
async fn test_dial_body_forwards_dtmf() {
    let harness = make_harness();
    let (_session, mut remote) = confirmed_inbound(&harness).await;

    remote.tx.send(gingle_initiate("1", "321")).unwrap();
    recv_stanza(&mut remote).await;

    let chat = NodeBuilder::new("message")
        .ns(ns::SERVER)
        .attr("from", "alice@xmpp.example.org/r1")
        .attr("to", "100@gw.example.com")
        .attr("type", "chat")
        .child(NodeBuilder::new("body").text("/dial:12#").build())
        .build();
    remote.tx.send(chat).unwrap();

    let relay = harness.relays.relay(0);
    let relay_for_wait = relay.clone();
    wait_for(move || relay_for_wait.dtmf.lock().unwrap().len() == 3).await;
    assert_eq!(relay.dtmf.lock().unwrap().as_slice(), &['1', '2', '#']);
}

#[tokio::test]
async fn test_voice_caps_recorded_for_outbound_targeting() {
    let harness = make_harness();
    let (_session, remote) = confirmed_inbound(&harness).await;

    let presence = NodeBuilder::new("presence")
        .ns(ns::SERVER)
        .attr("from", "alice@xmpp.example.org/r7")
        .attr("to", "100@gw.example.com")
        .child(
            NodeBuilder::new("c")
                .ns(ns::CAPS)
                .attr("node", "http://client.example/caps")
                .attr("ver", "1.0")
                .attr("ext", "voice-v1 camera-v1")
                .build(),
        )
        .build();
    remote.tx.send(presence).unwrap();

    let directory = harness.directory.clone();
    let bare: Jid = "alice@xmpp.example.org".parse().unwrap();
    let bare_for_wait = bare.clone();
    wait_for(move || directory.voice.lock().unwrap().contains_key(&bare_for_wait)).await;

    // A bare-addressed call now targets that resource.
    harness
        .gateway
        .start_call("100", &bare, vec![AudioPayload::pcmu()], Vec::new())
        .await
        .unwrap();
    let call = harness.gateway.calls.find_by_remote(&bare).await.unwrap();
    assert_eq!(call.lock().await.remote.resource, "r7");
}

#[tokio::test]
async fn test_send_presence_carries_caps_and_pushes_phone_offline() {
    let mut harness = make_harness();

    let state = Presence {
        from: "100".to_string(),
        to: "alice".to_string(),
        kind: None,
        show: Some("away".to_string()),
        note: Some("on the road".to_string()),
        resource: None,
    };
    harness.gateway.send_presence(&state).await.unwrap();

    let (_domain, mut remote_out) = harness.opened.recv().await.unwrap();
    recv_stanza(&mut remote_out).await; // dialback challenge
    remote_out.tx.send(db_result_valid()).unwrap();

    let presence = recv_stanza(&mut remote_out).await;
    assert_eq!(presence.tag, "presence");
    assert_eq!(presence.attr("from"), Some("100@gw.example.com/gateway"));
    assert!(presence.attr("type").is_none());
    let caps = presence.get_child_ns("c", ns::CAPS).unwrap();
    assert!(caps.attr("ext").unwrap().contains("voice-v1"));
    assert_eq!(presence.get_optional_child("show").unwrap().text(), "away");
    assert_eq!(presence.get_optional_child("priority").unwrap().text(), "1");
    assert!(presence.get_child_ns("x", ns::VCARD_UPDATE).is_some());

    // The telephony resource goes offline when a real resource is online.
    let phone = recv_stanza(&mut remote_out).await;
    assert_eq!(phone.attr("type"), Some("unavailable"));
    assert_eq!(
        phone.attr("from"),
        Some("100@gw.example.com/gateway-phone")
    );
}

#[tokio::test]
async fn test_subscribe_to_gateway_identity_is_auto_accepted() {
    let harness = make_harness();
    let (_session, mut remote) = confirmed_inbound(&harness).await;

    let subscribe = NodeBuilder::new("presence")
        .ns(ns::SERVER)
        .attr("from", "alice@xmpp.example.org")
        .attr("to", "gateway@gw.example.com")
        .attr("type", "subscribe")
        .build();
    remote.tx.send(subscribe).unwrap();

    let reply = recv_stanza(&mut remote).await;
    assert_eq!(reply.tag, "presence");
    assert_eq!(reply.attr("type"), Some("subscribed"));
    assert_eq!(reply.attr("from"), Some("gateway@gw.example.com"));
}

#[tokio::test]
async fn test_disco_and_vcard_replies() {
    let harness = make_harness();
    let (_session, mut remote) = confirmed_inbound(&harness).await;

    let disco = NodeBuilder::new("iq")
        .ns(ns::SERVER)
        .attr("from", "alice@xmpp.example.org/r1")
        .attr("to", HOST)
        .attr("id", "d1")
        .attr("type", "get")
        .child(NodeBuilder::new("query").ns(ns::DISCO_INFO).build())
        .build();
    remote.tx.send(disco).unwrap();

    let reply = recv_stanza(&mut remote).await;
    assert_eq!(reply.attr("id"), Some("d1"));
    let query = reply.get_child_ns("query", ns::DISCO_INFO).unwrap();
    let features: Vec<&str> = query
        .get_children_by_tag("feature")
        .filter_map(|f| f.attr("var"))
        .collect();
    assert!(features.contains(&ns::FEATURE_VOICE));
    assert!(features.contains(&ns::GINGLE_SESSION));

    let vcard = NodeBuilder::new("iq")
        .ns(ns::SERVER)
        .attr("from", "alice@xmpp.example.org/r1")
        .attr("to", "0032489@gw.example.com")
        .attr("id", "v1")
        .attr("type", "get")
        .child(NodeBuilder::new("vCard").ns(ns::VCARD).build())
        .build();
    remote.tx.send(vcard).unwrap();

    let reply = recv_stanza(&mut remote).await;
    assert_eq!(reply.attr("id"), Some("v1"));
    let card = reply.get_child_ns("vCard", ns::VCARD).unwrap();
    assert_eq!(card.get_optional_child("FN").unwrap().text(), "+0032489");
    assert!(card.get_optional_child("PHOTO").is_some());
}
