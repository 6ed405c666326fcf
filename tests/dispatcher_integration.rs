//! End-to-end dispatcher test against loopback UDP sockets and a fake host.

use std::net::UdpSocket as StdUdpSocket;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use nosip_bridge::config::BridgeConfig;
use nosip_bridge::dispatcher::{GenerateRequest, ProcessRequest};
use nosip_bridge::host::{HostApi, Leg};
use nosip_bridge::plugin::NoSipPlugin;
use nosip_bridge::rtp::RtpExtensions;
use nosip_bridge::session::SessionState;

struct FakeHost;

#[async_trait]
impl HostApi for FakeHost {
    async fn push_event(&self, _session_id: u64, _event: Value) {}
    async fn relay_rtp(
        &self,
        _session_id: u64,
        _leg: Leg,
        _video: bool,
        _packet: &[u8],
        _extensions: RtpExtensions,
    ) {
    }
    async fn relay_rtcp(&self, _session_id: u64, _leg: Leg, _packet: &[u8]) {}
    async fn send_pli(&self, _session_id: u64) {}
    async fn close_peer_connection(&self, _session_id: u64) {}
    async fn notify_event(&self, _session_id: u64, _payload: Value) {}
    fn events_is_enabled(&self) -> bool {
        true
    }
}

fn barebone_offer(peer_rtp_port: u16) -> String {
    format!(
        "v=0\r\n\
o=- 42 1 IN IP4 127.0.0.1\r\n\
s=nosip\r\n\
c=IN IP4 127.0.0.1\r\n\
t=0 0\r\n\
m=audio {peer_rtp_port} RTP/AVP 111\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=sendrecv\r\n"
    )
}

#[tokio::test]
async fn generate_process_relay_and_hangup_round_trip() {
    let mut config = BridgeConfig::default();
    config.local_ip = Some("127.0.0.1".parse().unwrap());
    config.rtp_port_range = "43000-43100".to_string();

    let plugin = NoSipPlugin::new(config, Arc::new(FakeHost)).expect("valid config");
    let session = plugin.create_session(false).await;

    let gen_resp = plugin
        .dispatcher
        .handle_generate(
            &session,
            GenerateRequest {
                audio: true,
                video: false,
                ..Default::default()
            },
        )
        .await
        .expect("generate should succeed");
    assert!(gen_resp.sdp.contains("m=audio"));

    // Stand in for the plain-RTP peer: a loopback socket the session will
    // learn as the remote transport once it processes the offer below.
    let peer = StdUdpSocket::bind("127.0.0.1:0").unwrap();
    peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let peer_port = peer.local_addr().unwrap().port();

    let process_resp = plugin
        .dispatcher
        .handle_process(
            &session,
            ProcessRequest {
                sdp: barebone_offer(peer_port),
                update: false,
                data: false,
                e2ee: false,
                info: None,
            },
        )
        .await
        .expect("process should succeed");
    assert!(process_resp.audio);
    assert_eq!(session.state().await, SessionState::Ready);

    // Host upcall: something arrived on the signalled leg, forward it to
    // the plain leg we just negotiated.
    plugin
        .dispatcher
        .relay_inbound_rtp(&session, false, b"hello-from-webrtc-leg")
        .await;

    let mut buf = [0u8; 64];
    let (len, _from) = peer.recv_from(&mut buf).expect("peer should receive the relayed packet");
    assert_eq!(&buf[..len], b"hello-from-webrtc-leg");

    plugin.dispatcher.handle_hangup(&session).await.unwrap();
    assert_eq!(session.state().await, SessionState::Destroyed);
}

#[tokio::test]
async fn generate_rejects_datachannel_request() {
    let mut config = BridgeConfig::default();
    config.local_ip = Some("127.0.0.1".parse().unwrap());
    config.rtp_port_range = "43200-43300".to_string();

    let plugin = NoSipPlugin::new(config, Arc::new(FakeHost)).unwrap();
    let session = plugin.create_session(false).await;

    let err = plugin
        .dispatcher
        .handle_generate(
            &session,
            GenerateRequest {
                local_description: Some(
                    "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n\
m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n"
                        .to_string(),
                ),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), 444);
}
