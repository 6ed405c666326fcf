//! Request Dispatcher
//!
//! Single entry point handling `generate`/`process`/`hangup`/`recording`/
//! `keyframe` requests against one session at a time, serially per
//! session (spec §4.8). Wire shapes mirror spec §6; numeric error codes
//! come straight off [`crate::error::RequestError::code`].

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::error::{RequestError, SrtpError};
use crate::host::HostApi;
use crate::port_allocator::PortAllocator;
use crate::recorder::{FileRecorder, Recorder};
use crate::relay::{self, RelayHandle, RemoteAddrs};
use crate::sdp::{self, CryptoAttribute, LocalMedia, MediaKind};
use crate::session::{MediaLeg, Session, SessionState};
use crate::srtp::{CryptoSuite, MasterKey, SrtpContext};

/// How strictly this session requires SRTP on the plain-RTP leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SrtpPolicy {
    /// No SRTP; plain RTP only.
    Disabled,
    /// Offer SRTP but fall back to plain RTP if the peer doesn't support it.
    Optional,
    /// Require SRTP; reject the call if the peer doesn't support it.
    Mandatory,
}

impl Default for SrtpPolicy {
    fn default() -> Self {
        SrtpPolicy::Disabled
    }
}

/// `generate` request body (spec §6).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub update: bool,
    #[serde(default = "default_true")]
    pub audio: bool,
    #[serde(default = "default_true")]
    pub video: bool,
    #[serde(default)]
    pub srtp: SrtpPolicy,
    /// The host's own locally produced WebRTC offer/answer (its JSEP
    /// `local_description_object`). Used as the template for the plain
    /// leg's description, so the host's own payload types/attributes
    /// survive, and scanned for `m=application` to detect a data channel.
    pub local_description: Option<String>,
    /// Rejected outright if set: end-to-end encrypted media is out of scope.
    #[serde(default)]
    pub e2ee: bool,
    /// Optional `{"ssrcs":[...]}`/`{"ssrc-0":...}` simulcast base-layer
    /// hint, carried the way the original plugin reads it off the
    /// attached JSEP object rather than off inbound SDP attributes.
    pub simulcast: Option<Value>,
    /// Opaque passthrough, not acted on beyond event notifications.
    pub info: Option<String>,
}

fn default_true() -> bool {
    true
}

/// `process` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessRequest {
    pub sdp: String,
    #[serde(default)]
    pub update: bool,
    #[serde(default)]
    pub data: bool,
    #[serde(default)]
    pub e2ee: bool,
    pub info: Option<String>,
}

/// `recording` request body: four independent own/peer audio/video
/// slots mapping onto spec §3's four-slot model, plus an optional
/// filename (spec §6/§8 scenario 6).
#[derive(Debug, Clone, Deserialize)]
pub struct RecordingRequest {
    pub action: RecordingAction,
    #[serde(default)]
    pub audio: bool,
    #[serde(default)]
    pub video: bool,
    #[serde(default)]
    pub peer_audio: bool,
    #[serde(default)]
    pub peer_video: bool,
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingAction {
    Start,
    Stop,
}

/// `keyframe` request body (spec §6/§4.8): `user` asks the host to
/// produce a keyframe on its signalled leg, `peer` asks this bridge to
/// send a PLI toward the plain-RTP peer (if it negotiated PLI support).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeyframeRequest {
    #[serde(default = "default_true")]
    pub user: bool,
    #[serde(default = "default_true")]
    pub peer: bool,
}

/// Response to `generate`/`process`: the local SDP plus an echo of what
/// was negotiated.
#[derive(Debug, Clone, Serialize)]
pub struct SdpResponse {
    pub sdp: String,
    pub audio: bool,
    pub video: bool,
}

/// Shared wiring every dispatcher call needs: the port allocator and the
/// host capability callback surface.
pub struct Dispatcher {
    pub config: BridgeConfig,
    pub port_allocator: Arc<PortAllocator>,
    pub host: Arc<dyn HostApi>,
}

impl Dispatcher {
    pub fn new(config: BridgeConfig, port_allocator: Arc<PortAllocator>, host: Arc<dyn HostApi>) -> Self {
        Self {
            config,
            port_allocator,
            host,
        }
    }

    fn advertise_ip(&self) -> Result<IpAddr, RequestError> {
        self.config
            .advertise_ip()
            .ok_or_else(|| RequestError::Unknown("no advertise IP configured".to_string()))
    }

    /// Handle a `generate` request: allocate local transport, build a
    /// local SDP offer/answer from the host's own description, and move
    /// the session into `Negotiating`.
    pub async fn handle_generate(
        &self,
        session: &Arc<Session>,
        req: GenerateRequest,
    ) -> Result<SdpResponse, RequestError> {
        let has_data_channel = req
            .local_description
            .as_deref()
            .map(sdp::contains_data_channel)
            .unwrap_or(false);
        if has_data_channel {
            return Err(RequestError::InvalidElement(
                "data channels are not supported".to_string(),
            ));
        }
        if req.e2ee {
            return Err(RequestError::InvalidElement(
                "end-to-end encrypted media is not supported".to_string(),
            ));
        }

        let is_update = req.update || session.implicit_update().await;
        if !is_update {
            session.transition(SessionState::Negotiating).await?;
        }

        let mut legs = Vec::new();
        if req.audio {
            legs.push(
                self.build_local_leg(
                    session,
                    MediaKind::Audio,
                    req.srtp,
                    req.local_description.as_deref(),
                    req.simulcast.as_ref(),
                )
                .await?,
            );
        }
        if req.video {
            legs.push(
                self.build_local_leg(
                    session,
                    MediaKind::Video,
                    req.srtp,
                    req.local_description.as_deref(),
                    req.simulcast.as_ref(),
                )
                .await?,
            );
        }

        let advertise_ip = self.advertise_ip()?;
        let template = match &req.local_description {
            Some(text) => Some(text.clone()),
            None => session.local_sdp.lock().await.clone(),
        };
        let version = session.next_sdp_version();
        let sdp_text = sdp::manipulate(template.as_deref(), advertise_ip, session.id, version, &legs)
            .map_err(|e| RequestError::InvalidSdp(e.to_string()))?;
        *session.local_sdp.lock().await = Some(sdp_text.clone());

        if !is_update && self.host.events_is_enabled() {
            self.host
                .notify_event(session.id, json!({"event": "generate", "info": req.info}))
                .await;
        }

        Ok(SdpResponse {
            sdp: sdp_text,
            audio: req.audio,
            video: req.video,
        })
    }

    async fn build_local_leg(
        &self,
        session: &Arc<Session>,
        kind: MediaKind,
        srtp_policy: SrtpPolicy,
        local_description: Option<&str>,
        simulcast: Option<&Value>,
    ) -> Result<LocalMedia, RequestError> {
        let leg_mutex = match kind {
            MediaKind::Audio => &session.audio,
            MediaKind::Video => &session.video,
        };
        let mut guard = leg_mutex.lock().await;

        if guard.is_none() {
            let mut leg = MediaLeg::new(Session::fresh_ssrc());
            let pair = self
                .port_allocator
                .allocate_pair(kind == MediaKind::Video)
                .map_err(|e| RequestError::IoError(e.to_string()))?;
            leg.local_rtp_port = pair.rtp_port;
            leg.local_rtcp_port = pair.rtcp_port;
            pair.rtp_socket
                .set_nonblocking(true)
                .map_err(|e| RequestError::IoError(e.to_string()))?;
            pair.rtcp_socket
                .set_nonblocking(true)
                .map_err(|e| RequestError::IoError(e.to_string()))?;
            leg.rtp_socket = Some(Arc::new(
                tokio::net::UdpSocket::from_std(pair.rtp_socket)
                    .map_err(|e| RequestError::IoError(e.to_string()))?,
            ));
            leg.rtcp_socket = Some(Arc::new(
                tokio::net::UdpSocket::from_std(pair.rtcp_socket)
                    .map_err(|e| RequestError::IoError(e.to_string()))?,
            ));
            leg.relay_handle = Some(RelayHandle::new());
            leg.remotes = Some(RemoteAddrs::new());
            leg.enabled = true;
            leg.payload_type = local_description
                .and_then(|text| sdp::first_payload_type(text, kind))
                .or(Some(111));
            *guard = Some(leg);
        }
        let leg = guard.as_mut().expect("just inserted");

        leg.srtp_required = srtp_policy == SrtpPolicy::Mandatory;
        if let Some(value) = simulcast {
            leg.simulcast_base_ssrc = simulcast_base_ssrc(value);
        }

        let crypto = if srtp_policy != SrtpPolicy::Disabled {
            let suite = CryptoSuite::AesCm128HmacSha1_80;
            let local_key = MasterKey::generate(suite);
            let value = CryptoAttribute {
                tag: 1,
                suite,
                key_params: format!("inline:{}", local_key.to_base64()),
            };
            Some(value)
        } else {
            None
        };

        Ok(LocalMedia {
            kind,
            enabled: leg.enabled,
            rtp_port: leg.local_rtp_port,
            payload_type: leg.payload_type.unwrap_or(111),
            red: leg.red_payload_type.map(|red| (red, leg.payload_type.unwrap_or(111))),
            crypto,
            send_pli_capable: kind == MediaKind::Video,
        })
    }

    /// Handle a `process` request: parse the peer's SDP, wire up SRTP and
    /// remote transport, and move the session to `Ready`.
    pub async fn handle_process(
        &self,
        session: &Arc<Session>,
        req: ProcessRequest,
    ) -> Result<SdpResponse, RequestError> {
        if req.data {
            return Err(RequestError::InvalidElement(
                "data channels are not supported".to_string(),
            ));
        }
        if req.e2ee {
            return Err(RequestError::InvalidElement(
                "end-to-end encrypted media is not supported".to_string(),
            ));
        }
        if req.sdp.trim().is_empty() {
            return Err(RequestError::MissingSdp("sdp".to_string()));
        }

        let is_update = req.update || session.implicit_update().await;
        if !is_update {
            session.transition(SessionState::Negotiating).await?;
        }

        let previous_red = *session.local_red_pt.lock().await;
        let remote = sdp::process(&req.sdp, previous_red)
            .map_err(|e| RequestError::InvalidSdp(e.to_string()))?;

        let mut audio_enabled = false;
        let mut video_enabled = false;

        if let Some(audio) = &remote.audio {
            self.apply_remote_leg(session, MediaKind::Audio, audio).await?;
            audio_enabled = audio.enabled;
            if let Some(red) = audio.red_payload_type {
                *session.local_red_pt.lock().await = Some(red);
            }
        }
        if let Some(video) = &remote.video {
            self.apply_remote_leg(session, MediaKind::Video, video).await?;
            video_enabled = video.enabled;
        }

        if !is_update {
            session.transition(SessionState::Ready).await?;
        }

        if !is_update && self.host.events_is_enabled() {
            self.host
                .notify_event(session.id, json!({"event": "process", "info": req.info}))
                .await;
        }

        let local_sdp = session
            .local_sdp
            .lock()
            .await
            .clone()
            .ok_or_else(|| RequestError::WrongState("no local sdp generated yet".to_string()))?;

        Ok(SdpResponse {
            sdp: local_sdp,
            audio: audio_enabled,
            video: video_enabled,
        })
    }

    async fn apply_remote_leg(
        &self,
        session: &Arc<Session>,
        kind: MediaKind,
        remote: &sdp::RemoteMedia,
    ) -> Result<(), RequestError> {
        let leg_mutex = match kind {
            MediaKind::Audio => &session.audio,
            MediaKind::Video => &session.video,
        };
        let mut guard = leg_mutex.lock().await;
        let Some(leg) = guard.as_mut() else {
            return Err(RequestError::WrongState(format!(
                "no local {:?} leg to negotiate against",
                kind
            )));
        };

        if let Some(ip) = remote.remote_ip {
            leg.remote_rtp_addr = Some(SocketAddr::new(ip, remote.remote_rtp_port));
            leg.remote_rtcp_addr = Some(SocketAddr::new(ip, remote.remote_rtp_port + 1));
        }
        if remote.payload_type.is_some() {
            leg.payload_type = remote.payload_type;
        }
        leg.red_payload_type = remote.red_payload_type;
        leg.wants_pli = remote.wants_pli;
        leg.audio_level_ext_id = remote.audio_level_ext_id;
        leg.video_orientation_ext_id = remote.video_orientation_ext_id;

        if let Some(remote_crypto) = remote.crypto.first() {
            let local_suite = remote_crypto.suite;
            let local_key = MasterKey::generate(local_suite);
            let remote_key = remote_crypto
                .inline_key()
                .ok_or_else(|| RequestError::InvalidSdp("missing crypto key material".to_string()))
                .and_then(|b64| {
                    MasterKey::from_base64(local_suite, b64)
                        .map_err(|e: SrtpError| RequestError::InvalidSdp(e.to_string()))
                })?;
            let ctx = SrtpContext::new(local_suite, remote_crypto.tag, &local_key, &remote_key)
                .map_err(|e| RequestError::InvalidElement(e.to_string()))?;
            leg.srtp = Some(tokio::sync::Mutex::new(ctx));
        } else if leg.srtp_required || session.srtp_required {
            return Err(RequestError::TooStrict(
                "SRTP is mandatory but the peer offered none".to_string(),
            ));
        }

        let rtp_sock = leg
            .rtp_socket
            .clone()
            .ok_or_else(|| RequestError::WrongState("no local rtp socket".to_string()))?;
        let rtcp_sock = leg
            .rtcp_socket
            .clone()
            .ok_or_else(|| RequestError::WrongState("no local rtcp socket".to_string()))?;
        let remotes = leg.remotes.clone().unwrap_or_else(RemoteAddrs::new);
        *remotes.rtp.lock().await = leg.remote_rtp_addr;
        *remotes.rtcp.lock().await = leg.remote_rtcp_addr;

        if leg.relay_task.lock().await.is_none() {
            if let Some(addr) = leg.remote_rtp_addr {
                rtp_sock
                    .connect(addr)
                    .await
                    .map_err(|e| RequestError::IoError(e.to_string()))?;
            }
            if let Some(addr) = leg.remote_rtcp_addr {
                rtcp_sock
                    .connect(addr)
                    .await
                    .map_err(|e| RequestError::IoError(e.to_string()))?;
            }
            let handle = leg.relay_handle.clone().unwrap_or_else(RelayHandle::new);
            let task = relay::spawn(
                session.clone(),
                kind == MediaKind::Video,
                rtp_sock,
                rtcp_sock,
                remotes,
                handle,
                self.host.clone(),
            );
            *leg.relay_task.lock().await = Some(task);
        } else if let Some(handle) = &leg.relay_handle {
            handle.notify_update();
        }

        Ok(())
    }

    /// Host upcall: forward an RTP packet received on the host's
    /// signalled leg out onto this session's plain-RTP leg, protecting
    /// it with SRTP if negotiated.
    pub async fn relay_inbound_rtp(&self, session: &Arc<Session>, video: bool, packet: &[u8]) {
        let leg_mutex = if video { &session.video } else { &session.audio };
        let mut guard = leg_mutex.lock().await;
        let Some(leg) = guard.as_mut() else {
            return;
        };
        if leg.remote_rtp_addr.is_none() {
            return;
        }
        let Some(socket) = leg.rtp_socket.clone() else {
            return;
        };

        if let Some(recorder) = &leg.own_recorder {
            recorder.record_rtp(packet);
        }

        let out = if let Some(ctx_mutex) = &leg.srtp {
            match ctx_mutex.lock().await.protect_rtp(packet) {
                Ok(protected) => protected,
                Err(e) => {
                    warn!(error = %e, "srtp protect failed, dropping outbound rtp");
                    return;
                }
            }
        } else {
            bytes::Bytes::copy_from_slice(packet)
        };

        if let Err(e) = socket.send(&out).await {
            warn!(error = %e, "failed to relay rtp to plain leg");
        }
    }

    /// Host upcall: forward an RTCP packet received on the host's
    /// signalled leg out onto this session's plain-RTP leg, fixing up
    /// the compound packet's sender/media SSRC fields to
    /// `(local_ssrc, peer_ssrc)` before protecting/sending (spec §4.7).
    pub async fn relay_inbound_rtcp(&self, session: &Arc<Session>, video: bool, packet: &[u8]) {
        let leg_mutex = if video { &session.video } else { &session.audio };
        let mut guard = leg_mutex.lock().await;
        let Some(leg) = guard.as_mut() else {
            return;
        };
        if leg.remote_rtcp_addr.is_none() {
            return;
        }
        let Some(socket) = leg.rtcp_socket.clone() else {
            return;
        };

        let fixed = match crate::rtcp::fix_ssrc(packet, leg.local_ssrc, leg.remote_ssrc.unwrap_or(0)) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "malformed rtcp from signalled leg, dropping");
                return;
            }
        };

        if let Some(recorder) = &leg.own_recorder {
            recorder.record_rtcp(&fixed);
        }

        let out = if let Some(ctx_mutex) = &leg.srtp {
            match ctx_mutex.lock().await.protect_rtcp(&fixed) {
                Ok(protected) => protected,
                Err(e) => {
                    warn!(error = %e, "srtp protect failed, dropping outbound rtcp");
                    return;
                }
            }
        } else {
            fixed
        };

        if let Err(e) = socket.send(&out).await {
            warn!(error = %e, "failed to relay rtcp to plain leg");
        }
    }

    /// Handle `hangup`: move to `HangingUp`, stop relay tasks, release
    /// recorders. Port release happens when the session is dropped.
    pub async fn handle_hangup(&self, session: &Arc<Session>) -> Result<(), RequestError> {
        session.transition(SessionState::HangingUp).await.ok();
        for leg_mutex in [&session.audio, &session.video] {
            let mut guard = leg_mutex.lock().await;
            if let Some(leg) = guard.as_mut() {
                if let Some(recorder) = leg.peer_recorder.take() {
                    recorder.close();
                }
                if let Some(recorder) = leg.own_recorder.take() {
                    recorder.close();
                }
                if let Some(handle) = &leg.relay_handle {
                    handle.request_close();
                }
                if let Some(task) = leg.relay_task.lock().await.take() {
                    task.abort();
                }
            }
        }
        self.host.close_peer_connection(session.id).await;
        session.transition(SessionState::Destroyed).await.ok();
        info!(session = session.id, "session hung up");
        Ok(())
    }

    /// Handle `recording`: attach/detach a [`FileRecorder`] on each
    /// requested own/peer audio/video slot.
    pub async fn handle_recording(
        &self,
        session: &Arc<Session>,
        req: RecordingRequest,
    ) -> Result<Value, RequestError> {
        let mut slots: Vec<(&tokio::sync::Mutex<Option<MediaLeg>>, bool, bool)> = Vec::new();
        if req.audio {
            slots.push((&session.audio, false, false));
        }
        if req.video {
            slots.push((&session.video, true, false));
        }
        if req.peer_audio {
            slots.push((&session.audio, false, true));
        }
        if req.peer_video {
            slots.push((&session.video, true, true));
        }
        if slots.is_empty() {
            return Err(RequestError::MissingElement(
                "audio, video, peer_audio or peer_video".to_string(),
            ));
        }

        match req.action {
            RecordingAction::Start => {
                for (leg_mutex, is_video, is_peer) in slots {
                    let mut guard = leg_mutex.lock().await;
                    let Some(leg) = guard.as_mut() else {
                        continue;
                    };
                    let side = if is_peer { "peer" } else { "own" };
                    let medium = if is_video { "video" } else { "audio" };
                    let path = match &req.filename {
                        Some(base) => format!("{base}-{side}-{medium}.rec"),
                        None => format!("nosip-{}-{}-{side}-{medium}.rec", session.id, unix_timestamp()),
                    };
                    let recorder = FileRecorder::create(path)
                        .map_err(|e| RequestError::RecordingError(e.to_string()))?;
                    let recorder: Arc<dyn Recorder> = Arc::new(recorder);
                    if is_peer {
                        leg.peer_recorder = Some(recorder);
                    } else {
                        leg.own_recorder = Some(recorder);
                        if is_video {
                            self.host.send_pli(session.id).await;
                        }
                    }
                }
            }
            RecordingAction::Stop => {
                for (leg_mutex, _is_video, is_peer) in slots {
                    let mut guard = leg_mutex.lock().await;
                    let Some(leg) = guard.as_mut() else {
                        continue;
                    };
                    let recorder = if is_peer {
                        leg.peer_recorder.take()
                    } else {
                        leg.own_recorder.take()
                    };
                    if let Some(recorder) = recorder {
                        recorder.close();
                    }
                }
            }
        }

        Ok(json!({"result": "ok"}))
    }

    /// Handle `keyframe`: if `user`, ask the host for a PLI on its
    /// signalled leg; if `peer` and the plain-RTP peer negotiated PLI
    /// support, send one on this leg's RTCP socket too (spec §4.8).
    pub async fn handle_keyframe(&self, session: &Arc<Session>, req: KeyframeRequest) -> Result<(), RequestError> {
        if req.user {
            self.host.send_pli(session.id).await;
        }

        if req.peer {
            let guard = session.video.lock().await;
            if let Some(leg) = guard.as_ref() {
                if leg.wants_pli {
                    if let Some(socket) = &leg.rtcp_socket {
                        relay::send_pli(socket, leg.local_ssrc, leg.remote_ssrc.unwrap_or(0)).await;
                    }
                }
            }
        }
        debug!(session = session.id, "keyframe requested");
        Ok(())
    }
}

fn unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Read the simulcast base-layer SSRC out of a `generate` request's JSEP
/// `simulcast` object, preferring the array form over the named
/// `ssrc-0` form when both are present (spec §9).
fn simulcast_base_ssrc(value: &Value) -> Option<u32> {
    if let Some(first) = value
        .get("ssrcs")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|v| v.as_u64())
    {
        return Some(first as u32);
    }
    value.get("ssrc-0").and_then(|v| v.as_u64()).map(|v| v as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FakeHost {
        events_enabled: bool,
        notified: std::sync::Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl HostApi for FakeHost {
        async fn push_event(&self, _session_id: u64, _event: Value) {}
        async fn relay_rtp(
            &self,
            _session_id: u64,
            _leg: crate::host::Leg,
            _video: bool,
            _packet: &[u8],
            _extensions: crate::rtp::RtpExtensions,
        ) {
        }
        async fn relay_rtcp(&self, _session_id: u64, _leg: crate::host::Leg, _packet: &[u8]) {}
        async fn send_pli(&self, _session_id: u64) {}
        async fn close_peer_connection(&self, _session_id: u64) {}
        async fn notify_event(&self, _session_id: u64, payload: Value) {
            self.notified.lock().unwrap().push(payload);
        }
        fn events_is_enabled(&self) -> bool {
            self.events_enabled
        }
    }

    fn test_dispatcher() -> Dispatcher {
        let mut config = BridgeConfig::default();
        config.local_ip = Some("127.0.0.1".parse().unwrap());
        config.rtp_port_range = "41000-41100".to_string();
        let allocator = Arc::new(PortAllocator::new(41000, 41100, config.local_ip, false));
        let host = Arc::new(FakeHost {
            events_enabled: true,
            notified: std::sync::Mutex::new(Vec::new()),
        });
        Dispatcher::new(config, allocator, host)
    }

    #[tokio::test]
    async fn generate_rejects_data_channel_requests() {
        let dispatcher = test_dispatcher();
        let session = Arc::new(Session::new(1, false));
        let req = GenerateRequest {
            local_description: Some(
                "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\nm=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n"
                    .to_string(),
            ),
            ..Default::default()
        };
        let err = dispatcher.handle_generate(&session, req).await.unwrap_err();
        assert!(matches!(err, RequestError::InvalidElement(_)));
        assert_eq!(err.code(), 444);
    }

    #[tokio::test]
    async fn generate_allocates_ports_and_produces_sdp() {
        let dispatcher = test_dispatcher();
        let session = Arc::new(Session::new(2, false));
        let req = GenerateRequest {
            audio: true,
            video: false,
            ..Default::default()
        };
        let resp = dispatcher.handle_generate(&session, req).await.unwrap();
        assert!(resp.sdp.contains("m=audio"));
        let leg = session.audio.lock().await;
        assert!(leg.as_ref().unwrap().local_rtp_port >= 41000);
    }

    #[tokio::test]
    async fn generate_preserves_host_payload_types() {
        let dispatcher = test_dispatcher();
        let session = Arc::new(Session::new(6, false));
        let req = GenerateRequest {
            audio: true,
            video: false,
            local_description: Some(
                "v=0\r\no=- 5 1 IN IP4 192.0.2.1\r\ns=-\r\nc=IN IP4 192.0.2.1\r\nt=0 0\r\nm=audio 9 RTP/AVP 0 8\r\na=rtpmap:0 PCMU/8000\r\na=rtpmap:8 PCMA/8000\r\n"
                    .to_string(),
            ),
            ..Default::default()
        };
        let resp = dispatcher.handle_generate(&session, req).await.unwrap();
        assert!(resp.sdp.contains("RTP/AVP 0 8"));
    }

    #[tokio::test]
    async fn process_rejects_missing_sdp() {
        let dispatcher = test_dispatcher();
        let session = Arc::new(Session::new(3, false));
        let req = ProcessRequest {
            sdp: String::new(),
            update: false,
            data: false,
            e2ee: false,
            info: None,
        };
        let err = dispatcher.handle_process(&session, req).await.unwrap_err();
        assert!(matches!(err, RequestError::MissingSdp(_)));
    }

    #[tokio::test]
    async fn process_rejects_when_srtp_mandatory_and_peer_has_no_crypto() {
        let dispatcher = test_dispatcher();
        let session = Arc::new(Session::new(5, false));
        dispatcher
            .handle_generate(
                &session,
                GenerateRequest {
                    audio: true,
                    video: false,
                    srtp: SrtpPolicy::Mandatory,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let remote_sdp = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\nc=IN IP4 127.0.0.1\r\nt=0 0\r\nm=audio 20000 RTP/AVP 111\r\na=rtpmap:111 opus/48000/2\r\n";
        let err = dispatcher
            .handle_process(
                &session,
                ProcessRequest {
                    sdp: remote_sdp.to_string(),
                    update: false,
                    data: false,
                    e2ee: false,
                    info: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::TooStrict(_)));
        assert_eq!(err.code(), 450);
    }

    #[tokio::test]
    async fn keyframe_noop_when_nothing_requested() {
        let dispatcher = test_dispatcher();
        let session = Arc::new(Session::new(4, false));
        dispatcher
            .handle_keyframe(&session, KeyframeRequest { user: false, peer: false })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn recording_requires_at_least_one_slot() {
        let dispatcher = test_dispatcher();
        let session = Arc::new(Session::new(7, false));
        let err = dispatcher
            .handle_recording(
                &session,
                RecordingRequest {
                    action: RecordingAction::Start,
                    audio: false,
                    video: false,
                    peer_audio: false,
                    peer_video: false,
                    filename: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::MissingElement(_)));
    }
}
