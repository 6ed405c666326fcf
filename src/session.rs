//! Media Session
//!
//! The per-call state block: negotiated transport/crypto for each medium,
//! the state machine governing what requests are valid when, and the
//! handles the relay worker and recorder are reached through (spec §4.4).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::RequestError;
use crate::recorder::Recorder;
use crate::rtp::SwitchingContext;
use crate::srtp::SrtpContext;

/// Lifecycle states a session moves through (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, no SDP exchanged yet.
    Idle,
    /// A `generate`/`process` is in flight; transport not yet usable.
    Negotiating,
    /// Transport and (if negotiated) crypto are live; media can flow.
    Ready,
    /// `hangup` has been requested; relay is draining/stopping.
    HangingUp,
    /// Fully torn down; ports and crypto released. Terminal.
    Destroyed,
}

impl SessionState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Negotiating)
                | (Negotiating, Ready)
                | (Negotiating, Idle)
                | (Ready, Negotiating) // renegotiation
                | (Ready, HangingUp)
                | (Negotiating, HangingUp)
                | (Idle, HangingUp)
                | (HangingUp, Destroyed)
        )
    }
}

/// Per-medium (audio or video) negotiated state.
pub struct MediaLeg {
    pub enabled: bool,
    pub local_rtp_port: u16,
    pub local_rtcp_port: u16,
    pub rtp_socket: Option<Arc<UdpSocket>>,
    pub rtcp_socket: Option<Arc<UdpSocket>>,
    pub remote_rtp_addr: Option<SocketAddr>,
    pub remote_rtcp_addr: Option<SocketAddr>,
    pub payload_type: Option<u8>,
    pub red_payload_type: Option<u8>,
    /// The peer's SSRC, learned from the first ingress RTP packet on this
    /// leg (spec §3/§4.5) — never set from SDP.
    pub remote_ssrc: Option<u32>,
    pub local_ssrc: u32,
    /// Simulcast base-layer SSRC filter, carried on the host's `generate`
    /// request (its JSEP `simulcast` object); packets whose SSRC doesn't
    /// match this are dropped on ingress rather than relayed (spec §4.7).
    pub simulcast_base_ssrc: Option<u32>,
    /// Whether the peer advertised `a=rtcp-fb ... pli`/`nack pli` for this medium.
    pub wants_pli: bool,
    /// RFC 5285 one-byte extension id the peer negotiated for audio-level, if any.
    pub audio_level_ext_id: Option<u8>,
    /// RFC 5285 one-byte extension id the peer negotiated for video-orientation, if any.
    pub video_orientation_ext_id: Option<u8>,
    /// Whether this leg's negotiated SRTP policy requires the peer to offer crypto.
    pub srtp_required: bool,
    pub srtp: Option<Mutex<SrtpContext>>,
    pub switching_ctx: Mutex<SwitchingContext>,
    /// Records what the plain-RTP peer sent.
    pub peer_recorder: Option<Arc<dyn Recorder>>,
    /// Records what was forwarded out from the host's signalled leg.
    pub own_recorder: Option<Arc<dyn Recorder>>,
    /// Cancellation handle for this leg's relay task, if running.
    pub relay_task: Mutex<Option<JoinHandle<()>>>,
    /// Shutdown/update handle for the relay task, shared with it.
    pub relay_handle: Option<Arc<crate::relay::RelayHandle>>,
    /// Last-known remote transport, shared with the relay task.
    pub remotes: Option<Arc<crate::relay::RemoteAddrs>>,
}

impl MediaLeg {
    pub fn new(local_ssrc: u32) -> Self {
        Self {
            enabled: false,
            local_rtp_port: 0,
            local_rtcp_port: 0,
            rtp_socket: None,
            rtcp_socket: None,
            remote_rtp_addr: None,
            remote_rtcp_addr: None,
            payload_type: None,
            red_payload_type: None,
            remote_ssrc: None,
            local_ssrc,
            simulcast_base_ssrc: None,
            wants_pli: false,
            audio_level_ext_id: None,
            video_orientation_ext_id: None,
            srtp_required: false,
            srtp: None,
            switching_ctx: Mutex::new(SwitchingContext::new()),
            peer_recorder: None,
            own_recorder: None,
            relay_handle: None,
            remotes: None,
            relay_task: Mutex::new(None),
        }
    }
}

fn random_ssrc() -> u32 {
    use rand::RngCore;
    rand::thread_rng().next_u32()
}

/// One bridged call: a plain-RTP leg this session owns the ports for,
/// matched up against whatever the host's signalled (WebRTC) leg is
/// doing. Concurrency per spec §5: state behind an `RwLock`, each medium
/// behind its own `Mutex` so audio and video can be touched independently.
pub struct Session {
    pub id: u64,
    state: RwLock<SessionState>,
    pub audio: Mutex<Option<MediaLeg>>,
    pub video: Mutex<Option<MediaLeg>>,
    pub local_sdp: Mutex<Option<String>>,
    /// Most recently advertised RED payload type, carried across
    /// renegotiations to disambiguate opus-RED on the next `process` (spec §2).
    pub local_red_pt: Mutex<Option<u8>>,
    pub sdp_version: AtomicU64,
    pub srtp_required: bool,
}

impl Session {
    pub fn new(id: u64, srtp_required: bool) -> Self {
        Self {
            id,
            state: RwLock::new(SessionState::Idle),
            audio: Mutex::new(None),
            video: Mutex::new(None),
            local_sdp: Mutex::new(None),
            local_red_pt: Mutex::new(None),
            sdp_version: AtomicU64::new(1),
            srtp_required,
        }
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    /// Attempt a state transition, rejecting anything not on the
    /// documented lifecycle (spec §4.4).
    pub async fn transition(&self, next: SessionState) -> Result<(), RequestError> {
        let mut guard = self.state.write().await;
        if !guard.can_transition_to(next) {
            return Err(RequestError::WrongState(format!(
                "cannot move from {:?} to {:?}",
                *guard, next
            )));
        }
        debug!(session = self.id, from = ?*guard, to = ?next, "session state transition");
        *guard = next;
        Ok(())
    }

    /// True once a `process`/`generate` against an already-`Ready`
    /// session should implicitly be treated as an update, matching the
    /// original plugin's `if (!generate && session->media.ready) sdp_update = TRUE;`.
    pub async fn implicit_update(&self) -> bool {
        matches!(self.state().await, SessionState::Ready)
    }

    pub fn next_sdp_version(&self) -> u64 {
        self.sdp_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn fresh_ssrc() -> u32 {
        random_ssrc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_can_move_to_negotiating_but_not_ready() {
        assert!(SessionState::Idle.can_transition_to(SessionState::Negotiating));
        assert!(!SessionState::Idle.can_transition_to(SessionState::Ready));
    }

    #[test]
    fn destroyed_is_terminal() {
        assert!(!SessionState::Destroyed.can_transition_to(SessionState::Idle));
        assert!(!SessionState::Destroyed.can_transition_to(SessionState::Ready));
    }

    #[tokio::test]
    async fn transition_rejects_illegal_jump() {
        let session = Session::new(1, false);
        let err = session.transition(SessionState::Ready).await.unwrap_err();
        assert!(matches!(err, RequestError::WrongState(_)));
    }

    #[tokio::test]
    async fn ready_session_implies_update() {
        let session = Session::new(1, false);
        session.transition(SessionState::Negotiating).await.unwrap();
        session.transition(SessionState::Ready).await.unwrap();
        assert!(session.implicit_update().await);
    }
}
