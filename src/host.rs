//! Host Upcalls
//!
//! The capability surface this bridge is driven through and drives back
//! out through. The plugin never talks to a specific host directly —
//! every inbound request arrives and every outbound notification leaves
//! through a `HostApi` the embedder implements (spec §4.7/§6).

use async_trait::async_trait;
use serde_json::Value;

use crate::rtp::RtpExtensions;

/// Direction a relayed RTP/RTCP packet is headed, from the bridge's point
/// of view: `Plain` is the plain-RTP leg (what this session allocated
/// ports for), `Signalled` is the WebRTC leg the host otherwise manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    Plain,
    Signalled,
}

/// Everything the bridge needs to call back out to its embedding host.
///
/// Implementors are expected to be cheap to clone (an `Arc`-wrapped
/// handle is typical) since the dispatcher and every relay worker hold
/// their own copy.
#[async_trait]
pub trait HostApi: Send + Sync {
    /// Push a request/response event back toward whatever originated the
    /// request (spec §6 event schema).
    async fn push_event(&self, session_id: u64, event: Value);

    /// Hand a decrypted, header-substituted RTP packet to the host for
    /// delivery on `leg`, along with whatever header extensions were
    /// decoded for it (spec §4.5 point 3).
    async fn relay_rtp(
        &self,
        session_id: u64,
        leg: Leg,
        video: bool,
        packet: &[u8],
        extensions: RtpExtensions,
    );

    /// Hand a decrypted RTCP packet to the host for delivery on `leg`.
    async fn relay_rtcp(&self, session_id: u64, leg: Leg, packet: &[u8]);

    /// Ask the host to request a keyframe from whichever endpoint can
    /// produce one (used when the plain-RTP side signals packet loss on
    /// video via PLI/NACK, and the WebRTC leg needs to be told).
    async fn send_pli(&self, session_id: u64);

    /// Tear down the host's side of the signalled (WebRTC) peer
    /// connection, e.g. because the plain leg hung up.
    async fn close_peer_connection(&self, session_id: u64);

    /// Fire a plugin event-handler notification, if the host's event
    /// handlers are active. Gated by [`Self::events_is_enabled`] at the
    /// call site (spec §2: only fires on the first generate/process of a
    /// given SDP type, never on updates).
    async fn notify_event(&self, session_id: u64, payload: Value);

    /// Whether the host currently has event-handler notifications
    /// enabled at all; callers should skip building `payload` entirely
    /// when this is false.
    fn events_is_enabled(&self) -> bool;
}
