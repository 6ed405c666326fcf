//! Relay Worker
//!
//! One task per negotiated medium, multiplexing its RTP and RTCP sockets
//! and moving packets between the plain-RTP leg and the host's signalled
//! leg, applying SRTP, header validation, SSRC learning/substitution and
//! sequence/timestamp continuity along the way (spec §4.5).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use crate::host::{HostApi, Leg};
use crate::rtp::{find_one_byte_extension, parse_audio_level, parse_video_orientation, RtpExtensions, RtpHeader};
use crate::session::{MediaLeg, Session};

/// Consecutive socket-error threshold past which a relay gives up and
/// tears down its session, matching the original plugin's guard against
/// a wedged socket spinning forever.
const MAX_CONSECUTIVE_ERRORS: u32 = 100;

/// ICMP port-unreachable surfaces on Linux as `ECONNREFUSED` (errno 111)
/// on the *next* read from the socket that sent the unreachable datagram.
/// Only observable on a connected socket, which is why the relay
/// connects its sockets to the learned remote address once known.
#[cfg(target_os = "linux")]
const ECONNREFUSED: i32 = 111;
#[cfg(not(target_os = "linux"))]
const ECONNREFUSED: i32 = libc_econnrefused();
#[cfg(not(target_os = "linux"))]
const fn libc_econnrefused() -> i32 {
    61 // BSD/Darwin ECONNREFUSED; only the Linux path is load-bearing in practice.
}

/// Cooperative shutdown/update handle for one relay task. Flipping a flag
/// before calling [`Notify::notify_one`] guarantees the task's next
/// `select!` wakes and observes it rather than racing the recv futures
/// (release-before-notify, the same ordering for both `closing` and
/// `updated`).
pub struct RelayHandle {
    closing: AtomicBool,
    updated: AtomicBool,
    notify: Notify,
}

impl RelayHandle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            closing: AtomicBool::new(false),
            updated: AtomicBool::new(false),
            notify: Notify::new(),
        })
    }

    pub fn request_close(&self) {
        self.closing.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    /// Signal that the remote transport (`RemoteAddrs`) changed underneath
    /// the running task, e.g. on a mid-session renegotiation (spec §4.4/§5/§8).
    pub fn notify_update(&self) {
        self.updated.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    fn take_updated(&self) -> bool {
        self.updated.swap(false, Ordering::AcqRel)
    }
}

/// Per-socket remote address, updated as renegotiation learns a new peer
/// transport without tearing down the relay task.
pub struct RemoteAddrs {
    pub rtp: Mutex<Option<SocketAddr>>,
    pub rtcp: Mutex<Option<SocketAddr>>,
}

impl RemoteAddrs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rtp: Mutex::new(None),
            rtcp: Mutex::new(None),
        })
    }
}

/// Spawn the relay task for one medium. `rtp_socket`/`rtcp_socket` should
/// already be `.connect()`-ed to the current remote address if one is
/// known; the task reconnects them itself whenever `handle.notify_update()`
/// reports a change.
#[allow(clippy::too_many_arguments)]
pub fn spawn(
    session: Arc<Session>,
    video: bool,
    rtp_socket: Arc<UdpSocket>,
    rtcp_socket: Arc<UdpSocket>,
    remotes: Arc<RemoteAddrs>,
    handle: Arc<RelayHandle>,
    host: Arc<dyn HostApi>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run(session, video, rtp_socket, rtcp_socket, remotes, handle, host).await;
    })
}

async fn run(
    session: Arc<Session>,
    video: bool,
    rtp_socket: Arc<UdpSocket>,
    rtcp_socket: Arc<UdpSocket>,
    remotes: Arc<RemoteAddrs>,
    handle: Arc<RelayHandle>,
    host: Arc<dyn HostApi>,
) {
    let mut rtp_buf = vec![0u8; 1500];
    let mut rtcp_buf = vec![0u8; 1500];
    let consecutive_errors = AtomicU32::new(0);
    let mut rtcp_closed = false;

    debug!(session = session.id, video, "relay worker started");

    loop {
        if handle.is_closing() {
            break;
        }

        tokio::select! {
            biased;

            _ = handle.notify.notified() => {
                if handle.is_closing() {
                    break;
                }
                if handle.take_updated() {
                    reconnect(&rtp_socket, &rtcp_socket, &remotes).await;
                    rtcp_closed = false;
                }
            }

            res = rtp_socket.recv(&mut rtp_buf) => {
                match res {
                    Ok(len) => {
                        consecutive_errors.store(0, Ordering::Relaxed);
                        handle_rtp(&session, video, &host, &rtp_buf[..len]).await;
                    }
                    Err(e) => {
                        if on_socket_error(&e, &consecutive_errors, false, &mut rtcp_closed) {
                            break;
                        }
                    }
                }
            }

            res = rtcp_socket.recv(&mut rtcp_buf), if !rtcp_closed => {
                match res {
                    Ok(len) => {
                        consecutive_errors.store(0, Ordering::Relaxed);
                        handle_rtcp(&session, video, &host, &rtcp_buf[..len]).await;
                    }
                    Err(e) => {
                        if on_socket_error(&e, &consecutive_errors, true, &mut rtcp_closed) {
                            break;
                        }
                    }
                }
            }
        }
    }

    debug!(session = session.id, video, "relay worker stopped");
}

/// Re-resolve this leg's sockets against the latest `RemoteAddrs`,
/// connecting (or reconnecting) them so outbound `send`/`recv` target the
/// renegotiated peer (spec §4.4/§5 scenario 4).
async fn reconnect(rtp_socket: &UdpSocket, rtcp_socket: &UdpSocket, remotes: &RemoteAddrs) {
    if let Some(addr) = *remotes.rtp.lock().await {
        if let Err(e) = rtp_socket.connect(addr).await {
            warn!(error = %e, %addr, "failed to reconnect rtp socket");
        }
    }
    if let Some(addr) = *remotes.rtcp.lock().await {
        if let Err(e) = rtcp_socket.connect(addr).await {
            warn!(error = %e, %addr, "failed to reconnect rtcp socket");
        }
    }
}

/// Returns `true` if the loop should terminate entirely. A `RTCP`-only
/// `ECONNREFUSED` instead closes just the RTCP side and keeps relaying
/// RTP, mirroring the original plugin's narrower reaction to the
/// peer having closed only its RTCP socket.
fn on_socket_error(
    err: &std::io::Error,
    consecutive_errors: &AtomicU32,
    is_rtcp: bool,
    rtcp_closed: &mut bool,
) -> bool {
    if is_rtcp && err.raw_os_error() == Some(ECONNREFUSED) {
        warn!("RTCP socket refused, disabling RTCP relay for this leg");
        *rtcp_closed = true;
        return false;
    }
    let count = consecutive_errors.fetch_add(1, Ordering::Relaxed) + 1;
    warn!(error = %err, count, "relay socket error");
    count >= MAX_CONSECUTIVE_ERRORS
}

async fn handle_rtp(session: &Arc<Session>, video: bool, host: &Arc<dyn HostApi>, data: &[u8]) {
    let leg_mutex = if video { &session.video } else { &session.audio };
    let mut guard = leg_mutex.lock().await;
    let Some(leg) = guard.as_mut() else {
        return;
    };

    let plain = match decrypt_if_needed(leg, data, false).await {
        Some(p) => p,
        None => return,
    };

    let mut payload = plain.clone();
    let mut header = match RtpHeader::parse(&mut payload) {
        Ok(h) => h,
        Err(e) => {
            warn!(error = %e, "dropping rtp packet with invalid header");
            return;
        }
    };

    if let Some(base) = leg.simulcast_base_ssrc {
        if header.ssrc != base {
            return;
        }
    }

    let peer_ssrc = *leg.remote_ssrc.get_or_insert(header.ssrc);

    let mut extensions = RtpExtensions::default();
    if let Some((profile, ext_payload)) = &header.extension {
        if let Some(id) = leg.audio_level_ext_id {
            if let Some(elem) = find_one_byte_extension(*profile, ext_payload, id) {
                extensions.audio_level = parse_audio_level(&elem);
            }
        }
        if let Some(id) = leg.video_orientation_ext_id {
            if let Some(elem) = find_one_byte_extension(*profile, ext_payload, id) {
                extensions.video_orientation = parse_video_orientation(&elem);
            }
        }
    }

    let (out_seq, out_ts) = leg
        .switching_ctx
        .get_mut()
        .update(header.ssrc, header.sequence_number, header.timestamp);
    header.sequence_number = out_seq;
    header.timestamp = out_ts;
    header.ssrc = peer_ssrc;

    let mut out = BytesMut::with_capacity(header.header_len() + payload.len());
    header.write(&mut out);
    out.put_slice(&payload);
    let packet = out.freeze();

    if let Some(recorder) = &leg.peer_recorder {
        recorder.record_rtp(&packet);
    }

    host.relay_rtp(session.id, Leg::Plain, video, &packet, extensions).await;
}

async fn handle_rtcp(session: &Arc<Session>, video: bool, host: &Arc<dyn HostApi>, data: &[u8]) {
    let leg_mutex = if video { &session.video } else { &session.audio };
    let mut guard = leg_mutex.lock().await;
    let Some(leg) = guard.as_mut() else {
        return;
    };

    let plain = match decrypt_if_needed(leg, data, true).await {
        Some(p) => p,
        None => return,
    };

    if let Some(recorder) = &leg.peer_recorder {
        recorder.record_rtcp(&plain);
    }

    host.relay_rtcp(session.id, Leg::Plain, &plain).await;
}

async fn decrypt_if_needed(leg: &mut MediaLeg, data: &[u8], is_rtcp: bool) -> Option<bytes::Bytes> {
    match &leg.srtp {
        Some(ctx_mutex) => {
            let mut ctx = ctx_mutex.lock().await;
            let result = if is_rtcp {
                ctx.unprotect_rtcp(data)
            } else {
                ctx.unprotect_rtp(data)
            };
            match result {
                Ok(plain) => Some(plain),
                Err(e) => {
                    warn!(error = %e, is_rtcp, "srtp unprotect failed, dropping packet");
                    None
                }
            }
        }
        None => Some(bytes::Bytes::copy_from_slice(data)),
    }
}

/// Send a PLI on this leg's (already-connected) RTCP socket, used when
/// the host asks for a keyframe and the peer negotiated PLI (spec §4.5/§4.8).
pub async fn send_pli(rtcp_socket: &UdpSocket, sender_ssrc: u32, media_ssrc: u32) {
    let packet = crate::rtcp::build_pli(sender_ssrc, media_ssrc);
    if let Err(e) = rtcp_socket.send(&packet).await {
        warn!(error = %e, "failed to send PLI");
    }
}
