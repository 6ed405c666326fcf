//! SDP Transformer
//!
//! Two operations over a barebone (audio/video only, no ICE/DTLS) SDP:
//! [`process`] reads a peer's offer/answer into a [`RemoteMedia`] summary,
//! and [`manipulate`] rewrites a local description to reflect this
//! session's allocated transport and crypto. Parsing/serialization is
//! delegated to the `sdp` crate; this module only walks the resulting
//! tree (spec §4.3).

mod crypto;
mod opus_red;

pub use crypto::CryptoAttribute;

use std::io::Cursor;
use std::net::IpAddr;

use ::sdp::description::common::{Address, ConnectionInformation};
use ::sdp::description::media::{MediaDescription, RangedPort};
use ::sdp::description::session::SessionDescription;
use ::sdp::util::Attribute;

use crate::error::SdpError;

/// One negotiated media line, audio or video.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    fn as_str(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

/// What [`process`] extracts from one `m=` section of the peer's SDP.
#[derive(Debug, Clone)]
pub struct RemoteMedia {
    pub kind: MediaKind,
    /// Whether the `m=` port was non-zero (peer didn't reject/disable this medium).
    pub enabled: bool,
    pub remote_ip: Option<IpAddr>,
    pub remote_rtp_port: u16,
    /// Negotiated audio/video payload type, after opus-RED unwrapping.
    pub payload_type: Option<u8>,
    /// The RED carrier payload type, if the first listed format was RED.
    pub red_payload_type: Option<u8>,
    pub crypto: Vec<CryptoAttribute>,
    /// True if any `a=rtcp-fb:* pli` (or `nack pli`) line was seen.
    pub wants_pli: bool,
    /// RFC 5285 one-byte extension id negotiated for audio-level, if any.
    pub audio_level_ext_id: Option<u8>,
    /// RFC 5285 one-byte extension id negotiated for video-orientation, if any.
    pub video_orientation_ext_id: Option<u8>,
}

/// Everything [`process`] pulled out of one remote description.
#[derive(Debug, Clone, Default)]
pub struct RemoteSession {
    pub audio: Option<RemoteMedia>,
    pub video: Option<RemoteMedia>,
}

fn parse(sdp_text: &str) -> Result<SessionDescription, SdpError> {
    let mut reader = Cursor::new(sdp_text.as_bytes());
    SessionDescription::unmarshal(&mut reader).map_err(|e| SdpError::ParseFailed(e.to_string()))
}

fn media_kind(media: &MediaDescription) -> Option<MediaKind> {
    match media.media_name.media.as_str() {
        "audio" => Some(MediaKind::Audio),
        "video" => Some(MediaKind::Video),
        _ => None,
    }
}

fn connection_ip(
    session: &SessionDescription,
    media: &MediaDescription,
) -> Option<IpAddr> {
    let conn = media
        .connection_information
        .as_ref()
        .or(session.connection_information.as_ref())?;
    conn.address.as_ref()?.address.parse().ok()
}

fn attr_values<'a>(attrs: &'a [Attribute], key: &str) -> impl Iterator<Item = &'a str> {
    attrs
        .iter()
        .filter(move |a| a.key == key)
        .filter_map(|a| a.value.as_deref())
}

fn wants_pli(media: &MediaDescription) -> bool {
    media.attributes.iter().any(|a| {
        a.key == "rtcp-fb"
            && a.value
                .as_deref()
                .is_some_and(|v| v.contains("pli") || v.contains("nack pli"))
    })
}

/// Read the RFC 5285 one-byte extension ids this bridge cares about out
/// of a media section's `a=extmap:<id> <uri>` lines.
fn extmap_ids(media: &MediaDescription) -> (Option<u8>, Option<u8>) {
    let mut audio_level = None;
    let mut video_orientation = None;
    for value in attr_values(&media.attributes, "extmap") {
        let mut parts = value.split_whitespace();
        let Some(id_token) = parts.next() else {
            continue;
        };
        let id_token = id_token.split('/').next().unwrap_or(id_token);
        let Ok(id) = id_token.parse::<u8>() else {
            continue;
        };
        let Some(uri) = parts.next() else { continue };
        match uri {
            "urn:ietf:params:rtp-hdrext:ssrc-audio-level" => audio_level = Some(id),
            "urn:3gpp:video-orientation" => video_orientation = Some(id),
            _ => {}
        }
    }
    (audio_level, video_orientation)
}

fn extract_media(
    session: &SessionDescription,
    media: &MediaDescription,
    kind: MediaKind,
    previous_red_pt: Option<u8>,
) -> RemoteMedia {
    let enabled = !matches!(media.media_name.port.value, 0);
    let remote_ip = connection_ip(session, media);
    let remote_rtp_port = media.media_name.port.value as u16;

    let (payload_type, red_payload_type) =
        opus_red::resolve_payload_type(&media.media_name.formats, previous_red_pt);

    let crypto = media
        .attributes
        .iter()
        .filter(|a| a.key == "crypto")
        .filter_map(|a| a.value.as_deref())
        .filter_map(|v| CryptoAttribute::parse(v).ok())
        .collect();

    let (audio_level_ext_id, video_orientation_ext_id) = extmap_ids(media);

    RemoteMedia {
        kind,
        enabled,
        remote_ip,
        remote_rtp_port,
        payload_type,
        red_payload_type,
        crypto,
        wants_pli: wants_pli(media),
        audio_level_ext_id,
        video_orientation_ext_id,
    }
}

/// Parse a peer's SDP and extract the audio/video transport and crypto
/// summaries the session needs to act on.
///
/// `previous_red_pt` carries the audio RED payload type this session
/// last advertised, needed to disambiguate opus-RED framing (spec §2).
pub fn process(
    sdp_text: &str,
    previous_red_pt: Option<u8>,
) -> Result<RemoteSession, SdpError> {
    let session = parse(sdp_text)?;
    let mut out = RemoteSession::default();
    for media in &session.media_descriptions {
        let Some(kind) = media_kind(media) else {
            continue;
        };
        let red_pt = if kind == MediaKind::Audio { previous_red_pt } else { None };
        let extracted = extract_media(&session, media, kind, red_pt);
        match kind {
            MediaKind::Audio => out.audio = Some(extracted),
            MediaKind::Video => out.video = Some(extracted),
        }
    }
    if out.audio.is_none() && out.video.is_none() {
        return Err(SdpError::MissingField("m=audio/m=video".to_string()));
    }
    Ok(out)
}

/// Whether a description carries an `m=application` line, i.e. offers a
/// data channel. Used to reject a host-supplied local description the
/// same way an inbound peer offer is rejected, by inspecting the actual
/// attached description rather than trusting a caller-supplied flag.
pub fn contains_data_channel(sdp_text: &str) -> bool {
    match parse(sdp_text) {
        Ok(session) => session
            .media_descriptions
            .iter()
            .any(|m| m.media_name.media == "application"),
        Err(_) => false,
    }
}

/// The first format listed for `kind`'s `m=` line, if present and
/// numeric — used to read the payload type a host actually offered so a
/// generated local description can preserve it instead of overwriting
/// it with a hardcoded default.
pub fn first_payload_type(sdp_text: &str, kind: MediaKind) -> Option<u8> {
    let session = parse(sdp_text).ok()?;
    let media = session
        .media_descriptions
        .iter()
        .find(|m| media_kind(m) == Some(kind))?;
    media.media_name.formats.first()?.parse().ok()
}

/// One local media leg to advertise, as computed by the session/port
/// allocator (the inputs to [`manipulate`]).
pub struct LocalMedia {
    pub kind: MediaKind,
    pub enabled: bool,
    pub rtp_port: u16,
    pub payload_type: u8,
    /// `(carrier_pt, payload_type)` if opus-RED is in use for this leg.
    pub red: Option<(u8, u8)>,
    pub crypto: Option<CryptoAttribute>,
    pub send_pli_capable: bool,
}

/// Build (or rewrite) a local SDP offer/answer advertising the given
/// local transport/crypto.
///
/// Without a `template`, a brand-new barebone session is synthesized
/// from `legs` alone. With one, the template's own media sections are
/// kept as the starting point — preserving whatever payload types and
/// attributes it already carries — and only the fields this bridge
/// actually owns (port, connection info, crypto, PLI feedback) are
/// rewritten in place. This matters when `template` is a host-produced
/// local description: its codec/payload-type choices must round-trip
/// unchanged (spec §4.8), not be clobbered by a hardcoded rebuild.
pub fn manipulate(
    template: Option<&str>,
    advertise_ip: IpAddr,
    session_id: u64,
    session_version: u64,
    legs: &[LocalMedia],
) -> Result<String, SdpError> {
    match template {
        Some(text) => manipulate_from_template(text, advertise_ip, legs),
        None => {
            let mut session = blank_session(advertise_ip, session_id, session_version);
            for leg in legs {
                session.media_descriptions.push(build_media(leg, advertise_ip));
            }
            Ok(session.marshal())
        }
    }
}

fn manipulate_from_template(
    text: &str,
    advertise_ip: IpAddr,
    legs: &[LocalMedia],
) -> Result<String, SdpError> {
    let mut session = parse(text)?;
    session.origin.unicast_address = advertise_ip.to_string();
    session.connection_information = Some(connection_info(advertise_ip));

    for media in &mut session.media_descriptions {
        let Some(kind) = media_kind(media) else {
            continue;
        };
        let Some(leg) = legs.iter().find(|l| l.kind == kind) else {
            continue;
        };

        media.media_name.port = RangedPort {
            value: if leg.enabled { leg.rtp_port as isize } else { 0 },
            range: None,
        };
        media.connection_information = Some(connection_info(advertise_ip));

        // Drop whatever crypto/feedback this bridge previously added on an
        // earlier generate, then re-add fresh values for this round —
        // everything else the template carries (rtpmap, fmtp, direction,
        // the format list itself) is left exactly as the host supplied it.
        media
            .attributes
            .retain(|a| a.key != "crypto" && a.key != "rtcp-fb");
        if let Some(crypto) = &leg.crypto {
            media.attributes.push(Attribute {
                key: "crypto".to_string(),
                value: Some(crypto.to_sdp_value()),
            });
        }
        if leg.send_pli_capable {
            media.attributes.push(Attribute {
                key: "rtcp-fb".to_string(),
                value: Some(format!("{} nack pli", leg.payload_type)),
            });
        }
    }

    Ok(session.marshal())
}

fn connection_info(advertise_ip: IpAddr) -> ConnectionInformation {
    ConnectionInformation {
        network_type: "IN".to_string(),
        address_type: addr_type(advertise_ip).to_string(),
        address: Some(Address {
            address: advertise_ip.to_string(),
            ttl: None,
            range: None,
        }),
    }
}

fn addr_type(ip: IpAddr) -> &'static str {
    match ip {
        IpAddr::V4(_) => "IP4",
        IpAddr::V6(_) => "IP6",
    }
}

fn blank_session(advertise_ip: IpAddr, session_id: u64, session_version: u64) -> SessionDescription {
    use ::sdp::description::session::{Origin, SessionName};

    SessionDescription {
        version: ::sdp::description::common::Version::default(),
        origin: Origin {
            username: "-".to_string(),
            session_id,
            session_version,
            network_type: "IN".to_string(),
            address_type: addr_type(advertise_ip).to_string(),
            unicast_address: advertise_ip.to_string(),
        },
        session_name: SessionName("nosip-bridge".to_string()),
        session_information: None,
        uri: None,
        email_address: None,
        phone_number: None,
        connection_information: Some(connection_info(advertise_ip)),
        bandwidth: vec![],
        time_descriptions: vec![Default::default()],
        time_zones: vec![],
        encryption_key: None,
        attributes: vec![],
        media_descriptions: vec![],
    }
}

fn build_media(leg: &LocalMedia, advertise_ip: IpAddr) -> MediaDescription {
    let mut formats = Vec::new();
    if let Some((carrier_pt, _)) = leg.red {
        formats.push(carrier_pt.to_string());
    }
    formats.push(leg.payload_type.to_string());

    let mut attributes = vec![Attribute {
        key: "rtpmap".to_string(),
        value: Some(format!("{} opus/48000/2", leg.payload_type)),
    }];
    if let Some((carrier_pt, _)) = leg.red {
        attributes.push(Attribute {
            key: "rtpmap".to_string(),
            value: Some(format!("{carrier_pt} red/48000/2")),
        });
    }
    if let Some(crypto) = &leg.crypto {
        attributes.push(Attribute {
            key: "crypto".to_string(),
            value: Some(crypto.to_sdp_value()),
        });
    }
    if leg.send_pli_capable {
        attributes.push(Attribute {
            key: "rtcp-fb".to_string(),
            value: Some(format!("{} nack pli", leg.payload_type)),
        });
    }
    attributes.push(Attribute {
        key: "sendrecv".to_string(),
        value: None,
    });

    MediaDescription {
        media_name: ::sdp::description::media::MediaName {
            media: leg.kind.as_str().to_string(),
            port: RangedPort {
                value: if leg.enabled { leg.rtp_port as isize } else { 0 },
                range: None,
            },
            protos: vec!["RTP".to_string(), "AVP".to_string()],
            formats,
        },
        media_title: None,
        connection_information: Some(connection_info(advertise_ip)),
        bandwidth: vec![],
        encryption_key: None,
        attributes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BAREBONE_OFFER: &str = "v=0\r\n\
o=- 123 1 IN IP4 203.0.113.9\r\n\
s=nosip\r\n\
c=IN IP4 203.0.113.9\r\n\
t=0 0\r\n\
m=audio 20000 RTP/AVP 111\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=sendrecv\r\n";

    #[test]
    fn process_extracts_audio_leg() {
        let remote = process(BAREBONE_OFFER, None).unwrap();
        let audio = remote.audio.expect("audio leg");
        assert!(audio.enabled);
        assert_eq!(audio.remote_rtp_port, 20000);
        assert_eq!(audio.remote_ip, Some("203.0.113.9".parse().unwrap()));
        assert_eq!(audio.payload_type, Some(111));
    }

    #[test]
    fn process_rejects_sdp_with_no_audio_or_video() {
        let text = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\nm=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n";
        assert!(process(text, None).is_err());
    }

    #[test]
    fn manipulate_produces_parseable_sdp() {
        let legs = vec![LocalMedia {
            kind: MediaKind::Audio,
            enabled: true,
            rtp_port: 20202,
            payload_type: 111,
            red: None,
            crypto: None,
            send_pli_capable: false,
        }];
        let text = manipulate(None, "198.51.100.2".parse().unwrap(), 1, 1, &legs).unwrap();
        let parsed = parse(&text).unwrap();
        assert_eq!(parsed.media_descriptions.len(), 1);
        assert_eq!(parsed.media_descriptions[0].media_name.port.value, 20202);
    }

    #[test]
    fn manipulate_preserves_host_supplied_payload_types() {
        let host_offer = "v=0\r\n\
o=- 5 1 IN IP4 192.0.2.1\r\n\
s=-\r\n\
c=IN IP4 192.0.2.1\r\n\
t=0 0\r\n\
m=audio 9 RTP/AVP 0 8\r\n\
a=rtpmap:0 PCMU/8000\r\n\
a=rtpmap:8 PCMA/8000\r\n\
m=video 9 RTP/AVP 96\r\n\
a=rtpmap:96 VP8/90000\r\n";
        let legs = vec![
            LocalMedia {
                kind: MediaKind::Audio,
                enabled: true,
                rtp_port: 10000,
                payload_type: 0,
                red: None,
                crypto: None,
                send_pli_capable: false,
            },
            LocalMedia {
                kind: MediaKind::Video,
                enabled: true,
                rtp_port: 10002,
                payload_type: 96,
                red: None,
                crypto: None,
                send_pli_capable: true,
            },
        ];
        let text = manipulate(Some(host_offer), "198.51.100.2".parse().unwrap(), 1, 1, &legs).unwrap();
        let parsed = parse(&text).unwrap();
        assert_eq!(parsed.media_descriptions[0].media_name.formats, vec!["0", "8"]);
        assert_eq!(parsed.media_descriptions[0].media_name.port.value, 10000);
        assert_eq!(parsed.media_descriptions[1].media_name.formats, vec!["96"]);
        assert_eq!(parsed.media_descriptions[1].media_name.port.value, 10002);
        assert!(parsed.media_descriptions[1]
            .attributes
            .iter()
            .any(|a| a.key == "rtcp-fb"));
    }

    #[test]
    fn detects_data_channel_media() {
        let text = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\nm=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n";
        assert!(contains_data_channel(text));
        assert!(!contains_data_channel(BAREBONE_OFFER));
    }

    #[test]
    fn reads_first_payload_type_for_kind() {
        assert_eq!(first_payload_type(BAREBONE_OFFER, MediaKind::Audio), Some(111));
        assert_eq!(first_payload_type(BAREBONE_OFFER, MediaKind::Video), None);
    }
}
