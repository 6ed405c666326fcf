//! RTCP helpers: minimal Picture Loss Indication construction and
//! SSRC fixup across a compound RTCP packet.
//!
//! Full RTCP (SR/RR/SDES/BYE encode-decode) is out of this bridge's
//! scope — it only needs to originate a PLI on behalf of a host that
//! asks for a keyframe, and to rewrite the SSRCs embedded in whatever
//! compound packet the peer sends so they match this leg's view of the
//! session (see spec §4.6).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::RtpError;

const RTCP_VERSION: u8 = 2;
const PT_RR: u8 = 201;
const PT_SDES: u8 = 202;
const PT_BYE: u8 = 203;
const PT_APP: u8 = 204;
const PT_PSFB: u8 = 206;
const FMT_PLI: u8 = 1;

/// Build a minimal RTCP PSFB/PLI packet (RFC 4585 §6.3.1): an 8-byte
/// FCI-less feedback message naming the sender and the media source
/// whose keyframe is being requested.
pub fn build_pli(sender_ssrc: u32, media_ssrc: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(12);
    // length is in 32-bit words minus one, here fixed at 2 (12 bytes total).
    buf.put_u8((RTCP_VERSION << 6) | FMT_PLI);
    buf.put_u8(PT_PSFB);
    buf.put_u16(2);
    buf.put_u32(sender_ssrc);
    buf.put_u32(media_ssrc);
    buf.freeze()
}

/// Walk a compound RTCP packet crossing onto the plain-RTP leg and stamp
/// the sender SSRC (and, for PSFB, the media SSRC that immediately
/// follows it) to `sender_ssrc`/`media_ssrc` on every sub-packet we
/// understand (RR, SDES, BYE, APP, PSFB/PLI), regardless of what value
/// was there before — the host's signalled leg has no reason to agree
/// with this leg's local/peer SSRC values, so there is nothing to match
/// against; the fields are just overwritten outright. Packet types we
/// don't specifically recognize are left untouched.
pub fn fix_ssrc(packet: &[u8], sender_ssrc: u32, media_ssrc: u32) -> Result<Bytes, RtpError> {
    let mut out = BytesMut::with_capacity(packet.len());
    let mut buf = Bytes::copy_from_slice(packet);

    while buf.remaining() >= 4 {
        let b0 = buf.get_u8();
        let pt = buf.get_u8();
        let length_words = buf.get_u16();
        let body_len = length_words as usize * 4;
        if buf.remaining() < body_len {
            return Err(RtpError::BufferTooSmall {
                required: body_len,
                available: buf.remaining(),
            });
        }
        let mut body = buf.copy_to_bytes(body_len);

        out.put_u8(b0);
        out.put_u8(pt);
        out.put_u16(length_words);

        match pt {
            PT_RR | PT_SDES | PT_BYE | PT_APP | PT_PSFB => {
                if body.remaining() >= 4 {
                    body.get_u32();
                    out.put_u32(sender_ssrc);
                }
                if pt == PT_PSFB && body.remaining() >= 4 {
                    body.get_u32();
                    out.put_u32(media_ssrc);
                }
                out.put_slice(&body);
            }
            _ => {
                out.put_slice(&body);
            }
        }
    }

    Ok(out.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pli_has_expected_shape() {
        let pli = build_pli(0x1111_1111, 0x2222_2222);
        assert_eq!(pli.len(), 12);
        assert_eq!(pli[0] & 0x1f, FMT_PLI);
        assert_eq!(pli[1], PT_PSFB);
    }

    #[test]
    fn fix_ssrc_stamps_sender_and_media_for_psfb() {
        let pli = build_pli(0x1111_1111, 0x2222_2222);
        let fixed = fix_ssrc(&pli, 0xAAAA_AAAA, 0xBBBB_BBBB).unwrap();
        let mut b = fixed.clone();
        b.advance(4);
        assert_eq!(b.get_u32(), 0xAAAA_AAAA);
        assert_eq!(b.get_u32(), 0xBBBB_BBBB);
    }

    #[test]
    fn fix_ssrc_preserves_packet_length() {
        let pli = build_pli(0x1111_1111, 0x2222_2222);
        let fixed = fix_ssrc(&pli, 1, 2).unwrap();
        assert_eq!(fixed.len(), pli.len());
    }
}
