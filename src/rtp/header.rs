//! RTP fixed header (RFC 3550 §5.1) parse/serialize, plus the handful of
//! header extensions this bridge understands well enough to rewrite
//! in place: audio-level (RFC 6464) and video-orientation/CVO.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::RtpError;

const FIXED_HEADER_LEN: usize = 12;

/// A parsed RTP fixed header plus any CSRCs and extension block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    pub padding: bool,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc: Vec<u32>,
    /// `(profile, payload)` of the extension block, if `X=1`.
    pub extension: Option<(u16, Bytes)>,
}

impl RtpHeader {
    /// Parse the fixed header (and extension block, if present) from the
    /// front of `buf`, leaving the payload in place.
    pub fn parse(buf: &mut Bytes) -> Result<Self, RtpError> {
        if buf.remaining() < FIXED_HEADER_LEN {
            return Err(RtpError::BufferTooSmall {
                required: FIXED_HEADER_LEN,
                available: buf.remaining(),
            });
        }
        let b0 = buf.get_u8();
        let version = b0 >> 6;
        if version != 2 {
            return Err(RtpError::UnsupportedVersion(version));
        }
        let padding = (b0 & 0x20) != 0;
        let has_extension = (b0 & 0x10) != 0;
        let csrc_count = (b0 & 0x0f) as usize;

        let b1 = buf.get_u8();
        let marker = (b1 & 0x80) != 0;
        let payload_type = b1 & 0x7f;

        let sequence_number = buf.get_u16();
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();

        if buf.remaining() < csrc_count * 4 {
            return Err(RtpError::BufferTooSmall {
                required: csrc_count * 4,
                available: buf.remaining(),
            });
        }
        let mut csrc = Vec::with_capacity(csrc_count);
        for _ in 0..csrc_count {
            csrc.push(buf.get_u32());
        }

        let extension = if has_extension {
            if buf.remaining() < 4 {
                return Err(RtpError::BufferTooSmall {
                    required: 4,
                    available: buf.remaining(),
                });
            }
            let profile = buf.get_u16();
            let len_words = buf.get_u16() as usize;
            let len_bytes = len_words * 4;
            if buf.remaining() < len_bytes {
                return Err(RtpError::BufferTooSmall {
                    required: len_bytes,
                    available: buf.remaining(),
                });
            }
            Some((profile, buf.copy_to_bytes(len_bytes)))
        } else {
            None
        };

        Ok(Self {
            padding,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc,
            extension,
        })
    }

    /// Fixed-header length including CSRCs and the extension block, but
    /// not payload or padding.
    pub fn header_len(&self) -> usize {
        FIXED_HEADER_LEN + self.csrc.len() * 4 + self.extension.as_ref().map_or(0, |(_, ext)| 4 + ext.len())
    }

    /// Serialize the header back into `buf`.
    pub fn write(&self, buf: &mut BytesMut) {
        let mut b0 = 2u8 << 6;
        if self.padding {
            b0 |= 0x20;
        }
        if self.extension.is_some() {
            b0 |= 0x10;
        }
        b0 |= self.csrc.len() as u8 & 0x0f;
        buf.put_u8(b0);

        let mut b1 = if self.marker { 0x80 } else { 0 };
        b1 |= self.payload_type & 0x7f;
        buf.put_u8(b1);

        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        for c in &self.csrc {
            buf.put_u32(*c);
        }
        if let Some((profile, ext)) = &self.extension {
            buf.put_u16(*profile);
            buf.put_u16((ext.len() / 4) as u16);
            buf.put_slice(ext);
        }
    }
}

/// RFC 5285 one-byte header extension profile id.
const ONE_BYTE_PROFILE: u16 = 0xBEDE;

/// Walk a one-byte-format (RFC 5285 §4.2) extension block and find the
/// element registered at local id `id`.
pub fn find_one_byte_extension(profile: u16, payload: &Bytes, id: u8) -> Option<Bytes> {
    if profile != ONE_BYTE_PROFILE {
        return None;
    }
    let mut i = 0;
    while i < payload.len() {
        let b = payload[i];
        if b == 0 {
            i += 1; // padding
            continue;
        }
        let elem_id = b >> 4;
        let len = (b & 0x0f) as usize + 1;
        i += 1;
        if i + len > payload.len() {
            break;
        }
        if elem_id == id {
            return Some(payload.slice(i..i + len));
        }
        i += len;
    }
    None
}

/// Audio-level extension (RFC 6464): `(voice_activity, level_dbov)`.
pub fn parse_audio_level(data: &[u8]) -> Option<(bool, u8)> {
    let b = *data.first()?;
    Some((b & 0x80 != 0, b & 0x7f))
}

/// Coordination-of-video-orientation rotation, decoded from the low 2
/// bits of the CVO byte, expressed as a clockwise rotation in degrees.
pub fn parse_video_orientation(data: &[u8]) -> Option<u16> {
    let b = *data.first()?;
    Some(match b & 0x03 {
        0 => 0,
        1 => 90,
        2 => 180,
        _ => 270,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> RtpHeader {
        RtpHeader {
            padding: false,
            marker: true,
            payload_type: 111,
            sequence_number: 4242,
            timestamp: 0xDEAD_BEEF,
            ssrc: 0x1234_5678,
            csrc: vec![1, 2],
            extension: None,
        }
    }

    #[test]
    fn round_trips_fixed_header() {
        let header = sample_header();
        let mut buf = BytesMut::new();
        header.write(&mut buf);
        let mut bytes = buf.freeze();
        let parsed = RtpHeader::parse(&mut bytes).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn rejects_short_buffer() {
        let mut bytes = Bytes::from_static(&[0x80, 0x00]);
        assert!(matches!(
            RtpHeader::parse(&mut bytes),
            Err(RtpError::BufferTooSmall { .. })
        ));
    }

    #[test]
    fn rejects_wrong_version() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x00); // version 0
        buf.put_u8(0);
        buf.put_u16(0);
        buf.put_u32(0);
        buf.put_u32(0);
        let mut bytes = buf.freeze();
        assert!(matches!(
            RtpHeader::parse(&mut bytes),
            Err(RtpError::UnsupportedVersion(0))
        ));
    }

    #[test]
    fn extracts_one_byte_extension_element() {
        // id=1 len=1(->0) value 0x05, id=2 len=1(->0) value 0xAB
        let payload = Bytes::from_static(&[0x10, 0x05, 0x20, 0xAB]);
        let found = find_one_byte_extension(ONE_BYTE_PROFILE, &payload, 2).unwrap();
        assert_eq!(&found[..], &[0xAB]);
    }

    #[test]
    fn decodes_audio_level() {
        assert_eq!(parse_audio_level(&[0x85]), Some((true, 0x05)));
        assert_eq!(parse_audio_level(&[0x05]), Some((false, 0x05)));
    }

    #[test]
    fn decodes_video_orientation() {
        assert_eq!(parse_video_orientation(&[0x01]), Some(90));
        assert_eq!(parse_video_orientation(&[0x02]), Some(180));
    }
}
