//! Opus-RED payload-type disambiguation
//!
//! A barebone audio `m=` line lists RED's carrier payload type first when
//! RED is in use (`m=audio PORT RTP/AVP 63 111`, with `63` mapping to
//! `red/48000/2` and `111` to the real `opus` payload). The only way to
//! tell that apart from a plain single-codec line is whether the first
//! listed format matches the RED payload type this session previously
//! advertised — there's no `a=rtpmap` guarantee on a barebone offer. See
//! spec §2/§3.

/// Resolve `(payload_type, red_payload_type)` from the listed formats.
///
/// If the first format matches `previous_red_pt`, it's treated as RED's
/// carrier and the *second* listed format is the real payload type.
/// Otherwise the first format is the payload type and there's no RED.
pub fn resolve_payload_type(
    formats: &[String],
    previous_red_pt: Option<u8>,
) -> (Option<u8>, Option<u8>) {
    let parsed: Vec<u8> = formats.iter().filter_map(|f| f.parse().ok()).collect();
    let Some(&first) = parsed.first() else {
        return (None, None);
    };
    if previous_red_pt == Some(first) {
        (parsed.get(1).copied(), Some(first))
    } else {
        (Some(first), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_single_codec_has_no_red() {
        let formats = vec!["111".to_string()];
        assert_eq!(resolve_payload_type(&formats, None), (Some(111), None));
    }

    #[test]
    fn matching_first_pt_is_treated_as_red_carrier() {
        let formats = vec!["63".to_string(), "111".to_string()];
        assert_eq!(resolve_payload_type(&formats, Some(63)), (Some(111), Some(63)));
    }

    #[test]
    fn non_matching_first_pt_is_not_red() {
        let formats = vec!["63".to_string(), "111".to_string()];
        assert_eq!(resolve_payload_type(&formats, Some(99)), (Some(63), None));
    }
}
