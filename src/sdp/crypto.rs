//! `a=crypto` attribute parsing/serialization (RFC 4568).

use crate::error::SdpError;
use crate::srtp::CryptoSuite;

/// One parsed `a=crypto:<tag> <suite> inline:<key>[|lifetime][|mki:len]` line.
#[derive(Debug, Clone)]
pub struct CryptoAttribute {
    pub tag: u32,
    pub suite: CryptoSuite,
    pub key_params: String,
}

impl CryptoAttribute {
    /// Parse the attribute value (everything after `a=crypto:`).
    pub fn parse(value: &str) -> Result<Self, SdpError> {
        let mut parts = value.split_whitespace();
        let tag: u32 = parts
            .next()
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| SdpError::MissingField("crypto tag".to_string()))?;
        let suite_name = parts
            .next()
            .ok_or_else(|| SdpError::MissingField("crypto suite".to_string()))?;
        let suite = CryptoSuite::from_sdp_name(suite_name)
            .map_err(|e| SdpError::MissingField(e.to_string()))?;
        let key_params = parts
            .next()
            .ok_or_else(|| SdpError::MissingField("crypto key-params".to_string()))?
            .to_string();
        Ok(Self {
            tag,
            suite,
            key_params,
        })
    }

    /// The base64 `inline:` key material, without the `inline:` prefix or
    /// any trailing `|lifetime`/`|mki` modifiers.
    pub fn inline_key(&self) -> Option<&str> {
        let rest = self.key_params.strip_prefix("inline:")?;
        Some(rest.split('|').next().unwrap_or(rest))
    }

    /// Render back out as the value portion of an `a=crypto` line.
    pub fn to_sdp_value(&self) -> String {
        format!("{} {} {}", self.tag, self.suite.sdp_name(), self.key_params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_inline_key() {
        let attr =
            CryptoAttribute::parse("1 AES_CM_128_HMAC_SHA1_80 inline:WVNfX19zZW1jdGwgKGkpIHRoZSBw")
                .unwrap();
        assert_eq!(attr.tag, 1);
        assert_eq!(attr.suite, CryptoSuite::AesCm128HmacSha1_80);
        assert_eq!(
            attr.inline_key(),
            Some("WVNfX19zZW1jdGwgKGkpIHRoZSBw")
        );
    }

    #[test]
    fn strips_lifetime_and_mki_suffix() {
        let attr = CryptoAttribute::parse("1 AES_CM_128_HMAC_SHA1_80 inline:AAAA|2^20|1:4").unwrap();
        assert_eq!(attr.inline_key(), Some("AAAA"));
    }

    #[test]
    fn rejects_unknown_suite() {
        assert!(CryptoAttribute::parse("1 ROT13 inline:AAAA").is_err());
    }

    #[test]
    fn round_trips_to_sdp_value() {
        let attr = CryptoAttribute::parse("4 AEAD_AES_128_GCM inline:AAAA").unwrap();
        assert_eq!(attr.to_sdp_value(), "4 AEAD_AES_128_GCM inline:AAAA");
    }
}
