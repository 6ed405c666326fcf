//! SDES-SRTP context manager
//!
//! Owns the crypto-suite table, key lifecycle and base64 plumbing for the
//! four SDES profiles this bridge negotiates. The actual protect/unprotect
//! primitives are delegated to the `srtp` crate's [`srtp::context::Context`]
//! (see spec §4.2 — crypto primitives are an external collaborator).

use base64::{engine::general_purpose::STANDARD, Engine};
use srtp::context::Context as SrtpCryptoContext;
use srtp::protection_profile::ProtectionProfile;
use tracing::debug;

use crate::error::SrtpError;

/// The four SDES-SRTP crypto suites this bridge understands, matching the
/// `a=crypto` suite names from spec §3/§4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoSuite {
    /// `AES_CM_128_HMAC_SHA1_32`
    AesCm128HmacSha1_32,
    /// `AES_CM_128_HMAC_SHA1_80`
    AesCm128HmacSha1_80,
    /// `AEAD_AES_128_GCM`
    AeadAes128Gcm,
    /// `AEAD_AES_256_GCM`
    AeadAes256Gcm,
}

impl CryptoSuite {
    /// Parse the suite name as it appears in an `a=crypto` line.
    pub fn from_sdp_name(name: &str) -> Result<Self, SrtpError> {
        match name {
            "AES_CM_128_HMAC_SHA1_32" => Ok(Self::AesCm128HmacSha1_32),
            "AES_CM_128_HMAC_SHA1_80" => Ok(Self::AesCm128HmacSha1_80),
            "AEAD_AES_128_GCM" => Ok(Self::AeadAes128Gcm),
            "AEAD_AES_256_GCM" => Ok(Self::AeadAes256Gcm),
            other => Err(SrtpError::UnsupportedProfile(other.to_string())),
        }
    }

    /// The name as written back out on an `a=crypto` line.
    pub fn sdp_name(self) -> &'static str {
        match self {
            Self::AesCm128HmacSha1_32 => "AES_CM_128_HMAC_SHA1_32",
            Self::AesCm128HmacSha1_80 => "AES_CM_128_HMAC_SHA1_80",
            Self::AeadAes128Gcm => "AEAD_AES_128_GCM",
            Self::AeadAes256Gcm => "AEAD_AES_256_GCM",
        }
    }

    /// Master key length in bytes (excludes the salt).
    pub fn key_len(self) -> usize {
        match self {
            Self::AesCm128HmacSha1_32 | Self::AesCm128HmacSha1_80 | Self::AeadAes128Gcm => 16,
            Self::AeadAes256Gcm => 32,
        }
    }

    /// Master salt length in bytes.
    pub fn salt_len(self) -> usize {
        match self {
            Self::AesCm128HmacSha1_32 | Self::AesCm128HmacSha1_80 => 14,
            Self::AeadAes128Gcm | Self::AeadAes256Gcm => 12,
        }
    }

    /// Combined `key||salt` length, i.e. the decoded length of the base64
    /// blob on the `a=crypto` line.
    pub fn master_len(self) -> usize {
        self.key_len() + self.salt_len()
    }

    fn protection_profile(self) -> ProtectionProfile {
        match self {
            Self::AesCm128HmacSha1_32 => ProtectionProfile::Aes128CmHmacSha1_32,
            Self::AesCm128HmacSha1_80 => ProtectionProfile::Aes128CmHmacSha1_80,
            Self::AeadAes128Gcm => ProtectionProfile::AeadAes128Gcm,
            Self::AeadAes256Gcm => ProtectionProfile::AeadAes256Gcm,
        }
    }
}

/// Decoded `key||salt` master material, zeroed on drop.
///
/// Never implements `Debug`/`Display` over its bytes — only lengths and
/// the owning suite are safe to log.
pub struct MasterKey {
    suite: CryptoSuite,
    bytes: Vec<u8>,
}

impl MasterKey {
    /// Decode a base64 `a=crypto` key-params blob for the given suite.
    pub fn from_base64(suite: CryptoSuite, b64: &str) -> Result<Self, SrtpError> {
        let bytes = STANDARD
            .decode(b64.trim())
            .map_err(|_| SrtpError::InvalidKeyEncoding)?;
        if bytes.len() < suite.master_len() {
            return Err(SrtpError::ShortKey {
                got: bytes.len(),
                need: suite.master_len(),
            });
        }
        Ok(Self { suite, bytes })
    }

    /// Generate fresh random master key material for `suite`.
    pub fn generate(suite: CryptoSuite) -> Self {
        use rand::RngCore;
        let mut bytes = vec![0u8; suite.master_len()];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { suite, bytes }
    }

    /// Base64-encode for placement on an outgoing `a=crypto` line.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    fn key(&self) -> &[u8] {
        &self.bytes[..self.suite.key_len()]
    }

    fn salt(&self) -> &[u8] {
        &self.bytes[self.suite.key_len()..self.suite.master_len()]
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        for b in &mut self.bytes {
            *b = 0;
        }
    }
}

/// A negotiated local/remote crypto pair for one media stream, ready to
/// protect outgoing and unprotect incoming RTP/RTCP.
pub struct SrtpContext {
    suite: CryptoSuite,
    tag: u32,
    local: SrtpCryptoContext,
    remote: SrtpCryptoContext,
}

impl SrtpContext {
    /// Build a context from the locally generated key and the key the
    /// remote peer advertised. `tag` is the `a=crypto` tag this pairing
    /// negotiated on, carried so callers can echo it back.
    pub fn new(
        suite: CryptoSuite,
        tag: u32,
        local_key: &MasterKey,
        remote_key: &MasterKey,
    ) -> Result<Self, SrtpError> {
        let profile = suite.protection_profile();
        let local = SrtpCryptoContext::new(local_key.key(), local_key.salt(), profile, None, None)
            .map_err(|e| SrtpError::ContextCreation(e.to_string()))?;
        let remote =
            SrtpCryptoContext::new(remote_key.key(), remote_key.salt(), profile, None, None)
                .map_err(|e| SrtpError::ContextCreation(e.to_string()))?;
        debug!(suite = suite.sdp_name(), tag, "srtp context established");
        Ok(Self {
            suite,
            tag,
            local,
            remote,
        })
    }

    /// The negotiated suite.
    pub fn suite(&self) -> CryptoSuite {
        self.suite
    }

    /// The `a=crypto` tag this pairing was negotiated on.
    pub fn tag(&self) -> u32 {
        self.tag
    }

    /// Encrypt a plain RTP packet for sending to the peer.
    pub fn protect_rtp(&mut self, plain: &[u8]) -> Result<bytes::Bytes, SrtpError> {
        self.local
            .encrypt_rtp(&bytes::Bytes::copy_from_slice(plain))
            .map_err(|e| SrtpError::ContextCreation(e.to_string()))
    }

    /// Decrypt an RTP packet received from the peer.
    pub fn unprotect_rtp(&mut self, cipher: &[u8]) -> Result<bytes::Bytes, SrtpError> {
        self.remote
            .decrypt_rtp(&bytes::Bytes::copy_from_slice(cipher))
            .map_err(|e| SrtpError::ContextCreation(e.to_string()))
    }

    /// Encrypt a plain RTCP packet for sending to the peer.
    pub fn protect_rtcp(&mut self, plain: &[u8]) -> Result<bytes::Bytes, SrtpError> {
        self.local
            .encrypt_rtcp(&bytes::Bytes::copy_from_slice(plain))
            .map_err(|e| SrtpError::ContextCreation(e.to_string()))
    }

    /// Decrypt an RTCP packet received from the peer.
    pub fn unprotect_rtcp(&mut self, cipher: &[u8]) -> Result<bytes::Bytes, SrtpError> {
        self.remote
            .decrypt_rtcp(&bytes::Bytes::copy_from_slice(cipher))
            .map_err(|e| SrtpError::ContextCreation(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suite_names_round_trip() {
        for suite in [
            CryptoSuite::AesCm128HmacSha1_32,
            CryptoSuite::AesCm128HmacSha1_80,
            CryptoSuite::AeadAes128Gcm,
            CryptoSuite::AeadAes256Gcm,
        ] {
            assert_eq!(CryptoSuite::from_sdp_name(suite.sdp_name()).unwrap(), suite);
        }
    }

    #[test]
    fn unknown_suite_is_rejected() {
        assert!(CryptoSuite::from_sdp_name("NOT_A_SUITE").is_err());
    }

    #[test]
    fn generated_key_has_correct_length() {
        let key = MasterKey::generate(CryptoSuite::AeadAes256Gcm);
        assert_eq!(key.bytes.len(), 44);
    }

    #[test]
    fn short_key_is_rejected() {
        let b64 = STANDARD.encode([0u8; 4]);
        let err = MasterKey::from_base64(CryptoSuite::AesCm128HmacSha1_80, &b64).unwrap_err();
        assert!(matches!(err, SrtpError::ShortKey { .. }));
    }

    #[test]
    fn base64_round_trips() {
        let key = MasterKey::generate(CryptoSuite::AesCm128HmacSha1_80);
        let encoded = key.to_base64();
        let decoded = MasterKey::from_base64(CryptoSuite::AesCm128HmacSha1_80, &encoded).unwrap();
        assert_eq!(decoded.bytes, key.bytes);
    }
}
