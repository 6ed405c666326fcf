//! Bridge configuration
//!
//! The real config *file* loader is an external collaborator (spec §1);
//! this module only defines the typed section the host is expected to
//! hand the plugin at init time, plus small `from_str`/`from_path`
//! convenience wrappers for standalone use and tests.

use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const DEFAULT_RTP_RANGE_MIN: u16 = 10000;
const DEFAULT_RTP_RANGE_MAX: u16 = 60000;

/// `general.*` configuration keys from spec §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Interface or address to bind UDP sockets to (empty = autodetect).
    pub local_ip: Option<IpAddr>,
    /// IP advertised in rewritten descriptions (default = `local_ip`).
    pub sdp_ip: Option<IpAddr>,
    /// Raw `"min-max"` string as read from config; use [`Self::port_range`] for the parsed form.
    pub rtp_port_range: String,
    /// Emit plugin events to handlers.
    pub events: bool,
    /// DSCP value for audio RTP sockets; 0 disables IP_TOS entirely.
    pub dscp_audio_rtp: u8,
    /// DSCP value for video RTP sockets; 0 disables IP_TOS entirely.
    pub dscp_video_rtp: u8,
    /// Disable IPv6 entirely, even if the host has v6 connectivity.
    ///
    /// Per spec §9: this is forced on automatically whenever `local_ip`
    /// is set to a specific IPv4 address, regardless of this flag.
    pub ipv6_disabled: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            local_ip: None,
            sdp_ip: None,
            rtp_port_range: format!("{}-{}", DEFAULT_RTP_RANGE_MIN, DEFAULT_RTP_RANGE_MAX),
            events: true,
            dscp_audio_rtp: 0,
            dscp_video_rtp: 0,
            ipv6_disabled: false,
        }
    }
}

impl BridgeConfig {
    /// Parse a config section from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::InvalidAddress(e.to_string()))
    }

    /// Parse a config section from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).map_err(|e| ConfigError::InvalidAddress(e.to_string()))
    }

    /// Load and parse from a file path, dispatching on extension (`.toml`/`.json`).
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::InvalidAddress(format!("{}: {e}", path.display())))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&contents),
            _ => Self::from_toml_str(&contents),
        }
    }

    /// Parsed, validated `(min, max)` port range.
    ///
    /// `min` is coerced to even (per spec §6: "coerced to even min"); `max`
    /// is clamped to be at least `min`.
    pub fn port_range(&self) -> Result<(u16, u16), ConfigError> {
        let (min_s, max_s) = self
            .rtp_port_range
            .split_once('-')
            .ok_or_else(|| ConfigError::InvalidPortRange(self.rtp_port_range.clone()))?;
        let mut min: u16 = min_s
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidPortRange(self.rtp_port_range.clone()))?;
        let max: u16 = max_s
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidPortRange(self.rtp_port_range.clone()))?;
        if min % 2 != 0 {
            min += 1;
        }
        let max = max.max(min);
        Ok((min, max))
    }

    /// Run all validation that should fail plugin init (spec §7: "Configuration" errors).
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.port_range()?;
        Ok(())
    }

    /// The address descriptions should advertise, falling back to `local_ip`.
    pub fn advertise_ip(&self) -> Option<IpAddr> {
        self.sdp_ip.or(self.local_ip)
    }

    /// Whether IPv6 sockets should be used, accounting for the documented
    /// interaction between `ipv6_disabled` and a configured IPv4 `local_ip`
    /// (spec §9: "IPv6 handling disables v6 entirely if a specific IPv4
    /// local address is configured").
    pub fn use_ipv6(&self) -> bool {
        if self.ipv6_disabled {
            return false;
        }
        match self.local_ip {
            Some(IpAddr::V4(_)) => false,
            Some(IpAddr::V6(_)) | None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_range_is_even_and_ordered() {
        let cfg = BridgeConfig::default();
        let (min, max) = cfg.port_range().unwrap();
        assert_eq!(min % 2, 0);
        assert!(max >= min);
    }

    #[test]
    fn odd_min_is_coerced_even() {
        let mut cfg = BridgeConfig::default();
        cfg.rtp_port_range = "10001-10010".to_string();
        let (min, _) = cfg.port_range().unwrap();
        assert_eq!(min, 10002);
    }

    #[test]
    fn bad_range_is_rejected() {
        let mut cfg = BridgeConfig::default();
        cfg.rtp_port_range = "not-a-range".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn ipv4_local_ip_forces_v6_off() {
        let mut cfg = BridgeConfig::default();
        cfg.local_ip = Some("192.0.2.1".parse().unwrap());
        assert!(!cfg.use_ipv6());
    }

    #[test]
    fn toml_round_trip() {
        let text = r#"
            local_ip = "203.0.113.5"
            rtp_port_range = "10000-10010"
            events = false
            dscp_audio_rtp = 46
        "#;
        let cfg = BridgeConfig::from_toml_str(text).unwrap();
        assert_eq!(cfg.dscp_audio_rtp, 46);
        assert!(!cfg.events);
    }
}
