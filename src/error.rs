//! Crate-wide error types
//!
//! Mirrors the wire error codes the host surfaces to clients (see
//! `RequestError::code`), plus the lower-level error enums each
//! component returns internally.

use thiserror::Error;

/// Errors returned by the [`crate::port_allocator::PortAllocator`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PortAllocatorError {
    /// The configured range has been fully scanned without finding a free pair.
    #[error("no ports available in range {min}-{max}")]
    NoPortsAvailable {
        /// Lower bound of the configured range.
        min: u16,
        /// Upper bound of the configured range.
        max: u16,
    },
}

/// Errors returned by the SRTP context manager.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SrtpError {
    /// Requested profile isn't one of the four supported SDES profiles.
    #[error("unsupported SRTP profile: {0}")]
    UnsupportedProfile(String),
    /// The base64-decoded remote key material is shorter than the profile's master length.
    #[error("SRTP key material too short: got {got}, need {need}")]
    ShortKey {
        /// Decoded length in bytes.
        got: usize,
        /// Required master length in bytes.
        need: usize,
    },
    /// The underlying crypto context could not be created.
    #[error("failed to create SRTP context: {0}")]
    ContextCreation(String),
    /// Key material was not valid base64.
    #[error("invalid base64 key material")]
    InvalidKeyEncoding,
}

/// Errors surfaced while parsing or rewriting an RTP/RTCP packet.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RtpError {
    /// The buffer was shorter than the field being read required.
    #[error("buffer too small: need {required}, have {available}")]
    BufferTooSmall {
        /// Bytes required to parse the next field.
        required: usize,
        /// Bytes actually remaining.
        available: usize,
    },
    /// The RTP version field wasn't 2.
    #[error("unsupported RTP version: {0}")]
    UnsupportedVersion(u8),
}

/// Errors surfaced while walking or rewriting an SDP.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SdpError {
    /// The SDP text could not be parsed at all.
    #[error("failed to parse SDP: {0}")]
    ParseFailed(String),
    /// A required field (e.g. a connection address) was absent.
    #[error("missing SDP field: {0}")]
    MissingField(String),
}

/// The numeric error codes from the request/response wire contract.
///
/// Each request error maps 1:1 onto one of these; `code()` returns the
/// documented numeric value so the dispatcher can put it on the wire
/// unchanged.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// 440 — the message queue handed back an empty message.
    #[error("no message")]
    NoMessage,
    /// 441 — the request body wasn't valid JSON.
    #[error("invalid json")]
    InvalidJson,
    /// 442 — unrecognized `request` value.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// 443 — a required field was missing from the request object.
    #[error("missing element: {0}")]
    MissingElement(String),
    /// 444 — a field had the wrong type or an invalid value.
    #[error("invalid element: {0}")]
    InvalidElement(String),
    /// 445 — the request doesn't make sense given the session's current state.
    #[error("wrong state: {0}")]
    WrongState(String),
    /// 446 — no SDP (or no usable SDP type) was attached to the request.
    #[error("missing sdp: {0}")]
    MissingSdp(String),
    /// 447 — the SDP didn't parse, or negotiated to nothing usable.
    #[error("invalid sdp: {0}")]
    InvalidSdp(String),
    /// 448 — a local I/O operation (usually port allocation) failed.
    #[error("io error: {0}")]
    IoError(String),
    /// 449 — a recording could not be started.
    #[error("recording error: {0}")]
    RecordingError(String),
    /// 450 — SRTP was mandated but the peer didn't support it.
    #[error("too strict: {0}")]
    TooStrict(String),
    /// 499 — anything else.
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl RequestError {
    /// The numeric error code from spec §6, as put on the wire.
    pub fn code(&self) -> u32 {
        match self {
            RequestError::NoMessage => 440,
            RequestError::InvalidJson => 441,
            RequestError::InvalidRequest(_) => 442,
            RequestError::MissingElement(_) => 443,
            RequestError::InvalidElement(_) => 444,
            RequestError::WrongState(_) => 445,
            RequestError::MissingSdp(_) => 446,
            RequestError::InvalidSdp(_) => 447,
            RequestError::IoError(_) => 448,
            RequestError::RecordingError(_) => 449,
            RequestError::TooStrict(_) => 450,
            RequestError::Unknown(_) => 499,
        }
    }
}

/// Configuration errors that must fail plugin initialization.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `rtp_port_range` didn't parse as `"min-max"`.
    #[error("invalid port range: {0}")]
    InvalidPortRange(String),
    /// The advertise or bind address wasn't a valid IP.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// Top-level error type threaded through the dispatcher and plugin API.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Wraps a [`PortAllocatorError`].
    #[error(transparent)]
    PortAllocator(#[from] PortAllocatorError),
    /// Wraps an [`SrtpError`].
    #[error(transparent)]
    Srtp(#[from] SrtpError),
    /// Wraps an [`RtpError`].
    #[error(transparent)]
    Rtp(#[from] RtpError),
    /// Wraps an [`SdpError`].
    #[error(transparent)]
    Sdp(#[from] SdpError),
    /// Wraps a [`RequestError`].
    #[error(transparent)]
    Request(#[from] RequestError),
    /// Wraps a [`ConfigError`].
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl BridgeError {
    /// Best-effort mapping down to a wire [`RequestError`], for paths that
    /// need to report *something* to the client even though the underlying
    /// failure originated below the dispatcher.
    pub fn as_request_error(&self) -> RequestError {
        match self {
            BridgeError::PortAllocator(e) => RequestError::IoError(e.to_string()),
            BridgeError::Srtp(e) => RequestError::InvalidElement(e.to_string()),
            BridgeError::Rtp(e) => RequestError::InvalidElement(e.to_string()),
            BridgeError::Sdp(e) => RequestError::InvalidSdp(e.to_string()),
            BridgeError::Request(e) => e.clone(),
            BridgeError::Config(e) => RequestError::Unknown(e.to_string()),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = BridgeError> = std::result::Result<T, E>;
