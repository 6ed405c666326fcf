//! Signalling-agnostic WebRTC-to-plain-RTP media bridge.
//!
//! A host drives sessions through [`dispatcher::Dispatcher`] (itself
//! assembled by [`plugin::NoSipPlugin`]), handing it `generate`/
//! `process`/`hangup`/`recording`/`keyframe` requests and receiving
//! callbacks through [`host::HostApi`]. See `SPEC_FULL.md` for the full
//! module-by-module design.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod host;
pub mod plugin;
pub mod port_allocator;
pub mod recorder;
pub mod registry;
pub mod relay;
pub mod rtcp;
pub mod rtp;
pub mod sdp;
pub mod session;
pub mod srtp;

pub use error::{BridgeError, Result};
