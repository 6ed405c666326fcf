//! Top-level plugin wiring
//!
//! Assembles the config, port allocator, session registry and request
//! dispatcher into the single object a host embeds — analogous to how
//! the teacher's server-side transport assembles its lower-level pieces
//! behind one API entry point.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::config::BridgeConfig;
use crate::dispatcher::Dispatcher;
use crate::host::HostApi;
use crate::port_allocator::PortAllocator;
use crate::registry::SessionRegistry;
use crate::session::Session;

/// The bridge plugin's public entry point.
pub struct NoSipPlugin {
    pub registry: Arc<SessionRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    next_session_id: AtomicU64,
}

impl NoSipPlugin {
    /// Validate `config` and wire up a fresh plugin instance.
    pub fn new(config: BridgeConfig, host: Arc<dyn HostApi>) -> Result<Self, crate::error::ConfigError> {
        config.validate()?;
        let (min, max) = config.port_range()?;
        let use_ipv6 = config.use_ipv6();
        let allocator = Arc::new(
            PortAllocator::new(min, max, config.local_ip, use_ipv6)
                .with_dscp(config.dscp_audio_rtp, config.dscp_video_rtp),
        );
        let dispatcher = Arc::new(Dispatcher::new(config, allocator, host));
        info!("nosip-bridge plugin initialized");
        Ok(Self {
            registry: Arc::new(SessionRegistry::new()),
            dispatcher,
            next_session_id: AtomicU64::new(1),
        })
    }

    /// Create and register a fresh, `Idle` session, returning its handle id.
    pub async fn create_session(&self, srtp_required: bool) -> Arc<Session> {
        let id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        let session = Arc::new(Session::new(id, srtp_required));
        self.registry.insert(session.clone()).await;
        session
    }

    /// Tear down every live session, e.g. on plugin unload.
    pub async fn shutdown(&self) {
        let ids = self.registry.hangup_all().await;
        for id in ids {
            if let Some(session) = self.registry.get(id).await {
                let _ = self.dispatcher.handle_hangup(&session).await;
                self.registry.remove(id).await;
            }
        }
        info!("nosip-bridge plugin shut down");
    }
}
