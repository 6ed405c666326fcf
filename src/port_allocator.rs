//! Process-wide UDP port-pair allocator
//!
//! Hands out `(rtp, rtcp)` socket/port pairs on consecutive ports, advancing
//! a shared cursor over a configured even-aligned range. See spec §4.1.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, warn};

use crate::error::PortAllocatorError;

/// A bound RTP/RTCP socket pair, plus the ports they're bound to.
pub struct AllocatedPortPair {
    /// Bound, not-yet-connected RTP socket.
    pub rtp_socket: std::net::UdpSocket,
    /// Bound, not-yet-connected RTCP socket.
    pub rtcp_socket: std::net::UdpSocket,
    /// Even local RTP port.
    pub rtp_port: u16,
    /// `rtp_port + 1`.
    pub rtcp_port: u16,
}

/// Shared, thread-safe cursor over a configured UDP port range.
///
/// One instance is constructed at plugin init and shared (via `Arc`)
/// across every session; injected explicitly rather than held as a
/// global `static` so tests can construct independent allocators (spec §9).
pub struct PortAllocator {
    cursor: AtomicU16,
    min: u16,
    max: u16,
    bind_ip: Option<IpAddr>,
    use_ipv6: bool,
    dscp_audio: u8,
    dscp_video: u8,
}

impl PortAllocator {
    /// Build an allocator over `[min, max]`. `min` is coerced to even.
    pub fn new(min: u16, max: u16, bind_ip: Option<IpAddr>, use_ipv6: bool) -> Self {
        let min = if min % 2 != 0 { min + 1 } else { min };
        let max = max.max(min);
        Self {
            cursor: AtomicU16::new(min),
            min,
            max,
            bind_ip,
            use_ipv6,
            dscp_audio: 0,
            dscp_video: 0,
        }
    }

    /// Configure the DSCP values applied to audio/video RTP sockets
    /// (`value << 2` written to `IP_TOS`/`IPV6_TCLASS`; 0 disables it).
    pub fn with_dscp(mut self, dscp_audio: u8, dscp_video: u8) -> Self {
        self.dscp_audio = dscp_audio;
        self.dscp_video = dscp_video;
        self
    }

    /// Allocate a bound `(rtp, rtcp)` pair on consecutive ports, or fail
    /// with [`PortAllocatorError::NoPortsAvailable`] once the whole range
    /// has been scanned.
    pub fn allocate_pair(&self, is_video: bool) -> Result<AllocatedPortPair, PortAllocatorError> {
        let start = self.cursor.load(Ordering::SeqCst);
        let mut next = start;
        let mut wrapped = false;

        let mut rtp_sock: Option<Socket> = None;
        let mut rtcp_sock: Option<Socket> = None;

        loop {
            if wrapped && next >= start {
                break;
            }
            if rtp_sock.is_none() {
                rtp_sock = self.new_socket(is_video).ok();
            }
            if rtcp_sock.is_none() {
                rtcp_sock = self.new_socket(is_video).ok();
            }
            let (Some(rtp), Some(rtcp)) = (rtp_sock.as_ref(), rtcp_sock.as_ref()) else {
                warn!("error creating {} sockets", if is_video { "video" } else { "audio" });
                break;
            };

            let rtp_port = next;
            let rtcp_port = next + 1;
            if (next as u32 + 2) < self.max as u32 {
                next += 2;
            } else {
                next = self.min;
                wrapped = true;
            }

            if self.bind(rtp, rtp_port).is_err() {
                /* rtp socket still unbound, reuse it next loop */
            } else if self.bind(rtcp, rtcp_port).is_err() {
                /* rtp bound but rtcp didn't: drop the bound rtp socket, retry both */
                rtp_sock = None;
            } else {
                self.cursor.store(next, Ordering::SeqCst);
                debug!(rtp_port, rtcp_port, video = is_video, "allocated port pair");
                return Ok(AllocatedPortPair {
                    rtp_socket: rtp_sock.unwrap().into(),
                    rtcp_socket: rtcp_sock.unwrap().into(),
                    rtp_port,
                    rtcp_port,
                });
            }
        }

        Err(PortAllocatorError::NoPortsAvailable {
            min: self.min,
            max: self.max,
        })
    }

    fn new_socket(&self, is_video: bool) -> std::io::Result<Socket> {
        let domain = if self.use_ipv6 { Domain::IPV6 } else { Domain::IPV4 };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        if self.use_ipv6 {
            let _ = socket.set_only_v6(false);
        }
        let dscp = if is_video { self.dscp_video } else { self.dscp_audio };
        if dscp > 0 {
            let tos = (dscp as u32) << 2;
            if self.use_ipv6 {
                let _ = socket.set_tclass_v6(tos);
            } else if let Err(e) = socket.set_tos(tos) {
                warn!(error = %e, "failed to set IP_TOS on RTP socket");
            }
        }
        Ok(socket)
    }

    fn bind(&self, socket: &Socket, port: u16) -> std::io::Result<()> {
        let addr: SocketAddr = if self.use_ipv6 {
            let ip = match self.bind_ip {
                Some(IpAddr::V6(v6)) => v6,
                _ => Ipv6Addr::UNSPECIFIED,
            };
            SocketAddr::new(IpAddr::V6(ip), port)
        } else {
            let ip = match self.bind_ip {
                Some(IpAddr::V4(v4)) => v4,
                _ => Ipv4Addr::UNSPECIFIED,
            };
            SocketAddr::new(IpAddr::V4(ip), port)
        };
        socket.bind(&addr.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_even_consecutive_pair() {
        let alloc = PortAllocator::new(40000, 40010, None, false);
        let pair = alloc.allocate_pair(false).expect("allocation should succeed");
        assert_eq!(pair.rtp_port % 2, 0);
        assert_eq!(pair.rtcp_port, pair.rtp_port + 1);
        assert!(pair.rtp_port >= 40000 && pair.rtp_port <= 40009);
    }

    #[test]
    fn single_pair_range_succeeds_once_then_fails() {
        // A single even port plus its odd successor: exactly one pair fits.
        let alloc = PortAllocator::new(40100, 40102, None, false);
        let first = alloc.allocate_pair(false);
        assert!(first.is_ok());
        // Keep the sockets alive so the ports stay bound, forcing the
        // second allocation to scan the whole range and come up empty.
        let _hold = first.unwrap();
        let second = alloc.allocate_pair(false);
        assert!(second.is_err());
    }

    #[test]
    fn odd_min_is_coerced() {
        let alloc = PortAllocator::new(40001, 40010, None, false);
        assert_eq!(alloc.min, 40002);
    }
}
