//! Sequence/timestamp continuity across a mid-session SSRC change.
//!
//! When the peer's SSRC changes mid-call (a new encoder session, a
//! renegotiated codec, a recovered ICE restart on the WebRTC leg) the
//! relay must keep the sequence numbers and timestamps it forwards
//! monotonic from the plain-RTP side's point of view, rather than
//! forwarding the raw jump. This mirrors the original plugin's
//! `janus_rtp_switching_context` bookkeeping.

/// Per-direction, per-medium continuity state.
#[derive(Debug, Clone, Default)]
pub struct SwitchingContext {
    last_ssrc: Option<u32>,
    base_seq: u16,
    base_ts: u32,
    last_seq_out: u16,
    last_ts_out: u32,
    started: bool,
}

impl SwitchingContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrite `(seq, ts)` for continuity, recording a new base offset
    /// whenever the incoming SSRC changes.
    pub fn update(&mut self, ssrc: u32, seq: u16, ts: u32) -> (u16, u32) {
        if self.last_ssrc != Some(ssrc) {
            if self.started {
                self.base_seq = self.last_seq_out.wrapping_sub(seq).wrapping_add(1);
                self.base_ts = self.last_ts_out.wrapping_sub(ts).wrapping_add(1);
            } else {
                self.base_seq = 0;
                self.base_ts = 0;
                self.started = true;
            }
            self.last_ssrc = Some(ssrc);
        }

        let out_seq = seq.wrapping_add(self.base_seq);
        let out_ts = ts.wrapping_add(self.base_ts);
        self.last_seq_out = out_seq;
        self.last_ts_out = out_ts;
        (out_seq, out_ts)
    }

    /// Reset all state, e.g. when a session is torn down and its ports reused.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_through_unchanged_while_ssrc_is_stable() {
        let mut ctx = SwitchingContext::new();
        assert_eq!(ctx.update(0xAAAA, 100, 1000), (100, 1000));
        assert_eq!(ctx.update(0xAAAA, 101, 1160), (101, 1160));
        assert_eq!(ctx.update(0xAAAA, 102, 1320), (102, 1320));
    }

    #[test]
    fn stays_monotonic_across_an_ssrc_change() {
        let mut ctx = SwitchingContext::new();
        let (seq1, ts1) = ctx.update(0xAAAA, 100, 1000);
        let (seq2, ts2) = ctx.update(0xAAAA, 101, 1160);
        assert!(seq2 > seq1);
        assert!(ts2 > ts1);

        // New encoder: SSRC changes, peer's own sequence/timestamp reset low.
        let (seq3, ts3) = ctx.update(0xBBBB, 5, 200);
        assert_eq!(seq3, seq2.wrapping_add(1));
        assert_eq!(ts3, ts2.wrapping_add(1));

        let (seq4, ts4) = ctx.update(0xBBBB, 6, 360);
        assert_eq!(seq4, seq3.wrapping_add(1));
        assert_eq!(ts4, ts3.wrapping_add(160));
    }

    #[test]
    fn reset_clears_accumulated_offsets() {
        let mut ctx = SwitchingContext::new();
        ctx.update(0xAAAA, 100, 1000);
        ctx.reset();
        assert_eq!(ctx.update(0xCCCC, 1, 1), (1, 1));
    }
}
