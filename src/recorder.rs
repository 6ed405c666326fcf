//! Per-leg recording
//!
//! The wire format a real deployment writes is an external collaborator
//! (spec §1); this module defines the trait the session drives and one
//! concrete file-backed implementation so the crate is runnable and
//! testable end to end without a host-supplied recorder.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::{debug, warn};

/// Sink for one medium's raw (post-SRTP-decrypt) RTP stream.
pub trait Recorder: Send + Sync {
    /// Append one RTP packet, timestamped by the recorder itself.
    fn record_rtp(&self, packet: &[u8]);

    /// Append one RTCP packet.
    fn record_rtcp(&self, packet: &[u8]);

    /// Flush and stop accepting further packets.
    fn close(&self);
}

/// Appends a length-prefixed stream of raw RTP/RTCP packets to a plain
/// file. Simple enough to be read back by a small offline tool; the
/// actual container format (e.g. `.mjr`) is out of scope per spec §1.
pub struct FileRecorder {
    path: PathBuf,
    file: Mutex<Option<std::fs::File>>,
}

impl FileRecorder {
    /// Create (truncating) the backing file at `path`.
    pub fn create(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let file = std::fs::File::create(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    fn append(&self, tag: u8, packet: &[u8]) {
        let mut guard = self.file.lock().expect("recorder file mutex poisoned");
        let Some(file) = guard.as_mut() else {
            return;
        };
        let len = packet.len() as u32;
        let mut header = [0u8; 5];
        header[0] = tag;
        header[1..5].copy_from_slice(&len.to_be_bytes());
        if let Err(e) = file.write_all(&header).and_then(|_| file.write_all(packet)) {
            warn!(path = %self.path.display(), error = %e, "recorder write failed");
        }
    }
}

impl Recorder for FileRecorder {
    fn record_rtp(&self, packet: &[u8]) {
        self.append(0, packet);
    }

    fn record_rtcp(&self, packet: &[u8]) {
        self.append(1, packet);
    }

    fn close(&self) {
        let mut guard = self.file.lock().expect("recorder file mutex poisoned");
        if let Some(file) = guard.as_mut() {
            let _ = file.flush();
        }
        *guard = None;
        debug!(path = %self.path.display(), "recorder closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_length_prefixed_frames() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("nosip-bridge-test-{}.rec", std::process::id()));
        let recorder = FileRecorder::create(&path).unwrap();
        recorder.record_rtp(&[1, 2, 3]);
        recorder.record_rtcp(&[9, 9]);
        recorder.close();

        let data = std::fs::read(&path).unwrap();
        assert_eq!(data[0], 0);
        assert_eq!(&data[1..5], &3u32.to_be_bytes());
        assert_eq!(&data[5..8], &[1, 2, 3]);
        assert_eq!(data[8], 1);
        let _ = std::fs::remove_file(&path);
    }
}
