//! Jitter-absorbing playback buffer.
//!
//! Decoded audio deltas arrive in arbitrary chunk sizes over the network
//! while the output device consumes fixed-size chunks at hardware rate, so
//! the buffer is a plain byte FIFO: `append` at the tail from the decode
//! path, `take(n)` from the head in the playback callback, zero-padded on
//! underrun so the device always gets exactly `n` bytes.

use std::sync::Arc;
use std::sync::Mutex;

use bytes::BytesMut;

use crate::gate::FrameGate;

pub struct PlaybackBuffer {
    buf: Mutex<BytesMut>,
    gate: Arc<FrameGate>,
    /// Whether serving a chunk of pure silence padding still re-arms echo
    /// suppression. On by default; turning it off lets the mic reactivate
    /// under sustained underrun.
    rearm_on_silence: bool,
}

impl PlaybackBuffer {
    pub fn new(gate: Arc<FrameGate>, rearm_on_silence: bool) -> Self {
        Self {
            buf: Mutex::new(BytesMut::new()),
            gate,
            rearm_on_silence,
        }
    }

    /// Append decoded audio bytes at the tail. Any thread.
    pub fn append(&self, bytes: &[u8]) {
        self.buf.lock().unwrap().extend_from_slice(bytes);
    }

    /// Remove and return exactly `n` bytes from the head, padding the
    /// shortfall with silence. Runs in the playback callback: the only wait
    /// is the short mutex hold shared with `append`.
    pub fn take(&self, n: usize) -> Vec<u8> {
        let drained = {
            let mut buf = self.buf.lock().unwrap();
            let have = buf.len().min(n);
            buf.split_to(have)
        };
        let served = drained.len();

        let mut out = Vec::from(drained);
        out.resize(n, 0);

        if served > 0 || self.rearm_on_silence {
            self.gate.notify();
        }
        out
    }

    pub fn len(&self) -> usize {
        self.buf.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
