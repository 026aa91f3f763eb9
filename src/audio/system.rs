//! Capture and playback device threads.
//!
//! Uses std::thread (NOT tokio tasks) for real-time audio I/O to avoid
//! contention with the async network tasks. The capture thread pushes
//! gate-approved frames onto a bounded channel; the playback thread pulls
//! fixed-size chunks from the jitter buffer, so neither thread ever does
//! encoding, JSON work, or network I/O.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use anyhow::Result;
use tokio::sync::mpsc;

use super::alsa_device;
use crate::config::BYTES_PER_SAMPLE;
use crate::gate::FrameGate;
use crate::playback::PlaybackBuffer;

/// Give up on a stuck playback period after this many XRUN recoveries.
const MAX_WRITE_RETRIES: u32 = 3;

pub struct AudioSystem {
    running: Arc<AtomicBool>,
    capture_handle: Option<JoinHandle<()>>,
    playback_handle: Option<JoinHandle<()>>,
}

impl AudioSystem {
    /// Open both devices and start the capture/playback threads.
    ///
    /// * `gate`     - decides per captured frame whether it is forwarded
    /// * `buffer`   - jitter buffer the playback thread drains
    /// * `frame_tx` - bounded channel carrying forwarded PCM16LE frames
    pub fn start(
        capture_device: &str,
        playback_device: &str,
        gate: Arc<FrameGate>,
        buffer: Arc<PlaybackBuffer>,
        frame_tx: mpsc::Sender<Vec<u8>>,
    ) -> Result<Self> {
        // Open both devices up front so a bad device name fails start()
        // instead of killing a thread later.
        let (capture_pcm, capture_period) = alsa_device::open_capture(capture_device)?;
        let (playback_pcm, playback_period) = alsa_device::open_playback(playback_device)?;

        let running = Arc::new(AtomicBool::new(true));

        let capture_handle = {
            let running = running.clone();
            thread::Builder::new().name("audio-capture".into()).spawn(move || {
                if let Err(e) = capture_thread(capture_pcm, capture_period, &gate, frame_tx, &running) {
                    log::error!("Capture thread error: {}", e);
                }
            })?
        };

        let playback_handle = {
            let running = running.clone();
            thread::Builder::new().name("audio-playback".into()).spawn(move || {
                if let Err(e) = playback_thread(playback_pcm, playback_period, &buffer, &running) {
                    log::error!("Playback thread error: {}", e);
                }
            })?
        };

        Ok(Self {
            running,
            capture_handle: Some(capture_handle),
            playback_handle: Some(playback_handle),
        })
    }

    /// An audio system that runs no device threads. For hosts and tests
    /// without sound hardware; `stop()` returns immediately.
    pub fn headless() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            capture_handle: None,
            playback_handle: None,
        }
    }

    /// Signal both threads to stop and wait for them to finish. Each loop
    /// checks the flag every period, so this returns within a few periods.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.capture_handle.take() {
            let _ = h.join();
        }
        if let Some(h) = self.playback_handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for AudioSystem {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_thread(
    pcm: alsa::pcm::PCM,
    period_size: usize,
    gate: &FrameGate,
    frame_tx: mpsc::Sender<Vec<u8>>,
    running: &AtomicBool,
) -> Result<()> {
    let io = pcm.io_i16()?;
    let mut read_buf = vec![0i16; period_size];

    log::info!("Capture started: period={}", period_size);

    while running.load(Ordering::Relaxed) {
        match io.readi(&mut read_buf) {
            Ok(frames) => {
                if !gate.offer() {
                    continue;
                }
                let mut frame = Vec::with_capacity(frames * BYTES_PER_SAMPLE);
                for sample in &read_buf[..frames] {
                    frame.extend_from_slice(&sample.to_le_bytes());
                }
                if frame_tx.blocking_send(frame).is_err() {
                    log::warn!("Frame receiver dropped, stopping capture");
                    return Ok(());
                }
            }
            Err(e) => {
                log::warn!("ALSA capture error: {}, recovering...", e);
                if let Err(e2) = pcm.prepare() {
                    log::error!("Failed to recover PCM capture: {}", e2);
                    break;
                }
            }
        }
    }

    log::info!("Capture stopped");
    Ok(())
}

fn playback_thread(
    pcm: alsa::pcm::PCM,
    period_size: usize,
    buffer: &PlaybackBuffer,
    running: &AtomicBool,
) -> Result<()> {
    let io = pcm.io_i16()?;
    let period_bytes = period_size * BYTES_PER_SAMPLE;

    log::info!("Playback started: period={}", period_size);

    while running.load(Ordering::Relaxed) {
        // Exactly one period per cycle, silence-padded on underrun; the
        // blocking writei paces the loop at the hardware rate.
        let chunk = buffer.take(period_bytes);
        let samples: Vec<i16> = chunk
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();

        let mut written = 0;
        let mut retries = 0u32;
        while written < samples.len() {
            match io.writei(&samples[written..]) {
                Ok(n) => {
                    written += n;
                    retries = 0;
                }
                Err(e) => {
                    log::warn!("ALSA playback error: {}, recovering...", e);
                    if let Err(e2) = pcm.prepare() {
                        log::error!("Failed to recover PCM playback: {}", e2);
                        return Ok(());
                    }
                    retries += 1;
                    // The device keeps rejecting writes: drop the rest of
                    // this period rather than spin forever.
                    if retries >= MAX_WRITE_RETRIES {
                        log::error!(
                            "Max recovery retries reached, dropping {} samples",
                            samples.len() - written
                        );
                        break;
                    }
                }
            }
        }
    }

    log::info!("Playback stopped");
    Ok(())
}
