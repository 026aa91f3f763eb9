//! ALSA PCM device handles for the fixed capture/playback configuration:
//! S16LE, mono, 24 kHz, 1024-sample periods.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};

use crate::config::{CHANNELS, FRAME_SAMPLES, SAMPLE_RATE};

pub fn open_capture(device: &str) -> Result<(PCM, usize)> {
    open_pcm(device, Direction::Capture, "capture")
}

pub fn open_playback(device: &str) -> Result<(PCM, usize)> {
    open_pcm(device, Direction::Playback, "playback")
}

/// Open a PCM device in the fixed session format and return it together
/// with the period size the hardware actually granted.
fn open_pcm(device: &str, direction: Direction, dir_name: &str) -> Result<(PCM, usize)> {
    let pcm = PCM::new(device, direction, false)
        .with_context(|| format!("failed to open {} device '{}'", dir_name, device))?;

    {
        let hwp = HwParams::any(&pcm).context("failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(CHANNELS)?;
        hwp.set_rate(SAMPLE_RATE, ValueOr::Nearest)?;
        hwp.set_period_size_near(FRAME_SAMPLES as alsa::pcm::Frames, ValueOr::Nearest)?;
        pcm.hw_params(&hwp)?;
    }

    let period_size = pcm.hw_params_current()?.get_period_size()? as usize;

    log::info!(
        "ALSA {}: device={}, rate={}, channels={}, period_size={}",
        dir_name,
        device,
        SAMPLE_RATE,
        CHANNELS,
        period_size,
    );

    Ok((pcm, period_size))
}
