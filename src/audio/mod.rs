//! audio - ALSA capture and playback for the fixed PCM16 session format.
//!
//! The device threads only move frames between the hardware and the gate /
//! jitter buffer; everything else (encoding, protocol, network) happens on
//! the async side.

mod alsa_device;
mod system;

pub use system::AudioSystem;
