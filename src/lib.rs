//! voicewire - full-duplex PCM16 audio streaming to a realtime speech
//! endpoint over a persistent WebSocket, with echo-suppression gating and a
//! jitter-absorbing playback buffer.

pub mod audio;
pub mod config;
pub mod error;
pub mod gate;
pub mod playback;
pub mod protocol;
pub mod session;
pub mod transport;
