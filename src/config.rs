use std::env;
use std::time::Duration;

/// Fixed PCM configuration: 16-bit linear, mono, 24 kHz, 1024-sample frames.
/// The endpoint neither negotiates nor accepts anything else.
pub const SAMPLE_RATE: u32 = 24000;
pub const CHANNELS: u32 = 1;
pub const FRAME_SAMPLES: usize = 1024;
pub const BYTES_PER_SAMPLE: usize = 2;

pub const DEFAULT_WS_URL: &str =
    "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview-2024-10-01";
pub const DEFAULT_INSTRUCTIONS: &str = "Please assist the user.";
pub const DEFAULT_REENGAGE_DELAY_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct Config {
    /// Bearer token for the endpoint.
    pub api_key: String,
    pub ws_url: String,
    /// Free-text instructions sent in the initial `response.create`.
    pub instructions: String,

    /// ALSA device names (e.g. "default", "plughw:0,0").
    pub capture_device: String,
    pub playback_device: String,

    /// How long after a served playback chunk the mic stays suppressed.
    pub reengage_delay: Duration,
    /// Whether pure silence padding also re-arms suppression.
    pub rearm_on_silence: bool,
}

impl Config {
    /// Read configuration from the environment. Only the API key is
    /// required; everything else has a working default.
    pub fn from_env() -> Result<Self, &'static str> {
        let api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| "OPENAI_API_KEY not found in environment")?;

        let reengage_ms = env::var("REENGAGE_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_REENGAGE_DELAY_MS);

        let rearm_on_silence = env::var("REARM_ON_SILENCE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(true);

        Ok(Self {
            api_key,
            ws_url: env::var("REALTIME_WS_URL").unwrap_or_else(|_| DEFAULT_WS_URL.to_string()),
            instructions: env::var("VOICEWIRE_INSTRUCTIONS")
                .unwrap_or_else(|_| DEFAULT_INSTRUCTIONS.to_string()),
            capture_device: env::var("CAPTURE_DEVICE").unwrap_or_else(|_| "default".to_string()),
            playback_device: env::var("PLAYBACK_DEVICE").unwrap_or_else(|_| "default".to_string()),
            reengage_delay: Duration::from_millis(reengage_ms),
            rearm_on_silence,
        })
    }
}
