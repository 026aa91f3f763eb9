//! Wire types for the realtime speech endpoint.
//!
//! Every inbound text frame is decoded exactly once here, at the protocol
//! boundary, into a closed [`ServerEvent`] enum. Unrecognized `type` values
//! become [`ServerEvent::Unknown`] so new server-side event kinds never
//! crash the dispatch path.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Messages we send to the endpoint.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "response.create")]
    ResponseCreate { response: ResponseSpec },

    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
}

#[derive(Debug, Serialize)]
pub struct ResponseSpec {
    pub modalities: Vec<String>,
    pub instructions: String,
}

impl ClientEvent {
    /// The one-shot session-configuration message sent right after connect.
    pub fn response_create(instructions: &str) -> Self {
        Self::ResponseCreate {
            response: ResponseSpec {
                modalities: vec!["audio".to_string(), "text".to_string()],
                instructions: instructions.to_string(),
            },
        }
    }

    /// One captured PCM16LE frame, base64-encoded for transport.
    pub fn audio_chunk(pcm: &[u8]) -> Self {
        Self::InputAudioBufferAppend {
            audio: BASE64.encode(pcm),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Messages the endpoint sends us, decoded once at the link boundary.
#[derive(Debug, PartialEq)]
pub enum ServerEvent {
    /// A chunk of synthesized PCM16 audio, already base64-decoded.
    AudioDelta(Vec<u8>),
    /// The endpoint finished the current audio response.
    AudioDone,
    /// Any other event kind; the raw `type` string is preserved.
    Unknown(String),
}

#[derive(Deserialize)]
struct RawServerEvent {
    #[serde(rename = "type")]
    kind: String,
    delta: Option<String>,
}

pub fn decode_server_event(text: &str) -> Result<ServerEvent, DecodeError> {
    let raw: RawServerEvent = serde_json::from_str(text)?;
    match raw.kind.as_str() {
        "response.audio.delta" => {
            let delta = raw
                .delta
                .ok_or_else(|| DecodeError::MissingField(raw.kind.clone(), "delta"))?;
            Ok(ServerEvent::AudioDelta(BASE64.decode(delta)?))
        }
        "response.audio.done" => Ok(ServerEvent::AudioDone),
        _ => Ok(ServerEvent::Unknown(raw.kind)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_create_wire_shape() {
        let json = ClientEvent::response_create("Please assist the user.")
            .to_json()
            .unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["type"], "response.create");
        assert_eq!(v["response"]["modalities"][0], "audio");
        assert_eq!(v["response"]["modalities"][1], "text");
        assert_eq!(v["response"]["instructions"], "Please assist the user.");
    }

    #[test]
    fn audio_chunk_round_trips() {
        let pcm: Vec<u8> = (0..=255).collect();
        let json = ClientEvent::audio_chunk(&pcm).to_json().unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["type"], "input_audio_buffer.append");
        let decoded = BASE64.decode(v["audio"].as_str().unwrap()).unwrap();
        assert_eq!(decoded, pcm);
    }

    #[test]
    fn decodes_audio_delta() {
        let payload = BASE64.encode([1u8, 2, 3, 4]);
        let text = format!(r#"{{"type":"response.audio.delta","delta":"{payload}"}}"#);
        assert_eq!(
            decode_server_event(&text).unwrap(),
            ServerEvent::AudioDelta(vec![1, 2, 3, 4])
        );
    }

    #[test]
    fn decodes_audio_done() {
        let ev = decode_server_event(r#"{"type":"response.audio.done"}"#).unwrap();
        assert_eq!(ev, ServerEvent::AudioDone);
    }

    #[test]
    fn unknown_kind_is_preserved() {
        let ev = decode_server_event(r#"{"type":"foo","whatever":1}"#).unwrap();
        assert_eq!(ev, ServerEvent::Unknown("foo".to_string()));
    }

    #[test]
    fn bad_base64_is_a_decode_error() {
        let text = r#"{"type":"response.audio.delta","delta":"!!not-base64!!"}"#;
        assert!(matches!(
            decode_server_event(text),
            Err(DecodeError::Base64(_))
        ));
    }

    #[test]
    fn missing_delta_is_a_decode_error() {
        let text = r#"{"type":"response.audio.delta"}"#;
        assert!(matches!(
            decode_server_event(text),
            Err(DecodeError::MissingField(_, "delta"))
        ));
    }

    #[test]
    fn non_json_is_a_decode_error() {
        assert!(matches!(
            decode_server_event("not json"),
            Err(DecodeError::Json(_))
        ));
    }
}
