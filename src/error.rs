use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Failure to establish the WebSocket session. Fatal: there is no retry
/// policy, the caller surfaces it and the session never reaches Running.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("invalid endpoint url: {0}")]
    BadUrl(#[from] url::ParseError),

    #[error("failed to build upgrade request: {0}")]
    BadRequest(#[from] tungstenite::http::Error),

    #[error("websocket handshake failed: {0}")]
    Handshake(#[from] tungstenite::Error),
}

/// A single inbound message could not be decoded. The message is dropped
/// and logged; the link keeps running.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed event json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("event '{0}' is missing field '{1}'")]
    MissingField(String, &'static str),
}
