use thiserror::Error;

/// Errors raised by the REST side of the client and by session handling.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned {status} for {path}")]
    Status { status: u16, path: String },

    #[error("Failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid subject identifier: {0:?}")]
    InvalidSubject(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Consent for {subject} is {status}")]
    ConsentDenied { subject: String, status: String },

    #[error("Identity is not allowed to view {0}")]
    Forbidden(String),

    #[error("Selection of {0} was overtaken by a newer one")]
    Superseded(String),
}

/// Errors raised while establishing or reading a streaming connection.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("STOMP framing error: {0}")]
    Stomp(#[from] StompError),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Connection closed")]
    Closed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StompError {
    #[error("empty frame")]
    Empty,

    #[error("frame has no command line")]
    MissingCommand,

    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),

    #[error("invalid escape sequence in header: {0:?}")]
    InvalidEscape(String),

    #[error("frame body is not NUL terminated")]
    UnterminatedBody,
}
