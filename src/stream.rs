//! Streaming channel: one connection per feed, each carrying its vitals
//! topic plus the global alert topic.
//!
//! `StompConnector` speaks STOMP over the backend's WebSocket endpoint.
//! `ChannelConnector` is an in-process broker with the same contract.

use crate::auth::CredentialProvider;
use crate::error::StreamError;
use crate::stomp::{parse_frames, Frame};
use crate::subject::{SubjectId, ALERTS_TOPIC, WARD_TOPIC};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub const VITALS_SUBSCRIPTION: &str = "sub-vitals";
pub const WARD_SUBSCRIPTION: &str = "sub-ward";
pub const ALERTS_SUBSCRIPTION: &str = "sub-alerts";

/// What a connection subscribes to besides the alert topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feed {
    /// Readings of one subject, for the detail view.
    Subject(SubjectId),
    /// Readings of every subject, for the list view.
    Ward,
}

impl Feed {
    fn subscription(&self) -> (&'static str, String) {
        match self {
            Feed::Subject(subject) => (VITALS_SUBSCRIPTION, subject.vitals_topic()),
            Feed::Ward => (WARD_SUBSCRIPTION, WARD_TOPIC.to_string()),
        }
    }
}

impl fmt::Display for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Feed::Subject(subject) => write!(f, "{}", subject),
            Feed::Ward => f.write_str("ward"),
        }
    }
}

/// Raw body of one pushed message, tagged with the topic it came from.
/// Decoding happens downstream so a bad body only costs that message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    Vitals(String),
    Ward(String),
    Alert(String),
}

#[async_trait]
pub trait StreamConnection: Send {
    /// Next pushed message; `None` once the peer has closed the connection.
    async fn next_message(&mut self) -> Option<Result<StreamMessage, StreamError>>;

    async fn close(&mut self);
}

#[async_trait]
pub trait StreamConnector: Send + Sync {
    /// Open a connection subscribed to the feed's topic and the global
    /// alert topic.
    async fn connect(&self, feed: &Feed) -> Result<Box<dyn StreamConnection>, StreamError>;
}

// ============ STOMP over WebSocket ============

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct StompConnector {
    url: String,
    host: String,
    credentials: Arc<dyn CredentialProvider>,
    handshake_timeout: Duration,
}

impl StompConnector {
    pub fn new(
        url: impl Into<String>,
        host: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            url: url.into(),
            host: host.into(),
            credentials,
            handshake_timeout,
        }
    }
}

#[async_trait]
impl StreamConnector for StompConnector {
    async fn connect(&self, feed: &Feed) -> Result<Box<dyn StreamConnection>, StreamError> {
        let (mut ws, _) = tokio::time::timeout(self.handshake_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| StreamError::Handshake("WebSocket upgrade timed out".to_string()))??;

        let authorization = self.credentials.authorization_header();
        ws.send(Message::Text(Frame::connect(&self.host, authorization.as_deref()).encode()))
            .await?;

        tokio::time::timeout(self.handshake_timeout, await_connected(&mut ws))
            .await
            .map_err(|_| StreamError::Handshake("no CONNECTED frame".to_string()))??;

        let (id, destination) = feed.subscription();
        ws.send(Message::Text(Frame::subscribe(id, &destination).encode()))
            .await?;
        ws.send(Message::Text(Frame::subscribe(ALERTS_SUBSCRIPTION, ALERTS_TOPIC).encode()))
            .await?;

        tracing::debug!(feed = %feed, url = %self.url, "STOMP session established");
        Ok(Box::new(StompConnection {
            ws,
            pending: VecDeque::new(),
        }))
    }
}

async fn await_connected(ws: &mut WsStream) -> Result<(), StreamError> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                for frame in parse_frames(&text)? {
                    match frame.command.as_str() {
                        "CONNECTED" => return Ok(()),
                        "ERROR" => return Err(StreamError::Broker(error_text(&frame))),
                        _ => {}
                    }
                }
            }
            Some(Ok(Message::Close(_))) | None => return Err(StreamError::Closed),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

fn error_text(frame: &Frame) -> String {
    frame
        .get("message")
        .map(str::to_string)
        .unwrap_or_else(|| frame.body.clone())
}

struct StompConnection {
    ws: WsStream,
    /// Frames already read off the socket. A broker error is queued behind
    /// the messages that arrived before it.
    pending: VecDeque<Result<StreamMessage, StreamError>>,
}

impl StompConnection {
    fn route(frame: Frame) -> Option<StreamMessage> {
        let wrap: fn(String) -> StreamMessage = match frame.get("subscription") {
            Some(VITALS_SUBSCRIPTION) => StreamMessage::Vitals,
            Some(WARD_SUBSCRIPTION) => StreamMessage::Ward,
            Some(ALERTS_SUBSCRIPTION) => StreamMessage::Alert,
            _ => match frame.get("destination") {
                Some(ALERTS_TOPIC) => StreamMessage::Alert,
                Some(WARD_TOPIC) => StreamMessage::Ward,
                Some(dest) if dest.starts_with("/topic/vitals/") => StreamMessage::Vitals,
                _ => return None,
            },
        };
        Some(wrap(frame.body))
    }

    fn queue_frames(&mut self, frames: Vec<Frame>) {
        for frame in frames {
            match frame.command.as_str() {
                "MESSAGE" => {
                    if let Some(message) = Self::route(frame) {
                        self.pending.push_back(Ok(message));
                    }
                }
                "ERROR" => {
                    self.pending.push_back(Err(StreamError::Broker(error_text(&frame))));
                    return;
                }
                _ => {}
            }
        }
    }
}

#[async_trait]
impl StreamConnection for StompConnection {
    async fn next_message(&mut self) -> Option<Result<StreamMessage, StreamError>> {
        loop {
            if let Some(next) = self.pending.pop_front() {
                return Some(next);
            }
            match self.ws.next().await? {
                Ok(Message::Text(text)) => match parse_frames(&text) {
                    Ok(frames) => self.queue_frames(frames),
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping unparseable STOMP message");
                        crate::metrics::MESSAGES_REJECTED.with_label_values(&["framing"]).inc();
                    }
                },
                Ok(Message::Close(_)) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.ws.send(Message::Text(Frame::disconnect().encode())).await;
        let _ = self.ws.close(None).await;
    }
}

// ============ In-process broker ============

type Delivery = Result<StreamMessage, StreamError>;

#[derive(Default)]
struct BrokerState {
    connections: Vec<(Feed, mpsc::UnboundedSender<Delivery>)>,
    refuse_next: u32,
    connects: u32,
}

/// In-process broker implementing `StreamConnector`. Clones share state.
#[derive(Clone, Default)]
pub struct ChannelConnector {
    state: Arc<Mutex<BrokerState>>,
}

impl ChannelConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next `n` connection attempts.
    pub fn fail_next_connects(&self, n: u32) {
        if let Ok(mut state) = self.state.lock() {
            state.refuse_next = n;
        }
    }

    /// Successful connections so far.
    pub fn connect_count(&self) -> u32 {
        self.state.lock().map(|s| s.connects).unwrap_or(0)
    }

    /// Connections on `feed` whose receiving side is still open.
    pub fn open_feed_connections(&self, feed: &Feed) -> usize {
        self.state
            .lock()
            .map(|s| {
                s.connections
                    .iter()
                    .filter(|(f, tx)| f == feed && !tx.is_closed())
                    .count()
            })
            .unwrap_or(0)
    }

    /// Open connections for one subject's feed.
    pub fn open_connections(&self, subject: &SubjectId) -> usize {
        self.open_feed_connections(&Feed::Subject(subject.clone()))
    }

    /// Push a vitals body to every open connection for `subject`.
    /// Returns the number of connections it reached.
    pub fn publish_vitals(&self, subject: &SubjectId, body: &str) -> usize {
        self.deliver(
            |feed| matches!(feed, Feed::Subject(s) if s == subject),
            || StreamMessage::Vitals(body.to_string()),
        )
    }

    /// Push a vitals body to every open ward connection.
    pub fn publish_ward(&self, body: &str) -> usize {
        self.deliver(|feed| *feed == Feed::Ward, || StreamMessage::Ward(body.to_string()))
    }

    /// Push an alert body to every open connection.
    pub fn publish_alert(&self, body: &str) -> usize {
        self.deliver(|_| true, || StreamMessage::Alert(body.to_string()))
    }

    /// Fail every connection for `subject` with a transport error.
    pub fn break_connections(&self, subject: &SubjectId) {
        if let Ok(mut state) = self.state.lock() {
            state.connections.retain(|(feed, tx)| {
                if matches!(feed, Feed::Subject(s) if s == subject) {
                    let _ = tx.send(Err(StreamError::Closed));
                    false
                } else {
                    true
                }
            });
        }
    }

    fn deliver(
        &self,
        matches: impl Fn(&Feed) -> bool,
        message: impl Fn() -> StreamMessage,
    ) -> usize {
        let Ok(mut state) = self.state.lock() else {
            return 0;
        };
        state.connections.retain(|(_, tx)| !tx.is_closed());
        state
            .connections
            .iter()
            .filter(|(feed, _)| matches(feed))
            .filter(|(_, tx)| tx.send(Ok(message())).is_ok())
            .count()
    }
}

#[async_trait]
impl StreamConnector for ChannelConnector {
    async fn connect(&self, feed: &Feed) -> Result<Box<dyn StreamConnection>, StreamError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| StreamError::Handshake("broker state poisoned".to_string()))?;
        if state.refuse_next > 0 {
            state.refuse_next -= 1;
            return Err(StreamError::Handshake("connection refused".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.connections.push((feed.clone(), tx));
        state.connects += 1;
        Ok(Box::new(ChannelConnection { rx }))
    }
}

struct ChannelConnection {
    rx: mpsc::UnboundedReceiver<Delivery>,
}

#[async_trait]
impl StreamConnection for ChannelConnection {
    async fn next_message(&mut self) -> Option<Result<StreamMessage, StreamError>> {
        match self.rx.recv().await? {
            // A transport error ends the connection, as a broken socket would.
            Err(e) => {
                self.rx.close();
                Some(Err(e))
            }
            ok => Some(ok),
        }
    }

    async fn close(&mut self) {
        self.rx.close();
    }
}
