//! Stream session lifecycle and polling contract

use std::sync::Arc;

use bytes::Bytes;
use futures::{pin_mut, Stream, StreamExt};
use parking_lot::Mutex;
use reqwest::{header, Client};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use super::parser::{RawFrame, SseParser};
use super::types::{ChangeEvent, EventKind, SessionState, StreamError, StreamResult};
use crate::client::ClientConfig;
use crate::error::remote_error_message;
use crate::types::StatusCell;

/// One active change stream.
///
/// A reader task owns the streaming connection and feeds decoded events into
/// a bounded queue; [`available`](Self::available) probes the queue without
/// blocking and [`read_event`](Self::read_event) drains it. Dropping the
/// session aborts the reader and closes the connection.
pub struct StreamSession {
    path: String,
    rx: mpsc::Receiver<StreamResult<ChangeEvent>>,
    /// One-slot cache so `available()` can probe without consuming
    peeked: Option<StreamResult<ChangeEvent>>,
    state: Arc<Mutex<SessionState>>,
    status: StatusCell,
    reader: JoinHandle<()>,
}

impl StreamSession {
    /// Open the streaming request and spawn the reader task.
    pub(crate) async fn connect(
        http: Client,
        url: Url,
        path: String,
        status: StatusCell,
        config: &ClientConfig,
    ) -> StreamResult<Self> {
        debug!(%url, "opening change stream");

        let response = http
            .get(url)
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await?;

        if !response.status().is_success() {
            let code = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(StreamError::Server {
                status: code,
                message: remote_error_message(code, &body),
            });
        }

        let state = Arc::new(Mutex::new(SessionState::Opening));
        let (tx, rx) = mpsc::channel(config.event_queue);
        let reader = tokio::spawn(read_loop(
            response.bytes_stream(),
            SseParser::with_max_frame_size(config.max_frame_size),
            tx,
            Arc::clone(&state),
        ));

        Ok(Self {
            path,
            rx,
            peeked: None,
            state,
            status,
            reader,
        })
    }

    /// Path this session is streaming
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Non-blocking probe: is an event ready for [`read_event`](Self::read_event)?
    ///
    /// Safe to call arbitrarily often from a cooperative polling loop; two
    /// calls with no intervening bytes return the same answer.
    pub fn available(&mut self) -> bool {
        if self.peeked.is_none() {
            match self.rx.try_recv() {
                Ok(item) => self.peeked = Some(item),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    // Reader already recorded the fault before exiting.
                }
            }
        }
        self.peeked.is_some()
    }

    /// Drain the next change event.
    ///
    /// Returns immediately after `available()` reported true; otherwise waits
    /// for the reader to complete a frame. A payload that fails to decode
    /// surfaces as an [`EventKind::Unknown`] event with the failure recorded
    /// in the operation status, and the session keeps listening.
    pub async fn read_event(&mut self) -> StreamResult<ChangeEvent> {
        let item = match self.peeked.take() {
            Some(item) => item,
            None => match self.rx.recv().await {
                Some(item) => item,
                None => {
                    *self.state.lock() = SessionState::Faulted;
                    self.status.record_err("change stream closed");
                    return Err(StreamError::Closed);
                }
            },
        };

        match item {
            Ok(event) => {
                self.status.record_ok();
                Ok(event)
            }
            Err(StreamError::Decode(message)) => {
                warn!(%message, "undecodable change event");
                self.status.record_err(&message);
                Ok(ChangeEvent {
                    kind: EventKind::Unknown,
                    path: String::new(),
                    data: Value::Null,
                })
            }
            Err(e) => {
                if matches!(e, StreamError::Connection(_) | StreamError::Closed) {
                    *self.state.lock() = SessionState::Faulted;
                }
                self.status.record_err(e.to_string());
                Err(e)
            }
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        // Aborting the reader drops the response and closes the connection.
        self.reader.abort();
    }
}

/// Drive the response bytes through the parser into the event queue.
async fn read_loop<S>(
    byte_stream: S,
    mut parser: SseParser,
    tx: mpsc::Sender<StreamResult<ChangeEvent>>,
    state: Arc<Mutex<SessionState>>,
) where
    S: Stream<Item = reqwest::Result<Bytes>>,
{
    pin_mut!(byte_stream);
    let mut first_chunk = true;

    while let Some(chunk) = byte_stream.next().await {
        match chunk {
            Ok(bytes) => {
                if first_chunk {
                    *state.lock() = SessionState::Listening;
                    first_chunk = false;
                }
                for item in parser.feed(&bytes) {
                    let decoded = item.and_then(decode_frame);
                    if tx.send(decoded).await.is_err() {
                        // Session dropped; nobody is listening.
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "change stream transport failed");
                *state.lock() = SessionState::Faulted;
                let _ = tx.send(Err(StreamError::Connection(e))).await;
                return;
            }
        }
    }

    // Server closed the response.
    *state.lock() = SessionState::Faulted;
    let _ = tx.send(Err(StreamError::Closed)).await;
}

/// Convert a completed wire frame into a structured change event.
///
/// The affected path and its new value for `put`/`patch` are embedded in the
/// JSON payload, not carried at the frame level.
fn decode_frame(frame: RawFrame) -> StreamResult<ChangeEvent> {
    let kind = EventKind::from_wire(&frame.event);
    match kind {
        EventKind::Put | EventKind::Patch => {
            let payload: Value = serde_json::from_str(&frame.data).map_err(|e| {
                StreamError::Decode(format!("{} payload is not valid JSON: {}", frame.event, e))
            })?;
            if !payload.is_object() {
                return Err(StreamError::Decode(format!(
                    "{} payload is not an object: {}",
                    frame.event, payload
                )));
            }
            let path = payload
                .get("path")
                .and_then(Value::as_str)
                .unwrap_or("/")
                .to_string();
            let data = payload.get("data").cloned().unwrap_or(Value::Null);
            Ok(ChangeEvent { kind, path, data })
        }
        EventKind::KeepAlive => Ok(ChangeEvent {
            kind,
            path: String::new(),
            data: Value::Null,
        }),
        // Control frames carry at most a message string.
        EventKind::Cancel | EventKind::AuthRevoked | EventKind::Unknown => {
            let data = if frame.data.is_empty() {
                Value::Null
            } else {
                serde_json::from_str(&frame.data).unwrap_or(Value::String(frame.data))
            };
            Ok(ChangeEvent {
                kind,
                path: String::new(),
                data,
            })
        }
    }
}
