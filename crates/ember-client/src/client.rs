//! emberdb HTTP client implementation

use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::instrument;
use url::Url;

use crate::error::{remote_error_message, EmberClientError, Result};
use crate::streaming::{ChangeEvent, SessionState, StreamSession, DEFAULT_MAX_FRAME_SIZE};
use crate::types::{OperationStatus, PushResponse, StatusCell};

/// Default request timeout for one-shot verbs
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default connection timeout
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default depth of the decoded change-event queue
const DEFAULT_EVENT_QUEUE: usize = 32;

/// Tunables for a client instance
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Per-request timeout for one-shot verbs; the streaming request is
    /// exempt so an idle stream can outlive it
    pub request_timeout: Duration,
    /// Timeout for establishing a connection
    pub connect_timeout: Duration,
    /// Upper bound on a single stream frame; oversized frames are dropped
    /// and reported rather than truncated
    pub max_frame_size: usize,
    /// Depth of the decoded change-event queue
    pub event_queue: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            event_queue: DEFAULT_EVENT_QUEUE,
        }
    }
}

/// Client for an emberdb hierarchical store.
///
/// Provides the one-shot verbs (`push`/`set`/`update`/`get`/`remove`) and the
/// realtime change stream (`stream`/`available`/`read_event`). Every
/// operation returns a `Result` and also records the last-operation status
/// queried via [`success`](Self::success) / [`failed`](Self::failed) /
/// [`error`](Self::error), so polling-style callers can check flags instead
/// of matching errors.
pub struct EmberClient {
    http: Client,
    base_url: Url,
    auth: Option<String>,
    config: ClientConfig,
    status: StatusCell,
    session: Option<StreamSession>,
}

impl EmberClient {
    /// Create a new client for the store at `base_url`
    /// (e.g., "https://demo-app.emberdb.example").
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_config(base_url, ClientConfig::default())
    }

    /// Create a client that authenticates every request with `auth`.
    ///
    /// The credential is sent as the store's `auth` query parameter.
    pub fn with_auth(base_url: &str, auth: &str) -> Result<Self> {
        let mut client = Self::with_config(base_url, ClientConfig::default())?;
        client.auth = Some(auth.to_string());
        Ok(client)
    }

    /// Create a client with explicit configuration
    pub fn with_config(base_url: &str, config: ClientConfig) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        let base_url = Url::parse(base_url)?;

        Ok(Self {
            http,
            base_url,
            auth: None,
            config,
            status: StatusCell::default(),
            session: None,
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Get a reference to the underlying HTTP client
    pub fn http_client(&self) -> &Client {
        &self.http
    }

    // =========================================================================
    // One-shot verbs
    // =========================================================================

    /// Append `value` to the list at `path`; returns the generated child name.
    ///
    /// Non-empty on success; check [`failed`](Self::failed) otherwise.
    #[instrument(skip(self, value))]
    pub async fn push<T: Serialize + ?Sized>(&self, path: &str, value: &T) -> Result<String> {
        let result = self.push_inner(path, value).await;
        self.record(result)
    }

    async fn push_inner<T: Serialize + ?Sized>(&self, path: &str, value: &T) -> Result<String> {
        let url = self.url_for(path)?;
        let response = self
            .http
            .post(url)
            .timeout(self.config.request_timeout)
            .json(value)
            .send()
            .await?;

        let created: PushResponse = self.handle_response(response).await?;
        Ok(created.name)
    }

    /// Write `value` at `path`, replacing whatever was stored there
    #[instrument(skip(self, value))]
    pub async fn set<T: Serialize + ?Sized>(&self, path: &str, value: &T) -> Result<()> {
        let result = self.write(Method::PUT, path, value).await;
        self.record(result)
    }

    /// Merge the children of `value` into the node at `path`
    #[instrument(skip(self, value))]
    pub async fn update<T: Serialize + ?Sized>(&self, path: &str, value: &T) -> Result<()> {
        let result = self.write(Method::PATCH, path, value).await;
        self.record(result)
    }

    async fn write<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        value: &T,
    ) -> Result<()> {
        let url = self.url_for(path)?;
        let response = self
            .http
            .request(method, url)
            .timeout(self.config.request_timeout)
            .json(value)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(self.extract_error(response, status).await)
        }
    }

    /// Read the value at `path`.
    ///
    /// JSON null is the store's "no data at this path" value.
    #[instrument(skip(self))]
    pub async fn get(&self, path: &str) -> Result<Value> {
        let result = self.get_inner(path).await;
        self.record(result)
    }

    /// Read the value at `path` into a concrete type
    #[instrument(skip(self))]
    pub async fn get_typed<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let result = match self.get_inner(path).await {
            Ok(value) => {
                serde_json::from_value(value).map_err(|e| EmberClientError::Decode(e.to_string()))
            }
            Err(e) => Err(e),
        };
        self.record(result)
    }

    async fn get_inner(&self, path: &str) -> Result<Value> {
        let url = self.url_for(path)?;
        let response = self
            .http
            .get(url)
            .timeout(self.config.request_timeout)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Delete the node at `path`, including all of its children
    #[instrument(skip(self))]
    pub async fn remove(&self, path: &str) -> Result<()> {
        let result = self.remove_inner(path).await;
        self.record(result)
    }

    async fn remove_inner(&self, path: &str) -> Result<()> {
        let url = self.url_for(path)?;
        let response = self
            .http
            .delete(url)
            .timeout(self.config.request_timeout)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(self.extract_error(response, status).await)
        }
    }

    // =========================================================================
    // Change stream
    // =========================================================================

    /// Start streaming changes made under `path`, including its children.
    ///
    /// Replaces any stream already open on this client; the previous
    /// connection is closed first. Poll [`available`](Self::available) and
    /// drain with [`read_event`](Self::read_event) afterwards. There is no
    /// automatic reconnect: after a fault, call this again.
    #[instrument(skip(self))]
    pub async fn stream(&mut self, path: &str) -> Result<()> {
        self.session = None;
        let session = self.open_stream(path).await?;
        self.session = Some(session);
        Ok(())
    }

    /// Open a change stream on `path` owned by the caller.
    ///
    /// Unlike [`stream`](Self::stream), the session is returned instead of
    /// held by the client; its events still record into this client's
    /// operation status.
    pub async fn open_stream(&self, path: &str) -> Result<StreamSession> {
        let result = async {
            let url = self.url_for(path)?;
            StreamSession::connect(
                self.http.clone(),
                url,
                path.to_string(),
                self.status.clone(),
                &self.config,
            )
            .await
            .map_err(EmberClientError::from)
        }
        .await;
        self.record(result)
    }

    /// Non-blocking check for a ready change event on the open stream.
    ///
    /// Always false while no stream is open. Idempotent and cheap; intended
    /// for a cooperative polling loop.
    pub fn available(&mut self) -> bool {
        self.session.as_mut().is_some_and(StreamSession::available)
    }

    /// Drain the next change event from the open stream.
    ///
    /// Returns immediately after [`available`](Self::available) reported
    /// true; otherwise waits for the next complete frame.
    pub async fn read_event(&mut self) -> Result<ChangeEvent> {
        let Some(session) = self.session.as_mut() else {
            self.status.record_err("no stream is open");
            return Err(EmberClientError::NoStream);
        };
        session.read_event().await.map_err(EmberClientError::from)
    }

    /// Lifecycle state of the held stream session
    pub fn stream_state(&self) -> SessionState {
        self.session
            .as_ref()
            .map_or(SessionState::Closed, StreamSession::state)
    }

    // =========================================================================
    // Last-operation status
    // =========================================================================

    /// Whether the last operation succeeded
    pub fn success(&self) -> bool {
        self.status.snapshot().succeeded
    }

    /// Whether the last operation failed
    pub fn failed(&self) -> bool {
        !self.status.snapshot().succeeded
    }

    /// Error message from the last operation when [`failed`](Self::failed)
    /// is true; empty otherwise
    pub fn error(&self) -> String {
        self.status.snapshot().message
    }

    /// Snapshot of the last-operation status
    pub fn last_status(&self) -> OperationStatus {
        self.status.snapshot()
    }

    // =========================================================================
    // Helper Methods
    // =========================================================================

    /// Translate a root-relative node path into its transport URL.
    ///
    /// The transport addresses nodes as `<path>.json` with the credential in
    /// the `auth` query parameter; callers never deal with either.
    fn url_for(&self, path: &str) -> Result<Url> {
        let node = path.trim_matches('/');
        let mut url = if node.is_empty() {
            self.base_url.join("/.json")?
        } else {
            self.base_url.join(&format!("/{}.json", node))?
        };
        if let Some(auth) = &self.auth {
            url.query_pairs_mut().append_pair("auth", auth);
        }
        Ok(url)
    }

    /// Record the operation outcome into the shared status cell
    fn record<T>(&self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.status.record_ok(),
            Err(e) => self.status.record_err(e.to_string()),
        }
        result
    }

    /// Handle a verb response and deserialize its JSON body
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| EmberClientError::Decode(e.to_string()))
        } else {
            Err(self.extract_error(response, status).await)
        }
    }

    /// Extract the remote error message from a failed response
    async fn extract_error(
        &self,
        response: reqwest::Response,
        status: StatusCode,
    ) -> EmberClientError {
        let body = response.text().await.unwrap_or_default();
        EmberClientError::remote(status.as_u16(), remote_error_message(status.as_u16(), &body))
    }
}
