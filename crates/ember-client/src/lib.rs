//! emberdb Client Library
//!
//! Provides an HTTP client for emberdb hierarchical JSON stores: one-shot
//! REST verbs (`push`/`set`/`update`/`get`/`remove`) plus a long-lived
//! change-notification stream drained through a non-blocking poll/read pair.
//!
//! # Example
//!
//! ```rust,no_run
//! use ember_client::EmberClient;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ember_client::EmberClientError> {
//!     let mut client = EmberClient::with_auth("https://demo.emberdb.example", "token")?;
//!
//!     // One-shot verbs
//!     let id = client.push("/logs", &json!({"level": "info", "msg": "boot"})).await?;
//!     let entry = client.get(&format!("/logs/{}", id)).await?;
//!     println!("stored: {}", entry);
//!
//!     // Realtime changes under /logs
//!     client.stream("/logs").await?;
//!     loop {
//!         if client.available() {
//!             let event = client.read_event().await?;
//!             println!("{:?} at {}: {}", event.kind, event.path, event.data);
//!         }
//!         // ... other cooperative work between polls ...
//!     }
//! }
//! ```
//!
//! # Status flags
//!
//! Every operation also records a last-operation status, so embedded-style
//! polling loops can check flags instead of matching on errors:
//!
//! ```rust,no_run
//! # use ember_client::EmberClient;
//! # use serde_json::json;
//! # async fn example(client: &EmberClient) {
//! let id = client.push("/readings", &json!(21.5)).await.unwrap_or_default();
//! if client.failed() {
//!     eprintln!("push failed: {}", client.error());
//! }
//! # }
//! ```
//!
//! # Testing
//!
//! The `testing` module provides a [`testing::TestServer`] that serves any
//! axum router on an ephemeral port and hands back a connected client.

mod client;
mod error;
pub mod streaming;
pub mod testing;
mod types;

pub use client::{ClientConfig, EmberClient};
pub use error::{EmberClientError, Result};
pub use types::{OperationStatus, PushResponse};

// Re-export streaming types for convenience
pub use streaming::{ChangeEvent, EventKind, SessionState, StreamError, StreamSession};
