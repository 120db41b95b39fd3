//! Realtime change streaming
//!
//! Opens a persistent HTTP response on a store path and incrementally parses
//! the event-stream framing into structured [`ChangeEvent`]s, exposed through
//! a non-blocking poll/drain pair.
//!
//! # Example
//!
//! ```no_run
//! use ember_client::{EmberClient, EventKind};
//!
//! # async fn example() -> Result<(), ember_client::EmberClientError> {
//! let mut client = EmberClient::new("https://store.example.com")?;
//! client.stream("/sensors").await?;
//!
//! loop {
//!     if client.available() {
//!         let event = client.read_event().await?;
//!         match event.kind {
//!             EventKind::Put | EventKind::Patch => {
//!                 println!("{} changed: {}", event.path, event.data);
//!             }
//!             EventKind::KeepAlive => {}
//!             _ => break,
//!         }
//!     }
//!     // ... other cooperative work between polls ...
//! }
//! # Ok(())
//! # }
//! ```

mod parser;
mod session;
mod types;

pub use parser::{FrameResult, RawFrame, SseParser, DEFAULT_MAX_FRAME_SIZE};
pub use session::StreamSession;
pub use types::{ChangeEvent, EventKind, SessionState, StreamError, StreamResult};
