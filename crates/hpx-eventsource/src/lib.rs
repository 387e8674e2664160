//! # hpx-eventsource
//!
//! Client for Server-Sent Events (`text/event-stream`) over HTTP.
//!
//! This crate turns an open HTTP response into a sequence of discrete
//! messages and hands each one to the observers registered for its event
//! type. Parsing is incremental: network chunks may split messages, lines or
//! UTF-8 sequences anywhere.
//!
//! ## Features
//!
//! - **Incremental Parser**: Blank-line delimited records, split tolerant
//! - **Observer Routing**: Default handler, named listeners and a catch-all
//! - **Explicit Delivery Context**: Observers run on a caller-chosen [`Executor`]
//! - **Resumption State**: `Last-Event-Id` is sent when reopening; `retry` is tracked
//! - **Pluggable Transport**: [`HttpTransport`] by default, any [`Transport`] in tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hpx_eventsource::{EventSource, EventSourceConfig, Message, SerialExecutor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EventSourceConfig::new("https://api.example.com/events");
//!     let source = EventSource::new(config, SerialExecutor::new())?;
//!
//!     source.on_message(|message: &Message| {
//!         println!("{:?}", message.data);
//!     });
//!     source.add_event_listener("price", |message: &Message| {
//!         println!("price update: {:?}", message.data);
//!     });
//!     source.open();
//!
//!     tokio::signal::ctrl_c().await?;
//!     source.close();
//!     Ok(())
//! }
//! ```
//!
//! There is no automatic reconnection. Observe completion, wait
//! [`EventSource::retry_time`], then call [`EventSource::open`] again; the
//! last received event id is sent along.

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod parse;
pub mod transport;

// Re-export commonly used types
pub use client::{EventSource, EventSourceHandle, ReadyState};
pub use config::{DEFAULT_RETRY_TIME, EventSourceConfig};
pub use dispatch::{
    CompleteHandler, Executor, InlineExecutor, MessageHandler, OpenHandler, SerialExecutor, Task,
};
pub use error::{EventSourceError, EventSourceResult};
pub use http::HttpTransport;
pub use parse::{EventSourceParser, Message};
pub use transport::{
    ResponseDisposition, StreamRequest, Transport, TransportDelegate, TransportTask,
};
