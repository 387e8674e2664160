//! Incremental `text/event-stream` parsing.
//!
//! The parser splits a byte stream into records on the blank-line delimiter
//! and maps each record onto a [`Message`]. It keeps no state besides the
//! unconsumed tail of the stream, so it can be fed chunks of any size.

pub(crate) mod constants;
pub mod message;
pub mod parser;

pub use message::Message;
pub use parser::EventSourceParser;
