//! Common constants used across the event stream parser.

/// Newline byte
pub(crate) const LF: u8 = b'\n';

/// Record delimiter: an empty line.
pub(crate) const RECORD_DELIMITER: &[u8; 2] = &[LF, LF];

/// Separator between a field name and its value.
pub(crate) const FIELD_SEPARATOR: char = ':';

/// Event type assumed when a record has no `event` field.
pub const MESSAGE_EVENT: &str = "message";
