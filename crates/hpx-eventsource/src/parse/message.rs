//! Event records and the field grammar they are built from.

use std::time::Duration;

use super::constants::{FIELD_SEPARATOR, LF, MESSAGE_EVENT};

/// A single record decoded from an event stream.
///
/// Every field is optional. A record without any recognised field line is
/// still a valid, empty message. Repeated fields within one record are joined
/// with `'\n'` in line order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Message {
    /// The `event` field: the name observers are routed by.
    pub event: Option<String>,
    /// The `id` field: the resumption token for `Last-Event-Id`.
    pub id: Option<String>,
    /// The `data` field payload.
    pub data: Option<String>,
    /// The `retry` field, in milliseconds, as sent by the server.
    pub retry: Option<String>,
}

impl Message {
    /// Parse one raw record (the text between two delimiters).
    pub fn parse(record: &str) -> Self {
        let mut message = Self::default();
        for field in record.split(char::from(LF)).filter_map(Field::parse) {
            let slot = match field.name {
                FieldName::Event => &mut message.event,
                FieldName::Id => &mut message.id,
                FieldName::Data => &mut message.data,
                FieldName::Retry => &mut message.retry,
            };
            append_value(slot, field.value);
        }
        message
    }

    /// Event type this message is routed as; `"message"` when unnamed.
    pub fn event_type(&self) -> &str {
        self.event.as_deref().unwrap_or(MESSAGE_EVENT)
    }

    /// Returns `true` if the default message handler receives this message.
    pub fn is_default_event(&self) -> bool {
        self.event.as_deref().is_none_or(|event| event == MESSAGE_EVENT)
    }

    /// Returns `true` if no field was recognised in the record.
    pub fn is_empty(&self) -> bool {
        self.event.is_none() && self.id.is_none() && self.data.is_none() && self.retry.is_none()
    }

    /// The reconnection delay advertised by `retry`, if it is a
    /// non-negative number of milliseconds.
    pub fn retry_duration(&self) -> Option<Duration> {
        let millis: f64 = self.retry.as_deref()?.trim().parse().ok()?;
        if millis < 0.0 {
            return None;
        }
        Duration::try_from_secs_f64(millis / 1000.0).ok()
    }
}

fn append_value(slot: &mut Option<String>, value: &str) {
    match slot {
        Some(existing) => {
            existing.push(char::from(LF));
            existing.push_str(value);
        }
        None => *slot = Some(value.to_owned()),
    }
}

/// Field names that map onto [`Message`] members. Anything else is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FieldName {
    Event,
    Id,
    Data,
    Retry,
}

impl FieldName {
    fn from_key(key: &str) -> Option<Self> {
        match key {
            "event" => Some(Self::Event),
            "id" => Some(Self::Id),
            "data" => Some(Self::Data),
            "retry" => Some(Self::Retry),
            _ => None,
        }
    }
}

/// A recognised `<key>:<value>` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Field<'a> {
    pub(crate) name: FieldName,
    pub(crate) value: &'a str,
}

impl<'a> Field<'a> {
    /// Parse one line of a record.
    ///
    /// Whitespace in front of the key and directly after the colon is
    /// skipped; the key must then match exactly, and the rest of the line is
    /// the value. Lines without a colon, with an unknown key, or with an
    /// empty value yield `None`. Comment lines (`:` first) fall out as an
    /// empty key.
    pub(crate) fn parse(line: &'a str) -> Option<Self> {
        let line = line.trim_start();
        let (key, value) = line.split_once(FIELD_SEPARATOR)?;
        let name = FieldName::from_key(key)?;
        let value = value.trim_start();
        if value.is_empty() {
            return None;
        }
        Some(Self { name, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_and_data() {
        let message = Message::parse("event: foo\ndata: bar");
        assert_eq!(message.event.as_deref(), Some("foo"));
        assert_eq!(message.data.as_deref(), Some("bar"));
        assert!(message.id.is_none());
        assert!(message.retry.is_none());
    }

    #[test]
    fn test_repeated_fields_concatenate_in_order() {
        let message = Message::parse("data: part1\ndata: part2");
        assert_eq!(message.data.as_deref(), Some("part1\npart2"));

        let message = Message::parse("id:a\nevent:x\nid:b\nevent:y");
        assert_eq!(message.id.as_deref(), Some("a\nb"));
        assert_eq!(message.event.as_deref(), Some("x\ny"));
    }

    #[test]
    fn test_unrecognised_lines_are_dropped() {
        let message = Message::parse("garbage-no-colon");
        assert!(message.is_empty());

        let message = Message::parse(": keep-alive comment\nfoo: bar\nDATA: loud\ndata : spaced");
        assert!(message.is_empty());
    }

    #[test]
    fn test_value_keeps_everything_after_first_colon() {
        let message = Message::parse("data: {\"a\":1}\ndata:http://x:80/");
        assert_eq!(message.data.as_deref(), Some("{\"a\":1}\nhttp://x:80/"));
    }

    #[test]
    fn test_whitespace_handling() {
        let message = Message::parse("  data:\t value with  inner  space \r");
        assert_eq!(message.data.as_deref(), Some("value with  inner  space \r"));

        // Nothing but whitespace after the colon: the line carries no value.
        let message = Message::parse("data:\ndata:   \nid:");
        assert!(message.is_empty());
    }

    #[test]
    fn test_event_type() {
        assert_eq!(Message::parse("data:x").event_type(), "message");
        assert_eq!(Message::parse("event:tick").event_type(), "tick");
    }

    #[test]
    fn test_is_default_event() {
        assert!(Message::parse("data:x").is_default_event());
        assert!(Message::parse("event:message").is_default_event());
        assert!(!Message::parse("event:tick").is_default_event());
        assert!(Message::default().is_default_event());
    }

    #[test]
    fn test_retry_duration() {
        assert_eq!(
            Message::parse("retry: 5000").retry_duration(),
            Some(Duration::from_secs(5))
        );
        assert_eq!(
            Message::parse("retry:250").retry_duration(),
            Some(Duration::from_millis(250))
        );
        assert_eq!(
            Message::parse("retry:0").retry_duration(),
            Some(Duration::ZERO)
        );
        assert_eq!(Message::parse("retry:-1").retry_duration(), None);
        assert_eq!(Message::parse("retry:soon").retry_duration(), None);
        assert_eq!(Message::parse("retry:1\nretry:2").retry_duration(), None);
        assert_eq!(Message::parse("data:x").retry_duration(), None);
    }

    #[test]
    fn test_field_parse() {
        assert_eq!(
            Field::parse("id: 42"),
            Some(Field {
                name: FieldName::Id,
                value: "42"
            })
        );
        assert_eq!(Field::parse("id"), None);
        assert_eq!(Field::parse(":id: 42"), None);
        assert_eq!(Field::parse("Id: 42"), None);
    }
}
