//! Generic key/value messages exchanged with the switch.
//!
//! Every inbound block becomes a [`Message`]: an ordered header mapping with
//! case-insensitive keys, the payload lines that carried no header, and the
//! raw text as received. Messages are immutable once parsed.

mod parser;

use std::fmt;

use thiserror::Error;

pub(crate) use self::parser::parse_block;

/// Header carrying the name of a response.
pub const RESPONSE_HEADER: &str = "Response";
/// Header carrying the name of an event.
pub const EVENT_HEADER: &str = "Event";
/// Header carrying the correlation identifier.
pub const ACTION_ID_HEADER: &str = "ActionID";
/// Name given to a correlated message that carries neither a response nor an
/// event header.
pub const GENERIC_RESPONSE: &str = "Generic Response";
/// Name given to an uncorrelated message that carries neither a response nor
/// an event header.
pub const GENERIC_EVENT: &str = "Generic Event";

#[derive(Debug, Clone, PartialEq, Eq)]
struct HeaderEntry {
    name: String,
    values: Vec<String>,
}

/// Ordered header mapping with case-insensitive keys.
///
/// Repeated keys accumulate their values in arrival order under the spelling
/// seen first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<HeaderEntry>,
}

impl Headers {
    /// Creates an empty mapping.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Appends `value` under `name`, after any values already present.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|entry| entry.name.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.values.push(value),
            None => self.entries.push(HeaderEntry {
                name,
                values: vec![value],
            }),
        }
    }

    /// First value stored under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    /// Every value stored under `name`, in arrival order.
    #[must_use]
    pub fn get_all(&self, name: &str) -> &[String] {
        self.entries
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
            .map_or(&[], |entry| entry.values.as_slice())
    }

    /// Returns `true` when `name` is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.name.eq_ignore_ascii_case(name))
    }

    /// Iterates over distinct keys and their values in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|entry| (entry.name.as_str(), entry.values.as_slice()))
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no header is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

/// Classification of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// Carries a response header, or a correlation id and no event header.
    Response(String),
    /// Carries an event header, or neither header nor correlation id.
    Event(String),
}

/// One parsed protocol block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    headers: Headers,
    payload: Vec<String>,
    raw: Vec<String>,
    kind: MessageKind,
}

impl Message {
    /// Builds a message from headers and payload lines, rendering the raw
    /// text as it would appear on the wire.
    #[must_use]
    pub fn new(headers: Headers, payload: Vec<String>) -> Self {
        let mut raw = Vec::with_capacity(headers.len() + payload.len());
        for (name, values) in headers.iter() {
            raw.extend(values.iter().map(|value| format!("{name}: {value}")));
        }
        raw.extend(payload.iter().cloned());
        Self::from_parts(headers, payload, raw)
    }

    pub(crate) fn from_parts(headers: Headers, payload: Vec<String>, raw: Vec<String>) -> Self {
        let kind = classify(&headers);
        Self {
            headers,
            payload,
            raw,
            kind,
        }
    }

    /// Header mapping.
    #[must_use]
    pub const fn headers(&self) -> &Headers {
        &self.headers
    }

    /// First value of header `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Lines that carried no header, in arrival order.
    #[must_use]
    pub fn payload(&self) -> &[String] {
        &self.payload
    }

    /// The block's lines as received, without line terminators.
    #[must_use]
    pub fn raw_lines(&self) -> &[String] {
        &self.raw
    }

    /// Response or event classification.
    #[must_use]
    pub const fn kind(&self) -> &MessageKind {
        &self.kind
    }

    /// Response or event name, including the generic sentinels.
    #[must_use]
    pub fn name(&self) -> &str {
        match &self.kind {
            MessageKind::Response(name) | MessageKind::Event(name) => name,
        }
    }

    /// Correlation identifier, if any.
    #[must_use]
    pub fn action_id(&self) -> Option<&str> {
        self.headers.get(ACTION_ID_HEADER)
    }

    /// Returns `true` for responses.
    #[must_use]
    pub const fn is_response(&self) -> bool {
        matches!(self.kind, MessageKind::Response(_))
    }

    /// Returns `true` for events.
    #[must_use]
    pub const fn is_event(&self) -> bool {
        matches!(self.kind, MessageKind::Event(_))
    }
}

fn classify(headers: &Headers) -> MessageKind {
    if let Some(name) = headers.get(RESPONSE_HEADER) {
        MessageKind::Response(name.to_owned())
    } else if let Some(name) = headers.get(EVENT_HEADER) {
        MessageKind::Event(name.to_owned())
    } else if headers.contains(ACTION_ID_HEADER) {
        MessageKind::Response(GENERIC_RESPONSE.to_owned())
    } else {
        MessageKind::Event(GENERIC_EVENT.to_owned())
    }
}

/// Conversion from a generic message into a typed schema object.
///
/// Implemented by action and event catalogs outside this crate.
pub trait FromMessage: Sized {
    /// Error raised when the message does not fit the schema.
    type Error;

    /// Builds the typed value from `message`.
    ///
    /// # Errors
    ///
    /// Returns the implementation's error when required fields are missing or
    /// malformed.
    fn from_message(message: &Message) -> Result<Self, Self::Error>;
}

/// Why a block could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolErrorKind {
    /// A line was not valid UTF-8.
    #[error("line {line} is not valid UTF-8")]
    InvalidUtf8 {
        /// Zero-based index of the offending line.
        line: usize,
    },
    /// A header line had nothing before its colon.
    #[error("line {line} has an empty header name")]
    EmptyKey {
        /// Zero-based index of the offending line.
        line: usize,
    },
}

/// A block that could not be parsed, kept verbatim for fallback handlers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed block: {kind}")]
pub struct ProtocolError {
    kind: ProtocolErrorKind,
    raw: Vec<String>,
}

impl ProtocolError {
    pub(crate) const fn new(kind: ProtocolErrorKind, raw: Vec<String>) -> Self {
        Self { kind, raw }
    }

    /// What was wrong with the block.
    #[must_use]
    pub const fn kind(&self) -> &ProtocolErrorKind {
        &self.kind
    }

    /// The block's lines, with invalid UTF-8 replaced.
    #[must_use]
    pub fn raw_lines(&self) -> &[String] {
        &self.raw
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Response(name) => write!(formatter, "response '{name}'"),
            Self::Event(name) => write!(formatter, "event '{name}'"),
        }
    }
}
