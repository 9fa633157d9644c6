//! Turns raw line blocks into [`Message`] values.

use super::{Headers, Message, ProtocolError, ProtocolErrorKind};
use crate::transport::RawBlock;

/// Parses one block.
///
/// Each line is split on its first colon; both halves are trimmed. Lines
/// without a colon, and LF-terminated lines inside a command output block,
/// become payload.
pub(crate) fn parse_block(block: RawBlock) -> Result<Message, ProtocolError> {
    let mut headers = Headers::new();
    let mut payload = Vec::new();
    let mut raw = Vec::with_capacity(block.lines.len());

    let mut failure = None;
    for (index, line) in block.lines.iter().enumerate() {
        let text = match std::str::from_utf8(&line.bytes) {
            Ok(text) => text,
            Err(_) => {
                failure.get_or_insert(ProtocolErrorKind::InvalidUtf8 { line: index });
                raw.push(String::from_utf8_lossy(&line.bytes).into_owned());
                continue;
            }
        };
        raw.push(text.to_owned());
        if failure.is_some() {
            continue;
        }

        if block.follows && line.bare_lf {
            payload.push(text.to_owned());
            continue;
        }
        match text.split_once(':') {
            Some((key, value)) => {
                let key = key.trim();
                if key.is_empty() {
                    failure = Some(ProtocolErrorKind::EmptyKey { line: index });
                    continue;
                }
                headers.append(key, value.trim());
            }
            None => payload.push(text.to_owned()),
        }
    }

    match failure {
        Some(kind) => Err(ProtocolError::new(kind, raw)),
        None => Ok(Message::from_parts(headers, payload, raw)),
    }
}
