//! Frame types and the text encoders for the relay line protocol.
//!
//! Wire format (UTF-8 text lines terminated by `\n`, fields separated by `|`):
//! ```text
//! USER|<name>
//! MSG|<name>: <text>
//! FILE|<fileName>|<size>[|<senderName>]
//! ```
//! A `FILE|` line is immediately followed by exactly `<size>` raw payload
//! bytes with no further framing.
//!
//! Frames are only ever *produced* by [`crate::FrameDecoder`].  Outbound
//! traffic goes through the `encode_*` functions in this module, which refuse
//! any field that would break the line framing on the receiving side.

use thiserror::Error;

/// Prefix of the identify line sent once after connecting.
pub const USER_PREFIX: &str = "USER|";
/// Prefix of a chat line.
pub const MSG_PREFIX: &str = "MSG|";
/// Prefix of a file header line.
pub const FILE_PREFIX: &str = "FILE|";
/// Separator between the fields of a line.
pub const FIELD_SEPARATOR: char = '|';
/// Separator between the sender name and the text of a chat line.
pub const CHAT_SEPARATOR: &str = ": ";
/// Terminator of every text line.
pub const LINE_DELIMITER: u8 = b'\n';

/// Errors raised while serializing an outbound frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// A required field was empty (or whitespace only).
    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },

    /// A field contained `\n` or `\r`, which would split the line on the wire.
    #[error("{field} must not contain line breaks")]
    LineBreak { field: &'static str },

    /// A field contained a character the line format reserves.
    #[error("{field} must not contain '{character}'")]
    ReservedCharacter {
        field: &'static str,
        character: char,
    },
}

/// One decoded protocol unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `USER|<name>`: the sender announces its display name.
    UserAnnounce { name: String },
    /// `MSG|<name>: <text>`: a chat line.
    ChatMessage { sender_name: String, text: String },
    /// `FILE|<fileName>|<size>[|<senderName>]`: start of a file payload.
    FileHeader {
        file_name: String,
        size: u64,
        sender_name: Option<String>,
    },
    /// A slice of the raw payload that follows a file header.
    BinaryChunk { bytes: Vec<u8> },
    /// Any line that is not a well-formed frame, kept verbatim.
    Unknown { raw: String },
}

impl Frame {
    /// Classifies one complete text line (delimiter already removed).
    ///
    /// Returns `None` for blank lines.
    pub(crate) fn from_line(line: &str) -> Option<Self> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.trim().is_empty() {
            return None;
        }

        let parsed = if let Some(rest) = line.strip_prefix(USER_PREFIX) {
            parse_user(rest)
        } else if let Some(rest) = line.strip_prefix(MSG_PREFIX) {
            parse_chat(rest)
        } else if let Some(rest) = line.strip_prefix(FILE_PREFIX) {
            parse_file_header(rest)
        } else {
            None
        };

        Some(parsed.unwrap_or_else(|| Frame::Unknown {
            raw: line.to_string(),
        }))
    }

    /// Short variant name for log output.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::UserAnnounce { .. } => "user",
            Frame::ChatMessage { .. } => "chat",
            Frame::FileHeader { .. } => "file-header",
            Frame::BinaryChunk { .. } => "binary-chunk",
            Frame::Unknown { .. } => "unknown",
        }
    }
}

fn parse_user(rest: &str) -> Option<Frame> {
    let name = rest.trim();
    if name.is_empty() {
        return None;
    }
    Some(Frame::UserAnnounce {
        name: name.to_string(),
    })
}

fn parse_chat(rest: &str) -> Option<Frame> {
    let (sender_name, text) = rest.split_once(CHAT_SEPARATOR)?;
    let sender_name = sender_name.trim();
    if sender_name.is_empty() {
        return None;
    }
    Some(Frame::ChatMessage {
        sender_name: sender_name.to_string(),
        text: text.to_string(),
    })
}

fn parse_file_header(rest: &str) -> Option<Frame> {
    let fields: Vec<&str> = rest.split(FIELD_SEPARATOR).collect();
    let (file_name, size, sender_name) = match fields.as_slice() {
        [file_name, size] => (*file_name, *size, None),
        [file_name, size, sender] => {
            let sender = sender.trim();
            (*file_name, *size, (!sender.is_empty()).then(|| sender.to_string()))
        }
        _ => return None,
    };

    if file_name.trim().is_empty() {
        return None;
    }
    let size = size.trim().parse::<u64>().ok()?;

    Some(Frame::FileHeader {
        file_name: file_name.to_string(),
        size,
        sender_name,
    })
}

// ── Encoders ──────────────────────────────────────────────────────────────────

/// Checks that `name` can be used as a display name on the wire.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the name is empty, contains a line break, or
/// contains `|` or `:` (both are field separators in the line format).
pub fn validate_display_name(name: &str) -> Result<(), ProtocolError> {
    require_non_empty(name, "display name")?;
    require_single_line(name, "display name")?;
    forbid_char(name, "display name", FIELD_SEPARATOR)?;
    forbid_char(name, "display name", ':')
}

/// Encodes `USER|<name>\n`.
///
/// # Errors
///
/// Returns [`ProtocolError`] if `name` fails [`validate_display_name`].
pub fn encode_user(name: &str) -> Result<Vec<u8>, ProtocolError> {
    validate_display_name(name)?;
    Ok(finish_line(format!("{USER_PREFIX}{name}")))
}

/// Encodes `MSG|<sender>: <text>\n`.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the sender name is invalid or the text is
/// empty or spans more than one line.
///
/// # Examples
///
/// ```rust
/// use relay_core::encode_chat;
///
/// let line = encode_chat("Alice", "hi").unwrap();
/// assert_eq!(line, b"MSG|Alice: hi\n");
/// ```
pub fn encode_chat(sender_name: &str, text: &str) -> Result<Vec<u8>, ProtocolError> {
    validate_display_name(sender_name)?;
    require_non_empty(text, "message text")?;
    require_single_line(text, "message text")?;
    Ok(finish_line(format!(
        "{MSG_PREFIX}{sender_name}{CHAT_SEPARATOR}{text}"
    )))
}

/// Encodes `FILE|<fileName>|<size>[|<senderName>]\n`.
///
/// The caller must follow the header with exactly `size` payload bytes.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the file name or sender name cannot be
/// carried in a single header line.
pub fn encode_file_header(
    file_name: &str,
    size: u64,
    sender_name: Option<&str>,
) -> Result<Vec<u8>, ProtocolError> {
    require_non_empty(file_name, "file name")?;
    require_single_line(file_name, "file name")?;
    forbid_char(file_name, "file name", FIELD_SEPARATOR)?;

    let line = match sender_name {
        Some(sender) => {
            validate_display_name(sender)?;
            format!("{FILE_PREFIX}{file_name}{FIELD_SEPARATOR}{size}{FIELD_SEPARATOR}{sender}")
        }
        None => format!("{FILE_PREFIX}{file_name}{FIELD_SEPARATOR}{size}"),
    };
    Ok(finish_line(line))
}

/// Encodes a free-form notice line (e.g. `Alice left.`).
///
/// Receivers decode it as [`Frame::Unknown`] and show it verbatim.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the text is empty or spans more than one line.
pub fn encode_notice(text: &str) -> Result<Vec<u8>, ProtocolError> {
    require_non_empty(text, "notice")?;
    require_single_line(text, "notice")?;
    Ok(finish_line(text.to_string()))
}

fn finish_line(mut line: String) -> Vec<u8> {
    line.push(LINE_DELIMITER as char);
    line.into_bytes()
}

fn require_non_empty(value: &str, field: &'static str) -> Result<(), ProtocolError> {
    if value.trim().is_empty() {
        return Err(ProtocolError::EmptyField { field });
    }
    Ok(())
}

fn require_single_line(value: &str, field: &'static str) -> Result<(), ProtocolError> {
    if value.contains(['\n', '\r']) {
        return Err(ProtocolError::LineBreak { field });
    }
    Ok(())
}

fn forbid_char(value: &str, field: &'static str, character: char) -> Result<(), ProtocolError> {
    if value.contains(character) {
        return Err(ProtocolError::ReservedCharacter { field, character });
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
