use crate::token::Position;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the parsing pipeline.
///
/// Every parse-time error is fatal: once one is returned, the pipeline emits
/// no further tokens or records. Size-limit errors report both the attempted
/// size and the configured cap. `source_label` is the user-supplied input
/// label (a file name, URL, ...) carried for error messages.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unterminated quoted field observed at flush.
    #[error("{}", format_error(format!("Unexpected EOF while parsing quoted field at row {row}{}", format_position(position)), source_label.as_deref()))]
    UnexpectedEof {
        row: usize,
        position: Option<Position>,
        source_label: Option<String>,
    },

    /// Malformed input detected by the record assembler.
    #[error("{}", format_error(format!("Parse error at row {row}: {message}"), source_label.as_deref()))]
    Parse {
        message: String,
        row: usize,
        source_label: Option<String>,
    },

    /// Retained lexer buffer grew past `max_buffer_size`.
    #[error("{}", format_error(format!("Buffer size ({size} bytes) exceeds maximum allowed size ({limit} bytes)"), source_label.as_deref()))]
    BufferOverflow {
        size: usize,
        limit: usize,
        source_label: Option<String>,
    },

    /// A single field's decoded value grew past `max_field_size`.
    #[error("{}", format_error(format!("Field size ({size} bytes) exceeds maximum allowed size ({limit} bytes) at row {row}"), source_label.as_deref()))]
    FieldTooLarge {
        size: usize,
        limit: usize,
        row: usize,
        source_label: Option<String>,
    },

    /// A record accumulated more than `max_field_count` fields.
    #[error("{}", format_error(format!("Field count limit exceeded at row {row}: maximum {limit} fields allowed per record"), source_label.as_deref()))]
    FieldCountExceeded {
        limit: usize,
        row: usize,
        source_label: Option<String>,
    },

    /// One-shot binary input is larger than `max_binary_size`.
    #[error("{}", format_error(format!("Input size ({size} bytes) exceeds maximum allowed size ({limit} bytes)"), source_label.as_deref()))]
    BinaryTooLarge {
        size: usize,
        limit: usize,
        source_label: Option<String>,
    },

    /// Charset label not recognized by the Encoding Standard.
    #[error("unsupported charset {label:?}")]
    InvalidCharset { label: String },

    /// Non-decodable byte sequence under `fatal: true`.
    #[error("{}", format_error(format!("Failed to decode input as {charset}"), source_label.as_deref()))]
    Decode {
        charset: String,
        source_label: Option<String>,
    },

    /// Decompression transform failed on the underlying byte stream.
    #[error("decompression failed: {0}")]
    Decompress(String),

    /// I/O failure on a streamed input.
    #[error("I/O error while reading input: {0}")]
    Io(#[from] std::io::Error),

    /// No (backend, context) combination satisfied the plan in strict mode.
    #[error("engine unavailable: {reason}")]
    EngineUnavailable { reason: String },

    /// The cancellation signal was observed between tokens or records.
    #[error("{}", format_error("Parse cancelled".to_string(), source_label.as_deref()))]
    Cancelled { source_label: Option<String> },

    /// Record serialization failed in the JSON output path.
    #[error("failed to serialize records: {0}")]
    Json(#[from] serde_json::Error),

    /// Rejected configuration (overlapping delimiter/quotation, illegal
    /// strategy/shape combination, zero-sized limits, ...).
    #[error("invalid option: {0}")]
    InvalidOption(String),
}

impl Error {
    /// Row number the error is scoped to, where one is defined.
    pub fn row(&self) -> Option<usize> {
        match self {
            Error::UnexpectedEof { row, .. }
            | Error::Parse { row, .. }
            | Error::FieldTooLarge { row, .. }
            | Error::FieldCountExceeded { row, .. } => Some(*row),
            _ => None,
        }
    }

    /// Position in the input, when the lexer knows it.
    pub fn position(&self) -> Option<Position> {
        match self {
            Error::UnexpectedEof { position, .. } => *position,
            _ => None,
        }
    }

    /// True for guard violations (the `RangeError` class of failures).
    pub fn is_limit(&self) -> bool {
        matches!(
            self,
            Error::BufferOverflow { .. }
                | Error::FieldTooLarge { .. }
                | Error::FieldCountExceeded { .. }
                | Error::BinaryTooLarge { .. }
        )
    }
}

/// Format error message with optional source information
pub(crate) fn format_error(message: String, source: Option<&str>) -> String {
    match source {
        Some(src) => format!("{} in \"{}\"", message, src),
        None => message,
    }
}

fn format_position(position: &Option<Position>) -> String {
    match position {
        Some(p) => format!(" (line {}, column {})", p.line, p.column),
        None => String::new(),
    }
}
