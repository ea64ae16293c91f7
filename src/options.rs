use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default retained-buffer cap: 10 MiB of UTF-8 text.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 10 * 1024 * 1024;
/// Default per-field cap on the decoded value.
pub const DEFAULT_MAX_FIELD_SIZE: usize = 10 * 1024 * 1024;
/// Default cap on fields per record.
pub const DEFAULT_MAX_FIELD_COUNT: usize = 10_000;
/// Default cap on one-shot binary input.
pub const DEFAULT_MAX_BINARY_SIZE: usize = 100 * 1024 * 1024;

/// Passing this for any limit disables the cap.
pub const UNLIMITED: usize = usize::MAX;

/// Shape of emitted records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Header-keyed maps.
    #[default]
    Object,
    /// Ordered field sequences.
    Array,
}

/// Column-count reconciliation policy applied when a row's length differs
/// from the header's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnCountStrategy {
    /// Pad short rows with empty strings, truncate long rows.
    #[default]
    Fill,
    /// Any mismatch is an error.
    Strict,
    /// Long rows are truncated, short rows pass through.
    Truncate,
    /// Rows pass through untouched (array output only).
    Keep,
    /// Pad short rows with an absent marker, truncate long rows (array
    /// output only).
    Sparse,
}

impl ColumnCountStrategy {
    /// Strategies that only make sense for array output.
    pub fn array_only(self) -> bool {
        matches!(self, ColumnCountStrategy::Keep | ColumnCountStrategy::Sparse)
    }
}

/// Byte-stream transform applied before charset decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecompressionFormat {
    Gzip,
    /// zlib-wrapped deflate.
    Deflate,
    /// Raw deflate stream without a wrapper.
    DeflateRaw,
}

/// User preference that orders backend and context candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationHint {
    Speed,
    #[default]
    Balanced,
    Memory,
    Responsive,
}

/// Internal queue depths for the stream facade, in records/tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueHints {
    pub lexer: usize,
    pub assembler: usize,
}

impl Default for QueueHints {
    fn default() -> Self {
        Self {
            lexer: 256,
            assembler: 64,
        }
    }
}

/// Cloneable cancellation token, checked between tokens and records.
///
/// Cancelling is sticky: once triggered, every pipeline holding a clone
/// raises [`Error::Cancelled`] at its next checkpoint.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    flag: Arc<AtomicBool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of every pipeline holding a clone.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Recognized parser configuration. All fields have defaults; construct with
/// `ParseOptions::default()` and adjust through the fluent setters, then any
/// parser entry point validates via [`ParseOptions::validate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseOptions {
    /// Field delimiter. Any length >= 1; must not overlap the quotation.
    pub delimiter: String,
    /// Quotation mark. Any length >= 1.
    pub quotation: String,
    /// `None` infers the header from the first completed record.
    /// `Some(vec![])` selects headerless array output.
    pub header: Option<Vec<String>>,
    pub skip_empty_lines: bool,
    pub output_format: OutputFormat,
    pub column_count_strategy: ColumnCountStrategy,
    /// Array output only: emit the header row as the first record.
    pub include_header: bool,
    pub max_buffer_size: usize,
    pub max_field_size: usize,
    pub max_field_count: usize,
    pub max_binary_size: usize,
    /// Encoding Standard label, e.g. `"utf-8"`, `"utf-16le"`, `"shift_jis"`.
    pub charset: String,
    /// `false` (default) strips a leading BOM; `true` passes it through.
    pub ignore_bom: bool,
    /// `true` turns decode errors into failures instead of U+FFFD.
    pub fatal: bool,
    pub decompression: Option<DecompressionFormat>,
    /// Label for error messages (a file name, URL, ...).
    pub source: Option<String>,
    /// Attach `location` spans to tokens. When disabled, error positions are
    /// computed lazily.
    pub track_location: bool,
    #[serde(skip)]
    pub signal: Option<CancelSignal>,
    pub optimization_hint: OptimizationHint,
    /// Disable silent backend/context fallbacks.
    pub strict: bool,
    pub enable_compiled: bool,
    pub enable_accelerated: bool,
    pub enable_worker: bool,
    pub queue_hints: QueueHints,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            delimiter: ",".to_string(),
            quotation: "\"".to_string(),
            header: None,
            skip_empty_lines: false,
            output_format: OutputFormat::default(),
            column_count_strategy: ColumnCountStrategy::default(),
            include_header: false,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            max_field_size: DEFAULT_MAX_FIELD_SIZE,
            max_field_count: DEFAULT_MAX_FIELD_COUNT,
            max_binary_size: DEFAULT_MAX_BINARY_SIZE,
            charset: "utf-8".to_string(),
            ignore_bom: false,
            fatal: false,
            decompression: None,
            source: None,
            track_location: false,
            signal: None,
            optimization_hint: OptimizationHint::default(),
            strict: false,
            enable_compiled: true,
            enable_accelerated: true,
            enable_worker: true,
            queue_hints: QueueHints::default(),
        }
    }
}

impl ParseOptions {
    pub fn delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    pub fn quotation(mut self, quotation: impl Into<String>) -> Self {
        self.quotation = quotation.into();
        self
    }

    pub fn header(mut self, header: Vec<String>) -> Self {
        self.header = Some(header);
        self
    }

    pub fn skip_empty_lines(mut self, skip: bool) -> Self {
        self.skip_empty_lines = skip;
        self
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    pub fn column_count_strategy(mut self, strategy: ColumnCountStrategy) -> Self {
        self.column_count_strategy = strategy;
        self
    }

    pub fn include_header(mut self, include: bool) -> Self {
        self.include_header = include;
        self
    }

    pub fn max_buffer_size(mut self, limit: usize) -> Self {
        self.max_buffer_size = limit;
        self
    }

    pub fn max_field_size(mut self, limit: usize) -> Self {
        self.max_field_size = limit;
        self
    }

    pub fn max_field_count(mut self, limit: usize) -> Self {
        self.max_field_count = limit;
        self
    }

    pub fn max_binary_size(mut self, limit: usize) -> Self {
        self.max_binary_size = limit;
        self
    }

    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = charset.into();
        self
    }

    pub fn ignore_bom(mut self, ignore: bool) -> Self {
        self.ignore_bom = ignore;
        self
    }

    pub fn fatal(mut self, fatal: bool) -> Self {
        self.fatal = fatal;
        self
    }

    pub fn decompression(mut self, format: DecompressionFormat) -> Self {
        self.decompression = Some(format);
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn track_location(mut self, track: bool) -> Self {
        self.track_location = track;
        self
    }

    pub fn signal(mut self, signal: CancelSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn optimization_hint(mut self, hint: OptimizationHint) -> Self {
        self.optimization_hint = hint;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Validate the option set as a whole.
    pub fn validate(&self) -> Result<()> {
        if self.delimiter.is_empty() {
            return Err(Error::InvalidOption(
                "delimiter must not be empty".to_string(),
            ));
        }
        if self.quotation.is_empty() {
            return Err(Error::InvalidOption(
                "quotation must not be empty".to_string(),
            ));
        }
        if self.delimiter.contains(&self.quotation) || self.quotation.contains(&self.delimiter) {
            return Err(Error::InvalidOption(
                "delimiter and quotation must not overlap".to_string(),
            ));
        }
        if self.delimiter.contains('\n') || self.delimiter.contains('\r') {
            return Err(Error::InvalidOption(
                "delimiter must not contain record terminators".to_string(),
            ));
        }
        if self.quotation.contains('\n') || self.quotation.contains('\r') {
            return Err(Error::InvalidOption(
                "quotation must not contain record terminators".to_string(),
            ));
        }
        if self.max_binary_size == 0 {
            return Err(Error::InvalidOption(
                "maxBinarySize must be positive".to_string(),
            ));
        }
        if self.max_field_count == 0 {
            return Err(Error::InvalidOption(
                "maxFieldCount must be positive".to_string(),
            ));
        }
        if self.column_count_strategy.array_only() && self.output_format == OutputFormat::Object {
            return Err(Error::InvalidOption(format!(
                "column count strategy {:?} requires array output",
                self.column_count_strategy
            )));
        }
        if self.include_header && self.output_format == OutputFormat::Object {
            return Err(Error::InvalidOption(
                "includeHeader requires array output".to_string(),
            ));
        }
        if let Some(header) = &self.header {
            if header.is_empty() {
                // Headerless mode: no binding is performed, so nothing to
                // reconcile against.
                if self.output_format == OutputFormat::Object {
                    return Err(Error::InvalidOption(
                        "empty header requires array output".to_string(),
                    ));
                }
                if self.column_count_strategy != ColumnCountStrategy::Keep {
                    return Err(Error::InvalidOption(
                        "empty header requires the keep strategy".to_string(),
                    ));
                }
            } else {
                validate_header_names(header, self.source.as_deref())?;
            }
        }
        Ok(())
    }

    /// Whether the input is inside the compiled/accelerated backends'
    /// compatibility envelope.
    pub(crate) fn compiled_compatible(&self) -> bool {
        self.delimiter.len() == 1
            && self.delimiter.is_ascii()
            && self.quotation == "\""
            && self.output_format == OutputFormat::Object
            && self.charset.eq_ignore_ascii_case("utf-8")
            && !self.track_location
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.signal.as_ref().is_some_and(|s| s.is_cancelled())
    }

    pub(crate) fn cancelled_error(&self) -> Error {
        Error::Cancelled {
            source_label: self.source.clone(),
        }
    }
}

/// Header names must be non-empty and unique.
pub(crate) fn validate_header_names(header: &[String], source: Option<&str>) -> Result<()> {
    let mut seen = std::collections::HashSet::with_capacity(header.len());
    for name in header {
        if name.is_empty() {
            return Err(Error::Parse {
                message: "header names must not be empty".to_string(),
                row: 1,
                source_label: source.map(str::to_string),
            });
        }
        if !seen.insert(name.as_str()) {
            return Err(Error::Parse {
                message: format!("duplicate headers: {name:?}"),
                row: 1,
                source_label: source.map(str::to_string),
            });
        }
    }
    Ok(())
}
