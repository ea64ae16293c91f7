use indexmap::IndexMap;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::options::{ColumnCountStrategy, OutputFormat, ParseOptions};
use crate::token::{Terminator, Token};

/// A completed row, bound either as a header-keyed map or as an ordered
/// field sequence.
///
/// The map form is insertion-ordered and plain data, so adversarial header
/// names like `__proto__` are just keys. Under the `sparse` strategy the
/// array form distinguishes absent positions from empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Record {
    Object(IndexMap<String, String>),
    Array(Vec<String>),
    Sparse(Vec<Option<String>>),
}

impl Record {
    /// Field value by header name (object form only).
    pub fn get(&self, name: &str) -> Option<&str> {
        match self {
            Record::Object(map) => map.get(name).map(String::as_str),
            _ => None,
        }
    }

    /// Number of fields in the record.
    pub fn len(&self) -> usize {
        match self {
            Record::Object(map) => map.len(),
            Record::Array(row) => row.len(),
            Record::Sparse(row) => row.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Row reconciled against the header by a column-count strategy.
enum RowShape {
    Cells(Vec<String>),
    SparseCells(Vec<Option<String>>),
}

/// Pre-bound reconciliation function; `Err` carries the mismatched row
/// length for `strict`.
type StrategyFn = fn(Vec<String>, usize) -> std::result::Result<RowShape, usize>;

fn reconcile_fill(mut row: Vec<String>, h: usize) -> std::result::Result<RowShape, usize> {
    row.resize(h, String::new());
    row.truncate(h);
    Ok(RowShape::Cells(row))
}

fn reconcile_strict(row: Vec<String>, h: usize) -> std::result::Result<RowShape, usize> {
    if row.len() != h {
        return Err(row.len());
    }
    Ok(RowShape::Cells(row))
}

fn reconcile_truncate(mut row: Vec<String>, h: usize) -> std::result::Result<RowShape, usize> {
    row.truncate(h);
    Ok(RowShape::Cells(row))
}

fn reconcile_keep(row: Vec<String>, _h: usize) -> std::result::Result<RowShape, usize> {
    Ok(RowShape::Cells(row))
}

fn reconcile_sparse(row: Vec<String>, h: usize) -> std::result::Result<RowShape, usize> {
    let mut cells: Vec<Option<String>> = row.into_iter().take(h).map(Some).collect();
    cells.resize(h, None);
    Ok(RowShape::SparseCells(cells))
}

fn bind_strategy(strategy: ColumnCountStrategy) -> StrategyFn {
    match strategy {
        ColumnCountStrategy::Fill => reconcile_fill,
        ColumnCountStrategy::Strict => reconcile_strict,
        ColumnCountStrategy::Truncate => reconcile_truncate,
        ColumnCountStrategy::Keep => reconcile_keep,
        ColumnCountStrategy::Sparse => reconcile_sparse,
    }
}

/// CSV record assembler.
///
/// Consumes the lexer's unified tokens and yields header-bound records.
/// The first completed row becomes the header unless one was configured
/// explicitly; `header: []` selects headerless array output with no
/// binding. Emitted records never share backing storage with later rows:
/// the in-flight row buffer is taken at each record boundary and replaced
/// from a small pool.
pub struct RecordAssembler {
    options: ParseOptions,
    /// Bound header. `None` until binding; empty in headerless mode.
    header: Option<Vec<String>>,
    /// Explicit header kept aside so a flush-reset restores it.
    configured_header: Option<Vec<String>>,
    row: Vec<String>,
    field_index: usize,
    row_has_content: bool,
    row_number: usize,
    strategy: StrategyFn,
    pool: Vec<Vec<String>>,
    header_record_emitted: bool,
}

impl RecordAssembler {
    pub fn new(options: &ParseOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            options: options.clone(),
            header: options.header.clone(),
            configured_header: options.header.clone(),
            row: Vec::new(),
            field_index: 0,
            row_has_content: false,
            row_number: 1,
            strategy: bind_strategy(options.column_count_strategy),
            pool: Vec::new(),
            header_record_emitted: false,
        })
    }

    /// Feed one token; completed records are appended to `records`.
    pub fn push_token(&mut self, token: Token, records: &mut Vec<Record>) -> Result<()> {
        if self.row.is_empty() {
            if self.options.is_cancelled() {
                return Err(self.options.cancelled_error());
            }
            self.emit_configured_header(records);
        }

        if self.row.len() >= self.options.max_field_count {
            return Err(Error::FieldCountExceeded {
                limit: self.options.max_field_count,
                row: self.row_number,
                source_label: self.options.source.clone(),
            });
        }
        if !token.value.is_empty() {
            self.row_has_content = true;
        }
        self.row.push(token.value);

        match token.terminator {
            Terminator::Field => {
                self.field_index += 1;
            }
            Terminator::Record | Terminator::Eof => {
                self.complete_row(records)?;
            }
        }
        Ok(())
    }

    /// Terminal call: flush header binding and any pending record.
    pub fn flush(&mut self, records: &mut Vec<Record>) -> Result<()> {
        if !self.row.is_empty() {
            self.complete_row(records)?;
        }
        self.emit_configured_header(records);
        Ok(())
    }

    /// Teacher-style driver over a token batch. A non-streaming call
    /// flushes and resets the assembler for reuse.
    pub fn assemble(
        &mut self,
        tokens: impl IntoIterator<Item = Token>,
        stream: bool,
    ) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        for token in tokens {
            self.push_token(token, &mut records)?;
        }
        if !stream {
            self.flush(&mut records)?;
            self.reset();
        }
        Ok(records)
    }

    /// Return the assembler to its initial state; an explicit header is
    /// restored, an inferred one is cleared.
    pub fn reset(&mut self) {
        self.header = self.configured_header.clone();
        self.row.clear();
        self.field_index = 0;
        self.row_has_content = false;
        self.row_number = 1;
        self.header_record_emitted = false;
    }

    /// Bound or configured header, if any.
    pub fn header(&self) -> Option<&[String]> {
        self.header.as_deref()
    }

    /// In array output with `include_header`, the header appears as the
    /// first emitted record.
    fn emit_configured_header(&mut self, records: &mut Vec<Record>) {
        if self.header_record_emitted || !self.options.include_header {
            return;
        }
        if let Some(header) = &self.header {
            if !header.is_empty() {
                records.push(Record::Array(header.clone()));
            }
            self.header_record_emitted = true;
        }
    }

    fn complete_row(&mut self, records: &mut Vec<Record>) -> Result<()> {
        let row = std::mem::replace(&mut self.row, self.pool.pop().unwrap_or_default());
        let row_number = self.row_number;
        let had_content = self.row_has_content;
        self.field_index = 0;
        self.row_has_content = false;
        self.row_number += 1;

        if self.header.is_none() {
            if !had_content && self.options.skip_empty_lines {
                self.recycle(row);
                return Ok(());
            }
            self.bind_header(row, row_number)?;
            self.emit_configured_header(records);
            return Ok(());
        }

        let headerless = self.header.as_ref().is_some_and(Vec::is_empty);

        if !had_content {
            if self.options.skip_empty_lines {
                self.recycle(row);
                return Ok(());
            }
            records.push(self.empty_record(row));
            return Ok(());
        }

        if headerless {
            records.push(Record::Array(row));
            return Ok(());
        }

        let header_len = self.header.as_ref().map_or(0, Vec::len);
        let shape = (self.strategy)(row, header_len).map_err(|len| Error::Parse {
            message: format!(
                "column count mismatch: expected {header_len} fields, got {len}"
            ),
            row: row_number,
            source_label: self.options.source.clone(),
        })?;
        records.push(self.shape_record(shape));
        Ok(())
    }

    /// Bind a completed row as the header. Duplicate non-empty names are an
    /// error; empty-keyed positions are dropped during object construction,
    /// and an object header with no usable keys is rejected.
    fn bind_header(&mut self, row: Vec<String>, row_number: usize) -> Result<()> {
        let mut seen = std::collections::HashSet::with_capacity(row.len());
        for name in row.iter().filter(|n| !n.is_empty()) {
            if !seen.insert(name.as_str()) {
                return Err(Error::Parse {
                    message: format!("duplicate headers: {name:?}"),
                    row: row_number,
                    source_label: self.options.source.clone(),
                });
            }
        }
        if self.options.output_format == OutputFormat::Object && seen.is_empty() {
            return Err(Error::Parse {
                message: "empty header is not allowed for object output".to_string(),
                row: row_number,
                source_label: self.options.source.clone(),
            });
        }
        self.header = Some(row);
        Ok(())
    }

    /// All-empty line: the record spans the full header, every position
    /// vacant.
    fn empty_record(&mut self, row: Vec<String>) -> Record {
        let header_len = self.header.as_ref().map_or(0, Vec::len);
        self.recycle(row);
        match self.options.output_format {
            OutputFormat::Object => {
                let header = self.header.as_ref().expect("header is bound");
                let map = header
                    .iter()
                    .filter(|name| !name.is_empty())
                    .map(|name| (name.clone(), String::new()))
                    .collect();
                Record::Object(map)
            }
            OutputFormat::Array => {
                if self.options.column_count_strategy == ColumnCountStrategy::Sparse {
                    Record::Sparse(vec![None; header_len])
                } else if header_len == 0 {
                    Record::Array(vec![String::new()])
                } else {
                    Record::Array(vec![String::new(); header_len])
                }
            }
        }
    }

    fn shape_record(&mut self, shape: RowShape) -> Record {
        match (self.options.output_format, shape) {
            (OutputFormat::Array, RowShape::Cells(cells)) => Record::Array(cells),
            (_, RowShape::SparseCells(cells)) => Record::Sparse(cells),
            (OutputFormat::Object, RowShape::Cells(mut cells)) => {
                let header = self.header.as_ref().expect("header is bound");
                let mut map = IndexMap::with_capacity(header.len());
                for (i, name) in header.iter().enumerate() {
                    if name.is_empty() {
                        continue;
                    }
                    let value = match cells.get_mut(i) {
                        Some(cell) => std::mem::take(cell),
                        None => continue,
                    };
                    map.insert(name.clone(), value);
                }
                self.recycle(cells);
                Record::Object(map)
            }
        }
    }

    /// Recycle an emptied row backbone for the next record.
    fn recycle(&mut self, mut row: Vec<String>) {
        if self.pool.len() < 4 {
            row.clear();
            self.pool.push(row);
        }
    }
}
