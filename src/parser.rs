//! Parser facade.
//!
//! Composes the binary front-end, a token source selected by the
//! execution router, and the record assembler into the user-facing
//! shapes: one-shot materialized parses, a synchronous pull iterator, a
//! push-style chunk API, and (in [`crate::parser::Parser::stream`] and
//! friends) a record stream that may be offloaded to a worker.

use std::collections::VecDeque;
use std::io::Read;

use crossbeam_channel::Receiver;
use tracing::debug;

use crate::accel::AccelLexer;
use crate::assembler::{Record, RecordAssembler};
use crate::binary::{decode_buffer, DecodingReader};
use crate::compiled::CompiledLexer;
use crate::engine::{
    resolve_plan, Backend, Capabilities, ExecutionContext, ExecutionPlan, FallbackObserver,
    InputShape, PlanEntry,
};
use crate::error::Result;
use crate::lexer::FieldLexer;
use crate::options::ParseOptions;
use crate::token::Token;
use crate::worker::WorkerSession;

/// Token source selected by the router. The three variants produce the
/// same token stream for inputs inside their shared envelope.
pub(crate) enum TokenPipeline {
    Code(FieldLexer),
    Compiled(CompiledLexer),
    Accel(AccelLexer),
}

impl TokenPipeline {
    pub(crate) fn new(backend: Backend, options: &ParseOptions) -> Result<Self> {
        Ok(match backend {
            Backend::Code => TokenPipeline::Code(FieldLexer::new(options)?),
            Backend::Compiled => TokenPipeline::Compiled(CompiledLexer::new(options)?),
            Backend::CompiledAccel => TokenPipeline::Accel(AccelLexer::new(options)?),
        })
    }

    fn push_chunk(&mut self, chunk: &str) -> Result<()> {
        match self {
            TokenPipeline::Code(lexer) => lexer.push_chunk(chunk),
            TokenPipeline::Compiled(lexer) => lexer.push_chunk(chunk),
            TokenPipeline::Accel(lexer) => lexer.push_chunk(chunk),
        }
    }

    fn finish(&mut self) -> Result<()> {
        match self {
            TokenPipeline::Code(lexer) => {
                lexer.finish();
                Ok(())
            }
            TokenPipeline::Compiled(lexer) => lexer.finish(),
            TokenPipeline::Accel(lexer) => {
                lexer.finish();
                Ok(())
            }
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>> {
        match self {
            TokenPipeline::Code(lexer) => lexer.next_token(),
            TokenPipeline::Compiled(lexer) => lexer.next_token(),
            TokenPipeline::Accel(lexer) => lexer.next_token(),
        }
    }
}

/// Lexer + assembler pair driven chunk by chunk.
pub(crate) struct Pipeline {
    source: TokenPipeline,
    assembler: RecordAssembler,
}

impl Pipeline {
    pub(crate) fn new(backend: Backend, options: &ParseOptions) -> Result<Self> {
        Ok(Self {
            source: TokenPipeline::new(backend, options)?,
            assembler: RecordAssembler::new(options)?,
        })
    }

    pub(crate) fn push_chunk(&mut self, chunk: &str, records: &mut Vec<Record>) -> Result<()> {
        self.source.push_chunk(chunk)?;
        self.drain(records)
    }

    /// Hand a chunk to the token source without draining, so a pull
    /// consumer can apply its own token budget.
    pub(crate) fn feed_chunk(&mut self, chunk: &str) -> Result<()> {
        self.source.push_chunk(chunk)
    }

    pub(crate) fn finish(&mut self, records: &mut Vec<Record>) -> Result<()> {
        self.source.finish()?;
        self.drain(records)?;
        self.assembler.flush(records)
    }

    fn drain(&mut self, records: &mut Vec<Record>) -> Result<()> {
        while let Some(token) = self.source.next_token()? {
            self.assembler.push_token(token, records)?;
        }
        Ok(())
    }

    /// Drain at most `limit` tokens; returns whether any were produced.
    pub(crate) fn drain_some(&mut self, records: &mut Vec<Record>, limit: usize) -> Result<bool> {
        let mut produced = 0;
        while produced < limit {
            match self.source.next_token()? {
                Some(token) => {
                    self.assembler.push_token(token, records)?;
                    produced += 1;
                }
                None => break,
            }
        }
        Ok(produced > 0)
    }
}

/// Where the next text chunk comes from.
pub(crate) enum ChunkSource {
    Once(Option<String>),
    Chunks(Box<dyn Iterator<Item = String> + Send>),
    Channel(Receiver<String>),
    Reader(DecodingReader),
}

impl ChunkSource {
    pub(crate) fn next_chunk(&mut self) -> Result<Option<String>> {
        match self {
            ChunkSource::Once(slot) => Ok(slot.take()),
            ChunkSource::Chunks(iter) => Ok(iter.next()),
            ChunkSource::Channel(rx) => Ok(rx.recv().ok()),
            ChunkSource::Reader(reader) => reader.next_chunk(),
        }
    }
}

enum IterPhase {
    Running,
    Drained,
    Done,
}

/// Synchronous pull iterator over records.
///
/// Pulls chunks from its source only when the ready queue runs dry, so
/// peak memory stays bounded by one chunk plus the lexer's retained tail.
pub struct RecordIter {
    pipeline: Pipeline,
    source: ChunkSource,
    ready: VecDeque<Record>,
    phase: IterPhase,
    /// Tokens drained per pull, from the lexer queue hint.
    batch: usize,
}

impl RecordIter {
    pub(crate) fn new(backend: Backend, options: &ParseOptions, source: ChunkSource) -> Result<Self> {
        Ok(Self {
            pipeline: Pipeline::new(backend, options)?,
            source,
            ready: VecDeque::new(),
            phase: IterPhase::Running,
            batch: options.queue_hints.lexer.max(1),
        })
    }

    fn step(&mut self) -> Result<()> {
        let mut records = Vec::new();
        if !self.pipeline.drain_some(&mut records, self.batch)? {
            match self.source.next_chunk()? {
                Some(chunk) => {
                    self.pipeline.feed_chunk(&chunk)?;
                    self.pipeline.drain_some(&mut records, self.batch)?;
                }
                None => {
                    self.pipeline.finish(&mut records)?;
                    self.phase = IterPhase::Drained;
                }
            }
        }
        self.ready.extend(records);
        Ok(())
    }
}

impl Iterator for RecordIter {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.ready.pop_front() {
                return Some(Ok(record));
            }
            match self.phase {
                IterPhase::Done | IterPhase::Drained => return None,
                IterPhase::Running => {
                    if let Err(e) = self.step() {
                        self.phase = IterPhase::Done;
                        return Some(Err(e));
                    }
                }
            }
        }
    }
}

/// Record stream produced by the router: inline, or offloaded to a worker
/// with records arriving over a bounded channel.
pub struct RecordStream {
    inner: StreamInner,
}

enum StreamInner {
    Inline(RecordIter),
    Worker {
        session: WorkerSession,
        id: u64,
        done: bool,
    },
}

impl RecordStream {
    pub(crate) fn inline(iter: RecordIter) -> Self {
        Self {
            inner: StreamInner::Inline(iter),
        }
    }

    pub(crate) fn offloaded(session: WorkerSession, id: u64) -> Self {
        Self {
            inner: StreamInner::Worker {
                session,
                id,
                done: false,
            },
        }
    }

    /// Ask an offloaded parse to stop; honored within one record boundary.
    pub fn abort(&self) {
        if let StreamInner::Worker { session, id, .. } = &self.inner {
            session.abort(*id);
        }
    }
}

impl Iterator for RecordStream {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            StreamInner::Inline(iter) => iter.next(),
            StreamInner::Worker { session, id, done } => {
                if *done {
                    return None;
                }
                loop {
                    match session.recv() {
                        Some(event) => {
                            if event.id != *id {
                                continue;
                            }
                            match event.into_outcome() {
                                crate::worker::Outcome::Record(record) => {
                                    return Some(Ok(record))
                                }
                                crate::worker::Outcome::Done => {
                                    *done = true;
                                    return None;
                                }
                                crate::worker::Outcome::Error(error) => {
                                    *done = true;
                                    return Some(Err(error));
                                }
                            }
                        }
                        None => {
                            *done = true;
                            return None;
                        }
                    }
                }
            }
        }
    }
}

/// Configured parser; cheap to construct, reusable across inputs.
pub struct Parser {
    options: ParseOptions,
    capabilities: Capabilities,
    observer: Option<FallbackObserver>,
}

impl Parser {
    pub fn new(options: ParseOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            options,
            capabilities: Capabilities::detect(),
            observer: None,
        })
    }

    /// Override detected capabilities (primarily for tests and embedders).
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Register an observer called on every non-strict fallback.
    pub fn on_fallback(
        mut self,
        observer: impl Fn(&crate::engine::FallbackNotice) + Send + Sync + 'static,
    ) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    fn plan(&self, shape: InputShape) -> Result<ExecutionPlan> {
        resolve_plan(&self.options, shape, self.capabilities, self.observer.as_ref())
    }

    /// Backend for the synchronous facades, which always run inline.
    fn main_backend(&self, shape: InputShape) -> Result<Backend> {
        let plan = self.plan(shape)?;
        let entry = plan
            .entries
            .iter()
            .find(|e| e.context == ExecutionContext::Main)
            .copied()
            .unwrap_or(PlanEntry {
                backend: Backend::Code,
                context: ExecutionContext::Main,
            });
        Ok(entry.backend)
    }

    /// One-shot parse of a string. Blocks the caller.
    pub fn parse_to_vec(&self, input: &str) -> Result<Vec<Record>> {
        let backend = self.main_backend(InputShape::String)?;
        debug!(?backend, len = input.len(), "one-shot string parse");
        let mut pipeline = Pipeline::new(backend, &self.options)?;
        let mut records = Vec::new();
        pipeline.push_chunk(input, &mut records)?;
        pipeline.finish(&mut records)?;
        Ok(records)
    }

    /// One-shot parse of owned bytes through the binary front-end.
    pub fn parse_binary_to_vec(&self, bytes: &[u8]) -> Result<Vec<Record>> {
        let text = decode_buffer(bytes, &self.options)?;
        let backend = self.main_backend(InputShape::Binary)?;
        let mut pipeline = Pipeline::new(backend, &self.options)?;
        let mut records = Vec::new();
        pipeline.push_chunk(&text, &mut records)?;
        pipeline.finish(&mut records)?;
        Ok(records)
    }

    /// One-shot parse of a byte stream.
    pub fn parse_reader_to_vec(&self, reader: impl Read + Send + 'static) -> Result<Vec<Record>> {
        self.records_from_reader(reader)?.collect()
    }

    /// One-shot parse of string chunks.
    pub fn parse_chunks_to_vec(
        &self,
        chunks: impl IntoIterator<Item = String>,
    ) -> Result<Vec<Record>> {
        let backend = self.main_backend(InputShape::StringStream)?;
        let mut pipeline = Pipeline::new(backend, &self.options)?;
        let mut records = Vec::new();
        for chunk in chunks {
            pipeline.push_chunk(&chunk, &mut records)?;
        }
        pipeline.finish(&mut records)?;
        Ok(records)
    }

    /// Lazy pull iterator over a string.
    pub fn records(&self, input: &str) -> Result<RecordIter> {
        let backend = self.main_backend(InputShape::String)?;
        RecordIter::new(
            backend,
            &self.options,
            ChunkSource::Once(Some(input.to_string())),
        )
    }

    /// Lazy pull iterator over a binary buffer.
    pub fn records_from_binary(&self, bytes: &[u8]) -> Result<RecordIter> {
        let text = decode_buffer(bytes, &self.options)?;
        let backend = self.main_backend(InputShape::Binary)?;
        RecordIter::new(backend, &self.options, ChunkSource::Once(Some(text)))
    }

    /// Lazy pull iterator over a byte stream.
    pub fn records_from_reader(&self, reader: impl Read + Send + 'static) -> Result<RecordIter> {
        let backend = self.main_backend(InputShape::BinaryStream)?;
        let source = ChunkSource::Reader(DecodingReader::new(reader, &self.options)?);
        RecordIter::new(backend, &self.options, source)
    }

    /// Lazy pull iterator over string chunks.
    pub fn records_from_chunks(
        &self,
        chunks: impl Iterator<Item = String> + Send + 'static,
    ) -> Result<RecordIter> {
        let backend = self.main_backend(InputShape::StringStream)?;
        RecordIter::new(backend, &self.options, ChunkSource::Chunks(Box::new(chunks)))
    }

    /// Record stream over a string; the router may offload it.
    pub fn stream(&self, input: &str) -> Result<RecordStream> {
        let plan = self.plan(InputShape::String)?;
        let entry = plan.primary();
        match entry.context {
            ExecutionContext::Main => Ok(RecordStream::inline(RecordIter::new(
                entry.backend,
                &self.options,
                ChunkSource::Once(Some(input.to_string())),
            )?)),
            _ => {
                let mut session = WorkerSession::spawn(&self.options, entry.backend)?;
                let id = session.parse_string(input.to_string());
                Ok(RecordStream::offloaded(session, id))
            }
        }
    }

    /// Record stream over owned bytes; the router may offload it.
    pub fn stream_binary(&self, bytes: Vec<u8>) -> Result<RecordStream> {
        let plan = self.plan(InputShape::Binary)?;
        let entry = plan.primary();
        match entry.context {
            ExecutionContext::Main => {
                let text = decode_buffer(&bytes, &self.options)?;
                Ok(RecordStream::inline(RecordIter::new(
                    entry.backend,
                    &self.options,
                    ChunkSource::Once(Some(text)),
                )?))
            }
            _ => {
                let mut session = WorkerSession::spawn(&self.options, entry.backend)?;
                let id = session.parse_binary(bytes);
                Ok(RecordStream::offloaded(session, id))
            }
        }
    }

    /// Record stream over a byte reader; with stream transfer available the
    /// reader itself moves into the worker.
    pub fn stream_reader(&self, reader: impl Read + Send + 'static) -> Result<RecordStream> {
        let plan = self.plan(InputShape::BinaryStream)?;
        let entry = plan.primary();
        match entry.context {
            ExecutionContext::Main => {
                let source = ChunkSource::Reader(DecodingReader::new(reader, &self.options)?);
                Ok(RecordStream::inline(RecordIter::new(
                    entry.backend,
                    &self.options,
                    source,
                )?))
            }
            _ => {
                let mut session = WorkerSession::spawn(&self.options, entry.backend)?;
                let id = session.parse_binary_stream(Box::new(reader));
                Ok(RecordStream::offloaded(session, id))
            }
        }
    }

    /// Record stream over a channel of string chunks; with stream transfer
    /// available the receiver moves into the worker.
    pub fn stream_chunks(&self, chunks: Receiver<String>) -> Result<RecordStream> {
        let plan = self.plan(InputShape::StringStream)?;
        let entry = plan.primary();
        match entry.context {
            ExecutionContext::Main => Ok(RecordStream::inline(RecordIter::new(
                entry.backend,
                &self.options,
                ChunkSource::Channel(chunks),
            )?)),
            _ => {
                let mut session = WorkerSession::spawn(&self.options, entry.backend)?;
                let id = session.parse_string_stream(chunks);
                Ok(RecordStream::offloaded(session, id))
            }
        }
    }
}

/// Push-style streaming parser over the inline pipeline.
///
/// `process_chunk(chunk, stream: true)` retains state across calls; a call
/// with `stream: false` (or [`StreamParser::flush`]) emits the EOF-bound
/// tail and resets for reuse.
pub struct StreamParser {
    pipeline: Pipeline,
    options: ParseOptions,
    backend: Backend,
}

impl StreamParser {
    pub fn new(options: ParseOptions) -> Result<Self> {
        options.validate()?;
        let capabilities = Capabilities::detect();
        let plan = resolve_plan(&options, InputShape::StringStream, capabilities, None)?;
        let backend = plan
            .entries
            .iter()
            .find(|e| e.context == ExecutionContext::Main)
            .map(|e| e.backend)
            .unwrap_or(Backend::Code);
        Ok(Self {
            pipeline: Pipeline::new(backend, &options)?,
            options,
            backend,
        })
    }

    /// Process one chunk; returns the records that completed.
    pub fn process_chunk(&mut self, chunk: &str, stream: bool) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        self.pipeline.push_chunk(chunk, &mut records)?;
        if !stream {
            self.pipeline.finish(&mut records)?;
            self.reset()?;
        }
        Ok(records)
    }

    /// Flush any pending state and return the final records.
    pub fn flush(&mut self) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        self.pipeline.finish(&mut records)?;
        self.reset()?;
        Ok(records)
    }

    fn reset(&mut self) -> Result<()> {
        self.pipeline = Pipeline::new(self.backend, &self.options)?;
        Ok(())
    }
}
