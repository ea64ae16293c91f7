//! Worker session: offloads a pipeline to a background thread.
//!
//! The protocol is a numbered command/response pair. Commands carry the
//! input (whole strings and buffers by message, streamed inputs by moving
//! the receiver or reader into the worker); responses are a sequence of
//! `record` events followed by one `done`, or a single `error`. Records
//! flow over a bounded channel, which is what gives the consumer
//! backpressure. Cancellation arrives as an explicit abort message on a
//! control channel and is honored within one record boundary.

use std::io::Read;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::debug;

use crate::assembler::Record;
use crate::engine::Backend;
use crate::error::{Error, Result};
use crate::options::ParseOptions;
use crate::parser::{ChunkSource, Pipeline};

enum JobPayload {
    ParseString(String),
    ParseBinary(Vec<u8>),
    ParseStringStream(Receiver<String>),
    ParseBinaryStream(Box<dyn Read + Send>),
}

struct Job {
    id: u64,
    payload: JobPayload,
}

enum Control {
    Abort(u64),
    Shutdown,
}

/// One response event from the worker.
pub struct WorkerEvent {
    pub id: u64,
    outcome: Outcome,
}

pub(crate) enum Outcome {
    Record(Record),
    Done,
    Error(Error),
}

impl WorkerEvent {
    pub(crate) fn into_outcome(self) -> Outcome {
        self.outcome
    }
}

/// Handle to a background parsing thread.
pub struct WorkerSession {
    jobs: Sender<Job>,
    control: Sender<Control>,
    responses: Receiver<WorkerEvent>,
    handle: Option<JoinHandle<()>>,
    next_id: u64,
}

impl WorkerSession {
    pub fn spawn(options: &ParseOptions, backend: Backend) -> Result<Self> {
        let (job_tx, job_rx) = unbounded::<Job>();
        let (control_tx, control_rx) = unbounded::<Control>();
        let (resp_tx, resp_rx) = bounded::<WorkerEvent>(options.queue_hints.assembler.max(1));
        let options = options.clone();
        let handle = thread::Builder::new()
            .name("csv-flux-worker".to_string())
            .spawn(move || worker_loop(job_rx, control_rx, resp_tx, options, backend))?;
        Ok(Self {
            jobs: job_tx,
            control: control_tx,
            responses: resp_rx,
            handle: Some(handle),
            next_id: 0,
        })
    }

    fn submit(&mut self, payload: JobPayload) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        let _ = self.jobs.send(Job { id, payload });
        id
    }

    pub fn parse_string(&mut self, input: String) -> u64 {
        self.submit(JobPayload::ParseString(input))
    }

    pub fn parse_binary(&mut self, input: Vec<u8>) -> u64 {
        self.submit(JobPayload::ParseBinary(input))
    }

    pub fn parse_string_stream(&mut self, chunks: Receiver<String>) -> u64 {
        self.submit(JobPayload::ParseStringStream(chunks))
    }

    pub fn parse_binary_stream(&mut self, reader: Box<dyn Read + Send>) -> u64 {
        self.submit(JobPayload::ParseBinaryStream(reader))
    }

    /// Forward cancellation for one request.
    pub fn abort(&self, id: u64) {
        let _ = self.control.send(Control::Abort(id));
    }

    /// Next response event; `None` once the worker is gone.
    pub fn recv(&self) -> Option<WorkerEvent> {
        self.responses.recv().ok()
    }

    pub fn try_recv(&self) -> Option<WorkerEvent> {
        self.responses.try_recv().ok()
    }
}

impl Drop for WorkerSession {
    fn drop(&mut self) {
        let _ = self.control.send(Control::Shutdown);
        // The thread notices the shutdown message, or the disconnected
        // response channel, at its next boundary; joining here could
        // deadlock against a full response queue.
        if let Some(handle) = self.handle.take() {
            drop(handle);
        }
    }
}

enum JobExit {
    Completed,
    ShuttingDown,
}

fn worker_loop(
    jobs: Receiver<Job>,
    control: Receiver<Control>,
    responses: Sender<WorkerEvent>,
    options: ParseOptions,
    backend: Backend,
) {
    debug!(?backend, "worker started");
    loop {
        crossbeam_channel::select! {
            recv(jobs) -> job => match job {
                Ok(job) => {
                    if matches!(
                        run_job(job, &control, &responses, &options, backend),
                        JobExit::ShuttingDown
                    ) {
                        break;
                    }
                }
                Err(_) => break,
            },
            recv(control) -> msg => match msg {
                Ok(Control::Shutdown) | Err(_) => break,
                Ok(Control::Abort(_)) => {}
            },
        }
    }
    debug!("worker stopped");
}

fn run_job(
    job: Job,
    control: &Receiver<Control>,
    responses: &Sender<WorkerEvent>,
    options: &ParseOptions,
    backend: Backend,
) -> JobExit {
    let id = job.id;
    debug!(id, "worker job started");

    let result = execute(job.payload, id, control, responses, options, backend);
    match result {
        Ok(JobExit::ShuttingDown) => JobExit::ShuttingDown,
        Ok(JobExit::Completed) => {
            let _ = responses.send(WorkerEvent {
                id,
                outcome: Outcome::Done,
            });
            JobExit::Completed
        }
        Err(error) => {
            let _ = responses.send(WorkerEvent {
                id,
                outcome: Outcome::Error(error),
            });
            JobExit::Completed
        }
    }
}

fn execute(
    payload: JobPayload,
    id: u64,
    control: &Receiver<Control>,
    responses: &Sender<WorkerEvent>,
    options: &ParseOptions,
    backend: Backend,
) -> Result<JobExit> {
    let mut source = match payload {
        JobPayload::ParseString(input) => ChunkSource::Once(Some(input)),
        JobPayload::ParseBinary(bytes) => {
            ChunkSource::Once(Some(crate::binary::decode_buffer(&bytes, options)?))
        }
        JobPayload::ParseStringStream(chunks) => ChunkSource::Channel(chunks),
        JobPayload::ParseBinaryStream(reader) => {
            ChunkSource::Reader(crate::binary::DecodingReader::new(reader, options)?)
        }
    };

    let mut pipeline = Pipeline::new(backend, options)?;
    let mut records = Vec::new();
    loop {
        let chunk = source.next_chunk()?;
        let finished = match chunk {
            Some(chunk) => {
                pipeline.push_chunk(&chunk, &mut records)?;
                false
            }
            None => {
                pipeline.finish(&mut records)?;
                true
            }
        };

        for record in records.drain(..) {
            match poll_control(id, control, options)? {
                JobExit::ShuttingDown => return Ok(JobExit::ShuttingDown),
                JobExit::Completed => {}
            }
            if responses
                .send(WorkerEvent {
                    id,
                    outcome: Outcome::Record(record),
                })
                .is_err()
            {
                // Consumer is gone; nothing left to deliver.
                return Ok(JobExit::ShuttingDown);
            }
        }

        if finished {
            return Ok(JobExit::Completed);
        }
    }
}

/// Between records: honor aborts and shutdowns without blocking.
fn poll_control(id: u64, control: &Receiver<Control>, options: &ParseOptions) -> Result<JobExit> {
    if options.is_cancelled() {
        return Err(options.cancelled_error());
    }
    match control.try_recv() {
        Ok(Control::Abort(aborted)) if aborted == id => Err(Error::Cancelled {
            source_label: options.source.clone(),
        }),
        Ok(Control::Abort(_)) => Ok(JobExit::Completed),
        Ok(Control::Shutdown) => Ok(JobExit::ShuttingDown),
        Err(crossbeam_channel::TryRecvError::Empty) => Ok(JobExit::Completed),
        Err(crossbeam_channel::TryRecvError::Disconnected) => Ok(JobExit::ShuttingDown),
    }
}
