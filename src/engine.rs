//! Execution router.
//!
//! Selects and orders (backend, context) combinations for a parse, filters
//! them down to what the environment and the option set support, and
//! exposes the ordered plan to the facade. Ordering is driven entirely by
//! the optimization hint; ties break deterministically backend-major.

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::options::{OptimizationHint, ParseOptions};

/// A parsing implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Hand-written incremental lexer; always available.
    Code,
    /// csv-core DFA; UTF-8, single-byte delimiter, `"` quotation, object
    /// output.
    Compiled,
    /// Separator indexer + token synthesizer; compiled envelope plus the
    /// SIMD capability.
    CompiledAccel,
}

/// An execution location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionContext {
    /// Inline on the calling thread.
    Main,
    /// Background thread; the input stream is moved into the worker.
    WorkerStreamTransfer,
    /// Background thread; the whole input is sent by message.
    WorkerMessage,
}

/// Shape of the input being parsed, which constrains context selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputShape {
    String,
    Binary,
    StringStream,
    BinaryStream,
}

impl InputShape {
    pub fn is_stream(self) -> bool {
        matches!(self, InputShape::StringStream | InputShape::BinaryStream)
    }
}

/// What the current environment offers.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    /// SIMD-class scanning is available.
    pub simd: bool,
    /// Background threads can be spawned.
    pub threads: bool,
}

impl Capabilities {
    pub fn detect() -> Self {
        Self {
            simd: cfg!(target_arch = "x86_64"),
            threads: cfg!(not(target_family = "wasm")),
        }
    }

    /// Everything off: forces the pure-code inline path.
    pub fn none() -> Self {
        Self {
            simd: false,
            threads: false,
        }
    }
}

/// One (backend, context) combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanEntry {
    pub backend: Backend,
    pub context: ExecutionContext,
}

/// Notification delivered when a non-strict fallback occurs.
#[derive(Debug, Clone, Copy)]
pub struct FallbackNotice {
    pub requested: PlanEntry,
    pub actual: PlanEntry,
    pub reason: &'static str,
}

/// Observer for fallback notifications.
pub type FallbackObserver = Box<dyn Fn(&FallbackNotice) + Send + Sync>;

/// Ordered, capability-filtered plan.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub entries: Vec<PlanEntry>,
    /// Effective strict flag; cleared by a stream-transfer to message
    /// fallback.
    pub strict: bool,
}

impl ExecutionPlan {
    /// First-choice combination after filtering.
    pub fn primary(&self) -> PlanEntry {
        self.entries[0]
    }
}

fn backend_priority(hint: OptimizationHint) -> [Backend; 3] {
    match hint {
        OptimizationHint::Speed => [Backend::CompiledAccel, Backend::Compiled, Backend::Code],
        OptimizationHint::Memory => [Backend::Code, Backend::Compiled, Backend::CompiledAccel],
        OptimizationHint::Balanced => [Backend::Compiled, Backend::CompiledAccel, Backend::Code],
        OptimizationHint::Responsive => [Backend::Code, Backend::Compiled, Backend::CompiledAccel],
    }
}

fn context_priority(hint: OptimizationHint) -> [ExecutionContext; 3] {
    match hint {
        OptimizationHint::Speed | OptimizationHint::Memory => [
            ExecutionContext::Main,
            ExecutionContext::WorkerStreamTransfer,
            ExecutionContext::WorkerMessage,
        ],
        OptimizationHint::Balanced | OptimizationHint::Responsive => [
            ExecutionContext::WorkerStreamTransfer,
            ExecutionContext::WorkerMessage,
            ExecutionContext::Main,
        ],
    }
}

fn backend_supported(backend: Backend, options: &ParseOptions, caps: Capabilities) -> bool {
    match backend {
        Backend::Code => true,
        Backend::Compiled => options.enable_compiled && options.compiled_compatible(),
        Backend::CompiledAccel => {
            options.enable_accelerated && caps.simd && options.compiled_compatible()
        }
    }
}

fn context_supported(
    context: ExecutionContext,
    options: &ParseOptions,
    caps: Capabilities,
    shape: InputShape,
) -> bool {
    match context {
        ExecutionContext::Main => true,
        ExecutionContext::WorkerStreamTransfer => {
            options.enable_worker && caps.threads && shape.is_stream()
        }
        ExecutionContext::WorkerMessage => {
            options.enable_worker && caps.threads && !shape.is_stream()
        }
    }
}

/// Resolve the ordered plan for one parse.
///
/// In strict mode an unavailable first choice is an error instead of a
/// silent fallback, with one exception: falling back from stream transfer
/// to message passing is permitted and clears strict for the rest of the
/// plan.
pub fn resolve_plan(
    options: &ParseOptions,
    shape: InputShape,
    caps: Capabilities,
    observer: Option<&FallbackObserver>,
) -> Result<ExecutionPlan> {
    let backends = backend_priority(options.optimization_hint);
    let contexts = context_priority(options.optimization_hint);
    let requested = PlanEntry {
        backend: backends[0],
        context: contexts[0],
    };

    let mut entries = Vec::new();
    for &backend in &backends {
        if !backend_supported(backend, options, caps) {
            continue;
        }
        for &context in &contexts {
            if !context_supported(context, options, caps, shape) {
                continue;
            }
            entries.push(PlanEntry { backend, context });
        }
    }

    if entries.is_empty() {
        return Err(Error::EngineUnavailable {
            reason: "no backend/context combination is available".to_string(),
        });
    }

    let actual = entries[0];
    let mut strict = options.strict;

    if actual != requested {
        let transfer_downgrade = requested.context == ExecutionContext::WorkerStreamTransfer
            && actual.context == ExecutionContext::WorkerMessage
            && actual.backend == requested.backend;
        let reason = if transfer_downgrade {
            "stream transfer requires a streamed input"
        } else if actual.backend != requested.backend {
            "requested backend is not supported for these options"
        } else {
            "requested context is not available"
        };

        if transfer_downgrade {
            strict = false;
            debug!(requested = ?requested, actual = ?actual, reason, "context downgrade");
        } else if strict {
            return Err(Error::EngineUnavailable {
                reason: format!(
                    "strict mode: requested {:?}/{:?} is unavailable ({reason})",
                    requested.backend, requested.context
                ),
            });
        } else {
            warn!(
                requested = ?requested,
                actual = ?actual,
                reason,
                "execution plan fallback"
            );
        }
        if let Some(observer) = observer {
            observer(&FallbackNotice {
                requested,
                actual,
                reason,
            });
        }
    }

    debug!(?shape, plan = ?entries, "resolved execution plan");
    Ok(ExecutionPlan { entries, strict })
}
