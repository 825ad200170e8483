//! The embedding seam between the host and a JavaScript engine.
//!
//! The host never depends on a concrete engine. Everything it needs is
//! expressed by the [`ScriptEngine`] trait plus three opaque, reference-
//! counted handles: [`JsValue`] for engine values, [`ModuleHandle`] for
//! parsed modules, and [`PromiseHandle`] for promises. Handles compare and
//! hash by identity of their shared allocation, which is what the module
//! loader's reverse map and the event loop's pending-rejection set key on.
//!
//! Any embeddable engine that can parse and link ES modules, report promise
//! rejections, and route dynamic imports through a host hook can sit behind
//! this trait.

use std::any::Any;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Settlement state of an engine promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    Pending,
    Fulfilled,
    Rejected,
}

/// Operation reported by the engine's promise-rejection tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionOperation {
    /// A promise was rejected with no handler attached.
    Reject,
    /// A previously-rejected promise gained a handler.
    Handle,
}

/// Exception extracted from an engine error value: the message with the
/// engine's own wrapping stripped, plus the script stack if one was
/// captured.
#[derive(Debug, Clone)]
pub struct ScriptException {
    pub message: String,
    pub stack: String,
}

/// Turn an extracted engine exception into a host error.
pub fn normalize_exception(exception: ScriptException) -> Error {
    Error::Script {
        message: exception.message,
        stack: exception.stack,
    }
}

/// Engine-side value behavior consumed by the host.
pub trait EngineValue: Send + Sync {
    fn is_null(&self) -> bool;
    fn is_undefined(&self) -> bool;
    fn is_string(&self) -> bool;
    fn is_number(&self) -> bool;
    fn is_bigint(&self) -> bool;

    /// The engine's string conversion of the value.
    fn display(&self) -> String;

    /// If the value wraps a native exception, extract it.
    fn exported_exception(&self) -> Option<ScriptException>;
}

/// Opaque engine value.
#[derive(Clone)]
pub struct JsValue(pub Arc<dyn EngineValue>);

impl JsValue {
    pub fn new(value: Arc<dyn EngineValue>) -> Self {
        JsValue(value)
    }

    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }

    pub fn is_undefined(&self) -> bool {
        self.0.is_undefined()
    }

    pub fn is_string(&self) -> bool {
        self.0.is_string()
    }

    pub fn is_number(&self) -> bool {
        self.0.is_number()
    }

    pub fn is_bigint(&self) -> bool {
        self.0.is_bigint()
    }

    pub fn display(&self) -> String {
        self.0.display()
    }

    pub fn exported_exception(&self) -> Option<ScriptException> {
        self.0.exported_exception()
    }
}

impl std::fmt::Debug for JsValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JsValue({})", self.display())
    }
}

/// Engine-side behavior of a parsed module.
///
/// A record is produced by [`ScriptEngine::parse_module`], linked once its
/// static imports resolve, and evaluated by the caller. Evaluation returns
/// the module's completion promise, or `None` when the engine completed it
/// synchronously.
pub trait ModuleRecord: Send + Sync {
    fn link(&self) -> Result<()>;
    fn evaluate(&self) -> Option<PromiseHandle>;
}

/// Opaque handle for a parsed module. Identity (not content) equality.
#[derive(Clone)]
pub struct ModuleHandle(pub Arc<dyn ModuleRecord>);

impl ModuleHandle {
    pub fn link(&self) -> Result<()> {
        self.0.link()
    }

    pub fn evaluate(&self) -> Option<PromiseHandle> {
        self.0.evaluate()
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl PartialEq for ModuleHandle {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for ModuleHandle {}

impl Hash for ModuleHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl std::fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ModuleHandle({:#x})", self.addr())
    }
}

/// Engine-side behavior of a promise.
pub trait PromiseRecord: Send + Sync {
    fn state(&self) -> PromiseState;

    /// The settled value, if the promise has settled.
    fn result(&self) -> Option<JsValue>;
}

/// Opaque handle for an engine promise. Identity (not content) equality.
#[derive(Clone)]
pub struct PromiseHandle(pub Arc<dyn PromiseRecord>);

impl PromiseHandle {
    pub fn state(&self) -> PromiseState {
        self.0.state()
    }

    pub fn result(&self) -> Option<JsValue> {
        self.0.result()
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl PartialEq for PromiseHandle {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for PromiseHandle {}

impl Hash for PromiseHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl std::fmt::Debug for PromiseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PromiseHandle({:#x})", self.addr())
    }
}

/// The module or script on whose behalf an import is being resolved.
#[derive(Clone, Debug)]
pub enum Referrer {
    /// A previously parsed module.
    Module(ModuleHandle),
    /// A script path, possibly relative to the loader's base directory.
    Path(String),
    /// No referrer; resolution falls back to the base directory.
    None,
}

/// Synchronous static-import resolver handed to [`ScriptEngine::parse_module`].
/// The engine invokes it while linking, once per import specifier.
pub type ResolveModule = Arc<dyn Fn(&Referrer, &str) -> Result<ModuleHandle> + Send + Sync>;

/// Engine-owned completion capability for one dynamic import. The host
/// treats it as opaque and passes it back through
/// [`ScriptEngine::finish_dynamic_import`].
#[derive(Clone)]
pub struct ImportTicket(pub Arc<dyn Any + Send + Sync>);

impl std::fmt::Debug for ImportTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ImportTicket")
    }
}

/// One in-flight `import()` request surfaced by the engine.
#[derive(Clone, Debug)]
pub struct DynamicImport {
    pub referrer: Referrer,
    pub specifier: JsValue,
    pub ticket: ImportTicket,
}

/// Host hook invoked by the engine for each `import()` expression.
pub type DynamicImportHook = Box<dyn Fn(DynamicImport) + Send + Sync>;

/// Host hook receiving promise rejection lifecycle events.
pub type RejectionTracker = Box<dyn Fn(&PromiseHandle, RejectionOperation) + Send + Sync>;

/// Capabilities the host requires from an embeddable JavaScript engine.
///
/// Implementations must be shareable across threads; the host guarantees
/// that engine-touching calls are serialized through the engine's event
/// loop, so internal synchronization only needs to cover the hook and
/// tracker registrations.
pub trait ScriptEngine: Send + Sync {
    /// Run `source` as a classic script under the given name.
    fn run_script(&self, name: &str, source: &str) -> Result<JsValue>;

    /// Parse `source` as an ES module. The engine calls `resolver` for each
    /// static import while linking the returned record.
    fn parse_module(&self, path: &str, source: &str, resolver: ResolveModule)
        -> Result<ModuleHandle>;

    /// Install the hook servicing `import()` expressions.
    fn set_dynamic_import_hook(&self, hook: DynamicImportHook);

    /// Complete a dynamic import: resolve the request's promise capability
    /// with the module on `Ok`, reject it on `Err` so script can `catch`.
    fn finish_dynamic_import(&self, request: DynamicImport, outcome: Result<ModuleHandle>);

    /// Install the promise-rejection tracker.
    fn set_rejection_tracker(&self, tracker: RejectionTracker);

    /// The engine's `undefined` value.
    fn undefined(&self) -> JsValue;

    /// Wrap a promise as an engine value for returning to the host caller.
    fn promise_value(&self, promise: &PromiseHandle) -> JsValue;
}
