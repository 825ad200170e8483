//! Prelude module for convenient imports
//!
//! Re-exports the types most hosts need when embedding an engine:
//!
//! ```no_run
//! use esmhost::prelude::*;
//! ```

// Error handling
pub use crate::error::{Error, Result};

// Embedding seam
pub use crate::engine::{
    DynamicImport, DynamicImportHook, EngineValue, ImportTicket, JsValue, ModuleHandle,
    ModuleRecord, PromiseHandle, PromiseRecord, PromiseState, Referrer, RejectionOperation,
    RejectionTracker, ResolveModule, ScriptEngine, ScriptException,
};

// Event loop
pub use crate::cancel::CancelToken;
pub use crate::event_loop::{CancelFn, EnqueueFn, EventLoop, Task};

// Module system
pub use crate::modules::ModuleLoader;

// Pooling
pub use crate::pool::{EngineFactory, VmPool};

// Host services
pub use crate::timers::{TimerCallback, Timers};

// Version constant
pub use crate::VERSION;
