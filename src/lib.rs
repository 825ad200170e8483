//! esmhost: an embeddable JavaScript runtime host
//!
//! esmhost is the substrate a server-side process uses to embed a
//! JavaScript engine: it schedules asynchronous work into a single engine
//! from arbitrary host threads, loads ECMAScript modules from disk, and
//! amortizes engine creation across concurrent requests through a worker
//! pool. The engine itself stays behind the [`ScriptEngine`] trait; any
//! embeddable implementation that can parse and link ES modules, track
//! promise rejections, and route dynamic imports through a host hook will
//! do.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use esmhost::{CancelToken, EventLoop, ModuleLoader, ScriptEngine, VmPool};
//!
//! fn serve(engine_factory: impl Fn() -> Arc<dyn ScriptEngine> + Send + Sync + 'static) {
//!     let pool = VmPool::new(4, Box::new(move || {
//!         let engine = engine_factory();
//!         let event_loop = Arc::new(EventLoop::new(&engine, CancelToken::new()));
//!         (engine, event_loop)
//!     }));
//!
//!     pool.run(|engine| {
//!         let loader = ModuleLoader::new(Arc::clone(engine), "/srv/app");
//!         loader.setup();
//!         loader.run_entrypoint("main.mjs", "export const ok = true;")?;
//!         Ok(())
//!     })
//!     .unwrap();
//! }
//! ```
//!
//! # Module Overview
//!
//! | Category | Modules |
//! |----------|---------|
//! | **Core** | [`event_loop`], [`modules`], [`pool`], [`error`](Error) |
//! | **Embedding** | [`engine`], [`cancel`] |
//! | **Host services** | [`timers`] |

pub mod cancel;
pub mod engine;
pub mod event_loop;
pub mod modules;
pub mod pool;
pub mod prelude;
pub mod timers;

mod error;

pub use cancel::CancelToken;
pub use engine::{JsValue, ModuleHandle, PromiseHandle, ScriptEngine};
pub use error::{Error, Result};
pub use event_loop::EventLoop;
pub use modules::ModuleLoader;
pub use pool::VmPool;
pub use timers::Timers;

/// esmhost version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
