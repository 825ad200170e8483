//! ESM loading and resolution for a hosted engine.
//!
//! The loader resolves import specifiers to on-disk files, memoizes
//! parse+link per absolute path, and services both static imports (through
//! the resolver callback handed to the engine's parser) and dynamic
//! `import()` (through the engine's host hook). Evaluation is caller-driven
//! and expected to happen inside an event-loop task.
//!
//! Resolution supports absolute paths and `./`/`../` relative specifiers
//! only; bare package names are rejected. Extensionless specifiers probe
//! `.js`, then `.mjs`, then `.cjs`, then `index.*` inside a directory of
//! that name.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock, Weak};

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use crate::engine::{
    normalize_exception, DynamicImport, JsValue, ModuleHandle, PromiseState, Referrer,
    ResolveModule, ScriptEngine,
};
use crate::error::{Error, Result};

/// Synthetic name given to non-module entrypoints when they run as classic
/// scripts.
const DEFAULT_SCRIPT_PATH: &str = "entrypoint.js";

/// Extensions probed for extensionless specifiers. `.js` wins over `.mjs`
/// so bare imports resolve to the most common case.
const RESOLVE_EXTENSIONS: &[&str] = &["js", "mjs", "cjs"];

/// Index files probed when the resolved base names a directory.
const INDEX_FILES: &[&str] = &["index.js", "index.mjs", "index.cjs"];

struct LoaderMaps {
    /// Absolute path -> parsed module; memoizes parse+link.
    cache: FxHashMap<PathBuf, ModuleHandle>,
    /// Parsed module -> absolute path; resolves referrer-relative imports.
    module_paths: FxHashMap<ModuleHandle, PathBuf>,
}

/// Module loader and cache for a single engine.
///
/// Constructed behind an `Arc`; the resolver and dynamic-import hooks hold
/// weak references, so dropping the last strong handle disables them.
pub struct ModuleLoader {
    engine: Arc<dyn ScriptEngine>,
    base_dir: PathBuf,
    maps: RwLock<LoaderMaps>,
    self_ref: Weak<ModuleLoader>,
}

impl ModuleLoader {
    /// Create a loader resolving referrerless imports against `base_dir`.
    pub fn new(engine: Arc<dyn ScriptEngine>, base_dir: impl Into<PathBuf>) -> Arc<Self> {
        let base_dir = clean_path(&base_dir.into());
        Arc::new_cyclic(|self_ref| Self {
            engine,
            base_dir,
            maps: RwLock::new(LoaderMaps {
                cache: FxHashMap::default(),
                module_paths: FxHashMap::default(),
            }),
            self_ref: self_ref.clone(),
        })
    }

    /// Register the dynamic-import hook with the engine.
    pub fn setup(&self) {
        let loader = self.self_ref.clone();
        self.engine.set_dynamic_import_hook(Box::new(move |request| {
            if let Some(loader) = loader.upgrade() {
                loader.import_dynamically(request);
            }
        }));
    }

    /// Run an entrypoint. A `.mjs` path parses, links, and evaluates
    /// `source` as a module and returns the evaluation promise as a value;
    /// anything else runs as a classic script under a synthetic name.
    pub fn run_entrypoint(&self, path: &str, source: &str) -> Result<JsValue> {
        let mut abs_path = PathBuf::from(path);
        if !abs_path.is_absolute() {
            abs_path = self.base_dir.join(abs_path);
        }
        let abs_path = clean_path(&abs_path);

        if abs_path.extension().and_then(|ext| ext.to_str()) != Some("mjs") {
            return self.engine.run_script(DEFAULT_SCRIPT_PATH, source);
        }

        debug!(path = %abs_path.display(), "running module entrypoint");

        let module = self
            .engine
            .parse_module(&abs_path.to_string_lossy(), source, self.resolver())
            .map_err(|source| Error::ModuleParse {
                path: abs_path.clone(),
                source: Box::new(source),
            })?;

        self.maps
            .write()
            .unwrap()
            .module_paths
            .insert(module.clone(), abs_path.clone());

        if let Err(source) = module.link() {
            self.maps.write().unwrap().module_paths.remove(&module);
            return Err(Error::ModuleLink {
                path: abs_path,
                source: Box::new(source),
            });
        }

        let Some(promise) = module.evaluate() else {
            return Ok(self.engine.undefined());
        };

        if promise.state() != PromiseState::Rejected {
            return Ok(self.engine.promise_value(&promise));
        }

        let Some(result) = promise.result() else {
            return Err(Error::EvaluationRejected { detail: None });
        };
        if result.is_null() || result.is_undefined() {
            return Err(Error::EvaluationRejected { detail: None });
        }
        if let Some(exception) = result.exported_exception() {
            return Err(normalize_exception(exception));
        }
        Err(Error::EvaluationRejected {
            detail: Some(result.display()),
        })
    }

    /// The static-import resolver handed to the engine's parser.
    fn resolver(&self) -> ResolveModule {
        let loader = self.self_ref.clone();
        Arc::new(move |referrer, specifier| {
            let loader = loader
                .upgrade()
                .ok_or_else(|| Error::engine("module loader dropped"))?;
            loader.resolve_imported_module(referrer, specifier)
        })
    }

    /// Service one `import()` request: resolve and complete the capability
    /// either way, so script can `catch` failures.
    fn import_dynamically(&self, request: DynamicImport) {
        if request.specifier.is_null() || request.specifier.is_undefined() {
            self.engine
                .finish_dynamic_import(request, Err(Error::InvalidDynamicImport));
            return;
        }

        let specifier = request.specifier.display();
        let outcome = self.resolve_imported_module(&request.referrer, &specifier);
        self.engine.finish_dynamic_import(request, outcome);
    }

    fn resolve_imported_module(&self, referrer: &Referrer, specifier: &str) -> Result<ModuleHandle> {
        if specifier.is_empty() {
            return Err(Error::EmptySpecifier);
        }

        let resolved = self.resolve_path(referrer, specifier)?;
        self.load_module(&resolved)
    }

    /// Resolve a specifier to an existing file. Absolute specifiers probe
    /// directly; relative ones resolve against the referrer's directory
    /// when known, else the loader's base directory. Anything else is a
    /// bare specifier and unsupported.
    fn resolve_path(&self, referrer: &Referrer, specifier: &str) -> Result<PathBuf> {
        if Path::new(specifier).is_absolute() {
            return self.resolve_file_path(&clean_path(Path::new(specifier)), specifier);
        }

        if !specifier.starts_with("./") && !specifier.starts_with("../") {
            return Err(Error::BareSpecifier(specifier.to_string()));
        }

        let base_dir = self
            .resolve_referrer_path(referrer)
            .and_then(|path| path.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| self.base_dir.clone());

        let resolved = clean_path(&base_dir.join(specifier));
        self.resolve_file_path(&resolved, specifier)
    }

    fn resolve_referrer_path(&self, referrer: &Referrer) -> Option<PathBuf> {
        match referrer {
            Referrer::Module(module) => self.maps.read().unwrap().module_paths.get(module).cloned(),
            Referrer::Path(path) if !path.is_empty() => {
                let path = Path::new(path);
                if path.is_absolute() {
                    Some(clean_path(path))
                } else {
                    Some(clean_path(&self.base_dir.join(path)))
                }
            }
            _ => None,
        }
    }

    /// Probe candidates for the resolved base, in deterministic order,
    /// skipping duplicates. The first existing regular file wins.
    fn resolve_file_path(&self, base: &Path, original_specifier: &str) -> Result<PathBuf> {
        let mut candidates = vec![base.to_path_buf()];

        if base.extension().is_none() {
            for ext in RESOLVE_EXTENSIONS {
                candidates.push(base.with_extension(ext));
            }
        }

        for index in INDEX_FILES {
            candidates.push(base.join(index));
        }

        let mut seen = FxHashSet::default();
        for candidate in candidates {
            let candidate = clean_path(&candidate);
            if !seen.insert(candidate.clone()) {
                continue;
            }

            match fs::metadata(&candidate) {
                Ok(meta) if meta.is_file() => return Ok(candidate),
                _ => continue,
            }
        }

        Err(Error::UnresolvedImport(original_specifier.to_string()))
    }

    /// Load the module at an absolute resolved path: cache hit, or read +
    /// parse + insert + link. A failed link rolls the insertion back so a
    /// later attempt can retry after the source changes.
    fn load_module(&self, path: &Path) -> Result<ModuleHandle> {
        if let Some(cached) = self.maps.read().unwrap().cache.get(path) {
            trace!(path = %path.display(), "module cache hit");
            return Ok(cached.clone());
        }

        let source = fs::read_to_string(path).map_err(|source| Error::ModuleRead {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(path = %path.display(), "parsing module");

        let module = self
            .engine
            .parse_module(&path.to_string_lossy(), &source, self.resolver())
            .map_err(|source| Error::ModuleParse {
                path: path.to_path_buf(),
                source: Box::new(source),
            })?;

        {
            let mut maps = self.maps.write().unwrap();
            // A concurrent caller may have won the parse race.
            if let Some(cached) = maps.cache.get(path) {
                return Ok(cached.clone());
            }
            maps.cache.insert(path.to_path_buf(), module.clone());
            maps.module_paths.insert(module.clone(), path.to_path_buf());
        }

        if let Err(source) = module.link() {
            let mut maps = self.maps.write().unwrap();
            maps.cache.remove(path);
            maps.module_paths.remove(&module);
            return Err(Error::ModuleLink {
                path: path.to_path_buf(),
                source: Box::new(source),
            });
        }

        Ok(module)
    }
}

/// Lexically clean a path: drop `.` components and fold `..` into the
/// preceding normal component, without touching the filesystem.
fn clean_path(path: &Path) -> PathBuf {
    let mut parts: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        return PathBuf::from(".");
    }

    let mut cleaned = PathBuf::new();
    for part in parts {
        cleaned.push(part.as_os_str());
    }
    cleaned
}
