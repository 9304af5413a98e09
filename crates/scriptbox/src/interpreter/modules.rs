//! Module registry and the resolver that fills it.

use crate::encoding;
use crate::interpreter::Interpreter;
use rhai::{Engine, EvalAltResult, Module, ModuleResolver, Position, Scope, Shared};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

type SharedModule = Shared<Module>;

/// Extension appended to import paths that do not name one.
pub const MODULE_EXTENSION: &str = "rhai";

/// Loaded modules keyed by the name they were imported under.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    loaded: RwLock<BTreeMap<String, SharedModule>>,
}

impl ModuleRegistry {
    /// Names of every loaded module.
    #[must_use]
    pub fn names(&self) -> BTreeSet<String> {
        self.loaded
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<SharedModule> {
        self.loaded
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.loaded
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn insert(&self, name: impl Into<String>, module: SharedModule) {
        self.loaded
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), module);
    }

    /// Remove a module. Returns whether it was loaded.
    pub fn evict(&self, name: &str) -> bool {
        self.loaded
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    /// Evict every module whose name is not in `keep`; returns the evicted names.
    pub fn retain_only(&self, keep: &BTreeSet<String>) -> Vec<String> {
        let mut loaded = self.loaded.write().unwrap_or_else(PoisonError::into_inner);
        let evicted: Vec<String> = loaded
            .keys()
            .filter(|name| !keep.contains(*name))
            .cloned()
            .collect();
        for name in &evicted {
            loaded.remove(name);
        }
        evicted
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.loaded
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolves `import` statements against the interpreter's search path and
/// caches the result in its [`ModuleRegistry`].
#[derive(Debug)]
pub struct ModuleLoader {
    interpreter: Interpreter,
    default_encoding: String,
}

impl ModuleLoader {
    #[must_use]
    pub fn new(interpreter: Interpreter, default_encoding: impl Into<String>) -> Self {
        Self {
            interpreter,
            default_encoding: default_encoding.into(),
        }
    }

    /// Find the file an import path refers to.
    #[must_use]
    pub fn locate(&self, path: &str) -> Option<PathBuf> {
        let mut relative = PathBuf::from(path);
        if relative.extension().is_none() {
            relative.set_extension(MODULE_EXTENSION);
        }
        if relative.is_absolute() {
            return relative.is_file().then_some(relative);
        }
        self.interpreter
            .search_path()
            .iter()
            .filter_map(|entry| search_root(entry))
            .map(|root| root.join(&relative))
            .find(|candidate| candidate.is_file())
    }

    fn load(&self, engine: &Engine, path: &str, file: &Path) -> Result<SharedModule, Box<EvalAltResult>> {
        let raw = std::fs::read(file)
            .map_err(|err| format!("failed to read module {}: {err}", file.display()))?;
        let decoded = encoding::resolve(&raw, None, &self.default_encoding)
            .map_err(|err| format!("failed to decode module {}: {err}", file.display()))?;
        let mut ast = engine.compile(decoded.text)?;
        ast.set_source(file.to_string_lossy().into_owned());
        let module = Module::eval_ast_as_new(Scope::new(), &ast, engine)?;
        tracing::debug!(module = path, file = %file.display(), "loaded module");
        Ok(module.into())
    }
}

fn search_root(entry: &str) -> Option<PathBuf> {
    if entry.is_empty() {
        std::env::current_dir().ok()
    } else {
        Some(PathBuf::from(entry))
    }
}

impl ModuleResolver for ModuleLoader {
    fn resolve(
        &self,
        engine: &Engine,
        _source: Option<&str>,
        path: &str,
        pos: Position,
    ) -> Result<SharedModule, Box<EvalAltResult>> {
        let registry = self.interpreter.modules();
        if let Some(module) = registry.get(path) {
            return Ok(module);
        }
        let file = self
            .locate(path)
            .ok_or_else(|| EvalAltResult::ErrorModuleNotFound(path.to_string(), pos))?;
        let module = self
            .load(engine, path, &file)
            .map_err(|err| EvalAltResult::ErrorInModule(path.to_string(), err, pos))?;
        registry.insert(path, module.clone());
        Ok(module)
    }
}
