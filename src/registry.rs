use crate::{
    error::{LoadError, ResolveError, TemplateError},
    loader::ModelLoader,
    model::ModelHandle,
};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::{collections::HashMap, fmt, sync::Arc};

enum Attempt {
    Stale,
    Failed(LoadError),
}

/// Which model a request is for.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ModelIdentity {
    /// No model named: the handle configured at startup.
    Default,
    Named(String),
}

impl ModelIdentity {
    /// An absent or empty `model` field selects the default identity.
    pub fn from_request(model: Option<&str>) -> Self {
        match model {
            Some(name) if !name.is_empty() => ModelIdentity::Named(name.to_owned()),
            _ => ModelIdentity::Default,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            ModelIdentity::Default => None,
            ModelIdentity::Named(name) => Some(name),
        }
    }
}

impl fmt::Display for ModelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelIdentity::Default => f.write_str("<default>"),
            ModelIdentity::Named(name) => f.write_str(name),
        }
    }
}

/// Loaded models by name, populated lazily and kept for the life of the process.
///
/// Each name maps to a once-cell: the map lock is only held to find or insert
/// the cell, and concurrent first resolutions of the same name wait on that
/// cell so the artifact is loaded exactly once. A failed load removes the
/// entry, and the next resolution tries again with a fresh cell. `resolve`
/// may block on I/O and should run off the async workers.
pub struct ModelRegistry {
    loader: Arc<dyn ModelLoader>,
    default: Option<ModelHandle>,
    cache: Mutex<HashMap<String, Arc<OnceCell<ModelHandle>>>>,
}

impl ModelRegistry {
    pub fn new(loader: Arc<dyn ModelLoader>, default: Option<ModelHandle>) -> Self {
        Self { loader, default, cache: Mutex::new(HashMap::new()) }
    }

    pub fn resolve(&self, identity: &ModelIdentity) -> Result<ModelHandle, ResolveError> {
        match identity {
            ModelIdentity::Default => self.default_handle(),
            ModelIdentity::Named(name) => self.get_or_load(name),
        }
    }

    pub fn default_handle(&self) -> Result<ModelHandle, ResolveError> {
        self.default.clone().ok_or(ResolveError::NoDefault)
    }

    pub fn get_or_load(&self, name: &str) -> Result<ModelHandle, ResolveError> {
        loop {
            let cell = self.cache.lock().entry(name.to_owned()).or_default().clone();

            let attempt = cell.get_or_try_init(|| {
                // A waiter can inherit a cell whose owner failed and unlinked it.
                if !self.is_current(name, &cell) {
                    return Err(Attempt::Stale);
                }
                match self.loader.load(name) {
                    Ok(model) => {
                        metrics::counter!("llama_gate_model_loads_total").increment(1);
                        Ok(ModelHandle::new(name, model))
                    }
                    Err(e) => {
                        // unlink while still initializing, so no waiter loads into this cell
                        let mut cache = self.cache.lock();
                        if cache.get(name).is_some_and(|c| Arc::ptr_eq(c, &cell)) {
                            cache.remove(name);
                        }
                        Err(Attempt::Failed(e))
                    }
                }
            });

            match attempt {
                Ok(handle) => return Ok(handle.clone()),
                Err(Attempt::Stale) => continue,
                Err(Attempt::Failed(source)) => return Err(ResolveError::Load { name: name.to_owned(), source }),
            }
        }
    }

    fn is_current(&self, name: &str, cell: &Arc<OnceCell<ModelHandle>>) -> bool {
        self.cache.lock().get(name).is_some_and(|c| Arc::ptr_eq(c, cell))
    }

    /// Number of names with a cache entry, loaded or being loaded.
    pub fn cached_count(&self) -> usize {
        self.cache.lock().len()
    }

    /// Number of names with a loaded handle.
    pub fn loaded_count(&self) -> usize {
        self.cache.lock().values().filter(|c| c.get().is_some()).count()
    }

    pub fn list_names(&self) -> Result<Vec<String>, LoadError> {
        self.loader.list_names()
    }

    pub fn template(&self, name: &str, input: &str) -> Result<String, TemplateError> {
        self.loader.template(name, input)
    }
}
