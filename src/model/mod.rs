use anyhow::Result;
use std::{fmt, path::Path, sync::Arc};


/// Sampling parameters for one generation call.
///
/// `batch`, `f16_kv` and `ignore_eos` are only forwarded when a request sets
/// them; `None`/`false` leaves the engine's own behaviour in place.
#[derive(Clone, Debug, PartialEq)]
pub struct InferParams {
    pub max_tokens: i32,
    pub temp: f32,
    pub top_p: f32,
    pub top_k: i32,
    pub batch: Option<u32>,
    pub f16_kv: bool,
    pub ignore_eos: bool,
}


/// One loaded model instance. Implementations need not tolerate concurrent
/// `predict` calls; callers serialize through the lock table.
#[async_trait::async_trait]
pub trait LlmModel: Send + Sync + 'static {
    async fn predict(&self, prompt: &str, params: &InferParams) -> Result<String>;
}


/// Turns a model artifact on disk into a ready `LlmModel`.
pub trait LlmBackend: Send + Sync + 'static {
    fn load(&self, path: &Path) -> Result<Arc<dyn LlmModel>>;
}


/// Shared reference to a loaded model, named by the identity it was resolved under.
#[derive(Clone)]
pub struct ModelHandle {
    name: Arc<str>,
    model: Arc<dyn LlmModel>,
}

impl ModelHandle {
    pub fn new(name: impl Into<Arc<str>>, model: Arc<dyn LlmModel>) -> Self {
        Self { name: name.into(), model }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &dyn LlmModel {
        self.model.as_ref()
    }

    /// True when both handles refer to the same loaded instance.
    pub fn same_instance(&self, other: &ModelHandle) -> bool {
        Arc::ptr_eq(&self.model, &other.model)
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle").field("name", &self.name).finish_non_exhaustive()
    }
}


pub mod echo;
#[cfg(feature = "llama")]
pub mod llama;
