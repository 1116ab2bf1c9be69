use crate::{
    error::ApiError,
    locks::LockTable,
    model::{InferParams, ModelHandle},
    normalize::{normalize, CanonicalRequest, Message, OpenAiRequest},
    registry::{ModelIdentity, ModelRegistry},
};
use anyhow::anyhow;
use serde::Serialize;
use std::{sync::Arc, time::Instant};

const ASSISTANT_ROLE: &str = "assistant";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Choice {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CompletionResponse {
    pub model: String,
    pub choices: Vec<Choice>,
}

/// Process-wide request coordinator: owns the lock table and borrows models
/// from the registry for the length of one request.
pub struct Dispatcher {
    registry: Arc<ModelRegistry>,
    locks: LockTable,
}

impl Dispatcher {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry, locks: LockTable::new() }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    /// Runs `handle` on its own task. The caller going away (e.g. a dropped
    /// HTTP connection) does not interrupt a generation that has started.
    pub async fn dispatch(self: &Arc<Self>, req: OpenAiRequest, chat: bool) -> Result<CompletionResponse, ApiError> {
        let this = self.clone();
        tokio::spawn(async move { this.handle(&req, chat).await })
            .await
            .map_err(|e| ApiError::Internal(anyhow!(e).context("dispatch task")))?
    }

    pub async fn handle(&self, req: &OpenAiRequest, chat: bool) -> Result<CompletionResponse, ApiError> {
        let identity = req.identity();
        let handle = self.resolve(&identity).await?;

        let canonical = normalize(req, chat, &*self.registry);
        let texts = self.generate(&identity, &handle, &canonical).await?;

        Ok(compose(handle.name(), &canonical, texts))
    }

    /// Looks up (and on first use loads) the model on the blocking pool.
    pub async fn resolve(&self, identity: &ModelIdentity) -> Result<ModelHandle, ApiError> {
        let registry = self.registry.clone();
        let identity = identity.clone();
        let resolved = tokio::task::spawn_blocking(move || registry.resolve(&identity))
            .await
            .map_err(|e| ApiError::Internal(anyhow!(e).context("model resolution task")))?;
        Ok(resolved?)
    }

    /// Runs all repeats under the identity's lock. The first failure discards
    /// everything produced so far.
    pub async fn generate(
        &self,
        identity: &ModelIdentity,
        handle: &ModelHandle,
        req: &CanonicalRequest,
    ) -> Result<Vec<String>, ApiError> {
        let _guard = self.locks.acquire(identity).await;

        // `n` comes from the client; grow as results arrive
        let mut out = Vec::new();
        for i in 0..req.repeat_count {
            let text = self.predict_locked(handle, &req.prompt, &req.params).await.map_err(|e| {
                tracing::warn!(model = %identity, repeat = i, error = %e, "generation failed");
                e
            })?;
            out.push(if req.echo { format!("{}{}", req.prompt, text) } else { text });
        }
        Ok(out)
    }

    /// Single prediction against the default model, serialized on the default lock.
    pub async fn predict_default(self: &Arc<Self>, prompt: String, params: InferParams) -> Result<String, ApiError> {
        let this = self.clone();
        tokio::spawn(async move {
            let handle = this.resolve(&ModelIdentity::Default).await?;
            let _guard = this.locks.acquire(&ModelIdentity::Default).await;
            this.predict_locked(&handle, &prompt, &params).await
        })
        .await
        .map_err(|e| ApiError::Internal(anyhow!(e).context("predict task")))?
    }

    async fn predict_locked(&self, handle: &ModelHandle, prompt: &str, params: &InferParams) -> Result<String, ApiError> {
        let started = Instant::now();
        let result = handle.model().predict(prompt, params).await.map_err(ApiError::Generation);
        metrics::histogram!("llama_gate_generation_seconds").record(started.elapsed().as_secs_f64());
        result
    }
}

fn compose(model: &str, req: &CanonicalRequest, texts: Vec<String>) -> CompletionResponse {
    let choices = texts
        .into_iter()
        .enumerate()
        .map(|(index, content)| {
            if req.chat {
                Choice {
                    index,
                    message: Some(Message { role: ASSISTANT_ROLE.to_owned(), content }),
                    text: None,
                }
            } else {
                Choice { index, message: None, text: Some(content) }
            }
        })
        .collect();
    CompletionResponse { model: model.to_owned(), choices }
}
