use super::{InferParams, LlmBackend, LlmModel};
use anyhow::{Context, Result};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

// In-process backend used when the `llama` feature is off. It answers every
// prompt with the prompt itself, cut to `max_tokens` whitespace-separated words,
// so the HTTP surface can be exercised without llama.cpp.
#[derive(Clone, Debug, Default)]
pub struct EchoBackend;

impl LlmBackend for EchoBackend {
    fn load(&self, path: &Path) -> Result<Arc<dyn LlmModel>> {
        let meta = std::fs::metadata(path).with_context(|| format!("stat model file {:?}", path))?;
        anyhow::ensure!(meta.is_file(), "{:?} is not a regular file", path);
        Ok(Arc::new(EchoModel { path: path.to_path_buf() }))
    }
}

#[derive(Debug)]
pub struct EchoModel {
    path: PathBuf,
}

#[async_trait::async_trait]
impl LlmModel for EchoModel {
    async fn predict(&self, prompt: &str, p: &InferParams) -> Result<String> {
        tracing::trace!(model = ?self.path, temp = p.temp, top_p = p.top_p, top_k = p.top_k, "echo predict");
        let limit = usize::try_from(p.max_tokens).unwrap_or(0);
        Ok(prompt.split_whitespace().take(limit).collect::<Vec<_>>().join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(max_tokens: i32) -> InferParams {
        InferParams {
            max_tokens,
            temp: 0.9,
            top_p: 0.7,
            top_k: 80,
            batch: None,
            f16_kv: false,
            ignore_eos: false,
        }
    }

    #[tokio::test]
    async fn truncates_to_max_tokens() {
        let model = EchoModel { path: PathBuf::from("mem") };
        let out = model.predict("one two  three\nfour", &params(3)).await.unwrap();
        assert_eq!(out, "one two three");
    }

    #[test]
    fn load_rejects_missing_file() {
        let missing = std::env::temp_dir().join("llama-gate-echo-does-not-exist.bin");
        assert!(EchoBackend.load(&missing).is_err());
    }
}
