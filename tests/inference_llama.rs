//! Integration test for real llama.cpp inference.
//! Requires MODEL_PATH env var pointing to a local GGUF, or one under ./models.
#![cfg(feature = "llama")]

#[tokio::test]
async fn real_inference_produces_text() -> anyhow::Result<()> {
    use llama_gate::model::{llama::LlamaBackend, InferParams, LlmBackend};
    use std::{env, fs, path::PathBuf};
    use walkdir::WalkDir;

    // Resolve model path: prefer $MODEL_PATH, else search ./models for any .gguf
    let model_path: Option<PathBuf> = env::var("MODEL_PATH")
        .ok()
        .map(PathBuf::from)
        .filter(|p| fs::metadata(p).is_ok())
        .or_else(|| {
            WalkDir::new("./models")
                .into_iter()
                .filter_map(Result::ok)
                .map(|e| e.into_path())
                .find(|p| p.extension().and_then(|s| s.to_str()) == Some("gguf"))
        });
    let Some(model_path) = model_path else {
        eprintln!("skipping: no model found, set MODEL_PATH or place a .gguf under ./models");
        return Ok(());
    };

    // Small context and few tokens keep the test reasonably fast
    let backend = LlamaBackend::new(2048, 4, 0)?;
    let model = backend.load(&model_path)?;
    let params = InferParams {
        max_tokens: 16,
        temp: 0.9,
        top_p: 0.7,
        top_k: 80,
        batch: Some(64),
        f16_kv: false,
        ignore_eos: true,
    };

    let out = model.predict("The capital of France is", &params).await?;
    assert!(!out.is_empty(), "empty generation");
    Ok(())
}
