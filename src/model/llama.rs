use super::{InferParams, LlmBackend, LlmModel};
use anyhow::{anyhow, Context, Result};
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend as LLBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::{ggml_time_us, send_logs_to_tracing, LogOptions};
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_N_BATCH: u32 = 512;

/// Process-wide llama.cpp backend; `LLBackend::init` may only succeed once.
#[derive(Clone)]
pub struct LlamaBackend {
    backend: Arc<LLBackend>,
    n_ctx: u32,
    n_threads: i32,
    n_gpu_layers: u32,
}

impl LlamaBackend {
    pub fn new(n_ctx: u32, n_threads: usize, n_gpu_layers: u32) -> Result<Self> {
        // route llama.cpp logs to tracing so they appear in server logs when RUST_LOG is set
        send_logs_to_tracing(LogOptions::default());

        let backend = LLBackend::init().context("init llama backend")?;
        Ok(Self {
            backend: Arc::new(backend),
            n_ctx,
            n_threads: i32::try_from(n_threads).unwrap_or(i32::MAX),
            n_gpu_layers,
        })
    }
}

impl LlmBackend for LlamaBackend {
    fn load(&self, path: &Path) -> Result<Arc<dyn LlmModel>> {
        let mut model_params = LlamaModelParams::default();
        if self.n_gpu_layers > 0 {
            model_params = model_params.with_n_gpu_layers(self.n_gpu_layers);
        }

        let model = LlamaModel::load_from_file(&self.backend, path, &model_params)
            .with_context(|| format!("load GGUF model {:?}", path))?;

        Ok(Arc::new(LlamaInstance {
            inner: Arc::new(Inner {
                backend: self.backend.clone(),
                model,
                n_ctx: self.n_ctx,
                n_threads: self.n_threads,
            }),
        }))
    }
}

struct Inner {
    backend: Arc<LLBackend>,
    model: LlamaModel,
    n_ctx: u32,
    n_threads: i32,
}

pub struct LlamaInstance {
    inner: Arc<Inner>,
}

#[async_trait::async_trait]
impl LlmModel for LlamaInstance {
    async fn predict(&self, prompt: &str, p: &InferParams) -> Result<String> {
        let inner = self.inner.clone();
        let prompt = prompt.to_owned();
        let p = p.clone();
        tokio::task::spawn_blocking(move || inner.generate(&prompt, &p))
            .await
            .context("llama generation task")?
    }
}

impl Inner {
    fn generate(&self, prompt: &str, p: &InferParams) -> Result<String> {
        let n_batch = p.batch.filter(|b| *b > 0).unwrap_or(DEFAULT_N_BATCH);
        // f16_kv is accepted and has no effect here: the context is built with
        // llama.cpp's default KV cache type, which is already f16.

        // Fresh context per call; the model weights are shared, the KV state is not.
        let n_ctx = NonZeroU32::new(self.n_ctx).ok_or_else(|| anyhow!("context size must be non-zero"))?;
        let ctx_params = LlamaContextParams::default()
            .with_n_ctx(Some(n_ctx))
            .with_n_batch(n_batch)
            .with_n_threads(self.n_threads)
            .with_n_threads_batch(self.n_threads);

        let mut ctx = self
            .model
            .new_context(&self.backend, ctx_params)
            .context("create llama context")?;

        let tokens_list = self
            .model
            .str_to_token(prompt, AddBos::Always)
            .context("tokenize prompt")?;
        if tokens_list.is_empty() {
            return Err(anyhow!("prompt produced no tokens"));
        }

        let n_ctx = ctx.n_ctx() as i32;
        let max_new = p.max_tokens.min((n_ctx - 8).saturating_sub(tokens_list.len() as i32));
        if max_new <= 0 {
            return Err(anyhow!("prompt too long for context"));
        }

        // Feed the prompt in n_batch sized chunks; logits only for the final token.
        let mut batch = LlamaBatch::new(n_batch as usize, 1);
        let last_index = tokens_list.len() - 1;
        for (chunk_no, chunk) in tokens_list.chunks(n_batch as usize).enumerate() {
            batch.clear();
            for (j, token) in chunk.iter().enumerate() {
                let pos = chunk_no * n_batch as usize + j;
                batch.add(*token, pos as i32, &[0], pos == last_index)?;
            }
            ctx.decode(&mut batch).context("decode prompt")?;
        }

        let mut sampler = LlamaSampler::chain_simple([
            LlamaSampler::top_k(p.top_k),
            LlamaSampler::top_p(p.top_p, 1),
            LlamaSampler::temp(p.temp),
            LlamaSampler::dist(ggml_time_us() as u32),
        ]);

        let mut n_cur = tokens_list.len() as i32;
        let mut n_decode = 0;
        let t_main_start = ggml_time_us();

        let mut out = String::new();
        let mut decoder = encoding_rs::UTF_8.new_decoder();

        while n_decode < max_new {
            let token = sampler.sample(&ctx, batch.n_tokens() - 1);
            sampler.accept(token);

            if !p.ignore_eos && self.model.is_eog_token(token) {
                break;
            }

            let output_bytes = self.model.token_to_bytes(token, Special::Tokenize)?;
            let mut output_string = String::with_capacity(16);
            let _ = decoder.decode_to_string(&output_bytes, &mut output_string, false);
            out.push_str(&output_string);

            batch.clear();
            batch.add(token, n_cur, &[0], true)?;
            n_cur += 1;
            ctx.decode(&mut batch).context("decode step")?;
            n_decode += 1;
        }

        let duration = Duration::from_micros((ggml_time_us() - t_main_start) as u64);
        tracing::debug!(tokens = n_decode, ?duration, "llama generation finished");
        Ok(out)
    }
}
