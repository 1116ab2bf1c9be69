use anyhow::Context;
use dotenvy::dotenv;
use llama_gate::config::Config;
use llama_gate::dispatch::Dispatcher;
use llama_gate::loader::FsModelLoader;
use llama_gate::model::{LlmBackend, ModelHandle};
use llama_gate::registry::ModelRegistry;
use llama_gate::{api, telemetry};
use std::net::SocketAddr;
use std::sync::Arc;

#[cfg(feature = "llama")]
fn backend(cfg: &Config) -> anyhow::Result<Arc<dyn LlmBackend>> {
    Ok(Arc::new(llama_gate::model::llama::LlamaBackend::new(cfg.context_size, cfg.threads, cfg.n_gpu_layers)?))
}

#[cfg(not(feature = "llama"))]
fn backend(_cfg: &Config) -> anyhow::Result<Arc<dyn LlmBackend>> {
    tracing::warn!("built without the `llama` feature, serving the echo backend");
    Ok(Arc::new(llama_gate::model::echo::EchoBackend))
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let cfg = <Config as clap::Parser>::parse();

    // logs & metrics
    telemetry::init_logging();
    if let Some(addr) = &cfg.metrics_addr {
        telemetry::init_metrics(addr)?;
    }

    let backend = backend(&cfg)?;

    // the default model is loaded eagerly; failing here is fatal
    let default = match &cfg.default_model {
        Some(path) => {
            let model = backend.load(path).with_context(|| format!("load default model {:?}", path))?;
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            tracing::info!(model = %name, "default model loaded");
            Some(ModelHandle::new(name, model))
        }
        None => None,
    };

    let loader = Arc::new(FsModelLoader::new(cfg.models_path.clone(), backend));
    let registry = Arc::new(ModelRegistry::new(loader, default));
    let dispatcher = Arc::new(Dispatcher::new(registry));

    let app = api::routes(dispatcher);
    let addr: SocketAddr = cfg.bind_addr.parse()?;

    tracing::info!(%addr, models = ?cfg.models_path, threads = cfg.threads, "listening");
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
