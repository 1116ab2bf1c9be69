use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "llama-gate", about = "OpenAI-compatible API over local llama.cpp models")]
pub struct Config {
    #[arg(long, env, default_value = "0.0.0.0:8080")]
    pub bind_addr: String,
    /// Directory with model files and their `.tmpl` prompt templates
    #[arg(long, env, default_value = "./models")]
    pub models_path: PathBuf,
    /// Model loaded at startup and used when a request names none
    #[arg(long, env)]
    pub default_model: Option<PathBuf>,
    #[arg(long, env, default_value_t = num_cpus::get())]
    pub threads: usize,
    #[arg(long, env, default_value_t = 512)]
    pub context_size: u32,
    #[arg(long, env, default_value_t = 0)]
    pub n_gpu_layers: u32,
    /// Serve Prometheus metrics on this address
    #[arg(long, env)]
    pub metrics_addr: Option<String>,
}
