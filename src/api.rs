use crate::{
    dispatch::{CompletionResponse, Dispatcher},
    error::ApiError,
    model::InferParams,
    normalize::OpenAiRequest,
};
use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{collections::HashMap, str::FromStr, sync::Arc};

// /predict keeps its own defaults, separate from the OpenAI endpoints.
const PREDICT_TOP_P: &str = "0.9";
const PREDICT_TOP_K: &str = "40";
const PREDICT_TEMPERATURE: &str = "0.5";
const PREDICT_TOKENS: &str = "128";

#[derive(Serialize)]
pub struct ModelEntry {
    pub id: String,
    pub object: &'static str,
}

#[derive(Serialize)]
pub struct ModelList {
    pub object: &'static str,
    pub data: Vec<ModelEntry>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct PredictReq {
    pub text: String,
}

#[derive(Serialize)]
pub struct PredictResp {
    pub prediction: String,
}

pub fn routes(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/completions", post(completions))
        .route("/v1/models", get(list_models))
        .route("/predict", post(predict))
        .with_state(dispatcher)
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::MalformedRequest(e.to_string()))
}

async fn chat_completions(
    State(dispatcher): State<Arc<Dispatcher>>,
    body: Bytes,
) -> Result<Json<CompletionResponse>, ApiError> {
    metrics::counter!("llama_gate_requests_total", "endpoint" => "chat").increment(1);
    let req: OpenAiRequest = parse_body(&body)?;
    Ok(Json(dispatcher.dispatch(req, true).await?))
}

async fn completions(
    State(dispatcher): State<Arc<Dispatcher>>,
    body: Bytes,
) -> Result<Json<CompletionResponse>, ApiError> {
    metrics::counter!("llama_gate_requests_total", "endpoint" => "completions").increment(1);
    let req: OpenAiRequest = parse_body(&body)?;
    Ok(Json(dispatcher.dispatch(req, false).await?))
}

async fn list_models(State(dispatcher): State<Arc<Dispatcher>>) -> Result<Json<ModelList>, ApiError> {
    metrics::counter!("llama_gate_requests_total", "endpoint" => "models").increment(1);
    let names = tokio::task::spawn_blocking(move || dispatcher.registry().list_names())
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!(e).context("model listing task")))?
        .map_err(ApiError::Listing)?;
    Ok(Json(ModelList {
        object: "list",
        data: names.into_iter().map(|id| ModelEntry { id, object: "model" }).collect(),
    }))
}

fn query_param<T: FromStr>(query: &HashMap<String, String>, key: &str, default: &str) -> Result<T, ApiError>
where
    T::Err: std::fmt::Display,
{
    let raw = query.get(key).map(String::as_str).unwrap_or(default);
    raw.parse()
        .map_err(|e| ApiError::MalformedRequest(format!("query parameter {key}={raw:?}: {e}")))
}

async fn predict(
    State(dispatcher): State<Arc<Dispatcher>>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Result<Json<PredictResp>, ApiError> {
    metrics::counter!("llama_gate_requests_total", "endpoint" => "predict").increment(1);
    let req: PredictReq = parse_body(&body)?;
    let params = InferParams {
        top_p: query_param(&query, "topP", PREDICT_TOP_P)?,
        top_k: query_param(&query, "topK", PREDICT_TOP_K)?,
        temp: query_param(&query, "temperature", PREDICT_TEMPERATURE)?,
        max_tokens: query_param(&query, "tokens", PREDICT_TOKENS)?,
        batch: None,
        f16_kv: false,
        ignore_eos: false,
    };

    let prediction = dispatcher.predict_default(req.text, params).await?;
    Ok(Json(PredictResp { prediction }))
}
