//! Turns chat and completion request bodies into one canonical generation input.
//!
//! Sampling fields are `Option`s on the wire, but a field sent as zero is
//! treated exactly like a missing one and gets the default below. Callers
//! therefore cannot ask for e.g. `temperature: 0`; existing clients depend on
//! the zero-means-default behaviour.

use crate::{error::TemplateError, model::InferParams, registry::{ModelIdentity, ModelRegistry}};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TOP_P: f32 = 0.7;
pub const DEFAULT_TOP_K: i32 = 80;
pub const DEFAULT_TEMPERATURE: f32 = 0.9;
pub const DEFAULT_MAX_TOKENS: i32 = 512;
pub const DEFAULT_REPEAT: u32 = 1;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// Body of `/v1/chat/completions` and `/v1/completions`.
///
/// `prompt` is only read for completions and `messages` only for chat.
/// `batch`, `f16kv` and `ignore_eos` are llama.cpp extensions.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct OpenAiRequest {
    pub model: Option<String>,
    pub prompt: Option<String>,
    pub messages: Vec<Message>,
    pub echo: Option<bool>,
    pub top_p: Option<f32>,
    pub top_k: Option<i32>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
    pub n: Option<u32>,
    pub batch: Option<u32>,
    #[serde(rename = "f16kv")]
    pub f16_kv: Option<bool>,
    pub ignore_eos: Option<bool>,
}

impl OpenAiRequest {
    pub fn identity(&self) -> ModelIdentity {
        ModelIdentity::from_request(self.model.as_deref())
    }
}

/// Fully defaulted and templated generation input for one request.
#[derive(Clone, Debug, PartialEq)]
pub struct CanonicalRequest {
    pub prompt: String,
    pub params: InferParams,
    pub repeat_count: u32,
    pub echo: bool,
    pub chat: bool,
}

/// Per-model prompt template rendering.
pub trait TemplateLookup {
    fn lookup(&self, model: &str, input: &str) -> Result<String, TemplateError>;
}

impl<F> TemplateLookup for F
where
    F: Fn(&str, &str) -> Result<String, TemplateError>,
{
    fn lookup(&self, model: &str, input: &str) -> Result<String, TemplateError> {
        self(model, input)
    }
}

impl TemplateLookup for ModelRegistry {
    fn lookup(&self, model: &str, input: &str) -> Result<String, TemplateError> {
        self.template(model, input)
    }
}

// Zero and absent are the same thing on the wire.
fn provided<T: PartialEq + Default>(v: Option<T>) -> Option<T> {
    v.filter(|v| *v != T::default())
}

pub fn normalize(req: &OpenAiRequest, chat: bool, templates: &dyn TemplateLookup) -> CanonicalRequest {
    let mut prompt = if chat {
        req.messages.iter().map(|m| m.content.as_str()).collect::<Vec<_>>().join("\n")
    } else {
        req.prompt.clone().unwrap_or_default()
    };

    if let Some(model) = req.identity().name() {
        match templates.lookup(model, &prompt) {
            Ok(templated) => prompt = templated,
            Err(e) => tracing::trace!(model, error = %e, "using raw prompt"),
        }
    }

    CanonicalRequest {
        prompt,
        params: InferParams {
            max_tokens: provided(req.max_tokens).unwrap_or(DEFAULT_MAX_TOKENS),
            temp: provided(req.temperature).unwrap_or(DEFAULT_TEMPERATURE),
            top_p: provided(req.top_p).unwrap_or(DEFAULT_TOP_P),
            top_k: provided(req.top_k).unwrap_or(DEFAULT_TOP_K),
            batch: provided(req.batch),
            f16_kv: req.f16_kv.unwrap_or(false),
            ignore_eos: req.ignore_eos.unwrap_or(false),
        },
        repeat_count: provided(req.n).unwrap_or(DEFAULT_REPEAT),
        echo: req.echo.unwrap_or(false),
        chat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn no_templates(model: &str, _input: &str) -> Result<String, TemplateError> {
        Err(TemplateError::Missing(model.to_owned()))
    }

    fn parse(v: serde_json::Value) -> OpenAiRequest {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn chat_messages_are_joined_by_newline() {
        let req = parse(json!({"messages": [{"role":"user","content":"a"},{"role":"user","content":"b"}]}));
        let c = normalize(&req, true, &no_templates);
        assert_eq!(c.prompt, "a\nb");
        assert!(c.chat);
    }

    #[test]
    fn completion_ignores_messages() {
        let req = parse(json!({"prompt": "p", "messages": [{"role":"user","content":"m"}]}));
        assert_eq!(normalize(&req, false, &no_templates).prompt, "p");
    }

    #[test]
    fn omitted_fields_get_defaults() {
        let c = normalize(&parse(json!({"prompt": "x"})), false, &no_templates);
        assert_eq!(c.params.top_p, 0.7);
        assert_eq!(c.params.top_k, 80);
        assert_eq!(c.params.temp, 0.9);
        assert_eq!(c.params.max_tokens, 512);
        assert_eq!(c.repeat_count, 1);
        assert_eq!(c.params.batch, None);
        assert!(!c.params.f16_kv && !c.params.ignore_eos && !c.echo);
    }

    #[test]
    fn zero_and_null_mean_default() {
        let req = parse(json!({
            "prompt": "x", "top_p": 0, "top_k": 0, "temperature": 0.0,
            "max_tokens": null, "n": 0, "batch": 0
        }));
        let c = normalize(&req, false, &no_templates);
        assert_eq!((c.params.top_p, c.params.top_k, c.params.temp), (0.7, 80, 0.9));
        assert_eq!(c.params.max_tokens, 512);
        assert_eq!(c.repeat_count, 1);
        assert_eq!(c.params.batch, None);
    }

    #[test]
    fn explicit_values_pass_through() {
        let req = parse(json!({
            "prompt": "x", "top_p": 0.5, "top_k": 10, "temperature": 0.2, "max_tokens": 16,
            "n": 3, "batch": 64, "f16kv": true, "ignore_eos": true, "echo": true
        }));
        let c = normalize(&req, false, &no_templates);
        assert_eq!(
            c.params,
            InferParams { max_tokens: 16, temp: 0.2, top_p: 0.5, top_k: 10, batch: Some(64), f16_kv: true, ignore_eos: true }
        );
        assert_eq!(c.repeat_count, 3);
        assert!(c.echo);
    }

    #[test]
    fn template_replaces_prompt_for_named_model() {
        let wrap = |model: &str, input: &str| -> Result<String, TemplateError> {
            assert_eq!(model, "alpaca");
            Ok(format!("### Instruction: {input}\n### Response:"))
        };
        let c = normalize(&parse(json!({"model": "alpaca", "prompt": "hi"})), false, &wrap);
        assert_eq!(c.prompt, "### Instruction: hi\n### Response:");
    }

    #[test]
    fn template_failure_keeps_raw_prompt() {
        let c = normalize(&parse(json!({"model": "alpaca", "prompt": "hi"})), false, &no_templates);
        assert_eq!(c.prompt, "hi");
    }

    #[test]
    fn default_identity_skips_templates() {
        let panicking = |_: &str, _: &str| -> Result<String, TemplateError> { panic!("lookup for default identity") };
        let c = normalize(&parse(json!({"model": "", "prompt": "hi"})), false, &panicking);
        assert_eq!(c.prompt, "hi");
    }
}
