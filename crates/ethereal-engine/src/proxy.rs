//! Server side of `POST /api/generate-image`.
//!
//! Transport-agnostic: the CLI mounts [`ProxyService::handle`] behind axum,
//! tests call it directly. A valid POST always gets a 200; the 500 reply
//! belongs to the transport when the handler itself cannot run.

use std::time::Duration;

use rand::Rng;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use crate::config::StudioConfig;
use crate::generate::{enhanced_prompt, HuggingFaceClient, POLLINATIONS_IMAGE_BASE};
use crate::{encode_uri_component, error_chain_text};

pub const PROXY_ROUTE: &str = "/api/generate-image";
pub const PROXY_IMAGE_SIZE: u32 = 512;
const PLACEHOLDER_BASE: &str = "https://via.placeholder.com";
const PLACEHOLDER_MESSAGE: &str =
    "Using placeholder - configure HUGGING_FACE_API_KEY for AI generation";

#[derive(Debug, Clone, PartialEq)]
pub struct ProxyReply {
    pub status: u16,
    pub body: Option<Value>,
}

impl ProxyReply {
    fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            body: Some(body),
        }
    }

    fn error(status: u16, message: &str) -> Self {
        Self::json(status, json!({ "error": message }))
    }

    pub fn source(&self) -> Option<&str> {
        self.body
            .as_ref()
            .and_then(|body| body.get("source"))
            .and_then(Value::as_str)
    }
}

pub struct ProxyService {
    http: HttpClient,
    hugging_face: Option<HuggingFaceClient>,
    pollinations_base: String,
    head_timeout: Duration,
}

impl ProxyService {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            hugging_face: None,
            pollinations_base: POLLINATIONS_IMAGE_BASE.to_string(),
            head_timeout: Duration::from_secs(10),
        }
    }

    pub fn from_config(config: &StudioConfig, http: HttpClient) -> Self {
        let hugging_face = config.hugging_face_api_key.as_ref().map(|key| {
            HuggingFaceClient::new(config.hugging_face_api_url.clone(), key.clone(), http.clone())
        });
        Self::new(http).with_hugging_face(hugging_face)
    }

    pub fn with_hugging_face(mut self, client: Option<HuggingFaceClient>) -> Self {
        self.hugging_face = client;
        self
    }

    pub fn with_pollinations_base(mut self, base: impl Into<String>) -> Self {
        self.pollinations_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_head_timeout(mut self, timeout: Duration) -> Self {
        self.head_timeout = timeout;
        self
    }

    pub fn has_hugging_face(&self) -> bool {
        self.hugging_face.is_some()
    }

    pub fn handle(&self, method: &str, body: &[u8]) -> ProxyReply {
        if method.eq_ignore_ascii_case("OPTIONS") {
            return ProxyReply {
                status: 200,
                body: None,
            };
        }
        if !method.eq_ignore_ascii_case("POST") {
            return ProxyReply::error(405, "Method not allowed");
        }

        let Some(prompt) = request_prompt(body) else {
            return ProxyReply::error(400, "Prompt is required");
        };
        ProxyReply::json(200, self.generate(&prompt))
    }

    /// Always ends in a payload: upstream failures fall through to the placeholder.
    fn generate(&self, prompt: &str) -> Value {
        let enhanced = enhanced_prompt(prompt);

        if let Some(client) = &self.hugging_face {
            let parameters = json!({
                "num_inference_steps": 50,
                "guidance_scale": 7.5,
                "width": PROXY_IMAGE_SIZE,
                "height": PROXY_IMAGE_SIZE,
            });
            match client.text_to_image(&enhanced, parameters) {
                Ok(image_url) => {
                    return json!({
                        "imageUrl": image_url,
                        "prompt": enhanced,
                        "source": "huggingface",
                    });
                }
                Err(err) => {
                    tracing::warn!(error = %error_chain_text(&err, 300), "hugging face failed, trying pollinations");
                }
            }
        }

        let seed: u32 = rand::thread_rng().gen_range(0..1_000_000);
        let pollinations_url = format!(
            "{}/prompt/{}?width={PROXY_IMAGE_SIZE}&height={PROXY_IMAGE_SIZE}&seed={seed}",
            self.pollinations_base,
            encode_uri_component(&enhanced)
        );
        match self.http.head(&pollinations_url).timeout(self.head_timeout).send() {
            Ok(response) if response.status().is_success() => {
                return json!({
                    "imageUrl": pollinations_url,
                    "prompt": enhanced,
                    "source": "pollinations",
                });
            }
            Ok(response) => {
                tracing::warn!(status = response.status().as_u16(), "pollinations HEAD rejected");
            }
            Err(err) => {
                tracing::warn!(error = %err, "pollinations HEAD failed");
            }
        }

        let label: String = prompt.chars().take(20).collect();
        let fallback_url = format!(
            "{PLACEHOLDER_BASE}/{PROXY_IMAGE_SIZE}x{PROXY_IMAGE_SIZE}/6366f1/ffffff?text={}",
            encode_uri_component(&format!("AI Art: {label}..."))
        );
        json!({
            "imageUrl": fallback_url,
            "prompt": enhanced,
            "source": "placeholder",
            "message": PLACEHOLDER_MESSAGE,
        })
    }
}

/// The `prompt` field of a JSON body; anything but a non-empty string is absent.
fn request_prompt(body: &[u8]) -> Option<String> {
    let payload: Value = serde_json::from_slice(body).ok()?;
    payload
        .get("prompt")
        .and_then(Value::as_str)
        .filter(|prompt| !prompt.is_empty())
        .map(str::to_string)
}
