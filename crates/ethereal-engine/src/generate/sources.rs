use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ethereal_contracts::providers::NamedProvider;
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};
use url::Url;

use crate::config::StudioConfig;
use crate::response_json_or_error;

pub const POLLINATIONS_IMAGE_BASE: &str = "https://image.pollinations.ai";
pub const POLLINATIONS_ALT_BASE: &str = "https://pollinations.ai";
pub const PLACEHOLDER_BASE: &str = "https://via.placeholder.com";
pub const PICSUM_BASE: &str = "https://picsum.photos";

const SIMPLE_PROMPT_MAX_CHARS: usize = 100;
const KEYED_REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

pub const PLACEHOLDER_COLORS: [&str; 8] = [
    "ff6b6b", "4ecdc4", "45b7d1", "f7b733", "5f27cd", "ff6348", "7bed9f", "ffa502",
];

/// Per-attempt inputs handed to a source.
#[derive(Debug, Clone)]
pub struct SourceContext<'a> {
    pub prompt: &'a str,
    pub enhanced: &'a str,
    pub width: u32,
    pub height: u32,
    pub seed: u64,
}

/// What a source produced for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    /// A URL that still has to be preloaded before it counts.
    Probe(String),
    /// A reference the service already returned; no preload needed.
    Ready(String),
}

pub trait ImageSource: NamedProvider + Send + Sync {
    fn candidate(&self, context: &SourceContext<'_>) -> Result<Candidate>;
}

/// Keyless URL builders, in chain order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicSource {
    Proxy { base: String },
    PollinationsEnhanced,
    PollinationsSimple,
    PollinationsAlt,
    Placeholder,
    Picsum,
}

impl NamedProvider for PublicSource {
    fn name(&self) -> &str {
        match self {
            Self::Proxy { .. } => "Pollinations Proxy",
            Self::PollinationsEnhanced => "Pollinations Enhanced",
            Self::PollinationsSimple => "Pollinations Simple",
            Self::PollinationsAlt => "Pollinations Alt",
            Self::Placeholder => "Placeholder",
            Self::Picsum => "Picsum",
        }
    }
}

impl ImageSource for PublicSource {
    fn candidate(&self, context: &SourceContext<'_>) -> Result<Candidate> {
        let (width, height, seed) = (
            context.width.to_string(),
            context.height.to_string(),
            context.seed.to_string(),
        );
        let (width, height, seed) = (width.as_str(), height.as_str(), seed.as_str());
        let url = match self {
            Self::Proxy { base } => build_url(
                base,
                &["api", "image", context.enhanced],
                &[
                    ("width", width),
                    ("height", height),
                    ("seed", seed),
                    ("nologo", "true"),
                    ("enhance", "true"),
                ],
            )?,
            Self::PollinationsEnhanced => build_url(
                POLLINATIONS_IMAGE_BASE,
                &["prompt", context.enhanced],
                &[
                    ("width", width),
                    ("height", height),
                    ("seed", seed),
                    ("nologo", "true"),
                    ("enhance", "true"),
                ],
            )?,
            Self::PollinationsSimple => {
                let simple: String = context.prompt.chars().take(SIMPLE_PROMPT_MAX_CHARS).collect();
                build_url(
                    POLLINATIONS_IMAGE_BASE,
                    &["prompt", simple.as_str()],
                    &[
                        ("width", width),
                        ("height", height),
                        ("seed", seed),
                        ("nologo", "true"),
                    ],
                )?
            }
            Self::PollinationsAlt => build_url(
                POLLINATIONS_ALT_BASE,
                &["p", context.prompt],
                &[("width", width), ("height", height), ("seed", seed)],
            )?,
            Self::Placeholder => {
                let color = PLACEHOLDER_COLORS
                    .choose(&mut rand::thread_rng())
                    .copied()
                    .unwrap_or(PLACEHOLDER_COLORS[0]);
                format!("{PLACEHOLDER_BASE}/{width}/{color}/ffffff?text=AI%20Generated%20Art")
            }
            Self::Picsum => {
                let image_id: u32 = rand::thread_rng().gen_range(1..=1000);
                format!("{PICSUM_BASE}/{width}/{height}?random={image_id}&blur=0")
            }
        };
        Ok(Candidate::Probe(url))
    }
}

/// Joins path segments (each percent-encoded) and query pairs onto `base`.
fn build_url(base: &str, segments: &[&str], query: &[(&str, &str)]) -> Result<String> {
    let mut url = Url::parse(base).with_context(|| format!("invalid base url {base}"))?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("base url {base} cannot carry a path"))?
        .pop_if_empty()
        .extend(segments);
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }
    Ok(url.to_string())
}

pub struct OpenAiSource {
    api_base: String,
    api_key: String,
    http: HttpClient,
}

impl OpenAiSource {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>, http: HttpClient) -> Self {
        Self {
            api_base: api_base.into(),
            api_key: api_key.into(),
            http,
        }
    }
}

impl NamedProvider for OpenAiSource {
    fn name(&self) -> &str {
        "OpenAI DALL-E 3"
    }
}

impl ImageSource for OpenAiSource {
    fn candidate(&self, context: &SourceContext<'_>) -> Result<Candidate> {
        let endpoint = format!("{}/images/generations", self.api_base);
        let response = self
            .http
            .post(&endpoint)
            .timeout(KEYED_REQUEST_TIMEOUT)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": "dall-e-3",
                "prompt": context.enhanced,
                "n": 1,
                "size": "1024x1024",
                "quality": "standard",
                "style": "vivid",
            }))
            .send()
            .with_context(|| format!("openai request failed ({endpoint})"))?;
        let payload = response_json_or_error("openai", response)?;

        let first = payload
            .get("data")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first());
        if let Some(url) = first.and_then(|row| row.get("url")).and_then(Value::as_str) {
            return Ok(Candidate::Ready(url.to_string()));
        }
        if let Some(b64) = first.and_then(|row| row.get("b64_json")).and_then(Value::as_str) {
            return Ok(Candidate::Ready(format!("data:image/png;base64,{b64}")));
        }
        bail!("openai returned no image")
    }
}

pub struct StabilitySource {
    endpoint: String,
    api_key: String,
    http: HttpClient,
}

impl StabilitySource {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, http: HttpClient) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            http,
        }
    }
}

impl NamedProvider for StabilitySource {
    fn name(&self) -> &str {
        "Stability AI"
    }
}

impl ImageSource for StabilitySource {
    fn candidate(&self, context: &SourceContext<'_>) -> Result<Candidate> {
        let response = self
            .http
            .post(&self.endpoint)
            .timeout(KEYED_REQUEST_TIMEOUT)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&json!({
                "text_prompts": [{ "text": context.enhanced }],
                "cfg_scale": 7,
                "height": context.height,
                "width": context.width,
                "steps": 30,
                "samples": 1,
                "seed": context.seed,
            }))
            .send()
            .with_context(|| format!("stability request failed ({})", self.endpoint))?;
        let payload = response_json_or_error("stability", response)?;

        let image_b64 = payload
            .get("artifacts")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
            .and_then(|row| row.get("base64"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| anyhow!("stability response missing image bytes"))?;
        Ok(Candidate::Ready(format!("data:image/png;base64,{image_b64}")))
    }
}

/// Text-to-image over the Hugging Face inference API. Shared by the chain
/// and the proxy endpoint.
#[derive(Clone)]
pub struct HuggingFaceClient {
    endpoint: String,
    api_key: String,
    http: HttpClient,
}

impl HuggingFaceClient {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, http: HttpClient) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            http,
        }
    }

    /// Returns the generated image as a `data:image/png;base64,` URI.
    pub fn text_to_image(&self, inputs: &str, parameters: Value) -> Result<String> {
        let response = self
            .http
            .post(&self.endpoint)
            .timeout(KEYED_REQUEST_TIMEOUT)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(CONTENT_TYPE, "application/json")
            .json(&json!({
                "inputs": inputs,
                "parameters": parameters,
            }))
            .send()
            .with_context(|| format!("huggingface request failed ({})", self.endpoint))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!(
                "huggingface request failed ({}): {}",
                status.as_u16(),
                crate::truncate_text(&body, 512)
            );
        }
        let bytes = response
            .bytes()
            .context("huggingface response body read failed")?;
        if bytes.is_empty() {
            bail!("huggingface returned an empty body");
        }
        Ok(format!("data:image/png;base64,{}", BASE64.encode(&bytes)))
    }
}

pub struct HuggingFaceSource {
    client: HuggingFaceClient,
}

impl HuggingFaceSource {
    pub fn new(client: HuggingFaceClient) -> Self {
        Self { client }
    }
}

impl NamedProvider for HuggingFaceSource {
    fn name(&self) -> &str {
        "Hugging Face"
    }
}

impl ImageSource for HuggingFaceSource {
    fn candidate(&self, context: &SourceContext<'_>) -> Result<Candidate> {
        let uri = self.client.text_to_image(
            context.enhanced,
            json!({
                "width": context.width,
                "height": context.height,
                "num_inference_steps": 30,
            }),
        )?;
        Ok(Candidate::Ready(uri))
    }
}

/// The full chain for `config`: keyed services first, then the public ones.
pub fn default_sources(config: &StudioConfig, http: &HttpClient) -> Vec<Box<dyn ImageSource>> {
    let mut sources: Vec<Box<dyn ImageSource>> = Vec::new();
    if let Some(key) = config.openai_api_key.as_deref() {
        sources.push(Box::new(OpenAiSource::new(
            config.openai_api_base.as_str(),
            key,
            http.clone(),
        )));
    }
    if let Some(key) = config.stability_api_key.as_deref() {
        sources.push(Box::new(StabilitySource::new(
            config.stability_api_url.as_str(),
            key,
            http.clone(),
        )));
    }
    if let Some(key) = config.hugging_face_api_key.as_deref() {
        sources.push(Box::new(HuggingFaceSource::new(HuggingFaceClient::new(
            config.hugging_face_api_url.as_str(),
            key,
            http.clone(),
        ))));
    }
    if let Some(base) = config.proxy_base.as_deref() {
        sources.push(Box::new(PublicSource::Proxy {
            base: base.to_string(),
        }));
    }
    for source in [
        PublicSource::PollinationsEnhanced,
        PublicSource::PollinationsSimple,
        PublicSource::PollinationsAlt,
        PublicSource::Placeholder,
        PublicSource::Picsum,
    ] {
        sources.push(Box::new(source));
    }
    sources
}

#[cfg(test)]
mod tests {
    use ethereal_contracts::providers::NamedProvider;
    use reqwest::blocking::Client as HttpClient;

    use crate::config::StudioConfig;

    use super::{
        default_sources, Candidate, ImageSource, PublicSource, SourceContext, PLACEHOLDER_COLORS,
    };

    fn context<'a>(prompt: &'a str, enhanced: &'a str) -> SourceContext<'a> {
        SourceContext {
            prompt,
            enhanced,
            width: 1024,
            height: 1024,
            seed: 42,
        }
    }

    fn probe_url(source: &PublicSource, ctx: &SourceContext<'_>) -> anyhow::Result<String> {
        match source.candidate(ctx)? {
            Candidate::Probe(url) => Ok(url),
            Candidate::Ready(url) => anyhow::bail!("unexpected ready candidate {url}"),
        }
    }

    #[test]
    fn pollinations_urls_encode_the_prompt() -> anyhow::Result<()> {
        let ctx = context("red fox", "red fox, digital art");
        assert_eq!(
            probe_url(&PublicSource::PollinationsEnhanced, &ctx)?,
            "https://image.pollinations.ai/prompt/red%20fox,%20digital%20art?width=1024&height=1024&seed=42&nologo=true&enhance=true"
        );
        assert_eq!(
            probe_url(&PublicSource::PollinationsAlt, &ctx)?,
            "https://pollinations.ai/p/red%20fox?width=1024&height=1024&seed=42"
        );
        Ok(())
    }

    #[test]
    fn slashes_in_prompts_stay_inside_one_segment() -> anyhow::Result<()> {
        let ctx = context("a/b", "a/b");
        let url = probe_url(&PublicSource::PollinationsSimple, &ctx)?;
        assert!(url.starts_with("https://image.pollinations.ai/prompt/a%2Fb?"));
        Ok(())
    }

    #[test]
    fn simple_source_truncates_to_one_hundred_chars() -> anyhow::Result<()> {
        let long = "x".repeat(150);
        let ctx = context(&long, &long);
        let url = probe_url(&PublicSource::PollinationsSimple, &ctx)?;
        assert!(url.contains(&format!("/prompt/{}?", "x".repeat(100))));
        assert!(url.ends_with("&nologo=true"));
        Ok(())
    }

    #[test]
    fn proxy_source_appends_api_path() -> anyhow::Result<()> {
        let source = PublicSource::Proxy {
            base: "http://localhost:5173".to_string(),
        };
        let url = probe_url(&source, &context("cat", "cat, art"))?;
        assert!(url.starts_with("http://localhost:5173/api/image/cat,%20art?width=1024"));
        Ok(())
    }

    #[test]
    fn placeholder_and_picsum_shapes() -> anyhow::Result<()> {
        let ctx = context("cat", "cat");
        let placeholder = probe_url(&PublicSource::Placeholder, &ctx)?;
        assert!(PLACEHOLDER_COLORS.iter().any(|color| placeholder
            == format!("https://via.placeholder.com/1024/{color}/ffffff?text=AI%20Generated%20Art")));

        let picsum = probe_url(&PublicSource::Picsum, &ctx)?;
        let id: u32 = picsum
            .trim_start_matches("https://picsum.photos/1024/1024?random=")
            .trim_end_matches("&blur=0")
            .parse()?;
        assert!((1..=1000).contains(&id));
        Ok(())
    }

    #[test]
    fn default_chain_order_depends_on_keys() {
        let http = HttpClient::new();
        let names = |config: &StudioConfig| -> Vec<String> {
            default_sources(config, &http)
                .iter()
                .map(|source| source.name().to_string())
                .collect()
        };

        assert_eq!(
            names(&StudioConfig::default()),
            vec![
                "Pollinations Enhanced",
                "Pollinations Simple",
                "Pollinations Alt",
                "Placeholder",
                "Picsum",
            ]
        );

        let keyed = StudioConfig {
            openai_api_key: Some("sk".to_string()),
            hugging_face_api_key: Some("hf".to_string()),
            proxy_base: Some("http://localhost:5173".to_string()),
            ..StudioConfig::default()
        };
        let keyed_names = names(&keyed);
        assert_eq!(
            &keyed_names[..3],
            &["OpenAI DALL-E 3", "Hugging Face", "Pollinations Proxy"]
        );
        assert_eq!(keyed_names.len(), 8);
    }
}
