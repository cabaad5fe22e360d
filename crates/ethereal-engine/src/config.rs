use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

pub const DEFAULT_DATA_DIR: &str = ".ethereal-canvas";
pub const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_STABILITY_API_URL: &str =
    "https://api.stability.ai/v1/generation/stable-diffusion-xl-1024-v1-0/text-to-image";
pub const DEFAULT_HUGGING_FACE_API_URL: &str =
    "https://api-inference.huggingface.co/models/runwayml/stable-diffusion-v1-5";
pub const DEFAULT_IMAGE_SIZE: u32 = 1024;

/// Runtime settings, read once from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct StudioConfig {
    pub data_dir: PathBuf,
    pub proxy_base: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_api_base: String,
    pub stability_api_key: Option<String>,
    pub stability_api_url: String,
    pub hugging_face_api_key: Option<String>,
    pub hugging_face_api_url: String,
    pub image_width: u32,
    pub image_height: u32,
    pub probe_timeout: Duration,
    pub retry_timeout: Duration,
    pub wallet_rpc_url: Option<String>,
    /// Raw `chainId=address` pairs layered over the built-in contract table.
    pub contract_overrides: Option<String>,
    pub mint_fee_wei: Option<u128>,
    pub simulated_mint_delay: Duration,
    pub receipt_timeout: Duration,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            proxy_base: None,
            openai_api_key: None,
            openai_api_base: DEFAULT_OPENAI_API_BASE.to_string(),
            stability_api_key: None,
            stability_api_url: DEFAULT_STABILITY_API_URL.to_string(),
            hugging_face_api_key: None,
            hugging_face_api_url: DEFAULT_HUGGING_FACE_API_URL.to_string(),
            image_width: DEFAULT_IMAGE_SIZE,
            image_height: DEFAULT_IMAGE_SIZE,
            probe_timeout: Duration::from_millis(15_000),
            retry_timeout: Duration::from_millis(10_000),
            wallet_rpc_url: None,
            contract_overrides: None,
            mint_fee_wei: None,
            simulated_mint_delay: Duration::from_millis(3_000),
            receipt_timeout: Duration::from_secs(120),
        }
    }
}

impl StudioConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(non_empty_env)
    }

    /// Builds a config from any key lookup; values are expected trimmed and non-empty.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let api_key = |key: &str| lookup(key).filter(|value| !is_placeholder_key(value));
        let base_url = |key: &str| lookup(key).map(|value| value.trim_end_matches('/').to_string());

        Ok(Self {
            data_dir: lookup("ETHEREAL_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            proxy_base: base_url("ETHEREAL_PROXY_BASE"),
            openai_api_key: api_key("OPENAI_API_KEY"),
            openai_api_base: base_url("OPENAI_API_BASE").unwrap_or(defaults.openai_api_base),
            stability_api_key: api_key("STABILITY_API_KEY"),
            stability_api_url: lookup("STABILITY_API_URL").unwrap_or(defaults.stability_api_url),
            hugging_face_api_key: api_key("HUGGING_FACE_API_KEY"),
            hugging_face_api_url: lookup("HUGGING_FACE_API_URL")
                .unwrap_or(defaults.hugging_face_api_url),
            image_width: defaults.image_width,
            image_height: defaults.image_height,
            probe_timeout: parse_millis(&lookup, "ETHEREAL_PROBE_TIMEOUT_MS")?
                .unwrap_or(defaults.probe_timeout),
            retry_timeout: parse_millis(&lookup, "ETHEREAL_RETRY_TIMEOUT_MS")?
                .unwrap_or(defaults.retry_timeout),
            wallet_rpc_url: lookup("ETHEREAL_WALLET_RPC_URL"),
            contract_overrides: lookup("ETHEREAL_CONTRACTS"),
            mint_fee_wei: lookup("ETHEREAL_MINT_FEE_WEI")
                .map(|raw| {
                    raw.parse::<u128>()
                        .with_context(|| format!("ETHEREAL_MINT_FEE_WEI is not a wei amount: {raw}"))
                })
                .transpose()?,
            simulated_mint_delay: parse_millis(&lookup, "ETHEREAL_SIMULATED_MINT_DELAY_MS")?
                .unwrap_or(defaults.simulated_mint_delay),
            receipt_timeout: lookup("ETHEREAL_RECEIPT_TIMEOUT_S")
                .map(|raw| {
                    raw.parse::<u64>()
                        .map(Duration::from_secs)
                        .with_context(|| format!("ETHEREAL_RECEIPT_TIMEOUT_S is not whole seconds: {raw}"))
                })
                .transpose()?
                .unwrap_or(defaults.receipt_timeout),
        })
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn storage_path(&self) -> PathBuf {
        self.data_dir.join("storage.json")
    }

    pub fn events_path(&self) -> PathBuf {
        self.data_dir.join("events.jsonl")
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.data_dir.join("exports")
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

/// Template values such as `YOUR_OPENAI_API_KEY_HERE` count as unset.
pub fn is_placeholder_key(value: &str) -> bool {
    let upper = value.trim().to_ascii_uppercase();
    upper.starts_with("YOUR_") && upper.ends_with("_HERE")
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_millis(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<Duration>> {
    lookup(key)
        .map(|raw| {
            raw.parse::<u64>()
                .map(Duration::from_millis)
                .with_context(|| format!("{key} is not whole milliseconds: {raw}"))
        })
        .transpose()
}
