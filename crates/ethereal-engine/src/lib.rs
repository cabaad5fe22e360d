pub mod config;
pub mod diagnostics;
pub mod export;
pub mod generate;
pub mod proxy;
pub mod wallet;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use ethereal_contracts::events::ActivityLog;
use ethereal_contracts::gallery::{GalleryStore, GeneratedImage, LocalGallery, PromptBook, StoreEvent};
use ethereal_contracts::notify::{ChangeBus, Subscription};
use ethereal_contracts::storage::{FileStorage, LocalStorage};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};

use crate::config::StudioConfig;
use crate::diagnostics::{storage_report, test_all_images, LoadReport, StorageReport};
use crate::generate::{
    GenerationError, GenerationOutcome, GenerationRequest, HttpImageProbe, ImageSequencer,
};
use crate::wallet::{
    JsonRpcWallet, MintError, MintResult, Minter, WalletError, WalletProvider, WalletSession,
    WalletState,
};

pub use crate::wallet::ConfirmSwitch;

/// A generated image that made it into the gallery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudioGeneration {
    pub image: GeneratedImage,
    pub outcome: GenerationOutcome,
}

/// Everything one user session touches: gallery, prompt book, generation
/// chain, wallet and minter, sharing a single activity log.
pub struct Studio {
    config: StudioConfig,
    http: HttpClient,
    gallery: Arc<LocalGallery>,
    prompts: PromptBook,
    sequencer: ImageSequencer,
    wallet: WalletSession,
    minter: Minter,
    activity: ActivityLog,
    last_id: i64,
}

impl Studio {
    /// File-backed studio rooted at `config.data_dir`.
    pub fn open(config: StudioConfig) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("failed to create {}", config.data_dir.display()))?;
        let http = HttpClient::new();
        let storage: Arc<dyn LocalStorage> = Arc::new(FileStorage::new(config.storage_path()));
        let activity = ActivityLog::for_new_session(config.events_path());
        let probe = Arc::new(HttpImageProbe::with_client(http.clone()));
        let sequencer = ImageSequencer::from_config(&config, &http, probe);
        let provider = config.wallet_rpc_url.as_ref().map(|endpoint| {
            Arc::new(JsonRpcWallet::new(endpoint.clone(), http.clone())) as Arc<dyn WalletProvider>
        });
        tracing::info!(
            data_dir = %config.data_dir.display(),
            sources = ?sequencer.source_names(),
            wallet_rpc = provider.is_some(),
            "studio opened"
        );
        Self::with_parts(config, http, storage, sequencer, provider, activity)
    }

    pub fn with_parts(
        config: StudioConfig,
        http: HttpClient,
        storage: Arc<dyn LocalStorage>,
        sequencer: ImageSequencer,
        provider: Option<Arc<dyn WalletProvider>>,
        activity: ActivityLog,
    ) -> Result<Self> {
        let bus: ChangeBus<StoreEvent> = ChangeBus::new();
        let gallery = Arc::new(LocalGallery::new(Arc::clone(&storage)).with_bus(bus.clone()));
        let prompts = PromptBook::new(storage).with_bus(bus);
        let minter = Minter::from_config(&config)?.with_activity(activity.clone());
        Ok(Self {
            sequencer: sequencer.with_activity(activity.clone()),
            wallet: WalletSession::new(provider).with_activity(activity.clone()),
            config,
            http,
            gallery,
            prompts,
            minter,
            activity,
            last_id: 0,
        })
    }

    pub fn config(&self) -> &StudioConfig {
        &self.config
    }

    pub fn gallery(&self) -> &dyn GalleryStore {
        &*self.gallery
    }

    pub fn prompts(&self) -> &PromptBook {
        &self.prompts
    }

    pub fn sequencer(&self) -> &ImageSequencer {
        &self.sequencer
    }

    pub fn wallet(&self) -> &WalletSession {
        &self.wallet
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    pub fn subscribe(&self) -> Subscription<StoreEvent> {
        self.gallery.subscribe()
    }

    /// Records the prompt, runs the fallback chain and stores the winner.
    pub fn generate(&mut self, prompt: &str) -> Result<StudioGeneration> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(GenerationError::EmptyPrompt.into());
        }
        self.prompts.record(prompt)?;

        let request = GenerationRequest::new(prompt)
            .with_size(self.config.image_width, self.config.image_height);
        let outcome = self.sequencer.generate(&request)?;

        let timestamp = timestamp_millis() as i64;
        let image = GeneratedImage::new(
            self.next_id(timestamp).to_string(),
            prompt,
            outcome.image_url.clone(),
            timestamp,
        );
        self.gallery.save(image.clone())?;
        self.activity.record(
            "image_saved",
            map_object(json!({
                "image_id": image.id,
                "source": outcome.source,
            })),
        );
        Ok(StudioGeneration { image, outcome })
    }

    pub fn images(&self) -> Result<Vec<GeneratedImage>> {
        Ok(self.gallery.all()?)
    }

    pub fn image(&self, id: &str) -> Result<GeneratedImage> {
        match self.gallery.get(id)? {
            Some(image) => Ok(image),
            None => bail!("no image with id {id}"),
        }
    }

    pub fn delete(&self, ids: &[String]) -> Result<usize> {
        let removed = self.gallery.delete_many(ids)?;
        if removed > 0 {
            self.activity.record(
                "images_deleted",
                map_object(json!({ "ids": ids, "removed": removed })),
            );
        }
        Ok(removed)
    }

    pub fn connect_wallet(&mut self) -> Result<WalletState, WalletError> {
        self.wallet.connect().cloned()
    }

    pub fn disconnect_wallet(&mut self) {
        self.wallet.disconnect();
    }

    /// Sets advance mode, or flips it when `enabled` is `None`.
    pub fn set_advance_mode(&mut self, enabled: Option<bool>) -> bool {
        let next = enabled.unwrap_or(!self.wallet.state().advance_mode);
        self.wallet.set_advance_mode(next);
        next
    }

    pub fn mint(
        &mut self,
        id: &str,
        confirm_switch: Option<ConfirmSwitch<'_>>,
    ) -> Result<MintResult, MintError> {
        let result = self
            .minter
            .mint(&mut self.wallet, &*self.gallery, id, confirm_switch)?;
        self.activity.record(
            "image_updated",
            map_object(json!({
                "image_id": id,
                "is_nft": true,
                "token_id": result.token_id,
            })),
        );
        Ok(result)
    }

    pub fn export(&self, id: &str) -> Result<PathBuf> {
        let image = self.image(id)?;
        export::export_image(&image, &self.config.exports_dir(), &self.http)
    }

    pub fn storage_report(&self) -> Result<StorageReport> {
        Ok(storage_report(&self.gallery.all()?))
    }

    pub fn test_images(&self) -> Result<LoadReport> {
        let probe = self.sequencer.probe();
        Ok(test_all_images(&self.gallery.all()?, probe.as_ref()))
    }

    /// Millisecond ids, bumped when two saves land in the same millisecond.
    fn next_id(&mut self, now_millis: i64) -> i64 {
        let id = now_millis.max(self.last_id + 1);
        self.last_id = id;
        id
    }
}

/// `encodeURIComponent`-style escaping: spaces become `%20`, not `+`.
pub fn encode_uri_component(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0)
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
