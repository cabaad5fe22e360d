mod history;
mod store;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::notify::ChangeBus;
use crate::storage::{LocalStorage, StorageError};

pub use history::{PromptBook, HISTORY_LIMIT};
pub use store::{GalleryStore, LocalGallery};

pub const IMAGES_KEY: &str = "ethereal_canvas_images";
pub const HISTORY_KEY: &str = "ethereal_canvas_prompt_history";
pub const FAVORITES_KEY: &str = "ethereal_canvas_favorite_prompts";

/// One generated artwork as persisted in the gallery list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedImage {
    pub id: String,
    pub prompt: String,
    pub image_url: String,
    pub timestamp: i64,
    #[serde(rename = "isNFT", default)]
    pub is_nft: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nft_transaction_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nft_explorer_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
}

impl GeneratedImage {
    pub fn new(
        id: impl Into<String>,
        prompt: impl Into<String>,
        image_url: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            image_url: image_url.into(),
            timestamp,
            is_nft: false,
            nft_transaction_hash: None,
            nft_explorer_url: None,
            token_id: None,
            contract_address: None,
        }
    }
}

/// Partial update for a [`GeneratedImage`]; unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImagePatch {
    pub prompt: Option<String>,
    pub image_url: Option<String>,
    pub is_nft: Option<bool>,
    pub nft_transaction_hash: Option<String>,
    pub nft_explorer_url: Option<String>,
    pub token_id: Option<String>,
    pub contract_address: Option<String>,
}

impl ImagePatch {
    pub fn minted(
        transaction_hash: impl Into<String>,
        explorer_url: impl Into<String>,
        token_id: Option<String>,
        contract_address: impl Into<String>,
    ) -> Self {
        Self {
            is_nft: Some(true),
            nft_transaction_hash: Some(transaction_hash.into()),
            nft_explorer_url: Some(explorer_url.into()),
            token_id,
            contract_address: Some(contract_address.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn apply(&self, image: &mut GeneratedImage) {
        if let Some(prompt) = &self.prompt {
            image.prompt = prompt.clone();
        }
        if let Some(image_url) = &self.image_url {
            image.image_url = image_url.clone();
        }
        if let Some(is_nft) = self.is_nft {
            image.is_nft = is_nft;
        }
        if let Some(hash) = &self.nft_transaction_hash {
            image.nft_transaction_hash = Some(hash.clone());
        }
        if let Some(url) = &self.nft_explorer_url {
            image.nft_explorer_url = Some(url.clone());
        }
        if let Some(token_id) = &self.token_id {
            image.token_id = Some(token_id.clone());
        }
        if let Some(address) = &self.contract_address {
            image.contract_address = Some(address.clone());
        }
    }
}

/// Published after every persisted mutation so open views can re-read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    ImageSaved { id: String },
    ImageUpdated { id: String },
    ImagesDeleted { ids: Vec<String> },
    HistoryChanged,
    FavoritesChanged,
    Reset { key: String },
}

/// What to do when a stored list no longer parses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CorruptionPolicy {
    /// Keep the raw text under `<key>.corrupt` and continue with an empty list.
    #[default]
    Reset,
    /// Hand the parse error to the caller and leave storage untouched.
    Surface,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("stored value under '{key}' is not valid JSON: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("image '{0}' already exists")]
    DuplicateId(String),
}

pub(crate) fn load_list<T: DeserializeOwned>(
    storage: &dyn LocalStorage,
    key: &str,
    policy: CorruptionPolicy,
    bus: &ChangeBus<StoreEvent>,
) -> Result<Vec<T>, StoreError> {
    let raw = match storage.get_item(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Ok(Vec::new()),
        Err(StorageError::Malformed { path }) if policy == CorruptionPolicy::Reset => {
            tracing::warn!(key, path = %path.display(), "storage unreadable; starting empty");
            storage.set_item(key, "[]")?;
            bus.publish(StoreEvent::Reset {
                key: key.to_string(),
            });
            return Ok(Vec::new());
        }
        Err(err) => return Err(err.into()),
    };

    match serde_json::from_str::<Vec<T>>(&raw) {
        Ok(list) => Ok(list),
        Err(source) => match policy {
            CorruptionPolicy::Surface => Err(StoreError::Corrupt {
                key: key.to_string(),
                source,
            }),
            CorruptionPolicy::Reset => {
                tracing::warn!(key, error = %source, "stored list is corrupt; resetting to empty");
                storage.set_item(&format!("{key}.corrupt"), &raw)?;
                storage.set_item(key, "[]")?;
                bus.publish(StoreEvent::Reset {
                    key: key.to_string(),
                });
                Ok(Vec::new())
            }
        },
    }
}

pub(crate) fn store_list<T: Serialize>(
    storage: &dyn LocalStorage,
    key: &str,
    list: &[T],
) -> Result<(), StoreError> {
    let text = serde_json::to_string(list).map_err(StorageError::from)?;
    storage.set_item(key, &text)?;
    Ok(())
}
