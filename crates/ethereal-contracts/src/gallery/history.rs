use std::sync::Arc;

use crate::notify::{ChangeBus, Subscription};
use crate::storage::LocalStorage;

use super::{
    load_list, store_list, CorruptionPolicy, StoreError, StoreEvent, FAVORITES_KEY, HISTORY_KEY,
};

pub const HISTORY_LIMIT: usize = 50;

/// Recent prompts (deduplicated, newest first, capped) and favorite prompts.
pub struct PromptBook {
    storage: Arc<dyn LocalStorage>,
    policy: CorruptionPolicy,
    bus: ChangeBus<StoreEvent>,
}

impl PromptBook {
    pub fn new(storage: Arc<dyn LocalStorage>) -> Self {
        Self {
            storage,
            policy: CorruptionPolicy::default(),
            bus: ChangeBus::new(),
        }
    }

    pub fn with_policy(mut self, policy: CorruptionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_bus(mut self, bus: ChangeBus<StoreEvent>) -> Self {
        self.bus = bus;
        self
    }

    pub fn subscribe(&self) -> Subscription<StoreEvent> {
        self.bus.subscribe()
    }

    pub fn history(&self) -> Result<Vec<String>, StoreError> {
        load_list(self.storage.as_ref(), HISTORY_KEY, self.policy, &self.bus)
    }

    /// Moves `prompt` to the front of the history. Blank prompts are ignored.
    pub fn record(&self, prompt: &str) -> Result<Vec<String>, StoreError> {
        let prompt = prompt.trim();
        let mut history = self.history()?;
        if prompt.is_empty() {
            return Ok(history);
        }
        history.retain(|entry| entry != prompt);
        history.insert(0, prompt.to_string());
        history.truncate(HISTORY_LIMIT);
        store_list(self.storage.as_ref(), HISTORY_KEY, &history)?;
        self.bus.publish(StoreEvent::HistoryChanged);
        Ok(history)
    }

    pub fn clear_history(&self) -> Result<(), StoreError> {
        store_list::<String>(self.storage.as_ref(), HISTORY_KEY, &[])?;
        self.bus.publish(StoreEvent::HistoryChanged);
        Ok(())
    }

    pub fn favorites(&self) -> Result<Vec<String>, StoreError> {
        load_list(self.storage.as_ref(), FAVORITES_KEY, self.policy, &self.bus)
    }

    /// Favorites match the exact string, whitespace included.
    pub fn is_favorite(&self, prompt: &str) -> Result<bool, StoreError> {
        Ok(self.favorites()?.iter().any(|entry| entry == prompt))
    }

    /// Returns false when the prompt was already a favorite.
    pub fn add_favorite(&self, prompt: &str) -> Result<bool, StoreError> {
        if prompt.trim().is_empty() {
            return Ok(false);
        }
        let mut favorites = self.favorites()?;
        if favorites.iter().any(|entry| entry == prompt) {
            return Ok(false);
        }
        favorites.insert(0, prompt.to_string());
        self.persist_favorites(&favorites)?;
        Ok(true)
    }

    pub fn remove_favorite(&self, prompt: &str) -> Result<bool, StoreError> {
        let mut favorites = self.favorites()?;
        let before = favorites.len();
        favorites.retain(|entry| entry != prompt);
        if favorites.len() == before {
            return Ok(false);
        }
        self.persist_favorites(&favorites)?;
        Ok(true)
    }

    /// Returns whether the prompt is a favorite afterwards.
    pub fn toggle_favorite(&self, prompt: &str) -> Result<bool, StoreError> {
        if self.is_favorite(prompt)? {
            self.remove_favorite(prompt)?;
            Ok(false)
        } else {
            self.add_favorite(prompt)
        }
    }

    fn persist_favorites(&self, favorites: &[String]) -> Result<(), StoreError> {
        store_list(self.storage.as_ref(), FAVORITES_KEY, favorites)?;
        self.bus.publish(StoreEvent::FavoritesChanged);
        Ok(())
    }
}
