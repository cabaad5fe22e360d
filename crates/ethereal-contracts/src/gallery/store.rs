use std::sync::Arc;

use crate::notify::{ChangeBus, Subscription};
use crate::storage::LocalStorage;

use super::{
    load_list, store_list, CorruptionPolicy, GeneratedImage, ImagePatch, StoreError, StoreEvent,
    IMAGES_KEY,
};

/// Repository over the persisted image list, newest first.
pub trait GalleryStore: Send + Sync {
    fn all(&self) -> Result<Vec<GeneratedImage>, StoreError>;

    /// Prepends `image`. Ids must be unique within the list.
    fn save(&self, image: GeneratedImage) -> Result<(), StoreError>;

    /// Merges `patch` into the record with `id`; `None` when no record matched.
    fn update(&self, id: &str, patch: &ImagePatch) -> Result<Option<GeneratedImage>, StoreError>;

    /// Removes every record whose id is in `ids`, returning how many went.
    fn delete_many(&self, ids: &[String]) -> Result<usize, StoreError>;

    fn subscribe(&self) -> Subscription<StoreEvent>;

    fn get(&self, id: &str) -> Result<Option<GeneratedImage>, StoreError> {
        Ok(self.all()?.into_iter().find(|image| image.id == id))
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.delete_many(&[id.to_string()])? > 0)
    }

    fn nfts(&self) -> Result<Vec<GeneratedImage>, StoreError> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|image| image.is_nft)
            .collect())
    }
}

pub struct LocalGallery {
    storage: Arc<dyn LocalStorage>,
    policy: CorruptionPolicy,
    bus: ChangeBus<StoreEvent>,
}

impl LocalGallery {
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

    /// Shares a notification bus, e.g. with the [`super::PromptBook`].
    pub fn with_bus(mut self, bus: ChangeBus<StoreEvent>) -> Self {
        self.bus = bus;
        self
    }

    pub fn bus(&self) -> &ChangeBus<StoreEvent> {
        &self.bus
    }

    fn persist(&self, images: &[GeneratedImage], event: StoreEvent) -> Result<(), StoreError> {
        store_list(self.storage.as_ref(), IMAGES_KEY, images)?;
        self.bus.publish(event);
        Ok(())
    }
}

impl GalleryStore for LocalGallery {
    fn all(&self) -> Result<Vec<GeneratedImage>, StoreError> {
        load_list(self.storage.as_ref(), IMAGES_KEY, self.policy, &self.bus)
    }

    fn save(&self, image: GeneratedImage) -> Result<(), StoreError> {
        let mut images = self.all()?;
        if images.iter().any(|existing| existing.id == image.id) {
            return Err(StoreError::DuplicateId(image.id));
        }
        let id = image.id.clone();
        images.insert(0, image);
        self.persist(&images, StoreEvent::ImageSaved { id })
    }

    fn update(&self, id: &str, patch: &ImagePatch) -> Result<Option<GeneratedImage>, StoreError> {
        let mut images = self.all()?;
        let Some(image) = images.iter_mut().find(|image| image.id == id) else {
            return Ok(None);
        };
        patch.apply(image);
        let updated = image.clone();
        tracing::debug!(image_id = id, "gallery image updated");
        self.persist(&images, StoreEvent::ImageUpdated { id: id.to_string() })?;
        Ok(Some(updated))
    }

    fn delete_many(&self, ids: &[String]) -> Result<usize, StoreError> {
        let (removed, kept): (Vec<GeneratedImage>, Vec<GeneratedImage>) = self
            .all()?
            .into_iter()
            .partition(|image| ids.contains(&image.id));
        if removed.is_empty() {
            return Ok(0);
        }
        let removed_ids: Vec<String> = removed.into_iter().map(|image| image.id).collect();
        let count = removed_ids.len();
        tracing::debug!(removed = count, "gallery images deleted");
        self.persist(&kept, StoreEvent::ImagesDeleted { ids: removed_ids })?;
        Ok(count)
    }

    fn subscribe(&self) -> Subscription<StoreEvent> {
        self.bus.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::gallery::{
        CorruptionPolicy, GeneratedImage, ImagePatch, StoreError, StoreEvent, IMAGES_KEY,
    };
    use crate::storage::{FileStorage, LocalStorage, MemoryStorage};

    use super::{GalleryStore, LocalGallery};

    fn image(id: &str, prompt: &str) -> GeneratedImage {
        GeneratedImage::new(id, prompt, format!("https://img.test/{id}.png"), 1_000)
    }

    fn memory_gallery() -> (Arc<MemoryStorage>, LocalGallery) {
        let storage = Arc::new(MemoryStorage::new());
        let gallery = LocalGallery::new(storage.clone());
        (storage, gallery)
    }

    #[test]
    fn save_then_all_returns_image_first() -> anyhow::Result<()> {
        let (_, gallery) = memory_gallery();
        gallery.save(image("1", "sunset"))?;
        let saved = image("2", "ocean");
        gallery.save(saved.clone())?;

        let all = gallery.all()?;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], saved);
        assert_eq!(all[1].id, "1");
        Ok(())
    }

    #[test]
    fn save_rejects_duplicate_ids() -> anyhow::Result<()> {
        let (_, gallery) = memory_gallery();
        gallery.save(image("1", "sunset"))?;
        let err = gallery.save(image("1", "again")).err();
        assert!(matches!(err, Some(StoreError::DuplicateId(id)) if id == "1"));
        assert_eq!(gallery.all()?.len(), 1);
        Ok(())
    }

    #[test]
    fn update_is_idempotent() -> anyhow::Result<()> {
        let (_, gallery) = memory_gallery();
        gallery.save(image("1", "sunset"))?;
        let patch = ImagePatch::minted("0xabc", "#demo-mode", Some("4242".to_string()), "0x0");

        let once = gallery.update("1", &patch)?;
        let stored_once = gallery.all()?;
        let twice = gallery.update("1", &patch)?;
        let stored_twice = gallery.all()?;

        assert_eq!(once, twice);
        assert_eq!(stored_once, stored_twice);
        assert!(stored_twice[0].is_nft);
        Ok(())
    }

    #[test]
    fn update_unknown_id_leaves_storage_alone() -> anyhow::Result<()> {
        let (_, gallery) = memory_gallery();
        gallery.save(image("1", "sunset"))?;
        let events = gallery.subscribe();
        assert_eq!(gallery.update("missing", &ImagePatch::default())?, None);
        assert!(events.drain().is_empty());
        Ok(())
    }

    #[test]
    fn delete_removes_exactly_the_matching_record() -> anyhow::Result<()> {
        let (_, gallery) = memory_gallery();
        for id in ["1", "2", "3", "4"] {
            gallery.save(image(id, "p"))?;
        }
        assert!(gallery.delete("3")?);
        let ids: Vec<String> = gallery.all()?.into_iter().map(|image| image.id).collect();
        assert_eq!(ids, vec!["4", "2", "1"]);
        assert!(!gallery.delete("3")?);
        Ok(())
    }

    #[test]
    fn delete_many_and_nfts() -> anyhow::Result<()> {
        let (_, gallery) = memory_gallery();
        for id in ["1", "2", "3"] {
            gallery.save(image(id, "p"))?;
        }
        let events = gallery.subscribe();
        gallery.update("2", &ImagePatch::minted("0x1", "#demo-mode", Some("1000".to_string()), "0x0"))?;
        assert_eq!(gallery.nfts()?.len(), 1);

        let removed = gallery.delete_many(&["1".to_string(), "2".to_string(), "9".to_string()])?;
        assert_eq!(removed, 2);
        assert_eq!(gallery.all()?.len(), 1);
        assert!(gallery.nfts()?.is_empty());
        assert_eq!(
            events.drain().pop(),
            Some(StoreEvent::ImagesDeleted {
                ids: vec!["2".to_string(), "1".to_string()]
            })
        );
        assert_eq!(gallery.delete_many(&["9".to_string()])?, 0);
        assert!(events.drain().is_empty());
        Ok(())
    }

    #[test]
    fn mutations_publish_after_persisting() -> anyhow::Result<()> {
        let (_, gallery) = memory_gallery();
        let events = gallery.subscribe();
        gallery.save(image("1", "p"))?;
        gallery.update("1", &ImagePatch::default())?;
        gallery.delete("1")?;
        assert_eq!(
            events.drain(),
            vec![
                StoreEvent::ImageSaved { id: "1".to_string() },
                StoreEvent::ImageUpdated { id: "1".to_string() },
                StoreEvent::ImagesDeleted {
                    ids: vec!["1".to_string()]
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn corrupt_list_resets_to_empty_by_default() -> anyhow::Result<()> {
        let (storage, gallery) = memory_gallery();
        storage.set_item(IMAGES_KEY, "[{broken")?;
        let events = gallery.subscribe();

        assert!(gallery.all()?.is_empty());
        assert_eq!(storage.get_item(IMAGES_KEY)?.as_deref(), Some("[]"));
        assert_eq!(
            storage.get_item(&format!("{IMAGES_KEY}.corrupt"))?.as_deref(),
            Some("[{broken")
        );
        assert_eq!(
            events.drain(),
            vec![StoreEvent::Reset {
                key: IMAGES_KEY.to_string()
            }]
        );
        Ok(())
    }

    #[test]
    fn corrupt_list_can_be_surfaced() -> anyhow::Result<()> {
        let storage = Arc::new(MemoryStorage::new());
        storage.set_item(IMAGES_KEY, "not json")?;
        let gallery = LocalGallery::new(storage.clone()).with_policy(CorruptionPolicy::Surface);

        assert!(matches!(gallery.all(), Err(StoreError::Corrupt { .. })));
        assert_eq!(storage.get_item(IMAGES_KEY)?.as_deref(), Some("not json"));
        Ok(())
    }

    #[test]
    fn file_backed_gallery_survives_reopen() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("storage.json");
        LocalGallery::new(Arc::new(FileStorage::new(&path))).save(image("1", "sunset"))?;

        let reopened = LocalGallery::new(Arc::new(FileStorage::new(&path)));
        assert_eq!(reopened.get("1")?.map(|image| image.prompt), Some("sunset".to_string()));
        Ok(())
    }
}
