//! Troubleshooting reports over the stored gallery.

use std::time::Duration;

use ethereal_contracts::gallery::GeneratedImage;
use serde::Serialize;

use crate::generate::{ImageProbe, ProbeMode};

pub const LOAD_TEST_TIMEOUT: Duration = Duration::from_secs(10);
const PREVIEW_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UrlKind {
    Fallback,
    Generated,
}

impl UrlKind {
    pub fn classify(url: &str) -> Self {
        if url.contains("picsum.photos") {
            Self::Fallback
        } else {
            Self::Generated
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub id: String,
    pub prompt: String,
    #[serde(rename = "isNFT")]
    pub is_nft: bool,
    pub token_id: String,
    pub has_transaction_hash: bool,
    pub image_url_type: UrlKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageReport {
    pub total: usize,
    pub nft_count: usize,
    pub rows: Vec<ReportRow>,
}

pub fn storage_report(images: &[GeneratedImage]) -> StorageReport {
    let rows = images
        .iter()
        .map(|image| ReportRow {
            id: image.id.clone(),
            prompt: format!(
                "{}...",
                image.prompt.chars().take(PREVIEW_CHARS).collect::<String>()
            ),
            is_nft: image.is_nft,
            token_id: image
                .token_id
                .clone()
                .filter(|token| !token.is_empty())
                .unwrap_or_else(|| "N/A".to_string()),
            has_transaction_hash: image
                .nft_transaction_hash
                .as_deref()
                .is_some_and(|hash| !hash.is_empty()),
            image_url_type: UrlKind::classify(&image.image_url),
        })
        .collect();
    StorageReport {
        total: images.len(),
        nft_count: images.iter().filter(|image| image.is_nft).count(),
        rows,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadResult {
    pub id: String,
    pub url: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<(u32, u32)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<LoadResult>,
}

/// Loads every stored URL the way the gallery would, one at a time.
pub fn test_all_images(images: &[GeneratedImage], probe: &dyn ImageProbe) -> LoadReport {
    let mut results = Vec::with_capacity(images.len());
    for image in images {
        tracing::debug!(image_id = %image.id, "testing stored image");
        let outcome = probe.probe(&image.image_url, ProbeMode::Anonymous, LOAD_TEST_TIMEOUT);
        results.push(match outcome {
            Ok(hit) => LoadResult {
                id: image.id.clone(),
                url: image.image_url.clone(),
                success: true,
                dimensions: hit.dimensions,
                error: None,
            },
            Err(err) => LoadResult {
                id: image.id.clone(),
                url: image.image_url.clone(),
                success: false,
                dimensions: None,
                error: Some(err.to_string()),
            },
        });
    }
    let successful = results.iter().filter(|result| result.success).count();
    tracing::info!(successful, failed = results.len() - successful, "image load test finished");
    LoadReport {
        successful,
        failed: results.len() - successful,
        results,
    }
}
