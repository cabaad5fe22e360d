use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use ethereal_contracts::gallery::GeneratedImage;
use image::ImageFormat;
use reqwest::blocking::Client as HttpClient;

use crate::generate::{decode_data_uri, sniff_image};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

pub fn export_file_name(id: &str) -> String {
    let safe: String = id
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    format!("ethereal-canvas-{safe}.png")
}

/// Writes `image` into `dir` as a PNG and returns the file path.
///
/// Data URIs are decoded in place, anything else is downloaded. Non-PNG
/// payloads are re-encoded so the extension is always honest.
pub fn export_image(image: &GeneratedImage, dir: &Path, http: &HttpClient) -> Result<PathBuf> {
    let bytes = match image.image_url.strip_prefix("data:") {
        Some(payload) => decode_data_uri(payload)
            .map_err(|reason| anyhow!("image {} has a bad data URI: {reason}", image.id))?,
        None => download(&image.image_url, http)?,
    };
    let Some(hit) = sniff_image(&bytes) else {
        bail!("image {} is not a decodable image", image.id);
    };

    let png = if hit.format == "png" {
        bytes
    } else {
        let decoded = image::load_from_memory(&bytes)
            .with_context(|| format!("failed to decode {} image {}", hit.format, image.id))?;
        let mut out = Cursor::new(Vec::new());
        decoded
            .write_to(&mut out, ImageFormat::Png)
            .with_context(|| format!("failed to re-encode image {} as png", image.id))?;
        out.into_inner()
    };

    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(export_file_name(&image.id));
    fs::write(&path, png).with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(image_id = %image.id, path = %path.display(), "exported image");
    Ok(path)
}

fn download(url: &str, http: &HttpClient) -> Result<Vec<u8>> {
    let response = http
        .get(url)
        .timeout(DOWNLOAD_TIMEOUT)
        .send()
        .with_context(|| format!("failed to download {url}"))?;
    let status = response.status();
    if !status.is_success() {
        bail!("download of {url} failed ({})", status.as_u16());
    }
    let bytes = response
        .bytes()
        .with_context(|| format!("failed to read body of {url}"))?;
    Ok(bytes.to_vec())
}
