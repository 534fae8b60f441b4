//! Template metadata: the reference image of the object to search for.

use anyhow::{anyhow, Context, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// User-supplied reference image plus metadata.
///
/// Templates are immutable once created; edits replace the whole record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
    /// Hex-encoded image bytes.
    pub image_data: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
}

impl Template {
    /// Build a template from an uploaded image.
    ///
    /// The name must be non-empty and the bytes must be a recognizable image.
    pub fn new(
        name: &str,
        category: &str,
        description: &str,
        image: &[u8],
    ) -> Result<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(anyhow!("template name is required"));
        }
        if image.is_empty() {
            return Err(anyhow!("template image is required"));
        }
        image::guess_format(image).map_err(|_| anyhow!("template file is not a valid image"))?;

        let created_at = now_ms()?;
        Ok(Self {
            id: derive_id(name, image, created_at),
            name: name.to_string(),
            category: category.trim().to_string(),
            description: description.trim().to_string(),
            image_data: hex::encode(image),
            created_at,
        })
    }

    /// Read an image file and build a template from it.
    pub fn from_file(
        path: &Path,
        name: &str,
        category: &str,
        description: &str,
    ) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read template image {}", path.display()))?;
        Self::new(name, category, description, &bytes)
    }

    /// Decoded image bytes.
    pub fn image_bytes(&self) -> Result<Vec<u8>> {
        hex::decode(&self.image_data)
            .with_context(|| format!("template {} has corrupt image data", self.id))
    }
}

fn now_ms() -> Result<u64> {
    let elapsed = SystemTime::now().duration_since(UNIX_EPOCH)?;
    u64::try_from(elapsed.as_millis()).map_err(|_| anyhow!("system time out of range"))
}

fn derive_id(name: &str, image: &[u8], created_at: u64) -> String {
    let mut salt = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut salt);

    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(image);
    hasher.update(created_at.to_le_bytes());
    hasher.update(salt);
    let digest: [u8; 32] = hasher.finalize().into();
    hex::encode(&digest[..8])
}
