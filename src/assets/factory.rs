//! Asset materialization seam
//!
//! The core never instantiates meshes; it downloads model payloads and hands
//! them to the embedding renderer. [`AssetFactory`] is the seam the renderer
//! (or a test) plugs into.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;

use crate::assets::AssetKey;
use crate::util::time::unix_millis;

/// A materialized per-match asset, ready for the renderer to instantiate
#[derive(Debug, Clone)]
pub struct AssetObject {
    pub key: AssetKey,
    /// URL the payload was fetched from
    pub url: String,
    /// Raw model payload (GLB)
    pub data: Bytes,
    /// Unix millis at which the payload finished downloading
    pub fetched_at_ms: u64,
}

/// Asset materialization errors
#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    #[error("model download failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("model download failed with status {status}")]
    Status { status: u16 },

    #[error("model payload was empty")]
    Empty,
}

/// Turns an announced asset URL into a materialized object.
#[async_trait]
pub trait AssetFactory: Send + Sync + 'static {
    async fn materialize(&self, key: AssetKey, url: &str)
        -> Result<AssetObject, MaterializeError>;
}

/// Production factory: downloads the model payload over HTTP
#[derive(Clone, Default)]
pub struct HttpAssetFactory {
    client: Client,
}

impl HttpAssetFactory {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

#[async_trait]
impl AssetFactory for HttpAssetFactory {
    async fn materialize(
        &self,
        key: AssetKey,
        url: &str,
    ) -> Result<AssetObject, MaterializeError> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(MaterializeError::Status {
                status: response.status().as_u16(),
            });
        }

        let data = response.bytes().await?;
        if data.is_empty() {
            return Err(MaterializeError::Empty);
        }

        Ok(AssetObject {
            key,
            url: url.to_string(),
            data,
            fetched_at_ms: unix_millis(),
        })
    }
}
