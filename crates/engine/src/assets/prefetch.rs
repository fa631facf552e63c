use super::{AssetCache, AssetGroup, UpdateSource, UrlMetadata};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Downloads every listed URL when the version is installed.
pub struct PrefetchAssetGroup {
    assets: Arc<AssetCache>,
}
impl PrefetchAssetGroup {
    pub fn new(assets: Arc<AssetCache>) -> Self {
        Self { assets }
    }
}

#[async_trait]
impl AssetGroup for PrefetchAssetGroup {
    fn assets(&self) -> &Arc<AssetCache> {
        &self.assets
    }

    async fn initialize_fully(&self, previous: Option<&dyn UpdateSource>) -> Result<()> {
        let assets = &self.assets;
        for url in assets.urls() {
            if assets.is_cached(url).await? {
                continue;
            }
            if let Some(source) = previous
                && assets.maybe_update(source, url).await?
            {
                continue;
            }
            assets.install(url).await?;
        }
        let Some(source) = previous else {
            return Ok(());
        };
        // Unhashed resources the previous version picked up on demand (matched
        // by pattern) are carried over too, but as unused.
        for url in source.previously_cached_resources().await? {
            if !assets.matches(&url) || assets.is_cached(&url).await? {
                continue;
            }
            let Some(state) = source.lookup_resource_without_hash(&url).await? else {
                continue;
            };
            let ts = state.metadata.map_or_else(|| assets.env.now(), |metadata| metadata.ts);
            assets.adopt(&url, &state.response, UrlMetadata { ts, used: false }).await?;
            tracing::debug!(group = %assets.name(), url = %url, "Carried over unhashed resource");
        }
        Ok(())
    }
}
