use super::{AssetCache, AssetGroup, CacheStatus, UpdateSource};
use crate::error::Result;
use crate::manifest::InstallMode;
use async_trait::async_trait;
use std::sync::Arc;

/// Fetches resources on first request rather than at installation.
///
/// On update, resources whose bytes haven't changed are still carried over
/// from the previous version, and with `updateMode: prefetch` the ones that
/// clients were actually using are downloaded eagerly.
pub struct LazyAssetGroup {
    assets: Arc<AssetCache>,
}
impl LazyAssetGroup {
    pub fn new(assets: Arc<AssetCache>) -> Self {
        Self { assets }
    }
}

#[async_trait]
impl AssetGroup for LazyAssetGroup {
    fn assets(&self) -> &Arc<AssetCache> {
        &self.assets
    }

    async fn initialize_fully(&self, previous: Option<&dyn UpdateSource>) -> Result<()> {
        let Some(source) = previous else {
            return Ok(());
        };
        let assets = &self.assets;
        let eager = assets.config().update_mode() == InstallMode::Prefetch;
        for url in assets.urls() {
            if assets.is_cached(url).await? {
                continue;
            }
            let updated = assets.maybe_update(source, url).await?;
            if updated || !eager {
                continue;
            }
            if source.recent_cache_status(url).await? == CacheStatus::Cached {
                assets.install(url).await?;
            }
        }
        Ok(())
    }
}
