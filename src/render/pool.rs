//! Per-(style, scale) renderer pools.
//!
//! The headless frontend is sized and pixel-ratio'd at construction, so
//! scale is a pool dimension rather than a per-job parameter for tile
//! rendering (spec.md §9). Each pool is a [`WorkerPool`] of [`NativeMap`]
//! handles, replacing the single global render mutex the teacher used to
//! serialize every MapLibre Native call.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

use super::native::{MapMode, NativeMap, Size};
use crate::config::RenderOptionsConfig;
use crate::error::Result;
use crate::worker::WorkerPool;

pub type RendererWorkerPool = WorkerPool<NativeMap>;

/// Keys every live renderer pool by `(style id, scale)` and constructs pools
/// lazily on first use, sized from `RenderOptionsConfig`.
pub struct RendererPoolManager {
    options: RenderOptionsConfig,
    pools: AsyncMutex<HashMap<(String, u8), Arc<RendererWorkerPool>>>,
}

impl RendererPoolManager {
    pub fn new(options: RenderOptionsConfig) -> Result<Self> {
        super::native::init()?;
        Ok(Self {
            options,
            pools: AsyncMutex::new(HashMap::new()),
        })
    }

    /// Fetch (constructing if needed) the pool for `(style_id, scale)`,
    /// loading `style_json` into every worker the pool creates.
    pub async fn pool_for(
        &self,
        style_id: &str,
        scale: u8,
        style_json: Arc<str>,
        mode: MapMode,
        internal_size: u32,
    ) -> Result<Arc<RendererWorkerPool>> {
        let scale = scale.clamp(1, self.options.max_scale_factor.max(1));
        let key = (style_id.to_string(), scale);

        let mut pools = self.pools.lock().await;
        if let Some(pool) = pools.get(&key) {
            return Ok(pool.clone());
        }

        let min = self.options.min_pool_size(scale);
        let max = self.options.max_pool_size(scale);
        let style_json = style_json.clone();

        let pool = WorkerPool::new(min, max, move || {
            let mut map = NativeMap::new(Size::new(internal_size, internal_size), scale as f32, mode)?;
            map.load_style(&style_json)?;
            Ok(map)
        })
        .await?;

        pools.insert(key, pool.clone());
        Ok(pool)
    }

    pub fn options(&self) -> &RenderOptionsConfig {
        &self.options
    }

    /// Dispose every pool constructed so far (spec.md §5 shutdown sequence):
    /// idle workers are destroyed immediately and any in-flight worker is
    /// destroyed on release instead of being returned to the idle set.
    pub async fn dispose_all(&self) {
        let pools = self.pools.lock().await;
        for pool in pools.values() {
            pool.dispose().await;
        }
    }
}
