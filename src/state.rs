use std::sync::Arc;

use crate::{
    backend::{memory::MemoryBackend, platform::PlatformBackend, Backend},
    config::AppConfig,
    editor::InFlight,
};

#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn Backend>,
    pub config: Arc<AppConfig>,
    pub inflight: InFlight,
}

impl AppState {
    /// Connect the platform backend. Also returns it concretely so the
    /// caller can run migrations against its pool.
    pub async fn init() -> anyhow::Result<(Self, Arc<PlatformBackend>)> {
        let config = Arc::new(AppConfig::from_env()?);
        let platform = Arc::new(PlatformBackend::connect(config.clone()).await?);
        let state = Self::from_parts(platform.clone(), config);
        Ok((state, platform))
    }

    pub fn from_parts(backend: Arc<dyn Backend>, config: Arc<AppConfig>) -> Self {
        Self {
            backend,
            config,
            inflight: InFlight::default(),
        }
    }

    /// State over an in-memory backend, returned alongside for inspection.
    pub fn fake() -> (Self, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let state = Self::from_parts(backend.clone(), Arc::new(AppConfig::for_tests()));
        (state, backend)
    }
}
