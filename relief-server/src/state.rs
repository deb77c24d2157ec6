use std::sync::Arc;

use relief_core::Store;

use crate::{config::Config, error::AppError};

pub struct AppState {
    pub store: Store,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> Result<Arc<Self>, AppError> {
        let store = Store::open(&config.db_path)?;
        Ok(Arc::new(Self { store, config }))
    }

    /// Runs a blocking store operation off the async executor.
    pub async fn run<T, F>(&self, op: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: FnOnce(&Store) -> relief_core::Result<T> + Send + 'static,
    {
        let store = self.store.clone();
        let out = tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| AppError::Internal(format!("store task failed: {e}")))?;
        Ok(out?)
    }
}
