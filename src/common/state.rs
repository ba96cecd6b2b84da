use std::sync::Arc;

use crate::config::Config;
use crate::store::HistoryStore;
use crate::ttn::{HttpTransport, StorageTransport, TtnClient};

/// Everything a run needs, built once at startup.
pub struct AppState<T = HttpTransport> {
    pub config: Arc<Config>,
    pub client: Arc<TtnClient<T>>,
    pub store: HistoryStore,
}

impl<T: StorageTransport> AppState<T> {
    pub fn new(config: Config, client: TtnClient<T>) -> Self {
        let store = HistoryStore::from_config(&config);
        Self {
            config: Arc::new(config),
            client: Arc::new(client),
            store,
        }
    }
}

impl<T> Clone for AppState<T> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            client: Arc::clone(&self.client),
            store: self.store.clone(),
        }
    }
}
