use std::sync::Arc;
use std::time::Duration;

use crate::auth::{JwtKeys, PasswordHasher};
use crate::config::Config;
use crate::observability::metrics::Metrics;
use crate::realtime::Dispatcher;
use crate::store::memory::{MemoryParcelRegistry, MemoryTrackingStore, MemoryUserStore};
use crate::store::{ParcelRegistry, TrackingStore, UserStore};

pub struct AppState {
    pub config: Config,
    pub parcels: Arc<dyn ParcelRegistry>,
    pub tracking: Arc<dyn TrackingStore>,
    pub users: Arc<dyn UserStore>,
    pub dispatcher: Dispatcher,
    pub jwt: JwtKeys,
    pub passwords: PasswordHasher,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self::with_stores(
            config,
            Arc::new(MemoryParcelRegistry::new()),
            Arc::new(MemoryTrackingStore::new()),
            Arc::new(MemoryUserStore::new()),
        )
    }

    pub fn with_stores(
        config: Config,
        parcels: Arc<dyn ParcelRegistry>,
        tracking: Arc<dyn TrackingStore>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        let dispatcher = Dispatcher::new(config.event_buffer_size, config.connection_buffer_size);
        let jwt = JwtKeys::new(&config.auth);

        Self {
            config,
            parcels,
            tracking,
            users,
            dispatcher,
            jwt,
            passwords: PasswordHasher::new(),
            metrics: Metrics::new(),
        }
    }

    pub fn storage_timeout(&self) -> Duration {
        self.config.storage_timeout
    }
}
