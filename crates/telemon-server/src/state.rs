use crate::config::ServerConfig;
use anyhow::Context;
use rsa::RsaPrivateKey;
use std::sync::Arc;
use telemon_common::security::{load_private_key, TrustedSubnet};
use telemon_storage::{FileDumpStore, RelationalStore, StorageEngine};
use tokio_util::sync::CancellationToken;

/// Shared by every HTTP handler and the gRPC service.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn StorageEngine>,
    /// Set when the file backend is active; the same store as `storage`.
    pub dump: Option<Arc<FileDumpStore>>,
    /// Save the dump after every successful update.
    pub sync_dump: bool,
    pub signing_key: Option<Arc<[u8]>>,
    pub trusted_subnet: Option<Arc<TrustedSubnet>>,
    pub private_key: Option<Arc<RsaPrivateKey>>,
}

impl AppState {
    pub fn new(storage: Arc<dyn StorageEngine>) -> Self {
        Self {
            storage,
            dump: None,
            sync_dump: false,
            signing_key: None,
            trusted_subnet: None,
            private_key: None,
        }
    }

    /// File-backed state: `store` serves requests and is the dump target.
    pub fn with_dump(store: Arc<FileDumpStore>, sync_dump: bool) -> Self {
        let storage: Arc<dyn StorageEngine> = store.clone();
        Self {
            dump: Some(store),
            sync_dump,
            ..Self::new(storage)
        }
    }

    pub fn signing_key(mut self, key: &[u8]) -> Self {
        self.signing_key = Some(Arc::from(key));
        self
    }

    pub fn trusted_subnet(mut self, subnet: TrustedSubnet) -> Self {
        self.trusted_subnet = Some(Arc::new(subnet));
        self
    }

    pub fn private_key(mut self, key: RsaPrivateKey) -> Self {
        self.private_key = Some(Arc::new(key));
        self
    }

    /// Builds the storage backend and loads the key material. Any failure
    /// here is fatal for startup.
    pub async fn from_config(config: &ServerConfig, cancel: CancellationToken) -> anyhow::Result<Self> {
        let mut state = match config.storage.database_url.as_deref() {
            Some(url) => {
                let store = RelationalStore::connect(url, cancel)
                    .await
                    .context("failed to open relational storage")?;
                tracing::info!(db = ?config.redacted_database_url(), "Using relational storage");
                Self::new(Arc::new(store))
            }
            None => {
                let store = Arc::new(FileDumpStore::new(&config.storage.file_path));
                if config.storage.restore {
                    store
                        .restore_dump()
                        .await
                        .context("failed to restore metrics dump")?;
                }
                tracing::info!(
                    path = %store.path().display(),
                    store_interval_secs = config.storage.store_interval_secs,
                    "Using file storage"
                );
                Self::with_dump(store, config.storage.store_interval_secs == 0)
            }
        };

        if let Some(key) = config.signing_key() {
            state = state.signing_key(key);
        }
        if let Some(subnet) = config.trusted_subnet()? {
            tracing::info!(subnet = %subnet, "Trusted subnet check enabled");
            state = state.trusted_subnet(subnet);
        }
        if let Some(path) = config.private_key_path.as_deref() {
            let key = load_private_key(path)
                .with_context(|| format!("failed to load private key {}", path.display()))?;
            state = state.private_key(key);
        }
        Ok(state)
    }

    /// Called after every successful update. Persists the dump when saving
    /// synchronously; a failed save is logged and the update still stands.
    pub async fn after_update(&self) {
        if !self.sync_dump {
            return;
        }
        if let Some(dump) = &self.dump {
            if let Err(e) = dump.save_dump().await {
                tracing::error!(error = %e, path = %dump.path().display(), "Synchronous dump failed");
            }
        }
    }
}
