use crate::auth::repo::CredentialStore;
use crate::config::AppConfig;
use crate::storage::{LocalStorage, StorageClient};
use anyhow::Context;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: CredentialStore,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn StorageClient>,
}

impl AppState {
    /// Open the credential store and attachment root. Either failing is fatal.
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        let store =
            CredentialStore::open(&config.database_url, config.database_max_connections).await?;

        let storage = Arc::new(
            LocalStorage::new(&config.upload_dir)
                .await
                .context("prepare upload directory")?,
        ) as Arc<dyn StorageClient>;

        Ok(Self {
            store,
            config,
            storage,
        })
    }

    pub async fn close(&self) {
        self.store.close().await;
        tracing::info!("credential store closed");
    }

    /// State backed by a throwaway database and upload root inside `dir`.
    #[cfg(test)]
    pub async fn for_tests(dir: &tempfile::TempDir) -> Self {
        let config = AppConfig {
            database_url: format!("sqlite://{}", dir.path().join("login.db").display()),
            database_max_connections: 4,
            upload_dir: dir.path().join("uploads"),
            max_upload_bytes: 64 * 1024,
            host: "127.0.0.1".into(),
            port: 0,
        };
        Self::init(config).await.expect("test state")
    }
}
