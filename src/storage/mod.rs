//! Storage implementations.

use std::sync::Arc;

use tracing::info;

use crate::config::{StorageConfig, StorageType};
use crate::interfaces::DocumentStore;

pub mod memory;
pub mod projection;

#[cfg(feature = "mongodb")]
pub mod mongodb;

pub use memory::MemoryDocumentStore;
pub use projection::{ProjectionEntity, ProjectionStore};

#[cfg(feature = "mongodb")]
pub use mongodb::MongoDocumentStore;

/// Initialize the projection store based on configuration.
///
/// The returned handle owns the backend connection; call
/// [`ProjectionStore::close`] at shutdown.
pub async fn init_storage(
    config: &StorageConfig,
) -> Result<ProjectionStore, Box<dyn std::error::Error>> {
    info!("Storage: {}", config.storage_type);

    let backend: Arc<dyn DocumentStore> = match config.storage_type {
        StorageType::Memory => Arc::new(MemoryDocumentStore::new()),
        #[cfg(feature = "mongodb")]
        StorageType::Mongodb => Arc::new(MongoDocumentStore::connect(&config.mongodb).await?),
        #[cfg(not(feature = "mongodb"))]
        StorageType::Mongodb => {
            tracing::error!("MongoDB storage requested but 'mongodb' feature is not enabled");
            return Err("MongoDB feature not enabled".into());
        }
    };

    let store = ProjectionStore::new(backend);
    store.init().await?;
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_memory_storage() {
        let store = init_storage(&StorageConfig::default()).await.unwrap();
        assert_eq!(
            store
                .count_in(projection::RECHARGE_RECORDS_COLLECTION)
                .await
                .unwrap(),
            0
        );
        store.close().await.unwrap();
    }
}
