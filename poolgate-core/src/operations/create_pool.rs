use crate::store::{StoreCluster, validate_pool_name};
use crate::{GateError, Result};
use std::sync::Arc;

/// Creates a new pool on a cluster. Runs as a plain blocking call; it never goes through a
/// slot's bridge.
#[derive(Clone, Default)]
pub struct CreatePoolOperation;

impl CreatePoolOperation {
    pub fn new() -> Self {
        Self
    }

    pub async fn run(&self, cluster: Arc<dyn StoreCluster>, name: &str) -> Result<()> {
        validate_pool_name(name)?;

        let pool_name = name.to_string();
        tokio::task::spawn_blocking(move || cluster.create_pool(&pool_name))
            .await
            .map_err(|error| GateError::Internal(error.to_string()))??;

        tracing::info!(pool = name, "created pool");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCluster;

    #[tokio::test]
    async fn second_create_reports_existing_pool() {
        let cluster: Arc<dyn StoreCluster> = Arc::new(MemoryCluster::new().unwrap());
        let operation = CreatePoolOperation::new();

        operation.run(cluster.clone(), "fresh").await.unwrap();
        assert!(cluster.open_pool("fresh").is_ok());

        assert!(matches!(
            operation.run(cluster.clone(), "fresh").await,
            Err(GateError::PoolExists(_))
        ));
        assert!(matches!(
            operation.run(cluster, "a/b").await,
            Err(GateError::InvalidRequest(_))
        ));
    }
}
