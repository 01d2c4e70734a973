use crate::config::{Config, StoreBackend};
use crate::mount::{Mount, MountRegistry};
use axum::Router;
use poolgate_core::{
    CreatePoolOperation, FsCluster, GateError, ListPoolOperation, MemoryCluster,
    PutObjectOperation, ReadObjectOperation, Result, SchedulingMode, SlotPool, StoreCluster,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

mod dav;
mod error;
mod mime;
mod multistatus;
mod util;

pub use error::{DavError, DavResult};

/// Everything a request handler needs, built once at startup.
pub struct AppContext {
    pub(crate) mounts: MountRegistry,
    pub(crate) slots: Arc<SlotPool>,
    pub(crate) mode: SchedulingMode,
    pub(crate) create_pool_operation: Arc<CreatePoolOperation>,
    pub(crate) put_object_operation: Arc<PutObjectOperation>,
    pub(crate) read_object_operation: Arc<ReadObjectOperation>,
    pub(crate) list_pool_operation: Arc<ListPoolOperation>,
}

impl AppContext {
    pub fn new(mounts: MountRegistry, slots: Arc<SlotPool>, mode: SchedulingMode) -> Self {
        Self {
            mounts,
            slots,
            mode,
            create_pool_operation: Arc::new(CreatePoolOperation::new()),
            put_object_operation: Arc::new(PutObjectOperation::default()),
            read_object_operation: Arc::new(ReadObjectOperation::default()),
            list_pool_operation: Arc::new(ListPoolOperation::new()),
        }
    }

    pub fn mounts(&self) -> &MountRegistry {
        &self.mounts
    }
}

/// Connects the clusters, opens every mount and sizes the slot pool.
///
/// Mounts naming the same store connection share one cluster.
pub fn build_context(config: &Config) -> Result<AppContext> {
    config.validate()?;

    let concurrency = config.scheduling.concurrency;
    let mode = config.scheduling.mode;
    let handle_count = match mode {
        SchedulingMode::Blocking => concurrency,
        SchedulingMode::Async => 1,
    };

    let mut clusters: HashMap<Option<String>, Arc<dyn StoreCluster>> = HashMap::new();
    let mut mounts = Vec::with_capacity(config.mounts.len());

    for mount_config in &config.mounts {
        let cluster = match clusters.get(&mount_config.config) {
            Some(cluster) => cluster.clone(),
            None => {
                let cluster = connect_cluster(config, mount_config.config.as_deref())?;
                clusters.insert(mount_config.config.clone(), cluster.clone());
                cluster
            }
        };

        mounts.push(Mount::open(
            mount_config,
            cluster,
            handle_count,
            config.timeout_secs,
            config.store.create_missing_pools,
        )?);
    }

    let mounts = MountRegistry::new(mounts, config.default_mount.as_deref())?;
    if mounts.is_empty() {
        return Err(GateError::Config("no mounts configured".to_string()));
    }

    Ok(AppContext::new(mounts, SlotPool::new(concurrency)?, mode))
}

fn connect_cluster(config: &Config, connection: Option<&str>) -> Result<Arc<dyn StoreCluster>> {
    match config.store.backend {
        StoreBackend::Memory => {
            if let Some(connection) = connection {
                tracing::info!("using in-memory cluster for {}", connection);
            }
            Ok(Arc::new(MemoryCluster::with_aio_workers(
                config.scheduling.concurrency,
            )?))
        }
        StoreBackend::Fs => {
            let root = connection
                .map(PathBuf::from)
                .or_else(|| config.store.root.clone())
                .ok_or_else(|| GateError::Config("fs backend needs store.root".to_string()))?;
            tracing::info!("using fs cluster at {}", root.display());
            Ok(Arc::new(FsCluster::with_aio_workers(
                root,
                config.scheduling.concurrency,
            )?))
        }
    }
}

pub fn router(context: Arc<AppContext>) -> Router {
    Router::new()
        .fallback(dav::handle_request)
        .with_state(context)
}

pub async fn run_server(config: Config) -> Result<()> {
    let context = Arc::new(build_context(&config)?);
    tracing::info!(
        mounts = context.mounts().len(),
        concurrency = config.scheduling.concurrency,
        mode = ?config.scheduling.mode,
        "gateway ready"
    );

    let app = router(context);

    let listener = TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Poolgate listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| GateError::Internal(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigOverrides, StoreConfig};

    fn config_with(mounts: &[&str]) -> Config {
        let mut config = Config::load(None).unwrap();
        config
            .apply_overrides(ConfigOverrides {
                mounts: mounts.iter().map(|raw| raw.to_string()).collect(),
                ..ConfigOverrides::default()
            })
            .unwrap();
        config
    }

    #[test]
    fn builds_context_with_shared_clusters() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_with(&["mountpoint=/a,pool=one", "mountpoint=/b,pool=two"]);
        config.store = StoreConfig {
            backend: StoreBackend::Fs,
            root: Some(dir.path().to_path_buf()),
            create_missing_pools: true,
        };
        config.scheduling.mode = SchedulingMode::Blocking;
        config.scheduling.concurrency = 3;

        let context = build_context(&config).unwrap();
        assert_eq!(context.mounts().len(), 2);
        assert_eq!(context.slots.concurrency(), 3);
        assert!(dir.path().join("one").is_dir());
        assert!(dir.path().join("two").is_dir());

        let a = context.mounts().resolve("/a/x").unwrap().mount;
        let b = context.mounts().resolve("/b/x").unwrap().mount;
        assert_eq!(a.handle_count(), 3);
        assert_eq!(a.cluster().cluster_id(), b.cluster().cluster_id());
    }

    #[test]
    fn missing_pool_fails_startup_when_creation_is_off() {
        let mut config = config_with(&["mountpoint=/a,pool=one"]);
        config.store.create_missing_pools = false;
        assert!(matches!(
            build_context(&config),
            Err(GateError::PoolNotFound(_))
        ));
    }
}
