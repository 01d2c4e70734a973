use crate::config::{MountConfig, normalize_mountpoint};
use poolgate_core::{GateError, ObjectPool, Result, StoreCluster};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MountPermissions {
    pub put: bool,
    pub delete: bool,
    pub mkcol: bool,
    pub propfind: bool,
}

impl MountPermissions {
    pub fn from_config(config: &MountConfig) -> Self {
        Self {
            put: config.allow_put,
            delete: config.allow_delete,
            mkcol: config.allow_mkcol,
            propfind: config.allow_propfind,
        }
    }

    /// Value of the `Allow` header for this mount.
    pub fn allow_header(&self) -> String {
        let mut allow = String::from("OPTIONS, GET, HEAD");
        if self.put {
            allow.push_str(", PUT");
        }
        if self.delete {
            allow.push_str(", DELETE");
        }
        if self.mkcol {
            allow.push_str(", MKCOL");
        }
        if self.propfind {
            allow.push_str(", PROPFIND");
        }
        allow
    }
}

/// A pool of one cluster exposed under a path prefix.
pub struct Mount {
    prefix: String,
    pool_name: String,
    cluster: Arc<dyn StoreCluster>,
    handles: Vec<Arc<dyn ObjectPool>>,
    permissions: MountPermissions,
    timeout: Duration,
}

impl Mount {
    /// Opens `handle_count` handles on the mount's pool, creating the pool first when
    /// `create_missing` is set and it does not exist yet.
    pub fn open(
        config: &MountConfig,
        cluster: Arc<dyn StoreCluster>,
        handle_count: usize,
        default_timeout_secs: u64,
        create_missing: bool,
    ) -> Result<Self> {
        tracing::info!("mounting {} ...", config.mountpoint);

        let mut handles = Vec::with_capacity(handle_count.max(1));
        for _ in 0..handle_count.max(1) {
            let handle = match cluster.open_pool(&config.pool) {
                Ok(handle) => handle,
                Err(GateError::PoolNotFound(_)) if create_missing => {
                    cluster.create_pool(&config.pool)?;
                    tracing::info!(pool = config.pool.as_str(), "created missing pool");
                    cluster.open_pool(&config.pool)?
                }
                Err(error) => return Err(error),
            };
            handles.push(handle);
        }

        tracing::info!(
            "connected to pool {} on cluster {}",
            config.pool,
            cluster.cluster_id()
        );

        Ok(Self {
            prefix: normalize_mountpoint(&config.mountpoint),
            pool_name: config.pool.clone(),
            cluster,
            handles,
            permissions: MountPermissions::from_config(config),
            timeout: config.timeout(default_timeout_secs),
        })
    }

    /// Mountpoint without a trailing slash; empty for a mount at `/`.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn pool_name(&self) -> &str {
        &self.pool_name
    }

    pub fn cluster(&self) -> Arc<dyn StoreCluster> {
        self.cluster.clone()
    }

    /// Pool handle dedicated to `slot`.
    pub fn handle_for(&self, slot: usize) -> Arc<dyn ObjectPool> {
        self.handles[slot % self.handles.len()].clone()
    }

    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    pub fn permissions(&self) -> MountPermissions {
        self.permissions
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Path below the mountpoint, or `None` if `path` is outside it.
    fn strip<'a>(&self, path: &'a str) -> Option<&'a str> {
        let rest = path.strip_prefix(self.prefix.as_str())?;
        if rest.is_empty() || rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }
}

/// Where a request path landed.
pub struct ResolvedPath {
    pub mount: Arc<Mount>,
    /// Object key, `None` for the mount root.
    pub key: Option<String>,
}

pub struct MountRegistry {
    // Longest prefix first.
    mounts: Vec<Arc<Mount>>,
    default_mount: Option<Arc<Mount>>,
}

impl MountRegistry {
    pub fn new(mounts: Vec<Mount>, default_mount: Option<&str>) -> Result<Self> {
        let mut mounts: Vec<Arc<Mount>> = mounts.into_iter().map(Arc::new).collect();
        mounts.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));

        for pair in mounts.windows(2) {
            if pair[0].prefix == pair[1].prefix {
                return Err(GateError::Config(format!(
                    "duplicate mountpoint: {}/",
                    pair[0].prefix
                )));
            }
        }

        let default_mount = match default_mount {
            Some(mountpoint) => {
                let prefix = normalize_mountpoint(mountpoint);
                let mount = mounts
                    .iter()
                    .find(|mount| mount.prefix == prefix)
                    .cloned()
                    .ok_or_else(|| {
                        GateError::Config(format!("unknown default mount: {}", mountpoint))
                    })?;
                Some(mount)
            }
            None => None,
        };

        Ok(Self {
            mounts,
            default_mount,
        })
    }

    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }

    /// Picks the longest mountpoint covering `path`, falling back to the default mount
    /// with the whole path as the remainder.
    pub fn resolve(&self, path: &str) -> Option<ResolvedPath> {
        let (mount, rest) = self
            .mounts
            .iter()
            .find_map(|mount| mount.strip(path).map(|rest| (mount, rest)))
            .or_else(|| self.default_mount.as_ref().map(|mount| (mount, path)))?;

        let key = rest.strip_prefix('/').unwrap_or(rest);
        Some(ResolvedPath {
            mount: mount.clone(),
            key: (!key.is_empty()).then(|| key.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poolgate_core::MemoryCluster;

    fn mount(cluster: &Arc<dyn StoreCluster>, raw: &str) -> Mount {
        Mount::open(
            &MountConfig::parse_kvlist(raw).unwrap(),
            cluster.clone(),
            1,
            4,
            true,
        )
        .unwrap()
    }

    #[test]
    fn allow_header_follows_flags() {
        let permissions = MountPermissions {
            put: true,
            delete: false,
            mkcol: true,
            propfind: false,
        };
        assert_eq!(permissions.allow_header(), "OPTIONS, GET, HEAD, PUT, MKCOL");
        assert_eq!(
            MountPermissions::default().allow_header(),
            "OPTIONS, GET, HEAD"
        );
    }

    #[test]
    fn open_creates_missing_pool_and_one_handle_per_slot() {
        let cluster: Arc<dyn StoreCluster> = Arc::new(MemoryCluster::new().unwrap());
        let config = MountConfig::parse_kvlist("mountpoint=/m,pool=fresh,timeout=9").unwrap();

        let mounted = Mount::open(&config, cluster.clone(), 3, 4, true).unwrap();
        assert_eq!(mounted.handle_count(), 3);
        assert_eq!(mounted.timeout(), Duration::from_secs(9));
        assert_eq!(mounted.handle_for(4).name(), "fresh");

        let strict = MountConfig::parse_kvlist("mountpoint=/n,pool=absent").unwrap();
        assert!(matches!(
            Mount::open(&strict, cluster, 1, 4, false),
            Err(GateError::PoolNotFound(_))
        ));
    }

    #[test]
    fn resolves_longest_prefix() {
        let cluster: Arc<dyn StoreCluster> = Arc::new(MemoryCluster::new().unwrap());
        let registry = MountRegistry::new(
            vec![
                mount(&cluster, "mountpoint=/data,pool=outer"),
                mount(&cluster, "mountpoint=/data/inner/,pool=inner"),
            ],
            None,
        )
        .unwrap();

        let resolved = registry.resolve("/data/inner/a/b.txt").unwrap();
        assert_eq!(resolved.mount.pool_name(), "inner");
        assert_eq!(resolved.key.as_deref(), Some("a/b.txt"));

        let resolved = registry.resolve("/data/innerfile").unwrap();
        assert_eq!(resolved.mount.pool_name(), "outer");
        assert_eq!(resolved.key.as_deref(), Some("innerfile"));

        assert!(registry.resolve("/data").unwrap().key.is_none());
        assert!(registry.resolve("/data/").unwrap().key.is_none());
        assert!(registry.resolve("/database").is_none());
        assert!(registry.resolve("/").is_none());
    }

    #[test]
    fn default_mount_takes_unmatched_paths() {
        let cluster: Arc<dyn StoreCluster> = Arc::new(MemoryCluster::new().unwrap());
        let registry = MountRegistry::new(
            vec![
                mount(&cluster, "mountpoint=/a,pool=a"),
                mount(&cluster, "mountpoint=/b,pool=b"),
            ],
            Some("/b"),
        )
        .unwrap();

        let resolved = registry.resolve("/elsewhere/key").unwrap();
        assert_eq!(resolved.mount.pool_name(), "b");
        assert_eq!(resolved.key.as_deref(), Some("elsewhere/key"));
        assert!(registry.resolve("/").unwrap().key.is_none());
    }

    #[test]
    fn root_mount_covers_everything() {
        let cluster: Arc<dyn StoreCluster> = Arc::new(MemoryCluster::new().unwrap());
        let registry = MountRegistry::new(vec![mount(&cluster, "mountpoint=/,pool=all")], None)
            .unwrap();

        assert!(registry.resolve("/").unwrap().key.is_none());
        assert_eq!(
            registry.resolve("/x/y").unwrap().key.as_deref(),
            Some("x/y")
        );
    }

    #[test]
    fn duplicate_and_unknown_default_mounts_fail() {
        let cluster: Arc<dyn StoreCluster> = Arc::new(MemoryCluster::new().unwrap());
        assert!(
            MountRegistry::new(
                vec![
                    mount(&cluster, "mountpoint=/a,pool=one"),
                    mount(&cluster, "mountpoint=/a/,pool=two"),
                ],
                None,
            )
            .is_err()
        );
        assert!(
            MountRegistry::new(vec![mount(&cluster, "mountpoint=/a,pool=one")], Some("/z"))
                .is_err()
        );
    }
}
