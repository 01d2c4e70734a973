use poolgate_core::{GateError, Result, SchedulingMode};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Store call timeout for mounts that do not set their own.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub mounts: Vec<MountConfig>,
    /// Mountpoint that serves requests no other mount matches.
    #[serde(default)]
    pub default_mount: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    #[serde(default)]
    pub mode: SchedulingMode,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            mode: SchedulingMode::default(),
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Cluster directory for the `fs` backend.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_create_missing_pools")]
    pub create_missing_pools: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            root: None,
            create_missing_pools: default_create_missing_pools(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Fs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountConfig {
    pub mountpoint: String,
    pub pool: String,
    /// Store connection reference. Mounts with the same reference share one cluster
    /// connection; for the `fs` backend it is the cluster directory.
    #[serde(default)]
    pub config: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub allow_put: bool,
    #[serde(default)]
    pub allow_delete: bool,
    #[serde(default)]
    pub allow_mkcol: bool,
    #[serde(default)]
    pub allow_propfind: bool,
}

impl MountConfig {
    /// Parses `mountpoint=/foo,pool=bucket,config=/path,timeout=30,allow_put=1,...`.
    pub fn parse_kvlist(raw: &str) -> Result<Self> {
        let mut mountpoint = None;
        let mut pool = None;
        let mut mount = MountConfig {
            mountpoint: String::new(),
            pool: String::new(),
            config: None,
            timeout_secs: None,
            allow_put: false,
            allow_delete: false,
            allow_mkcol: false,
            allow_propfind: false,
        };

        for item in raw.split(',') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }

            let (key, value) = item.split_once('=').ok_or_else(|| {
                GateError::Config(format!("invalid mount option '{}': expected key=value", item))
            })?;
            let value = value.trim();

            match key.trim() {
                "mountpoint" => mountpoint = Some(value.to_string()),
                "pool" => pool = Some(value.to_string()),
                "config" => mount.config = Some(value.to_string()),
                "timeout" => {
                    let timeout = value.parse::<u64>().map_err(|_| {
                        GateError::Config(format!("mount timeout must be an integer: {}", value))
                    })?;
                    mount.timeout_secs = Some(timeout);
                }
                "allow_put" => mount.allow_put = parse_flag(key, value)?,
                "allow_delete" => mount.allow_delete = parse_flag(key, value)?,
                "allow_mkcol" => mount.allow_mkcol = parse_flag(key, value)?,
                "allow_propfind" => mount.allow_propfind = parse_flag(key, value)?,
                other => {
                    return Err(GateError::Config(format!(
                        "unknown mount option '{}'",
                        other
                    )));
                }
            }
        }

        match (mountpoint, pool) {
            (Some(mountpoint), Some(pool)) if !mountpoint.is_empty() && !pool.is_empty() => {
                mount.mountpoint = mountpoint;
                mount.pool = pool;
                Ok(mount)
            }
            _ => Err(GateError::Config(
                "mount requires a mountpoint and a pool name".to_string(),
            )),
        }
    }

    pub fn timeout(&self, default_secs: u64) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(default_secs))
    }
}

/// Command line settings layered over the loaded file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub mounts: Vec<String>,
    pub timeout_secs: Option<u64>,
    pub bind_addr: Option<String>,
}

impl Config {
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::with_name(path));
        }

        let settings = builder
            .add_source(::config::Environment::with_prefix("POOLGATE").separator("__"))
            .build()
            .map_err(|e| GateError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| GateError::Config(e.to_string()))?;

        Ok(config)
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) -> Result<()> {
        for raw in &overrides.mounts {
            self.mounts.push(MountConfig::parse_kvlist(raw)?);
        }
        if let Some(timeout_secs) = overrides.timeout_secs {
            self.timeout_secs = timeout_secs;
        }
        if let Some(bind_addr) = overrides.bind_addr {
            self.bind_addr = bind_addr;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.mounts.is_empty() {
            return Err(GateError::Config("no mounts configured".to_string()));
        }
        if self.scheduling.concurrency == 0 {
            return Err(GateError::Config(
                "scheduling.concurrency must be at least 1".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(GateError::Config("timeout_secs must be positive".to_string()));
        }

        let mut seen = HashSet::new();
        for mount in &self.mounts {
            if !mount.mountpoint.starts_with('/') {
                return Err(GateError::Config(format!(
                    "mountpoint must start with '/': {}",
                    mount.mountpoint
                )));
            }
            if mount.timeout_secs == Some(0) {
                return Err(GateError::Config(format!(
                    "mount {} has a zero timeout",
                    mount.mountpoint
                )));
            }
            if self.store.backend == StoreBackend::Fs
                && mount.config.is_none()
                && self.store.root.is_none()
            {
                return Err(GateError::Config(format!(
                    "mount {} needs store.root or config= with the fs backend",
                    mount.mountpoint
                )));
            }
            if !seen.insert(normalize_mountpoint(&mount.mountpoint)) {
                return Err(GateError::Config(format!(
                    "duplicate mountpoint: {}",
                    mount.mountpoint
                )));
            }
        }

        if let Some(default_mount) = self.default_mount.as_deref()
            && !seen.contains(&normalize_mountpoint(default_mount))
        {
            return Err(GateError::Config(format!(
                "default_mount {} is not a configured mountpoint",
                default_mount
            )));
        }

        Ok(())
    }
}

/// `/foo/` and `/foo` name the same mount; `/` becomes the empty prefix.
pub fn normalize_mountpoint(mountpoint: &str) -> String {
    mountpoint.trim_end_matches('/').to_string()
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(GateError::Config(format!(
            "{} must be a boolean, got '{}'",
            key, value
        ))),
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_timeout_secs() -> u64 {
    4
}

fn default_concurrency() -> usize {
    16
}

fn default_create_missing_pools() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_kvlist_mount() {
        let mount = MountConfig::parse_kvlist(
            "mountpoint=/foo,pool=unbit001,config=/etc/store,timeout=30,allow_put=1,allow_delete=true",
        )
        .unwrap();

        assert_eq!(mount.mountpoint, "/foo");
        assert_eq!(mount.pool, "unbit001");
        assert_eq!(mount.config.as_deref(), Some("/etc/store"));
        assert_eq!(mount.timeout(4), Duration::from_secs(30));
        assert!(mount.allow_put);
        assert!(mount.allow_delete);
        assert!(!mount.allow_mkcol);
        assert!(!mount.allow_propfind);
    }

    #[test]
    fn kvlist_requires_mountpoint_and_pool() {
        assert!(MountConfig::parse_kvlist("mountpoint=/foo").is_err());
        assert!(MountConfig::parse_kvlist("pool=bar").is_err());
        assert!(MountConfig::parse_kvlist("mountpoint=/foo,pool=bar,colour=red").is_err());
        assert!(MountConfig::parse_kvlist("mountpoint=/foo,pool=bar,allow_put=maybe").is_err());
        assert!(MountConfig::parse_kvlist("mountpoint=/foo,pool=bar,timeout=soon").is_err());
    }

    #[test]
    fn flags_are_parsed_as_booleans() {
        let mount =
            MountConfig::parse_kvlist("mountpoint=/foo,pool=bar,allow_put=0,allow_mkcol=yes")
                .unwrap();
        assert!(!mount.allow_put);
        assert!(mount.allow_mkcol);
        assert_eq!(mount.timeout(7), Duration::from_secs(7));
    }

    #[test]
    fn loads_file_and_applies_overrides() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "bind_addr: 0.0.0.0:9000\nscheduling:\n  mode: blocking\n  concurrency: 4\nmounts:\n  - mountpoint: /data\n    pool: data\n    allow_propfind: true\n"
        )
        .unwrap();

        let mut config = Config::load(file.path().to_str()).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.timeout_secs, 4);
        assert_eq!(config.scheduling.mode, SchedulingMode::Blocking);
        assert_eq!(config.scheduling.concurrency, 4);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert!(config.mounts[0].allow_propfind);

        config
            .apply_overrides(ConfigOverrides {
                mounts: vec!["mountpoint=/other,pool=other".to_string()],
                timeout_secs: Some(9),
                bind_addr: None,
            })
            .unwrap();
        assert_eq!(config.mounts.len(), 2);
        assert_eq!(config.timeout_secs, 9);
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        config.validate().unwrap();
    }

    #[test]
    fn validation_rejects_bad_mount_sets() {
        let mut config = Config::load(None).unwrap();
        assert!(config.validate().is_err());

        config
            .apply_overrides(ConfigOverrides {
                mounts: vec![
                    "mountpoint=/a,pool=one".to_string(),
                    "mountpoint=/a/,pool=two".to_string(),
                ],
                ..ConfigOverrides::default()
            })
            .unwrap();
        assert!(config.validate().is_err());

        config.mounts.pop();
        config.validate().unwrap();

        config.default_mount = Some("/missing".to_string());
        assert!(config.validate().is_err());
        config.default_mount = Some("/a".to_string());
        config.validate().unwrap();

        config.store.backend = StoreBackend::Fs;
        assert!(config.validate().is_err());
    }
}
