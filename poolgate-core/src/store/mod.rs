//! Store abstraction: a cluster of named pools holding flat-keyed objects.
//!
//! Every pool offers blocking calls plus an async submission path whose completion is
//! signalled from the store client's own thread.

pub mod dispatcher;
pub mod fs;
pub mod memory;

pub use dispatcher::{AioDispatcher, DEFAULT_AIO_WORKERS};
pub use fs::FsCluster;
pub use memory::MemoryCluster;

use crate::bridge::{AioCompletion, CompletionCallback};
use crate::{GateError, Result};
use bytes::Bytes;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectStat {
    pub size: u64,
    /// Unix seconds.
    pub mtime: i64,
}

#[derive(Debug, Clone)]
pub enum AioOp {
    Stat { key: String },
    Read { key: String, len: usize, offset: u64 },
    Write { key: String, data: Bytes, offset: u64 },
    Remove { key: String },
}

impl AioOp {
    pub fn key(&self) -> &str {
        match self {
            AioOp::Stat { key }
            | AioOp::Read { key, .. }
            | AioOp::Write { key, .. }
            | AioOp::Remove { key } => key,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AioOp::Stat { .. } => "stat",
            AioOp::Read { .. } => "read",
            AioOp::Write { .. } => "write",
            AioOp::Remove { .. } => "remove",
        }
    }
}

#[derive(Debug, Clone)]
pub enum AioReply {
    Done,
    Stat(ObjectStat),
    Data(Bytes),
}

/// Native listing cursor of a pool. Order is whatever the store yields.
pub type ObjectCursor = Box<dyn Iterator<Item = Result<String>> + Send>;

pub trait ObjectPool: Send + Sync {
    fn name(&self) -> &str;

    fn stat(&self, key: &str) -> Result<ObjectStat>;

    /// Reads up to `len` bytes at `offset`. An empty result means end of object.
    fn read(&self, key: &str, len: usize, offset: u64) -> Result<Bytes>;

    /// Writes `data` at `offset`, creating the object when missing.
    fn write(&self, key: &str, data: &[u8], offset: u64) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;

    fn list_objects(&self) -> Result<ObjectCursor>;

    fn create_completion(&self, callback: CompletionCallback) -> Result<AioCompletion> {
        Ok(AioCompletion::new(callback))
    }

    /// Schedules `op`; the store completes `completion` later from its own thread.
    fn aio_submit(&self, op: AioOp, completion: &AioCompletion) -> Result<()>;
}

pub trait StoreCluster: Send + Sync {
    fn cluster_id(&self) -> String;

    fn create_pool(&self, name: &str) -> Result<()>;

    fn open_pool(&self, name: &str) -> Result<Arc<dyn ObjectPool>>;
}

/// Runs `op` with the pool's blocking calls.
pub fn execute_blocking(pool: &dyn ObjectPool, op: AioOp) -> Result<AioReply> {
    match op {
        AioOp::Stat { key } => pool.stat(&key).map(AioReply::Stat),
        AioOp::Read { key, len, offset } => pool.read(&key, len, offset).map(AioReply::Data),
        AioOp::Write { key, data, offset } => {
            pool.write(&key, &data, offset).map(|_| AioReply::Done)
        }
        AioOp::Remove { key } => pool.remove(&key).map(|_| AioReply::Done),
    }
}

pub fn validate_pool_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(GateError::InvalidRequest(format!(
            "invalid pool name: {:?}",
            name
        )));
    }
    Ok(())
}

pub fn validate_object_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(GateError::InvalidRequest(
            "object key cannot be empty".to_string(),
        ));
    }
    if key.contains('\0') {
        return Err(GateError::InvalidRequest(format!(
            "object key contains NUL: {:?}",
            key
        )));
    }
    Ok(())
}

pub(crate) fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_names_are_single_components() {
        assert!(validate_pool_name("photos").is_ok());
        assert!(validate_pool_name("").is_err());
        assert!(validate_pool_name("..").is_err());
        assert!(validate_pool_name("a/b").is_err());
    }

    #[test]
    fn object_keys_may_contain_slashes() {
        assert!(validate_object_key("a/b/c.txt").is_ok());
        assert!(validate_object_key("").is_err());
        assert!(validate_object_key("a\0b").is_err());
    }
}
