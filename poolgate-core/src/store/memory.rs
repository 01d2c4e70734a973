use crate::bridge::{AioCompletion, CompletionCallback};
use crate::store::{
    AioDispatcher, AioOp, DEFAULT_AIO_WORKERS, ObjectCursor, ObjectPool, ObjectStat,
    StoreCluster, execute_blocking, unix_now, validate_object_key, validate_pool_name,
};
use crate::{GateError, Result};
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// In-process cluster. Async calls are served by store client threads, with an
/// optional injected latency and completion allocation failures for exercising timeouts.
pub struct MemoryCluster {
    cluster_id: String,
    pools: RwLock<HashMap<String, Arc<PoolData>>>,
    dispatcher: Arc<AioDispatcher>,
    faults: Arc<Faults>,
}

#[derive(Default)]
struct Faults {
    latency_ms: AtomicU64,
    fail_completions: AtomicBool,
}

#[derive(Default)]
struct PoolData {
    objects: RwLock<BTreeMap<String, MemoryObject>>,
}

#[derive(Debug, Clone)]
struct MemoryObject {
    data: Vec<u8>,
    mtime: i64,
}

impl MemoryCluster {
    pub fn new() -> Result<Self> {
        Self::with_aio_workers(DEFAULT_AIO_WORKERS)
    }

    pub fn with_aio_workers(workers: usize) -> Result<Self> {
        Ok(Self {
            cluster_id: ulid::Ulid::new().to_string(),
            pools: RwLock::new(HashMap::new()),
            dispatcher: Arc::new(AioDispatcher::spawn("poolgate-memory-aio", workers)?),
            faults: Arc::new(Faults::default()),
        })
    }

    /// Delays every async call on its store client thread.
    pub fn set_latency(&self, latency: Duration) {
        self.faults
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn fail_completion_alloc(&self, fail: bool) {
        self.faults.fail_completions.store(fail, Ordering::SeqCst);
    }
}

impl StoreCluster for MemoryCluster {
    fn cluster_id(&self) -> String {
        self.cluster_id.clone()
    }

    fn create_pool(&self, name: &str) -> Result<()> {
        validate_pool_name(name)?;
        let mut pools = self.pools.write().unwrap_or_else(PoisonError::into_inner);
        if pools.contains_key(name) {
            return Err(GateError::PoolExists(name.to_string()));
        }
        pools.insert(name.to_string(), Arc::new(PoolData::default()));
        Ok(())
    }

    fn open_pool(&self, name: &str) -> Result<Arc<dyn ObjectPool>> {
        let data = self
            .pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| GateError::PoolNotFound(name.to_string()))?;

        Ok(Arc::new(MemoryPool {
            name: name.to_string(),
            data,
            dispatcher: self.dispatcher.clone(),
            faults: self.faults.clone(),
        }))
    }
}

#[derive(Clone)]
pub struct MemoryPool {
    name: String,
    data: Arc<PoolData>,
    dispatcher: Arc<AioDispatcher>,
    faults: Arc<Faults>,
}

impl ObjectPool for MemoryPool {
    fn name(&self) -> &str {
        &self.name
    }

    fn stat(&self, key: &str) -> Result<ObjectStat> {
        let objects = self.data.objects.read().unwrap_or_else(PoisonError::into_inner);
        let object = objects
            .get(key)
            .ok_or_else(|| GateError::ObjectNotFound(key.to_string()))?;

        Ok(ObjectStat {
            size: object.data.len() as u64,
            mtime: object.mtime,
        })
    }

    fn read(&self, key: &str, len: usize, offset: u64) -> Result<Bytes> {
        let objects = self.data.objects.read().unwrap_or_else(PoisonError::into_inner);
        let object = objects
            .get(key)
            .ok_or_else(|| GateError::ObjectNotFound(key.to_string()))?;

        let start = usize::try_from(offset)
            .unwrap_or(usize::MAX)
            .min(object.data.len());
        let end = start.saturating_add(len).min(object.data.len());
        Ok(Bytes::copy_from_slice(&object.data[start..end]))
    }

    fn write(&self, key: &str, data: &[u8], offset: u64) -> Result<()> {
        validate_object_key(key)?;
        let start = usize::try_from(offset)
            .map_err(|_| GateError::InvalidRequest(format!("offset too large: {}", offset)))?;

        let mut objects = self.data.objects.write().unwrap_or_else(PoisonError::into_inner);
        let object = objects.entry(key.to_string()).or_insert_with(|| MemoryObject {
            data: Vec::new(),
            mtime: 0,
        });

        let end = start + data.len();
        if object.data.len() < end {
            object.data.resize(end, 0);
        }
        object.data[start..end].copy_from_slice(data);
        object.mtime = unix_now();
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.data
            .objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| GateError::ObjectNotFound(key.to_string()))
    }

    fn list_objects(&self) -> Result<ObjectCursor> {
        let keys: Vec<String> = self
            .data
            .objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();

        Ok(Box::new(keys.into_iter().map(Ok)))
    }

    fn create_completion(&self, callback: CompletionCallback) -> Result<AioCompletion> {
        if self.faults.fail_completions.load(Ordering::SeqCst) {
            return Err(GateError::Store(
                "cannot allocate aio completion".to_string(),
            ));
        }
        Ok(AioCompletion::new(callback))
    }

    fn aio_submit(&self, op: AioOp, completion: &AioCompletion) -> Result<()> {
        let pool = self.clone();
        let latency = Duration::from_millis(self.faults.latency_ms.load(Ordering::SeqCst));
        self.dispatcher.submit(completion, move || {
            if !latency.is_zero() {
                std::thread::sleep(latency);
            }
            execute_blocking(&pool, op)
        })
    }
}
