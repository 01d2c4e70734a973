use crate::bridge::AioCompletion;
use crate::store::{
    AioDispatcher, AioOp, DEFAULT_AIO_WORKERS, ObjectCursor, ObjectPool, ObjectStat,
    StoreCluster, execute_blocking, validate_object_key, validate_pool_name,
};
use crate::{GateError, Result};
use bytes::Bytes;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

const CLUSTER_ID_FILE: &str = ".cluster-id";

/// Directory-backed cluster: `{root}/{pool}/{escaped key}`.
///
/// Keys are flat; `/`, `%` and a leading `.` are percent-escaped so every object is one file.
pub struct FsCluster {
    root: PathBuf,
    cluster_id: String,
    dispatcher: Arc<AioDispatcher>,
}

impl FsCluster {
    pub fn new(root: PathBuf) -> Result<Self> {
        Self::with_aio_workers(root, DEFAULT_AIO_WORKERS)
    }

    pub fn with_aio_workers(root: PathBuf, workers: usize) -> Result<Self> {
        fs::create_dir_all(&root)?;
        let cluster_id = load_or_create_cluster_id(&root)?;

        Ok(Self {
            dispatcher: Arc::new(AioDispatcher::spawn("poolgate-fs-aio", workers)?),
            root,
            cluster_id,
        })
    }
}

fn load_or_create_cluster_id(root: &Path) -> Result<String> {
    let id_path = root.join(CLUSTER_ID_FILE);
    match fs::read_to_string(&id_path) {
        Ok(id) if !id.trim().is_empty() => Ok(id.trim().to_string()),
        Ok(_) => write_cluster_id(&id_path),
        Err(error) if error.kind() == ErrorKind::NotFound => write_cluster_id(&id_path),
        Err(error) => Err(error.into()),
    }
}

fn write_cluster_id(id_path: &Path) -> Result<String> {
    let id = ulid::Ulid::new().to_string();
    fs::write(id_path, &id)?;
    Ok(id)
}

impl StoreCluster for FsCluster {
    fn cluster_id(&self) -> String {
        self.cluster_id.clone()
    }

    fn create_pool(&self, name: &str) -> Result<()> {
        validate_pool_name(name)?;
        match fs::create_dir(self.root.join(name)) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::AlreadyExists => {
                Err(GateError::PoolExists(name.to_string()))
            }
            Err(error) => Err(error.into()),
        }
    }

    fn open_pool(&self, name: &str) -> Result<Arc<dyn ObjectPool>> {
        validate_pool_name(name)?;
        let dir = self.root.join(name);
        if !dir.is_dir() {
            return Err(GateError::PoolNotFound(name.to_string()));
        }

        Ok(Arc::new(FsPool {
            name: name.to_string(),
            dir,
            dispatcher: self.dispatcher.clone(),
        }))
    }
}

#[derive(Clone)]
pub struct FsPool {
    name: String,
    dir: PathBuf,
    dispatcher: Arc<AioDispatcher>,
}

impl FsPool {
    fn object_path(&self, key: &str) -> Result<PathBuf> {
        validate_object_key(key)?;
        Ok(self.dir.join(escape_key(key)))
    }
}

fn not_found_as(key: &str, error: std::io::Error) -> GateError {
    if error.kind() == ErrorKind::NotFound {
        GateError::ObjectNotFound(key.to_string())
    } else {
        GateError::Io(error)
    }
}

impl ObjectPool for FsPool {
    fn name(&self) -> &str {
        &self.name
    }

    fn stat(&self, key: &str) -> Result<ObjectStat> {
        let metadata = fs::metadata(self.object_path(key)?).map_err(|e| not_found_as(key, e))?;
        if !metadata.is_file() {
            return Err(GateError::ObjectNotFound(key.to_string()));
        }

        let mtime = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as i64)
            .unwrap_or(0);

        Ok(ObjectStat {
            size: metadata.len(),
            mtime,
        })
    }

    fn read(&self, key: &str, len: usize, offset: u64) -> Result<Bytes> {
        let mut file = fs::File::open(self.object_path(key)?).map_err(|e| not_found_as(key, e))?;
        file.seek(SeekFrom::Start(offset))?;

        let mut buf = Vec::with_capacity(len);
        file.take(len as u64).read_to_end(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    fn write(&self, key: &str, data: &[u8], offset: u64) -> Result<()> {
        let path = self.object_path(key)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.sync_data()?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        fs::remove_file(self.object_path(key)?).map_err(|e| not_found_as(key, e))
    }

    fn list_objects(&self) -> Result<ObjectCursor> {
        let entries = fs::read_dir(&self.dir)?;
        Ok(Box::new(entries.filter_map(|entry| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => return Some(Err(error.into())),
            };
            let file_name = entry.file_name();
            let name = file_name.to_str()?;
            unescape_key(name).map(Ok)
        })))
    }

    fn aio_submit(&self, op: AioOp, completion: &AioCompletion) -> Result<()> {
        let pool = self.clone();
        self.dispatcher
            .submit(completion, move || execute_blocking(&pool, op))
    }
}

fn escape_key(key: &str) -> String {
    let mut escaped = String::with_capacity(key.len());
    for (index, ch) in key.chars().enumerate() {
        match ch {
            '%' => escaped.push_str("%25"),
            '/' => escaped.push_str("%2F"),
            // Leading dots are reserved for store bookkeeping files.
            '.' if index == 0 => escaped.push_str("%2E"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn unescape_key(name: &str) -> Option<String> {
    if name.starts_with('.') {
        return None;
    }

    let mut key = String::with_capacity(name.len());
    let mut rest = name;
    while let Some(pos) = rest.find('%') {
        key.push_str(&rest[..pos]);
        match rest.get(pos + 1..pos + 3)? {
            "25" => key.push('%'),
            "2F" => key.push('/'),
            "2E" => key.push('.'),
            _ => return None,
        }
        rest = &rest[pos + 3..];
    }
    key.push_str(rest);
    Some(key)
}
