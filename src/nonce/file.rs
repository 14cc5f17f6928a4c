//! Durable nonce store persisted as a JSON file.
//!
//! # Responsibilities
//! - Hold an OS advisory lock on `<path>.lock` around every access
//! - Re-read the file on every call; nothing is cached between calls
//! - Persist every accepted floor before reporting success
//!
//! # Design Decisions
//! - Whole-file rewrite via temp file + rename + directory fsync, so a crash
//!   leaves either the old or the new file, never a torn one
//! - The lock lives in a sibling file because rename replaces the data file
//! - Reads take a shared lock, compare-and-set an exclusive one; any number
//!   of stores, in any number of processes, may share one path
//! - File I/O runs on the blocking pool

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::nonce::store::{NonceStore, StoreError, StoreResult};

type Floors = BTreeMap<String, u64>;

#[cfg(unix)]
type LockGuard = nix::fcntl::Flock<File>;
#[cfg(not(unix))]
type LockGuard = File;

#[derive(Debug, Clone, Copy)]
enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug)]
struct StorePaths {
    data: PathBuf,
    temp: PathBuf,
    lock: PathBuf,
}

impl StorePaths {
    fn new(data: PathBuf) -> Self {
        Self {
            temp: with_suffix(&data, ".tmp"),
            lock: with_suffix(&data, ".lock"),
            data,
        }
    }

    fn lock(&self, mode: LockMode) -> StoreResult<LockGuard> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock)?;
        acquire(file, mode)
    }

    fn read(&self) -> StoreResult<Floors> {
        match fs::read(&self.data) {
            Ok(bytes) if bytes.is_empty() => Ok(Floors::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                StoreError::Corrupt(format!("{}: {}", self.data.display(), e))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Floors::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, floors: &Floors) -> StoreResult<()> {
        let bytes =
            serde_json::to_vec_pretty(floors).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let mut file = File::create(&self.temp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&self.temp, &self.data)?;
        sync_parent(&self.data)
    }
}

#[cfg(unix)]
fn acquire(file: File, mode: LockMode) -> StoreResult<LockGuard> {
    use nix::fcntl::{Flock, FlockArg};

    let arg = match mode {
        LockMode::Shared => FlockArg::LockShared,
        LockMode::Exclusive => FlockArg::LockExclusive,
    };
    Flock::lock(file, arg).map_err(|(_, errno)| StoreError::Io(errno.into()))
}

// No advisory lock off unix; stores sharing a path must then be one process.
#[cfg(not(unix))]
fn acquire(file: File, _mode: LockMode) -> StoreResult<LockGuard> {
    Ok(file)
}

#[cfg(unix)]
fn sync_parent(path: &Path) -> StoreResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => File::open(parent)?.sync_all()?,
        _ => File::open(".")?.sync_all()?,
    }
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> StoreResult<()> {
    Ok(())
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// File-backed [`NonceStore`].
#[derive(Debug, Clone)]
pub struct FileNonceStore {
    paths: Arc<StorePaths>,
}

impl FileNonceStore {
    /// Open the store at `path`, creating parent directories if needed.
    ///
    /// A missing or empty file is an empty store. The file is validated
    /// here so corruption surfaces at startup.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let paths = Arc::new(StorePaths::new(path.as_ref().to_path_buf()));

        let records = {
            let paths = Arc::clone(&paths);
            blocking(move || {
                if let Some(parent) = paths.data.parent() {
                    if !parent.as_os_str().is_empty() {
                        fs::create_dir_all(parent)?;
                    }
                }
                let _lock = paths.lock(LockMode::Shared)?;
                Ok(paths.read()?.len())
            })
            .await?
        };

        tracing::info!(path = %paths.data.display(), records, "Nonce store opened");
        Ok(Self { paths })
    }

    pub fn path(&self) -> &Path {
        &self.paths.data
    }

    fn temp_path(&self) -> &Path {
        &self.paths.temp
    }
}

async fn blocking<T, F>(f: F) -> StoreResult<T>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?
}

#[async_trait]
impl NonceStore for FileNonceStore {
    async fn load_floor(&self, key: &str) -> StoreResult<Option<u64>> {
        let paths = Arc::clone(&self.paths);
        let key = key.to_string();
        blocking(move || {
            let _lock = paths.lock(LockMode::Shared)?;
            Ok(paths.read()?.get(&key).copied())
        })
        .await
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<u64>,
        new: u64,
    ) -> StoreResult<bool> {
        let paths = Arc::clone(&self.paths);
        let key = key.to_string();
        blocking(move || {
            let _lock = paths.lock(LockMode::Exclusive)?;
            let mut floors = paths.read()?;
            if floors.get(&key).copied() != expected {
                return Ok(false);
            }
            floors.insert(key, new);
            paths.write(&floors)?;
            Ok(true)
        })
        .await
    }
}
