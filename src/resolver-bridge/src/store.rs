//! Per-resolver key-value configuration storage.
//!
//! Keys are plugin-defined and opaque to the bridge, except for
//! [`ENABLED_KEY`], which the bridge owns.

use resolver_core::models::ResolverId;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};
use thiserror::Error;

/// Reserved key holding the resolver's enabled flag.
pub const ENABLED_KEY: &str = "enabled";

pub type ResolverConfig = Map<String, Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access resolver config at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse resolver config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("resolver config at {path} is not a JSON object")]
    NotAnObject { path: PathBuf },
}

/// Storage shared by every resolver in the process; implementations must be
/// safe for concurrent use.
pub trait ConfigStore: Send + Sync {
    /// Full configuration of one resolver; empty when nothing was stored.
    fn load(&self, resolver_id: &ResolverId) -> Result<ResolverConfig, StoreError>;

    /// Replace the full configuration of one resolver.
    fn replace(&self, resolver_id: &ResolverId, config: ResolverConfig) -> Result<(), StoreError>;

    /// Set a single key, leaving the others untouched.
    fn set(&self, resolver_id: &ResolverId, key: &str, value: Value) -> Result<(), StoreError>;

    fn get(&self, resolver_id: &ResolverId, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.load(resolver_id)?.remove(key))
    }
}

/// Process-local store, lost on exit.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    entries: RwLock<HashMap<ResolverId, ResolverConfig>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self, resolver_id: &ResolverId) -> Result<ResolverConfig, StoreError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(resolver_id).cloned().unwrap_or_default())
    }

    fn replace(&self, resolver_id: &ResolverId, config: ResolverConfig) -> Result<(), StoreError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(resolver_id.clone(), config);
        Ok(())
    }

    fn set(&self, resolver_id: &ResolverId, key: &str, value: Value) -> Result<(), StoreError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries
            .entry(resolver_id.clone())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }
}

/// One JSON document per resolver inside a directory.
#[derive(Debug)]
pub struct FileConfigStore {
    dir: PathBuf,
    // serializes read-modify-write cycles across resolvers
    write_lock: Mutex<()>,
}

impl FileConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, resolver_id: &ResolverId) -> PathBuf {
        let file_name: String = resolver_id
            .as_str()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{file_name}.json"))
    }

    fn read(&self, path: &Path) -> Result<ResolverConfig, StoreError> {
        if !path.exists() {
            return Ok(ResolverConfig::new());
        }
        let contents = fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        match serde_json::from_str(&contents) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(StoreError::NotAnObject {
                path: path.to_path_buf(),
            }),
            Err(source) => Err(StoreError::Parse {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn write(&self, path: &Path, config: &ResolverConfig) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let json = serde_json::to_string_pretty(config).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self, resolver_id: &ResolverId) -> Result<ResolverConfig, StoreError> {
        self.read(&self.path_for(resolver_id))
    }

    fn replace(&self, resolver_id: &ResolverId, config: ResolverConfig) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.write(&self.path_for(resolver_id), &config)
    }

    fn set(&self, resolver_id: &ResolverId, key: &str, value: Value) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let path = self.path_for(resolver_id);
        let mut config = self.read(&path)?;
        config.insert(key.to_string(), value);
        self.write(&path, &config)
    }
}
