//! Per-scope cache of order ids that earlier runs already imported.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tgsync_core::Scope;
use thiserror::Error;
use tokio::fs;

pub const CACHE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheData {
    pub version: u32,
    #[serde(rename = "orderIds")]
    pub order_ids: Vec<String>,
}

impl Default for CacheData {
    fn default() -> Self {
        Self {
            version: CACHE_VERSION,
            order_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("reading cache {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing cache {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("cache {path} has unsupported version {version}")]
    UnsupportedVersion { path: PathBuf, version: u32 },
    #[error("persisting cache {path}: {message}")]
    Persist { path: PathBuf, message: String },
}

#[derive(Debug, Clone)]
pub struct OrderIdCache {
    path: PathBuf,
    data: CacheData,
    seen: HashSet<String>,
    loaded_from_disk: bool,
}

impl OrderIdCache {
    pub fn path_for(root: &Path, scope: Scope) -> PathBuf {
        root.join(format!("{}.json", scope.token()))
    }

    /// A missing file yields an empty cache.
    pub async fn load(root: &Path, scope: Scope) -> Result<Self, CacheError> {
        let path = Self::path_for(root, scope);
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::empty(path));
            }
            Err(source) => return Err(CacheError::Io { path, source }),
        };
        let data: CacheData = serde_json::from_str(&text).map_err(|source| CacheError::Parse {
            path: path.clone(),
            source,
        })?;
        if data.version != CACHE_VERSION {
            return Err(CacheError::UnsupportedVersion {
                path,
                version: data.version,
            });
        }
        let seen = data.order_ids.iter().cloned().collect();
        Ok(Self {
            path,
            data,
            seen,
            loaded_from_disk: true,
        })
    }

    pub fn empty(path: PathBuf) -> Self {
        Self {
            path,
            data: CacheData::default(),
            seen: HashSet::new(),
            loaded_from_disk: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn loaded_from_disk(&self) -> bool {
        self.loaded_from_disk
    }

    pub fn data(&self) -> &CacheData {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.order_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.order_ids.is_empty()
    }

    pub fn is_seen(&self, order_id: &str) -> bool {
        self.seen.contains(order_id)
    }

    /// Appends as given; callers pass ids that are already unique.
    pub fn record<I, S>(&mut self, order_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for id in order_ids {
            let id = id.into();
            self.seen.insert(id.clone());
            self.data.order_ids.push(id);
        }
    }

    /// Rows whose id is not cached, keeping only the first row of each id.
    pub fn filter_unseen<T, F>(&self, rows: Vec<T>, order_id: F) -> Vec<T>
    where
        F: Fn(&T) -> &str,
    {
        let mut batch = HashSet::new();
        rows.into_iter()
            .filter(|row| {
                let id = order_id(row);
                !self.is_seen(id) && batch.insert(id.to_string())
            })
            .collect()
    }

    pub async fn persist(&self) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(&self.data).map_err(|source| CacheError::Parse {
            path: self.path.clone(),
            source,
        })?;
        crate::write_atomic(&self.path, &bytes)
            .await
            .map_err(|err| CacheError::Persist {
                path: self.path.clone(),
                message: format!("{err:#}"),
            })
    }
}
