//! Local persistence (idempotency cache, run logs, artifacts) and remote store plumbing.

use std::path::Path;

use anyhow::Context;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

pub mod artifacts;
pub mod cache;
pub mod http;
pub mod kintone;
pub mod notify;
pub mod run_log;

pub use artifacts::RunArtifacts;
pub use cache::{CacheData, CacheError, OrderIdCache};
pub use http::{ApiClient, BackoffPolicy, FetchError, HttpClientConfig, RetryMode};
pub use kintone::{
    fetch_client_snapshot, fetch_record_ids, fetch_remark_templates, BulkOperation, KintoneAuth,
    KintoneClient, KintoneConfig, RecordStore, StoreError,
};
pub use notify::{
    notify_best_effort, with_attached_log, ChatworkNotifier, NoopNotifier, NoticeKind, NotifyError,
    Notifier,
};
pub use run_log::RunLog;

pub const CRATE_NAME: &str = "tgsync-storage";

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Writes `bytes` to a temp file next to `path`, then renames it over `path`.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("creating directory {}", parent.display()))?;

    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening temp file {}", temp_path.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("writing temp file {}", temp_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing temp file {}", temp_path.display()))?;
    file.sync_all()
        .await
        .with_context(|| format!("syncing temp file {}", temp_path.display()))?;
    drop(file);

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| {
            format!(
                "atomically renaming {} -> {}",
                temp_path.display(),
                path.display()
            )
        });
    }
    Ok(())
}
