use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tgsync_storage::{KintoneAuth, KintoneConfig};

pub const DEFAULT_CLIENT_APP_ID: u64 = 546;
pub const DEFAULT_TEMPLATE_APP_ID: u64 = 540;
pub const MANIFEST_FILE: &str = "tgsync.yaml";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub kintone_base_url: String,
    pub kintone_api_token: Option<String>,
    pub kintone_username: Option<String>,
    pub kintone_password: Option<String>,
    pub kintone_guest_space_id: Option<String>,
    pub client_app_id: u64,
    pub template_app_id: u64,
    pub order_root: PathBuf,
    pub log_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub chatwork_api_token: Option<String>,
    pub chatwork_room_id: Option<String>,
    pub notify_success: bool,
    pub notify_attach_log: bool,
    pub http_timeout_secs: u64,
    pub scheduler_enabled: bool,
    pub order_cron: String,
    pub workspace_root: PathBuf,
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn flag_var(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(false)
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            kintone_base_url: std::env::var("KINTONE_BASE_URL").unwrap_or_default(),
            kintone_api_token: non_empty_var("KINTONE_API_TOKEN"),
            kintone_username: non_empty_var("KINTONE_USERNAME"),
            kintone_password: non_empty_var("KINTONE_PASSWORD"),
            kintone_guest_space_id: non_empty_var("KINTONE_GUEST_SPACE_ID"),
            client_app_id: std::env::var("TGSYNC_CLIENT_APP_ID")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_CLIENT_APP_ID),
            template_app_id: std::env::var("TGSYNC_TEMPLATE_APP_ID")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_TEMPLATE_APP_ID),
            order_root: std::env::var("TG_ORDER_DIRECTORY_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
            log_dir: std::env::var("TGSYNC_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("log")),
            cache_dir: std::env::var("TGSYNC_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("cache")),
            chatwork_api_token: non_empty_var("CHATWORK_API_TOKEN"),
            chatwork_room_id: non_empty_var("CHATWORK_ROOM_ID"),
            notify_success: flag_var("TGSYNC_NOTIFY_SUCCESS"),
            notify_attach_log: flag_var("TGSYNC_NOTIFY_ATTACH_LOG"),
            http_timeout_secs: std::env::var("TGSYNC_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            scheduler_enabled: flag_var("TGSYNC_SCHEDULER_ENABLED"),
            order_cron: std::env::var("TGSYNC_ORDER_CRON")
                .unwrap_or_else(|_| "0 0 6 * * *".to_string()),
            workspace_root: PathBuf::from("."),
        }
    }

    /// Store credentials; the API token wins over a username/password pair.
    pub fn kintone_config(&self) -> Result<KintoneConfig> {
        if self.kintone_base_url.trim().is_empty() {
            bail!("KINTONE_BASE_URL is not set");
        }
        let auth = match (
            &self.kintone_api_token,
            &self.kintone_username,
            &self.kintone_password,
        ) {
            (Some(token), _, _) => KintoneAuth::ApiToken(token.clone()),
            (None, Some(username), Some(password)) => KintoneAuth::Password {
                username: username.clone(),
                password: password.clone(),
            },
            _ => bail!("set KINTONE_API_TOKEN or KINTONE_USERNAME and KINTONE_PASSWORD"),
        };
        Ok(KintoneConfig {
            base_url: self.kintone_base_url.trim_end_matches('/').to_string(),
            auth,
            guest_space_id: self.kintone_guest_space_id.clone(),
        })
    }

    pub fn chatwork(&self) -> Option<(&str, &str)> {
        match (&self.chatwork_api_token, &self.chatwork_room_id) {
            (Some(token), Some(room)) => Some((token.as_str(), room.as_str())),
            _ => None,
        }
    }
}

/// Optional `tgsync.yaml` overriding where client exports are read from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImportManifest {
    #[serde(default = "default_client_targets")]
    pub client_targets: Vec<PathBuf>,
}

impl Default for ImportManifest {
    fn default() -> Self {
        Self {
            client_targets: default_client_targets(),
        }
    }
}

pub fn default_client_targets() -> Vec<PathBuf> {
    (1..=9)
        .map(|n| Path::new("target").join(format!("new-customer-{n:02}.csv")))
        .collect()
}

impl ImportManifest {
    pub async fn load(workspace_root: &Path) -> Result<Self> {
        let path = workspace_root.join(MANIFEST_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => {
                Self::from_yaml(&text).with_context(|| format!("parsing {}", path.display()))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err).with_context(|| format!("reading {}", path.display())),
        }
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Targets resolved against `root` unless already absolute.
    pub fn resolved_client_targets(&self, root: &Path) -> Vec<PathBuf> {
        self.client_targets.iter().map(|p| root.join(p)).collect()
    }
}
