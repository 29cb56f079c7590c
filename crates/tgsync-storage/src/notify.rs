//! Chat notifications for failed (and optionally successful) runs.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::http::{ApiClient, FetchError, RetryMode};

const CHATWORK_API: &str = "https://api.chatwork.com/v2";
/// Attached log text is cut to this many characters.
const ATTACHED_LOG_LIMIT: usize = 8_000;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Fetch(#[from] FetchError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Failure,
    Success,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, kind: NoticeKind, message: &str) -> Result<(), NotifyError>;
}

/// Posts to one Chatwork room. Messages are wrapped in an info block titled with the store URL.
#[derive(Debug, Clone)]
pub struct ChatworkNotifier {
    http: ApiClient,
    api_token: String,
    room_id: String,
    base_url: String,
}

impl ChatworkNotifier {
    pub fn new(
        http: ApiClient,
        api_token: impl Into<String>,
        room_id: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            api_token: api_token.into(),
            room_id: room_id.into(),
            base_url: base_url.into(),
        }
    }

    pub fn format_body(&self, kind: NoticeKind, message: &str) -> String {
        let title = match kind {
            NoticeKind::Failure => "でのエラー",
            NoticeKind::Success => "での取込結果",
        };
        format!(
            "[info][title]{}{title}[/title]{message}[/info]",
            self.base_url
        )
    }
}

#[async_trait]
impl Notifier for ChatworkNotifier {
    async fn send(&self, kind: NoticeKind, message: &str) -> Result<(), NotifyError> {
        let url = format!("{CHATWORK_API}/rooms/{}/messages", self.room_id);
        let form = [("body", self.format_body(kind, message))];
        self.http
            .send_json(
                |client| {
                    client
                        .post(&url)
                        .header("X-ChatWorkToken", &self.api_token)
                        .form(&form)
                },
                RetryMode::Never,
            )
            .await?;
        info!(room = %self.room_id, "notification sent");
        Ok(())
    }
}

/// Used when no chat room is configured; messages only reach the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send(&self, kind: NoticeKind, message: &str) -> Result<(), NotifyError> {
        info!(?kind, message, "notification suppressed (no notifier configured)");
        Ok(())
    }
}

/// Appends the run log to `message` in a code block, keeping its tail when too long.
pub fn with_attached_log(message: &str, log: &str) -> String {
    let count = log.chars().count();
    let tail: String = if count > ATTACHED_LOG_LIMIT {
        log.chars().skip(count - ATTACHED_LOG_LIMIT).collect()
    } else {
        log.to_string()
    };
    format!("{message}[hr][code]{tail}[/code]")
}

/// Sends and swallows any failure; a broken notifier never fails a run.
pub async fn notify_best_effort(notifier: &dyn Notifier, kind: NoticeKind, message: &str) {
    if let Err(err) = notifier.send(kind, message).await {
        warn!(error = %err, "notification failed");
    }
}
