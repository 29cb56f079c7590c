//! Stage timer and per-run text log.
//!
//! Every line goes to `tracing` as it happens and is buffered for the log file written at the end
//! of the run (and optionally attached to a failure notification).

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use chrono::Local;
use serde::Serialize;
use tracing::info;

#[derive(Debug)]
pub struct RunLog {
    path: PathBuf,
    buffer: String,
    stage: Option<(String, Instant)>,
}

impl RunLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            buffer: String::new(),
            stage: None,
        }
    }

    /// `<root>/<yyyy_MM_dd_HH_mm_ss>_<suffix>.log`
    pub fn timestamped(root: &Path, suffix: &str) -> Self {
        let stamp = Local::now().format("%Y_%m_%d_%H_%M_%S");
        Self::new(root.join(format!("{stamp}_{suffix}.log")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contents(&self) -> &str {
        &self.buffer
    }

    pub fn log(&mut self, message: impl Display) {
        let line = message.to_string();
        info!(stage = self.stage_label(), "{line}");
        self.buffer.push_str(&line);
        self.buffer.push('\n');
    }

    /// Logs `label` followed by the JSON rendering of `value`.
    pub fn log_value<T: Serialize + ?Sized>(&mut self, label: &str, value: &T) {
        let rendered = serde_json::to_string(value).unwrap_or_else(|err| format!("<{err}>"));
        self.log(format!("{label} {rendered}"));
    }

    pub fn start(&mut self, label: &str) {
        self.stage = Some((label.to_string(), Instant::now()));
        self.log(format!("[{}] {label}:開始", Self::now()));
    }

    /// Closes the open stage and logs its elapsed milliseconds. Without an open stage this only
    /// logs the timestamp.
    pub fn end(&mut self) {
        let (label, elapsed) = match self.stage.take() {
            Some((label, started)) => (label, started.elapsed().as_millis()),
            None => (String::new(), 0),
        };
        self.log(format!("[{}] {label}:終了 {elapsed}ms", Self::now()));
    }

    pub async fn write(&self) -> anyhow::Result<()> {
        crate::write_atomic(&self.path, self.buffer.as_bytes())
            .await
            .with_context(|| format!("writing run log {}", self.path.display()))
    }

    fn stage_label(&self) -> &str {
        self.stage.as_ref().map(|(label, _)| label.as_str()).unwrap_or("-")
    }

    fn now() -> String {
        Local::now().format("%Y/%m/%d %H:%M:%S").to_string()
    }
}
