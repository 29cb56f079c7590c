//! JSON dumps of what a run sent and received, written next to the run log.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Local};
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct RunArtifacts {
    dir: PathBuf,
    stamp: String,
}

impl RunArtifacts {
    pub fn new(dir: impl Into<PathBuf>, started_at: DateTime<Local>) -> Self {
        Self {
            dir: dir.into(),
            stamp: started_at.format("%Y_%m_%d_%H_%M_%S").to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/<stamp>-<name>.json`
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}-{name}.json", self.stamp))
    }

    pub async fn write_json<T: Serialize + ?Sized>(
        &self,
        name: &str,
        value: &T,
    ) -> anyhow::Result<PathBuf> {
        let path = self.path_for(name);
        let bytes = serde_json::to_vec_pretty(value)
            .with_context(|| format!("serializing artifact {name}"))?;
        crate::write_atomic(&path, &bytes).await?;
        Ok(path)
    }
}
