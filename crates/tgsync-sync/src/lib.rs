//! Reconciliation engine and import orchestration.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod reconcile;

pub use config::{default_client_targets, ImportManifest, SyncConfig};
pub use error::ScopeError;
pub use pipeline::{
    build_notifier, PurgeSummary, RunSummary, ScopeOutcome, ScopeReport, SyncPipeline,
};
pub use reconcile::{ReconcileEngine, ReconcileStats, Reconciliation, RemoteSnapshot};

pub const CRATE_NAME: &str = "tgsync-sync";
