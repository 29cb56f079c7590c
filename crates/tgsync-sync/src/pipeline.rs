//! Import runs: order months and client files, each reconciled against the client app.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::Serialize;
use tgsync_adapters::{
    read_rows, ClientImportAdapter, ImportAdapter, OrderImportAdapter, ParsedCsv, ORDER_ID,
};
use tgsync_core::{ImportKind, Scope};
use tgsync_storage::{
    fetch_client_snapshot, fetch_record_ids, fetch_remark_templates, notify_best_effort,
    sha256_hex, with_attached_log, ApiClient, BulkOperation, ChatworkNotifier, HttpClientConfig,
    KintoneClient, NoopNotifier, NoticeKind, Notifier, OrderIdCache, RecordStore, RunArtifacts,
    RunLog, StoreError,
};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{ImportManifest, SyncConfig};
use crate::error::ScopeError;
use crate::reconcile::{ReconcileEngine, ReconcileStats, Reconciliation, RemoteSnapshot};

#[derive(Debug, Clone, Serialize)]
pub struct ScopeOutcome {
    pub source_path: String,
    pub source_sha256: String,
    pub rows: usize,
    pub parse_warnings: usize,
    /// Rows left after dropping already-imported order ids. `None` for client files.
    pub unseen_rows: Option<usize>,
    pub stats: ReconcileStats,
    pub submitted: bool,
}

impl ScopeOutcome {
    fn new(path: &Path, parsed: &ParsedCsv) -> Self {
        Self {
            source_path: path.display().to_string(),
            source_sha256: sha256_hex(&parsed.raw_bytes),
            rows: parsed.rows.len(),
            parse_warnings: parsed.warnings.len(),
            unseen_rows: None,
            stats: ReconcileStats::default(),
            submitted: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScopeReport {
    pub label: String,
    pub outcome: Option<ScopeOutcome>,
    pub error: Option<String>,
    /// Missing optional source; not treated as a failure.
    pub skipped: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub kind: ImportKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub log_path: String,
    pub scopes: Vec<ScopeReport>,
}

impl RunSummary {
    pub fn failed(&self) -> usize {
        self.scopes.iter().filter(|s| s.error.is_some() && !s.skipped).count()
    }

    fn success_message(&self) -> String {
        let heading = match self.kind {
            ImportKind::Order => "受注データ取込が完了しました",
            ImportKind::Client => "顧客データ取込が完了しました",
        };
        let lines: Vec<String> = self
            .scopes
            .iter()
            .filter_map(|s| {
                s.outcome.as_ref().map(|o| {
                    format!(
                        "{}: 追加 {}件 / 更新 {}件",
                        s.label, o.stats.to_add, o.stats.to_update
                    )
                })
            })
            .collect();
        format!("{heading}[hr]{}", lines.join("\n"))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PurgeSummary {
    pub app: u64,
    pub found: usize,
    pub deleted: usize,
    pub dry_run: bool,
}

pub fn build_notifier(config: &SyncConfig, http: ApiClient) -> Arc<dyn Notifier> {
    match config.chatwork() {
        Some((token, room)) => Arc::new(ChatworkNotifier::new(
            http,
            token,
            room,
            config.kintone_base_url.clone(),
        )),
        None => Arc::new(NoopNotifier),
    }
}

/// Adds (when any) followed by updates (when any).
fn bulk_operations(app: u64, reconciliation: Reconciliation) -> Vec<BulkOperation> {
    let mut operations = Vec::new();
    if !reconciliation.to_add.is_empty() {
        operations.push(BulkOperation::AddAll {
            app,
            records: reconciliation.to_add,
        });
    }
    if !reconciliation.to_update.is_empty() {
        operations.push(BulkOperation::UpdateAll {
            app,
            records: reconciliation.to_update,
        });
    }
    operations
}

fn artifact_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "source".to_string())
}

pub struct SyncPipeline {
    config: SyncConfig,
    store: Arc<dyn RecordStore>,
    notifier: Arc<dyn Notifier>,
    dry_run: bool,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig) -> Result<Self> {
        let http = ApiClient::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            ..Default::default()
        })?;
        let kintone = config.kintone_config()?;
        let store: Arc<dyn RecordStore> = Arc::new(KintoneClient::new(http.clone(), kintone));
        let notifier = build_notifier(&config, http);
        Ok(Self::with_parts(config, store, notifier))
    }

    pub fn with_parts(
        config: SyncConfig,
        store: Arc<dyn RecordStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            store,
            notifier,
            dry_run: false,
        }
    }

    /// Builds and dumps the bulk request without submitting it or persisting the cache.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub async fn notify_failure(&self, message: &str, log: Option<&RunLog>) {
        let body = match log {
            Some(log) if self.config.notify_attach_log => with_attached_log(message, log.contents()),
            _ => message.to_string(),
        };
        notify_best_effort(self.notifier.as_ref(), NoticeKind::Failure, &body).await;
    }

    /// Imports yesterday's month when it differs from `today`'s, then `today`'s month.
    pub async fn run_order_import(&self, today: NaiveDate) -> Result<RunSummary> {
        let started_at = Utc::now();
        let mut log = RunLog::timestamped(&self.config.log_dir, "import_order_csv");
        let artifacts = RunArtifacts::new(&self.config.log_dir, Local::now());
        let mut scopes = Vec::new();

        for scope in Scope::for_run_date(today) {
            log.log(format!("{}年{}月の受注データ取込を開始します", scope.year, scope.month));
            let span = info_span!("order_scope", scope = %scope.token());
            let result = self
                .import_order_scope(scope, &mut log, &artifacts)
                .instrument(span)
                .await;
            match result {
                Ok(outcome) => scopes.push(ScopeReport {
                    label: scope.to_string(),
                    outcome: Some(outcome),
                    error: None,
                    skipped: false,
                }),
                Err(err) => {
                    warn!(scope = %scope.token(), error = %err, "order scope failed");
                    log.log(&err);
                    let message = format!(
                        "{}年{}月の受注データ取込時にエラーが発生しました[hr]{err}",
                        scope.year, scope.month
                    );
                    self.notify_failure(&message, Some(&log)).await;
                    scopes.push(ScopeReport {
                        label: scope.to_string(),
                        outcome: None,
                        error: Some(err.to_string()),
                        skipped: false,
                    });
                }
            }
        }

        self.finish_run(ImportKind::Order, started_at, log, artifacts, scopes)
            .await
    }

    pub async fn import_order_scope(
        &self,
        scope: Scope,
        log: &mut RunLog,
        artifacts: &RunArtifacts,
    ) -> Result<ScopeOutcome, ScopeError> {
        let adapter = OrderImportAdapter;
        let path = scope.order_csv_path(&self.config.order_root);
        let prefix = format!("order-{}", scope.token());

        log.start("CSVデータの読み込み");
        let parsed = read_rows(&path, adapter.schema()).await?;
        let mut outcome = ScopeOutcome::new(&path, &parsed);
        log.log(format!("データ件数 {}", outcome.rows));
        self.report_parse_issues(&prefix, &parsed, log, artifacts)
            .await?;
        log.end();

        log.start("受注IDが重複するデータを削除");
        let mut cache = OrderIdCache::load(&self.config.cache_dir, scope).await?;
        if cache.loaded_from_disk() {
            log.log(format!("キャッシュデータを読み込みました ({}件)", cache.len()));
        }
        let rows = cache.filter_unseen(parsed.rows, |row| row.get(ORDER_ID));
        cache.record(rows.iter().map(|row| row.get(ORDER_ID).to_string()));
        outcome.unseen_rows = Some(rows.len());
        log.log(format!("未登録データ件数 {}", rows.len()));
        log.end();

        if rows.is_empty() {
            log.log("未登録のデータが存在しないため、処理を終了します");
            return Ok(outcome);
        }

        log.start("登録済みの顧客情報を取得");
        let records = fetch_client_snapshot(
            self.store.as_ref(),
            self.config.client_app_id,
            adapter.remark_field(),
        )
        .await?;
        let snapshot = RemoteSnapshot::from_records(records);
        log.log(format!("登録済み顧客件数 {}", snapshot.len()));
        log.end();

        log.start("備考テンプレートの取得");
        let templates =
            fetch_remark_templates(self.store.as_ref(), self.config.template_app_id).await?;
        log.log(format!("テンプレート件数: {}", templates.len()));
        log.end();

        log.start("CSVデータの補完");
        let extended: Vec<_> = rows
            .into_iter()
            .map(|raw| adapter.extend_row(raw, &templates))
            .collect();
        log.end();

        log.start("顧客情報の登録・更新の振り分け");
        let reconciliation = ReconcileEngine::new(&adapter).reconcile(&extended, &snapshot);
        outcome.stats = reconciliation.stats;
        log.log_value("振り分け結果", &reconciliation.stats);
        log.end();

        log.start("レコードの作成");
        let operations = bulk_operations(self.config.client_app_id, reconciliation);
        log.end();

        log.start("レコードの登録・更新");
        outcome.submitted = self.submit(&prefix, &operations, log, artifacts).await?;
        log.end();

        if self.dry_run {
            log.log("ドライランのためキャッシュデータは更新しません");
        } else {
            log.start("キャッシュデータの更新");
            cache.persist().await?;
            log.log("キャッシュデータを更新しました");
            log.end();
        }
        Ok(outcome)
    }

    /// Imports each client export in order; a failing file is reported and the next one runs.
    pub async fn run_client_import(&self, files: Option<Vec<PathBuf>>) -> Result<RunSummary> {
        let started_at = Utc::now();
        let targets = match files {
            Some(files) => files,
            None => ImportManifest::load(&self.config.workspace_root)
                .await?
                .resolved_client_targets(&self.config.workspace_root),
        };
        let mut log = RunLog::timestamped(&self.config.log_dir, "import_client_csv");
        let artifacts = RunArtifacts::new(&self.config.log_dir, Local::now());
        let mut scopes = Vec::new();

        for path in targets {
            log.log(format!("{} を処理中...", path.display()));
            let span = info_span!("client_file", file = %path.display());
            let result = self
                .import_client_file(&path, &mut log, &artifacts)
                .instrument(span)
                .await;
            let label = path.display().to_string();
            match result {
                Ok(outcome) => scopes.push(ScopeReport {
                    label,
                    outcome: Some(outcome),
                    error: None,
                    skipped: false,
                }),
                Err(ScopeError::SourceNotFound(missing)) => {
                    log.log(format!("{} が見つからないためスキップします", missing.display()));
                    scopes.push(ScopeReport {
                        label,
                        outcome: None,
                        error: Some(ScopeError::SourceNotFound(missing).to_string()),
                        skipped: true,
                    });
                }
                Err(err) => {
                    warn!(file = %label, error = %err, "client file failed");
                    log.log(&err);
                    let message =
                        format!("顧客データ取込時にエラーが発生しました[hr]{label}: {err}");
                    self.notify_failure(&message, Some(&log)).await;
                    scopes.push(ScopeReport {
                        label,
                        outcome: None,
                        error: Some(err.to_string()),
                        skipped: false,
                    });
                }
            }
        }

        self.finish_run(ImportKind::Client, started_at, log, artifacts, scopes)
            .await
    }

    pub async fn import_client_file(
        &self,
        path: &Path,
        log: &mut RunLog,
        artifacts: &RunArtifacts,
    ) -> Result<ScopeOutcome, ScopeError> {
        let adapter = ClientImportAdapter;
        let prefix = format!("client-{}", artifact_stem(path));

        let parsed = read_rows(path, adapter.schema()).await?;
        let mut outcome = ScopeOutcome::new(path, &parsed);
        log.log(format!("データ件数 {}", outcome.rows));
        self.report_parse_issues(&prefix, &parsed, log, artifacts)
            .await?;

        log.start("テンプレートの取得");
        let templates =
            fetch_remark_templates(self.store.as_ref(), self.config.template_app_id).await?;
        log.log(format!("テンプレート件数: {}", templates.len()));
        log.end();

        log.start("登録済みの顧客情報の取得");
        let records = fetch_client_snapshot(
            self.store.as_ref(),
            self.config.client_app_id,
            adapter.remark_field(),
        )
        .await?;
        let snapshot = RemoteSnapshot::from_records(records);
        log.end();

        log.start("データの整形");
        let extended: Vec<_> = parsed
            .rows
            .into_iter()
            .map(|raw| adapter.extend_row(raw, &templates))
            .collect();
        log.log(format!("整形後のデータ件数 {}", extended.len()));
        log.end();

        log.start("追加・更新対象の抽出");
        let reconciliation = ReconcileEngine::new(&adapter).reconcile(&extended, &snapshot);
        outcome.stats = reconciliation.stats;
        log.log(format!("重複排除後のデータ件数 {}", reconciliation.stats.distinct_keys));
        log.log_value("振り分け結果", &reconciliation.stats);
        log.end();

        let operations = bulk_operations(self.config.client_app_id, reconciliation);
        log.start("レコードの登録・更新");
        outcome.submitted = self.submit(&prefix, &operations, log, artifacts).await?;
        log.end();
        Ok(outcome)
    }

    /// Deletes every record of the client app.
    pub async fn purge_clients(&self) -> Result<PurgeSummary> {
        let app = self.config.client_app_id;
        let ids = fetch_record_ids(self.store.as_ref(), app)
            .await
            .context("listing client records")?;
        info!(app, count = ids.len(), dry_run = self.dry_run, "purging client app");

        let deleted = if self.dry_run || ids.is_empty() {
            0
        } else {
            let results = self
                .store
                .delete_records(app, &ids)
                .await
                .context("deleting client records")?;
            RunArtifacts::new(&self.config.log_dir, Local::now())
                .write_json("delete-all-clients", &results)
                .await?;
            ids.len()
        };

        Ok(PurgeSummary {
            app,
            found: ids.len(),
            deleted,
            dry_run: self.dry_run,
        })
    }

    pub async fn maybe_build_scheduler(self: &Arc<Self>) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let cron = self.config.order_cron.clone();
        let pipeline = Arc::clone(self);
        let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
            let pipeline = Arc::clone(&pipeline);
            Box::pin(async move {
                let today = Local::now().date_naive();
                match pipeline.run_order_import(today).await {
                    Ok(summary) => info!(
                        run_id = %summary.run_id,
                        failed = summary.failed(),
                        "scheduled order import finished"
                    ),
                    Err(err) => {
                        warn!(error = %err, "scheduled order import failed");
                        let message = format!("受注データ取込時にエラーが発生しました[hr]{err:#}");
                        pipeline.notify_failure(&message, None).await;
                    }
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        Ok(Some(sched))
    }

    async fn report_parse_issues(
        &self,
        prefix: &str,
        parsed: &ParsedCsv,
        log: &mut RunLog,
        artifacts: &RunArtifacts,
    ) -> Result<(), ScopeError> {
        if !parsed.missing_columns.is_empty() {
            log.log(format!("不足しているカラム: {}", parsed.missing_columns.join(", ")));
        }
        if !parsed.warnings.is_empty() {
            log.log(format!("CSVの解析エラー {}件", parsed.warnings.len()));
        }
        artifacts
            .write_json(&format!("{prefix}-errors"), &parsed.warnings)
            .await?;
        Ok(())
    }

    /// Dumps the request, submits it unless this is a dry run, and dumps the results.
    async fn submit(
        &self,
        prefix: &str,
        operations: &[BulkOperation],
        log: &mut RunLog,
        artifacts: &RunArtifacts,
    ) -> Result<bool, ScopeError> {
        for operation in operations {
            match operation {
                BulkOperation::AddAll { records, .. } => {
                    log.log(format!("{}件のレコードを追加します", records.len()))
                }
                BulkOperation::UpdateAll { records, .. } => {
                    log.log(format!("{}件のレコードを更新します", records.len()))
                }
            }
        }
        artifacts
            .write_json(&format!("{prefix}-bulk-request"), operations)
            .await?;

        if operations.is_empty() {
            log.log("追加・更新対象のレコードはありません");
            return Ok(false);
        }
        if self.dry_run {
            log.log("ドライランのためレコードは送信しません");
            return Ok(false);
        }

        // Once the store has the writes nothing here may fail the scope before the cache persists.
        let results_name = format!("{prefix}-results");
        match self.store.bulk_write(operations).await {
            Ok(results) => {
                dump_best_effort(artifacts, &results_name, &results).await;
                Ok(true)
            }
            Err(StoreError::PartiallyCommitted {
                committed,
                total,
                results,
                source,
            }) => {
                log.log(format!(
                    "{total}件中{committed}件の一括リクエストが登録済みです ({}件の結果)",
                    results.len()
                ));
                dump_best_effort(artifacts, &results_name, &results).await;
                Err(StoreError::PartiallyCommitted {
                    committed,
                    total,
                    results,
                    source,
                }
                .into())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn finish_run(
        &self,
        kind: ImportKind,
        started_at: DateTime<Utc>,
        log: RunLog,
        artifacts: RunArtifacts,
        scopes: Vec<ScopeReport>,
    ) -> Result<RunSummary> {
        if let Err(err) = log.write().await {
            warn!(error = %err, "run log could not be written");
        }
        let summary = RunSummary {
            run_id: Uuid::new_v4(),
            kind,
            started_at,
            finished_at: Utc::now(),
            dry_run: self.dry_run,
            log_path: log.path().display().to_string(),
            scopes,
        };
        artifacts
            .write_json(&format!("{}-summary", kind.label()), &summary)
            .await?;

        if self.config.notify_success && summary.failed() == 0 {
            notify_best_effort(
                self.notifier.as_ref(),
                NoticeKind::Success,
                &summary.success_message(),
            )
            .await;
        }
        Ok(summary)
    }
}

async fn dump_best_effort<T: Serialize + ?Sized>(
    artifacts: &RunArtifacts,
    name: &str,
    value: &T,
) {
    if let Err(err) = artifacts.write_json(name, value).await {
        warn!(artifact = name, error = %err, "run artifact could not be written");
    }
}
