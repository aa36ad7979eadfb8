//! Checkpointed extract → transform → load → validate migration.
//!
//! `resume_from_checkpoint` decides which phases execute. Phases before the
//! checkpoint are replaced: extract reuses a supplied record set, transform
//! is backfilled with the same derivation rule, load is skipped. Validate and
//! the report always run. Per-record transform and load failures are written
//! to the audit trail and never abort the run.

mod audit;
mod connector;
mod payload;
mod record;
mod report;
mod source;
mod target;

use std::path::Path;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::activity::{self, ActivityOptions};
use crate::artifacts::{ArtifactStore, FsArtifactStore};
use crate::config::MigrationPolicy;
use crate::error::{FailureKind, PipelineError, Result};
use crate::state_machine::{EventStatus, PipelineHandle, PipelineKind, RunContext, spawn};

pub use audit::{AuditRow, LoadResult, LoadStatus, RecordAudit, TransformStatus};
pub use connector::{Connector, ConnectorSettings, EnvLookup, process_env};
pub use payload::{Checkpoint, MigrationPayload, MigrationPlan, SourceSpec};
pub use record::{ExtractionIssue, SourceRecord, TransformedRecord, normalize_all, transform};
pub use report::{MigrationCounts, MigrationReport};
pub use source::{SourceFormat, SourceMode, default_checkpoint_records, default_inline_records};
pub use target::{JsonlTarget, LoadTarget};

/// Starts migration instances.
#[derive(Clone)]
pub struct MigrationPipeline {
    policy: MigrationPolicy,
    env: EnvLookup,
    target: Option<Arc<dyn LoadTarget>>,
    store: Option<Arc<dyn ArtifactStore>>,
}

impl MigrationPipeline {
    pub fn new(policy: MigrationPolicy) -> Self {
        Self {
            policy,
            env: process_env(),
            target: None,
            store: None,
        }
    }

    pub fn with_env(mut self, env: EnvLookup) -> Self {
        self.env = env;
        self
    }

    /// Replace the default JSON-lines target used when `dry_run` is off.
    pub fn with_target(mut self, target: Arc<dyn LoadTarget>) -> Self {
        self.target = Some(target);
        self
    }

    /// Replace the filesystem store rooted at `output_dir` that persists the
    /// report.
    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Validate `payload` and start an instance. Malformed payloads, path
    /// escapes and unsupported formats reject the call.
    pub fn start(&self, payload: Value) -> Result<PipelineHandle<MigrationReport>> {
        let plan = MigrationPlan::from_value(payload)?;
        let pipeline = self.clone();
        Ok(spawn(PipelineKind::Migration, move |ctx| async move {
            pipeline.run(ctx, plan).await
        }))
    }

    async fn run(self, ctx: RunContext, plan: MigrationPlan) -> Result<MigrationReport> {
        let instance_id = ctx.instance_id();
        let phase = self.policy.phase_options();
        let per_record = self.policy.record_options();
        let concurrency = self.policy.record_concurrency.max(1);
        let resume = plan.resume_from;
        info!(
            instance_id = %instance_id,
            migration_id = %plan.migration_id,
            dry_run = plan.dry_run,
            resume_from = %resume,
            "migration started"
        );

        // extract
        ctx.enter_stage("extract")?;
        let raw = if resume.runs_extract() {
            self.extract(&plan.source, &phase).await?
        } else {
            plan.checkpoint_records
                .clone()
                .unwrap_or_else(default_checkpoint_records)
        };
        let (records, extraction_errors) = normalize_all(&raw);
        if resume.runs_extract() {
            ctx.record(
                "extract",
                EventStatus::Completed,
                json!({
                    "source_mode": plan.source.mode(),
                    "extracted_count": records.len(),
                    "extraction_errors": extraction_errors.len(),
                }),
            );
        } else {
            ctx.record(
                "extract",
                EventStatus::Resumed,
                json!({ "checkpoint": resume, "reused_count": records.len() }),
            );
        }
        let mut audit = RecordAudit::new(&records);

        // transform
        ctx.enter_stage("transform")?;
        let outcomes: Vec<std::result::Result<TransformedRecord, String>> = if resume
            .runs_transform()
        {
            let futures: Vec<_> = records
                .iter()
                .map(|record| transform_with_retry(record, &per_record))
                .collect();
            stream::iter(futures)
                .buffered(concurrency)
                .collect()
                .await
        } else {
            records.iter().map(transform).collect()
        };
        for (index, outcome) in outcomes.iter().enumerate() {
            audit.mark_transform(index, outcome.as_ref().map(|_| ()).map_err(Clone::clone));
        }
        let transformed: Vec<Option<TransformedRecord>> =
            outcomes.into_iter().map(std::result::Result::ok).collect();
        let transform_summary = json!({
            "transformed_count": audit.count_transform(TransformStatus::Success),
            "failed_count": audit.count_transform(TransformStatus::Failed),
        });
        ctx.record(
            "transform",
            if resume.runs_transform() {
                EventStatus::Completed
            } else {
                EventStatus::Backfilled
            },
            transform_summary,
        );

        // load
        ctx.enter_stage("load")?;
        let mut load_results = Vec::new();
        if resume.runs_load() {
            let target: Arc<dyn LoadTarget> = match &self.target {
                Some(target) => target.clone(),
                None => Arc::new(JsonlTarget::new(
                    plan.output_dir
                        .join(format!("loaded-{}.jsonl", plan.migration_id)),
                )),
            };
            let dry_run = plan.dry_run;
            let pending: Vec<(usize, &TransformedRecord)> = transformed
                .iter()
                .enumerate()
                .filter_map(|(index, t)| t.as_ref().map(|t| (index, t)))
                .collect();
            let futures: Vec<_> = pending
                .into_iter()
                .map(|(index, record)| {
                    let target = target.clone();
                    let identifier = records[index].source_identifier.clone();
                    let options = &per_record;
                    async move {
                        let result =
                            load_one(record, identifier, dry_run, target, options).await;
                        (index, result)
                    }
                })
                .collect();
            let results: Vec<(usize, LoadResult)> = stream::iter(futures)
                .buffered(concurrency)
                .collect()
                .await;
            for (index, result) in results {
                audit.mark_load(index, &result);
                load_results.push(result);
            }
            ctx.record(
                "load",
                EventStatus::Completed,
                json!({
                    "dry_run": plan.dry_run,
                    "loaded_count": audit.count_load(LoadStatus::Loaded),
                    "skipped_count": audit.count_load(LoadStatus::DryRunSkipped),
                    "failed_count": audit.count_load(LoadStatus::Failed),
                }),
            );
        } else {
            ctx.record(
                "load",
                EventStatus::Skipped,
                json!({ "checkpoint": resume }),
            );
        }

        // validate
        ctx.enter_stage("validate")?;
        let successes: Vec<TransformedRecord> = transformed.into_iter().flatten().collect();
        let loaded = audit.count_load(LoadStatus::Loaded);
        let validation = activity::invoke("validate", &phase, |_| {
            let v = report::validate(
                records.len(),
                &successes,
                loaded,
                plan.dry_run,
                plan.sample_verify_count,
            );
            async move { Ok::<_, FailureKind>(v) }
        })
        .await?;
        if !validation.dry_run_guard_passed {
            warn!(migration_id = %plan.migration_id, loaded, "dry run performed loads");
        }
        ctx.record("validate", EventStatus::Completed, json!(validation));

        // report
        ctx.enter_stage("report")?;
        let counts = MigrationCounts {
            extracted: records.len(),
            transformed: successes.len(),
            loaded,
            skipped: audit.count_load(LoadStatus::DryRunSkipped),
            transform_failed: audit.count_transform(TransformStatus::Failed),
            load_failed: audit.count_load(LoadStatus::Failed),
        };
        let mut report = MigrationReport {
            migration_id: plan.migration_id.clone(),
            instance_id: instance_id.clone(),
            dry_run: plan.dry_run,
            source_mode: plan.source.mode(),
            resumed_from: resume,
            counts,
            extraction_errors,
            row_count_match: validation.row_count_match,
            dry_run_guard_passed: validation.dry_run_guard_passed,
            sample_target_ids: validation.sample_target_ids,
            transformed_records: successes,
            load_results,
            audit: audit.into_rows(),
            report_path: None,
            generated_at: chrono::Utc::now(),
        };

        let bytes = serde_json::to_vec_pretty(&report)?;
        let store: Arc<dyn ArtifactStore> = match &self.store {
            Some(store) => store.clone(),
            None => Arc::new(FsArtifactStore::new(&plan.output_dir)),
        };
        let file_name = plan.report_file_name();
        let path = activity::invoke("persist_report", &phase, |_| {
            let store = store.clone();
            let bytes = bytes.clone();
            let file_name = file_name.clone();
            async move {
                store.write(Path::new(&file_name), &bytes).await
            }
        })
        .await?;
        let report_path = path.display().to_string();
        report.report_path = Some(report_path.clone());

        ctx.set_output("report_path", json!(report_path));
        ctx.set_output("counts", json!(report.counts));
        ctx.record("report", EventStatus::Completed, json!({ "path": report_path }));
        ctx.complete(json!({
            "migration_id": report.migration_id,
            "report_path": report_path,
            "counts": report.counts,
            "row_count_match": report.row_count_match,
            "dry_run_guard_passed": report.dry_run_guard_passed,
        }));
        info!(
            migration_id = %report.migration_id,
            extracted = report.counts.extracted,
            loaded = report.counts.loaded,
            "migration complete"
        );
        Ok(report)
    }

    /// Pipeline-critical: exhaustion here fails the instance.
    async fn extract(&self, spec: &SourceSpec, options: &ActivityOptions) -> Result<Vec<Value>> {
        match spec {
            SourceSpec::Inline { system, records } => {
                info!(system = %system, count = records.len(), "extracting inline records");
                activity::invoke("extract", options, |_| {
                    let records = records.clone();
                    async move { Ok::<_, FailureKind>(records) }
                })
                .await
            }
            SourceSpec::File { path, format } => {
                info!(path = %path.display(), format = ?format, "extracting from file");
                activity::invoke("extract", options, |_| async move {
                    source::read_file(path, *format).await
                })
                .await
            }
            SourceSpec::Connector(settings) => {
                // Token and protocol problems are not retried.
                let connector = Connector::preflight(settings, &self.env)?;
                activity::invoke("extract", options, |_| {
                    let connector = connector.clone();
                    async move {
                        connector.fetch().await.map_err(PipelineError::from)
                    }
                })
                .await
            }
        }
    }
}

// Audit rows carry the underlying reason, not the retry wrapper.
fn record_error(err: PipelineError) -> String {
    match err {
        PipelineError::ActivityExhausted { reason, .. } => reason.message().to_string(),
        other => other.to_string(),
    }
}

async fn transform_with_retry(
    record: &SourceRecord,
    options: &ActivityOptions,
) -> std::result::Result<TransformedRecord, String> {
    activity::invoke("transform_record", options, |_| async move {
        transform(record).map_err(FailureKind::Business)
    })
    .await
    .map_err(|err| {
        warn!(record = %record.source_identifier, error = %err, "transform failed");
        record_error(err)
    })
}

async fn load_one(
    record: &TransformedRecord,
    source_identifier: String,
    dry_run: bool,
    target: Arc<dyn LoadTarget>,
    options: &ActivityOptions,
) -> LoadResult {
    if dry_run {
        return LoadResult {
            source_identifier,
            target_id: record.target_id.clone(),
            status: LoadStatus::DryRunSkipped,
            write_performed: false,
            error: None,
        };
    }

    let outcome = activity::invoke("load_record", options, |_| {
        let target = target.clone();
        async move { target.load(record).await }
    })
    .await;

    match outcome {
        Ok(()) => LoadResult {
            source_identifier,
            target_id: record.target_id.clone(),
            status: LoadStatus::Loaded,
            write_performed: true,
            error: None,
        },
        Err(err) => {
            warn!(record = %source_identifier, error = %err, "load failed");
            LoadResult {
                source_identifier,
                target_id: record.target_id.clone(),
                status: LoadStatus::Failed,
                write_performed: false,
                error: Some(record_error(err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::Backoff;
    use std::path::PathBuf;
    use crate::state_machine::PipelineStatus;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn policy() -> MigrationPolicy {
        MigrationPolicy {
            timeout_secs: 5,
            record_timeout_secs: 5,
            max_attempts: 2,
            initial_interval_ms: 1,
            backoff: Backoff::Fixed,
            record_concurrency: 3,
        }
    }

    fn pipeline() -> MigrationPipeline {
        MigrationPipeline::new(policy())
            .with_env(Arc::new(|key| (key == "GOOD_TOKEN").then(|| "s3cret-token".into())))
    }

    async fn run(payload: Value) -> Result<MigrationReport> {
        pipeline().start(payload)?.result().await
    }

    fn inline(dir: &TempDir, records: Value, extra: Value) -> Value {
        let mut payload = json!({
            "repo_root": dir.path(),
            "source": {"records": records},
        });
        if let (Some(obj), Some(extra)) = (payload.as_object_mut(), extra.as_object()) {
            obj.extend(extra.clone());
        }
        payload
    }

    struct FlakyTarget;

    #[async_trait]
    impl LoadTarget for FlakyTarget {
        async fn load(&self, record: &TransformedRecord) -> Result<()> {
            if record.target_id == "mx-002" {
                Err(PipelineError::Validation("target rejected record".into()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn default_inline_dry_run() {
        let dir = TempDir::new().unwrap();
        let report = run(json!({"repo_root": dir.path()})).await.unwrap();

        assert_eq!(report.counts.extracted, 2);
        assert_eq!(report.counts.transformed, 2);
        assert_eq!(report.counts.loaded, 0);
        assert_eq!(report.counts.skipped, 2);
        assert!(report.row_count_match);
        assert!(report.dry_run_guard_passed);
        assert_eq!(report.sample_target_ids, ["mx-001", "mx-002"]);
        assert!(report.load_results.iter().all(|r| !r.write_performed));

        let path = report.report_path.unwrap();
        assert!(path.ends_with(&format!("migration-report-{}.json", report.migration_id)));
        assert!(Path::new(&path).starts_with(dir.path()));
        let persisted: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(persisted["counts"]["extracted"], 2);
    }

    #[tokio::test]
    async fn resume_from_load_writes_checkpoint_records() {
        let dir = TempDir::new().unwrap();
        let handle = pipeline()
            .start(json!({
                "repo_root": dir.path(),
                "dry_run": false,
                "resume_from_checkpoint": "load",
                "migration_id": "resume-load",
            }))
            .unwrap();
        let report = handle.result().await.unwrap();

        assert_eq!(report.counts.loaded, 3);
        assert_eq!(report.load_results.len(), 3);
        assert!(report.load_results.iter().all(|r| r.write_performed));
        assert!(report.dry_run_guard_passed);

        let lines = std::fs::read_to_string(
            dir.path()
                .join("screehshots_evidence/loaded-resume-load.jsonl"),
        )
        .unwrap();
        assert_eq!(lines.lines().count(), 3);
    }

    #[tokio::test]
    async fn resume_events_mark_skipped_phases() {
        let dir = TempDir::new().unwrap();
        let handle = pipeline()
            .start(json!({"repo_root": dir.path(), "resume_from_checkpoint": "validate"}))
            .unwrap();
        let state = handle.wait_until(|s| s.status.is_terminal()).await;
        assert_eq!(state.status, PipelineStatus::Complete);

        let events: Vec<(&str, EventStatus)> = state
            .history
            .iter()
            .map(|e| (e.stage.as_str(), e.status))
            .collect();
        assert_eq!(
            events,
            vec![
                ("extract", EventStatus::Resumed),
                ("transform", EventStatus::Backfilled),
                ("load", EventStatus::Skipped),
                ("validate", EventStatus::Completed),
                ("report", EventStatus::Completed),
                ("complete", EventStatus::Completed),
            ]
        );
        assert!(state.outputs.contains_key("report_path"));
    }

    #[tokio::test]
    async fn resume_from_validate_leaves_loads_pending() {
        let dir = TempDir::new().unwrap();
        let report = run(json!({"repo_root": dir.path(), "resume_from_checkpoint": "validate"}))
            .await
            .unwrap();
        assert_eq!(report.counts.extracted, 3);
        assert!(report.load_results.is_empty());
        assert!(report.audit.iter().all(|r| r.load_status == LoadStatus::Pending));
        assert!(report.audit.iter().all(|r| r.transform_status == TransformStatus::Success));
    }

    #[tokio::test]
    async fn every_checkpoint_yields_identical_transforms() {
        let dir = TempDir::new().unwrap();
        let records = json!([
            {"source_id": "a-1", "full_name": "Jo Park", "email": "JO@x.io", "created_at": "2026-03-01"},
            {"full_name": "Lee Chan Wook", "email": "lee@x.io"},
            {"source_id": "a-3", "full_name": "", "email": "anon@x.io", "active": "0"},
        ]);
        let mut baseline = None;
        for checkpoint in ["extract", "transform", "load", "validate"] {
            let payload = inline(
                &dir,
                records.clone(),
                json!({
                    "resume_from_checkpoint": checkpoint,
                    "checkpoint_records": records.clone(),
                }),
            );
            let report = run(payload).await.unwrap();
            match &baseline {
                None => baseline = Some(report.transformed_records),
                Some(expected) => assert_eq!(&report.transformed_records, expected, "{checkpoint}"),
            }
        }
    }

    #[tokio::test]
    async fn connector_with_empty_token_fails_extraction() {
        let dir = TempDir::new().unwrap();
        let handle = pipeline()
            .with_env(Arc::new(|_| Some(String::new())))
            .start(json!({
                "repo_root": dir.path(),
                "source_mode": "connector",
                "source_connector": {"token_env": "EMPTY_TOKEN"},
            }))
            .unwrap();
        let state = handle.wait_until(|s| s.status.is_terminal()).await;
        assert_eq!(state.status, PipelineStatus::Failed);
        assert_eq!(state.current_stage, "extract");
        assert_eq!(state.history.len(), 1);
        assert!(
            state.history[0].payload["error"]
                .as_str()
                .unwrap()
                .contains("EMPTY_TOKEN")
        );

        let err = handle.result().await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Connector(crate::error::ConnectorError::TokenMissing(_))
        ));
    }

    #[tokio::test]
    async fn connector_mock_mode_extracts_mock_records() {
        let dir = TempDir::new().unwrap();
        let report = run(json!({
            "repo_root": dir.path(),
            "source_connector": {
                "token_env": "GOOD_TOKEN",
                "mock_records": [{"source_id": "c-1", "full_name": "Kim Lee", "email": "k@l.io"}],
            },
        }))
        .await
        .unwrap();
        assert_eq!(report.source_mode, SourceMode::Connector);
        assert_eq!(report.counts.extracted, 1);
        assert_eq!(report.transformed_records[0].last_name, "Lee");
    }

    #[tokio::test]
    async fn empty_full_name_is_flagged_but_transformed() {
        let dir = TempDir::new().unwrap();
        let report = run(inline(
            &dir,
            json!([
                {"source_id": "n-1", "full_name": "", "email": "x@y.z"},
                {"source_id": "n-2", "full_name": "Ana Ruiz", "email": "a@r.io"},
            ]),
            json!({}),
        ))
        .await
        .unwrap();

        assert_eq!(report.extraction_errors.len(), 1);
        assert_eq!(report.extraction_errors[0].source_identifier, "n-1");
        let blank = &report.transformed_records[0];
        assert_eq!(blank.target_id, "n-1");
        assert_eq!(blank.first_name, "");
        assert_eq!(blank.last_name, "");
    }

    #[tokio::test]
    async fn bad_record_does_not_abort_run() {
        let dir = TempDir::new().unwrap();
        let report = run(inline(
            &dir,
            json!([
                {"source_id": "r-1", "full_name": "A One", "email": "a@x.io"},
                {"source_id": "r-2", "full_name": "B Two", "email": "b@x.io", "created_at": "not a date"},
                {"source_id": "r-3", "full_name": "C Three", "email": "c@x.io"},
            ]),
            json!({"dry_run": false}),
        ))
        .await
        .unwrap();

        assert_eq!(report.counts.transform_failed, 1);
        assert_eq!(report.counts.loaded, 2);
        assert!(!report.row_count_match);

        let ids: Vec<&str> = report
            .audit
            .iter()
            .map(|r| r.source_identifier.as_str())
            .collect();
        assert_eq!(ids, ["r-1", "r-2", "r-3"]);
        let failed = &report.audit[1];
        assert_eq!(failed.transform_status, TransformStatus::Failed);
        assert_eq!(failed.load_status, LoadStatus::Pending);
        assert!(failed.error.as_deref().unwrap().contains("invalid created_at"));
        assert_eq!(report.audit[2].load_status, LoadStatus::Loaded);
    }

    #[tokio::test]
    async fn load_failure_is_recorded_per_record() {
        let dir = TempDir::new().unwrap();
        let report = pipeline()
            .with_target(Arc::new(FlakyTarget))
            .start(json!({"repo_root": dir.path(), "dry_run": false}))
            .unwrap()
            .result()
            .await
            .unwrap();

        assert_eq!(report.counts.loaded, 1);
        assert_eq!(report.counts.load_failed, 1);
        assert_eq!(report.audit[1].load_status, LoadStatus::Failed);
        assert_eq!(
            report.audit[1].error.as_deref(),
            Some("Invalid payload: target rejected record")
        );
        assert!(!report.load_results[1].write_performed);
    }

    #[tokio::test]
    async fn csv_file_source() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("data")).unwrap();
        std::fs::write(
            dir.path().join("data/users.csv"),
            "source_id,full_name,email,created_at,active\n\
             f-1,Noor Haddad,NOOR@X.IO,2026-01-02 03:04:05,yes\n\
             ,Eli Stone,eli@x.io,,false\n",
        )
        .unwrap();

        let report = run(json!({"repo_root": dir.path(), "source_path": "data/users.csv"}))
            .await
            .unwrap();
        assert_eq!(report.source_mode, SourceMode::File);
        assert_eq!(report.counts.extracted, 2);
        assert_eq!(report.transformed_records[0].email, "noor@x.io");
        assert_eq!(report.transformed_records[0].created_at, "2026-01-02T03:04:05Z");
        assert_eq!(report.audit[1].source_identifier, "row-2");
        assert!(!report.transformed_records[1].is_active);
    }

    #[tokio::test]
    async fn missing_source_file_fails_instance() {
        let dir = TempDir::new().unwrap();
        let err = run(json!({"repo_root": dir.path(), "source_path": "absent.json"}))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ActivityExhausted { ref activity, .. } if activity == "extract"));
    }

    #[tokio::test]
    async fn malformed_source_file_fails_without_retry() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("rows.json"), r#"{"rows": []}"#).unwrap();
        let err = run(json!({"repo_root": dir.path(), "source_path": "rows.json"}))
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(
            err.to_string(),
            "Invalid payload: JSON source object must carry a records array"
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_source_outside_root_rejects_start() {
        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret.json"), r#"[{"source_id": "leak"}]"#).unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("data")).unwrap();

        let result = pipeline().start(json!({
            "repo_root": dir.path(),
            "source_path": "data/secret.json",
        }));
        assert!(matches!(result, Err(PipelineError::PathEscape { .. })));
    }

    #[derive(Default)]
    struct MemoryStore {
        reports: std::sync::Mutex<Vec<(PathBuf, Vec<u8>)>>,
    }

    #[async_trait]
    impl ArtifactStore for MemoryStore {
        async fn write(&self, relative: &Path, contents: &[u8]) -> Result<PathBuf> {
            let path = Path::new("/memory").join(relative);
            self.reports
                .lock()
                .unwrap()
                .push((path.clone(), contents.to_vec()));
            Ok(path)
        }
    }

    #[tokio::test]
    async fn report_goes_through_injected_store() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::default());
        let report = pipeline()
            .with_store(store.clone())
            .start(json!({"repo_root": dir.path(), "migration_id": "m-7"}))
            .unwrap()
            .result()
            .await
            .unwrap();

        assert_eq!(
            report.report_path.as_deref(),
            Some("/memory/migration-report-m-7.json")
        );
        let reports = store.reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        let persisted: Value = serde_json::from_slice(&reports[0].1).unwrap();
        assert_eq!(persisted["counts"]["extracted"], 2);
        assert!(!dir.path().join(crate::paths::DEFAULT_OUTPUT_DIR).exists());
    }

    #[test]
    fn escaping_output_dir_rejects_start() {
        let dir = TempDir::new().unwrap();
        let result = pipeline().start(json!({"repo_root": dir.path(), "output_dir": "../../etc"}));
        assert!(matches!(result, Err(PipelineError::PathEscape { .. })));
    }

    fn arb_record() -> impl Strategy<Value = Value> {
        (
            proptest::option::of("[a-z]{1,4}-[0-9]{1,3}"),
            "[A-Za-z]{0,6}( [A-Za-z]{1,6}){0,2}",
            "[a-z]{0,5}@?[a-z]{0,3}",
        )
            .prop_map(|(id, name, email)| {
                json!({"source_id": id, "full_name": name, "email": email})
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(12))]

        #[test]
        fn dry_run_never_loads(records in proptest::collection::vec(arb_record(), 0..6)) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let dir = TempDir::new().unwrap();
            let report = rt
                .block_on(run(inline(&dir, Value::Array(records.clone()), json!({"dry_run": true}))))
                .unwrap();
            prop_assert_eq!(report.counts.loaded, 0);
            prop_assert_eq!(
                report.row_count_match,
                report.counts.extracted == report.counts.transformed
            );
            prop_assert_eq!(report.audit.len(), records.len());
        }
    }
}
