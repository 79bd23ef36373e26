//! Durable per-run history: directory bootstrap, manifest, JSONL indices
//! (§4.6, §6). Only touched in apply mode with `backup=true`; plan mode
//! skips history entirely (§GLOSSARY).

use camino::{Utf8Path, Utf8PathBuf};
use svpatch_types::{ByPathIndexRecord, FileManifestEntry, RunIndexRecord, RunManifest, RunStatus};

use crate::error::RunnerError;

pub(crate) const MAX_RUN_ID_ATTEMPTS: u32 = 8;

/// Paths making up one history run directory.
pub struct HistoryRun {
    pub run_dir: Utf8PathBuf,
    pub before_dir: Utf8PathBuf,
    pub patches_dir: Utf8PathBuf,
    pub artifacts_dir: Utf8PathBuf,
    pub manifest_path: Utf8PathBuf,
}

fn history_root(data_root: &Utf8Path) -> Utf8PathBuf {
    data_root.join("history")
}

fn index_dir(data_root: &Utf8Path) -> Utf8PathBuf {
    history_root(data_root).join("index")
}

fn runs_jsonl_path(data_root: &Utf8Path) -> Utf8PathBuf {
    index_dir(data_root).join("runs.jsonl")
}

fn by_path_jsonl_path(data_root: &Utf8Path) -> Utf8PathBuf {
    index_dir(data_root).join("by-path.jsonl")
}

/// Last `run_id` recorded in `runs.jsonl`, if any — becomes the new run's
/// `parent_run_id`.
fn last_run_id(data_root: &Utf8Path) -> Option<String> {
    let path = runs_jsonl_path(data_root);
    let text = fs_err::read_to_string(path).ok()?;
    let last_line = text.lines().next_back()?;
    let record: RunIndexRecord = serde_json::from_str(last_line).ok()?;
    Some(record.run_id)
}

/// Create the history run directory for `run_id`, bootstrap `manifest.json`
/// with `status=RUNNING`, and return it plus the discovered `parent_run_id`.
/// Returns `HistoryRunIdCollision` if `run_dir` already exists; the caller is
/// responsible for regenerating `run_id` and retrying up to
/// `MAX_RUN_ID_ATTEMPTS` (§9) — a collision this specific is vanishingly
/// unlikely, but bounded retry is still required rather than failing outright.
pub fn begin(
    data_root: &Utf8Path,
    run_id: &str,
    change_id: &str,
    started_at: &str,
    strict: bool,
    backup: bool,
) -> Result<(HistoryRun, Option<String>), RunnerError> {
    let date_prefix = &run_id[..8];
    let (yyyy, mm, dd) = (&date_prefix[0..4], &date_prefix[4..6], &date_prefix[6..8]);
    let run_dir = history_root(data_root)
        .join("runs")
        .join(yyyy)
        .join(mm)
        .join(dd)
        .join(run_id);

    if run_dir.exists() {
        return Err(RunnerError::HistoryRunIdCollision);
    }

    let before_dir = run_dir.join("before");
    let patches_dir = run_dir.join("patches");
    let artifacts_dir = run_dir.join("artifacts");
    for dir in [&before_dir, &patches_dir, &artifacts_dir] {
        fs_err::create_dir_all(dir).map_err(|e| RunnerError::History(e.to_string()))?;
    }

    let parent_run_id = last_run_id(data_root);

    let manifest_path = run_dir.join("manifest.json");
    let bootstrap = RunManifest {
        schema_version: 1,
        run_id: run_id.to_string(),
        change_id: change_id.to_string(),
        parent_run_id: parent_run_id.clone(),
        started_at: started_at.to_string(),
        ended_at: None,
        status: RunStatus::FailedNoRollback, // overwritten at finalize(); never read while RUNNING
        plan_only: false,
        strict,
        backup,
        files: Vec::new(),
        errors: Vec::new(),
    };
    write_manifest_running(&manifest_path, &bootstrap)?;

    Ok((
        HistoryRun {
            run_dir,
            before_dir,
            patches_dir,
            artifacts_dir,
            manifest_path,
        },
        parent_run_id,
    ))
}

#[derive(serde::Serialize)]
struct BootstrapManifest<'a> {
    schema_version: u32,
    run_id: &'a str,
    change_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_run_id: &'a Option<String>,
    started_at: &'a str,
    status: &'static str,
    plan_only: bool,
    strict: bool,
    backup: bool,
    files: &'a [FileManifestEntry],
    errors: &'a [String],
}

fn write_manifest_running(path: &Utf8Path, m: &RunManifest) -> Result<(), RunnerError> {
    let bootstrap = BootstrapManifest {
        schema_version: m.schema_version,
        run_id: &m.run_id,
        change_id: &m.change_id,
        parent_run_id: &m.parent_run_id,
        started_at: &m.started_at,
        status: "RUNNING",
        plan_only: m.plan_only,
        strict: m.strict,
        backup: m.backup,
        files: &m.files,
        errors: &m.errors,
    };
    let text = serde_json::to_string_pretty(&bootstrap).map_err(|e| RunnerError::History(e.to_string()))?;
    fs_err::write(path, text).map_err(|e| RunnerError::History(e.to_string()))
}

/// Overwrite `manifest.json` with the final, terminal manifest; append one
/// record to `runs.jsonl`; and, only if `status == OK`, append one record
/// per changed path to `by-path.jsonl`.
pub fn finalize(
    data_root: &Utf8Path,
    run: &HistoryRun,
    manifest: &RunManifest,
) -> Result<(), RunnerError> {
    let text = serde_json::to_string_pretty(manifest).map_err(|e| RunnerError::History(e.to_string()))?;
    fs_err::write(&run.manifest_path, text).map_err(|e| RunnerError::History(e.to_string()))?;

    fs_err::create_dir_all(index_dir(data_root)).map_err(|e| RunnerError::History(e.to_string()))?;

    let index_record = RunIndexRecord {
        run_id: manifest.run_id.clone(),
        change_id: manifest.change_id.clone(),
        started_at: manifest.started_at.clone(),
        ended_at: manifest.ended_at.clone(),
        status: manifest.status,
        files_changed: manifest.files.len() as u64,
    };
    append_jsonl(&runs_jsonl_path(data_root), &index_record)?;

    if manifest.status == RunStatus::Ok {
        let by_path_path = by_path_jsonl_path(data_root);
        for file in &manifest.files {
            let record = ByPathIndexRecord {
                run_id: manifest.run_id.clone(),
                path: file.path.clone(),
                action: file.action,
                sha256_after: file.sha256_after.clone(),
            };
            append_jsonl(&by_path_path, &record)?;
        }
    }

    Ok(())
}

fn append_jsonl<T: serde::Serialize>(path: &Utf8Path, record: &T) -> Result<(), RunnerError> {
    use std::io::Write;
    let line = serde_json::to_string(record).map_err(|e| RunnerError::History(e.to_string()))?;
    let mut file = fs_err::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| RunnerError::History(e.to_string()))?;
    writeln!(file, "{line}").map_err(|e| RunnerError::History(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn begin_creates_expected_subdirectories() {
        let dir = TempDir::new().unwrap();
        let data_root = Utf8PathBuf::from_path_buf(dir.path().join("data")).unwrap();
        let (run, parent) = begin(&data_root, "20260101T000000Z_abcd1234", "cid", "2026-01-01T00:00:00Z", false, true).unwrap();
        assert!(run.before_dir.exists());
        assert!(run.patches_dir.exists());
        assert!(run.artifacts_dir.exists());
        assert!(run.manifest_path.exists());
        assert_eq!(parent, None);
    }

    #[test]
    fn finalize_appends_runs_jsonl_and_by_path_only_on_ok() {
        let dir = TempDir::new().unwrap();
        let data_root = Utf8PathBuf::from_path_buf(dir.path().join("data")).unwrap();
        let (run, _) = begin(&data_root, "20260101T000000Z_abcd1234", "cid", "2026-01-01T00:00:00Z", false, true).unwrap();

        let manifest = RunManifest {
            schema_version: 1,
            run_id: "20260101T000000Z_abcd1234".to_string(),
            change_id: "cid".to_string(),
            parent_run_id: None,
            started_at: "2026-01-01T00:00:00Z".to_string(),
            ended_at: Some("2026-01-01T00:00:01Z".to_string()),
            status: RunStatus::Ok,
            plan_only: false,
            strict: false,
            backup: true,
            files: vec![FileManifestEntry {
                path: Utf8PathBuf::from("a.txt"),
                action: svpatch_types::Action::Add,
                is_new: true,
                is_deleted: false,
                sha256_before: None,
                sha256_after: Some("deadbeef".to_string()),
                bytes_before: None,
                bytes_after: Some(5),
                backup_path: None,
                diff_path: None,
            }],
            errors: Vec::new(),
        };
        finalize(&data_root, &run, &manifest).unwrap();

        let runs_jsonl = fs_err::read_to_string(runs_jsonl_path(&data_root)).unwrap();
        assert_eq!(runs_jsonl.lines().count(), 1);
        let by_path = fs_err::read_to_string(by_path_jsonl_path(&data_root)).unwrap();
        assert_eq!(by_path.lines().count(), 1);
    }

    #[test]
    fn finalize_skips_by_path_when_not_ok() {
        let dir = TempDir::new().unwrap();
        let data_root = Utf8PathBuf::from_path_buf(dir.path().join("data")).unwrap();
        let (run, _) = begin(&data_root, "20260101T000000Z_abcd1234", "cid", "2026-01-01T00:00:00Z", false, true).unwrap();
        let manifest = RunManifest {
            schema_version: 1,
            run_id: "20260101T000000Z_abcd1234".to_string(),
            change_id: "cid".to_string(),
            parent_run_id: None,
            started_at: "2026-01-01T00:00:00Z".to_string(),
            ended_at: Some("2026-01-01T00:00:01Z".to_string()),
            status: RunStatus::FailedNoRollback,
            plan_only: false,
            strict: false,
            backup: true,
            files: Vec::new(),
            errors: vec!["FILE_NOT_FOUND".to_string()],
        };
        finalize(&data_root, &run, &manifest).unwrap();
        assert!(!by_path_jsonl_path(&data_root).exists());
    }

    #[test]
    fn begin_reports_collision_when_run_dir_already_exists() {
        let dir = TempDir::new().unwrap();
        let data_root = Utf8PathBuf::from_path_buf(dir.path().join("data")).unwrap();
        begin(&data_root, "20260101T000000Z_abcd1234", "cid", "2026-01-01T00:00:00Z", false, true).unwrap();

        let err = begin(&data_root, "20260101T000000Z_abcd1234", "cid2", "2026-01-01T00:00:01Z", false, true)
            .unwrap_err();
        assert!(matches!(err, RunnerError::HistoryRunIdCollision));
    }

    #[test]
    fn second_run_picks_up_parent_run_id() {
        let dir = TempDir::new().unwrap();
        let data_root = Utf8PathBuf::from_path_buf(dir.path().join("data")).unwrap();
        let (run, _) = begin(&data_root, "20260101T000000Z_abcd1234", "cid", "2026-01-01T00:00:00Z", false, true).unwrap();
        let manifest = RunManifest {
            schema_version: 1,
            run_id: "20260101T000000Z_abcd1234".to_string(),
            change_id: "cid".to_string(),
            parent_run_id: None,
            started_at: "2026-01-01T00:00:00Z".to_string(),
            ended_at: Some("2026-01-01T00:00:01Z".to_string()),
            status: RunStatus::Ok,
            plan_only: false,
            strict: false,
            backup: true,
            files: Vec::new(),
            errors: Vec::new(),
        };
        finalize(&data_root, &run, &manifest).unwrap();

        let (_run2, parent) = begin(&data_root, "20260101T000001Z_deadbeef", "cid2", "2026-01-01T00:00:01Z", false, true).unwrap();
        assert_eq!(parent, Some("20260101T000000Z_abcd1234".to_string()));
    }
}
