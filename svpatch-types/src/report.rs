use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::outcome::{Action, CommandExtras};

/// Terminal status of a run, persisted in the manifest and `runs.jsonl` (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Ok,
    FailedRolledBack,
    FailedNoRollback,
}

/// One executed command, as recorded against its containing script (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRecord {
    pub line: u32,
    pub op: String,
    pub file: Utf8PathBuf,
    pub changed: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_new: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Option<CommandExtras>,
}

/// Per-script outcome: its commands plus any closed-out file diffs (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptRecord {
    pub path: Utf8PathBuf,
    pub commands: Vec<CommandRecord>,
    pub errors: Vec<String>,
    #[serde(default)]
    pub diffs: BTreeMap<Utf8PathBuf, String>,
}

/// Per-step outcome: its scripts plus the pass/fail verdict (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub scripts: Vec<ScriptRecord>,
    pub failed: bool,
}

/// Per-path delta the commit phase writes into `manifest.json["files"]` (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileManifestEntry {
    pub path: Utf8PathBuf,
    pub action: Action,
    pub is_new: bool,
    pub is_deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256_before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256_after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_before: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_after: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<Utf8PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_path: Option<Utf8PathBuf>,
}

/// The durable history-run manifest at `manifest.json` (§6, schema_version=1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub schema_version: u32,
    pub run_id: String,
    pub change_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<String>,
    pub started_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    pub status: RunStatus,
    pub plan_only: bool,
    pub strict: bool,
    pub backup: bool,
    pub files: Vec<FileManifestEntry>,
    pub errors: Vec<String>,
}

/// One record appended to `history/index/runs.jsonl` per completed run (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunIndexRecord {
    pub run_id: String,
    pub change_id: String,
    pub started_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    pub status: RunStatus,
    pub files_changed: u64,
}

/// One record appended to `history/index/by-path.jsonl` per changed path,
/// written only for `OK` runs (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ByPathIndexRecord {
    pub run_id: String,
    pub path: Utf8PathBuf,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256_after: Option<String>,
}

/// Pre-write snapshot recorded in commit order; consumed in reverse on
/// rollback (§3). `backup_abs` is `None` when `backup=false`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub orig_abs: Utf8PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_abs: Option<Utf8PathBuf>,
    pub was_new: bool,
    pub relpath: Utf8PathBuf,
}

/// The full in-memory result of one run, before any artifacts are written.
/// Serializes to `sv-report.json` / `report.json` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub change_id: String,
    pub started_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    pub status: RunStatus,
    pub plan_only: bool,
    pub strict: bool,
    pub backup: bool,
    pub steps: Vec<StepRecord>,
    pub files: Vec<FileManifestEntry>,
    pub errors: Vec<String>,
}

impl RunReport {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty() || self.steps.iter().any(|s| s.failed)
    }
}
