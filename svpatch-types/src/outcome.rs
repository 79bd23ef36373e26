use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What happened to a path in the overlay, relative to the start of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Add,
    Mod,
    Del,
}

/// Per-path delta tracked by the overlay VFS (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeMeta {
    pub bytes_before: Option<u64>,
    pub sha256_before: Option<String>,
    pub bytes_after: Option<u64>,
    pub sha256_after: Option<String>,
    pub is_new: bool,
    pub action: Action,
}

/// One match produced by `SCAN_FILE` (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanMatch {
    pub line: u32,
    pub col: u32,
    #[serde(rename = "match")]
    pub matched: String,
    pub context_before: Vec<String>,
    pub context_line: String,
    pub context_after: Vec<String>,
}

/// Extra, kind-specific data attached to a command's outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandExtras {
    Scan { matches: Vec<ScanMatch> },
}

/// The result of executing a single command against the overlay.
///
/// `changed` follows the DSL contract: `0` = no textual change, `1` =
/// changed, `-1` = regex timeout sentinel (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub changed: i32,
    pub is_new: Option<bool>,
    pub error: Option<String>,
    pub extras: Option<CommandExtras>,
}

impl CommandOutcome {
    pub fn ok(changed: i32) -> Self {
        Self {
            changed,
            is_new: None,
            error: None,
            extras: None,
        }
    }

    pub fn ok_new(changed: i32, is_new: bool) -> Self {
        Self {
            changed,
            is_new: Some(is_new),
            error: None,
            extras: None,
        }
    }

    pub fn err(code: OpErrorCode) -> Self {
        Self {
            changed: 0,
            is_new: None,
            error: Some(code.to_string()),
            extras: None,
        }
    }

    pub fn is_err(&self) -> bool {
        self.error.is_some()
    }
}

/// The closed error taxonomy from §7, rendered exactly as the strings the
/// spec names so persisted reports stay stable across implementations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OpErrorCode {
    #[error("PATH_NOT_ALLOWED_OR_UNSAFE")]
    PathNotAllowedOrUnsafe,
    #[error("FILE_NOT_FOUND")]
    FileNotFound,
    #[error("DIRECTORY_NOT_SUPPORTED")]
    DirectoryNotSupported,
    #[error("DESTINATION_EXISTS")]
    DestinationExists,
    #[error("DESTINATION_IS_DIRECTORY")]
    DestinationIsDirectory,
    #[error("INVALID_ARGS {0}")]
    InvalidArgs(String),
    #[error("UNKNOWN_OP {0}")]
    UnknownOp(String),
    #[error("REGEX_ERROR: {0}")]
    RegexError(String),
    #[error("REGEX_TIMEOUT")]
    RegexTimeout,
    #[error("STRICT_FAIL_EXPECTED_CHANGE")]
    StrictFailExpectedChange,
    #[error("ASSERT_EXISTS_FAILED")]
    AssertExistsFailed,
    #[error("ASSERT_NOT_EXISTS_FAILED")]
    AssertNotExistsFailed,
    #[error("ASSERT_MATCH_FAILED")]
    AssertMatchFailed,
    #[error("ASSERT_NOT_MATCH_FAILED")]
    AssertNotMatchFailed,
    #[error("ASSERT_COUNT_FAILED expected={expected} actual={actual}")]
    AssertCountFailed { expected: u64, actual: u64 },
    #[error("LIMIT_MAX_FILES_EXCEEDED")]
    LimitMaxFilesExceeded,
    #[error("LIMIT_MAX_TOTAL_WRITE_BYTES_EXCEEDED")]
    LimitMaxTotalWriteBytesExceeded,
    #[error("PIPELINE_INVALID {0}")]
    PipelineInvalid(String),
    #[error("SCRIPT_NOT_FOUND {0}")]
    ScriptNotFound(String),
    #[error("STEP_INVALID {0}")]
    StepInvalid(String),
    #[error("FAILED_TO_CREATE_HISTORY_RUN_ID")]
    FailedToCreateHistoryRunId,
}
