use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// A parsed DSL command, immutable once produced by the parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub op: CommandKind,
    pub file: Utf8PathBuf,
    pub args: Vec<String>,
    pub opts: BTreeMap<String, String>,
    pub raw: String,
    pub line_no: u32,
}

impl Command {
    pub fn opt(&self, key: &str) -> Option<&str> {
        self.opts.get(key).map(String::as_str)
    }

    pub fn opt_flag(&self, key: &str) -> bool {
        matches!(self.opt(key), Some(v) if v == "1" || v.eq_ignore_ascii_case("true"))
    }

    pub fn arg(&self, idx: usize) -> Option<&str> {
        self.args.get(idx).map(String::as_str)
    }
}

/// Closed set of canonical command kinds. `PatchRegex` is a meta-op: the
/// engine rewrites it into one of the `*Regex`/`ReplaceBlock` variants
/// before dispatch (see `svpatch-engine::canonicalize`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    CreateFile,
    WriteFile,
    UpsertFile,
    DeleteFile,
    MoveFile,
    CopyFile,

    AssertFileExists,
    AssertFileNotExists,
    AssertRegex,
    AssertNotRegex,
    AssertRegexCount,

    InsertBeforeRegex,
    InsertAfterRegex,
    ReplaceRegex,
    ReplaceRegexFirst,
    DeleteRegex,
    ReplaceBlock,

    ScanFile,

    PatchRegex,
}

impl CommandKind {
    /// Canonical uppercase DSL spelling, used in error records and round-tripped scripts.
    pub fn canonical_name(self) -> &'static str {
        match self {
            CommandKind::CreateFile => "CREATE_FILE",
            CommandKind::WriteFile => "WRITE_FILE",
            CommandKind::UpsertFile => "UPSERT_FILE",
            CommandKind::DeleteFile => "DELETE_FILE",
            CommandKind::MoveFile => "MOVE_FILE",
            CommandKind::CopyFile => "COPY_FILE",
            CommandKind::AssertFileExists => "ASSERT_FILE_EXISTS",
            CommandKind::AssertFileNotExists => "ASSERT_FILE_NOT_EXISTS",
            CommandKind::AssertRegex => "ASSERT_REGEX",
            CommandKind::AssertNotRegex => "ASSERT_NOT_REGEX",
            CommandKind::AssertRegexCount => "ASSERT_REGEX_COUNT",
            CommandKind::InsertBeforeRegex => "INSERT_BEFORE_REGEX",
            CommandKind::InsertAfterRegex => "INSERT_AFTER_REGEX",
            CommandKind::ReplaceRegex => "REPLACE_REGEX",
            CommandKind::ReplaceRegexFirst => "REPLACE_REGEX_FIRST",
            CommandKind::DeleteRegex => "DELETE_REGEX",
            CommandKind::ReplaceBlock => "REPLACE_BLOCK",
            CommandKind::ScanFile => "SCAN_FILE",
            CommandKind::PatchRegex => "PATCH_REGEX",
        }
    }

    /// Minimum number of positional args this kind requires, per §4.3.
    pub fn min_args(self) -> usize {
        match self {
            CommandKind::CreateFile
            | CommandKind::WriteFile
            | CommandKind::UpsertFile => 1,
            CommandKind::DeleteFile => 0,
            CommandKind::MoveFile | CommandKind::CopyFile => 1,
            CommandKind::AssertFileExists | CommandKind::AssertFileNotExists => 0,
            CommandKind::AssertRegex | CommandKind::AssertNotRegex => 1,
            CommandKind::AssertRegexCount => 2,
            CommandKind::InsertBeforeRegex | CommandKind::InsertAfterRegex => 2,
            CommandKind::ReplaceRegex | CommandKind::ReplaceRegexFirst => 2,
            CommandKind::DeleteRegex => 1,
            CommandKind::ReplaceBlock => 3,
            CommandKind::ScanFile => 1,
            CommandKind::PatchRegex => 1,
        }
    }

    /// Whether this op may carry a multiline/heredoc payload (§4.3 `MULTILINE_OPS`).
    pub fn is_multiline(self) -> bool {
        matches!(
            self,
            CommandKind::CreateFile
                | CommandKind::WriteFile
                | CommandKind::UpsertFile
                | CommandKind::ReplaceBlock
        )
    }

    /// Index into `args` that a multiline/heredoc payload replaces.
    pub fn payload_arg_index(self) -> Option<usize> {
        match self {
            CommandKind::CreateFile | CommandKind::WriteFile | CommandKind::UpsertFile => Some(0),
            CommandKind::ReplaceBlock => Some(2),
            _ => None,
        }
    }
}
