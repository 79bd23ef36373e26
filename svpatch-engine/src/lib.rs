//! Operation dispatch (§4.5).
//!
//! `dispatch` is the single match-on-kind entry point: every command, after
//! the `PatchRegex` meta-op has been canonicalized into a concrete mutation
//! kind, goes through here against a live [`Overlay`].

use std::time::Duration;

use svpatch_types::{Command, CommandExtras, CommandKind, CommandOutcome, OpErrorCode, ScanMatch};
use svpatch_vfs::{guard, DeleteError, Overlay};

/// Run settings threaded into every dispatch call rather than read from
/// globals, so the engine stays unit-testable against an in-memory overlay.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub strict: bool,
    pub regex_timeout: Duration,
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            strict: false,
            regex_timeout: Duration::from_secs(10),
            allow: vec![".".to_string()],
            deny: Vec::new(),
        }
    }
}

/// Dispatch one command against `overlay`.
pub fn dispatch(cmd: &Command, overlay: &mut Overlay, opts: &EngineOptions) -> CommandOutcome {
    if !guard::is_allowed_and_not_denied(&cmd.file, &opts.allow, &opts.deny) {
        return CommandOutcome::err(OpErrorCode::PathNotAllowedOrUnsafe);
    }

    match cmd.op {
        CommandKind::CreateFile => create_file(cmd, overlay),
        CommandKind::WriteFile => write_file(cmd, overlay),
        CommandKind::UpsertFile => upsert_file(cmd, overlay),
        CommandKind::DeleteFile => delete_file(cmd, overlay, opts),
        CommandKind::MoveFile => move_or_copy(cmd, overlay, opts, true),
        CommandKind::CopyFile => move_or_copy(cmd, overlay, opts, false),

        CommandKind::AssertFileExists => {
            if overlay.exists(&cmd.file) {
                CommandOutcome::ok(0)
            } else {
                CommandOutcome::err(OpErrorCode::AssertExistsFailed)
            }
        }
        CommandKind::AssertFileNotExists => {
            if overlay.exists(&cmd.file) {
                CommandOutcome::err(OpErrorCode::AssertNotExistsFailed)
            } else {
                CommandOutcome::ok(0)
            }
        }
        CommandKind::AssertRegex => assert_regex(cmd, overlay, opts, false),
        CommandKind::AssertNotRegex => assert_regex(cmd, overlay, opts, true),
        CommandKind::AssertRegexCount => assert_regex_count(cmd, overlay, opts),

        CommandKind::InsertBeforeRegex => insert_before_regex(cmd, overlay, opts),
        CommandKind::InsertAfterRegex => insert_after_regex(cmd, overlay, opts),
        CommandKind::ReplaceRegex => replace_regex(cmd, overlay, opts, false),
        CommandKind::ReplaceRegexFirst => replace_regex(cmd, overlay, opts, true),
        CommandKind::DeleteRegex => delete_regex(cmd, overlay, opts),
        CommandKind::ReplaceBlock => replace_block(cmd, overlay, opts),

        CommandKind::ScanFile => scan_file(cmd, overlay, opts),

        CommandKind::PatchRegex => match canonicalize(cmd) {
            Ok(canon) => dispatch(&canon, overlay, opts),
            Err(outcome) => outcome,
        },
    }
}

/// Rewrite a `PatchRegex` meta-op into one of the concrete mutation kinds
/// (§3, §4.5). `MODE` selects the target kind; `FIRST=1` only matters for
/// `MODE=replace`.
fn canonicalize(cmd: &Command) -> Result<Command, CommandOutcome> {
    let pattern = cmd
        .arg(0)
        .ok_or_else(|| CommandOutcome::err(OpErrorCode::InvalidArgs("missing pattern".to_string())))?
        .to_string();
    let invalid = |msg: &str| CommandOutcome::err(OpErrorCode::InvalidArgs(msg.to_string()));

    match cmd.opt("mode") {
        Some("replace") => {
            let repl = cmd
                .arg(1)
                .ok_or_else(|| invalid("MODE=replace requires a replacement arg"))?
                .to_string();
            let kind = if cmd.opt_flag("first") {
                CommandKind::ReplaceRegexFirst
            } else {
                CommandKind::ReplaceRegex
            };
            Ok(Command {
                op: kind,
                args: vec![pattern, repl],
                ..cmd.clone()
            })
        }
        Some("insert_before") => {
            let line = cmd
                .arg(1)
                .ok_or_else(|| invalid("MODE=insert_before requires a line arg"))?
                .to_string();
            Ok(Command {
                op: CommandKind::InsertBeforeRegex,
                args: vec![pattern, line],
                ..cmd.clone()
            })
        }
        Some("insert_after") => {
            let line = cmd
                .arg(1)
                .ok_or_else(|| invalid("MODE=insert_after requires a line arg"))?
                .to_string();
            Ok(Command {
                op: CommandKind::InsertAfterRegex,
                args: vec![pattern, line],
                ..cmd.clone()
            })
        }
        Some("delete") => Ok(Command {
            op: CommandKind::DeleteRegex,
            args: vec![pattern],
            ..cmd.clone()
        }),
        Some(other) => Err(invalid(&format!("unknown PATCH_REGEX mode '{other}'"))),
        None => Err(invalid("PATCH_REGEX requires MODE=")),
    }
}

/// `CreateFile`/`WriteFile`/`UpsertFile` payloads JSON-decode a
/// double-quoted argument, otherwise pass it through verbatim (§4.5).
fn decode_payload(raw: &str) -> String {
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        serde_json::from_str::<String>(raw).unwrap_or_else(|_| raw.to_string())
    } else {
        raw.to_string()
    }
}

fn create_file(cmd: &Command, overlay: &mut Overlay) -> CommandOutcome {
    if overlay.exists(&cmd.file) {
        return CommandOutcome::ok(0);
    }
    let content = decode_payload(cmd.arg(0).unwrap_or(""));
    overlay.write(&cmd.file, &content);
    CommandOutcome::ok_new(1, true)
}

fn write_file(cmd: &Command, overlay: &mut Overlay) -> CommandOutcome {
    if !overlay.exists(&cmd.file) {
        return CommandOutcome::err(OpErrorCode::FileNotFound);
    }
    let content = decode_payload(cmd.arg(0).unwrap_or(""));
    match overlay.write(&cmd.file, &content) {
        Some(true) => CommandOutcome::ok(1),
        _ => CommandOutcome::ok(0),
    }
}

fn upsert_file(cmd: &Command, overlay: &mut Overlay) -> CommandOutcome {
    let is_new = !overlay.exists(&cmd.file);
    let content = decode_payload(cmd.arg(0).unwrap_or(""));
    match overlay.write(&cmd.file, &content) {
        Some(true) => CommandOutcome::ok_new(1, is_new),
        _ => CommandOutcome::ok_new(0, is_new),
    }
}

fn delete_file(cmd: &Command, overlay: &mut Overlay, opts: &EngineOptions) -> CommandOutcome {
    match overlay.delete(&cmd.file) {
        Ok(true) => CommandOutcome::ok(1),
        Ok(false) => {
            if opts.strict && !cmd.opt_flag("allow_noop") {
                CommandOutcome::err(OpErrorCode::StrictFailExpectedChange)
            } else {
                CommandOutcome::ok(0)
            }
        }
        Err(DeleteError::IsDirectory) => CommandOutcome::err(OpErrorCode::DirectoryNotSupported),
        Err(DeleteError::Unsafe) => CommandOutcome::err(OpErrorCode::PathNotAllowedOrUnsafe),
    }
}

fn move_or_copy(cmd: &Command, overlay: &mut Overlay, opts: &EngineOptions, is_move: bool) -> CommandOutcome {
    let Some(dst_str) = cmd.arg(0) else {
        return CommandOutcome::err(OpErrorCode::InvalidArgs("expected>=1 got=0".to_string()));
    };
    let dst = camino::Utf8PathBuf::from(dst_str);
    if !guard::is_allowed_and_not_denied(&dst, &opts.allow, &opts.deny) {
        return CommandOutcome::err(OpErrorCode::PathNotAllowedOrUnsafe);
    }
    let (Some(src_norm), Some(dst_norm)) = (
        guard::normalize_relpath(&cmd.file),
        guard::normalize_relpath(&dst),
    ) else {
        return CommandOutcome::err(OpErrorCode::PathNotAllowedOrUnsafe);
    };
    if src_norm == dst_norm {
        return CommandOutcome::ok(0);
    }

    if !overlay.exists(&cmd.file) {
        return if cmd.opt_flag("allow_noop") {
            CommandOutcome::ok(0)
        } else {
            CommandOutcome::err(OpErrorCode::FileNotFound)
        };
    }
    if overlay.is_directory(&cmd.file) {
        return CommandOutcome::err(OpErrorCode::DirectoryNotSupported);
    }
    if overlay.is_directory(&dst) {
        return CommandOutcome::err(OpErrorCode::DestinationIsDirectory);
    }

    let src_content = overlay.read(&cmd.file).unwrap_or_default();
    if overlay.exists(&dst) {
        let dst_content = overlay.read(&dst);
        if dst_content.as_deref() != Some(src_content.as_str()) && !cmd.opt_flag("overwrite") {
            return CommandOutcome::err(OpErrorCode::DestinationExists);
        }
    }

    overlay.write(&dst, &src_content);
    if is_move {
        let _ = overlay.delete(&cmd.file);
    }
    CommandOutcome::ok(1)
}

fn assert_regex(cmd: &Command, overlay: &Overlay, opts: &EngineOptions, negate: bool) -> CommandOutcome {
    let Some(content) = overlay.read(&cmd.file) else {
        return CommandOutcome::err(OpErrorCode::FileNotFound);
    };
    let Some(pattern) = cmd.arg(0) else {
        return CommandOutcome::err(OpErrorCode::InvalidArgs("expected>=1 got=0".to_string()));
    };
    let re = match svpatch_regex::compile(pattern) {
        Ok(re) => re,
        Err(e) => return CommandOutcome::err(OpErrorCode::RegexError(e.to_string())),
    };
    match svpatch_regex::find_with_timeout(&re, &content, opts.regex_timeout) {
        svpatch_regex::TimedMatch::Match { .. } => {
            if negate {
                CommandOutcome::err(OpErrorCode::AssertNotMatchFailed)
            } else {
                CommandOutcome::ok(0)
            }
        }
        svpatch_regex::TimedMatch::NoMatch => {
            if negate {
                CommandOutcome::ok(0)
            } else {
                CommandOutcome::err(OpErrorCode::AssertMatchFailed)
            }
        }
        svpatch_regex::TimedMatch::Timeout => CommandOutcome::err(OpErrorCode::RegexTimeout),
    }
}

fn assert_regex_count(cmd: &Command, overlay: &Overlay, opts: &EngineOptions) -> CommandOutcome {
    let Some(content) = overlay.read(&cmd.file) else {
        return CommandOutcome::err(OpErrorCode::FileNotFound);
    };
    let Some(pattern) = cmd.arg(0) else {
        return CommandOutcome::err(OpErrorCode::InvalidArgs("expected>=2 got=0".to_string()));
    };
    let Some(expected) = cmd.arg(1).and_then(|s| s.parse::<u64>().ok()) else {
        return CommandOutcome::err(OpErrorCode::InvalidArgs("expected integer count".to_string()));
    };
    let re = match svpatch_regex::compile(pattern) {
        Ok(re) => re,
        Err(e) => return CommandOutcome::err(OpErrorCode::RegexError(e.to_string())),
    };
    match svpatch_regex::count_with_timeout(&re, &content, opts.regex_timeout) {
        Some(actual) => {
            if actual as u64 == expected {
                CommandOutcome::ok(0)
            } else {
                CommandOutcome::err(OpErrorCode::AssertCountFailed {
                    expected,
                    actual: actual as u64,
                })
            }
        }
        None => CommandOutcome::err(OpErrorCode::RegexTimeout),
    }
}

/// Shared finalize step for every regex mutation: `after == None` means no
/// match/replacement occurred; `after == Some(unchanged)` and `after ==
/// Some(before)` both count as a zero-change result subject to the strict
/// no-op gate (§4.5).
fn finalize_regex_result(
    cmd: &Command,
    overlay: &mut Overlay,
    opts: &EngineOptions,
    before: &str,
    after: Option<String>,
) -> CommandOutcome {
    match after {
        Some(after) if after != before => {
            overlay.write(&cmd.file, &after);
            CommandOutcome::ok(1)
        }
        _ => {
            if opts.strict && !cmd.opt_flag("allow_noop") {
                CommandOutcome::err(OpErrorCode::StrictFailExpectedChange)
            } else {
                CommandOutcome::ok(0)
            }
        }
    }
}

fn load_and_compile(cmd: &Command, overlay: &Overlay) -> Result<(String, regex::Regex), CommandOutcome> {
    let content = overlay
        .read(&cmd.file)
        .ok_or_else(|| CommandOutcome::err(OpErrorCode::FileNotFound))?;
    let pattern = cmd
        .arg(0)
        .ok_or_else(|| CommandOutcome::err(OpErrorCode::InvalidArgs("expected>=1 got=0".to_string())))?;
    let re = svpatch_regex::compile(pattern)
        .map_err(|e| CommandOutcome::err(OpErrorCode::RegexError(e.to_string())))?;
    Ok((content, re))
}

fn insert_before_regex(cmd: &Command, overlay: &mut Overlay, opts: &EngineOptions) -> CommandOutcome {
    let (content, re) = match load_and_compile(cmd, overlay) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let line = cmd.arg(1).unwrap_or("");
    match svpatch_regex::find_with_timeout(&re, &content, opts.regex_timeout) {
        svpatch_regex::TimedMatch::Match { start, .. } => {
            let mut after = String::with_capacity(content.len() + line.len() + 1);
            after.push_str(&content[..start]);
            after.push_str(line);
            after.push('\n');
            after.push_str(&content[start..]);
            finalize_regex_result(cmd, overlay, opts, &content, Some(after))
        }
        svpatch_regex::TimedMatch::NoMatch => finalize_regex_result(cmd, overlay, opts, &content, None),
        svpatch_regex::TimedMatch::Timeout => CommandOutcome::err(OpErrorCode::RegexTimeout),
    }
}

fn insert_after_regex(cmd: &Command, overlay: &mut Overlay, opts: &EngineOptions) -> CommandOutcome {
    let (content, re) = match load_and_compile(cmd, overlay) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let line = cmd.arg(1).unwrap_or("");
    match svpatch_regex::find_with_timeout(&re, &content, opts.regex_timeout) {
        svpatch_regex::TimedMatch::Match { end, .. } => {
            let mut after = String::with_capacity(content.len() + line.len() + 1);
            after.push_str(&content[..end]);
            after.push('\n');
            after.push_str(line);
            after.push_str(&content[end..]);
            finalize_regex_result(cmd, overlay, opts, &content, Some(after))
        }
        svpatch_regex::TimedMatch::NoMatch => finalize_regex_result(cmd, overlay, opts, &content, None),
        svpatch_regex::TimedMatch::Timeout => CommandOutcome::err(OpErrorCode::RegexTimeout),
    }
}

fn replace_regex(cmd: &Command, overlay: &mut Overlay, opts: &EngineOptions, first_only: bool) -> CommandOutcome {
    let (content, re) = match load_and_compile(cmd, overlay) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let repl = cmd.arg(1).unwrap_or("");
    let after = if first_only {
        svpatch_regex::replace_first_with_timeout(&re, &content, repl, opts.regex_timeout)
    } else {
        svpatch_regex::replace_all_with_timeout(&re, &content, repl, opts.regex_timeout)
    };
    match after {
        Some(after) => finalize_regex_result(cmd, overlay, opts, &content, Some(after)),
        None => CommandOutcome::err(OpErrorCode::RegexTimeout),
    }
}

fn delete_regex(cmd: &Command, overlay: &mut Overlay, opts: &EngineOptions) -> CommandOutcome {
    let (content, re) = match load_and_compile(cmd, overlay) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match svpatch_regex::replace_all_with_timeout(&re, &content, "", opts.regex_timeout) {
        Some(after) => finalize_regex_result(cmd, overlay, opts, &content, Some(after)),
        None => CommandOutcome::err(OpErrorCode::RegexTimeout),
    }
}

fn replace_block(cmd: &Command, overlay: &mut Overlay, opts: &EngineOptions) -> CommandOutcome {
    let Some(content) = overlay.read(&cmd.file) else {
        return CommandOutcome::err(OpErrorCode::FileNotFound);
    };
    let (Some(start_pat), Some(end_pat), Some(body)) = (cmd.arg(0), cmd.arg(1), cmd.arg(2)) else {
        return CommandOutcome::err(OpErrorCode::InvalidArgs("expected>=3 got=".to_string() + &cmd.args.len().to_string()));
    };
    let start_re = match svpatch_regex::compile(start_pat) {
        Ok(re) => re,
        Err(e) => return CommandOutcome::err(OpErrorCode::RegexError(e.to_string())),
    };
    let end_re = match svpatch_regex::compile(end_pat) {
        Ok(re) => re,
        Err(e) => return CommandOutcome::err(OpErrorCode::RegexError(e.to_string())),
    };

    let (start_start, start_end) = match svpatch_regex::find_with_timeout(&start_re, &content, opts.regex_timeout) {
        svpatch_regex::TimedMatch::Match { start, end } => (start, end),
        svpatch_regex::TimedMatch::NoMatch => return finalize_regex_result(cmd, overlay, opts, &content, None),
        svpatch_regex::TimedMatch::Timeout => return CommandOutcome::err(OpErrorCode::RegexTimeout),
    };

    let suffix = &content[start_end..];
    let end_end_rel = match svpatch_regex::find_with_timeout(&end_re, suffix, opts.regex_timeout) {
        svpatch_regex::TimedMatch::Match { end, .. } => end,
        svpatch_regex::TimedMatch::NoMatch => return finalize_regex_result(cmd, overlay, opts, &content, None),
        svpatch_regex::TimedMatch::Timeout => return CommandOutcome::err(OpErrorCode::RegexTimeout),
    };

    let abs_end = start_end + end_end_rel;
    let mut after = String::with_capacity(content.len());
    after.push_str(&content[..start_start]);
    after.push_str(body);
    after.push_str(&content[abs_end..]);
    finalize_regex_result(cmd, overlay, opts, &content, Some(after))
}

fn scan_file(cmd: &Command, overlay: &Overlay, opts: &EngineOptions) -> CommandOutcome {
    let Some(content) = overlay.read(&cmd.file) else {
        return CommandOutcome::err(OpErrorCode::FileNotFound);
    };
    let Some(pattern) = cmd.arg(0) else {
        return CommandOutcome::err(OpErrorCode::InvalidArgs("expected>=1 got=0".to_string()));
    };
    let re = match svpatch_regex::compile(pattern) {
        Ok(re) => re,
        Err(e) => return CommandOutcome::err(OpErrorCode::RegexError(e.to_string())),
    };
    let Some(all_matches) = svpatch_regex::find_all_with_timeout(&re, &content, opts.regex_timeout) else {
        return CommandOutcome::err(OpErrorCode::RegexTimeout);
    };

    let max = cmd.opt("max").and_then(|s| s.parse::<usize>().ok()).unwrap_or(20);
    let context = cmd.opt("context").and_then(|s| s.parse::<usize>().ok()).unwrap_or(2);

    let lines: Vec<&str> = content.split('\n').collect();
    let mut line_starts = Vec::with_capacity(lines.len());
    let mut offset = 0usize;
    for l in &lines {
        line_starts.push(offset);
        offset += l.len() + 1;
    }

    let mut matches = Vec::new();
    for (start, end) in all_matches.into_iter().take(max) {
        let line_idx = match line_starts.binary_search(&start) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let col = start - line_starts[line_idx] + 1;
        let before_from = line_idx.saturating_sub(context);
        let after_to = (line_idx + 1 + context).min(lines.len());
        matches.push(ScanMatch {
            line: (line_idx + 1) as u32,
            col: col as u32,
            matched: content[start..end].to_string(),
            context_before: lines[before_from..line_idx].iter().map(|s| s.to_string()).collect(),
            context_line: lines[line_idx].to_string(),
            context_after: lines[(line_idx + 1)..after_to].iter().map(|s| s.to_string()).collect(),
        });
    }

    let mut outcome = CommandOutcome::ok(0);
    outcome.extras = Some(CommandExtras::Scan { matches });
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn overlay_in(dir: &TempDir) -> Overlay {
        Overlay::new(Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap())
    }

    fn cmd(op: CommandKind, file: &str, args: Vec<&str>) -> Command {
        Command {
            op,
            file: Utf8PathBuf::from(file),
            args: args.into_iter().map(String::from).collect(),
            opts: Default::default(),
            raw: String::new(),
            line_no: 1,
        }
    }

    #[test]
    fn create_file_writes_new_content() {
        let dir = TempDir::new().unwrap();
        let mut ov = overlay_in(&dir);
        let opts = EngineOptions::default();
        let c = cmd(CommandKind::CreateFile, "a.txt", vec!["hello"]);
        let out = dispatch(&c, &mut ov, &opts);
        assert_eq!(out.changed, 1);
        assert_eq!(out.is_new, Some(true));
        assert_eq!(ov.read(&c.file), Some("hello".to_string()));
    }

    #[test]
    fn create_file_is_a_noop_if_already_present() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        let mut ov = overlay_in(&dir);
        let opts = EngineOptions::default();
        let c = cmd(CommandKind::CreateFile, "a.txt", vec!["hello"]);
        let out = dispatch(&c, &mut ov, &opts);
        assert_eq!(out.changed, 0);
    }

    #[test]
    fn create_file_json_decodes_quoted_payload() {
        let dir = TempDir::new().unwrap();
        let mut ov = overlay_in(&dir);
        let opts = EngineOptions::default();
        let c = cmd(CommandKind::CreateFile, "a.txt", vec![r#""line1\nline2""#]);
        dispatch(&c, &mut ov, &opts);
        assert_eq!(ov.read(&c.file), Some("line1\nline2".to_string()));
    }

    #[test]
    fn write_file_fails_if_missing() {
        let dir = TempDir::new().unwrap();
        let mut ov = overlay_in(&dir);
        let opts = EngineOptions::default();
        let c = cmd(CommandKind::WriteFile, "missing.txt", vec!["x"]);
        let out = dispatch(&c, &mut ov, &opts);
        assert!(out.is_err());
        assert_eq!(out.error.unwrap(), "FILE_NOT_FOUND");
    }

    #[test]
    fn delete_file_strict_noop_fails_without_allow_noop() {
        let dir = TempDir::new().unwrap();
        let mut ov = overlay_in(&dir);
        let opts = EngineOptions { strict: true, ..EngineOptions::default() };
        let c = cmd(CommandKind::DeleteFile, "missing.txt", vec![]);
        let out = dispatch(&c, &mut ov, &opts);
        assert_eq!(out.error.unwrap(), "STRICT_FAIL_EXPECTED_CHANGE");
    }

    #[test]
    fn path_outside_allow_list_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut ov = overlay_in(&dir);
        let opts = EngineOptions { allow: vec!["src/".to_string()], ..EngineOptions::default() };
        let c = cmd(CommandKind::CreateFile, "docs/a.txt", vec!["x"]);
        let out = dispatch(&c, &mut ov, &opts);
        assert_eq!(out.error.unwrap(), "PATH_NOT_ALLOWED_OR_UNSAFE");
    }

    #[test]
    fn deny_prefix_rejects_a_path_the_allow_list_would_otherwise_permit() {
        let dir = TempDir::new().unwrap();
        let mut ov = overlay_in(&dir);
        let opts = EngineOptions {
            allow: vec![".".to_string()],
            deny: vec!["generated/".to_string()],
            ..EngineOptions::default()
        };
        let c = cmd(CommandKind::CreateFile, "generated/a.txt", vec!["x"]);
        let out = dispatch(&c, &mut ov, &opts);
        assert_eq!(out.error.unwrap(), "PATH_NOT_ALLOWED_OR_UNSAFE");
        assert!(!ov.exists(&c.file));
    }

    #[test]
    fn move_file_destination_under_a_deny_prefix_is_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        let mut ov = overlay_in(&dir);
        let opts = EngineOptions {
            allow: vec![".".to_string()],
            deny: vec!["generated/".to_string()],
            ..EngineOptions::default()
        };
        let c = cmd(CommandKind::MoveFile, "a.txt", vec!["generated/b.txt"]);
        let out = dispatch(&c, &mut ov, &opts);
        assert_eq!(out.error.unwrap(), "PATH_NOT_ALLOWED_OR_UNSAFE");
    }

    #[test]
    fn replace_regex_replaces_all_matches() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "foo bar foo").unwrap();
        let mut ov = overlay_in(&dir);
        let opts = EngineOptions::default();
        let c = cmd(CommandKind::ReplaceRegex, "a.txt", vec!["foo", "baz"]);
        let out = dispatch(&c, &mut ov, &opts);
        assert_eq!(out.changed, 1);
        assert_eq!(ov.read(&c.file), Some("baz bar baz".to_string()));
    }

    #[test]
    fn replace_regex_first_replaces_one_match() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "foo bar foo").unwrap();
        let mut ov = overlay_in(&dir);
        let opts = EngineOptions::default();
        let c = cmd(CommandKind::ReplaceRegexFirst, "a.txt", vec!["foo", "baz"]);
        dispatch(&c, &mut ov, &opts);
        assert_eq!(ov.read(&c.file), Some("baz bar foo".to_string()));
    }

    #[test]
    fn replace_block_splices_body_between_markers() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "head\n// START\nold\n// END\ntail").unwrap();
        let mut ov = overlay_in(&dir);
        let opts = EngineOptions::default();
        let c = cmd(
            CommandKind::ReplaceBlock,
            "a.txt",
            vec!["^// START$", "^// END$", "// START\nnew\n// END"],
        );
        let out = dispatch(&c, &mut ov, &opts);
        assert_eq!(out.changed, 1);
        assert_eq!(ov.read(&c.file).unwrap(), "head\n// START\nnew\n// END\ntail");
    }

    #[test]
    fn assert_regex_count_mismatch_reports_expected_and_actual() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a a a").unwrap();
        let mut ov = overlay_in(&dir);
        let opts = EngineOptions::default();
        let c = cmd(CommandKind::AssertRegexCount, "a.txt", vec!["a", "2"]);
        let out = dispatch(&c, &mut ov, &opts);
        assert_eq!(out.error.unwrap(), "ASSERT_COUNT_FAILED expected=2 actual=3");
    }

    #[test]
    fn scan_file_reports_line_col_and_context() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\nthree\n").unwrap();
        let mut ov = overlay_in(&dir);
        let opts = EngineOptions::default();
        let c = cmd(CommandKind::ScanFile, "a.txt", vec!["^two$"]);
        let out = dispatch(&c, &mut ov, &opts);
        let Some(CommandExtras::Scan { matches }) = out.extras else {
            panic!("expected scan extras");
        };
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].line, 2);
        assert_eq!(matches[0].col, 1);
        assert_eq!(matches[0].context_before, vec!["one".to_string()]);
        assert_eq!(matches[0].context_after, vec!["three".to_string()]);
    }

    #[test]
    fn patch_regex_canonicalizes_to_replace_regex() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "foo").unwrap();
        let mut ov = overlay_in(&dir);
        let opts = EngineOptions::default();
        let mut c = cmd(CommandKind::PatchRegex, "a.txt", vec!["foo", "bar"]);
        c.opts.insert("mode".to_string(), "replace".to_string());
        let out = dispatch(&c, &mut ov, &opts);
        assert_eq!(out.changed, 1);
        assert_eq!(ov.read(&c.file), Some("bar".to_string()));
    }

    #[test]
    fn patch_regex_unknown_mode_is_invalid_args() {
        let dir = TempDir::new().unwrap();
        let mut ov = overlay_in(&dir);
        let opts = EngineOptions::default();
        let mut c = cmd(CommandKind::PatchRegex, "a.txt", vec!["foo"]);
        c.opts.insert("mode".to_string(), "frobnicate".to_string());
        let out = dispatch(&c, &mut ov, &opts);
        assert!(out.is_err());
    }

    #[test]
    fn move_file_noop_when_destination_equals_source() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        let mut ov = overlay_in(&dir);
        let opts = EngineOptions::default();
        let c = cmd(CommandKind::MoveFile, "a.txt", vec!["a.txt"]);
        let out = dispatch(&c, &mut ov, &opts);
        assert_eq!(out.changed, 0);
    }

    #[test]
    fn move_file_relocates_and_deletes_source() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        let mut ov = overlay_in(&dir);
        let opts = EngineOptions::default();
        let c = cmd(CommandKind::MoveFile, "a.txt", vec!["b.txt"]);
        let out = dispatch(&c, &mut ov, &opts);
        assert_eq!(out.changed, 1);
        assert!(!ov.exists(&c.file));
        assert_eq!(ov.read(Utf8PathBuf::from("b.txt").as_path()), Some("x".to_string()));
    }

    #[test]
    fn copy_file_existing_destination_without_overwrite_fails() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        std::fs::write(dir.path().join("b.txt"), "y").unwrap();
        let mut ov = overlay_in(&dir);
        let opts = EngineOptions::default();
        let c = cmd(CommandKind::CopyFile, "a.txt", vec!["b.txt"]);
        let out = dispatch(&c, &mut ov, &opts);
        assert_eq!(out.error.unwrap(), "DESTINATION_EXISTS");
    }
}
