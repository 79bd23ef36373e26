//! Line-oriented patch-script parser (§4.3).
//!
//! Tokenizes `OP | file | arg | key=value` lines, folds multiline/heredoc
//! payloads into the relevant positional arg, and normalizes `CommandKind`
//! aliases. Unknown ops and arg-count violations are reported as
//! [`DslIssue`]s rather than failing the whole script: the runner merges
//! them into the same per-script error list it builds from engine failures.

mod ops;

pub use ops::{alias_to_kind, is_known_op};

use std::collections::BTreeMap;
use std::sync::LazyLock;

use camino::Utf8PathBuf;
use regex::Regex;
use svpatch_types::{Command, CommandKind, OpErrorCode};
use thiserror::Error;

static COMMAND_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([A-Za-z_]+)\s*\|").expect("static regex"));

#[derive(Debug, Clone, Error)]
pub enum DslIssue {
    #[error("UNKNOWN_OP {op}")]
    UnknownOp { line_no: u32, raw: String, op: String },
    #[error("INVALID_ARGS expected>={expected} got={got}")]
    InvalidArgs {
        line_no: u32,
        raw: String,
        expected: usize,
        got: usize,
    },
}

impl DslIssue {
    pub fn line_no(&self) -> u32 {
        match self {
            DslIssue::UnknownOp { line_no, .. } => *line_no,
            DslIssue::InvalidArgs { line_no, .. } => *line_no,
        }
    }

    pub fn raw(&self) -> &str {
        match self {
            DslIssue::UnknownOp { raw, .. } => raw,
            DslIssue::InvalidArgs { raw, .. } => raw,
        }
    }

    /// Render as the closed `OpErrorCode` taxonomy the runner persists.
    pub fn to_op_error_code(&self) -> OpErrorCode {
        match self {
            DslIssue::UnknownOp { op, .. } => OpErrorCode::UnknownOp(op.clone()),
            DslIssue::InvalidArgs { expected, got, .. } => {
                OpErrorCode::InvalidArgs(format!("expected>={expected} got={got}"))
            }
        }
    }
}

/// The result of parsing one script: well-formed commands in source order,
/// plus any per-line issues (unknown op, arg-count violation).
#[derive(Debug, Clone, Default)]
pub struct ParsedScript {
    pub commands: Vec<Command>,
    pub issues: Vec<DslIssue>,
}

/// Split `line` on unescaped `|`. `\|` yields a literal pipe, `\\` yields a
/// literal backslash; every other character passes through unchanged. Each
/// resulting field is trimmed, matching the legacy single-line parser's
/// `str.strip()` behavior.
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.peek() {
                Some('|') => {
                    current.push('|');
                    chars.next();
                }
                Some('\\') => {
                    current.push('\\');
                    chars.next();
                }
                _ => current.push('\\'),
            },
            '|' => {
                fields.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields.iter().map(|f| f.trim().to_string()).collect()
}

/// `^[A-Za-z_][A-Za-z0-9_-]*\s*=` with no whitespace in the key part, and
/// not a double-quoted string (§4.3).
fn is_option_field(item: &str) -> bool {
    if item.len() >= 2 && item.starts_with('"') && item.ends_with('"') {
        return false;
    }
    let Some(eq_idx) = item.find('=') else {
        return false;
    };
    let key = &item[..eq_idx];
    if key.is_empty() || key.contains(char::is_whitespace) {
        return false;
    }
    let mut chars = key.chars();
    let first = chars.next().expect("non-empty key");
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn is_command_line(line: &str) -> bool {
    COMMAND_LINE_RE
        .captures(line)
        .map(|c| is_known_op(&c[1].to_ascii_uppercase()))
        .unwrap_or(false)
}

struct RawLine {
    op: String,
    file: String,
    args: Vec<String>,
    opts: BTreeMap<String, String>,
}

fn parse_header(line: &str) -> Option<RawLine> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let fields = split_fields(trimmed);
    if fields.len() < 2 {
        return None;
    }
    let op = fields[0].clone();
    let file = fields[1].clone();
    if file.is_empty() {
        return None;
    }

    let mut args = Vec::new();
    let mut opts = BTreeMap::new();
    for item in &fields[2..] {
        if is_option_field(item) {
            let (k, v) = item.split_once('=').expect("has '='");
            // Option keys are case-insensitive at read time (§9); normalize
            // to lowercase for storage while the `raw` line keeps its
            // original spelling for error records.
            opts.insert(k.trim().to_ascii_lowercase(), v.trim().to_string());
        } else {
            args.push(item.clone());
        }
    }

    Some(RawLine {
        op,
        file,
        args,
        opts,
    })
}

/// Parse a full patch script into commands plus any per-line issues. `text`
/// is normalized to LF internally; callers do not need to pre-normalize.
pub fn parse_script(text: &str) -> ParsedScript {
    let normalized = svpatch_hash::normalize_lf(text);
    let lines: Vec<&str> = normalized.split('\n').collect();

    let mut out = ParsedScript::default();
    let mut i = 0usize;
    while i < lines.len() {
        let raw = lines[i];
        let line_no = (i + 1) as u32;
        let Some(header) = parse_header(raw) else {
            i += 1;
            continue;
        };

        let op_upper = header.op.to_ascii_uppercase();
        let Some(kind) = alias_to_kind(&op_upper) else {
            out.issues.push(DslIssue::UnknownOp {
                line_no,
                raw: raw.to_string(),
                op: header.op.clone(),
            });
            i += 1;
            continue;
        };

        let RawLine {
            file,
            mut args,
            opts,
            ..
        } = header;

        // Multiline/heredoc payload folding (§4.3).
        if kind.is_multiline() {
            let payload_idx = kind.payload_arg_index().expect("multiline kind has index");
            if args.len() > payload_idx {
                let target = args[payload_idx].clone();
                if let Some(tag_spec) = target.strip_prefix("<<") {
                    let tag = {
                        let t = tag_spec.trim();
                        if t.is_empty() { "EOF".to_string() } else { t.to_string() }
                    };
                    let mut payload_lines = Vec::new();
                    let mut j = i + 1;
                    while j < lines.len() && lines[j].trim() != tag {
                        payload_lines.push(lines[j]);
                        j += 1;
                    }
                    if j < lines.len() {
                        j += 1; // consume the terminator line
                    }
                    args[payload_idx] = payload_lines.join("\n");
                    i = j;
                    push_command(&mut out, kind, file, args, opts, raw, line_no);
                    continue;
                }

                let mut payload_lines = Vec::new();
                let mut j = i + 1;
                while j < lines.len() && !is_command_line(lines[j]) {
                    payload_lines.push(lines[j]);
                    j += 1;
                }
                if !payload_lines.is_empty() {
                    let mut joined = target;
                    joined.push('\n');
                    joined.push_str(&payload_lines.join("\n"));
                    args[payload_idx] = joined;
                    i = j;
                    push_command(&mut out, kind, file, args, opts, raw, line_no);
                    continue;
                }
            }
        }

        push_command(&mut out, kind, file, args, opts, raw, line_no);
        i += 1;
    }

    out
}

fn push_command(
    out: &mut ParsedScript,
    kind: CommandKind,
    file: String,
    args: Vec<String>,
    opts: BTreeMap<String, String>,
    raw: &str,
    line_no: u32,
) {
    if args.len() < kind.min_args() {
        out.issues.push(DslIssue::InvalidArgs {
            line_no,
            raw: raw.to_string(),
            expected: kind.min_args(),
            got: args.len(),
        });
        return;
    }
    out.commands.push(Command {
        op: kind,
        file: Utf8PathBuf::from(file),
        args,
        opts,
        raw: raw.to_string(),
        line_no,
    });
}


#[cfg(test)]
mod proptests {
    use super::split_fields;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn split_fields_never_panics(s in ".{0,200}") {
            let _ = split_fields(&s);
        }

        #[test]
        fn escaped_pipe_never_splits_a_field(prefix in "[a-zA-Z0-9 ]{0,20}", suffix in "[a-zA-Z0-9 ]{0,20}") {
            let line = format!(r"{prefix}\|{suffix}");
            let fields = split_fields(&line);
            prop_assert_eq!(fields.len(), 1);
        }
    }
}
