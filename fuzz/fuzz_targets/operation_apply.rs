#![no_main]

//! Fuzz target for operation dispatch against the overlay VFS (§4.5).
//!
//! Exercises every `CommandKind` with arbitrary files/patterns/replacements
//! against a single seeded file, confirming `dispatch` never panics
//! regardless of how malformed the regex or payload is.

use std::time::Duration;

use camino::Utf8PathBuf;
use libfuzzer_sys::fuzz_target;
use svpatch_engine::{dispatch, EngineOptions};
use svpatch_types::{Command, CommandKind};
use svpatch_vfs::Overlay;

#[derive(Debug, arbitrary::Arbitrary)]
struct FuzzInput {
    seed_content: String,
    op: OpChoice,
    arg0: String,
    arg1: String,
    arg2: String,
    strict: bool,
}

#[derive(Debug, arbitrary::Arbitrary)]
enum OpChoice {
    CreateFile,
    WriteFile,
    UpsertFile,
    DeleteFile,
    MoveFile,
    CopyFile,
    AssertRegex,
    AssertRegexCount,
    InsertBeforeRegex,
    InsertAfterRegex,
    ReplaceRegex,
    ReplaceRegexFirst,
    DeleteRegex,
    ReplaceBlock,
    ScanFile,
}

fuzz_target!(|input: FuzzInput| {
    let dir = match tempfile::tempdir() {
        Ok(d) => d,
        Err(_) => return,
    };
    let root = match Utf8PathBuf::from_path_buf(dir.path().to_path_buf()) {
        Ok(p) => p,
        Err(_) => return,
    };
    let _ = fs_err::write(root.join("f.txt"), &input.seed_content);

    let mut overlay = Overlay::new(root);
    let opts = EngineOptions {
        strict: input.strict,
        regex_timeout: Duration::from_millis(200),
        allow: vec![".".to_string()],
        deny: Vec::new(),
    };

    let (op, args): (CommandKind, Vec<String>) = match input.op {
        OpChoice::CreateFile => (CommandKind::CreateFile, vec![input.arg0.clone()]),
        OpChoice::WriteFile => (CommandKind::WriteFile, vec![input.arg0.clone()]),
        OpChoice::UpsertFile => (CommandKind::UpsertFile, vec![input.arg0.clone()]),
        OpChoice::DeleteFile => (CommandKind::DeleteFile, vec![]),
        OpChoice::MoveFile => (CommandKind::MoveFile, vec![input.arg0.clone()]),
        OpChoice::CopyFile => (CommandKind::CopyFile, vec![input.arg0.clone()]),
        OpChoice::AssertRegex => (CommandKind::AssertRegex, vec![input.arg0.clone()]),
        OpChoice::AssertRegexCount => {
            (CommandKind::AssertRegexCount, vec![input.arg0.clone(), input.arg1.clone()])
        }
        OpChoice::InsertBeforeRegex => {
            (CommandKind::InsertBeforeRegex, vec![input.arg0.clone(), input.arg1.clone()])
        }
        OpChoice::InsertAfterRegex => {
            (CommandKind::InsertAfterRegex, vec![input.arg0.clone(), input.arg1.clone()])
        }
        OpChoice::ReplaceRegex => (CommandKind::ReplaceRegex, vec![input.arg0.clone(), input.arg1.clone()]),
        OpChoice::ReplaceRegexFirst => {
            (CommandKind::ReplaceRegexFirst, vec![input.arg0.clone(), input.arg1.clone()])
        }
        OpChoice::DeleteRegex => (CommandKind::DeleteRegex, vec![input.arg0.clone()]),
        OpChoice::ReplaceBlock => (
            CommandKind::ReplaceBlock,
            vec![input.arg0.clone(), input.arg1.clone(), input.arg2.clone()],
        ),
        OpChoice::ScanFile => (CommandKind::ScanFile, vec![input.arg0.clone()]),
    };

    let cmd = Command {
        op,
        file: Utf8PathBuf::from("f.txt"),
        args,
        opts: Default::default(),
        raw: String::new(),
        line_no: 1,
    };

    let _ = dispatch(&cmd, &mut overlay, &opts);
});
