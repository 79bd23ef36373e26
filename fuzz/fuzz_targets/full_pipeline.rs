#![no_main]

//! Fuzz target for a full plan/apply run against a scratch repo (§2, §4.6).
//!
//! Builds a small on-disk repo and pipeline from arbitrary structured input,
//! then drives both `run_plan` and `run_apply` through it. Confirms the
//! runner never panics regardless of how malformed the generated script or
//! pipeline shape is, and that plan mode never mutates the seeded files.

use std::time::Duration;

use camino::Utf8PathBuf;
use libfuzzer_sys::fuzz_target;
use svpatch_runtime::RunSettings;

#[derive(Debug, arbitrary::Arbitrary)]
struct FuzzInput {
    seed_content: String,
    script_body: String,
    strict: bool,
    backup: bool,
    max_files: u8,
    max_total_write_bytes: u16,
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

    if fs_err::write(root.join("f.txt"), &input.seed_content).is_err() {
        return;
    }
    if fs_err::write(root.join("a.sv"), &input.script_body).is_err() {
        return;
    }
    let pipeline = serde_json::json!({"steps": [{"name": "s1", "scripts": "a.sv"}]});
    if fs_err::write(root.join("pipeline.json"), pipeline.to_string()).is_err() {
        return;
    }

    let settings = RunSettings {
        root: root.clone(),
        pipeline: root.join("pipeline.json"),
        allow: vec![".".to_string()],
        deny: vec![],
        strict: input.strict,
        backup: input.backup,
        rollback_on_fail: true,
        max_files: input.max_files as u64,
        max_total_write_bytes: input.max_total_write_bytes as u64,
        workers: 1,
        regex_timeout: Duration::from_millis(200),
    };

    let before = fs_err::read_to_string(root.join("f.txt")).unwrap_or_default();
    let _ = svpatch_runtime::run_plan(&settings);
    let after_plan = fs_err::read_to_string(root.join("f.txt")).unwrap_or_default();
    assert_eq!(before, after_plan, "plan mode must never write to disk");

    let _ = svpatch_runtime::run_apply(&settings);
});
