//! Cucumber acceptance steps for the scenarios in `features/plan_apply.feature`,
//! mirroring the literal inputs in the specification's §8 scenario table.

use camino::Utf8PathBuf;
use cucumber::{given, then, when, World};
use fs_err as fs;
use svpatch_types::{Action, RunReport};
use tempfile::TempDir;

#[derive(Debug, Default, World)]
pub struct SvpatchWorld {
    temp: Option<TempDir>,
    root: Option<Utf8PathBuf>,
    report: Option<RunReport>,
}

fn root(world: &SvpatchWorld) -> &Utf8PathBuf {
    world.root.as_ref().expect("root set by a Given step")
}

fn report(world: &SvpatchWorld) -> &RunReport {
    world.report.as_ref().expect("pipeline was run by a When step")
}

#[given("an empty repo")]
async fn empty_repo(world: &mut SvpatchWorld) {
    let td = tempfile::tempdir().expect("tempdir");
    let root = Utf8PathBuf::from_path_buf(td.path().to_path_buf()).unwrap();
    world.temp = Some(td);
    world.root = Some(root);
}

#[given(expr = "the file {string} already contains {string}")]
async fn file_already_contains(world: &mut SvpatchWorld, path: String, content: String) {
    let root = root(world).clone();
    let content = unescape(&content);
    let dest = root.join(&path);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(dest, content).unwrap();
}

#[given(expr = "a patch script {string} containing:")]
async fn patch_script(world: &mut SvpatchWorld, step: &cucumber::gherkin::Step, name: String) {
    let body = step.docstring.as_ref().expect("docstring body").clone();
    let root = root(world).clone();
    fs::write(root.join(&name), body).unwrap();
}

#[given(expr = "a pipeline {string} running step {string} with scripts {string}")]
async fn pipeline_single_step(
    world: &mut SvpatchWorld,
    name: String,
    step_name: String,
    script: String,
) {
    let root = root(world).clone();
    let body = serde_json::json!({
        "steps": [{"name": step_name, "scripts": script}]
    });
    fs::write(root.join(&name), serde_json::to_string_pretty(&body).unwrap()).unwrap();
}

#[given(
    expr = "a pipeline {string} running step {string} with scripts {string} then step {string} with scripts {string}"
)]
async fn pipeline_two_steps(
    world: &mut SvpatchWorld,
    name: String,
    step_a: String,
    script_a: String,
    step_b: String,
    script_b: String,
) {
    let root = root(world).clone();
    let body = serde_json::json!({
        "steps": [
            {"name": step_a, "scripts": script_a},
            {"name": step_b, "scripts": script_b},
        ]
    });
    fs::write(root.join(&name), serde_json::to_string_pretty(&body).unwrap()).unwrap();
}

fn run_settings(root: &Utf8PathBuf) -> svpatch_runtime::RunSettings {
    let mut settings = svpatch_runtime::RunSettings::default();
    settings.root = root.clone();
    settings.pipeline = root.join("pipeline.json");
    settings
}

#[when("I plan the pipeline")]
async fn plan_pipeline(world: &mut SvpatchWorld) {
    let root = root(world).clone();
    let report = svpatch_runtime::run_plan(&run_settings(&root)).expect("run_plan should not error fatally");
    world.report = Some(report);
}

#[when("I apply the pipeline")]
async fn apply_pipeline(world: &mut SvpatchWorld) {
    let root = root(world).clone();
    let report = svpatch_runtime::run_apply(&run_settings(&root)).expect("run_apply should not error fatally");
    world.report = Some(report);
}

#[when("I apply the pipeline in strict mode")]
async fn apply_pipeline_strict(world: &mut SvpatchWorld) {
    let root = root(world).clone();
    let mut settings = run_settings(&root);
    settings.strict = true;
    let report = svpatch_runtime::run_apply(&settings).expect("run_apply should not error fatally");
    world.report = Some(report);
}

#[when("I apply the pipeline with backup and rollback-on-fail")]
async fn apply_pipeline_backup_rollback(world: &mut SvpatchWorld) {
    let root = root(world).clone();
    let mut settings = run_settings(&root);
    settings.backup = true;
    settings.rollback_on_fail = true;
    let report = svpatch_runtime::run_apply(&settings).expect("run_apply should not error fatally");
    world.report = Some(report);
}

#[when(expr = "I apply the pipeline with allow {string} and max files {int}")]
async fn apply_pipeline_with_limits(world: &mut SvpatchWorld, allow: String, max_files: u64) {
    let root = root(world).clone();
    let mut settings = run_settings(&root);
    settings.allow = vec![allow];
    settings.max_files = max_files;
    let report = svpatch_runtime::run_apply(&settings).expect("run_apply should not error fatally");
    world.report = Some(report);
}

#[then("the run succeeds")]
async fn run_succeeds(world: &mut SvpatchWorld) {
    let report = report(world);
    assert!(
        !report.has_errors(),
        "expected success, got errors: {:?}",
        report.errors
    );
}

#[then(expr = "the run fails with error {string}")]
async fn run_fails_with_error(world: &mut SvpatchWorld, needle: String) {
    let report = report(world);
    assert!(report.has_errors(), "expected the run to fail");
    let all_errors: Vec<&str> = report
        .errors
        .iter()
        .map(String::as_str)
        .chain(
            report
                .steps
                .iter()
                .flat_map(|s| s.scripts.iter())
                .flat_map(|s| s.errors.iter())
                .map(String::as_str),
        )
        .collect();
    assert!(
        all_errors.iter().any(|e| e.contains(&needle)),
        "expected an error containing {needle:?}, got {all_errors:?}"
    );
}

#[then(expr = "the run fails with status {string}")]
async fn run_fails_with_status(world: &mut SvpatchWorld, status: String) {
    let report = report(world);
    assert!(report.has_errors(), "expected the run to fail");
    let actual = format!("{:?}", report.status).to_uppercase();
    let wanted = status.replace('_', "");
    assert_eq!(
        actual.replace('_', ""),
        wanted,
        "expected status {status}, got {:?}",
        report.status
    );
}

#[then(expr = "the file {string} contains {string}")]
async fn file_contains(world: &mut SvpatchWorld, path: String, expected: String) {
    let root = root(world).clone();
    let expected = unescape(&expected);
    let actual = fs::read_to_string(root.join(&path))
        .unwrap_or_else(|e| panic!("reading {path}: {e}"));
    assert_eq!(actual, expected);
}

#[then(expr = "the file {string} does not exist on disk")]
async fn file_absent(world: &mut SvpatchWorld, path: String) {
    let root = root(world).clone();
    assert!(!root.join(&path).exists(), "expected {path} to be absent");
}

#[then(expr = "the changed file {string} is recorded as an ADD")]
async fn changed_file_is_add(world: &mut SvpatchWorld, path: String) {
    let report = report(world);
    let entry = report
        .files
        .iter()
        .find(|f| f.path.as_str() == path)
        .unwrap_or_else(|| panic!("no manifest entry for {path}"));
    assert_eq!(entry.action, Action::Add);
    assert!(entry.is_new);
}

#[then("no files are recorded as changed")]
async fn no_files_changed(world: &mut SvpatchWorld) {
    let report = report(world);
    assert!(
        report.files.is_empty(),
        "expected no changed files, got {:?}",
        report.files
    );
}

/// Gherkin docstrings and literals carry `\n` as the two characters backslash-n;
/// scenario text needs the same escaping the DSL payload decoder applies.
fn unescape(s: &str) -> String {
    s.replace("\\n", "\n")
}

#[tokio::main]
async fn main() {
    let features_path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("features");
    SvpatchWorld::cucumber().run(features_path).await;
}
