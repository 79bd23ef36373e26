use std::time::Duration;

use anyhow::{bail, Context};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use fs_err as fs;
use serde::Deserialize;

/// Per-fixture overrides layered onto `RunSettings::default()`; absent
/// fields keep the default. Mirrors the CLI-over-config merge pattern used
/// to build `RunSettings` from flags and `svpatch.toml`.
#[derive(Debug, Default, Deserialize)]
struct FixtureOverrides {
    allow: Option<Vec<String>>,
    deny: Option<Vec<String>>,
    strict: Option<bool>,
    backup: Option<bool>,
    rollback_on_fail: Option<bool>,
    max_files: Option<u64>,
    max_total_write_bytes: Option<u64>,
}

impl FixtureOverrides {
    fn apply(self, settings: &mut svpatch_runtime::RunSettings) {
        if let Some(v) = self.allow {
            settings.allow = v;
        }
        if let Some(v) = self.deny {
            settings.deny = v;
        }
        if let Some(v) = self.strict {
            settings.strict = v;
        }
        if let Some(v) = self.backup {
            settings.backup = v;
        }
        if let Some(v) = self.rollback_on_fail {
            settings.rollback_on_fail = v;
        }
        if let Some(v) = self.max_files {
            settings.max_files = v;
        }
        if let Some(v) = self.max_total_write_bytes {
            settings.max_total_write_bytes = v;
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "xtask", about = "Workspace helper tasks")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run plan and apply against every fixture under `tests/fixtures/` and
    /// diff the resulting report against its committed golden file.
    ValidateFixtures {
        #[arg(long, default_value = "tests/fixtures")]
        dir: String,
        /// Overwrite golden files with the freshly produced report instead
        /// of comparing against them.
        #[arg(long)]
        write_baseline: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Command::ValidateFixtures { dir, write_baseline } => validate_fixtures(&dir, write_baseline),
    }
}

/// Each fixture is a directory `tests/fixtures/<name>/` containing a `repo/`
/// seed tree, a `pipeline.json` pointing at scripts inside that tree, and
/// (unless `--write-baseline`) a `golden.json` normalized report to diff
/// against. Mirrors the run/compare split of the collaborator this task
/// replaces.
fn validate_fixtures(dir: &str, write_baseline: bool) -> anyhow::Result<()> {
    let fixtures_dir = Utf8PathBuf::from(dir);
    if !fixtures_dir.exists() {
        bail!("fixtures directory {fixtures_dir} does not exist");
    }

    let mut entries: Vec<Utf8PathBuf> = fs::read_dir(&fixtures_dir)
        .with_context(|| format!("reading {fixtures_dir}"))?
        .filter_map(|e| e.ok())
        .map(|e| Utf8PathBuf::from_path_buf(e.path()).expect("utf8 fixture path"))
        .filter(|p| p.is_dir())
        .collect();
    entries.sort();

    if entries.is_empty() {
        bail!("no fixtures found under {fixtures_dir}");
    }

    let mut failures = Vec::new();
    for fixture in &entries {
        let name = fixture.file_name().unwrap_or("?");
        match run_fixture(fixture, write_baseline) {
            Ok(true) => println!("PASS {name}"),
            Ok(false) => {
                println!("FAIL {name}");
                failures.push(name.to_string());
            }
            Err(e) => {
                println!("ERROR {name}: {e}");
                failures.push(name.to_string());
            }
        }
    }

    println!("{}/{} fixtures ok", entries.len() - failures.len(), entries.len());
    if !failures.is_empty() && !write_baseline {
        bail!("fixtures failed: {}", failures.join(", "));
    }
    Ok(())
}

/// Returns `Ok(true)` on a clean match, `Ok(false)` on a mismatch (fixture
/// itself ran without a fatal error, just produced an unexpected report).
fn run_fixture(fixture: &Utf8Path, write_baseline: bool) -> anyhow::Result<bool> {
    let src_repo = fixture.join("repo");
    let pipeline_src = fixture.join("pipeline.json");
    if !pipeline_src.exists() {
        bail!("missing pipeline.json");
    }

    let tmp = tempfile::tempdir().context("create scratch dir")?;
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf8 tempdir");
    if src_repo.exists() {
        copy_dir_all(&src_repo, &root)?;
    }
    fs::copy(&pipeline_src, root.join("pipeline.json"))?;

    let scripts_src = fixture.join("scripts");
    if scripts_src.exists() {
        copy_dir_all(&scripts_src, &root.join("scripts"))?;
    }

    let mut settings = svpatch_runtime::RunSettings {
        root: root.clone(),
        pipeline: root.join("pipeline.json"),
        regex_timeout: Duration::from_secs(5),
        ..svpatch_runtime::RunSettings::default()
    };
    let overrides_path = fixture.join("settings.json");
    if overrides_path.exists() {
        let overrides: FixtureOverrides =
            serde_json::from_str(&fs::read_to_string(&overrides_path)?).context("parsing settings.json")?;
        overrides.apply(&mut settings);
    }

    let report = svpatch_runtime::run_apply(&settings).context("run_apply")?;
    let normalized = normalize_report(&report)?;

    let golden_path = fixture.join("golden.json");
    if write_baseline {
        fs::write(&golden_path, serde_json::to_string_pretty(&normalized)?)?;
        return Ok(true);
    }

    if !golden_path.exists() {
        bail!("golden.json missing (run with --write-baseline)");
    }
    let golden: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&golden_path)?).context("parsing golden.json")?;
    Ok(golden == normalized)
}

/// Strips fields that vary run-to-run (ids, timestamps, absolute paths) plus
/// content hashes and byte counts, which golden files would otherwise need
/// to carry precomputed by a means other than running this crate itself.
/// The remainder (actions, errors, status, counts) is still enough to catch
/// a logic regression.
const DYNAMIC_KEYS: &[&str] = &[
    "run_id",
    "change_id",
    "started_at",
    "ended_at",
    "backup_path",
    "diff_path",
    "sha256_before",
    "sha256_after",
    "bytes_before",
    "bytes_after",
];

fn normalize_report(report: &svpatch_types::RunReport) -> anyhow::Result<serde_json::Value> {
    let value = serde_json::to_value(report)?;
    Ok(strip_dynamic(value))
}

fn strip_dynamic(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                if DYNAMIC_KEYS.contains(&k.as_str()) {
                    continue;
                }
                out.insert(k, strip_dynamic(v));
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(items) => serde_json::Value::Array(items.into_iter().map(strip_dynamic).collect()),
        other => other,
    }
}

fn copy_dir_all(src: &Utf8Path, dst: &Utf8Path) -> anyhow::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let src_path = Utf8PathBuf::from_path_buf(entry.path()).expect("utf8 path");
        let dst_path = dst.join(file_name.to_string_lossy().as_ref());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}
