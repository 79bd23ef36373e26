mod config;

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use config::ConfigMerger;
use fs_err as fs;
use svpatch_runtime::settings::RunSettings;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

const PIPELINE_SCHEMA: &str = include_str!("../schemas/pipeline.schema.json");
const MANIFEST_SCHEMA: &str = include_str!("../schemas/manifest.v1.schema.json");

#[derive(Debug, Parser)]
#[command(
    name = "svpatch",
    version,
    about = "Transactional source-tree patcher driven by pipeline descriptors and patch scripts."
)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a pipeline without writing to disk and emit a report.
    Plan(RunArgs),
    /// Run a pipeline and commit its changes to disk.
    Apply(RunArgs),
}

#[derive(Debug, Parser)]
struct RunArgs {
    /// Repository root (default: current directory).
    #[arg(long, default_value = ".")]
    root: Utf8PathBuf,

    /// Path to the pipeline descriptor (JSON), relative to --root.
    #[arg(long)]
    pipeline: Utf8PathBuf,

    /// Fail a regex-mutation command when it matches nothing.
    #[arg(long, default_value_t = false)]
    strict: bool,

    /// Write pre-change snapshots and a durable history run directory.
    #[arg(long, default_value_t = false)]
    backup: bool,

    /// Reserved: rollback is implied by commit-at-end discipline, since no
    /// partial commit is ever observable (§9). Accepted for CLI compatibility.
    #[arg(long, default_value_t = false)]
    rollback_on_fail: bool,

    /// Allowed path prefix (repeatable; default: ".").
    #[arg(long)]
    allow: Vec<String>,

    /// Denied path prefix (repeatable), layered on top of --allow.
    #[arg(long)]
    deny: Vec<String>,

    /// Maximum number of files a run may touch.
    #[arg(long)]
    max_files: Option<u64>,

    /// Maximum total bytes a run may write.
    #[arg(long)]
    max_total_write_bytes: Option<u64>,

    /// Workers (reserved; execution is single-threaded regardless).
    #[arg(long, default_value_t = 8)]
    workers: u32,

    /// Report output path (default: <root>/data/index/sv-report.json).
    #[arg(long)]
    report: Option<Utf8PathBuf>,

    /// Enable verbose (debug-level) logging.
    #[arg(long, short = 'v', default_value_t = false)]
    verbose: bool,
}

fn main() -> ExitCode {
    match real_main() {
        Ok(code) => code,
        Err(e) => {
            error!("{:?}", e);
            ExitCode::from(1)
        }
    }
}

fn real_main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let verbose = match &cli.cmd {
        Command::Plan(args) | Command::Apply(args) => args.verbose,
    };
    tracing_subscriber::fmt()
        .with_env_filter(if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::from_default_env()
        })
        .init();

    match cli.cmd {
        Command::Plan(args) => cmd_run(args, true),
        Command::Apply(args) => cmd_run(args, false),
    }
}

fn cmd_run(args: RunArgs, plan_only: bool) -> anyhow::Result<ExitCode> {
    validate_pipeline_schema(&args.root, &args.pipeline)?;

    let file_config = config::load_or_default(&args.root).context("load svpatch.toml config")?;
    let merged = ConfigMerger::new(file_config).merge_run_args(
        &args.allow,
        &args.deny,
        args.strict,
        args.backup,
        args.rollback_on_fail,
        args.max_files,
        args.max_total_write_bytes,
    );

    debug!(
        allow = ?merged.allow, deny = ?merged.deny, strict = merged.strict, backup = merged.backup,
        "merged config"
    );

    let defaults = RunSettings::default();
    let settings = RunSettings {
        root: args.root.clone(),
        pipeline: args.root.join(&args.pipeline),
        allow: if merged.allow.is_empty() {
            defaults.allow.clone()
        } else {
            merged.allow
        },
        deny: merged.deny,
        strict: merged.strict,
        backup: merged.backup,
        rollback_on_fail: merged.rollback_on_fail,
        max_files: merged.max_files.unwrap_or(defaults.max_files),
        max_total_write_bytes: merged
            .max_total_write_bytes
            .unwrap_or(defaults.max_total_write_bytes),
        workers: args.workers,
        regex_timeout: Duration::from_secs(10),
    };

    let report = if plan_only {
        svpatch_runtime::run_plan(&settings)
    } else {
        svpatch_runtime::run_apply(&settings)
    }
    .context("run failed")?;

    let report_path = args
        .report
        .unwrap_or_else(|| args.root.join("data/index/sv-report.json"));
    write_report_artifacts(&args.root, &report_path, &report)?;
    validate_manifest_if_present(&args.root, &report.run_id)?;

    if report.has_errors() {
        println!("FAILED.");
        for err in &report.errors {
            println!("  - {err}");
        }
        for step in &report.steps {
            for script in &step.scripts {
                for err in &script.errors {
                    println!("  - [{}/{}] {err}", step.name, script.path);
                }
            }
        }
        error!(run_id = %report.run_id, status = ?report.status, "run failed");
        Ok(ExitCode::from(1))
    } else {
        println!("OK.");
        println!("report: {report_path}");
        if args.verbose {
            println!(
                "changed files: {}, run_id: {}",
                report.files.len(),
                report.run_id
            );
        }
        info!(run_id = %report.run_id, files_changed = report.files.len(), "run succeeded");
        Ok(ExitCode::from(0))
    }
}

fn write_report_artifacts(
    root: &Utf8Path,
    report_path: &Utf8Path,
    report: &svpatch_types::RunReport,
) -> anyhow::Result<()> {
    if let Some(parent) = report_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(report)?;
    fs::write(report_path, json)?;

    let index_dir = root.join("data").join("index");
    fs::create_dir_all(&index_dir)?;
    let summary = svpatch_render::render_changes_summary_md(report);
    fs::write(index_dir.join("changes-summary.md"), summary)?;
    Ok(())
}

fn validate_pipeline_schema(root: &Utf8Path, pipeline: &Utf8Path) -> anyhow::Result<()> {
    let path = root.join(pipeline);
    let Ok(contents) = fs::read_to_string(&path) else {
        // Absent/unreadable pipeline files are reported by the runner as
        // PIPELINE_INVALID; schema validation only applies to parseable JSON.
        return Ok(());
    };
    let Ok(json) = serde_json::from_str::<serde_json::Value>(&contents) else {
        return Ok(());
    };
    let schema: serde_json::Value = serde_json::from_str(PIPELINE_SCHEMA)?;
    let compiled = jsonschema::draft202012::new(&schema)
        .map_err(|e| anyhow::anyhow!("compile pipeline schema: {e}"))?;
    let errors: Vec<String> = compiled.iter_errors(&json).map(|e| e.to_string()).collect();
    if !errors.is_empty() {
        anyhow::bail!("pipeline descriptor {} failed schema validation: {}", path, errors.join("; "));
    }
    Ok(())
}

fn validate_manifest_if_present(root: &Utf8Path, run_id: &str) -> anyhow::Result<()> {
    let date_prefix = &run_id[..8.min(run_id.len())];
    if date_prefix.len() < 8 {
        return Ok(());
    }
    let (yyyy, mm, dd) = (&date_prefix[0..4], &date_prefix[4..6], &date_prefix[6..8]);
    let manifest_path = root
        .join("data")
        .join("history")
        .join("runs")
        .join(yyyy)
        .join(mm)
        .join(dd)
        .join(run_id)
        .join("manifest.json");
    let Ok(contents) = fs::read_to_string(&manifest_path) else {
        return Ok(());
    };
    let json: serde_json::Value = serde_json::from_str(&contents)?;
    let schema: serde_json::Value = serde_json::from_str(MANIFEST_SCHEMA)?;
    let compiled = jsonschema::draft202012::new(&schema)
        .map_err(|e| anyhow::anyhow!("compile manifest schema: {e}"))?;
    for err in compiled.iter_errors(&json) {
        tracing::warn!(manifest = %manifest_path, "manifest schema violation: {err}");
    }
    Ok(())
}
