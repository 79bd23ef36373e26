//! Pipeline → steps → scripts → commands orchestration (§2, §4.6, §5).

use camino::Utf8Path;
use chrono::Utc;
use svpatch_engine::{dispatch, EngineOptions};
use svpatch_types::{
    CommandOutcome, CommandRecord, OpErrorCode, RunManifest, RunReport, RunStatus, ScriptRecord,
    StepRecord,
};
use svpatch_vfs::Overlay;
use tracing::{debug, info, info_span};

use crate::commit;
use crate::error::RunnerError;
use crate::history::{self, HistoryRun};
use crate::ids;
use crate::pipeline;
use crate::settings::RunSettings;

pub fn run_plan(settings: &RunSettings) -> Result<RunReport, RunnerError> {
    execute(settings, true)
}

pub fn run_apply(settings: &RunSettings) -> Result<RunReport, RunnerError> {
    execute(settings, false)
}

fn execute(settings: &RunSettings, plan_only: bool) -> Result<RunReport, RunnerError> {
    if settings.workers == 0 {
        return Err(RunnerError::InvalidWorkers(0));
    }
    settings.log_worker_setting();

    let started_at = Utc::now().to_rfc3339();
    let mut run_id = ids::new_run_id();
    let change_id = ids::change_id(
        settings.root.as_str(),
        settings.pipeline.as_str(),
        settings.strict,
        &settings.allow,
    );

    let pipeline = pipeline::load_pipeline(&settings.pipeline)
        .map_err(|e| RunnerError::PipelineInvalid(e.to_string()))?;

    info!(run_id = %run_id, steps = pipeline.steps.len(), plan_only, "starting run");

    let data_root = settings.root.join("data");
    let want_history = !plan_only && settings.backup;
    let (history_run, parent_run_id) = if want_history {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match history::begin(
                &data_root,
                &run_id,
                &change_id,
                &started_at,
                settings.strict,
                settings.backup,
            ) {
                Ok((run, parent)) => break (Some(run), parent),
                Err(RunnerError::HistoryRunIdCollision) if attempts < history::MAX_RUN_ID_ATTEMPTS => {
                    debug!(run_id = %run_id, attempts, "history run id collided; regenerating");
                    run_id = ids::new_run_id();
                }
                Err(RunnerError::HistoryRunIdCollision) => {
                    return Err(RunnerError::FailedToCreateHistoryRunId { attempts });
                }
                Err(e) => return Err(e),
            }
        }
    } else {
        (None, None)
    };

    let mut overlay = Overlay::new(settings.root.clone());
    let engine_opts = EngineOptions {
        strict: settings.strict,
        regex_timeout: settings.regex_timeout,
        allow: settings.allow.clone(),
        deny: settings.deny.clone(),
    };

    let mut steps_out = Vec::new();
    // Paths touched by each (step_idx, script_idx), filled in with the
    // run's final diff once every step has executed — a script's "after" is
    // the file's content at the end of the whole run, not at the moment the
    // script itself finished (§4.6).
    let mut touched_by_script: Vec<Vec<std::collections::BTreeSet<camino::Utf8PathBuf>>> = Vec::new();
    let mut halted = false;

    for step in &pipeline.steps {
        if halted {
            break;
        }
        let _span = info_span!("step", name = %step.name).entered();
        let mut scripts_out = Vec::new();
        let mut touched_per_script = Vec::new();

        for script_path in &step.scripts {
            let _span = info_span!("script", path = %script_path).entered();
            let (record, touched) = run_script(script_path, settings, &mut overlay, &engine_opts);
            scripts_out.push(record);
            touched_per_script.push(touched);
        }

        let step_failed = scripts_out.iter().any(|s: &ScriptRecord| !s.errors.is_empty());
        if step_failed {
            debug!(step = %step.name, "step has errors; no further steps will run");
            halted = true;
        }
        steps_out.push(StepRecord {
            name: step.name.clone(),
            scripts: scripts_out,
            failed: step_failed,
        });
        touched_by_script.push(touched_per_script);
    }

    for (step, touched_per_script) in steps_out.iter_mut().zip(touched_by_script.iter()) {
        for (script, touched) in step.scripts.iter_mut().zip(touched_per_script.iter()) {
            for path in touched {
                let Some(meta) = overlay.changed_files().get(path) else {
                    continue;
                };
                let after = overlay.read(path).unwrap_or_default();
                let before_text = if meta.is_new {
                    String::new()
                } else {
                    disk_before_text(&settings.root, path)
                };
                let patch = diffy::create_patch(&before_text, &after);
                script.diffs.insert(path.clone(), patch.to_string());
            }
        }
    }

    let has_errors = steps_out.iter().any(|s| s.failed);
    let mut top_errors: Vec<String> = steps_out
        .iter()
        .flat_map(|s| s.scripts.iter())
        .flat_map(|s| s.errors.iter().cloned())
        .collect();

    let (status, files) = if plan_only {
        (if has_errors { RunStatus::FailedNoRollback } else { RunStatus::Ok }, Vec::new())
    } else if has_errors {
        // Commit-at-end discipline: nothing was ever written, so there is
        // nothing to roll back regardless of `rollback_on_fail` (§8 scenario 5).
        (RunStatus::FailedNoRollback, Vec::new())
    } else {
        match commit::check_limits(&overlay, settings.max_files, settings.max_total_write_bytes) {
            Ok(()) => match commit::commit(&overlay, settings.backup, history_run.as_ref()) {
                Ok(files) => (RunStatus::Ok, files),
                Err(e) => {
                    top_errors.push(e.to_string());
                    (RunStatus::FailedNoRollback, Vec::new())
                }
            },
            Err(e) => {
                top_errors.push(e.to_string());
                (RunStatus::FailedNoRollback, Vec::new())
            }
        }
    };

    let ended_at = Utc::now().to_rfc3339();

    if let Some(history_run) = &history_run {
        let manifest = RunManifest {
            schema_version: 1,
            run_id: run_id.clone(),
            change_id: change_id.clone(),
            parent_run_id,
            started_at: started_at.clone(),
            ended_at: Some(ended_at.clone()),
            status,
            plan_only,
            strict: settings.strict,
            backup: settings.backup,
            files: files.clone(),
            errors: top_errors.clone(),
        };
        history::finalize(&data_root, history_run, &manifest)?;
        write_history_artifacts(history_run, &manifest, &steps_out)?;
    }

    info!(run_id = %run_id, status = ?status, "run finished");

    Ok(RunReport {
        run_id,
        change_id,
        started_at,
        ended_at: Some(ended_at),
        status,
        plan_only,
        strict: settings.strict,
        backup: settings.backup,
        steps: steps_out,
        files,
        errors: top_errors,
    })
}

fn run_script(
    script_path: &str,
    settings: &RunSettings,
    overlay: &mut Overlay,
    engine_opts: &EngineOptions,
) -> (ScriptRecord, std::collections::BTreeSet<camino::Utf8PathBuf>) {
    let abs = settings.root.join(script_path);
    let text = match fs_err::read_to_string(&abs) {
        Ok(t) => t,
        Err(_) => {
            let record = ScriptRecord {
                path: camino::Utf8PathBuf::from(script_path),
                commands: Vec::new(),
                errors: vec![OpErrorCode::ScriptNotFound(script_path.to_string()).to_string()],
                diffs: std::collections::BTreeMap::new(),
            };
            return (record, std::collections::BTreeSet::new());
        }
    };

    let parsed = svpatch_dsl::parse_script(&text);
    let mut commands = Vec::with_capacity(parsed.commands.len());
    let mut errors: Vec<String> = parsed
        .issues
        .iter()
        .map(|issue| format!("line {}: {} [{}]", issue.line_no(), issue.to_op_error_code(), issue.raw()))
        .collect();

    let mut touched: std::collections::BTreeSet<camino::Utf8PathBuf> = std::collections::BTreeSet::new();

    for cmd in &parsed.commands {
        let outcome: CommandOutcome = dispatch(cmd, overlay, engine_opts);
        if outcome.is_err() {
            errors.push(format!(
                "line {}: {} {}: {}",
                cmd.line_no,
                cmd.op.canonical_name(),
                cmd.file,
                outcome.error.as_deref().unwrap_or("unknown error")
            ));
        }
        if let Some(norm) = svpatch_vfs::guard::normalize_relpath(&cmd.file) {
            touched.insert(norm);
        }
        commands.push(CommandRecord {
            line: cmd.line_no,
            op: cmd.op.canonical_name().to_string(),
            file: cmd.file.clone(),
            changed: outcome.changed,
            error: outcome.error.clone(),
            is_new: outcome.is_new,
            extras: outcome.extras,
        });
    }

    let record = ScriptRecord {
        path: camino::Utf8PathBuf::from(script_path),
        commands,
        errors,
        diffs: std::collections::BTreeMap::new(),
    };
    (record, touched)
}

fn disk_before_text(root: &Utf8Path, relpath: &Utf8Path) -> String {
    fs_err::read_to_string(root.join(relpath)).unwrap_or_default()
}

fn write_history_artifacts(
    history_run: &HistoryRun,
    manifest: &RunManifest,
    steps: &[StepRecord],
) -> Result<(), RunnerError> {
    let report = RunReport {
        run_id: manifest.run_id.clone(),
        change_id: manifest.change_id.clone(),
        started_at: manifest.started_at.clone(),
        ended_at: manifest.ended_at.clone(),
        status: manifest.status,
        plan_only: manifest.plan_only,
        strict: manifest.strict,
        backup: manifest.backup,
        steps: steps.to_vec(),
        files: manifest.files.clone(),
        errors: manifest.errors.clone(),
    };
    let report_json =
        serde_json::to_string_pretty(&report).map_err(|e| RunnerError::History(e.to_string()))?;
    fs_err::write(history_run.artifacts_dir.join("sv-report.json"), report_json)
        .map_err(|e| RunnerError::History(e.to_string()))?;

    let summary = svpatch_render::render_changes_summary_md(&report);
    fs_err::write(history_run.artifacts_dir.join("changes-summary.md"), summary)
        .map_err(|e| RunnerError::History(e.to_string()))?;

    for (path, diff) in steps.iter().flat_map(|s| s.scripts.iter()).flat_map(|s| s.diffs.iter()) {
        let dest = history_run.patches_dir.join(format!("{path}.diff"));
        if let Some(parent) = dest.parent() {
            fs_err::create_dir_all(parent).map_err(|e| RunnerError::History(e.to_string()))?;
        }
        fs_err::write(dest, diff).map_err(|e| RunnerError::History(e.to_string()))?;
    }

    Ok(())
}
