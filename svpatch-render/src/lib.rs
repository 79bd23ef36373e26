//! Markdown rendering for the human-readable run summary (§6:
//! `data/index/changes-summary.md`, also copied into
//! `history/runs/.../artifacts/changes-summary.md`).

use svpatch_types::{Action, RunReport, RunStatus};

fn status_label(s: RunStatus) -> &'static str {
    match s {
        RunStatus::Ok => "OK",
        RunStatus::FailedRolledBack => "FAILED_ROLLED_BACK",
        RunStatus::FailedNoRollback => "FAILED_NO_ROLLBACK",
    }
}

fn action_label(a: Action) -> &'static str {
    match a {
        Action::Add => "ADD",
        Action::Mod => "MOD",
        Action::Del => "DEL",
    }
}

/// Render `report` as the markdown summary persisted at `changes-summary.md`.
pub fn render_changes_summary_md(report: &RunReport) -> String {
    let mut out = String::new();
    out.push_str("# svpatch run summary\n\n");
    out.push_str(&format!("- Run: `{}`\n", report.run_id));
    out.push_str(&format!("- Change: `{}`\n", report.change_id));
    out.push_str(&format!("- Status: `{}`\n", status_label(report.status)));
    out.push_str(&format!(
        "- Mode: `{}`\n",
        if report.plan_only { "plan" } else { "apply" }
    ));
    out.push_str(&format!("- Strict: `{}`\n", report.strict));
    out.push_str(&format!("- Backup: `{}`\n", report.backup));
    out.push_str(&format!("- Started: {}\n", report.started_at));
    if let Some(ended) = &report.ended_at {
        out.push_str(&format!("- Ended: {ended}\n"));
    }
    out.push('\n');

    out.push_str("## Steps\n\n");
    if report.steps.is_empty() {
        out.push_str("_No steps ran._\n\n");
    }
    for (i, step) in report.steps.iter().enumerate() {
        out.push_str(&format!(
            "### {}. {} — {}\n\n",
            i + 1,
            step.name,
            if step.failed { "FAILED" } else { "ok" }
        ));
        for script in &step.scripts {
            let command_count = script.commands.len();
            let error_count = script.errors.len();
            out.push_str(&format!(
                "- `{}`: {} commands, {} errors\n",
                script.path, command_count, error_count
            ));
            for err in &script.errors {
                out.push_str(&format!("  - {err}\n"));
            }
        }
        out.push('\n');
    }

    out.push_str("## Files\n\n");
    if report.files.is_empty() {
        out.push_str("_No files changed._\n\n");
    } else {
        out.push_str("| Path | Action | Bytes before | Bytes after |\n");
        out.push_str("|------|--------|---------------|-------------|\n");
        for f in &report.files {
            out.push_str(&format!(
                "| `{}` | {} | {} | {} |\n",
                f.path,
                action_label(f.action),
                f.bytes_before.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string()),
                f.bytes_after.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string()),
            ));
        }
        out.push('\n');
    }

    if !report.errors.is_empty() {
        out.push_str("## Errors\n\n");
        for err in &report.errors {
            out.push_str(&format!("- {err}\n"));
        }
        out.push('\n');
    }

    out
}
