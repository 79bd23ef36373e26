//! Run settings threaded through `run_plan`/`run_apply` (§4.6, §5).

use std::time::Duration;

use camino::Utf8PathBuf;

/// Everything a single invocation needs, built by the CLI layer from parsed
/// flags plus an optional `svpatch.toml` overlay.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub root: Utf8PathBuf,
    pub pipeline: Utf8PathBuf,
    pub allow: Vec<String>,
    pub deny: Vec<String>,
    pub strict: bool,
    pub backup: bool,
    pub rollback_on_fail: bool,
    pub max_files: u64,
    pub max_total_write_bytes: u64,
    pub workers: u32,
    pub regex_timeout: Duration,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            root: Utf8PathBuf::from("."),
            pipeline: Utf8PathBuf::from("pipeline.json"),
            allow: vec![".".to_string()],
            deny: Vec::new(),
            strict: false,
            backup: false,
            rollback_on_fail: false,
            max_files: 500,
            max_total_write_bytes: 10_000_000,
            workers: 1,
            regex_timeout: Duration::from_secs(10),
        }
    }
}

impl RunSettings {
    /// `allowed` per §4.1, with `deny` layered on top: a path matching any
    /// deny prefix is rejected even if an allow prefix also matches. This is
    /// the same check `svpatch_engine::dispatch` applies per-command; exposed
    /// here too so callers can pre-filter without building an `Overlay`.
    pub fn path_allowed(&self, p: &camino::Utf8Path) -> bool {
        svpatch_vfs::guard::is_allowed_and_not_denied(p, &self.allow, &self.deny)
    }

    /// `workers` is accepted but not load-bearing; single-threaded execution
    /// is the only supported mode (§5).
    pub fn log_worker_setting(&self) {
        if self.workers != 1 {
            tracing::debug!(workers = self.workers, "workers setting is accepted but inert; execution is single-threaded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_allowed_respects_deny_over_allow() {
        let settings = RunSettings {
            allow: vec![".".to_string()],
            deny: vec!["secrets/".to_string()],
            ..RunSettings::default()
        };
        assert!(settings.path_allowed(camino::Utf8Path::new("src/lib.rs")));
        assert!(!settings.path_allowed(camino::Utf8Path::new("secrets/key.pem")));
    }
}
