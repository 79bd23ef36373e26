//! Commit phase: limit enforcement, backups, atomic writes (§4.6, §5, §9).
//!
//! Limits are checked against the full `changed_files` set before any byte
//! touches disk (Open Question decision (ii): stage-then-rename, never
//! partially committed). Each write lands via `<path>.svtmp.<pid>.<ms>` then
//! a same-directory rename; deletes back up (if requested) then remove.

use std::time::{SystemTime, UNIX_EPOCH};

use camino::{Utf8Path, Utf8PathBuf};
use svpatch_types::{Action, ChangeMeta, FileManifestEntry, OpErrorCode};
use svpatch_vfs::Overlay;

use crate::history::HistoryRun;

/// Sum of `bytes_after` across all `ADD`/`MOD` entries — always recomputed
/// at commit, never accumulated incrementally (§9: closes the documented
/// `wrote_bytes_total` source bug).
fn wrote_bytes_total(changed: &std::collections::BTreeMap<Utf8PathBuf, ChangeMeta>) -> u64 {
    changed
        .values()
        .filter(|m| matches!(m.action, Action::Add | Action::Mod))
        .filter_map(|m| m.bytes_after)
        .sum()
}

/// Check `max_files`/`max_total_write_bytes` without writing anything.
pub fn check_limits(
    overlay: &Overlay,
    max_files: u64,
    max_total_write_bytes: u64,
) -> Result<(), OpErrorCode> {
    let changed = overlay.changed_files();
    if changed.len() as u64 > max_files {
        return Err(OpErrorCode::LimitMaxFilesExceeded);
    }
    if wrote_bytes_total(changed) > max_total_write_bytes {
        return Err(OpErrorCode::LimitMaxTotalWriteBytesExceeded);
    }
    Ok(())
}

fn atomic_write(abs: &Utf8Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = abs.parent() {
        fs_err::create_dir_all(parent)?;
    }
    let pid = std::process::id();
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let tmp = Utf8PathBuf::from(format!("{abs}.svtmp.{pid}.{ms}"));
    fs_err::write(&tmp, content)?;
    fs_err::rename(&tmp, abs)?;
    Ok(())
}

fn backup_path_for(history: &HistoryRun, relpath: &Utf8Path) -> Utf8PathBuf {
    history.before_dir.join(format!("{relpath}.bak"))
}

fn diff_path_for(history: &HistoryRun, relpath: &Utf8Path) -> Utf8PathBuf {
    history.patches_dir.join(format!("{relpath}.diff"))
}

/// Apply every entry in `overlay.changed_files()` to disk. Must only be
/// called after `check_limits` has passed. Returns one `FileManifestEntry`
/// per changed path, in deterministic (`BTreeMap`) order.
pub fn commit(
    overlay: &Overlay,
    backup: bool,
    history: Option<&HistoryRun>,
) -> Result<Vec<FileManifestEntry>, OpErrorCode> {
    let root = overlay.root();
    let mut entries = Vec::new();

    for (relpath, meta) in overlay.changed_files() {
        let abs = root.join(relpath);
        let mut backup_path = None;
        let mut diff_path = None;

        match meta.action {
            Action::Del => {
                if abs.exists() {
                    if backup {
                        if let Some(history) = history {
                            let before_text = fs_err::read_to_string(&abs).unwrap_or_default();
                            let bpath = backup_path_for(history, relpath);
                            if let Some(parent) = bpath.parent() {
                                let _ = fs_err::create_dir_all(parent);
                            }
                            if fs_err::write(&bpath, &before_text).is_ok() {
                                backup_path = Some(bpath);
                            }
                            let dpath = diff_path_for(history, relpath);
                            if let Some(parent) = dpath.parent() {
                                let _ = fs_err::create_dir_all(parent);
                            }
                            let patch = diffy::create_patch(&before_text, "");
                            if fs_err::write(&dpath, patch.to_string()).is_ok() {
                                diff_path = Some(dpath);
                            }
                        }
                    }
                    fs_err::remove_file(&abs).map_err(|e| {
                        OpErrorCode::InvalidArgs(format!("failed to remove {abs}: {e}"))
                    })?;
                }
            }
            Action::Add | Action::Mod => {
                let after_text = overlay.read(relpath).unwrap_or_default();
                let before_text = if abs.exists() {
                    fs_err::read_to_string(&abs).unwrap_or_default()
                } else {
                    String::new()
                };

                if backup && meta.action == Action::Mod {
                    if let Some(history) = history {
                        let bpath = backup_path_for(history, relpath);
                        if let Some(parent) = bpath.parent() {
                            let _ = fs_err::create_dir_all(parent);
                        }
                        if fs_err::write(&bpath, &before_text).is_ok() {
                            backup_path = Some(bpath);
                        }
                    }
                }

                if let Some(history) = history {
                    let dpath = diff_path_for(history, relpath);
                    if let Some(parent) = dpath.parent() {
                        let _ = fs_err::create_dir_all(parent);
                    }
                    let patch = diffy::create_patch(&before_text, &after_text);
                    if fs_err::write(&dpath, patch.to_string()).is_ok() {
                        diff_path = Some(dpath);
                    }
                }

                atomic_write(&abs, &after_text).map_err(|e| {
                    OpErrorCode::InvalidArgs(format!("failed to write {abs}: {e}"))
                })?;
            }
        }

        entries.push(FileManifestEntry {
            path: relpath.clone(),
            action: meta.action,
            is_new: meta.is_new,
            is_deleted: meta.action == Action::Del,
            sha256_before: meta.sha256_before.clone(),
            sha256_after: meta.sha256_after.clone(),
            bytes_before: meta.bytes_before,
            bytes_after: meta.bytes_after,
            backup_path,
            diff_path,
        });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    fn overlay_in(dir: &TempDir) -> Overlay {
        Overlay::new(Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap())
    }

    #[test]
    fn check_limits_rejects_too_many_files() {
        let dir = TempDir::new().unwrap();
        let mut ov = overlay_in(&dir);
        ov.write(Utf8Path::new("a.txt"), "x").unwrap();
        ov.write(Utf8Path::new("b.txt"), "y").unwrap();
        let err = check_limits(&ov, 1, 1_000_000).unwrap_err();
        assert!(matches!(err, OpErrorCode::LimitMaxFilesExceeded));
    }

    #[test]
    fn check_limits_rejects_too_many_bytes() {
        let dir = TempDir::new().unwrap();
        let mut ov = overlay_in(&dir);
        ov.write(Utf8Path::new("a.txt"), "0123456789").unwrap();
        let err = check_limits(&ov, 10, 5).unwrap_err();
        assert!(matches!(err, OpErrorCode::LimitMaxTotalWriteBytesExceeded));
    }

    #[test]
    fn commit_writes_new_file_without_history() {
        let dir = TempDir::new().unwrap();
        let mut ov = overlay_in(&dir);
        ov.write(Utf8Path::new("a.txt"), "hello").unwrap();
        let entries = commit(&ov, false, None).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            fs_err::read_to_string(dir.path().join("a.txt")).unwrap(),
            "hello"
        );
    }

    #[test]
    fn commit_removes_deleted_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        let mut ov = overlay_in(&dir);
        ov.delete(Utf8Path::new("a.txt")).unwrap();
        commit(&ov, false, None).unwrap();
        assert!(!dir.path().join("a.txt").exists());
    }

    #[test]
    fn commit_leaves_no_svtmp_siblings_behind() {
        let dir = TempDir::new().unwrap();
        let mut ov = overlay_in(&dir);
        ov.write(Utf8Path::new("a.txt"), "hello").unwrap();
        commit(&ov, false, None).unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("svtmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
