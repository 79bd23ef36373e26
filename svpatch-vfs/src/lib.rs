//! Overlay virtual filesystem (§3, §4.4).
//!
//! Buffers reads/writes above the real filesystem for the duration of one
//! run so the engine can mutate files speculatively and the runner can
//! commit or discard the whole batch atomically. The real filesystem is
//! never touched until the runner's commit phase (§4.6); every read a
//! command issues during the run sees a disk that the run itself has not
//! yet mutated, so "before" snapshots can be taken lazily on first touch
//! rather than precomputed at run start.

pub mod guard;

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};
use svpatch_types::{Action, ChangeMeta};

/// Per-run overlay state (§3).
pub struct Overlay {
    root: Utf8PathBuf,
    vfs: BTreeMap<Utf8PathBuf, String>,
    deleted: BTreeSet<Utf8PathBuf>,
    changed_files: BTreeMap<Utf8PathBuf, ChangeMeta>,
}

impl Overlay {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self {
            root,
            vfs: BTreeMap::new(),
            deleted: BTreeSet::new(),
            changed_files: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn changed_files(&self) -> &BTreeMap<Utf8PathBuf, ChangeMeta> {
        &self.changed_files
    }

    fn disk_abs(&self, norm: &Utf8Path) -> Utf8PathBuf {
        self.root.join(norm)
    }

    fn disk_is_dir(&self, norm: &Utf8Path) -> bool {
        fs_err::metadata(self.disk_abs(norm))
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    fn disk_read(&self, norm: &Utf8Path) -> Option<String> {
        let abs = self.disk_abs(norm);
        match fs_err::metadata(&abs) {
            Ok(m) if m.is_file() => fs_err::read_to_string(&abs)
                .ok()
                .map(|s| svpatch_hash::normalize_lf(&s)),
            _ => None,
        }
    }

    fn disk_exists_file(&self, norm: &Utf8Path) -> bool {
        fs_err::metadata(self.disk_abs(norm))
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// `(bytes_before, sha256_before, existed_on_disk)` — safe to call at
    /// any point in the run since the overlay never writes through to disk.
    fn disk_before(&self, norm: &Utf8Path) -> (Option<u64>, Option<String>, bool) {
        match self.disk_read(norm) {
            Some(content) => (
                Some(content.len() as u64),
                Some(svpatch_hash::hash_lf_normalized(&content)),
                true,
            ),
            None => (None, None, false),
        }
    }

    /// Effective content of `p`: absent if deleted in the overlay, the
    /// buffered value if written this run, else the disk content (absent if
    /// missing or a directory).
    pub fn read(&self, p: &Utf8Path) -> Option<String> {
        let norm = guard::normalize_relpath(p)?;
        if self.deleted.contains(&norm) {
            return None;
        }
        if let Some(v) = self.vfs.get(&norm) {
            return Some(v.clone());
        }
        self.disk_read(&norm)
    }

    /// Whether `p` currently resolves to content (overlay or disk).
    pub fn exists(&self, p: &Utf8Path) -> bool {
        let Some(norm) = guard::normalize_relpath(p) else {
            return false;
        };
        if self.deleted.contains(&norm) {
            return false;
        }
        if self.vfs.contains_key(&norm) {
            return true;
        }
        self.disk_exists_file(&norm)
    }

    /// Whether `p` is a directory on disk and not itself an overlay entry.
    pub fn is_directory(&self, p: &Utf8Path) -> bool {
        let Some(norm) = guard::normalize_relpath(p) else {
            return false;
        };
        if self.vfs.contains_key(&norm) || self.deleted.contains(&norm) {
            return false;
        }
        self.disk_is_dir(&norm)
    }

    /// Write `text` to `p`. No-op (no VFS mutation, no `changed_files`
    /// entry) if `text` already equals the current effective content.
    /// Returns whether content actually changed.
    pub fn write(&mut self, p: &Utf8Path, text: &str) -> Option<bool> {
        let norm = guard::normalize_relpath(p)?;
        let normalized_text = svpatch_hash::normalize_lf(text);

        if self.read(&norm).as_deref() == Some(normalized_text.as_str()) {
            return Some(false);
        }

        let (bytes_before, sha256_before, existed_on_disk) = self.disk_before(&norm);
        let is_new = !existed_on_disk;

        self.deleted.remove(&norm);
        let bytes_after = normalized_text.len() as u64;
        let sha256_after = svpatch_hash::hash_lf_normalized(&normalized_text);
        self.vfs.insert(norm.clone(), normalized_text);

        let entry = self.changed_files.entry(norm).or_insert_with(|| ChangeMeta {
            bytes_before,
            sha256_before,
            bytes_after: None,
            sha256_after: None,
            is_new,
            action: if is_new { Action::Add } else { Action::Mod },
        });
        entry.bytes_after = Some(bytes_after);
        entry.sha256_after = Some(sha256_after);
        entry.action = if entry.is_new { Action::Add } else { Action::Mod };
        Some(true)
    }

    /// Delete `p`. `Err` if `p` is an on-disk directory the overlay has not
    /// already claimed; `Ok(false)` if `p` was already absent (no-op);
    /// `Ok(true)` once removed.
    pub fn delete(&mut self, p: &Utf8Path) -> Result<bool, DeleteError> {
        let norm = guard::normalize_relpath(p).ok_or(DeleteError::Unsafe)?;
        let is_overlay_entry = self.vfs.contains_key(&norm) || self.deleted.contains(&norm);
        if !is_overlay_entry && self.disk_is_dir(&norm) {
            return Err(DeleteError::IsDirectory);
        }
        if !self.exists(&norm) {
            return Ok(false);
        }

        let (bytes_before, sha256_before, existed_on_disk) = self.disk_before(&norm);
        self.vfs.remove(&norm);
        self.deleted.insert(norm.clone());

        let entry = self.changed_files.entry(norm).or_insert_with(|| ChangeMeta {
            bytes_before,
            sha256_before,
            bytes_after: None,
            sha256_after: None,
            is_new: !existed_on_disk,
            action: Action::Del,
        });
        entry.bytes_after = None;
        entry.sha256_after = None;
        entry.action = Action::Del;
        Ok(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeleteError {
    #[error("path is not safe")]
    Unsafe,
    #[error("path resolves to a directory")]
    IsDirectory,
}
