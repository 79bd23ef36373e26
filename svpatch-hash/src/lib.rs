//! LF-normalization and SHA-256 hashing, shared by the VFS and the runner.
//!
//! All content the core ever hashes is UTF-8 text normalized to LF (§1, §6:
//! "Hashing: SHA-256 over LF-normalized UTF-8 bytes"), so both helpers live
//! together in one small crate rather than spreading `\r\n` handling across
//! call sites.

use sha2::{Digest, Sha256};

/// Normalize `\r\n` and bare `\r` to `\n`.
pub fn normalize_lf(text: &str) -> String {
    if !text.contains('\r') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\r' {
            if chars.peek() == Some(&'\n') {
                chars.next();
            }
            out.push('\n');
        } else {
            out.push(c);
        }
    }
    out
}

/// SHA-256 of `text`, after LF-normalization, as lowercase hex.
pub fn hash_lf_normalized(text: &str) -> String {
    let normalized = normalize_lf(text);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}
