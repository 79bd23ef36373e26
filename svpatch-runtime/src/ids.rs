//! `run_id` / `change_id` generation (§6, §9).

use chrono::Utc;
use uuid::Uuid;

/// `YYYYMMDDTHHMMSSZ_<8-hex>`. Not deterministic by design — every attempt
/// gets a fresh timestamp and random suffix.
pub fn new_run_id() -> String {
    let ts = Utc::now().format("%Y%m%dT%H%M%SZ");
    let suffix = &Uuid::new_v4().simple().to_string()[..8];
    format!("{ts}_{suffix}")
}

/// First 12 hex chars of SHA-256 over the canonicalized logical inputs of a
/// run: `{root, pipeline, strict, allow}`. Deterministic and stable across
/// retries of the same configuration.
pub fn change_id(root: &str, pipeline: &str, strict: bool, allow: &[String]) -> String {
    let mut sorted_allow = allow.to_vec();
    sorted_allow.sort();
    let canonical = serde_json::json!({
        "root": root,
        "pipeline": pipeline,
        "strict": strict,
        "allow": sorted_allow,
    });
    let text = serde_json::to_string(&canonical).expect("canonical json never fails");
    let full = svpatch_hash::hash_lf_normalized(&text);
    full[..12].to_string()
}
