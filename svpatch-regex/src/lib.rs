//! Regex compilation and deadline-bounded execution (§4.2).
//!
//! All patterns are compiled with multiline anchoring; dotall is never
//! enabled, so cross-line matches require an explicit character class. Each
//! match runs on a detached helper thread so that a pathological pattern
//! cannot block the runner indefinitely (§9: "Rust has no portable
//! thread-kill"); the timed-out thread keeps running to completion in the
//! background and its result is simply discarded.

use std::sync::mpsc;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegexError {
    #[error("{0}")]
    Compile(String),
}

/// Compile `pattern` with multiline anchoring (`^`/`$` match line
/// boundaries) and dotall disabled.
pub fn compile(pattern: &str) -> Result<Regex, RegexError> {
    regex::RegexBuilder::new(pattern)
        .multi_line(true)
        .dot_matches_new_line(false)
        .build()
        .map_err(|e| RegexError::Compile(e.to_string()))
}

/// Outcome of running a regex against a haystack under a deadline.
pub enum TimedMatch {
    /// No match found within the deadline.
    NoMatch,
    /// The first match's byte range within the haystack.
    Match { start: usize, end: usize },
    /// The deadline elapsed before the helper thread reported back.
    Timeout,
}

/// Find the first match of `re` in `haystack`, aborting (via timeout
/// sentinel, not thread cancellation) after `timeout`.
pub fn find_with_timeout(re: &Regex, haystack: &str, timeout: Duration) -> TimedMatch {
    let re = re.clone();
    let haystack = haystack.to_string();
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let found = re.find(&haystack).map(|m| (m.start(), m.end()));
        // Drop the result silently if the receiver already timed out.
        let _ = tx.send(found);
    });
    match rx.recv_timeout(timeout) {
        Ok(Some((start, end))) => TimedMatch::Match { start, end },
        Ok(None) => TimedMatch::NoMatch,
        Err(_) => TimedMatch::Timeout,
    }
}

/// Count matches of `re` in `haystack`, aborting after `timeout`.
pub fn count_with_timeout(re: &Regex, haystack: &str, timeout: Duration) -> Option<usize> {
    let re = re.clone();
    let haystack = haystack.to_string();
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let count = re.find_iter(&haystack).count();
        let _ = tx.send(count);
    });
    rx.recv_timeout(timeout).ok()
}

/// Replace every non-overlapping match with `replacement`, aborting after
/// `timeout`. `replacement` follows the `regex` crate's `$name`/`$1`
/// expansion syntax.
pub fn replace_all_with_timeout(
    re: &Regex,
    haystack: &str,
    replacement: &str,
    timeout: Duration,
) -> Option<String> {
    let re = re.clone();
    let haystack = haystack.to_string();
    let replacement = replacement.to_string();
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let result = re.replace_all(&haystack, replacement.as_str()).into_owned();
        let _ = tx.send(result);
    });
    rx.recv_timeout(timeout).ok()
}

/// Replace only the first match with `replacement`, aborting after `timeout`.
pub fn replace_first_with_timeout(
    re: &Regex,
    haystack: &str,
    replacement: &str,
    timeout: Duration,
) -> Option<String> {
    let re = re.clone();
    let haystack = haystack.to_string();
    let replacement = replacement.to_string();
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let result = re.replacen(&haystack, 1, replacement.as_str()).into_owned();
        let _ = tx.send(result);
    });
    rx.recv_timeout(timeout).ok()
}

/// Find every non-overlapping match's byte range, aborting after `timeout`.
pub fn find_all_with_timeout(
    re: &Regex,
    haystack: &str,
    timeout: Duration,
) -> Option<Vec<(usize, usize)>> {
    let re = re.clone();
    let haystack = haystack.to_string();
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let matches: Vec<(usize, usize)> =
            re.find_iter(&haystack).map(|m| (m.start(), m.end())).collect();
        let _ = tx.send(matches);
    });
    rx.recv_timeout(timeout).ok()
}
