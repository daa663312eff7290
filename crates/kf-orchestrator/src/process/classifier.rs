//! Output line classification
//!
//! kubectl and socat report failures as free text. These heuristics turn a
//! line into an error flag and, for bind failures, the port that was taken.

use once_cell::sync::Lazy;
use regex::Regex;

const ERROR_MARKERS: &[&str] = &[
    "error",
    "failed",
    "unable to",
    "connection refused",
    "lost connection",
    "an error occurred",
];

const CONFLICT_PHRASE: &str = "address already in use";

/// Address forms recognised in bind failures, tried in order.
/// Other address formats are not reported as conflicts.
static CONFLICT_PATTERNS: Lazy<[Regex; 2]> = Lazy::new(|| {
    [
        Regex::new(r"127\.0\.0\.1:(\d+)").unwrap(),
        Regex::new(r"0\.0\.0\.0:(\d+)").unwrap(),
    ]
});

/// Result of classifying one output line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LineClass {
    pub is_error: bool,
    pub conflict_port: Option<u16>,
}

pub fn is_error_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    ERROR_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Port named in an "address already in use" line, if recognisable
pub fn detect_port_conflict(line: &str) -> Option<u16> {
    if !line.to_lowercase().contains(CONFLICT_PHRASE) {
        return None;
    }

    let captures = CONFLICT_PATTERNS
        .iter()
        .find_map(|pattern| pattern.captures(line))?;
    captures.get(1)?.as_str().parse().ok()
}

pub fn classify_line(line: &str) -> LineClass {
    LineClass {
        is_error: is_error_line(line),
        conflict_port: detect_port_conflict(line),
    }
}
