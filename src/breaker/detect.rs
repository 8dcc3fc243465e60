// src/breaker/detect.rs

//! Pure string helpers behind loop detection.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

/// Outputs shorter than this (after trimming) carry too little signal to
/// compare.
pub const TRIVIAL_OUTPUT_CHARS: usize = 20;

static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b")
        .expect("uuid regex must compile")
});

static TIMESTAMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?")
        .expect("timestamp regex must compile")
});

static HEX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b0x[0-9a-fA-F]+\b").expect("hex regex must compile")
});

static PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:[A-Za-z]:)?(?:\.{0,2}[/\\][\w.\-]+)+[/\\]?")
        .expect("path regex must compile")
});

static LINE_COL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r":\d+(?::\d+)?\b").expect("line regex must compile")
});

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d+\b").expect("number regex must compile"));

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex must compile"));

/// Lowercased alphanumeric words of `text`.
pub fn word_set(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Jaccard index of the word sets of `a` and `b`, in `[0.0, 1.0]`.
///
/// Two texts without any words are considered identical.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let a = word_set(a);
    let b = word_set(b);
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(&b).count();
    let union = a.union(&b).count();
    intersection as f64 / union as f64
}

/// Strip the volatile parts of an error message so that repeats of the same
/// failure compare equal.
///
/// Replaces uuids, timestamps, hex addresses, paths, line/column suffixes and
/// bare numbers with placeholders, then collapses whitespace and lowercases.
pub fn normalize_error(error: &str) -> String {
    let s = UUID_RE.replace_all(error, "<uuid>");
    let s = TIMESTAMP_RE.replace_all(&s, "<time>");
    let s = HEX_RE.replace_all(&s, "<hex>");
    let s = PATH_RE.replace_all(&s, "<path>");
    let s = LINE_COL_RE.replace_all(&s, ":<line>");
    let s = NUMBER_RE.replace_all(&s, "<n>");
    let s = WHITESPACE_RE.replace_all(&s, " ");
    s.trim().to_lowercase()
}

pub fn is_trivial_output(output: &str) -> bool {
    output.trim().chars().count() < TRIVIAL_OUTPUT_CHARS
}
