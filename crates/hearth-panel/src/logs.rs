use std::sync::OnceLock;

use regex::Regex;

/// Severity/kind taxonomy for a single console line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Command,
    Error,
    Warn,
    Info,
    Debug,
    Timestamp,
    Unknown,
}

/// One classified console line. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct LogRecord {
    pub raw: String,
    pub clean: String,
    pub kind: LogKind,
}

fn ansi_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*m").expect("static regex"))
}

fn timestamp_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}\]").expect("static regex")
    })
}

/// Strips terminal color escape sequences (`ESC[..m`).
pub fn strip_ansi(line: &str) -> String {
    ansi_re().replace_all(line, "").into_owned()
}

/// Classifies a raw console line. First matching rule wins; the worst
/// case is `Unknown`, never a panic.
///
/// Matching is substring-based on purpose, mirroring how the underlying
/// server logs are actually grepped in the wild. A player name that
/// contains "info" will classify as `Info`; see the tests.
pub fn classify(line: &str) -> LogRecord {
    let clean = strip_ansi(line);
    let lower = clean.to_lowercase();

    let kind = if clean.starts_with("> ") {
        LogKind::Command
    } else if lower.contains("error") || lower.contains("exception") {
        LogKind::Error
    } else if lower.contains("warn") {
        LogKind::Warn
    } else if lower.contains("info") {
        LogKind::Info
    } else if lower.contains("debug") {
        LogKind::Debug
    } else if timestamp_re().is_match(&clean) {
        LogKind::Timestamp
    } else {
        LogKind::Unknown
    };

    LogRecord {
        raw: line.to_string(),
        clean,
        kind,
    }
}

/// Classifies an arbitrary JSON log entry. Backends occasionally emit
/// non-string entries in `output`; those are coerced to their JSON
/// rendering and classified `Unknown` rather than rejected.
pub fn classify_value(value: &serde_json::Value) -> LogRecord {
    match value.as_str() {
        Some(s) => classify(s),
        None => {
            let raw = value.to_string();
            LogRecord {
                clean: raw.clone(),
                raw,
                kind: LogKind::Unknown,
            }
        }
    }
}
