//! Classification of extraction-tool output lines.
//!
//! Each line is tested against an ordered rule table; the first rule whose
//! pattern matches decides what the line means. Lines that match no rule are
//! left to the caller as raw output.

use crate::models::{ArtifactEvent, ArtifactKind, DownloadEvent, MediaMode, ProgressEvent};
use regex::{Captures, Regex};
use std::path::Path;
use std::sync::OnceLock;
use unicode_normalization::UnicodeNormalization;

/// Sub-fields of a progress line. Missing fields are empty / zero.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSample {
    pub percent: f64,
    pub total_size: String,
    pub speed: String,
    pub eta: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LineEvent {
    PlaylistItem { current: u32, total: u32 },
    Destination(String),
    Progress(ProgressSample),
}

struct LineRule {
    name: &'static str,
    pattern: Regex,
    extract: fn(&Captures<'_>, &str) -> Option<LineEvent>,
}

fn rules() -> &'static [LineRule] {
    static RULES: OnceLock<Vec<LineRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            LineRule {
                name: "playlist_item",
                pattern: Regex::new(r"\[download\] Downloading item (\d+) of (\d+)").unwrap(),
                extract: extract_playlist_item,
            },
            LineRule {
                name: "destination",
                pattern: Regex::new(
                    r"\[(?:download|ExtractAudio|Merger)\] (?:Destination:|Merging formats into:?) (.+)$",
                )
                .unwrap(),
                extract: extract_destination,
            },
            LineRule {
                name: "progress",
                pattern: Regex::new(r"\[download\].*?\d+(?:\.\d+)?%").unwrap(),
                extract: extract_progress,
            },
        ]
    })
}

fn extract_playlist_item(caps: &Captures<'_>, _line: &str) -> Option<LineEvent> {
    let current = caps.get(1)?.as_str().parse().ok()?;
    let total = caps.get(2)?.as_str().parse().ok()?;
    Some(LineEvent::PlaylistItem { current, total })
}

fn extract_destination(caps: &Captures<'_>, _line: &str) -> Option<LineEvent> {
    let raw = caps.get(1)?.as_str().trim();
    let unquoted = unquote(raw);
    if unquoted.is_empty() {
        return None;
    }
    Some(LineEvent::Destination(unquoted.to_string()))
}

fn extract_progress(_caps: &Captures<'_>, line: &str) -> Option<LineEvent> {
    Some(LineEvent::Progress(parse_progress(line)))
}

/// Returns the first rule that matches `line`, or `None` for raw output.
pub fn classify_line(line: &str) -> Option<LineEvent> {
    for rule in rules() {
        if let Some(caps) = rule.pattern.captures(line) {
            let event = (rule.extract)(&caps, line);
            if event.is_none() {
                tracing::debug!(rule = rule.name, line, "line matched rule without usable fields");
            }
            return event;
        }
    }
    None
}

pub fn parse_progress(line: &str) -> ProgressSample {
    static PERCENT_RE: OnceLock<Regex> = OnceLock::new();
    static SIZE_RE: OnceLock<Regex> = OnceLock::new();
    static SPEED_RE: OnceLock<Regex> = OnceLock::new();
    static ETA_RE: OnceLock<Regex> = OnceLock::new();

    let percent_re = PERCENT_RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)%").unwrap());
    let size_re = SIZE_RE.get_or_init(|| Regex::new(r"\bof\s+~?\s*(\S+)").unwrap());
    let speed_re = SPEED_RE.get_or_init(|| Regex::new(r"\bat\s+(\S+)").unwrap());
    let eta_re = ETA_RE.get_or_init(|| Regex::new(r"\bETA\s+(\S+)").unwrap());

    let percent = percent_re
        .captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(|p| p.clamp(0.0, 100.0))
        .unwrap_or(0.0);

    let field = |re: &Regex| {
        re.captures(line)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    };

    ProgressSample {
        percent,
        total_size: field(size_re),
        speed: field(speed_re),
        eta: field(eta_re),
    }
}

fn unquote(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

pub fn nfc(value: &str) -> String {
    value.nfc().collect()
}

fn split_root(path: &str) -> (&str, &str) {
    let bytes = path.as_bytes();
    if path.starts_with("//") {
        return path.split_at(2);
    }
    if path.starts_with('/') {
        return path.split_at(1);
    }
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        if bytes.len() >= 3 && bytes[2] == b'/' {
            return path.split_at(3);
        }
        return path.split_at(2);
    }
    ("", path)
}

/// Rewrites `\` to `/`.
pub fn to_forward_slashes(path: &str) -> String {
    path.replace('\\', "/")
}

/// True for `/x`, `//server/x` and `C:/x`, independent of the host platform.
pub fn is_absolute_like(path: &str) -> bool {
    let (root, _) = split_root(path);
    root.ends_with('/')
}

/// Lexical normalization: collapses repeated separators, `.` and `..`.
pub fn normalize_lexically(path: &str) -> String {
    let (root, rest) = split_root(path);
    let mut parts: Vec<&str> = Vec::new();
    for part in rest.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else if root.is_empty() {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    if root.is_empty() && joined.is_empty() {
        ".".to_string()
    } else {
        format!("{root}{joined}")
    }
}

/// Splits a normalized path into `(directory, file_name)`.
pub(crate) fn split_file_name(path: &str) -> (String, String) {
    match path.rfind('/') {
        Some(idx) => {
            let dir = &path[..idx];
            let file = &path[idx + 1..];
            let dir = if dir.is_empty() || dir == "/" {
                "/".to_string()
            } else if dir.len() == 2 && dir.ends_with(':') {
                format!("{dir}/")
            } else {
                dir.to_string()
            };
            (dir, file.to_string())
        }
        None => (".".to_string(), path.to_string()),
    }
}

/// Resolves a destination reported by the tool into an artifact.
///
/// Relative paths are joined onto `destination_dir`; absolute paths ignore it.
/// A relative `destination_dir` is taken from the working directory.
pub fn resolve_artifact(destination: &str, destination_dir: &Path, mode: MediaMode) -> ArtifactEvent {
    let reported = to_forward_slashes(unquote(destination.trim()));
    let full = if is_absolute_like(&reported) {
        reported
    } else {
        let base = std::path::absolute(destination_dir)
            .unwrap_or_else(|_| destination_dir.to_path_buf());
        let base = to_forward_slashes(&base.to_string_lossy());
        format!("{}/{}", base.trim_end_matches('/'), reported)
    };
    let normalized = normalize_lexically(&full);
    let (directory, file_name) = split_file_name(&normalized);
    let file_name = nfc(&file_name);
    let kind = ArtifactKind::classify(&file_name, mode);

    ArtifactEvent {
        file_name,
        directory: nfc(&directory),
        kind,
    }
}

/// Stateful per-run parser: tracks playlist counters and turns classified
/// lines into outward events.
#[derive(Debug, Clone)]
pub struct OutputParser {
    mode: MediaMode,
    destination_dir: std::path::PathBuf,
    current_item: u32,
    total_items: u32,
}

impl OutputParser {
    pub fn new(mode: MediaMode, destination_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            mode,
            destination_dir: destination_dir.into(),
            current_item: 1,
            total_items: 1,
        }
    }

    pub fn counters(&self) -> (u32, u32) {
        (self.current_item, self.total_items)
    }

    /// `None` for blank lines and playlist counter updates; lines that match
    /// no rule come back as [`DownloadEvent::Output`].
    pub fn feed(&mut self, line: &str) -> Option<DownloadEvent> {
        if line.trim().is_empty() {
            return None;
        }
        let Some(classified) = classify_line(line) else {
            return Some(DownloadEvent::Output(line.to_string()));
        };
        match classified {
            LineEvent::PlaylistItem { current, total } => {
                self.current_item = current;
                self.total_items = total;
                None
            }
            LineEvent::Progress(sample) => Some(DownloadEvent::Progress(ProgressEvent {
                percent: sample.percent,
                total_size: sample.total_size,
                speed: sample.speed,
                eta: sample.eta,
                current_item: self.current_item,
                total_items: self.total_items,
            })),
            LineEvent::Destination(path) => Some(DownloadEvent::Artifact(resolve_artifact(
                &path,
                &self.destination_dir,
                self.mode,
            ))),
        }
    }
}
