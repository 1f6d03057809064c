use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("external tool is missing: {tool}")]
    ExternalToolMissing { tool: String },

    #[error("external tool could not be started: {tool}: {source}")]
    SpawnFailed {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {}", describe_exit(.code, .detail))]
    ExternalToolFailed {
        tool: String,
        code: Option<i32>,
        detail: String,
    },

    #[error("external tool produced unexpected output: {tool}: {detail}")]
    UnexpectedToolOutput { tool: String, detail: String },

    #[error("a download is already running")]
    AlreadyRunning,

    #[error("invalid download request: {0}")]
    InvalidRequest(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("input file does not exist: {}", .0.display())]
    MissingInput(PathBuf),
}

pub type Result<T> = std::result::Result<T, EngineError>;

fn describe_exit(code: &Option<i32>, detail: &str) -> String {
    let mut out = match code {
        Some(code) => format!("code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    };
    if !detail.is_empty() {
        out.push_str(": ");
        out.push_str(detail);
    }
    out
}
