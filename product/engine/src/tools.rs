use crate::paths::AppPaths;
use crate::{cmd, EngineError, Result};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    YtDlp,
    Ffmpeg,
}

impl Tool {
    pub fn label(&self) -> &'static str {
        match self {
            Self::YtDlp => "yt-dlp",
            Self::Ffmpeg => "ffmpeg",
        }
    }

    pub fn binary_name(&self) -> String {
        if cfg!(windows) {
            format!("{}.exe", self.label())
        } else {
            self.label().to_string()
        }
    }

    fn version_arg(&self) -> &'static str {
        match self {
            Self::YtDlp => "--version",
            Self::Ffmpeg => "-version",
        }
    }

    fn package_name(&self) -> &'static str {
        self.label()
    }
}

/// A runnable tool: a program plus the arguments that must precede any
/// caller-supplied ones (e.g. `python3 -m yt_dlp`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: PathBuf,
    pub prefix_args: Vec<OsString>,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
        }
    }

    pub fn with_prefix<I, S>(program: impl Into<PathBuf>, prefix: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            prefix_args: prefix.into_iter().map(Into::into).collect(),
        }
    }

    pub fn command(&self) -> std::process::Command {
        let mut command = cmd::command(&self.program);
        command.args(&self.prefix_args);
        command
    }

    /// Directory holding the program, when it is a concrete path.
    pub fn parent_dir(&self) -> Option<&Path> {
        self.program
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
    }
}

pub trait ToolLocator {
    fn locate(&self, tool: Tool) -> Result<ToolCommand>;
}

/// Tools shipped next to the application (`<base>/bin/<platform>/`).
#[derive(Debug, Clone)]
pub struct BundledLocator {
    bin_dir: PathBuf,
}

impl BundledLocator {
    pub fn new(bin_dir: impl Into<PathBuf>) -> Self {
        Self {
            bin_dir: bin_dir.into(),
        }
    }
}

impl ToolLocator for BundledLocator {
    fn locate(&self, tool: Tool) -> Result<ToolCommand> {
        let path = self.bin_dir.join(tool.binary_name());
        if path.is_file() {
            return Ok(ToolCommand::new(path));
        }
        Err(EngineError::ExternalToolMissing {
            tool: tool.label().to_string(),
        })
    }
}

/// Tools found on `PATH`. The extraction tool may also come from a Python
/// module install.
#[derive(Debug, Clone, Default)]
pub struct SystemPathLocator;

impl ToolLocator for SystemPathLocator {
    fn locate(&self, tool: Tool) -> Result<ToolCommand> {
        if let Ok(path) = which::which(tool.label()) {
            return Ok(ToolCommand::new(path));
        }

        if tool == Tool::YtDlp {
            for python in ["python3", "python"] {
                let Ok(path) = which::which(python) else {
                    continue;
                };
                let candidate = ToolCommand::with_prefix(path, ["-m", "yt_dlp"]);
                if tool_version_first_line(&candidate, tool).is_some() {
                    return Ok(candidate);
                }
            }
        }

        Err(EngineError::ExternalToolMissing {
            tool: tool.label().to_string(),
        })
    }
}

/// Tries each locator in order and returns the first hit.
pub struct ChainLocator {
    locators: Vec<Box<dyn ToolLocator + Send + Sync>>,
}

impl ChainLocator {
    pub fn new(locators: Vec<Box<dyn ToolLocator + Send + Sync>>) -> Self {
        Self { locators }
    }
}

impl ToolLocator for ChainLocator {
    fn locate(&self, tool: Tool) -> Result<ToolCommand> {
        for locator in &self.locators {
            match locator.locate(tool) {
                Ok(found) => return Ok(found),
                Err(EngineError::ExternalToolMissing { .. }) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(EngineError::ExternalToolMissing {
            tool: tool.label().to_string(),
        })
    }
}

/// Bundled binaries on Windows and macOS, system lookup elsewhere. An explicit
/// tool directory override is always tried first.
pub fn platform_locator(paths: &AppPaths, tool_dir: Option<&Path>) -> ChainLocator {
    let mut locators: Vec<Box<dyn ToolLocator + Send + Sync>> = Vec::new();
    if let Some(dir) = tool_dir {
        locators.push(Box::new(BundledLocator::new(dir)));
    }
    if cfg!(any(windows, target_os = "macos")) {
        locators.push(Box::new(BundledLocator::new(paths.bundled_bin_dir())));
    } else {
        locators.push(Box::new(SystemPathLocator));
    }
    ChainLocator::new(locators)
}

#[derive(Debug, Clone)]
pub struct ResolvedTools {
    pub ytdlp: ToolCommand,
    pub ffmpeg: Option<ToolCommand>,
}

/// The extraction tool is required; the transcoder is optional and only
/// needed for post-processing.
pub fn resolve_tools(locator: &dyn ToolLocator) -> Result<ResolvedTools> {
    let ytdlp = locator.locate(Tool::YtDlp)?;
    let ffmpeg = match locator.locate(Tool::Ffmpeg) {
        Ok(found) => Some(found),
        Err(EngineError::ExternalToolMissing { .. }) => {
            tracing::warn!("ffmpeg not found; post-processing is unavailable");
            None
        }
        Err(err) => return Err(err),
    };
    tracing::debug!(ytdlp = %ytdlp.program.display(), "resolved external tools");
    Ok(ResolvedTools { ytdlp, ffmpeg })
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolStatus {
    pub tool: Tool,
    pub available: bool,
    pub path: Option<String>,
    pub version: Option<String>,
    pub install_hint: Option<String>,
}

pub fn tool_status(locator: &dyn ToolLocator, tool: Tool) -> ToolStatus {
    let located = locator.locate(tool).ok();
    let version = located
        .as_ref()
        .and_then(|found| tool_version_first_line(found, tool));

    ToolStatus {
        tool,
        available: version.is_some(),
        path: located.map(|found| found.program.to_string_lossy().to_string()),
        version,
        install_hint: install_hint(tool),
    }
}

/// Runs the tool's version query and returns the first line it prints.
pub fn verify_tool(command: &ToolCommand, tool: Tool) -> Result<String> {
    let output = command
        .command()
        .arg(tool.version_arg())
        .output()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => EngineError::ExternalToolMissing {
                tool: tool.label().to_string(),
            },
            _ => EngineError::SpawnFailed {
                tool: tool.label().to_string(),
                source: e,
            },
        })?;

    if !output.status.success() {
        return Err(EngineError::ExternalToolFailed {
            tool: tool.label().to_string(),
            code: output.status.code(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    first_non_empty_line(&output.stdout).ok_or_else(|| EngineError::UnexpectedToolOutput {
        tool: tool.label().to_string(),
        detail: "empty version output".to_string(),
    })
}

fn tool_version_first_line(command: &ToolCommand, tool: Tool) -> Option<String> {
    verify_tool(command, tool).ok()
}

fn first_non_empty_line(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let first = text.lines().next()?.trim();
    if first.is_empty() {
        return None;
    }
    Some(first.to_string())
}

/// A package-manager command that would install `tool`. Never executed by
/// the engine.
pub fn install_hint(tool: Tool) -> Option<String> {
    if !cfg!(target_os = "linux") {
        return None;
    }
    const MANAGERS: &[(&str, &str)] = &[
        ("apt-get", "sudo apt-get install -y"),
        ("pacman", "sudo pacman -S --noconfirm"),
        ("dnf", "sudo dnf install -y"),
        ("yum", "sudo yum install -y"),
        ("zypper", "sudo zypper install -y"),
    ];
    MANAGERS
        .iter()
        .find(|(manager, _)| which::which(manager).is_ok())
        .map(|(_, install)| format!("{install} {}", tool.package_name()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_locator_finds_binary_in_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let binary = dir.path().join(Tool::YtDlp.binary_name());
        std::fs::write(&binary, b"").expect("write");

        let locator = BundledLocator::new(dir.path());
        let found = locator.locate(Tool::YtDlp).expect("locate");
        assert_eq!(found.program, binary);
        assert!(found.prefix_args.is_empty());

        let missing = locator.locate(Tool::Ffmpeg);
        assert!(matches!(
            missing,
            Err(EngineError::ExternalToolMissing { ref tool }) if tool == "ffmpeg"
        ));
    }

    #[test]
    fn chain_locator_falls_through_missing_entries() {
        let empty = tempfile::tempdir().expect("tempdir");
        let filled = tempfile::tempdir().expect("tempdir");
        std::fs::write(filled.path().join(Tool::Ffmpeg.binary_name()), b"").expect("write");

        let locators: Vec<Box<dyn ToolLocator + Send + Sync>> = vec![
            Box::new(BundledLocator::new(empty.path())) as Box<dyn ToolLocator + Send + Sync>,
            Box::new(BundledLocator::new(filled.path())),
        ];
        let chain = ChainLocator::new(locators);
        let found = chain.locate(Tool::Ffmpeg).expect("locate");
        assert_eq!(found.parent_dir(), Some(filled.path()));
    }

    #[test]
    fn resolve_requires_extraction_tool_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let locator = BundledLocator::new(dir.path());
        assert!(matches!(
            resolve_tools(&locator),
            Err(EngineError::ExternalToolMissing { .. })
        ));

        std::fs::write(dir.path().join(Tool::YtDlp.binary_name()), b"").expect("write");
        let tools = resolve_tools(&locator).expect("resolve");
        assert!(tools.ffmpeg.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn verify_tool_rejects_empty_version_output() {
        let silent = ToolCommand::with_prefix("sh", ["-c", "exit 0", "yt-dlp"]);
        assert!(matches!(
            verify_tool(&silent, Tool::YtDlp),
            Err(EngineError::UnexpectedToolOutput { .. })
        ));

        let chatty = ToolCommand::with_prefix("sh", ["-c", "echo 2025.01.01", "yt-dlp"]);
        assert_eq!(verify_tool(&chatty, Tool::YtDlp).expect("version"), "2025.01.01");
    }

    #[test]
    fn bare_program_has_no_parent_dir() {
        assert_eq!(ToolCommand::new("yt-dlp").parent_dir(), None);
    }
}
