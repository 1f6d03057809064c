use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mkv", "avi", "mov"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg", "flac", "aac", "m4a", "opus"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaMode {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    Wav,
    Mp3,
    M4a,
    Flac,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
            Self::M4a => "m4a",
            Self::Flac => "flac",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "wav" => Some(Self::Wav),
            "mp3" => Some(Self::Mp3),
            "m4a" => Some(Self::M4a),
            "flac" => Some(Self::Flac),
            _ => None,
        }
    }
}

/// One download run's inputs. Resolution and frame-rate caps only apply to
/// video-mode requests for recognized streaming platforms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    pub mode: MediaMode,
    pub audio_format: AudioFormat,
    /// Maximum video height; `None` means best available.
    pub max_height: Option<u32>,
    /// Maximum frame rate; `None` means automatic.
    pub fps: Option<u32>,
    pub destination_dir: PathBuf,
    pub playlist: bool,
    pub embed_thumbnail: bool,
}

impl DownloadRequest {
    pub fn video(url: impl Into<String>, destination_dir: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            mode: MediaMode::Video,
            audio_format: AudioFormat::Mp3,
            max_height: None,
            fps: None,
            destination_dir: destination_dir.into(),
            playlist: false,
            embed_thumbnail: false,
        }
    }

    pub fn audio(
        url: impl Into<String>,
        destination_dir: impl Into<PathBuf>,
        format: AudioFormat,
    ) -> Self {
        Self {
            mode: MediaMode::Audio,
            audio_format: format,
            ..Self::video(url, destination_dir)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(EngineError::InvalidRequest("url is empty".to_string()));
        }
        if !self.destination_dir.is_dir() {
            return Err(EngineError::InvalidRequest(format!(
                "destination is not a directory: {}",
                self.destination_dir.display()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    /// Percent complete of the current artifact, within [0, 100].
    pub percent: f64,
    pub total_size: String,
    pub speed: String,
    pub eta: String,
    pub current_item: u32,
    pub total_items: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactKind {
    Audio,
    Video,
    #[serde(rename = "Processed Clip")]
    ProcessedClip,
    Unknown,
}

impl ArtifactKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Audio => "Audio",
            Self::Video => "Video",
            Self::ProcessedClip => "Processed Clip",
            Self::Unknown => "Unknown",
        }
    }

    pub fn from_file_name(file_name: &str) -> Self {
        let ext = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some(ext) if VIDEO_EXTENSIONS.contains(&ext) => Self::Video,
            Some(ext) if AUDIO_EXTENSIONS.contains(&ext) => Self::Audio,
            _ => Self::Unknown,
        }
    }

    /// Audio-mode runs only produce audio; otherwise the extension decides.
    pub fn classify(file_name: &str, mode: MediaMode) -> Self {
        match mode {
            MediaMode::Audio => Self::Audio,
            MediaMode::Video => Self::from_file_name(file_name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactEvent {
    pub file_name: String,
    /// Absolute directory with `/` separators, NFC-normalized.
    pub directory: String,
    pub kind: ArtifactKind,
}

impl ArtifactEvent {
    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.directory).join(&self.file_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "message", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum DownloadEvent {
    Progress(ProgressEvent),
    Artifact(ArtifactEvent),
    /// Child output that matched no classification rule.
    Output(String),
    Finished(RunOutcome),
}

impl DownloadEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished(_))
    }
}
