use crate::lines::{nfc, normalize_lexically, split_file_name, to_forward_slashes};
use crate::models::{ArtifactEvent, ArtifactKind};
use crate::tools::ToolCommand;
use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

const STDERR_TAIL_LINES: usize = 5;

/// Video encoders offered for post-processing; hardware encoders need a
/// matching GPU and an ffmpeg build that includes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoEncoder {
    X264,
    QsvH264,
    QsvHevc,
    NvencH264,
    NvencHevc,
    AmfH264,
    AmfHevc,
}

impl VideoEncoder {
    pub const ALL: [VideoEncoder; 7] = [
        Self::X264,
        Self::QsvH264,
        Self::QsvHevc,
        Self::NvencH264,
        Self::NvencHevc,
        Self::AmfH264,
        Self::AmfHevc,
    ];

    pub fn codec_name(&self) -> &'static str {
        match self {
            Self::X264 => "libx264",
            Self::QsvH264 => "h264_qsv",
            Self::QsvHevc => "hevc_qsv",
            Self::NvencH264 => "h264_nvenc",
            Self::NvencHevc => "hevc_nvenc",
            Self::AmfH264 => "h264_amf",
            Self::AmfHevc => "hevc_amf",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::X264 => "x264",
            Self::QsvH264 => "qsv (h264)",
            Self::QsvHevc => "qsv (hevc)",
            Self::NvencH264 => "nvenc (h264)",
            Self::NvencHevc => "nvenc (hevc)",
            Self::AmfH264 => "amf (h264)",
            Self::AmfHevc => "amf (hevc)",
        }
    }

    /// Accepts either the display label or the codec name.
    pub fn from_str(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|e| e.label().eq_ignore_ascii_case(value) || e.codec_name() == value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeRequest {
    pub video_input: PathBuf,
    pub audio_input: Option<PathBuf>,
    /// Output location; the extension is always replaced with `.mp4`.
    pub output: PathBuf,
    pub codec: String,
    pub bitrate: String,
    pub preset: String,
}

impl TranscodeRequest {
    pub fn new(video_input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            video_input: video_input.into(),
            audio_input: None,
            output: output.into(),
            codec: VideoEncoder::X264.codec_name().to_string(),
            bitrate: "5M".to_string(),
            preset: "fast".to_string(),
        }
    }

    pub fn with_audio(mut self, audio_input: impl Into<PathBuf>) -> Self {
        self.audio_input = Some(audio_input.into());
        self
    }

    pub fn with_encoder(mut self, encoder: VideoEncoder) -> Self {
        self.codec = encoder.codec_name().to_string();
        self
    }

    pub fn output_path(&self) -> PathBuf {
        self.output.with_extension("mp4")
    }

    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-nostdin".into(), "-y".into()];
        args.push("-i".into());
        args.push(self.video_input.as_os_str().to_os_string());
        if let Some(audio) = &self.audio_input {
            args.push("-i".into());
            args.push(audio.as_os_str().to_os_string());
        }
        for (flag, value) in [
            ("-c:v", self.codec.as_str()),
            ("-c:a", "aac"),
            ("-b:v", self.bitrate.as_str()),
            ("-preset", self.preset.as_str()),
            ("-strict", "experimental"),
        ] {
            args.push(flag.into());
            args.push(value.into());
        }
        args.push(self.output_path().into_os_string());
        args
    }
}

/// Re-encodes a downloaded file. Synchronous and not cancellable.
pub fn transcode(ffmpeg: &ToolCommand, request: &TranscodeRequest) -> Result<ArtifactEvent> {
    for input in std::iter::once(&request.video_input).chain(request.audio_input.as_ref()) {
        if !input.is_file() {
            return Err(EngineError::MissingInput(input.clone()));
        }
    }

    let output_path = std::path::absolute(request.output_path())?;
    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(
        input = %request.video_input.display(),
        output = %output_path.display(),
        codec = %request.codec,
        "transcoding"
    );

    let output = ffmpeg
        .command()
        .args(request.args())
        .output()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => EngineError::ExternalToolMissing {
                tool: "ffmpeg".to_string(),
            },
            _ => EngineError::SpawnFailed {
                tool: "ffmpeg".to_string(),
                source: e,
            },
        })?;

    if !output.status.success() {
        return Err(EngineError::ExternalToolFailed {
            tool: "ffmpeg".to_string(),
            code: output.status.code(),
            detail: stderr_tail(&output.stderr),
        });
    }

    processed_artifact(&output_path)
}

fn processed_artifact(output_path: &Path) -> Result<ArtifactEvent> {
    let absolute = std::path::absolute(output_path)?;
    let normalized = normalize_lexically(&to_forward_slashes(&absolute.to_string_lossy()));
    let (directory, file_name) = split_file_name(&normalized);
    Ok(ArtifactEvent {
        file_name: nfc(&file_name),
        directory: nfc(&directory),
        kind: ArtifactKind::ProcessedClip,
    })
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}
