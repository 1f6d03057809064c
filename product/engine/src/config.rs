use crate::ffmpeg::VideoEncoder;
use crate::models::{AudioFormat, DownloadRequest, MediaMode};
use crate::paths::AppPaths;
use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodeSettings {
    pub encoder: VideoEncoder,
    pub bitrate: String,
    pub preset: String,
}

impl Default for TranscodeSettings {
    fn default() -> Self {
        Self {
            encoder: VideoEncoder::X264,
            bitrate: "5M".to_string(),
            preset: "fast".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderSettings {
    /// `None` falls back to [`AppPaths::default_download_dir`].
    pub download_dir: Option<PathBuf>,
    pub mode: MediaMode,
    pub audio_format: AudioFormat,
    pub max_height: Option<u32>,
    pub fps: Option<u32>,
    pub playlist: bool,
    pub embed_thumbnail: bool,
    /// Directory searched for tool binaries before the platform default.
    pub tool_dir: Option<PathBuf>,
    pub transcode: TranscodeSettings,
}

impl Default for DownloaderSettings {
    fn default() -> Self {
        Self {
            download_dir: None,
            mode: MediaMode::Video,
            audio_format: AudioFormat::Mp3,
            max_height: Some(1080),
            fps: None,
            playlist: false,
            embed_thumbnail: false,
            tool_dir: None,
            transcode: TranscodeSettings::default(),
        }
    }
}

impl DownloaderSettings {
    pub fn effective_download_dir(&self, paths: &AppPaths) -> PathBuf {
        self.download_dir
            .clone()
            .unwrap_or_else(|| paths.default_download_dir())
    }

    pub fn request_for(&self, paths: &AppPaths, url: impl Into<String>) -> DownloadRequest {
        DownloadRequest {
            url: url.into(),
            mode: self.mode,
            audio_format: self.audio_format,
            max_height: self.max_height,
            fps: self.fps,
            destination_dir: self.effective_download_dir(paths),
            playlist: self.playlist,
            embed_thumbnail: self.embed_thumbnail,
        }
    }
}

pub fn load_settings(paths: &AppPaths) -> Result<DownloaderSettings> {
    let path = paths.settings_path();
    if !path.exists() {
        return Ok(DownloaderSettings::default());
    }
    let bytes = std::fs::read(&path)?;
    let parsed: DownloaderSettings = serde_json::from_slice(&bytes).map_err(|e| {
        EngineError::InvalidSettings(format!(
            "failed to parse settings at {}: {e}",
            path.to_string_lossy()
        ))
    })?;
    Ok(parsed)
}

pub fn save_settings(paths: &AppPaths, settings: &DownloaderSettings) -> Result<()> {
    let path = paths.settings_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    std::fs::write(&path, format!("{json}\n"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        assert_eq!(load_settings(&paths).expect("load"), DownloaderSettings::default());
    }

    #[test]
    fn saved_settings_are_reloaded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        let settings = DownloaderSettings {
            mode: MediaMode::Audio,
            audio_format: AudioFormat::Flac,
            playlist: true,
            download_dir: Some(dir.path().join("music")),
            ..DownloaderSettings::default()
        };
        save_settings(&paths, &settings).expect("save");

        let raw = std::fs::read_to_string(paths.settings_path()).expect("read");
        assert!(raw.ends_with("}\n"));
        assert_eq!(load_settings(&paths).expect("load"), settings);
    }

    #[test]
    fn partial_file_fills_remaining_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        std::fs::create_dir_all(paths.config_dir()).expect("mkdir");
        std::fs::write(paths.settings_path(), r#"{ "fps": 60 }"#).expect("write");

        let loaded = load_settings(&paths).expect("load");
        assert_eq!(loaded.fps, Some(60));
        assert_eq!(loaded.max_height, Some(1080));
    }

    #[test]
    fn malformed_file_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        std::fs::create_dir_all(paths.config_dir()).expect("mkdir");
        std::fs::write(paths.settings_path(), "{ not json").expect("write");
        assert!(load_settings(&paths).is_err());
    }

    #[test]
    fn request_uses_configured_directory() {
        let paths = AppPaths::new(PathBuf::from("/base"));
        let settings = DownloaderSettings {
            download_dir: Some(PathBuf::from("/media/in")),
            embed_thumbnail: true,
            ..DownloaderSettings::default()
        };
        let request = settings.request_for(&paths, "https://youtu.be/x");
        assert_eq!(request.destination_dir, PathBuf::from("/media/in"));
        assert!(request.embed_thumbnail);
        assert_eq!(request.mode, MediaMode::Video);
    }
}
