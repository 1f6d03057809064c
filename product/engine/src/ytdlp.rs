use crate::models::{DownloadRequest, MediaMode};
use std::ffi::OsString;
use std::path::Path;
use url::Url;

const SINGLE_OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";
const PLAYLIST_OUTPUT_TEMPLATE: &str = "%(playlist_title)s/%(title)s.%(ext)s";

fn host_from_url(url: &str) -> Option<String> {
    Url::parse(url.trim())
        .ok()?
        .host_str()
        .map(|h| h.to_ascii_lowercase())
}

/// Whether resolution and frame-rate caps are meaningful for this URL.
pub fn is_recognized_platform(url: &str) -> bool {
    let host = match host_from_url(url) {
        Some(v) => v,
        None => return false,
    };

    host == "youtube.com"
        || host == "youtu.be"
        || host.ends_with(".youtube.com")
        || host.ends_with(".youtu.be")
}

pub fn format_selector(max_height: Option<u32>, fps: Option<u32>) -> String {
    let mut video = String::from("bestvideo");
    if let Some(height) = max_height {
        video.push_str(&format!("[height<={height}]"));
    }
    if let Some(fps) = fps {
        video.push_str(&format!("[fps<={fps}]"));
    }
    format!("{video}[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best")
}

/// Arguments for one extraction-tool run, excluding the program itself.
///
/// `ffmpeg_dir` is forwarded so post-processing uses the same transcoder the
/// engine resolved.
pub fn download_args(request: &DownloadRequest, ffmpeg_dir: Option<&Path>) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["--no-mtime".into(), "--newline".into()];

    if let Some(dir) = ffmpeg_dir {
        let mut location = OsString::from("--ffmpeg-location=");
        location.push(dir.as_os_str());
        args.push(location);
    }

    args.push("-P".into());
    args.push(request.destination_dir.as_os_str().to_os_string());

    args.push("--output".into());
    args.push(if request.playlist {
        PLAYLIST_OUTPUT_TEMPLATE.into()
    } else {
        SINGLE_OUTPUT_TEMPLATE.into()
    });

    if request.embed_thumbnail {
        args.push("--embed-thumbnail".into());
        args.push("--embed-metadata".into());
    }

    match request.mode {
        MediaMode::Audio => {
            args.push("-x".into());
            args.push("--audio-format".into());
            args.push(request.audio_format.as_str().into());
        }
        MediaMode::Video => {
            if is_recognized_platform(&request.url) {
                args.push("-f".into());
                args.push(format_selector(request.max_height, request.fps).into());
            }
        }
    }

    args.push(if request.playlist {
        "--yes-playlist".into()
    } else {
        "--no-playlist".into()
    });

    // Keep URLs that start with '-' from being read as options.
    args.push("--".into());
    args.push(request.url.trim().into());
    args
}
