use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use clap::{Parser, Subcommand};
use mduyt_engine::config::{self, DownloaderSettings};
use mduyt_engine::ffmpeg::{TranscodeRequest, VideoEncoder};
use mduyt_engine::history::HistoryStore;
use mduyt_engine::models::{AudioFormat, DownloadEvent, MediaMode, RunOutcome};
use mduyt_engine::paths::AppPaths;
use mduyt_engine::supervisor::ProcessSupervisor;
use mduyt_engine::tools::{self, Tool};

#[derive(Parser)]
#[command(name = "mduyt")]
#[command(version)]
#[command(about = "Download media with yt-dlp and post-process it with ffmpeg")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Data directory holding settings, history and bundled tools
    #[arg(long, global = true, value_name = "DIR")]
    base_dir: Option<PathBuf>,

    /// Log engine activity at debug level
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a URL into the configured directory
    Download {
        url: String,

        /// Extract audio in the given format (wav, mp3, m4a, flac)
        #[arg(long, value_name = "FORMAT")]
        audio: Option<String>,

        #[arg(long)]
        max_height: Option<u32>,

        #[arg(long)]
        fps: Option<u32>,

        /// Override the download directory
        #[arg(long, value_name = "DIR")]
        dest: Option<PathBuf>,

        #[arg(long)]
        playlist: bool,

        #[arg(long)]
        thumbnail: bool,
    },

    /// Re-encode a video, optionally muxing a separate audio track
    Transcode {
        video: PathBuf,
        output: PathBuf,

        #[arg(long)]
        audio: Option<PathBuf>,

        /// Encoder label or codec name (e.g. x264, h264_nvenc)
        #[arg(long)]
        encoder: Option<String>,

        #[arg(long)]
        bitrate: Option<String>,

        #[arg(long)]
        preset: Option<String>,
    },

    /// Show where yt-dlp and ffmpeg were found
    Tools,

    /// Inspect or edit the download history
    History {
        #[command(subcommand)]
        action: Option<HistoryAction>,
    },

    /// Show the stored settings, or reset them to defaults
    Config {
        #[arg(long)]
        reset: bool,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    List,
    Remove {
        index: usize,

        /// Also delete the file from disk
        #[arg(long)]
        delete_file: bool,
    },
    Clear,
}

fn main() -> Result<(), String> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let base_dir = cli
        .base_dir
        .or_else(AppPaths::default_base_dir)
        .ok_or_else(|| "could not determine base dir; pass --base-dir".to_string())?;
    let paths = AppPaths::new(base_dir);
    paths.ensure_dirs().map_err(|e| e.to_string())?;
    let settings = config::load_settings(&paths).map_err(|e| e.to_string())?;

    match cli.command {
        Commands::Download {
            url,
            audio,
            max_height,
            fps,
            dest,
            playlist,
            thumbnail,
        } => {
            let mut settings = settings;
            if let Some(format) = audio {
                settings.mode = MediaMode::Audio;
                settings.audio_format = AudioFormat::from_str(&format)
                    .ok_or_else(|| format!("unknown audio format: {format}"))?;
            }
            if max_height.is_some() {
                settings.max_height = max_height;
            }
            if fps.is_some() {
                settings.fps = fps;
            }
            if dest.is_some() {
                settings.download_dir = dest;
            }
            settings.playlist |= playlist;
            settings.embed_thumbnail |= thumbnail;
            download(&paths, &settings, url)
        }
        Commands::Transcode {
            video,
            output,
            audio,
            encoder,
            bitrate,
            preset,
        } => {
            let defaults = &settings.transcode;
            let encoder = match encoder {
                Some(value) => VideoEncoder::from_str(&value)
                    .ok_or_else(|| format!("unknown encoder: {value}"))?,
                None => defaults.encoder,
            };
            let mut request = TranscodeRequest::new(video, output).with_encoder(encoder);
            request.bitrate = bitrate.unwrap_or_else(|| defaults.bitrate.clone());
            request.preset = preset.unwrap_or_else(|| defaults.preset.clone());
            if let Some(audio) = audio {
                request = request.with_audio(audio);
            }
            transcode(&paths, &settings, &request)
        }
        Commands::Tools => {
            print_tools(&paths, &settings);
            Ok(())
        }
        Commands::History { action } => history(&paths, action.unwrap_or(HistoryAction::List)),
        Commands::Config { reset } => show_config(&paths, settings, reset),
    }
}

fn download(paths: &AppPaths, settings: &DownloaderSettings, url: String) -> Result<(), String> {
    let locator = tools::platform_locator(paths, settings.tool_dir.as_deref());
    let resolved = tools::resolve_tools(&locator).map_err(|e| e.to_string())?;
    let supervisor = ProcessSupervisor::new(resolved);
    if supervisor.tools().ffmpeg.is_none() {
        eprintln!("ffmpeg not found; format merging and audio extraction may fail");
    }
    let mut history = HistoryStore::open(paths.history_path()).map_err(|e| e.to_string())?;

    let request = settings.request_for(paths, url);
    std::fs::create_dir_all(&request.destination_dir).map_err(|e| e.to_string())?;

    let (tx, rx) = mpsc::channel::<DownloadEvent>();
    let handle = supervisor
        .start(request, Arc::new(tx))
        .map_err(|e| e.to_string())?;
    tracing::debug!(run_id = handle.run_id(), "download handle ready");

    let stop = handle.stop_token();
    let _ = ctrlc::set_handler(move || {
        eprintln!("stopping download...");
        stop.request();
    });

    let mut outcome = None;
    for event in rx {
        match event {
            DownloadEvent::Progress(p) => {
                let item = if p.total_items > 1 {
                    format!("[{}/{}] ", p.current_item, p.total_items)
                } else {
                    String::new()
                };
                eprintln!(
                    "{item}{:5.1}% of {} at {} ETA {}",
                    p.percent, p.total_size, p.speed, p.eta
                );
            }
            DownloadEvent::Artifact(artifact) => {
                println!("{} ({})", artifact.path().display(), artifact.kind.label());
                if let Err(err) = history.record_artifact(&artifact) {
                    tracing::warn!(error = %err, "failed to record history entry");
                }
            }
            DownloadEvent::Output(_) => {}
            DownloadEvent::Finished(result) => outcome = Some(result),
        }
    }

    let _ = handle.wait();
    match outcome {
        Some(RunOutcome::Completed) => Ok(()),
        Some(RunOutcome::Cancelled) => {
            eprintln!("download cancelled");
            Ok(())
        }
        Some(RunOutcome::Failed(message)) => Err(message),
        None => Err("download ended without a result".to_string()),
    }
}

fn transcode(
    paths: &AppPaths,
    settings: &DownloaderSettings,
    request: &TranscodeRequest,
) -> Result<(), String> {
    let locator = tools::platform_locator(paths, settings.tool_dir.as_deref());
    let resolved = tools::resolve_tools(&locator).map_err(|e| e.to_string())?;
    let supervisor = ProcessSupervisor::new(resolved);
    let artifact = supervisor.transcode(request).map_err(|e| e.to_string())?;

    println!("{}", artifact.path().display());
    let mut history = HistoryStore::open(paths.history_path()).map_err(|e| e.to_string())?;
    history.record_artifact(&artifact).map_err(|e| e.to_string())?;
    Ok(())
}

fn print_tools(paths: &AppPaths, settings: &DownloaderSettings) {
    let locator = tools::platform_locator(paths, settings.tool_dir.as_deref());
    for tool in [Tool::YtDlp, Tool::Ffmpeg] {
        let status = tools::tool_status(&locator, tool);
        match (&status.path, &status.version) {
            (Some(path), Some(version)) if status.available => {
                println!("{}: {version} ({path})", tool.label());
            }
            _ => {
                println!("{}: not found", tool.label());
                if let Some(hint) = &status.install_hint {
                    println!("  install with: {hint}");
                }
            }
        }
    }
}

fn history(paths: &AppPaths, action: HistoryAction) -> Result<(), String> {
    let mut store = HistoryStore::open(paths.history_path()).map_err(|e| e.to_string())?;
    match action {
        HistoryAction::List => {
            if store.records().is_empty() {
                println!("history is empty ({})", store.path().display());
            }
            for (index, record) in store.records().iter().enumerate() {
                println!(
                    "{index:>3}  {:<14} {}",
                    record.file_type.label(),
                    record.full_path().display()
                );
            }
        }
        HistoryAction::Remove { index, delete_file } => {
            let removed = store
                .remove(index, delete_file)
                .map_err(|e| format!("history entry {index}: {e}"))?;
            match removed {
                Some(record) if delete_file => {
                    println!("removed {} and deleted the file", record.filename)
                }
                Some(record) => println!("removed {}", record.filename),
                None => return Err(format!("no history entry at index {index}")),
            }
        }
        HistoryAction::Clear => {
            store.clear().map_err(|e| e.to_string())?;
            println!("history cleared");
        }
    }
    Ok(())
}

fn show_config(paths: &AppPaths, settings: DownloaderSettings, reset: bool) -> Result<(), String> {
    let settings = if reset {
        let defaults = DownloaderSettings::default();
        config::save_settings(paths, &defaults).map_err(|e| e.to_string())?;
        defaults
    } else {
        settings
    };
    let json = serde_json::to_string_pretty(&settings).map_err(|e| e.to_string())?;
    println!("# {}", paths.settings_path().display());
    println!("{json}");
    Ok(())
}
