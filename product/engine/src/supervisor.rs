//! Download-process supervision.
//!
//! A [`ProcessSupervisor`] runs one extraction-tool process at a time on a
//! dedicated worker thread, classifies its merged stdout/stderr line by line
//! and delivers [`DownloadEvent`]s to a [`DownloadListener`]. Every run ends
//! with exactly one `Finished` event.

use crate::ffmpeg::{self, TranscodeRequest};
use crate::lines::OutputParser;
use crate::models::{ArtifactEvent, DownloadEvent, DownloadRequest, RunOutcome};
use crate::tools::{ResolvedTools, Tool, ToolCommand};
use crate::{cmd, ytdlp, EngineError, Result};
use std::path::PathBuf;
use std::process::{Child, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use uuid::Uuid;

const LINE_POLL_INTERVAL_MS: u64 = 100;
const DEFAULT_TERMINATE_GRACE_SECS: u64 = 3;
const WORKER_PANICKED: &str = "download worker panicked";

/// Receives events from the worker thread. Implementations must not assume
/// any particular calling thread.
pub trait DownloadListener: Send + Sync {
    fn on_event(&self, event: DownloadEvent);
}

impl DownloadListener for mpsc::Sender<DownloadEvent> {
    fn on_event(&self, event: DownloadEvent) {
        let _ = self.send(event);
    }
}

#[derive(Debug, Default)]
struct SharedState {
    running: AtomicBool,
    /// Stop flag of the active run only; each run gets a fresh one.
    active_stop: Mutex<Option<Arc<AtomicBool>>>,
}

impl SharedState {
    fn active_stop(&self) -> MutexGuard<'_, Option<Arc<AtomicBool>>> {
        self.active_stop
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Owned by the worker thread for the whole run. On drop it guarantees the
/// listener saw a terminal event (even if the worker panicked) and then
/// releases the supervisor's single run slot.
struct RunSlot {
    shared: Arc<SharedState>,
    stop: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    listener: Arc<dyn DownloadListener>,
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        if !self.finished.swap(true, Ordering::SeqCst) {
            self.listener.on_event(DownloadEvent::Finished(RunOutcome::Failed(
                WORKER_PANICKED.to_string(),
            )));
        }
        {
            let mut active = self.shared.active_stop();
            if active.as_ref().is_some_and(|flag| Arc::ptr_eq(flag, &self.stop)) {
                *active = None;
            }
        }
        self.shared.running.store(false, Ordering::SeqCst);
    }
}

/// Cloneable cancellation handle for one run, usable from signal handlers.
/// Requests made after the run ended have no effect on later runs.
#[derive(Debug, Clone)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct RunHandle {
    run_id: String,
    stop: Arc<AtomicBool>,
    worker: JoinHandle<RunOutcome>,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Requests cancellation. The worker observes it before the next line.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_token(&self) -> StopToken {
        StopToken(self.stop.clone())
    }

    pub fn wait(self) -> RunOutcome {
        self.worker
            .join()
            .unwrap_or_else(|_| RunOutcome::Failed(WORKER_PANICKED.to_string()))
    }
}

#[derive(Debug)]
pub struct ProcessSupervisor {
    tools: ResolvedTools,
    shared: Arc<SharedState>,
    terminate_grace: Duration,
}

impl ProcessSupervisor {
    pub fn new(tools: ResolvedTools) -> Self {
        Self {
            tools,
            shared: Arc::new(SharedState::default()),
            terminate_grace: Duration::from_secs(DEFAULT_TERMINATE_GRACE_SECS),
        }
    }

    /// How long a terminated child may take to exit before it is force-killed.
    pub fn with_terminate_grace(mut self, grace: Duration) -> Self {
        self.terminate_grace = grace;
        self
    }

    pub fn tools(&self) -> &ResolvedTools {
        &self.tools
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Stops the active run, if any.
    pub fn stop(&self) {
        if let Some(flag) = self.shared.active_stop().as_ref() {
            flag.store(true, Ordering::SeqCst);
        }
    }

    /// Starts a run on a worker thread and returns immediately.
    ///
    /// Fails with [`EngineError::AlreadyRunning`] while a previous run is
    /// active, and with [`EngineError::InvalidRequest`] before anything is
    /// spawned. Process failures are reported through the listener.
    pub fn start(
        &self,
        mut request: DownloadRequest,
        listener: Arc<dyn DownloadListener>,
    ) -> Result<RunHandle> {
        request.validate()?;
        request.destination_dir = std::path::absolute(&request.destination_dir)?;

        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::AlreadyRunning);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        *self.shared.active_stop() = Some(stop.clone());
        let slot = RunSlot {
            shared: self.shared.clone(),
            stop: stop.clone(),
            finished: finished.clone(),
            listener: listener.clone(),
        };

        let run_id = Uuid::new_v4().to_string();
        let worker = RunWorker {
            run_id: run_id.clone(),
            ytdlp: self.tools.ytdlp.clone(),
            ffmpeg_dir: self
                .tools
                .ffmpeg
                .as_ref()
                .and_then(|f| f.parent_dir().map(|p| p.to_path_buf())),
            request,
            listener,
            stop: stop.clone(),
            finished,
            terminate_grace: self.terminate_grace,
        };

        let handle = thread::Builder::new()
            .name(format!("mduyt-download-{}", &run_id[..8]))
            .spawn(move || {
                let _slot = slot;
                worker.run()
            })?;

        Ok(RunHandle {
            run_id,
            stop,
            worker: handle,
        })
    }

    /// Blocking form of [`ProcessSupervisor::start`].
    pub fn run(
        &self,
        request: DownloadRequest,
        listener: Arc<dyn DownloadListener>,
    ) -> Result<RunOutcome> {
        Ok(self.start(request, listener)?.wait())
    }

    /// Post-processes a downloaded file with the resolved transcoder.
    pub fn transcode(&self, request: &TranscodeRequest) -> Result<ArtifactEvent> {
        let ffmpeg = self
            .tools
            .ffmpeg
            .as_ref()
            .ok_or_else(|| EngineError::ExternalToolMissing {
                tool: Tool::Ffmpeg.label().to_string(),
            })?;
        ffmpeg::transcode(ffmpeg, request)
    }
}

struct RunWorker {
    run_id: String,
    ytdlp: ToolCommand,
    ffmpeg_dir: Option<PathBuf>,
    request: DownloadRequest,
    listener: Arc<dyn DownloadListener>,
    stop: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    terminate_grace: Duration,
}

impl RunWorker {
    fn run(self) -> RunOutcome {
        tracing::info!(run_id = %self.run_id, url = %self.request.url, "download started");
        let outcome = match self.supervise() {
            Ok(outcome) => outcome,
            Err(err) => RunOutcome::Failed(err.to_string()),
        };
        match &outcome {
            RunOutcome::Completed => tracing::info!(run_id = %self.run_id, "download completed"),
            RunOutcome::Cancelled => tracing::info!(run_id = %self.run_id, "download cancelled"),
            RunOutcome::Failed(message) => {
                tracing::warn!(run_id = %self.run_id, error = %message, "download failed")
            }
        }
        self.finished.store(true, Ordering::SeqCst);
        self.listener.on_event(DownloadEvent::Finished(outcome.clone()));
        outcome
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn supervise(&self) -> Result<RunOutcome> {
        let tool = Tool::YtDlp.label();

        // Both streams share one pipe so lines arrive in the order written.
        let (reader, writer) = std::io::pipe()?;
        let mut command = self.ytdlp.command();
        command
            .args(ytdlp::download_args(&self.request, self.ffmpeg_dir.as_deref()))
            .stdin(Stdio::null())
            .stdout(writer.try_clone()?)
            .stderr(writer);
        let spawned = command.spawn();
        // The command keeps the parent's write ends open until dropped.
        drop(command);
        let mut child = spawned.map_err(|e| EngineError::SpawnFailed {
            tool: tool.to_string(),
            source: e,
        })?;

        let (tx, rx) = mpsc::channel();
        if let Err(err) = cmd::spawn_line_reader("output", reader, tx) {
            cmd::terminate_child(&mut child, self.terminate_grace);
            return Err(err.into());
        }

        let mut parser = OutputParser::new(self.request.mode, &self.request.destination_dir);
        loop {
            if self.stop_requested() {
                return Ok(self.cancel(&mut child));
            }
            let line = match rx.recv_timeout(Duration::from_millis(LINE_POLL_INTERVAL_MS)) {
                Ok(Ok(line)) => line,
                Ok(Err(err)) => {
                    cmd::terminate_child(&mut child, self.terminate_grace);
                    return Err(EngineError::Io(err));
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            if self.stop_requested() {
                return Ok(self.cancel(&mut child));
            }
            self.dispatch(&mut parser, &line);
        }

        let status = child.wait()?;
        if self.stop_requested() {
            return Ok(RunOutcome::Cancelled);
        }
        if status.success() {
            return Ok(RunOutcome::Completed);
        }
        Err(EngineError::ExternalToolFailed {
            tool: tool.to_string(),
            code: status.code(),
            detail: String::new(),
        })
    }

    fn dispatch(&self, parser: &mut OutputParser, line: &str) {
        let Some(event) = parser.feed(line) else {
            return;
        };
        if let DownloadEvent::Output(raw) = &event {
            tracing::debug!(run_id = %self.run_id, line = %raw, "unclassified output");
        }
        self.listener.on_event(event);
    }

    fn cancel(&self, child: &mut Child) -> RunOutcome {
        if cmd::terminate_child(child, self.terminate_grace) {
            tracing::warn!(
                run_id = %self.run_id,
                grace_ms = self.terminate_grace.as_millis() as u64,
                "child ignored terminate request; force-killed"
            );
        }
        RunOutcome::Cancelled
    }
}
