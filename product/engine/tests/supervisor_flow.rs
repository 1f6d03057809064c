#![cfg(unix)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use mduyt_engine::models::{
    ArtifactKind, AudioFormat, DownloadEvent, DownloadRequest, RunOutcome,
};
use mduyt_engine::supervisor::{DownloadListener, ProcessSupervisor};
use mduyt_engine::tools::{ResolvedTools, ToolCommand};
use mduyt_engine::EngineError;

const URL: &str = "https://www.youtube.com/watch?v=abc123";

fn scripted(script: &str) -> ProcessSupervisor {
    let tools = ResolvedTools {
        ytdlp: ToolCommand::with_prefix("sh", ["-c", script, "yt-dlp"]),
        ffmpeg: None,
    };
    ProcessSupervisor::new(tools).with_terminate_grace(Duration::from_millis(500))
}

fn collect(
    supervisor: &ProcessSupervisor,
    request: DownloadRequest,
) -> (RunOutcome, Vec<DownloadEvent>) {
    let (tx, rx) = mpsc::channel::<DownloadEvent>();
    let outcome = supervisor.run(request, Arc::new(tx)).expect("start");
    (outcome, rx.iter().collect())
}

#[test]
fn playlist_run_reports_progress_artifact_and_completion() {
    let dir = tempfile::tempdir().expect("tempdir");
    let supervisor = scripted(
        "echo '[youtube] abc123: Downloading webpage'
         echo '[download] Downloading item 2 of 3'
         echo '[download]  42.0% of 10.00MiB at  1.00MiB/s ETA 00:05'
         echo '[download] Destination: clip.mp4'
         echo '[download] 100% of 10.00MiB in 00:10'",
    );

    let (outcome, events) = collect(&supervisor, DownloadRequest::video(URL, dir.path()));
    assert_eq!(outcome, RunOutcome::Completed);

    assert!(matches!(&events[0], DownloadEvent::Output(line) if line.contains("[youtube]")));
    match &events[1] {
        DownloadEvent::Progress(p) => {
            assert_eq!(p.percent, 42.0);
            assert_eq!(p.total_size, "10.00MiB");
            assert_eq!(p.speed, "1.00MiB/s");
            assert_eq!(p.eta, "00:05");
            assert_eq!((p.current_item, p.total_items), (2, 3));
        }
        other => panic!("expected progress, got {other:?}"),
    }
    match &events[2] {
        DownloadEvent::Artifact(a) => {
            assert_eq!(a.file_name, "clip.mp4");
            assert_eq!(a.kind, ArtifactKind::Video);
            assert_eq!(a.path(), dir.path().join("clip.mp4"));
        }
        other => panic!("expected artifact, got {other:?}"),
    }
    assert!(matches!(&events[3], DownloadEvent::Progress(p) if p.percent == 100.0));
    assert_eq!(
        events.last(),
        Some(&DownloadEvent::Finished(RunOutcome::Completed))
    );
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(!supervisor.is_running());
}

#[test]
fn audio_extraction_destination_is_audio_artifact() {
    let dir = tempfile::tempdir().expect("tempdir");
    let supervisor = scripted("echo '[ExtractAudio] Destination: song.webm'");

    let request = DownloadRequest::audio(URL, dir.path(), AudioFormat::Mp3);
    let (outcome, events) = collect(&supervisor, request);
    assert_eq!(outcome, RunOutcome::Completed);
    assert!(matches!(
        &events[0],
        DownloadEvent::Artifact(a) if a.kind == ArtifactKind::Audio && a.file_name == "song.webm"
    ));
}

#[test]
fn non_zero_exit_fails_with_exit_code() {
    let dir = tempfile::tempdir().expect("tempdir");
    let supervisor = scripted("echo 'ERROR: Unsupported URL'; exit 1");

    let (outcome, events) = collect(&supervisor, DownloadRequest::video(URL, dir.path()));
    let expected = RunOutcome::Failed("yt-dlp exited with code 1".to_string());
    assert_eq!(outcome, expected);
    assert_eq!(events.last(), Some(&DownloadEvent::Finished(expected)));
    assert!(!events
        .iter()
        .any(|e| *e == DownloadEvent::Finished(RunOutcome::Completed)));
}

#[test]
fn missing_program_fails_without_panicking() {
    let dir = tempfile::tempdir().expect("tempdir");
    let tools = ResolvedTools {
        ytdlp: ToolCommand::new(dir.path().join("no-such-yt-dlp")),
        ffmpeg: None,
    };
    let supervisor = ProcessSupervisor::new(tools);

    let (tx, rx) = mpsc::channel::<DownloadEvent>();
    let outcome = supervisor
        .run(DownloadRequest::video(URL, dir.path()), Arc::new(tx))
        .expect("start");
    match outcome {
        RunOutcome::Failed(message) => assert!(message.contains("could not be started")),
        other => panic!("expected failure, got {other:?}"),
    }
    let events: Vec<_> = rx.iter().collect();
    assert_eq!(events.len(), 1);
    assert!(events[0].is_terminal());
}

/// Records each event together with whether the test had already asked the
/// run to stop when the event was delivered.
struct StopAwareListener {
    stop_sent: AtomicBool,
    events: Mutex<Vec<(bool, DownloadEvent)>>,
    delivered: Mutex<mpsc::Sender<()>>,
}

impl DownloadListener for StopAwareListener {
    fn on_event(&self, event: DownloadEvent) {
        let after_stop = self.stop_sent.load(Ordering::SeqCst);
        self.events.lock().expect("events").push((after_stop, event));
        let _ = self.delivered.lock().expect("delivered").send(());
    }
}

#[test]
fn stop_sends_terminate_and_reports_cancelled() {
    let dir = tempfile::tempdir().expect("tempdir");
    let marker = dir.path().join("got-term");
    let script = format!(
        "trap 'echo term > \"{}\"; exit 0' TERM
         while true; do
           echo '[download]  10.0% of 1.00MiB at 1.00KiB/s ETA 16:40'
           sleep 0.05
         done",
        marker.display()
    );
    let supervisor = scripted(&script).with_terminate_grace(Duration::from_secs(5));

    let (delivered_tx, delivered_rx) = mpsc::channel();
    let listener = Arc::new(StopAwareListener {
        stop_sent: AtomicBool::new(false),
        events: Mutex::new(Vec::new()),
        delivered: Mutex::new(delivered_tx),
    });
    let handle = supervisor
        .start(DownloadRequest::video(URL, dir.path()), listener.clone())
        .expect("start");

    delivered_rx
        .recv_timeout(Duration::from_secs(10))
        .expect("first event");
    listener.stop_sent.store(true, Ordering::SeqCst);
    handle.stop();

    // The trap exits 0, which must still not count as a completed run.
    assert_eq!(handle.wait(), RunOutcome::Cancelled);
    assert!(marker.is_file(), "child did not receive a terminate request");

    let events = listener.events.lock().expect("events");
    let late = events
        .iter()
        .filter(|(after_stop, e)| *after_stop && !e.is_terminal())
        .count();
    assert!(late <= 1, "{late} events delivered after stop");
    assert_eq!(
        events.last().map(|(_, e)| e),
        Some(&DownloadEvent::Finished(RunOutcome::Cancelled))
    );
    assert_eq!(events.iter().filter(|(_, e)| e.is_terminal()).count(), 1);
    assert!(!supervisor.is_running());
}

#[test]
fn stop_token_of_a_finished_run_does_not_cancel_the_next() {
    let dir = tempfile::tempdir().expect("tempdir");
    let supervisor = scripted("sleep 0.5");

    let (tx, _rx) = mpsc::channel::<DownloadEvent>();
    let listener = Arc::new(tx);
    let first = supervisor
        .start(DownloadRequest::video(URL, dir.path()), listener.clone())
        .expect("first start");
    let stale = first.stop_token();
    assert_eq!(first.wait(), RunOutcome::Completed);

    let second = supervisor
        .start(DownloadRequest::video(URL, dir.path()), listener)
        .expect("second start");
    stale.request();
    assert_eq!(second.wait(), RunOutcome::Completed);
}

#[test]
fn stderr_and_stdout_lines_keep_their_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let supervisor = scripted("echo one; echo two >&2; echo three; echo four >&2");

    let (outcome, events) = collect(&supervisor, DownloadRequest::video(URL, dir.path()));
    assert_eq!(outcome, RunOutcome::Completed);
    let lines: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            DownloadEvent::Output(line) => Some(line.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(lines, vec!["one", "two", "three", "four"]);
}

struct PanicsOnProgress {
    finished: Mutex<Vec<RunOutcome>>,
}

impl DownloadListener for PanicsOnProgress {
    fn on_event(&self, event: DownloadEvent) {
        match event {
            DownloadEvent::Progress(_) => panic!("listener failure"),
            DownloadEvent::Finished(outcome) => {
                self.finished.lock().expect("finished").push(outcome)
            }
            _ => {}
        }
    }
}

#[test]
fn worker_panic_still_delivers_one_terminal_event() {
    let dir = tempfile::tempdir().expect("tempdir");
    let supervisor = scripted("echo '[download]  50.0% of 1.00MiB'");
    let listener = Arc::new(PanicsOnProgress {
        finished: Mutex::new(Vec::new()),
    });

    let outcome = supervisor
        .run(DownloadRequest::video(URL, dir.path()), listener.clone())
        .expect("start");
    assert!(matches!(outcome, RunOutcome::Failed(ref m) if m.contains("panicked")));

    let finished = listener.finished.lock().expect("finished");
    assert_eq!(finished.len(), 1);
    assert!(matches!(&finished[0], RunOutcome::Failed(m) if m.contains("panicked")));
    assert!(!supervisor.is_running());
}

#[test]
fn second_start_is_rejected_while_running() {
    let dir = tempfile::tempdir().expect("tempdir");
    let supervisor = scripted("exec sleep 30");

    let (tx, _rx) = mpsc::channel::<DownloadEvent>();
    let listener = Arc::new(tx);
    let handle = supervisor
        .start(DownloadRequest::video(URL, dir.path()), listener.clone())
        .expect("first start");
    assert!(supervisor.is_running());

    let second = supervisor.start(DownloadRequest::video(URL, dir.path()), listener);
    assert!(matches!(second, Err(EngineError::AlreadyRunning)));

    supervisor.stop();
    assert_eq!(handle.wait(), RunOutcome::Cancelled);
    assert!(!supervisor.is_running());
}

#[test]
fn invalid_request_is_rejected_before_spawning() {
    let dir = tempfile::tempdir().expect("tempdir");
    let supervisor = scripted("exit 0");
    let (tx, _rx) = mpsc::channel::<DownloadEvent>();

    let missing_dir = DownloadRequest::video(URL, dir.path().join("absent"));
    assert!(matches!(
        supervisor.start(missing_dir, Arc::new(tx.clone())),
        Err(EngineError::InvalidRequest(_))
    ));

    let empty_url = DownloadRequest::video("  ", dir.path());
    assert!(matches!(
        supervisor.start(empty_url, Arc::new(tx)),
        Err(EngineError::InvalidRequest(_))
    ));
    assert!(!supervisor.is_running());
}
