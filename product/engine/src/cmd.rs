use std::ffi::OsStr;
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command};
use std::sync::mpsc::Sender;
use std::thread;
use std::time::{Duration, Instant};

const TERMINATE_POLL_INTERVAL_MS: u64 = 50;

pub fn command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    configure_for_background(&mut cmd);
    cmd
}

#[cfg(windows)]
fn configure_for_background(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;

    // Prevent console windows from stealing focus on Windows while running tools.
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn configure_for_background(_cmd: &mut Command) {}

/// Forwards every line of `pipe` into `tx` from a detached reader thread.
///
/// Bytes are decoded lossily and trailing `\r`/`\n` are stripped. The thread
/// exits at end of stream or once the receiving side has gone away.
pub fn spawn_line_reader<R>(
    name: &str,
    pipe: R,
    tx: Sender<std::io::Result<String>>,
) -> std::io::Result<()>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name(format!("mduyt-{name}-reader"))
        .spawn(move || {
            let mut reader = BufReader::new(pipe);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf)
                            .trim_end_matches(['\r', '\n'])
                            .to_string();
                        if tx.send(Ok(line)).is_err() {
                            break;
                        }
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(err) => {
                        let _ = tx.send(Err(err));
                        break;
                    }
                }
            }
        })?;
    Ok(())
}

/// Asks the child to exit, then force-kills it if it is still alive after `grace`.
///
/// Returns `true` when the child had to be force-killed.
pub fn terminate_child(child: &mut Child, grace: Duration) -> bool {
    if matches!(child.try_wait(), Ok(Some(_))) {
        return false;
    }

    if !request_terminate(child) {
        let _ = child.kill();
        let _ = child.wait();
        return true;
    }

    let started = Instant::now();
    while started.elapsed() < grace {
        match child.try_wait() {
            Ok(Some(_)) => return false,
            Ok(None) => thread::sleep(Duration::from_millis(TERMINATE_POLL_INTERVAL_MS)),
            Err(_) => break,
        }
    }

    let _ = child.kill();
    let _ = child.wait();
    true
}

#[cfg(windows)]
fn request_terminate(child: &Child) -> bool {
    let pid = child.id().to_string();
    command("taskkill")
        .args(["/PID", &pid, "/T"])
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(not(windows))]
fn request_terminate(child: &Child) -> bool {
    let pid = child.id().to_string();
    command("kill")
        .args(["-TERM", &pid])
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
