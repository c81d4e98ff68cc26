use crate::{EngineError, Result};
use std::ffi::OsStr;
use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL_MS: u64 = 50;

/// Options for one external tool run. A `timeout_secs` of 0 means no limit.
#[derive(Debug, Default, Clone)]
pub struct RunOptions {
    pub timeout_secs: u64,
    pub cancel: Option<Arc<AtomicBool>>,
}

#[derive(Debug)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Builds a command that will not flash a console window on Windows.
pub fn background_command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    configure_for_background(&mut cmd);
    cmd
}

#[cfg(windows)]
fn configure_for_background(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;

    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn configure_for_background(_cmd: &mut Command) {}

enum StreamLine {
    Out(String),
    Err(String),
}

/// Runs an external tool to completion, streaming its output incrementally.
///
/// Arguments are always passed as a vector on the prepared `cmd`; nothing is
/// ever routed through a shell. Each stdout/stderr segment (split on `\n` or
/// `\r`, since ffmpeg rewrites its progress line with bare carriage returns)
/// is offered to the matching callback before being buffered. Non-zero exit
/// fails with the tool's last non-empty stderr line as the diagnostic.
pub fn run_tool(
    tool: &str,
    cmd: &mut Command,
    options: &RunOptions,
    mut on_stdout_line: Option<&mut dyn FnMut(&str)>,
    mut on_stderr_line: Option<&mut dyn FnMut(&str)>,
) -> Result<ToolOutput> {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => EngineError::ToolMissing {
            tool: tool.to_string(),
        },
        _ => EngineError::Io(e),
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("stdout pipe missing"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("stderr pipe missing"))?;

    let (tx, rx) = mpsc::channel::<StreamLine>();
    let tx_err = tx.clone();
    stream_segments(stdout, tx, StreamKind::Stdout);
    stream_segments(stderr, tx_err, StreamKind::Stderr);

    let started = Instant::now();
    let mut stdout_buf = String::new();
    let mut stderr_buf = String::new();
    let mut abort: Option<EngineError> = None;

    let mut consume = |line: StreamLine, stdout_buf: &mut String, stderr_buf: &mut String| {
        match line {
            StreamLine::Out(text) => {
                if let Some(cb) = on_stdout_line.as_deref_mut() {
                    cb(&text);
                }
                stdout_buf.push_str(&text);
                stdout_buf.push('\n');
            }
            StreamLine::Err(text) => {
                if let Some(cb) = on_stderr_line.as_deref_mut() {
                    cb(&text);
                }
                stderr_buf.push_str(&text);
                stderr_buf.push('\n');
            }
        }
    };

    loop {
        while let Ok(line) = rx.try_recv() {
            consume(line, &mut stdout_buf, &mut stderr_buf);
        }

        if abort.is_none() {
            if let Some(cancel) = options.cancel.as_ref() {
                if cancel.load(Ordering::SeqCst) {
                    kill_child_process_tree(&mut child);
                    abort = Some(EngineError::Canceled);
                }
            }
        }
        if abort.is_none()
            && options.timeout_secs > 0
            && started.elapsed() >= Duration::from_secs(options.timeout_secs)
        {
            kill_child_process_tree(&mut child);
            abort = Some(EngineError::ToolTimeout {
                tool: tool.to_string(),
                seconds: options.timeout_secs,
            });
        }

        match child.try_wait() {
            Ok(Some(status)) => {
                // Readers drop their senders at EOF; drain everything left.
                for line in rx {
                    consume(line, &mut stdout_buf, &mut stderr_buf);
                }
                if let Some(err) = abort {
                    return Err(err);
                }
                if !status.success() {
                    return Err(EngineError::ToolFailed {
                        tool: tool.to_string(),
                        code: status.code(),
                        stderr: last_nonempty_line(&stderr_buf),
                    });
                }
                return Ok(ToolOutput {
                    stdout: stdout_buf,
                    stderr: stderr_buf,
                });
            }
            Ok(None) => thread::sleep(Duration::from_millis(POLL_INTERVAL_MS)),
            Err(err) => {
                kill_child_process_tree(&mut child);
                return Err(EngineError::Io(err));
            }
        }
    }
}

#[derive(Clone, Copy)]
enum StreamKind {
    Stdout,
    Stderr,
}

fn stream_segments<R: Read + Send + 'static>(
    mut source: R,
    tx: mpsc::Sender<StreamLine>,
    kind: StreamKind,
) {
    thread::spawn(move || {
        let wrap = |text: String| match kind {
            StreamKind::Stdout => StreamLine::Out(text),
            StreamKind::Stderr => StreamLine::Err(text),
        };
        let mut pending: Vec<u8> = Vec::new();
        let mut buf = [0_u8; 4096];
        loop {
            let read = match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(_) => break,
            };
            pending.extend_from_slice(&buf[..read]);
            while let Some(pos) = pending.iter().position(|b| *b == b'\n' || *b == b'\r') {
                let segment: Vec<u8> = pending.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&segment[..pos]).into_owned();
                if tx.send(wrap(text)).is_err() {
                    return;
                }
            }
        }
        if !pending.is_empty() {
            let _ = tx.send(wrap(String::from_utf8_lossy(&pending).into_owned()));
        }
    });
}

fn kill_child_process_tree(child: &mut std::process::Child) {
    #[cfg(windows)]
    {
        let pid = child.id().to_string();
        let _ = background_command("taskkill")
            .args(["/PID", &pid, "/T", "/F"])
            .status();
    }

    let _ = child.kill();
    let _ = child.wait();
}

fn last_nonempty_line(text: &str) -> String {
    text.lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_maps_to_tool_missing() {
        let mut cmd = background_command("definitely-not-a-real-binary-5481");
        let err = run_tool("ghost", &mut cmd, &RunOptions::default(), None, None)
            .expect_err("should fail");
        assert!(matches!(err, EngineError::ToolMissing { tool } if tool == "ghost"));
    }

    #[cfg(unix)]
    #[test]
    fn captures_stdout_and_streams_lines() {
        let mut seen: Vec<String> = Vec::new();
        let mut cmd = background_command("sh");
        cmd.args(["-c", "echo one; echo two"]);
        let output = run_tool(
            "sh",
            &mut cmd,
            &RunOptions::default(),
            Some(&mut |line: &str| seen.push(line.to_string())),
            None,
        )
        .expect("run");
        assert_eq!(seen, vec!["one".to_string(), "two".to_string()]);
        assert_eq!(output.stdout, "one\ntwo\n");
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_carries_last_stderr_line() {
        let mut cmd = background_command("sh");
        cmd.args(["-c", "echo noise >&2; echo actual problem >&2; exit 3"]);
        let err = run_tool("sh", &mut cmd, &RunOptions::default(), None, None)
            .expect_err("should fail");
        match err {
            EngineError::ToolFailed { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "actual problem");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn timeout_kills_child_and_classifies() {
        let mut cmd = background_command("sh");
        cmd.args(["-c", "sleep 30"]);
        let options = RunOptions {
            timeout_secs: 1,
            cancel: None,
        };
        let started = Instant::now();
        let err = run_tool("sh", &mut cmd, &options, None, None).expect_err("should time out");
        assert!(matches!(err, EngineError::ToolTimeout { seconds: 1, .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn cancel_flag_stops_the_run() {
        let cancel = Arc::new(AtomicBool::new(true));
        let mut cmd = background_command("sh");
        cmd.args(["-c", "sleep 30"]);
        let options = RunOptions {
            timeout_secs: 0,
            cancel: Some(cancel),
        };
        let err = run_tool("sh", &mut cmd, &options, None, None).expect_err("should cancel");
        assert!(matches!(err, EngineError::Canceled));
    }

    #[cfg(unix)]
    #[test]
    fn carriage_return_segments_are_split() {
        let mut seen: Vec<String> = Vec::new();
        let mut cmd = background_command("sh");
        cmd.args(["-c", "printf 'a\\rb\\rc\\n' >&2"]);
        run_tool(
            "sh",
            &mut cmd,
            &RunOptions::default(),
            None,
            Some(&mut |line: &str| seen.push(line.to_string())),
        )
        .expect("run");
        assert_eq!(seen, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    }
}
