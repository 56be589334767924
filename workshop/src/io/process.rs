//! Helpers for running collaborator commands with timeouts and bounded output.

use std::io::{ErrorKind, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Last `max_bytes` of stderr, lossily decoded, for error messages.
    pub fn stderr_tail(&self, max_bytes: usize) -> String {
        let start = self.stderr.len().saturating_sub(max_bytes);
        String::from_utf8_lossy(&self.stderr[start..])
            .trim()
            .to_string()
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs, and stdin is written on
/// its own thread once the readers are attached, so the timeout also bounds a
/// child that never reads its input. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still
/// draining the pipe). A timed-out run reports no output.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        reap(&mut child);
        return Err(anyhow!("stdout/stderr were not piped"));
    };

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    // A child that never reads would block a large request write, so the
    // request is written off-thread and the timeout covers it.
    let writer = match stdin {
        Some(input) => match child.stdin.take() {
            Some(mut child_stdin) => {
                let input = input.to_vec();
                Some(thread::spawn(move || child_stdin.write_all(&input)))
            }
            None => {
                reap(&mut child);
                return Err(anyhow!("stdin was not piped"));
            }
        },
        None => None,
    };

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
        Err(e) => {
            reap(&mut child);
            return Err(e).context("wait for command");
        }
    };

    if timed_out {
        // Descendants of the killed child may still hold the pipes open, so
        // the writer and readers are left to finish on their own.
        debug!("command killed after timeout, discarding output");
        return Ok(CommandOutput {
            status,
            stdout: Vec::new(),
            stderr: Vec::new(),
            stdout_truncated: 0,
            stderr_truncated: 0,
            timed_out,
        });
    }

    if let Some(writer) = writer {
        match writer.join() {
            Ok(Ok(())) => {}
            // The child may legitimately exit without reading its request.
            Ok(Err(e)) if e.kind() == ErrorKind::BrokenPipe => {
                warn!("child closed stdin before reading the full request");
            }
            Ok(Err(e)) => return Err(e).context("write stdin"),
            Err(_) => return Err(anyhow!("stdin writer thread panicked")),
        }
    }

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

/// Kill and wait on an abandoned child so it does not linger.
fn reap(child: &mut Child) {
    if let Err(err) = child.kill() {
        debug!(err = %err, "kill abandoned child");
    }
    if let Err(err) = child.wait() {
        debug!(err = %err, "wait abandoned child");
    }
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Instant;

    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_stdout_and_feeds_stdin() {
        let output = run_command_with_timeout(
            sh("cat"),
            Some(b"{\"hello\":1}"),
            Duration::from_secs(10),
            1_000,
        )
        .expect("run");
        assert!(output.status.success());
        assert!(!output.timed_out);
        assert_eq!(output.stdout, b"{\"hello\":1}");
    }

    #[test]
    fn truncates_output_beyond_limit() {
        let output = run_command_with_timeout(
            sh("printf 'abcdefghij'"),
            None,
            Duration::from_secs(10),
            4,
        )
        .expect("run");
        assert_eq!(output.stdout, b"abcd");
        assert_eq!(output.stdout_truncated, 6);
    }

    #[test]
    fn kills_command_on_timeout() {
        let output = run_command_with_timeout(
            sh("exec sleep 5"),
            None,
            Duration::from_millis(100),
            100,
        )
        .expect("run");
        assert!(output.timed_out);
    }

    #[test]
    fn timeout_covers_a_child_that_never_reads_stdin() {
        let request = vec![b'x'; 1_000_000];
        let started = Instant::now();
        let output = run_command_with_timeout(
            sh("sleep 5"),
            Some(&request),
            Duration::from_secs(1),
            100,
        )
        .expect("run");
        assert!(output.timed_out);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn child_exiting_without_reading_stdin_is_not_an_error() {
        let request = vec![b'x'; 1_000_000];
        let output = run_command_with_timeout(
            sh("printf done"),
            Some(&request),
            Duration::from_secs(10),
            100,
        )
        .expect("run");
        assert!(output.status.success());
        assert!(!output.timed_out);
        assert_eq!(output.stdout, b"done");
    }

    #[test]
    fn stderr_tail_keeps_last_bytes() {
        let output = run_command_with_timeout(
            sh("printf 'noise then boom' >&2; exit 3"),
            None,
            Duration::from_secs(10),
            100,
        )
        .expect("run");
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.stderr_tail(4), "boom");
    }
}
