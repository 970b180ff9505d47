//! Reusable test harness for testbridge-host integration tests.
//!
//! Spawns the binary against a temp socket and plays the runner side of
//! the protocol over a blocking Unix socket.

use std::collections::VecDeque;
use std::fs;
use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::time::{Duration, Instant};

use serde_json::Value;
use testbridge::frame::{encode_frame, FrameDecoder, RawFrame};
use testbridge::session::decode_message;

// ── HostHandle ──────────────────────────────────────────────────────

/// Handle to a running testbridge-host process. Kills it on drop.
pub struct HostHandle {
    child: Option<Child>,
    pub socket_path: PathBuf,
    pub dir: tempfile::TempDir,
}

impl HostHandle {
    pub fn pid(&self) -> u32 {
        self.child.as_ref().map(Child::id).unwrap_or_default()
    }

    /// Wait for the process to exit and collect its output.
    pub fn finish(mut self) -> io::Result<Output> {
        let child = self
            .child
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "already finished"))?;
        wait_with_deadline(child, Duration::from_secs(10))
    }
}

impl Drop for HostHandle {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        let _ = fs::remove_file(&self.socket_path);
    }
}

fn wait_with_deadline(mut child: Child, timeout: Duration) -> io::Result<Output> {
    let deadline = Instant::now() + timeout;
    while child.try_wait()?.is_none() {
        if Instant::now() > deadline {
            let _ = child.kill();
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "testbridge-host did not exit in time",
            ));
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    child.wait_with_output()
}

// ── RunnerClient ────────────────────────────────────────────────────

/// The runner side of a session: reads framed requests, writes framed
/// results.
pub struct RunnerClient {
    stream: UnixStream,
    decoder: FrameDecoder,
    queued: VecDeque<RawFrame>,
}

impl RunnerClient {
    pub fn new(stream: UnixStream) -> Self {
        stream.set_read_timeout(Some(Duration::from_secs(5))).ok();
        Self {
            stream,
            decoder: FrameDecoder::new(),
            queued: VecDeque::new(),
        }
    }

    /// Next request from the host as `(correlation id, body)`. `None` on
    /// timeout or disconnect.
    pub fn recv_request(&mut self) -> Option<(String, Value)> {
        loop {
            if let Some(frame) = self.queued.pop_front() {
                let message = decode_message(&frame).ok()??;
                return Some((message.correlation_id, message.body));
            }

            let mut buf = [0u8; 4096];
            match self.stream.read(&mut buf) {
                Ok(0) => return None,
                Ok(n) => {
                    let frames = self.decoder.push(buf[..n].to_vec());
                    self.queued.extend(frames);
                }
                Err(_) => return None,
            }
        }
    }

    pub fn send_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes)?;
        self.stream.flush()
    }

    pub fn send_result(&mut self, correlation_id: &str, body: &Value) -> io::Result<()> {
        self.send_raw(&encode_frame(correlation_id, body.to_string().as_bytes()))
    }

    /// Write `bytes` in `size`-byte pieces with a pause between them so
    /// the host sees separate reads.
    pub fn send_chunked(&mut self, bytes: &[u8], size: usize) -> io::Result<()> {
        for piece in bytes.chunks(size.max(1)) {
            self.send_raw(piece)?;
            std::thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }
}

// ── Spawn helpers ───────────────────────────────────────────────────

/// Spawn testbridge-host with `args` after `--socket <tmp>`. Returns once
/// the socket is ready to connect.
pub fn spawn_host(args: &[&str]) -> io::Result<HostHandle> {
    let handle = spawn_host_unready(args)?;
    wait_for_socket(&handle.socket_path)?;
    Ok(handle)
}

/// Like [`spawn_host`] but returns immediately, for hosts that may exit
/// before a runner could connect.
pub fn spawn_host_unready(args: &[&str]) -> io::Result<HostHandle> {
    let dir = tempfile::tempdir()?;
    let socket_path = dir.path().join("sockets").join("host.sock");

    let child = Command::new(env!("CARGO_BIN_EXE_testbridge-host"))
        .arg("--socket")
        .arg(&socket_path)
        .args(args)
        .env("HOME", dir.path())
        .env("RUST_LOG", "info")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    Ok(HostHandle {
        child: Some(child),
        socket_path,
        dir,
    })
}

fn wait_for_socket(path: &Path) -> io::Result<()> {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !path.exists() {
        if Instant::now() > deadline {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "Socket did not appear within 5 seconds",
            ));
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    Ok(())
}

/// Connect to the host's socket as the runner.
pub fn connect(socket_path: &Path) -> io::Result<RunnerClient> {
    let stream = UnixStream::connect(socket_path)?;
    Ok(RunnerClient::new(stream))
}

/// Parse the single JSON line the host prints on success.
pub fn stdout_json(output: &Output) -> Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout.lines().last().unwrap_or_default();
    serde_json::from_str(line).unwrap_or_else(|e| panic!("bad stdout {stdout:?}: {e}"))
}

pub fn stderr_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}
