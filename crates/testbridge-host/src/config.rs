//! Session configuration.
//!
//! Defaults can be overridden from the environment:
//!
//! - `TESTBRIDGE_SOCKET_DIR`: directory for listening sockets
//!   (default `$HOME/.testbridge/sockets`)
//! - `TESTBRIDGE_REQUEST_TIMEOUT_MS`: per-request timeout, `0` disables
//! - `TESTBRIDGE_READ_CHUNK_BYTES`: size of each socket read

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const READ_CHUNK_BYTES: usize = 64 * 1024;
const MIN_READ_CHUNK_BYTES: usize = 1;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Label used in logs and in the default socket file name.
    pub session_id: String,
    pub socket_path: PathBuf,
    /// `None` waits for a result indefinitely.
    pub request_timeout: Option<Duration>,
    pub read_chunk_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let session_id = uuid::Uuid::new_v4().simple().to_string();
        Self {
            socket_path: socket_path_in(&default_socket_dir(), &session_id),
            session_id,
            request_timeout: None,
            read_chunk_bytes: READ_CHUNK_BYTES,
        }
    }
}

impl SessionConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = env::var("TESTBRIDGE_SOCKET_DIR") {
            if !dir.is_empty() {
                config.socket_path = socket_path_in(Path::new(&dir), &config.session_id);
            }
        }

        if let Some(ms) = env::var("TESTBRIDGE_REQUEST_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.request_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }

        if let Some(bytes) = env::var("TESTBRIDGE_READ_CHUNK_BYTES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
        {
            config.read_chunk_bytes = bytes.max(MIN_READ_CHUNK_BYTES);
        }

        config
    }

    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = path.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_read_chunk_bytes(mut self, bytes: usize) -> Self {
        self.read_chunk_bytes = bytes.max(MIN_READ_CHUNK_BYTES);
        self
    }
}

fn default_socket_dir() -> PathBuf {
    let home = env::var("HOME").unwrap_or_else(|_| "/".to_string());
    PathBuf::from(home).join(".testbridge").join("sockets")
}

fn socket_path_in(dir: &Path, session_id: &str) -> PathBuf {
    dir.join(format!("{session_id}.sock"))
}
