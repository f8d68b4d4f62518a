//! Control channel between the CLI and the running daemon
//!
//! Every frame is a u32 little-endian payload length followed by that many
//! bytes of JSON. One connection carries any number of request/response
//! pairs; the CLI sends, the daemon answers in order.

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::{self, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use thiserror::Error;

mod messages;
pub use messages::{EngineRequest, EngineResponse};

use crate::constants::ipc::{MAX_MESSAGE_SIZE, SOCKET_NAME};

const HEADER_LEN: usize = 4;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Peer closed the connection")]
    Closed,

    #[error("Frame of {0} bytes exceeds the message size limit")]
    TooLarge(usize),

    #[error("Socket I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed frame payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Engine socket, under the runtime dir when the session has one
pub fn socket_path() -> Result<PathBuf> {
    dirs::runtime_dir()
        .or_else(dirs::cache_dir)
        .map(|base| base.join(SOCKET_NAME))
        .context("No runtime or cache directory to place the engine socket in")
}

/// One end of an engine connection
///
/// The CLI uses [`EngineClient::request`]; the daemon gets one per accepted
/// peer and answers with [`EngineClient::recv_request`] and
/// [`EngineClient::send_response`].
pub struct EngineClient {
    stream: UnixStream,
}

impl EngineClient {
    pub fn connect() -> Result<Self> {
        Self::connect_to(&socket_path()?)
    }

    pub fn connect_to(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path).with_context(|| {
            format!("Failed to connect to daemon at {} (is `ocr-autotyper run` running?)", path.display())
        })?;
        Ok(Self { stream })
    }

    /// Send `req` and block until the daemon answers
    pub fn request(&mut self, req: EngineRequest) -> Result<EngineResponse> {
        self.send(&req).context("Failed to send request to daemon")?;
        match self.recv() {
            Ok(resp) => Ok(resp),
            Err(FrameError::Closed) => Err(anyhow!("Daemon hung up before answering")),
            Err(e) => Err(anyhow::Error::new(e).context("Failed to read daemon response")),
        }
    }

    /// Next request from this peer; `None` once it hangs up between requests
    pub fn recv_request(&mut self) -> Result<Option<EngineRequest>> {
        match self.recv() {
            Ok(req) => Ok(Some(req)),
            Err(FrameError::Closed) => Ok(None),
            Err(e) => Err(anyhow::Error::new(e).context("Failed to read request")),
        }
    }

    pub fn send_response(&mut self, resp: &EngineResponse) -> Result<()> {
        self.send(resp).context("Failed to send response")
    }

    fn send<T: Serialize>(&mut self, msg: &T) -> Result<(), FrameError> {
        let payload = serde_json::to_vec(msg)?;
        let len = checked_len(payload.len())?;

        let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);
        self.stream.write_all(&frame)?;
        self.stream.flush()?;
        Ok(())
    }

    fn recv<T: DeserializeOwned>(&mut self) -> Result<T, FrameError> {
        let mut header = [0u8; HEADER_LEN];
        match self.stream.read_exact(&mut header) {
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(FrameError::Closed),
            other => other?,
        }
        let len = u32::from_le_bytes(header) as usize;
        checked_len(len)?;

        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload)?;
        Ok(serde_json::from_slice(&payload)?)
    }
}

fn checked_len(len: usize) -> Result<u32, FrameError> {
    if len > MAX_MESSAGE_SIZE {
        return Err(FrameError::TooLarge(len));
    }
    u32::try_from(len).map_err(|_| FrameError::TooLarge(len))
}

/// Listening socket owned by the daemon, removed again on drop
pub struct EngineServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl EngineServer {
    pub fn bind() -> Result<Self> {
        Self::bind_to(socket_path()?)
    }

    pub fn bind_to(socket_path: PathBuf) -> Result<Self> {
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create socket directory: {}", parent.display()))?;
        }

        // A live daemon still answers on the socket; a dead one left a stale file
        if socket_path.exists() {
            if UnixStream::connect(&socket_path).is_ok() {
                return Err(anyhow!("Another daemon is already listening on {}", socket_path.display()));
            }
            std::fs::remove_file(&socket_path)
                .with_context(|| format!("Failed to remove stale socket: {}", socket_path.display()))?;
        }

        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("Failed to bind socket at {}", socket_path.display()))?;

        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o700))
                .context("Failed to restrict socket to its owner")?;
        }

        Ok(Self {
            listener,
            socket_path,
        })
    }

    /// Block until the next CLI connects
    pub fn accept(&self) -> Result<EngineClient> {
        let (stream, _addr) = self.listener.accept().context("Failed to accept IPC connection")?;
        Ok(EngineClient { stream })
    }

    pub fn path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for EngineServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}
