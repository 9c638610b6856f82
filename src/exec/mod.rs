//! Remote command execution against cluster pods.
//!
//! The transport exposes two modes over the same multiplexed channel:
//!
//! - **Line commands**: run, collect all output, return trimmed non-hidden
//!   lines. Used for directory listings and stat calls.
//! - **Streaming downloads**: a pull-based byte stream for large binary
//!   transfer, optionally base64-unwrapped and SHA-256-verified.
//!
//! Availability is a normal condition, not an error: outside an orchestrated
//! environment [`ExecTransport::connect`] returns `None` and every feature
//! depending on node-local disk degrades.

mod kube;
pub mod stream;

pub use self::kube::KubeExec;
pub use stream::{Base64Reader, MuxedReader, Sha256Reader};

use crate::error::Result;
use async_trait::async_trait;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt};

/// A boxed byte stream produced by a streaming download.
pub type ExecStream = Pin<Box<dyn AsyncRead + Send>>;

/// Layers applied to a streaming download.
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    /// The remote command base64-encodes its output; decode it.
    pub base64: bool,
    /// Expected SHA-256 hex digest from a companion checksum file.
    pub expected_sha256: Option<String>,
}

/// Command execution against a named pod. The seam the node-disk storage
/// backend mocks in tests.
#[async_trait]
pub trait RemoteExec: Send + Sync {
    /// Run a command and return its cleaned output lines.
    async fn command_lines(&self, pod: &str, command: &[String]) -> Result<Vec<String>>;

    /// Run a command and stream its output bytes.
    async fn open_stream(
        &self,
        pod: &str,
        command: &[String],
        options: StreamOptions,
    ) -> Result<ExecStream>;
}

/// Production transport over the Kubernetes exec channel.
pub struct ExecTransport {
    exec: KubeExec,
}

impl ExecTransport {
    /// Connect, or `None` when the process is not running where the exec
    /// channel can be reached.
    pub async fn connect(namespace: impl Into<String>, container: Option<String>) -> Option<Self> {
        KubeExec::try_new(namespace, container)
            .await
            .map(|exec| Self { exec })
    }
}

#[async_trait]
impl RemoteExec for ExecTransport {
    async fn command_lines(&self, pod: &str, command: &[String]) -> Result<Vec<String>> {
        let frames = self.exec.open(pod, command).await?;
        let mut reader = MuxedReader::new(frames);
        let mut output = Vec::new();
        reader.read_to_end(&mut output).await?;
        Ok(clean_lines(&String::from_utf8_lossy(&output)))
    }

    async fn open_stream(
        &self,
        pod: &str,
        command: &[String],
        options: StreamOptions,
    ) -> Result<ExecStream> {
        let frames = self.exec.open(pod, command).await?;
        let mut stream: ExecStream = Box::pin(MuxedReader::new(frames));
        if options.base64 {
            stream = Box::pin(Base64Reader::new(stream));
        }
        if options.expected_sha256.is_some() {
            stream = Box::pin(Sha256Reader::new(stream, options.expected_sha256));
        }
        Ok(stream)
    }
}

/// Split command output into usable entries: trimmed, trailing path
/// separators removed, blank and hidden (dot-prefixed) entries dropped.
pub fn clean_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(|line| line.trim().trim_end_matches('/'))
        .filter(|line| !line.is_empty() && !line.starts_with('.'))
        .map(str::to_string)
        .collect()
}
