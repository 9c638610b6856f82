//! Stream plumbing for the remote-exec transport.
//!
//! A remote exec channel delivers multiplexed frames: one channel-identifier
//! byte followed by a data payload. [`MuxedReader`] demultiplexes that into a
//! plain byte stream of command output, [`Base64Reader`] undoes the base64
//! armor remote commands apply to survive transport-level newline
//! translation, and [`Sha256Reader`] verifies integrity as bytes flow
//! through.
//!
//! All three are composable [`AsyncRead`] layers; byte ordering is preserved
//! exactly across arbitrary frame/read-buffer boundaries.

use crate::error::LookoutError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::stream::BoxStream;
use futures::Stream;
use sha2::{Digest, Sha256};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tracing::warn;

/// Remote process input channel.
pub const CHANNEL_STDIN: u8 = 0;
/// Remote process output channel; the only one surfaced to callers.
pub const CHANNEL_STDOUT: u8 = 1;
/// Remote process error channel; logged and discarded.
pub const CHANNEL_STDERR: u8 = 2;

/// Raw multiplexed frames as read off the remote channel.
pub type FrameStream = BoxStream<'static, Result<Vec<u8>, LookoutError>>;

/// Demultiplexes a frame stream into the output channel's bytes.
///
/// A frame may carry more output bytes than the caller's buffer holds; the
/// surplus is retained and served on the next read before a new frame is
/// pulled. Channel closure, clean or premature, reads as end-of-stream.
pub struct MuxedReader {
    frames: FrameStream,
    /// Current output frame; `pos` starts past the channel byte.
    current: Vec<u8>,
    pos: usize,
    done: bool,
}

impl MuxedReader {
    pub fn new(frames: FrameStream) -> Self {
        Self {
            frames,
            current: Vec::new(),
            pos: 0,
            done: false,
        }
    }
}

impl AsyncRead for MuxedReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            // Serve leftover bytes from the current frame first.
            if this.pos < this.current.len() {
                let n = buf.remaining().min(this.current.len() - this.pos);
                buf.put_slice(&this.current[this.pos..this.pos + n]);
                this.pos += n;
                return Poll::Ready(Ok(()));
            }

            if this.done {
                return Poll::Ready(Ok(()));
            }

            match Pin::new(&mut this.frames).poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => {
                    this.done = true;
                    return Poll::Ready(Ok(()));
                }
                Poll::Ready(Some(Err(e))) => {
                    // Premature closure reads as a clean end-of-stream.
                    warn!(error = %e, "remote channel closed mid-stream");
                    this.done = true;
                    return Poll::Ready(Ok(()));
                }
                Poll::Ready(Some(Ok(frame))) => {
                    if frame.len() <= 1 {
                        continue;
                    }
                    match frame[0] {
                        CHANNEL_STDOUT => {
                            this.current = frame;
                            this.pos = 1;
                        }
                        CHANNEL_STDERR => {
                            let text = String::from_utf8_lossy(&frame[1..]);
                            warn!(stderr = %text.trim_end(), "remote command wrote to stderr");
                        }
                        // Control frames carry status the caller does not see.
                        _ => {}
                    }
                }
            }
        }
    }
}

/// Incremental base64 decoder over an inner reader.
///
/// Buffers input until a 4-character group is complete, tolerating the line
/// breaks `base64(1)` inserts; the final partial group decodes at EOF.
pub struct Base64Reader<R> {
    inner: R,
    /// Undecoded base64 characters, always fewer than 4 after a decode pass.
    pending: Vec<u8>,
    decoded: Vec<u8>,
    pos: usize,
    eof: bool,
}

impl<R> Base64Reader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pending: Vec::new(),
            decoded: Vec::new(),
            pos: 0,
            eof: false,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for Base64Reader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if this.pos < this.decoded.len() {
                let n = buf.remaining().min(this.decoded.len() - this.pos);
                buf.put_slice(&this.decoded[this.pos..this.pos + n]);
                this.pos += n;
                return Poll::Ready(Ok(()));
            }

            if this.eof {
                return Poll::Ready(Ok(()));
            }

            let mut chunk = [0u8; 8192];
            let mut read_buf = ReadBuf::new(&mut chunk);
            match Pin::new(&mut this.inner).poll_read(cx, &mut read_buf) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Ready(Ok(())) => {
                    let filled = read_buf.filled();
                    if filled.is_empty() {
                        this.eof = true;
                        if !this.pending.is_empty() {
                            let tail = std::mem::take(&mut this.pending);
                            let bytes = BASE64.decode(&tail).map_err(|e| {
                                io::Error::new(
                                    io::ErrorKind::InvalidData,
                                    format!("truncated base64 stream: {}", e),
                                )
                            })?;
                            this.decoded = bytes;
                            this.pos = 0;
                        }
                        continue;
                    }

                    this.pending
                        .extend(filled.iter().copied().filter(|b| !b.is_ascii_whitespace()));
                    let usable = this.pending.len() - this.pending.len() % 4;
                    if usable > 0 {
                        let group: Vec<u8> = this.pending.drain(..usable).collect();
                        let bytes = BASE64.decode(&group).map_err(|e| {
                            io::Error::new(
                                io::ErrorKind::InvalidData,
                                format!("invalid base64 in stream: {}", e),
                            )
                        })?;
                        this.decoded = bytes;
                        this.pos = 0;
                    }
                }
            }
        }
    }
}

/// Computes a SHA-256 digest of everything read through it and compares it,
/// at end-of-stream, against an expected hex digest.
///
/// A mismatch is a data-integrity warning, not an error: the caller already
/// has the bytes, suspect as they may be.
pub struct Sha256Reader<R> {
    inner: R,
    hasher: Option<Sha256>,
    expected: Option<String>,
    verified: Option<bool>,
}

impl<R> Sha256Reader<R> {
    pub fn new(inner: R, expected: Option<String>) -> Self {
        Self {
            inner,
            hasher: Some(Sha256::new()),
            expected,
            verified: None,
        }
    }

    /// Verification outcome; `None` until end-of-stream, and stays `None`
    /// when no expected digest was supplied.
    pub fn verified(&self) -> Option<bool> {
        self.verified
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for Sha256Reader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Ready(Ok(())) => {
                let filled = &buf.filled()[before..];
                if filled.is_empty() {
                    // End-of-stream (the caller asked for bytes and got none).
                    if buf.remaining() > 0 {
                        if let Some(hasher) = this.hasher.take() {
                            let actual = format!("{:x}", hasher.finalize());
                            if let Some(expected) = &this.expected {
                                let matches = actual.eq_ignore_ascii_case(expected.trim());
                                if !matches {
                                    warn!(
                                        expected = %expected.trim(),
                                        %actual,
                                        "snapshot checksum mismatch"
                                    );
                                }
                                this.verified = Some(matches);
                            }
                        }
                    }
                } else if let Some(hasher) = this.hasher.as_mut() {
                    hasher.update(filled);
                }
                Poll::Ready(Ok(()))
            }
        }
    }
}

/// Build a frame stream from in-memory frames. Test seam.
#[cfg(test)]
pub fn frames_from(frames: Vec<Result<Vec<u8>, LookoutError>>) -> FrameStream {
    Box::pin(futures::stream::iter(frames))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn stdout_frame(payload: &[u8]) -> Result<Vec<u8>, LookoutError> {
        let mut frame = vec![CHANNEL_STDOUT];
        frame.extend_from_slice(payload);
        Ok(frame)
    }

    #[tokio::test]
    async fn test_demux_keeps_only_stdout() {
        let frames = frames_from(vec![
            stdout_frame(b"hello "),
            Ok(vec![CHANNEL_STDERR, b'o', b'o', b'p', b's']),
            Ok(vec![3, 0xff]), // control frame
            stdout_frame(b"world"),
        ]);
        let mut reader = MuxedReader::new(frames);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello world");
    }

    #[tokio::test]
    async fn test_demux_leftover_is_lossless_for_any_split() {
        // Frame payloads deliberately misaligned with the read-buffer size.
        let payload: Vec<u8> = (0u8..=255).collect();
        let frames = frames_from(vec![
            stdout_frame(&payload[..7]),
            stdout_frame(&payload[7..100]),
            stdout_frame(&payload[100..101]),
            stdout_frame(&payload[101..]),
        ]);
        let mut reader = MuxedReader::new(frames);

        let mut out = Vec::new();
        let mut buf = [0u8; 13];
        loop {
            let n = reader.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, payload);
    }

    #[tokio::test]
    async fn test_demux_error_reads_as_clean_eof() {
        let frames = frames_from(vec![
            stdout_frame(b"partial"),
            Err(LookoutError::Exec("connection reset".into())),
            stdout_frame(b" never seen"),
        ]);
        let mut reader = MuxedReader::new(frames);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"partial");
    }

    #[tokio::test]
    async fn test_demux_skips_empty_frames() {
        let frames = frames_from(vec![
            Ok(vec![]),
            Ok(vec![CHANNEL_STDOUT]),
            stdout_frame(b"data"),
        ]);
        let mut reader = MuxedReader::new(frames);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"data");
    }

    #[tokio::test]
    async fn test_base64_decodes_across_group_boundaries() {
        let plain = b"The quick brown fox jumps over the lazy dog".to_vec();
        let mut encoded = BASE64.encode(&plain).into_bytes();
        // base64(1) wraps lines; make sure whitespace is tolerated.
        encoded.insert(10, b'\n');
        encoded.insert(30, b'\n');

        // Split the encoded text into frames at non-4-aligned points.
        let frames = frames_from(vec![
            stdout_frame(&encoded[..5]),
            stdout_frame(&encoded[5..17]),
            stdout_frame(&encoded[17..]),
        ]);
        let mut reader = Base64Reader::new(MuxedReader::new(frames));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, plain);
    }

    #[tokio::test]
    async fn test_base64_small_read_buffers() {
        let plain: Vec<u8> = (0u8..=255).cycle().take(1000).collect();
        let encoded = BASE64.encode(&plain).into_bytes();
        let frames = frames_from(vec![stdout_frame(&encoded)]);
        let mut reader = Base64Reader::new(MuxedReader::new(frames));

        let mut out = Vec::new();
        let mut buf = [0u8; 3];
        loop {
            let n = reader.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, plain);
    }

    #[tokio::test]
    async fn test_sha256_matching_digest_verifies() {
        let data = b"snapshot bytes".to_vec();
        let expected = format!("{:x}", Sha256::digest(&data));
        let frames = frames_from(vec![stdout_frame(&data)]);
        let mut reader = Sha256Reader::new(MuxedReader::new(frames), Some(expected));

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, data);
        assert_eq!(reader.verified(), Some(true));
    }

    #[tokio::test]
    async fn test_sha256_mismatch_logs_but_does_not_error() {
        let data = b"corrupted bytes".to_vec();
        let expected = format!("{:x}", Sha256::digest(b"original bytes"));
        let frames = frames_from(vec![stdout_frame(&data)]);
        let mut reader = Sha256Reader::new(MuxedReader::new(frames), Some(expected));

        let mut out = Vec::new();
        // The read itself must succeed despite the mismatch.
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, data);
        assert_eq!(reader.verified(), Some(false));
    }

    #[tokio::test]
    async fn test_sha256_without_expected_stays_unverified() {
        let frames = frames_from(vec![stdout_frame(b"bytes")]);
        let mut reader = Sha256Reader::new(MuxedReader::new(frames), None);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(reader.verified(), None);
    }
}
