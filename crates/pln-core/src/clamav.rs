//! Virus scanning through a clamd daemon.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::timeout;

use crate::error::{PipelineError, Result};
use crate::xml::EmbeddedPayload;

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanVerdict {
    Ok,
    Found(String),
    Error(String),
}

impl ScanVerdict {
    /// Log line for a scanned item, e.g. `"article.pdf FOUND: Eicar-Signature"`.
    pub fn describe(&self, name: &str) -> String {
        match self {
            ScanVerdict::Ok => format!("{name} OK"),
            ScanVerdict::Found(signature) => format!("{name} FOUND: {signature}"),
            ScanVerdict::Error(reason) => format!("{name} ERROR: {reason}"),
        }
    }
}

/// Opens scanning sessions against an oracle.
#[async_trait]
pub trait ScanConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn ScanSession>>;
}

/// One session; streams are scanned one after another.
#[async_trait]
pub trait ScanSession: Send {
    async fn start_stream(&mut self) -> Result<()>;
    async fn stream_chunk(&mut self, chunk: &[u8]) -> Result<()>;
    async fn finish_stream(&mut self) -> Result<ScanVerdict>;
    async fn end_session(&mut self) -> Result<()>;
}

/// Stream a file through the session in 64 KiB chunks.
pub async fn scan_file(session: &mut dyn ScanSession, path: &Path) -> Result<ScanVerdict> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut buffer = vec![0u8; CHUNK_SIZE];
    session.start_stream().await?;
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        session.stream_chunk(&buffer[..read]).await?;
    }
    session.finish_stream().await
}

/// Decode an embedded payload chunk by chunk straight into the session.
pub async fn scan_embed(
    session: &mut dyn ScanSession,
    payload: &EmbeddedPayload,
) -> Result<ScanVerdict> {
    session.start_stream().await?;
    for chunk in payload.chunks() {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                // The stream is already open; close it before reporting.
                if let Err(close) = session.finish_stream().await {
                    tracing::warn!(
                        embed = %payload.filename,
                        error = %close,
                        "failed to close scan stream after a decode error"
                    );
                }
                return Ok(ScanVerdict::Error(err.to_string()));
            }
        };
        session.stream_chunk(&chunk).await?;
    }
    session.finish_stream().await
}

#[derive(Debug, Clone)]
pub struct ClamdConnector {
    socket_path: PathBuf,
    timeout: Duration,
}

impl ClamdConnector {
    pub fn new(socket_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ScanConnector for ClamdConnector {
    async fn connect(&self) -> Result<Box<dyn ScanSession>> {
        let stream = timeout(self.timeout, UnixStream::connect(&self.socket_path))
            .await
            .map_err(|_| {
                PipelineError::Scanner(format!(
                    "timed out connecting to {}",
                    self.socket_path.display()
                ))
            })??;

        let mut session = ClamdSession {
            stream,
            timeout: self.timeout,
        };
        session.send(b"zIDSESSION\0").await?;
        tracing::debug!(socket = %self.socket_path.display(), "clamd session started");
        Ok(Box::new(session))
    }
}

pub struct ClamdSession {
    stream: UnixStream,
    timeout: Duration,
}

impl ClamdSession {
    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        timeout(self.timeout, self.stream.write_all(bytes))
            .await
            .map_err(|_| PipelineError::Scanner("timed out writing to clamd".into()))??;
        Ok(())
    }

    /// Read one NUL-terminated reply.
    async fn read_reply(&mut self) -> Result<String> {
        let mut reply = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            let read = timeout(self.timeout, self.stream.read(&mut byte))
                .await
                .map_err(|_| PipelineError::Scanner("timed out waiting for clamd".into()))??;
            if read == 0 || byte[0] == 0 {
                break;
            }
            reply.push(byte[0]);
        }
        if reply.is_empty() {
            return Err(PipelineError::Scanner("clamd closed the connection".into()));
        }
        Ok(String::from_utf8_lossy(&reply).into_owned())
    }
}

#[async_trait]
impl ScanSession for ClamdSession {
    async fn start_stream(&mut self) -> Result<()> {
        self.send(b"zINSTREAM\0").await
    }

    async fn stream_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        for piece in chunk.chunks(CHUNK_SIZE) {
            let length = u32::try_from(piece.len())
                .map_err(|_| PipelineError::Scanner("chunk too large".into()))?;
            self.send(&length.to_be_bytes()).await?;
            self.send(piece).await?;
        }
        Ok(())
    }

    async fn finish_stream(&mut self) -> Result<ScanVerdict> {
        self.send(&0u32.to_be_bytes()).await?;
        let reply = self.read_reply().await?;
        Ok(parse_reply(&reply))
    }

    async fn end_session(&mut self) -> Result<()> {
        self.send(b"zEND\0").await?;
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Interpret replies such as `1: stream: OK` or `2: stream: Eicar-Signature FOUND`.
pub fn parse_reply(reply: &str) -> ScanVerdict {
    let mut body = reply.trim();
    if let Some((id, rest)) = body.split_once(": ") {
        if id.chars().all(|c| c.is_ascii_digit()) {
            body = rest;
        }
    }
    let body = body.strip_prefix("stream: ").unwrap_or(body);

    if body == "OK" {
        ScanVerdict::Ok
    } else if let Some(signature) = body.strip_suffix(" FOUND") {
        ScanVerdict::Found(signature.to_string())
    } else if let Some(reason) = body.strip_suffix(" ERROR") {
        ScanVerdict::Error(reason.to_string())
    } else {
        ScanVerdict::Error(body.to_string())
    }
}
