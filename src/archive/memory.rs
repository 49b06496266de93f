//! In-memory stand-in for the 7-Zip binary.
//!
//! Serves a fixed set of files through the same listing and streaming
//! protocol as [`super::SevenZipTool`], including 7-Zip's error lines for
//! bad passwords, and can cut or stall the stream to exercise the reader's
//! failure paths. Available to other crates with the `test-util` feature.

use async_trait::async_trait;
use std::io::Cursor;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::sync::CancellationToken;

use super::sevenzip::{ArchiveTool, ExtractStream, ToolOutput, ToolStatus};
use crate::error::Result;

#[derive(Debug, Default)]
pub struct MemoryTool {
    files: Vec<(String, Vec<u8>)>,
    solid: bool,
    password: Option<String>,
    encrypted_headers: bool,
    truncate: Option<(String, usize)>,
    listed_sizes: Vec<(String, u64)>,
    cancel_after: Option<(String, CancellationToken)>,
    list_calls: Mutex<usize>,
    extract_calls: Mutex<Vec<Vec<String>>>,
}

impl MemoryTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, key: &str, data: &[u8]) -> Self {
        self.files.push((key.to_string(), data.to_vec()));
        self
    }

    pub fn solid(mut self) -> Self {
        self.solid = true;
        self
    }

    /// Require a password for extraction
    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    /// Require the password for listing too
    pub fn encrypted_headers(mut self) -> Self {
        self.encrypted_headers = true;
        self
    }

    /// End the stream after `bytes` bytes of `key`
    pub fn truncate_after(mut self, key: &str, bytes: usize) -> Self {
        self.truncate = Some((key.to_string(), bytes));
        self
    }

    /// Report `size` for `key` in listings, whatever its real length
    pub fn listed_size(mut self, key: &str, size: u64) -> Self {
        self.listed_sizes.push((key.to_string(), size));
        self
    }

    /// Cancel `token` once the last byte of `key` has been streamed
    pub fn cancel_after(mut self, key: &str, token: CancellationToken) -> Self {
        self.cancel_after = Some((key.to_string(), token));
        self
    }

    pub fn list_calls(&self) -> usize {
        *self.list_calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Keys of every extract call so far
    pub fn extract_calls(&self) -> Vec<Vec<String>> {
        self.extract_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn password_matches(&self, password: &str) -> bool {
        match &self.password {
            Some(expected) => expected == password,
            None => true,
        }
    }

    fn listing(&self) -> String {
        let mut out = String::from("--\nPath = memory\nType = 7z\n");
        if self.solid {
            out.push_str("Solid = +\n");
        }
        out.push_str("\n----------\n");
        for (key, data) in &self.files {
            let size = self
                .listed_sizes
                .iter()
                .find(|(k, _)| k == key)
                .map_or(data.len() as u64, |(_, size)| *size);
            out.push_str(&format!("Path = {}\nSize = {}\nAttributes = A\n\n", key, size));
        }
        out
    }
}

#[async_trait]
impl ArchiveTool for MemoryTool {
    async fn list(&self, archive: &Path, password: &str) -> Result<ToolOutput> {
        *self.list_calls.lock().unwrap_or_else(PoisonError::into_inner) += 1;

        if self.encrypted_headers && !self.password_matches(password) {
            return Ok(ToolOutput {
                success: false,
                stdout: String::new(),
                stderr: vec![format!(
                    "ERROR: {} : Can not open encrypted archive. Wrong password?",
                    archive.display()
                )],
            });
        }

        Ok(ToolOutput {
            success: true,
            stdout: self.listing(),
            stderr: Vec::new(),
        })
    }

    async fn extract(&self, _archive: &Path, password: &str, keys: &[String]) -> Result<ExtractStream> {
        self.extract_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(keys.to_vec());

        let mut data = Vec::new();
        let mut stderr = Vec::new();
        let mut cancel_at = None;

        if !self.password_matches(password) {
            stderr.extend(keys.iter().map(|k| format!("ERROR: Wrong password : {}", k)));
        } else {
            for (key, content) in self.files.iter().filter(|(k, _)| keys.contains(k)) {
                match &self.truncate {
                    Some((cut, bytes)) if cut == key => {
                        data.extend_from_slice(&content[..(*bytes).min(content.len())]);
                        break;
                    }
                    _ => data.extend_from_slice(content),
                }
                if let Some((after, token)) = &self.cancel_after {
                    if after == key {
                        cancel_at = Some((data.len() as u64, token.clone()));
                    }
                }
            }
        }

        let status = ToolStatus {
            success: stderr.is_empty(),
            stderr,
        };
        let data: Box<dyn AsyncRead + Send + Unpin> = match cancel_at {
            Some((at, cancel)) => Box::new(CancelAt {
                data: Cursor::new(data),
                at,
                cancel,
            }),
            None => Box::new(Cursor::new(data)),
        };
        Ok(ExtractStream::new(data, Box::pin(async move { Ok(status) })))
    }
}

/// Stream that cancels a token once `at` bytes have been read
struct CancelAt {
    data: Cursor<Vec<u8>>,
    at: u64,
    cancel: CancellationToken,
}

impl AsyncRead for CancelAt {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.data).poll_read(cx, buf);
        if this.data.position() >= this.at {
            this.cancel.cancel();
        }
        poll
    }
}
