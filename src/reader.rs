//! Tag reader capability.
//!
//! Hardware access lives behind [`TagReader`]. The crate ships a
//! [`LineReader`] that works with any reader presenting tags as lines of
//! text, which covers keyboard-wedge (USB HID) and serial RFID modules.
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tracing::{debug, instrument};

use crate::types::TagId;

#[derive(Debug, Error)]
pub enum ReadError {
    /// The reader has no more input to give, no further reads will succeed
    #[error("tag reader input closed")]
    Closed,

    #[error("tag reader failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A tag presented to the reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRead {
    pub tag_id: TagId,
    /// Text stored on the tag, empty if the tag carries none
    pub text: String,
}

impl TagRead {
    pub fn new(tag_id: impl Into<TagId>, text: &str) -> Self {
        Self {
            tag_id: tag_id.into(),
            text: text.trim().to_owned(),
        }
    }
}

#[async_trait]
pub trait TagReader {
    /// Wait up to `timeout` for a tag. Returns `Ok(None)` if no tag was
    /// presented in that window.
    async fn read(&mut self, timeout: Duration) -> Result<Option<TagRead>, ReadError>;

    /// Release the reader device
    async fn cleanup(&mut self) -> Result<()>;
}

#[async_trait]
impl<T> TagReader for Box<T>
where
    T: TagReader + Send + ?Sized,
{
    async fn read(&mut self, timeout: Duration) -> Result<Option<TagRead>, ReadError> {
        (**self).read(timeout).await
    }

    async fn cleanup(&mut self) -> Result<()> {
        (**self).cleanup().await
    }
}

/// Reads one tag per line.
///
/// The first whitespace separated token is the tag UID, anything after it is
/// the tag text. Blank lines produce the empty tag identifier.
pub struct LineReader<R> {
    lines: Lines<R>,
}

impl<R> LineReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(input: R) -> Self {
        Self {
            lines: input.lines(),
        }
    }
}

impl LineReader<BufReader<File>> {
    /// Read tags from a character device or any other file
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .await
            .with_context(|| format!("Failed to open tag reader {}", path.display()))?;
        debug!("reading tags from {}", path.display());
        Ok(Self::new(BufReader::new(file)))
    }
}

fn parse_line(line: &str) -> TagRead {
    let line = line.trim();
    match line.split_once(char::is_whitespace) {
        Some((uid, text)) => TagRead::new(uid, text),
        None => TagRead::new(line, ""),
    }
}

#[async_trait]
impl<R> TagReader for LineReader<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    #[instrument(level = "trace", skip(self), err(level = "warn"))]
    async fn read(&mut self, timeout: Duration) -> Result<Option<TagRead>, ReadError> {
        // next_line is cancel safe, a partial line is kept for the next read
        match tokio::time::timeout(timeout, self.lines.next_line()).await {
            Ok(Ok(Some(line))) => {
                let read = parse_line(&line);
                debug!(tag = %read.tag_id, "tag read");
                Ok(Some(read))
            }
            Ok(Ok(None)) => Err(ReadError::Closed),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Ok(None),
        }
    }

    async fn cleanup(&mut self) -> Result<()> {
        debug!("tag reader released");
        Ok(())
    }
}
