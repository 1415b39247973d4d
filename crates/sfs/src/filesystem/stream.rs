// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::{Stream, TryStreamExt};
use tokio_util::io::StreamReader;

use super::{FileDescriptor, StaticFilesystem};
use crate::{Error, Result};

#[cfg(test)]
#[path = "./stream_test.rs"]
mod stream_test;

/// Options for [`StaticFilesystem::create_read_stream`]
#[derive(Debug, Clone)]
pub struct ReadStreamOptions {
    /// The first byte to read
    pub start: Option<u64>,
    /// The last byte to read, inclusive
    pub end: Option<u64>,
    /// The largest chunk to produce, defaults to the configured size
    pub high_water_mark: Option<usize>,
    /// Read from this already open file instead of opening the path
    pub fd: Option<FileDescriptor>,
    /// Close the file once the stream ends, fails or is dropped
    pub auto_close: bool,
    pub flags: i32,
}

impl Default for ReadStreamOptions {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            high_water_mark: None,
            fd: None,
            auto_close: true,
            flags: libc::O_RDONLY,
        }
    }
}

impl ReadStreamOptions {
    pub fn with_range(mut self, start: u64, end: u64) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn with_start(mut self, start: u64) -> Self {
        self.start = Some(start);
        self
    }

    pub fn with_end(mut self, end: u64) -> Self {
        self.end = Some(end);
        self
    }

    pub fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.high_water_mark = Some(high_water_mark);
        self
    }

    pub fn with_fd(mut self, fd: FileDescriptor) -> Self {
        self.fd = Some(fd);
        self
    }

    pub fn with_auto_close(mut self, auto_close: bool) -> Self {
        self.auto_close = auto_close;
        self
    }
}

/// Reads a file from a [`StaticFilesystem`] in sequential chunks.
#[derive(Debug)]
pub struct ReadStream {
    fs: Arc<StaticFilesystem>,
    path: PathBuf,
    fd: Option<FileDescriptor>,
    position: u64,
    end: Option<u64>,
    high_water_mark: usize,
    auto_close: bool,
    bytes_read: u64,
    finished: bool,
}

impl ReadStream {
    pub(super) fn new(
        fs: Arc<StaticFilesystem>,
        path: PathBuf,
        options: ReadStreamOptions,
    ) -> Result<Self> {
        let start = options.start.unwrap_or_default();
        if let Some(end) = options.end {
            if start > end {
                return Err(Error::InvalidStreamRange { start, end });
            }
        }
        let high_water_mark = options
            .high_water_mark
            .unwrap_or(fs.config().stream.high_water_mark)
            .max(1);
        Ok(Self {
            fs,
            path,
            fd: options.fd,
            position: start,
            end: options.end,
            high_water_mark,
            auto_close: options.auto_close,
            bytes_read: 0,
            finished: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The total number of bytes produced so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// True until the underlying file has been opened
    pub fn is_pending(&self) -> bool {
        self.fd.is_none() && !self.finished
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    async fn descriptor(&mut self) -> Result<FileDescriptor> {
        if let Some(fd) = &self.fd {
            return Ok(fd.clone());
        }
        let fd = self.fs.open(&self.path, libc::O_RDONLY).await?;
        tracing::trace!(%fd, "stream opened");
        self.fd = Some(fd.clone());
        Ok(fd)
    }

    /// Produce the next chunk of the file, or `None` once the
    /// end of the file or of the requested range is reached.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.finished {
            return Ok(None);
        }
        let fd = match self.descriptor().await {
            Ok(fd) => fd,
            Err(err) => {
                self.finished = true;
                return Err(err);
            }
        };

        let mut to_read = self.high_water_mark as u64;
        if let Some(end) = self.end {
            to_read = to_read.min(end.saturating_add(1).saturating_sub(self.position));
        }
        if to_read == 0 {
            self.finish().await?;
            return Ok(None);
        }

        let mut buf = BytesMut::zeroed(to_read as usize);
        let count = match self.fs.read(&fd, &mut buf, self.position).await {
            Ok(count) => count,
            Err(err) => {
                self.finished = true;
                if self.auto_close {
                    self.close().await.ok();
                }
                return Err(err);
            }
        };
        if count == 0 {
            self.finish().await?;
            return Ok(None);
        }
        buf.truncate(count);
        self.position += count as u64;
        self.bytes_read += count as u64;
        Ok(Some(buf.freeze()))
    }

    async fn finish(&mut self) -> Result<()> {
        self.finished = true;
        if self.auto_close {
            self.close().await?;
        }
        Ok(())
    }

    /// Close the underlying file, if it was opened.
    pub async fn close(&mut self) -> Result<()> {
        self.finished = true;
        if let Some(fd) = self.fd.take() {
            self.fs.close(&fd).await?;
            tracing::trace!(%fd, "stream closed");
        }
        Ok(())
    }

    /// Adapt this into a stream of chunks.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes>> + Send {
        async_stream::try_stream! {
            let mut reader = self;
            while let Some(chunk) = reader.next_chunk().await? {
                yield chunk;
            }
        }
    }

    /// Adapt this into an [`tokio::io::AsyncRead`].
    pub fn into_async_read(self) -> AsyncReadStream {
        let stream: ChunkStream = Box::pin(self.into_stream().map_err(std::io::Error::other));
        StreamReader::new(stream)
    }
}

/// The chunks of a [`ReadStream`] with errors converted for io adapters
pub type ChunkStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// A [`ReadStream`] as an [`tokio::io::AsyncRead`]
pub type AsyncReadStream = StreamReader<ChunkStream, Bytes>;

impl Drop for ReadStream {
    fn drop(&mut self) {
        if !self.auto_close {
            return;
        }
        if let Some(fd) = self.fd.take() {
            if let Err(err) = self.fs.close_sync(&fd) {
                tracing::debug!(%fd, %err, "failed to close dropped stream");
            }
        }
    }
}
