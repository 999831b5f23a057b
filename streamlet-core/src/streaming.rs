//! Single-range HTTP byte serving for source videos.
//!
//! The HTTP layer turns a [`StreamPlan`] into status and headers; this module
//! decides the plan and produces a body that yields exactly the planned bytes.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom, Take};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

pub const RANGE_UNIT_PREFIX: &str = "bytes=";

#[derive(Debug, Error)]
pub enum StreamingError {
    #[error("malformed range header: {0:?}")]
    MalformedRange(String),
    #[error("io error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

pub type StreamingResult<T> = std::result::Result<T, StreamingError>;

/// A parsed `bytes=<start>-<end>` header; `end == None` means end of file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

/// Parses the single-range form. Suffix ranges (`bytes=-500`) and range
/// lists are not supported and count as malformed.
pub fn parse_range(header: &str) -> StreamingResult<ByteRange> {
    let malformed = || StreamingError::MalformedRange(header.to_string());
    let value = header.trim();
    let value = value.strip_prefix(RANGE_UNIT_PREFIX).unwrap_or(value);
    let parts: Vec<&str> = value.split('-').collect();
    let [start, end] = parts.as_slice() else {
        return Err(malformed());
    };
    let start = start.trim().parse::<u64>().map_err(|_| malformed())?;
    let end = match end.trim() {
        "" => None,
        raw => Some(raw.parse::<u64>().map_err(|_| malformed())?),
    };
    Ok(ByteRange { start, end })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPlan {
    Full { size: u64 },
    Partial { start: u64, end: u64, size: u64 },
    Unsatisfiable { size: u64 },
}

impl StreamPlan {
    /// Plans the response for a file of `size` bytes and an optional `Range`
    /// header value.
    pub fn for_request(range: Option<&str>, size: u64) -> StreamingResult<Self> {
        let Some(header) = range else {
            return Ok(StreamPlan::Full { size });
        };
        let range = parse_range(header)?;
        let end = match range.end {
            Some(end) => end,
            None if size == 0 => return Ok(StreamPlan::Unsatisfiable { size }),
            None => size - 1,
        };
        if range.start > end || end >= size {
            return Ok(StreamPlan::Unsatisfiable { size });
        }
        Ok(StreamPlan::Partial {
            start: range.start,
            end,
            size,
        })
    }

    /// Number of body bytes; zero for an unsatisfiable range.
    pub fn content_length(&self) -> u64 {
        match self {
            StreamPlan::Full { size } => *size,
            StreamPlan::Partial { start, end, .. } => end - start + 1,
            StreamPlan::Unsatisfiable { .. } => 0,
        }
    }

    pub fn content_range(&self) -> Option<String> {
        match self {
            StreamPlan::Full { .. } => None,
            StreamPlan::Partial { start, end, size } => Some(format!("bytes {start}-{end}/{size}")),
            StreamPlan::Unsatisfiable { size } => Some(format!("bytes */{size}")),
        }
    }

    fn offset(&self) -> u64 {
        match self {
            StreamPlan::Partial { start, .. } => *start,
            _ => 0,
        }
    }
}

/// Opens `path` positioned at the plan's first byte and limited to its length.
pub async fn open_planned(path: &Path, plan: &StreamPlan) -> StreamingResult<RangeBody> {
    let io_err = |source| StreamingError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).await.map_err(io_err)?;
    let offset = plan.offset();
    if offset > 0 {
        file.seek(SeekFrom::Start(offset)).await.map_err(io_err)?;
    }
    let expected = plan.content_length();
    Ok(RangeBody::new(
        ReaderStream::new(file.take(expected)),
        expected,
        path.to_path_buf(),
    ))
}

/// Body stream that tracks how many of the planned bytes went out.
///
/// A source that ends early surfaces as an `UnexpectedEof` error so the
/// response never silently falls short of its `Content-Length`. A client that
/// goes away makes the server drop the body unfinished; that is an expected
/// outcome of seeking and is only logged at debug level.
pub struct RangeBody {
    inner: ReaderStream<Take<File>>,
    expected: u64,
    sent: u64,
    path: PathBuf,
    finished: bool,
}

impl RangeBody {
    fn new(inner: ReaderStream<Take<File>>, expected: u64, path: PathBuf) -> Self {
        Self {
            inner,
            expected,
            sent: 0,
            path,
            finished: false,
        }
    }

    pub fn expected(&self) -> u64 {
        self.expected
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }
}

impl Stream for RangeBody {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.sent += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                warn!(path = %this.path.display(), error = %err, "stream read failed");
                this.finished = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.finished = true;
                if this.sent < this.expected {
                    warn!(
                        path = %this.path.display(),
                        sent = this.sent,
                        expected = this.expected,
                        "source ended before the planned range"
                    );
                    return Poll::Ready(Some(Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "source shorter than planned range",
                    ))));
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for RangeBody {
    fn drop(&mut self) {
        if self.sent < self.expected && !self.finished {
            debug!(
                path = %self.path.display(),
                sent = self.sent,
                expected = self.expected,
                "client disconnected mid-stream"
            );
        }
    }
}
