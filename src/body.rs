//! Implementation of response bodies.

use std::future::poll_fn;
use std::io;
use std::mem;
use std::pin::Pin;
use std::pin::pin;
use std::task::Context;
use std::task::Poll;
use std::task::ready;

use bytes::Bytes;
use bytes::BytesMut;
use futures::Stream;
use http_body::Frame;
use http_body::SizeHint;
use pin_project_lite::pin_project;

/// Represents the supported HTTP body trait for transport integrations.
pub trait HttpBody: http_body::Body<Data = Bytes, Error = io::Error> + Send {
    /// Polls the next data frame as bytes.
    ///
    /// Returns end of stream after all data frames, thereby ignoring trailers.
    fn poll_next_data(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<io::Result<Bytes>>> {
        match ready!(self.poll_frame(cx)) {
            Some(Ok(frame)) => match frame.into_data().ok() {
                Some(data) => Poll::Ready(Some(Ok(data))),
                None => Poll::Ready(None),
            },
            Some(Err(e)) => Poll::Ready(Some(Err(e))),
            None => Poll::Ready(None),
        }
    }
}

pin_project! {
    /// Represents a response body source.
    ///
    /// The body may come from the following sources:
    ///
    /// * Upstream, streamed through untouched.
    /// * A replay of bytes previously drained into memory.
    #[project = ProjectedBodySource]
    enum BodySource<B> {
        /// The body is coming from upstream without being buffered.
        Upstream {
            // The underlying source for the body.
            #[pin]
            source: B
        },
        /// The body replays an owned buffer.
        Replay {
            // The bytes that have not been yielded yet.
            remaining: Bytes,
        },
    }
}

pin_project! {
    /// Represents a response body.
    pub struct Body<B> {
        // The body source.
        #[pin]
        source: BodySource<B>
    }
}

impl<B> Body<B>
where
    B: HttpBody,
{
    /// Constructs a new body from an upstream response body that is not being
    /// buffered.
    pub(crate) fn from_upstream(upstream: B) -> Self {
        Self {
            source: BodySource::Upstream { source: upstream },
        }
    }

    /// Constructs a new body that replays the given bytes.
    ///
    /// The bytes are yielded as a single frame; an empty buffer yields an
    /// immediate end of stream.
    pub(crate) fn from_bytes(bytes: Bytes) -> Self {
        Self {
            source: BodySource::Replay { remaining: bytes },
        }
    }

    /// Drains an upstream body into memory, chunk by chunk, until end of
    /// stream.
    ///
    /// The returned buffer holds the complete body; the source is not
    /// retained.
    pub(crate) async fn drain(source: B) -> io::Result<Bytes> {
        let mut source = pin!(source);
        let mut buf = BytesMut::new();
        while let Some(chunk) = poll_fn(|cx| source.as_mut().poll_next_data(cx))
            .await
            .transpose()?
        {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }
}

impl<B> http_body::Body for Body<B>
where
    B: HttpBody,
{
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, io::Error>>> {
        match self.project().source.project() {
            ProjectedBodySource::Upstream { source } => source.poll_frame(cx),
            ProjectedBodySource::Replay { remaining } => {
                if remaining.is_empty() {
                    Poll::Ready(None)
                } else {
                    Poll::Ready(Some(Ok(Frame::data(mem::take(remaining)))))
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.source {
            BodySource::Upstream { source } => source.is_end_stream(),
            BodySource::Replay { remaining } => remaining.is_empty(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.source {
            BodySource::Upstream { source } => source.size_hint(),
            BodySource::Replay { remaining } => SizeHint::with_exact(remaining.len() as u64),
        }
    }
}

impl<B> HttpBody for Body<B> where B: HttpBody + Send {}

/// An implementation of `Stream` for body.
///
/// This implementation only retrieves the data frames of the body.
///
/// Trailer frames are not read.
impl<B> Stream for Body<B>
where
    B: HttpBody,
{
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.project().source.project() {
            ProjectedBodySource::Upstream { source } => source.poll_next_data(cx),
            ProjectedBodySource::Replay { remaining } => {
                if remaining.is_empty() {
                    Poll::Ready(None)
                } else {
                    Poll::Ready(Some(Ok(mem::take(remaining))))
                }
            }
        }
    }
}
