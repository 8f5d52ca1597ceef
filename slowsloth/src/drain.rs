use bytes::Buf;
use hyper::body::Body;
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

pin_project! {
    /// Reads a response body to the end, or up to `limit` bytes, and throws
    /// it away. Resolves to the number of bytes read.
    pub struct DiscardBody<B: Body> {
        #[pin]
        body: B,
        read: usize,
        limit: usize,
    }
}

impl<B> DiscardBody<B>
where
    B: Body,
{
    #[inline]
    #[must_use]
    pub fn new(body: B, limit: usize) -> Self {
        Self {
            body,
            read: 0,
            limit,
        }
    }
}

impl<B> Future for DiscardBody<B>
where
    B: Body,
{
    type Output = Result<usize, anyhow::Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slf = self.project();
        loop {
            if *slf.read >= *slf.limit || slf.body.is_end_stream() {
                return Poll::Ready(Ok(*slf.read));
            }
            let Some(next_res) = ready!(slf.body.as_mut().poll_frame(cx)) else {
                return Poll::Ready(Ok(*slf.read));
            };
            let Ok(frame) = next_res else {
                return Poll::Ready(Err(anyhow::anyhow!("Failed to poll next frame")));
            };
            if let Ok(data) = frame.into_data() {
                *slf.read += data.remaining();
            }
        }
    }
}
