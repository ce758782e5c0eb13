use core::pin::Pin;
use core::task::{Context, Poll};
use futures::future::BoxFuture;
use futures::{FutureExt, Stream};
use pin_project_lite::pin_project;
use tracing::info;

use crate::concurrency::shutdown::{ShutdownResult, ShutdownRx};

/// Resolves once cancellation is signalled on `shutdown_rx`.
///
/// A dropped sender means nobody can cancel anymore, so the future then never resolves.
fn wait_for_shutdown(mut shutdown_rx: ShutdownRx) -> BoxFuture<'static, ()> {
    async move {
        if shutdown_rx.changed().await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
    .boxed()
}

pin_project! {
    /// A stream adapter that groups fallible items into batches of at most `max_size` items.
    ///
    /// The cancellation signal takes priority over the inner stream: once it fires, the items
    /// collected so far are returned as [`ShutdownResult::Shutdown`] and the inner stream is never
    /// polled again. An error from the inner stream is forwarded immediately and ends the stream.
    #[must_use = "streams do nothing unless polled"]
    pub struct BatchStream<T, E, S: Stream<Item = Result<T, E>>> {
        #[pin]
        stream: S,
        shutdown: BoxFuture<'static, ()>,
        items: Vec<T>,
        max_size: usize,
        stream_stopped: bool,
    }
}

impl<T, E, S: Stream<Item = Result<T, E>>> BatchStream<T, E, S> {
    /// Creates a new [`BatchStream`].
    ///
    /// A `max_size` of zero is treated as one.
    pub fn wrap(stream: S, max_size: usize, shutdown_rx: ShutdownRx) -> Self {
        let max_size = max_size.max(1);

        BatchStream {
            stream,
            shutdown: wait_for_shutdown(shutdown_rx),
            items: Vec::with_capacity(max_size),
            max_size,
            stream_stopped: false,
        }
    }
}

impl<T, E, S: Stream<Item = Result<T, E>>> Stream for BatchStream<T, E, S> {
    type Item = Result<ShutdownResult<Vec<T>, Vec<T>>, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if *this.stream_stopped {
                return Poll::Ready(None);
            }

            // Cancellation wins over any item the inner stream may have ready.
            if this.shutdown.poll_unpin(cx).is_ready() {
                info!(
                    buffered_items = this.items.len(),
                    "batch stream stopped due to shutdown signal"
                );
                *this.stream_stopped = true;

                return Poll::Ready(Some(Ok(ShutdownResult::Shutdown(std::mem::take(
                    this.items,
                )))));
            }

            match this.stream.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(item))) => {
                    this.items.push(item);

                    if this.items.len() >= *this.max_size {
                        let batch = std::mem::replace(this.items, Vec::with_capacity(*this.max_size));
                        return Poll::Ready(Some(Ok(ShutdownResult::Ok(batch))));
                    }
                }
                Poll::Ready(Some(Err(err))) => {
                    *this.stream_stopped = true;
                    this.items.clear();

                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(None) => {
                    *this.stream_stopped = true;

                    if this.items.is_empty() {
                        return Poll::Ready(None);
                    }

                    return Poll::Ready(Some(Ok(ShutdownResult::Ok(std::mem::take(this.items)))));
                }
            }
        }
    }
}
