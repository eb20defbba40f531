use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use directio_client::Client;
use futures::Stream;
use futures::future::BoxFuture;
use tracing::{debug, info};
use utils::Credentials;

use crate::block::Fragment;
use crate::error::{DirectIoError, Result};
use crate::fetch::{FetchHandles, fetch, resolve};
use crate::metadata::{ByteRange, FileMetadata};
use crate::selection::select_by_range;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    /// Created; nothing requested yet.
    Idle,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl StreamState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamState::Completed | StreamState::Failed | StreamState::Cancelled)
    }
}

struct Started {
    metadata: Arc<FileMetadata>,
    range: ByteRange,
    handles: FetchHandles,
}

/// A single-use, lazily started sequence of fragments covering a byte range of one file.
///
/// The first poll resolves the file and schedules its chunk downloads. Fragments are then yielded
/// strictly in chunk order. Any error cancels the remaining downloads and is returned wrapped in
/// [`DirectIoError::Stream`] with the offset reached so far. Dropping the stream before it completes
/// cancels outstanding downloads.
pub struct FragmentStream {
    file_id: String,
    state: StreamState,
    range: ByteRange,
    current_offset: u64,
    starting: Option<BoxFuture<'static, Result<Started>>>,
    metadata: Option<Arc<FileMetadata>>,
    handles: Option<FetchHandles>,
}

impl FragmentStream {
    pub(crate) fn new(
        client: Arc<dyn Client>,
        credentials: Credentials,
        file_id: &str,
        range: ByteRange,
        concurrency_limit: usize,
    ) -> Self {
        let id = file_id.to_owned();
        let starting: BoxFuture<'static, Result<Started>> = Box::pin(async move {
            let resolved = resolve(client.as_ref(), &id, &credentials).await?;
            let mut range = range;
            let chunks = select_by_range(&resolved.metadata, &mut range)?;
            let handles = fetch(client, &resolved, chunks, concurrency_limit);
            Ok(Started {
                metadata: resolved.metadata,
                range,
                handles,
            })
        });

        Self {
            file_id: file_id.to_owned(),
            state: StreamState::Idle,
            range,
            current_offset: range.start,
            starting: Some(starting),
            metadata: None,
            handles: None,
        }
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// End offset of the last fragment yielded; the range start before the first.
    pub fn current_offset(&self) -> u64 {
        self.current_offset
    }

    /// The requested range, normalized against the file size once the stream has started.
    pub fn byte_range(&self) -> ByteRange {
        self.range
    }

    /// Available once the stream has resolved the file.
    pub fn file_metadata(&self) -> Option<&Arc<FileMetadata>> {
        self.metadata.as_ref()
    }

    /// Stops the stream and aborts outstanding downloads. A no-op once the stream has finished.
    pub fn cancel(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        let n_cancelled = self.release();
        self.state = StreamState::Cancelled;
        info!(file_id = %self.file_id, current_offset = self.current_offset, n_cancelled, "Fragment stream cancelled");
    }

    fn release(&mut self) -> usize {
        self.starting = None;
        self.handles.take().map(|mut h| h.cancel()).unwrap_or(0)
    }

    fn fail(&mut self, err: DirectIoError) -> DirectIoError {
        let n_cancelled = self.release();
        self.state = StreamState::Failed;
        info!(
            file_id = %self.file_id,
            current_offset = self.current_offset,
            n_cancelled,
            error = %err,
            "Fragment stream failed"
        );
        DirectIoError::Stream {
            current_offset: self.current_offset,
            source: Box::new(err),
        }
    }

    fn poll_start(&mut self, cx: &mut Context<'_>) -> Poll<Result<()>> {
        let Some(starting) = self.starting.as_mut() else {
            return Poll::Ready(Ok(()));
        };

        let started = ready!(starting.as_mut().poll(cx));
        self.starting = None;
        let started = started?;

        debug!(
            file_id = %self.file_id,
            start = started.range.start,
            end = ?started.range.bounded_end(),
            num_chunks = started.handles.len(),
            "Fragment stream started"
        );

        self.range = started.range;
        self.metadata = Some(started.metadata);
        self.handles = Some(started.handles);
        Poll::Ready(Ok(()))
    }
}

impl Stream for FragmentStream {
    type Item = Result<Fragment>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.state.is_terminal() {
            return Poll::Ready(None);
        }
        this.state = StreamState::Streaming;

        if let Err(e) = ready!(this.poll_start(cx)) {
            return Poll::Ready(Some(Err(this.fail(e))));
        }

        loop {
            let next = match this.handles.as_mut() {
                Some(handles) => ready!(handles.poll_next_block(cx)),
                None => None,
            };

            match next {
                None => {
                    this.handles = None;
                    this.state = StreamState::Completed;
                    debug!(file_id = %this.file_id, current_offset = this.current_offset, "Fragment stream completed");
                    return Poll::Ready(None);
                },
                Some(Err(e)) => return Poll::Ready(Some(Err(this.fail(e)))),
                Some(Ok(block)) => {
                    let fragment = block.into_fragment(&this.range);
                    if fragment.is_empty() {
                        continue;
                    }
                    this.current_offset = fragment.end();
                    return Poll::Ready(Some(Ok(fragment)));
                },
            }
        }
    }
}

impl Drop for FragmentStream {
    fn drop(&mut self) {
        if self.state == StreamState::Streaming {
            self.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use directio_client::client_testing_utils::ClientTestingUtils;
    use directio_client::{LocalClient, StoredFileOptions};
    use futures::StreamExt;
    use tracing_test::traced_test;

    use super::*;

    fn credentials() -> Credentials {
        Credentials::key_pair("AKID", "")
    }

    fn stream(client: &Arc<LocalClient>, file_id: &str, range: ByteRange) -> FragmentStream {
        FragmentStream::new(client.clone(), credentials(), file_id, range, 4)
    }

    #[tokio::test]
    async fn test_lazy_start() {
        let client = LocalClient::new();
        client
            .upload_random_file("f", &[10, 10], &StoredFileOptions::default())
            .await
            .unwrap();

        let mut s = stream(&client, "f", ByteRange::full());
        assert_eq!(s.state(), StreamState::Idle);
        assert!(s.file_metadata().is_none());
        assert_eq!(client.metadata_request_count(), 0);

        let first = s.next().await.unwrap().unwrap();
        assert_eq!(first.offset, 0);
        assert_eq!(s.state(), StreamState::Streaming);
        assert_eq!(s.file_metadata().unwrap().size(), 20);
        assert_eq!(s.current_offset(), 10);

        assert!(s.next().await.unwrap().is_ok());
        assert!(s.next().await.is_none());
        assert_eq!(s.state(), StreamState::Completed);
        assert!(s.next().await.is_none());
    }

    #[tokio::test]
    async fn test_range_is_normalized() {
        let client = LocalClient::new();
        client
            .upload_random_file("f", &[10, 10], &StoredFileOptions::default())
            .await
            .unwrap();

        let mut s = stream(&client, "f", ByteRange::new(5, Some(500)).unwrap());
        let fragments: Vec<_> = (&mut s).collect().await;
        assert_eq!(fragments.len(), 2);
        assert!(s.byte_range().eof);
        assert_eq!(s.current_offset(), 20);
    }

    #[tokio::test]
    async fn test_resolve_failure_is_stream_error() {
        let client = LocalClient::new();
        let mut s = stream(&client, "missing", ByteRange::new(7, None).unwrap());

        let err = s.next().await.unwrap().unwrap_err();
        assert!(matches!(err, DirectIoError::Stream { current_offset: 7, ref source } if matches!(**source, DirectIoError::NotFound(_))));
        assert_eq!(s.state(), StreamState::Failed);
        assert!(s.next().await.is_none());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_block_failure_cancels_rest() {
        let client = LocalClient::new();
        let file = client
            .upload_random_file("f", &[10, 10, 10, 10], &StoredFileOptions::default())
            .await
            .unwrap();
        client.set_chunk_failure("f", 1).await.unwrap();
        for i in 2..4 {
            client.set_chunk_delay("f", i, Duration::from_secs(30)).await.unwrap();
        }

        let mut s = stream(&client, "f", ByteRange::full());
        let first = s.next().await.unwrap().unwrap();
        assert_eq!(&first.data[..], file.chunk_data(0));

        let err = s.next().await.unwrap().unwrap_err();
        assert!(matches!(err, DirectIoError::Stream { current_offset: 10, .. }));
        assert_eq!(err.chunk_context().unwrap().index, 2);
        assert_eq!(s.state(), StreamState::Failed);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(client.in_flight(), 0);
        assert_eq!(client.chunk_downloads_completed(), 1);
        assert!(logs_contain("Fragment stream failed"));
        assert!(logs_contain("current_offset=10"));
    }

    #[tokio::test]
    async fn test_cancel_and_drop() {
        let client = LocalClient::new();
        client
            .upload_random_file("f", &[10, 10, 10], &StoredFileOptions::default())
            .await
            .unwrap();
        for i in 1..3 {
            client.set_chunk_delay("f", i, Duration::from_secs(30)).await.unwrap();
        }

        let mut s = stream(&client, "f", ByteRange::full());
        assert!(s.next().await.unwrap().is_ok());
        s.cancel();
        assert_eq!(s.state(), StreamState::Cancelled);
        s.cancel();
        assert!(s.next().await.is_none());

        let mut s = stream(&client, "f", ByteRange::full());
        assert!(s.next().await.unwrap().is_ok());
        drop(s);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(client.in_flight(), 0);
        assert_eq!(client.chunk_downloads_completed(), 2);
    }
}
