//! Bounded one-way pipe between an extraction worker and its consumer.
//!
//! The producer end lives on a blocking worker thread; the consumer end is
//! either an [`AsyncRead`] ([`ContentStream`]) or a plain [`Read`]
//! ([`BlockingContent`]). A stream only ends cleanly when the producer says
//! so: failures, cancellation and a producer that disappears mid-stream all
//! surface as read errors, never as a short read.

use bytes::{Buf, Bytes};
use std::io::{self, Read};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

enum Frame {
    Data(Bytes),
    End,
}

/// Terminal error left by the producer, read once the channel runs dry
type FailureSlot = Arc<Mutex<Option<io::Error>>>;

/// Create a pipe buffering at most `depth` chunks
pub fn pipe(depth: usize) -> (PipeWriter, ContentStream) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    let failure = FailureSlot::default();
    (
        PipeWriter {
            tx,
            failure: Arc::clone(&failure),
        },
        ContentStream {
            rx,
            failure,
            pending: Bytes::new(),
            state: ReadState::Open,
        },
    )
}

pub(crate) fn cancelled_error() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "extraction cancelled")
}

/// Producer end of a pipe
pub struct PipeWriter {
    tx: mpsc::Sender<Frame>,
    failure: FailureSlot,
}

impl PipeWriter {
    /// Hand one chunk to the consumer, blocking while the pipe is full.
    ///
    /// Must be called from a blocking worker (e.g. `spawn_blocking`), never
    /// from async code. Gives up with `ConnectionAborted` once `cancel` fires and
    /// with `BrokenPipe` if the consumer went away.
    pub fn write_blocking(
        &self,
        handle: &Handle,
        chunk: Bytes,
        cancel: &CancellationToken,
    ) -> io::Result<()> {
        handle.block_on(async {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(cancelled_error()),
                sent = self.tx.send(Frame::Data(chunk)) => sent.map_err(|_| {
                    io::Error::new(io::ErrorKind::BrokenPipe, "content consumer closed")
                }),
            }
        })
    }

    /// Async flavour of [`write_blocking`](Self::write_blocking)
    pub async fn write(&self, chunk: Bytes, cancel: &CancellationToken) -> io::Result<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(cancelled_error()),
            sent = self.tx.send(Frame::Data(chunk)) => sent.map_err(|_| {
                io::Error::new(io::ErrorKind::BrokenPipe, "content consumer closed")
            }),
        }
    }

    /// Close cleanly; the consumer sees EOF after the last chunk
    pub fn finish_blocking(self, handle: &Handle) {
        let tx = self.tx;
        // A consumer that already left doesn't care how we ended.
        let _ = handle.block_on(tx.send(Frame::End));
    }

    pub async fn finish(self) {
        let _ = self.tx.send(Frame::End).await;
    }

    /// Close with an error the consumer reads instead of EOF.
    ///
    /// Never blocks. The error bypasses the bounded buffer, so the consumer
    /// gets it after the chunks already queued however full the pipe is.
    pub fn fail(self, err: io::Error) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(err);
        // Dropping the sender after the slot is set ends the channel.
        drop(self.tx);
    }
}

#[derive(Debug)]
enum ReadState {
    Open,
    Done,
    Failed(io::ErrorKind, String),
}

/// Consumer end of a pipe
pub struct ContentStream {
    rx: mpsc::Receiver<Frame>,
    failure: FailureSlot,
    pending: Bytes,
    state: ReadState,
}

impl ContentStream {
    /// Convert into a synchronous reader.
    ///
    /// The returned reader blocks the calling thread; use it from a plain
    /// thread or `spawn_blocking`, not from inside an async task.
    pub fn into_blocking(self) -> BlockingContent {
        BlockingContent { inner: self }
    }

    /// Read the whole stream into memory
    pub async fn read_to_vec(mut self) -> io::Result<Vec<u8>> {
        use tokio::io::AsyncReadExt;
        let mut out = Vec::new();
        self.read_to_end(&mut out).await?;
        Ok(out)
    }

    fn error(&self) -> Option<io::Error> {
        match &self.state {
            ReadState::Failed(kind, msg) => Some(io::Error::new(*kind, msg.clone())),
            _ => None,
        }
    }

    /// Account for one received frame. Returns an error for terminal failures.
    fn accept(&mut self, frame: Option<Frame>) -> io::Result<()> {
        match frame {
            Some(Frame::Data(chunk)) => {
                self.pending = chunk;
                Ok(())
            }
            Some(Frame::End) => {
                self.state = ReadState::Done;
                Ok(())
            }
            None => {
                let failure = self
                    .failure
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                let err = failure.unwrap_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "content producer stopped before the end of the stream",
                    )
                });
                self.state = ReadState::Failed(err.kind(), err.to_string());
                Err(err)
            }
        }
    }

    fn drain_into(&mut self, dst: &mut [u8]) -> usize {
        let n = self.pending.len().min(dst.len());
        dst[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        n
    }
}

impl AsyncRead for ContentStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if buf.remaining() == 0 {
                return Poll::Ready(Ok(()));
            }
            if !this.pending.is_empty() {
                let n = this.pending.len().min(buf.remaining());
                buf.put_slice(&this.pending[..n]);
                this.pending.advance(n);
                return Poll::Ready(Ok(()));
            }
            match this.state {
                ReadState::Done => return Poll::Ready(Ok(())),
                ReadState::Failed(..) => {
                    return Poll::Ready(Err(this.error().unwrap_or_else(cancelled_error)));
                }
                ReadState::Open => {}
            }

            let frame = ready!(this.rx.poll_recv(cx));
            this.accept(frame)?;
        }
    }
}

/// Blocking [`Read`] view of a [`ContentStream`]
pub struct BlockingContent {
    inner: ContentStream,
}

impl Read for BlockingContent {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let inner = &mut self.inner;
        loop {
            if buf.is_empty() {
                return Ok(0);
            }
            if !inner.pending.is_empty() {
                return Ok(inner.drain_into(buf));
            }
            match inner.state {
                ReadState::Done => return Ok(0),
                ReadState::Failed(..) => {
                    return Err(inner.error().unwrap_or_else(cancelled_error));
                }
                ReadState::Open => {}
            }

            let frame = inner.rx.blocking_recv();
            inner.accept(frame)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_clean_finish_reads_all_bytes() {
        let (writer, reader) = pipe(2);
        let cancel = CancellationToken::new();

        tokio::spawn(async move {
            writer.write(Bytes::from_static(b"hello "), &cancel).await.unwrap();
            writer.write(Bytes::from_static(b"world"), &cancel).await.unwrap();
            writer.finish().await;
        });

        assert_eq!(reader.read_to_vec().await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_failure_is_not_eof() {
        let (writer, mut reader) = pipe(2);
        let cancel = CancellationToken::new();
        writer.write(Bytes::from_static(b"part"), &cancel).await.unwrap();
        writer.fail(io::Error::other("inflate failed"));

        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).await.unwrap_err();
        assert_eq!(err.to_string(), "inflate failed");
        assert_eq!(out, b"part");

        // The error is sticky
        let mut buf = [0u8; 4];
        assert!(reader.read(&mut buf).await.is_err());
    }

    #[tokio::test]
    async fn test_dropped_producer_is_an_error() {
        let (writer, reader) = pipe(1);
        drop(writer);
        let err = reader.read_to_vec().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_failure_on_full_pipe_keeps_its_kind() {
        let (writer, mut reader) = pipe(1);
        let cancel = CancellationToken::new();
        writer.write(Bytes::from_static(b"queued"), &cancel).await.unwrap();
        writer.fail(cancelled_error());

        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).await.unwrap_err();
        assert_eq!(out, b"queued");
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
    }

    #[tokio::test]
    async fn test_cancelled_write_returns_connection_aborted() {
        let (writer, _reader) = pipe(1);
        let cancel = CancellationToken::new();
        // Fill the single slot, then cancel while the next write waits
        writer.write(Bytes::from_static(b"a"), &cancel).await.unwrap();
        cancel.cancel();
        let err = writer.write(Bytes::from_static(b"b"), &cancel).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
    }

    #[tokio::test]
    async fn test_write_after_consumer_dropped_is_broken_pipe() {
        let (writer, reader) = pipe(1);
        drop(reader);
        let err = writer
            .write(Bytes::from_static(b"x"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_blocking_reader() {
        let (writer, reader) = pipe(1);
        let handle = Handle::current();

        let producer = tokio::task::spawn_blocking(move || {
            let cancel = CancellationToken::new();
            for chunk in [&b"ab"[..], b"cd", b"ef"] {
                writer
                    .write_blocking(&handle, Bytes::copy_from_slice(chunk), &cancel)
                    .unwrap();
            }
            writer.finish_blocking(&handle);
        });

        let consumed = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            reader.into_blocking().read_to_end(&mut out).map(|_| out)
        });

        producer.await.unwrap();
        assert_eq!(consumed.await.unwrap().unwrap(), b"abcdef");
    }
}
