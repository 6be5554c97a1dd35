pub mod pipe;

pub use pipe::{BlockingContent, ContentStream, PipeWriter, pipe};

use bytes::Bytes;
use std::io::{self, Read};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::archive::Container;

/// Chunking parameters for one extraction
#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
    pub chunk_size: usize,
    pub pipe_depth: usize,
}

/// Start decompressing `name` from `container` into a fresh pipe.
///
/// Returns the consumer end immediately. The work runs on a blocking worker
/// once one of `workers`' permits is free; the task owns its own reference
/// to the container, so closing the archive that handed it out doesn't cut
/// the stream short.
pub fn spawn_extraction(
    container: Arc<dyn Container>,
    name: String,
    workers: Arc<Semaphore>,
    options: StreamOptions,
    cancel: CancellationToken,
) -> ContentStream {
    let (writer, reader) = pipe(options.pipe_depth);

    tokio::spawn(async move {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                writer.fail(pipe::cancelled_error());
                return;
            }
            permit = workers.acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    writer.fail(io::Error::other("extraction workers shut down"));
                    return;
                }
            },
        };

        let handle = Handle::current();
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            debug!(entry = %name, "extraction started");
            match pump(&*container, &name, &writer, &handle, options.chunk_size, &cancel) {
                Ok(bytes) => {
                    debug!(entry = %name, bytes, "extraction finished");
                    writer.finish_blocking(&handle);
                }
                Err(err) if err.kind() == io::ErrorKind::ConnectionAborted => {
                    debug!(entry = %name, "extraction cancelled");
                    writer.fail(err);
                }
                Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                    trace!(entry = %name, "consumer went away");
                }
                Err(err) => {
                    warn!(entry = %name, error = %err, "extraction failed");
                    writer.fail(err);
                }
            }
        });

        // A panicking worker drops its writer, which the consumer reads as an error.
        if let Err(err) = task.await {
            warn!(error = %err, "extraction worker died");
        }
    });

    reader
}

/// Copy one entry into the pipe chunk by chunk. Returns the bytes written.
fn pump(
    container: &dyn Container,
    name: &str,
    writer: &PipeWriter,
    handle: &Handle,
    chunk_size: usize,
    cancel: &CancellationToken,
) -> io::Result<u64> {
    if cancel.is_cancelled() {
        return Err(pipe::cancelled_error());
    }

    let mut written = 0u64;
    container.with_entry_reader(name, &mut |reader: &mut dyn Read| {
        // Scratch buffer and decoder are released when this closure returns,
        // whatever the outcome.
        let mut scratch = vec![0u8; chunk_size];
        loop {
            let n = match reader.read(&mut scratch) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if cancel.is_cancelled() {
                return Err(pipe::cancelled_error());
            }
            writer.write_blocking(handle, Bytes::copy_from_slice(&scratch[..n]), cancel)?;
            written += n as u64;
        }
    })?;

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::Container;
    use crate::error::Result;
    use crate::vfs::Entry;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::AsyncReadExt;

    struct BytesContainer {
        data: Vec<u8>,
    }

    impl Container for BytesContainer {
        fn entries(&self) -> Result<Vec<Entry>> {
            Ok(vec![Entry::file("blob", self.data.len() as u64, None)])
        }

        fn with_entry_reader(
            &self,
            name: &str,
            read: &mut dyn FnMut(&mut dyn Read) -> io::Result<()>,
        ) -> io::Result<()> {
            if name != "blob" {
                return Err(io::Error::new(io::ErrorKind::NotFound, name.to_string()));
            }
            read(&mut Cursor::new(&self.data))
        }
    }

    /// Yields a few bytes and then fails like a corrupt deflate stream
    struct BrokenContainer {
        reads: AtomicUsize,
    }

    impl Container for BrokenContainer {
        fn entries(&self) -> Result<Vec<Entry>> {
            Ok(vec![])
        }

        fn with_entry_reader(
            &self,
            _name: &str,
            read: &mut dyn FnMut(&mut dyn Read) -> io::Result<()>,
        ) -> io::Result<()> {
            struct Failing<'a>(&'a AtomicUsize);
            impl Read for Failing<'_> {
                fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                    if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
                        buf[0] = b'x';
                        Ok(1)
                    } else {
                        Err(io::Error::new(io::ErrorKind::InvalidData, "corrupt deflate"))
                    }
                }
            }
            read(&mut Failing(&self.reads))
        }
    }

    fn options() -> StreamOptions {
        StreamOptions {
            chunk_size: 7,
            pipe_depth: 2,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_streams_exact_content() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let container: Arc<dyn Container> = Arc::new(BytesContainer { data: data.clone() });

        let stream = spawn_extraction(
            container,
            "blob".to_string(),
            Arc::new(Semaphore::new(1)),
            options(),
            CancellationToken::new(),
        );

        assert_eq!(stream.read_to_vec().await.unwrap(), data);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_decode_failure_reaches_consumer() {
        let container: Arc<dyn Container> = Arc::new(BrokenContainer {
            reads: AtomicUsize::new(0),
        });

        let stream = spawn_extraction(
            container,
            "any".to_string(),
            Arc::new(Semaphore::new(1)),
            options(),
            CancellationToken::new(),
        );

        let err = stream.read_to_vec().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_entry_reaches_consumer() {
        let container: Arc<dyn Container> = Arc::new(BytesContainer { data: vec![1, 2, 3] });
        let stream = spawn_extraction(
            container,
            "nope".to_string(),
            Arc::new(Semaphore::new(1)),
            options(),
            CancellationToken::new(),
        );
        let err = stream.read_to_vec().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancel_mid_stream_is_an_error() {
        let data = vec![9u8; 1_000_000];
        let container: Arc<dyn Container> = Arc::new(BytesContainer { data });
        let cancel = CancellationToken::new();

        let mut stream = spawn_extraction(
            container,
            "blob".to_string(),
            Arc::new(Semaphore::new(1)),
            options(),
            cancel.clone(),
        );

        let mut first = [0u8; 7];
        stream.read_exact(&mut first).await.unwrap();
        cancel.cancel();

        let mut rest = Vec::new();
        let err = stream.read_to_end(&mut rest).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
        assert!(rest.len() + first.len() < 1_000_000);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_decode_failure_survives_slow_consumer() {
        let container: Arc<dyn Container> = Arc::new(BrokenContainer {
            reads: AtomicUsize::new(0),
        });

        let stream = spawn_extraction(
            container,
            "any".to_string(),
            Arc::new(Semaphore::new(1)),
            StreamOptions {
                chunk_size: 16,
                pipe_depth: 1,
            },
            CancellationToken::new(),
        );

        // The first chunk fills the pipe before the decoder fails
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let err = stream.read_to_vec().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert_eq!(err.to_string(), "corrupt deflate");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancel_before_start() {
        let container: Arc<dyn Container> = Arc::new(BytesContainer { data: vec![1; 16] });
        let cancel = CancellationToken::new();
        cancel.cancel();

        let stream = spawn_extraction(
            container,
            "blob".to_string(),
            Arc::new(Semaphore::new(1)),
            options(),
            cancel,
        );
        let err = stream.read_to_vec().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
    }
}
