//! Block reassembly pipe.
//!
//! A single-consumer, multi-producer pipe that accepts byte blocks written
//! at arbitrary offsets in arbitrary completion order and exposes them to
//! one reader as a strictly ordered byte stream. Parallel range downloads
//! write blocks as they arrive; the reader blocks until the block at its
//! cursor is present or a terminal condition is set.
//!
//! The reassembly buffer is unbounded: a producer that outruns a stalled
//! reader grows memory until the buffer drains. This is a known limitation.

use bytes::Bytes;
use silo_core::Error;
use std::collections::BTreeMap;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};
use tokio::io::{AsyncRead, ReadBuf};

/// Create a connected writer/reader pair.
pub fn new() -> (PipeWriter, PipeReader) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            buffer: BTreeMap::new(),
            position: 0,
            current: None,
            terminal: None,
            waker: None,
        }),
    });
    (
        PipeWriter {
            shared: shared.clone(),
        },
        PipeReader { shared },
    )
}

struct Shared {
    state: Mutex<State>,
}

struct State {
    /// Blocks that have arrived but not yet been consumed, keyed by offset.
    buffer: BTreeMap<u64, Bytes>,
    /// Absolute position of the reader cursor.
    position: u64,
    /// The block currently being consumed: (offset, data).
    current: Option<(u64, Bytes)>,
    /// Sticky terminal condition. `None` while open, `Ok(())` after a
    /// normal close, `Err` after a failed close or a failed contiguity
    /// check.
    terminal: Option<Result<(), Error>>,
    /// Waker of a reader blocked on its cursor block.
    waker: Option<Waker>,
}

impl State {
    fn current_consumed(&self) -> bool {
        match &self.current {
            Some((offset, data)) => self.position >= offset + data.len() as u64,
            None => true,
        }
    }

    /// End of the byte run the reader has been handed so far.
    fn consumed_end(&self) -> u64 {
        match &self.current {
            Some((offset, data)) => offset + data.len() as u64,
            None => self.position,
        }
    }

    fn all_read(&self) -> Option<Result<(), Error>> {
        match &self.terminal {
            None => None,
            Some(Err(err)) => Some(Err(err.clone())),
            Some(Ok(())) => {
                if self.buffer.is_empty() && self.position >= self.consumed_end() {
                    Some(Ok(()))
                } else {
                    None
                }
            }
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("pipe state poisoned")
    }

    fn terminate(&self, result: Result<(), Error>) {
        let mut state = self.lock();
        if state.terminal.is_some() {
            return;
        }
        let mut result = result;
        if result.is_ok() {
            // Contiguity check: every buffered block must chain gap-free
            // from the end of what the reader has been handed. A producer
            // that declared success while leaving a gap turns into a
            // broken-stream error instead of a silent short read.
            let mut pos = state.consumed_end();
            let mut chained = 0usize;
            while let Some(data) = state.buffer.get(&pos) {
                pos += data.len() as u64;
                chained += 1;
            }
            if chained != state.buffer.len() {
                result = Err(Error::BrokenStream);
            }
        }
        state.terminal = Some(result);
        if let Some(waker) = state.waker.take() {
            waker.wake();
        }
    }
}

/// Write half of the pipe. Clone freely; each producer task holds one.
#[derive(Clone)]
pub struct PipeWriter {
    shared: Arc<Shared>,
}

impl PipeWriter {
    /// Write a block of data at the given absolute offset.
    ///
    /// Safe to call concurrently from multiple tasks as long as blocks do
    /// not overlap; overlapping blocks corrupt the stream. The bytes are
    /// copied into an owned block. Empty blocks are ignored.
    pub fn write_at(&self, data: &[u8], offset: u64) {
        if data.is_empty() {
            return;
        }
        let mut state = self.shared.lock();
        state.buffer.insert(offset, Bytes::copy_from_slice(data));
        if let Some(waker) = state.waker.take() {
            waker.wake();
        }
    }

    /// Close the pipe normally. The reader consumes the remaining blocks
    /// and then observes end-of-stream, unless the buffered blocks do not
    /// form a contiguous run, in which case it observes
    /// [`Error::BrokenStream`].
    pub fn close(&self) {
        self.shared.terminate(Ok(()));
    }

    /// Close the pipe with an error. Every subsequent read returns the
    /// error with zero bytes, regardless of buffered data. The first close
    /// wins; later closes are no-ops.
    pub fn close_with_error(&self, err: Error) {
        self.shared.terminate(Err(err));
    }
}

/// Read half of the pipe. Single consumer; reads block until the block at
/// the cursor offset arrives or a terminal condition is set.
pub struct PipeReader {
    shared: Arc<Shared>,
}

impl AsyncRead for PipeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut state = self.shared.lock();

        loop {
            if let Some(terminal) = state.all_read() {
                return Poll::Ready(terminal.map_err(io::Error::other));
            }
            if !state.current_consumed() {
                break;
            }
            let position = state.position;
            match state.buffer.remove(&position) {
                Some(data) => {
                    state.current = Some((position, data));
                    break;
                }
                None => {
                    // The cursor block has not arrived yet.
                    state.waker = Some(cx.waker().clone());
                    return Poll::Pending;
                }
            }
        }

        let (n, consumed) = {
            let (offset, data) = state.current.as_ref().expect("current block present");
            let skip = (state.position - offset) as usize;
            let n = (data.len() - skip).min(buf.remaining());
            buf.put_slice(&data[skip..skip + n]);
            (n, skip + n == data.len())
        };
        state.position += n as u64;
        if consumed {
            state.current = None;
        }
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn write_sequential(writer: &PipeWriter, blocks: &[&[u8]]) {
        let mut offset = 0u64;
        for block in blocks {
            writer.write_at(block, offset);
            offset += block.len() as u64;
        }
    }

    #[tokio::test]
    async fn test_read_one_block() {
        let (writer, mut reader) = new();
        writer.write_at(b"hello", 0);
        writer.close();

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn test_read_multiple_blocks() {
        let (writer, mut reader) = new();
        write_sequential(&writer, &[b"he", b"llo"]);
        writer.close();

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn test_out_of_order_blocks() {
        let (writer, mut reader) = new();
        writer.write_at(b"llo", 2);
        writer.write_at(b"he", 0);
        writer.close();

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn test_reader_blocks_until_block_arrives() {
        let (writer, mut reader) = new();
        writer.write_at(b"wor", 5);

        let handle = tokio::spawn(async move {
            let mut out = Vec::new();
            reader.read_to_end(&mut out).await.unwrap();
            out
        });

        tokio::task::yield_now().await;
        writer.write_at(b"hello", 0);
        writer.write_at(b"ld", 8);
        writer.close();
        assert_eq!(handle.await.unwrap(), b"helloworld");
    }

    #[tokio::test]
    async fn test_close_with_error_is_sticky() {
        let (writer, mut reader) = new();
        writer.write_at(b"hello", 0);

        let mut buf = [0u8; 2];
        reader.read(&mut buf).await.unwrap();
        writer.close_with_error(Error::backend("s3 get", "oops"));

        for _ in 0..2 {
            let err = reader.read(&mut buf).await.unwrap_err();
            assert_eq!(
                Error::from(err),
                Error::backend("s3 get", "oops"),
                "buffered data must not be delivered after an error close"
            );
        }
    }

    #[tokio::test]
    async fn test_first_close_wins() {
        let (writer, mut reader) = new();
        writer.close_with_error(Error::BrokenStream);
        writer.close();

        let err = reader.read(&mut [0u8; 4]).await.unwrap_err();
        assert_eq!(Error::from(err), Error::BrokenStream);
    }

    #[tokio::test]
    async fn test_gap_yields_broken_stream() {
        let (writer, mut reader) = new();
        writer.write_at(b"he", 0);
        writer.write_at(b"o", 4);
        writer.close();

        let err = reader.read(&mut [0u8; 10]).await.unwrap_err();
        assert_eq!(Error::from(err), Error::BrokenStream);
    }

    #[tokio::test]
    async fn test_gap_after_partial_read_yields_broken_stream() {
        let (writer, mut reader) = new();
        writer.write_at(b"hell", 0);
        writer.write_at(b"world", 6);

        // Start consuming the first block, then close with a gap at 4..6.
        let mut buf = [0u8; 2];
        reader.read(&mut buf).await.unwrap();
        writer.close();

        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).await.unwrap_err();
        assert_eq!(Error::from(err), Error::BrokenStream);
    }

    #[tokio::test]
    async fn test_empty_stream_close_is_clean_eof() {
        let (writer, mut reader) = new();
        writer.close();

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_reassemble_in_order() {
        const BLOCK: usize = 512;
        const BLOCKS: usize = 96;
        const WRITERS: usize = 8;

        let want: Vec<u8> = (0..BLOCK * BLOCKS).map(|i| (i % 251) as u8).collect();
        let (writer, mut reader) = new();

        let mut handles = Vec::new();
        for w in 0..WRITERS {
            let writer = writer.clone();
            let want = want.clone();
            handles.push(tokio::spawn(async move {
                // Each writer takes every WRITERS-th block, walking its
                // share back to front so arrival order is well scrambled.
                for i in (0..BLOCKS).filter(|i| i % WRITERS == w).rev() {
                    let offset = i * BLOCK;
                    writer.write_at(&want[offset..offset + BLOCK], offset as u64);
                    tokio::task::yield_now().await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        writer.close();

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, want);
    }
}
