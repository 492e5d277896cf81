//! Output queue and the per-session write task.
//!
//! Encoded frames land in the `output` queue under a small mutex so that
//! `write` stays callable from any thread. `flush` wakes the write task,
//! which swaps the whole queue into a private writing set whenever that
//! set is empty, issues a single vectored write over all buffers, and
//! loops while more output has accumulated. Frames therefore reach the
//! wire in submission order, and reads proceed concurrently.

use std::io::IoSlice;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;

/// Shared handle between the session and its write task.
pub(crate) struct WriteQueue {
    output: Mutex<Vec<Vec<u8>>>,
    notify: Notify,
    closed: AtomicBool,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self {
            output: Mutex::new(Vec::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Append an encoded frame to the output queue.
    pub fn push(&self, frame: Vec<u8>) {
        self.output.lock().expect("output mutex poisoned").push(frame);
    }

    /// Wake the write task.
    pub fn flush(&self) {
        self.notify.notify_one();
    }

    /// Stop the write task after its current batch.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn take(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.output.lock().expect("output mutex poisoned"))
    }
}

/// Drain the queue into the socket until the queue is closed or the write
/// fails. One iteration of the inner loop is one swapped writing set and
/// one vectored write.
pub(crate) async fn write_loop<W>(mut writer: W, queue: &WriteQueue) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        queue.notify.notified().await;
        loop {
            if queue.is_closed() {
                return Ok(());
            }
            let writing = queue.take();
            if writing.is_empty() {
                break;
            }
            write_all_vectored(&mut writer, &writing).await?;
        }
    }
}

/// Write every buffer with as few syscalls as possible, resuming after
/// partial writes.
async fn write_all_vectored<W>(writer: &mut W, buffers: &[Vec<u8>]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total: usize = buffers.iter().map(Vec::len).sum();
    let mut written = 0usize;

    while written < total {
        let slices = remaining_slices(buffers, written);
        let n = writer.write_vectored(&slices).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            ));
        }
        written += n;
    }

    writer.flush().await
}

/// Build the IoSlice array for everything past the first `skip` bytes.
fn remaining_slices(buffers: &[Vec<u8>], skip: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(buffers.len());
    let mut consumed = 0usize;

    for buffer in buffers {
        let end = consumed + buffer.len();
        if skip < end {
            let start = skip.saturating_sub(consumed);
            slices.push(IoSlice::new(&buffer[start..]));
        }
        consumed = end;
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt};

    #[test]
    fn remaining_slices_no_skip() {
        let buffers = vec![vec![1u8; 24], vec![2u8; 5]];
        let slices = remaining_slices(&buffers, 0);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), 24);
        assert_eq!(slices[1].len(), 5);
    }

    #[test]
    fn remaining_slices_partial_first_buffer() {
        let buffers = vec![vec![1u8; 24], vec![2u8; 5]];
        let slices = remaining_slices(&buffers, 10);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), 14);
        assert_eq!(slices[1].len(), 5);
    }

    #[test]
    fn remaining_slices_skip_whole_buffer() {
        let buffers = vec![vec![1u8; 24], vec![2u8; 5]];
        let slices = remaining_slices(&buffers, 24);
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].len(), 5);
    }

    #[tokio::test]
    async fn write_all_vectored_single_pass() {
        let mut cursor = Cursor::new(Vec::new());
        let buffers = vec![b"hello ".to_vec(), b"world".to_vec()];

        write_all_vectored(&mut cursor, &buffers).await.unwrap();
        assert_eq!(cursor.into_inner(), b"hello world");
    }

    #[tokio::test]
    async fn queued_frames_arrive_in_order() {
        let (client, mut server) = duplex(4096);
        let queue = Arc::new(WriteQueue::new());

        let task = {
            let queue = queue.clone();
            tokio::spawn(async move { write_loop(client, &queue).await })
        };

        for i in 0..10u8 {
            queue.push(vec![i; 3]);
        }
        queue.flush();

        let mut buf = vec![0u8; 30];
        server.read_exact(&mut buf).await.unwrap();
        for i in 0..10u8 {
            assert_eq!(&buf[usize::from(i) * 3..usize::from(i) * 3 + 3], &[i; 3]);
        }

        queue.close();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn flush_after_close_is_a_no_op() {
        let (client, _server) = duplex(64);
        let queue = Arc::new(WriteQueue::new());

        let task = {
            let queue = queue.clone();
            tokio::spawn(async move { write_loop(client, &queue).await })
        };

        queue.close();
        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());

        queue.push(vec![1, 2, 3]);
        queue.flush();
    }
}
