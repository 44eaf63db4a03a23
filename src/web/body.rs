//! Streaming response body for the download route
//!
//! Reads the shared file frame by frame and fires a one-time
//! completion signal once the final byte has been handed to the
//! connection. The listener uses that signal to trigger the
//! finishing-download shutdown from a separate task, never from the
//! connection serving the response.

use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::fs::File;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;

const CHUNK_SIZE: usize = 64 * 1024;

pub struct FileBody {
    file: File,
    remaining: u64,
    completion: Option<mpsc::UnboundedSender<()>>,
}

impl FileBody {
    pub fn new(file: File, len: u64, completion: mpsc::UnboundedSender<()>) -> Self {
        Self {
            file,
            remaining: len,
            completion: Some(completion),
        }
    }

    fn notify_complete(&mut self) {
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(());
        }
    }
}

impl Body for FileBody {
    type Data = Bytes;
    type Error = std::io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Self::Error>>> {
        let this = self.get_mut();
        if this.remaining == 0 {
            this.notify_complete();
            return Poll::Ready(None);
        }

        let mut buf = vec![0u8; CHUNK_SIZE.min(this.remaining as usize)];
        let mut read_buf = ReadBuf::new(&mut buf);
        match Pin::new(&mut this.file).poll_read(cx, &mut read_buf) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(e)) => Poll::Ready(Some(Err(e))),
            Poll::Ready(Ok(())) => {
                let n = read_buf.filled().len();
                if n == 0 {
                    // File shorter than advertised; treat as done
                    this.remaining = 0;
                    this.notify_complete();
                    return Poll::Ready(None);
                }
                this.remaining -= n as u64;
                buf.truncate(n);
                if this.remaining == 0 {
                    this.notify_complete();
                }
                Poll::Ready(Some(Ok(Frame::data(Bytes::from(buf)))))
            },
        }
    }

    fn is_end_stream(&self) -> bool {
        self.remaining == 0
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn streams_whole_file_and_signals_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        tokio::fs::write(&path, &payload).await.unwrap();

        let file = File::open(&path).await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut body = FileBody::new(file, payload.len() as u64, tx);

        let mut collected = Vec::new();
        while let Some(frame) = body.frame().await {
            let frame = frame.unwrap();
            if let Some(data) = frame.data_ref() {
                collected.extend_from_slice(data);
            }
        }

        assert_eq!(collected, payload);
        assert_eq!(rx.try_recv(), Ok(()));
        // Exactly once
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn empty_file_still_signals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        tokio::fs::write(&path, b"").await.unwrap();

        let file = File::open(&path).await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut body = FileBody::new(file, 0, tx);

        assert!(body.frame().await.is_none());
        assert_eq!(rx.try_recv(), Ok(()));
    }
}
