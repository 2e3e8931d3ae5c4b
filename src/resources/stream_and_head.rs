//! Backpressured PUT→GET relay with a head-prefix capture for late-joining
//! probers, grounded on `resources/StreamAndHeadResource.cpp`.
//!
//! The PUT writer blocks once the buffer is full, except when the buffer is
//! empty (so a single chunk larger than the buffer never deadlocks). The
//! (single) stream GET reader pops chunks off the front and frees buffer
//! space as it goes; the head GET waits for the first `head_size` bytes (or
//! end of stream, whichever comes first) and then returns a snapshot.

use crate::error::{Error, Result};
use crate::path::Path;
use crate::server::request::{Request, Type};
use crate::server::resource::Resource;
use crate::server::response::{CacheKind, Response};
use crate::util::Event;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

pub struct StreamAndHead {
    buffer_size: usize,
    head_size: usize,
    chunks: Mutex<VecDeque<Bytes>>,
    buffer_used: AtomicUsize,
    put_claimed: AtomicBool,
    put_done: AtomicBool,
    pop_event: Event,
    push_event: Event,
    head_buffer: Mutex<Vec<u8>>,
    head_event: Event,
    stream_reader_claimed: AtomicBool,
}

impl StreamAndHead {
    pub fn new(buffer_size: usize, head_size: usize) -> Self {
        StreamAndHead {
            buffer_size,
            head_size,
            chunks: Mutex::new(VecDeque::new()),
            buffer_used: AtomicUsize::new(0),
            put_claimed: AtomicBool::new(false),
            put_done: AtomicBool::new(false),
            pop_event: Event::new(),
            push_event: Event::new(),
            head_buffer: Mutex::new(Vec::new()),
            head_event: Event::new(),
            stream_reader_claimed: AtomicBool::new(false),
        }
    }

    async fn handle_put(&self, req: &Request) -> Result<()> {
        if self.put_claimed.swap(true, Ordering::SeqCst) {
            return Err(Error::Conflict("stream already has a writer".into()));
        }
        loop {
            let chunk = req.read_some().await?;
            if chunk.is_empty() {
                self.put_done.store(true, Ordering::SeqCst);
                self.push_event.notify_all();
                self.head_event.notify_all();
                break;
            }
            loop {
                let notified = self.pop_event.notified();
                let used = self.buffer_used.load(Ordering::SeqCst);
                if used == 0 || used + chunk.len() <= self.buffer_size {
                    break;
                }
                notified.await;
            }
            self.buffer_used.fetch_add(chunk.len(), Ordering::SeqCst);
            {
                let mut head = self.head_buffer.lock().await;
                if head.len() < self.head_size {
                    let take = (self.head_size - head.len()).min(chunk.len());
                    head.extend_from_slice(&chunk[..take]);
                }
            }
            {
                let mut chunks = self.chunks.lock().await;
                chunks.push_back(chunk);
            }
            self.push_event.notify_all();
            self.head_event.notify_all();
        }
        Ok(())
    }

    async fn handle_stream_get(&self, resp: &Response) -> Result<()> {
        if self.stream_reader_claimed.swap(true, Ordering::SeqCst) {
            return Err(Error::Conflict("stream already has a reader".into()));
        }
        resp.set_cache_kind(CacheKind::None).await;
        loop {
            let notified = self.push_event.notified();
            let next = {
                let mut chunks = self.chunks.lock().await;
                chunks.pop_front()
            };
            match next {
                Some(chunk) => {
                    self.buffer_used.fetch_sub(chunk.len(), Ordering::SeqCst);
                    self.pop_event.notify_all();
                    resp.write(chunk).await;
                }
                None => {
                    if self.put_done.load(Ordering::SeqCst) {
                        break;
                    }
                    notified.await;
                }
            }
        }
        Ok(())
    }

    async fn handle_head_get(&self, resp: &Response) -> Result<()> {
        resp.set_cache_kind(CacheKind::None).await;
        loop {
            let notified = self.head_event.notified();
            let snapshot = {
                let head = self.head_buffer.lock().await;
                if head.len() >= self.head_size || self.put_done.load(Ordering::SeqCst) {
                    Some(head.clone())
                } else {
                    None
                }
            };
            if let Some(bytes) = snapshot {
                resp.write(Bytes::from(bytes)).await;
                break;
            }
            notified.await;
        }
        Ok(())
    }
}

#[async_trait]
impl Resource for StreamAndHead {
    async fn call(&self, path: Path, req: &Request, resp: &Response) -> Result<()> {
        match req.typ {
            Type::Put => self.handle_put(req).await,
            Type::Get if path.front() == Some("head") => self.handle_head_get(resp).await,
            Type::Get => self.handle_stream_get(resp).await,
            _ => Err(Error::UnsupportedType),
        }
    }

    fn allow_non_empty_path(&self) -> bool {
        true
    }

    fn max_length(&self, typ: Type) -> u64 {
        match typ {
            Type::Put | Type::Get => u64::MAX,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put_request(chunks: Vec<&'static str>) -> (Request, tokio::sync::mpsc::Sender<Bytes>) {
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        for c in &chunks {
            tx.try_send(Bytes::from(*c)).unwrap();
        }
        (Request::new(Path::root(), Type::Put, false, rx), tx)
    }

    #[tokio::test]
    async fn head_captures_prefix() {
        let sh = StreamAndHead::new(1024, 4);
        let (req, tx) = put_request(vec!["abcdefgh"]);
        drop(tx);
        sh.handle_put(&req).await.unwrap();
        let (body_tx, mut body_rx) = tokio::sync::mpsc::channel(8);
        let resp = Response::new(body_tx);
        sh.handle_head_get(&resp).await.unwrap();
        assert_eq!(body_rx.recv().await.unwrap(), Bytes::from("abcd"));
    }

    #[tokio::test]
    async fn stream_get_relays_all_bytes() {
        let sh = StreamAndHead::new(1024, 4);
        let (req, tx) = put_request(vec!["abc", "def"]);
        drop(tx);
        sh.handle_put(&req).await.unwrap();
        let (body_tx, mut body_rx) = tokio::sync::mpsc::channel(8);
        let resp = Response::new(body_tx);
        sh.handle_stream_get(&resp).await.unwrap();
        let mut total = Vec::new();
        while let Ok(chunk) = body_rx.try_recv() {
            total.extend_from_slice(&chunk);
        }
        assert_eq!(total, b"abcdef");
    }

    #[tokio::test]
    async fn second_writer_conflicts() {
        let sh = StreamAndHead::new(1024, 4);
        let (req1, tx1) = put_request(vec![]);
        drop(tx1);
        sh.handle_put(&req1).await.unwrap();
        let (req2, tx2) = put_request(vec![]);
        drop(tx2);
        assert!(sh.handle_put(&req2).await.is_err());
    }

    #[tokio::test]
    async fn large_chunk_does_not_deadlock_on_empty_buffer() {
        let sh = StreamAndHead::new(2, 0);
        let (req, tx) = put_request(vec!["abcdefgh"]);
        drop(tx);
        sh.handle_put(&req).await.unwrap();
        assert_eq!(sh.buffer_used.load(Ordering::SeqCst), 8);
    }
}
