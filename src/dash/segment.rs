//! A single DASH segment: a PUT→GET bridge that fans its body out into one
//! substream of an enclosing interleave, and optionally retains the body
//! in memory for direct segment GETs (grounded on `dash/SegmentResource.cpp`).

use crate::dash::coordinator::Coordinator;
use crate::dash::interleave::Interleave;
use crate::error::{Error, Result};
use crate::path::Path;
use crate::server::request::{Request, Type};
use crate::server::resource::Resource;
use crate::server::response::{CacheKind, Response};
use crate::util::Event;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;

pub struct Segment {
    pub stream_index: u8,
    pub segment_index: u64,
    interleave: Arc<Interleave>,
    index_in_interleave: u8,
    coordinator: Weak<Coordinator>,
    retain: bool,
    retained: Mutex<Vec<Bytes>>,
    put_claimed: AtomicBool,
    put_done: AtomicBool,
    event: Event,
}

impl Segment {
    pub fn new(
        stream_index: u8,
        segment_index: u64,
        interleave: Arc<Interleave>,
        index_in_interleave: u8,
        coordinator: Weak<Coordinator>,
        retain: bool,
    ) -> Self {
        Segment {
            stream_index,
            segment_index,
            interleave,
            index_in_interleave,
            coordinator,
            retain,
            retained: Mutex::new(Vec::new()),
            put_claimed: AtomicBool::new(false),
            put_done: AtomicBool::new(false),
            event: Event::new(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.put_done.load(Ordering::SeqCst)
    }

    async fn handle_put(&self, req: &Request) -> Result<()> {
        if self.put_claimed.swap(true, Ordering::SeqCst) {
            return Err(Error::Conflict("segment already has a writer".into()));
        }
        let mut first = true;
        loop {
            let chunk = req.read_some().await?;
            if first {
                first = false;
                if let Some(coord) = self.coordinator.upgrade() {
                    coord.notify_segment_start(self.stream_index, self.segment_index);
                }
            }
            let is_eos = chunk.is_empty();
            self.interleave.add_stream_data(self.index_in_interleave, &chunk).await?;
            if self.retain {
                let mut retained = self.retained.lock().await;
                retained.push(chunk);
            }
            if is_eos {
                self.put_done.store(true, Ordering::SeqCst);
                self.event.notify_all();
                break;
            }
        }
        Ok(())
    }

    async fn handle_get(&self, resp: &Response) -> Result<()> {
        if !self.retain {
            return Err(Error::Forbidden);
        }
        resp.set_cache_kind(CacheKind::Indefinite).await;
        resp.set_mime("video/mp4").await;
        let mut sent = 0usize;
        loop {
            let notified = self.event.notified();
            let snapshot: Vec<Bytes> = {
                let retained = self.retained.lock().await;
                retained[sent..].to_vec()
            };
            for chunk in &snapshot {
                if !chunk.is_empty() {
                    resp.write(chunk.clone()).await;
                }
            }
            sent += snapshot.len();
            if self.put_done.load(Ordering::SeqCst) {
                break;
            }
            notified.await;
        }
        Ok(())
    }
}

#[async_trait]
impl Resource for Segment {
    async fn call(&self, _path: Path, req: &Request, resp: &Response) -> Result<()> {
        match req.typ {
            Type::Put => self.handle_put(req).await,
            Type::Get => self.handle_get(resp).await,
            _ => Err(Error::UnsupportedType),
        }
    }

    fn max_length(&self, typ: Type) -> u64 {
        match typ {
            Type::Put => u64::MAX,
            Type::Get if self.retain => u64::MAX,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dash::interleave::TIMESTAMP_INTERVAL_DISABLED;

    fn put_request(chunks: Vec<&'static str>) -> (Request, tokio::sync::mpsc::Sender<Bytes>) {
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        for c in &chunks {
            tx.try_send(Bytes::from(*c)).unwrap();
        }
        (Request::new(Path::root(), Type::Put, false, rx), tx)
    }

    #[tokio::test]
    async fn put_forwards_into_interleave_and_retains() {
        let il = Arc::new(Interleave::new(1, TIMESTAMP_INTERVAL_DISABLED));
        let seg = Segment::new(0, 0, il.clone(), 0, Weak::new(), true);
        let (req, tx) = put_request(vec!["abc"]);
        drop(tx);
        seg.handle_put(&req).await.unwrap();
        assert!(seg.is_done());
        assert!(il.is_terminal());
        let retained = seg.retained.lock().await;
        assert_eq!(retained[0], Bytes::from("abc"));
    }

    #[tokio::test]
    async fn second_put_conflicts() {
        let il = Arc::new(Interleave::new(1, TIMESTAMP_INTERVAL_DISABLED));
        let seg = Arc::new(Segment::new(0, 0, il, 0, Weak::new(), false));
        let (req1, tx1) = put_request(vec![]);
        drop(tx1);
        seg.handle_put(&req1).await.unwrap();
        let (req2, tx2) = put_request(vec![]);
        drop(tx2);
        assert!(seg.handle_put(&req2).await.is_err());
    }

    #[tokio::test]
    async fn non_retained_segment_rejects_get() {
        let il = Arc::new(Interleave::new(1, TIMESTAMP_INTERVAL_DISABLED));
        let seg = Segment::new(0, 0, il, 0, Weak::new(), false);
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let resp = Response::new(tx);
        assert!(seg.handle_get(&resp).await.is_err());
    }
}
