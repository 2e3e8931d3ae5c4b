//! The abstract request side of a single dispatch: path, verb, public/private
//! classification, and a lazily-read body with a running length cap.

use crate::error::{Error, Result};
use crate::path::Path;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex as TokioMutex;
use tokio::sync::mpsc::Receiver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Get,
    Post,
    Put,
    Options,
}

pub struct Request {
    pub path: Path,
    pub typ: Type,
    pub is_public: bool,
    body_rx: TokioMutex<Receiver<Bytes>>,
    bytes_read: AtomicU64,
    max_length: AtomicU64,
}

const UNLIMITED: u64 = u64::MAX;

impl Request {
    pub fn new(path: Path, typ: Type, is_public: bool, body_rx: Receiver<Bytes>) -> Self {
        Request {
            path,
            typ,
            is_public,
            body_rx: TokioMutex::new(body_rx),
            bytes_read: AtomicU64::new(0),
            max_length: AtomicU64::new(UNLIMITED),
        }
    }

    pub fn set_max_length(&self, n: u64) {
        self.max_length.store(n, Ordering::SeqCst);
    }

    /// Next chunk of the body, or an empty chunk at end of body.
    pub async fn read_some(&self) -> Result<Bytes> {
        let mut rx = self.body_rx.lock().await;
        let Some(chunk) = rx.recv().await else {
            return Ok(Bytes::new());
        };
        let total = self.bytes_read.fetch_add(chunk.len() as u64, Ordering::SeqCst) + chunk.len() as u64;
        if total > self.max_length.load(Ordering::SeqCst) {
            return Err(Error::BadRequest("request body too large".into()));
        }
        Ok(chunk)
    }

    pub async fn read_all(&self) -> Result<Bytes> {
        let mut buf = Vec::new();
        loop {
            let chunk = self.read_some().await?;
            if chunk.is_empty() {
                break;
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(Bytes::from(buf))
    }

    pub async fn read_all_as_string(&self) -> Result<String> {
        let bytes = self.read_all().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make(typ: Type, chunks: Vec<&'static str>) -> (Request, tokio::sync::mpsc::Sender<Bytes>) {
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        for c in chunks {
            tx.try_send(Bytes::from(c)).unwrap();
        }
        (Request::new(Path::root(), typ, false, rx), tx)
    }

    #[tokio::test]
    async fn reads_chunks_then_empty_on_close() {
        let (req, tx) = make(Type::Put, vec!["abc", "def"]);
        drop(tx);
        assert_eq!(req.read_some().await.unwrap(), Bytes::from("abc"));
        assert_eq!(req.read_some().await.unwrap(), Bytes::from("def"));
        assert_eq!(req.read_some().await.unwrap(), Bytes::new());
    }

    #[tokio::test]
    async fn enforces_max_length() {
        let (req, tx) = make(Type::Put, vec!["abcdef"]);
        drop(tx);
        req.set_max_length(3);
        assert!(req.read_some().await.is_err());
    }

    #[tokio::test]
    async fn read_all_as_string_decodes_lossy() {
        let (req, tx) = make(Type::Post, vec!["hello"]);
        drop(tx);
        assert_eq!(req.read_all_as_string().await.unwrap(), "hello");
    }
}
