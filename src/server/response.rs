//! The abstract response side of a dispatch. Header state (error kind,
//! cache kind, MIME type, extra headers) is mutable only until the first
//! body byte is committed or `flush` has been called; after that any
//! attempt to change it is a programmer error, not a client-facing one.

use bytes::Bytes;
use std::collections::HashMap;
use tokio::sync::{mpsc::Sender, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    None,
    Ephemeral,
    Fixed(u64),
    Indefinite,
}

impl CacheKind {
    pub fn header_value(&self) -> String {
        match self {
            CacheKind::None => "no-cache".to_string(),
            CacheKind::Ephemeral => "public, max-age=1".to_string(),
            CacheKind::Fixed(secs) => format!("public, max-age={secs}"),
            CacheKind::Indefinite => "public, max-age=31536000".to_string(),
        }
    }
}

struct State {
    status: u16,
    mime: String,
    cache_kind: CacheKind,
    headers: HashMap<String, String>,
    write_started: bool,
    ended: bool,
}

impl Default for State {
    fn default() -> Self {
        State {
            status: 200,
            mime: "application/octet-stream".to_string(),
            cache_kind: CacheKind::None,
            headers: HashMap::new(),
            write_started: false,
            ended: false,
        }
    }
}

pub struct Response {
    state: Mutex<State>,
    body_tx: Sender<Bytes>,
}

impl Response {
    pub fn new(body_tx: Sender<Bytes>) -> Self {
        Response {
            state: Mutex::new(State::default()),
            body_tx,
        }
    }

    pub async fn set_mime(&self, mime: impl Into<String>) {
        let mut s = self.state.lock().await;
        assert!(!s.write_started, "headers frozen after first write");
        s.mime = mime.into();
    }

    pub async fn set_cache_kind(&self, kind: CacheKind) {
        let mut s = self.state.lock().await;
        assert!(!s.write_started, "headers frozen after first write");
        s.cache_kind = kind;
    }

    pub async fn set_header(&self, name: impl Into<String>, value: impl Into<String>) {
        let mut s = self.state.lock().await;
        assert!(!s.write_started, "headers frozen after first write");
        s.headers.insert(name.into(), value.into());
    }

    pub async fn set_status(&self, status: u16) {
        let mut s = self.state.lock().await;
        assert!(!s.write_started, "headers frozen after first write");
        s.status = status;
    }

    pub async fn set_error_and_message(&self, status: u16, message: &str) {
        {
            let mut s = self.state.lock().await;
            assert!(!s.write_started, "headers frozen after first write");
            s.status = status;
            if !message.is_empty() {
                s.mime = "text/plain".to_string();
            }
        }
        if !message.is_empty() {
            let _ = self.write(Bytes::copy_from_slice(message.as_bytes())).await;
        }
    }

    /// Commits headers (on first call) and enqueues a body chunk.
    pub async fn write(&self, chunk: Bytes) -> bool {
        {
            let mut s = self.state.lock().await;
            s.write_started = true;
        }
        self.body_tx.send(chunk).await.is_ok()
    }

    /// Flushes pending writes; `end` seals the response permanently.
    pub async fn flush(&self, end: bool) {
        if end {
            let mut s = self.state.lock().await;
            assert!(!s.ended, "response already ended");
            s.ended = true;
        }
    }

    pub async fn status(&self) -> u16 {
        self.state.lock().await.status
    }

    pub async fn mime(&self) -> String {
        self.state.lock().await.mime.clone()
    }

    pub async fn cache_kind(&self) -> CacheKind {
        self.state.lock().await.cache_kind
    }

    pub async fn headers(&self) -> HashMap<String, String> {
        self.state.lock().await.headers.clone()
    }

    pub async fn write_started(&self) -> bool {
        self.state.lock().await.write_started
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_error_and_message_writes_body_once() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let resp = Response::new(tx);
        resp.set_error_and_message(404, "nope").await;
        assert_eq!(resp.status().await, 404);
        assert_eq!(resp.mime().await, "text/plain");
        let chunk = rx.recv().await.unwrap();
        assert_eq!(chunk, Bytes::from("nope"));
    }

    #[tokio::test]
    #[should_panic]
    async fn headers_frozen_after_write() {
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        let resp = Response::new(tx);
        resp.write(Bytes::from("x")).await;
        resp.set_mime("text/html").await;
    }

    #[test]
    fn cache_kind_headers() {
        assert_eq!(CacheKind::None.header_value(), "no-cache");
        assert_eq!(CacheKind::Fixed(600).header_value(), "public, max-age=600");
    }
}
