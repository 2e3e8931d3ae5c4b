//! The DASH manifest resource: an opaque byte buffer the transcoder
//! overwrites with `PUT` on every generation and clients read back with
//! `GET`. Unlike `ConstantResource` it accepts writes at runtime, so it
//! is kept as its own small resource rather than overloading that one.

use crate::error::Result;
use crate::path::Path;
use crate::server::request::{Request, Type};
use crate::server::resource::Resource;
use crate::server::response::{CacheKind, Response};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

pub struct ManifestResource {
    data: RwLock<Bytes>,
}

impl Default for ManifestResource {
    fn default() -> Self {
        ManifestResource { data: RwLock::new(Bytes::new()) }
    }
}

#[async_trait]
impl Resource for ManifestResource {
    async fn call(&self, _path: Path, req: &Request, resp: &Response) -> Result<()> {
        match req.typ {
            Type::Put => {
                let body = req.read_all().await?;
                *self.data.write().await = body;
                Ok(())
            }
            _ => {
                resp.set_mime("application/dash+xml").await;
                resp.set_cache_kind(CacheKind::Ephemeral).await;
                let data = self.data.read().await.clone();
                resp.write(data).await;
                Ok(())
            }
        }
    }

    fn is_public(&self) -> bool {
        true
    }

    fn allows(&self, typ: Type) -> bool {
        matches!(typ, Type::Get | Type::Put | Type::Options)
    }

    fn max_length(&self, typ: Type) -> u64 {
        match typ {
            Type::Get => 1,
            Type::Put => 1 << 20,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let res = ManifestResource::default();
        let (body_tx, mut body_rx) = tokio::sync::mpsc::channel(8);
        let (chunk_tx, chunk_rx) = tokio::sync::mpsc::channel(1);
        chunk_tx.send(Bytes::from("<MPD/>")).await.unwrap();
        drop(chunk_tx);
        let put_req = Request::new(Path::root(), Type::Put, false, chunk_rx);
        let resp = Response::new(body_tx.clone());
        res.call(Path::root(), &put_req, &resp).await.unwrap();

        let (_tx2, get_rx) = tokio::sync::mpsc::channel(1);
        let get_req = Request::new(Path::root(), Type::Get, true, get_rx);
        let resp2 = Response::new(body_tx);
        res.call(Path::root(), &get_req, &resp2).await.unwrap();
        assert_eq!(body_rx.recv().await.unwrap(), Bytes::from("<MPD/>"));
    }
}
