//! Serves a fixed byte buffer with a fixed MIME type and cache kind,
//! grounded on `resources/ConstantResource.cpp`. Used for `info.json` and
//! `channelIndex.json`.

use crate::error::{Error, Result};
use crate::path::Path;
use crate::server::request::{Request, Type};
use crate::server::resource::Resource;
use crate::server::response::{CacheKind, Response};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

pub struct ConstantResource {
    data: RwLock<Bytes>,
    mime: String,
    cache_kind: CacheKind,
    is_public: bool,
}

impl ConstantResource {
    pub fn new(data: impl Into<Bytes>, mime: impl Into<String>, cache_kind: CacheKind, is_public: bool) -> Self {
        ConstantResource {
            data: RwLock::new(data.into()),
            mime: mime.into(),
            cache_kind,
            is_public,
        }
    }

    pub async fn replace(&self, data: impl Into<Bytes>) {
        *self.data.write().await = data.into();
    }
}

#[async_trait]
impl Resource for ConstantResource {
    async fn call(&self, _path: Path, _req: &Request, resp: &Response) -> Result<()> {
        resp.set_mime(self.mime.clone()).await;
        resp.set_cache_kind(self.cache_kind).await;
        let data = self.data.read().await.clone();
        resp.write(data).await;
        Ok(())
    }

    fn is_public(&self) -> bool {
        self.is_public
    }

    fn max_length(&self, typ: Type) -> u64 {
        match typ {
            Type::Get => 1,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_fixed_body() {
        let res = ConstantResource::new("hello", "text/plain", CacheKind::Ephemeral, true);
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let resp = Response::new(tx);
        let (_req_tx, req_rx) = tokio::sync::mpsc::channel(1);
        let req = Request::new(Path::root(), Type::Get, true, req_rx);
        res.call(Path::root(), &req, &resp).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from("hello"));
        assert_eq!(resp.mime().await, "text/plain");
    }
}
