//! Publishes a raw [`Interleave`] byte stream as a GET-only resource: the
//! client reads the live multiplex from wherever it connects, not from the
//! start. A second concurrent reader is rejected, matching the interleave's
//! single-reader invariant.

use crate::error::{Error, Result};
use crate::path::Path;
use crate::server::request::{Request, Type};
use crate::server::response::{CacheKind, Response};
use crate::server::resource::Resource;
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use std::sync::Arc;

use super::interleave::Interleave;

pub struct InterleaveResource {
    interleave: Arc<Interleave>,
}

impl InterleaveResource {
    pub fn new(interleave: Arc<Interleave>) -> Self {
        InterleaveResource { interleave }
    }
}

#[async_trait]
impl Resource for InterleaveResource {
    async fn call(&self, _path: Path, _req: &Request, resp: &Response) -> Result<()> {
        self.interleave.acquire_reader()?;
        resp.set_mime("application/octet-stream").await;
        resp.set_cache_kind(CacheKind::None).await;

        let result = self.stream(resp).await;
        self.interleave.release_reader();
        result
    }

    fn allows(&self, typ: Type) -> bool {
        typ == Type::Get
    }

    fn max_length(&self, _typ: Type) -> u64 {
        0
    }
}

impl InterleaveResource {
    async fn stream(&self, resp: &Response) -> Result<()> {
        let mut from = 0usize;
        loop {
            let notified = self.interleave.notified();
            let (chunks, high_water) = self.interleave.chunks_since(from).await;
            if !chunks.is_empty() {
                let mut out = BytesMut::new();
                for chunk in &chunks {
                    out.put_slice(chunk);
                }
                if !resp.write(out.freeze()).await {
                    return Err(Error::Internal("client disconnected".into()));
                }
                from = high_water;
            }
            if self.interleave.is_terminal() && from == high_water {
                return Ok(());
            }
            notified.await;
        }
    }
}
