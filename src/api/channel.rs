//! `POST /api/channel/<name>/{blank,interjection,data}`: injects a control
//! chunk into every interleave currently open for a channel. `blank` and
//! `interjection` carry no body and differ only in the control-chunk kind
//! they emit; `data` forwards the request body verbatim as either a JSON
//! object or binary payload, grounded on the control-chunk taxonomy in
//! `dash/InterleaveResource.cpp`. Mounted once at `/api/channel`; the
//! channel name is the first remaining path segment rather than a fixed
//! per-channel mount, since channels come and go under reconfiguration.

use crate::dash::interleave::ControlChunkType;
use crate::error::{Error, Result};
use crate::instance::Instance;
use crate::path::Path;
use crate::server::request::{Request, Type};
use crate::server::resource::Resource;
use crate::server::response::Response;
use async_trait::async_trait;
use std::sync::Arc;

pub struct ChannelControlResource {
    instance: Arc<Instance>,
}

impl ChannelControlResource {
    pub fn new(instance: Arc<Instance>) -> Self {
        ChannelControlResource { instance }
    }
}

#[async_trait]
impl Resource for ChannelControlResource {
    async fn call(&self, mut path: Path, req: &Request, resp: &Response) -> Result<()> {
        let channel = path.pop_front().ok_or(Error::NotFound)?;
        let action = path.pop_front().ok_or(Error::NotFound)?;
        match action.as_str() {
            "blank" => {
                self.instance.broadcast_control(&channel, ControlChunkType::Discard, &[]).await?;
            }
            "interjection" => {
                self.instance.broadcast_control(&channel, ControlChunkType::UserString, b"interjection").await?;
            }
            "data" => {
                let body = req.read_all().await?;
                let is_json = serde_json::from_slice::<serde_json::Value>(&body).is_ok();
                let ctype = if is_json { ControlChunkType::UserJsonObject } else { ControlChunkType::UserBinaryData };
                self.instance.broadcast_control(&channel, ctype, &body).await?;
            }
            _ => return Err(Error::NotFound),
        }
        resp.set_status(204).await;
        Ok(())
    }

    fn allows(&self, typ: Type) -> bool {
        typ == Type::Post
    }

    fn allow_non_empty_path(&self) -> bool {
        true
    }

    fn max_length(&self, typ: Type) -> u64 {
        match typ {
            Type::Post => 1 << 16,
            _ => 0,
        }
    }
}
