//! `POST /api/probe`: run the source prober against an arbitrary URL
//! without touching the active configuration. Useful for a control panel
//! to preview what a source would resolve to before committing it.

use crate::config::defaults::{ProbeFn, SourceInfo};
use crate::error::{Error, Result};
use crate::path::Path;
use crate::server::request::{Request, Type};
use crate::server::response::{CacheKind, Response};
use crate::server::resource::Resource;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Deserialize)]
struct ProbeRequest {
    url: String,
    #[serde(default)]
    arguments: Vec<String>,
}

#[derive(Serialize)]
struct ProbeResponse {
    width: u32,
    height: u32,
    #[serde(rename = "frameRate")]
    frame_rate: f64,
    #[serde(rename = "sampleRate")]
    sample_rate: u32,
}

impl From<SourceInfo> for ProbeResponse {
    fn from(info: SourceInfo) -> Self {
        ProbeResponse {
            width: info.width,
            height: info.height,
            frame_rate: info.frame_rate.as_f64(),
            sample_rate: info.sample_rate,
        }
    }
}

pub struct ProbeResource {
    probe: Arc<dyn ProbeFn>,
}

impl ProbeResource {
    pub fn new(probe: Arc<dyn ProbeFn>) -> Self {
        ProbeResource { probe }
    }
}

#[async_trait]
impl Resource for ProbeResource {
    async fn call(&self, _path: Path, req: &Request, resp: &Response) -> Result<()> {
        let body = req.read_all_as_string().await?;
        let request: ProbeRequest =
            serde_json::from_str(&body).map_err(|e| Error::BadRequest(format!("invalid probe request: {e}")))?;
        let info = self.probe.probe(&request.url, &request.arguments).await?;
        let response = ProbeResponse::from(info);
        resp.set_mime("application/json").await;
        resp.set_cache_kind(CacheKind::None).await;
        resp.write(Bytes::from(serde_json::to_vec(&response).expect("ProbeResponse always serializes"))).await;
        Ok(())
    }

    fn allows(&self, typ: Type) -> bool {
        typ == Type::Post
    }

    fn max_length(&self, typ: Type) -> u64 {
        match typ {
            Type::Post => 4096,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::Path;

    struct FixedProbe;
    #[async_trait]
    impl ProbeFn for FixedProbe {
        async fn probe(&self, url: &str, _arguments: &[String]) -> crate::config::Result<SourceInfo> {
            if url.is_empty() {
                return Err(Error::BadRequest("empty url".into()));
            }
            Ok(SourceInfo {
                width: 1920,
                height: 1080,
                frame_rate: crate::config::FrameRate::fps(25),
                sample_rate: 48000,
            })
        }
    }

    fn make_request(body: &'static str) -> Request {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        tx.try_send(Bytes::from(body)).unwrap();
        drop(tx);
        Request::new(Path::root(), Type::Post, false, rx)
    }

    #[tokio::test]
    async fn probes_and_returns_resolved_parameters() {
        let resource = ProbeResource::new(Arc::new(FixedProbe));
        let req = make_request(r#"{"url":"rtmp://source/live"}"#);
        let (body_tx, mut body_rx) = tokio::sync::mpsc::channel(8);
        let resp = Response::new(body_tx);
        resource.call(Path::root(), &req, &resp).await.unwrap();

        let chunk = body_rx.recv().await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&chunk).unwrap();
        assert_eq!(parsed["width"], 1920);
        assert_eq!(parsed["frameRate"], 25.0);
    }

    #[tokio::test]
    async fn rejects_malformed_json_body() {
        let resource = ProbeResource::new(Arc::new(FixedProbe));
        let req = make_request("not json");
        let (body_tx, _body_rx) = tokio::sync::mpsc::channel(1);
        let resp = Response::new(body_tx);
        assert!(resource.call(Path::root(), &req, &resp).await.is_err());
    }
}
