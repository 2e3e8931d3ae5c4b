//! `GET`/`POST /api/config`: read back the last accepted (fully resolved)
//! configuration, or replace it. Grounded on `instance/State.cpp`'s
//! configuration-replacement entry point; the resolver and runtime-
//! immutability checks live in [`crate::instance`].

use crate::config::defaults::ProbeFn;
use crate::config::Root;
use crate::error::{Error, Result};
use crate::instance::Instance;
use crate::path::Path;
use crate::server::request::{Request, Type};
use crate::server::response::{CacheKind, Response};
use crate::server::resource::Resource;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

pub struct ConfigResource {
    instance: Arc<Instance>,
    probe: Arc<dyn ProbeFn>,
}

impl ConfigResource {
    pub fn new(instance: Arc<Instance>, probe: Arc<dyn ProbeFn>) -> Self {
        ConfigResource { instance, probe }
    }
}

#[async_trait]
impl Resource for ConfigResource {
    async fn call(&self, _path: Path, req: &Request, resp: &Response) -> Result<()> {
        match req.typ {
            Type::Get => {
                let config = self.instance.requested_config().await;
                let body = match &config {
                    Some(root) => root.to_json_pretty(),
                    None => "null".to_string(),
                };
                resp.set_mime("application/json").await;
                resp.set_cache_kind(CacheKind::None).await;
                resp.write(Bytes::from(body)).await;
                Ok(())
            }
            Type::Post => {
                let body = req.read_all_as_string().await?;
                let root = Root::from_json(&body)?;
                self.instance.apply_configuration(root, self.probe.as_ref()).await?;
                let resolved = self.instance.requested_config().await.ok_or(Error::Internal("configuration not applied".into()))?;
                resp.set_mime("application/json").await;
                resp.set_cache_kind(CacheKind::None).await;
                resp.write(Bytes::from(resolved.to_json_pretty())).await;
                Ok(())
            }
            _ => Err(Error::UnsupportedType),
        }
    }

    fn allows(&self, typ: Type) -> bool {
        matches!(typ, Type::Get | Type::Post)
    }

    fn max_length(&self, typ: Type) -> u64 {
        match typ {
            Type::Post => 1 << 20,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::Log;
    use crate::server::Server;

    struct FixedProbe;
    #[async_trait]
    impl ProbeFn for FixedProbe {
        async fn probe(&self, _url: &str, _arguments: &[String]) -> crate::config::Result<crate::config::defaults::SourceInfo> {
            Ok(crate::config::defaults::SourceInfo {
                width: 1920,
                height: 1080,
                frame_rate: crate::config::FrameRate::fps(25),
                sample_rate: 48000,
            })
        }
    }

    fn make_request(typ: Type, body: &'static str) -> Request {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        tx.try_send(Bytes::from(body)).unwrap();
        drop(tx);
        Request::new(Path::root(), typ, false, rx)
    }

    #[tokio::test]
    async fn get_with_no_configuration_returns_null() {
        let server = Arc::new(Server::new());
        let instance = Instance::new(server, Log::new_memory());
        let resource = ConfigResource::new(instance, Arc::new(FixedProbe));

        let req = make_request(Type::Get, "");
        let (body_tx, mut body_rx) = tokio::sync::mpsc::channel(8);
        let resp = Response::new(body_tx);
        resource.call(Path::root(), &req, &resp).await.unwrap();
        assert_eq!(body_rx.recv().await.unwrap(), Bytes::from("null"));
    }

    #[tokio::test]
    async fn post_replaces_configuration_and_echoes_resolved() {
        let server = Arc::new(Server::new());
        let instance = Instance::new(server, Log::new_memory());
        let resource = ConfigResource::new(instance.clone(), Arc::new(FixedProbe));

        let json = r#"{"network":{"port":9100},"channels":{"live":{"source":{"url":"file:///a.mp4"}}}}"#;
        let req = make_request(Type::Post, json);
        let (body_tx, mut body_rx) = tokio::sync::mpsc::channel(8);
        let resp = Response::new(body_tx);
        resource.call(Path::root(), &req, &resp).await.unwrap();

        let chunk = body_rx.recv().await.unwrap();
        let resolved: serde_json::Value = serde_json::from_slice(&chunk).unwrap();
        assert_eq!(resolved["network"]["port"], 9100);
        assert!(instance.requested_config().await.is_some());
    }

    #[tokio::test]
    async fn rejects_unsupported_method() {
        let server = Arc::new(Server::new());
        let instance = Instance::new(server, Log::new_memory());
        let resource = ConfigResource::new(instance, Arc::new(FixedProbe));

        let req = make_request(Type::Put, "");
        let (body_tx, _body_rx) = tokio::sync::mpsc::channel(1);
        let resp = Response::new(body_tx);
        assert!(resource.call(Path::root(), &req, &resp).await.is_err());
    }
}
