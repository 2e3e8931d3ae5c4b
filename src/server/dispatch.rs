//! The server dispatcher: resolves a request against the resource tree,
//! enforces the cross-cutting restrictions (public/private, verb support,
//! body-length caps), invokes the resource, and funnels any error into the
//! response — unless a body byte has already been committed, in which case
//! the connection must simply be abandoned (there is nothing left to
//! correct on the wire).

use crate::error::{Error, Result};
use crate::path::Path;
use crate::server::request::{Request, Type};
use crate::server::resource::Resource;
use crate::server::response::Response;
use crate::server::tree::Tree;
use std::sync::Arc;
use tracing::{error, warn};

pub struct Server {
    root: Tree,
}

impl Server {
    pub fn new() -> Self {
        Server { root: Tree::new() }
    }

    pub async fn add(&self, path: &Path, resource: Arc<dyn Resource>) -> Result<()> {
        self.root.add(path, resource).await
    }

    pub async fn add_or_replace(&self, path: &Path, resource: Arc<dyn Resource>) -> Result<()> {
        self.root.add_or_replace(path, resource).await
    }

    pub async fn remove(&self, path: &Path) -> Result<()> {
        self.root.remove(path).await
    }

    pub async fn exists(&self, path: &Path) -> bool {
        self.root.resolve(path).await.is_ok()
    }

    /// Runs one request to completion. Always returns `Ok` unless the
    /// connection must be abandoned (a write had already started when the
    /// failure occurred) — callers should close the transport in that case.
    pub async fn dispatch(&self, req: &Request, resp: &Response) -> Result<()> {
        match self.try_dispatch(req, resp).await {
            Ok(()) => {
                resp.flush(true).await;
                Ok(())
            }
            Err(e) => {
                if resp.write_started().await {
                    error!(error = %e, "error after response body started, abandoning connection");
                    return Err(e);
                }
                resp.set_error_and_message(e.status(), &e.to_string()).await;
                resp.flush(true).await;
                Ok(())
            }
        }
    }

    async fn try_dispatch(&self, req: &Request, resp: &Response) -> Result<()> {
        let (resource, remaining) = self.root.resolve(&req.path).await?;

        if req.is_public && !resource.is_public() {
            return Err(Error::Forbidden);
        }
        if !remaining.is_empty() && !resource.allow_non_empty_path() {
            return Err(Error::NotFound);
        }
        if req.is_public && req.typ != Type::Get {
            return Err(Error::Forbidden);
        }
        if req.typ != Type::Options && !resource.allows(req.typ) {
            return Err(Error::UnsupportedType);
        }
        req.set_max_length(resource.max_length(req.typ));

        if let Err(e) = resource.call(remaining, req, resp).await {
            warn!(error = %e, "resource handler failed");
            return Err(e);
        }
        Ok(())
    }
}

impl Default for Server {
    fn default() -> Self {
        Server::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::response::CacheKind;
    use async_trait::async_trait;
    use bytes::Bytes;

    struct Short;

    #[async_trait]
    impl Resource for Short {
        async fn call(&self, _path: Path, _req: &Request, resp: &Response) -> Result<()> {
            resp.set_mime("text/plain").await;
            resp.set_cache_kind(CacheKind::Fixed(600)).await;
            resp.write(Bytes::from("Cats are cute :D")).await;
            Ok(())
        }
        fn is_public(&self) -> bool {
            true
        }
        fn max_length(&self, typ: Type) -> u64 {
            if typ == Type::Get { 1 } else { 0 }
        }
    }

    fn get_request(path: &str) -> (Request, tokio::sync::mpsc::Sender<Bytes>) {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        (Request::new(Path::parse(path).unwrap(), Type::Get, true, rx), tx)
    }

    #[tokio::test]
    async fn short_static_resource() {
        let server = Server::new();
        server.add(&Path::parse("Short").unwrap(), Arc::new(Short)).await.unwrap();
        let (req, _tx) = get_request("Short");
        let (body_tx, mut body_rx) = tokio::sync::mpsc::channel(8);
        let resp = Response::new(body_tx);
        server.dispatch(&req, &resp).await.unwrap();
        assert_eq!(resp.status().await, 200);
        assert_eq!(resp.mime().await, "text/plain");
        assert_eq!(body_rx.recv().await.unwrap(), Bytes::from("Cats are cute :D"));
    }

    #[tokio::test]
    async fn traversal_is_forbidden_at_parse_time() {
        assert!(Path::parse("..").is_err());
    }

    #[tokio::test]
    async fn missing_resource_is_not_found() {
        let server = Server::new();
        let (req, _tx) = get_request("nonexistent");
        let (body_tx, _rx) = tokio::sync::mpsc::channel(8);
        let resp = Response::new(body_tx);
        server.dispatch(&req, &resp).await.unwrap();
        assert_eq!(resp.status().await, 404);
    }

    #[tokio::test]
    async fn private_resource_rejects_public_request() {
        struct Private;
        #[async_trait]
        impl Resource for Private {
            async fn call(&self, _p: Path, _r: &Request, _w: &Response) -> Result<()> {
                Ok(())
            }
            fn max_length(&self, _t: Type) -> u64 {
                1
            }
        }
        let server = Server::new();
        server.add(&Path::parse("secret").unwrap(), Arc::new(Private)).await.unwrap();
        let (req, _tx) = get_request("secret");
        let (body_tx, _rx) = tokio::sync::mpsc::channel(8);
        let resp = Response::new(body_tx);
        server.dispatch(&req, &resp).await.unwrap();
        assert_eq!(resp.status().await, 403);
    }

    #[tokio::test]
    async fn resource_removed_mid_flight_still_completes() {
        let server = Arc::new(Server::new());
        server.add(&Path::parse("Short").unwrap(), Arc::new(Short)).await.unwrap();
        let (resource, remaining) = server.root.resolve(&Path::parse("Short").unwrap()).await.unwrap();
        server.remove(&Path::parse("Short").unwrap()).await.unwrap();
        assert!(server.root.resolve(&Path::parse("Short").unwrap()).await.is_err());
        let (body_tx, mut body_rx) = tokio::sync::mpsc::channel(8);
        let resp = Response::new(body_tx);
        let (req, _tx) = get_request("Short");
        resource.call(remaining, &req, &resp).await.unwrap();
        assert_eq!(body_rx.recv().await.unwrap(), Bytes::from("Cats are cute :D"));
    }
}
