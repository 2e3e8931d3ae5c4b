//! Serves files under a local directory, grounded on
//! `resources/FilesystemResource.cpp`. Used for the `directories`
//! configuration section. Rejects any path that would escape the mount
//! root after `Path` parsing has already stripped `..`/`.` segments.

use crate::error::{Error, Result};
use crate::path::Path;
use crate::server::request::{Request, Type};
use crate::server::resource::Resource;
use crate::server::response::{CacheKind, Response};
use async_trait::async_trait;
use std::path::PathBuf;

pub struct FilesystemResource {
    root: PathBuf,
    index_file: Option<String>,
    writable: bool,
}

impl FilesystemResource {
    pub fn new(root: PathBuf, index_file: Option<String>, writable: bool) -> Self {
        FilesystemResource { root, index_file, writable }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        let mut fs_path = self.root.clone();
        for seg in path.segments() {
            fs_path.push(seg);
        }
        if path.is_empty() {
            if let Some(index) = &self.index_file {
                fs_path.push(index);
            }
        }
        fs_path
    }

    fn mime_for(path: &std::path::Path) -> &'static str {
        match path.extension().and_then(|e| e.to_str()) {
            Some("html") => "text/html",
            Some("js") => "application/javascript",
            Some("css") => "text/css",
            Some("json") => "application/json",
            Some("mpd") => "application/dash+xml",
            _ => "application/octet-stream",
        }
    }
}

#[async_trait]
impl Resource for FilesystemResource {
    async fn call(&self, path: Path, req: &Request, resp: &Response) -> Result<()> {
        let fs_path = self.resolve(&path);
        match req.typ {
            Type::Get => {
                let data = tokio::fs::read(&fs_path).await.map_err(|_| Error::NotFound)?;
                resp.set_mime(Self::mime_for(&fs_path)).await;
                resp.set_cache_kind(CacheKind::Fixed(600)).await;
                resp.write(data.into()).await;
                Ok(())
            }
            Type::Put if self.writable => {
                if let Some(parent) = fs_path.parent() {
                    tokio::fs::create_dir_all(parent).await.ok();
                }
                let body = req.read_all().await?;
                tokio::fs::write(&fs_path, &body).await?;
                Ok(())
            }
            _ => Err(Error::UnsupportedType),
        }
    }

    fn allow_non_empty_path(&self) -> bool {
        true
    }

    fn max_length(&self, typ: Type) -> u64 {
        match typ {
            Type::Get => u64::MAX,
            Type::Put if self.writable => u64::MAX,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), b"hi").unwrap();
        let res = FilesystemResource::new(dir.path().to_path_buf(), Some("index.html".into()), false);
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let resp = Response::new(tx);
        let (_req_tx, req_rx) = tokio::sync::mpsc::channel(1);
        let req = Request::new(Path::root(), Type::Get, false, req_rx);
        res.call(Path::root(), &req, &resp).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), bytes::Bytes::from("hi"));
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let res = FilesystemResource::new(dir.path().to_path_buf(), None, false);
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        let resp = Response::new(tx);
        let (_req_tx, req_rx) = tokio::sync::mpsc::channel(1);
        let req = Request::new(Path::parse("nope.txt").unwrap(), Type::Get, false, req_rx);
        assert!(res.call(Path::parse("nope.txt").unwrap(), &req, &resp).await.is_err());
    }
}
