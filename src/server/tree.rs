//! The resource tree: a mapping from path segment to child, where a child
//! is either a leaf resource or a further subtree. `add`/`add_or_replace`/
//! `remove` are total; `remove` prunes now-empty ancestor subtrees up to
//! (but not including) the root, and `resolve` hands back a strong
//! reference to the leaf so callers can hold it across an `.await` even if
//! the tree mutates underneath them afterwards (the shared-ownership
//! invariant).

use crate::error::{Error, Result};
use crate::path::Path;
use crate::server::resource::Resource;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::RwLock;

enum Entry {
    Leaf(Arc<dyn Resource>),
    Tree(Tree),
}

pub struct Tree {
    children: RwLock<HashMap<String, Entry>>,
}

type BoxFut<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

impl Tree {
    pub fn new() -> Self {
        Tree {
            children: RwLock::new(HashMap::new()),
        }
    }

    pub async fn add(&self, path: &Path, resource: Arc<dyn Resource>) -> Result<()> {
        self.insert(path.clone(), resource, false).await
    }

    pub async fn add_or_replace(&self, path: &Path, resource: Arc<dyn Resource>) -> Result<()> {
        self.insert(path.clone(), resource, true).await
    }

    fn insert<'a>(&'a self, mut path: Path, resource: Arc<dyn Resource>, replace: bool) -> BoxFut<'a, ()> {
        Box::pin(async move {
            let Some(head) = path.pop_front() else {
                return Err(Error::BadRequest("cannot add resource at empty path".into()));
            };
            if path.is_empty() {
                let mut children = self.children.write().await;
                if !replace && children.contains_key(&head) {
                    return Err(Error::Conflict(format!("resource already exists at {head}")));
                }
                children.insert(head, Entry::Leaf(resource));
                return Ok(());
            }
            {
                let mut children = self.children.write().await;
                children.entry(head.clone()).or_insert_with(|| Entry::Tree(Tree::new()));
            }
            let children = self.children.read().await;
            match children.get(&head) {
                Some(Entry::Tree(sub)) => sub.insert(path, resource, replace).await,
                _ => Err(Error::Conflict(format!("leaf resource exists at {head}, cannot descend"))),
            }
        })
    }

    pub async fn remove(&self, path: &Path) -> Result<()> {
        self.remove_inner(path.clone()).await.map(|_| ())
    }

    /// Returns true if this node became empty and should be pruned by its
    /// parent.
    fn remove_inner<'a>(&'a self, mut path: Path) -> BoxFut<'a, bool> {
        Box::pin(async move {
            let Some(head) = path.pop_front() else {
                return Err(Error::NotFound);
            };
            if path.is_empty() {
                let mut children = self.children.write().await;
                match children.get(&head) {
                    Some(Entry::Leaf(_)) => {
                        children.remove(&head);
                        Ok(children.is_empty())
                    }
                    _ => Err(Error::NotFound),
                }
            } else {
                let prune_child = {
                    let children = self.children.read().await;
                    let Some(Entry::Tree(sub)) = children.get(&head) else {
                        return Err(Error::NotFound);
                    };
                    sub.remove_inner(path).await?
                };
                if prune_child {
                    let mut children = self.children.write().await;
                    children.remove(&head);
                }
                let children = self.children.read().await;
                Ok(children.is_empty())
            }
        })
    }

    /// Descends the tree consuming segments of `path`; returns a strong
    /// reference to the resolved leaf plus whatever path remains.
    pub async fn resolve(&self, path: &Path) -> Result<(Arc<dyn Resource>, Path)> {
        self.resolve_box(path.clone()).await
    }

    fn resolve_box<'a>(&'a self, mut remaining: Path) -> Pin<Box<dyn Future<Output = Result<(Arc<dyn Resource>, Path)>> + Send + 'a>> {
        Box::pin(async move {
            let Some(head) = remaining.pop_front() else {
                return Err(Error::NotFound);
            };
            let children = self.children.read().await;
            match children.get(&head) {
                Some(Entry::Leaf(resource)) => Ok((resource.clone(), remaining)),
                Some(Entry::Tree(sub)) => sub.resolve_box(remaining).await,
                None => Err(Error::NotFound),
            }
        })
    }
}

impl Default for Tree {
    fn default() -> Self {
        Tree::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::request::{Request, Type};
    use crate::server::response::Response;

    struct Echo;

    #[async_trait::async_trait]
    impl Resource for Echo {
        async fn call(&self, _path: Path, _req: &Request, _resp: &Response) -> Result<()> {
            Ok(())
        }
        fn max_length(&self, _typ: Type) -> u64 {
            1024
        }
    }

    #[tokio::test]
    async fn add_then_resolve() {
        let tree = Tree::new();
        let p = Path::parse("a/b").unwrap();
        tree.add(&p, Arc::new(Echo)).await.unwrap();
        let (_res, remaining) = tree.resolve(&Path::parse("a/b/c").unwrap()).await.unwrap();
        assert_eq!(remaining.to_string(), "c");
    }

    #[tokio::test]
    async fn add_existing_conflicts() {
        let tree = Tree::new();
        let p = Path::parse("a").unwrap();
        tree.add(&p, Arc::new(Echo)).await.unwrap();
        assert!(tree.add(&p, Arc::new(Echo)).await.is_err());
    }

    #[tokio::test]
    async fn add_or_replace_overwrites() {
        let tree = Tree::new();
        let p = Path::parse("a").unwrap();
        tree.add(&p, Arc::new(Echo)).await.unwrap();
        tree.add_or_replace(&p, Arc::new(Echo)).await.unwrap();
    }

    #[tokio::test]
    async fn remove_prunes_empty_ancestors() {
        let tree = Tree::new();
        let p = Path::parse("a/b/c").unwrap();
        tree.add(&p, Arc::new(Echo)).await.unwrap();
        tree.remove(&p).await.unwrap();
        assert!(tree.resolve(&p).await.is_err());
    }

    #[tokio::test]
    async fn resolve_missing_is_not_found() {
        let tree = Tree::new();
        assert!(tree.resolve(&Path::parse("nope").unwrap()).await.is_err());
    }
}
