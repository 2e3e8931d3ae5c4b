//! The polymorphic handler object. Concrete resources (interleave,
//! segment, stream-and-head, constant, filesystem, ...) implement this
//! trait; the tree stores them behind `Arc<dyn Resource>` so a handler
//! resolved for one request keeps working even if it is removed from the
//! tree mid-flight (see `server::dispatch`).

use crate::error::Result;
use crate::path::Path;
use crate::server::request::{Request, Type};
use crate::server::response::Response;
use async_trait::async_trait;

#[async_trait]
pub trait Resource: Send + Sync {
    /// Invoked with the path remaining after the tree lookup consumed the
    /// segments that named this resource.
    async fn call(&self, path: Path, req: &Request, resp: &Response) -> Result<()>;

    fn is_public(&self) -> bool {
        false
    }

    fn allow_non_empty_path(&self) -> bool {
        false
    }

    fn max_length(&self, _typ: Type) -> u64 {
        0
    }

    fn allows(&self, typ: Type) -> bool {
        match typ {
            Type::Options => true,
            _ => self.max_length(typ) > 0,
        }
    }
}
