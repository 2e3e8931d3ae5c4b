//! Generic serving engine: paths, resources, the tree, requests/responses,
//! and the dispatcher that ties them together. Everything HTTP-specific
//! lives in `crate::http`, which bridges axum onto this module.

pub mod address;
pub mod dispatch;
pub mod request;
pub mod resource;
pub mod response;
pub mod tree;

pub use dispatch::Server;
pub use request::{Request, Type};
pub use resource::Resource;
pub use response::{CacheKind, Response};
pub use tree::Tree;
