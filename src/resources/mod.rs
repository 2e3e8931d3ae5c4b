//! Ambient leaf resources that aren't part of the DASH pipeline proper.

pub mod constant;
pub mod filesystem;
pub mod manifest;
pub mod stream_and_head;

pub use constant::ConstantResource;
pub use filesystem::FilesystemResource;
pub use manifest::ManifestResource;
pub use stream_and_head::StreamAndHead;
