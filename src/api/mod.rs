//! The control-plane API: configuration replacement, source probing, and
//! per-channel control-chunk injection. Mounted under `/api` and gated by
//! `features.apiControlPlane`; every endpoint here rejects public (remote)
//! peers regardless of that feature flag, since it is a privileged surface.

pub mod channel;
pub mod config;
pub mod probe;

pub use channel::ChannelControlResource;
pub use config::ConfigResource;
pub use probe::ProbeResource;
