//! The DASH data plane: interleave multiplexing, per-segment PUT/GET
//! bridging, and the per-channel coordinator that wires them together.

pub mod coordinator;
pub mod interleave;
pub mod interleave_resource;
pub mod segment;

pub use coordinator::{Coordinator, CoordinatorConfig, StreamPlacement};
pub use interleave::{ControlChunkType, Interleave};
pub use interleave_resource::InterleaveResource;
pub use segment::Segment;
