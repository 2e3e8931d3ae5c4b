//! Thin collaborators around the external transcoder: a subprocess
//! launcher and a probe-function implementation. Media encoding/decoding
//! itself is out of scope; these modules never touch a media frame.

pub mod probe;
pub mod process;

pub use probe::FfprobeProber;
pub use process::Process;
