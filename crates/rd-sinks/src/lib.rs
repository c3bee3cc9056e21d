//! Demo-support sinks: terminal consumers that write frames to disk so the
//! pipeline can be exercised end-to-end without a real network peer, the way
//! the teacher's sender binary drives its own pipeline straight into a
//! transport sink during manual testing.

mod raw;
mod y4m;

pub use raw::RawDumper;
pub use y4m::Y4mWriter;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to open output file {path}: {source}")]
    OpenFailed { path: String, source: std::io::Error },

    #[error("write to output file failed: {0}")]
    WriteFailed(#[from] std::io::Error),
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SinkStats {
    pub frames_written: u64,
    pub frames_dropped: u64,
    pub bytes_written: u64,
}
