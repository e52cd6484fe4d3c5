//! Storage collaborator: byte sources and sinks for transfers
//!
//! Sessions treat storage as opaque: a whole-file byte buffer on the read
//! path and an incrementally written sink on the write path.

mod fs;
mod memory;

pub use self::fs::FsStorage;
pub use self::memory::MemoryStorage;

use async_trait::async_trait;
use bytes::Bytes;

use crate::core::Result;

/// Write side of a file being uploaded
///
/// `Send + Sync` so a boxed sink can live inside a session future that is
/// handed to the runtime.
#[async_trait]
pub trait FileSink: Send + Sync {
    /// Appends bytes to the file
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Flushes outstanding writes and closes the file
    async fn close(&mut self) -> Result<()>;
}

/// Backend serving file reads and writes by name
#[async_trait]
pub trait Storage: Send + Sync {
    /// Returns the whole file, or `Error::NotFound` if it is absent
    async fn get_file(&self, filename: &str) -> Result<Bytes>;

    /// Opens a writable sink for the named file
    async fn save_file(&self, filename: &str) -> Result<Box<dyn FileSink>>;
}
