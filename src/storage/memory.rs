use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::core::{Error, Result};
use super::{FileSink, Storage};

#[derive(Default)]
struct FileEntry {
    data: Vec<u8>,
    closed: bool,
}

/// In-memory storage backed by a shared map
///
/// Clones share the same underlying files, which makes this the storage of
/// choice for exercising sessions in tests and for embedding the server
/// without a filesystem.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    files: Arc<Mutex<HashMap<String, FileEntry>>>,
}

impl MemoryStorage {
    /// Creates an empty in-memory storage
    pub fn new() -> Self {
        MemoryStorage::default()
    }

    /// Seeds a file, replacing any previous content
    pub fn insert(&self, filename: impl Into<String>, data: impl Into<Bytes>) {
        let mut files = self.lock();
        files.insert(
            filename.into(),
            FileEntry {
                data: data.into().to_vec(),
                closed: true,
            },
        );
    }

    /// Returns the current content of a file, if present
    pub fn get(&self, filename: &str) -> Option<Bytes> {
        let files = self.lock();
        files.get(filename).map(|entry| Bytes::from(entry.data.clone()))
    }

    /// True once the sink for this file has been closed
    pub fn is_closed(&self, filename: &str) -> bool {
        let files = self.lock();
        files.get(filename).is_some_and(|entry| entry.closed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, FileEntry>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get_file(&self, filename: &str) -> Result<Bytes> {
        debug!(filename, "getting a file");
        self.get(filename).ok_or_else(|| Error::not_found(filename))
    }

    async fn save_file(&self, filename: &str) -> Result<Box<dyn FileSink>> {
        debug!(filename, "saving a file");
        let mut files = self.lock();
        files.insert(filename.to_string(), FileEntry::default());
        Ok(Box::new(MemorySink {
            filename: filename.to_string(),
            storage: self.clone(),
        }))
    }
}

struct MemorySink {
    filename: String,
    storage: MemoryStorage,
}

#[async_trait]
impl FileSink for MemorySink {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let mut files = self.storage.lock();
        match files.get_mut(&self.filename) {
            Some(entry) if !entry.closed => {
                entry.data.extend_from_slice(data);
                Ok(())
            }
            _ => Err(Error::sink_write("sink is already closed")),
        }
    }

    async fn close(&mut self) -> Result<()> {
        let mut files = self.storage.lock();
        if let Some(entry) = files.get_mut(&self.filename) {
            entry.closed = true;
        }
        Ok(())
    }
}
