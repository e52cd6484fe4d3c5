use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::core::{Error, Result};
use super::{FileSink, Storage};

/// Filesystem storage rooted at a single directory
///
/// Filenames are resolved relative to the root; anything that would escape it
/// (absolute paths, `..` components) is rejected.
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    /// Creates a storage backend serving files under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsStorage { root: root.into() }
    }

    fn resolve(&self, filename: &str) -> Result<PathBuf> {
        let path = Path::new(filename);
        let escapes = path.is_absolute()
            || path.components().any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            return Err(Error::access_violation(filename));
        }
        Ok(self.root.join(path))
    }
}

#[async_trait]
impl Storage for FsStorage {
    async fn get_file(&self, filename: &str) -> Result<Bytes> {
        debug!(filename, "getting a file");
        let path = self.resolve(filename)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::not_found(filename)),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_file(&self, filename: &str) -> Result<Box<dyn FileSink>> {
        debug!(filename, "saving a file");
        let path = self.resolve(filename)?;
        let file = File::create(&path).await?;
        Ok(Box::new(FsSink { file: Some(file) }))
    }
}

struct FsSink {
    file: Option<File>,
}

#[async_trait]
impl FileSink for FsSink {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        match self.file.as_mut() {
            Some(file) => file
                .write_all(data)
                .await
                .map_err(|e| Error::sink_write(e.to_string())),
            None => Err(Error::sink_write("sink is already closed")),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()
                .await
                .map_err(|e| Error::sink_write(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_root(tag: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!("tftpd-fs-{}-{}", tag, std::process::id()));
        tokio::fs::create_dir_all(&root).await.unwrap();
        root
    }

    #[tokio::test]
    async fn test_get_file() {
        let root = temp_root("get").await;
        tokio::fs::write(root.join("hello.txt"), b"hello world").await.unwrap();

        let storage = FsStorage::new(&root);
        let file = storage.get_file("hello.txt").await.unwrap();
        assert_eq!(&file[..], b"hello world");
    }

    #[tokio::test]
    async fn test_get_missing_file() {
        let root = temp_root("missing").await;
        let storage = FsStorage::new(&root);
        let err = storage.get_file("nope.bin").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_save_file_round_trip() {
        let root = temp_root("save").await;
        let storage = FsStorage::new(&root);

        let mut sink = storage.save_file("upload.bin").await.unwrap();
        sink.write(b"first ").await.unwrap();
        sink.write(b"second").await.unwrap();
        sink.close().await.unwrap();

        let written = tokio::fs::read(root.join("upload.bin")).await.unwrap();
        assert_eq!(&written[..], b"first second");
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let root = temp_root("closed").await;
        let storage = FsStorage::new(&root);

        let mut sink = storage.save_file("late.bin").await.unwrap();
        sink.close().await.unwrap();
        assert!(matches!(sink.write(b"x").await, Err(Error::SinkWrite(_))));
    }

    #[tokio::test]
    async fn test_path_escape_rejected() {
        let root = temp_root("escape").await;
        let storage = FsStorage::new(&root);

        for name in ["../etc/passwd", "/etc/passwd", "a/../../b"] {
            let err = storage.get_file(name).await.unwrap_err();
            assert!(matches!(err, Error::AccessViolation(_)), "{name}");
        }
    }
}
