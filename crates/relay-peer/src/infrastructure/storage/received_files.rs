//! Received files on disk.
//!
//! Every incoming file is written to
//! `<download_dir>/Received_<unix-millis>_<fileName>`.  Only the final path
//! component of the announced file name is used, so a sender cannot place a
//! file outside the download directory.  A transfer that is cut short deletes
//! its partial file.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use relay_core::TransferSink;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::application::inbound::DownloadStore;

/// Prefix of every stored file name.
pub const RECEIVED_PREFIX: &str = "Received_";

const FALLBACK_FILE_NAME: &str = "file";

/// Creates download files in one directory.
#[derive(Debug, Clone)]
pub struct ReceivedFileStore {
    dir: PathBuf,
}

impl ReceivedFileStore {
    /// Uses `dir` for downloads, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl DownloadStore for ReceivedFileStore {
    type Sink = FileSink;

    async fn create(&self, file_name: &str, sender_name: &str) -> io::Result<FileSink> {
        let base = format!(
            "{RECEIVED_PREFIX}{}_{}",
            unix_millis(),
            sanitize_file_name(file_name)
        );

        // Two files with the same name in the same millisecond get a counter.
        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                base.clone()
            } else {
                format!("{base}.{attempt}")
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(file) => {
                    debug!(path = %path.display(), sender = %sender_name, "download created");
                    return Ok(FileSink {
                        path,
                        file: Some(file),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && attempt < 100 => {
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Writes one incoming payload to its download file.
pub struct FileSink {
    path: PathBuf,
    file: Option<File>,
}

impl FileSink {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TransferSink for FileSink {
    type Output = PathBuf;

    async fn write_chunk(&mut self, bytes: &[u8]) -> io::Result<()> {
        let file = self.file.as_mut().ok_or_else(already_closed)?;
        file.write_all(bytes).await
    }

    async fn finish(&mut self) -> io::Result<PathBuf> {
        let mut file = self.file.take().ok_or_else(already_closed)?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(self.path.clone())
    }

    async fn abort(&mut self) {
        // Closing first; Windows refuses to delete an open file.
        drop(self.file.take());
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "could not delete partial download");
            }
        }
    }
}

/// Reduces an announced file name to its last path component.
///
/// Both `/` and `\` count as separators.  Names that reduce to nothing, `.`
/// or `..` become `file`.
pub fn sanitize_file_name(name: &str) -> String {
    let last = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    match last {
        "" | "." | ".." => FALLBACK_FILE_NAME.to_string(),
        other => other.to_string(),
    }
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

fn already_closed() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "download already closed")
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_keeps_plain_names() {
        assert_eq!(sanitize_file_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_file_name("my notes.txt"), "my notes.txt");
    }

    #[test]
    fn test_sanitize_strips_directories() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name(r"C:\Users\a\photo.jpg"), "photo.jpg");
        assert_eq!(sanitize_file_name("/abs/path/x.bin"), "x.bin");
    }

    #[test]
    fn test_sanitize_falls_back_for_empty_or_dot_names() {
        assert_eq!(sanitize_file_name("dir/"), "file");
        assert_eq!(sanitize_file_name(".."), "file");
        assert_eq!(sanitize_file_name("."), "file");
    }

    #[test]
    fn test_open_creates_missing_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("a").join("b");

        let store = ReceivedFileStore::open(&dir).unwrap();

        assert!(dir.is_dir());
        assert_eq!(store.dir(), dir.as_path());
    }

    #[tokio::test]
    async fn test_finished_download_holds_payload_under_prefixed_name() {
        // Arrange
        let root = tempfile::tempdir().unwrap();
        let store = ReceivedFileStore::open(root.path()).unwrap();

        // Act
        let mut sink = store.create("../report.pdf", "Alice").await.unwrap();
        sink.write_chunk(b"hello ").await.unwrap();
        sink.write_chunk(b"world").await.unwrap();
        let path = sink.finish().await.unwrap();

        // Assert
        assert_eq!(path.parent().unwrap(), root.path());
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(RECEIVED_PREFIX), "got {name}");
        assert!(name.ends_with("_report.pdf"), "got {name}");
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_aborted_download_is_deleted() {
        let root = tempfile::tempdir().unwrap();
        let store = ReceivedFileStore::open(root.path()).unwrap();
        let mut sink = store.create("part.bin", "Alice").await.unwrap();
        sink.write_chunk(&[1, 2, 3]).await.unwrap();
        let path = sink.path().to_path_buf();

        sink.abort().await;

        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_same_name_twice_gives_two_files() {
        let root = tempfile::tempdir().unwrap();
        let store = ReceivedFileStore::open(root.path()).unwrap();

        let first = store.create("a.txt", "Alice").await.unwrap();
        let second = store.create("a.txt", "Alice").await.unwrap();

        assert_ne!(first.path(), second.path());
    }

    #[tokio::test]
    async fn test_write_after_finish_fails() {
        let root = tempfile::tempdir().unwrap();
        let store = ReceivedFileStore::open(root.path()).unwrap();
        let mut sink = store.create("a.txt", "Alice").await.unwrap();
        sink.finish().await.unwrap();

        assert!(sink.write_chunk(b"late").await.is_err());
    }
}
