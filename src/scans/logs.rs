//! Per-scan log storage.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

/// A write-closable log stream for one scan.
pub trait LogSink: Write + Send {
    /// Flush and release the underlying handle. Further writes fail.
    /// Runs from `Drop`, so implementations must not block on durable sync.
    fn close(&mut self) -> io::Result<()>;
}

/// Opens and reads per-scan logs.
///
/// Opening and reading are async; the returned sink is a plain `Write` so the
/// engine can record results from synchronous code.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Open the log for `scan_id` for appending.
    async fn open(&self, scan_id: i64) -> io::Result<Box<dyn LogSink>>;

    /// Full log contents, or `None` if the scan never logged anything.
    async fn read(&self, scan_id: i64) -> io::Result<Option<String>>;
}

/// Stores each scan's log as `<dir>/<scan_id>.log`.
#[derive(Debug, Clone)]
pub struct FileLogStore {
    dir: PathBuf,
}

impl FileLogStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, scan_id: i64) -> PathBuf {
        self.dir.join(format!("{scan_id}.log"))
    }
}

#[async_trait]
impl LogStore for FileLogStore {
    async fn open(&self, scan_id: i64) -> io::Result<Box<dyn LogSink>> {
        fs::create_dir_all(&self.dir).await?;
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(scan_id))
            .await?
            .into_std()
            .await;
        Ok(Box::new(FileSink { file: Some(file) }))
    }

    async fn read(&self, scan_id: i64) -> io::Result<Option<String>> {
        match fs::read_to_string(self.path_for(scan_id)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

struct FileSink {
    file: Option<File>,
}

fn closed() -> io::Error {
    io::Error::other("log sink is closed")
}

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.as_mut().ok_or_else(closed)?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl LogSink for FileSink {
    fn close(&mut self) -> io::Result<()> {
        match self.file.take() {
            Some(mut file) => file.flush(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_close_read() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileLogStore::new(tmp.path().join("logs"));

        let mut sink = store.open(9).await.unwrap();
        sink.write_all(b"first line\n").unwrap();
        sink.close().unwrap();

        assert_eq!(store.read(9).await.unwrap().as_deref(), Some("first line\n"));
        assert!(sink.write_all(b"late").is_err());
        // Closing twice is harmless.
        sink.close().unwrap();
    }

    #[tokio::test]
    async fn reopen_appends() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileLogStore::new(tmp.path());

        for line in ["a\n", "b\n"] {
            let mut sink = store.open(1).await.unwrap();
            sink.write_all(line.as_bytes()).unwrap();
            sink.close().unwrap();
        }
        assert_eq!(store.read(1).await.unwrap().as_deref(), Some("a\nb\n"));
    }

    #[tokio::test]
    async fn read_missing_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileLogStore::new(tmp.path());
        assert!(store.read(404).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn open_creates_log_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileLogStore::new(tmp.path().join("nested/logs"));

        let mut sink = store.open(2).await.unwrap();
        sink.close().unwrap();

        assert!(store.dir().join("2.log").is_file());
        assert_eq!(store.read(2).await.unwrap().as_deref(), Some(""));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn close_on_runtime_thread_keeps_flushed_data() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileLogStore::new(tmp.path());
        {
            let mut sink = std::io::BufWriter::new(store.open(5).await.unwrap());
            sink.write_all(b"buffered\n").unwrap();
            sink.flush().unwrap();
            sink.get_mut().close().unwrap();
        }
        assert_eq!(store.read(5).await.unwrap().as_deref(), Some("buffered\n"));
    }
}
