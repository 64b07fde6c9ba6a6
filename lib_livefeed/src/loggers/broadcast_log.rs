//! # Broadcast Log Sink
//!
//! Writes persisted event records to plain-text files, one file per log session,
//! named after the session key (`<YYYY-MM-DD_HH-MM-SS>.txt`). Files are opened lazily
//! on the first line and kept open until the session is closed. All file I/O goes
//! through `tokio::fs`, so appends never block the receive loop.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::collaborators::{CollaboratorError, LogSessionKey, LogSink};

pub struct FileLogSink {
    dir: PathBuf,
    open: Mutex<HashMap<LogSessionKey, File>>,
}

impl FileLogSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            open: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file backing `key`.
    pub fn path_for(&self, key: &LogSessionKey) -> PathBuf {
        self.dir.join(format!("{}.txt", key.file_stem()))
    }

    async fn open_file(&self, key: &LogSessionKey) -> Result<File, CollaboratorError> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        info!(path = %path.display(), "broadcast log opened");
        Ok(file)
    }
}

#[async_trait]
impl LogSink for FileLogSink {
    async fn append_line(&self, key: &LogSessionKey, line: &str) -> Result<(), CollaboratorError> {
        let mut files = self.open.lock().await;
        if !files.contains_key(key) {
            let file = self.open_file(key).await?;
            files.insert(key.clone(), file);
        }
        if let Some(file) = files.get_mut(key) {
            file.write_all(format!("{line}\n").as_bytes()).await?;
            file.flush().await?;
        }
        Ok(())
    }

    async fn close_session(&self, key: &LogSessionKey) {
        let removed = self.open.lock().await.remove(key);
        if let Some(mut file) = removed {
            if let Err(e) = file.flush().await {
                warn!(log_session = %key, error = %e, "flush on close failed");
            }
            info!(path = %self.path_for(key).display(), "broadcast log closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};

    fn key(sec: u32) -> LogSessionKey {
        LogSessionKey::from_datetime(&Local.with_ymd_and_hms(2024, 3, 9, 18, 0, sec).unwrap())
    }

    #[tokio::test]
    async fn creates_file_lazily_and_appends() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = FileLogSink::new(tmp.path().join("records"));
        let k = key(5);
        assert!(!sink.path_for(&k).exists());

        sink.append_line(&k, "[chat] one").await.unwrap();
        sink.append_line(&k, "[chat] two").await.unwrap();

        let path = tmp.path().join("records").join("2024-03-09_18-00-05.txt");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[chat] one\n[chat] two\n");
    }

    #[tokio::test]
    async fn close_is_idempotent_and_reopen_appends() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = FileLogSink::new(tmp.path());
        let k = key(7);

        sink.close_session(&k).await;
        sink.append_line(&k, "a").await.unwrap();
        sink.close_session(&k).await;
        sink.close_session(&k).await;
        sink.append_line(&k, "b").await.unwrap();

        assert_eq!(std::fs::read_to_string(sink.path_for(&k)).unwrap(), "a\nb\n");
    }

    #[tokio::test]
    async fn sessions_are_kept_apart() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = FileLogSink::new(tmp.path());
        sink.append_line(&key(1), "first").await.unwrap();
        sink.append_line(&key(2), "second").await.unwrap();
        assert_eq!(std::fs::read_to_string(sink.path_for(&key(1))).unwrap(), "first\n");
        assert_eq!(std::fs::read_to_string(sink.path_for(&key(2))).unwrap(), "second\n");
    }

    #[tokio::test]
    async fn unwritable_directory_is_a_sink_error() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("taken");
        std::fs::write(&blocker, "not a directory").unwrap();

        let sink = FileLogSink::new(blocker.join("records"));
        assert!(matches!(
            sink.append_line(&key(3), "lost").await,
            Err(CollaboratorError::Sink(_))
        ));
    }
}
