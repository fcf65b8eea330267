//! Buffered JSONL writer
//!
//! Appends one JSON object per line, buffering up to a batch size and
//! flushing the whole batch as a single write. Remaining buffered lines
//! flush before the handle closes on shutdown.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub struct BufferedJsonlWriter {
    path: PathBuf,
    file: File,
    buffer: Vec<Vec<u8>>,
    batch_size: usize,
    lines_written: u64,
}

impl BufferedJsonlWriter {
    /// Opens (creates/truncates) the file, creating parent directories.
    pub async fn create(path: impl AsRef<Path>, batch_size: usize) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = File::create(&path).await?;
        Ok(Self {
            path,
            file,
            buffer: Vec::with_capacity(batch_size),
            batch_size: batch_size.max(1),
            lines_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }

    /// Serializes the record into the buffer, flushing when the batch
    /// fills.
    pub async fn write<T: Serialize>(&mut self, record: &T) -> std::io::Result<()> {
        let line = serde_json::to_vec(record)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        self.buffer.push(line);
        self.lines_written += 1;
        if self.buffer.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Writes the buffered lines in one syscall: the batch is joined
    /// with newlines and written as a single block.
    pub async fn flush(&mut self) -> std::io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let mut block = Vec::with_capacity(self.buffer.iter().map(|l| l.len() + 1).sum());
        for line in self.buffer.drain(..) {
            block.extend_from_slice(&line);
            block.push(b'\n');
        }
        self.file.write_all(&block).await?;
        self.file.flush().await?;
        Ok(())
    }

    /// Flushes and closes the file.
    pub async fn close(mut self) -> std::io::Result<u64> {
        self.flush().await?;
        self.file.sync_all().await?;
        debug!(path = %self.path.display(), lines = self.lines_written, "jsonl writer closed");
        Ok(self.lines_written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn writes_one_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        let mut writer = BufferedJsonlWriter::create(&path, 2).await.unwrap();

        for i in 0..5 {
            writer.write(&json!({ "i": i })).await.unwrap();
        }
        let lines = writer.close().await.unwrap();
        assert_eq!(lines, 5);

        let contents = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<serde_json::Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(parsed.len(), 5);
        assert_eq!(parsed[3]["i"], 3);
    }

    #[tokio::test]
    async fn close_flushes_a_partial_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.jsonl");
        let mut writer = BufferedJsonlWriter::create(&path, 1000).await.unwrap();
        writer.write(&json!({ "only": true })).await.unwrap();
        // Nothing flushed yet; the batch is far from full.
        writer.close().await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[tokio::test]
    async fn creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/out.jsonl");
        let writer = BufferedJsonlWriter::create(&path, 10).await.unwrap();
        writer.close().await.unwrap();
        assert!(path.exists());
    }
}
