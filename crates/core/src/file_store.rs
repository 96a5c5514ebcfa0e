// File-backed checkpoint store
//
// One JSON-lines file per thread at `<base>/<thread_id>.jsonl`, one
// checkpoint per line, oldest first. Saves append a single line; a line
// left incomplete by an interrupted append is discarded on the next save
// and skipped by readers.
//
// Each thread keeps its next step and file length in memory beside its
// lock. A save trusts the cached step only while the file length still
// matches, so writes from another store on the same directory force a
// rescan.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::checkpoint::{validate_thread_id, Checkpoint, CheckpointKind};
use crate::error::Result;
use crate::state::ConversationState;
use crate::traits::{CheckpointStore, CheckpointStream};

const FILE_EXTENSION: &str = "jsonl";

/// Append position of a thread file as of this store's last write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ThreadTail {
    next_step: u64,
    len: u64,
}

type TailSlot = Arc<Mutex<Option<ThreadTail>>>;

pub struct FileCheckpointStore {
    base_path: PathBuf,
    tails: Mutex<HashMap<String, TailSlot>>,
}

impl FileCheckpointStore {
    /// Create a new file store rooted at `base_path` (created on first save)
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            tails: Mutex::new(HashMap::new()),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub(crate) fn thread_path(&self, thread_id: &str) -> Result<PathBuf> {
        validate_thread_id(thread_id)?;
        Ok(self
            .base_path
            .join(format!("{thread_id}.{FILE_EXTENSION}")))
    }

    async fn thread_slot(&self, thread_id: &str) -> TailSlot {
        self.tails
            .lock()
            .await
            .entry(thread_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop a thread's slot unless another task still holds it
    async fn release_slot(&self, thread_id: &str, slot: &TailSlot) {
        let mut tails = self.tails.lock().await;
        let unused = tails
            .get(thread_id)
            .is_some_and(|held| Arc::ptr_eq(held, slot) && Arc::strong_count(slot) <= 2);
        if unused {
            tails.remove(thread_id);
        }
    }

    #[cfg(test)]
    async fn tracked_threads(&self) -> usize {
        self.tails.lock().await.len()
    }

    /// Find the next step by reading the file, cutting off a torn last line
    async fn scan_tail(thread_id: &str, path: &Path) -> Result<ThreadTail> {
        let bytes = Self::read_thread(path).await?;
        let valid = complete_len(&bytes);
        if valid < bytes.len() {
            warn!(
                thread_id = %thread_id,
                discarded_bytes = bytes.len() - valid,
                "Discarding incomplete checkpoint line"
            );
            let file = OpenOptions::new().write(true).open(path).await?;
            file.set_len(valid as u64).await?;
        }

        let next_step = last_checkpoint(&bytes[..valid])?.map_or(0, |last| last.step + 1);
        Ok(ThreadTail {
            next_step,
            len: valid as u64,
        })
    }

    async fn file_len(path: &Path) -> Result<u64> {
        match tokio::fs::metadata(path).await {
            Ok(metadata) => Ok(metadata.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Read a thread file; missing files read as empty
    async fn read_thread(path: &Path) -> Result<Vec<u8>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for FileCheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCheckpointStore")
            .field("base_path", &self.base_path)
            .finish()
    }
}

/// Length of the prefix made of complete lines
fn complete_len(bytes: &[u8]) -> usize {
    bytes
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |index| index + 1)
}

/// Parse the last non-empty line of complete file content
fn last_checkpoint(complete: &[u8]) -> Result<Option<Checkpoint>> {
    complete
        .split(|b| *b == b'\n')
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
        .last()
        .map(serde_json::from_slice::<Checkpoint>)
        .transpose()
        .map_err(Into::into)
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(
        &self,
        thread_id: &str,
        state: &ConversationState,
        kind: CheckpointKind,
    ) -> Result<Checkpoint> {
        let path = self.thread_path(thread_id)?;
        let slot = self.thread_slot(thread_id).await;
        let mut tail = slot.lock().await;

        tokio::fs::create_dir_all(&self.base_path).await?;

        let on_disk = Self::file_len(&path).await?;
        let current = match tail.take().filter(|cached| cached.len == on_disk) {
            Some(cached) => cached,
            None => Self::scan_tail(thread_id, &path).await?,
        };

        let checkpoint = Checkpoint::new(thread_id, current.next_step, kind, state);
        let mut line = serde_json::to_vec(&checkpoint)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&line).await?;
        file.sync_data().await?;
        *tail = Some(ThreadTail {
            next_step: current.next_step + 1,
            len: current.len + line.len() as u64,
        });

        debug!(
            thread_id = %thread_id,
            step = checkpoint.step,
            kind = %checkpoint.kind,
            messages = checkpoint.message_count(),
            "Saved checkpoint"
        );
        Ok(checkpoint)
    }

    fn list_checkpoints<'a>(&'a self, thread_id: &'a str) -> CheckpointStream<'a> {
        Box::pin(stream! {
            let path = match self.thread_path(thread_id) {
                Ok(path) => path,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let file = match File::open(&path).await {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::NotFound => return,
                Err(e) => {
                    yield Err(e.into());
                    return;
                }
            };

            let mut lines = BufReader::new(file).lines();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => return,
                    Err(e) => {
                        yield Err(e.into());
                        return;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                match serde_json::from_str::<Checkpoint>(&line) {
                    Ok(checkpoint) => yield Ok(checkpoint),
                    Err(e) => {
                        // Only the final line may be incomplete
                        if let Ok(None) = lines.next_line().await {
                            warn!(thread_id = %thread_id, "Skipping incomplete checkpoint line");
                        } else {
                            yield Err(e.into());
                        }
                        return;
                    }
                }
            }
        })
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let path = self.thread_path(thread_id)?;
        let bytes = Self::read_thread(&path).await?;
        last_checkpoint(&bytes[..complete_len(&bytes)])
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let path = self.thread_path(thread_id)?;
        let slot = self.thread_slot(thread_id).await;
        let mut tail = slot.lock().await;

        let removed = match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(thread_id = %thread_id, "Deleted thread");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        };
        *tail = None;
        drop(tail);

        self.release_slot(thread_id, &slot).await;
        removed
    }

    async fn threads(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == FILE_EXTENSION) {
                if let Some(id) = path.file_stem().and_then(|stem| stem.to_str()) {
                    ids.push(id.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentLoopError;
    use crate::message::Message;
    use futures::StreamExt;
    use tempfile::TempDir;

    fn state(texts: &[&str]) -> ConversationState {
        ConversationState::from(texts.iter().map(|t| Message::user(*t)).collect::<Vec<_>>())
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        let first = store
            .save("t1", &state(&["a"]), CheckpointKind::ToolCallsRequested)
            .await
            .unwrap();
        let second = store
            .save("t1", &state(&["a", "b"]), CheckpointKind::ToolResults)
            .await
            .unwrap();

        assert_eq!((first.step, second.step), (0, 1));
        assert_eq!(store.load("t1").await.unwrap().len(), 2);
        assert!(dir.path().join("t1.jsonl").exists());
    }

    #[tokio::test]
    async fn test_list_checkpoints_lazily() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        for i in 1..=3 {
            let texts: Vec<&str> = ["a", "b", "c"][..i].to_vec();
            store
                .save("t1", &state(&texts), CheckpointKind::ToolResults)
                .await
                .unwrap();
        }

        let mut listing = store.list_checkpoints("t1");
        let first = listing.next().await.unwrap().unwrap();
        assert_eq!(first.message_count(), 1);
        drop(listing);

        let all: Vec<Checkpoint> = store
            .list_checkpoints("t1")
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].message_count(), 3);
        assert!(store.list_checkpoints("nobody").next().await.is_none());
    }

    #[tokio::test]
    async fn test_torn_tail_is_ignored_and_repaired() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store
            .save("t1", &state(&["a"]), CheckpointKind::Final)
            .await
            .unwrap();

        let path = dir.path().join("t1.jsonl");
        let mut file = OpenOptions::new().append(true).open(&path).await.unwrap();
        file.write_all(br#"{"id":"0190"#).await.unwrap();
        drop(file);

        let listed: Vec<_> = store.list_checkpoints("t1").collect().await;
        assert_eq!(listed.len(), 1);
        assert!(listed[0].is_ok());
        assert_eq!(store.latest("t1").await.unwrap().unwrap().step, 0);

        let next = store
            .save("t1", &state(&["a", "b"]), CheckpointKind::Final)
            .await
            .unwrap();
        assert_eq!(next.step, 1);
        let listed: Vec<_> = store.list_checkpoints("t1").collect().await;
        assert!(listed.iter().all(|c| c.is_ok()));
        assert_eq!(listed.len(), 2);
    }

    #[tokio::test]
    async fn test_steps_continue_across_stores_on_one_directory() {
        let dir = TempDir::new().unwrap();
        let first = FileCheckpointStore::new(dir.path());
        let second = FileCheckpointStore::new(dir.path());

        let mut steps = Vec::new();
        for store in [&first, &second, &first, &first] {
            let checkpoint = store
                .save("t1", &state(&["a"]), CheckpointKind::ToolResults)
                .await
                .unwrap();
            steps.push(checkpoint.step);
        }
        assert_eq!(steps, vec![0, 1, 2, 3]);

        let listed: Vec<u64> = second
            .list_checkpoints("t1")
            .map(|c| c.unwrap().step)
            .collect()
            .await;
        assert_eq!(listed, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_delete_forgets_thread() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store.save("t1", &state(&["a"]), CheckpointKind::Final).await.unwrap();
        store.save("t1", &state(&["a"]), CheckpointKind::Final).await.unwrap();
        store.save("t2", &state(&["b"]), CheckpointKind::Final).await.unwrap();
        assert_eq!(store.tracked_threads().await, 2);

        store.delete_thread("t1").await.unwrap();
        store.delete_thread("never-saved").await.unwrap();
        assert_eq!(store.tracked_threads().await, 1);

        let restarted = store
            .save("t1", &state(&["c"]), CheckpointKind::Final)
            .await
            .unwrap();
        assert_eq!(restarted.step, 0);
    }

    #[tokio::test]
    async fn test_rejects_path_escaping_ids() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        let err = store
            .save("../outside", &state(&["a"]), CheckpointKind::Final)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentLoopError::InvalidThreadId(_)));
        assert!(store.list_checkpoints("a/b").next().await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_threads_and_delete() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("nested"));
        assert!(store.threads().await.unwrap().is_empty());

        store.save("b", &state(&["x"]), CheckpointKind::Final).await.unwrap();
        store.save("a", &state(&["y"]), CheckpointKind::Final).await.unwrap();
        assert_eq!(store.threads().await.unwrap(), vec!["a", "b"]);

        store.delete_thread("a").await.unwrap();
        store.delete_thread("a").await.unwrap();
        assert_eq!(store.threads().await.unwrap(), vec!["b"]);
        assert!(store.load("a").await.unwrap().is_empty());
    }
}
