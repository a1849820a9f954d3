//! Disk-backed spill queue for destination batches (spec.md §4.8, §6).
//!
//! Grounded on the teacher crate's `fleet::queue::UploadQueue`: a directory of
//! files named by monotonic sequence, scanned on open to resume pending
//! batches after a restart. Unlike the fleet queue, entries here are
//! serialized *batches* (`Vec<Event>`), not single records, and the
//! directory is bounded by total bytes rather than entry count (spec.md
//! §4.8 "the spill queue enforces a size cap by dropping oldest").

use crate::error::SpillError;
use crate::event::Event;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, error, warn};

/// One spilled batch, identified by a monotonic sequence number so replay
/// order matches enqueue order (spec.md §5: "within a destination worker,
/// batches are written in enqueue order").
pub struct SpillEntry {
    pub path: PathBuf,
    pub sequence: u64,
}

/// File-backed FIFO of serialized event batches for one destination.
pub struct SpillQueue {
    dir: PathBuf,
    max_bytes: u64,
    next_sequence: AtomicU64,
    /// Guards read-modify-write of the directory (size check + oldest-drop);
    /// spec.md §5 requires the spill queue be protected by a per-destination mutex.
    lock: Mutex<()>,
}

impl SpillQueue {
    pub fn open(dir: impl AsRef<Path>, max_bytes: u64) -> Result<Self, SpillError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| SpillError::Io(e.to_string()))?;
        let next_sequence = Self::scan_max_sequence(&dir)? + 1;
        Ok(Self { dir, max_bytes, next_sequence: AtomicU64::new(next_sequence), lock: Mutex::new(()) })
    }

    fn scan_max_sequence(dir: &Path) -> Result<u64, SpillError> {
        let mut max_seq = 0u64;
        for entry in fs::read_dir(dir).map_err(|e| SpillError::Io(e.to_string()))? {
            let entry = entry.map_err(|e| SpillError::Io(e.to_string()))?;
            if let Some(seq) = sequence_from_filename(&entry.file_name().to_string_lossy()) {
                max_seq = max_seq.max(seq);
            }
        }
        Ok(max_seq)
    }

    /// Append a serialized batch, dropping the oldest entries first if the
    /// directory would otherwise exceed `max_bytes`.
    pub fn push(&self, batch: &[Event]) -> Result<(), SpillError> {
        let _guard = self.lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let payload = serde_json::to_vec(batch).map_err(|e| SpillError::Serialization(e.to_string()))?;

        self.enforce_cap_locked(payload.len() as u64)?;

        let seq = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let millis = chrono::Utc::now().timestamp_millis();
        let path = self.dir.join(format!("{seq:020}-{millis}.batch"));
        fs::write(&path, &payload).map_err(|e| SpillError::Io(e.to_string()))?;
        debug!(path = %path.display(), bytes = payload.len(), "spilled batch to disk");
        Ok(())
    }

    fn enforce_cap_locked(&self, incoming_bytes: u64) -> Result<(), SpillError> {
        let mut entries = self.entries_locked()?;
        let mut total: u64 = entries.iter().filter_map(|(p, _)| fs::metadata(p).ok()).map(|m| m.len()).sum();
        while total + incoming_bytes > self.max_bytes && !entries.is_empty() {
            let (oldest_path, _) = entries.remove(0);
            let size = fs::metadata(&oldest_path).map(|m| m.len()).unwrap_or(0);
            if let Err(err) = fs::remove_file(&oldest_path) {
                warn!(path = %oldest_path.display(), %err, "failed to drop oldest spill entry over cap");
                break;
            }
            warn!(path = %oldest_path.display(), "spill queue over byte cap, dropped oldest entry");
            total = total.saturating_sub(size);
        }
        Ok(())
    }

    fn entries_locked(&self) -> Result<Vec<(PathBuf, u64)>, SpillError> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(|e| SpillError::Io(e.to_string()))? {
            let entry = entry.map_err(|e| SpillError::Io(e.to_string()))?;
            let path = entry.path();
            if let Some(seq) = sequence_from_filename(&path.file_name().unwrap_or_default().to_string_lossy()) {
                out.push((path, seq));
            }
        }
        out.sort_by_key(|(_, seq)| *seq);
        Ok(out)
    }

    /// The oldest un-replayed batch, if any, without removing it from disk.
    pub fn peek_oldest(&self) -> Result<Option<(SpillEntry, Vec<Event>)>, SpillError> {
        let _guard = self.lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let entries = self.entries_locked()?;
        let Some((path, sequence)) = entries.into_iter().next() else { return Ok(None) };
        let data = match fs::read(&path) {
            Ok(d) => d,
            Err(err) => {
                error!(path = %path.display(), %err, "spill entry unreadable, dropping");
                let _ = fs::remove_file(&path);
                return Ok(None);
            }
        };
        match serde_json::from_slice::<Vec<Event>>(&data) {
            Ok(batch) => Ok(Some((SpillEntry { path, sequence }, batch))),
            Err(err) => {
                error!(path = %path.display(), %err, "corrupted spill entry, dropping");
                let _ = fs::remove_file(&path);
                Ok(None)
            }
        }
    }

    /// Remove a spilled entry after it has been successfully re-dispatched.
    pub fn remove(&self, entry: &SpillEntry) -> Result<(), SpillError> {
        let _guard = self.lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if entry.path.exists() {
            fs::remove_file(&entry.path).map_err(|e| SpillError::Io(e.to_string()))?;
        }
        Ok(())
    }

    pub fn pending_count(&self) -> usize {
        self.entries_locked().map(|e| e.len()).unwrap_or(0)
    }
}

fn sequence_from_filename(name: &str) -> Option<u64> {
    name.split('-').next()?.parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_peek_roundtrips_batch() {
        let dir = tempfile::tempdir().unwrap();
        let queue = SpillQueue::open(dir.path(), 10_000_000).unwrap();
        let batch = vec![Event::from_raw("a"), Event::from_raw("b")];
        queue.push(&batch).unwrap();
        let (entry, read_back) = queue.peek_oldest().unwrap().unwrap();
        assert_eq!(read_back.len(), 2);
        queue.remove(&entry).unwrap();
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn replays_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let queue = SpillQueue::open(dir.path(), 10_000_000).unwrap();
        queue.push(&[Event::from_raw("first")]).unwrap();
        queue.push(&[Event::from_raw("second")]).unwrap();
        let (entry, batch) = queue.peek_oldest().unwrap().unwrap();
        assert_eq!(batch[0].raw(), "first");
        queue.remove(&entry).unwrap();
        let (_, batch) = queue.peek_oldest().unwrap().unwrap();
        assert_eq!(batch[0].raw(), "second");
    }

    #[test]
    fn survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let queue = SpillQueue::open(dir.path(), 10_000_000).unwrap();
            queue.push(&[Event::from_raw("persisted")]).unwrap();
        }
        let queue = SpillQueue::open(dir.path(), 10_000_000).unwrap();
        assert_eq!(queue.pending_count(), 1);
    }

    #[test]
    fn drops_oldest_entries_once_over_byte_cap() {
        let dir = tempfile::tempdir().unwrap();
        let queue = SpillQueue::open(dir.path(), 1).unwrap();
        queue.push(&[Event::from_raw("first")]).unwrap();
        queue.push(&[Event::from_raw("second")]).unwrap();
        // The 1-byte cap forces every push to evict prior entries.
        assert!(queue.pending_count() <= 1);
    }
}
