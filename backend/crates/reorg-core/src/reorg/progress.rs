//! Per-dispatch backfill progress.
//!
//! Written by the backfill task on its hot path and read by the checkpoint
//! committer. The pending row count and the key to resume from live in one
//! immutable snapshot swapped through `ArcSwap`, so a reader never sees a
//! batch's rows without the key that ends it.
//!
//! The row count is a *pending* count: rows handled since the last successful
//! checkpoint. [`ReorgProgress::take_row_count_and_key`] moves it out so a row
//! is merged into the job's total exactly once.

use arc_swap::ArcSwap;
use reorg_commons::Key;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
struct Snapshot {
    pending_rows: i64,
    next_key: Option<Key>,
}

#[derive(Debug)]
pub struct ReorgProgress {
    state: ArcSwap<Snapshot>,
}

impl Default for ReorgProgress {
    fn default() -> Self {
        Self {
            state: ArcSwap::from_pointee(Snapshot::default()),
        }
    }
}

impl ReorgProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish one committed batch: its row count and the key after its last
    /// record.
    pub fn report_batch(&self, rows: i64, next_key: Key) {
        self.state.rcu(|current| Snapshot {
            pending_rows: current.pending_rows + rows,
            next_key: Some(next_key.clone()),
        });
    }

    /// Put back rows whose checkpoint failed to commit. The key is kept.
    pub fn restore_rows(&self, rows: i64) {
        if rows == 0 {
            return;
        }
        self.state.rcu(|current| Snapshot {
            pending_rows: current.pending_rows + rows,
            next_key: current.next_key.clone(),
        });
    }

    pub fn row_count(&self) -> i64 {
        self.state.load().pending_rows
    }

    pub fn next_key(&self) -> Option<Key> {
        self.state.load().next_key.clone()
    }

    /// Read both fields in one step, zeroing the pending row count. The key
    /// is kept.
    pub fn take_row_count_and_key(&self) -> (i64, Option<Key>) {
        let previous = self.state.rcu(|current| Snapshot {
            pending_rows: 0,
            next_key: current.next_key.clone(),
        });
        (previous.pending_rows, previous.next_key.clone())
    }

    /// Reset both fields once the backfill's outcome has been committed.
    pub fn clean(&self) {
        self.state.store(Arc::new(Snapshot::default()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u32) -> Key {
        Key::new(n.to_be_bytes().to_vec())
    }

    #[test]
    fn test_take_clears_count_but_keeps_key() {
        let progress = ReorgProgress::new();
        progress.report_batch(4, key(1));
        progress.report_batch(6, key(2));

        assert_eq!(progress.take_row_count_and_key(), (10, Some(key(2))));
        assert_eq!(progress.take_row_count_and_key(), (0, Some(key(2))));
    }

    #[test]
    fn test_restore_keeps_latest_key() {
        let progress = ReorgProgress::new();
        progress.report_batch(3, key(1));
        let (rows, _) = progress.take_row_count_and_key();
        progress.report_batch(2, key(2));
        progress.restore_rows(rows);
        assert_eq!(progress.take_row_count_and_key(), (5, Some(key(2))));
    }

    #[test]
    fn test_clean_resets_everything() {
        let progress = ReorgProgress::new();
        progress.report_batch(3, key(1));
        progress.clean();
        assert_eq!(progress.row_count(), 0);
        assert_eq!(progress.next_key(), None);
    }

    #[test]
    fn test_rows_never_taken_without_their_key() {
        // Every batch is one row ending at key(n); a take must see exactly
        // as many rows as the key it returns accounts for.
        let progress = Arc::new(ReorgProgress::new());
        let writer = {
            let progress = Arc::clone(&progress);
            std::thread::spawn(move || {
                for n in 1..=5000u32 {
                    progress.report_batch(1, key(n));
                }
            })
        };

        let mut taken = 0i64;
        loop {
            let (rows, next) = progress.take_row_count_and_key();
            taken += rows;
            let covered = next.map_or(0, |k| {
                let bytes: [u8; 4] = k.as_bytes().try_into().unwrap();
                u32::from_be_bytes(bytes) as i64
            });
            assert_eq!(taken, covered);
            if covered == 5000 {
                break;
            }
            std::thread::yield_now();
        }
        writer.join().unwrap();
    }

    #[test]
    fn test_concurrent_reports_are_not_lost() {
        let progress = Arc::new(ReorgProgress::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let progress = Arc::clone(&progress);
                std::thread::spawn(move || {
                    for n in 0..1000 {
                        progress.report_batch(1, key(n));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(progress.row_count(), 8000);
    }
}
