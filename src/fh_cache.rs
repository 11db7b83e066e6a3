//! C4: fixed-size (dev,ino) → path LRU cache with lazy revalidation
//! and a pinned "last returned" slot.

use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::host;

const FH_CACHE_SLOTS: usize = 4096;

struct Slot {
    dev: u32,
    ino: u64,
    path: PathBuf,
    last_used: Instant,
    occupied: bool,
}

impl Slot {
    fn empty(now: Instant) -> Self {
        Slot {
            dev: 0,
            ino: 0,
            path: PathBuf::new(),
            last_used: now,
            occupied: false,
        }
    }
}

/// (dev,ino)→path resolver cache. Lookup revalidates via `lstat`
/// before trusting a hit, so a stale entry never causes a wrong
/// answer — only a cache miss.
pub struct FhCache {
    slots: Vec<Slot>,
    pinned: Option<usize>,
}

impl FhCache {
    pub fn new() -> Self {
        let now = Instant::now();
        FhCache {
            slots: (0..FH_CACHE_SLOTS).map(|_| Slot::empty(now)).collect(),
            pinned: None,
        }
    }

    /// Looks up `(dev, ino)`, revalidating the candidate slot with
    /// `lstat`. A device/inode mismatch or a failed `lstat` both
    /// invalidate the slot and report a miss.
    pub fn lookup(&mut self, dev: u32, ino: u64) -> Option<PathBuf> {
        let idx = self
            .slots
            .iter()
            .position(|s| s.occupied && s.dev == dev && s.ino == ino)?;

        match host::lstat(&self.slots[idx].path) {
            Ok(stat) if stat.st_dev as u32 == dev && stat.st_ino == ino => {
                self.slots[idx].last_used = Instant::now();
                self.pinned = Some(idx);
                Some(self.slots[idx].path.clone())
            }
            _ => {
                self.invalidate_slot(idx);
                None
            }
        }
    }

    /// Inserts `(dev, ino) -> path`. Prefers an empty slot, then the
    /// least-recently-used occupied slot other than the pinned
    /// "last returned" one.
    pub fn insert(&mut self, dev: u32, ino: u64, path: PathBuf) {
        let now = Instant::now();

        if let Some(idx) = self.slots.iter().position(|s| !s.occupied) {
            self.slots[idx] = Slot {
                dev,
                ino,
                path,
                last_used: now,
                occupied: true,
            };
            return;
        }

        let victim = self
            .slots
            .iter()
            .enumerate()
            .filter(|(idx, _)| Some(*idx) != self.pinned)
            .min_by_key(|(_, s)| s.last_used)
            .map(|(idx, _)| idx)
            .unwrap_or(0);

        self.slots[victim] = Slot {
            dev,
            ino,
            path,
            last_used: now,
            occupied: true,
        };
    }

    pub fn invalidate(&mut self, dev: u32, ino: u64) {
        if let Some(idx) = self
            .slots
            .iter()
            .position(|s| s.occupied && s.dev == dev && s.ino == ino)
        {
            self.invalidate_slot(idx);
        }
    }

    fn invalidate_slot(&mut self, idx: usize) {
        self.slots[idx].occupied = false;
        if self.pinned == Some(idx) {
            self.pinned = None;
        }
    }

    pub fn occupied_count(&self) -> usize {
        self.slots.iter().filter(|s| s.occupied).count()
    }
}

impl Default for FhCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn insert_then_lookup_hits() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"x").unwrap();
        let stat = host::lstat(&file).unwrap();

        let mut cache = FhCache::new();
        cache.insert(stat.st_dev as u32, stat.st_ino, file.clone());
        assert_eq!(cache.lookup(stat.st_dev as u32, stat.st_ino), Some(file));
    }

    #[test]
    fn lookup_invalidates_on_removal() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"x").unwrap();
        let stat = host::lstat(&file).unwrap();

        let mut cache = FhCache::new();
        cache.insert(stat.st_dev as u32, stat.st_ino, file.clone());
        std::fs::remove_file(&file).unwrap();
        assert_eq!(cache.lookup(stat.st_dev as u32, stat.st_ino), None);
        assert_eq!(cache.occupied_count(), 0);
    }

    #[test]
    fn pinned_slot_survives_eviction_pressure() {
        let dir = tempdir().unwrap();
        let pinned_file = dir.path().join("pinned");
        std::fs::write(&pinned_file, b"x").unwrap();
        let pinned_stat = host::lstat(&pinned_file).unwrap();

        let mut cache = FhCache::new();
        cache.insert(pinned_stat.st_dev as u32, pinned_stat.st_ino, pinned_file.clone());
        cache.lookup(pinned_stat.st_dev as u32, pinned_stat.st_ino);

        for i in 0..(FH_CACHE_SLOTS + 10) {
            cache.insert(1, i as u64, PathBuf::from(format!("/tmp/{i}")));
        }

        assert_eq!(
            cache.lookup(pinned_stat.st_dev as u32, pinned_stat.st_ino),
            Some(pinned_file)
        );
    }
}
