//! Per-library, per-type cache partitions with populate-race detection.
//!
//! A partition is either absent (not yet loaded) or fully loaded. Every
//! mutation of a partition slot, including mutations that arrive while the
//! slot is absent, advances the slot's generation. A bulk load records the
//! generation before it reads storage and is only installed if nothing moved
//! it in the meantime, so a load that raced a commit is never installed.

use std::collections::HashMap;
use std::future::Future;
use std::sync::RwLock;

use stacks_core::{LibraryId, RecordType, StacksResult, StorageError};
use tracing::debug;

pub(crate) type SlotKey = (LibraryId, RecordType);

/// Install attempts before a load is answered without caching.
const INSTALL_ATTEMPTS: usize = 3;

#[derive(Debug)]
pub(crate) struct Partitions<T> {
    state: RwLock<PartitionState<T>>,
}

#[derive(Debug)]
struct PartitionState<T> {
    loaded: HashMap<SlotKey, T>,
    generations: HashMap<SlotKey, u64>,
    clock: u64,
    cleared_at: u64,
}

impl<T> PartitionState<T> {
    fn generation(&self, slot: &SlotKey) -> u64 {
        self.generations
            .get(slot)
            .copied()
            .unwrap_or(0)
            .max(self.cleared_at)
    }

    fn touch(&mut self, slot: SlotKey) {
        self.clock += 1;
        self.generations.insert(slot, self.clock);
    }
}

impl<T> Default for Partitions<T> {
    fn default() -> Self {
        Self {
            state: RwLock::new(PartitionState {
                loaded: HashMap::new(),
                generations: HashMap::new(),
                clock: 0,
                cleared_at: 0,
            }),
        }
    }
}

impl<T> Partitions<T> {
    /// Poison the lock, as a panic inside a cache update would.
    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let state = &self.state;
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = state.write();
            panic!("cache update panicked");
        }));
    }

    /// Read from a loaded partition. `None` if the slot is not loaded.
    pub fn read<R>(&self, slot: &SlotKey, f: impl FnOnce(&T) -> R) -> StacksResult<Option<R>> {
        let state = self.state.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(state.loaded.get(slot).map(f))
    }

    pub fn is_loaded(&self, slot: &SlotKey) -> StacksResult<bool> {
        self.read(slot, |_| ()).map(|r| r.is_some())
    }

    fn generation(&self, slot: &SlotKey) -> StacksResult<u64> {
        let state = self.state.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(state.generation(slot))
    }

    /// Install a freshly loaded partition if the slot has not moved since
    /// `generation` was observed. Returns whether the value was installed.
    fn install(&self, slot: SlotKey, generation: u64, value: T) -> StacksResult<bool> {
        let mut state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        if state.loaded.contains_key(&slot) || state.generation(&slot) != generation {
            return Ok(false);
        }
        state.loaded.insert(slot, value);
        Ok(true)
    }

    /// Mutate a loaded partition. The slot's generation advances either way.
    /// Returns `None` if the slot was not loaded.
    pub fn update<R>(&self, slot: SlotKey, f: impl FnOnce(&mut T) -> R) -> StacksResult<Option<R>> {
        let mut state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        state.touch(slot);
        Ok(state.loaded.get_mut(&slot).map(f))
    }

    /// Drop a partition so the next access reloads it.
    pub fn remove(&self, slot: SlotKey) -> StacksResult<()> {
        let mut state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        state.touch(slot);
        state.loaded.remove(&slot);
        Ok(())
    }

    /// Drop every partition.
    pub fn clear(&self) -> StacksResult<()> {
        let mut state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        state.clock += 1;
        state.cleared_at = state.clock;
        state.loaded.clear();
        state.generations.clear();
        Ok(())
    }

    /// Answer `read` from the partition, loading it first if needed.
    ///
    /// Concurrent first accesses may each load; the first install wins and
    /// the others read from it. A load that raced a mutation is discarded and
    /// retried; after repeated races the caller is answered from its own
    /// load without caching it.
    pub async fn read_through<R, L, Fut>(
        &self,
        slot: SlotKey,
        load: L,
        read: impl Fn(&T) -> R,
    ) -> StacksResult<R>
    where
        L: Fn() -> Fut,
        Fut: Future<Output = StacksResult<T>>,
    {
        let mut last = None;
        for _ in 0..INSTALL_ATTEMPTS {
            if let Some(found) = self.read(&slot, &read)? {
                return Ok(found);
            }
            let generation = self.generation(&slot)?;
            let loaded = load().await?;
            let answer = read(&loaded);
            if self.install(slot, generation, loaded)? {
                return Ok(answer);
            }
            debug!(
                library_id = %slot.0,
                record_type = %slot.1,
                "partition changed during load, retrying"
            );
            last = Some(answer);
        }
        match self.read(&slot, &read)? {
            Some(found) => Ok(found),
            None => match last {
                Some(answer) => Ok(answer),
                None => load().await.map(|loaded| read(&loaded)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(library: u64) -> SlotKey {
        (
            LibraryId::new(library).expect("positive id"),
            RecordType::Collection,
        )
    }

    #[tokio::test]
    async fn test_read_through_loads_once() {
        let partitions: Partitions<Vec<u32>> = Partitions::default();
        let loads = std::sync::atomic::AtomicUsize::new(0);
        for _ in 0..3 {
            let len = partitions
                .read_through(
                    slot(1),
                    || async {
                        loads.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        Ok(vec![1, 2, 3])
                    },
                    |v| v.len(),
                )
                .await
                .expect("read_through should succeed");
            assert_eq!(len, 3);
        }
        assert_eq!(loads.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_install_rejected_after_concurrent_update() {
        let partitions: Partitions<Vec<u32>> = Partitions::default();
        let generation = partitions.generation(&slot(1)).expect("generation");
        // A commit lands while the slot is unloaded.
        assert!(partitions
            .update(slot(1), |v| v.push(9))
            .expect("update")
            .is_none());
        assert!(!partitions
            .install(slot(1), generation, vec![1])
            .expect("install"));
        assert!(!partitions.is_loaded(&slot(1)).expect("is_loaded"));
    }

    #[test]
    fn test_install_rejected_after_clear() {
        let partitions: Partitions<Vec<u32>> = Partitions::default();
        let generation = partitions.generation(&slot(2)).expect("generation");
        partitions.clear().expect("clear");
        assert!(!partitions
            .install(slot(2), generation, vec![1])
            .expect("install"));
    }

    #[test]
    fn test_remove_forces_reload() {
        let partitions: Partitions<Vec<u32>> = Partitions::default();
        let generation = partitions.generation(&slot(1)).expect("generation");
        assert!(partitions
            .install(slot(1), generation, vec![1])
            .expect("install"));
        partitions.remove(slot(1)).expect("remove");
        assert!(!partitions.is_loaded(&slot(1)).expect("is_loaded"));
    }
}
