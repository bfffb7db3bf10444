//! Short-TTL snapshots of the admin-authored tables.
//!
//! The banned-word, ban and whitelist tables are read on every submission
//! but change rarely, so each is held as an immutable `Arc` snapshot that
//! expires after a short TTL and is dropped synchronously whenever an
//! admin endpoint writes to the underlying table. Readers always see
//! either the previous complete snapshot or the next one, never a
//! half-updated list.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

struct Snapshot<T> {
    data: Arc<T>,
    loaded_at: Instant,
}

pub struct TtlCell<T> {
    slot: RwLock<Option<Snapshot<T>>>,
}

impl<T> TtlCell<T> {
    pub const fn new() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }

    /// Returns the snapshot if one is present and younger than `ttl`.
    pub fn get(&self, ttl: Duration) -> Option<Arc<T>> {
        let slot = self.slot.read().unwrap();
        slot.as_ref()
            .filter(|snap| snap.loaded_at.elapsed() < ttl)
            .map(|snap| snap.data.clone())
    }

    pub fn put(&self, value: T) -> Arc<T> {
        let data = Arc::new(value);
        *self.slot.write().unwrap() = Some(Snapshot {
            data: data.clone(),
            loaded_at: Instant::now(),
        });
        data
    }

    /// Called synchronously from every admin write to the backing table.
    pub fn invalidate(&self) {
        *self.slot.write().unwrap() = None;
    }
}

pub static FILTER_RULES: TtlCell<Vec<crate::filter::CompiledRule>> = TtlCell::new();
pub static IP_BANS: TtlCell<Vec<crate::orm::ip_bans::Model>> = TtlCell::new();
pub static IP_WHITELIST: TtlCell<Vec<crate::orm::ip_whitelist::Model>> = TtlCell::new();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_expires_and_invalidates() {
        let cell: TtlCell<i32> = TtlCell::new();
        assert!(cell.get(Duration::from_secs(30)).is_none());

        cell.put(7);
        assert_eq!(*cell.get(Duration::from_secs(30)).unwrap(), 7);
        // A zero TTL treats any snapshot as stale.
        assert!(cell.get(Duration::from_secs(0)).is_none());

        cell.invalidate();
        assert!(cell.get(Duration::from_secs(30)).is_none());
    }
}
