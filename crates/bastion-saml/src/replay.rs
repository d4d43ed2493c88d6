//! Replay detection for consumed assertion identifiers.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Store of seen assertion identifiers with expiry.
///
/// Owned by the `Options` instance whose validations it protects, never
/// process-global: two responses sharing an assertion id validated under
/// two different `Options` instances do not collide.
#[derive(Debug, Default)]
pub struct ReplayCache {
    seen: DashMap<String, DateTime<Utc>>,
}

impl ReplayCache {
    #[must_use]
    pub fn new() -> Self {
        ReplayCache::default()
    }

    /// Record an assertion id. Returns `true` when the id was fresh and
    /// `false` on a replay. Insert-if-absent is a single atomic entry
    /// operation, safe under concurrent validations.
    pub fn register(&self, id: &str, expires_at: DateTime<Utc>) -> bool {
        self.purge_expired();
        match self.seen.entry(id.to_string()) {
            Entry::Occupied(_) => {
                tracing::warn!(assertion_id = %id, "replayed assertion id rejected");
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(expires_at);
                true
            }
        }
    }

    /// Number of live entries. Test observability.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn purge_expired(&self) {
        let now = Utc::now();
        self.seen.retain(|_, expires_at| *expires_at > now);
    }
}
