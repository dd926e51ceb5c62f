use crate::error::Result;
use crate::ingestion::LedgerSource;
use crate::ledger::LedgerTable;
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct CacheEntry {
    loaded_at: Instant,
    table: Arc<LedgerTable>,
}

/// Reuses loaded ledgers for a bounded time window, keyed by source.
///
/// The loader stays stateless; callers decide whether to go through a cache.
/// Failed loads are never cached.
pub struct LedgerCache {
    ttl: Duration,
    entries: HashMap<LedgerSource, CacheEntry>,
}

impl LedgerCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get_or_load<F>(&mut self, source: &LedgerSource, load: F) -> Result<Arc<LedgerTable>>
    where
        F: FnOnce(&LedgerSource) -> Result<LedgerTable>,
    {
        self.get_or_load_at(Instant::now(), source, load)
    }

    pub fn get_or_load_at<F>(
        &mut self,
        now: Instant,
        source: &LedgerSource,
        load: F,
    ) -> Result<Arc<LedgerTable>>
    where
        F: FnOnce(&LedgerSource) -> Result<LedgerTable>,
    {
        if let Some(entry) = self.entries.get(source) {
            if self.is_fresh(entry, now) {
                debug!("Ledger cache hit for {}", source);
                return Ok(Arc::clone(&entry.table));
            }
        }

        debug!("Ledger cache miss for {}", source);
        let table = Arc::new(load(source)?);
        self.entries.insert(
            source.clone(),
            CacheEntry {
                loaded_at: now,
                table: Arc::clone(&table),
            },
        );
        Ok(table)
    }

    pub fn invalidate(&mut self, source: &LedgerSource) -> bool {
        self.entries.remove(source).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drops every entry older than the TTL at `now`.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.loaded_at) < ttl);
        before - self.entries.len()
    }

    fn is_fresh(&self, entry: &CacheEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.loaded_at) < self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use std::cell::Cell;

    fn source() -> LedgerSource {
        LedgerSource::parse("ledger.csv")
    }

    #[test]
    fn test_hit_within_ttl() {
        let mut cache = LedgerCache::new(Duration::from_secs(10));
        let calls = Cell::new(0);
        let start = Instant::now();

        for offset in [0, 5, 9] {
            cache
                .get_or_load_at(start + Duration::from_secs(offset), &source(), |_| {
                    calls.set(calls.get() + 1);
                    Ok(LedgerTable::default())
                })
                .unwrap();
        }
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_reload_after_ttl() {
        let mut cache = LedgerCache::new(Duration::from_secs(10));
        let calls = Cell::new(0);
        let start = Instant::now();

        for offset in [0, 10, 11] {
            cache
                .get_or_load_at(start + Duration::from_secs(offset), &source(), |_| {
                    calls.set(calls.get() + 1);
                    Ok(LedgerTable::default())
                })
                .unwrap();
        }
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_errors_not_cached() {
        let mut cache = LedgerCache::new(Duration::from_secs(10));
        let result = cache.get_or_load(&source(), |s| {
            Err(LedgerError::unreachable(s.to_string(), "offline"))
        });
        assert!(result.is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_and_purge() {
        let mut cache = LedgerCache::new(Duration::from_secs(10));
        let start = Instant::now();
        let other = LedgerSource::parse("https://example.com/other.csv");

        cache
            .get_or_load_at(start, &source(), |_| Ok(LedgerTable::default()))
            .unwrap();
        cache
            .get_or_load_at(start + Duration::from_secs(8), &other, |_| {
                Ok(LedgerTable::default())
            })
            .unwrap();
        assert_eq!(cache.len(), 2);

        assert_eq!(cache.purge_expired(start + Duration::from_secs(12)), 1);
        assert!(cache.invalidate(&other));
        assert!(!cache.invalidate(&other));
        assert!(cache.is_empty());
    }
}
