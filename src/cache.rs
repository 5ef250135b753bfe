//! The process-wide taxonomy cache shared by every resolution job.
//!
//! Five facet maps are guarded by a single mutex so that each public
//! operation is one critical section; operations do not compose, and a
//! get-then-put pair is deliberately non-atomic (a concurrent put by
//! another job may win, which is safe because values are canonical).
use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::taxonomy::Taxonomy;

/// Hard per-facet capacity. A facet growing past this is wholesale
/// cleared on the next `maybe_evict` rather than trimmed LRU-style.
pub const MAX_CACHE_ENTRIES: usize = 100_000;

/// The five indices a taxonomy record can be looked up by.
///
/// The external service is only ever queried through the first four;
/// `LineagePath` lookups are resolved client-side against candidates
/// fetched by scientific name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Facet {
    Id,
    ScientificName,
    Code,
    CommonName,
    LineagePath,
}

#[derive(Default)]
struct FacetMaps {
    by_id: HashMap<String, Taxonomy>,
    by_scientific_name: HashMap<String, Taxonomy>,
    by_code: HashMap<String, Taxonomy>,
    by_common_name: HashMap<String, Taxonomy>,
    by_lineage_path: HashMap<String, Taxonomy>,
}

impl FacetMaps {
    fn map(&self, facet: Facet) -> &HashMap<String, Taxonomy> {
        match facet {
            Facet::Id => &self.by_id,
            Facet::ScientificName => &self.by_scientific_name,
            Facet::Code => &self.by_code,
            Facet::CommonName => &self.by_common_name,
            Facet::LineagePath => &self.by_lineage_path,
        }
    }

    fn map_mut(&mut self, facet: Facet) -> &mut HashMap<String, Taxonomy> {
        match facet {
            Facet::Id => &mut self.by_id,
            Facet::ScientificName => &mut self.by_scientific_name,
            Facet::Code => &mut self.by_code,
            Facet::CommonName => &mut self.by_common_name,
            Facet::LineagePath => &mut self.by_lineage_path,
        }
    }
}

const ALL_FACETS: [Facet; 5] = [
    Facet::Id,
    Facet::ScientificName,
    Facet::Code,
    Facet::CommonName,
    Facet::LineagePath,
];

/// A bounded cache of canonical taxonomy records, keyed five ways.
pub struct TaxonomyCache {
    maps: Mutex<FacetMaps>,
    capacity: usize,
}

impl TaxonomyCache {
    pub fn new() -> Self {
        Self::with_capacity(MAX_CACHE_ENTRIES)
    }

    /// A cache with a non-default per-facet capacity. Mostly useful to
    /// make the eviction sentinel testable.
    pub fn with_capacity(capacity: usize) -> Self {
        TaxonomyCache {
            maps: Mutex::new(FacetMaps::default()),
            capacity,
        }
    }

    /// Look up `key` in one facet. Returns a deep copy so the caller
    /// may mutate it freely without disturbing the cached record.
    pub fn get(&self, facet: Facet, key: &str) -> Option<Taxonomy> {
        self.maps.lock().map(facet).get(key).cloned()
    }

    /// Insert `taxonomy` into every facet whose corresponding field is
    /// non-empty, so later lookups via any facet succeed.
    pub fn put(&self, taxonomy: &Taxonomy) {
        let mut maps = self.maps.lock();
        if let Some(id) = &taxonomy.identifier {
            if !id.value.is_empty() {
                maps.by_id.insert(id.value.clone(), taxonomy.clone());
            }
        }
        if !taxonomy.scientific_name.is_empty() {
            maps.by_scientific_name
                .insert(taxonomy.scientific_name.clone(), taxonomy.clone());
        }
        if !taxonomy.code.is_empty() {
            maps.by_code.insert(taxonomy.code.clone(), taxonomy.clone());
        }
        if !taxonomy.common_name.is_empty() {
            maps.by_common_name
                .insert(taxonomy.common_name.clone(), taxonomy.clone());
        }
        if !taxonomy.lineage.is_empty() {
            maps.by_lineage_path
                .insert(taxonomy.lineage_path(), taxonomy.clone());
        }
    }

    /// Capacity sentinel, called before a batch of insertions: any
    /// facet at or past capacity is cleared entirely.
    pub fn maybe_evict(&self) {
        let mut maps = self.maps.lock();
        for facet in ALL_FACETS {
            if maps.map(facet).len() >= self.capacity {
                maps.map_mut(facet).clear();
            }
        }
    }

    /// Number of entries currently held in one facet.
    pub fn len(&self, facet: Facet) -> usize {
        self.maps.lock().map(facet).len()
    }

    pub fn is_empty(&self) -> bool {
        let maps = self.maps.lock();
        ALL_FACETS.iter().all(|f| maps.map(*f).is_empty())
    }

    /// Drop everything, all facets at once.
    pub fn clear(&self) {
        let mut maps = self.maps.lock();
        for facet in ALL_FACETS {
            maps.map_mut(facet).clear();
        }
    }
}

impl Default for TaxonomyCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::taxonomy::test::record;

    #[test]
    fn test_put_cross_populates_all_nonempty_facets() {
        let cache = TaxonomyCache::new();
        let tax = record(
            Some(("7227", "ncbi")),
            "Drosophila melanogaster",
            "DROME",
            "fruit fly",
            &["Eukaryota", "Metazoa", "Drosophila melanogaster"],
        );
        cache.put(&tax);

        assert_eq!(cache.get(Facet::Id, "7227"), Some(tax.clone()));
        assert_eq!(
            cache.get(Facet::ScientificName, "Drosophila melanogaster"),
            Some(tax.clone())
        );
        assert_eq!(cache.get(Facet::Code, "DROME"), Some(tax.clone()));
        assert_eq!(cache.get(Facet::CommonName, "fruit fly"), Some(tax.clone()));
        assert_eq!(
            cache.get(
                Facet::LineagePath,
                "Eukaryota>Metazoa>Drosophila melanogaster"
            ),
            Some(tax)
        );
    }

    #[test]
    fn test_empty_facets_not_populated() {
        let cache = TaxonomyCache::new();
        let tax = record(None, "Drosophila", "", "", &[]);
        cache.put(&tax);

        assert_eq!(cache.len(Facet::ScientificName), 1);
        assert_eq!(cache.len(Facet::Id), 0);
        assert_eq!(cache.len(Facet::Code), 0);
        assert_eq!(cache.len(Facet::CommonName), 0);
        assert_eq!(cache.len(Facet::LineagePath), 0);
    }

    #[test]
    fn test_get_returns_independent_copy() {
        let cache = TaxonomyCache::new();
        cache.put(&record(None, "Drosophila", "", "", &[]));

        let mut copy = cache.get(Facet::ScientificName, "Drosophila").unwrap();
        copy.code = "DRSPH".to_string();

        let again = cache.get(Facet::ScientificName, "Drosophila").unwrap();
        assert!(again.code.is_empty());
    }

    #[test]
    fn test_capacity_sentinel_clears_only_full_facets() {
        let cache = TaxonomyCache::with_capacity(8);
        for i in 0..8 {
            cache.put(&record(None, &format!("sp{}", i), "", "", &[]));
        }
        // one record also lands in the code facet, well under capacity
        cache.put(&record(None, "sp0", "SP0", "", &[]));
        assert_eq!(cache.len(Facet::ScientificName), 8);

        cache.maybe_evict();
        assert_eq!(cache.len(Facet::ScientificName), 0);
        assert_eq!(cache.len(Facet::Code), 1);
    }

    #[test]
    fn test_concurrent_puts() {
        use std::sync::Arc;
        use std::thread;

        let cache = Arc::new(TaxonomyCache::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    cache.put(&record(None, &format!("sp{}", i), "", "", &[]));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(Facet::ScientificName), 8);
    }
}
