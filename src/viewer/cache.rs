//! Tiered page cache with a distinct-page budget

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use log::debug;
use lru::LruCache;

use super::tier::Tier;
use super::types::ImagePayload;

/// Default number of distinct pages allowed to hold cache entries
pub const DEFAULT_PAGE_BUDGET: usize = 8;

/// One rasterized tier of one page. Immutable once inserted.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    /// 1-based page number
    pub page: u32,
    pub tier: Tier,
    pub image: Arc<ImagePayload>,
    pub inserted_at: Instant,
}

/// In-memory store keyed by `(page, tier)`.
///
/// Pages are kept in least-recently-touched order. Once more than `budget`
/// distinct pages hold entries, whole pages are evicted oldest-touched
/// first. The pinned (currently displayed) page is never evicted, so the
/// budget is soft for it.
pub struct TieredPageCache {
    pages: LruCache<u32, BTreeMap<Tier, CacheEntry>>,
    budget: usize,
    pinned: Option<u32>,
}

impl TieredPageCache {
    /// Create a cache allowing `budget` distinct pages
    #[must_use]
    pub fn new(budget: usize) -> Self {
        Self {
            pages: LruCache::unbounded(),
            budget: budget.max(1),
            pinned: None,
        }
    }

    /// Highest tier cached for `page`, promoting the page in touch order
    pub fn get(&mut self, page: u32) -> Option<&CacheEntry> {
        self.pages
            .get(&page)
            .and_then(|tiers| tiers.last_key_value())
            .map(|(_, entry)| entry)
    }

    /// Highest tier cached for `page` without touching it
    #[must_use]
    pub fn peek(&self, page: u32) -> Option<&CacheEntry> {
        self.pages
            .peek(&page)
            .and_then(|tiers| tiers.last_key_value())
            .map(|(_, entry)| entry)
    }

    #[must_use]
    pub fn best_tier(&self, page: u32) -> Option<Tier> {
        self.peek(page).map(|entry| entry.tier)
    }

    #[must_use]
    pub fn has(&self, page: u32, tier: Tier) -> bool {
        self.pages
            .peek(&page)
            .is_some_and(|tiers| tiers.contains_key(&tier))
    }

    /// Tiers cached for `page`, lowest first
    #[must_use]
    pub fn tiers(&self, page: u32) -> Vec<Tier> {
        self.pages
            .peek(&page)
            .map(|tiers| tiers.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Insert or replace an entry, returning pages evicted to stay in budget
    pub fn put(&mut self, page: u32, tier: Tier, image: ImagePayload) -> Vec<u32> {
        let entry = CacheEntry {
            page,
            tier,
            image: Arc::new(image),
            inserted_at: Instant::now(),
        };

        if let Some(tiers) = self.pages.get_mut(&page) {
            tiers.insert(tier, entry);
            return Vec::new();
        }

        self.pages.put(page, BTreeMap::from([(tier, entry)]));
        self.enforce_budget()
    }

    /// Remove one tier of a page
    pub fn drop_tier(&mut self, page: u32, tier: Tier) -> bool {
        let Some(tiers) = self.pages.peek_mut(&page) else {
            return false;
        };
        let removed = tiers.remove(&tier).is_some();
        let now_empty = tiers.is_empty();
        if now_empty {
            self.pages.pop(&page);
        }
        removed
    }

    /// Remove every tier of `page` strictly below `kept`
    pub fn drop_below(&mut self, page: u32, kept: Tier) -> usize {
        let Some(tiers) = self.pages.peek_mut(&page) else {
            return 0;
        };
        let before = tiers.len();
        tiers.retain(|tier, _| *tier >= kept);
        let dropped = before - tiers.len();
        let now_empty = tiers.is_empty();
        if now_empty {
            self.pages.pop(&page);
        }
        dropped
    }

    /// Remove all tiers of a page
    pub fn purge(&mut self, page: u32) -> bool {
        self.pages.pop(&page).is_some()
    }

    /// Mark the page currently on screen; it is exempt from eviction
    pub fn pin(&mut self, page: u32) {
        self.pinned = Some(page);
    }

    #[must_use]
    pub fn pinned(&self) -> Option<u32> {
        self.pinned
    }

    /// Number of distinct pages with at least one entry
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Total number of entries across all pages
    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.iter().map(|(_, tiers)| tiers.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    #[must_use]
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Cached pages, most recently touched first
    #[must_use]
    pub fn pages(&self) -> Vec<u32> {
        self.pages.iter().map(|(page, _)| *page).collect()
    }

    fn enforce_budget(&mut self) -> Vec<u32> {
        let mut evicted = Vec::new();
        while self.pages.len() > self.budget {
            let victim = self
                .pages
                .iter()
                .rev()
                .map(|(page, _)| *page)
                .find(|page| Some(*page) != self.pinned);
            let Some(victim) = victim else {
                break;
            };
            self.pages.pop(&victim);
            debug!("Evicted page {victim} from cache (budget {})", self.budget);
            evicted.push(victim);
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(seed: u8) -> ImagePayload {
        ImagePayload {
            pixels: vec![seed; 12],
            width_px: 2,
            height_px: 2,
        }
    }

    #[test]
    fn get_returns_highest_tier() {
        let mut cache = TieredPageCache::new(8);
        cache.put(1, Tier::Preview, image(1));
        cache.put(1, Tier::Final, image(3));
        cache.put(1, Tier::Medium, image(2));

        let entry = cache.get(1).unwrap();
        assert_eq!(entry.tier, Tier::Final);
        assert_eq!(entry.page, 1);
        assert_eq!(entry.image.pixels[0], 3);
        assert_eq!(cache.tiers(1), vec![Tier::Preview, Tier::Medium, Tier::Final]);
        assert!(cache.get(2).is_none());
    }

    #[test]
    fn put_replaces_same_tier() {
        let mut cache = TieredPageCache::new(8);
        cache.put(4, Tier::Medium, image(1));
        cache.put(4, Tier::Medium, image(9));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.peek(4).unwrap().image.pixels[0], 9);
    }

    #[test]
    fn has_checks_exact_tier() {
        let mut cache = TieredPageCache::new(8);
        cache.put(2, Tier::Medium, image(0));

        assert!(cache.has(2, Tier::Medium));
        assert!(!cache.has(2, Tier::Preview));
        assert!(!cache.has(3, Tier::Medium));
    }

    #[test]
    fn drop_tier_and_drop_below() {
        let mut cache = TieredPageCache::new(8);
        for tier in [Tier::Preview, Tier::Medium, Tier::Final] {
            cache.put(1, tier, image(0));
        }

        assert!(cache.drop_tier(1, Tier::Medium));
        assert!(!cache.drop_tier(1, Tier::Medium));
        assert_eq!(cache.drop_below(1, Tier::Final), 1);
        assert_eq!(cache.tiers(1), vec![Tier::Final]);

        assert!(cache.drop_tier(1, Tier::Final));
        assert_eq!(cache.page_count(), 0);
    }

    #[test]
    fn purge_removes_every_tier() {
        let mut cache = TieredPageCache::new(8);
        cache.put(5, Tier::Preview, image(0));
        cache.put(5, Tier::Medium, image(0));
        cache.put(6, Tier::Preview, image(0));

        assert!(cache.purge(5));
        assert!(!cache.purge(5));
        assert!(cache.peek(5).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn evicts_least_recently_touched_page() {
        let mut cache = TieredPageCache::new(2);
        cache.put(1, Tier::Preview, image(0));
        cache.put(2, Tier::Preview, image(0));

        // Touch page 1 so page 2 becomes the oldest
        assert!(cache.get(1).is_some());

        let evicted = cache.put(3, Tier::Preview, image(0));
        assert_eq!(evicted, vec![2]);
        assert_eq!(cache.pages(), vec![3, 1]);
    }

    #[test]
    fn peek_does_not_touch() {
        let mut cache = TieredPageCache::new(2);
        cache.put(1, Tier::Preview, image(0));
        cache.put(2, Tier::Preview, image(0));

        assert!(cache.peek(1).is_some());
        assert!(cache.has(1, Tier::Preview));

        let evicted = cache.put(3, Tier::Preview, image(0));
        assert_eq!(evicted, vec![1]);
    }

    #[test]
    fn pinned_page_survives_eviction() {
        let mut cache = TieredPageCache::new(2);
        cache.put(1, Tier::Preview, image(0));
        cache.pin(1);
        cache.put(2, Tier::Preview, image(0));

        let evicted = cache.put(3, Tier::Preview, image(0));
        assert_eq!(evicted, vec![2]);
        assert!(cache.peek(1).is_some());
        assert!(cache.page_count() <= cache.budget());
    }

    #[test]
    fn adding_tiers_to_a_cached_page_never_evicts() {
        let mut cache = TieredPageCache::new(1);
        cache.put(1, Tier::Preview, image(0));

        let evicted = cache.put(1, Tier::Medium, image(0));
        assert!(evicted.is_empty());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn zero_budget_is_clamped_to_one() {
        let cache = TieredPageCache::new(0);
        assert_eq!(cache.budget(), 1);
    }
}
