//! Tag and key revalidation against a small product catalog.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tag_cache::{cache_key, CacheConfig, CacheOptions, CacheStatus, TagCache};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Page {
    List(Vec<u32>),
    Product { id: u32, views: u64 },
}

/// Backing store that counts how often each key is computed.
#[derive(Default)]
struct Catalog {
    views: AtomicU64,
    computed: Mutex<HashMap<String, usize>>,
}

impl Catalog {
    fn record(&self, key: &str) {
        let mut computed = self.computed.lock().unwrap();
        *computed.entry(key.to_string()).or_default() += 1;
    }

    fn computed(&self, key: &str) -> usize {
        self.computed.lock().unwrap().get(key).copied().unwrap_or(0)
    }
}

async fn product_list(cache: &TagCache<Page>, catalog: &Arc<Catalog>) -> Page {
    let catalog = Arc::clone(catalog);
    cache
        .get(
            "products:list",
            move || async move {
                catalog.record("products:list");
                Ok(Page::List((1..=9).collect()))
            },
            CacheOptions::new().tag("products"),
        )
        .await
        .unwrap()
}

async fn product(cache: &TagCache<Page>, catalog: &Arc<Catalog>, id: u32) -> Page {
    let key = cache_key!("product", id);
    let catalog = Arc::clone(catalog);
    let record_key = key.clone();
    cache
        .get(
            &key,
            move || async move {
                catalog.record(&record_key);
                let views = catalog.views.load(Ordering::SeqCst);
                Ok(Page::Product { id, views })
            },
            CacheOptions::new().tag(format!("product-{id}")),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_item_and_list_invalidate_independently() {
    let cache = TagCache::default();
    let catalog = Arc::new(Catalog::default());

    product_list(&cache, &catalog).await;
    for id in 1..=9 {
        product(&cache, &catalog, id).await;
    }

    assert_eq!(cache.invalidate_tag("product-5"), 1);

    product_list(&cache, &catalog).await;
    for id in 1..=9 {
        product(&cache, &catalog, id).await;
    }
    assert_eq!(catalog.computed("product:5"), 2);
    assert_eq!(catalog.computed("product:4"), 1);
    assert_eq!(catalog.computed("products:list"), 1);

    assert_eq!(cache.invalidate_tag("products"), 1);

    assert_eq!(product_list(&cache, &catalog).await, Page::List((1..=9).collect()));
    for id in 1..=9 {
        product(&cache, &catalog, id).await;
    }
    assert_eq!(catalog.computed("products:list"), 2);
    assert_eq!(catalog.computed("product:5"), 2);
    for id in [1, 2, 3, 4, 6, 7, 8, 9] {
        assert_eq!(catalog.computed(&cache_key!("product", id)), 1);
    }
}

#[tokio::test]
async fn test_mutation_visible_only_after_revalidation() {
    let cache = TagCache::default();
    let catalog = Arc::new(Catalog::default());
    catalog.views.store(1234, Ordering::SeqCst);

    assert_eq!(
        product(&cache, &catalog, 7).await,
        Page::Product { id: 7, views: 1234 }
    );

    // A write without revalidation keeps serving the cached page.
    catalog.views.fetch_add(1, Ordering::SeqCst);
    assert_eq!(
        product(&cache, &catalog, 7).await,
        Page::Product { id: 7, views: 1234 }
    );

    cache.invalidate_tag("product-7");
    assert_eq!(
        product(&cache, &catalog, 7).await,
        Page::Product { id: 7, views: 1235 }
    );

    // Key-scoped revalidation behaves the same way.
    catalog.views.fetch_add(10, Ordering::SeqCst);
    assert!(cache.invalidate_key("product:7"));
    assert_eq!(
        product(&cache, &catalog, 7).await,
        Page::Product { id: 7, views: 1245 }
    );
}

#[tokio::test]
async fn test_duplicate_webhooks_are_harmless() {
    let cache = TagCache::default();
    let catalog = Arc::new(Catalog::default());
    product(&cache, &catalog, 3).await;

    let first = cache.clone();
    let second = cache.clone();
    let (a, b) = tokio::join!(
        async move { first.invalidate_tag("product-3") },
        async move { second.invalidate_tag("product-3") },
    );

    assert_eq!(a + b, 1);
    assert_eq!(cache.invalidate_tag("product-3"), 0);
    assert_eq!(cache.invalidate_tags(&["product-404", "missing"]), 0);
    assert!(!cache.invalidate_key("product:404"));
}

#[tokio::test]
async fn test_shared_tag_across_entries() {
    let cache: TagCache<u32> = TagCache::default();

    for (key, tags) in [
        ("price:eu:5", vec!["product-price-5", "product-5"]),
        ("price:us:5", vec!["product-price-5", "product-5"]),
        ("reviews:5", vec!["product-5"]),
    ] {
        cache
            .get(key, || async { Ok(1) }, CacheOptions::new().tags(tags))
            .await
            .unwrap();
    }

    assert_eq!(cache.keys_for_tag("product-5").len(), 3);
    assert_eq!(cache.invalidate_tag("product-price-5"), 2);
    assert_eq!(cache.keys_for_tag("product-5"), vec!["reviews:5"]);

    let lookup = cache
        .get_with_status("reviews:5", || async { Ok(2) }, CacheOptions::new())
        .await
        .unwrap();
    assert_eq!(lookup.status, CacheStatus::Hit);
    assert_eq!(lookup.value, 1);
}

#[tokio::test(start_paused = true)]
async fn test_ttl_round_trip() {
    let cache: TagCache<&'static str> = TagCache::default();
    let options = CacheOptions::new().ttl(Duration::from_secs(30));

    let first = cache
        .get("k", || async { Ok("first") }, options.clone())
        .await
        .unwrap();
    tokio::time::advance(Duration::from_secs(29)).await;
    let second = cache
        .get("k", || async { Err(anyhow::anyhow!("should not run")) }, options.clone())
        .await
        .unwrap();
    assert_eq!((first, second), ("first", "first"));

    tokio::time::advance(Duration::from_secs(1)).await;
    let third = cache
        .get("k", || async { Ok("second") }, options)
        .await
        .unwrap();
    assert_eq!(third, "second");
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_removes_expired_entries() {
    let cache: TagCache<u32> = TagCache::new(CacheConfig::new().with_sweep_interval_secs(1));
    let options = CacheOptions::new().ttl(Duration::from_secs(2)).tag("t");

    cache
        .get("a", || async { Ok(1) }, options.clone())
        .await
        .unwrap();
    cache
        .get("b", || async { Ok(2) }, CacheOptions::new().tag("t"))
        .await
        .unwrap();
    let sweeper = cache.spawn_configured_sweeper().expect("sweep interval configured");

    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.keys_for_tag("t"), vec!["b"]);
    assert_eq!(cache.stats().expired, 1);

    drop(cache);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(sweeper.is_finished());
}

#[tokio::test]
async fn test_no_configured_sweeper() {
    let cache: TagCache<u32> = TagCache::default();
    assert!(cache.spawn_configured_sweeper().is_none());
}

#[tokio::test]
async fn test_entry_views_are_copies() {
    let cache: TagCache<Vec<u32>> = TagCache::default();
    cache
        .get("list", || async { Ok(vec![1, 2, 3]) }, CacheOptions::new().tag("products"))
        .await
        .unwrap();

    let mut view = cache.peek("list").unwrap();
    view.value.push(4);
    view.tags.clear();

    let fresh = cache.peek("list").unwrap();
    assert_eq!(fresh.value, vec![1, 2, 3]);
    assert_eq!(fresh.tags, vec!["products"]);
    assert_eq!(fresh.expires_at, None);
}
