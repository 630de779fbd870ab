//! Cache key composition and tag normalization.

use std::collections::BTreeSet;
use std::fmt;

use tracing::warn;

/// Longest tag accepted, in bytes. Longer tags are dropped.
pub const MAX_TAG_LENGTH: usize = 256;

/// Most tags kept on a single entry. Excess tags are dropped.
pub const MAX_TAGS_PER_ENTRY: usize = 128;

/// Build a namespaced cache key: `prefix:part:part...`.
///
/// `:` and `%` inside parts are percent-escaped, so a part can never be
/// mistaken for two. The prefix is used as given and must not be empty.
///
/// # Example
///
/// ```rust
/// use tag_cache::cache_key;
///
/// let id = 5;
/// assert_eq!(cache_key!("product", id), "product:5");
/// assert_eq!(cache_key!("price", "eu", id), "price:eu:5");
/// assert_eq!(cache_key!("page", "/a:b"), "page:/a%3Ab");
/// ```
#[macro_export]
macro_rules! cache_key {
    ($prefix:expr $(, $part:expr)* $(,)?) => {
        $crate::__compose_key($prefix, &[$(&$part as &dyn ::std::fmt::Display),*])
    };
}

#[doc(hidden)]
pub fn compose_key(prefix: impl AsRef<str>, parts: &[&dyn fmt::Display]) -> String {
    let prefix = prefix.as_ref();
    assert!(!prefix.is_empty(), "cache key prefix must not be empty");

    let mut key = String::from(prefix);
    for part in parts {
        key.push(':');
        for ch in part.to_string().chars() {
            match ch {
                ':' => key.push_str("%3A"),
                '%' => key.push_str("%25"),
                _ => key.push(ch),
            }
        }
    }
    key
}

/// Reduce caller-supplied tags to the set stored on an entry.
///
/// Empty tags are ignored, over-long tags are dropped, duplicates collapse,
/// and only the first [`MAX_TAGS_PER_ENTRY`] distinct tags are kept.
pub(crate) fn normalize_tags<S: AsRef<str>>(key: &str, tags: &[S]) -> BTreeSet<String> {
    let mut kept = BTreeSet::new();

    for tag in tags {
        let tag = tag.as_ref();
        if tag.is_empty() {
            continue;
        }
        if tag.len() > MAX_TAG_LENGTH {
            warn!(key, len = tag.len(), max = MAX_TAG_LENGTH, "dropping over-long cache tag");
            continue;
        }
        if kept.contains(tag) {
            continue;
        }
        if kept.len() == MAX_TAGS_PER_ENTRY {
            warn!(key, max = MAX_TAGS_PER_ENTRY, "too many cache tags, dropping the rest");
            break;
        }
        kept.insert(tag.to_string());
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_macro() {
        let user = "user123";
        assert_eq!(cache_key!("cart", user), "cart:user123");
        assert_eq!(cache_key!("product", 5, "price"), "product:5:price");
        assert_eq!(cache_key!("products"), "products");
        assert_eq!(cache_key!(String::from("orders"), format!("o-{}", 7)), "orders:o-7");
    }

    #[test]
    fn test_cache_key_parts_cannot_collide() {
        assert_ne!(cache_key!("a", "b:c"), cache_key!("a", "b", "c"));
        assert_eq!(cache_key!("page", "/shop:sale"), "page:/shop%3Asale");
        assert_eq!(cache_key!("page", "100%3A"), "page:100%253A");
    }

    #[test]
    #[should_panic(expected = "prefix must not be empty")]
    fn test_cache_key_rejects_empty_prefix() {
        let _ = cache_key!("", 1);
    }

    #[test]
    fn test_normalize_dedups_and_skips_empty() {
        let tags = normalize_tags("k", &["products", "", "product-5", "products"]);
        let tags: Vec<_> = tags.into_iter().collect();
        assert_eq!(tags, vec!["product-5".to_string(), "products".to_string()]);
    }

    #[test]
    fn test_normalize_drops_long_tags() {
        let long = "x".repeat(MAX_TAG_LENGTH + 1);
        let exact = "y".repeat(MAX_TAG_LENGTH);
        let tags = normalize_tags("k", &[long.as_str(), exact.as_str()]);

        assert_eq!(tags.len(), 1);
        assert!(tags.contains(&exact));
    }

    #[test]
    fn test_normalize_caps_tag_count() {
        let many: Vec<String> = (0..MAX_TAGS_PER_ENTRY + 10)
            .map(|i| format!("t{i}"))
            .collect();
        let tags = normalize_tags("k", &many);

        assert_eq!(tags.len(), MAX_TAGS_PER_ENTRY);
        assert!(tags.contains("t0"));
        assert!(!tags.contains(&format!("t{}", MAX_TAGS_PER_ENTRY)));
    }
}
