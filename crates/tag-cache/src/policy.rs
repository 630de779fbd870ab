//! Per-lookup cache options and lifetime profiles.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How long a committed entry stays fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expiry {
    /// Use the engine's configured default TTL (never expires if unset).
    #[default]
    Default,
    /// Expire after the given duration.
    After(Duration),
    /// Never expire; only invalidation removes the entry.
    Never,
}

impl Expiry {
    /// Resolve to a concrete TTL given the engine default. `None` means infinite.
    pub fn resolve(self, default_ttl: Option<Duration>) -> Option<Duration> {
        match self {
            Self::Default => default_ttl,
            Self::After(ttl) => Some(ttl),
            Self::Never => None,
        }
    }
}

/// Named lifetime profiles.
///
/// Each profile maps to its revalidation period: the entry is recomputed on
/// the first lookup after that period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheLife {
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
    Max,
}

impl CacheLife {
    /// Revalidation period for this profile.
    pub fn revalidate(&self) -> Duration {
        const MINUTE: u64 = 60;
        const HOUR: u64 = 60 * MINUTE;
        const DAY: u64 = 24 * HOUR;

        match self {
            Self::Seconds => Duration::from_secs(1),
            Self::Minutes => Duration::from_secs(MINUTE),
            Self::Hours => Duration::from_secs(HOUR),
            Self::Days => Duration::from_secs(DAY),
            Self::Weeks => Duration::from_secs(7 * DAY),
            Self::Max => Duration::from_secs(30 * DAY),
        }
    }
}

impl From<CacheLife> for Expiry {
    fn from(life: CacheLife) -> Self {
        Expiry::After(life.revalidate())
    }
}

impl std::fmt::Display for CacheLife {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Seconds => write!(f, "seconds"),
            Self::Minutes => write!(f, "minutes"),
            Self::Hours => write!(f, "hours"),
            Self::Days => write!(f, "days"),
            Self::Weeks => write!(f, "weeks"),
            Self::Max => write!(f, "max"),
        }
    }
}

/// Options for a single cache lookup.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use tag_cache::{CacheLife, CacheOptions};
///
/// let list = CacheOptions::new().tag("products").life(CacheLife::Minutes);
/// let item = CacheOptions::new()
///     .tags(["products", "product-5"])
///     .ttl(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheOptions {
    /// Tags attached to the committed entry.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Entry lifetime.
    #[serde(default)]
    pub expiry: Expiry,
}

impl CacheOptions {
    /// Options with no tags and the engine's default TTL.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a cache tag.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Add several cache tags.
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Expire after `ttl`.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.expiry = Expiry::After(ttl);
        self
    }

    /// Use a named lifetime profile.
    pub fn life(mut self, life: CacheLife) -> Self {
        self.expiry = life.into();
        self
    }

    /// Never expire.
    pub fn forever(mut self) -> Self {
        self.expiry = Expiry::Never;
        self
    }
}
