use std::{
    collections::HashMap,
    future::Future,
    io::Write,
    path::PathBuf,
    pin::Pin,
    sync::Arc,
    time::{Duration, Instant},
};

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::warn;

use crate::{
    api::ApiPort,
    domain::{
        normalize, DelegateRoster, MemberRoster, Nation, NationInfo, ProposalList, RegionInfo,
        TagRoster,
    },
    Result,
};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Per-cache factory: builds the entity for a (normalized) key, usually by
/// calling the external API. Factory errors propagate to the caller.
pub type Factory<T> = Arc<dyn Fn(String) -> BoxFuture<Result<T>> + Send + Sync>;

/// Post-lookup side effect, invoked once per lookup call when configured.
pub type Finalizer<T> = Arc<dyn Fn(&str, &Arc<T>) + Send + Sync>;

struct Entry<T> {
    value: Arc<T>,
    stamp: Instant,
}

/// Time-stamped object cache keyed by a normalized name.
///
/// An entry is trusted while younger than the requested max age (itself
/// capped by the cache-wide maximum); a stale or missing entry is recreated
/// through the factory before being returned. Lookups never return a stale
/// value and never return "nothing": creation failures are the factory's own
/// errors. Concurrent lookups racing on the same missing key may both invoke
/// the factory; the later insert simply overwrites.
pub struct TimedCache<T> {
    name: &'static str,
    max_age: Duration,
    entries: RwLock<HashMap<String, Entry<T>>>,
    factory: Factory<T>,
    finalizer: Option<Finalizer<T>>,
    sole_key: Option<&'static str>,
}

impl<T: Send + Sync + 'static> TimedCache<T> {
    pub fn new(name: &'static str, max_age: Duration, factory: Factory<T>) -> Self {
        Self {
            name,
            max_age,
            entries: RwLock::new(HashMap::new()),
            factory,
            finalizer: None,
            sole_key: None,
        }
    }

    pub fn with_finalizer(mut self, finalizer: Finalizer<T>) -> Self {
        self.finalizer = Some(finalizer);
        self
    }

    /// Restrict this cache to a single sentinel key. Singleton resources
    /// (the current delegate roster, the WA member roster) use this so a
    /// caller passing an arbitrary key fails loudly instead of silently
    /// growing an unbounded map.
    pub fn keyed_only(mut self, key: &'static str) -> Self {
        self.sole_key = Some(key);
        self
    }

    pub async fn lookup(&self, key: &str) -> Result<Arc<T>> {
        self.lookup_within(key, self.max_age).await
    }

    pub async fn lookup_within(&self, key: &str, max_age: Duration) -> Result<Arc<T>> {
        let key = normalize(key);
        if let Some(sole) = self.sole_key {
            if key != sole {
                panic!(
                    "cache {:?} serves only the key {sole:?}, got {key:?}",
                    self.name
                );
            }
        }
        let max_age = max_age.min(self.max_age);

        let hit = {
            let entries = self.entries.read().await;
            entries
                .get(&key)
                .filter(|e| e.stamp.elapsed() < max_age)
                .map(|e| Arc::clone(&e.value))
        };
        if let Some(value) = hit {
            if let Some(finalize) = &self.finalizer {
                finalize(&key, &value);
            }
            return Ok(value);
        }

        // Factory runs outside the lock: it may block on the network and
        // other keys must stay serviceable meanwhile.
        let value = Arc::new((self.factory)(key.clone()).await?);
        {
            let mut entries = self.entries.write().await;
            entries.insert(
                key.clone(),
                Entry {
                    value: Arc::clone(&value),
                    stamp: Instant::now(),
                },
            );
        }
        if let Some(finalize) = &self.finalizer {
            finalize(&key, &value);
        }
        Ok(value)
    }

    /// Drop all entries older than `age`.
    pub async fn purge(&self, age: Duration) {
        let mut entries = self.entries.write().await;
        entries.retain(|_, e| e.stamp.elapsed() < age);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

// === Per-kind cache bundle ===

pub const DELEGATE_KEY: &str = "delegates";
pub const MEMBER_KEY: &str = "wa_members";
pub const PROPOSAL_KEY: &str = "proposals";

/// Freshness thresholds per entity kind.
#[derive(Clone, Copy, Debug)]
pub struct CacheAges {
    pub nation: Duration,
    pub region: Duration,
    pub roster: Duration,
}

impl Default for CacheAges {
    fn default() -> Self {
        Self {
            nation: Duration::from_secs(10 * 60),
            region: Duration::from_secs(10 * 60),
            roster: Duration::from_secs(60 * 60),
        }
    }
}

/// One cache per entity kind, every factory bound to the shared API port.
pub struct WorldCache {
    pub nations: TimedCache<NationInfo>,
    pub regions: TimedCache<RegionInfo>,
    pub delegates: TimedCache<DelegateRoster>,
    pub members: TimedCache<MemberRoster>,
    pub proposals: TimedCache<ProposalList>,
    pub tags: TimedCache<TagRoster>,
}

impl WorldCache {
    pub fn new(api: Arc<dyn ApiPort>, ages: CacheAges) -> Arc<Self> {
        let nations = {
            let api = Arc::clone(&api);
            TimedCache::new(
                "nations",
                ages.nation,
                Arc::new(move |key: String| -> BoxFuture<Result<NationInfo>> {
                    let api = Arc::clone(&api);
                    Box::pin(async move { api.nation(&Nation::new(&key)).await })
                }),
            )
        };
        let regions = {
            let api = Arc::clone(&api);
            TimedCache::new(
                "regions",
                ages.region,
                Arc::new(move |key: String| -> BoxFuture<Result<RegionInfo>> {
                    let api = Arc::clone(&api);
                    Box::pin(async move { api.region(&key).await })
                }),
            )
        };
        let delegates = {
            let api = Arc::clone(&api);
            TimedCache::new(
                "delegates",
                ages.roster,
                Arc::new(move |_key: String| -> BoxFuture<Result<DelegateRoster>> {
                    let api = Arc::clone(&api);
                    Box::pin(async move { api.delegates().await })
                }),
            )
            .keyed_only(DELEGATE_KEY)
        };
        let members = {
            let api = Arc::clone(&api);
            TimedCache::new(
                "wa_members",
                ages.roster,
                Arc::new(move |_key: String| -> BoxFuture<Result<MemberRoster>> {
                    let api = Arc::clone(&api);
                    Box::pin(async move { api.wa_members().await })
                }),
            )
            .keyed_only(MEMBER_KEY)
        };
        let proposals = {
            let api = Arc::clone(&api);
            TimedCache::new(
                "proposals",
                ages.roster,
                Arc::new(move |_key: String| -> BoxFuture<Result<ProposalList>> {
                    let api = Arc::clone(&api);
                    Box::pin(async move { api.proposals().await })
                }),
            )
            .keyed_only(PROPOSAL_KEY)
        };
        let tags = {
            let api = Arc::clone(&api);
            TimedCache::new(
                "tags",
                ages.roster,
                Arc::new(move |key: String| -> BoxFuture<Result<TagRoster>> {
                    let api = Arc::clone(&api);
                    Box::pin(async move { api.regions_with_tag(&key).await })
                }),
            )
        };

        Arc::new(Self {
            nations,
            regions,
            delegates,
            members,
            proposals,
            tags,
        })
    }

    pub async fn delegate_roster(&self) -> Result<Arc<DelegateRoster>> {
        self.delegates.lookup(DELEGATE_KEY).await
    }

    pub async fn member_roster(&self) -> Result<Arc<MemberRoster>> {
        self.members.lookup(MEMBER_KEY).await
    }

    pub async fn proposal_list(&self) -> Result<Arc<ProposalList>> {
        self.proposals.lookup(PROPOSAL_KEY).await
    }

    /// Drop entries older than `age` from every cache.
    pub async fn sweep(&self, age: Duration) {
        self.nations.purge(age).await;
        self.regions.purge(age).await;
        self.delegates.purge(age).await;
        self.members.purge(age).await;
        self.proposals.purge(age).await;
        self.tags.purge(age).await;
    }
}

// === Disk persistence hook ===

#[derive(Serialize)]
struct PersistedLookup<'a, T> {
    at: String,
    key: &'a str,
    value: &'a T,
}

/// Finalizer that appends each looked-up entity as a JSON line. Persistence
/// is best-effort: failures are logged, never propagated into the lookup.
pub fn json_finalizer<T>(path: PathBuf) -> Finalizer<T>
where
    T: Serialize + Send + Sync + 'static,
{
    Arc::new(move |key: &str, value: &Arc<T>| {
        let record = PersistedLookup {
            at: chrono::Utc::now().to_rfc3339(),
            key,
            value: value.as_ref(),
        };
        let line = match serde_json::to_string(&record) {
            Ok(v) => v,
            Err(e) => {
                warn!("cache persistence: failed to encode {key}: {e}");
                return;
            }
        };
        let opened = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path);
        match opened {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{line}") {
                    warn!("cache persistence: failed to write {key}: {e}");
                }
            }
            Err(e) => warn!("cache persistence: cannot open {}: {e}", path.display()),
        }
    })
}
