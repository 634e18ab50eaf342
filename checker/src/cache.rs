//! Response cache in front of the check handler.
//!
//! Full caches evict the most recently used entry. The set of targets is
//! small and fixed, so with enough capacity MRU and LRU never differ; when
//! capacity is short, MRU keeps `capacity - 1` targets cached for good while
//! LRU would miss on every request.

use crate::handler::Endpoint;
use crate::metrics_defs::{CACHE_EVICTION, CACHE_HIT, CACHE_MISS};
use async_trait::async_trait;
use hyper::body::Bytes;
use hyper::{HeaderMap, Request, Response, StatusCode};
use parking_lot::Mutex;
use shared::counter;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    seq: u64,
}

/// Fixed-capacity map with most-recently-used eviction and a TTL measured
/// from insertion. Expiry is checked lazily on lookup.
pub struct MruCache<K, V> {
    capacity: usize,
    ttl: Duration,
    entries: HashMap<K, Entry<V>>,
    // Recency index: the largest sequence number is the most recently used.
    recency: BTreeMap<u64, K>,
    next_seq: u64,
}

impl<K, V> MruCache<K, V>
where
    K: Hash + Eq + Clone,
{
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the live entry for `key` and marks it most recently used.
    pub fn get(&mut self, key: &K, now: Instant) -> Option<&V> {
        let expired = {
            let entry = self.entries.get(key)?;
            now.saturating_duration_since(entry.inserted_at) >= self.ttl
        };
        if expired {
            self.remove(key);
            return None;
        }

        let seq = self.bump();
        let entry = self.entries.get_mut(key)?;
        self.recency.remove(&entry.seq);
        self.recency.insert(seq, key.clone());
        entry.seq = seq;
        Some(&entry.value)
    }

    /// Stores `value`, returning the key evicted to make room, if any.
    ///
    /// Replacing an existing key never evicts and restarts its TTL.
    pub fn insert(&mut self, key: K, value: V, now: Instant) -> Option<K> {
        let mut evicted = None;

        if let Some(old) = self.entries.remove(&key) {
            self.recency.remove(&old.seq);
        } else if self.entries.len() >= self.capacity
            && let Some((_, mru)) = self.recency.pop_last()
        {
            self.entries.remove(&mru);
            evicted = Some(mru);
        }

        let seq = self.bump();
        self.recency.insert(seq, key.clone());
        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at: now,
                seq,
            },
        );
        evicted
    }

    fn remove(&mut self, key: &K) {
        if let Some(entry) = self.entries.remove(key) {
            self.recency.remove(&entry.seq);
        }
    }

    fn bump(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

#[derive(Clone)]
struct CachedResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl CachedResponse {
    fn from_response(response: &Response<Bytes>) -> Self {
        Self {
            status: response.status(),
            headers: response.headers().clone(),
            body: response.body().clone(),
        }
    }

    fn to_response(&self) -> Response<Bytes> {
        let mut response = Response::new(self.body.clone());
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();
        response
    }
}

/// Serves repeated requests from an `MruCache` instead of calling `inner`.
///
/// Only non-error responses are stored. The lock is released while `inner`
/// runs, so concurrent misses on one key may both evaluate; the last insert
/// wins.
pub struct CachedEndpoint<E> {
    inner: E,
    cache: Mutex<MruCache<String, CachedResponse>>,
}

impl<E: Endpoint> CachedEndpoint<E> {
    pub fn new(inner: E, capacity: usize, ttl: Duration) -> Self {
        Self {
            inner,
            cache: Mutex::new(MruCache::new(capacity, ttl)),
        }
    }
}

fn cache_key<B>(request: &Request<B>) -> String {
    let target = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| request.uri().path());
    format!("{} {}", request.method(), target)
}

#[async_trait]
impl<E: Endpoint> Endpoint for CachedEndpoint<E> {
    async fn handle(&self, request: Request<Bytes>) -> Response<Bytes> {
        let key = cache_key(&request);

        let cached = self.cache.lock().get(&key, Instant::now()).cloned();
        if let Some(cached) = cached {
            tracing::debug!(key = %key, "Serving cached response");
            counter!(CACHE_HIT).increment(1);
            return cached.to_response();
        }
        counter!(CACHE_MISS).increment(1);

        let response = self.inner.handle(request).await;
        if response.status().as_u16() < 400 {
            let evicted = self.cache.lock().insert(
                key,
                CachedResponse::from_response(&response),
                Instant::now(),
            );
            if let Some(evicted) = evicted {
                tracing::debug!(evicted = %evicted, "Evicted cached response");
                counter!(CACHE_EVICTION).increment(1);
            }
        }
        response
    }
}
