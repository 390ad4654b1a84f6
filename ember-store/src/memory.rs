//! In-memory store backend.
//!
//! A [`MemoryHub`] plays the role of one store endpoint; it hands out
//! numbered [`MemoryPartition`]s, each an isolated keyspace with TTL support
//! and an expired-key notification stream. Two pool aliases configured with
//! the same endpoint and partition index share one partition; different
//! indexes share nothing.
//!
//! Expiration is driven by a per-partition sweeper task, spawned lazily on
//! the first expiring write. The sweeper sleeps until the earliest deadline,
//! removes due entries, and publishes their keys to a broadcast channel.
//! Deadlines are kept in a min-heap; a heap entry whose recorded deadline no
//! longer matches the entry's current expiry is stale (the key was deleted,
//! overwritten, or its timer reset) and is skipped without firing.
//!
//! Reads treat expired-but-unswept entries as absent; publication is left to
//! the sweeper so each expiry fires at most once.

use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::time::Instant;

use ember_core::StoreError;

use crate::backend::{ExpirySubscription, KeyTtl, RawRecord, StoreBackend, StoreResult};

/// Buffered expired-key notifications per partition. Subscribers that fall
/// further behind than this lose the oldest notifications.
const EXPIRED_CHANNEL_CAPACITY: usize = 1024;

/// Deadline entry for the expiry heap.
///
/// Reverse ordering so `BinaryHeap` acts as a min-heap (earliest first).
#[derive(Debug, Clone, PartialEq, Eq)]
struct DeadlineEntry {
    at: Instant,
    key: String,
}

impl PartialOrd for DeadlineEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DeadlineEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering: earlier deadlines have higher priority
        other.at.cmp(&self.at)
    }
}

struct Entry {
    record: RawRecord,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

fn new_hash_entry() -> Entry {
    Entry {
        record: RawRecord::Hash(BTreeMap::new()),
        expires_at: None,
    }
}

/// Live hash record at `key`, replacing expired or missing records with an
/// empty persistent hash. Wrong-type error for live string records.
fn live_hash<'a>(
    state: &'a mut PartitionState,
    key: &str,
    now: Instant,
) -> StoreResult<&'a mut BTreeMap<String, String>> {
    let entry = state
        .entries
        .entry(key.to_string())
        .or_insert_with(new_hash_entry);
    if entry.is_expired(now) {
        *entry = new_hash_entry();
    }
    match &mut entry.record {
        RawRecord::Hash(map) => Ok(map),
        RawRecord::Text(_) => Err(StoreError::WrongType {
            key: key.to_string(),
            field: String::new(),
            expected: "hash",
        }),
    }
}

struct PartitionState {
    entries: HashMap<String, Entry>,
    deadlines: BinaryHeap<DeadlineEntry>,
    expired_tx: broadcast::Sender<String>,
    sweeper_running: bool,
}

/// One logical partition of the in-memory store.
pub struct MemoryPartition {
    label: String,
    state: Arc<Mutex<PartitionState>>,
    wake: Arc<Notify>,
}

impl MemoryPartition {
    fn new(label: String) -> Arc<Self> {
        let (expired_tx, _) = broadcast::channel(EXPIRED_CHANNEL_CAPACITY);
        Arc::new(Self {
            label,
            state: Arc::new(Mutex::new(PartitionState {
                entries: HashMap::new(),
                deadlines: BinaryHeap::new(),
                expired_tx,
                sweeper_running: false,
            })),
            wake: Arc::new(Notify::new()),
        })
    }

    /// Hub/partition label, for logging.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Number of live (non-expired) records.
    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        let now = Instant::now();
        state.entries.values().filter(|e| !e.is_expired(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Sever every expiry subscription on this partition, forcing listeners
    /// to resubscribe. Exists to exercise reconnect handling; a production
    /// store adapter loses its subscriptions the same way on connection loss.
    pub async fn sever_subscriptions(&self) {
        let mut state = self.state.lock().await;
        let (tx, _) = broadcast::channel(EXPIRED_CHANNEL_CAPACITY);
        state.expired_tx = tx;
        tracing::debug!(partition = %self.label, "expiry subscriptions severed");
    }

    /// Arm a deadline for `key` and make sure the sweeper is running.
    /// Caller holds the state lock.
    fn arm(&self, state: &mut PartitionState, key: &str, at: Instant) {
        state.deadlines.push(DeadlineEntry {
            at,
            key: key.to_string(),
        });
        if !state.sweeper_running {
            state.sweeper_running = true;
            let weak = Arc::downgrade(&self.state);
            let wake = Arc::clone(&self.wake);
            let label = self.label.clone();
            tokio::spawn(sweeper_loop(weak, wake, label));
        }
        self.wake.notify_one();
    }
}

/// Background loop removing due entries and publishing their keys.
async fn sweeper_loop(state: Weak<Mutex<PartitionState>>, wake: Arc<Notify>, label: String) {
    tracing::debug!(partition = %label, "expiry sweeper started");
    loop {
        let next_deadline = {
            let Some(state) = state.upgrade() else {
                break;
            };
            let mut st = state.lock().await;
            let now = Instant::now();
            while let Some(head) = st.deadlines.peek() {
                if head.at > now {
                    break;
                }
                let Some(due) = st.deadlines.pop() else {
                    break;
                };
                let fire = st
                    .entries
                    .get(&due.key)
                    .map(|e| e.expires_at == Some(due.at))
                    .unwrap_or(false);
                if fire {
                    st.entries.remove(&due.key);
                    let receivers = st.expired_tx.send(due.key.clone()).unwrap_or(0);
                    tracing::trace!(partition = %label, key = %due.key, receivers, "key expired");
                }
            }
            st.deadlines.peek().map(|d| d.at)
        };

        match next_deadline {
            Some(at) => {
                tokio::select! {
                    _ = wake.notified() => {}
                    _ = tokio::time::sleep_until(at) => {}
                }
            }
            None => wake.notified().await,
        }
    }
    tracing::debug!(partition = %label, "expiry sweeper stopped");
}

#[async_trait]
impl StoreBackend for MemoryPartition {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let expires_at = ttl.map(|d| Instant::now() + d);
        state.entries.insert(
            key.to_string(),
            Entry {
                record: RawRecord::Text(value.to_string()),
                expires_at,
            },
        );
        if let Some(at) = expires_at {
            self.arm(&mut state, key, at);
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let state = self.state.lock().await;
        let now = Instant::now();
        match state.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => match &entry.record {
                RawRecord::Text(s) => Ok(Some(s.clone())),
                RawRecord::Hash(_) => Err(StoreError::WrongType {
                    key: key.to_string(),
                    field: String::new(),
                    expected: "string",
                }),
            },
            _ => Ok(None),
        }
    }

    async fn fetch(&self, key: &str) -> StoreResult<Option<RawRecord>> {
        let state = self.state.lock().await;
        let now = Instant::now();
        Ok(state
            .entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.record.clone()))
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let mut removed = 0u64;
        for key in keys {
            let live = state
                .entries
                .get(key)
                .map(|e| !e.is_expired(now))
                .unwrap_or(false);
            if live {
                state.entries.remove(key);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let state = self.state.lock().await;
        let now = Instant::now();
        Ok(state
            .entries
            .get(key)
            .map(|e| !e.is_expired(now))
            .unwrap_or(false))
    }

    async fn hset(
        &self,
        key: &str,
        fields: BTreeMap<String, String>,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        let now = Instant::now();

        live_hash(&mut state, key, now)?.extend(fields);

        if let Some(d) = ttl {
            let at = now + d;
            if let Some(entry) = state.entries.get_mut(key) {
                entry.expires_at = Some(at);
            }
            self.arm(&mut state, key, at);
        }
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        let state = self.state.lock().await;
        let now = Instant::now();
        match state.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => match &entry.record {
                RawRecord::Hash(map) => Ok(map.get(field).cloned()),
                RawRecord::Text(_) => Err(StoreError::WrongType {
                    key: key.to_string(),
                    field: field.to_string(),
                    expected: "hash",
                }),
            },
            _ => Ok(None),
        }
    }

    async fn hgetall(&self, key: &str) -> StoreResult<BTreeMap<String, String>> {
        let state = self.state.lock().await;
        let now = Instant::now();
        match state.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => match &entry.record {
                RawRecord::Hash(map) => Ok(map.clone()),
                RawRecord::Text(_) => Err(StoreError::WrongType {
                    key: key.to_string(),
                    field: String::new(),
                    expected: "hash",
                }),
            },
            _ => Ok(BTreeMap::new()),
        }
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let mut remove_entry = false;
        let removed = match state.entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => match &mut entry.record {
                RawRecord::Hash(map) => {
                    let mut removed = 0u64;
                    for field in fields {
                        if map.remove(field).is_some() {
                            removed += 1;
                        }
                    }
                    remove_entry = map.is_empty();
                    removed
                }
                RawRecord::Text(_) => {
                    return Err(StoreError::WrongType {
                        key: key.to_string(),
                        field: String::new(),
                        expected: "hash",
                    });
                }
            },
            _ => 0,
        };
        // A hash with no remaining fields no longer exists.
        if remove_entry {
            state.entries.remove(key);
        }
        Ok(removed)
    }

    async fn hincrby(
        &self,
        key: &str,
        field: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> StoreResult<i64> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let map = live_hash(&mut state, key, now)?;
        let current = match map.get(field) {
            Some(repr) => repr.parse::<i64>().map_err(|_| StoreError::WrongType {
                key: key.to_string(),
                field: field.to_string(),
                expected: "integer",
            })?,
            None => 0,
        };
        let new_value = current + delta;
        map.insert(field.to_string(), new_value.to_string());

        if let Some(d) = ttl {
            let at = now + d;
            if let Some(entry) = state.entries.get_mut(key) {
                entry.expires_at = Some(at);
            }
            self.arm(&mut state, key, at);
        }
        Ok(new_value)
    }

    async fn hlist_push(
        &self,
        key: &str,
        field: &str,
        element: &str,
        ttl: Option<Duration>,
    ) -> StoreResult<u64> {
        let item: serde_json::Value =
            serde_json::from_str(element).map_err(|e| StoreError::Backend {
                reason: format!("invalid list element: {e}"),
            })?;

        let mut state = self.state.lock().await;
        let now = Instant::now();

        let map = live_hash(&mut state, key, now)?;
        let mut items: Vec<serde_json::Value> = match map.get(field) {
            Some(repr) => match serde_json::from_str(repr) {
                Ok(serde_json::Value::Array(items)) => items,
                _ => {
                    return Err(StoreError::WrongType {
                        key: key.to_string(),
                        field: field.to_string(),
                        expected: "list",
                    });
                }
            },
            None => Vec::new(),
        };
        items.push(item);
        let length = items.len() as u64;
        map.insert(field.to_string(), serde_json::Value::Array(items).to_string());

        if let Some(d) = ttl {
            let at = now + d;
            if let Some(entry) = state.entries.get_mut(key) {
                entry.expires_at = Some(at);
            }
            self.arm(&mut state, key, at);
        }
        Ok(length)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let live = state
            .entries
            .get(key)
            .map(|e| !e.is_expired(now))
            .unwrap_or(false);
        if !live {
            return Ok(false);
        }
        let at = now + ttl;
        if let Some(entry) = state.entries.get_mut(key) {
            entry.expires_at = Some(at);
        }
        self.arm(&mut state, key, at);
        Ok(true)
    }

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        let state = self.state.lock().await;
        let now = Instant::now();
        match state.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => match entry.expires_at {
                None => Ok(KeyTtl::NoExpiry),
                Some(at) => Ok(KeyTtl::Remaining(at - now)),
            },
            _ => Ok(KeyTtl::Missing),
        }
    }

    async fn scan(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let matcher = glob_to_regex(pattern)?;
        let state = self.state.lock().await;
        let now = Instant::now();
        let mut keys: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, e)| !e.is_expired(now))
            .filter(|(k, _)| matcher.is_match(k))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn flush(&self) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.entries.clear();
        state.deadlines.clear();
        Ok(())
    }

    async fn subscribe_expired(&self) -> StoreResult<ExpirySubscription> {
        let state = self.state.lock().await;
        Ok(ExpirySubscription::new(state.expired_tx.subscribe()))
    }
}

/// One in-memory store endpoint holding numbered partitions.
pub struct MemoryHub {
    name: String,
    partitions: std::sync::Mutex<HashMap<u32, Arc<MemoryPartition>>>,
}

impl MemoryHub {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            partitions: std::sync::Mutex::new(HashMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get or create the partition with the given index.
    pub fn partition(&self, index: u32) -> Arc<MemoryPartition> {
        let mut partitions = match self.partitions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(partitions.entry(index).or_insert_with(|| {
            MemoryPartition::new(format!("{}/{}", self.name, index))
        }))
    }
}

/// Translate a glob pattern (`*`, `?`) into an anchored regex.
fn glob_to_regex(pattern: &str) -> Result<regex::Regex, StoreError> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push('^');
    for c in pattern.chars() {
        match c {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            c => source.push_str(&regex::escape(&c.to_string())),
        }
    }
    source.push('$');
    regex::Regex::new(&source).map_err(|e| StoreError::Backend {
        reason: format!("invalid scan pattern '{pattern}': {e}"),
    })
}
