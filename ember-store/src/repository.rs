//! Generic tenant-scoped cache repository.
//!
//! A [`Repository`] binds a tenant (and optionally an identifier scope such
//! as a user id) to one pool and one entity kind, and exposes the uniform
//! record contract: full-replace writes, field-merging upserts,
//! read-modify-write merges, single-field operations, and atomic counters
//! and list appends. Concrete repository types differ only in the
//! [`CacheDomain`] marker fixing their key prefix and default pool alias.
//!
//! # TTL rules
//!
//! Record-level writes (`set`, `upsert`, `merge`) use the explicit TTL if
//! given, else the repository's default TTL; with neither, `set` leaves the
//! key persistent and `upsert`/`merge` leave any existing TTL untouched.
//! Field-level writes (`update_field`, `increment_field`, `append_to_list`)
//! only ever touch the TTL when one is passed explicitly.
//!
//! # Consistency
//!
//! Single-field operations are atomic at the store. [`Repository::merge`] is
//! read-then-write and explicitly NOT atomic: two concurrent merges on the
//! same id can race, the later write computing against a stale read. Callers
//! needing strict atomicity use the field-level operations instead.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use ember_core::{
    check_component, ConfigError, EmberResult, FieldHints, KeyFactory, Record, RetryPolicy,
    TypeHint, Value, POOL_STATE, POOL_TABLES, POOL_USERS,
};

use crate::backend::{KeyTtl, RawRecord, StoreBackend};
use crate::codec;
use crate::pool::PoolRegistry;
use crate::retry::with_retry;

/// Static metadata fixing a concrete repository type's key prefix and
/// default pool alias.
pub trait CacheDomain: Send + Sync + 'static {
    const KIND: &'static str;
    const POOL_ALIAS: &'static str;
}

/// Handler/session state records.
pub struct StateDomain;

impl CacheDomain for StateDomain {
    const KIND: &'static str = "state";
    const POOL_ALIAS: &'static str = POOL_STATE;
}

/// Per-user profile records.
pub struct UserDomain;

impl CacheDomain for UserDomain {
    const KIND: &'static str = "user";
    const POOL_ALIAS: &'static str = POOL_USERS;
}

/// Tabular row records.
pub struct TableDomain;

impl CacheDomain for TableDomain {
    const KIND: &'static str = "table";
    const POOL_ALIAS: &'static str = POOL_TABLES;
}

pub type StateCache = Repository<StateDomain>;
pub type UserCache = Repository<UserDomain>;
pub type TableCache = Repository<TableDomain>;

/// Tenant-scoped repository over one pool and entity kind.
pub struct Repository<D: CacheDomain> {
    tenant: String,
    scope: Option<String>,
    default_ttl: Option<Duration>,
    retry: RetryPolicy,
    keys: KeyFactory,
    pools: Arc<PoolRegistry>,
    backend: Arc<dyn StoreBackend>,
    pool_alias: String,
    _domain: PhantomData<D>,
}

impl<D: CacheDomain> std::fmt::Debug for Repository<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("tenant", &self.tenant)
            .field("scope", &self.scope)
            .field("default_ttl", &self.default_ttl)
            .field("pool_alias", &self.pool_alias)
            .field("backend", &"dyn StoreBackend")
            .finish()
    }
}

impl<D: CacheDomain> Clone for Repository<D> {
    fn clone(&self) -> Self {
        Self {
            tenant: self.tenant.clone(),
            scope: self.scope.clone(),
            default_ttl: self.default_ttl,
            retry: self.retry.clone(),
            keys: self.keys.clone(),
            pools: Arc::clone(&self.pools),
            backend: Arc::clone(&self.backend),
            pool_alias: self.pool_alias.clone(),
            _domain: PhantomData,
        }
    }
}

impl<D: CacheDomain> Repository<D> {
    /// Create a repository for a tenant. The pool alias is resolved eagerly,
    /// so an unregistered alias fails here — before any I/O.
    pub fn new(pools: Arc<PoolRegistry>, tenant: impl Into<String>) -> EmberResult<Self> {
        let tenant = tenant.into();
        check_component("tenant", &tenant)?;
        let backend = pools.get(D::POOL_ALIAS)?;
        Ok(Self {
            tenant,
            scope: None,
            default_ttl: None,
            retry: RetryPolicy::default(),
            keys: KeyFactory::default(),
            pools,
            backend,
            pool_alias: D::POOL_ALIAS.to_string(),
            _domain: PhantomData,
        })
    }

    /// Fold an identifier scope (e.g. a user id) into every key.
    pub fn with_scope(mut self, scope: impl Into<String>) -> EmberResult<Self> {
        let scope = scope.into();
        check_component("scope", &scope)?;
        self.scope = Some(scope);
        Ok(self)
    }

    /// TTL applied to record-level writes when no explicit TTL is passed.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_key_factory(mut self, keys: KeyFactory) -> Self {
        self.keys = keys;
        self
    }

    /// Target another registered pool instead of the domain default.
    pub fn with_pool(mut self, alias: &str) -> EmberResult<Self> {
        self.backend = self.pools.get(alias)?;
        self.pool_alias = alias.to_string();
        Ok(self)
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn pool_alias(&self) -> &str {
        &self.pool_alias
    }

    fn ident(&self, id: &str) -> String {
        match &self.scope {
            Some(scope) => format!("{scope}.{id}"),
            None => id.to_string(),
        }
    }

    fn key(&self, id: &str) -> EmberResult<String> {
        check_component("identifier", id)?;
        Ok(self.keys.record(D::KIND, &self.tenant, &self.ident(id))?)
    }

    fn record_ttl(&self, ttl: Option<Duration>) -> Option<Duration> {
        ttl.or(self.default_ttl)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Fetch the record at `id`, whatever its shape. Absent keys are
    /// `Ok(None)`, never an error.
    pub async fn get(&self, id: &str) -> EmberResult<Option<Record>> {
        let key = self.key(id)?;
        let raw = with_retry(&self.retry, "get", &key, || self.backend.fetch(&key)).await?;
        match raw {
            None => Ok(None),
            Some(RawRecord::Text(repr)) => Ok(Some(Record::Scalar(codec::decode(&repr, None)?))),
            Some(RawRecord::Hash(fields)) => Ok(Some(Record::Fields(codec::decode_fields(
                &fields,
                &FieldHints::new(),
            )?))),
        }
    }

    /// Fetch a hash record, reconstructing hinted fields.
    pub async fn get_fields(
        &self,
        id: &str,
        hints: &FieldHints,
    ) -> EmberResult<Option<BTreeMap<String, Value>>> {
        let key = self.key(id)?;
        let raw = with_retry(&self.retry, "get", &key, || self.backend.hgetall(&key)).await?;
        if raw.is_empty() {
            return Ok(None);
        }
        Ok(Some(codec::decode_fields(&raw, hints)?))
    }

    /// Fetch and rebuild a typed record.
    pub async fn get_typed<T: ember_core::CacheRecord>(&self, id: &str) -> EmberResult<Option<T>> {
        let key = self.key(id)?;
        let raw = with_retry(&self.retry, "get", &key, || self.backend.hgetall(&key)).await?;
        if raw.is_empty() {
            return Ok(None);
        }
        Ok(Some(codec::decode_record(&raw)?))
    }

    /// Fetch one field in its natural form.
    pub async fn get_field(&self, id: &str, field: &str) -> EmberResult<Option<Value>> {
        let key = self.key(id)?;
        let raw = with_retry(&self.retry, "get_field", &key, || {
            self.backend.hget(&key, field)
        })
        .await?;
        match raw {
            None => Ok(None),
            Some(repr) => Ok(Some(codec::decode_field(field, &repr, None)?)),
        }
    }

    /// Fetch one field, reconstructing the hinted type.
    pub async fn get_field_hinted(
        &self,
        id: &str,
        field: &str,
        hint: &TypeHint,
    ) -> EmberResult<Option<Value>> {
        let key = self.key(id)?;
        let raw = with_retry(&self.retry, "get_field", &key, || {
            self.backend.hget(&key, field)
        })
        .await?;
        match raw {
            None => Ok(None),
            Some(repr) => Ok(Some(codec::decode_field(field, &repr, Some(hint))?)),
        }
    }

    pub async fn exists(&self, id: &str) -> EmberResult<bool> {
        let key = self.key(id)?;
        with_retry(&self.retry, "exists", &key, || self.backend.exists(&key)).await
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// String-mode full replacement: destroys any previous field structure.
    /// Without an explicit or default TTL the key becomes persistent.
    pub async fn set(
        &self,
        id: &str,
        value: impl Into<Value>,
        ttl: Option<Duration>,
    ) -> EmberResult<()> {
        let key = self.key(id)?;
        let repr = codec::encode(&value.into());
        let ttl = self.record_ttl(ttl);
        with_retry(&self.retry, "set", &key, || {
            self.backend.set(&key, &repr, ttl)
        })
        .await
    }

    /// Hash-mode field merge: writes only the given fields, preserving
    /// unspecified existing fields. Creates the record if absent.
    ///
    /// An empty field map deletes the record instead, since a hash with no
    /// fields does not exist in the store.
    pub async fn upsert(
        &self,
        id: &str,
        fields: BTreeMap<String, Value>,
        ttl: Option<Duration>,
    ) -> EmberResult<()> {
        let key = self.key(id)?;
        if fields.is_empty() {
            tracing::warn!(key = %key, "upsert with no fields, deleting record instead");
            self.delete(id).await?;
            return Ok(());
        }
        let encoded = codec::encode_fields(&fields);
        let ttl = self.record_ttl(ttl);
        with_retry(&self.retry, "upsert", &key, || {
            self.backend.hset(&key, encoded.clone(), ttl)
        })
        .await
    }

    /// Store a typed record as a hash.
    pub async fn upsert_typed<T: ember_core::CacheRecord>(
        &self,
        id: &str,
        record: &T,
        ttl: Option<Duration>,
    ) -> EmberResult<()> {
        let key = self.key(id)?;
        let encoded = codec::encode_record(record)?;
        let ttl = self.record_ttl(ttl);
        with_retry(&self.retry, "upsert", &key, || {
            self.backend.hset(&key, encoded.clone(), ttl)
        })
        .await
    }

    /// Read-modify-write merge: overlay `fields` on the existing record and
    /// write the combined result back, returning it. Like-named fields are
    /// overwritten wholesale; untouched fields keep their nested structure.
    /// NOT atomic across the read and the write.
    pub async fn merge(
        &self,
        id: &str,
        fields: BTreeMap<String, Value>,
        ttl: Option<Duration>,
    ) -> EmberResult<BTreeMap<String, Value>> {
        let mut merged = self
            .get_fields(id, &FieldHints::new())
            .await?
            .unwrap_or_default();
        merged.extend(fields);
        self.upsert(id, merged.clone(), ttl).await?;
        Ok(merged)
    }

    /// Write one field. Only touches the TTL when one is passed.
    pub async fn update_field(
        &self,
        id: &str,
        field: &str,
        value: impl Into<Value>,
        ttl: Option<Duration>,
    ) -> EmberResult<()> {
        let key = self.key(id)?;
        let fields = BTreeMap::from([(field.to_string(), codec::encode(&value.into()))]);
        with_retry(&self.retry, "update_field", &key, || {
            self.backend.hset(&key, fields.clone(), ttl)
        })
        .await
    }

    /// Remove one field. Deleting the last field deletes the record.
    pub async fn delete_field(&self, id: &str, field: &str) -> EmberResult<bool> {
        let key = self.key(id)?;
        let fields = vec![field.to_string()];
        let removed = with_retry(&self.retry, "delete_field", &key, || {
            self.backend.hdel(&key, &fields)
        })
        .await?;
        Ok(removed > 0)
    }

    /// Store-atomic integer increment. Fails with a wrong-type error when
    /// the field holds a non-integer.
    pub async fn increment_field(&self, id: &str, field: &str, delta: i64) -> EmberResult<i64> {
        let key = self.key(id)?;
        with_retry(&self.retry, "increment_field", &key, || {
            self.backend.hincrby(&key, field, delta, None)
        })
        .await
    }

    /// Store-atomic append to a list-valued field. Returns the new length.
    pub async fn append_to_list(
        &self,
        id: &str,
        field: &str,
        value: impl Into<Value>,
        ttl: Option<Duration>,
    ) -> EmberResult<u64> {
        let key = self.key(id)?;
        let element = codec::encode_element(&value.into());
        with_retry(&self.retry, "append_to_list", &key, || {
            self.backend.hlist_push(&key, field, &element, ttl)
        })
        .await
    }

    /// Remove the record. Idempotent: deleting an absent id is a no-op
    /// success returning false.
    pub async fn delete(&self, id: &str) -> EmberResult<bool> {
        let key = self.key(id)?;
        let removed = with_retry(&self.retry, "delete", &key, || {
            self.backend.delete(std::slice::from_ref(&key))
        })
        .await?;
        Ok(removed > 0)
    }

    // ========================================================================
    // TTL management
    // ========================================================================

    pub async fn ttl(&self, id: &str) -> EmberResult<KeyTtl> {
        let key = self.key(id)?;
        with_retry(&self.retry, "ttl", &key, || self.backend.ttl(&key)).await
    }

    /// Re-arm the record's TTL with the given or default duration.
    pub async fn renew_ttl(&self, id: &str, ttl: Option<Duration>) -> EmberResult<bool> {
        let key = self.key(id)?;
        let Some(ttl) = self.record_ttl(ttl) else {
            return Err(ConfigError::InvalidValue {
                what: "ttl",
                reason: "no TTL supplied and repository has no default".to_string(),
            }
            .into());
        };
        with_retry(&self.retry, "renew_ttl", &key, || {
            self.backend.expire(&key, ttl)
        })
        .await
    }

    // ========================================================================
    // Scans
    // ========================================================================

    /// First record of this kind and tenant whose `field` equals `value`.
    pub async fn find_by_field(
        &self,
        field: &str,
        value: &Value,
    ) -> EmberResult<Option<BTreeMap<String, Value>>> {
        let pattern = self.keys.record_pattern(D::KIND, &self.tenant)?;
        let wanted = codec::encode(value);
        let keys = with_retry(&self.retry, "scan", &pattern, || {
            self.backend.scan(&pattern)
        })
        .await?;
        for key in keys {
            let current = with_retry(&self.retry, "get_field", &key, || {
                self.backend.hget(&key, field)
            })
            .await?;
            if current.as_deref() == Some(wanted.as_str()) {
                let raw = with_retry(&self.retry, "get", &key, || self.backend.hgetall(&key))
                    .await?;
                return Ok(Some(codec::decode_fields(&raw, &FieldHints::new())?));
            }
        }
        Ok(None)
    }

    /// Delete every record of this kind under the tenant. Returns the count.
    pub async fn purge(&self) -> EmberResult<u64> {
        let pattern = self.keys.record_pattern(D::KIND, &self.tenant)?;
        let keys = with_retry(&self.retry, "scan", &pattern, || {
            self.backend.scan(&pattern)
        })
        .await?;
        if keys.is_empty() {
            return Ok(0);
        }
        with_retry(&self.retry, "purge", &pattern, || {
            self.backend.delete(&keys)
        })
        .await
    }
}
