//! Identity mapping between numeric ids, names and GUIDs
//!
//! Lookups go through a bounded LRU cache. A miss asks the external
//! [`NameService`]; concurrent misses for the same query share one call.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use lru::LruCache;
use nfsplane_core::wire::{WireDecoder, WireEncoder};
use nfsplane_core::WireError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{ClientError, Result};

/// Longest name the identity-test record carries.
pub const MAXIDNAMELEN: usize = 1024;
/// Encoded size of an identity-test record.
pub const IDENTITY_TEST_SIZE: usize = 16 + 16 + MAXIDNAMELEN;

/// Lookup direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Numeric id to name
    IdToName,
    /// Name to numeric id
    NameToId,
    /// Name to GUID
    NameToGuid,
    /// GUID to name
    GuidToName,
}

impl Direction {
    /// Wire value.
    pub fn as_u32(self) -> u32 {
        match self {
            Direction::IdToName => 0,
            Direction::NameToId => 1,
            Direction::NameToGuid => 2,
            Direction::GuidToName => 3,
        }
    }

    /// Parses a wire value.
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Direction::IdToName),
            1 => Some(Direction::NameToId),
            2 => Some(Direction::NameToGuid),
            3 => Some(Direction::GuidToName),
            _ => None,
        }
    }
}

/// Whether an identity is a user or a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdKind {
    /// User
    User,
    /// Group
    Group,
}

/// Input side of a lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    /// Numeric id
    Id(u32),
    /// Name
    Name(String),
    /// Opaque GUID token
    Guid(Uuid),
}

/// Output side of a lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityValue {
    /// Numeric id
    Id(u32),
    /// Name
    Name(String),
    /// Opaque GUID token
    Guid(Uuid),
}

/// A well-formed lookup: the key type always matches the direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityQuery {
    direction: Direction,
    kind: IdKind,
    key: IdentityKey,
}

impl IdentityQuery {
    /// Numeric id to name.
    pub fn id_to_name(kind: IdKind, id: u32) -> Self {
        Self {
            direction: Direction::IdToName,
            kind,
            key: IdentityKey::Id(id),
        }
    }

    /// Name to numeric id.
    pub fn name_to_id(kind: IdKind, name: impl Into<String>) -> Self {
        Self {
            direction: Direction::NameToId,
            kind,
            key: IdentityKey::Name(name.into()),
        }
    }

    /// Name to GUID.
    pub fn name_to_guid(kind: IdKind, name: impl Into<String>) -> Self {
        Self {
            direction: Direction::NameToGuid,
            kind,
            key: IdentityKey::Name(name.into()),
        }
    }

    /// GUID to name.
    pub fn guid_to_name(kind: IdKind, guid: Uuid) -> Self {
        Self {
            direction: Direction::GuidToName,
            kind,
            key: IdentityKey::Guid(guid),
        }
    }

    /// Lookup direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// User or group.
    pub fn kind(&self) -> IdKind {
        self.kind
    }

    /// Lookup input.
    pub fn key(&self) -> &IdentityKey {
        &self.key
    }
}

/// External naming service.
#[async_trait]
pub trait NameService: Send + Sync + 'static {
    /// Resolves `query`, or fails with `NotFound`.
    async fn resolve(&self, query: &IdentityQuery) -> Result<IdentityValue>;
}

/// Cache sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdMapConfig {
    /// Entries kept
    pub capacity: usize,
    /// Age after which an entry is resolved again
    pub staleness: Duration,
}

impl Default for IdMapConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            staleness: Duration::from_secs(600),
        }
    }
}

/// Lookup counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IdMapStats {
    /// Answered from the cache
    pub hits: u64,
    /// Not in the cache or stale
    pub misses: u64,
    /// Calls made to the naming service
    pub resolutions: u64,
}

struct CachedValue {
    value: IdentityValue,
    inserted: Instant,
}

type Flight = watch::Receiver<Option<Result<IdentityValue>>>;

enum Role {
    Leader(watch::Sender<Option<Result<IdentityValue>>>),
    Follower(Flight),
}

/// Cached, single-flight identity resolver.
pub struct IdentityMapper {
    service: Arc<dyn NameService>,
    cache: Mutex<LruCache<IdentityQuery, CachedValue>>,
    inflight: DashMap<IdentityQuery, Flight>,
    staleness: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    resolutions: AtomicU64,
}

impl IdentityMapper {
    /// Creates a mapper over `service`.
    pub fn new(service: Arc<dyn NameService>, config: IdMapConfig) -> Result<Self> {
        let capacity = NonZeroUsize::new(config.capacity)
            .ok_or_else(|| ClientError::config("identity cache capacity must be positive"))?;
        Ok(Self {
            service,
            cache: Mutex::new(LruCache::new(capacity)),
            inflight: DashMap::new(),
            staleness: config.staleness,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            resolutions: AtomicU64::new(0),
        })
    }

    fn cached(&self, query: &IdentityQuery) -> Option<IdentityValue> {
        let mut cache = self.cache.lock();
        let fresh = match cache.get(query) {
            Some(entry) if entry.inserted.elapsed() < self.staleness => {
                return Some(entry.value.clone());
            }
            Some(_) => false,
            None => true,
        };
        if !fresh {
            cache.pop(query);
        }
        None
    }

    /// Resolves `query` through the cache.
    pub async fn lookup(&self, query: IdentityQuery) -> Result<IdentityValue> {
        if let Some(value) = self.cached(&query) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        loop {
            let role = match self.inflight.entry(query.clone()) {
                Entry::Occupied(flight) => Role::Follower(flight.get().clone()),
                Entry::Vacant(slot) => {
                    let (tx, rx) = watch::channel(None);
                    slot.insert(rx);
                    Role::Leader(tx)
                }
            };

            match role {
                Role::Leader(tx) => {
                    let result = match self.cached(&query) {
                        Some(value) => Ok(value),
                        None => self.resolve(&query).await,
                    };
                    self.inflight.remove(&query);
                    let _ = tx.send(Some(result.clone()));
                    return result;
                }
                Role::Follower(mut rx) => match rx.wait_for(Option::is_some).await {
                    Ok(done) => {
                        if let Some(result) = &*done {
                            return result.clone();
                        }
                    }
                    Err(_) => {
                        // leader was dropped mid-flight
                        self.inflight
                            .remove_if(&query, |_, flight| flight.has_changed().is_err());
                    }
                },
            }
        }
    }

    async fn resolve(&self, query: &IdentityQuery) -> Result<IdentityValue> {
        self.resolutions.fetch_add(1, Ordering::Relaxed);
        let result = self.service.resolve(query).await;
        match &result {
            Ok(value) => {
                self.cache.lock().put(
                    query.clone(),
                    CachedValue {
                        value: value.clone(),
                        inserted: Instant::now(),
                    },
                );
            }
            Err(err) => debug!(?query, %err, "identity lookup failed"),
        }
        result
    }

    /// Answers an identity-test request.
    pub async fn test(&self, mut request: IdentityTestRequest) -> Result<IdentityTestRequest> {
        let kind = if request.group { IdKind::Group } else { IdKind::User };
        let query = match request.lookup {
            Direction::IdToName => IdentityQuery::id_to_name(kind, request.id),
            Direction::NameToId => IdentityQuery::name_to_id(kind, request.name.clone()),
            Direction::NameToGuid => IdentityQuery::name_to_guid(kind, request.name.clone()),
            Direction::GuidToName => IdentityQuery::guid_to_name(kind, request.guid),
        };
        match self.lookup(query).await? {
            IdentityValue::Id(id) => request.id = id,
            IdentityValue::Name(name) => {
                if name.len() > MAXIDNAMELEN {
                    return Err(ClientError::Wire(WireError::InvalidField {
                        field: "ntm_name",
                        reason: format!("{} bytes exceeds {}", name.len(), MAXIDNAMELEN),
                    }));
                }
                request.name = name;
            }
            IdentityValue::Guid(guid) => request.guid = guid,
        }
        Ok(request)
    }

    /// Drops every cached entry.
    pub fn invalidate_all(&self) {
        let mut cache = self.cache.lock();
        let dropped = cache.len();
        cache.clear();
        info!(dropped, "identity cache flushed");
    }

    /// Entries in the cache.
    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> IdMapStats {
        IdMapStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            resolutions: self.resolutions.load(Ordering::Relaxed),
        }
    }
}

/// Identity-test record used to check id, name and GUID mappings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityTestRequest {
    /// Lookup direction
    pub lookup: Direction,
    /// Group rather than user mapping
    pub group: bool,
    /// Id to map, or the answer
    pub id: u32,
    /// Intermediate GUID, or the answer
    pub guid: Uuid,
    /// Name to map, or the answer
    pub name: String,
}

impl IdentityTestRequest {
    /// Encodes the fixed-size record.
    pub fn encode(&self) -> Result<bytes::Bytes> {
        if self.name.len() > MAXIDNAMELEN {
            return Err(ClientError::Wire(WireError::InvalidField {
                field: "ntm_name",
                reason: format!("{} bytes exceeds {}", self.name.len(), MAXIDNAMELEN),
            }));
        }
        let mut enc = WireEncoder::with_capacity(IDENTITY_TEST_SIZE);
        enc.put_u32(self.lookup.as_u32());
        enc.put_u32(u32::from(self.group));
        enc.put_u32(self.id);
        enc.put_u32(0);
        enc.put_bytes(self.guid.as_bytes());
        enc.put_fixed(self.name.as_bytes(), MAXIDNAMELEN);
        Ok(enc.finish())
    }

    /// Decodes a record.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut dec = WireDecoder::new(buf);
        let raw = dec.get_u32()?;
        let lookup = Direction::from_u32(raw).ok_or_else(|| WireError::InvalidField {
            field: "ntm_lookup",
            reason: format!("unknown direction {}", raw),
        })?;
        let group = dec.get_u32()? != 0;
        let id = dec.get_u32()?;
        let _pad = dec.get_u32()?;
        let mut guid = [0u8; 16];
        guid.copy_from_slice(dec.get_bytes(16)?);
        let name = dec.get_fixed_str(MAXIDNAMELEN, "ntm_name")?;
        Ok(Self {
            lookup,
            group,
            id,
            guid: Uuid::from_bytes(guid),
            name,
        })
    }
}
