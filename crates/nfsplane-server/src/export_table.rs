//! Published export table and per-request authorization
//!
//! Readers clone an `Arc` to the current map and work on that snapshot.
//! Writers build a new map and swap the pointer, so a reader sees either
//! the old table or the new one and never a table missing a replaced entry.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use nfsplane_core::filehandle::{self, FileHandle};
use nfsplane_core::stats::{Counter, StatKey, StatsRegistry};
use nfsplane_core::status::{
    NFSERR_ACCES, NFSERR_BADHANDLE, NFSERR_DELAY, NFSERR_ROFS, NFSERR_STALE, NFSERR_WRONGSEC,
};
use nfsplane_core::{ExportKey, NfsOp, NfsVersion};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{ExportError, Result};
use crate::export::{ExportEntry, ExportOptions, MappedCredential, SecFlavor};

type ExportMap = HashMap<ExportKey, Arc<ExportEntry>>;

/// Administrative export operation.
#[derive(Debug, Clone)]
pub enum ExportOp {
    /// Publish a new export
    Add(ExportEntry),
    /// Atomically swap an existing export for a new definition
    Replace(ExportEntry),
    /// Remove one export
    Delete(ExportKey),
    /// Remove every export
    DeleteAll,
    /// Keep an export published but refuse access to it
    Offline(ExportKey),
    /// Validate a definition without publishing it
    Check(ExportEntry),
}

/// Result of a successful [`ExportOp`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    /// Entry published
    Added,
    /// Entry swapped
    Replaced,
    /// Entry removed
    Deleted,
    /// All entries removed; carries how many
    DeletedAll(usize),
    /// Entry marked offline
    Offlined,
    /// Definition is valid
    Checked,
}

/// Why a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Handle bytes could not be parsed
    BadHandle,
    /// No export with the handle's key
    NoSuchExport,
    /// Handle carries the invalid flag
    StaleHandle,
    /// Export is offline
    ExportOffline,
    /// No rule admits the client and the export is not exported to the world
    NoMatchingNetRule,
    /// None of the client's security flavors is permitted
    WrongSecurity,
    /// Mutating operation against a read-only export
    ReadOnlyExport,
}

impl DenyReason {
    /// NFS status returned to the client.
    pub fn status(self) -> u32 {
        match self {
            DenyReason::BadHandle => NFSERR_BADHANDLE,
            DenyReason::NoSuchExport | DenyReason::StaleHandle => NFSERR_STALE,
            DenyReason::ExportOffline => NFSERR_DELAY,
            DenyReason::NoMatchingNetRule => NFSERR_ACCES,
            DenyReason::WrongSecurity => NFSERR_WRONGSEC,
            DenyReason::ReadOnlyExport => NFSERR_ROFS,
        }
    }
}

/// Access granted to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    /// Effective options (export-wide merged with the matched rule)
    pub options: ExportOptions,
    /// Credential for mapped users
    pub mapped_credential: MappedCredential,
    /// Flavor the client must use
    pub security_flavor: SecFlavor,
    /// Index of the matching rule, `None` when admitted as default export
    pub matched_rule: Option<usize>,
}

/// Authorization verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    /// Request may proceed
    Allowed(Grant),
    /// Request must be refused
    Denied(DenyReason),
}

impl AuthDecision {
    /// True for [`AuthDecision::Allowed`].
    pub fn is_allowed(&self) -> bool {
        matches!(self, AuthDecision::Allowed(_))
    }

    /// The grant, if allowed.
    pub fn grant(&self) -> Option<&Grant> {
        match self {
            AuthDecision::Allowed(g) => Some(g),
            AuthDecision::Denied(_) => None,
        }
    }

    /// The deny reason, if denied.
    pub fn denied(&self) -> Option<DenyReason> {
        match self {
            AuthDecision::Allowed(_) => None,
            AuthDecision::Denied(r) => Some(*r),
        }
    }
}

/// Set of published exports.
pub struct ExportTable {
    current: RwLock<Arc<ExportMap>>,
    writer: Mutex<()>,
    stats: Option<Arc<StatsRegistry>>,
}

impl ExportTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(HashMap::new())),
            writer: Mutex::new(()),
            stats: None,
        }
    }

    /// Creates an empty table that records authorization outcomes.
    pub fn with_stats(stats: Arc<StatsRegistry>) -> Self {
        Self {
            stats: Some(stats),
            ..Self::new()
        }
    }

    fn snapshot(&self) -> Arc<ExportMap> {
        self.current.read().clone()
    }

    /// Copies the map, applies `f`, and publishes the result.
    fn update<T>(&self, f: impl FnOnce(&mut ExportMap) -> Result<T>) -> Result<T> {
        let _guard = self.writer.lock();
        let mut next: ExportMap = (*self.snapshot()).clone();
        let out = f(&mut next)?;
        *self.current.write() = Arc::new(next);
        Ok(out)
    }

    /// Runs one administrative operation.
    pub fn apply(&self, op: ExportOp) -> Result<ExportOutcome> {
        match op {
            ExportOp::Add(entry) => self.add(entry).map(|_| ExportOutcome::Added),
            ExportOp::Replace(entry) => self.replace(entry).map(|_| ExportOutcome::Replaced),
            ExportOp::Delete(key) => self.delete(key).map(|_| ExportOutcome::Deleted),
            ExportOp::DeleteAll => Ok(ExportOutcome::DeletedAll(self.delete_all())),
            ExportOp::Offline(key) => self.mark_offline(key).map(|_| ExportOutcome::Offlined),
            ExportOp::Check(entry) => entry.validate().map(|_| ExportOutcome::Checked),
        }
    }

    /// Publishes a new export.
    pub fn add(&self, entry: ExportEntry) -> Result<()> {
        entry.validate()?;
        let key = entry.key();
        self.update(|map| {
            if map.contains_key(&key) {
                return Err(ExportError::AlreadyExists {
                    fs_id: key.fs_id,
                    export_id: key.export_id,
                });
            }
            map.insert(key, Arc::new(entry));
            Ok(())
        })?;
        info!(fs_id = key.fs_id, export_id = key.export_id, "export added");
        Ok(())
    }

    /// Swaps an existing export for `entry` in one step.
    pub fn replace(&self, entry: ExportEntry) -> Result<()> {
        entry.validate()?;
        let key = entry.key();
        self.update(|map| match map.get_mut(&key) {
            Some(slot) => {
                *slot = Arc::new(entry);
                Ok(())
            }
            None => Err(not_found(key)),
        })?;
        info!(fs_id = key.fs_id, export_id = key.export_id, "export replaced");
        Ok(())
    }

    /// Removes one export.
    pub fn delete(&self, key: ExportKey) -> Result<()> {
        self.update(|map| map.remove(&key).map(|_| ()).ok_or_else(|| not_found(key)))?;
        info!(fs_id = key.fs_id, export_id = key.export_id, "export deleted");
        Ok(())
    }

    /// Removes every export and returns how many there were.
    pub fn delete_all(&self) -> usize {
        let _guard = self.writer.lock();
        let removed = std::mem::replace(&mut *self.current.write(), Arc::new(HashMap::new()));
        info!(count = removed.len(), "all exports deleted");
        removed.len()
    }

    /// Marks an export offline.
    pub fn mark_offline(&self, key: ExportKey) -> Result<()> {
        self.update(|map| match map.get_mut(&key) {
            Some(slot) => {
                let mut entry = (**slot).clone();
                entry.options.offline = true;
                *slot = Arc::new(entry);
                Ok(())
            }
            None => Err(not_found(key)),
        })?;
        info!(fs_id = key.fs_id, export_id = key.export_id, "export offline");
        Ok(())
    }

    /// True iff the export is published and online.
    pub fn check(&self, fs_id: u32, export_id: u32) -> bool {
        self.snapshot()
            .get(&ExportKey::new(fs_id, export_id))
            .map(|e| !e.options.offline)
            .unwrap_or(false)
    }

    /// Current definition of one export.
    pub fn get(&self, key: ExportKey) -> Option<Arc<ExportEntry>> {
        self.snapshot().get(&key).cloned()
    }

    /// All exports ordered by key.
    pub fn entries(&self) -> Vec<Arc<ExportEntry>> {
        let mut entries: Vec<_> = self.snapshot().values().cloned().collect();
        entries.sort_by_key(|e| e.key());
        entries
    }

    /// Number of published exports.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// True if nothing is published.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Issues a handle for `fid` inside a published export.
    pub fn issue_handle(
        &self,
        key: ExportKey,
        fid: &[u8],
        version: NfsVersion,
    ) -> Result<FileHandle> {
        if !self.snapshot().contains_key(&key) {
            return Err(not_found(key));
        }
        Ok(filehandle::encode(key.export_id, key.fs_id, fid, version)?)
    }

    /// Decides whether `client` may use `handle`, ignoring the operation.
    /// The grant carries the first flavor the matching rule permits.
    pub fn authorize(&self, handle: &FileHandle, client: IpAddr) -> AuthDecision {
        self.evaluate(handle, client, None, &SecFlavor::ALL)
    }

    /// Decides whether `client` may run `op` on `handle` with AUTH_SYS.
    pub fn authorize_op(&self, handle: &FileHandle, client: IpAddr, op: NfsOp) -> AuthDecision {
        self.authorize_with_flavors(handle, client, op, &[SecFlavor::Sys])
    }

    /// Decides whether `client`, offering `flavors`, may run `op` on `handle`.
    pub fn authorize_with_flavors(
        &self,
        handle: &FileHandle,
        client: IpAddr,
        op: NfsOp,
        flavors: &[SecFlavor],
    ) -> AuthDecision {
        let decision = self.evaluate(handle, client, Some(op), flavors);
        self.record(handle.export_key(), op, &decision);
        decision
    }

    /// Parses `bytes` for `version` and authorizes the result.
    pub fn authorize_raw(
        &self,
        bytes: &[u8],
        version: NfsVersion,
        client: IpAddr,
        op: NfsOp,
    ) -> AuthDecision {
        match filehandle::decode_for(bytes, version) {
            Ok(handle) => self.authorize_op(&handle, client, op),
            Err(e) => {
                debug!(%client, error = %e, "rejecting undecodable handle");
                if let Some(stats) = &self.stats {
                    stats.record_status(NFSERR_BADHANDLE);
                }
                AuthDecision::Denied(DenyReason::BadHandle)
            }
        }
    }

    fn evaluate(
        &self,
        handle: &FileHandle,
        client: IpAddr,
        op: Option<NfsOp>,
        flavors: &[SecFlavor],
    ) -> AuthDecision {
        let map = self.snapshot();
        let key = handle.export_key();
        let entry = match map.get(&key) {
            Some(e) => e,
            None => return deny(key, client, DenyReason::NoSuchExport),
        };
        if !handle.is_valid() {
            return deny(key, client, DenyReason::StaleHandle);
        }
        if entry.options.offline {
            return deny(key, client, DenyReason::ExportOffline);
        }

        let matched = entry
            .net_rules
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.matches(client));

        let grant = match matched {
            Some((idx, rule)) => {
                let flavor = match rule.negotiate(flavors) {
                    Some(f) => f,
                    None => return deny(key, client, DenyReason::WrongSecurity),
                };
                Grant {
                    options: entry.options.merge(&rule.options),
                    mapped_credential: rule.credential.clone(),
                    security_flavor: flavor,
                    matched_rule: Some(idx),
                }
            }
            None if entry.options.default_export => {
                let flavor = match entry
                    .default_sec_flavors
                    .iter()
                    .copied()
                    .find(|f| flavors.contains(f))
                {
                    Some(f) => f,
                    None => return deny(key, client, DenyReason::WrongSecurity),
                };
                Grant {
                    options: entry.options,
                    mapped_credential: entry.default_credential.clone(),
                    security_flavor: flavor,
                    matched_rule: None,
                }
            }
            None => return deny(key, client, DenyReason::NoMatchingNetRule),
        };

        if let Some(op) = op {
            if grant.options.read_only && op.is_mutating() {
                return deny(key, client, DenyReason::ReadOnlyExport);
            }
        }
        AuthDecision::Allowed(grant)
    }

    fn record(&self, key: ExportKey, op: NfsOp, decision: &AuthDecision) {
        let Some(stats) = &self.stats else {
            return;
        };
        stats.increment(StatKey::op(op, Some(key), Counter::Attempts));
        match decision {
            AuthDecision::Allowed(_) => {
                stats.increment(StatKey::op(op, Some(key), Counter::Successes))
            }
            AuthDecision::Denied(reason) => stats.record_status(reason.status()),
        }
    }
}

impl Default for ExportTable {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(key: ExportKey) -> ExportError {
    ExportError::NotFound {
        fs_id: key.fs_id,
        export_id: key.export_id,
    }
}

fn deny(key: ExportKey, client: IpAddr, reason: DenyReason) -> AuthDecision {
    debug!(fs_id = key.fs_id, export_id = key.export_id, %client, ?reason, "access denied");
    AuthDecision::Denied(reason)
}
