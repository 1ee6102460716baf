//! Advisory lock coordination
//!
//! Lock requests go to an out-of-process lock service whose answers arrive
//! asynchronously. [`LockCoordinator`] keeps a correlation table keyed by
//! transaction id: `submit` registers a waiter, `resolve` completes it, and
//! answers nobody is waiting for are counted as unexpected.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use nfsplane_core::stats::NlmCounter;
use nfsplane_core::{FileHandle, RpcCounter, StatKey, StatsRegistry};
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ClientError, Result};
use crate::lockd::{LockAnswer, LOCKD_ANS_RECLAIM};
use crate::transport::TransportFailure;

/// Lock service operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockOp {
    /// Acquire
    Lock,
    /// Report a conflicting lock without acquiring
    Test,
    /// Release
    Unlock,
}

/// One request to the lock service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
    /// Transaction id, assigned on submission
    pub xid: u64,
    /// Mount that owns the request
    pub mount: Uuid,
    /// Server holding the lock
    pub host: IpAddr,
    /// Locked file
    pub handle: FileHandle,
    /// First byte
    pub start: i64,
    /// Length; 0 means to end of file
    pub len: i64,
    /// Exclusive (write) lock
    pub exclusive: bool,
    /// Owning process
    pub owner_pid: i32,
    /// Operation
    pub op: LockOp,
    /// Re-acquisition after a server restart
    pub reclaim: bool,
}

impl LockRequest {
    /// Request for `op` over `start..start+len` on `handle`.
    pub fn new(mount: Uuid, host: IpAddr, handle: FileHandle, op: LockOp) -> Self {
        Self {
            xid: 0,
            mount,
            host,
            handle,
            start: 0,
            len: 0,
            exclusive: false,
            owner_pid: 0,
            op,
            reclaim: false,
        }
    }

    /// Sets the byte range.
    pub fn range(mut self, start: i64, len: i64) -> Self {
        self.start = start;
        self.len = len;
        self
    }

    /// Makes the lock exclusive.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Sets the owning process.
    pub fn owner(mut self, pid: i32) -> Self {
        self.owner_pid = pid;
        self
    }

    fn end(&self) -> i64 {
        range_end(self.start, self.len)
    }

    fn same_range(&self, other: &LockRequest) -> bool {
        self.handle == other.handle
            && self.owner_pid == other.owner_pid
            && self.start == other.start
            && self.len == other.len
    }
}

fn range_end(start: i64, len: i64) -> i64 {
    if len == 0 {
        i64::MAX
    } else {
        start.saturating_add(len)
    }
}

fn overlaps(a_start: i64, a_end: i64, b_start: i64, b_end: i64) -> bool {
    a_start < b_end && b_start < a_end
}

/// Sends lock requests to the lock service. Answers come back through
/// [`LockCoordinator::resolve`].
#[async_trait]
pub trait LockService: Send + Sync + 'static {
    /// Hands `request` to the service.
    async fn send(&self, request: &LockRequest) -> std::result::Result<(), TransportFailure>;
}

/// What [`LockCoordinator::resolve`] did with an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// A waiter was completed
    Completed,
    /// The server queued the request; the waiter keeps waiting
    Blocked,
    /// Nobody was waiting; counted and discarded
    Unexpected,
}

type AnswerTx = oneshot::Sender<Result<LockAnswer>>;
type AnswerRx = oneshot::Receiver<Result<LockAnswer>>;

struct Pending {
    request: LockRequest,
    tx: AnswerTx,
    blocked: bool,
    resend: bool,
}

/// Correlates lock requests with their asynchronous answers.
pub struct LockCoordinator {
    service: Arc<dyn LockService>,
    stats: Arc<StatsRegistry>,
    pending: DashMap<u64, Pending>,
    waiters: DashMap<u64, AnswerRx>,
    held: DashMap<IpAddr, Vec<LockRequest>>,
    reclaims: DashMap<IpAddr, Vec<LockRequest>>,
    next_xid: AtomicU64,
}

impl LockCoordinator {
    /// Creates a coordinator sending through `service`.
    pub fn new(service: Arc<dyn LockService>, stats: Arc<StatsRegistry>) -> Self {
        let seed = rand::thread_rng().gen_range(1..u64::from(u32::MAX));
        Self {
            service,
            stats,
            pending: DashMap::new(),
            waiters: DashMap::new(),
            held: DashMap::new(),
            reclaims: DashMap::new(),
            next_xid: AtomicU64::new(seed),
        }
    }

    /// Registers `request` under a fresh transaction id and returns the id.
    pub fn submit(&self, request: LockRequest) -> Result<u64> {
        let xid = self.next_xid.fetch_add(1, Ordering::Relaxed);
        self.register(xid, request)?;
        Ok(xid)
    }

    /// Registers `request` under `xid`.
    pub fn register(&self, xid: u64, mut request: LockRequest) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        request.xid = xid;
        let op = request.op;
        match self.pending.entry(xid) {
            Entry::Occupied(_) => {
                warn!(xid, "duplicate lock transaction id");
                return Err(ClientError::DuplicateTransaction(xid));
            }
            Entry::Vacant(slot) => {
                slot.insert(Pending {
                    request,
                    tx,
                    blocked: false,
                    resend: false,
                });
            }
        }
        self.waiters.insert(xid, rx);
        let counter = match op {
            LockOp::Lock => NlmCounter::Lock,
            LockOp::Test => NlmCounter::Test,
            LockOp::Unlock => NlmCounter::Unlock,
        };
        self.stats.increment(StatKey::Nlm(counter));
        debug!(xid, ?op, "lock request registered");
        Ok(())
    }

    /// Decodes a lock answer record and resolves it. Records that do not
    /// decode are counted as invalid replies.
    pub fn resolve_record(&self, record: &[u8]) -> Result<Resolution> {
        match LockAnswer::decode(record) {
            Ok(answer) => Ok(self.resolve(answer)),
            Err(e) => {
                self.stats.increment(StatKey::Rpc(RpcCounter::Invalid));
                warn!(len = record.len(), error = %e, "malformed lock answer dropped");
                Err(e.into())
            }
        }
    }

    /// Delivers an answer from the lock service.
    pub fn resolve(&self, answer: LockAnswer) -> Resolution {
        let xid = answer.xid;
        if answer.flags.blocked() && !answer.flags.granted() {
            if let Some(mut entry) = self.pending.get_mut(&xid) {
                entry.blocked = true;
                debug!(xid, "lock request blocked at server");
                return Resolution::Blocked;
            }
            return self.unexpected(xid);
        }

        let Some((_, pending)) = self.pending.remove(&xid) else {
            return self.unexpected(xid);
        };

        if answer.errno == 0 {
            self.track(&pending.request, &answer);
        }
        if pending.tx.send(Ok(answer)).is_err() {
            debug!(xid, "lock waiter went away before its answer");
        }
        Resolution::Completed
    }

    fn unexpected(&self, xid: u64) -> Resolution {
        warn!(xid, "unexpected lock answer");
        self.stats.increment(StatKey::Rpc(RpcCounter::Unexpected));
        Resolution::Unexpected
    }

    fn track(&self, request: &LockRequest, answer: &LockAnswer) {
        match request.op {
            LockOp::Lock if answer.flags.granted() => {
                let mut held = self.held.entry(request.host).or_default();
                held.retain(|h| !h.same_range(request));
                let mut granted = request.clone();
                granted.reclaim = false;
                held.push(granted);
            }
            LockOp::Unlock => {
                if let Some(mut held) = self.held.get_mut(&request.host) {
                    let (start, end) = (request.start, request.end());
                    held.retain(|h| {
                        !(h.handle == request.handle
                            && h.owner_pid == request.owner_pid
                            && overlaps(h.start, h.end(), start, end))
                    });
                }
            }
            _ => {}
        }
    }

    /// Suspends until the answer for `xid` arrives or `timeout` elapses.
    ///
    /// On timeout the registration is removed, so a later answer for the
    /// same id is counted as unexpected.
    pub async fn await_with_timeout(&self, xid: u64, timeout: Duration) -> Result<LockAnswer> {
        let (_, mut rx) = self
            .waiters
            .remove(&xid)
            .ok_or_else(|| ClientError::NotFound(format!("lock transaction {}", xid)))?;

        let outcome = tokio::time::timeout(timeout, &mut rx).await;
        match outcome {
            Ok(Ok(answer)) => answer,
            Ok(Err(_)) => Err(ClientError::Cancelled),
            Err(_) => {
                if self.pending.remove(&xid).is_some() {
                    warn!(xid, ?timeout, "lock answer timed out");
                    return Err(ClientError::LockTimeout(xid));
                }
                // resolve() won the race and is about to send
                rx.await.unwrap_or(Err(ClientError::Cancelled))
            }
        }
    }

    /// Submits `request`, sends it and waits for the answer.
    pub async fn request(&self, request: LockRequest, timeout: Duration) -> Result<LockAnswer> {
        let xid = self.submit(request.clone())?;
        let mut sent = request;
        sent.xid = xid;
        if let Err(failure) = self.service.send(&sent).await {
            self.pending.remove(&xid);
            self.waiters.remove(&xid);
            warn!(xid, %failure, "lock service send failed");
            return Err(ClientError::LockTimeout(xid));
        }
        self.await_with_timeout(xid, timeout).await
    }

    /// Handles a restart notification for `hosts`.
    ///
    /// Locks held on those hosts move to the reclaim queue and pending
    /// requests to them are flagged for resend. Returns the number of locks
    /// scheduled for reclaim.
    pub fn notify(&self, hosts: &[IpAddr]) -> usize {
        let mut scheduled = 0;
        for host in hosts {
            if let Some((_, held)) = self.held.remove(host) {
                scheduled += held.len();
                let mut queue = self.reclaims.entry(*host).or_default();
                queue.extend(held.into_iter().map(|mut r| {
                    r.reclaim = true;
                    r
                }));
            }
            for mut entry in self.pending.iter_mut() {
                if entry.request.host == *host {
                    entry.resend = true;
                }
            }
            info!(host = %host, "lock host restarted");
        }
        scheduled
    }

    /// Removes and returns the reclaim queue for `host`.
    pub fn take_reclaims(&self, host: IpAddr) -> Vec<LockRequest> {
        self.reclaims
            .remove(&host)
            .map(|(_, queue)| queue)
            .unwrap_or_default()
    }

    /// Pending requests flagged for resend; clears the flag.
    pub fn pending_resends(&self) -> Vec<LockRequest> {
        let mut out = Vec::new();
        for mut entry in self.pending.iter_mut() {
            if entry.resend {
                entry.resend = false;
                out.push(entry.request.clone());
            }
        }
        out
    }

    /// Re-acquires every queued reclaim owned by `mount` and resends its
    /// flagged pending requests. Returns the number of locks reclaimed.
    pub async fn reclaim(&self, mount: Uuid, timeout: Duration) -> Result<usize> {
        let mut mine = Vec::new();
        for mut queue in self.reclaims.iter_mut() {
            let (ours, rest): (Vec<_>, Vec<_>) =
                queue.drain(..).partition(|r| r.mount == mount);
            *queue = rest;
            mine.extend(ours);
        }
        self.reclaims.retain(|_, queue| !queue.is_empty());

        let mut reclaimed = 0;
        let mut remaining = mine.into_iter();
        while let Some(request) = remaining.next() {
            match self.request(request.clone(), timeout).await {
                Ok(answer) if answer.errno == 0 => {
                    if !answer.flags.contains(LOCKD_ANS_RECLAIM) {
                        debug!(xid = answer.xid, "reclaim answer without reclaim flag");
                    }
                    reclaimed += 1;
                }
                Ok(answer) => {
                    warn!(xid = answer.xid, errno = answer.errno, "lock reclaim refused");
                }
                Err(err) => {
                    let mut queue = self.reclaims.entry(request.host).or_default();
                    queue.push(request);
                    for rest in remaining {
                        queue.push(rest);
                    }
                    return Err(err);
                }
            }
        }

        for request in self.pending_resends() {
            if request.mount != mount {
                continue;
            }
            if let Err(failure) = self.service.send(&request).await {
                warn!(xid = request.xid, %failure, "lock resend failed");
            }
        }
        if reclaimed > 0 {
            info!(mount = %mount, reclaimed, "locks reclaimed");
        }
        Ok(reclaimed)
    }

    /// Drains every registration owned by `mount`; their waiters observe
    /// `Cancelled`. Returns the number of registrations drained.
    pub fn cancel_owner(&self, mount: Uuid) -> usize {
        let xids: Vec<u64> = self
            .pending
            .iter()
            .filter(|entry| entry.request.mount == mount)
            .map(|entry| *entry.key())
            .collect();
        let mut drained = 0;
        for xid in xids {
            if let Some((_, pending)) = self.pending.remove(&xid) {
                let _ = pending.tx.send(Err(ClientError::Cancelled));
                drained += 1;
            }
            self.waiters.remove(&xid);
        }
        for mut held in self.held.iter_mut() {
            held.retain(|h| h.mount != mount);
        }
        for mut queue in self.reclaims.iter_mut() {
            queue.retain(|r| r.mount != mount);
        }
        if drained > 0 {
            info!(mount = %mount, drained, "lock registrations cancelled");
        }
        drained
    }

    /// Registrations awaiting an answer.
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    /// Whether `xid` is queued at the server.
    pub fn is_blocked(&self, xid: u64) -> bool {
        self.pending.get(&xid).map(|p| p.blocked).unwrap_or(false)
    }

    /// Locks currently recorded as held on `host`.
    pub fn held_on(&self, host: IpAddr) -> Vec<LockRequest> {
        self.held
            .get(&host)
            .map(|held| held.clone())
            .unwrap_or_default()
    }
}

/// Lock conflict reported by a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockConflict {
    /// Owner of the conflicting lock
    pub owner_pid: i32,
    /// First byte
    pub start: i64,
    /// Length; 0 means to end of file
    pub len: i64,
    /// Conflicting lock is exclusive
    pub exclusive: bool,
}

#[derive(Debug, Clone, Copy)]
struct LocalLock {
    owner_pid: i32,
    start: i64,
    len: i64,
    exclusive: bool,
}

impl LocalLock {
    fn end(&self) -> i64 {
        range_end(self.start, self.len)
    }

    fn conflicts(&self, req: &LockRequest) -> bool {
        self.owner_pid != req.owner_pid
            && (self.exclusive || req.exclusive)
            && overlaps(self.start, self.end(), req.start, req.end())
    }
}

/// Byte-range locks kept on this client only, for mounts in local lock mode.
#[derive(Default)]
pub struct LocalLocks {
    table: Mutex<HashMap<Vec<u8>, Vec<LocalLock>>>,
}

impl LocalLocks {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock or fails with `LockDenied`.
    pub fn lock(&self, req: &LockRequest) -> Result<()> {
        let mut table = self.table.lock();
        let locks = table.entry(req.handle.to_bytes()).or_default();
        if locks.iter().any(|l| l.conflicts(req)) {
            return Err(ClientError::LockDenied);
        }
        locks.retain(|l| {
            !(l.owner_pid == req.owner_pid && l.start == req.start && l.len == req.len)
        });
        locks.push(LocalLock {
            owner_pid: req.owner_pid,
            start: req.start,
            len: req.len,
            exclusive: req.exclusive,
        });
        Ok(())
    }

    /// Releases the owner's locks overlapping the request range.
    pub fn unlock(&self, req: &LockRequest) {
        let mut table = self.table.lock();
        let key = req.handle.to_bytes();
        if let Some(locks) = table.get_mut(&key) {
            locks.retain(|l| {
                !(l.owner_pid == req.owner_pid
                    && overlaps(l.start, l.end(), req.start, req.end()))
            });
            if locks.is_empty() {
                table.remove(&key);
            }
        }
    }

    /// First lock that would block `req`.
    pub fn test(&self, req: &LockRequest) -> Option<LockConflict> {
        let table = self.table.lock();
        table
            .get(&req.handle.to_bytes())?
            .iter()
            .find(|l| l.conflicts(req))
            .map(|l| LockConflict {
                owner_pid: l.owner_pid,
                start: l.start,
                len: l.len,
                exclusive: l.exclusive,
            })
    }

    /// Drops every lock.
    pub fn clear(&self) {
        self.table.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lockd::{AnswerFlags, LOCKD_ANS_BLOCKED, LOCKD_ANS_GRANTED};
    use nfsplane_core::filehandle;
    use nfsplane_core::NfsVersion;
    use std::net::Ipv4Addr;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingService {
        sent: AtomicUsize,
    }

    #[async_trait]
    impl LockService for CountingService {
        async fn send(&self, _request: &LockRequest) -> std::result::Result<(), TransportFailure> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn host() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))
    }

    fn handle() -> FileHandle {
        filehandle::encode(1, 1, b"file-1", NfsVersion::V3).unwrap()
    }

    fn coordinator() -> (Arc<LockCoordinator>, Arc<StatsRegistry>) {
        let stats = Arc::new(StatsRegistry::new());
        let coord = LockCoordinator::new(Arc::new(CountingService::default()), stats.clone());
        (Arc::new(coord), stats)
    }

    fn lock_req(mount: Uuid) -> LockRequest {
        LockRequest::new(mount, host(), handle(), LockOp::Lock)
            .range(0, 100)
            .exclusive()
            .owner(7)
    }

    #[tokio::test]
    async fn test_submit_resolve_completes_once() {
        let (coord, stats) = coordinator();
        let xid = coord.submit(lock_req(Uuid::new_v4())).unwrap();
        assert_eq!(coord.resolve(LockAnswer::granted(xid)), Resolution::Completed);
        assert_eq!(coord.resolve(LockAnswer::granted(xid)), Resolution::Unexpected);

        let answer = coord
            .await_with_timeout(xid, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(answer.flags.granted());
        assert_eq!(coord.outstanding(), 0);
        assert_eq!(stats.snapshot().get(&StatKey::Rpc(RpcCounter::Unexpected)), 1);
        assert_eq!(stats.snapshot().get(&StatKey::Nlm(NlmCounter::Lock)), 1);
    }

    #[tokio::test]
    async fn test_unknown_xid_is_unexpected() {
        let (coord, stats) = coordinator();
        let xid = coord.submit(lock_req(Uuid::new_v4())).unwrap();
        assert_eq!(
            coord.resolve(LockAnswer::granted(xid.wrapping_add(1000))),
            Resolution::Unexpected
        );
        assert_eq!(coord.outstanding(), 1);
        assert_eq!(stats.snapshot().get(&StatKey::Rpc(RpcCounter::Unexpected)), 1);
    }

    #[tokio::test]
    async fn test_resolve_record_counts_invalid() {
        let (coord, stats) = coordinator();
        let xid = coord.submit(lock_req(Uuid::new_v4())).unwrap();

        let record = LockAnswer::granted(xid).encode().unwrap();
        assert!(matches!(
            coord.resolve_record(&record[..10]),
            Err(ClientError::Wire(_))
        ));
        assert_eq!(stats.snapshot().get(&StatKey::Rpc(RpcCounter::Invalid)), 1);
        assert_eq!(coord.outstanding(), 1);

        assert_eq!(coord.resolve_record(&record).unwrap(), Resolution::Completed);
        assert_eq!(coord.outstanding(), 0);
    }

    #[test]
    fn test_duplicate_registration() {
        let (coord, _) = coordinator();
        coord.register(99, lock_req(Uuid::new_v4())).unwrap();
        assert_eq!(
            coord.register(99, lock_req(Uuid::new_v4())),
            Err(ClientError::DuplicateTransaction(99))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_late_answer() {
        let (coord, stats) = coordinator();
        let xid = coord.submit(lock_req(Uuid::new_v4())).unwrap();
        let err = coord
            .await_with_timeout(xid, Duration::from_secs(30))
            .await
            .unwrap_err();
        assert_eq!(err, ClientError::LockTimeout(xid));
        assert_eq!(coord.resolve(LockAnswer::granted(xid)), Resolution::Unexpected);
        assert_eq!(stats.snapshot().get(&StatKey::Rpc(RpcCounter::Unexpected)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_answer_keeps_waiter() {
        let (coord, _) = coordinator();
        let xid = coord.submit(lock_req(Uuid::new_v4())).unwrap();
        let mut blocked = LockAnswer::denied(xid, 0);
        blocked.flags = AnswerFlags::empty().with(LOCKD_ANS_BLOCKED);
        assert_eq!(coord.resolve(blocked), Resolution::Blocked);
        assert!(coord.is_blocked(xid));

        let waiter = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.await_with_timeout(xid, Duration::from_secs(60)).await })
        };
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(coord.resolve(LockAnswer::granted(xid)), Resolution::Completed);
        let answer = waiter.await.unwrap().unwrap();
        assert!(answer.flags.contains(LOCKD_ANS_GRANTED));
    }

    #[tokio::test]
    async fn test_notify_moves_held_locks_to_reclaim() {
        let (coord, _) = coordinator();
        let mount = Uuid::new_v4();
        let xid = coord.submit(lock_req(mount)).unwrap();
        coord.resolve(LockAnswer::granted(xid));
        assert_eq!(coord.held_on(host()).len(), 1);

        let pending = coord.submit(lock_req(mount).range(200, 10)).unwrap();
        assert_eq!(coord.notify(&[host()]), 1);
        assert!(coord.held_on(host()).is_empty());

        let resends = coord.pending_resends();
        assert_eq!(resends.len(), 1);
        assert_eq!(resends[0].xid, pending);
        assert!(coord.pending_resends().is_empty());

        let reclaims = coord.take_reclaims(host());
        assert_eq!(reclaims.len(), 1);
        assert!(reclaims[0].reclaim);
        assert!(coord.take_reclaims(host()).is_empty());
    }

    #[tokio::test]
    async fn test_unlock_releases_held() {
        let (coord, _) = coordinator();
        let mount = Uuid::new_v4();
        let xid = coord.submit(lock_req(mount)).unwrap();
        coord.resolve(LockAnswer::granted(xid));
        let unlock = LockRequest {
            op: LockOp::Unlock,
            ..lock_req(mount)
        };
        let xid = coord.submit(unlock).unwrap();
        coord.resolve(LockAnswer::granted(xid));
        assert!(coord.held_on(host()).is_empty());
    }

    #[tokio::test]
    async fn test_cancel_owner_drains_waiters() {
        let (coord, _) = coordinator();
        let mine = Uuid::new_v4();
        let other = Uuid::new_v4();
        let a = coord.submit(lock_req(mine)).unwrap();
        let b = coord.submit(lock_req(other)).unwrap();

        let waiter = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.await_with_timeout(a, Duration::from_secs(60)).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(coord.cancel_owner(mine), 1);
        assert_eq!(waiter.await.unwrap(), Err(ClientError::Cancelled));
        assert_eq!(coord.outstanding(), 1);
        assert_eq!(coord.resolve(LockAnswer::granted(b)), Resolution::Completed);
    }

    #[tokio::test]
    async fn test_concurrent_resolutions() {
        let (coord, stats) = coordinator();
        let mount = Uuid::new_v4();
        let xids: Vec<u64> = (0..64)
            .map(|i| coord.submit(lock_req(mount).range(i * 10, 10)).unwrap())
            .collect();

        let mut waiters = Vec::new();
        for xid in xids.clone() {
            let coord = coord.clone();
            waiters.push(tokio::spawn(async move {
                coord.await_with_timeout(xid, Duration::from_secs(10)).await
            }));
        }
        let mut resolvers = Vec::new();
        for xid in xids {
            let coord = coord.clone();
            resolvers.push(tokio::spawn(async move {
                coord.resolve(LockAnswer::granted(xid))
            }));
        }
        for r in resolvers {
            assert_eq!(r.await.unwrap(), Resolution::Completed);
        }
        for w in waiters {
            assert!(w.await.unwrap().is_ok());
        }
        assert_eq!(stats.snapshot().get(&StatKey::Rpc(RpcCounter::Unexpected)), 0);
        assert_eq!(coord.held_on(host()).len(), 64);
    }

    #[test]
    fn test_local_locks_conflicts() {
        let locks = LocalLocks::new();
        let mount = Uuid::new_v4();
        let a = lock_req(mount);
        locks.lock(&a).unwrap();

        let b = LockRequest::new(mount, host(), handle(), LockOp::Lock)
            .range(50, 10)
            .owner(8);
        assert_eq!(locks.lock(&b), Err(ClientError::LockDenied));
        let conflict = locks.test(&b).unwrap();
        assert_eq!(conflict.owner_pid, 7);
        assert!(conflict.exclusive);

        let c = b.clone().range(100, 10);
        locks.lock(&c).unwrap();

        locks.unlock(&a);
        assert!(locks.test(&b).is_none());
        locks.lock(&b).unwrap();
    }

    #[test]
    fn test_local_shared_locks_coexist() {
        let locks = LocalLocks::new();
        let mount = Uuid::new_v4();
        let a = LockRequest::new(mount, host(), handle(), LockOp::Lock).owner(1);
        let b = LockRequest::new(mount, host(), handle(), LockOp::Lock).owner(2);
        locks.lock(&a).unwrap();
        locks.lock(&b).unwrap();
        let c = b.clone().owner(3).exclusive();
        assert!(locks.test(&c).is_some());
    }
}
