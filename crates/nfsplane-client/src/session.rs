//! Mount sessions
//!
//! A [`MountSession`] is the client side of one mount: resolved parameters,
//! the health state machine, the retry loop around every NFS call, and the
//! mount's share of advisory locking and identity mapping.
//!
//! Health transitions are serialized under a per-session mutex. Different
//! sessions share nothing but the statistics registry and the lock
//! coordinator.

use std::future::Future;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use nfsplane_core::status::nfserr_name;
use nfsplane_core::{
    classify, Counter, ErrorClass, FileHandle, NfsOp, RpcCounter, StatKey, StatsRegistry,
};
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{ClientError, Result};
use crate::idmap::{IdentityMapper, IdentityQuery, IdentityValue};
use crate::lock::{LocalLocks, LockConflict, LockCoordinator, LockOp, LockRequest};
use crate::lockd::LOCKD_ANS_EXCL;
use crate::mount_config::{LockMode, MountConfig, MountParams};
use crate::transport::{RpcReply, RpcRequest, RpcTransport, TransportFailure};

/// Mount-info flag: mount is dead.
pub const MOUNT_INFO_DEAD: u32 = 1 << 0;
/// Mount-info flag: server is not responding.
pub const MOUNT_INFO_NOTRESP: u32 = 1 << 1;
/// Mount-info flag: mount state is being recovered.
pub const MOUNT_INFO_RECOVERY: u32 = 1 << 2;

/// Health state of a mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MountState {
    /// No exchange has completed yet
    Connecting,
    /// Server is answering
    Responsive,
    /// Server stopped answering
    Unresponsive,
    /// Server unresponsive past the dead timeout
    Dead,
    /// Re-establishing server-side state
    Recovery,
}

struct Health {
    state: MountState,
    consecutive_timeouts: u32,
    last_success: Option<Instant>,
    first_timeout_at: Option<Instant>,
    unresponsive_since: Option<Instant>,
}

impl Health {
    fn new() -> Self {
        Self {
            state: MountState::Connecting,
            consecutive_timeouts: 0,
            last_success: None,
            first_timeout_at: None,
            unresponsive_since: None,
        }
    }
}

/// One NFS call.
#[derive(Debug, Clone)]
pub struct Operation {
    /// Procedure
    pub op: NfsOp,
    /// Target object
    pub handle: Option<FileHandle>,
    /// Encoded arguments
    pub payload: Bytes,
}

impl Operation {
    /// Call `op` with no target and no arguments.
    pub fn new(op: NfsOp) -> Self {
        Self {
            op,
            handle: None,
            payload: Bytes::new(),
        }
    }

    /// Sets the target object.
    pub fn on(mut self, handle: FileHandle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Sets the encoded arguments.
    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }
}

/// Snapshot returned by the mount-info query.
#[derive(Debug, Clone, Serialize)]
pub struct MountInfo {
    /// Mount id
    pub id: Uuid,
    /// Current state
    pub state: MountState,
    /// `MOUNT_INFO_*` bits
    pub flags: u32,
    /// Configuration as supplied
    pub original: MountConfig,
    /// Configuration in effect
    pub params: MountParams,
    /// Calls in flight
    pub outstanding: usize,
    /// Timeouts since the last answer
    pub consecutive_timeouts: u32,
    /// Time since the last answer
    pub since_last_success: Option<Duration>,
}

struct Outstanding<'a> {
    session: &'a MountSession,
    xid: u32,
}

impl Drop for Outstanding<'_> {
    fn drop(&mut self) {
        self.session.inflight.remove(&self.xid);
        if self.session.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.session.drained.notify_waiters();
        }
    }
}

/// Leaves `Recovery` if the recovering call is dropped before it finishes.
struct Recovering<'a> {
    session: &'a MountSession,
    finished: bool,
}

impl Drop for Recovering<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let session = self.session;
        let mut health = session.health.lock();
        if health.state == MountState::Recovery {
            warn!(mount = %session.id, "recovery dropped before completion");
            session.set_state(&mut health, MountState::Unresponsive, Instant::now());
        }
    }
}

async fn interrupted(signal: Option<&CancellationToken>, enabled: bool) {
    match signal {
        Some(token) if enabled => token.cancelled().await,
        _ => std::future::pending().await,
    }
}

/// Client side of one mount.
pub struct MountSession {
    id: Uuid,
    server: IpAddr,
    original: MountConfig,
    params: MountParams,
    transport: Arc<dyn RpcTransport>,
    locks: Arc<LockCoordinator>,
    local_locks: LocalLocks,
    identity: Option<Arc<IdentityMapper>>,
    stats: Arc<StatsRegistry>,
    health: Mutex<Health>,
    inflight: DashMap<u32, NfsOp>,
    next_xid: AtomicU32,
    outstanding: AtomicUsize,
    drained: Notify,
    cancel: CancellationToken,
}

impl MountSession {
    /// Resolves `config` and creates a session talking to `server`.
    pub fn new(
        config: MountConfig,
        server: IpAddr,
        transport: Arc<dyn RpcTransport>,
        locks: Arc<LockCoordinator>,
        stats: Arc<StatsRegistry>,
    ) -> Result<Self> {
        let params = config.resolve()?;
        let id = Uuid::new_v4();
        info!(
            mount = %id,
            server = %server,
            version = %params.version,
            soft = params.is_soft(),
            "mount session created"
        );
        Ok(Self {
            id,
            server,
            original: config,
            params,
            transport,
            locks,
            local_locks: LocalLocks::new(),
            identity: None,
            stats,
            health: Mutex::new(Health::new()),
            inflight: DashMap::new(),
            next_xid: AtomicU32::new(rand::thread_rng().gen()),
            outstanding: AtomicUsize::new(0),
            drained: Notify::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Attaches an identity mapper.
    pub fn with_identity(mut self, mapper: Arc<IdentityMapper>) -> Self {
        self.identity = Some(mapper);
        self
    }

    /// Mount id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Parameters in effect.
    pub fn params(&self) -> &MountParams {
        &self.params
    }

    /// Current state.
    pub fn state(&self) -> MountState {
        self.health.lock().state
    }

    /// Calls in flight.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Whether `xid` is marked in flight.
    pub fn is_in_flight(&self, xid: u32) -> bool {
        self.inflight.contains_key(&xid)
    }

    /// Token cancelled by [`MountSession::unmount`].
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    fn set_state(&self, health: &mut Health, next: MountState, now: Instant) {
        if health.state == next {
            return;
        }
        let prev = health.state;
        health.state = next;
        match next {
            MountState::Unresponsive => {
                health.unresponsive_since = Some(now);
                warn!(mount = %self.id, server = %self.server, from = ?prev, "server not responding");
            }
            MountState::Dead => {
                error!(mount = %self.id, server = %self.server, "mount is dead");
            }
            MountState::Responsive if prev != MountState::Connecting => {
                health.unresponsive_since = None;
                info!(mount = %self.id, server = %self.server, from = ?prev, "server responding");
            }
            _ => debug!(mount = %self.id, from = ?prev, to = ?next, "mount state change"),
        }
    }

    fn note_answer(&self, now: Instant) {
        let mut health = self.health.lock();
        health.consecutive_timeouts = 0;
        health.first_timeout_at = None;
        health.last_success = Some(now);
        if health.state != MountState::Recovery {
            self.set_state(&mut health, MountState::Responsive, now);
        }
    }

    fn note_timeout(&self, now: Instant) {
        let mut health = self.health.lock();
        health.consecutive_timeouts = health.consecutive_timeouts.saturating_add(1);
        let first = *health.first_timeout_at.get_or_insert(now);
        match health.state {
            MountState::Connecting | MountState::Responsive | MountState::Recovery => {
                let exhausted = health.consecutive_timeouts >= self.params.retry.retry_count;
                let overdue = !self.params.is_soft()
                    && now.saturating_duration_since(first) >= self.params.initial_diag_delay;
                if exhausted || overdue {
                    self.set_state(&mut health, MountState::Unresponsive, now);
                }
            }
            MountState::Unresponsive | MountState::Dead => {}
        }
        self.check_dead(&mut health, now);
    }

    fn check_dead(&self, health: &mut Health, now: Instant) {
        if health.state != MountState::Unresponsive {
            return;
        }
        if let (Some(dead), Some(since)) = (self.params.dead_timeout, health.unresponsive_since) {
            if now.saturating_duration_since(since) >= dead {
                self.set_state(health, MountState::Dead, now);
            }
        }
    }

    /// Evaluates the dead timeout without traffic.
    pub fn tick(&self, now: Instant) -> MountState {
        let mut health = self.health.lock();
        self.check_dead(&mut health, now);
        health.state
    }

    fn fails_fast(&self) -> bool {
        self.params.is_soft() && self.state() == MountState::Dead
    }

    /// Sends `op` under the mount's retry policy.
    pub async fn call(&self, op: Operation) -> Result<RpcReply> {
        self.call_with_signal(op, None).await
    }

    /// Like [`MountSession::call`]; on an interruptible mount, cancelling
    /// `interrupt` aborts the retry loop with `Interrupted`.
    pub async fn call_with_signal(
        &self,
        op: Operation,
        interrupt: Option<&CancellationToken>,
    ) -> Result<RpcReply> {
        if self.cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        if self.fails_fast() {
            return Err(ClientError::MountDead);
        }

        let xid = self.next_xid.fetch_add(1, Ordering::Relaxed);
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        self.inflight.insert(xid, op.op);
        let _outstanding = Outstanding { session: self, xid };

        self.run(xid, op, interrupt).await
    }

    /// Runs `work`, giving up on unmount or on an interrupt.
    async fn guarded<T>(
        &self,
        work: impl Future<Output = Result<T>>,
        interrupt: Option<&CancellationToken>,
    ) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ClientError::Cancelled),
            _ = interrupted(interrupt, self.params.is_interruptible()) => Err(ClientError::Interrupted),
            r = work => r,
        }
    }

    async fn pause(&self, delay: Duration, interrupt: Option<&CancellationToken>) -> Result<()> {
        self.guarded(
            async {
                tokio::time::sleep(delay).await;
                Ok(())
            },
            interrupt,
        )
        .await
    }

    async fn run(
        &self,
        xid: u32,
        op: Operation,
        interrupt: Option<&CancellationToken>,
    ) -> Result<RpcReply> {
        let Operation {
            op,
            handle,
            payload,
        } = op;
        let export = handle.as_ref().map(|h| h.export_key());
        let idempotent = op.is_idempotent();
        let retry = &self.params.retry;

        let mut timeouts = 0u32;
        let mut jukebox = 0u32;
        let mut sends = 0u32;
        let mut recovered = false;

        loop {
            if self.fails_fast() {
                return Err(ClientError::MountDead);
            }

            let request = RpcRequest {
                xid,
                op,
                handle: handle.clone(),
                payload: payload.clone(),
                retransmit: sends > 0,
            };
            if sends > 0 {
                self.stats.increment(StatKey::Rpc(RpcCounter::Retries));
                debug!(mount = %self.id, xid, %op, sends, "retransmitting");
            }
            sends = sends.saturating_add(1);
            self.stats.increment(StatKey::Rpc(RpcCounter::Requests));
            self.stats
                .increment(StatKey::op(op, export, Counter::Attempts));

            let timeout = retry.attempt_timeout(timeouts, idempotent);
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(ClientError::Cancelled),
                _ = interrupted(interrupt, self.params.is_interruptible()) => {
                    info!(mount = %self.id, xid, %op, "call interrupted");
                    return Err(ClientError::Interrupted);
                }
                r = tokio::time::timeout(timeout, self.transport.call(request)) => r,
            };

            let reply = match outcome {
                Ok(Ok(reply)) => reply,
                failed => {
                    let reset = matches!(failed, Ok(Err(TransportFailure::ConnectionReset)));
                    if reset {
                        debug!(mount = %self.id, xid, %op, "connection reset");
                    }
                    self.stats.increment(StatKey::Rpc(RpcCounter::Timeouts));
                    self.note_timeout(Instant::now());
                    timeouts = timeouts.saturating_add(1);
                    if self.params.is_soft() && timeouts >= retry.soft_attempts() {
                        warn!(mount = %self.id, xid, %op, attempts = timeouts, "giving up");
                        return Err(ClientError::Timeout {
                            op,
                            attempts: timeouts,
                        });
                    }
                    if reset {
                        self.pause(timeout, interrupt).await?;
                    }
                    continue;
                }
            };

            self.stats.record_status(reply.status);
            if reply.status == 0 {
                self.note_answer(Instant::now());
                self.stats
                    .increment(StatKey::op(op, export, Counter::Successes));
                match op {
                    NfsOp::Read => self.stats.increment_by(
                        StatKey::op(op, export, Counter::BytesRead),
                        reply.payload.len() as u64,
                    ),
                    NfsOp::Write => self.stats.increment_by(
                        StatKey::op(op, export, Counter::BytesWritten),
                        payload.len() as u64,
                    ),
                    _ => {}
                }
                return Ok(reply);
            }

            match classify(reply.status) {
                ErrorClass::ServerDelay => {
                    if self.params.mute_jukebox() {
                        self.note_answer(Instant::now());
                    } else {
                        self.note_timeout(Instant::now());
                    }
                    if self.params.is_soft()
                        && jukebox > 0
                        && retry.jukebox_delay(jukebox - 1) >= retry.jukebox_max
                    {
                        warn!(
                            mount = %self.id,
                            xid,
                            %op,
                            replies = jukebox + 1,
                            "server still busy, giving up"
                        );
                        return Err(ClientError::Timeout {
                            op,
                            attempts: sends,
                        });
                    }
                    let delay = retry.jukebox_delay(jukebox);
                    jukebox = jukebox.saturating_add(1);
                    debug!(mount = %self.id, xid, %op, ?delay, "server busy, waiting");
                    self.pause(delay, interrupt).await?;
                }
                ErrorClass::StateRecovery if !recovered => {
                    recovered = true;
                    self.recover(reply.status, interrupt).await?;
                }
                ErrorClass::Negotiation => {
                    self.note_answer(Instant::now());
                    return Err(ClientError::Negotiation {
                        reason: format!(
                            "{} rejected with {}",
                            op,
                            nfserr_name(reply.status).unwrap_or("unknown status")
                        ),
                    });
                }
                _ => {
                    self.note_answer(Instant::now());
                    return Err(ClientError::Nfs {
                        status: reply.status,
                    });
                }
            }
        }
    }

    async fn recover(&self, status: u32, interrupt: Option<&CancellationToken>) -> Result<()> {
        {
            let mut health = self.health.lock();
            self.set_state(&mut health, MountState::Recovery, Instant::now());
        }
        let mut recovering = Recovering {
            session: self,
            finished: false,
        };
        info!(mount = %self.id, status, "recovering mount state");

        let outcome = self.guarded(self.reestablish(), interrupt).await;
        recovering.finished = true;

        let mut health = self.health.lock();
        match outcome {
            Ok(()) => {
                self.set_state(&mut health, MountState::Responsive, Instant::now());
                Ok(())
            }
            Err(err @ (ClientError::Cancelled | ClientError::Interrupted)) => {
                debug!(mount = %self.id, %err, "recovery abandoned");
                self.set_state(&mut health, MountState::Unresponsive, Instant::now());
                Err(err)
            }
            Err(err) => {
                warn!(mount = %self.id, %err, "recovery failed");
                self.set_state(&mut health, MountState::Unresponsive, Instant::now());
                Err(ClientError::Nfs { status })
            }
        }
    }

    async fn reestablish(&self) -> Result<()> {
        if let Err(failure) = self.transport.reestablish().await {
            return Err(ClientError::Negotiation {
                reason: format!("state re-establishment failed: {}", failure),
            });
        }
        if self.params.lock_mode == LockMode::Enabled {
            self.locks.reclaim(self.id, self.params.lock_timeout).await?;
        }
        Ok(())
    }

    fn lock_request(
        &self,
        handle: FileHandle,
        op: LockOp,
        start: i64,
        len: i64,
        owner_pid: i32,
    ) -> LockRequest {
        LockRequest::new(self.id, self.server, handle, op)
            .range(start, len)
            .owner(owner_pid)
    }

    fn check_lockable(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        if self.params.lock_mode == LockMode::Disabled {
            return Err(ClientError::LockingDisabled);
        }
        if self.fails_fast() {
            return Err(ClientError::MountDead);
        }
        Ok(())
    }

    /// Acquires a byte-range lock.
    pub async fn lock(
        &self,
        handle: FileHandle,
        start: i64,
        len: i64,
        exclusive: bool,
        owner_pid: i32,
    ) -> Result<()> {
        self.check_lockable()?;
        let mut req = self.lock_request(handle, LockOp::Lock, start, len, owner_pid);
        req.exclusive = exclusive;
        if self.params.lock_mode == LockMode::Local {
            return self.local_locks.lock(&req);
        }
        let answer = self.locks.request(req, self.params.lock_timeout).await?;
        if answer.errno != 0 {
            debug!(mount = %self.id, xid = answer.xid, errno = answer.errno, "lock denied");
            return Err(ClientError::LockDenied);
        }
        Ok(())
    }

    /// Releases a byte-range lock.
    pub async fn unlock(&self, handle: FileHandle, start: i64, len: i64, owner_pid: i32) -> Result<()> {
        self.check_lockable()?;
        let req = self.lock_request(handle, LockOp::Unlock, start, len, owner_pid);
        if self.params.lock_mode == LockMode::Local {
            self.local_locks.unlock(&req);
            return Ok(());
        }
        let answer = self.locks.request(req, self.params.lock_timeout).await?;
        if answer.errno != 0 {
            warn!(mount = %self.id, xid = answer.xid, errno = answer.errno, "unlock refused");
            return Err(ClientError::LockDenied);
        }
        Ok(())
    }

    /// Reports the first lock that would block the given range.
    pub async fn test_lock(
        &self,
        handle: FileHandle,
        start: i64,
        len: i64,
        exclusive: bool,
        owner_pid: i32,
    ) -> Result<Option<LockConflict>> {
        self.check_lockable()?;
        let mut req = self.lock_request(handle, LockOp::Test, start, len, owner_pid);
        req.exclusive = exclusive;
        if self.params.lock_mode == LockMode::Local {
            return Ok(self.local_locks.test(&req));
        }
        let answer = self.locks.request(req, self.params.lock_timeout).await?;
        if answer.errno == 0 {
            return Ok(None);
        }
        Ok(Some(LockConflict {
            owner_pid: answer.pid,
            start: answer.start,
            len: answer.len,
            exclusive: answer.flags.contains(LOCKD_ANS_EXCL),
        }))
    }

    /// Maps an identity through the mount's identity mapper.
    pub async fn lookup_identity(&self, query: IdentityQuery) -> Result<IdentityValue> {
        match &self.identity {
            Some(mapper) => mapper.lookup(query).await,
            None => Err(ClientError::NotFound("no identity mapper".into())),
        }
    }

    /// Mount-info query.
    pub fn info(&self) -> MountInfo {
        let health = self.health.lock();
        let flags = match health.state {
            MountState::Dead => MOUNT_INFO_DEAD | MOUNT_INFO_NOTRESP,
            MountState::Unresponsive => MOUNT_INFO_NOTRESP,
            MountState::Recovery => MOUNT_INFO_RECOVERY,
            MountState::Connecting | MountState::Responsive => 0,
        };
        MountInfo {
            id: self.id,
            state: health.state,
            flags,
            original: self.original.clone(),
            params: self.params.clone(),
            outstanding: self.outstanding(),
            consecutive_timeouts: health.consecutive_timeouts,
            since_last_success: health.last_success.map(|t| t.elapsed()),
        }
    }

    /// Cancels every queued and in-flight call, drains the mount's lock
    /// registrations and waits for in-flight calls to finish. Returns the
    /// number of lock registrations drained.
    pub async fn unmount(&self) -> usize {
        info!(mount = %self.id, outstanding = self.outstanding(), "unmounting");
        self.cancel.cancel();
        let drained = self.locks.cancel_owner(self.id);
        self.local_locks.clear();
        loop {
            let idle = self.drained.notified();
            if self.outstanding() == 0 {
                break;
            }
            idle.await;
        }
        debug!(mount = %self.id, "unmount complete");
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockService;
    use crate::mount_config::{MountFlag, MountFlags};
    use async_trait::async_trait;
    use nfsplane_core::status::{NFSERR_DELAY, NFSERR_GRACE, NFSERR_NOSPC};
    use std::collections::VecDeque;
    use std::net::Ipv4Addr;
    use std::sync::atomic::AtomicBool;

    #[derive(Debug, Clone, Copy)]
    enum Step {
        Reply(u32),
        Hang,
    }

    #[derive(Default)]
    struct Script {
        steps: Mutex<VecDeque<Step>>,
        seen: Mutex<Vec<(u32, bool)>>,
        reestablished: AtomicU32,
        stall_reestablish: AtomicBool,
    }

    impl Script {
        fn new(steps: &[Step]) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.iter().copied().collect()),
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl RpcTransport for Script {
        async fn call(&self, request: RpcRequest) -> std::result::Result<RpcReply, TransportFailure> {
            self.seen.lock().push((request.xid, request.retransmit));
            let step = self.steps.lock().pop_front().unwrap_or(Step::Reply(0));
            match step {
                Step::Reply(status) => Ok(RpcReply::status(status)),
                Step::Hang => std::future::pending().await,
            }
        }

        async fn reestablish(&self) -> std::result::Result<(), TransportFailure> {
            self.reestablished.fetch_add(1, Ordering::SeqCst);
            if self.stall_reestablish.swap(false, Ordering::SeqCst) {
                return std::future::pending().await;
            }
            Ok(())
        }
    }

    struct NoLocks;

    #[async_trait]
    impl LockService for NoLocks {
        async fn send(&self, _request: &LockRequest) -> std::result::Result<(), TransportFailure> {
            Ok(())
        }
    }

    fn session(config: MountConfig, script: &Arc<Script>) -> MountSession {
        let stats = Arc::new(StatsRegistry::new());
        let locks = Arc::new(LockCoordinator::new(Arc::new(NoLocks), stats.clone()));
        MountSession::new(
            config,
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            script.clone(),
            locks,
            stats,
        )
        .unwrap()
    }

    fn soft(retries: u32) -> MountConfig {
        MountConfig {
            flags: Some(MountFlags::empty().with(MountFlag::Soft)),
            soft_retry_count: Some(retries),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_success_leaves_connecting() {
        let script = Script::new(&[]);
        let s = session(MountConfig::default(), &script);
        assert_eq!(s.state(), MountState::Connecting);
        s.call(Operation::new(NfsOp::GetAttr)).await.unwrap();
        assert_eq!(s.state(), MountState::Responsive);
        assert_eq!(s.outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retransmits_reuse_xid() {
        let script = Script::new(&[Step::Hang, Step::Hang]);
        let s = session(soft(5), &script);
        s.call(Operation::new(NfsOp::Lookup)).await.unwrap();
        let seen = script.seen.lock().clone();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|(xid, _)| *xid == seen[0].0));
        assert_eq!(
            seen.iter().map(|(_, r)| *r).collect::<Vec<_>>(),
            vec![false, true, true]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_semantic_error_surfaced_verbatim() {
        let script = Script::new(&[Step::Reply(NFSERR_NOSPC)]);
        let s = session(MountConfig::default(), &script);
        let err = s.call(Operation::new(NfsOp::Write)).await.unwrap_err();
        assert_eq!(err, ClientError::Nfs { status: NFSERR_NOSPC });
        assert_eq!(script.seen.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_jukebox_does_not_consume_retries() {
        let script = Script::new(&[
            Step::Reply(NFSERR_DELAY),
            Step::Reply(NFSERR_DELAY),
            Step::Reply(NFSERR_DELAY),
        ]);
        let s = session(soft(1), &script);
        let started = Instant::now();
        s.call(Operation::new(NfsOp::Read)).await.unwrap();
        assert_eq!(script.seen.lock().len(), 4);
        assert!(started.elapsed() >= Duration::from_secs(4 + 8 + 16));
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_mount_gives_up_on_endless_jukebox() {
        let script = Script::new(&[Step::Reply(NFSERR_DELAY); 10]);
        let s = session(soft(3), &script);
        let started = Instant::now();
        let err = s.call(Operation::new(NfsOp::Read)).await.unwrap_err();
        assert_eq!(
            err,
            ClientError::Timeout {
                op: NfsOp::Read,
                attempts: 6
            }
        );
        // waits of 4, 8, 16, 32 and the 60s cap
        assert_eq!(script.seen.lock().len(), 6);
        assert!(started.elapsed() >= Duration::from_secs(120));
        assert_eq!(s.outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_mount_outlasts_jukebox_cap() {
        let script = Script::new(&[Step::Reply(NFSERR_DELAY); 8]);
        let s = session(MountConfig::default(), &script);
        s.call(Operation::new(NfsOp::Read)).await.unwrap();
        assert_eq!(script.seen.lock().len(), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mute_jukebox_keeps_mount_responsive() {
        let script = Script::new(&[Step::Reply(NFSERR_DELAY), Step::Reply(NFSERR_DELAY)]);
        let config = MountConfig {
            flags: Some(
                MountFlags::empty()
                    .with(MountFlag::Soft)
                    .with(MountFlag::MuteJukebox),
            ),
            soft_retry_count: Some(1),
            ..Default::default()
        };
        let s = session(config, &script);
        let s = Arc::new(s);
        let call = {
            let s = s.clone();
            tokio::spawn(async move { s.call(Operation::new(NfsOp::Read)).await })
        };
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(s.state(), MountState::Responsive);
        call.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_resends_once() {
        let script = Script::new(&[Step::Reply(NFSERR_GRACE)]);
        let s = session(MountConfig::default(), &script);
        s.call(Operation::new(NfsOp::Write)).await.unwrap();
        assert_eq!(script.reestablished.load(Ordering::SeqCst), 1);
        assert_eq!(s.state(), MountState::Responsive);

        let script = Script::new(&[Step::Reply(NFSERR_GRACE), Step::Reply(NFSERR_GRACE)]);
        let s = session(MountConfig::default(), &script);
        let err = s.call(Operation::new(NfsOp::Write)).await.unwrap_err();
        assert_eq!(err, ClientError::Nfs { status: NFSERR_GRACE });
        assert_eq!(script.reestablished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_recovery_returns_to_responsive() {
        let script = Script::new(&[Step::Reply(NFSERR_GRACE)]);
        script.stall_reestablish.store(true, Ordering::SeqCst);
        let s = session(MountConfig::default(), &script);

        let abandoned =
            tokio::time::timeout(Duration::from_secs(10), s.call(Operation::new(NfsOp::GetAttr)))
                .await;
        assert!(abandoned.is_err());
        assert_eq!(s.state(), MountState::Unresponsive);
        assert_eq!(s.outstanding(), 0);

        for _ in 0..3 {
            s.call(Operation::new(NfsOp::GetAttr)).await.unwrap();
        }
        assert_eq!(s.state(), MountState::Responsive);
        assert_eq!(s.info().flags, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_aborts_recovery() {
        let script = Script::new(&[Step::Reply(NFSERR_GRACE)]);
        script.stall_reestablish.store(true, Ordering::SeqCst);
        let config = MountConfig {
            flags: Some(MountFlags::empty().with(MountFlag::Intr)),
            ..Default::default()
        };
        let s = Arc::new(session(config, &script));
        let signal = CancellationToken::new();
        let call = {
            let s = s.clone();
            let signal = signal.clone();
            tokio::spawn(async move {
                s.call_with_signal(Operation::new(NfsOp::GetAttr), Some(&signal))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(s.state(), MountState::Recovery);
        assert_eq!(s.info().flags, MOUNT_INFO_RECOVERY);

        signal.cancel();
        assert_eq!(call.await.unwrap(), Err(ClientError::Interrupted));
        assert_eq!(s.state(), MountState::Unresponsive);
        assert_eq!(s.outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_mount_reports_after_initial_delay() {
        let script = Script::new(&[Step::Hang; 4]);
        let s = Arc::new(session(MountConfig::default(), &script));
        let call = {
            let s = s.clone();
            tokio::spawn(async move { s.call(Operation::new(NfsOp::GetAttr)).await })
        };
        // timeouts at 1s, 3s, 7s; the third is past the 5s diagnostic delay
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_ne!(s.state(), MountState::Unresponsive);
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(s.state(), MountState::Unresponsive);
        assert_eq!(s.info().flags, MOUNT_INFO_NOTRESP);
        call.await.unwrap().unwrap();
        assert_eq!(s.state(), MountState::Responsive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_aborts_hard_retry() {
        let script = Script::new(&[Step::Hang; 100]);
        let config = MountConfig {
            flags: Some(MountFlags::empty().with(MountFlag::Intr)),
            ..Default::default()
        };
        let s = Arc::new(session(config, &script));
        let signal = CancellationToken::new();
        let call = {
            let s = s.clone();
            let signal = signal.clone();
            tokio::spawn(async move {
                s.call_with_signal(Operation::new(NfsOp::Read), Some(&signal))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_secs(30)).await;
        signal.cancel();
        assert_eq!(call.await.unwrap(), Err(ClientError::Interrupted));
        assert_eq!(s.outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmount_cancels_in_flight() {
        let script = Script::new(&[Step::Hang; 100]);
        let s = Arc::new(session(MountConfig::default(), &script));
        let call = {
            let s = s.clone();
            tokio::spawn(async move { s.call(Operation::new(NfsOp::Read)).await })
        };
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(s.outstanding(), 1);
        s.unmount().await;
        assert_eq!(call.await.unwrap(), Err(ClientError::Cancelled));
        assert_eq!(
            s.call(Operation::new(NfsOp::Read)).await,
            Err(ClientError::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_locking_disabled() {
        let script = Script::new(&[]);
        let config = MountConfig {
            lock_mode: Some(LockMode::Disabled),
            ..Default::default()
        };
        let s = session(config, &script);
        let fh = nfsplane_core::filehandle::encode(1, 1, b"f", nfsplane_core::NfsVersion::V3)
            .unwrap();
        assert_eq!(
            s.lock(fh, 0, 0, true, 1).await,
            Err(ClientError::LockingDisabled)
        );
    }

    #[tokio::test]
    async fn test_local_lock_mode() {
        let script = Script::new(&[]);
        let config = MountConfig {
            lock_mode: Some(LockMode::Local),
            ..Default::default()
        };
        let s = session(config, &script);
        let fh = nfsplane_core::filehandle::encode(1, 1, b"f", nfsplane_core::NfsVersion::V3)
            .unwrap();
        s.lock(fh.clone(), 0, 10, true, 1).await.unwrap();
        assert_eq!(
            s.lock(fh.clone(), 5, 10, false, 2).await,
            Err(ClientError::LockDenied)
        );
        let conflict = s.test_lock(fh.clone(), 5, 1, false, 2).await.unwrap();
        assert_eq!(conflict.map(|c| c.owner_pid), Some(1));
        s.unlock(fh.clone(), 0, 10, 1).await.unwrap();
        s.lock(fh, 5, 10, false, 2).await.unwrap();
    }
}
