//! Per-mount request dispatch.
//!
//! A bounded queue feeds a fixed pool of worker tasks that call into the
//! [`MountSession`]. Submission waits for queue space, so a mount never has
//! more than its concurrency limit of calls queued. A watchdog task drives
//! [`MountSession::tick`] once a second.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{ClientError, Result};
use crate::session::{MountSession, Operation};
use crate::transport::RpcReply;

/// Watchdog period.
pub const WATCHDOG_INTERVAL: Duration = Duration::from_secs(1);

struct Job {
    op: Operation,
    reply: oneshot::Sender<Result<RpcReply>>,
}

type Queue = Arc<AsyncMutex<mpsc::Receiver<Job>>>;

/// Counters kept by the dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Jobs that ran to completion (success or error)
    pub completed: u64,
    /// Jobs failed with `Cancelled` without running
    pub cancelled: u64,
}

#[derive(Default)]
struct Counters {
    completed: AtomicU64,
    cancelled: AtomicU64,
}

/// Worker pool draining one mount's request queue.
pub struct Dispatcher {
    session: Arc<MountSession>,
    sender: mpsc::Sender<Job>,
    capacity: usize,
    token: CancellationToken,
    counters: Arc<Counters>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Starts `workers` tasks with a queue sized to the mount's
    /// concurrency limit.
    pub fn start(session: Arc<MountSession>, workers: usize) -> Self {
        let capacity = session.params().concurrency_limit;
        Self::with_capacity(session, workers, capacity)
    }

    /// Starts `workers` tasks with a queue of `capacity` slots.
    pub fn with_capacity(session: Arc<MountSession>, workers: usize, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let queue: Queue = Arc::new(AsyncMutex::new(receiver));
        let token = session.cancellation().child_token();
        let counters = Arc::new(Counters::default());

        let mut tasks = Vec::with_capacity(workers + 1);
        for id in 0..workers.max(1) {
            tasks.push(tokio::spawn(worker(
                id,
                session.clone(),
                queue.clone(),
                token.clone(),
                counters.clone(),
            )));
        }
        tasks.push(tokio::spawn(watchdog(session.clone(), token.clone())));
        info!(mount = %session.id(), workers, capacity, "dispatcher started");

        Self {
            session,
            sender,
            capacity,
            token,
            counters,
            tasks: parking_lot::Mutex::new(tasks),
        }
    }

    /// Queues `op`, waiting for space, and returns its result.
    pub async fn submit(&self, op: Operation) -> Result<RpcReply> {
        let (reply, rx) = oneshot::channel();
        tokio::select! {
            biased;
            _ = self.token.cancelled() => return Err(ClientError::Cancelled),
            sent = self.sender.send(Job { op, reply }) => {
                sent.map_err(|_| ClientError::Cancelled)?;
            }
        }
        rx.await.unwrap_or(Err(ClientError::Cancelled))
    }

    /// Jobs waiting in the queue.
    pub fn queued(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            completed: self.counters.completed.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
        }
    }

    /// Whether the workers are still running.
    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Stops every task; queued jobs fail with `Cancelled`.
    pub async fn shutdown(&self) {
        self.token.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        debug!(mount = %self.session.id(), "dispatcher stopped");
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

fn drain(queue: &mut mpsc::Receiver<Job>, counters: &Counters) {
    queue.close();
    while let Ok(job) = queue.try_recv() {
        counters.cancelled.fetch_add(1, Ordering::Relaxed);
        let _ = job.reply.send(Err(ClientError::Cancelled));
    }
}

async fn worker(
    id: usize,
    session: Arc<MountSession>,
    queue: Queue,
    token: CancellationToken,
    counters: Arc<Counters>,
) {
    loop {
        let job = {
            let mut queue = queue.lock().await;
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    drain(&mut queue, &counters);
                    break;
                }
                job = queue.recv() => job,
            }
        };
        let Some(job) = job else { break };

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(ClientError::Cancelled),
            r = session.call(job.op) => r,
        };
        counters.completed.fetch_add(1, Ordering::Relaxed);
        let _ = job.reply.send(result);
    }
    debug!(mount = %session.id(), worker = id, "worker exiting");
}

async fn watchdog(session: Arc<MountSession>, token: CancellationToken) {
    let mut interval = tokio::time::interval(WATCHDOG_INTERVAL);
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = interval.tick() => {
                session.tick(Instant::now());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{LockCoordinator, LockRequest, LockService};
    use crate::mount_config::{MountConfig, MountFlag, MountFlags};
    use crate::session::MountState;
    use crate::transport::{RpcRequest, RpcTransport, TransportFailure};
    use async_trait::async_trait;
    use nfsplane_core::{NfsOp, StatsRegistry};
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::AtomicUsize;

    struct Gate {
        hang: bool,
        active: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    impl Gate {
        fn new(hang: bool) -> Arc<Self> {
            Arc::new(Self {
                hang,
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl RpcTransport for Gate {
        async fn call(&self, _request: RpcRequest) -> std::result::Result<RpcReply, TransportFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                return std::future::pending().await;
            }
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(RpcReply::ok(vec![0u8; 16]))
        }
    }

    struct NoLocks;

    #[async_trait]
    impl LockService for NoLocks {
        async fn send(&self, _request: &LockRequest) -> std::result::Result<(), TransportFailure> {
            Ok(())
        }
    }

    fn session(config: MountConfig, gate: &Arc<Gate>) -> Arc<MountSession> {
        let stats = Arc::new(StatsRegistry::new());
        let locks = Arc::new(LockCoordinator::new(Arc::new(NoLocks), stats.clone()));
        Arc::new(
            MountSession::new(
                config,
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                gate.clone(),
                locks,
                stats,
            )
            .unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_workers_bound_concurrency() {
        let gate = Gate::new(false);
        let dispatcher = Arc::new(Dispatcher::start(
            session(MountConfig::default(), &gate),
            4,
        ));
        let mut calls = Vec::new();
        for _ in 0..32 {
            let d = dispatcher.clone();
            calls.push(tokio::spawn(async move {
                d.submit(Operation::new(NfsOp::Read)).await
            }));
        }
        for c in calls {
            assert!(c.await.unwrap().is_ok());
        }
        assert_eq!(gate.calls.load(Ordering::SeqCst), 32);
        assert!(gate.peak.load(Ordering::SeqCst) <= 4);
        assert_eq!(dispatcher.stats().completed, 32);
        dispatcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_applies_backpressure() {
        let gate = Gate::new(true);
        let dispatcher = Arc::new(Dispatcher::with_capacity(
            session(MountConfig::default(), &gate),
            1,
            1,
        ));
        let first = {
            let d = dispatcher.clone();
            tokio::spawn(async move { d.submit(Operation::new(NfsOp::Read)).await })
        };
        let second = {
            let d = dispatcher.clone();
            tokio::spawn(async move { d.submit(Operation::new(NfsOp::Read)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(dispatcher.queued(), 1);

        let third = tokio::time::timeout(
            Duration::from_millis(100),
            dispatcher.submit(Operation::new(NfsOp::Read)),
        )
        .await;
        assert!(third.is_err(), "queue full, submit must wait");

        dispatcher.shutdown().await;
        assert_eq!(first.await.unwrap(), Err(ClientError::Cancelled));
        assert_eq!(second.await.unwrap(), Err(ClientError::Cancelled));
        assert_eq!(dispatcher.stats().cancelled, 1);
        assert_eq!(
            dispatcher.submit(Operation::new(NfsOp::Read)).await,
            Err(ClientError::Cancelled)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_declares_dead() {
        let gate = Gate::new(true);
        let config = MountConfig {
            flags: Some(MountFlags::empty().with(MountFlag::Soft)),
            soft_retry_count: Some(1),
            dead_timeout: Some(Duration::from_secs(20)),
            ..Default::default()
        };
        let s = session(config, &gate);
        let dispatcher = Dispatcher::start(s.clone(), 2);

        let err = dispatcher
            .submit(Operation::new(NfsOp::GetAttr))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(s.state(), MountState::Unresponsive);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(s.state(), MountState::Dead);
        let calls = gate.calls.load(Ordering::SeqCst);
        assert_eq!(
            dispatcher.submit(Operation::new(NfsOp::GetAttr)).await,
            Err(ClientError::MountDead)
        );
        assert_eq!(gate.calls.load(Ordering::SeqCst), calls);
        dispatcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmount_stops_dispatcher() {
        let gate = Gate::new(false);
        let s = session(MountConfig::default(), &gate);
        let dispatcher = Dispatcher::start(s.clone(), 2);
        dispatcher
            .submit(Operation::new(NfsOp::GetAttr))
            .await
            .unwrap();
        s.unmount().await;
        assert!(!dispatcher.is_running());
        assert_eq!(
            dispatcher.submit(Operation::new(NfsOp::GetAttr)).await,
            Err(ClientError::Cancelled)
        );
    }
}
