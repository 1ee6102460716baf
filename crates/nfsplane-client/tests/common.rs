//! Scripted collaborators shared by the client integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use nfsplane_client::lockd::LOCKD_ANS_RECLAIM;
use nfsplane_client::{
    LockAnswer, LockCoordinator, LockRequest, LockService, RpcReply, RpcRequest, RpcTransport,
    TransportFailure,
};
use parking_lot::Mutex;

/// What the scripted server does with the next call.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    /// Reply with this status
    Reply(u32),
    /// Never reply
    Hang,
    /// Drop the connection
    Reset,
}

/// Transport that plays back a script, then answers NFS_OK.
#[derive(Default)]
pub struct ScriptedServer {
    steps: Mutex<VecDeque<Step>>,
    pub calls: AtomicUsize,
    pub reestablished: AtomicUsize,
    /// The next `reestablish` never completes
    pub stall_reestablish: AtomicBool,
    pub seen: Mutex<Vec<RpcRequest>>,
}

impl ScriptedServer {
    pub fn new(steps: &[Step]) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.iter().copied().collect()),
            ..Default::default()
        })
    }

    pub fn push(&self, step: Step) {
        self.steps.lock().push_back(step);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RpcTransport for ScriptedServer {
    async fn call(&self, request: RpcRequest) -> Result<RpcReply, TransportFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(request);
        let step = self.steps.lock().pop_front().unwrap_or(Step::Reply(0));
        match step {
            Step::Reply(status) => Ok(RpcReply::status(status)),
            Step::Hang => std::future::pending().await,
            Step::Reset => Err(TransportFailure::ConnectionReset),
        }
    }

    async fn reestablish(&self) -> Result<(), TransportFailure> {
        self.reestablished.fetch_add(1, Ordering::SeqCst);
        if self.stall_reestablish.swap(false, Ordering::SeqCst) {
            return std::future::pending().await;
        }
        Ok(())
    }
}

/// Lock service that answers from a spawned task, like an external daemon.
///
/// Requests from owner pid 666 are denied; everything else is granted.
/// While `silent` is set requests are recorded but never answered.
pub struct AnsweringLockd {
    coordinator: Mutex<Weak<LockCoordinator>>,
    pub sent: Mutex<Vec<LockRequest>>,
    pub silent: AtomicBool,
}

impl AnsweringLockd {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            coordinator: Mutex::new(Weak::new()),
            sent: Mutex::new(Vec::new()),
            silent: AtomicBool::new(false),
        })
    }

    pub fn attach(&self, coordinator: &Arc<LockCoordinator>) {
        *self.coordinator.lock() = Arc::downgrade(coordinator);
    }
}

#[async_trait]
impl LockService for AnsweringLockd {
    async fn send(&self, request: &LockRequest) -> Result<(), TransportFailure> {
        self.sent.lock().push(request.clone());
        if self.silent.load(Ordering::SeqCst) {
            return Ok(());
        }
        let coordinator = self.coordinator.lock().upgrade();
        let Some(coordinator) = coordinator else {
            return Err(TransportFailure::ConnectionReset);
        };
        let mut answer = if request.owner_pid == 666 {
            let mut denied = LockAnswer::denied(request.xid, 35);
            denied.pid = 1;
            denied.start = request.start;
            denied.len = request.len;
            denied
        } else {
            LockAnswer::granted(request.xid)
        };
        if request.reclaim {
            answer.flags = answer.flags.with(LOCKD_ANS_RECLAIM);
        }
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            coordinator.resolve(answer);
        });
        Ok(())
    }
}

pub fn server_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(192, 168, 10, 2))
}
