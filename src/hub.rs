//! The hub: single shared dispatch context for completion callbacks.
//!
//! ```text
//!  post(job) ──▶ ┌───────────────────┐  recv()  ┌───────────────┐
//!  post(job) ──▶ │ unbounded channel │ ───────▶ │ consumer task │──▶ job()
//!  post(job) ──▶ └───────────────────┘          └───────────────┘
//! ```
//!
//! Jobs are plain closures run to completion one after another by a single
//! consumer task, so two hub jobs never interleave. Everything lives on one
//! `edge_executor::LocalExecutor`; the hub also hands out that executor's
//! spawn capability to the rest of the core.
//!
//! The queue is unbounded: a job is a reply waiting to be built, and
//! `post` is called from synchronous completion paths that cannot wait for
//! room.

use core::future::Future;
use std::rc::Rc;

use async_channel::{Receiver, Sender};
use edge_executor::LocalExecutor;
use log::{debug, error};

/// Work item run on the hub.
pub type Job = Box<dyn FnOnce()>;

/// Executor shared by every task of one server.
pub type Executor = LocalExecutor<'static>;

pub struct Hub {
    executor: Rc<Executor>,
    jobs: Sender<Job>,
}

impl Hub {
    /// Create the hub and spawn its consumer on `executor`.
    pub fn start(executor: Rc<Executor>) -> Rc<Self> {
        let (jobs, queue) = async_channel::unbounded();
        let hub = Rc::new(Self { executor, jobs });
        hub.spawn(drain(queue));
        hub
    }

    /// Queue `job` behind every job already posted.
    pub fn post(&self, job: impl FnOnce() + 'static) {
        if self.jobs.try_send(Box::new(job)).is_err() {
            error!("hub: consumer is gone, job dropped");
        }
    }

    /// Run `fut` as an independent task on the shared executor.
    pub fn spawn(&self, fut: impl Future<Output = ()> + 'static) {
        self.executor.spawn(fut).detach();
    }

    pub fn executor(&self) -> &Rc<Executor> {
        &self.executor
    }

    /// Jobs posted but not yet run.
    pub fn pending(&self) -> usize {
        self.jobs.len()
    }
}

/// Consumer: runs jobs in post order until the hub is dropped.
async fn drain(queue: Receiver<Job>) {
    debug!("hub: consumer running");
    while let Ok(job) = queue.recv().await {
        job();
    }
    debug!("hub: consumer stopped");
}
