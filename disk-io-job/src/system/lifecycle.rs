use std::{
    collections::HashMap,
    sync::{atomic::AtomicUsize, Arc, Mutex},
};

use tokio::sync::{mpsc, Notify};
use tracing::info;

pub mod handle;

use super::{
    completion::Dispatcher, lifecycle::handle::SystemHandle, pool::JobPool, queue::WaitQueue,
    worker::WorkerHandle, Inner, Shared, State,
};
use crate::{
    config::Config,
    metrics::{self, JobMetricsStorage},
};

/// A disk I/O job system. Use [`Self::launch`] to start one.
///
/// The system itself runs no threads. Jobs are executed by whatever drives the
/// returned [`WorkerHandle`], e.g. a [`WorkerPool`](crate::WorkerPool), and
/// handlers run wherever the [`SystemHandle`] dispatches completions.
pub struct System {
    _private: (),
}

static SYSTEM_ID: AtomicUsize = AtomicUsize::new(0);

impl System {
    /// Creates a system and returns its producer side and its worker side.
    pub fn launch(config: Config) -> (SystemHandle, WorkerHandle) {
        let id = SYSTEM_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let Config {
            initial_pool_capacity,
            max_pool_capacity,
            dispatch_batch,
        } = config;

        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let work_available = Arc::new(Notify::new());
        let metrics = Arc::new(JobMetricsStorage::default());
        let inner = Inner {
            state: State::Running,
            pool: JobPool::new(initial_pool_capacity, max_pool_capacity),
            execution: WaitQueue::new(),
            fences: HashMap::new(),
            executing: 0,
            completions: completions_tx,
            work_available: Arc::clone(&work_available),
            metrics: Arc::clone(&metrics),
        };
        let shared = Arc::new(Shared {
            id,
            inner: Mutex::new(inner),
            work_available,
            metrics,
        });
        metrics::inc(&metrics::GLOBAL.systems_created);
        info!(
            system = id,
            initial_pool_capacity,
            ?max_pool_capacity,
            dispatch_batch,
            "launched disk io job system"
        );

        let dispatcher = Dispatcher::new(Arc::clone(&shared), completions_rx, dispatch_batch);
        let worker = WorkerHandle {
            shared: Arc::clone(&shared),
        };
        (SystemHandle::new(shared, dispatcher), worker)
    }
}
