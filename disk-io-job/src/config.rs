/// Tunables of one [`System`](crate::System).
///
/// [`Config::default`] reads the `DISK_IO_JOB_*` environment variables, see
/// [`crate::env_tunables`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Job slots allocated up front.
    pub initial_pool_capacity: usize,
    /// Upper bound on job slots; `None` grows without limit.
    pub max_pool_capacity: Option<usize>,
    /// Handlers run per [`dispatch_ready`](crate::SystemHandle::dispatch_ready)
    /// call; 0 runs everything that is ready.
    pub dispatch_batch: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            initial_pool_capacity: *crate::env_tunables::INITIAL_POOL_CAPACITY,
            max_pool_capacity: *crate::env_tunables::MAX_POOL_CAPACITY,
            dispatch_batch: *crate::env_tunables::DISPATCH_BATCH,
        }
    }
}
