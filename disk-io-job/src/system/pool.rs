//! Slab of job descriptors.
//!
//! [`JobPool`] serves the following purposes:
//!
//! - Keep every submitted [`Job`] in a reusable slot so that issuing a job does
//!   not allocate once the pool has warmed up.
//! - Track where each job is in its life cycle (resident, executing, completed,
//!   dispatching) and refuse transitions that would break the single-owner
//!   discipline.
//! - Provide the per-slot `next` link that [`WaitQueue`](super::queue::WaitQueue)
//!   threads its lists through. While a slot is free, the same link chains the
//!   free list.
//!
//! Slots are addressed by [`JobHandle`], an index plus a generation counter.
//! The generation is bumped on every free, so a handle that outlived its job is
//! detected on use, in release builds too.

use tracing::trace;

use crate::{error::SystemError, job::Job};

/// Generation-checked reference to a pooled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobHandle {
    index: u32,
    generation: u32,
}

impl JobHandle {
    pub(crate) fn index(&self) -> u32 {
        self.index
    }
}

pub(crate) enum SlotState {
    Free,
    /// Owned by the pool: waiting to be admitted, queued for execution, or
    /// parked behind a fence.
    Resident(Job),
    /// Moved out to a worker.
    Executing,
    /// Result recorded, posted to the completion channel.
    Completed(Job),
    /// Handler is running on the submitter side.
    Dispatching,
}

impl SlotState {
    fn discriminant_str(&self) -> &'static str {
        match self {
            SlotState::Free => "Free",
            SlotState::Resident(_) => "Resident",
            SlotState::Executing => "Executing",
            SlotState::Completed(_) => "Completed",
            SlotState::Dispatching => "Dispatching",
        }
    }
}

/// Life cycle checkpoints. Only inspected by debug assertions and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotChecks {
    pub in_use: bool,
    /// Member of a wait queue.
    pub linked: bool,
    /// Parked behind a storage fence.
    pub blocked: bool,
    pub posted_once: bool,
    pub handler_called_once: bool,
}

struct Slot {
    generation: u32,
    next: Option<u32>,
    state: SlotState,
    checks: SlotChecks,
}

pub(crate) struct JobPool {
    slots: Vec<Slot>,
    free_head: Option<u32>,
    in_use: usize,
    max_capacity: Option<usize>,
}

impl JobPool {
    /// Creates a pool with `initial_capacity` slots already allocated. With a
    /// `max_capacity`, [`Self::allocate`] fails instead of growing past it.
    pub(crate) fn new(initial_capacity: usize, max_capacity: Option<usize>) -> Self {
        let mut pool = JobPool {
            slots: Vec::with_capacity(initial_capacity),
            free_head: None,
            in_use: 0,
            max_capacity,
        };
        for _ in 0..initial_capacity {
            pool.grow_one();
        }
        pool
    }

    fn grow_one(&mut self) -> u32 {
        let index = u32::try_from(self.slots.len()).expect("more than u32::MAX job slots");
        self.slots.push(Slot {
            generation: 0,
            next: self.free_head,
            state: SlotState::Free,
            checks: SlotChecks::default(),
        });
        self.free_head = Some(index);
        index
    }

    pub(crate) fn in_use(&self) -> usize {
        self.in_use
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Parks `job` in an unused slot.
    ///
    /// Fails only if the pool is at its configured maximum or the slab cannot
    /// grow; the job is handed back in that case.
    pub(crate) fn allocate(&mut self, job: Job) -> Result<JobHandle, (Job, SystemError)> {
        let index = match self.free_head {
            Some(index) => index,
            None => {
                let at_limit = self.max_capacity.is_some_and(|max| self.slots.len() >= max);
                if at_limit || self.slots.try_reserve(1).is_err() {
                    return Err((
                        job,
                        SystemError::PoolExhausted {
                            capacity: self.slots.len(),
                        },
                    ));
                }
                self.grow_one()
            }
        };
        let slot = &mut self.slots[index as usize];
        assert!(
            matches!(slot.state, SlotState::Free),
            "implementation error: free list points at a {} slot",
            slot.state.discriminant_str()
        );
        self.free_head = slot.next.take();
        slot.state = SlotState::Resident(job);
        slot.checks = SlotChecks {
            in_use: true,
            ..SlotChecks::default()
        };
        self.in_use += 1;
        trace!(index, generation = slot.generation, "allocated job slot");
        Ok(JobHandle {
            index,
            generation: slot.generation,
        })
    }

    /// Returns the slot of a dispatched job to the pool.
    ///
    /// The job must have had its handler called and must not be linked into
    /// any queue; anything else is an implementation error.
    pub(crate) fn free(&mut self, handle: JobHandle) {
        let free_head = self.free_head;
        let slot = self.slot_mut(handle);
        match slot.state {
            SlotState::Dispatching => {}
            ref other => panic!(
                "implementation error: freeing a {} job slot",
                other.discriminant_str()
            ),
        }
        debug_assert!(slot.checks.handler_called_once);
        debug_assert!(!slot.checks.linked, "freeing a job that is still queued");
        slot.state = SlotState::Free;
        slot.checks = SlotChecks::default();
        slot.generation = slot.generation.wrapping_add(1);
        slot.next = free_head;
        self.free_head = Some(handle.index);
        self.in_use -= 1;
    }

    /// Whether `handle` still refers to a live job.
    pub(crate) fn contains(&self, handle: JobHandle) -> bool {
        self.slots
            .get(handle.index as usize)
            .is_some_and(|slot| {
                slot.generation == handle.generation && !matches!(slot.state, SlotState::Free)
            })
    }

    #[cfg(test)]
    pub(crate) fn checks(&self, handle: JobHandle) -> SlotChecks {
        self.slot(handle).checks
    }

    /// The job, while it is resident or completed.
    #[cfg(test)]
    pub(crate) fn get(&self, handle: JobHandle) -> Option<&Job> {
        match &self.slot(handle).state {
            SlotState::Resident(job) | SlotState::Completed(job) => Some(job),
            _ => None,
        }
    }

    /// The job, while it is still owned by the pool and not yet finished.
    pub(crate) fn resident_mut(&mut self, handle: JobHandle) -> Option<&mut Job> {
        match &mut self.slot_mut(handle).state {
            SlotState::Resident(job) => Some(job),
            _ => None,
        }
    }

    /// Iterates over all resident jobs, e.g. to abort those of one storage.
    pub(crate) fn resident_jobs_mut(&mut self) -> impl Iterator<Item = &mut Job> {
        self.slots.iter_mut().filter_map(|slot| match &mut slot.state {
            SlotState::Resident(job) => Some(job),
            _ => None,
        })
    }

    pub(crate) fn set_blocked(&mut self, handle: JobHandle, blocked: bool) {
        self.slot_mut(handle).checks.blocked = blocked;
    }

    /// Resident -> Executing: moves the job out to a worker.
    pub(crate) fn take_for_execution(&mut self, handle: JobHandle) -> Job {
        let slot = self.slot_mut(handle);
        debug_assert!(!slot.checks.linked, "executing a job that is still queued");
        match std::mem::replace(&mut slot.state, SlotState::Executing) {
            SlotState::Resident(job) => job,
            other => panic!(
                "implementation error: executing a {} job",
                other.discriminant_str()
            ),
        }
    }

    /// Executing -> Completed: the worker hands the job back.
    pub(crate) fn put_completed(&mut self, handle: JobHandle, job: Job) {
        let slot = self.slot_mut(handle);
        match slot.state {
            SlotState::Executing => {}
            ref other => panic!(
                "implementation error: completing a {} job",
                other.discriminant_str()
            ),
        }
        slot.state = SlotState::Completed(job);
        slot.mark_posted();
    }

    /// Resident -> Completed, without ever executing.
    pub(crate) fn complete_resident(&mut self, handle: JobHandle) {
        let slot = self.slot_mut(handle);
        debug_assert!(!slot.checks.linked, "fast-failing a job that is still queued");
        match std::mem::replace(&mut slot.state, SlotState::Dispatching) {
            SlotState::Resident(job) => slot.state = SlotState::Completed(job),
            other => panic!(
                "implementation error: fast-failing a {} job",
                other.discriminant_str()
            ),
        }
        slot.mark_posted();
    }

    /// Completed -> Dispatching: the dispatcher takes the job to call its handler.
    pub(crate) fn take_for_dispatch(&mut self, handle: JobHandle) -> Job {
        let slot = self.slot_mut(handle);
        match std::mem::replace(&mut slot.state, SlotState::Dispatching) {
            SlotState::Completed(job) => {
                debug_assert!(!slot.checks.handler_called_once, "handler called twice");
                slot.checks.handler_called_once = true;
                job
            }
            other => panic!(
                "implementation error: dispatching a {} job",
                other.discriminant_str()
            ),
        }
    }

    pub(crate) fn next(&self, index: u32) -> Option<u32> {
        self.slots[index as usize].next
    }

    pub(crate) fn link(&mut self, index: u32, next: Option<u32>) {
        let slot = &mut self.slots[index as usize];
        debug_assert!(
            matches!(slot.state, SlotState::Resident(_)),
            "only resident jobs can be queued"
        );
        slot.next = next;
    }

    pub(crate) fn set_linked(&mut self, index: u32, linked: bool) {
        let checks = &mut self.slots[index as usize].checks;
        debug_assert_ne!(
            checks.linked, linked,
            "job is already {} a queue",
            if linked { "in" } else { "out of" }
        );
        checks.linked = linked;
    }

    pub(crate) fn handle_at(&self, index: u32) -> JobHandle {
        JobHandle {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    fn slot(&self, handle: JobHandle) -> &Slot {
        let slot = &self.slots[handle.index as usize];
        assert_eq!(
            slot.generation, handle.generation,
            "stale job handle {handle:?}"
        );
        slot
    }

    fn slot_mut(&mut self, handle: JobHandle) -> &mut Slot {
        let slot = &mut self.slots[handle.index as usize];
        assert_eq!(
            slot.generation, handle.generation,
            "stale job handle {handle:?}"
        );
        slot
    }
}

impl Slot {
    fn mark_posted(&mut self) {
        debug_assert!(!self.checks.posted_once, "job completed twice");
        self.checks.posted_once = true;
    }
}

impl std::fmt::Debug for JobPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut by_state = std::collections::BTreeMap::new();
        for slot in &self.slots {
            *by_state.entry(slot.state.discriminant_str()).or_insert(0usize) += 1;
        }
        f.debug_struct("JobPool")
            .field("capacity", &self.slots.len())
            .field("in_use", &self.in_use)
            .field("by_state", &by_state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_panic::assert_panic;

    use super::*;
    use crate::{
        job::{JobResult, PieceIndex},
        storage::{Storage, StorageId},
    };

    fn job() -> Job {
        let storage: Arc<Storage> = Storage::new(StorageId(0), "/tmp", 1);
        Job::hash(storage, PieceIndex(0), |_, _| {})
    }

    /// Drives a slot through the whole life cycle without a system around it.
    fn run_to_dispatch(pool: &mut JobPool, handle: JobHandle) {
        let mut job = pool.take_for_execution(handle);
        job.set_result(JobResult::aborted());
        pool.put_completed(handle, job);
        let job = pool.take_for_dispatch(handle);
        job.call_handler();
    }

    #[test]
    fn reuses_freed_slots() {
        let mut pool = JobPool::new(2, None);
        assert_eq!(pool.capacity(), 2);
        let a = pool.allocate(job()).unwrap();
        let b = pool.allocate(job()).unwrap();
        assert_eq!(pool.in_use(), 2);
        run_to_dispatch(&mut pool, a);
        pool.free(a);
        assert!(!pool.contains(a));
        let c = pool.allocate(job()).unwrap();
        // same slot, new generation
        assert_eq!(c.index(), a.index());
        assert_ne!(c, a);
        assert!(pool.contains(b) && pool.contains(c));
        assert_eq!(pool.capacity(), 2);
    }

    #[test]
    fn grows_until_max_capacity() {
        let mut pool = JobPool::new(0, Some(2));
        pool.allocate(job()).unwrap();
        pool.allocate(job()).unwrap();
        let (job, err) = pool.allocate(job()).unwrap_err();
        assert_eq!(err, SystemError::PoolExhausted { capacity: 2 });
        assert_eq!(job.action(), crate::job::JobAction::Hash);
    }

    #[test]
    fn lifecycle_checks_are_recorded() {
        let mut pool = JobPool::new(1, None);
        let h = pool.allocate(job()).unwrap();
        assert_eq!(
            pool.checks(h),
            SlotChecks {
                in_use: true,
                ..Default::default()
            }
        );
        let mut job = pool.take_for_execution(h);
        job.set_result(JobResult::ok());
        pool.put_completed(h, job);
        assert!(pool.checks(h).posted_once);
        assert!(pool.get(h).is_some());
        let _job = pool.take_for_dispatch(h);
        assert!(pool.checks(h).handler_called_once);
    }

    #[test]
    #[should_panic(expected = "stale job handle")]
    fn stale_handle_is_rejected() {
        let mut pool = JobPool::new(1, None);
        let h = pool.allocate(job()).unwrap();
        run_to_dispatch(&mut pool, h);
        pool.free(h);
        pool.checks(h);
    }

    #[test]
    fn free_before_dispatch_is_rejected() {
        assert_panic!(
            {
                let mut pool = JobPool::new(1, None);
                let h = pool.allocate(job()).unwrap();
                pool.free(h);
            },
            String,
            starts with "implementation error: freeing a Resident job slot"
        );
    }

    #[test]
    fn double_execution_is_rejected() {
        assert_panic!(
            {
                let mut pool = JobPool::new(1, None);
                let h = pool.allocate(job()).unwrap();
                let _job = pool.take_for_execution(h);
                pool.take_for_execution(h);
            },
            String,
            starts with "implementation error: executing a Executing job"
        );
    }
}
