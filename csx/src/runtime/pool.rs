//! The persistent worker pool.
//!
//! N−1 pinned workers plus the calling thread rendezvous on a pair of
//! centralized sense-reversing barriers. The main thread publishes the
//! job descriptor, toggles the start barrier, executes its own share as
//! worker 0 and waits on the end barrier. Teardown raises `work_done`
//! and toggles the start barrier once more to release the workers.

use std::cell::{Cell, UnsafeCell};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::debug;

use crate::mt::{run_job, SpmvJob};
use crate::runtime::affinity::set_affinity;

pub(crate) struct PoolShared {
    cnt: AtomicUsize,
    sense: AtomicBool,
    work_done: AtomicBool,
    nr_threads: usize,
    job: UnsafeCell<Option<SpmvJob>>,
}

// The job slot is written by the main thread strictly before the start
// barrier and read by workers strictly after it.
unsafe impl Sync for PoolShared {}

/// Every participant toggles its local sense; the last arrival resets
/// the count and publishes the new global sense, releasing the spinners.
pub(crate) fn central_barrier(shared: &PoolShared, local_sense: &mut bool) {
    *local_sense = !*local_sense;
    if shared.cnt.fetch_sub(1, Ordering::AcqRel) == 1 {
        shared.cnt.store(shared.nr_threads, Ordering::Relaxed);
        shared.sense.store(*local_sense, Ordering::Release);
    } else {
        while shared.sense.load(Ordering::Acquire) != *local_sense {
            std::hint::spin_loop();
        }
    }
}

/// Handle a job body uses to hit the mid-job rendezvous (the symmetric
/// reduction barrier).
pub struct BarrierCtx<'a> {
    shared: &'a PoolShared,
    local_sense: &'a mut bool,
}

impl BarrierCtx<'_> {
    pub fn wait(&mut self) {
        central_barrier(self.shared, self.local_sense);
    }
}

pub struct ThreadPool {
    shared: Arc<PoolShared>,
    handles: Vec<JoinHandle<()>>,
    /// The main thread's barrier sense.
    local_sense: Cell<bool>,
}

impl ThreadPool {
    /// Spawns one pinned worker per CPU in `cpus[1..]`; the caller
    /// participates as worker 0 and is expected to be pinned to
    /// `cpus[0]` already.
    pub fn new(cpus: &[usize]) -> ThreadPool {
        let nr_threads = cpus.len();
        let shared = Arc::new(PoolShared {
            cnt: AtomicUsize::new(nr_threads),
            sense: AtomicBool::new(true),
            work_done: AtomicBool::new(false),
            nr_threads,
            job: UnsafeCell::new(None),
        });

        let mut handles = Vec::with_capacity(nr_threads.saturating_sub(1));
        for (tid, &cpu) in cpus.iter().enumerate().skip(1) {
            let shared = Arc::clone(&shared);
            handles.push(std::thread::spawn(move || worker_loop(shared, tid, cpu)));
        }

        let pool = ThreadPool {
            shared,
            handles,
            local_sense: Cell::new(true),
        };
        // Rendezvous with the freshly spawned workers.
        pool.barrier();
        debug!("thread pool up with {nr_threads} threads");
        pool
    }

    pub fn nr_threads(&self) -> usize {
        self.shared.nr_threads
    }

    fn barrier(&self) {
        let mut sense = self.local_sense.get();
        central_barrier(&self.shared, &mut sense);
        self.local_sense.set(sense);
    }

    /// Dispatches one SpMV: publishes the descriptor, releases the
    /// workers, executes partition 0 inline, and waits for everyone.
    pub(crate) fn run(&self, job: SpmvJob) {
        unsafe {
            *self.shared.job.get() = Some(job);
        }
        self.barrier(); // start

        let mut sense = self.local_sense.get();
        {
            let mut ctx = BarrierCtx {
                shared: &self.shared,
                local_sense: &mut sense,
            };
            run_job(&job, 0, &mut ctx);
        }
        self.local_sense.set(sense);

        self.barrier(); // end
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shared.work_done.store(true, Ordering::Release);
        self.barrier();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(shared: Arc<PoolShared>, tid: usize, cpu: usize) {
    set_affinity(cpu);
    let mut local_sense = true;
    central_barrier(&shared, &mut local_sense); // startup rendezvous

    loop {
        central_barrier(&shared, &mut local_sense); // start
        if shared.work_done.load(Ordering::Acquire) {
            break;
        }

        let job = unsafe { (*shared.job.get()).expect("job not set") };
        {
            let mut ctx = BarrierCtx {
                shared: &shared,
                local_sense: &mut local_sense,
            };
            run_job(&job, tid, &mut ctx);
        }
        central_barrier(&shared, &mut local_sense); // end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_starts_and_stops() {
        // Spin up and tear down without dispatching.
        let pool = ThreadPool::new(&[0, 0, 0]);
        assert_eq!(pool.nr_threads(), 3);
        drop(pool);
    }

    #[test]
    fn test_single_thread_pool() {
        let pool = ThreadPool::new(&[0]);
        assert_eq!(pool.nr_threads(), 1);
    }
}
