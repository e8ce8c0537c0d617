use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use scantrack_core::{Frame, FrameSize, RigidTransform};
use scantrack_icp::{
    sampled_capacity, PointToPointIcp, RegistrationConfig, RegistrationStrategy,
    RegistrationWorker,
};

use crate::RegistrationResult;

/// A unit of work handed to one worker slot.
#[derive(Debug, Clone)]
pub struct RegistrationJob {
    /// Slot the job is assigned to.
    pub slot: usize,
    /// The newly submitted frame.
    pub target: Frame,
    /// The frame submitted right before it, `None` for the first one.
    pub source: Option<Frame>,
}

/// Completion message of a worker slot.
#[derive(Debug, Clone)]
pub struct WorkerDone {
    /// Slot that finished.
    pub slot: usize,
    /// The registered frame and its transform.
    pub result: RegistrationResult,
}

/// An error type for handing jobs to a pool.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum DispatchError {
    /// The slot index is not part of the pool.
    #[error("Unknown worker slot {0}")]
    UnknownSlot(usize),

    /// The worker behind the slot is gone.
    #[error("Worker {0} is disconnected")]
    Disconnected(usize),
}

/// A fixed set of registration workers addressed by slot index.
///
/// Jobs go out through [`WorkerPool::dispatch`], completions come back
/// through [`WorkerPool::try_recv`] / [`WorkerPool::recv`]. All methods are
/// called from the controller's thread only.
pub trait WorkerPool {
    /// Number of slots, fixed for the lifetime of the pool.
    fn num_workers(&self) -> usize;

    /// Start a job on `job.slot`. The slot must be idle.
    fn dispatch(&mut self, job: RegistrationJob) -> Result<(), DispatchError>;

    /// Next completion if one is ready, without blocking.
    fn try_recv(&mut self) -> Option<WorkerDone>;

    /// Block until the next completion, `None` when none can arrive any more.
    fn recv(&mut self) -> Option<WorkerDone>;

    /// Stop every worker and wait until all of them have exited.
    fn shutdown(&mut self);
}

/// Worker pool with one OS thread per slot.
pub struct ThreadedPool {
    job_txs: Vec<Sender<RegistrationJob>>,
    done_rx: Receiver<WorkerDone>,
    handles: Vec<JoinHandle<()>>,
}

impl ThreadedPool {
    /// Start `num_workers` threads running point-to-point ICP.
    pub fn new(num_workers: usize, size: FrameSize, config: &RegistrationConfig) -> Self {
        let icp = config.icp.clone();
        let capacity = sampled_capacity(size, config.downsample_stride);
        Self::with_strategy(num_workers, size, config, move |_| {
            PointToPointIcp::with_capacity(icp.clone(), capacity)
        })
    }

    /// Start `num_workers` threads, each owning the backend built by `make_strategy(slot)`.
    ///
    /// If a thread cannot be spawned the pool keeps the workers started so far.
    pub fn with_strategy<S, F>(
        num_workers: usize,
        size: FrameSize,
        config: &RegistrationConfig,
        mut make_strategy: F,
    ) -> Self
    where
        S: RegistrationStrategy + 'static,
        F: FnMut(usize) -> S,
    {
        let (done_tx, done_rx) = unbounded::<WorkerDone>();
        let mut job_txs = Vec::with_capacity(num_workers);
        let mut handles = Vec::with_capacity(num_workers);

        for slot in 0..num_workers {
            // a slot only ever holds one job
            let (job_tx, job_rx) = bounded::<RegistrationJob>(1);
            let worker = RegistrationWorker::with_strategy(size, config.clone(), make_strategy(slot));
            let done_tx = done_tx.clone();

            let spawned = thread::Builder::new()
                .name(format!("scantrack-worker-{slot}"))
                .spawn(move || run_worker(slot, worker, job_rx, done_tx));

            match spawned {
                Ok(handle) => {
                    job_txs.push(job_tx);
                    handles.push(handle);
                }
                Err(e) => {
                    log::error!("failed to spawn registration worker {slot}: {e}");
                    break;
                }
            }
        }

        log::debug!("started {} registration workers", handles.len());

        Self {
            job_txs,
            done_rx,
            handles,
        }
    }
}

impl WorkerPool for ThreadedPool {
    fn num_workers(&self) -> usize {
        self.job_txs.len()
    }

    fn dispatch(&mut self, job: RegistrationJob) -> Result<(), DispatchError> {
        let slot = job.slot;
        let job_tx = self
            .job_txs
            .get(slot)
            .ok_or(DispatchError::UnknownSlot(slot))?;
        job_tx
            .send(job)
            .map_err(|_| DispatchError::Disconnected(slot))
    }

    fn try_recv(&mut self) -> Option<WorkerDone> {
        self.done_rx.try_recv().ok()
    }

    fn recv(&mut self) -> Option<WorkerDone> {
        self.done_rx.recv().ok()
    }

    fn shutdown(&mut self) {
        // closing the job channels ends the worker loops after their current job
        self.job_txs.clear();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                log::error!("registration worker exited with a panic");
            }
        }
    }
}

impl Drop for ThreadedPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker<S: RegistrationStrategy>(
    slot: usize,
    mut worker: RegistrationWorker<S>,
    jobs: Receiver<RegistrationJob>,
    done: Sender<WorkerDone>,
) {
    log::debug!("registration worker {slot} started");

    for job in jobs.iter() {
        let RegistrationJob { target, source, .. } = job;

        let transform = match &source {
            Some(source) => {
                panic::catch_unwind(AssertUnwindSafe(|| worker.register(&target, source)))
                    .unwrap_or_else(|_| {
                        log::error!(
                            "registration of frame {} panicked on worker {slot}, using identity",
                            target.timestamp_ms()
                        );
                        RigidTransform::IDENTITY
                    })
            }
            None => RigidTransform::IDENTITY,
        };

        let result = RegistrationResult {
            frame: target,
            transform,
        };
        if done.send(WorkerDone { slot, result }).is_err() {
            break;
        }
    }

    log::debug!("registration worker {slot} stopped");
}
