use std::collections::VecDeque;

use scantrack_core::{Frame, FrameSize, RigidTransform};
use scantrack_icp::{RegistrationConfig, RegistrationStrategy};

use crate::{
    FrameSink, RegistrationJob, RegistrationResult, ThreadedPool, TrackedFrame, TrackingConfig,
    TrackingOutput, WorkerDone, WorkerPool,
};

/// Counters describing the activity of a [`TrackingController`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackingStats {
    /// Frames handed to [`TrackingController::submit`].
    pub submitted: u64,
    /// Registration jobs started on a worker.
    pub dispatched: u64,
    /// Frames that had to wait for an idle worker.
    pub queued: u64,
    /// Frames forwarded without registration.
    pub passed_through: u64,
    /// Registered frames emitted downstream.
    pub released: u64,
    /// Jobs the pool refused, completed with the identity instead.
    pub dispatch_failures: u64,
    /// Highest number of simultaneously busy workers.
    pub peak_in_flight: usize,
    /// Longest the wait queue has been.
    pub peak_queue_len: usize,
}

/// Position of a frame in the output order.
///
/// Frames sharing a timestamp keep their submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct OrderKey {
    timestamp_ms: u64,
    sequence: u64,
}

#[derive(Debug)]
struct InFlight {
    key: OrderKey,
    frame: Frame,
}

#[derive(Debug)]
struct Pending {
    key: OrderKey,
    result: RegistrationResult,
}

/// Spreads frame-to-frame registration over a pool of workers and hands the
/// results downstream in timestamp order.
///
/// Every valid frame is registered against the frame submitted right before
/// it. A result is released only once no earlier frame is still being
/// registered or waiting for a worker, so the sink always sees registered
/// frames in chronological order. Invalid frames skip registration and are
/// forwarded immediately.
///
/// A controller without workers, e.g. one created for a zero sized frame, is
/// in null mode: [`TrackingController::is_null`] is true and every submitted
/// frame is forwarded as is.
///
/// All methods run on the caller's thread; only the registration itself runs
/// on the pool. Dropping the controller stops and joins the pool, anything
/// not yet released is discarded.
pub struct TrackingController<K: FrameSink, P: WorkerPool = ThreadedPool> {
    pool: P,
    sink: K,
    slots: Vec<Option<InFlight>>,
    wait_queue: VecDeque<(OrderKey, Frame)>,
    pending: VecDeque<Pending>,
    deferred: VecDeque<WorkerDone>,
    previous: Option<Frame>,
    pose: RigidTransform,
    next_sequence: u64,
    stats: TrackingStats,
}

impl<K: FrameSink> TrackingController<K, ThreadedPool> {
    /// Create a controller running point-to-point ICP on a threaded pool.
    ///
    /// # Arguments
    ///
    /// * `size` - Grid size of every frame that will be submitted. An empty
    ///   size creates a null controller.
    /// * `config` - Pool size and registration parameters.
    /// * `sink` - Receives the tracked and forwarded frames.
    pub fn new(size: FrameSize, config: &TrackingConfig, sink: K) -> Self {
        let registration = registration_config(config);
        let pool = ThreadedPool::new(pool_size(size, config), size, &registration);
        Self::with_pool(pool, sink)
    }

    /// Create a controller running a custom registration backend on a threaded pool.
    ///
    /// `make_strategy` is called once per worker with the worker slot index.
    pub fn with_strategy<S, F>(
        size: FrameSize,
        config: &TrackingConfig,
        make_strategy: F,
        sink: K,
    ) -> Self
    where
        S: RegistrationStrategy + 'static,
        F: FnMut(usize) -> S,
    {
        let registration = registration_config(config);
        let pool =
            ThreadedPool::with_strategy(pool_size(size, config), size, &registration, make_strategy);
        Self::with_pool(pool, sink)
    }
}

impl<K: FrameSink, P: WorkerPool> TrackingController<K, P> {
    /// Create a controller on top of an existing pool.
    pub fn with_pool(pool: P, sink: K) -> Self {
        let num_workers = pool.num_workers();
        if num_workers == 0 {
            log::info!("no registration workers available, frames will pass through");
        }

        Self {
            pool,
            sink,
            slots: (0..num_workers).map(|_| None).collect(),
            wait_queue: VecDeque::new(),
            pending: VecDeque::new(),
            deferred: VecDeque::new(),
            previous: None,
            pose: RigidTransform::IDENTITY,
            next_sequence: 0,
            stats: TrackingStats::default(),
        }
    }

    /// Hand a new frame to the controller.
    ///
    /// Completions already delivered by the pool are processed first. An
    /// invalid frame, or any frame on a null controller, is emitted right
    /// away. Otherwise the frame is dispatched to the first idle worker, or
    /// queued when all of them are busy.
    ///
    /// Forwarded frames are not ordered against registered ones: an invalid
    /// end of stream marker reaches the sink before the results still
    /// pending. Call [`TrackingController::flush`] to know the stream is drained.
    pub fn submit(&mut self, frame: Frame) {
        self.poll();
        self.stats.submitted += 1;

        if self.is_null() || !frame.is_valid() {
            self.stats.passed_through += 1;
            self.sink.emit(TrackingOutput::PassThrough(frame));
            return;
        }

        let key = OrderKey {
            timestamp_ms: frame.timestamp_ms(),
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;

        match self.slots.iter().position(Option::is_none) {
            Some(slot) => {
                self.dispatch(slot, key, frame);
                self.drain_deferred();
            }
            None => {
                self.wait_queue.push_back((key, frame));
                self.stats.queued += 1;
                self.stats.peak_queue_len = self.stats.peak_queue_len.max(self.wait_queue.len());
            }
        }
    }

    /// Handle the completion of the job running on `done.slot`.
    ///
    /// The slot picks up the next queued frame, if any, and every result that
    /// can no longer be overtaken by an earlier frame is emitted. Completions
    /// for idle or unknown slots are ignored.
    pub fn on_worker_done(&mut self, done: WorkerDone) {
        self.complete(done);
        self.drain_deferred();
    }

    /// Process the completions the pool has already delivered, without blocking.
    ///
    /// Returns the number of completions handled.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while let Some(done) = self.pool.try_recv() {
            self.on_worker_done(done);
            handled += 1;
        }
        handled
    }

    /// Block until every submitted frame has been registered and emitted.
    pub fn flush(&mut self) {
        self.drain_deferred();

        while self.num_in_flight() > 0 {
            match self.pool.recv() {
                Some(done) => self.on_worker_done(done),
                None => {
                    log::error!(
                        "worker pool disconnected with {} frames in flight",
                        self.num_in_flight()
                    );
                    self.abandon_in_flight();
                    break;
                }
            }
        }

        self.release();
    }

    /// Whether the controller has no workers and forwards every frame.
    pub fn is_null(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether the controller registers frames.
    pub fn is_valid(&self) -> bool {
        !self.is_null()
    }

    /// Number of worker slots.
    pub fn num_workers(&self) -> usize {
        self.slots.len()
    }

    /// Number of busy workers.
    pub fn num_in_flight(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Number of frames waiting for an idle worker.
    pub fn num_queued(&self) -> usize {
        self.wait_queue.len()
    }

    /// Number of registered frames held back to preserve the output order.
    pub fn num_pending(&self) -> usize {
        self.pending.len()
    }

    /// Get the activity counters.
    pub fn stats(&self) -> TrackingStats {
        self.stats
    }

    /// Get the downstream sink.
    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Get the downstream sink mutably.
    pub fn sink_mut(&mut self) -> &mut K {
        &mut self.sink
    }

    fn dispatch(&mut self, slot: usize, key: OrderKey, frame: Frame) {
        let source = self.previous.replace(frame.clone());
        self.slots[slot] = Some(InFlight {
            key,
            frame: frame.clone(),
        });
        self.stats.dispatched += 1;
        self.stats.peak_in_flight = self.stats.peak_in_flight.max(self.num_in_flight());

        let job = RegistrationJob {
            slot,
            target: frame,
            source,
        };
        if let Err(e) = self.pool.dispatch(job) {
            log::warn!(
                "could not dispatch frame {}, passing it unregistered: {}",
                key.timestamp_ms,
                e
            );
            self.stats.dispatch_failures += 1;
            if let Some(in_flight) = &self.slots[slot] {
                self.deferred.push_back(WorkerDone {
                    slot,
                    result: RegistrationResult::identity(in_flight.frame.clone()),
                });
            }
        }
    }

    fn complete(&mut self, done: WorkerDone) {
        let WorkerDone { slot, result } = done;

        let Some(in_flight) = self.slots.get_mut(slot).and_then(Option::take) else {
            log::warn!(
                "ignoring completion of frame {} from idle or unknown worker {slot}",
                result.frame.timestamp_ms()
            );
            return;
        };

        if let Some((key, frame)) = self.wait_queue.pop_front() {
            self.dispatch(slot, key, frame);
        }

        let position = self.pending.partition_point(|p| p.key < in_flight.key);
        self.pending.insert(
            position,
            Pending {
                key: in_flight.key,
                result,
            },
        );

        self.release();
    }

    fn drain_deferred(&mut self) {
        while let Some(done) = self.deferred.pop_front() {
            self.complete(done);
        }
    }

    fn abandon_in_flight(&mut self) {
        let stuck = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(slot, in_flight)| {
                in_flight.as_ref().map(|in_flight| WorkerDone {
                    slot,
                    result: RegistrationResult::identity(in_flight.frame.clone()),
                })
            })
            .collect::<Vec<_>>();
        self.deferred.extend(stuck);
        self.drain_deferred();
    }

    /// The earliest frame that is still being registered or waiting.
    fn earliest_outstanding(&self) -> Option<OrderKey> {
        let in_flight = self.slots.iter().flatten().map(|in_flight| in_flight.key);
        let queued = self.wait_queue.iter().map(|(key, _)| *key);
        in_flight.chain(queued).min()
    }

    fn release(&mut self) {
        let horizon = self.earliest_outstanding();

        while let Some(front) = self.pending.front() {
            if horizon.is_some_and(|horizon| front.key >= horizon) {
                break;
            }
            let Some(Pending { result, .. }) = self.pending.pop_front() else {
                break;
            };

            let RegistrationResult { frame, transform } = result;
            self.pose = self.pose.compose(&transform.inverse());
            self.stats.released += 1;
            self.sink.emit(TrackingOutput::Tracked(TrackedFrame {
                frame,
                transform,
                pose: self.pose,
            }));
        }
    }
}

impl<K: FrameSink, P: WorkerPool> Drop for TrackingController<K, P> {
    fn drop(&mut self) {
        self.pool.shutdown();

        let discarded = self.num_in_flight() + self.num_queued() + self.num_pending();
        if discarded > 0 {
            log::debug!("tracking stopped, discarding {discarded} unreleased frames");
        }
    }
}

fn pool_size(size: FrameSize, config: &TrackingConfig) -> usize {
    if size.is_empty() {
        log::warn!("empty frame size {size}, tracking disabled");
        return 0;
    }
    config.resolved_num_workers()
}

fn registration_config(config: &TrackingConfig) -> RegistrationConfig {
    match config.registration.validate() {
        Ok(()) => config.registration.clone(),
        Err(e) => {
            log::warn!("invalid registration config, using defaults: {e}");
            RegistrationConfig::default()
        }
    }
}
