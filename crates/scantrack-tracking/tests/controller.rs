use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use rand::{rngs::StdRng, Rng, SeedableRng};

use scantrack_core::{Frame, FrameSize, RigidTransform};
use scantrack_tracking::{
    DispatchError, FrameSink, RegistrationJob, RegistrationResult, TrackingController,
    TrackingOutput, WorkerDone, WorkerPool,
};

const SIZE: FrameSize = FrameSize {
    width: 2,
    height: 2,
};

#[derive(Default)]
struct PoolState {
    dispatched: Vec<RegistrationJob>,
    running: Vec<RegistrationJob>,
    ready: VecDeque<WorkerDone>,
    reject: bool,
    shutdown: bool,
}

/// A pool that never runs anything on its own: the test decides when and in
/// which order jobs complete.
struct MockPool {
    num_workers: usize,
    state: Rc<RefCell<PoolState>>,
}

impl MockPool {
    fn new(num_workers: usize) -> (Self, Rc<RefCell<PoolState>>) {
        let state = Rc::new(RefCell::new(PoolState::default()));
        let pool = Self {
            num_workers,
            state: state.clone(),
        };
        (pool, state)
    }
}

impl WorkerPool for MockPool {
    fn num_workers(&self) -> usize {
        self.num_workers
    }

    fn dispatch(&mut self, job: RegistrationJob) -> Result<(), DispatchError> {
        let mut state = self.state.borrow_mut();
        if job.slot >= self.num_workers {
            return Err(DispatchError::UnknownSlot(job.slot));
        }
        if state.reject {
            return Err(DispatchError::Disconnected(job.slot));
        }
        assert!(
            state.running.iter().all(|running| running.slot != job.slot),
            "slot {} dispatched while busy",
            job.slot
        );
        state.dispatched.push(job.clone());
        state.running.push(job);
        Ok(())
    }

    fn try_recv(&mut self) -> Option<WorkerDone> {
        self.state.borrow_mut().ready.pop_front()
    }

    fn recv(&mut self) -> Option<WorkerDone> {
        let mut state = self.state.borrow_mut();
        if let Some(done) = state.ready.pop_front() {
            return Some(done);
        }
        if state.running.is_empty() {
            return None;
        }
        let job = state.running.remove(0);
        Some(finished(job))
    }

    fn shutdown(&mut self) {
        self.state.borrow_mut().shutdown = true;
    }
}

#[derive(Default)]
struct Collector {
    outputs: Vec<TrackingOutput>,
}

impl FrameSink for Collector {
    fn emit(&mut self, output: TrackingOutput) {
        self.outputs.push(output);
    }
}

impl Collector {
    fn timestamps(&self) -> Vec<u64> {
        self.outputs.iter().map(TrackingOutput::timestamp_ms).collect()
    }
}

fn frame(timestamp_ms: u64) -> Frame {
    let points = vec![[0.0, 0.0, 1.0, 1.0]; SIZE.num_points()];
    Frame::new(SIZE, points, timestamp_ms).expect("valid frame")
}

/// The transform a mock worker reports for a frame: a translation along x
/// derived from the timestamp.
fn motion(timestamp_ms: u64) -> RigidTransform {
    RigidTransform::new(
        RigidTransform::IDENTITY.rotation,
        [timestamp_ms as f64 * 1e-3, 0.0, 0.0],
    )
}

fn finished(job: RegistrationJob) -> WorkerDone {
    let transform = motion(job.target.timestamp_ms());
    WorkerDone {
        slot: job.slot,
        result: RegistrationResult {
            frame: job.target,
            transform,
        },
    }
}

/// Complete the running job registering the frame stamped `timestamp_ms`.
fn complete(
    controller: &mut TrackingController<Collector, MockPool>,
    state: &Rc<RefCell<PoolState>>,
    timestamp_ms: u64,
) {
    let job = {
        let mut state = state.borrow_mut();
        let index = state
            .running
            .iter()
            .position(|job| job.target.timestamp_ms() == timestamp_ms)
            .expect("frame is running");
        state.running.remove(index)
    };
    controller.on_worker_done(finished(job));
}

#[test]
fn test_out_of_order_completion_released_in_order() {
    let (pool, state) = MockPool::new(4);
    let mut controller = TrackingController::with_pool(pool, Collector::default());

    for ts in [0, 10, 20, 30] {
        controller.submit(frame(ts));
    }
    assert_eq!(controller.num_in_flight(), 4);
    assert_eq!(controller.num_queued(), 0);

    complete(&mut controller, &state, 30);
    assert!(controller.sink().outputs.is_empty());
    assert_eq!(controller.num_pending(), 1);

    complete(&mut controller, &state, 10);
    assert!(controller.sink().outputs.is_empty());

    complete(&mut controller, &state, 0);
    assert_eq!(controller.sink().timestamps(), vec![0, 10]);

    complete(&mut controller, &state, 20);
    assert_eq!(controller.sink().timestamps(), vec![0, 10, 20, 30]);
    assert!(controller
        .sink()
        .outputs
        .iter()
        .all(TrackingOutput::is_tracked));
    assert_eq!(controller.num_pending(), 0);
    assert_eq!(controller.stats().released, 4);
}

#[test]
fn test_random_completion_order_keeps_output_sorted() {
    let mut rng = StdRng::seed_from_u64(42);
    let num_workers = 2;
    let (pool, state) = MockPool::new(num_workers);
    let mut controller = TrackingController::with_pool(pool, Collector::default());

    let mut next_ts = 0;
    for _ in 0..20 {
        controller.submit(frame(next_ts));
        next_ts += 33;
        assert!(controller.num_in_flight() <= num_workers);

        // complete a random subset of the running jobs in random order
        let num_running = state.borrow().running.len();
        for _ in 0..rng.random_range(0..=num_running) {
            let running = state
                .borrow()
                .running
                .iter()
                .map(|job| job.target.timestamp_ms())
                .collect::<Vec<_>>();
            let ts = running[rng.random_range(0..running.len())];
            complete(&mut controller, &state, ts);
            assert!(controller.num_in_flight() <= num_workers);
        }

        let emitted = controller.sink().timestamps();
        assert!(emitted.windows(2).all(|w| w[0] < w[1]));
    }

    controller.flush();

    let expected = (0..20).map(|i| i * 33).collect::<Vec<_>>();
    assert_eq!(controller.sink().timestamps(), expected);
    assert_eq!(controller.num_in_flight(), 0);
    assert_eq!(controller.num_queued(), 0);
    assert_eq!(controller.num_pending(), 0);

    let stats = controller.stats();
    assert_eq!(stats.submitted, 20);
    assert_eq!(stats.dispatched, 20);
    assert_eq!(stats.released, 20);
    assert!(stats.peak_in_flight <= num_workers);
}

#[test]
fn test_earlier_timestamp_submitted_late_is_not_overtaken() {
    let (pool, state) = MockPool::new(2);
    let mut controller = TrackingController::with_pool(pool, Collector::default());

    controller.submit(frame(20));
    controller.submit(frame(10));

    complete(&mut controller, &state, 20);
    assert!(controller.sink().outputs.is_empty());

    complete(&mut controller, &state, 10);
    assert_eq!(controller.sink().timestamps(), vec![10, 20]);
}

#[test]
fn test_invalid_frame_passes_through_immediately() {
    let (pool, state) = MockPool::new(2);
    let mut controller = TrackingController::with_pool(pool, Collector::default());

    controller.submit(frame(0));
    controller.submit(Frame::invalid(5));

    // forwarded even though frame 0 is still running
    assert_eq!(controller.sink().timestamps(), vec![5]);
    assert!(matches!(
        controller.sink().outputs[0],
        TrackingOutput::PassThrough(_)
    ));
    assert_eq!(controller.num_in_flight(), 1);

    // the chain skips the invalid frame
    controller.submit(frame(10));
    let source = state.borrow().dispatched[1]
        .source
        .as_ref()
        .map(Frame::timestamp_ms);
    assert_eq!(source, Some(0));

    controller.flush();
    assert_eq!(controller.sink().timestamps(), vec![5, 0, 10]);
    assert_eq!(controller.stats().passed_through, 1);
}

#[test]
fn test_null_pool_forwards_in_submission_order() {
    let (pool, state) = MockPool::new(0);
    let mut controller = TrackingController::with_pool(pool, Collector::default());
    assert!(controller.is_null());
    assert!(!controller.is_valid());

    for ts in [30, 0, 10] {
        controller.submit(frame(ts));
    }
    controller.submit(Frame::invalid(40));
    controller.flush();

    assert_eq!(controller.sink().timestamps(), vec![30, 0, 10, 40]);
    assert!(controller
        .sink()
        .outputs
        .iter()
        .all(|output| !output.is_tracked()));
    assert!(state.borrow().dispatched.is_empty());
}

#[test]
fn test_chain_through_wait_queue() {
    let (pool, state) = MockPool::new(1);
    let mut controller = TrackingController::with_pool(pool, Collector::default());

    for ts in [0, 10, 20] {
        controller.submit(frame(ts));
    }
    assert_eq!(controller.num_in_flight(), 1);
    assert_eq!(controller.num_queued(), 2);

    complete(&mut controller, &state, 0);
    assert_eq!(controller.num_queued(), 1);
    complete(&mut controller, &state, 10);
    complete(&mut controller, &state, 20);

    let chain = state
        .borrow()
        .dispatched
        .iter()
        .map(|job| {
            (
                job.target.timestamp_ms(),
                job.source.as_ref().map(Frame::timestamp_ms),
            )
        })
        .collect::<Vec<_>>();
    assert_eq!(chain, vec![(0, None), (10, Some(0)), (20, Some(10))]);
    assert!(state.borrow().dispatched.iter().all(|job| job.slot == 0));

    assert_eq!(controller.sink().timestamps(), vec![0, 10, 20]);
    let stats = controller.stats();
    assert_eq!(stats.queued, 2);
    assert_eq!(stats.peak_queue_len, 2);
    assert_eq!(stats.peak_in_flight, 1);
}

#[test]
fn test_source_shares_previous_frame_points() {
    let (pool, state) = MockPool::new(2);
    let mut controller = TrackingController::with_pool(pool, Collector::default());

    let first = frame(0);
    controller.submit(first.clone());
    controller.submit(frame(10));

    let state = state.borrow();
    let source = state.dispatched[1].source.as_ref().expect("chained");
    assert!(source.shares_points_with(&first));
}

#[test]
fn test_spurious_completion_ignored() {
    let (pool, state) = MockPool::new(2);
    let mut controller = TrackingController::with_pool(pool, Collector::default());

    controller.submit(frame(0));

    // slot 1 is idle, slot 7 does not exist
    for slot in [1, 7] {
        controller.on_worker_done(WorkerDone {
            slot,
            result: RegistrationResult::identity(frame(99)),
        });
    }
    assert!(controller.sink().outputs.is_empty());
    assert_eq!(controller.num_in_flight(), 1);
    assert_eq!(controller.num_pending(), 0);

    complete(&mut controller, &state, 0);
    assert_eq!(controller.sink().timestamps(), vec![0]);
}

#[test]
fn test_dispatch_failure_passes_identity() {
    let (pool, state) = MockPool::new(2);
    state.borrow_mut().reject = true;
    let mut controller = TrackingController::with_pool(pool, Collector::default());

    for ts in [0, 10, 20] {
        controller.submit(frame(ts));
    }

    assert_eq!(controller.num_in_flight(), 0);
    assert_eq!(controller.num_queued(), 0);
    assert_eq!(controller.sink().timestamps(), vec![0, 10, 20]);
    for output in &controller.sink().outputs {
        let tracked = output.tracked().expect("tracked output");
        assert_eq!(tracked.transform, RigidTransform::IDENTITY);
    }
    assert_eq!(controller.stats().dispatch_failures, 3);
}

#[test]
fn test_poll_drains_ready_completions() {
    let (pool, state) = MockPool::new(2);
    let mut controller = TrackingController::with_pool(pool, Collector::default());

    controller.submit(frame(0));
    controller.submit(frame(10));
    assert_eq!(controller.poll(), 0);

    {
        let mut state = state.borrow_mut();
        let jobs = state.running.drain(..).rev().collect::<Vec<_>>();
        state.ready.extend(jobs.into_iter().map(finished));
    }
    assert_eq!(controller.poll(), 2);
    assert_eq!(controller.sink().timestamps(), vec![0, 10]);
}

#[test]
fn test_submit_processes_delivered_completions() {
    let (pool, state) = MockPool::new(1);
    let mut controller = TrackingController::with_pool(pool, Collector::default());

    controller.submit(frame(0));
    {
        let mut state = state.borrow_mut();
        let job = state.running.remove(0);
        state.ready.push_back(finished(job));
    }

    // the slot is free again by the time frame 10 is placed
    controller.submit(frame(10));
    assert_eq!(controller.num_queued(), 0);
    assert_eq!(controller.sink().timestamps(), vec![0]);
}

#[test]
fn test_pose_accumulates_in_release_order() {
    let (pool, state) = MockPool::new(3);
    let mut controller = TrackingController::with_pool(pool, Collector::default());

    for ts in [0, 10, 20] {
        controller.submit(frame(ts));
    }
    complete(&mut controller, &state, 20);
    complete(&mut controller, &state, 0);
    complete(&mut controller, &state, 10);

    let poses = controller
        .sink()
        .outputs
        .iter()
        .map(|output| output.tracked().expect("tracked").pose.translation[0])
        .collect::<Vec<_>>();

    // each frame moved by +ts mm along x, so the pose walks back
    let expected = [0.0, -0.010, -0.030];
    for (pose, expected) in poses.iter().zip(expected.iter()) {
        approx::assert_relative_eq!(*pose, *expected, epsilon = 1e-12);
    }
}

#[test]
fn test_drop_shuts_pool_down_without_emitting() {
    let (pool, state) = MockPool::new(2);
    let outputs = Rc::new(RefCell::new(Vec::new()));
    let sink = {
        let outputs = outputs.clone();
        move |output: TrackingOutput| outputs.borrow_mut().push(output.timestamp_ms())
    };

    let mut controller = TrackingController::with_pool(pool, sink);
    for ts in [0, 10, 20] {
        controller.submit(frame(ts));
    }
    assert_eq!(controller.num_queued(), 1);
    drop(controller);

    assert!(state.borrow().shutdown);
    assert!(outputs.borrow().is_empty());
}

#[test]
fn test_end_of_stream_marker_overtakes_pending_results() {
    let (pool, _state) = MockPool::new(2);
    let mut controller = TrackingController::with_pool(pool, Collector::default());

    controller.submit(frame(0));
    controller.submit(frame(10));
    controller.submit(Frame::invalid(20));

    // the marker is out while both frames are still registering
    let early = std::mem::take(&mut controller.sink_mut().outputs);
    assert_eq!(early.len(), 1);
    let marker = early
        .into_iter()
        .next()
        .map(TrackingOutput::into_frame)
        .expect("marker emitted");
    assert!(!marker.is_valid());
    assert_eq!(marker.timestamp_ms(), 20);
    assert_eq!(controller.num_in_flight(), 2);

    controller.flush();
    let frames = controller
        .sink_mut()
        .outputs
        .drain(..)
        .map(TrackingOutput::into_frame)
        .collect::<Vec<_>>();
    assert_eq!(
        frames.iter().map(Frame::timestamp_ms).collect::<Vec<_>>(),
        vec![0, 10]
    );
    assert!(frames.iter().all(Frame::is_valid));
    assert!(controller.sink().outputs.is_empty());
}
