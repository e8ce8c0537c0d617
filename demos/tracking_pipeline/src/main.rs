use argh::FromArgs;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::path::PathBuf;

use scantrack::core::{linalg::axis_angle_to_rotation_matrix, Frame, FrameSize, RigidTransform};
use scantrack::tracking::{TrackingConfig, TrackingController, TrackingOutput};

#[derive(FromArgs)]
/// Track a synthetic scanner sweeping over a curved surface
struct Args {
    /// number of frames to generate
    #[argh(option, default = "30")]
    num_frames: u64,

    /// number of registration workers, defaults to the available cores
    #[argh(option)]
    num_workers: Option<usize>,

    /// frame width in points
    #[argh(option, default = "160")]
    width: usize,

    /// frame height in points
    #[argh(option, default = "120")]
    height: usize,

    /// milliseconds between two frames
    #[argh(option, default = "33")]
    frame_interval_ms: u64,

    /// standard deviation bound of the depth noise in meters
    #[argh(option, default = "0.001")]
    noise: f32,

    /// optional JSON tracking config, command line options take precedence
    #[argh(option)]
    config: Option<PathBuf>,
}

/// Sample the surface seen by a scanner at `pose`.
///
/// Roughly one point in fifty is dropped, like a real depth sensor.
fn generate_frame(
    size: FrameSize,
    timestamp_ms: u64,
    pose: &RigidTransform,
    noise: f32,
    rng: &mut StdRng,
) -> Result<Frame, Box<dyn std::error::Error>> {
    let mut points = Vec::with_capacity(size.num_points());
    for row in 0..size.height {
        for col in 0..size.width {
            if rng.random_range(0..50) == 0 {
                points.push([f32::NAN, f32::NAN, f32::NAN, 0.0]);
                continue;
            }
            let x = -1.0 + 2.0 * col as f64 / (size.width.max(2) - 1) as f64;
            let y = -1.0 + 2.0 * row as f64 / (size.height.max(2) - 1) as f64;
            let z = 2.0 + 0.3 * (2.0 * x).sin() + 0.3 * (3.0 * y).cos() + 0.1 * x * y;
            let p = pose.transform_point(&[x, y, z]);
            let dz = if noise > 0.0 {
                rng.random_range(-noise..noise)
            } else {
                0.0
            };
            points.push([p[0] as f32, p[1] as f32, p[2] as f32 + dz, 1.0]);
        }
    }
    Ok(Frame::new(size, points, timestamp_ms)?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let mut config = match &args.config {
        Some(path) => TrackingConfig::from_json_file(path)?,
        None => TrackingConfig::default(),
    };
    if args.num_workers.is_some() {
        config.num_workers = args.num_workers;
    }
    config.validate()?;

    let size = FrameSize::new(args.width, args.height);
    let step = RigidTransform::new(
        axis_angle_to_rotation_matrix(&[0.2, 1.0, 0.0], 0.004)?,
        [0.006, -0.002, 0.003],
    );

    let sink = |output: TrackingOutput| match output {
        TrackingOutput::Tracked(tracked) => {
            let t = tracked.pose.translation;
            println!(
                "frame {:>6} ms: step {:.4} rad {:.4} m, pose t = [{:+.4}, {:+.4}, {:+.4}]",
                tracked.frame.timestamp_ms(),
                tracked.transform.rotation_angle(),
                tracked.transform.translation_norm(),
                t[0],
                t[1],
                t[2]
            );
        }
        TrackingOutput::PassThrough(frame) => {
            println!("frame {:>6} ms: passed through", frame.timestamp_ms());
        }
    };

    let mut controller = TrackingController::new(size, &config, sink);
    log::info!(
        "tracking {} frames of {} with {} workers",
        args.num_frames,
        size,
        controller.num_workers()
    );

    let mut rng = StdRng::seed_from_u64(0);
    let mut pose = RigidTransform::IDENTITY;
    let start = std::time::Instant::now();

    for i in 0..args.num_frames {
        let frame = generate_frame(size, i * args.frame_interval_ms, &pose, args.noise, &mut rng)?;
        controller.submit(frame);
        pose = step.compose(&pose);
    }

    // end of stream
    controller.submit(Frame::invalid(args.num_frames * args.frame_interval_ms));
    controller.flush();

    let stats = controller.stats();
    println!(
        "tracked {} frames in {:?}, peak {} in flight, {} queued",
        stats.released,
        start.elapsed(),
        stats.peak_in_flight,
        stats.queued
    );

    Ok(())
}
