use scantrack_core::{frame::is_valid_point, Frame, FrameSize, RigidTransform};

use crate::{PointToPointIcp, RegistrationConfig, RegistrationStrategy};

/// Copy the valid points of a frame into `out`, keeping every `stride`-th
/// column and row of the grid.
///
/// The buffer is cleared first so it can be reused across frames.
///
/// # Arguments
///
/// * `frame` - The frame to sample.
/// * `stride` - Downsample factor in both grid dimensions, zero is treated as one.
/// * `out` - The output buffer.
pub fn extract_points(frame: &Frame, stride: usize, out: &mut Vec<[f64; 3]>) {
    out.clear();

    let stride = stride.max(1);
    let FrameSize { width, height } = frame.size();
    let points = frame.points();

    for row in (0..height).step_by(stride) {
        let row_points = &points[row * width..(row + 1) * width];
        for p in row_points.iter().step_by(stride) {
            if is_valid_point(p) {
                out.push([p[0] as f64, p[1] as f64, p[2] as f64]);
            }
        }
    }
}

/// Number of grid points left after downsampling a frame of `size`.
pub fn sampled_capacity(size: FrameSize, stride: usize) -> usize {
    let stride = stride.max(1);
    size.width.div_ceil(stride) * size.height.div_ceil(stride)
}

/// Registers pairs of frames with a fixed point budget.
///
/// Owns the scratch buffers for the extracted points and the registration
/// backend, one instance per worker thread. Nothing is shared between
/// instances.
pub struct RegistrationWorker<S: RegistrationStrategy = PointToPointIcp> {
    config: RegistrationConfig,
    strategy: S,
    target_points: Vec<[f64; 3]>,
    source_points: Vec<[f64; 3]>,
}

impl RegistrationWorker<PointToPointIcp> {
    /// Create a worker using point-to-point ICP, with buffers sized for `size` frames.
    pub fn new(size: FrameSize, config: RegistrationConfig) -> Self {
        let capacity = sampled_capacity(size, config.downsample_stride);
        let strategy = PointToPointIcp::with_capacity(config.icp.clone(), capacity);
        Self::with_strategy(size, config, strategy)
    }
}

impl<S: RegistrationStrategy> RegistrationWorker<S> {
    /// Create a worker with a custom registration backend.
    pub fn with_strategy(size: FrameSize, config: RegistrationConfig, strategy: S) -> Self {
        let capacity = sampled_capacity(size, config.downsample_stride);
        Self {
            config,
            strategy,
            target_points: Vec::with_capacity(capacity),
            source_points: Vec::with_capacity(capacity),
        }
    }

    /// Get the worker parameters.
    pub fn config(&self) -> &RegistrationConfig {
        &self.config
    }

    /// Get the registration backend.
    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Compute the rigid transform aligning `source` onto `target`.
    ///
    /// Returns the identity when either frame is invalid, when fewer than
    /// `min_points` valid samples survive downsampling in either frame, or
    /// when the backend fails. Never panics on bad data.
    pub fn register(&mut self, target: &Frame, source: &Frame) -> RigidTransform {
        if !target.is_valid() || !source.is_valid() {
            return RigidTransform::IDENTITY;
        }

        let stride = self.config.downsample_stride;
        extract_points(target, stride, &mut self.target_points);
        extract_points(source, stride, &mut self.source_points);

        let num_points = self.target_points.len().min(self.source_points.len());
        if num_points < self.config.min_points.max(3) {
            log::debug!(
                "skipping registration of frame {} against {}: {} valid points, {} required",
                target.timestamp_ms(),
                source.timestamp_ms(),
                num_points,
                self.config.min_points
            );
            return RigidTransform::IDENTITY;
        }

        match self
            .strategy
            .find_transform(&self.target_points, &self.source_points)
        {
            Ok(transform) => transform,
            Err(e) => {
                log::warn!(
                    "registration of frame {} against {} failed, using identity: {}",
                    target.timestamp_ms(),
                    source.timestamp_ms(),
                    e
                );
                RigidTransform::IDENTITY
            }
        }
    }
}
