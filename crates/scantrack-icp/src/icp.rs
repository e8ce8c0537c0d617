use std::collections::VecDeque;

use scantrack_core::{linalg::transform_points_inplace, RigidTransform};

use crate::ops::{
    find_correspondences, fit_transformation, update_transformation, Correspondence, TargetTree,
    MIN_CORRESPONDENCES,
};
use crate::{IcpConfig, IcpError, RegistrationStrategy};

/// Result of the ICP algorithm.
///
/// The transformation is from the source to the target frame.
#[derive(Debug, Clone)]
pub struct IcpResult {
    /// Estimated source to target transform.
    pub transform: RigidTransform,
    /// The total number of iterations performed.
    pub num_iterations: usize,
    /// Root mean square distance of the retained correspondences in the last iteration.
    pub rmse: f64,
    /// Whether the convergence criteria were met before the iteration cap.
    pub converged: bool,
}

/// Point-to-point iterative closest point with trimmed correspondences.
///
/// The working buffers live in the struct and are reused across calls.
pub struct PointToPointIcp {
    config: IcpConfig,
    current_source: Vec<[f64; 3]>,
    correspondences: Vec<Correspondence>,
    history: VecDeque<(f64, f64)>,
}

impl PointToPointIcp {
    /// Create a new ICP solver with the given parameters.
    pub fn new(config: IcpConfig) -> Self {
        let history = VecDeque::with_capacity(config.smoothing_window + 1);
        Self {
            config,
            current_source: Vec::new(),
            correspondences: Vec::new(),
            history,
        }
    }

    /// Create a solver whose buffers can hold `capacity` points without reallocating.
    pub fn with_capacity(config: IcpConfig, capacity: usize) -> Self {
        let mut icp = Self::new(config);
        icp.current_source.reserve(capacity);
        icp.correspondences.reserve(capacity);
        icp
    }

    /// Get the solver parameters.
    pub fn config(&self) -> &IcpConfig {
        &self.config
    }

    /// Align `source` onto `target` starting from `initial`.
    ///
    /// # Arguments
    ///
    /// * `target` - Target points, indexed with a kd-tree.
    /// * `source` - Source points, moved towards the target at every iteration.
    /// * `initial` - Initial guess of the source to target transform.
    ///
    /// # Returns
    ///
    /// The accumulated transform with iteration diagnostics.
    pub fn align(
        &mut self,
        target: &[[f64; 3]],
        source: &[[f64; 3]],
        initial: &RigidTransform,
    ) -> Result<IcpResult, IcpError> {
        self.config.validate()?;

        let num_points = target.len().min(source.len());
        if num_points < MIN_CORRESPONDENCES {
            return Err(IcpError::NotEnoughPoints {
                required: MIN_CORRESPONDENCES,
                actual: num_points,
            });
        }

        // build kdtree for target points to speed up the nearest neighbor search
        let kdtree = TargetTree::new_from_slice(target);

        // start from the source moved by the initial guess
        self.current_source.clear();
        self.current_source
            .extend(source.iter().map(|p| initial.transform_point(p)));
        self.history.clear();

        let mut result = IcpResult {
            transform: *initial,
            num_iterations: 0,
            rmse: f64::INFINITY,
            converged: false,
        };

        for i in 0..self.config.max_iterations {
            find_correspondences(
                &self.current_source,
                &kdtree,
                self.config.outlier_ratio,
                &mut self.correspondences,
            );

            let delta = fit_transformation(&self.current_source, target, &self.correspondences)?;

            transform_points_inplace(&mut self.current_source, &delta.rotation, &delta.translation);
            update_transformation(&mut result.transform, &delta);

            let sum_sq = self.correspondences.iter().map(|c| c.distance).sum::<f64>();
            result.rmse = (sum_sq / self.correspondences.len() as f64).sqrt();
            result.num_iterations = i + 1;

            self.history
                .push_back((delta.rotation_angle(), delta.translation_norm()));
            if self.history.len() > self.config.smoothing_window {
                self.history.pop_front();
            }

            log::debug!(
                "icp iteration {}: {} correspondences, rmse {:.6}",
                i,
                self.correspondences.len(),
                result.rmse
            );

            if self.has_converged() {
                result.converged = true;
                break;
            }
        }

        if !result.transform.is_rigid(1e-6) {
            return Err(IcpError::Degenerate("accumulated transform is not rigid"));
        }

        log::debug!(
            "icp finished after {} iterations, converged: {}, rmse {:.6}",
            result.num_iterations,
            result.converged,
            result.rmse
        );

        Ok(result)
    }

    /// Mean incremental motion over the trailing window is below both epsilons.
    fn has_converged(&self) -> bool {
        if self.history.len() < self.config.smoothing_window {
            return false;
        }
        let n = self.history.len() as f64;
        let (rot, trans) = self
            .history
            .iter()
            .fold((0.0, 0.0), |(r, t), (dr, dt)| (r + dr, t + dt));
        rot / n < self.config.rotation_epsilon && trans / n < self.config.translation_epsilon
    }
}

impl RegistrationStrategy for PointToPointIcp {
    fn find_transform(
        &mut self,
        target: &[[f64; 3]],
        source: &[[f64; 3]],
    ) -> Result<RigidTransform, IcpError> {
        self.align(target, source, &RigidTransform::IDENTITY)
            .map(|result| result.transform)
    }
}
