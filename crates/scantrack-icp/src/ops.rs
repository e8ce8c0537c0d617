use kiddo::immutable::float::kdtree::ImmutableKdTree;
use scantrack_core::{
    linalg::{det_mat33, mat33_mul_vec3},
    RigidTransform,
};

use crate::IcpError;

/// Kd-tree over the target points used for nearest neighbour search.
pub(crate) type TargetTree = ImmutableKdTree<f64, u32, 3, 32>;

/// Minimum number of correspondences for a rigid fit.
pub(crate) const MIN_CORRESPONDENCES: usize = 3;

/// A matched pair between the source and the target point sets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    /// Index into the source points.
    pub source: usize,
    /// Index into the target points.
    pub target: usize,
    /// Squared euclidean distance between both points.
    pub distance: f64,
}

/// Find the nearest target point of every source point and keep the closest
/// `keep_ratio` fraction of the pairs.
///
/// The output buffer is cleared and refilled so it can be reused.
pub(crate) fn find_correspondences(
    source: &[[f64; 3]],
    kdtree: &TargetTree,
    keep_ratio: f64,
    correspondences: &mut Vec<Correspondence>,
) {
    correspondences.clear();
    correspondences.extend(source.iter().enumerate().map(|(i, p)| {
        let nn = kdtree.nearest_one::<kiddo::SquaredEuclidean>(p);
        Correspondence {
            source: i,
            target: nn.item as usize,
            distance: nn.distance,
        }
    }));

    let num_total = correspondences.len();
    let num_keep = ((num_total as f64 * keep_ratio).round() as usize)
        .max(MIN_CORRESPONDENCES)
        .min(num_total);

    // trim the worst pairs, the first `num_keep` entries end up the closest ones
    if num_keep < num_total {
        correspondences
            .select_nth_unstable_by(num_keep, |a, b| a.distance.total_cmp(&b.distance));
        correspondences.truncate(num_keep);
    }
}

/// Compute the centroids of the matched source and target points.
///
/// # Arguments
///
/// * `source` - The source points.
/// * `target` - The target points.
/// * `correspondences` - The pairs to average over.
///
/// # Returns
///
/// The centroids of the matched source and target points.
pub fn compute_centroids(
    source: &[[f64; 3]],
    target: &[[f64; 3]],
    correspondences: &[Correspondence],
) -> ([f64; 3], [f64; 3]) {
    let mut src_centroid = [0.0; 3];
    let mut dst_centroid = [0.0; 3];

    for c in correspondences {
        let (p_src, p_dst) = (&source[c.source], &target[c.target]);
        for i in 0..3 {
            src_centroid[i] += p_src[i];
            dst_centroid[i] += p_dst[i];
        }
    }

    let n = correspondences.len().max(1) as f64;
    for i in 0..3 {
        src_centroid[i] /= n;
        dst_centroid[i] /= n;
    }

    (src_centroid, dst_centroid)
}

/// Compute the rigid transformation that best maps the matched source points
/// onto their target points in the least squares sense.
///
/// Closed form solution from the SVD of the cross covariance matrix, with the
/// sign of the last singular vector flipped when the result is a reflection.
///
/// For more details, see: Arun, K., Huang, T. S., and Blostein, S. D.
/// "Least-squares fitting of two 3-D point sets." IEEE PAMI, 1987.
pub fn fit_transformation(
    source: &[[f64; 3]],
    target: &[[f64; 3]],
    correspondences: &[Correspondence],
) -> Result<RigidTransform, IcpError> {
    if correspondences.len() < MIN_CORRESPONDENCES {
        return Err(IcpError::NotEnoughPoints {
            required: MIN_CORRESPONDENCES,
            actual: correspondences.len(),
        });
    }

    let (src_centroid, dst_centroid) = compute_centroids(source, target, correspondences);

    // cross covariance H = Σ[(src - src_mean) * (dst - dst_mean)^T]
    let mut h = [[0.0f64; 3]; 3];
    for c in correspondences {
        let (p_src, p_dst) = (&source[c.source], &target[c.target]);
        let sc = [
            p_src[0] - src_centroid[0],
            p_src[1] - src_centroid[1],
            p_src[2] - src_centroid[2],
        ];
        let dc = [
            p_dst[0] - dst_centroid[0],
            p_dst[1] - dst_centroid[1],
            p_dst[2] - dst_centroid[2],
        ];
        for (r, sc_r) in sc.iter().enumerate() {
            for (col, dc_c) in dc.iter().enumerate() {
                h[r][col] += sc_r * dc_c;
            }
        }
    }

    if !h.iter().flatten().all(|v| v.is_finite()) {
        return Err(IcpError::NonFinite);
    }

    let h_mat = faer::Mat::<f64>::from_fn(3, 3, |i, j| h[i][j]);
    let svd = h_mat.svd();
    let s = svd.s_diagonal();
    let (s0, s1) = (s.read(0), s.read(1));
    if !(s0 > f64::EPSILON) {
        return Err(IcpError::Degenerate("points collapse to a single location"));
    }
    if s1 <= 1e-9 * s0 {
        return Err(IcpError::Degenerate("points are collinear"));
    }

    let u = svd.u();
    let v = svd.v();

    // R = V * D * U^T, with D = diag(1, 1, det(V * U^T)) to avoid reflections
    let rotation_with = |d: [f64; 3]| {
        let mut r = [[0.0; 3]; 3];
        for (i, row) in r.iter_mut().enumerate() {
            for (j, out) in row.iter_mut().enumerate() {
                *out = (0..3).map(|k| d[k] * v.read(i, k) * u.read(j, k)).sum();
            }
        }
        r
    };

    let mut rotation = rotation_with([1.0, 1.0, 1.0]);
    if det_mat33(&rotation) < 0.0 {
        rotation = rotation_with([1.0, 1.0, -1.0]);
    }

    let r_src = mat33_mul_vec3(&rotation, &src_centroid);
    let translation = [
        dst_centroid[0] - r_src[0],
        dst_centroid[1] - r_src[1],
        dst_centroid[2] - r_src[2],
    ];

    let transform = RigidTransform::new(rotation, translation);
    if !transform.is_finite() {
        return Err(IcpError::NonFinite);
    }

    Ok(transform)
}

/// Accumulate an incremental transform into the running total.
///
/// The increment is estimated on points already moved by `total`, so
/// `total_new = delta * total_old`.
pub(crate) fn update_transformation(total: &mut RigidTransform, delta: &RigidTransform) {
    *total = delta.compose(total);
}
